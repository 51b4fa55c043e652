//! Command-line entry point: a file runner and an interactive REPL.
//!
//! Argument parsing via `clap`'s derive API, line editing via `rustyline`,
//! and colorized diagnostics via `ico_runtime::diagnostic`, matching the
//! crates the teacher's own CLI reaches for.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use ico_runtime::diagnostic::{ColorMode, Diagnostic, DiagnosticFormatter};
use ico_runtime::vm::{InterpretError, Vm};
use ico_runtime::VmConfig;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

#[derive(Parser)]
#[command(name = "ico")]
#[command(version = ico_runtime::VERSION)]
#[command(about = "Ico language interpreter", long_about = None)]
struct Args {
    /// Script to run. Omit to start the interactive REPL.
    path: Option<PathBuf>,

    /// Force color output on or off; defaults to auto-detecting the terminal.
    #[arg(long, value_enum)]
    color: Option<CliColorMode>,

    /// Run every allocation through a full GC cycle (stress-tests collector correctness).
    #[arg(long)]
    gc_stress: bool,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum CliColorMode {
    Always,
    Never,
    Auto,
}

impl From<CliColorMode> for ColorMode {
    fn from(value: CliColorMode) -> Self {
        match value {
            CliColorMode::Always => ColorMode::Always,
            CliColorMode::Never => ColorMode::Never,
            CliColorMode::Auto => ColorMode::Auto,
        }
    }
}

const EXIT_OK: u8 = 0;
const EXIT_COMPILE_ERROR: u8 = 65;
const EXIT_RUNTIME_ERROR: u8 = 70;
const EXIT_IO_ERROR: u8 = 74;
const EXIT_USAGE_ERROR: u8 = 64;

fn main() -> ExitCode {
    let args = Args::parse();
    let color_mode = args.color.map(ColorMode::from).unwrap_or_default();
    let formatter = DiagnosticFormatter::new(color_mode);

    let mut config = VmConfig::default();
    config.gc_stress = args.gc_stress;

    let code = match args.path {
        Some(path) => run_file(&path, config, &formatter),
        None => run_repl(config, &formatter),
    };
    ExitCode::from(code)
}

fn run_file(path: &PathBuf, config: VmConfig, formatter: &DiagnosticFormatter) -> u8 {
    let source = match read_source(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("ico: {e:#}");
            return EXIT_IO_ERROR;
        }
    };

    let mut vm = Vm::new(config);
    match vm.interpret(&source) {
        Ok(()) => EXIT_OK,
        Err(InterpretError::Compile(diagnostics)) => {
            emit_all(formatter, &diagnostics);
            EXIT_COMPILE_ERROR
        }
        Err(InterpretError::Runtime(diag)) => {
            formatter.emit_to_stderr(&diag);
            EXIT_RUNTIME_ERROR
        }
    }
}

fn run_repl(config: VmConfig, formatter: &DiagnosticFormatter) -> u8 {
    let mut editor = match DefaultEditor::new() {
        Ok(e) => e,
        Err(e) => {
            eprintln!("ico: can't start line editor: {e}");
            return EXIT_USAGE_ERROR;
        }
    };

    let history_path = history_file_path();
    if let Some(path) = &history_path {
        let _ = editor.load_history(path);
    }

    let mut vm = Vm::new(config);
    println!("ico {} -- interactive mode, Ctrl-D to exit", ico_runtime::VERSION);

    loop {
        match editor.readline("> ") {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line.as_str());
                match vm.interpret(&line) {
                    Ok(()) => {}
                    Err(InterpretError::Compile(diagnostics)) => emit_all(formatter, &diagnostics),
                    Err(InterpretError::Runtime(diag)) => formatter.emit_to_stderr(&diag),
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("ico: readline error: {e}");
                break;
            }
        }
    }

    if let Some(path) = &history_path {
        let _ = editor.save_history(path);
    }
    EXIT_OK
}

fn read_source(path: &PathBuf) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("can't read '{}'", path.display()))
}

fn history_file_path() -> Option<PathBuf> {
    dirs_home().map(|home| home.join(".ico_history"))
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

fn emit_all(formatter: &DiagnosticFormatter, diagnostics: &[Diagnostic]) {
    for diag in diagnostics {
        formatter.emit_to_stderr(diag);
    }
}
