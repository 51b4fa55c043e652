//! Human-facing error reporting.
//!
//! Grounded on the teacher's `atlas-runtime::diagnostic`/`diagnostic::formatter`
//! pair (`Diagnostic` data + `DiagnosticFormatter` rendering, `ColorMode`
//! respecting `NO_COLOR`), trimmed to what this core can actually report:
//! there is no span/column tracking here (tokens carry only a line number),
//! and no machine-readable diagnostic schema (no LSP/JSON consumer exists
//! for this crate), so `Diagnostic` carries a level, a line, a message, and
//! an optional source snippet rather than the teacher's serde-tagged,
//! code-numbered shape.

use crate::errors::{CompileError, RuntimeError, TraceFrame};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// Severity of a reported diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticLevel {
    Error,
    Warning,
}

/// One reported problem: where it happened and what went wrong.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub line: u32,
    pub message: String,
    /// The offending lexeme, when the error was raised at a specific token
    /// rather than at end-of-file.
    pub lexeme: Option<String>,
    /// Call-stack trace, innermost frame last; empty for compile errors.
    pub trace: Vec<TraceFrame>,
}

impl Diagnostic {
    pub fn from_compile_issue(error: CompileError, line: u32, lexeme: Option<String>) -> Self {
        Self {
            level: DiagnosticLevel::Error,
            line,
            message: error.to_string(),
            lexeme,
            trace: Vec::new(),
        }
    }

    pub fn from_runtime_failure(error: RuntimeError, trace: Vec<TraceFrame>) -> Self {
        let line = trace.last().map(|f| f.line).unwrap_or(0);
        Self {
            level: DiagnosticLevel::Error,
            line,
            message: error.to_string(),
            lexeme: None,
            trace,
        }
    }

    /// `" at '<lexeme>'"`, `" at end"` for an EOF compile error, or empty
    /// for a runtime diagnostic (which carries a call-stack trace instead
    /// of a lexeme and has nothing to say about "end of file").
    fn location_clause(&self) -> String {
        match &self.lexeme {
            Some(lexeme) => format!(" at '{lexeme}'"),
            None if self.trace.is_empty() => " at end".to_string(),
            None => String::new(),
        }
    }

    /// Plain, colorless rendering — used for snapshot tests and any sink
    /// that isn't a terminal.
    pub fn to_human_string(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "[line {}] Error{}: {}\n",
            self.line,
            self.location_clause(),
            self.message
        ));
        for frame in self.trace.iter().rev() {
            out.push_str(&format!("[line {}] in {}\n", frame.line, frame.name));
        }
        out
    }
}

/// Color mode for diagnostic output, mirroring the teacher's `ColorMode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorMode {
    Always,
    Never,
    Auto,
}

impl ColorMode {
    pub fn to_color_choice(self) -> ColorChoice {
        if std::env::var_os("NO_COLOR").is_some() {
            return ColorChoice::Never;
        }
        match self {
            ColorMode::Always => ColorChoice::Always,
            ColorMode::Never => ColorChoice::Never,
            ColorMode::Auto => ColorChoice::Auto,
        }
    }
}

impl Default for ColorMode {
    fn default() -> Self {
        ColorMode::Auto
    }
}

/// Renders [`Diagnostic`]s to a terminal, with or without color.
pub struct DiagnosticFormatter {
    color_mode: ColorMode,
}

impl DiagnosticFormatter {
    pub fn new(color_mode: ColorMode) -> Self {
        Self { color_mode }
    }

    pub fn auto() -> Self {
        Self::new(ColorMode::Auto)
    }

    pub fn plain() -> Self {
        Self::new(ColorMode::Never)
    }

    pub fn emit_to_stderr(&self, diag: &Diagnostic) {
        let mut stream = StandardStream::stderr(self.color_mode.to_color_choice());
        let _ = self.write(&mut stream, diag);
    }

    pub fn write(&self, w: &mut impl WriteColor, diag: &Diagnostic) -> std::io::Result<()> {
        let (color, label) = match diag.level {
            DiagnosticLevel::Error => (Color::Red, "error"),
            DiagnosticLevel::Warning => (Color::Yellow, "warning"),
        };
        w.set_color(ColorSpec::new().set_fg(Some(color)).set_bold(true))?;
        write!(w, "{label}{}", diag.location_clause())?;
        w.reset()?;
        write!(w, ": {}", diag.message)?;
        writeln!(w)?;

        w.set_color(ColorSpec::new().set_fg(Some(Color::Cyan)).set_bold(true))?;
        write!(w, "  --> ")?;
        w.reset()?;
        writeln!(w, "line {}", diag.line)?;

        for frame in diag.trace.iter().rev() {
            w.set_color(ColorSpec::new().set_fg(Some(Color::Cyan)))?;
            write!(w, "  in ")?;
            w.reset()?;
            writeln!(w, "{} (line {})", frame.name, frame.line)?;
        }
        Ok(())
    }

    pub fn format_to_buffer(&self, diag: &Diagnostic) -> Vec<u8> {
        let mut buf = termcolor::Buffer::no_color();
        let _ = self.write(&mut buf, diag);
        buf.into_inner()
    }
}

impl Default for DiagnosticFormatter {
    fn default() -> Self {
        Self::auto()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_string_includes_line_and_message() {
        let diag = Diagnostic::from_compile_issue(
            CompileError::ExpectSemicolon,
            3,
            Some(")".to_string()),
        );
        let s = diag.to_human_string();
        assert!(s.contains("line 3"));
        assert!(s.contains("at ')'"));
        assert!(s.contains("Expect ';'"));
    }

    #[test]
    fn human_string_reports_at_end_for_eof_compile_errors() {
        let diag = Diagnostic::from_compile_issue(CompileError::ExpectSemicolon, 3, None);
        let s = diag.to_human_string();
        assert!(s.contains("at end"));
    }

    #[test]
    fn write_includes_lexeme_or_at_end_clause() {
        let formatter = DiagnosticFormatter::plain();

        let with_lexeme =
            Diagnostic::from_compile_issue(CompileError::ExpectSemicolon, 3, Some(")".to_string()));
        let rendered = String::from_utf8(formatter.format_to_buffer(&with_lexeme)).unwrap();
        assert!(rendered.contains("at ')'"));

        let at_eof = Diagnostic::from_compile_issue(CompileError::ExpectSemicolon, 3, None);
        let rendered = String::from_utf8(formatter.format_to_buffer(&at_eof)).unwrap();
        assert!(rendered.contains("at end"));
    }

    #[test]
    fn write_omits_at_end_clause_for_runtime_diagnostics() {
        let formatter = DiagnosticFormatter::plain();
        let diag = Diagnostic::from_runtime_failure(
            RuntimeError::UndefinedVariable("x".into()),
            vec![TraceFrame { name: "script".into(), line: 5 }],
        );
        let rendered = String::from_utf8(formatter.format_to_buffer(&diag)).unwrap();
        assert!(!rendered.contains("at end"));
    }

    #[test]
    fn runtime_failure_includes_trace_frames() {
        let diag = Diagnostic::from_runtime_failure(
            RuntimeError::UndefinedVariable("x".into()),
            vec![
                TraceFrame { name: "script".into(), line: 5 },
                TraceFrame { name: "f".into(), line: 2 },
            ],
        );
        let s = diag.to_human_string();
        assert!(s.contains("in f"));
        assert!(s.contains("in script"));
    }
}
