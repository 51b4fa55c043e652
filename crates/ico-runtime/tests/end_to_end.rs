//! End-to-end interpreter scenarios, run against the public `Vm` API the
//! way a host embedding this crate would.

use ico_runtime::vm::{InterpretError, Vm};
use ico_runtime::VmConfig;
use pretty_assertions::assert_eq;
use rstest::rstest;
use std::sync::{Arc, Mutex};

fn run_capture(source: &str) -> String {
    let buf = Arc::new(Mutex::new(Vec::new()));
    let mut vm = Vm::new(VmConfig::default()).with_output(buf.clone());
    vm.interpret(source).unwrap_or_else(|e| panic!("interpret failed: {e:?}"));
    String::from_utf8(buf.lock().unwrap().clone()).unwrap()
}

#[test]
fn scenario_arithmetic_precedence() {
    assert_eq!(run_capture("print 1 + 2 * 3;"), "7\n");
}

#[test]
fn scenario_string_concatenation_interns_result() {
    assert_eq!(run_capture(r#"var a = "he"; var b = "llo"; print a + b;"#), "hello\n");
}

#[test]
fn scenario_closure_capture_and_close() {
    let src = "fun make(x) { fun inner() { return x; } return inner; } var f = make(42); print f();";
    assert_eq!(run_capture(src), "42\n");
}

#[test]
fn scenario_while_loop_output() {
    let src = "var i = 0; while (i < 3) { print i; i = i + 1; }";
    assert_eq!(run_capture(src), "0\n1\n2\n");
}

#[test]
fn scenario_stack_overflow_names_recursive_frame() {
    let mut vm = Vm::new(VmConfig::default());
    let result = vm.interpret("fun bad() { return bad(); } bad();");
    match result {
        Err(InterpretError::Runtime(diag)) => {
            assert!(diag.message.contains("Stack overflow"));
            assert_eq!(diag.trace.last().map(|f| f.name.as_str()), Some("bad"));
        }
        other => panic!("expected a stack overflow, got {other:?}"),
    }
}

#[test]
fn scenario_undefined_variable_runtime_error() {
    let mut vm = Vm::new(VmConfig::default());
    let result = vm.interpret("print undefined_name;");
    match result {
        Err(InterpretError::Runtime(diag)) => {
            assert!(diag.message.contains("Undefined variable 'undefined_name'"));
        }
        other => panic!("expected an undefined-variable error, got {other:?}"),
    }
}

#[rstest]
#[case::locals_255_ok(255, true)]
#[case::locals_256_errors(256, false)]
fn boundary_locals(#[case] count: usize, #[case] should_succeed: bool) {
    let mut src = String::from("{\n");
    for i in 0..count {
        src.push_str(&format!("var v{i} = {i};\n"));
    }
    src.push_str("}\n");
    let mut vm = Vm::new(VmConfig::default());
    let result = vm.interpret(&src);
    assert_eq!(result.is_ok(), should_succeed, "count={count}");
}

#[rstest]
#[case::params_255_ok(255, true)]
#[case::params_256_errors(256, false)]
fn boundary_parameters(#[case] count: usize, #[case] should_succeed: bool) {
    let params: Vec<String> = (0..count).map(|i| format!("p{i}")).collect();
    let src = format!("fun f({}) {{}}\n", params.join(", "));
    let mut vm = Vm::new(VmConfig::default());
    let result = vm.interpret(&src);
    assert_eq!(result.is_ok(), should_succeed, "count={count}");
}

#[rstest]
#[case::args_255_ok(255, true)]
#[case::args_256_errors(256, false)]
fn boundary_call_arguments(#[case] count: usize, #[case] should_succeed: bool) {
    let args: Vec<String> = (0..count).map(|i| i.to_string()).collect();
    let src = format!(
        "fun f() {{}}\nf({});\n",
        args.join(", ")
    );
    let mut vm = Vm::new(VmConfig::default());
    let result = vm.interpret(&src);
    assert_eq!(result.is_ok(), should_succeed, "count={count}");
}

#[rstest]
#[case::nesting_63_ok(63, true)]
#[case::nesting_64_errors(64, false)]
fn boundary_nested_functions(#[case] depth: usize, #[case] should_succeed: bool) {
    let mut src = String::new();
    for i in 0..depth {
        src.push_str(&format!("fun f{i}() {{\n"));
    }
    for _ in 0..depth {
        src.push_str("}\n");
    }
    let mut vm = Vm::new(VmConfig::default());
    let result = vm.interpret(&src);
    assert_eq!(result.is_ok(), should_succeed, "depth={depth}");
}

#[test]
fn boundary_too_many_constants_in_one_chunk() {
    let mut src = String::new();
    for i in 0..300 {
        src.push_str(&format!("print {i};\n"));
    }
    let mut vm = Vm::new(VmConfig::default());
    let result = vm.interpret(&src);
    assert!(result.is_err(), "300 distinct int constants should overflow a 256-entry pool");
}

#[test]
fn invariant_gc_stress_matches_gc_disabled_output() {
    let src = r#"
        fun make(x) { fun inner() { return x; } return inner; }
        var total = 0;
        var i = 0;
        while (i < 30) {
            var f = make(i);
            total = total + f();
            i = i + 1;
        }
        print total;
    "#;

    let relaxed = run_capture(src);

    let buf = Arc::new(Mutex::new(Vec::new()));
    let mut config = VmConfig::default();
    config.gc_stress = true;
    config.initial_gc_threshold = 1;
    let mut vm = Vm::new(config).with_output(buf.clone());
    vm.interpret(src).unwrap();
    let stressed = String::from_utf8(buf.lock().unwrap().clone()).unwrap();

    assert_eq!(relaxed, stressed);
}

#[test]
fn invariant_running_a_program_twice_is_idempotent() {
    let src = "print 1 + 1;";
    let first = run_capture(src);
    let second = run_capture(src);
    assert_eq!(first, second);
}

#[test]
fn numeric_mixing_preserves_value() {
    assert_eq!(run_capture("print 4 / 2;"), "2\n");
    assert_eq!(run_capture("print 4.0 / 2;"), "2.0\n");
    assert_eq!(run_capture("print 1 == 1.0;"), "true\n");
}

#[test]
fn reports_multiple_compile_errors_in_one_pass() {
    let mut vm = Vm::new(VmConfig::default());
    let result = vm.interpret("var = ; print 1 +;");
    match result {
        Err(InterpretError::Compile(diagnostics)) => {
            assert!(!diagnostics.is_empty());
        }
        other => panic!("expected compile errors, got {other:?}"),
    }
}
