//! Built-in native functions.
//!
//! The spec calls for exactly enough natives to exercise the ABI end to
//! end, matching the Lox-family convention that a core always ships a
//! `clock`-style native so timing-sensitive programs have something to
//! call: `clock`, `type_of`, and `str`. Anything beyond these three is a
//! host concern, not this crate's.

use crate::errors::RuntimeError;
use crate::object::{GcRef, HeapObject, ObjNative};
use crate::value::Value;
use crate::vm::Vm;
use std::time::Instant;

fn check_arity(expected: u8, args: &[Value]) -> Result<(), RuntimeError> {
    if args.len() != expected as usize {
        return Err(RuntimeError::ArityMismatch {
            expected,
            got: args.len() as u8,
        });
    }
    Ok(())
}

fn native_clock(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    check_arity(0, args)?;
    let elapsed = START.get_or_init(Instant::now).elapsed();
    Ok(Value::Float(elapsed.as_secs_f64()))
}

fn native_type_of(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    check_arity(1, args)?;
    let name = vm.type_name(args[0]);
    Ok(Value::Obj(vm.intern_string(name)))
}

fn native_str(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    check_arity(1, args)?;
    let s = vm.stringify(args[0]);
    Ok(Value::Obj(vm.intern_string(&s)))
}

/// Process-lifetime epoch `clock()` measures elapsed time against, so
/// repeated calls within one run (or one test process) move monotonically
/// forward without depending on wall-clock epoch semantics.
static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

fn define_native(vm: &mut Vm, name: &str, arity: u8, function: crate::object::NativeFn) {
    let name_ref: GcRef = vm.intern_string(name);
    let name_hash = vm.string_hash_for_native(name_ref);
    let native_ref = vm.allocate_for_native(HeapObject::Native(ObjNative {
        name: name_ref,
        arity,
        function,
    }));
    vm.define_global(name_ref, name_hash, Value::Obj(native_ref));
}

/// Install every built-in native into `vm`'s global environment. Called
/// once from [`Vm::new`].
pub fn install(vm: &mut Vm) {
    define_native(vm, "clock", 0, native_clock);
    define_native(vm, "type_of", 1, native_type_of);
    define_native(vm, "str", 1, native_str);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VmConfig;
    use std::sync::{Arc, Mutex};

    fn run_capture(source: &str) -> String {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let mut vm = Vm::new(VmConfig::default()).with_output(buf.clone());
        vm.interpret(source).unwrap_or_else(|e| panic!("interpret failed: {e:?}"));
        String::from_utf8(buf.lock().unwrap().clone()).unwrap()
    }

    #[test]
    fn clock_returns_a_float() {
        assert_eq!(run_capture("print type_of(clock());"), "float\n");
    }

    #[test]
    fn type_of_reports_each_value_kind() {
        assert_eq!(run_capture(r#"print type_of(1);"#), "int\n");
        assert_eq!(run_capture(r#"print type_of(1.0);"#), "float\n");
        assert_eq!(run_capture(r#"print type_of("x");"#), "string\n");
        assert_eq!(run_capture(r#"print type_of(true);"#), "bool\n");
        assert_eq!(run_capture(r#"print type_of(null);"#), "null\n");
        assert_eq!(run_capture(r#"fun f() {} print type_of(f);"#), "function\n");
    }

    #[test]
    fn str_matches_print_formatting() {
        assert_eq!(run_capture("print str(42);"), "42\n");
        assert_eq!(run_capture("print str(1.5);"), "1.5\n");
    }

    #[test]
    fn wrong_arity_is_a_runtime_error() {
        let mut vm = Vm::new(VmConfig::default());
        let result = vm.interpret("clock(1);");
        assert!(result.is_err());
    }
}
