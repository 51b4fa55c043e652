//! Stack-based bytecode interpreter.
//!
//! Generalizes the teacher's `atlas-runtime::vm::VM` dispatch loop (value
//! stack + `CallFrame` stack + a big `match` over `Opcode`) from its
//! Rc-value, no-GC model to this core's arena-addressed heap, explicit
//! open/closed upvalues, and mark-sweep collector.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use crate::chunk::Opcode;
use crate::compiler::Compiler;
use crate::config::VmConfig;
use crate::diagnostic::Diagnostic;
use crate::errors::{RuntimeError, TraceFrame};
use crate::heap::{GcRef, Heap};
use crate::interner::Interner;
use crate::object::{HeapObject, ObjClosure, ObjFunction, ObjUpvalue, UpvalueState};
use crate::table::Table;
use crate::value::Value;

/// Sink for everything a running program `print`s. Defaults to stdout;
/// tests and the CLI's embedding points swap in an in-memory buffer.
pub type OutputWriter = Arc<Mutex<dyn Write + Send>>;

pub fn stdout_writer() -> OutputWriter {
    Arc::new(Mutex::new(io::stdout()))
}

/// One in-progress call: which closure is running, where in its chunk, and
/// where its locals start on the shared value stack.
struct CallFrame {
    closure: GcRef,
    ip: usize,
    slot_base: usize,
}

/// Either a batch of compile-time diagnostics, or the single diagnostic for
/// the runtime failure that aborted execution.
#[derive(Debug)]
pub enum InterpretError {
    Compile(Vec<Diagnostic>),
    Runtime(Diagnostic),
}

pub type InterpretResult = Result<(), InterpretError>;

/// Owns every piece of mutable interpreter state: the value stack, call
/// frames, global environment, heap, and string interner.
pub struct Vm {
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: Table,
    heap: Heap,
    interner: Interner,
    /// Open upvalues only, ordered by descending stack slot — closing
    /// always operates on a contiguous prefix of this list.
    open_upvalues: Vec<GcRef>,
    config: VmConfig,
    output: OutputWriter,
}

impl Vm {
    pub fn new(config: VmConfig) -> Self {
        let mut heap = Heap::new(config.initial_gc_threshold, config.gc_growth_factor);
        heap.stress_gc = config.gc_stress;
        let mut vm = Self {
            stack: Vec::with_capacity(config.stack_capacity.min(4096)),
            frames: Vec::with_capacity(config.frame_capacity),
            globals: Table::new(),
            heap,
            interner: Interner::new(),
            open_upvalues: Vec::new(),
            config,
            output: stdout_writer(),
        };
        crate::native::install(&mut vm);
        vm
    }

    pub fn with_output(mut self, output: OutputWriter) -> Self {
        self.output = output;
        self
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    // --- compile + run entry point ------------------------------------------------

    pub fn interpret(&mut self, source: &str) -> InterpretResult {
        let function_ref = match Compiler::compile(source, &mut self.heap, &mut self.interner) {
            Ok(f) => f,
            Err(issues) => {
                let diagnostics = issues
                    .into_iter()
                    .map(|issue| Diagnostic::from_compile_issue(issue.error, issue.line, issue.lexeme))
                    .collect();
                return Err(InterpretError::Compile(diagnostics));
            }
        };

        self.maybe_collect();
        let closure_ref = self.heap.allocate(HeapObject::Closure(ObjClosure {
            function: function_ref,
            upvalues: Vec::new(),
        }));
        self.stack.push(Value::Obj(closure_ref));
        self.frames.push(CallFrame {
            closure: closure_ref,
            ip: 0,
            slot_base: 0,
        });

        match self.run() {
            Ok(()) => Ok(()),
            Err((error, trace)) => {
                self.stack.clear();
                self.frames.clear();
                self.open_upvalues.clear();
                Err(InterpretError::Runtime(Diagnostic::from_runtime_failure(error, trace)))
            }
        }
    }

    fn run(&mut self) -> Result<(), (RuntimeError, Vec<TraceFrame>)> {
        loop {
            match self.step() {
                Ok(true) => return Ok(()),
                Ok(false) => continue,
                Err(e) => {
                    let trace = self.build_trace();
                    return Err((e, trace));
                }
            }
        }
    }

    fn build_trace(&self) -> Vec<TraceFrame> {
        self.frames
            .iter()
            .map(|f| {
                let function = self.resolve_function(f.closure);
                let name = function
                    .name
                    .map(|r| self.string_value(r))
                    .unwrap_or_else(|| "script".to_string());
                let line = function.chunk.line_at(f.ip.saturating_sub(1));
                TraceFrame { name, line }
            })
            .collect()
    }

    // --- bytecode stream helpers ----------------------------------------------------

    fn resolve_function(&self, closure_ref: GcRef) -> &ObjFunction {
        let closure = match self.heap.resolve(closure_ref) {
            HeapObject::Closure(c) => c,
            _ => unreachable!("frame closure must hold a closure"),
        };
        match self.heap.resolve(closure.function) {
            HeapObject::Function(f) => f,
            _ => unreachable!("closure function must hold a function"),
        }
    }

    fn current_closure(&self) -> GcRef {
        self.frames.last().expect("at least one frame").closure
    }

    fn read_byte(&mut self) -> u8 {
        let frame_top = self.frames.len() - 1;
        let (closure_ref, ip) = {
            let frame = &self.frames[frame_top];
            (frame.closure, frame.ip)
        };
        let byte = self.resolve_function(closure_ref).chunk.code[ip];
        self.frames[frame_top].ip += 1;
        byte
    }

    fn read_u16(&mut self) -> u16 {
        let hi = self.read_byte() as u16;
        let lo = self.read_byte() as u16;
        (hi << 8) | lo
    }

    fn read_constant(&mut self, idx: usize) -> Value {
        let closure_ref = self.current_closure();
        self.resolve_function(closure_ref).chunk.constants[idx]
    }

    fn read_constant_ref(&mut self, idx: u8) -> GcRef {
        match self.read_constant(idx as usize) {
            Value::Obj(r) => r,
            _ => unreachable!("name constant must be a string object"),
        }
    }

    // --- stack helpers ----------------------------------------------------------------

    fn push(&mut self, value: Value) -> Result<(), RuntimeError> {
        if self.stack.len() >= self.config.stack_capacity {
            return Err(RuntimeError::StackOverflow);
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("stack underflow: compiler invariant violated")
    }

    fn peek(&self, distance: usize) -> &Value {
        &self.stack[self.stack.len() - 1 - distance]
    }

    // --- string helpers ----------------------------------------------------------------

    fn is_string(&self, r: GcRef) -> bool {
        matches!(self.heap.resolve(r), HeapObject::String(_))
    }

    pub(crate) fn string_hash_for_native(&self, r: GcRef) -> u32 {
        self.string_hash(r)
    }

    /// Allocate a heap object on behalf of a native registration (runs the
    /// same pre-allocation GC check every other allocation site does).
    pub(crate) fn allocate_for_native(&mut self, object: HeapObject) -> GcRef {
        self.maybe_collect();
        self.heap.allocate(object)
    }

    pub(crate) fn define_global(&mut self, name: GcRef, hash: u32, value: Value) {
        self.globals.insert(name, hash, value);
    }

    fn string_hash(&self, r: GcRef) -> u32 {
        match self.heap.resolve(r) {
            HeapObject::String(s) => s.hash,
            _ => unreachable!("expected a string object"),
        }
    }

    fn string_value(&self, r: GcRef) -> String {
        match self.heap.resolve(r) {
            HeapObject::String(s) => s.value.clone(),
            _ => unreachable!("expected a string object"),
        }
    }

    /// User-facing `print`/`str()` conversion.
    pub fn stringify(&self, value: Value) -> String {
        match value {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => stringify_float(f),
            Value::Obj(r) => match self.heap.resolve(r) {
                HeapObject::String(s) => s.value.clone(),
                HeapObject::Function(f) => match f.name {
                    Some(n) => format!("<fn {}>", self.string_value(n)),
                    None => "<script>".to_string(),
                },
                HeapObject::Closure(c) => self.stringify(Value::Obj(c.function)),
                HeapObject::Native(n) => format!("<native fn {}>", self.string_value(n.name)),
                HeapObject::Upvalue(_) => "<upvalue>".to_string(),
            },
        }
    }

    pub fn type_name(&self, value: Value) -> &'static str {
        match value {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Obj(r) => match self.heap.resolve(r) {
                HeapObject::String(_) => "string",
                HeapObject::Function(_) | HeapObject::Closure(_) | HeapObject::Native(_) => "function",
                HeapObject::Upvalue(_) => "upvalue",
            },
        }
    }

    // --- native-facing allocation entry points ------------------------------------

    /// Intern a host-produced string (used by natives like `type_of`/`str`).
    pub fn intern_string(&mut self, text: &str) -> GcRef {
        self.maybe_collect();
        self.interner.intern(&mut self.heap, text)
    }

    // --- garbage collection -----------------------------------------------------------

    fn maybe_collect(&mut self) {
        if self.heap.should_collect() {
            self.collect_garbage();
        }
    }

    fn collect_garbage(&mut self) {
        self.mark_roots();
        self.heap.trace();
        self.interner.clean_unmarked(&self.heap);
        self.heap.sweep();
        self.heap.update_watermark();
    }

    fn mark_roots(&mut self) {
        for &value in &self.stack {
            if let Value::Obj(r) = value {
                self.heap.mark(r);
            }
        }
        for frame in &self.frames {
            self.heap.mark(frame.closure);
        }
        for (key, value) in self.globals.iter().collect::<Vec<_>>() {
            self.heap.mark(key);
            if let Value::Obj(r) = value {
                self.heap.mark(r);
            }
        }
        for &uv in &self.open_upvalues {
            self.heap.mark(uv);
        }
    }

    // --- upvalues -----------------------------------------------------------------------

    fn enclosing_upvalue(&self, index: u8) -> GcRef {
        let closure_ref = self.current_closure();
        match self.heap.resolve(closure_ref) {
            HeapObject::Closure(c) => c.upvalues[index as usize],
            _ => unreachable!("frame closure must hold a closure"),
        }
    }

    fn capture_upvalue(&mut self, slot: usize) -> GcRef {
        for &uv_ref in &self.open_upvalues {
            if let HeapObject::Upvalue(uv) = self.heap.resolve(uv_ref) {
                if uv.open_slot() == Some(slot) {
                    return uv_ref;
                }
            }
        }
        self.maybe_collect();
        let uv_ref = self.heap.allocate(HeapObject::Upvalue(ObjUpvalue::new_open(slot)));
        let pos = self
            .open_upvalues
            .iter()
            .position(|&r| match self.heap.resolve(r) {
                HeapObject::Upvalue(u) => u.open_slot().is_some_and(|s| s < slot),
                _ => false,
            })
            .unwrap_or(self.open_upvalues.len());
        self.open_upvalues.insert(pos, uv_ref);
        uv_ref
    }

    /// Close every open upvalue whose captured slot is at or above
    /// `from_slot`: `open_upvalues` is kept sorted descending, so these are
    /// always a prefix.
    fn close_upvalues(&mut self, from_slot: usize) {
        while let Some(&uv_ref) = self.open_upvalues.first() {
            let slot = match self.heap.resolve(uv_ref) {
                HeapObject::Upvalue(u) => u.open_slot(),
                _ => None,
            };
            match slot {
                Some(s) if s >= from_slot => {
                    let value = self.stack[s];
                    if let HeapObject::Upvalue(u) = self.heap.resolve_mut(uv_ref) {
                        u.state = UpvalueState::Closed(value);
                    }
                    self.open_upvalues.remove(0);
                }
                _ => break,
            }
        }
    }

    fn read_upvalue_value(&self, uv_ref: GcRef) -> Value {
        match self.heap.resolve(uv_ref) {
            HeapObject::Upvalue(u) => match u.state {
                UpvalueState::Open(slot) => self.stack[slot],
                UpvalueState::Closed(v) => v,
            },
            _ => unreachable!("expected an upvalue object"),
        }
    }

    fn write_upvalue_value(&mut self, uv_ref: GcRef, value: Value) {
        let open_slot = match self.heap.resolve(uv_ref) {
            HeapObject::Upvalue(u) => u.open_slot(),
            _ => unreachable!("expected an upvalue object"),
        };
        match open_slot {
            Some(slot) => self.stack[slot] = value,
            None => {
                if let HeapObject::Upvalue(u) = self.heap.resolve_mut(uv_ref) {
                    u.state = UpvalueState::Closed(value);
                }
            }
        }
    }

    // --- calls --------------------------------------------------------------------------

    fn call_value(&mut self, argc: u8) -> Result<(), RuntimeError> {
        let callee = *self.peek(argc as usize);
        let r = match callee {
            Value::Obj(r) => r,
            _ => return Err(RuntimeError::NotCallable),
        };
        match self.heap.resolve(r) {
            HeapObject::Closure(_) => self.call_closure(r, argc),
            HeapObject::Native(native) => {
                let native = *native;
                self.call_native(native, argc)
            }
            _ => Err(RuntimeError::NotCallable),
        }
    }

    fn call_closure(&mut self, closure_ref: GcRef, argc: u8) -> Result<(), RuntimeError> {
        let arity = self.resolve_function(closure_ref).arity;
        if argc != arity {
            return Err(RuntimeError::ArityMismatch {
                expected: arity,
                got: argc,
            });
        }
        if self.frames.len() >= self.config.frame_capacity {
            return Err(RuntimeError::StackOverflow);
        }
        let slot_base = self.stack.len() - argc as usize - 1;
        self.frames.push(CallFrame {
            closure: closure_ref,
            ip: 0,
            slot_base,
        });
        Ok(())
    }

    fn call_native(&mut self, native: crate::object::ObjNative, argc: u8) -> Result<(), RuntimeError> {
        if argc != native.arity {
            return Err(RuntimeError::ArityMismatch {
                expected: native.arity,
                got: argc,
            });
        }
        let args_start = self.stack.len() - argc as usize;
        let args: Vec<Value> = self.stack[args_start..].to_vec();
        let result = (native.function)(self, &args)?;
        self.stack.truncate(args_start - 1);
        self.push(result)
    }

    // --- the dispatch loop ----------------------------------------------------------------

    fn step(&mut self) -> Result<bool, RuntimeError> {
        let op = Opcode::from_u8(self.read_byte());
        match op {
            Opcode::Constant => {
                let idx = self.read_byte();
                let v = self.read_constant(idx as usize);
                self.push(v)?;
            }
            Opcode::Null => self.push(Value::Null)?,
            Opcode::True => self.push(Value::Bool(true))?,
            Opcode::False => self.push(Value::Bool(false))?,
            Opcode::Pop => {
                self.pop();
            }
            Opcode::GetLocal => {
                let slot = self.read_byte() as usize;
                let base = self.frames.last().expect("frame").slot_base;
                let v = self.stack[base + slot];
                self.push(v)?;
            }
            Opcode::SetLocal => {
                let slot = self.read_byte() as usize;
                let base = self.frames.last().expect("frame").slot_base;
                let v = *self.peek(0);
                self.stack[base + slot] = v;
            }
            Opcode::GetGlobal => {
                let idx = self.read_byte();
                let name_ref = self.read_constant_ref(idx);
                let hash = self.string_hash(name_ref);
                match self.globals.get(name_ref, hash) {
                    Some(v) => self.push(v)?,
                    None => return Err(RuntimeError::UndefinedVariable(self.string_value(name_ref))),
                }
            }
            Opcode::DefineGlobal => {
                let idx = self.read_byte();
                let name_ref = self.read_constant_ref(idx);
                let hash = self.string_hash(name_ref);
                let v = self.pop();
                self.globals.insert(name_ref, hash, v);
            }
            Opcode::SetGlobal => {
                let idx = self.read_byte();
                let name_ref = self.read_constant_ref(idx);
                let hash = self.string_hash(name_ref);
                if !self.globals.contains(name_ref, hash) {
                    return Err(RuntimeError::UndefinedVariable(self.string_value(name_ref)));
                }
                let v = *self.peek(0);
                self.globals.insert(name_ref, hash, v);
            }
            Opcode::GetUpvalue => {
                let idx = self.read_byte();
                let uv_ref = self.enclosing_upvalue(idx);
                let v = self.read_upvalue_value(uv_ref);
                self.push(v)?;
            }
            Opcode::SetUpvalue => {
                let idx = self.read_byte();
                let uv_ref = self.enclosing_upvalue(idx);
                let v = *self.peek(0);
                self.write_upvalue_value(uv_ref, v);
            }
            Opcode::CloseUpvalue => {
                self.close_upvalues(self.stack.len() - 1);
                self.pop();
            }
            Opcode::Equal => {
                let b = self.pop();
                let a = self.pop();
                self.push(Value::Bool(values_equal(a, b)))?;
            }
            Opcode::Greater => self.compare(|o| o == std::cmp::Ordering::Greater)?,
            Opcode::Less => self.compare(|o| o == std::cmp::Ordering::Less)?,
            Opcode::Add => self.add()?,
            Opcode::Subtract => self.numeric_binop(|x, y| x - y, |x, y| x - y)?,
            Opcode::Multiply => self.numeric_binop(|x, y| x * y, |x, y| x * y)?,
            Opcode::Divide => self.divide()?,
            Opcode::Modulo => self.modulo()?,
            Opcode::Power => self.power()?,
            Opcode::Negate => {
                let v = self.pop();
                match v {
                    Value::Int(x) => self.push(Value::Int(-x))?,
                    Value::Float(x) => self.push(Value::Float(-x))?,
                    _ => return Err(RuntimeError::OperandMustBeNumber),
                }
            }
            Opcode::Not => {
                let v = self.pop();
                self.push(Value::Bool(v.is_falsey()))?;
            }
            Opcode::Print => {
                let v = self.pop();
                let s = self.stringify(v);
                let mut out = self.output.lock().expect("output writer poisoned");
                let _ = writeln!(out, "{s}");
            }
            Opcode::Jump => {
                let offset = self.read_u16();
                self.frames.last_mut().expect("frame").ip += offset as usize;
            }
            Opcode::JumpIfFalse => {
                let offset = self.read_u16();
                if self.peek(0).is_falsey() {
                    self.frames.last_mut().expect("frame").ip += offset as usize;
                }
            }
            Opcode::Loop => {
                let offset = self.read_u16();
                self.frames.last_mut().expect("frame").ip -= offset as usize;
            }
            Opcode::Call => {
                let argc = self.read_byte();
                self.call_value(argc)?;
            }
            Opcode::Closure => self.closure()?,
            Opcode::Return => {
                let result = self.pop();
                let frame = self.frames.pop().expect("at least one frame");
                self.close_upvalues(frame.slot_base);
                self.stack.truncate(frame.slot_base);
                if self.frames.is_empty() {
                    return Ok(true);
                }
                self.push(result)?;
            }
        }
        Ok(false)
    }

    fn closure(&mut self) -> Result<(), RuntimeError> {
        let idx = self.read_byte();
        let function_ref = match self.read_constant(idx as usize) {
            Value::Obj(r) => r,
            _ => unreachable!("CLOSURE constant must be a function"),
        };
        let upvalue_count = match self.heap.resolve(function_ref) {
            HeapObject::Function(f) => f.upvalue_count,
            _ => unreachable!("CLOSURE constant must be a function"),
        };
        let mut upvalues = Vec::with_capacity(upvalue_count as usize);
        for _ in 0..upvalue_count {
            let is_local = self.read_byte() != 0;
            let index = self.read_byte();
            if is_local {
                let base = self.frames.last().expect("frame").slot_base;
                upvalues.push(self.capture_upvalue(base + index as usize));
            } else {
                upvalues.push(self.enclosing_upvalue(index));
            }
        }
        self.maybe_collect();
        let closure_ref = self.heap.allocate(HeapObject::Closure(ObjClosure {
            function: function_ref,
            upvalues,
        }));
        self.push(Value::Obj(closure_ref))
    }

    fn add(&mut self) -> Result<(), RuntimeError> {
        let b = self.pop();
        let a = self.pop();
        match (a, b) {
            (Value::Int(x), Value::Int(y)) => self.push(Value::Int(x + y)),
            (Value::Obj(ra), Value::Obj(rb)) if self.is_string(ra) && self.is_string(rb) => {
                let concatenated = format!("{}{}", self.string_value(ra), self.string_value(rb));
                self.maybe_collect();
                let r = self.interner.intern(&mut self.heap, &concatenated);
                self.push(Value::Obj(r))
            }
            (a, b) if a.is_number() && b.is_number() => {
                self.push(Value::Float(a.as_f64().unwrap() + b.as_f64().unwrap()))
            }
            _ => Err(RuntimeError::OperandsMustBeNumbersOrStrings),
        }
    }

    fn numeric_binop(
        &mut self,
        int_op: impl Fn(i64, i64) -> i64,
        float_op: impl Fn(f64, f64) -> f64,
    ) -> Result<(), RuntimeError> {
        let b = self.pop();
        let a = self.pop();
        match (a, b) {
            (Value::Int(x), Value::Int(y)) => self.push(Value::Int(int_op(x, y))),
            (a, b) if a.is_number() && b.is_number() => {
                self.push(Value::Float(float_op(a.as_f64().unwrap(), b.as_f64().unwrap())))
            }
            _ => Err(RuntimeError::OperandsMustBeNumbers),
        }
    }

    fn divide(&mut self) -> Result<(), RuntimeError> {
        let b = self.pop();
        let a = self.pop();
        match (a, b) {
            (Value::Int(_), Value::Int(0)) => Err(RuntimeError::IntegerDivisionByZero),
            (Value::Int(x), Value::Int(y)) => self.push(Value::Int(x / y)),
            (a, b) if a.is_number() && b.is_number() => {
                self.push(Value::Float(a.as_f64().unwrap() / b.as_f64().unwrap()))
            }
            _ => Err(RuntimeError::OperandsMustBeNumbers),
        }
    }

    fn modulo(&mut self) -> Result<(), RuntimeError> {
        let b = self.pop();
        let a = self.pop();
        match (a, b) {
            (Value::Int(_), Value::Int(0)) => Err(RuntimeError::IntegerModuloByZero),
            (Value::Int(x), Value::Int(y)) => self.push(Value::Int(x % y)),
            (a, b) if a.is_number() && b.is_number() => Err(RuntimeError::ModuloRequiresIntegers),
            _ => Err(RuntimeError::OperandsMustBeNumbers),
        }
    }

    fn power(&mut self) -> Result<(), RuntimeError> {
        let b = self.pop();
        let a = self.pop();
        match (a, b) {
            (a, b) if a.is_number() && b.is_number() => {
                self.push(Value::Float(a.as_f64().unwrap().powf(b.as_f64().unwrap())))
            }
            _ => Err(RuntimeError::OperandsMustBeNumbers),
        }
    }

    fn compare(&mut self, pred: impl Fn(std::cmp::Ordering) -> bool) -> Result<(), RuntimeError> {
        let b = self.pop();
        let a = self.pop();
        match (a, b) {
            (Value::Int(x), Value::Int(y)) => self.push(Value::Bool(pred(x.cmp(&y)))),
            (a, b) if a.is_number() && b.is_number() => {
                let ord = a
                    .as_f64()
                    .unwrap()
                    .partial_cmp(&b.as_f64().unwrap())
                    .ok_or(RuntimeError::OperandsMustBeNumbers)?;
                self.push(Value::Bool(pred(ord)))
            }
            _ => Err(RuntimeError::OperandsMustBeNumbers),
        }
    }
}

fn values_equal(a: Value, b: Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => x as f64 == y,
        (Value::Obj(x), Value::Obj(y)) => x == y,
        _ => false,
    }
}

fn stringify_float(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        if f > 0.0 {
            "inf".to_string()
        } else {
            "-inf".to_string()
        }
    } else if f == f.trunc() && f.abs() < 1e15 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn run_capture(source: &str) -> String {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let mut vm = Vm::new(VmConfig::default()).with_output(buf.clone());
        vm.interpret(source).unwrap_or_else(|e| panic!("interpret failed: {e:?}"));
        String::from_utf8(buf.lock().unwrap().clone()).unwrap()
    }

    #[test]
    fn arithmetic_precedence() {
        assert_eq!(run_capture("print 1 + 2 * 3;"), "7\n");
    }

    #[test]
    fn string_concatenation_interns_result() {
        assert_eq!(run_capture(r#"var a = "he"; var b = "llo"; print a + b;"#), "hello\n");
    }

    #[test]
    fn closures_capture_and_close_upvalues() {
        let src = "fun make(x) { fun inner() { return x; } return inner; } var f = make(42); print f();";
        assert_eq!(run_capture(src), "42\n");
    }

    #[test]
    fn while_loop_prints_each_iteration() {
        let src = "var i = 0; while (i < 3) { print i; i = i + 1; }";
        assert_eq!(run_capture(src), "0\n1\n2\n");
    }

    #[test]
    fn undefined_variable_is_a_runtime_error() {
        let mut vm = Vm::new(VmConfig::default());
        let result = vm.interpret("print undefined_name;");
        match result {
            Err(InterpretError::Runtime(diag)) => assert!(diag.message.contains("Undefined variable")),
            other => panic!("expected runtime error, got {other:?}"),
        }
    }

    #[test]
    fn deep_recursion_overflows_with_recursive_frame_on_top() {
        let mut vm = Vm::new(VmConfig::default());
        let result = vm.interpret("fun bad() { return bad(); } bad();");
        match result {
            Err(InterpretError::Runtime(diag)) => {
                assert_eq!(diag.trace.last().map(|f| f.name.as_str()), Some("bad"));
            }
            other => panic!("expected stack overflow, got {other:?}"),
        }
    }

    #[test]
    fn int_float_mixed_equality_promotes() {
        assert_eq!(run_capture("print 1 == 1.0;"), "true\n");
    }

    #[test]
    fn integer_division_by_zero_errors() {
        let mut vm = Vm::new(VmConfig::default());
        let result = vm.interpret("print 1 / 0;");
        assert!(matches!(result, Err(InterpretError::Runtime(_))));
    }

    #[test]
    fn float_division_by_zero_follows_ieee754() {
        assert_eq!(run_capture("print 1.0 / 0.0;"), "inf\n");
    }

    #[test]
    fn power_always_promotes_to_float() {
        assert_eq!(run_capture("print 2 ^ 3;"), "8.0\n");
    }

    #[test]
    fn stress_gc_does_not_change_program_output() {
        let src = r#"
            fun make(x) { fun inner() { return x; } return inner; }
            var total = 0;
            var i = 0;
            while (i < 50) {
                var f = make(i);
                total = total + f();
                i = i + 1;
            }
            print total;
        "#;
        let without_stress = run_capture(src);

        let buf = Arc::new(Mutex::new(Vec::new()));
        let mut config = VmConfig::default();
        config.gc_stress = true;
        config.initial_gc_threshold = 1;
        let mut vm = Vm::new(config).with_output(buf.clone());
        vm.interpret(src).unwrap();
        let with_stress = String::from_utf8(buf.lock().unwrap().clone()).unwrap();

        assert_eq!(without_stress, with_stress);
    }
}
