//! Compile-time and runtime error taxonomies.
//!
//! Kept disjoint, as the spec requires: a `CompileError` means no
//! execution was attempted, a `RuntimeError` means the VM was mid-flight.
//! Both derive [`thiserror::Error`] (the teacher's `atlas-runtime::value`
//! does the same for `RuntimeError`) instead of carrying bare `String`s,
//! so callers can match on the condition rather than scrape text.

use thiserror::Error;

/// A single frame in a runtime error's stack trace.
#[derive(Debug, Clone)]
pub struct TraceFrame {
    /// Function name, or `"script"` for top-level code.
    pub name: String,
    pub line: u32,
}

/// Errors detected during compilation. No bytecode is produced for a
/// program that raises one of these; `had_error` latches so the
/// compiler can keep parsing for more diagnostics.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("Unterminated string.")]
    UnterminatedString,
    #[error("Unexpected character.")]
    UnexpectedCharacter,
    #[error("Expect expression.")]
    ExpectExpression,
    #[error("Expect ';' after statement.")]
    ExpectSemicolon,
    #[error("Expect ')' after expression.")]
    ExpectRightParen,
    #[error("Expect '}}' after block.")]
    ExpectRightBrace,
    #[error("Expect variable name.")]
    ExpectVariableName,
    #[error("Expect '(' after '{0}'.")]
    ExpectLeftParen(&'static str),
    #[error("Already a variable with this name in this scope.")]
    DuplicateLocal,
    #[error("Can't read local variable in its own initializer.")]
    ReadInOwnInitializer,
    #[error("Invalid assignment target.")]
    InvalidAssignmentTarget,
    #[error("Can't return from top-level code.")]
    ReturnFromTopLevel,
    #[error("Too many constants in one chunk.")]
    TooManyConstants,
    #[error("Too many local variables in function.")]
    TooManyLocals,
    #[error("Too many closure variables in this function.")]
    TooManyUpvalues,
    #[error("Too much bytecode to jump over.")]
    JumpTooLarge,
    #[error("Loop body too large.")]
    LoopBodyTooLarge,
    #[error("Can't have more than 255 parameters.")]
    TooManyParameters,
    #[error("Can't have more than 255 arguments.")]
    TooManyArguments,
    #[error("Too many nested functions.")]
    TooManyNestedFunctions,
}

/// Errors raised while bytecode is executing. Printed with a stack trace;
/// the VM resets its stack and, in the REPL, keeps going.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("Operand must be an int or a float.")]
    OperandMustBeNumber,
    #[error("Operands must be 2 numbers.")]
    OperandsMustBeNumbers,
    #[error("Operands must be 2 numbers or 2 strings.")]
    OperandsMustBeNumbersOrStrings,
    #[error("Undefined variable '{0}'.")]
    UndefinedVariable(String),
    #[error("Can only call functions.")]
    NotCallable,
    #[error("Expect {expected} arguments but got {got}.")]
    ArityMismatch { expected: u8, got: u8 },
    #[error("Stack overflow.")]
    StackOverflow,
    #[error("Can't do integer division by 0.")]
    IntegerDivisionByZero,
    #[error("Can't do integer modulo by 0.")]
    IntegerModuloByZero,
    #[error("Operands for modulo must be 2 integers.")]
    ModuloRequiresIntegers,
    #[error("{0}")]
    Native(String),
}

/// A runtime error paired with the call-frame trace captured at the
/// moment it was raised.
#[derive(Debug, Clone)]
pub struct RuntimeFailure {
    pub error: RuntimeError,
    pub trace: Vec<TraceFrame>,
}
