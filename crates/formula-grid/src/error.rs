use thiserror::Error;

/// What went wrong while translating a formula into bytecode.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompileErrorKind {
    #[error("empty formula")]
    EmptyFormula,
    #[error("missing operand")]
    MissingOperand,
    #[error("unmatched parentheses")]
    UnmatchedParentheses,
    #[error("undeclared parameter")]
    UndeclaredParameter,
    #[error("syntax error")]
    Syntax,
    #[error("function not found")]
    FunctionNotFound,
    #[error("improper function syntax")]
    ImproperFunctionSyntax,
    #[error("too few parameters")]
    TooFewParameters,
    #[error("too many parameters")]
    TooManyParameters,
    #[error("too many constants")]
    TooManyConstants,
    /// Nesting or operand stack use beyond what the compiler and VM support.
    #[error("formula too complex")]
    TooComplex,
    /// Constant folding tripped over a VM fault; indicates a compiler bug.
    #[error("internal error while folding constants")]
    Internal,
}

/// A compile error localized to a character offset in the formula source.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[error("{kind} (at position {position})")]
pub struct CompileError {
    pub kind: CompileErrorKind,
    /// 0-based character offset of the offending character.
    pub position: usize,
}

impl CompileError {
    #[must_use]
    pub fn new(kind: CompileErrorKind, position: usize) -> Self {
        Self { kind, position }
    }
}

/// Runtime faults raised by the VM.
///
/// A correct compiler never produces programs that fault; non-finite numeric results
/// (division by zero, `asin(2)`, ...) are *not* faults.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvalFault {
    #[error("unrecognizable operator (opcode {0})")]
    UnrecognizedOperator(u8),
    #[error("corrupted buffer (operand stack depth {depth})")]
    CorruptedBuffer { depth: usize },
    #[error("operand stack overflow")]
    StackOverflow,
    #[error("constant index {0} out of bounds")]
    ConstantOutOfBounds(u32),
    #[error("variable slot {0} out of bounds")]
    VariableOutOfBounds(u32),
    #[error("function index {0} out of bounds")]
    FunctionOutOfBounds(u32),
    #[error("no formula compiled")]
    NoProgram,
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Hash)]
pub enum FunctionTableError {
    #[error("invalid number of parameters ({0})")]
    InvalidArity(usize),
    #[error("function table full")]
    TableFull,
    #[error("function not found: {0}")]
    NotFound(String),
    #[error("original functions may not be deleted: {0}")]
    Protected(String),
    #[error("index out of bounds: {0}")]
    IndexOutOfBounds(usize),
}

/// The "last error" stored by [`crate::Formula`].
#[derive(Error, Debug, Clone, PartialEq, Eq, Hash)]
pub enum FormulaError {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Eval(#[from] EvalFault),
    #[error(transparent)]
    FunctionTable(#[from] FunctionTableError),
}

impl FormulaError {
    /// Character offset into the formula source, for compile errors.
    pub fn position(&self) -> Option<usize> {
        match self {
            FormulaError::Compile(err) => Some(err.position),
            FormulaError::Eval(_) | FormulaError::FunctionTable(_) => None,
        }
    }

    /// The error text without position information (e.g. `"undeclared parameter"`).
    pub fn reason(&self) -> String {
        match self {
            FormulaError::Compile(err) => err.kind.to_string(),
            FormulaError::Eval(fault) => fault.to_string(),
            FormulaError::FunctionTable(err) => err.to_string(),
        }
    }
}
