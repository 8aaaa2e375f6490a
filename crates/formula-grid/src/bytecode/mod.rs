mod compiler;
mod eval;
mod program;

pub use compiler::{CompileOptions, Compiler, DEFAULT_ALPHABET, MAX_CONSTANTS, MAX_NESTING};
pub use eval::{Vm, STACK_LIMIT};
pub use program::{FunctionRef, Instruction, OpCode, Program};
