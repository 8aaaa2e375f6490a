#![forbid(unsafe_code)]
#![deny(unreachable_patterns)]

//! Formula engine for per-cell grid computations.
//!
//! A formula such as `ifelse(a > b, sqrt(a - b), -1)` is compiled once into a compact postfix
//! [`Program`] (constant sub-expressions are folded at compile time) and then evaluated for
//! every grid cell by the stack-based [`Vm`]. Variables are the single letters `a..z`; the
//! callable functions come from a [`FunctionTable`] seeded with the built-ins and extensible at
//! runtime.
//!
//! Most callers use the [`Formula`] facade, which owns the compiled program, the variable
//! bindings and a "last error" that can be polled after each call:
//!
//! ```
//! use formula_grid::Formula;
//!
//! let mut formula = Formula::new();
//! assert!(formula.set_formula("sin(a) * b + c"));
//! assert_eq!(formula.used_variables(), "abc");
//! assert_eq!(formula.value_with(&[0.0, 2.0, 3.0]), 3.0);
//! ```
//!
//! The [`calculator`] module evaluates one formula across whole layers (`g1 + g2 * 2`),
//! in parallel across rows when the `parallel` feature is enabled.

pub mod bytecode;
pub mod calculator;
pub mod error;
pub mod functions;

mod formula;
mod help;
mod parallel;

pub use bytecode::{CompileOptions, Compiler, Program, Vm};
pub use calculator::{CalculatorOptions, GridCalculator, GridSystem, Layer};
pub use error::{CompileError, CompileErrorKind, EvalFault, FormulaError, FunctionTableError};
pub use formula::Formula;
pub use functions::{Callable, FunctionInfo, FunctionTable, Volatility};
pub use help::help_operators;

/// Number of variable slots (`a..=z`).
pub const VARIABLE_SLOTS: usize = 26;

/// Binding-vector slot of a variable letter.
#[inline]
pub fn variable_slot(letter: char) -> Option<usize> {
    letter
        .is_ascii_lowercase()
        .then(|| (letter as u8 - b'a') as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variable_slots_cover_lowercase_letters_only() {
        assert_eq!(variable_slot('a'), Some(0));
        assert_eq!(variable_slot('z'), Some(VARIABLE_SLOTS - 1));
        assert_eq!(variable_slot('A'), None);
        assert_eq!(variable_slot('1'), None);
        assert_eq!(variable_slot('é'), None);
    }
}
