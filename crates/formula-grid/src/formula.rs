use std::sync::Arc;

use crate::bytecode::{CompileOptions, Compiler, Program, Vm};
use crate::error::{EvalFault, FormulaError};
use crate::functions::{Callable, FunctionTable, Volatility};
use crate::VARIABLE_SLOTS;

/// A compiled formula plus everything needed to evaluate it repeatedly.
///
/// The facade keeps a "last error" instead of returning `Result` from the hot `value*` calls:
/// a failing evaluation yields `0.0` and the caller polls [`Formula::has_error`].
///
/// Cloning is cheap. Clones share the compiled [`Program`] but get their own bindings, error
/// state and VM, so parallel callers clone one `Formula` per worker.
#[derive(Clone, Debug)]
pub struct Formula {
    functions: FunctionTable,
    options: CompileOptions,
    source: String,
    program: Option<Arc<Program>>,
    bindings: [f64; VARIABLE_SLOTS],
    error: Option<FormulaError>,
    vm: Vm,
}

impl Default for Formula {
    fn default() -> Self {
        Self::with_functions(FunctionTable::with_builtins())
    }
}

impl Formula {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_functions(functions: FunctionTable) -> Self {
        Self {
            functions,
            options: CompileOptions::default(),
            source: String::new(),
            program: None,
            bindings: [0.0; VARIABLE_SLOTS],
            error: None,
            vm: Vm::with_capacity(32),
        }
    }

    /// Restrict the accepted variables and constant pool for subsequent compilations.
    pub fn with_options(mut self, options: CompileOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    pub fn functions(&self) -> &FunctionTable {
        &self.functions
    }

    /// The last source passed to [`Formula::set_formula`].
    pub fn formula(&self) -> &str {
        &self.source
    }

    pub fn program(&self) -> Option<&Program> {
        self.program.as_deref()
    }

    /// Compile `source`, replacing the current program.
    ///
    /// On failure the old program is gone as well and the error is available through
    /// [`Formula::error`].
    pub fn set_formula(&mut self, source: &str) -> bool {
        self.program = None;
        self.error = None;
        self.source = source.to_string();

        match Compiler::compile(source, &self.options, &self.functions) {
            Ok(program) => {
                self.program = Some(Arc::new(program));
                true
            }
            Err(err) => {
                log::debug!("formula `{source}` rejected: {err}");
                self.error = Some(err.into());
                false
            }
        }
    }

    /// Bind `letter` for subsequent evaluations. Returns `false` for non-variable characters.
    pub fn set_variable(&mut self, letter: char, value: f64) -> bool {
        match crate::variable_slot(letter) {
            Some(slot) => {
                self.bindings[slot] = value;
                true
            }
            None => false,
        }
    }

    pub fn variable(&self, letter: char) -> Option<f64> {
        crate::variable_slot(letter).map(|slot| self.bindings[slot])
    }

    /// Evaluate with the current bindings.
    pub fn value(&mut self) -> f64 {
        self.evaluate()
    }

    /// Bind `a = x` and evaluate.
    pub fn value_x(&mut self, x: f64) -> f64 {
        self.bindings[0] = x;
        self.evaluate()
    }

    /// Bind slots `0..values.len()` (`a`, `b`, ...) and evaluate; other slots keep their values.
    ///
    /// Values beyond the 26th are ignored.
    pub fn value_with(&mut self, values: &[f64]) -> f64 {
        let n = values.len().min(VARIABLE_SLOTS);
        self.bindings[..n].copy_from_slice(&values[..n]);
        self.evaluate()
    }

    /// Bind each `(letter, value)` pair and evaluate. Non-variable letters are skipped.
    pub fn value_named(&mut self, values: &[(char, f64)]) -> f64 {
        for &(letter, value) in values {
            self.set_variable(letter, value);
        }
        self.evaluate()
    }

    /// Evaluate with the current bindings, returning faults instead of storing them.
    pub fn try_value(&mut self) -> Result<f64, EvalFault> {
        let program = self.program.as_deref().ok_or(EvalFault::NoProgram)?;
        self.vm.eval(program, &self.bindings)
    }

    fn evaluate(&mut self) -> f64 {
        self.error = None;
        match self.try_value() {
            Ok(value) => value,
            Err(fault) => {
                if fault != EvalFault::NoProgram {
                    log::warn!("evaluation of formula `{}` failed: {fault}", self.source);
                }
                self.error = Some(fault.into());
                0.0
            }
        }
    }

    /// Letters used as variables by the current program, alphabetically.
    pub fn used_variables(&self) -> String {
        self.program
            .as_deref()
            .map(Program::used_variables)
            .unwrap_or_default()
    }

    /// Register a function for subsequent compilations.
    ///
    /// The current program keeps the functions it resolved; call [`Formula::set_formula`] again
    /// to pick up the change.
    pub fn add_function(&mut self, name: &str, callable: Callable, volatility: Volatility) -> bool {
        match self.functions.register(name, callable, volatility) {
            Ok(_) => true,
            Err(err) => {
                self.error = Some(err.into());
                false
            }
        }
    }

    /// Remove a user function. Returns its former table index.
    pub fn del_function(&mut self, name: &str) -> Option<usize> {
        match self.functions.unregister(name) {
            Ok(idx) => Some(idx),
            Err(err) => {
                self.error = Some(err.into());
                None
            }
        }
    }

    /// See [`crate::help_operators`].
    pub fn help_operators(html: bool, additional: &[(&str, &str)]) -> String {
        crate::help::help_operators(html, additional)
    }

    pub fn error(&self) -> Option<&FormulaError> {
        self.error.as_ref()
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    /// Character offset of the last compile error.
    pub fn error_position(&self) -> Option<usize> {
        self.error.as_ref().and_then(FormulaError::position)
    }

    /// Human-readable report of the last error, with the offending character bracketed.
    ///
    /// ```text
    /// Error in formula at position 2
    /// a+[z]
    /// undeclared parameter
    /// ```
    pub fn error_message(&self) -> Option<String> {
        let err = self.error.as_ref()?;
        let reason = err.reason();
        Some(match err.position() {
            Some(position) => format!(
                "Error in formula at position {position}\n{}\n{reason}",
                mark_position(&self.source, position)
            ),
            None => format!("Error in formula\n{}\n{reason}", self.source),
        })
    }
}

fn mark_position(source: &str, position: usize) -> String {
    let Some((start, ch)) = source.char_indices().nth(position) else {
        return source.to_string();
    };
    let rest = &source[start + ch.len_utf8()..];
    format!("{}[{ch}]{rest}", &source[..start])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Instruction, OpCode};
    use crate::error::{CompileError, CompileErrorKind, FunctionTableError};
    use pretty_assertions::assert_eq;

    #[test]
    fn compiles_and_evaluates() {
        let mut f = Formula::new();
        assert!(f.set_formula("a / 2 + b"));
        assert_eq!(f.formula(), "a / 2 + b");
        assert_eq!(f.value_with(&[4.0, 1.0]), 3.0);
        assert!(!f.has_error());
    }

    #[test]
    fn value_variants_bind_slots() {
        let mut f = Formula::new();
        assert!(f.set_formula("a - b"));
        assert!(f.set_variable('b', 1.0));
        assert_eq!(f.value_x(5.0), 4.0);
        assert_eq!(f.value(), 4.0);
        assert_eq!(f.value_named(&[('b', 3.0), ('A', 100.0)]), 2.0);
        // Only slot 0 is rebound; `b` keeps 3.
        assert_eq!(f.value_with(&[10.0]), 7.0);
        assert_eq!(f.variable('b'), Some(3.0));
        assert!(!f.set_variable('1', 0.0));
    }

    #[test]
    fn extra_bindings_are_ignored() {
        let mut f = Formula::new();
        assert!(f.set_formula("z"));
        let values: Vec<f64> = (0..30).map(f64::from).collect();
        assert_eq!(f.value_with(&values), 25.0);
    }

    #[test]
    fn failed_compilation_drops_the_program() {
        let mut f = Formula::new();
        assert!(f.set_formula("a + 1"));
        assert!(!f.set_formula("a +"));
        assert!(f.program().is_none());
        assert_eq!(f.used_variables(), "");
        assert_eq!(
            f.error(),
            Some(&FormulaError::Compile(CompileError::new(
                CompileErrorKind::MissingOperand,
                3
            )))
        );

        assert_eq!(f.value(), 0.0);
        assert_eq!(f.error(), Some(&FormulaError::Eval(EvalFault::NoProgram)));
    }

    #[test]
    fn empty_formula_is_rejected() {
        let mut f = Formula::new();
        assert!(!f.set_formula(""));
        assert_eq!(f.error_position(), Some(0));
        assert_eq!(f.error().map(FormulaError::reason).as_deref(), Some("empty formula"));
    }

    #[test]
    fn error_message_brackets_offending_character() {
        let mut f = Formula::new().with_options(CompileOptions::with_alphabet("ab"));
        assert!(!f.set_formula("a + z * b"));
        assert_eq!(f.error_position(), Some(4));
        assert_eq!(
            f.error_message().as_deref(),
            Some("Error in formula at position 4\na + [z] * b\nundeclared parameter")
        );
    }

    #[test]
    fn error_message_without_position_in_range() {
        assert_eq!(mark_position("a+", 2), "a+");
        assert_eq!(mark_position("(a", 0), "[(]a");
        assert_eq!(mark_position("é+z", 2), "é+[z]");
    }

    #[test]
    fn runtime_fault_is_cleared_by_next_evaluation() {
        let mut f = Formula::new();
        assert!(f.set_formula("a + b"));

        // Swap in a program whose final stack depth is two.
        let mut corrupt = Program::new(Arc::from("a b"));
        corrupt.instrs = vec![
            Instruction::new(OpCode::LoadVar, 0),
            Instruction::new(OpCode::LoadVar, 1),
        ];
        let valid = f.program.replace(Arc::new(corrupt));

        assert_eq!(f.value(), 0.0);
        assert_eq!(
            f.error(),
            Some(&FormulaError::Eval(EvalFault::CorruptedBuffer { depth: 2 }))
        );
        assert!(f.error_message().is_some_and(|m| m.ends_with("corrupted buffer (operand stack depth 2)")));

        f.program = valid;
        assert_eq!(f.value_with(&[1.0, 2.0]), 3.0);
        assert!(!f.has_error());
    }

    #[test]
    fn compiled_programs_keep_their_functions() {
        let mut f = Formula::new();
        assert!(f.add_function("twice", Callable::unary(|x| 2.0 * x), Volatility::NonVolatile));
        assert!(f.set_formula("twice(a)"));
        assert_eq!(f.value_x(4.0), 8.0);

        assert!(f.add_function("twice", Callable::unary(|x| 3.0 * x), Volatility::NonVolatile));
        assert_eq!(f.value_x(4.0), 8.0);
        assert!(f.set_formula("twice(a)"));
        assert_eq!(f.value_x(4.0), 12.0);

        let idx = f.del_function("twice");
        assert_eq!(idx, Some(f.functions().builtin_count()));
        assert_eq!(f.value_x(4.0), 12.0);
        assert!(!f.set_formula("twice(a)"));
        assert_eq!(
            f.error().map(FormulaError::reason).as_deref(),
            Some("function not found")
        );
    }

    #[test]
    fn builtins_cannot_be_deleted() {
        let mut f = Formula::new();
        assert_eq!(f.del_function("sin"), None);
        assert_eq!(
            f.error(),
            Some(&FormulaError::FunctionTable(FunctionTableError::Protected(
                "sin".to_string()
            )))
        );
        assert_eq!(f.error_position(), None);
    }

    #[test]
    fn clones_share_program_but_not_bindings() {
        let mut f = Formula::new();
        assert!(f.set_formula("a * 2"));
        let mut g = f.clone();
        assert!(Arc::ptr_eq(
            f.program.as_ref().unwrap(),
            g.program.as_ref().unwrap()
        ));

        f.set_variable('a', 1.0);
        g.set_variable('a', 5.0);
        assert_eq!(f.value(), 2.0);
        assert_eq!(g.value(), 10.0);
    }

    #[test]
    fn recompiling_is_idempotent() {
        let mut f = Formula::new();
        assert!(f.set_formula("sqrt(a) + pi()"));
        let first = f.value_x(9.0);
        assert!(f.set_formula("sqrt(a) + pi()"));
        assert_eq!(f.value_x(9.0), first);
    }
}
