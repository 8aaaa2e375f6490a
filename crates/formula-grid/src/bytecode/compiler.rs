use super::eval::{Vm, STACK_LIMIT};
use super::program::{FunctionRef, Instruction, OpCode, Program};
use crate::error::{CompileError, CompileErrorKind};
use crate::functions::{FunctionTable, MAX_PARAMS};
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::sync::Arc;

/// Every lowercase letter.
pub const DEFAULT_ALPHABET: &str = "abcdefghijklmnopqrstuvwxyz";

/// Default capacity of the constant pool.
pub const MAX_CONSTANTS: usize = 255;

/// Deepest operand, argument or negation nesting the compiler accepts.
///
/// Redundant parentheses do not count.
pub const MAX_NESTING: usize = 256;

const OPERATORS: &[u8] = b"+-*/^=<>&|";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Letters that may be used as variables. Characters outside `a..=z` are ignored.
    pub alphabet: String,
    /// Capacity of the constant pool (after folding).
    pub max_constants: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            alphabet: DEFAULT_ALPHABET.to_string(),
            max_constants: MAX_CONSTANTS,
        }
    }
}

impl CompileOptions {
    pub fn with_alphabet(alphabet: impl Into<String>) -> Self {
        Self {
            alphabet: alphabet.into(),
            ..Self::default()
        }
    }
}

#[derive(Default)]
pub struct Compiler;

impl Compiler {
    /// Translate `source` into bytecode.
    ///
    /// Functions are resolved against `functions` now; the program keeps the resolved callables.
    pub fn compile(
        source: &str,
        options: &CompileOptions,
        functions: &FunctionTable,
    ) -> Result<Program, CompileError> {
        if source.trim().is_empty() {
            return Err(CompileError::new(CompileErrorKind::EmptyFormula, 0));
        }

        let mut ctx = CompileCtx::new(source, options, functions);
        let used_vars = ctx.scan_variables()?;
        ctx.match_parens()?;
        let root = ctx.compile_range(0, source.len(), 0)?;

        let mut program = Program::new(Arc::from(source));
        program.used_vars = used_vars;
        ctx.finish(root.code, &mut program);

        log::debug!(
            "compiled formula `{source}`: {} instructions, {} constants, {} functions, stack depth {}",
            program.instrs.len(),
            program.consts.len(),
            program.funcs.len(),
            root.depth
        );
        Ok(program)
    }
}

/// Emitted code with the operand stack it needs.
#[derive(Debug, Default)]
struct Fragment {
    code: Vec<Instruction>,
    /// Values `code` leaves on the stack.
    values: usize,
    /// Peak stack depth while `code` runs.
    depth: usize,
}

impl Fragment {
    fn leaf(inst: Instruction) -> Self {
        Self {
            code: vec![inst],
            values: 1,
            depth: 1,
        }
    }

    fn append(&mut self, other: Fragment) {
        self.depth = self.depth.max(self.values + other.depth);
        self.values += other.values;
        self.code.extend(other.code);
    }

    /// Push an instruction that pops `operands` values and pushes one.
    fn apply(&mut self, inst: Instruction, operands: usize) {
        self.code.push(inst);
        self.values = (self.values + 1).saturating_sub(operands);
        self.depth = self.depth.max(self.values);
    }
}

struct CompileCtx<'a> {
    text: &'a str,
    src: &'a [u8],
    /// Index of the matching parenthesis for every `(` and `)`.
    partner: Vec<usize>,
    declared: u32,
    max_constants: usize,
    functions: &'a FunctionTable,
    consts: Vec<f64>,
    /// Functions referenced so far; `CallFunc` operands index into this until `finish`.
    funcs: Vec<FunctionRef>,
    func_slots: AHashMap<usize, u32>,
    vm: Vm,
}

impl<'a> CompileCtx<'a> {
    fn new(text: &'a str, options: &CompileOptions, functions: &'a FunctionTable) -> Self {
        let declared = options
            .alphabet
            .chars()
            .filter_map(crate::variable_slot)
            .fold(0u32, |mask, slot| mask | (1 << slot));
        Self {
            text,
            src: text.as_bytes(),
            partner: Vec::new(),
            declared,
            max_constants: options.max_constants.min(Instruction::MAX_OPERAND as usize),
            functions,
            consts: Vec::new(),
            funcs: Vec::new(),
            func_slots: AHashMap::new(),
            vm: Vm::new(),
        }
    }

    fn error(&self, kind: CompileErrorKind, byte_pos: usize) -> CompileError {
        // Offsets are reported in characters, not bytes.
        let position = match self.text.get(..byte_pos) {
            Some(prefix) => prefix.chars().count(),
            None => byte_pos,
        };
        CompileError::new(kind, position)
    }

    #[inline]
    fn is_declared(&self, letter: u8) -> bool {
        letter.is_ascii_lowercase() && self.declared & (1 << (letter - b'a')) != 0
    }

    /// Validate every standalone lowercase letter against the alphabet and collect the
    /// used-variable mask.
    fn scan_variables(&self) -> Result<u32, CompileError> {
        let mut used = 0u32;
        for (i, &c) in self.src.iter().enumerate() {
            if !c.is_ascii_lowercase() {
                continue;
            }
            let prev_ident = i > 0 && is_ident_byte(self.src[i - 1]);
            let next = self.src.get(i + 1).copied();
            let next_ident = matches!(next, Some(n) if is_ident_byte(n) || n == b'(');
            if prev_ident || next_ident {
                continue;
            }
            if !self.is_declared(c) {
                return Err(self.error(CompileErrorKind::UndeclaredParameter, i));
            }
            used |= 1 << (c - b'a');
        }
        Ok(used)
    }

    /// Check that parentheses balance and record each one's partner.
    fn match_parens(&mut self) -> Result<(), CompileError> {
        let mut partner: Vec<usize> = (0..self.src.len()).collect();
        let mut open: SmallVec<[usize; 8]> = SmallVec::new();
        for (i, &c) in self.src.iter().enumerate() {
            match c {
                b'(' => open.push(i),
                b')' => match open.pop() {
                    Some(o) => {
                        partner[o] = i;
                        partner[i] = o;
                    }
                    None => return Err(self.error(CompileErrorKind::UnmatchedParentheses, i)),
                },
                _ => {}
            }
        }
        if let Some(&pos) = open.last() {
            return Err(self.error(CompileErrorKind::UnmatchedParentheses, pos));
        }
        self.partner = partner;
        Ok(())
    }

    fn trim(&self, mut begin: usize, mut end: usize) -> (usize, usize) {
        while begin < end && self.src[begin].is_ascii_whitespace() {
            begin += 1;
        }
        while end > begin && self.src[end - 1].is_ascii_whitespace() {
            end -= 1;
        }
        (begin, end)
    }

    /// Operators at parenthesis depth 0 accepted by `is_op`, left to right.
    fn top_level_ops(
        &self,
        begin: usize,
        end: usize,
        is_op: impl Fn(usize) -> bool,
    ) -> SmallVec<[usize; 8]> {
        let mut ops = SmallVec::new();
        let mut i = end;
        while i > begin {
            i -= 1;
            if self.src[i] == b')' {
                // Skip the whole group.
                i = self.partner[i].max(begin);
            } else if is_op(i) {
                ops.push(i);
            }
        }
        ops.reverse();
        ops
    }

    /// Whether the `+`/`-` at `i` is a binary additive operator within `[begin, ..)`.
    fn is_additive(&self, begin: usize, i: usize) -> bool {
        let c = self.src[i];
        if c != b'+' && c != b'-' {
            return false;
        }
        // Sign of a numeric exponent, e.g. `1.5E-3`.
        if i >= begin + 2
            && self.src[i - 1] == b'E'
            && (self.src[i - 2].is_ascii_digit() || self.src[i - 2] == b'.')
        {
            return false;
        }
        if c == b'+' {
            return true;
        }
        // A minus is binary only when an operand precedes it.
        self.src[begin..i]
            .iter()
            .rev()
            .find(|b| !b.is_ascii_whitespace())
            .is_some_and(|prev| !OPERATORS.contains(prev))
    }

    fn compile_range(
        &mut self,
        begin: usize,
        end: usize,
        nesting: usize,
    ) -> Result<Fragment, CompileError> {
        let (mut b, mut e) = self.trim(begin, end);
        if b >= e {
            return Err(self.error(CompileErrorKind::MissingOperand, begin));
        }
        let start = b;

        loop {
            let ops = self.top_level_ops(b, e, |i| self.is_additive(b, i));
            if !ops.is_empty() {
                self.check_nesting(nesting, start)?;
                return self.compile_chain(b, e, &ops, nesting);
            }
            let ops = self.top_level_ops(b, e, |i| matches!(self.src[i], b'*' | b'/'));
            if !ops.is_empty() {
                self.check_nesting(nesting, start)?;
                return self.compile_chain(b, e, &ops, nesting);
            }
            if self.src[b] == b'-' {
                self.check_nesting(nesting, start)?;
                let mut frag = self.compile_range(b + 1, e, nesting + 1)?;
                frag.apply(Instruction::op(OpCode::Neg), 1);
                return self.fold(frag, 1, b);
            }
            let ops = self.top_level_ops(b, e, |i| {
                matches!(self.src[i], b'^' | b'=' | b'<' | b'>' | b'&' | b'|')
            });
            if !ops.is_empty() {
                self.check_nesting(nesting, start)?;
                return self.compile_chain(b, e, &ops, nesting);
            }

            if self.src[b] == b'(' && self.src[e - 1] == b')' {
                let close = self.partner[b];
                if close != e - 1 {
                    return Err(self.error(CompileErrorKind::UnmatchedParentheses, close));
                }
                let inner = b + 1;
                (b, e) = self.trim(inner, close);
                if b >= e {
                    return Err(self.error(CompileErrorKind::MissingOperand, inner));
                }
                continue;
            }
            break;
        }

        if e == b + 1 && self.src[b].is_ascii_lowercase() {
            let letter = self.src[b];
            if !self.is_declared(letter) {
                return Err(self.error(CompileErrorKind::UndeclaredParameter, b));
            }
            return Ok(Fragment::leaf(Instruction::new(
                OpCode::LoadVar,
                (letter - b'a') as u32,
            )));
        }

        if let Some(value) = parse_number(&self.src[b..e]) {
            let idx = self.push_const(value, b)?;
            return Ok(Fragment::leaf(Instruction::new(OpCode::PushConst, idx)));
        }

        self.check_nesting(nesting, start)?;
        self.compile_call(b, e, nesting)
    }

    /// Compile `x0 op x1 op x2 ...` split at `ops`, associating to the left.
    fn compile_chain(
        &mut self,
        begin: usize,
        end: usize,
        ops: &[usize],
        nesting: usize,
    ) -> Result<Fragment, CompileError> {
        let mut frag = self.compile_range(begin, ops[0], nesting + 1)?;
        for (k, &pos) in ops.iter().enumerate() {
            let op = match OpCode::from_operator(self.src[pos]) {
                Some(op) => op,
                None => return Err(self.error(CompileErrorKind::Syntax, pos)),
            };
            let right_end = ops.get(k + 1).copied().unwrap_or(end);
            let right = self.compile_range(pos + 1, right_end, nesting + 1)?;
            frag.append(right);
            frag.apply(Instruction::op(op), op.operand_count());
            self.check_depth(&frag, pos)?;
            frag = self.fold(frag, op.operand_count(), pos)?;
        }
        Ok(frag)
    }

    fn compile_call(&mut self, b: usize, e: usize, nesting: usize) -> Result<Fragment, CompileError> {
        let first = self.src[b];
        if !(first.is_ascii_alphabetic() || first == b'_') {
            return Err(self.error(CompileErrorKind::Syntax, b));
        }
        let mut name_end = b + 1;
        while name_end < e && is_ident_byte(self.src[name_end]) {
            name_end += 1;
        }

        let name = &self.text[b..name_end];
        let table_idx = self
            .functions
            .lookup(name)
            .map_err(|_| self.error(CompileErrorKind::FunctionNotFound, b))?;
        if name_end >= e || self.src[name_end] != b'(' || self.src[e - 1] != b')' {
            return Err(self.error(CompileErrorKind::ImproperFunctionSyntax, name_end));
        }

        let (arity, varying) = match self.functions.entry(table_idx) {
            Some(entry) => (entry.arity(), entry.volatility().is_varying()),
            None => return Err(self.error(CompileErrorKind::FunctionNotFound, b)),
        };
        let (inner_begin, inner_end) = (name_end + 1, e - 1);

        let mut frag = Fragment::default();
        if arity == 0 {
            let (s, t) = self.trim(inner_begin, inner_end);
            if s < t {
                return Err(self.error(CompileErrorKind::TooManyParameters, s));
            }
        } else {
            let args = self.split_args(inner_begin, inner_end);
            if args.len() < arity {
                // Reported at the last character inside the parentheses.
                let last = self.text[..inner_end]
                    .char_indices()
                    .next_back()
                    .map_or(inner_end, |(i, _)| i);
                return Err(self.error(CompileErrorKind::TooFewParameters, last));
            }
            if args.len() > arity {
                return Err(self.error(CompileErrorKind::TooManyParameters, args[arity].0));
            }
            for (s, t) in args {
                let arg = self.compile_range(s, t, nesting + 1)?;
                frag.append(arg);
            }
        }

        let slot = self.func_slot(table_idx);
        frag.apply(Instruction::new(OpCode::CallFunc, slot), arity);
        self.check_depth(&frag, b)?;
        if varying {
            return Ok(frag);
        }
        self.fold(frag, arity, b)
    }

    /// Split `[begin, end)` on commas outside nested parentheses.
    fn split_args(&self, begin: usize, end: usize) -> SmallVec<[(usize, usize); MAX_PARAMS + 1]> {
        let mut args = SmallVec::new();
        let mut start = begin;
        let mut i = begin;
        while i < end {
            match self.src[i] {
                b'(' => i = self.partner[i].min(end),
                b',' => {
                    args.push((start, i));
                    start = i + 1;
                }
                _ => {}
            }
            i += 1;
        }
        args.push((start, end));
        args
    }

    /// Reject operators and calls nested deeper than [`MAX_NESTING`]; `start` is where the
    /// offending range begins.
    fn check_nesting(&self, nesting: usize, start: usize) -> Result<(), CompileError> {
        if nesting > MAX_NESTING {
            return Err(self.error(CompileErrorKind::TooComplex, start));
        }
        Ok(())
    }

    /// Reject code the VM could not run within [`STACK_LIMIT`].
    fn check_depth(&self, frag: &Fragment, at: usize) -> Result<(), CompileError> {
        if frag.depth > STACK_LIMIT {
            return Err(self.error(CompileErrorKind::TooComplex, at));
        }
        Ok(())
    }

    fn func_slot(&mut self, table_idx: usize) -> u32 {
        if let Some(&slot) = self.func_slots.get(&table_idx) {
            return slot;
        }
        let slot = self.funcs.len() as u32;
        if let Some(entry) = self.functions.entry(table_idx) {
            self.funcs.push(FunctionRef {
                name: entry.shared_name(),
                callable: entry.callable().clone(),
            });
        }
        self.func_slots.insert(table_idx, slot);
        slot
    }

    fn push_const(&mut self, value: f64, at: usize) -> Result<u32, CompileError> {
        if self.consts.len() >= self.max_constants {
            return Err(self.error(CompileErrorKind::TooManyConstants, at));
        }
        self.consts.push(value);
        Ok((self.consts.len() - 1) as u32)
    }

    /// Replace `frag` by a single constant when all of its `n_operands` operands are constants.
    ///
    /// `frag` must be exactly the operands followed by the operator/call instruction.
    fn fold(&mut self, frag: Fragment, n_operands: usize, at: usize) -> Result<Fragment, CompileError> {
        if frag.code.len() != n_operands + 1 {
            return Ok(frag);
        }
        let operands = &frag.code[..n_operands];
        if !operands
            .iter()
            .all(|inst| inst.opcode() == Ok(OpCode::PushConst))
        {
            return Ok(frag);
        }

        let value = self
            .vm
            .run(&frag.code, &self.consts, &self.funcs, &[])
            .map_err(|fault| {
                log::warn!("constant folding of `{}` failed: {fault}", self.text);
                self.error(CompileErrorKind::Internal, at)
            })?;

        // Operand constants are the most recent pool entries; give their slots back.
        let len = self.consts.len();
        let reclaimable = len >= n_operands
            && operands
                .iter()
                .enumerate()
                .all(|(i, inst)| inst.operand() as usize == len - n_operands + i);
        if reclaimable {
            self.consts.truncate(len - n_operands);
        }

        let idx = self.push_const(value, at)?;
        Ok(Fragment::leaf(Instruction::new(OpCode::PushConst, idx)))
    }

    /// Move the code into `program`, keeping only the functions the final code still calls.
    fn finish(self, mut instrs: Vec<Instruction>, program: &mut Program) {
        let mut remap: Vec<Option<u32>> = vec![None; self.funcs.len()];
        for inst in instrs.iter_mut() {
            if inst.opcode() != Ok(OpCode::CallFunc) {
                continue;
            }
            let old = inst.operand() as usize;
            let Some(func) = self.funcs.get(old) else {
                continue;
            };
            let new = match remap[old] {
                Some(new) => new,
                None => {
                    let new = program.funcs.len() as u32;
                    program.funcs.push(func.clone());
                    remap[old] = Some(new);
                    new
                }
            };
            *inst = Instruction::new(OpCode::CallFunc, new);
        }
        program.instrs = instrs;
        program.consts = self.consts;
    }
}


#[inline]
fn is_ident_byte(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

/// `[0-9]+(.[0-9]*)?(E[+-]?[0-9]+)?` or `.[0-9]+(E[+-]?[0-9]+)?`.
fn parse_number(bytes: &[u8]) -> Option<f64> {
    let mut i = 0;
    let digits = |i: &mut usize| {
        let start = *i;
        while *i < bytes.len() && bytes[*i].is_ascii_digit() {
            *i += 1;
        }
        *i - start
    };

    let mut mantissa = digits(&mut i);
    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        mantissa += digits(&mut i);
    }
    if mantissa == 0 {
        return None;
    }
    if i < bytes.len() && bytes[i] == b'E' {
        i += 1;
        if i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
            i += 1;
        }
        if digits(&mut i) == 0 {
            return None;
        }
    }
    if i != bytes.len() {
        return None;
    }

    std::str::from_utf8(bytes).ok()?.parse::<f64>().ok()
}
