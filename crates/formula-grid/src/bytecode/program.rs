use crate::functions::Callable;
use std::sync::Arc;

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpCode {
    PushConst = 0,
    LoadVar = 1,
    Neg = 2,
    Add = 3,
    Sub = 4,
    Mul = 5,
    Div = 6,
    Pow = 7,
    Eq = 8,
    Lt = 9,
    Gt = 10,
    And = 11,
    Or = 12,
    CallFunc = 13,
}

impl OpCode {
    #[inline]
    fn from_u8(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => OpCode::PushConst,
            1 => OpCode::LoadVar,
            2 => OpCode::Neg,
            3 => OpCode::Add,
            4 => OpCode::Sub,
            5 => OpCode::Mul,
            6 => OpCode::Div,
            7 => OpCode::Pow,
            8 => OpCode::Eq,
            9 => OpCode::Lt,
            10 => OpCode::Gt,
            11 => OpCode::And,
            12 => OpCode::Or,
            13 => OpCode::CallFunc,
            _ => return None,
        })
    }

    /// Binary operator for a source character.
    pub(crate) fn from_operator(ch: u8) -> Option<Self> {
        Some(match ch {
            b'+' => OpCode::Add,
            b'-' => OpCode::Sub,
            b'*' => OpCode::Mul,
            b'/' => OpCode::Div,
            b'^' => OpCode::Pow,
            b'=' => OpCode::Eq,
            b'<' => OpCode::Lt,
            b'>' => OpCode::Gt,
            b'&' => OpCode::And,
            b'|' => OpCode::Or,
            _ => return None,
        })
    }

    /// Number of operands consumed from the stack (`CallFunc` depends on the callee).
    #[inline]
    pub(crate) fn operand_count(self) -> usize {
        match self {
            OpCode::PushConst | OpCode::LoadVar | OpCode::CallFunc => 0,
            OpCode::Neg => 1,
            _ => 2,
        }
    }
}

/// Packed instruction:
/// - bits 24..31: opcode
/// - bits 0..23: operand (constant index, variable slot, or function index)
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Instruction(u32);

impl Instruction {
    pub const MAX_OPERAND: u32 = (1 << 24) - 1;

    #[inline]
    pub fn new(op: OpCode, operand: u32) -> Self {
        debug_assert!(operand <= Self::MAX_OPERAND);
        Instruction(((op as u32) << 24) | (operand & Self::MAX_OPERAND))
    }

    #[inline]
    pub fn op(op: OpCode) -> Self {
        Self::new(op, 0)
    }

    /// Decode the opcode; `Err` carries the raw tag of an unrecognizable instruction.
    #[inline]
    pub fn opcode(self) -> Result<OpCode, u8> {
        let raw = (self.0 >> 24) as u8;
        OpCode::from_u8(raw).ok_or(raw)
    }

    #[inline]
    pub fn operand(self) -> u32 {
        self.0 & Self::MAX_OPERAND
    }

    #[cfg(test)]
    pub(crate) fn from_raw(raw: u32) -> Self {
        Instruction(raw)
    }
}

impl std::fmt::Debug for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.opcode() {
            Ok(op @ (OpCode::PushConst | OpCode::LoadVar | OpCode::CallFunc)) => {
                write!(f, "{op:?}({})", self.operand())
            }
            Ok(op) => write!(f, "{op:?}"),
            Err(raw) => write!(f, "Invalid({raw})"),
        }
    }
}

/// A function resolved at compile time.
///
/// Programs keep the callable itself, so later changes to the function table don't affect
/// already compiled formulas.
#[derive(Clone, Debug)]
pub struct FunctionRef {
    pub(crate) name: Arc<str>,
    pub(crate) callable: Callable,
}

impl FunctionRef {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Clone, Debug)]
pub struct Program {
    pub(crate) instrs: Vec<Instruction>,
    pub(crate) consts: Vec<f64>,
    pub(crate) funcs: Vec<FunctionRef>,
    pub(crate) used_vars: u32,
    pub(crate) source: Arc<str>,
}

impl Program {
    pub fn new(source: Arc<str>) -> Self {
        Self {
            instrs: Vec::new(),
            consts: Vec::new(),
            funcs: Vec::new(),
            used_vars: 0,
            source,
        }
    }

    #[inline]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[inline]
    pub fn instrs(&self) -> &[Instruction] {
        &self.instrs
    }

    #[inline]
    pub fn consts(&self) -> &[f64] {
        &self.consts
    }

    #[inline]
    pub fn funcs(&self) -> &[FunctionRef] {
        &self.funcs
    }

    /// Whether the whole formula folded down to a single constant.
    pub fn is_constant(&self) -> bool {
        matches!(self.instrs.as_slice(), [only] if only.opcode() == Ok(OpCode::PushConst))
    }

    /// Letters used as variables in the source, in alphabetical order.
    pub fn used_variables(&self) -> String {
        (0..26u8)
            .filter(|slot| self.used_vars & (1 << slot) != 0)
            .map(|slot| (b'a' + slot) as char)
            .collect()
    }

    /// Whether variable `letter` appears in the source.
    pub fn uses_variable(&self, letter: char) -> bool {
        match crate::variable_slot(letter) {
            Some(slot) => self.used_vars & (1 << slot) != 0,
            None => false,
        }
    }
}
