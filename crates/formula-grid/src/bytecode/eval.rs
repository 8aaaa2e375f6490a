use super::program::{FunctionRef, Instruction, OpCode, Program};
use crate::error::EvalFault;
use crate::functions::Callable;

/// Upper bound for the operand stack. The compiler rejects formulas that would need more,
/// so hitting it means the bytecode is corrupt.
pub const STACK_LIMIT: usize = 500;

/// Stack-based bytecode interpreter.
#[derive(Clone, Debug, Default)]
pub struct Vm {
    stack: Vec<f64>,
}

impl Vm {
    pub fn new() -> Self {
        Self { stack: Vec::new() }
    }

    pub fn with_capacity(stack: usize) -> Self {
        Self {
            stack: Vec::with_capacity(stack.min(STACK_LIMIT)),
        }
    }

    /// Evaluate `program` with `vars` as the variable binding vector (slot 0 is `a`).
    pub fn eval(&mut self, program: &Program, vars: &[f64]) -> Result<f64, EvalFault> {
        self.run(&program.instrs, &program.consts, &program.funcs, vars)
    }

    pub(crate) fn run(
        &mut self,
        instrs: &[Instruction],
        consts: &[f64],
        funcs: &[FunctionRef],
        vars: &[f64],
    ) -> Result<f64, EvalFault> {
        self.stack.clear();
        for inst in instrs {
            let op = inst.opcode().map_err(EvalFault::UnrecognizedOperator)?;
            match op {
                OpCode::PushConst => {
                    let k = inst.operand();
                    let v = consts
                        .get(k as usize)
                        .copied()
                        .ok_or(EvalFault::ConstantOutOfBounds(k))?;
                    self.push(v)?;
                }
                OpCode::LoadVar => {
                    let slot = inst.operand();
                    let v = vars
                        .get(slot as usize)
                        .copied()
                        .ok_or(EvalFault::VariableOutOfBounds(slot))?;
                    self.push(v)?;
                }
                OpCode::Neg => {
                    let v = self.pop()?;
                    self.push(-v)?;
                }
                OpCode::Add
                | OpCode::Sub
                | OpCode::Mul
                | OpCode::Div
                | OpCode::Pow
                | OpCode::Eq
                | OpCode::Lt
                | OpCode::Gt
                | OpCode::And
                | OpCode::Or => {
                    let right = self.pop()?;
                    let left = self.pop()?;
                    self.push(apply_binary(op, left, right))?;
                }
                OpCode::CallFunc => {
                    let idx = inst.operand();
                    let func = funcs
                        .get(idx as usize)
                        .ok_or(EvalFault::FunctionOutOfBounds(idx))?;
                    let result = match &func.callable {
                        Callable::Nullary(f) => f(),
                        Callable::Unary(f) => {
                            let x = self.pop()?;
                            f(x)
                        }
                        Callable::Binary(f) => {
                            let y = self.pop()?;
                            let x = self.pop()?;
                            f(x, y)
                        }
                        Callable::Ternary(f) => {
                            let z = self.pop()?;
                            let y = self.pop()?;
                            let x = self.pop()?;
                            f(x, y, z)
                        }
                    };
                    self.push(result)?;
                }
            }
        }

        match self.stack.as_slice() {
            [result] => Ok(*result),
            other => Err(EvalFault::CorruptedBuffer { depth: other.len() }),
        }
    }

    #[inline]
    fn push(&mut self, v: f64) -> Result<(), EvalFault> {
        if self.stack.len() >= STACK_LIMIT {
            return Err(EvalFault::StackOverflow);
        }
        self.stack.push(v);
        Ok(())
    }

    #[inline]
    fn pop(&mut self) -> Result<f64, EvalFault> {
        self.stack
            .pop()
            .ok_or(EvalFault::CorruptedBuffer { depth: 0 })
    }
}

#[inline]
fn truth(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

#[inline]
pub(crate) fn apply_binary(op: OpCode, left: f64, right: f64) -> f64 {
    match op {
        OpCode::Add => left + right,
        OpCode::Sub => left - right,
        OpCode::Mul => left * right,
        OpCode::Div => left / right,
        OpCode::Pow => left.powf(right),
        OpCode::Eq => truth(left == right),
        OpCode::Lt => truth(left < right),
        OpCode::Gt => truth(left > right),
        OpCode::And => truth(left != 0.0 && right != 0.0),
        OpCode::Or => truth(left != 0.0 || right != 0.0),
        OpCode::PushConst | OpCode::LoadVar | OpCode::Neg | OpCode::CallFunc => {
            unreachable!("{op:?} is not a binary operator")
        }
    }
}
