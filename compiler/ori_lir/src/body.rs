//! Function bodies: basic blocks of opcode + operand instructions.
//!
//! Instruction semantics belong to the code generation backend. This layer
//! only needs to count blocks and instructions and to find the globals an
//! instruction mentions.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::global::GlobalId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operand {
    /// An SSA value local to the function (parameters first).
    Local(u32),
    Imm(i64),
    Global(GlobalId),
    /// A basic block index within the same function.
    Block(u32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    Add,
    Sub,
    Mul,
    Cmp,
    Load,
    Store,
    Call,
    FpExt,
    FpTrunc,
    Br,
    CondBr,
    Ret,
    Unreachable,
}

impl Opcode {
    pub fn is_terminator(self) -> bool {
        matches!(self, Self::Br | Self::CondBr | Self::Ret | Self::Unreachable)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operands: SmallVec<[Operand; 3]>,
}

impl Instruction {
    pub fn new(opcode: Opcode, operands: impl IntoIterator<Item = Operand>) -> Self {
        Self {
            opcode,
            operands: operands.into_iter().collect(),
        }
    }

    /// `call @callee(args...)`
    pub fn call(callee: GlobalId, args: impl IntoIterator<Item = Operand>) -> Self {
        Self::new(
            Opcode::Call,
            std::iter::once(Operand::Global(callee)).chain(args),
        )
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BasicBlock {
    pub instructions: Vec<Instruction>,
}

impl BasicBlock {
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self { instructions }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionBody {
    pub blocks: Vec<BasicBlock>,
}

impl FunctionBody {
    pub fn new(blocks: Vec<BasicBlock>) -> Self {
        Self { blocks }
    }

    /// A single block holding only `unreachable`.
    pub fn unreachable() -> Self {
        Self::new(vec![BasicBlock::new(vec![Instruction::new(
            Opcode::Unreachable,
            [],
        )])])
    }

    /// Call `target` with the first `arity` locals and return its result.
    pub fn forwarding(target: GlobalId, arity: u32) -> Self {
        let call = Instruction::call(target, (0..arity).map(Operand::Local));
        let ret = Instruction::new(Opcode::Ret, [Operand::Local(arity)]);
        Self::new(vec![BasicBlock::new(vec![call, ret])])
    }

    /// Apply a single unary opcode to local 0 and return the result.
    pub fn unary(opcode: Opcode) -> Self {
        Self::new(vec![BasicBlock::new(vec![
            Instruction::new(opcode, [Operand::Local(0)]),
            Instruction::new(Opcode::Ret, [Operand::Local(1)]),
        ])])
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn instruction_count(&self) -> usize {
        self.blocks.iter().map(|bb| bb.instructions.len()).sum()
    }

    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.blocks.iter().flat_map(|bb| bb.instructions.iter())
    }

    pub fn for_each_global(&self, f: &mut impl FnMut(GlobalId)) {
        for inst in self.instructions() {
            for operand in &inst.operands {
                if let Operand::Global(id) = operand {
                    f(*id);
                }
            }
        }
    }

    /// Apply `map` to every global operand, returning how many changed.
    pub fn remap(&mut self, map: &mut impl FnMut(GlobalId) -> GlobalId) -> usize {
        let mut changed = 0;
        for bb in &mut self.blocks {
            for inst in &mut bb.instructions {
                for operand in &mut inst.operands {
                    if let Operand::Global(id) = operand {
                        let next = map(*id);
                        if next != *id {
                            *id = next;
                            changed += 1;
                        }
                    }
                }
            }
        }
        changed
    }
}
