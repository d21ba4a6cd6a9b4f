//! Module factories shared by unit tests.

use crate::body::{BasicBlock, FunctionBody, Instruction, Opcode, Operand};
use crate::constant::Constant;
use crate::global::{GlobalId, GlobalValue, Linkage};
use crate::module::Module;
use crate::types::{DataType, FnType, ScalarType, ValueType};

/// A defined `void ()` function whose body calls each of `callees`.
pub(crate) fn func_calling(name: &str, callees: &[GlobalId]) -> GlobalValue {
    let mut insts: Vec<Instruction> = callees
        .iter()
        .map(|callee| Instruction::call(*callee, []))
        .collect();
    insts.push(Instruction::new(Opcode::Ret, []));
    GlobalValue::function(name, FnType::void())
        .with_body(FunctionBody::new(vec![BasicBlock::new(insts)]))
}

/// A defined `i64` data object.
pub(crate) fn int_data(name: &str, value: u64) -> GlobalValue {
    GlobalValue::data(
        name,
        DataType::Scalar(ScalarType::I64),
        Some(Constant::Int {
            ty: ScalarType::I64,
            value,
        }),
    )
}

/// `callee`, `caller -> callee`, `table = [&caller]`, `alias -> callee`,
/// an external declaration `ext`, and an anonymous private constant.
pub(crate) fn sample_module() -> Module {
    let mut m = Module::new("sample").with_target("x86_64-unknown-linux-gnu", "e-m:e-i64:64");
    let callee = m.add(func_calling("callee", &[]));
    let caller = m.add(func_calling("caller", &[callee]));
    m.add(GlobalValue::data(
        "table",
        DataType::Array {
            elem: ScalarType::Ptr,
            len: 1,
        },
        Some(Constant::address_table([caller])),
    ));
    m.add(GlobalValue::alias(
        "alias",
        ValueType::Function(FnType::void()),
        callee,
    ));
    m.add(GlobalValue::function("ext", FnType::new(vec![ScalarType::I32], ScalarType::I32)));
    m.add(
        GlobalValue::data("", DataType::Bytes(3), Some(Constant::Bytes(vec![1, 2, 3])))
            .with_linkage(Linkage::Private)
            .with_constant(true),
    );
    m.set_flag("image.suffix", "_0");
    m
}

/// The operand list of the first instruction of `id`'s body.
pub(crate) fn first_operands(m: &Module, id: GlobalId) -> Vec<Operand> {
    m[id]
        .as_function()
        .and_then(|f| f.body.as_ref())
        .and_then(|b| b.instructions().next())
        .map(|inst| inst.operands.to_vec())
        .unwrap_or_default()
}
