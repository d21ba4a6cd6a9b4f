//! Module factories shared by unit tests.

use ori_lir::{
    BasicBlock, Constant, DataType, FnAttributes, FnType, FunctionBody, GlobalId, GlobalValue,
    Instruction, Linkage, Module, Opcode, ScalarType,
};

use crate::exports::ExportTable;
use crate::target::TargetConfig;

pub(crate) const LINUX: &str = "x86_64-unknown-linux-gnu";

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

/// An internal always-inline leaf function.
pub(crate) fn inline_leaf(name: &str) -> GlobalValue {
    func_calling(name, &[])
        .with_linkage(Linkage::Internal)
        .with_attrs(FnAttributes {
            always_inline: true,
            ..FnAttributes::default()
        })
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

/// A data object holding the addresses of `targets`.
pub(crate) fn ptr_table(name: &str, targets: &[GlobalId]) -> GlobalValue {
    GlobalValue::data(
        name,
        DataType::Array {
            elem: ScalarType::Ptr,
            len: targets.len() as u64,
        },
        Some(Constant::address_table(targets.iter().copied())),
    )
}

pub(crate) fn linux_module(name: &str) -> Module {
    let target = linux_target();
    let mut module = Module::new(name);
    target.configure_module(&mut module);
    module
}

pub(crate) fn linux_target() -> TargetConfig {
    TargetConfig::from_triple(LINUX).unwrap()
}

/// `a -> b`, leaf `c`, and `g = [&c]`. Functions a, b, c are exported in
/// that order; `g` is the only exported global.
pub(crate) fn abcg_module() -> (Module, ExportTable) {
    let mut m = linux_module("abcg");
    let b = m.add(func_calling("b", &[]));
    let a = m.add(func_calling("a", &[b]));
    let c = m.add(func_calling("c", &[]));
    let g = m.add(ptr_table("g", &[c]));
    (m, ExportTable::new(vec![a, b, c], vec![g]))
}
