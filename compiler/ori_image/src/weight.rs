//! Cost estimates used to balance partitions and pick a thread count.
//!
//! A function costs `(1 + instructions + blocks) * clones`, where `clones`
//! is one more than the number of target variants named in its clone-set
//! mask. Every other definition costs 1.

use ori_lir::{Function, GlobalValue, Module};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FunctionWeight {
    pub weight: usize,
    pub blocks: usize,
    pub instructions: usize,
    pub clones: usize,
}

/// Number of copies code generation will produce for a clone-set mask.
///
/// The mask is hexadecimal; each set bit is one extra variant. A missing
/// or malformed mask means the function is compiled once.
pub fn clone_count(mask: Option<&str>) -> usize {
    let Some(mask) = mask else {
        return 1;
    };
    if mask.is_empty() {
        return 1;
    }
    let mut bits = 0usize;
    for c in mask.chars() {
        match c.to_digit(16) {
            Some(digit) => bits += digit.count_ones() as usize,
            None => return 1,
        }
    }
    bits + 1
}

pub fn function_weight(func: &Function) -> FunctionWeight {
    let (blocks, instructions) = func
        .body
        .as_ref()
        .map_or((0, 0), |body| (body.block_count(), body.instruction_count()));
    let clones = clone_count(func.attrs.clone_set.as_deref());
    FunctionWeight {
        weight: (1 + instructions + blocks) * clones,
        blocks,
        instructions,
        clones,
    }
}

/// Weight of any global: the function weight for functions, 1 otherwise.
pub fn global_weight(global: &GlobalValue) -> usize {
    global.as_function().map_or(1, |func| function_weight(func).weight)
}

/// Aggregate counts over the definitions of a module.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModuleInfo {
    pub triple: String,
    /// Non-declaration globals.
    pub globals: usize,
    pub funcs: usize,
    pub bbs: usize,
    pub insts: usize,
    pub clones: usize,
    pub weight: usize,
}

impl ModuleInfo {
    pub fn compute(module: &Module) -> Self {
        let mut info = Self {
            triple: module.target_triple.clone(),
            ..Self::default()
        };
        for (_, global) in module.iter() {
            if global.is_declaration() {
                continue;
            }
            info.globals += 1;
            if let Some(func) = global.as_function() {
                let fw = function_weight(func);
                info.funcs += 1;
                info.bbs += fw.blocks;
                info.insts += fw.instructions;
                info.clones += fw.clones;
                info.weight += fw.weight;
            } else {
                info.weight += 1;
            }
        }
        info
    }
}
