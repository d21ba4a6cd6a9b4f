//! Per-shard code generation.
//!
//! [`run_shard`] takes one shard module through up to four outputs:
//!
//! ```text
//! module ──► unoptimized IR
//!    │
//!    └─ optimize ─► half-precision helpers ──► optimized IR
//!                                          ├─► object file
//!                                          └─► assembly
//! ```
//!
//! Optimization only runs when one of its consumers was requested. A
//! failed emission leaves that buffer empty, is logged, and is recorded in
//! [`ShardOutputs::diagnostics`]; the remaining phases still run.

use bitflags::bitflags;
use ori_lir::{
    CallingConv, FnAttributes, FnType, FunctionBody, GlobalValue, Linkage, Module, Opcode,
    ScalarType,
};
use tracing::{error, trace};

use crate::backend::{CodegenBackend, EmitError, FileType};
use crate::timing::ShardTimers;

bitflags! {
    /// Artifacts requested from each shard.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct OutputKinds: u8 {
        const UNOPT_IR = 1 << 0;
        const OPT_IR = 1 << 1;
        const OBJECT = 1 << 2;
        const ASSEMBLY = 1 << 3;
    }
}

impl OutputKinds {
    /// Whether any requested output needs the optimized module.
    pub fn needs_optimization(self) -> bool {
        self.intersects(Self::OPT_IR | Self::OBJECT | Self::ASSEMBLY)
    }
}

/// The four output buffers of one shard. Unrequested outputs stay empty.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShardOutputs {
    pub unopt: Vec<u8>,
    pub opt: Vec<u8>,
    pub obj: Vec<u8>,
    pub asm: Vec<u8>,
    /// Emission failures, one message each.
    pub diagnostics: Vec<String>,
}

/// How half-precision conversions reach the runtime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Float16Abi {
    /// Define the compiler-runtime helper names as internal functions that
    /// forward to the runtime's own exports.
    #[default]
    Interpose,
    /// Define the helpers directly as internal conversion routines.
    Wrappers,
}

/// Name of the Windows DLL entry point. It never counts as code that needs
/// the half-precision helpers.
pub const DLL_ENTRY: &str = "_DllMainCRTStartup";

/// Compiler-runtime helper, runtime export it forwards to, and signature.
const HALF_HELPERS: [(&str, &str, ScalarType, ScalarType); 5] = [
    ("__gnu_h2f_ieee", "ori__gnu_h2f_ieee", ScalarType::Half, ScalarType::Float),
    ("__extendhfsf2", "ori__gnu_h2f_ieee", ScalarType::Half, ScalarType::Float),
    ("__gnu_f2h_ieee", "ori__gnu_f2h_ieee", ScalarType::Float, ScalarType::Half),
    ("__truncsfhf2", "ori__gnu_f2h_ieee", ScalarType::Float, ScalarType::Half),
    ("__truncdfhf2", "ori__truncdfhf2", ScalarType::Double, ScalarType::Half),
];

/// Whether the module defines any function besides the DLL entry point.
fn has_code(module: &Module) -> bool {
    module
        .iter()
        .any(|(_, g)| g.is_function() && !g.is_declaration() && g.name != DLL_ENTRY)
}

/// Whether `name` is free to be defined as a helper: absent, or only
/// declared as a function.
fn helper_slot_free(module: &Module, name: &str) -> bool {
    module
        .lookup(name)
        .map_or(true, |id| module[id].is_function() && module[id].is_declaration())
}

/// Define `name` as an internal function with `body`, filling in an
/// existing declaration if there is one.
fn define_helper(module: &mut Module, name: &str, ty: FnType, body: FunctionBody, used: bool) {
    let id = match module.lookup(name) {
        Some(id) => id,
        None => module.add(GlobalValue::function(name, ty)),
    };
    let global = &mut module[id];
    global.linkage = Linkage::Internal;
    global.dso_local = true;
    global.compiler_used = used;
    if let Some(func) = global.as_function_mut() {
        func.attrs = FnAttributes {
            calling_conv: CallingConv::C,
            ..FnAttributes::default()
        };
        func.body = Some(body);
    }
}

/// Make sure the half-precision conversion helpers are defined. Helpers the
/// module already defines are left alone.
///
/// Returns the number of helpers added.
pub fn ensure_float16_helpers(module: &mut Module, abi: Float16Abi) -> usize {
    let mut added = 0;
    for (name, runtime, from, to) in HALF_HELPERS {
        if !helper_slot_free(module, name) {
            continue;
        }
        let ty = FnType::new(vec![from], to);
        let body = match abi {
            Float16Abi::Interpose => {
                let target = match module.lookup(runtime) {
                    Some(id) => id,
                    None => module.add(GlobalValue::function(runtime, ty.clone())),
                };
                FunctionBody::forwarding(target, 1)
            }
            Float16Abi::Wrappers => FunctionBody::unary(if from == ScalarType::Half {
                Opcode::FpExt
            } else {
                Opcode::FpTrunc
            }),
        };
        define_helper(module, name, ty, body, abi == Float16Abi::Interpose);
        added += 1;
    }
    trace!(module = %module.name, added, ?abi, "half-precision helpers");
    added
}

fn record_failure(outputs: &mut ShardOutputs, module: &Module, what: &str, err: &EmitError) {
    error!(module = %module.name, output = what, error = %err, "failed to emit output file");
    outputs
        .diagnostics
        .push(format!("failed to emit {what} for {}: {err}", module.name));
}

/// Run the requested phases on one shard module.
pub fn run_shard(
    module: &mut Module,
    backend: &dyn CodegenBackend,
    kinds: OutputKinds,
    timers: &mut ShardTimers,
    float16: Float16Abi,
) -> ShardOutputs {
    let mut out = ShardOutputs::default();

    if kinds.contains(OutputKinds::UNOPT_IR) {
        match timers.unopt.time(|| backend.write_ir(module)) {
            Ok(bytes) => out.unopt = bytes,
            Err(err) => record_failure(&mut out, module, "unoptimized IR", &err),
        }
    }
    if !kinds.needs_optimization() {
        return out;
    }

    timers.optimize.start();
    if let Err(err) = backend.optimize(module) {
        record_failure(&mut out, module, "optimized module", &err);
    }
    if has_code(module) {
        ensure_float16_helpers(module, float16);
    }
    timers.optimize.stop();

    if kinds.contains(OutputKinds::OPT_IR) {
        match timers.opt.time(|| backend.write_ir(module)) {
            Ok(bytes) => out.opt = bytes,
            Err(err) => record_failure(&mut out, module, "optimized IR", &err),
        }
    }
    if kinds.contains(OutputKinds::OBJECT) {
        match timers.obj.time(|| backend.emit(module, FileType::Object)) {
            Ok(bytes) => out.obj = bytes,
            Err(err) => record_failure(&mut out, module, "object file", &err),
        }
    }
    if kinds.contains(OutputKinds::ASSEMBLY) {
        match timers.asm.time(|| backend.emit(module, FileType::Assembly)) {
            Ok(bytes) => out.asm = bytes,
            Err(err) => record_failure(&mut out, module, "assembly file", &err),
        }
    }
    out
}
