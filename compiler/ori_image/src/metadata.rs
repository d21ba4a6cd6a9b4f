//! The metadata and payload modules that sit beside the shards in every
//! archive.
//!
//! The metadata module is how the loader finds everything else:
//!
//! ```text
//! image_pointers ─┬─► image_header             [1, shards, nfvars, ngvars]
//!                 ├─► image_shard_tables       6 slots per shard
//!                 ├─► image_ptls_table         3 thread-local slots
//!                 ├─► image_small_typeof       type tag block
//!                 └─► image_dispatch_target_ids
//! ```

use std::io::{self, Write};

use bitflags::bitflags;
use ori_lir::{
    BasicBlock, CallingConv, Constant, DataType, DllStorage, FnAttributes, FnType, FunctionBody,
    GlobalId, GlobalValue, Instruction, Linkage, Module, Opcode, Operand, ScalarType, Visibility,
};

use crate::pipeline::DLL_ENTRY;
use crate::target::{BinaryFormat, TargetConfig};

/// Image format version written in the header.
pub const IMAGE_VERSION: u32 = 1;

/// Module flag set on the data module when dispatch uses the vector
/// calling convention.
pub const VECCALL_FLAG: &str = "image.veccall";

pub const HEADER: &str = "image_header";
pub const SHARD_TABLES: &str = "image_shard_tables";
pub const PTLS_TABLE: &str = "image_ptls_table";
pub const SMALL_TYPEOF: &str = "image_small_typeof";
pub const DISPATCH_IDS: &str = "image_dispatch_target_ids";
pub const POINTERS: &str = "image_pointers";
pub const SYSTEM_DATA: &str = "image_system_data";
pub const SYSTEM_SIZE: &str = "image_system_size";

/// Thread-local slots the loader fills in.
const PTLS_SLOTS: [&str; 3] = [
    "image_pgcstack_func_slot",
    "image_pgcstack_key_slot",
    "image_tls_offset",
];

/// Size in bytes of the type tag block.
const SMALL_TYPEOF_BYTES: u32 = 1024;

/// Payload alignment. Matches the widest vector load the loader uses.
const PAYLOAD_ALIGN: u32 = 64;

bitflags! {
    /// Per-target flags of a dispatch entry.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct TargetFlags: u32 {
        const VEC_CALL = 1 << 0;
        const CLONE_ALL = 1 << 1;
        const UNKNOWN_NAME = 1 << 2;
        const OPTSIZE = 1 << 3;
        const MINSIZE = 1 << 4;
        const CLONE_LOOP = 1 << 5;
        const CLONE_SIMD = 1 << 6;
        const CLONE_MATH = 1 << 7;
        const CLONE_CPU = 1 << 8;
        const CLONE_FLOAT16 = 1 << 9;
        const CLONE_BFLOAT16 = 1 << 10;
    }
}

/// One entry of the dispatch target list: flags plus opaque feature bytes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DispatchTarget {
    pub flags: TargetFlags,
    pub data: Vec<u8>,
}

impl DispatchTarget {
    pub fn new(flags: TargetFlags, data: impl Into<Vec<u8>>) -> Self {
        Self {
            flags,
            data: data.into(),
        }
    }
}

/// Serialize the dispatch target list.
///
/// Only [`TargetFlags::UNKNOWN_NAME`] survives from each entry's flags; the
/// rest is replaced by [`TargetFlags::VEC_CALL`] when `has_veccall` is set.
#[expect(
    clippy::cast_possible_truncation,
    reason = "dispatch lists are a handful of entries"
)]
pub fn encode_dispatch_targets(targets: &[DispatchTarget], has_veccall: bool) -> Vec<u8> {
    let base = if has_veccall {
        TargetFlags::VEC_CALL
    } else {
        TargetFlags::empty()
    };
    let mut out = Vec::new();
    out.extend_from_slice(&(targets.len() as u32).to_le_bytes());
    for target in targets {
        let flags = base | (target.flags & TargetFlags::UNKNOWN_NAME);
        out.extend_from_slice(&flags.bits().to_le_bytes());
        out.extend_from_slice(&target.data);
    }
    out
}

/// Write the dispatch bytes to a side channel, length-prefixed.
///
/// # Errors
///
/// Propagates write failures.
#[expect(
    clippy::cast_possible_truncation,
    reason = "the side channel length prefix is u32 by format"
)]
pub fn write_side_channel(out: &mut dyn Write, bytes: &[u8]) -> io::Result<()> {
    out.write_all(&(bytes.len() as u32).to_le_bytes())?;
    out.write_all(bytes)?;
    out.flush()
}

/// Counts recorded in the image header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ImageMetadata {
    pub shards: u32,
    pub nfvars: u32,
    pub ngvars: u32,
}

impl ImageMetadata {
    pub fn header(&self) -> [u32; 4] {
        [IMAGE_VERSION, self.shards, self.nfvars, self.ngvars]
    }
}

fn hidden(global: GlobalValue) -> GlobalValue {
    let mut global = global.with_visibility(Visibility::Hidden);
    global.dso_local = true;
    global
}

fn ptr_array(len: u64) -> DataType {
    DataType::Array {
        elem: ScalarType::Ptr,
        len,
    }
}

/// An external declaration of one of a shard's table globals.
fn shard_table_decl(module: &mut Module, name: String, ty: DataType) -> GlobalId {
    module.add(hidden(GlobalValue::data(name, ty, None)))
}

fn dll_entry() -> GlobalValue {
    let ret_one = BasicBlock::new(vec![Instruction::new(Opcode::Ret, [Operand::Imm(1)])]);
    GlobalValue::function(
        DLL_ENTRY,
        FnType::new(vec![ScalarType::Ptr, ScalarType::I32, ScalarType::Ptr], ScalarType::I32),
    )
    .with_attrs(FnAttributes {
        calling_conv: CallingConv::X86StdCall,
        ..FnAttributes::default()
    })
    .with_body(FunctionBody::new(vec![ret_one]))
}

/// Build the metadata module for an image with `meta.shards` shards.
pub fn build_metadata_module(
    target: &TargetConfig,
    meta: &ImageMetadata,
    dispatch_ids: &[u8],
) -> Module {
    let mut module = Module::new("metadata");
    target.configure_module(&mut module);
    let ptr = target.pointer_size();

    let header = module.add(
        GlobalValue::data(
            HEADER,
            DataType::Array {
                elem: ScalarType::I32,
                len: 4,
            },
            Some(Constant::u32_array(meta.header())),
        )
        .with_linkage(Linkage::Internal)
        .with_constant(true),
    );

    let mut slots = Vec::with_capacity(meta.shards as usize * 6);
    for shard in 0..meta.shards {
        for kind in ["fvar", "gvar"] {
            slots.push(shard_table_decl(
                &mut module,
                format!("image_{kind}_base_{shard}"),
                DataType::Scalar(ScalarType::Ptr),
            ));
            slots.push(shard_table_decl(
                &mut module,
                format!("image_{kind}_offsets_{shard}"),
                ptr_array(0),
            ));
            slots.push(shard_table_decl(
                &mut module,
                format!("image_{kind}_idxs_{shard}"),
                DataType::Array {
                    elem: ScalarType::I32,
                    len: 0,
                },
            ));
        }
    }
    let shard_tables = module.add(hidden(
        GlobalValue::data(
            SHARD_TABLES,
            ptr_array(slots.len() as u64),
            Some(Constant::address_table(slots)),
        )
        .with_constant(true),
    ));

    let ptls_slots: Vec<GlobalId> = PTLS_SLOTS
        .iter()
        .map(|name| {
            module.add(hidden(GlobalValue::data(
                *name,
                DataType::Scalar(ScalarType::Ptr),
                Some(Constant::Zero),
            )))
        })
        .collect();
    let ptls = module.add(hidden(
        GlobalValue::data(
            PTLS_TABLE,
            ptr_array(ptls_slots.len() as u64),
            Some(Constant::address_table(ptls_slots)),
        )
        .with_constant(true),
    ));

    let small_typeof = module.add(hidden(GlobalValue::data(
        SMALL_TYPEOF,
        ptr_array(u64::from(SMALL_TYPEOF_BYTES / ptr)),
        Some(Constant::Zero),
    )));

    let dispatch = module.add(
        GlobalValue::data(
            DISPATCH_IDS,
            DataType::Bytes(dispatch_ids.len() as u64),
            Some(Constant::Bytes(dispatch_ids.to_vec())),
        )
        .with_linkage(Linkage::Internal)
        .with_constant(true),
    );

    let pointers = [header, shard_tables, ptls, small_typeof, dispatch];
    module.add(
        GlobalValue::data(
            POINTERS,
            ptr_array(pointers.len() as u64),
            Some(Constant::address_table(pointers)),
        )
        .with_constant(true),
    );

    if target.is_windows() {
        module.add(dll_entry());
    }
    module
}

/// Build the module that embeds the serialized system payload.
pub fn build_payload_module(target: &TargetConfig, payload: &[u8]) -> Module {
    let mut module = Module::new("sysimg");
    target.configure_module(&mut module);
    let dll_storage = if target.binary_format() == BinaryFormat::Coff {
        DllStorage::Export
    } else {
        DllStorage::Default
    };
    let ptr_int = if target.pointer_size() == 4 {
        ScalarType::I32
    } else {
        ScalarType::I64
    };

    let mut data = GlobalValue::data(
        SYSTEM_DATA,
        DataType::Bytes(payload.len() as u64),
        Some(Constant::Bytes(payload.to_vec())),
    )
    .with_constant(true)
    .with_align(PAYLOAD_ALIGN);
    data.dll_storage = dll_storage;
    module.add(data);

    let mut size = GlobalValue::data(
        SYSTEM_SIZE,
        DataType::Scalar(ptr_int),
        Some(Constant::Int {
            ty: ptr_int,
            value: payload.len() as u64,
        }),
    )
    .with_constant(true);
    size.dll_storage = dll_storage;
    module.add(size);
    module
}
