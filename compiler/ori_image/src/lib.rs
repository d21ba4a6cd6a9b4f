//! Ori Image: partitioned multithreaded compilation of one large module into
//! ahead-of-time image archives.
//!
//! # Pipeline
//!
//! ```text
//! create_native ─── front-end fragments linked into one module
//!     ↓
//! build_image
//!     ├── exports::extract       marker tables → ExportTable
//!     ├── threads::ThreadPolicy  how many shards
//!     ├── partition              union-find groups → N balanced partitions
//!     ├── codec::serialize       once, shared by every worker
//!     ├── fork_join::run_indexed
//!     │     └── per shard: open lazily → materialize_preserved
//!     │                    → construct_tables → pipeline::run_shard
//!     ├── metadata               header, shard tables, dispatch ids
//!     └── assemble               one archive per requested artifact kind
//! ```
//!
//! With a single shard the module is compiled in place and never
//! serialized.
//!
//! # Tracing
//!
//! Enable with `RUST_LOG=ori_image=debug` (thread count and partition
//! decisions) or `RUST_LOG=ori_image=trace` (per-definition detail) after
//! calling [`init_tracing`].

pub mod archive;
pub mod assemble;
pub mod backend;
pub mod exports;
pub mod fork_join;
pub mod image;
pub mod materialize;
pub mod metadata;
pub mod names;
pub mod native;
pub mod partition;
pub mod patch;
pub mod pipeline;
pub mod target;
pub mod threads;
pub mod timing;
pub mod weight;

pub use archive::{ArchiveError, ArchiveKind, ArchiveMember, ContainerWriter};
pub use assemble::ArtifactKind;
pub use backend::{CodegenBackend, EmitError, FileType, ObjectEmitter};
pub use exports::{ExportTable, ExportTableError};
pub use image::{
    build_image, build_image_with, ImageError, ImageOptions, ImageReport, OutputPaths,
};
pub use materialize::{materialize_preserved, MaterializeError};
pub use metadata::{DispatchTarget, ImageMetadata, TargetFlags};
pub use names::make_safe_name;
pub use native::{
    create_native, CacheLookup, CodegenFrontend, CompilationPolicy, CompilationUnit, NativeCode,
    NativeError,
};
pub use partition::{partition_module, verify_partitioning, Partition, PartitionError};
pub use pipeline::{run_shard, Float16Abi, OutputKinds, ShardOutputs};
pub use target::{TargetConfig, TargetError};
pub use threads::ThreadPolicy;
pub use timing::{BuildStats, ShardTimers};
pub use weight::{function_weight, FunctionWeight, ModuleInfo};

use std::sync::Once;

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for debug output.
///
/// Call this once at startup. Safe to call multiple times.
/// Enable with `RUST_LOG=ori_image=debug` or `RUST_LOG=ori_image=trace`.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        // Only initialize if RUST_LOG is set
        if std::env::var("RUST_LOG").is_ok() {
            let filter = EnvFilter::from_default_env();
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_level(true))
                .with(filter)
                .init();
        }
    });
}

#[cfg(test)]
mod test_helpers;
