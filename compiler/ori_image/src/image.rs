//! Building an image from a linked module.
//!
//! [`build_image`] prepares the data module, decides the shard count, and
//! either compiles the module in place (one shard) or partitions it,
//! serializes it once, and fans out one worker per shard. The metadata and
//! payload modules are compiled afterwards on the calling thread, and every
//! requested artifact kind is written as one archive.

use std::io::{self, Write};
use std::path::PathBuf;

use ori_lir::{codec, CodecError, Constant, LazyModule, Module};
use tracing::{debug, warn};

use crate::archive::{writer_for, ArchiveError};
use crate::assemble::{write_archives, ArtifactKind, CompiledImage};
use crate::backend::CodegenBackend;
use crate::exports::{self, ExportTable, ExportTableError};
use crate::fork_join::run_indexed;
use crate::materialize::{materialize_preserved, MaterializeError};
use crate::metadata::{
    build_metadata_module, build_payload_module, encode_dispatch_targets, write_side_channel,
    DispatchTarget, ImageMetadata, VECCALL_FLAG,
};
use crate::native::NativeCode;
use crate::partition::{name_anonymous_globals, partition_module, Partition, PartitionError};
use crate::pipeline::{run_shard, Float16Abi, OutputKinds, ShardOutputs};
use crate::threads::ThreadPolicy;
use crate::timing::{timings_from_env, BuildStats, ShardTimers};
use crate::weight::ModuleInfo;

pub use crate::assemble::OutputPaths;

/// Module flag carrying the per-shard symbol suffix.
pub const SUFFIX_FLAG: &str = "image.suffix";

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error(transparent)]
    Partition(#[from] PartitionError),

    #[error(transparent)]
    Materialize(#[from] MaterializeError),

    #[error(transparent)]
    ExportTable(#[from] ExportTableError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("failed to write the dispatch target list: {0}")]
    SideChannel(#[source] io::Error),
}

/// Everything [`build_image`] needs besides the module and the backend.
#[derive(Clone, Debug)]
pub struct ImageOptions {
    /// Archive per artifact kind; a kind is built only when it has a path.
    pub paths: OutputPaths,
    /// Serialized system payload, embedded as its own member.
    pub payload: Option<Vec<u8>>,
    /// Build the metadata module.
    pub emit_metadata: bool,
    pub dispatch_targets: Vec<DispatchTarget>,
    pub float16: Float16Abi,
    pub threads: ThreadPolicy,
    /// Write the timing report to the diagnostic stream when done.
    pub timings: bool,
    /// Ignored configuration found while building these options; reported
    /// with the build.
    pub config_warnings: Vec<String>,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            paths: OutputPaths::default(),
            payload: None,
            emit_metadata: true,
            dispatch_targets: Vec::new(),
            float16: Float16Abi::default(),
            threads: ThreadPolicy::default(),
            timings: false,
            config_warnings: Vec::new(),
        }
    }
}

impl ImageOptions {
    /// Defaults with the thread policy and timing toggle read from the
    /// environment.
    pub fn from_env() -> Self {
        let (timings, warning) = timings_from_env();
        Self {
            threads: ThreadPolicy::from_env(),
            timings,
            config_warnings: warning.into_iter().collect(),
            ..Self::default()
        }
    }
}

/// What a build produced.
#[derive(Debug)]
pub struct ImageReport {
    pub stats: BuildStats,
    /// Compiled buffers, in archive order.
    pub image: CompiledImage,
    /// Archive result per requested kind.
    pub archives: Vec<(ArtifactKind, Result<PathBuf, ArchiveError>)>,
    /// Emission failures from every shard.
    pub diagnostics: Vec<String>,
    /// The encoded dispatch target list.
    pub dispatch_ids: Vec<u8>,
}

/// Zero the initializers of exported globals; the loader fills them in.
fn wipe_gvar_initializers(module: &mut Module, table: &ExportTable) {
    for &id in &table.gvars {
        if let Some(data) = module.get_mut(id).and_then(|g| g.as_data_mut()) {
            data.init = Some(Constant::Zero);
        }
    }
}

fn tag_shard(module: &mut Module, shard: usize) {
    module.set_flag(SUFFIX_FLAG, format!("_{shard}"));
    module.source_file = format!("{}#{shard}", module.name);
}

/// One worker: reopen the shared buffer, keep this shard's definitions, and
/// compile.
fn compile_shard(
    bytes: &[u8],
    partition: &Partition,
    shard: usize,
    threads: usize,
    backend: &dyn CodegenBackend,
    kinds: OutputKinds,
    float16: Float16Abi,
) -> Result<(ShardOutputs, ShardTimers), ImageError> {
    let mut timers = ShardTimers::new(shard, threads);
    let mut lazy = timers.deserialize.time(|| LazyModule::open(bytes))?;
    timers
        .materialize
        .time(|| materialize_preserved(&mut lazy, partition))?;
    let mut module = lazy.into_module()?;
    timers
        .construct
        .time(|| exports::construct_tables(&mut module, partition, shard))?;
    tag_shard(&mut module, shard);
    debug!(shard, members = partition.len(), weight = partition.weight, "compiling shard");
    let outputs = run_shard(&mut module, backend, kinds, &mut timers, float16);
    Ok((outputs, timers))
}

/// Compile an auxiliary module on the calling thread.
fn compile_aux(
    mut module: Module,
    backend: &dyn CodegenBackend,
    kinds: OutputKinds,
    float16: Float16Abi,
) -> ShardOutputs {
    let mut timers = ShardTimers::new(0, 1);
    run_shard(&mut module, backend, kinds, &mut timers, float16)
}

/// Build an image from `native` and write the requested archives, with
/// warnings and the timing report going to stderr.
///
/// Emission failures inside a shard and archive write failures do not stop
/// the build; they are reported in the returned [`ImageReport`].
///
/// # Errors
///
/// Returns an error when the export markers are malformed, when the
/// partitioning or a shard module is inconsistent, when the module cannot be
/// serialized or reopened, or when the side channel cannot be written.
pub fn build_image(
    native: NativeCode,
    backend: &dyn CodegenBackend,
    options: &ImageOptions,
    side_channel: Option<&mut dyn Write>,
) -> Result<ImageReport, ImageError> {
    build_image_with(native, backend, options, side_channel, &mut io::stderr().lock())
}

/// [`build_image`] with an explicit diagnostic stream.
///
/// Ignored configuration values are written to `diagnostics` as
/// `warning:` lines before the build starts, and the timing report after it
/// when [`ImageOptions::timings`] is set.
///
/// # Errors
///
/// Same as [`build_image`].
pub fn build_image_with(
    native: NativeCode,
    backend: &dyn CodegenBackend,
    options: &ImageOptions,
    side_channel: Option<&mut dyn Write>,
    diagnostics: &mut dyn Write,
) -> Result<ImageReport, ImageError> {
    let mut warnings = options.threads.invalid_values();
    warnings.extend(options.config_warnings.iter().cloned());
    for warning in &warnings {
        if let Err(err) = writeln!(diagnostics, "warning: {warning}") {
            warn!(error = %err, "failed to write diagnostics");
        }
    }

    let target = backend.target().clone().for_image();
    let fallback = native.export_table();
    let mut module = native.module;
    let table = exports::extract(&mut module)?.unwrap_or(fallback);

    target.configure_module(&mut module);
    wipe_gvar_initializers(&mut module, &table);

    let has_veccall = module.flag(VECCALL_FLAG) == Some("1");
    let dispatch_ids = encode_dispatch_targets(&options.dispatch_targets, has_veccall);
    if let Some(out) = side_channel {
        write_side_channel(out, &dispatch_ids).map_err(ImageError::SideChannel)?;
    }

    let info = ModuleInfo::compute(&module);
    let threads = options.threads.decide(&info);
    let kinds = options.paths.requested();
    let mut stats = BuildStats {
        info,
        threads,
        warnings,
        ..BuildStats::default()
    };

    let mut image = CompiledImage::default();
    if threads == 1 {
        let mut timers = ShardTimers::new(0, 1);
        timers
            .construct
            .time(|| exports::construct_single_shard(&mut module, &table));
        tag_shard(&mut module, 0);
        image
            .shards
            .push(run_shard(&mut module, backend, kinds, &mut timers, options.float16));
        stats.shards.push(timers);
    } else {
        name_anonymous_globals(&mut module);
        let partitions = stats
            .group
            .partition
            .time(|| partition_module(&mut module, &table, threads))?;
        stats.partition_weights = partitions.iter().map(|p| p.weight).collect();
        let bytes = stats.group.serialize.time(|| codec::serialize(&module))?;
        stats.serialized_bytes = Some(bytes.len());
        drop(module);

        let results = run_indexed(partitions.len(), |shard| {
            compile_shard(
                &bytes,
                &partitions[shard],
                shard,
                partitions.len(),
                backend,
                kinds,
                options.float16,
            )
        });
        for result in results {
            let (outputs, timers) = result?;
            image.shards.push(outputs);
            stats.shards.push(timers);
        }
    }

    stats.group.output.start();
    if options.emit_metadata {
        let meta = ImageMetadata {
            shards: u32::try_from(image.shards.len()).unwrap_or(u32::MAX),
            nfvars: u32::try_from(table.fvars.len()).unwrap_or(u32::MAX),
            ngvars: u32::try_from(table.gvars.len()).unwrap_or(u32::MAX),
        };
        let module = build_metadata_module(&target, &meta, &dispatch_ids);
        image.metadata = Some(compile_aux(module, backend, kinds, options.float16));
    }
    if let Some(payload) = &options.payload {
        let module = build_payload_module(&target, payload);
        image.payload = Some(compile_aux(module, backend, kinds, options.float16));
    }
    let writer = writer_for(&target);
    let archives = write_archives(&image, &options.paths, writer.as_ref());
    stats.group.output.stop();

    let shard_diagnostics: Vec<String> = image
        .shards
        .iter()
        .chain(&image.metadata)
        .chain(&image.payload)
        .flat_map(|out| out.diagnostics.iter().cloned())
        .collect();

    if options.timings {
        if let Err(err) = stats.write_report(diagnostics) {
            warn!(error = %err, "failed to write timing report");
        }
    }

    Ok(ImageReport {
        stats,
        image,
        archives,
        diagnostics: shard_diagnostics,
        dispatch_ids,
    })
}
