//! Collecting shard outputs into one archive per artifact kind.
//!
//! Member order inside each archive:
//!
//! ```text
//! text<prefix>#0<suffix> .. text<prefix>#<N-1><suffix>
//! metadata<prefix><suffix>
//! sysimg<prefix><suffix>          (only with an embedded payload)
//! ```

use std::path::PathBuf;

use tracing::error;

use crate::archive::{write_archive, ArchiveError, ArchiveMember, ContainerWriter};
use crate::pipeline::{OutputKinds, ShardOutputs};

/// One archive's worth of output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    UnoptIr,
    OptIr,
    Object,
    Assembly,
}

impl ArtifactKind {
    pub const ALL: [Self; 4] = [Self::UnoptIr, Self::OptIr, Self::Object, Self::Assembly];

    pub fn prefix(self) -> &'static str {
        match self {
            Self::UnoptIr => "_unopt",
            Self::OptIr => "_opt",
            Self::Object | Self::Assembly => "",
        }
    }

    pub fn suffix(self) -> &'static str {
        match self {
            Self::UnoptIr | Self::OptIr => ".bc",
            Self::Object => ".o",
            Self::Assembly => ".s",
        }
    }

    pub fn output_kind(self) -> OutputKinds {
        match self {
            Self::UnoptIr => OutputKinds::UNOPT_IR,
            Self::OptIr => OutputKinds::OPT_IR,
            Self::Object => OutputKinds::OBJECT,
            Self::Assembly => OutputKinds::ASSEMBLY,
        }
    }

    /// The buffer of this kind in `outputs`.
    pub fn select(self, outputs: &ShardOutputs) -> &[u8] {
        match self {
            Self::UnoptIr => &outputs.unopt,
            Self::OptIr => &outputs.opt,
            Self::Object => &outputs.obj,
            Self::Assembly => &outputs.asm,
        }
    }

    pub fn text_member(self, shard: usize) -> String {
        format!("text{}#{shard}{}", self.prefix(), self.suffix())
    }

    pub fn metadata_member(self) -> String {
        format!("metadata{}{}", self.prefix(), self.suffix())
    }

    pub fn payload_member(self) -> String {
        format!("sysimg{}{}", self.prefix(), self.suffix())
    }
}

/// Archive destination per artifact kind. A kind is produced exactly when
/// it has a path.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OutputPaths {
    pub unopt_ir: Option<PathBuf>,
    pub opt_ir: Option<PathBuf>,
    pub object: Option<PathBuf>,
    pub assembly: Option<PathBuf>,
}

impl OutputPaths {
    #[must_use]
    pub fn with(mut self, kind: ArtifactKind, path: impl Into<PathBuf>) -> Self {
        let slot = match kind {
            ArtifactKind::UnoptIr => &mut self.unopt_ir,
            ArtifactKind::OptIr => &mut self.opt_ir,
            ArtifactKind::Object => &mut self.object,
            ArtifactKind::Assembly => &mut self.assembly,
        };
        *slot = Some(path.into());
        self
    }

    pub fn get(&self, kind: ArtifactKind) -> Option<&PathBuf> {
        match kind {
            ArtifactKind::UnoptIr => self.unopt_ir.as_ref(),
            ArtifactKind::OptIr => self.opt_ir.as_ref(),
            ArtifactKind::Object => self.object.as_ref(),
            ArtifactKind::Assembly => self.assembly.as_ref(),
        }
    }

    /// Output kinds with a destination.
    pub fn requested(&self) -> OutputKinds {
        ArtifactKind::ALL
            .into_iter()
            .filter(|&kind| self.get(kind).is_some())
            .fold(OutputKinds::empty(), |acc, kind| acc | kind.output_kind())
    }
}

/// Everything compiled for one image, in archive order.
#[derive(Clone, Debug, Default)]
pub struct CompiledImage {
    pub shards: Vec<ShardOutputs>,
    pub metadata: Option<ShardOutputs>,
    pub payload: Option<ShardOutputs>,
}

impl CompiledImage {
    /// Archive members of one kind.
    pub fn members(&self, kind: ArtifactKind) -> Vec<ArchiveMember> {
        let mut members: Vec<ArchiveMember> = self
            .shards
            .iter()
            .enumerate()
            .map(|(i, out)| ArchiveMember::new(kind.text_member(i), kind.select(out)))
            .collect();
        if let Some(out) = &self.metadata {
            members.push(ArchiveMember::new(kind.metadata_member(), kind.select(out)));
        }
        if let Some(out) = &self.payload {
            members.push(ArchiveMember::new(kind.payload_member(), kind.select(out)));
        }
        members
    }
}

/// Write one archive per kind that has a path. A failed kind is logged and
/// reported; the remaining kinds are still written.
pub fn write_archives(
    image: &CompiledImage,
    paths: &OutputPaths,
    writer: &dyn ContainerWriter,
) -> Vec<(ArtifactKind, Result<PathBuf, ArchiveError>)> {
    ArtifactKind::ALL
        .into_iter()
        .filter_map(|kind| {
            let path = paths.get(kind)?;
            let result = write_archive(path, writer, &image.members(kind)).map(|()| path.clone());
            if let Err(err) = &result {
                error!(kind = ?kind, error = %err, "failed to write archive");
            }
            Some((kind, result))
        })
        .collect()
}
