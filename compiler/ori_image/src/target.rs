//! Target description shared by every module of an image build.
//!
//! A triple is `<arch>-<vendor>-<os>[-<env>]`; everything after the OS is
//! kept as one environment string (`gnu`, `msvc`, `gnu-elf`).
//!
//! The object format follows the OS, except that an environment ending in
//! `elf` asks for ELF. Image archives always hold the platform's own
//! format, so [`TargetConfig::for_image`] drops that request again and
//! applies the code generation settings the loader expects:
//!
//! ```text
//! windows ─► COFF      linux / freebsd ─► PIC
//! darwin  ─► Mach-O    powerpc ─► medium code model, else small
//! ```

use std::fmt;

use ori_lir::Module;

/// Module flag naming the relocation model shards are compiled with.
pub const RELOC_FLAG: &str = "image.reloc";

/// Module flag naming the code model shards are compiled with.
pub const CODE_MODEL_FLAG: &str = "image.code_model";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetError {
    /// The triple does not have the `<arch>-<vendor>-<os>` shape.
    MalformedTriple { triple: String, reason: &'static str },
}

impl fmt::Display for TargetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedTriple { triple, reason } => {
                write!(f, "malformed target triple '{triple}': {reason}")
            }
        }
    }
}

impl std::error::Error for TargetError {}

/// A triple split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetTripleComponents {
    pub arch: String,
    pub vendor: String,
    pub os: String,
    pub env: Option<String>,
}

impl TargetTripleComponents {
    /// # Errors
    ///
    /// Returns [`TargetError::MalformedTriple`] for fewer than three parts
    /// or an empty part.
    pub fn parse(triple: &str) -> Result<Self, TargetError> {
        let malformed = |reason| TargetError::MalformedTriple {
            triple: triple.to_owned(),
            reason,
        };
        let mut parts = triple.splitn(4, '-');
        let mut next = || parts.next().filter(|p| !p.is_empty());
        let (Some(arch), Some(vendor), Some(os)) = (next(), next(), next()) else {
            return Err(malformed("need <arch>-<vendor>-<os>"));
        };
        let env = match parts.next() {
            Some(env) if env.is_empty() || env.split('-').any(str::is_empty) => {
                return Err(malformed("empty environment component"));
            }
            env => env.map(str::to_owned),
        };
        Ok(Self {
            arch: arch.to_owned(),
            vendor: vendor.to_owned(),
            os: os.to_owned(),
            env,
        })
    }

    pub fn is_wasm(&self) -> bool {
        matches!(self.arch.as_str(), "wasm32" | "wasm64")
    }

    /// Windows proper plus the MinGW and Cygwin environments, which also
    /// link COFF objects.
    pub fn is_windows(&self) -> bool {
        matches!(self.os.as_str(), "windows" | "win32" | "cygwin")
            || self.os.starts_with("mingw")
            || self
                .env
                .as_deref()
                .is_some_and(|env| env.split('-').any(|part| part == "windows"))
    }

    /// macOS and the other Apple platforms.
    pub fn is_darwin(&self) -> bool {
        matches!(
            self.os.as_str(),
            "darwin" | "macos" | "ios" | "tvos" | "watchos"
        ) || self.os.starts_with("macosx")
    }

    /// Whether image code on this OS is position independent.
    pub fn wants_pic(&self) -> bool {
        self.os == "linux" || self.os.starts_with("freebsd")
    }

    pub fn is_ppc(&self) -> bool {
        self.arch.starts_with("powerpc") || self.arch.starts_with("ppc")
    }

    fn requests_elf(&self) -> bool {
        self.env.as_deref().is_some_and(|e| e.ends_with("elf"))
    }

    /// The object format the OS uses natively.
    pub fn native_format(&self) -> BinaryFormat {
        if self.is_wasm() {
            BinaryFormat::Wasm
        } else if self.is_windows() {
            BinaryFormat::Coff
        } else if self.is_darwin() {
            BinaryFormat::MachO
        } else {
            BinaryFormat::Elf
        }
    }
}

impl fmt::Display for TargetTripleComponents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.arch, self.vendor, self.os)?;
        match &self.env {
            Some(env) => write!(f, "-{env}"),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryFormat {
    Elf,
    MachO,
    Coff,
    Wasm,
}

impl BinaryFormat {
    /// The format a triple selects, honoring an `elf` environment.
    /// Unparseable triples are treated as ELF.
    pub fn for_triple(triple: &str) -> Self {
        match TargetTripleComponents::parse(triple) {
            Ok(c) if c.requests_elf() => Self::Elf,
            Ok(c) => c.native_format(),
            Err(_) => Self::Elf,
        }
    }
}

impl fmt::Display for BinaryFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Elf => "ELF",
            Self::MachO => "Mach-O",
            Self::Coff => "COFF",
            Self::Wasm => "Wasm",
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RelocMode {
    #[default]
    Default,
    Static,
    Pic,
}

impl RelocMode {
    fn flag_value(self) -> Option<&'static str> {
        match self {
            Self::Default => None,
            Self::Static => Some("static"),
            Self::Pic => Some("pic"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CodeModel {
    #[default]
    Default,
    Small,
    Medium,
    Large,
}

impl CodeModel {
    fn flag_value(self) -> Option<&'static str> {
        match self {
            Self::Default => None,
            Self::Small => Some("small"),
            Self::Medium => Some("medium"),
            Self::Large => Some("large"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum OptimizationLevel {
    #[default]
    None,
    Less,
    Default,
    Aggressive,
}

/// Triple, object format, and code generation settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetConfig {
    triple: String,
    components: TargetTripleComponents,
    binary_format: BinaryFormat,
    opt_level: OptimizationLevel,
    reloc_mode: RelocMode,
    code_model: CodeModel,
}

impl TargetConfig {
    /// # Errors
    ///
    /// Returns an error when `triple` is malformed.
    pub fn from_triple(triple: &str) -> Result<Self, TargetError> {
        let components = TargetTripleComponents::parse(triple)?;
        let binary_format = if components.requests_elf() {
            BinaryFormat::Elf
        } else {
            components.native_format()
        };
        Ok(Self {
            triple: triple.to_owned(),
            components,
            binary_format,
            opt_level: OptimizationLevel::None,
            reloc_mode: RelocMode::Default,
            code_model: CodeModel::Default,
        })
    }

    #[must_use]
    pub fn with_opt_level(mut self, level: OptimizationLevel) -> Self {
        self.opt_level = level;
        self
    }

    /// Normalize for image output: native object format, PIC on Linux and
    /// FreeBSD, medium code model on PowerPC (the small model only has
    /// 16-bit offsets there) and small everywhere else.
    #[must_use]
    pub fn for_image(mut self) -> Self {
        let elf_env = self.components.requests_elf();
        if self.components.is_windows() {
            self.binary_format = BinaryFormat::Coff;
            if elf_env {
                self.components.env = Some("msvc".to_owned());
            }
        } else if self.components.is_darwin() {
            self.binary_format = BinaryFormat::MachO;
            self.components.os = "macosx".to_owned();
            if elf_env {
                self.components.env = None;
            }
        }
        self.triple = self.components.to_string();
        if self.components.wants_pic() {
            self.reloc_mode = RelocMode::Pic;
        }
        self.code_model = if self.components.is_ppc() {
            CodeModel::Medium
        } else {
            CodeModel::Small
        };
        self
    }

    pub fn triple(&self) -> &str {
        &self.triple
    }

    pub fn components(&self) -> &TargetTripleComponents {
        &self.components
    }

    pub fn binary_format(&self) -> BinaryFormat {
        self.binary_format
    }

    pub fn opt_level(&self) -> OptimizationLevel {
        self.opt_level
    }

    pub fn reloc_mode(&self) -> RelocMode {
        self.reloc_mode
    }

    pub fn code_model(&self) -> CodeModel {
        self.code_model
    }

    pub fn is_windows(&self) -> bool {
        self.components.is_windows()
    }

    pub fn is_darwin(&self) -> bool {
        self.components.is_darwin()
    }

    /// Pointer width in bytes.
    pub fn pointer_size(&self) -> u32 {
        match self.components.arch.as_str() {
            "wasm32" | "i386" | "i486" | "i586" | "i686" | "arm" | "armv7" | "armv7l"
            | "powerpc" | "ppc" | "riscv32" | "mips" | "mipsel" => 4,
            _ => 8,
        }
    }

    pub fn is_little_endian(&self) -> bool {
        !matches!(
            self.components.arch.as_str(),
            "powerpc" | "ppc" | "powerpc64" | "ppc64" | "s390x" | "mips" | "mips64" | "sparc64"
        )
    }

    /// Endianness, symbol mangling, and pointer width in data layout form.
    pub fn data_layout(&self) -> String {
        let endian = if self.is_little_endian() { 'e' } else { 'E' };
        let bits = self.pointer_size() * 8;
        let mangling = match self.binary_format {
            BinaryFormat::MachO => 'o',
            BinaryFormat::Coff => 'w',
            BinaryFormat::Elf | BinaryFormat::Wasm => 'e',
        };
        format!("{endian}-m:{mangling}-p:{bits}:{bits}-i64:64-n32:64-S128")
    }

    /// Stamp `module` with the triple, data layout, and any non-default
    /// relocation or code model.
    pub fn configure_module(&self, module: &mut Module) {
        module.target_triple.clone_from(&self.triple);
        module.data_layout = self.data_layout();
        if let Some(value) = self.reloc_mode.flag_value() {
            module.set_flag(RELOC_FLAG, value);
        }
        if let Some(value) = self.code_model.flag_value() {
            module.set_flag(CODE_MODEL_FLAG, value);
        }
    }
}

#[cfg(test)]
mod tests;
