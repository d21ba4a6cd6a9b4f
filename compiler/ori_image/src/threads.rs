//! How many shards an image build uses.
//!
//! Decision order, first match wins:
//!
//! 1. 32-bit hosts use one thread (address space is too tight for copies
//!    of the module in flight)
//! 2. COFF targets with more than [`COFF_EXPORT_LIMIT`] definitions use one
//!    thread: partitioning exports every definition and COFF caps the
//!    exported symbol count. No override applies.
//! 3. A valid [`IMAGE_THREADS_ENV`] override
//! 4. Modules lighter than [`SMALL_MODULE_WEIGHT`] use one thread
//! 5. Half the available cores, at most one per hundred definitions;
//!    a valid [`CPU_THREADS_ENV`] can lower (never raise) a count above 1
//!
//! The result is never below 1.
//!
//! Overrides are positive decimal integers. Leading whitespace is skipped;
//! a trailing character of any kind (`"4 "`, `"4x"`) makes the value invalid,
//! and invalid values are ignored and listed by
//! [`ThreadPolicy::invalid_values`].

use tracing::{debug, warn};

use crate::target::{BinaryFormat, TargetTripleComponents};
use crate::weight::ModuleInfo;

pub const IMAGE_THREADS_ENV: &str = "ORI_IMAGE_THREADS";
pub const CPU_THREADS_ENV: &str = "ORI_CPU_THREADS";

/// Maximum number of definitions a COFF image can be partitioned with.
pub const COFF_EXPORT_LIMIT: usize = 64_000;

/// Modules lighter than this are compiled on one thread.
pub const SMALL_MODULE_WEIGHT: usize = 1000;

/// Inputs to the thread count decision. Environment values are kept raw so
/// that invalid ones can be reported when the decision is made.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreadPolicy {
    pub image_threads: Option<String>,
    pub cpu_threads: Option<String>,
    /// Hardware threads available to the process.
    pub available: usize,
    pub host_is_32bit: bool,
}

impl Default for ThreadPolicy {
    fn default() -> Self {
        Self {
            image_threads: None,
            cpu_threads: None,
            available: 1,
            host_is_32bit: false,
        }
    }
}

/// A positive decimal count. Leading whitespace is skipped; anything after
/// the digits makes the value invalid.
fn parse_count(raw: &str) -> Option<usize> {
    raw.trim_start().parse::<usize>().ok().filter(|&n| n > 0)
}

fn parse_positive(variable: &str, raw: Option<&str>) -> Option<usize> {
    let raw = raw?;
    let count = parse_count(raw);
    if count.is_none() {
        warn!(variable, value = raw, "invalid value, expected a positive integer; ignoring");
    }
    count
}

impl ThreadPolicy {
    /// Read the overrides and host properties from the environment.
    pub fn from_env() -> Self {
        Self {
            image_threads: std::env::var(IMAGE_THREADS_ENV).ok(),
            cpu_threads: std::env::var(CPU_THREADS_ENV).ok(),
            available: std::thread::available_parallelism().map_or(1, std::num::NonZero::get),
            host_is_32bit: cfg!(target_pointer_width = "32"),
        }
    }

    /// A policy with no overrides and `available` hardware threads.
    pub fn with_available(available: usize) -> Self {
        Self {
            available,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_image_threads(mut self, value: impl Into<String>) -> Self {
        self.image_threads = Some(value.into());
        self
    }

    #[must_use]
    pub fn with_cpu_threads(mut self, value: impl Into<String>) -> Self {
        self.cpu_threads = Some(value.into());
        self
    }

    #[must_use]
    pub fn with_host_32bit(mut self, host_is_32bit: bool) -> Self {
        self.host_is_32bit = host_is_32bit;
        self
    }

    /// One message per override that is set but not a positive integer.
    pub fn invalid_values(&self) -> Vec<String> {
        [
            (IMAGE_THREADS_ENV, &self.image_threads),
            (CPU_THREADS_ENV, &self.cpu_threads),
        ]
        .into_iter()
        .filter_map(|(variable, raw)| {
            let raw = raw.as_deref()?;
            parse_count(raw)
                .is_none()
                .then(|| format!("ignoring {variable}={raw:?}: expected a positive integer"))
        })
        .collect()
    }

    /// Pick the shard count for a module.
    pub fn decide(&self, info: &ModuleInfo) -> usize {
        let threads = self.decide_unlogged(info);
        debug!(
            threads,
            weight = info.weight,
            globals = info.globals,
            available = self.available,
            "image thread count"
        );
        threads
    }

    fn decide_unlogged(&self, info: &ModuleInfo) -> usize {
        if self.host_is_32bit {
            return 1;
        }
        let is_coff = TargetTripleComponents::parse(&info.triple)
            .is_ok_and(|c| c.native_format() == BinaryFormat::Coff);
        if is_coff && info.globals > COFF_EXPORT_LIMIT {
            return 1;
        }

        if let Some(n) = parse_positive(IMAGE_THREADS_ENV, self.image_threads.as_deref()) {
            return n;
        }
        if info.weight < SMALL_MODULE_WEIGHT {
            return 1;
        }

        let mut threads = (self.available / 2).max(1).min(info.globals / 100);
        if threads > 1 {
            if let Some(cpu) = parse_positive(CPU_THREADS_ENV, self.cpu_threads.as_deref()) {
                threads = threads.min(cpu);
            }
        }
        threads.max(1)
    }
}

#[cfg(test)]
mod tests;
