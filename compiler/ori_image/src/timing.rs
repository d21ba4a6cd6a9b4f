//! Phase timers and the statistics returned from an image build.
//!
//! Every shard owns its own [`ShardTimers`], so workers never share
//! mutable timing state. The coordinator collects them into
//! [`BuildStats`] once all shards have finished.

use std::io::{self, Write};
use std::time::{Duration, Instant};

use tracing::warn;

use crate::weight::ModuleInfo;

/// Environment variable that turns on the timing report.
pub const TIMINGS_ENV: &str = "ORI_IMAGE_TIMINGS";

/// An accumulating stopwatch.
#[derive(Clone, Debug)]
pub struct ImageTimer {
    name: String,
    desc: String,
    elapsed: Duration,
    started: Option<Instant>,
}

impl ImageTimer {
    pub fn new(name: impl Into<String>, desc: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            desc: desc.into(),
            elapsed: Duration::ZERO,
            started: None,
        }
    }

    pub fn start(&mut self) {
        self.started = Some(Instant::now());
    }

    pub fn stop(&mut self) {
        if let Some(started) = self.started.take() {
            self.elapsed += started.elapsed();
        }
    }

    /// Run `f` with the timer running.
    pub fn time<T>(&mut self, f: impl FnOnce() -> T) -> T {
        self.start();
        let out = f();
        self.stop();
        out
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn desc(&self) -> &str {
        &self.desc
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Whether the timer ever ran.
    pub fn was_run(&self) -> bool {
        self.elapsed > Duration::ZERO || self.started.is_some()
    }
}

fn write_group(out: &mut dyn Write, title: &str, timers: &[&ImageTimer]) -> io::Result<()> {
    let total: Duration = timers.iter().map(|t| t.elapsed()).sum();
    writeln!(out, "===== {title} =====")?;
    writeln!(out, "  {:>12}  {:<24} description", "wall (ms)", "name")?;
    for timer in timers {
        writeln!(
            out,
            "  {:>12.3}  {:<24} {}",
            timer.elapsed().as_secs_f64() * 1000.0,
            timer.name(),
            timer.desc()
        )?;
    }
    writeln!(out, "  {:>12.3}  {:<24} total", total.as_secs_f64() * 1000.0, "")
}

/// Per-shard phase timers.
#[derive(Clone, Debug)]
pub struct ShardTimers {
    pub name: String,
    pub desc: String,
    pub deserialize: ImageTimer,
    pub materialize: ImageTimer,
    pub construct: ImageTimer,
    pub unopt: ImageTimer,
    pub optimize: ImageTimer,
    pub opt: ImageTimer,
    pub obj: ImageTimer,
    pub asm: ImageTimer,
}

impl ShardTimers {
    pub fn new(shard: usize, threads: usize) -> Self {
        let suffix = format!("_{shard}");
        let desc = format!(" for shard {shard} of {threads}");
        let timer = |name: &str, what: &str| ImageTimer::new(format!("{name}{suffix}"), format!("{what}{desc}"));
        Self {
            name: format!("shard{suffix}"),
            desc: format!("Timings{desc}"),
            deserialize: timer("deserialize", "Deserialize module"),
            materialize: timer("materialize", "Materialize declarations"),
            construct: timer("construct", "Construct partitioned definitions"),
            unopt: timer("unopt", "Emit unoptimized IR"),
            optimize: timer("optimize", "Optimize shard"),
            opt: timer("opt", "Emit optimized IR"),
            obj: timer("obj", "Emit object file"),
            asm: timer("asm", "Emit assembly file"),
        }
    }

    pub fn all(&self) -> [&ImageTimer; 8] {
        [
            &self.deserialize,
            &self.materialize,
            &self.construct,
            &self.unopt,
            &self.optimize,
            &self.opt,
            &self.obj,
            &self.asm,
        ]
    }

    pub fn total(&self) -> Duration {
        self.all().iter().map(|t| t.elapsed()).sum()
    }

    /// Write this shard's timing table.
    ///
    /// # Errors
    ///
    /// Propagates write failures.
    pub fn write_report(&self, out: &mut dyn Write) -> io::Result<()> {
        write_group(out, &self.desc, &self.all())
    }
}

/// Coordinator-level timers.
#[derive(Clone, Debug)]
pub struct GroupTimers {
    pub partition: ImageTimer,
    pub serialize: ImageTimer,
    pub output: ImageTimer,
}

impl Default for GroupTimers {
    fn default() -> Self {
        Self {
            partition: ImageTimer::new("partition", "Partition module"),
            serialize: ImageTimer::new("serialize", "Serialize module"),
            output: ImageTimer::new("output", "Generate output"),
        }
    }
}

/// What an image build did and how long it took.
#[derive(Clone, Debug, Default)]
pub struct BuildStats {
    pub info: ModuleInfo,
    pub threads: usize,
    pub group: GroupTimers,
    /// One entry per shard, in shard order.
    pub shards: Vec<ShardTimers>,
    /// Partition weights, in shard order. Empty for single-shard builds.
    pub partition_weights: Vec<usize>,
    /// Size of the shared serialized module; `None` when the module was
    /// compiled in place.
    pub serialized_bytes: Option<usize>,
    /// Configuration values that were ignored.
    pub warnings: Vec<String>,
}

impl BuildStats {
    /// Write the full timing report followed by the partition weights.
    ///
    /// # Errors
    ///
    /// Propagates write failures.
    pub fn write_report(&self, out: &mut dyn Write) -> io::Result<()> {
        write_group(
            out,
            "Image output",
            &[&self.group.partition, &self.group.serialize, &self.group.output],
        )?;
        for shard in &self.shards {
            shard.write_report(out)?;
        }
        writeln!(
            out,
            "Module: {} globals, {} functions, {} blocks, {} instructions, {} clones, weight {}",
            self.info.globals,
            self.info.funcs,
            self.info.bbs,
            self.info.insts,
            self.info.clones,
            self.info.weight
        )?;
        if let Some(bytes) = self.serialized_bytes {
            writeln!(out, "Serialized module: {bytes} bytes")?;
        }
        for (i, weight) in self.partition_weights.iter().enumerate() {
            writeln!(out, "Partition {i} weight: {weight}")?;
        }
        Ok(())
    }
}

/// Parse a timing toggle: `0`/`1` or `true`/`false` in any case.
pub fn parse_timings(value: &str) -> Option<bool> {
    match value.trim() {
        "1" => Some(true),
        "0" => Some(false),
        v if v.eq_ignore_ascii_case("true") => Some(true),
        v if v.eq_ignore_ascii_case("false") => Some(false),
        _ => None,
    }
}

/// Interpret a [`TIMINGS_ENV`] value. Unset or invalid means off; an
/// invalid value also comes back with a message naming it.
pub fn timings_setting(value: Option<&str>) -> (bool, Option<String>) {
    let Some(raw) = value else {
        return (false, None);
    };
    match parse_timings(raw) {
        Some(on) => (on, None),
        None => (
            false,
            Some(format!(
                "ignoring {TIMINGS_ENV}={raw:?}: expected 0, 1, true, or false"
            )),
        ),
    }
}

/// Read [`TIMINGS_ENV`]; see [`timings_setting`]. Invalid values also warn.
pub fn timings_from_env() -> (bool, Option<String>) {
    let value = std::env::var(TIMINGS_ENV).ok();
    let setting = timings_setting(value.as_deref());
    if setting.1.is_some() {
        warn!(
            variable = TIMINGS_ENV,
            value = value.as_deref().unwrap_or_default(),
            "invalid value, expected 0, 1, true, or false; timings disabled"
        );
    }
    setting
}
