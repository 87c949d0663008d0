//! Boot diagnostics.
//!
//! [`BootReport::collect`] probes the runtime, the process and the container
//! once at startup; [`BootReport::emit`] logs one `boot.stat` record per
//! fact. Every probe is best effort: a missing file or an unreadable value
//! degrades to an empty stat or a warning, never to a startup failure.

use crate::config::Config;
use std::fmt;
use std::path::{Path, PathBuf};

const KB: u64 = 1024;
const MB: u64 = 1024 * KB;
const GB: u64 = 1024 * MB;

/// Environment variables echoed at boot with a `set` flag.
const ENV_KNOBS: &[&str] = &[
    "TOKIO_WORKER_THREADS",
    "RUST_LOG",
    "RUST_BACKTRACE",
    "RUST_MIN_STACK",
    "CACHE_IMPL",
    "CACHE_SIZE",
];

/// Filesystem roots the probes read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRoots {
    /// cgroup filesystem mount, `/sys/fs/cgroup` on Linux.
    pub cgroup: PathBuf,
    /// procfs entry of the current process, `/proc/self` on Linux.
    pub proc_self: PathBuf,
}

impl Default for ProbeRoots {
    fn default() -> Self {
        Self {
            cgroup: PathBuf::from("/sys/fs/cgroup"),
            proc_self: PathBuf::from("/proc/self"),
        }
    }
}

/// Formats a byte count with 1024-based units and at most two decimals.
///
/// Insignificant trailing zeros are dropped: `1536` is `1.5KB`, `1024` is
/// `1KB`.
pub fn format_bytes(bytes: u64) -> String {
    let (unit, divisor) = match bytes {
        b if b >= GB => ("GB", GB),
        b if b >= MB => ("MB", MB),
        b if b >= KB => ("KB", KB),
        b => return format!("{b}B"),
    };

    let scaled = format!("{:.2}", bytes as f64 / divisor as f64);
    let trimmed = scaled.trim_end_matches('0').trim_end_matches('.');
    format!("{trimmed}{unit}")
}

/// Which cgroup hierarchy produced the CPU quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgroupSource {
    /// Unified hierarchy, `cpu.max`.
    V2,
    /// Legacy hierarchy, `cpu.cfs_quota_us` and `cpu.cfs_period_us`.
    V1,
}

impl CgroupSource {
    /// Name used in boot records.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::V2 => "v2",
            Self::V1 => "v1",
        }
    }
}

/// Effective CPU allowance derived from a quota and period.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CpuLimit {
    /// No quota.
    Unlimited,
    /// `quota / period`, rounded to two decimals.
    Cpus(f64),
}

impl fmt::Display for CpuLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unlimited => f.write_str("unlimited"),
            Self::Cpus(cpus) => write!(f, "{cpus:.2}"),
        }
    }
}

/// CPU quota detected from the cgroup filesystem.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CgroupCpuInfo {
    /// Hierarchy the values came from.
    pub source: CgroupSource,
    /// Quota in microseconds; negative when unlimited.
    pub quota_micros: i64,
    /// Period in microseconds.
    pub period_micros: i64,
    /// Derived allowance.
    pub cpus: CpuLimit,
}

/// Interprets cgroup CPU files, preferring v2 over v1.
///
/// `cpu_max` is the v2 `cpu.max` content (`"max <period>"` or
/// `"<quota> <period>"`); `quota_v1` and `period_v1` are the v1 files. Empty
/// strings stand for missing files. Returns `None` when no usable quota was
/// found.
pub fn parse_cgroup_cpu(cpu_max: &str, quota_v1: &str, period_v1: &str) -> Option<CgroupCpuInfo> {
    let mut fields = cpu_max.split_whitespace();
    if let (Some(quota), Some(period), None) = (fields.next(), fields.next(), fields.next())
        && let Ok(period) = period.parse::<i64>()
        && period > 0
    {
        if quota == "max" {
            return Some(CgroupCpuInfo {
                source: CgroupSource::V2,
                quota_micros: -1,
                period_micros: period,
                cpus: CpuLimit::Unlimited,
            });
        }
        if let Ok(quota) = quota.parse::<i64>()
            && quota > 0
        {
            return Some(CgroupCpuInfo {
                source: CgroupSource::V2,
                quota_micros: quota,
                period_micros: period,
                cpus: CpuLimit::Cpus(ratio(quota, period)),
            });
        }
    }

    let quota = quota_v1.trim().parse::<i64>().ok()?;
    let period = period_v1.trim().parse::<i64>().ok()?;
    if period <= 0 || quota == 0 {
        return None;
    }

    let cpus = if quota < 0 {
        CpuLimit::Unlimited
    } else {
        CpuLimit::Cpus(ratio(quota, period))
    };

    Some(CgroupCpuInfo {
        source: CgroupSource::V1,
        quota_micros: quota,
        period_micros: period,
        cpus,
    })
}

fn ratio(quota: i64, period: i64) -> f64 {
    (quota as f64 / period as f64 * 100.0).round() / 100.0
}

/// Formats a numeric cgroup memory ceiling. `max`, empty and zero are
/// treated as "no ceiling".
pub fn parse_cgroup_memory(raw: &str) -> Option<String> {
    match raw.trim().parse::<u64>() {
        Ok(bytes) if bytes > 0 => Some(format_bytes(bytes)),
        _ => None,
    }
}

/// Memory figures from `/proc/self/status`, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemorySnapshot {
    /// Resident set size (`VmRSS`).
    pub rss: u64,
    /// Peak resident set size (`VmHWM`).
    pub rss_peak: u64,
    /// Data segment size, heap included (`VmData`).
    pub data: u64,
    /// Main thread stack (`VmStk`).
    pub stack: u64,
}

/// Parses the `Vm*` lines of `/proc/<pid>/status`. Returns `None` unless
/// all four fields are present.
pub fn parse_proc_status(status: &str) -> Option<MemorySnapshot> {
    let field = |name: &str| {
        status.lines().find_map(|line| {
            let value = line.strip_prefix(name)?.strip_prefix(':')?;
            let kb: u64 = value.trim().trim_end_matches("kB").trim().parse().ok()?;
            Some(kb * KB)
        })
    };

    Some(MemorySnapshot {
        rss: field("VmRSS")?,
        rss_peak: field("VmHWM")?,
        data: field("VmData")?,
        stack: field("VmStk")?,
    })
}

/// Address-space ceiling (`RLIMIT_AS`) from `/proc/<pid>/limits`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryCeiling {
    /// No limit.
    Unlimited,
    /// Soft limit in bytes.
    Bytes(u64),
}

impl fmt::Display for MemoryCeiling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unlimited => f.write_str("unlimited"),
            Self::Bytes(bytes) => f.write_str(&format_bytes(*bytes)),
        }
    }
}

/// Reads the soft `Max address space` limit.
pub fn parse_address_space_limit(limits: &str) -> Option<MemoryCeiling> {
    let line = limits
        .lines()
        .find_map(|line| line.strip_prefix("Max address space"))?;
    match line.split_whitespace().next()? {
        "unlimited" => Some(MemoryCeiling::Unlimited),
        soft => soft.parse().ok().map(MemoryCeiling::Bytes),
    }
}

/// Configured and effective runtime settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeKnobs {
    /// `TOKIO_WORKER_THREADS`, or `default` when unset.
    pub workers_configured: String,
    /// Worker threads of the running tokio runtime.
    pub workers_effective: usize,
    /// Parallelism visible to the process.
    pub parallelism: usize,
    /// Address-space ceiling.
    pub memory_ceiling: MemoryCeiling,
}

impl RuntimeKnobs {
    /// Reads every knob, or reports the first one that is unavailable.
    pub fn read(roots: &ProbeRoots) -> Result<Self, String> {
        let workers_effective = tokio::runtime::Handle::try_current()
            .map_err(|e| format!("tokio runtime: {e}"))?
            .metrics()
            .num_workers();
        let parallelism = std::thread::available_parallelism()
            .map_err(|e| format!("available parallelism: {e}"))?
            .get();
        let limits = read_trimmed(&roots.proc_self.join("limits"))
            .ok_or_else(|| "process limits are not readable".to_string())?;
        let memory_ceiling = parse_address_space_limit(&limits)
            .ok_or_else(|| "address space limit not found".to_string())?;

        Ok(Self {
            workers_configured: std::env::var("TOKIO_WORKER_THREADS")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| "default".to_string()),
            workers_effective,
            parallelism,
            memory_ceiling,
        })
    }
}

/// One boot fact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootStat {
    /// Dotted stat name, e.g. `cgroup.cpu.cpus`.
    pub stat: String,
    /// Rendered value; may be empty.
    pub value: String,
    /// Whether the underlying value was set, for stats where that matters.
    pub set: Option<bool>,
    /// Unit of `value`, when it has one.
    pub unit: Option<&'static str>,
}

/// Facts gathered at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootReport {
    /// Facts in emission order.
    pub stats: Vec<BootStat>,
    /// Probes that failed.
    pub warnings: Vec<(String, String)>,
}

impl BootReport {
    /// Runs every probe.
    pub fn collect(config: &Config, roots: &ProbeRoots) -> Self {
        let mut report = Self::default();

        report.push("build.package", env!("CARGO_PKG_NAME"));
        report.push("build.version", env!("CARGO_PKG_VERSION"));
        report.push(
            "build.profile",
            if cfg!(debug_assertions) { "debug" } else { "release" },
        );
        report.push(
            "build.target",
            format!("{}-{}", std::env::consts::ARCH, std::env::consts::OS),
        );

        report.push("config.env", &config.server.deployment_env);
        report.push("config.port", config.server.port);
        report.push("otel.endpoint", &config.telemetry.exporter.endpoint);
        report.push("otel.http.traces_mode", config.http.traces_mode.as_str());
        report.push("otel.http.enabled", config.http.enabled);

        match RuntimeKnobs::read(roots) {
            Ok(knobs) => {
                report.push("runtime.workers.configured", &knobs.workers_configured);
                report.push("runtime.workers.effective", knobs.workers_effective);
                report.push("runtime.parallelism.effective", knobs.parallelism);
                report.push("runtime.memory_ceiling.effective", knobs.memory_ceiling);
            }
            Err(error) => report.warn("boot.runtime.knobs unavailable", error),
        }

        for key in ENV_KNOBS {
            let value = std::env::var(key).unwrap_or_default();
            let set = !value.is_empty();
            report.push_flagged(format!("env.{key}"), value, set);
        }

        match read_trimmed(&roots.proc_self.join("status")).and_then(|s| parse_proc_status(&s)) {
            Some(memory) => {
                report.push("memstats.rss", format_bytes(memory.rss));
                report.push("memstats.rss_peak", format_bytes(memory.rss_peak));
                report.push("memstats.data", format_bytes(memory.data));
                report.push("memstats.stack", format_bytes(memory.stack));
            }
            None => report.warn(
                "boot.memstats unavailable",
                "process status is not readable".to_string(),
            ),
        }

        let memory_max = read_first_existing(&[
            roots.cgroup.join("memory.max"),
            roots.cgroup.join("memory/memory.limit_in_bytes"),
        ]);
        report.push("cgroup.memory.max_raw", &memory_max);
        if let Some(formatted) = parse_cgroup_memory(&memory_max) {
            report.push("cgroup.memory.max", formatted);
        }

        let cpu_max = read_first_existing(&[roots.cgroup.join("cpu.max")]);
        let quota_v1 = read_first_existing(&[roots.cgroup.join("cpu/cpu.cfs_quota_us")]);
        let period_v1 = read_first_existing(&[roots.cgroup.join("cpu/cpu.cfs_period_us")]);
        report.push("cgroup.cpu.max_raw", &cpu_max);

        match parse_cgroup_cpu(&cpu_max, &quota_v1, &period_v1) {
            Some(cpu) => {
                report.push("cgroup.cpu.source", cpu.source.as_str());
                report.push_unit("cgroup.cpu.quota", cpu.quota_micros, "us");
                report.push_unit("cgroup.cpu.period", cpu.period_micros, "us");
                report.push("cgroup.cpu.quota_div_period", cpu.cpus);
                report.push("cgroup.cpu.cpus", cpu.cpus);
            }
            None => {
                report.push("cgroup.cpu.source", "");
                report.push_flagged("cgroup.cpu.quota", "", false);
                report.push_flagged("cgroup.cpu.period", "", false);
                report.push("cgroup.cpu.quota_div_period", "");
                report.push_flagged("cgroup.cpu.cpus", "", false);
            }
        }

        report
    }

    /// Logs every fact as its own record, then the warnings.
    pub fn emit(&self) {
        for stat in &self.stats {
            tracing::info!(
                stat = %stat.stat,
                value = %stat.value,
                set = stat.set,
                unit = stat.unit,
                "boot.stat"
            );
        }
        for (message, error) in &self.warnings {
            tracing::warn!(error = %error, "{message}");
        }
    }

    /// Looks a fact up by name.
    pub fn get(&self, stat: &str) -> Option<&BootStat> {
        self.stats.iter().find(|s| s.stat == stat)
    }

    fn push(&mut self, stat: impl Into<String>, value: impl fmt::Display) {
        self.stats.push(BootStat {
            stat: stat.into(),
            value: value.to_string(),
            set: None,
            unit: None,
        });
    }

    fn push_unit(
        &mut self,
        stat: impl Into<String>,
        value: impl fmt::Display,
        unit: &'static str,
    ) {
        self.stats.push(BootStat {
            stat: stat.into(),
            value: value.to_string(),
            set: None,
            unit: Some(unit),
        });
    }

    fn push_flagged(&mut self, stat: impl Into<String>, value: impl fmt::Display, set: bool) {
        self.stats.push(BootStat {
            stat: stat.into(),
            value: value.to_string(),
            set: Some(set),
            unit: None,
        });
    }

    fn warn(&mut self, message: &str, error: String) {
        self.warnings.push((message.to_string(), error));
    }
}

fn read_trimmed(path: &Path) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
}

/// Content of the first readable file, or empty.
fn read_first_existing(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .find_map(|path| read_trimmed(path))
        .unwrap_or_default()
}
