//! Continuous profiling bridge.
//!
//! When active, a Pyroscope agent samples the process and
//! [`SpanProfilingLayer`] tags every sample taken while a local-root span is
//! entered with that span's id and name, so profiles can be joined with
//! traces. The agent is compiled in only with the `profiling` feature.

use crate::config::ProfilingConfig;
use crate::error::ProfilingError;
use std::sync::Arc;
use tracing::span;
use tracing::Subscriber;
use tracing_opentelemetry::OtelData;
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// Profile kinds that may be requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileType {
    /// On-CPU samples.
    Cpu,
    /// Allocation counts and sizes.
    Alloc,
    /// Live heap.
    Inuse,
    /// Task (goroutine-equivalent) stacks.
    Tasks,
    /// Lock contention.
    Mutex,
    /// Blocking operations.
    Block,
}

impl ProfileType {
    /// Parses a single profile type name. Unknown names yield `None`.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "cpu" => Some(Self::Cpu),
            "alloc" => Some(Self::Alloc),
            "inuse" => Some(Self::Inuse),
            "goroutines" | "goroutine" | "tasks" => Some(Self::Tasks),
            "mutex" => Some(Self::Mutex),
            "block" => Some(Self::Block),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Alloc => "alloc",
            Self::Inuse => "inuse",
            Self::Tasks => "tasks",
            Self::Mutex => "mutex",
            Self::Block => "block",
        }
    }
}

/// Maps requested names to profile types, dropping unknown names and
/// duplicates. An empty result means CPU only.
pub fn parse_profile_types<S: AsRef<str>>(names: &[S]) -> Vec<ProfileType> {
    let mut types = Vec::new();
    for ty in names.iter().filter_map(|n| ProfileType::parse(n.as_ref())) {
        if !types.contains(&ty) {
            types.push(ty);
        }
    }
    if types.is_empty() {
        types.push(ProfileType::Cpu);
    }
    types
}

/// Filter directive for the profiling client's own log records.
///
/// `off`, `none`, `false` and `0` suppress them entirely; a recognised level
/// is passed through; anything else leaves the global filter in charge.
pub fn log_directive(level: &str) -> Option<String> {
    match level.trim().to_ascii_lowercase().as_str() {
        "off" | "none" | "false" | "0" => Some("pyroscope=off".to_string()),
        level @ ("trace" | "debug" | "info" | "warn" | "error") => {
            Some(format!("pyroscope={level}"))
        }
        _ => None,
    }
}

/// Adds and removes per-thread profiling tags.
pub trait ProfileTagger: Send + Sync + 'static {
    /// Tags samples taken on the current thread.
    fn tag(&self, span_id: &str, span_name: &str);

    /// Removes tags previously added on the current thread.
    fn untag(&self, span_id: &str, span_name: &str);
}

struct ProfileTags {
    span_id: String,
    span_name: &'static str,
}

/// `tracing` layer that brackets local-root spans with profiling tags.
#[derive(Clone)]
pub struct SpanProfilingLayer {
    tagger: Arc<dyn ProfileTagger>,
}

impl SpanProfilingLayer {
    /// Creates a layer that reports to `tagger`.
    pub fn new(tagger: Arc<dyn ProfileTagger>) -> Self {
        Self { tagger }
    }
}

impl std::fmt::Debug for SpanProfilingLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpanProfilingLayer").finish_non_exhaustive()
    }
}

impl<S> Layer<S> for SpanProfilingLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_enter(&self, id: &span::Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else { return };
        if span.parent().is_some() {
            return;
        }

        let mut extensions = span.extensions_mut();
        if extensions.get_mut::<ProfileTags>().is_none() {
            let span_id = extensions
                .get_mut::<OtelData>()
                .and_then(|data| data.builder.span_id)
                .map(|span_id| span_id.to_string())
                .unwrap_or_else(|| format!("{:016x}", id.into_u64()));
            extensions.insert(ProfileTags {
                span_id,
                span_name: span.name(),
            });
        }

        if let Some(tags) = extensions.get_mut::<ProfileTags>() {
            self.tagger.tag(&tags.span_id, tags.span_name);
        }
    }

    fn on_exit(&self, id: &span::Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else { return };
        if let Some(tags) = span.extensions().get::<ProfileTags>() {
            self.tagger.untag(&tags.span_id, tags.span_name);
        }
    }
}

/// A running profiling agent plus the tagger its layer reports to.
pub struct Profiler {
    tagger: Arc<dyn ProfileTagger>,
    #[cfg(feature = "profiling")]
    agent: agent::RunningAgent,
}

impl std::fmt::Debug for Profiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Profiler").finish_non_exhaustive()
    }
}

impl Profiler {
    /// Starts the agent described by `config`.
    ///
    /// Callers treat any error as non-fatal.
    pub fn start(config: &ProfilingConfig) -> Result<Self, ProfilingError> {
        let types = parse_profile_types(config.profile_types.as_slice());
        let unsupported: Vec<&str> = types
            .iter()
            .filter(|ty| **ty != ProfileType::Cpu)
            .map(|ty| ty.as_str())
            .collect();
        if !unsupported.is_empty() {
            tracing::warn!(
                target: "otel_lifecycle",
                profile_types = ?unsupported,
                "Requested profile types are not supported by the pprof backend; sampling CPU only"
            );
        }

        Self::start_agent(config)
    }

    #[cfg(feature = "profiling")]
    fn start_agent(config: &ProfilingConfig) -> Result<Self, ProfilingError> {
        let (agent, tagger) = agent::RunningAgent::start(config)?;
        tracing::info!(
            target: "otel_lifecycle",
            server_address = %config.server_address,
            application_name = %config.application_name,
            upload_interval_ms = config.upload_interval.as_millis() as u64,
            "Profiler started"
        );
        Ok(Self {
            tagger: Arc::new(tagger),
            agent,
        })
    }

    #[cfg(not(feature = "profiling"))]
    fn start_agent(_config: &ProfilingConfig) -> Result<Self, ProfilingError> {
        Err(ProfilingError::Unsupported)
    }

    /// Layer that tags profiling samples with the active root span.
    pub fn layer(&self) -> SpanProfilingLayer {
        SpanProfilingLayer::new(Arc::clone(&self.tagger))
    }

    /// Stops sampling and flushes the last report.
    pub fn stop(self) -> Result<(), ProfilingError> {
        #[cfg(feature = "profiling")]
        self.agent.stop()?;
        Ok(())
    }
}

#[cfg(feature = "profiling")]
mod agent {
    use super::ProfileTagger;
    use crate::config::ProfilingConfig;
    use crate::error::ProfilingError;
    use pyroscope::PyroscopeAgent;
    use pyroscope::pyroscope::PyroscopeAgentRunning;
    use pyroscope_pprofrs::{PprofConfig, pprof_backend};

    const SAMPLE_RATE: u32 = 100;

    type TagFn = Box<dyn Fn(String, String) -> pyroscope::Result<()> + Send + Sync>;

    pub(super) struct RunningAgent(PyroscopeAgent<PyroscopeAgentRunning>);

    impl RunningAgent {
        pub(super) fn start(
            config: &ProfilingConfig,
        ) -> Result<(Self, PyroscopeTagger), ProfilingError> {
            let agent = PyroscopeAgent::builder(
                config.server_address.as_str(),
                config.application_name.as_str(),
            )
            .backend(pprof_backend(PprofConfig::new().sample_rate(SAMPLE_RATE)))
            .build()
            .map_err(|e| ProfilingError::Agent(e.to_string()))?;

            let running = agent
                .start()
                .map_err(|e| ProfilingError::Agent(e.to_string()))?;

            let (add, remove) = running.tag_wrapper();
            let tagger = PyroscopeTagger {
                add: Box::new(add),
                remove: Box::new(remove),
            };

            Ok((Self(running), tagger))
        }

        pub(super) fn stop(self) -> Result<(), ProfilingError> {
            let ready = self
                .0
                .stop()
                .map_err(|e| ProfilingError::Agent(e.to_string()))?;
            ready.shutdown();
            Ok(())
        }
    }

    pub(super) struct PyroscopeTagger {
        add: TagFn,
        remove: TagFn,
    }

    impl ProfileTagger for PyroscopeTagger {
        fn tag(&self, span_id: &str, span_name: &str) {
            let _ = (self.add)("span_id".to_string(), span_id.to_string());
            let _ = (self.add)("span_name".to_string(), span_name.to_string());
        }

        fn untag(&self, span_id: &str, span_name: &str) {
            let _ = (self.remove)("span_id".to_string(), span_id.to_string());
            let _ = (self.remove)("span_name".to_string(), span_name.to_string());
        }
    }
}
