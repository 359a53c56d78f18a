use std::time::Duration;

use clap::Parser;

use crate::error::Error;
use crate::finalizer::FINALIZER;
use crate::queue::{DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY};

pub const DEFAULT_WORKERS: usize = 2;
pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_RESYNC_PERIOD: Duration = Duration::from_secs(30);
pub const DEFAULT_RECONCILE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    pub workers: usize,
    /// Consecutive failures after which a key is dropped.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// `None` disables periodic resync.
    pub resync_period: Option<Duration>,
    pub reconcile_timeout: Duration,
    /// Watch a single namespace instead of the whole cluster.
    pub namespace: Option<String>,
    pub finalizer: String,
    pub record_events: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            workers: DEFAULT_WORKERS,
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            resync_period: Some(DEFAULT_RESYNC_PERIOD),
            reconcile_timeout: DEFAULT_RECONCILE_TIMEOUT,
            namespace: None,
            finalizer: FINALIZER.to_owned(),
            record_events: true,
        }
    }
}

impl ControllerConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    pub fn with_resync_period(mut self, period: Option<Duration>) -> Self {
        self.resync_period = period;
        self
    }

    pub fn with_reconcile_timeout(mut self, timeout: Duration) -> Self {
        self.reconcile_timeout = timeout;
        self
    }

    pub fn within_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.workers == 0 {
            return Err(Error::Config("workers must be at least 1".into()));
        }
        if self.max_retries == 0 {
            return Err(Error::Config("max_retries must be at least 1".into()));
        }
        if self.base_delay > self.max_delay {
            return Err(Error::Config(format!(
                "base delay {:?} exceeds max delay {:?}",
                self.base_delay, self.max_delay
            )));
        }
        if self.reconcile_timeout.is_zero() {
            return Err(Error::Config("reconcile timeout must be positive".into()));
        }
        Ok(())
    }
}

/// Command line of the `foo-operator` binary. Every flag can also be set
/// through its `FOO_OPERATOR_*` environment variable.
#[derive(Parser, Debug)]
#[command(name = "foo-operator", version, about = "Keeps a Deployment in sync with every Foo")]
pub struct ControllerArgs {
    /// Concurrent reconcile workers
    #[arg(long, env = "FOO_OPERATOR_WORKERS", default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,

    /// Consecutive failures after which a key is dropped
    #[arg(long, env = "FOO_OPERATOR_MAX_RETRIES", default_value_t = DEFAULT_MAX_RETRIES)]
    pub max_retries: u32,

    /// Seconds between full resyncs, 0 disables them
    #[arg(long, env = "FOO_OPERATOR_RESYNC_SECS", default_value_t = DEFAULT_RESYNC_PERIOD.as_secs())]
    pub resync_secs: u64,

    /// Upper bound on a single reconcile pass, in seconds
    #[arg(
        long,
        env = "FOO_OPERATOR_RECONCILE_TIMEOUT_SECS",
        default_value_t = DEFAULT_RECONCILE_TIMEOUT.as_secs()
    )]
    pub reconcile_timeout_secs: u64,

    /// Only watch Foos in this namespace
    #[arg(long, env = "FOO_OPERATOR_NAMESPACE")]
    pub namespace: Option<String>,

    /// Do not publish Kubernetes Events
    #[arg(long, env = "FOO_OPERATOR_DISABLE_EVENTS")]
    pub disable_events: bool,
}

impl TryFrom<ControllerArgs> for ControllerConfig {
    type Error = Error;

    fn try_from(args: ControllerArgs) -> Result<Self, Error> {
        let config = ControllerConfig {
            workers: args.workers,
            max_retries: args.max_retries,
            resync_period: (args.resync_secs > 0).then(|| Duration::from_secs(args.resync_secs)),
            reconcile_timeout: Duration::from_secs(args.reconcile_timeout_secs),
            namespace: args.namespace.filter(|ns| !ns.is_empty()),
            record_events: !args.disable_events,
            ..ControllerConfig::default()
        };
        config.validate()?;
        Ok(config)
    }
}
