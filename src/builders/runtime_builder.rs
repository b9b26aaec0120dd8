//! Build a [`RuntimeContext`] from [`RuntimeConfig`].

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::RuntimeConfig;
use crate::core::{default_failure_hook, FailureHook, RuntimeError, TimingWheel, WorkerPool};
use crate::runtime::{Dispatch, PoolKind, RuntimeContext};

/// Assembles the timing wheel and the parsing and writing pools.
///
/// ```rust,ignore
/// let runtime = RuntimeBuilder::new(RuntimeConfig::from_env()?)
///     .with_failure_hook(Arc::new(|failure| metrics.record(failure)))
///     .build()?;
/// ```
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    hook: Option<FailureHook>,
    dispatcher: Option<Arc<dyn Dispatch>>,
}

impl RuntimeBuilder {
    /// Start from `config`.
    #[must_use]
    pub const fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            hook: None,
            dispatcher: None,
        }
    }

    /// Report unit failures from both pools to `hook` instead of the log.
    #[must_use]
    pub fn with_failure_hook(mut self, hook: FailureHook) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Run timer callbacks through `dispatcher` instead of dedicated threads.
    #[must_use]
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn Dispatch>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Validate the configuration and start every component.
    ///
    /// # Errors
    ///
    /// `RuntimeError::Config` for invalid configuration, otherwise the first
    /// wheel or pool construction error. Components already started are shut
    /// down before returning.
    pub fn build(self) -> Result<RuntimeContext, RuntimeError> {
        self.config.validate()?;
        let hook = self.hook.unwrap_or_else(default_failure_hook);
        let wheel_cfg = &self.config.wheel;

        let wheel = match self.dispatcher {
            Some(dispatcher) => TimingWheel::with_dispatcher(
                wheel_cfg.tick_interval(),
                wheel_cfg.buckets,
                dispatcher,
            )?,
            None => TimingWheel::with_config(wheel_cfg)?,
        };
        let wheel = Arc::new(wheel);

        let parsing = match WorkerPool::with_hook(
            PoolKind::Parsing.name(),
            &self.config.parsing,
            Arc::clone(&hook),
        ) {
            Ok(pool) => Arc::new(pool),
            Err(e) => {
                wheel.stop();
                return Err(e.into());
            }
        };

        let writing = match WorkerPool::with_hook(
            PoolKind::Writing.name(),
            &self.config.writing,
            hook,
        ) {
            Ok(pool) => Arc::new(pool),
            Err(e) => {
                if let Err(cleanup) = parsing.shutdown(false) {
                    warn!(error = %cleanup, "failed to shut down parsing pool after init error");
                }
                wheel.stop();
                return Err(e.into());
            }
        };

        info!(
            parsing_capacity = self.config.parsing.capacity,
            parsing_queue_limit = self.config.parsing.queue_limit,
            writing_capacity = self.config.writing.capacity,
            writing_queue_limit = self.config.writing.queue_limit,
            tick_interval_ms = self.config.wheel.tick_interval_ms,
            "Runtime initialized"
        );

        Ok(RuntimeContext::from_parts(wheel, parsing, writing))
    }
}
