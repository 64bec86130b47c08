use std::sync::Arc;

use mediamill_core::{
    dispatch::Dispatcher, registry::EngineRegistry, runner::JobRunner, Config, TaskStore,
};

/// Shared application state
pub struct AppState {
    config: Config,
    store: Arc<dyn TaskStore>,
    registry: Arc<EngineRegistry>,
    dispatcher: Dispatcher,
    runner: Arc<JobRunner>,
    metrics: prometheus::Registry,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn TaskStore>,
        registry: Arc<EngineRegistry>,
        dispatcher: Dispatcher,
        runner: Arc<JobRunner>,
        metrics: prometheus::Registry,
    ) -> Self {
        Self {
            config,
            store,
            registry,
            dispatcher,
            runner,
            metrics,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &dyn TaskStore {
        self.store.as_ref()
    }

    pub fn registry(&self) -> &EngineRegistry {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn runner(&self) -> &JobRunner {
        &self.runner
    }

    pub fn metrics(&self) -> &prometheus::Registry {
        &self.metrics
    }
}
