// Orchestration Service
// Boots an engine with the local delegate and runs its background tasks:
// notify consumption, sweeps and interrupt processing

use crate::config::EngineConfig;
use crate::delegate::{LocalDelegate, TaskHandler};
use crate::engine::{EngineBuilder, OrchestrationEngine};
use crate::error::EngineResult;
use crate::events::{AsyncObserver, SyncObserver};
use crate::interrupt::InterruptManager;
use crate::step::Step;
use crate::store::{ExecutionStore, InMemoryStore};
use crate::waiter::{notify_channel, NotifyPublisher};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use std::sync::Arc;

/// Builder for [`OrchestrationService`]
pub struct ServiceBuilder {
    store: Arc<dyn ExecutionStore>,
    config: EngineConfig,
    duplicate_delivery: bool,
    task_handlers: Vec<(String, Arc<dyn TaskHandler>)>,
    steps: Vec<(String, Arc<dyn Step>)>,
    sync_observers: Vec<Arc<dyn SyncObserver>>,
    async_observers: Vec<Arc<dyn AsyncObserver>>,
}

impl ServiceBuilder {
    pub fn new() -> Self {
        Self {
            store: Arc::new(InMemoryStore::new()),
            config: EngineConfig::default(),
            duplicate_delivery: false,
            task_handlers: Vec::new(),
            steps: Vec::new(),
            sync_observers: Vec::new(),
            async_observers: Vec::new(),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn ExecutionStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Have the local delegate publish every task result twice
    pub fn with_duplicate_delivery(mut self, enabled: bool) -> Self {
        self.duplicate_delivery = enabled;
        self
    }

    pub fn with_task_handler(
        mut self,
        task_type: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
    ) -> Self {
        self.task_handlers.push((task_type.into(), handler));
        self
    }

    /// Register a step next to the built-in ones
    pub fn with_step(mut self, step_type: impl Into<String>, step: Arc<dyn Step>) -> Self {
        self.steps.push((step_type.into(), step));
        self
    }

    pub fn observe_sync(mut self, observer: Arc<dyn SyncObserver>) -> Self {
        self.sync_observers.push(observer);
        self
    }

    pub fn observe_async(mut self, observer: Arc<dyn AsyncObserver>) -> Self {
        self.async_observers.push(observer);
        self
    }

    /// Build the engine and spawn its background tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self) -> EngineResult<OrchestrationService> {
        let (publisher, consumer) = notify_channel(self.config.notify_dedupe_window);

        let mut delegate = LocalDelegate::builder(publisher.clone())
            .with_builtin_handlers()?
            .with_duplicate_delivery(self.duplicate_delivery);
        for (task_type, handler) in self.task_handlers {
            delegate = delegate.register(task_type, handler)?;
        }

        let mut builder = EngineBuilder::new(self.store, Arc::new(delegate.build()))
            .with_config(self.config)
            .with_builtin_steps()?;
        for (step_type, step) in self.steps {
            builder.register_step(step_type, step)?;
        }
        for observer in self.sync_observers {
            builder = builder.observe_sync(observer);
        }
        for observer in self.async_observers {
            builder = builder.observe_async(observer);
        }
        let engine = builder.build();
        let interrupts = Arc::new(InterruptManager::new(engine.clone()));

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handles = vec![
            tokio::spawn(consumer.run(engine.waiter().clone(), shutdown_rx.clone())),
            engine.spawn_background(shutdown_rx.clone()),
            interrupts.spawn(shutdown_rx),
        ];
        info!("orchestration service started");

        Ok(OrchestrationService {
            engine,
            interrupts,
            publisher,
            shutdown,
            handles,
        })
    }
}

impl Default for ServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running engine plus the tasks that drive it
pub struct OrchestrationService {
    engine: Arc<OrchestrationEngine>,
    interrupts: Arc<InterruptManager>,
    publisher: NotifyPublisher,
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl OrchestrationService {
    pub fn builder() -> ServiceBuilder {
        ServiceBuilder::new()
    }

    pub fn engine(&self) -> &Arc<OrchestrationEngine> {
        &self.engine
    }

    pub fn interrupts(&self) -> &Arc<InterruptManager> {
        &self.interrupts
    }

    /// Publisher for notifies coming from outside the local delegate
    pub fn publisher(&self) -> &NotifyPublisher {
        &self.publisher
    }

    /// Signal every background task to stop and wait for them
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "background task ended abnormally");
            }
        }
        info!("orchestration service stopped");
    }
}
