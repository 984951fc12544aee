// Engine Builder
// Boot-time registration of steps, facilitators, advisers, resolvers,
// notify callbacks and observers

use super::{EngineResumeCallback, OrchestrationEngine, Registries, ENGINE_PUBLISHER};
use crate::adviser::{self, Adviser};
use crate::config::EngineConfig;
use crate::delegate::TaskDispatcher;
use crate::error::EngineResult;
use crate::events::{AsyncObserver, SubjectBuilder, SyncObserver};
use crate::facilitator::{self, Facilitator};
use crate::registry::RegistryBuilder;
use crate::resolver::{self, OutputResolver, Resolver};
use crate::step::{FailStep, ForkStep, NoopStep, SignalStep, Step, TaskStep};
use crate::store::ExecutionStore;
use crate::timeout::TimeoutEngine;
use crate::waiter::{NotifyCallback, WaitNotifyEngine};

use std::sync::Arc;

/// Builder for [`OrchestrationEngine`].
///
/// `new` registers the built-in facilitators, advisers and resolvers; steps
/// are opt-in through [`with_builtin_steps`](Self::with_builtin_steps) or
/// [`register_step`](Self::register_step).
pub struct EngineBuilder {
    store: Arc<dyn ExecutionStore>,
    config: EngineConfig,
    steps: RegistryBuilder<dyn Step>,
    facilitators: RegistryBuilder<dyn Facilitator>,
    advisers: RegistryBuilder<dyn Adviser>,
    resolvers: RegistryBuilder<dyn Resolver>,
    callbacks: RegistryBuilder<dyn NotifyCallback>,
    subject: SubjectBuilder,
    resume_callback: Arc<EngineResumeCallback>,
}

impl EngineBuilder {
    pub fn new(store: Arc<dyn ExecutionStore>, dispatcher: Arc<dyn TaskDispatcher>) -> Self {
        let resume_callback = Arc::new(EngineResumeCallback::new());
        let mut builder = Self {
            store: store.clone(),
            config: EngineConfig::default(),
            steps: RegistryBuilder::new("step"),
            facilitators: RegistryBuilder::new("facilitator"),
            advisers: RegistryBuilder::new("adviser"),
            resolvers: RegistryBuilder::new("resolver"),
            callbacks: RegistryBuilder::new("notify callback"),
            subject: SubjectBuilder::new(),
            resume_callback: resume_callback.clone(),
        };

        // Fresh registries cannot hold duplicates, so these never fail
        let defaults: [(&str, Arc<dyn Facilitator>); 7] = [
            (facilitator::SYNC, Arc::new(facilitator::SyncFacilitator)),
            (facilitator::ASYNC, Arc::new(facilitator::AsyncFacilitator)),
            (
                facilitator::TASK,
                Arc::new(facilitator::TaskFacilitator::new(dispatcher.clone())),
            ),
            (
                facilitator::TASK_CHAIN,
                Arc::new(facilitator::TaskChainFacilitator::new(dispatcher)),
            ),
            (facilitator::CHILD, Arc::new(facilitator::ChildFacilitator)),
            (facilitator::CHILDREN, Arc::new(facilitator::ChildrenFacilitator)),
            (facilitator::CHILD_CHAIN, Arc::new(facilitator::ChildChainFacilitator)),
        ];
        for (key, value) in defaults {
            let _ = builder.facilitators.register(key, value);
        }

        let advisers: [(&str, Arc<dyn Adviser>); 9] = [
            (adviser::NEXT_STEP, Arc::new(adviser::NextStepAdviser)),
            (adviser::ON_SUCCESS, Arc::new(adviser::OnSuccessAdviser)),
            (adviser::ON_FAIL, Arc::new(adviser::OnFailAdviser)),
            (adviser::RETRY, Arc::new(adviser::RetryAdviser)),
            (
                adviser::MANUAL_INTERVENTION,
                Arc::new(adviser::ManualInterventionAdviser),
            ),
            (adviser::IGNORE, Arc::new(adviser::IgnoreAdviser)),
            (adviser::MARK_SUCCESS, Arc::new(adviser::MarkSuccessAdviser)),
            (adviser::MARK_AS_FAILURE, Arc::new(adviser::MarkAsFailureAdviser)),
            (adviser::END_PLAN, Arc::new(adviser::EndPlanAdviser)),
        ];
        for (key, value) in advisers {
            let _ = builder.advisers.register(key, value);
        }

        let _ = builder.resolvers.register(
            resolver::OUTCOME,
            Arc::new(OutputResolver::outcomes(store.clone())),
        );
        let _ = builder.resolvers.register(
            resolver::SWEEPING_OUTPUT,
            Arc::new(OutputResolver::sweeping_outputs(store)),
        );
        let _ = builder.callbacks.register(ENGINE_PUBLISHER, resume_callback);

        builder
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Register `noop`, `fail`, `task`, `fork` and `signal`
    pub fn with_builtin_steps(mut self) -> EngineResult<Self> {
        self.register_step(NoopStep::TYPE, Arc::new(NoopStep))?;
        self.register_step(FailStep::TYPE, Arc::new(FailStep))?;
        self.register_step(TaskStep::TYPE, Arc::new(TaskStep))?;
        self.register_step(ForkStep::TYPE, Arc::new(ForkStep))?;
        self.register_step(SignalStep::TYPE, Arc::new(SignalStep))?;
        Ok(self)
    }

    pub fn register_step(&mut self, key: impl Into<String>, step: Arc<dyn Step>) -> EngineResult<()> {
        self.steps.register(key, step)
    }

    pub fn register_facilitator(
        &mut self,
        key: impl Into<String>,
        facilitator: Arc<dyn Facilitator>,
    ) -> EngineResult<()> {
        self.facilitators.register(key, facilitator)
    }

    pub fn register_adviser(
        &mut self,
        key: impl Into<String>,
        adviser: Arc<dyn Adviser>,
    ) -> EngineResult<()> {
        self.advisers.register(key, adviser)
    }

    pub fn register_resolver(
        &mut self,
        key: impl Into<String>,
        resolver: Arc<dyn Resolver>,
    ) -> EngineResult<()> {
        self.resolvers.register(key, resolver)
    }

    /// Additional wait/notify publishers besides the engine itself
    pub fn register_notify_callback(
        &mut self,
        publisher: impl Into<String>,
        callback: Arc<dyn NotifyCallback>,
    ) -> EngineResult<()> {
        self.callbacks.register(publisher, callback)
    }

    pub fn observe_sync(mut self, observer: Arc<dyn SyncObserver>) -> Self {
        self.subject.observe_sync(observer);
        self
    }

    pub fn observe_async(mut self, observer: Arc<dyn AsyncObserver>) -> Self {
        self.subject.observe_async(observer);
        self
    }

    pub fn build(self) -> Arc<OrchestrationEngine> {
        let config = self.config;
        let waiter = Arc::new(WaitNotifyEngine::new(
            self.store.clone(),
            self.callbacks.build(),
            config.max_version_retries,
            config.notify_ttl(),
        ));
        let timeouts = TimeoutEngine::new(self.store.clone(), config.max_version_retries);

        let engine = Arc::new(OrchestrationEngine {
            store: self.store,
            registries: Registries {
                steps: self.steps.build(),
                facilitators: self.facilitators.build(),
                advisers: self.advisers.build(),
                resolvers: self.resolvers.build(),
            },
            waiter,
            timeouts,
            subject: self.subject.build(config.async_observer_workers),
            config,
        });
        self.resume_callback.attach(&engine);
        engine
    }
}
