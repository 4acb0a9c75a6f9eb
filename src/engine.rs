//! Engine lifecycle: initialise, steady-state polling, shutdown.
//!
//! [`Engine::initialise`] is the bounded registration phase. It registers the
//! static catalog, runs dynamic discovery, seals the registry and starts the
//! Scheduler. Any construction error aborts start-up; there is no partially
//! initialised engine.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

use crate::accessor::HardwareAccessor;
use crate::config::EngineConfig;
use crate::detector::register_detector_attributes;
use crate::discovery::DynamicAttributeFactory;
use crate::error::AppResult;
use crate::registry::AttributeRegistry;
use crate::scheduler::{FetchFailure, Scheduler};

/// A running attribute engine.
pub struct Engine {
    config: EngineConfig,
    registry: Arc<AttributeRegistry>,
    scheduler: Scheduler,
}

impl Engine {
    /// Build the attribute set for `accessor` and start polling.
    pub async fn initialise(accessor: Arc<dyn HardwareAccessor>, config: EngineConfig) -> AppResult<Self> {
        config.validate()?;

        let mut registry = AttributeRegistry::new(accessor);
        register_detector_attributes(&mut registry, &config)?;

        let factory = DynamicAttributeFactory::new(
            config.discovery.sensor_prefix.clone(),
            config.discovery.temperature_command.clone(),
            config.polling.temperature_period,
        );
        let discovered = factory.register_all(&mut registry).await?;

        registry.seal()?;
        let registry = Arc::new(registry);
        let scheduler = Scheduler::start(registry.clone())?;

        info!(
            attributes = registry.len(),
            discovered,
            polling = scheduler.task_count(),
            "engine initialised"
        );
        Ok(Self {
            config,
            registry,
            scheduler,
        })
    }

    /// The client-facing registry.
    pub fn registry(&self) -> &Arc<AttributeRegistry> {
        &self.registry
    }

    /// Configuration the engine was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Background fetch failures from now on.
    pub fn subscribe_failures(&self) -> broadcast::Receiver<FetchFailure> {
        self.scheduler.subscribe_failures()
    }

    /// Number of polling tasks still running.
    pub fn polling_tasks(&self) -> usize {
        self.scheduler.task_count()
    }

    /// Stop all polling tasks. Idempotent.
    pub async fn shutdown(&mut self) {
        self.scheduler.shutdown().await;
    }
}
