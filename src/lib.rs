//! Core library for the Jungfrau attribute engine.
//!
//! This library binds a Jungfrau detector's properties to typed, named
//! attributes for a control-system transport layer. It contains the attribute
//! registry, the binding strategies (simple, enum-translated, composite,
//! computed), the polling Scheduler and dynamic per-module discovery. The
//! hardware itself sits behind the [`accessor::HardwareAccessor`] trait.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use jungfrau_daq::{AttributeValue, Engine, EngineConfig, SimulatedDetector};
//!
//! #[tokio::main]
//! async fn main() -> jungfrau_daq::AppResult<()> {
//!     let config = EngineConfig::load_from("jungfrau.toml")?;
//!     jungfrau_daq::logging::init(&config.logging)?;
//!
//!     let mut engine = Engine::initialise(Arc::new(SimulatedDetector::jungfrau(1, 2)), config).await?;
//!     let registry = engine.registry();
//!     registry.write("trigger_mode", AttributeValue::Enum("External".into())).await?;
//!     println!("{}", registry.read("trigger_mode").await?);
//!
//!     engine.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod accessor;
pub mod attribute;
pub mod binding;
pub mod command;
pub mod config;
pub mod coordinator;
pub mod detector;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod logging;
pub mod registry;
pub mod scheduler;
pub mod simulated;
pub mod translator;
pub mod value;

pub use accessor::{AccessorError, CompositePayload, HardwareAccessor, Topology};
pub use attribute::{AttributeDescriptor, AttributeInfo, Direction, Freshness, Reading};
pub use binding::Binding;
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{AppResult, DaqError};
pub use registry::AttributeRegistry;
pub use scheduler::{FetchFailure, Scheduler};
pub use simulated::SimulatedDetector;
pub use value::{AttributeValue, RawValue, ValueType};
