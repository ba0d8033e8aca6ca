//! Hub for BLE health and fitness peripherals.
//!
//! Supported families: infrared thermometer, pulse oximeter, blood-pressure
//! cuff, body scale, smart jump rope, and chest-strap heart-rate belt. The
//! crate pairs, reconnects, and decodes telemetry for all of them behind a
//! single [`engine::HubHandle`]:
//!
//! ```no_run
//! use std::sync::Arc;
//! use vitals_hub::engine::{Engine, EngineConfig};
//! use vitals_hub::model::DeviceCategory;
//! use vitals_hub::store::MemoryStore;
//! use vitals_hub::transport::BtleTransport;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let (transport, events) = BtleTransport::new(64).await?;
//! let store = Arc::new(MemoryStore::default());
//! let hub = Engine::spawn(transport, store, events, EngineConfig::default());
//!
//! hub.start_pairing(DeviceCategory::Thermometer).await;
//! let mut clinical = hub.subscribe_clinical();
//! while let Ok(event) = clinical.recv().await {
//!     println!("{:?}", event);
//! }
//! # Ok(())
//! # }
//! ```

pub mod classify;
pub mod codec;
pub mod config;
pub mod engine;
pub mod events;
pub mod model;
pub mod store;
pub mod transport;

pub use engine::{Engine, EngineConfig, HubHandle, RecordingError, RopeGoal};
pub use events::{ClinicalEvent, ConnectivityEvent, FitnessEvent};
pub use model::{DeviceCategory, DeviceSnapshot};
