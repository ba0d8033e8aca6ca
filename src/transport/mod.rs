//! Radio transport abstraction.
//!
//! The engine never talks to a BLE stack directly; it issues commands through
//! the [`RadioTransport`] trait and consumes [`TransportEvent`]s from a single
//! mpsc channel. The btleplug-backed implementation lives in [`btle`]; the
//! channel-backed test double lives in [`mock`].

pub mod btle;
pub mod mock;

pub use btle::BtleTransport;
pub use mock::MockTransport;

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

/// Opaque transport-level peripheral identifier.
pub type HandleId = String;

/// Payload carried by an advertisement beyond the local name.
#[derive(Debug, Clone, Default)]
pub struct AdvertisementPayload {
    pub manufacturer_data: HashMap<u16, Vec<u8>>,
    pub service_data: HashMap<Uuid, Vec<u8>>,
    /// Physical (MAC) address when the platform exposes one.
    pub physical_address: Option<String>,
}

/// Asynchronous events emitted by the radio. All of them are marshaled onto
/// one channel so the engine sees a single, totally ordered stream.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    PowerStateChanged {
        powered_on: bool,
    },
    AdvertisementReceived {
        handle: HandleId,
        name: Option<String>,
        rssi: Option<i16>,
        payload: AdvertisementPayload,
    },
    Connected {
        handle: HandleId,
    },
    ConnectFailed {
        handle: HandleId,
        reason: String,
    },
    Disconnected {
        handle: HandleId,
    },
    ServicesDiscovered {
        handle: HandleId,
        services: Vec<Uuid>,
    },
    CharacteristicsDiscovered {
        handle: HandleId,
        service: Uuid,
        characteristics: Vec<Uuid>,
    },
    CharacteristicValueUpdated {
        handle: HandleId,
        characteristic: Uuid,
        value: Vec<u8>,
    },
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no BLE adapter found")]
    NoAdapter,
    #[error("unknown peripheral handle: {0}")]
    UnknownHandle(HandleId),
    #[error("characteristic {0} not present on peripheral")]
    UnknownCharacteristic(Uuid),
    #[error("radio error: {0}")]
    Radio(String),
}

impl From<btleplug::Error> for TransportError {
    fn from(err: btleplug::Error) -> Self {
        TransportError::Radio(err.to_string())
    }
}

/// Commands the engine can issue against the radio. Implementations must be
/// safe to call from the engine task at any time; results that arrive
/// asynchronously (connects, discoveries, reads) come back as
/// [`TransportEvent`]s.
#[async_trait]
pub trait RadioTransport: Send + Sync {
    /// Begin scanning. `duplicates` requests re-delivery of advertisements
    /// for already-seen peripherals so RSSI can be re-evaluated.
    async fn start_scan(&self, duplicates: bool) -> Result<(), TransportError>;

    async fn stop_scan(&self) -> Result<(), TransportError>;

    async fn connect(&self, handle: &HandleId) -> Result<(), TransportError>;

    async fn cancel_connection(&self, handle: &HandleId) -> Result<(), TransportError>;

    /// Discover services; `None` means all services.
    async fn discover_services(
        &self,
        handle: &HandleId,
        services: Option<&[Uuid]>,
    ) -> Result<(), TransportError>;

    /// Discover characteristics within one service; `None` means all.
    async fn discover_characteristics(
        &self,
        handle: &HandleId,
        service: Uuid,
        characteristics: Option<&[Uuid]>,
    ) -> Result<(), TransportError>;

    async fn set_notify(
        &self,
        handle: &HandleId,
        characteristic: Uuid,
        enabled: bool,
    ) -> Result<(), TransportError>;

    async fn write_value(
        &self,
        handle: &HandleId,
        characteristic: Uuid,
        value: &[u8],
        with_response: bool,
    ) -> Result<(), TransportError>;

    /// Request a read; the value arrives as `CharacteristicValueUpdated`.
    async fn read_value(&self, handle: &HandleId, characteristic: Uuid)
        -> Result<(), TransportError>;
}
