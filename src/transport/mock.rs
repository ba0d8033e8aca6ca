//! Channel-backed transport double for engine tests.
//!
//! Records every command the engine issues and lets a test inject
//! [`TransportEvent`]s as if a radio had produced them.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{AdvertisementPayload, HandleId, RadioTransport, TransportError, TransportEvent};

/// One command issued against the mock, in the order it was issued.
#[derive(Debug, Clone, PartialEq)]
pub enum IssuedCommand {
    StartScan { duplicates: bool },
    StopScan,
    Connect(HandleId),
    CancelConnection(HandleId),
    DiscoverServices { handle: HandleId, services: Option<Vec<Uuid>> },
    DiscoverCharacteristics { handle: HandleId, service: Uuid, characteristics: Option<Vec<Uuid>> },
    SetNotify { handle: HandleId, characteristic: Uuid, enabled: bool },
    WriteValue { handle: HandleId, characteristic: Uuid, value: Vec<u8> },
    ReadValue { handle: HandleId, characteristic: Uuid },
}

pub struct MockTransport {
    issued: Mutex<Vec<IssuedCommand>>,
    events_tx: mpsc::Sender<TransportEvent>,
}

impl MockTransport {
    pub fn new() -> (Arc<Self>, mpsc::Receiver<TransportEvent>) {
        let (events_tx, events_rx) = mpsc::channel(64);
        (
            Arc::new(Self {
                issued: Mutex::new(Vec::new()),
                events_tx,
            }),
            events_rx,
        )
    }

    /// Inject a transport event as if the radio had emitted it.
    pub async fn emit(&self, event: TransportEvent) {
        let _ = self.events_tx.send(event).await;
    }

    /// Convenience: emit an advertisement with an empty payload.
    pub async fn advertise(&self, handle: &str, name: &str, rssi: i16) {
        self.emit(TransportEvent::AdvertisementReceived {
            handle: handle.to_string(),
            name: Some(name.to_string()),
            rssi: Some(rssi),
            payload: AdvertisementPayload::default(),
        })
        .await;
    }

    pub fn issued(&self) -> Vec<IssuedCommand> {
        self.issued.lock().unwrap().clone()
    }

    /// Drain the recorded command log.
    pub fn take_issued(&self) -> Vec<IssuedCommand> {
        std::mem::take(&mut self.issued.lock().unwrap())
    }

    pub fn writes(&self) -> Vec<IssuedCommand> {
        self.issued()
            .into_iter()
            .filter(|c| matches!(c, IssuedCommand::WriteValue { .. }))
            .collect()
    }

    fn record(&self, command: IssuedCommand) {
        self.issued.lock().unwrap().push(command);
    }
}

#[async_trait]
impl RadioTransport for MockTransport {
    async fn start_scan(&self, duplicates: bool) -> Result<(), TransportError> {
        self.record(IssuedCommand::StartScan { duplicates });
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        self.record(IssuedCommand::StopScan);
        Ok(())
    }

    async fn connect(&self, handle: &HandleId) -> Result<(), TransportError> {
        self.record(IssuedCommand::Connect(handle.clone()));
        Ok(())
    }

    async fn cancel_connection(&self, handle: &HandleId) -> Result<(), TransportError> {
        self.record(IssuedCommand::CancelConnection(handle.clone()));
        Ok(())
    }

    async fn discover_services(
        &self,
        handle: &HandleId,
        services: Option<&[Uuid]>,
    ) -> Result<(), TransportError> {
        self.record(IssuedCommand::DiscoverServices {
            handle: handle.clone(),
            services: services.map(<[Uuid]>::to_vec),
        });
        Ok(())
    }

    async fn discover_characteristics(
        &self,
        handle: &HandleId,
        service: Uuid,
        characteristics: Option<&[Uuid]>,
    ) -> Result<(), TransportError> {
        self.record(IssuedCommand::DiscoverCharacteristics {
            handle: handle.clone(),
            service,
            characteristics: characteristics.map(<[Uuid]>::to_vec),
        });
        Ok(())
    }

    async fn set_notify(
        &self,
        handle: &HandleId,
        characteristic: Uuid,
        enabled: bool,
    ) -> Result<(), TransportError> {
        self.record(IssuedCommand::SetNotify {
            handle: handle.clone(),
            characteristic,
            enabled,
        });
        Ok(())
    }

    async fn write_value(
        &self,
        handle: &HandleId,
        characteristic: Uuid,
        value: &[u8],
        _with_response: bool,
    ) -> Result<(), TransportError> {
        self.record(IssuedCommand::WriteValue {
            handle: handle.clone(),
            characteristic,
            value: value.to_vec(),
        });
        Ok(())
    }

    async fn read_value(
        &self,
        handle: &HandleId,
        characteristic: Uuid,
    ) -> Result<(), TransportError> {
        self.record(IssuedCommand::ReadValue {
            handle: handle.clone(),
            characteristic,
        });
        Ok(())
    }
}
