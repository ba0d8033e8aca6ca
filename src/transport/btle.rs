//! btleplug-backed radio transport.
//!
//! Adapter events, per-peripheral notification streams, and read results are
//! all funneled into the single [`TransportEvent`] channel the engine owns,
//! so everything downstream observes one ordered stream.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CentralState, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures_util::stream::StreamExt;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{AdvertisementPayload, HandleId, RadioTransport, TransportError, TransportEvent};

pub struct BtleTransport {
    adapter: Adapter,
    peripherals: RwLock<HashMap<HandleId, Peripheral>>,
    events_tx: mpsc::Sender<TransportEvent>,
}

impl BtleTransport {
    /// Open the first available adapter and start pumping its events.
    pub async fn new(
        event_capacity: usize,
    ) -> Result<(Arc<Self>, mpsc::Receiver<TransportEvent>), TransportError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(TransportError::NoAdapter)?;

        let (events_tx, events_rx) = mpsc::channel(event_capacity);
        let transport = Arc::new(Self {
            adapter,
            peripherals: RwLock::new(HashMap::new()),
            events_tx,
        });

        let mut central_events = transport.adapter.events().await?;
        let pump = Arc::clone(&transport);
        tokio::spawn(async move {
            while let Some(event) = central_events.next().await {
                pump.dispatch_central_event(event).await;
            }
            debug!("adapter event stream ended");
        });

        Ok((transport, events_rx))
    }

    async fn dispatch_central_event(&self, event: CentralEvent) {
        match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                self.forward_advertisement(id).await;
            }
            CentralEvent::ManufacturerDataAdvertisement { id, .. }
            | CentralEvent::ServiceDataAdvertisement { id, .. }
            | CentralEvent::ServicesAdvertisement { id, .. } => {
                self.forward_advertisement(id).await;
            }
            CentralEvent::DeviceConnected(id) => {
                let handle = id.to_string();
                self.spawn_notification_pump(&handle).await;
                let _ = self
                    .events_tx
                    .send(TransportEvent::Connected { handle })
                    .await;
            }
            CentralEvent::DeviceDisconnected(id) => {
                let _ = self
                    .events_tx
                    .send(TransportEvent::Disconnected {
                        handle: id.to_string(),
                    })
                    .await;
            }
            CentralEvent::StateUpdate(state) => {
                let powered_on = matches!(state, CentralState::PoweredOn);
                let _ = self
                    .events_tx
                    .send(TransportEvent::PowerStateChanged { powered_on })
                    .await;
            }
        }
    }

    /// Refresh the peripheral cache and re-emit the advertisement with the
    /// latest RSSI sample. Duplicate delivery is what lets the engine
    /// re-evaluate signal strength as a device settles.
    async fn forward_advertisement(&self, id: PeripheralId) {
        let peripheral = match self.adapter.peripheral(&id).await {
            Ok(p) => p,
            Err(e) => {
                debug!("peripheral {} vanished before lookup: {}", id, e);
                return;
            }
        };
        let props = match peripheral.properties().await {
            Ok(Some(props)) => props,
            _ => return,
        };

        let handle = id.to_string();
        self.peripherals
            .write()
            .await
            .insert(handle.clone(), peripheral);

        let payload = AdvertisementPayload {
            manufacturer_data: props.manufacturer_data,
            service_data: props.service_data,
            physical_address: Some(props.address.to_string()),
        };
        let _ = self
            .events_tx
            .send(TransportEvent::AdvertisementReceived {
                handle,
                name: props.local_name,
                rssi: props.rssi,
                payload,
            })
            .await;
    }

    async fn spawn_notification_pump(&self, handle: &HandleId) {
        let peripheral = match self.peripherals.read().await.get(handle).cloned() {
            Some(p) => p,
            None => return,
        };
        let events_tx = self.events_tx.clone();
        let handle = handle.clone();
        tokio::spawn(async move {
            let mut notifications = match peripheral.notifications().await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("failed to open notification stream for {}: {}", handle, e);
                    return;
                }
            };
            while let Some(notification) = notifications.next().await {
                let event = TransportEvent::CharacteristicValueUpdated {
                    handle: handle.clone(),
                    characteristic: notification.uuid,
                    value: notification.value,
                };
                if events_tx.send(event).await.is_err() {
                    break;
                }
            }
            debug!("notification stream for {} ended", handle);
        });
    }

    async fn peripheral(&self, handle: &HandleId) -> Result<Peripheral, TransportError> {
        self.peripherals
            .read()
            .await
            .get(handle)
            .cloned()
            .ok_or_else(|| TransportError::UnknownHandle(handle.clone()))
    }

    fn characteristic(
        peripheral: &Peripheral,
        uuid: Uuid,
    ) -> Result<Characteristic, TransportError> {
        peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or(TransportError::UnknownCharacteristic(uuid))
    }
}

#[async_trait]
impl RadioTransport for BtleTransport {
    async fn start_scan(&self, duplicates: bool) -> Result<(), TransportError> {
        // Host stacks re-deliver advertisements as DeviceUpdated events, so
        // the duplicates flag needs no per-platform plumbing here.
        debug!("starting scan (duplicates={})", duplicates);
        self.adapter.start_scan(ScanFilter::default()).await?;
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn connect(&self, handle: &HandleId) -> Result<(), TransportError> {
        let peripheral = self.peripheral(handle).await?;
        if let Err(e) = peripheral.connect().await {
            // Surface the failure through the event stream; connected
            // outcomes arrive the same way via DeviceConnected.
            let _ = self
                .events_tx
                .send(TransportEvent::ConnectFailed {
                    handle: handle.clone(),
                    reason: e.to_string(),
                })
                .await;
        }
        Ok(())
    }

    async fn cancel_connection(&self, handle: &HandleId) -> Result<(), TransportError> {
        let peripheral = self.peripheral(handle).await?;
        peripheral.disconnect().await?;
        Ok(())
    }

    async fn discover_services(
        &self,
        handle: &HandleId,
        services: Option<&[Uuid]>,
    ) -> Result<(), TransportError> {
        let peripheral = self.peripheral(handle).await?;
        peripheral.discover_services().await?;

        let discovered: Vec<Uuid> = peripheral
            .services()
            .iter()
            .map(|s| s.uuid)
            .filter(|uuid| services.map_or(true, |wanted| wanted.contains(uuid)))
            .collect();
        let _ = self
            .events_tx
            .send(TransportEvent::ServicesDiscovered {
                handle: handle.clone(),
                services: discovered,
            })
            .await;
        Ok(())
    }

    async fn discover_characteristics(
        &self,
        handle: &HandleId,
        service: Uuid,
        characteristics: Option<&[Uuid]>,
    ) -> Result<(), TransportError> {
        let peripheral = self.peripheral(handle).await?;
        let found: Vec<Uuid> = peripheral
            .services()
            .iter()
            .filter(|s| s.uuid == service)
            .flat_map(|s| s.characteristics.iter().map(|c| c.uuid))
            .filter(|uuid| characteristics.map_or(true, |wanted| wanted.contains(uuid)))
            .collect();
        let _ = self
            .events_tx
            .send(TransportEvent::CharacteristicsDiscovered {
                handle: handle.clone(),
                service,
                characteristics: found,
            })
            .await;
        Ok(())
    }

    async fn set_notify(
        &self,
        handle: &HandleId,
        characteristic: Uuid,
        enabled: bool,
    ) -> Result<(), TransportError> {
        let peripheral = self.peripheral(handle).await?;
        let characteristic = Self::characteristic(&peripheral, characteristic)?;
        if enabled {
            peripheral.subscribe(&characteristic).await?;
        } else {
            peripheral.unsubscribe(&characteristic).await?;
        }
        Ok(())
    }

    async fn write_value(
        &self,
        handle: &HandleId,
        characteristic: Uuid,
        value: &[u8],
        with_response: bool,
    ) -> Result<(), TransportError> {
        let peripheral = self.peripheral(handle).await?;
        let characteristic = Self::characteristic(&peripheral, characteristic)?;
        let write_type = if with_response {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };
        peripheral.write(&characteristic, value, write_type).await?;
        Ok(())
    }

    async fn read_value(
        &self,
        handle: &HandleId,
        characteristic: Uuid,
    ) -> Result<(), TransportError> {
        let peripheral = self.peripheral(handle).await?;
        let target = Self::characteristic(&peripheral, characteristic)?;
        let value = peripheral.read(&target).await?;
        let _ = self
            .events_tx
            .send(TransportEvent::CharacteristicValueUpdated {
                handle: handle.clone(),
                characteristic,
                value,
            })
            .await;
        Ok(())
    }
}
