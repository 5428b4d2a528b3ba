//! BLE transport backed by btleplug.
//!
//! Talks to Avi-on mesh devices over their two write characteristics. Each
//! write is split: the first 20 bytes go to the low characteristic and the
//! remainder, if any, to the high one. Notifications from both are merged
//! into one stream per connection.

use async_trait::async_trait;
use btleplug::api::{
    Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, ValueNotification,
    WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use bytes::Bytes;
use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt};
use halo_topology::normalize_ble_address;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::selector::Candidate;
use crate::transport::{Advertisement, BleTransport, ConnectionHandle, TransportError};

/// Low write characteristic (first 20 bytes of each write)
pub const CHARACTERISTIC_LOW: Uuid = Uuid::from_u128(0xc4edc000_9daf_11e3_8003_00025b000b00);

/// High write characteristic (bytes past the first 20)
pub const CHARACTERISTIC_HIGH: Uuid = Uuid::from_u128(0xc4edc000_9daf_11e3_8004_00025b000b00);

/// Largest single ATT write
const LOW_WRITE_LEN: usize = 20;

type NotificationStream = Pin<Box<dyn futures::Stream<Item = ValueNotification> + Send>>;

struct Connection {
    peripheral: Peripheral,
    low: Characteristic,
    high: Characteristic,
    notifications: tokio::sync::Mutex<NotificationStream>,
}

/// btleplug transport on the first available adapter
pub struct BtleplugTransport {
    adapter: Adapter,
    connections: DashMap<u64, Arc<Connection>>,
    next_handle: AtomicU64,
}

fn adapter_error(e: btleplug::Error) -> TransportError {
    TransportError::Adapter(e.to_string())
}

impl BtleplugTransport {
    /// Open the first Bluetooth adapter
    pub async fn new() -> Result<Self, TransportError> {
        let manager = Manager::new().await.map_err(adapter_error)?;
        let adapter = manager
            .adapters()
            .await
            .map_err(adapter_error)?
            .into_iter()
            .next()
            .ok_or_else(|| TransportError::Adapter("No Bluetooth adapter found".into()))?;

        info!(
            "Using Bluetooth adapter {}",
            adapter
                .adapter_info()
                .await
                .unwrap_or_else(|_| "unknown".to_string())
        );

        Ok(Self {
            adapter,
            connections: DashMap::new(),
            next_handle: AtomicU64::new(1),
        })
    }

    async fn find_peripheral(&self, ble_address: &str) -> Result<Peripheral, TransportError> {
        let wanted = normalize_ble_address(ble_address);
        for peripheral in self.adapter.peripherals().await.map_err(adapter_error)? {
            if normalize_ble_address(&peripheral.address().to_string()) == wanted {
                return Ok(peripheral);
            }
        }
        Err(TransportError::Unreachable(wanted))
    }

    fn connection(&self, handle: ConnectionHandle) -> Result<Arc<Connection>, TransportError> {
        self.connections
            .get(&handle.0)
            .map(|c| c.value().clone())
            .ok_or(TransportError::NotConnected(handle))
    }
}

/// Discover the write characteristics and subscribe to their notifications
async fn attach(
    peripheral: &Peripheral,
) -> Result<(Characteristic, Characteristic, NotificationStream), TransportError> {
    peripheral.discover_services().await.map_err(adapter_error)?;

    let characteristics: Vec<Characteristic> = peripheral.characteristics().into_iter().collect();
    let low = find_by_uuid(&characteristics, |c| c.uuid, CHARACTERISTIC_LOW)?;
    let high = find_by_uuid(&characteristics, |c| c.uuid, CHARACTERISTIC_HIGH)?;

    peripheral.subscribe(&low).await.map_err(adapter_error)?;
    peripheral.subscribe(&high).await.map_err(adapter_error)?;
    let notifications = peripheral.notifications().await.map_err(adapter_error)?;
    Ok((low, high, notifications))
}

fn find_by_uuid<T: Clone>(
    items: &[T],
    uuid_of: impl Fn(&T) -> Uuid,
    wanted: Uuid,
) -> Result<T, TransportError> {
    items
        .iter()
        .find(|item| uuid_of(item) == wanted)
        .cloned()
        .ok_or_else(|| TransportError::Adapter(format!("characteristic {} not found", wanted)))
}

#[async_trait]
impl BleTransport for BtleplugTransport {
    async fn scan(
        &self,
        duration: Duration,
    ) -> Result<BoxStream<'static, Advertisement>, TransportError> {
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(adapter_error)?;
        tokio::time::sleep(duration).await;

        let mut advertisements = Vec::new();
        for peripheral in self.adapter.peripherals().await.map_err(adapter_error)? {
            if let Ok(Some(props)) = peripheral.properties().await {
                if let Some(rssi) = props.rssi {
                    advertisements.push(Advertisement {
                        ble_address: peripheral.address().to_string(),
                        signal_strength: rssi,
                        local_name: props.local_name,
                    });
                }
            }
        }

        self.adapter.stop_scan().await.map_err(adapter_error)?;
        debug!("Scan heard {} advertisers", advertisements.len());
        Ok(stream::iter(advertisements).boxed())
    }

    async fn connect(&self, candidate: &Candidate) -> Result<ConnectionHandle, TransportError> {
        let peripheral = self.find_peripheral(&candidate.ble_address).await?;

        peripheral
            .connect()
            .await
            .map_err(|e| TransportError::Unreachable(format!("{}: {}", candidate.ble_address, e)))?;
        let (low, high, notifications) = match attach(&peripheral).await {
            Ok(attached) => attached,
            Err(e) => {
                warn!("Releasing {} after failed setup: {}", candidate.ble_address, e);
                if let Err(de) = peripheral.disconnect().await {
                    warn!("Error disconnecting {}: {}", candidate.ble_address, de);
                }
                return Err(e);
            }
        };

        let handle = ConnectionHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.connections.insert(
            handle.0,
            Arc::new(Connection {
                peripheral,
                low,
                high,
                notifications: tokio::sync::Mutex::new(notifications),
            }),
        );

        info!("Connected to {} as {}", candidate.ble_address, handle);
        Ok(handle)
    }

    async fn write(&self, handle: ConnectionHandle, bytes: &[u8]) -> Result<(), TransportError> {
        let conn = self.connection(handle)?;
        let split = bytes.len().min(LOW_WRITE_LEN);
        let (low, high) = bytes.split_at(split);

        conn.peripheral
            .write(&conn.low, low, WriteType::WithoutResponse)
            .await
            .map_err(adapter_error)?;
        if !high.is_empty() {
            conn.peripheral
                .write(&conn.high, high, WriteType::WithoutResponse)
                .await
                .map_err(adapter_error)?;
        }
        Ok(())
    }

    async fn read_notification(
        &self,
        handle: ConnectionHandle,
        timeout: Duration,
    ) -> Result<Bytes, TransportError> {
        let conn = self.connection(handle)?;
        let mut notifications = conn.notifications.lock().await;

        match tokio::time::timeout(timeout, notifications.next()).await {
            Ok(Some(notification)) => Ok(Bytes::from(notification.value)),
            Ok(None) => Err(TransportError::NotConnected(handle)),
            Err(_) => Err(TransportError::Timeout),
        }
    }

    async fn disconnect(&self, handle: ConnectionHandle) -> Result<(), TransportError> {
        let (_, conn) = self
            .connections
            .remove(&handle.0)
            .ok_or(TransportError::NotConnected(handle))?;

        if let Err(e) = conn.peripheral.disconnect().await {
            warn!("Error disconnecting {}: {}", handle, e);
            return Err(adapter_error(e));
        }
        debug!("Disconnected {}", handle);
        Ok(())
    }
}
