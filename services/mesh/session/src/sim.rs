//! In-process simulated mesh.
//!
//! Stands in for a BLE radio plus a mesh of advertising devices. The relay
//! side runs the real handshake and envelope code, so a session talking to a
//! `SimulatedMesh` exercises the same bytes it would send over the air.
//! Failure knobs (unreachable devices, dropped or stale acknowledgements, a
//! mismatched network key) drive the error paths in tests and `--simulate`.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use halo_topology::normalize_ble_address;
use halo_wire::{
    crypto, decode, encode, DecodedFrame, Direction, NetworkCredentials, Opcode, Sequence,
    SessionKey,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::handshake;
use crate::selector::Candidate;
use crate::transport::{Advertisement, BleTransport, ConnectionHandle, TransportError};

/// A command frame delivered to the simulated mesh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredFrame {
    /// Relay the frame arrived through
    pub relay: String,
    /// Decoded frame
    pub frame: DecodedFrame,
}

struct SimDevice {
    ble_address: String,
    signal_strength: i16,
    reachable: bool,
}

struct SimConnection {
    relay: String,
    key: Option<SessionKey>,
    outbox: VecDeque<Bytes>,
    notify: Arc<Notify>,
}

struct MeshState {
    credentials: NetworkCredentials,
    devices: Vec<SimDevice>,
    connections: HashMap<u64, SimConnection>,
    next_handle: u64,
    concurrent_scan: bool,
    drop_acks: usize,
    stale_acks: usize,
    reply_delay: Duration,
    received: Vec<DeliveredFrame>,
    connect_attempts: Vec<String>,
    scans: usize,
    disconnects: usize,
}

/// Simulated BLE radio and mesh. Clones share state.
#[derive(Clone)]
pub struct SimulatedMesh {
    state: Arc<Mutex<MeshState>>,
}

impl SimulatedMesh {
    /// Create a mesh whose devices hold the given network key
    pub fn new(credentials: NetworkCredentials) -> Self {
        Self {
            state: Arc::new(Mutex::new(MeshState {
                credentials,
                devices: Vec::new(),
                connections: HashMap::new(),
                next_handle: 1,
                concurrent_scan: false,
                drop_acks: 0,
                stale_acks: 0,
                reply_delay: Duration::ZERO,
                received: Vec::new(),
                connect_attempts: Vec::new(),
                scans: 0,
                disconnects: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MeshState> {
        self.state.lock().expect("simulated mesh lock poisoned")
    }

    /// Add an advertising device
    pub fn with_device(self, ble_address: &str, signal_strength: i16) -> Self {
        self.add_device(ble_address, signal_strength);
        self
    }

    /// Add an advertising device to a shared mesh
    pub fn add_device(&self, ble_address: &str, signal_strength: i16) {
        self.lock().devices.push(SimDevice {
            ble_address: normalize_ble_address(ble_address),
            signal_strength,
            reachable: true,
        });
    }

    /// Make a device advertise but refuse connections
    pub fn unreachable(self, ble_address: &str) -> Self {
        self.set_reachable(ble_address, false);
        self
    }

    /// Allow scanning while connected
    pub fn with_concurrent_scan(self) -> Self {
        self.lock().concurrent_scan = true;
        self
    }

    /// Change whether a device accepts connections
    pub fn set_reachable(&self, ble_address: &str, reachable: bool) {
        let wanted = normalize_ble_address(ble_address);
        for device in self.lock().devices.iter_mut() {
            if device.ble_address == wanted {
                device.reachable = reachable;
            }
        }
    }

    /// Replace the key the devices hold; affects new handshakes only
    pub fn set_credentials(&self, credentials: NetworkCredentials) {
        self.lock().credentials = credentials;
    }

    /// Swallow the acknowledgements for the next `n` commands
    pub fn drop_next_acks(&self, n: usize) {
        self.lock().drop_acks = n;
    }

    /// Queue `n` acknowledgements for an earlier sequence ahead of the next
    /// real one
    pub fn inject_stale_acks(&self, n: usize) {
        self.lock().stale_acks = n;
    }

    /// Hold every notification back for `delay` before it can be read
    pub fn with_reply_delay(self, delay: Duration) -> Self {
        self.lock().reply_delay = delay;
        self
    }

    /// Command frames delivered so far, in arrival order
    pub fn received(&self) -> Vec<DeliveredFrame> {
        self.lock().received.clone()
    }

    /// BLE addresses of every connect attempt, in order
    pub fn connect_attempts(&self) -> Vec<String> {
        self.lock().connect_attempts.clone()
    }

    /// Number of scans run
    pub fn scans(&self) -> usize {
        self.lock().scans
    }

    /// Number of connections currently open
    pub fn open_connections(&self) -> usize {
        self.lock().connections.len()
    }

    /// Number of connections released
    pub fn disconnects(&self) -> usize {
        self.lock().disconnects
    }
}

impl MeshState {
    fn handle_hello(&mut self, handle: ConnectionHandle, bytes: &[u8]) {
        let device_nonce: [u8; handshake::NONCE_LEN] = rand::random();
        let reply = handshake::respond(&self.credentials, bytes, device_nonce);

        let Some(conn) = self.connections.get_mut(&handle.0) else {
            return;
        };
        match reply {
            Ok((welcome, key)) => {
                conn.key = key;
                conn.outbox.push_back(welcome);
                conn.notify.notify_one();
            }
            Err(e) => warn!("Relay {} ignoring bad HELLO: {}", conn.relay, e),
        }
    }

    fn handle_command(&mut self, handle: ConnectionHandle, key: SessionKey, bytes: &[u8]) {
        let frame = match crypto::open(&key, Direction::ToMesh, bytes)
            .ok()
            .and_then(|(_, frame)| decode(&frame).ok())
        {
            Some(frame) => frame,
            None => {
                debug!("Relay on {} dropping undecodable write", handle);
                return;
            }
        };

        let mut outgoing = Vec::new();
        for _ in 0..std::mem::take(&mut self.stale_acks) {
            let stale = Sequence::new(frame.sequence.value().wrapping_sub(1));
            outgoing.extend(sealed_ack(&key, &frame, stale));
        }
        if self.drop_acks > 0 {
            self.drop_acks -= 1;
            debug!("Dropping ack for seq={}", frame.sequence);
        } else {
            outgoing.extend(sealed_ack(&key, &frame, frame.sequence));
        }

        let Some(conn) = self.connections.get_mut(&handle.0) else {
            return;
        };
        self.received.push(DeliveredFrame {
            relay: conn.relay.clone(),
            frame,
        });
        conn.outbox.extend(outgoing);
        conn.notify.notify_one();
    }
}

fn sealed_ack(key: &SessionKey, frame: &DecodedFrame, sequence: Sequence) -> Option<Bytes> {
    let ack = encode(frame.address, Opcode::Ack, &frame.payload, sequence).ok()?;
    crypto::seal(key, Direction::FromMesh, sequence, &ack).ok()
}

#[async_trait]
impl BleTransport for SimulatedMesh {
    async fn scan(
        &self,
        _duration: Duration,
    ) -> Result<BoxStream<'static, Advertisement>, TransportError> {
        let mut state = self.lock();
        if !state.concurrent_scan && !state.connections.is_empty() {
            return Err(TransportError::Busy);
        }
        state.scans += 1;

        let advertisements: Vec<Advertisement> = state
            .devices
            .iter()
            .map(|d| Advertisement {
                ble_address: d.ble_address.clone(),
                signal_strength: d.signal_strength,
                local_name: None,
            })
            .collect();

        Ok(stream::iter(advertisements).boxed())
    }

    async fn connect(&self, candidate: &Candidate) -> Result<ConnectionHandle, TransportError> {
        let address = normalize_ble_address(&candidate.ble_address);
        let mut state = self.lock();
        state.connect_attempts.push(address.clone());

        let reachable = state
            .devices
            .iter()
            .any(|d| d.ble_address == address && d.reachable);
        if !reachable {
            return Err(TransportError::Unreachable(address));
        }

        let handle = ConnectionHandle(state.next_handle);
        state.next_handle += 1;
        state.connections.insert(
            handle.0,
            SimConnection {
                relay: address,
                key: None,
                outbox: VecDeque::new(),
                notify: Arc::new(Notify::new()),
            },
        );
        Ok(handle)
    }

    async fn write(&self, handle: ConnectionHandle, bytes: &[u8]) -> Result<(), TransportError> {
        let mut state = self.lock();
        let key = state
            .connections
            .get(&handle.0)
            .ok_or(TransportError::NotConnected(handle))?
            .key
            .clone();

        match key {
            None => state.handle_hello(handle, bytes),
            Some(key) => state.handle_command(handle, key, bytes),
        }
        Ok(())
    }

    async fn read_notification(
        &self,
        handle: ConnectionHandle,
        timeout: Duration,
    ) -> Result<Bytes, TransportError> {
        let deadline = Instant::now() + timeout;

        let delay = self.lock().reply_delay;
        if !delay.is_zero() {
            if delay >= timeout {
                tokio::time::sleep_until(deadline).await;
                return Err(TransportError::Timeout);
            }
            tokio::time::sleep(delay).await;
        }

        loop {
            let notify = {
                let mut state = self.lock();
                let conn = state
                    .connections
                    .get_mut(&handle.0)
                    .ok_or(TransportError::NotConnected(handle))?;
                if let Some(bytes) = conn.outbox.pop_front() {
                    return Ok(bytes);
                }
                conn.notify.clone()
            };

            if tokio::time::timeout_at(deadline, notify.notified())
                .await
                .is_err()
            {
                return Err(TransportError::Timeout);
            }
        }
    }

    async fn disconnect(&self, handle: ConnectionHandle) -> Result<(), TransportError> {
        let mut state = self.lock();
        let conn = state
            .connections
            .remove(&handle.0)
            .ok_or(TransportError::NotConnected(handle))?;
        state.disconnects += 1;
        conn.notify.notify_waiters();
        Ok(())
    }

    fn supports_concurrent_scan(&self) -> bool {
        self.lock().concurrent_scan
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> NetworkCredentials {
        NetworkCredentials::from_passphrase("N1", "secret")
    }

    fn candidate(address: &str) -> Candidate {
        Candidate {
            avid: 1,
            mesh_address: 1,
            signal_strength: -50,
            ble_address: address.to_string(),
        }
    }

    #[tokio::test]
    async fn test_scan_reports_devices() {
        let mesh = SimulatedMesh::new(creds())
            .with_device("AABBCCDDEE01", -70)
            .with_device("aa:bb:cc:dd:ee:02", -40);

        let ads: Vec<Advertisement> = mesh
            .scan(Duration::from_secs(1))
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(ads.len(), 2);
        assert_eq!(ads[0].ble_address, "aa:bb:cc:dd:ee:01");
        assert_eq!(mesh.scans(), 1);
    }

    #[tokio::test]
    async fn test_scan_busy_while_connected() {
        let mesh = SimulatedMesh::new(creds()).with_device("aa:bb:cc:dd:ee:01", -70);
        let handle = mesh.connect(&candidate("aa:bb:cc:dd:ee:01")).await.unwrap();

        assert!(matches!(
            mesh.scan(Duration::from_secs(1)).await,
            Err(TransportError::Busy)
        ));

        mesh.disconnect(handle).await.unwrap();
        assert!(mesh.scan(Duration::from_secs(1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_and_unreachable_devices() {
        let mesh = SimulatedMesh::new(creds())
            .with_device("aa:bb:cc:dd:ee:01", -70)
            .unreachable("aa:bb:cc:dd:ee:01");

        assert!(matches!(
            mesh.connect(&candidate("aa:bb:cc:dd:ee:01")).await,
            Err(TransportError::Unreachable(_))
        ));
        assert!(matches!(
            mesh.connect(&candidate("aa:bb:cc:dd:ee:09")).await,
            Err(TransportError::Unreachable(_))
        ));
        assert_eq!(mesh.connect_attempts().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_times_out_when_idle() {
        let mesh = SimulatedMesh::new(creds()).with_device("aa:bb:cc:dd:ee:01", -70);
        let handle = mesh.connect(&candidate("aa:bb:cc:dd:ee:01")).await.unwrap();

        assert_eq!(
            mesh.read_notification(handle, Duration::from_millis(50)).await,
            Err(TransportError::Timeout)
        );
    }

    #[tokio::test]
    async fn test_write_after_disconnect_fails() {
        let mesh = SimulatedMesh::new(creds()).with_device("aa:bb:cc:dd:ee:01", -70);
        let handle = mesh.connect(&candidate("aa:bb:cc:dd:ee:01")).await.unwrap();
        mesh.disconnect(handle).await.unwrap();

        assert_eq!(
            mesh.write(handle, b"x").await,
            Err(TransportError::NotConnected(handle))
        );
    }
}
