//! Mesh session: one keyed, sequence-counted connection to a relay.
//!
//! A session owns its connection handle, session key and sequence counter.
//! Sends are serialized by a FIFO gate, so exactly one frame is in flight and
//! sequence numbers go out in the order callers queued. Closing cancels the
//! session token, which makes in-flight and queued sends fail fast.

use halo_wire::{
    crypto, decode, Address, Command, Direction, NetworkCredentials, Opcode, Sequence, SessionKey,
};
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::SessionError;
use crate::handshake;
use crate::selector::Candidate;
use crate::transport::{BleTransport, ConnectionHandle, TransportError};

/// Configuration for a mesh session
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// How long to wait for the relay to accept the connection
    pub connect_timeout: Duration,
    /// How long to wait for the WELCOME
    pub handshake_timeout: Duration,
    /// How long to wait for a command's acknowledgement
    pub send_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(5),
            send_timeout: Duration::from_secs(2),
        }
    }
}

/// Statistics for a session
#[derive(Clone, Debug, Default)]
pub struct SessionStats {
    /// Number of frames written
    pub frames_sent: u64,
    /// Number of matching acknowledgements received
    pub acks_received: u64,
    /// Number of sends that timed out
    pub timeouts: u64,
    /// Notifications discarded while waiting for an acknowledgement
    pub notifications_skipped: u64,
    /// Most recent write-to-ack round trip
    pub last_round_trip: Option<Duration>,
}

/// Acknowledgement of a delivered command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    /// Address the acknowledgement came from
    pub source: Address,
    /// Sequence number being acknowledged
    pub sequence: Sequence,
    /// Acknowledgement payload
    pub payload: Bytes,
}

/// Live session with one relay
pub struct MeshSession {
    transport: Arc<dyn BleTransport>,
    handle: ConnectionHandle,
    relay: Candidate,
    network_id: String,
    key: SessionKey,
    config: SessionConfig,
    /// FIFO gate: one frame in flight
    send_gate: tokio::sync::Mutex<()>,
    /// Next sequence number to assign; written only under `send_gate`
    sequence: AtomicU32,
    cancel: CancellationToken,
    closed: AtomicBool,
    stats: Mutex<SessionStats>,
}

#[cfg(test)]
impl std::fmt::Debug for MeshSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshSession").finish_non_exhaustive()
    }
}

impl MeshSession {
    /// Connect to a relay and run the handshake.
    ///
    /// On any failure after the connection opened, the connection is
    /// released before this returns.
    pub async fn open(
        transport: Arc<dyn BleTransport>,
        relay: Candidate,
        credentials: &NetworkCredentials,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        debug!(
            "Connecting to relay {} ({}) at {} dBm",
            relay.avid, relay.ble_address, relay.signal_strength
        );

        let handle = match tokio::time::timeout(config.connect_timeout, transport.connect(&relay))
            .await
        {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => return Err(SessionError::Connect(e)),
            Err(_) => return Err(SessionError::Connect(TransportError::Timeout)),
        };
        // Releases the connection if this future is dropped mid-handshake
        let guard = ConnectionGuard::new(transport.clone(), handle);

        let key = match handshake::perform(
            transport.as_ref(),
            handle,
            credentials,
            config.handshake_timeout,
        )
        .await
        {
            Ok(key) => key,
            Err(e) => {
                warn!("Handshake with relay {} failed: {}", relay.avid, e);
                guard.release().await;
                return Err(e);
            }
        };
        let handle = guard.disarm();

        info!(
            "Session open with relay {} on {} (network {})",
            relay.avid,
            handle,
            credentials.network_id()
        );

        Ok(Self {
            transport,
            handle,
            relay,
            network_id: credentials.network_id().to_string(),
            key,
            config,
            send_gate: tokio::sync::Mutex::new(()),
            sequence: AtomicU32::new(Sequence::ZERO.value()),
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
            stats: Mutex::new(SessionStats::default()),
        })
    }

    /// Start numbering frames at `sequence`
    #[cfg(test)]
    fn starting_at(self, sequence: Sequence) -> Self {
        self.sequence.store(sequence.value(), Ordering::Release);
        self
    }

    /// Relay this session is connected through
    pub fn relay(&self) -> &Candidate {
        &self.relay
    }

    /// Connection handle
    pub fn handle(&self) -> ConnectionHandle {
        self.handle
    }

    /// Next sequence number to be used
    pub fn sequence(&self) -> Sequence {
        Sequence::new(self.sequence.load(Ordering::Acquire))
    }

    /// Whether `close` has run or the session was cancelled
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.cancel.is_cancelled()
    }

    /// Snapshot of session statistics
    pub fn stats(&self) -> SessionStats {
        self.stats.lock().expect("stats lock poisoned").clone()
    }

    /// Send a command and wait for its acknowledgement.
    ///
    /// The sequence counter advances once per frame written, whether or not
    /// the acknowledgement arrives. A command that fails to encode consumes
    /// no sequence number.
    pub async fn send(&self, command: &Command) -> Result<Ack, SessionError> {
        let _turn = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(SessionError::Closed),
            guard = self.send_gate.lock() => guard,
        };
        if self.is_closed() {
            return Err(SessionError::Closed);
        }

        let sequence = self.sequence();
        let frame = command.frame(sequence).encode()?;
        self.sequence
            .store(sequence.next().value(), Ordering::Release);

        let envelope = crypto::seal(&self.key, Direction::ToMesh, sequence, &frame)?;

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                debug!("Send of sequence {} cancelled by close", sequence);
                Err(SessionError::Closed)
            }
            result = self.exchange(command, sequence, &envelope) => result,
        }
    }

    async fn exchange(
        &self,
        command: &Command,
        sequence: Sequence,
        envelope: &[u8],
    ) -> Result<Ack, SessionError> {
        let started = Instant::now();
        let deadline = started + self.config.send_timeout;

        self.transport
            .write(self.handle, envelope)
            .await
            .map_err(SessionError::Transport)?;
        self.update_stats(|s| s.frames_sent += 1);

        debug!(
            "Sent {:?} to {} seq={} via relay {}",
            command.opcode(),
            command.destination(),
            sequence,
            self.relay.avid
        );

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(self.timed_out(sequence));
            }

            let notification = match self
                .transport
                .read_notification(self.handle, remaining)
                .await
            {
                Ok(bytes) => bytes,
                Err(TransportError::Timeout) => return Err(self.timed_out(sequence)),
                Err(e) => return Err(SessionError::Transport(e)),
            };

            match self.parse_ack(&notification) {
                Some(ack) if ack.sequence == sequence => {
                    let rtt = started.elapsed();
                    self.update_stats(|s| {
                        s.acks_received += 1;
                        s.last_round_trip = Some(rtt);
                    });
                    trace!("Ack for seq={} from {} after {:?}", sequence, ack.source, rtt);
                    return Ok(ack);
                }
                Some(ack) => {
                    debug!(
                        "Skipping ack for seq={} while waiting for seq={}",
                        ack.sequence, sequence
                    );
                    self.update_stats(|s| s.notifications_skipped += 1);
                }
                None => {
                    trace!("Skipping {} byte notification", notification.len());
                    self.update_stats(|s| s.notifications_skipped += 1);
                }
            }
        }
    }

    fn parse_ack(&self, notification: &[u8]) -> Option<Ack> {
        let (envelope_sequence, frame) =
            crypto::open(&self.key, Direction::FromMesh, notification).ok()?;
        let decoded = decode(&frame).ok()?;

        if decoded.opcode != Opcode::Ack || decoded.sequence != envelope_sequence {
            return None;
        }

        Some(Ack {
            source: decoded.address,
            sequence: decoded.sequence,
            payload: decoded.payload,
        })
    }

    fn timed_out(&self, sequence: Sequence) -> SessionError {
        self.update_stats(|s| s.timeouts += 1);
        warn!(
            "No ack for seq={} within {:?} (relay {}, network {})",
            sequence, self.config.send_timeout, self.relay.avid, self.network_id
        );
        SessionError::CommandTimeout {
            sequence,
            timeout: self.config.send_timeout,
        }
    }

    fn update_stats(&self, f: impl FnOnce(&mut SessionStats)) {
        f(&mut self.stats.lock().expect("stats lock poisoned"));
    }

    /// Close the session and release the connection. Idempotent.
    pub async fn close(&self) {
        self.cancel.cancel();
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Err(e) = self.transport.disconnect(self.handle).await {
            warn!("Error releasing {}: {}", self.handle, e);
        }
        info!(
            "Session with relay {} closed (next seq={})",
            self.relay.avid,
            self.sequence()
        );
    }
}

impl Drop for MeshSession {
    fn drop(&mut self) {
        self.cancel.cancel();
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        release_in_background(self.transport.clone(), self.handle);
    }
}

/// Owns a freshly opened connection until the session takes it over
struct ConnectionGuard {
    transport: Arc<dyn BleTransport>,
    handle: ConnectionHandle,
    armed: bool,
}

impl ConnectionGuard {
    fn new(transport: Arc<dyn BleTransport>, handle: ConnectionHandle) -> Self {
        Self {
            transport,
            handle,
            armed: true,
        }
    }

    /// Hand the connection over without releasing it
    fn disarm(mut self) -> ConnectionHandle {
        self.armed = false;
        self.handle
    }

    /// Release the connection now
    async fn release(mut self) {
        self.armed = false;
        if let Err(e) = self.transport.disconnect(self.handle).await {
            warn!("Failed to release {} after handshake failure: {}", self.handle, e);
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.armed {
            debug!("Open of {} abandoned, releasing connection", self.handle);
            release_in_background(self.transport.clone(), self.handle);
        }
    }
}

fn release_in_background(transport: Arc<dyn BleTransport>, handle: ConnectionHandle) {
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn(async move {
                if let Err(e) = transport.disconnect(handle).await {
                    debug!("Error releasing {} on drop: {}", handle, e);
                }
            });
        }
        Err(_) => warn!("Dropped connection {} outside a runtime", handle),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandshakeError;
    use crate::sim::SimulatedMesh;
    use halo_wire::payload;

    const RELAY: &str = "aa:bb:cc:dd:ee:0c";

    fn creds() -> NetworkCredentials {
        NetworkCredentials::from_passphrase("N1", "secret")
    }

    fn relay() -> Candidate {
        Candidate {
            avid: 12,
            mesh_address: 12,
            signal_strength: -50,
            ble_address: RELAY.to_string(),
        }
    }

    fn level(avid: u32, level: u8) -> Command {
        Command::new(
            Address::Device(avid),
            Opcode::SetLevel,
            payload::level(level).to_vec(),
        )
        .unwrap()
    }

    fn config() -> SessionConfig {
        SessionConfig {
            send_timeout: Duration::from_millis(200),
            ..SessionConfig::default()
        }
    }

    async fn open(mesh: &SimulatedMesh) -> MeshSession {
        MeshSession::open(Arc::new(mesh.clone()), relay(), &creds(), config())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_send_advances_sequence() {
        let mesh = SimulatedMesh::new(creds()).with_device(RELAY, -50);
        let session = open(&mesh).await;
        assert_eq!(session.sequence(), Sequence::ZERO);

        for i in 0..3u32 {
            let ack = session.send(&level(12, 10)).await.unwrap();
            assert_eq!(ack.sequence, Sequence::new(i));
            assert_eq!(ack.source, Address::Device(12));
        }

        assert_eq!(session.sequence(), Sequence::new(3));
        let stats = session.stats();
        assert_eq!(stats.frames_sent, 3);
        assert_eq!(stats.acks_received, 3);

        let received = mesh.received();
        assert_eq!(received.len(), 3);
        assert_eq!(received[2].frame.sequence, Sequence::new(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_still_consumes_sequence() {
        let mesh = SimulatedMesh::new(creds()).with_device(RELAY, -50);
        let session = open(&mesh).await;

        mesh.drop_next_acks(1);
        let err = session.send(&level(12, 10)).await.unwrap_err();
        assert_eq!(
            err,
            SessionError::CommandTimeout {
                sequence: Sequence::ZERO,
                timeout: Duration::from_millis(200)
            }
        );
        assert_eq!(session.sequence(), Sequence::new(1));

        let ack = session.send(&level(12, 10)).await.unwrap();
        assert_eq!(ack.sequence, Sequence::new(1));
        assert_eq!(session.stats().timeouts, 1);
    }

    #[tokio::test]
    async fn test_stale_acks_are_skipped() {
        let mesh = SimulatedMesh::new(creds()).with_device(RELAY, -50);
        let session = open(&mesh).await;

        mesh.inject_stale_acks(2);
        let ack = session.send(&level(12, 1)).await.unwrap();
        assert_eq!(ack.sequence, Sequence::ZERO);
        assert!(session.stats().notifications_skipped >= 1);
    }

    #[tokio::test]
    async fn test_group_command_acknowledged_by_group() {
        let mesh = SimulatedMesh::new(creds()).with_device(RELAY, -50);
        let session = open(&mesh).await;

        let command = Command::new(
            Address::Group(200),
            Opcode::SetColorTemp,
            payload::color_temp(2700).to_vec(),
        )
        .unwrap();
        let ack = session.send(&command).await.unwrap();
        assert_eq!(ack.source, Address::Group(200));

        let received = mesh.received();
        assert_eq!(received[0].frame.opcode, Opcode::SetColorTemp);
        assert_eq!(received[0].frame.payload.as_ref(), &[0x01, 0x0A, 0x8C]);
        assert_eq!(received[0].relay, RELAY);
    }

    #[tokio::test]
    async fn test_wrong_key_fails_handshake_and_releases_connection() {
        let mesh = SimulatedMesh::new(NetworkCredentials::from_passphrase("N1", "other"))
            .with_device(RELAY, -50);

        let result =
            MeshSession::open(Arc::new(mesh.clone()), relay(), &creds(), config()).await;
        assert!(matches!(
            result,
            Err(SessionError::Handshake(HandshakeError::Rejected))
        ));
        assert_eq!(mesh.open_connections(), 0);
        assert_eq!(mesh.connect_attempts(), vec![RELAY.to_string()]);
    }

    #[tokio::test]
    async fn test_unreachable_relay() {
        let mesh = SimulatedMesh::new(creds())
            .with_device(RELAY, -50)
            .unreachable(RELAY);

        let result =
            MeshSession::open(Arc::new(mesh.clone()), relay(), &creds(), config()).await;
        assert!(matches!(result, Err(SessionError::Connect(_))));
        assert_eq!(mesh.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_rejects_sends() {
        let mesh = SimulatedMesh::new(creds()).with_device(RELAY, -50);
        let session = open(&mesh).await;
        assert_eq!(mesh.open_connections(), 1);

        session.close().await;
        session.close().await;
        assert!(session.is_closed());
        assert_eq!(mesh.open_connections(), 0);
        assert_eq!(mesh.disconnects(), 1);

        assert_eq!(session.send(&level(12, 1)).await, Err(SessionError::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_fails_in_flight_send_fast() {
        let mesh = SimulatedMesh::new(creds()).with_device(RELAY, -50);
        let session = Arc::new(
            MeshSession::open(
                Arc::new(mesh.clone()),
                relay(),
                &creds(),
                SessionConfig {
                    send_timeout: Duration::from_secs(60),
                    ..SessionConfig::default()
                },
            )
            .await
            .unwrap(),
        );

        mesh.drop_next_acks(1);
        let in_flight = {
            let session = session.clone();
            tokio::spawn(async move { session.send(&level(12, 1)).await })
        };
        let queued = {
            let session = session.clone();
            tokio::spawn(async move { session.send(&level(12, 2)).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        let started = Instant::now();
        session.close().await;

        assert_eq!(in_flight.await.unwrap(), Err(SessionError::Closed));
        assert_eq!(queued.await.unwrap(), Err(SessionError::Closed));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_drop_releases_connection() {
        let mesh = SimulatedMesh::new(creds()).with_device(RELAY, -50);
        let session = open(&mesh).await;
        assert_eq!(mesh.open_connections(), 1);

        drop(session);
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(mesh.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_sequence_wraps_while_session_is_live() {
        let mesh = SimulatedMesh::new(creds()).with_device(RELAY, -50);
        let session = open(&mesh).await.starting_at(Sequence::MAX);

        let first = session.send(&level(12, 1)).await.unwrap();
        let second = session.send(&level(12, 2)).await.unwrap();
        assert_eq!(first.sequence, Sequence::MAX);
        assert_eq!(second.sequence, Sequence::ZERO);
        assert_eq!(session.sequence(), Sequence::new(1));

        let delivered: Vec<Sequence> = mesh.received().iter().map(|r| r.frame.sequence).collect();
        assert_eq!(delivered, vec![Sequence::MAX, Sequence::ZERO]);
        assert_eq!(session.stats().acks_received, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_open_releases_connection() {
        let mesh = SimulatedMesh::new(creds())
            .with_device(RELAY, -50)
            .with_reply_delay(Duration::from_secs(3));

        let opening = {
            let mesh = mesh.clone();
            tokio::spawn(async move {
                MeshSession::open(Arc::new(mesh), relay(), &creds(), config()).await
            })
        };
        while mesh.open_connections() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        opening.abort();
        assert!(opening.await.unwrap_err().is_cancelled());
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert_eq!(mesh.open_connections(), 0);
        assert_eq!(mesh.disconnects(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_sends_are_serialized() {
        let mesh = SimulatedMesh::new(creds()).with_device(RELAY, -50);
        let session = Arc::new(open(&mesh).await);

        let mut tasks = Vec::new();
        for i in 0..8u8 {
            let session = session.clone();
            tasks.push(tokio::spawn(async move { session.send(&level(12, i)).await }));
        }

        let mut sequences = Vec::new();
        for task in tasks {
            sequences.push(task.await.unwrap().unwrap().sequence.value());
        }
        sequences.sort_unstable();
        assert_eq!(sequences, (0..8).collect::<Vec<_>>());

        let delivered: Vec<u32> = mesh
            .received()
            .iter()
            .map(|r| r.frame.sequence.value())
            .collect();
        assert_eq!(delivered, (0..8).collect::<Vec<_>>());
    }
}
