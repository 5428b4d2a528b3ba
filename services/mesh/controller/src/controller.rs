//! Mesh controller: the public surface for driving one HALO Home network.
//!
//! The controller owns the network state (topology snapshot and key), at most
//! one live relay session, and the command turn that orders concurrent
//! callers. Connecting is lazy: the first command scans, picks the strongest
//! relay that accepts the handshake, and keeps that session for later
//! commands until it fails or the controller is closed.

use bytes::Bytes;
use futures::StreamExt;
use halo_cloud::{fetch_topology, AccountCredentials, CloudApi};
use halo_session::{
    dedupe, from_advertisements, select, Ack, Advertisement, BleTransport, Candidate,
    MeshSession, SessionConfig,
};
use halo_storage::TopologyCache;
use halo_topology::TopologySnapshot;
use halo_wire::{payload, Address, Command, NetworkCredentials, Opcode};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::MeshError;

/// Configuration for the mesh controller
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Network to drive; the account's first network (or first cached one)
    /// when unset
    pub network_id: Option<String>,
    /// How long each relay scan listens
    pub scan_duration: Duration,
    /// Per-session timeouts
    pub session: SessionConfig,
    /// Reconnect-and-resend attempts after a timeout or transport failure
    pub command_retries: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            network_id: None,
            scan_duration: Duration::from_secs(5),
            session: SessionConfig::default(),
            command_retries: 1,
        }
    }
}

/// Connection state of the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkState {
    /// No relay connection
    Disconnected,
    /// Scanning and handshaking with a relay
    Connecting,
    /// Session open with a relay
    Connected,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Disconnected => write!(f, "disconnected"),
            LinkState::Connecting => write!(f, "connecting"),
            LinkState::Connected => write!(f, "connected"),
        }
    }
}

/// Controller for one HALO Home mesh network
pub struct MeshController {
    transport: Arc<dyn BleTransport>,
    cloud: Arc<dyn CloudApi>,
    cache: Arc<dyn TopologyCache>,
    config: ControllerConfig,
    account: Option<AccountCredentials>,
    credentials: Option<NetworkCredentials>,
    /// Loaded snapshot; also serializes cache and cloud loads
    topology: tokio::sync::Mutex<Option<Arc<TopologySnapshot>>>,
    /// FIFO command turn
    turn: tokio::sync::Mutex<()>,
    session: Mutex<Option<Arc<MeshSession>>>,
    state: watch::Sender<LinkState>,
    cancel: CancellationToken,
}

impl MeshController {
    /// Create a new mesh controller
    pub fn new(
        transport: Arc<dyn BleTransport>,
        cloud: Arc<dyn CloudApi>,
        cache: Arc<dyn TopologyCache>,
        config: ControllerConfig,
    ) -> Self {
        let (state, _) = watch::channel(LinkState::Disconnected);

        Self {
            transport,
            cloud,
            cache,
            config,
            account: None,
            credentials: None,
            topology: tokio::sync::Mutex::new(None),
            turn: tokio::sync::Mutex::new(()),
            session: Mutex::new(None),
            state,
            cancel: CancellationToken::new(),
        }
    }

    /// Account used for cloud fetches
    pub fn with_account(mut self, account: AccountCredentials) -> Self {
        self.account = Some(account);
        self
    }

    /// Network key to use instead of the one in the topology snapshot
    pub fn with_credentials(mut self, credentials: NetworkCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Controller configuration
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Current connection state
    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    /// Watch connection state changes
    pub fn subscribe_state(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Relay of the live session, if any
    pub fn relay(&self) -> Option<Candidate> {
        self.current_session().map(|s| s.relay().clone())
    }

    /// Send a command and wait for the mesh to acknowledge it.
    ///
    /// `destination` carries user-facing avids; devices are translated to
    /// their mesh number here. A destination missing from the snapshot
    /// triggers one refresh before failing.
    pub async fn send_command(
        &self,
        destination: Address,
        opcode: Opcode,
        payload: impl Into<Bytes>,
    ) -> Result<Ack, MeshError> {
        self.check_open()?;

        let topology = self.topology().await?;
        let (topology, wire_address) = self.resolve(topology, destination).await?;
        let command = Command::new(wire_address, opcode, payload)?;

        let _turn = self.until_closed(self.turn.lock()).await?;
        let mut retries_left = self.config.command_retries;

        loop {
            self.check_open()?;
            let session = self.ensure_session(&topology).await?;

            match session.send(&command).await {
                Ok(ack) => {
                    debug!(
                        "{:?} to {} acknowledged by {} (seq={})",
                        opcode, destination, ack.source, ack.sequence
                    );
                    return Ok(ack);
                }
                Err(e) if e.is_retryable() => {
                    self.teardown().await;
                    self.check_open()?;
                    if retries_left == 0 {
                        warn!("{:?} to {} failed: {}", opcode, destination, e);
                        return Err(e.into());
                    }
                    retries_left -= 1;
                    warn!(
                        "{:?} to {} failed via relay {} ({}), reconnecting",
                        opcode,
                        destination,
                        session.relay().avid,
                        e
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Set brightness (0 is off)
    pub async fn set_level(&self, destination: Address, level: u8) -> Result<Ack, MeshError> {
        self.send_command(destination, Opcode::SetLevel, payload::level(level).to_vec())
            .await
    }

    /// Set color temperature in kelvin
    pub async fn set_color_temp(
        &self,
        destination: Address,
        kelvin: u16,
    ) -> Result<Ack, MeshError> {
        self.send_command(
            destination,
            Opcode::SetColorTemp,
            payload::color_temp(kelvin).to_vec(),
        )
        .await
    }

    /// Scan for relays of the current network, strongest first.
    ///
    /// Radios that cannot scan while connected lose their session first.
    pub async fn discover(&self) -> Result<Vec<Candidate>, MeshError> {
        self.check_open()?;
        let topology = self.topology().await?;

        if self.transport.supports_concurrent_scan() {
            return self.scan(&topology).await;
        }

        let _turn = self.until_closed(self.turn.lock()).await?;
        self.teardown().await;
        self.until_closed(self.scan(&topology)).await?
    }

    /// Current network snapshot, loading it from the cache or the cloud on
    /// first use
    pub async fn topology(&self) -> Result<Arc<TopologySnapshot>, MeshError> {
        self.check_open()?;
        let mut slot = self.topology.lock().await;
        if let Some(topology) = slot.as_ref() {
            return Ok(topology.clone());
        }

        let snapshot = match self.load_cached().await {
            Some(snapshot) => {
                info!(
                    "Using cached topology for network {} ({} devices, {} groups)",
                    snapshot.network_id,
                    snapshot.devices.len(),
                    snapshot.groups.len()
                );
                snapshot
            }
            None => {
                let snapshot = Arc::new(self.fetch_from_cloud(self.config.network_id.as_deref()).await?);
                self.save_to_cache(&snapshot).await;
                snapshot
            }
        };

        *slot = Some(snapshot.clone());
        Ok(snapshot)
    }

    /// Fetch the network from the cloud, replacing the cached snapshot.
    ///
    /// Falls back to the snapshot already held when the cloud cannot be
    /// reached. A changed network key drops the live session.
    pub async fn refresh(&self) -> Result<Arc<TopologySnapshot>, MeshError> {
        self.check_open()?;
        let mut slot = self.topology.lock().await;
        let previous = slot.clone();
        let network_id = self
            .config
            .network_id
            .clone()
            .or_else(|| previous.as_ref().map(|t| t.network_id.clone()));

        match self.fetch_from_cloud(network_id.as_deref()).await {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                self.save_to_cache(&snapshot).await;

                let key_changed = previous
                    .as_ref()
                    .is_some_and(|p| p.network_key != snapshot.network_key);
                *slot = Some(snapshot.clone());
                drop(slot);

                if key_changed {
                    info!(
                        "Network key for {} changed, dropping session",
                        snapshot.network_id
                    );
                    let _turn = self.until_closed(self.turn.lock()).await?;
                    self.teardown().await;
                }
                Ok(snapshot)
            }
            Err(e) => {
                if let Some(previous) = previous {
                    warn!(
                        "Refresh failed ({}), keeping topology for network {}",
                        e, previous.network_id
                    );
                    return Ok(previous);
                }
                match self.load_cached().await {
                    Some(cached) => {
                        warn!(
                            "Refresh failed ({}), using cached topology for network {}",
                            e, cached.network_id
                        );
                        *slot = Some(cached.clone());
                        Ok(cached)
                    }
                    None => Err(e),
                }
            }
        }
    }

    /// Shut the controller down.
    ///
    /// In-flight and queued commands fail with [`MeshError::Closed`], as does
    /// every later call. Idempotent.
    pub async fn close(&self) {
        let first = !self.cancel.is_cancelled();
        self.cancel.cancel();
        self.teardown().await;
        if first {
            info!("Mesh controller closed");
        }
    }

    fn check_open(&self) -> Result<(), MeshError> {
        if self.cancel.is_cancelled() {
            Err(MeshError::Closed)
        } else {
            Ok(())
        }
    }

    async fn until_closed<F: Future>(&self, fut: F) -> Result<F::Output, MeshError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(MeshError::Closed),
            out = fut => Ok(out),
        }
    }

    fn set_state(&self, next: LinkState) {
        self.state.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            debug!("Link state {} -> {}", state, next);
            *state = next;
            true
        });
    }

    fn current_session(&self) -> Option<Arc<MeshSession>> {
        self.session.lock().expect("session lock poisoned").clone()
    }

    fn network_credentials(&self, topology: &TopologySnapshot) -> NetworkCredentials {
        match &self.credentials {
            Some(credentials) => credentials.clone(),
            None => topology.credentials(),
        }
    }

    async fn resolve(
        &self,
        topology: Arc<TopologySnapshot>,
        destination: Address,
    ) -> Result<(Arc<TopologySnapshot>, Address), MeshError> {
        if let Ok(address) = topology.resolve(destination) {
            return Ok((topology, address));
        }

        info!(
            "{} not in network {}, refreshing topology",
            destination, topology.network_id
        );
        let refreshed = self.refresh().await?;
        let address = refreshed
            .resolve(destination)
            .map_err(|_| MeshError::UnknownDestination(destination))?;
        Ok((refreshed, address))
    }

    async fn load_cached(&self) -> Option<Arc<TopologySnapshot>> {
        let network_id = match &self.config.network_id {
            Some(id) => id.clone(),
            None => match self.cache.cached_networks().await {
                Ok(mut ids) => {
                    ids.sort();
                    ids.into_iter().next()?
                }
                Err(e) => {
                    warn!("Failed to list cached networks: {}", e);
                    return None;
                }
            },
        };

        match self.cache.load_topology(&network_id).await {
            Ok(snapshot) => snapshot.map(Arc::new),
            Err(e) => {
                warn!("Ignoring unreadable cache for network {}: {}", network_id, e);
                None
            }
        }
    }

    async fn save_to_cache(&self, snapshot: &TopologySnapshot) {
        if let Err(e) = self
            .cache
            .save_topology(&snapshot.network_id, snapshot)
            .await
        {
            warn!(
                "Failed to cache topology for network {}: {}",
                snapshot.network_id, e
            );
        }
    }

    async fn fetch_from_cloud(&self, network_id: Option<&str>) -> Result<TopologySnapshot, MeshError> {
        let account = self.account.as_ref().ok_or_else(|| {
            MeshError::ApiUnavailable("no HALO Home account configured".to_string())
        })?;

        fetch_topology(self.cloud.as_ref(), account, network_id)
            .await
            .map_err(|e| {
                warn!("HALO Home cloud fetch failed: {}", e);
                MeshError::ApiUnavailable(e.to_string())
            })
    }

    async fn scan(&self, topology: &TopologySnapshot) -> Result<Vec<Candidate>, MeshError> {
        let advertisements: Vec<Advertisement> = self
            .transport
            .scan(self.config.scan_duration)
            .await
            .map_err(MeshError::Transport)?
            .collect()
            .await;

        let candidates = select(dedupe(from_advertisements(&advertisements, topology)));
        debug!(
            "Scan heard {} advertisers, {} relay candidates in network {}",
            advertisements.len(),
            candidates.len(),
            topology.network_id
        );
        Ok(candidates)
    }

    /// Return the live session, opening one if needed. Caller holds the turn.
    async fn ensure_session(
        &self,
        topology: &TopologySnapshot,
    ) -> Result<Arc<MeshSession>, MeshError> {
        if let Some(session) = self.current_session() {
            if !session.is_closed() {
                return Ok(session);
            }
            self.teardown().await;
        }

        self.set_state(LinkState::Connecting);
        let result = self.connect(topology).await;
        match &result {
            Ok(_) => self.set_state(LinkState::Connected),
            Err(_) => self.set_state(LinkState::Disconnected),
        }
        result
    }

    async fn connect(&self, topology: &TopologySnapshot) -> Result<Arc<MeshSession>, MeshError> {
        let candidates = self.until_closed(self.scan(topology)).await??;
        if candidates.is_empty() {
            return Err(MeshError::NoRelayAvailable(format!(
                "no device of network {} in range",
                topology.network_id
            )));
        }

        let credentials = self.network_credentials(topology);
        let mut failures = Vec::new();

        for relay in candidates {
            let avid = relay.avid;
            let opened = self
                .until_closed(MeshSession::open(
                    self.transport.clone(),
                    relay,
                    &credentials,
                    self.config.session.clone(),
                ))
                .await?;

            match opened {
                Ok(session) => {
                    let session = Arc::new(session);
                    *self.session.lock().expect("session lock poisoned") = Some(session.clone());
                    if self.cancel.is_cancelled() {
                        self.teardown().await;
                        return Err(MeshError::Closed);
                    }
                    return Ok(session);
                }
                Err(e) if e.is_retryable() => {
                    warn!("Relay {} unusable: {}", avid, e);
                    failures.push(format!("relay {}: {}", avid, e));
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(MeshError::NoRelayAvailable(failures.join("; ")))
    }

    async fn teardown(&self) {
        let session = self.session.lock().expect("session lock poisoned").take();
        if let Some(session) = session {
            session.close().await;
        }
        self.set_state(LinkState::Disconnected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ControllerConfig::default();
        assert_eq!(config.command_retries, 1);
        assert!(config.network_id.is_none());
        assert_eq!(config.session.send_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_link_state_display() {
        assert_eq!(LinkState::Connecting.to_string(), "connecting");
        assert_eq!(LinkState::Disconnected.to_string(), "disconnected");
    }
}
