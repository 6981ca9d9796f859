//! [`TrajectoryServer`] – TCP listener for the command protocol.
//!
//! Listens on `0.0.0.0:6002` (configurable via [`TrajectoryServer::with_port`]).
//!
//! Exactly one client is served at a time.  While a session is live, further
//! connections receive [`BUSY_REPLY`] and are closed.  A client that sends
//! nothing for [`SessionSettings::idle_timeout`] is disconnected so a peer
//! that vanished without closing its socket cannot hold the server forever.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use aimotion_hal::{DroneRegistry, PartitionWriter};
use aimotion_middleware::EventBus;
use aimotion_types::AimError;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::{error, info, warn};

use crate::dispatch::Dispatcher;
use crate::install::FlightSlots;
use crate::session::{DEFAULT_IDLE_TIMEOUT, DEFAULT_RECEIVE_TIMEOUT, Session};
use crate::transmission::DEFAULT_MAX_PAYLOAD_BYTES;

/// Default TCP port for the command protocol.
pub const DEFAULT_PORT: u16 = 6002;

pub const BUSY_REPLY: &[u8] = b"Server busy: another client is connected.";

/// Per-session settings.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Drone every session controls, resolved through the registry.
    pub drone_id: String,
    pub receive_timeout: Duration,
    /// Silence allowed between commands before the client is dropped.
    pub idle_timeout: Duration,
    pub max_payload_bytes: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            drone_id: "04".to_string(),
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }
}

/// TCP server that streams commands and trajectories to one drone.
///
/// One session runs at a time.  It ends when the client closes the
/// connection, on a transport error, or after the client has been silent
/// for the configured idle timeout; the next client is accepted after that.
///
/// # Example
///
/// ```rust,no_run
/// use aimotion_hal::memory::{MemoryPartition, PartitionTable};
/// use aimotion_hal::sim::SimDrone;
/// use aimotion_hal::{DroneRegistry, PartitionWriter};
/// use aimotion_server::{FlightSlots, TrajectoryServer};
///
/// #[tokio::main]
/// async fn main() -> Result<(), aimotion_types::AimError> {
///     let mut registry = DroneRegistry::new();
///     registry.register(SimDrone::new("04"));
///     let writer = PartitionWriter::new(PartitionTable::new([
///         MemoryPartition { slot: 1, start_address: 0, max_size: 280 },
///         MemoryPartition { slot: 2, start_address: 280, max_size: 1900 },
///         MemoryPartition { slot: 3, start_address: 2180, max_size: 1900 },
///     ])?);
///     TrajectoryServer::new(registry, writer, FlightSlots::new(1, (2, 3))?)
///         .run()
///         .await
/// }
/// ```
pub struct TrajectoryServer {
    registry: DroneRegistry,
    writer: Arc<PartitionWriter>,
    flight: Arc<Mutex<FlightSlots>>,
    bus: Option<EventBus>,
    settings: SessionSettings,
    port: u16,
    sessions: Arc<Semaphore>,
}

impl TrajectoryServer {
    /// Create a server on the [`DEFAULT_PORT`] with default settings.
    pub fn new(registry: DroneRegistry, writer: PartitionWriter, flight: FlightSlots) -> Self {
        Self {
            registry,
            writer: Arc::new(writer),
            flight: Arc::new(Mutex::new(flight)),
            bus: None,
            settings: SessionSettings::default(),
            port: DEFAULT_PORT,
            sessions: Arc::new(Semaphore::new(1)),
        }
    }

    /// Override the listening port (builder-style).
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Publish flight events on `bus` (builder-style).
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Override the session settings (builder-style).
    pub fn with_settings(mut self, settings: SessionSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Bind to the configured port and serve forever.
    ///
    /// # Errors
    ///
    /// Returns [`AimError::Transport`] if the TCP listener cannot bind.
    pub async fn run(self) -> Result<(), AimError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| AimError::Transport(format!("bind error on {addr}: {e}")))?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    ///
    /// # Errors
    ///
    /// Returns [`AimError::Device`] when the configured drone is not in the
    /// registry.
    pub async fn serve(self, listener: TcpListener) -> Result<(), AimError> {
        // Fail at startup rather than on the first connection.
        self.registry.get(&self.settings.drone_id)?;

        match listener.local_addr() {
            Ok(addr) => info!(%addr, drone = %self.settings.drone_id, "trajectory server listening"),
            Err(e) => warn!(error = %e, "trajectory server listening on unknown address"),
        }

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(error = %e, "accept error");
                    continue;
                }
            };

            match Arc::clone(&self.sessions).try_acquire_owned() {
                Ok(permit) => self.spawn_session(stream, peer, permit),
                Err(_) => {
                    warn!(%peer, "rejecting client, a session is already live");
                    tokio::spawn(reject_busy(stream, peer));
                }
            }
        }
    }

    fn spawn_session(&self, stream: TcpStream, peer: SocketAddr, permit: OwnedSemaphorePermit) {
        let registry = self.registry.clone();
        let writer = Arc::clone(&self.writer);
        let flight = Arc::clone(&self.flight);
        let bus = self.bus.clone();
        let settings = self.settings.clone();

        tokio::spawn(async move {
            let _permit = permit;
            let drone = match registry.get(&settings.drone_id) {
                Ok(drone) => drone,
                Err(e) => {
                    error!(%peer, error = %e, "no drone for session");
                    return;
                }
            };

            let mut dispatcher =
                Dispatcher::new(&settings.drone_id, drone, writer, flight.lock_owned().await);
            if let Some(bus) = bus {
                dispatcher = dispatcher.with_bus(bus);
            }

            let session = Session::new(stream, peer.to_string(), dispatcher)
                .with_receive_timeout(settings.receive_timeout)
                .with_idle_timeout(settings.idle_timeout)
                .with_max_payload_bytes(settings.max_payload_bytes);
            if let Err(e) = session.run().await {
                warn!(%peer, error = %e, "session ended with error");
            }
        });
    }
}

async fn reject_busy(mut stream: TcpStream, peer: SocketAddr) {
    if let Err(e) = stream.write_all(BUSY_REPLY).await {
        warn!(%peer, error = %e, "failed to send busy reply");
    }
    let _ = stream.shutdown().await;
}
