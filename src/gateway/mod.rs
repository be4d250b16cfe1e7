//! Public entry point: connect, query and control the access point

mod driver;
mod events;


pub use events::{EventBus, GatewayEvent, event_stream};

use std::sync::Arc;

use futures::Stream;
use tokio::sync::{Mutex, RwLock, broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use self::driver::{Command, Driver, Shared};
use crate::error::{GatewayError, Result};
use crate::model::{DeviceModel, Snapshot, SnapshotQuery};
use crate::protocol::crypto::CryptoEngine;
use crate::session::{SessionMachine, SessionState};
use crate::transport::{SettingsSource, Transport, TransportParams};
use crate::types::GatewayConfig;

/// Transport events buffered before the transport has to wait
const TRANSPORT_QUEUE: usize = 64;
/// Outstanding API commands
const COMMAND_QUEUE: usize = 16;

struct Connection {
    commands: mpsc::Sender<Command>,
    shutdown: CancellationToken,
    task: JoinHandle<Box<dyn Transport>>,
}

/// Gateway to one System Access Point
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
///
/// use sysap::testing::{MockSettingsSource, MockTransport, TEST_PASSWORD, TEST_USER, test_access_point};
/// use sysap::{Gateway, GatewayConfig};
///
/// # async fn example() -> Result<(), sysap::GatewayError> {
/// let access_point = test_access_point();
/// let settings = MockSettingsSource::for_access_point(&access_point);
/// let (transport, _handle) = MockTransport::new(access_point);
///
/// let config = GatewayConfig::builder()
///     .hostname("sysap.local")
///     .username(TEST_USER)
///     .password(TEST_PASSWORD)
///     .build();
/// let gateway = Gateway::new(config, Box::new(transport), Arc::new(settings));
///
/// gateway.connect().await?;
/// let _tree = gateway.snapshot(None, None, None).await?;
/// gateway.set_datapoint("001", "ch0000", "idp0000", "0").await?;
/// gateway.disconnect().await?;
/// # Ok(())
/// # }
/// ```
pub struct Gateway {
    config: GatewayConfig,
    settings_source: Arc<dyn SettingsSource>,
    /// Parked while no connection task owns it
    transport: Mutex<Option<Box<dyn Transport>>>,
    connection: Mutex<Option<Connection>>,
    model: Arc<RwLock<DeviceModel>>,
    events: Arc<EventBus>,
    state_tx: Arc<watch::Sender<SessionState>>,
    state_rx: watch::Receiver<SessionState>,
}

impl Gateway {
    /// Create a gateway; nothing happens until [`connect`](Self::connect)
    #[must_use]
    pub fn new(
        config: GatewayConfig,
        transport: Box<dyn Transport>,
        settings_source: Arc<dyn SettingsSource>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);
        Self {
            config,
            settings_source,
            transport: Mutex::new(Some(transport)),
            connection: Mutex::new(None),
            model: Arc::new(RwLock::new(DeviceModel::new())),
            events: Arc::new(EventBus::new()),
            state_tx: Arc::new(state_tx),
            state_rx,
        }
    }

    /// Configuration in use
    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    // === Connection ===

    /// Run the full handshake and load master data
    ///
    /// Returns once the device snapshot is available.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration or settings are unusable, a
    /// handshake step fails, the transport cannot start, or the handshake
    /// takes longer than the configured timeout
    pub async fn connect(&self) -> Result<()> {
        let mut connection = self.connection.lock().await;
        if let Some(existing) = connection.take() {
            if existing.task.is_finished() {
                self.reclaim(existing).await?;
            } else {
                *connection = Some(existing);
                return Err(GatewayError::InvalidState {
                    message: "already connected".into(),
                    current_state: self.state().to_string(),
                });
            }
        }

        self.config.validate()?;
        tracing::info!("Connecting to access point at {}", self.config.hostname);

        let settings = self
            .settings_source
            .fetch_settings(&self.config.hostname)
            .await?;
        settings.check_firmware()?;
        let user = settings.select_user(&self.config.username)?;
        let (salt, iterations) = user.scram_parameters()?;
        tracing::debug!(
            "Firmware {}, user {} ({} iterations)",
            settings.flags.version,
            user.jid,
            iterations
        );

        let engine = CryptoEngine::new(&self.config.password, salt, iterations);
        let machine = SessionMachine::new(engine, user, settings.uses_legacy_caps());
        let params = TransportParams::new(
            &self.config.hostname,
            user.transport_username(),
            &self.config.password,
        );

        let mut transport = self.transport.lock().await.take().ok_or_else(|| {
            GatewayError::Internal {
                message: "transport is not available".into(),
            }
        })?;
        self.model.write().await.clear();

        let (event_tx, event_rx) = mpsc::channel(TRANSPORT_QUEUE);
        if let Err(err) = transport.start(params, event_tx).await {
            tracing::error!("Transport failed to start: {}", err);
            *self.transport.lock().await = Some(transport);
            return Err(err);
        }

        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let (ready_tx, ready_rx) = oneshot::channel();
        let shutdown = CancellationToken::new();
        let driver = Driver::new(
            machine,
            transport,
            event_rx,
            command_rx,
            shutdown.clone(),
            self.shared(),
            self.config.keep_alive_interval,
            self.config.debug_protocol,
            ready_tx,
        );
        let established = Connection {
            commands: command_tx,
            shutdown,
            task: tokio::spawn(driver.run()),
        };

        let timeout = self.config.handshake_timeout;
        let outcome = match tokio::time::timeout(timeout, ready_rx).await {
            Ok(Ok(result)) => result,
            // Driver ended without reporting
            Ok(Err(_)) => Err(GatewayError::Disconnected),
            Err(_) => Err(GatewayError::ConnectionTimeout { duration: timeout }),
        };

        match outcome {
            Ok(()) => {
                tracing::info!("Connected to {}", self.config.hostname);
                *connection = Some(established);
                Ok(())
            }
            Err(err) => {
                tracing::error!("Connection attempt failed: {}", err);
                self.reclaim(established).await?;
                Err(err)
            }
        }
    }

    /// Tear the connection down and wait for the driver to finish
    ///
    /// Disconnecting while not connected is a no-op.
    ///
    /// # Errors
    ///
    /// Returns error if the connection task panicked
    pub async fn disconnect(&self) -> Result<()> {
        let Some(connection) = self.connection.lock().await.take() else {
            return Ok(());
        };
        tracing::info!("Disconnecting from {}", self.config.hostname);
        self.reclaim(connection).await?;
        self.model.write().await.clear();
        Ok(())
    }

    /// Stop the driver and park its transport for the next connect
    async fn reclaim(&self, connection: Connection) -> Result<()> {
        connection.shutdown.cancel();
        let transport = connection
            .task
            .await
            .map_err(|e| GatewayError::Internal {
                message: format!("connection task failed: {e}"),
            })?;
        *self.transport.lock().await = Some(transport);
        self.state_tx.send_replace(SessionState::Disconnected);
        Ok(())
    }

    /// True while a driver is running
    pub async fn is_connected(&self) -> bool {
        self.connection
            .lock()
            .await
            .as_ref()
            .is_some_and(|c| !c.task.is_finished())
    }

    // === Commands ===

    /// Write `value` to one datapoint
    ///
    /// The new value shows up in the snapshot once the access point
    /// publishes the matching update.
    ///
    /// # Errors
    ///
    /// Returns error if not connected or the request cannot be sent
    pub async fn set_datapoint(
        &self,
        serial: &str,
        channel: &str,
        datapoint: &str,
        value: &str,
    ) -> Result<()> {
        let commands = self
            .connection
            .lock()
            .await
            .as_ref()
            .map(|c| c.commands.clone())
            .ok_or_else(|| self.not_connected())?;

        let (reply, response) = oneshot::channel();
        commands
            .send(Command::SetDatapoint {
                serial: serial.to_string(),
                channel: channel.to_string(),
                datapoint: datapoint.to_string(),
                value: value.to_string(),
                reply,
            })
            .await
            .map_err(|_| GatewayError::Disconnected)?;
        response.await.map_err(|_| GatewayError::Disconnected)?
    }

    // === Queries ===

    /// Whole tree, one device, one channel or one datapoint value
    ///
    /// # Errors
    ///
    /// Returns a lookup error before master data arrived, for a segment
    /// given without its parent, or for an unknown path
    pub async fn snapshot(
        &self,
        serial: Option<&str>,
        channel: Option<&str>,
        datapoint: Option<&str>,
    ) -> Result<Snapshot> {
        let query = SnapshotQuery::from_parts(serial, channel, datapoint)?;
        Ok(self.model.read().await.query(&query)?)
    }

    /// Current session state
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    /// Watch session state changes
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    // === Events ===

    /// Subscribe to gateway events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.events.subscribe()
    }

    /// Gateway events as a stream
    pub fn events(&self) -> impl Stream<Item = GatewayEvent> {
        event_stream(self.events.subscribe())
    }

    fn shared(&self) -> Shared {
        Shared {
            model: self.model.clone(),
            events: self.events.clone(),
            state: self.state_tx.clone(),
        }
    }

    fn not_connected(&self) -> GatewayError {
        GatewayError::InvalidState {
            message: "not connected".into(),
            current_state: self.state().to_string(),
        }
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        if let Ok(connection) = self.connection.try_lock() {
            if let Some(connection) = connection.as_ref() {
                connection.shutdown.cancel();
            }
        }
    }
}
