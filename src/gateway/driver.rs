//! Connection task: the only place protocol state is touched
//!
//! Transport events, API commands and keep-alive ticks are handled one at a
//! time, in arrival order. The task hands its transport back when it ends.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, mpsc, oneshot, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::events::{EventBus, GatewayEvent};
use crate::error::{GatewayError, Result};
use crate::model::DeviceModel;
use crate::protocol::xml::Element;
use crate::session::{SessionAction, SessionMachine, SessionState};
use crate::transport::{Transport, TransportEvent};

/// Requests from the facade
#[derive(Debug)]
pub(crate) enum Command {
    SetDatapoint {
        serial: String,
        channel: String,
        datapoint: String,
        value: String,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// State shared between the driver and the facade
#[derive(Clone)]
pub(crate) struct Shared {
    pub model: Arc<RwLock<DeviceModel>>,
    pub events: Arc<EventBus>,
    pub state: Arc<watch::Sender<SessionState>>,
}

/// Whether the loop keeps running after a step
enum Flow {
    Continue,
    Stop,
}

pub(crate) struct Driver {
    machine: SessionMachine,
    transport: Box<dyn Transport>,
    transport_events: mpsc::Receiver<TransportEvent>,
    commands: mpsc::Receiver<Command>,
    shutdown: CancellationToken,
    shared: Shared,
    keep_alive_period: Duration,
    keep_alive: Option<Interval>,
    debug_protocol: bool,
    ready: Option<oneshot::Sender<Result<()>>>,
}

impl Driver {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        machine: SessionMachine,
        transport: Box<dyn Transport>,
        transport_events: mpsc::Receiver<TransportEvent>,
        commands: mpsc::Receiver<Command>,
        shutdown: CancellationToken,
        shared: Shared,
        keep_alive_period: Duration,
        debug_protocol: bool,
        ready: oneshot::Sender<Result<()>>,
    ) -> Self {
        Self {
            machine,
            transport,
            transport_events,
            commands,
            shutdown,
            shared,
            keep_alive_period,
            keep_alive: None,
            debug_protocol,
            ready: Some(ready),
        }
    }

    /// Run until shutdown, a fatal error or the transport going away
    pub(crate) async fn run(mut self) -> Box<dyn Transport> {
        let shutdown = self.shutdown.clone();

        loop {
            let flow = tokio::select! {
                () = shutdown.cancelled() => {
                    tracing::debug!("Driver shutdown requested");
                    self.close(GatewayError::Disconnected).await;
                    Flow::Stop
                }
                event = self.transport_events.recv() => {
                    self.on_transport_event(event.unwrap_or(TransportEvent::Offline)).await
                }
                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => {
                        tracing::debug!("Gateway dropped, closing connection");
                        self.close(GatewayError::Disconnected).await;
                        Flow::Stop
                    }
                },
                () = tick(&mut self.keep_alive) => self.on_keep_alive().await,
            };

            self.publish_state();
            if matches!(flow, Flow::Stop) {
                break;
            }
        }

        self.transport
    }

    async fn on_transport_event(&mut self, event: TransportEvent) -> Flow {
        let offline = matches!(event, TransportEvent::Offline);
        if self.debug_protocol {
            if let TransportEvent::Stanza(stanza) = &event {
                tracing::debug!("RECV {}", stanza);
            }
        }

        match self.machine.handle_event(event) {
            Ok(actions) => {
                if let Err(err) = self.execute(actions).await {
                    return self.fail(err).await;
                }
                if offline {
                    self.shared
                        .events
                        .emit(GatewayEvent::from_error(&GatewayError::Disconnected));
                    self.stop_transport().await;
                    self.signal_ready(Err(GatewayError::Disconnected));
                    return Flow::Stop;
                }
                Flow::Continue
            }
            Err(err) if !err.is_fatal() => {
                tracing::warn!("Dropped message: {}", err);
                self.shared.events.emit(GatewayEvent::from_error(&err));
                Flow::Continue
            }
            Err(err) => self.fail(err).await,
        }
    }

    async fn on_command(&mut self, command: Command) -> Flow {
        match command {
            Command::SetDatapoint {
                serial,
                channel,
                datapoint,
                value,
                reply,
            } => {
                let stanza =
                    match self
                        .machine
                        .set_datapoint_stanza(&serial, &channel, &datapoint, &value)
                    {
                        Ok(stanza) => stanza,
                        Err(err) => {
                            let _ = reply.send(Err(err));
                            return Flow::Continue;
                        }
                    };

                tracing::info!("Setting {}/{}/{} to {}", serial, channel, datapoint, value);
                match self.send(stanza).await {
                    Ok(()) => {
                        let _ = reply.send(Ok(()));
                        Flow::Continue
                    }
                    Err(err) => {
                        let _ = reply.send(Err(GatewayError::transport(err.to_string())));
                        self.fail(err).await
                    }
                }
            }
        }
    }

    async fn on_keep_alive(&mut self) -> Flow {
        let Some(ping) = self.machine.keep_alive_stanza() else {
            return Flow::Continue;
        };
        tracing::trace!("Sending keep-alive");
        match self.send(ping).await {
            Ok(()) => Flow::Continue,
            Err(err) => self.fail(err).await,
        }
    }

    async fn execute(&mut self, actions: Vec<SessionAction>) -> Result<()> {
        for action in actions {
            match action {
                SessionAction::Send(stanza) => self.send(stanza).await?,
                SessionAction::StartKeepAlive => {
                    let mut interval = tokio::time::interval_at(
                        Instant::now() + self.keep_alive_period,
                        self.keep_alive_period,
                    );
                    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    self.keep_alive = Some(interval);
                }
                SessionAction::StopKeepAlive => self.keep_alive = None,
                SessionAction::ReplaceTree(tree) => {
                    tracing::info!(
                        "Snapshot holds {} devices, {} datapoints",
                        tree.devices.len(),
                        tree.datapoint_count()
                    );
                    self.shared.model.write().await.replace(tree);
                    self.signal_ready(Ok(()));
                }
                SessionAction::MergeUpdate(update) => {
                    self.shared.model.write().await.merge(&update);
                    self.shared.events.emit(GatewayEvent::Update(update));
                }
                SessionAction::Subscribed => {
                    let jid = self.machine.connected_as().unwrap_or_default().to_string();
                    self.shared.events.emit(GatewayEvent::Subscribed { jid });
                }
                SessionAction::Dropped(err) => {
                    self.shared.events.emit(GatewayEvent::from_error(&err));
                }
            }
        }
        Ok(())
    }

    async fn send(&mut self, stanza: Element) -> Result<()> {
        if self.debug_protocol {
            tracing::debug!("SEND {}", stanza);
        }
        self.transport.send(stanza).await
    }

    /// Fatal error: tear the connection down and report
    async fn fail(&mut self, err: GatewayError) -> Flow {
        tracing::error!("Connection failed: {}", err);
        self.shared.events.emit(GatewayEvent::Error {
            message: err.to_string(),
            fatal: true,
        });
        self.close(err).await;
        Flow::Stop
    }

    async fn close(&mut self, reason: GatewayError) {
        let actions = self.machine.teardown();
        // Teardown only ever asks to stop the timer
        if let Err(err) = self.execute(actions).await {
            tracing::warn!("Teardown action failed: {}", err);
        }
        self.keep_alive = None;
        self.stop_transport().await;
        self.signal_ready(Err(reason));
    }

    async fn stop_transport(&mut self) {
        if let Err(err) = self.transport.stop().await {
            tracing::warn!("Transport did not stop cleanly: {}", err);
        }
    }

    fn signal_ready(&mut self, result: Result<()>) {
        if let Some(ready) = self.ready.take() {
            let _ = ready.send(result);
        }
    }

    fn publish_state(&self) {
        let state = self.machine.state();
        self.shared.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
