//! The runtime driver.
//!
//! One tokio task owns the [`ConnectionMachine`], the [`SessionState`], the
//! live transport handle and the presentation sink. It reacts to one input
//! at a time (user commands, transport events, reconnect timers), so no two
//! reactions ever interleave. Callers interact through a cloneable
//! [`PierHandle`].

use std::sync::Arc;

use beach_pier_core::{HistoryScope, TimestampMs};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::config::{ConfigError, PierConfig, ServerEndpoint};
use crate::connection::{
    ConnectionEvent, ConnectionId, ConnectionMachine, Effect, ReconnectPolicy, TimerId,
};
use crate::events::{Notice, PresentationSink, UpdateEvent};
use crate::identity::IdentityStore;
use crate::metrics;
use crate::outbound::{self, OutboundRequest, SendOutcome};
use crate::router;
use crate::scheduler::ReconnectScheduler;
use crate::session::{SessionSnapshot, SessionState};
use crate::transport::{
    Connector, FrameSender, TransportEvent, TransportEventKind, TransportHandle,
    WebSocketConnector,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("client runtime has stopped")]
    Stopped,
}

enum Command {
    Connect,
    Disconnect,
    Send {
        request: OutboundRequest,
        reply: oneshot::Sender<SendOutcome>,
    },
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Shutdown,
}

#[derive(Clone)]
pub struct PierHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl PierHandle {
    fn submit(&self, command: Command) -> Result<(), ClientError> {
        self.commands
            .send(command)
            .map_err(|_| ClientError::Stopped)
    }

    pub fn connect(&self) -> Result<(), ClientError> {
        self.submit(Command::Connect)
    }

    /// Idempotent; also cancels any pending automatic reconnect.
    pub fn disconnect(&self) -> Result<(), ClientError> {
        self.submit(Command::Disconnect)
    }

    pub fn shutdown(&self) -> Result<(), ClientError> {
        self.submit(Command::Shutdown)
    }

    pub async fn send(&self, request: OutboundRequest) -> Result<SendOutcome, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::Send { request, reply })?;
        rx.await.map_err(|_| ClientError::Stopped)
    }

    pub async fn send_chat(&self, content: impl Into<String>) -> Result<SendOutcome, ClientError> {
        self.send(OutboundRequest::chat(content)).await
    }

    pub async fn request_history(
        &self,
        limit: u32,
        scope: HistoryScope,
    ) -> Result<SendOutcome, ClientError> {
        self.send(OutboundRequest::History { limit, scope }).await
    }

    pub async fn request_task(&self) -> Result<SendOutcome, ClientError> {
        self.send(OutboundRequest::Task).await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::Snapshot(reply))?;
        rx.await.map_err(|_| ClientError::Stopped)
    }
}

pub struct PierClient {
    server: ServerEndpoint,
    identity: IdentityStore,
    connector: Arc<dyn Connector>,
    sink: Box<dyn PresentationSink>,
    machine: ConnectionMachine,
    session: SessionState,
    transport: Option<TransportHandle>,
    scheduler: ReconnectScheduler,
    commands: mpsc::UnboundedReceiver<Command>,
    transport_tx: mpsc::UnboundedSender<TransportEvent>,
    transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
    timers: mpsc::UnboundedReceiver<TimerId>,
    warned_ephemeral: bool,
}

impl PierClient {
    pub fn new(
        server: ServerEndpoint,
        policy: ReconnectPolicy,
        identity: IdentityStore,
        connector: Arc<dyn Connector>,
        sink: Box<dyn PresentationSink>,
    ) -> (Self, PierHandle) {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (timers_tx, timers) = mpsc::unbounded_channel();
        let client = Self {
            server,
            identity,
            connector,
            sink,
            machine: ConnectionMachine::new(policy),
            session: SessionState::new(),
            transport: None,
            scheduler: ReconnectScheduler::new(timers_tx),
            commands,
            transport_tx,
            transport_rx,
            timers,
            warned_ephemeral: false,
        };
        (
            client,
            PierHandle {
                commands: commands_tx,
            },
        )
    }

    /// Wires the WebSocket connector and the configured identity store.
    pub fn from_config(
        config: &PierConfig,
        sink: Box<dyn PresentationSink>,
    ) -> Result<(Self, PierHandle), ConfigError> {
        let identity = config.identity_store()?;
        Ok(Self::new(
            config.server.clone(),
            config.reconnect,
            identity,
            Arc::new(WebSocketConnector::new(config.connect_timeout)),
            sink,
        ))
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        info!(target: "beach_pier::runtime", server = %self.server, "client runtime started");
        loop {
            tokio::select! {
                biased;
                Some(event) = self.transport_rx.recv() => self.on_transport(event),
                Some(timer) = self.timers.recv() => {
                    self.apply(ConnectionEvent::ReconnectTimerFired(timer));
                }
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.on_command(command),
                },
            }
        }
        self.scheduler.cancel_all();
        if let Some(transport) = self.transport.take() {
            transport.close();
        }
        info!(target: "beach_pier::runtime", "client runtime stopped");
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Connect => self.apply(ConnectionEvent::ConnectRequested),
            Command::Disconnect => self.apply(ConnectionEvent::DisconnectRequested),
            Command::Send { request, reply } => {
                let outcome = self.send(&request);
                let _ = reply.send(outcome);
            }
            Command::Snapshot(reply) => {
                let snapshot = self
                    .session
                    .snapshot(self.machine.state(), self.machine.attempts());
                let _ = reply.send(snapshot);
            }
            Command::Shutdown => {}
        }
    }

    fn on_transport(&mut self, event: TransportEvent) {
        let TransportEvent { connection, kind } = event;
        match kind {
            TransportEventKind::Opened => self.apply(ConnectionEvent::TransportOpened(connection)),
            TransportEventKind::Frame(frame) => {
                if self.machine.active_connection() != Some(connection)
                    || !self.machine.state().is_connected()
                {
                    trace!(target: "beach_pier::runtime", connection = %connection, "dropping frame from inactive transport");
                    return;
                }
                let dispatch = router::dispatch(&mut self.session, frame.as_bytes());
                for event in dispatch.events {
                    self.sink.publish(event);
                }
            }
            TransportEventKind::Error(message) => {
                self.apply(ConnectionEvent::TransportError {
                    connection,
                    message,
                });
            }
            TransportEventKind::Closed { reason } => {
                debug!(target: "beach_pier::runtime", connection = %connection, reason = ?reason, "transport closed");
                if self.transport.as_ref().map(TransportHandle::connection) == Some(connection) {
                    self.transport = None;
                }
                self.apply(ConnectionEvent::TransportClosed(connection));
            }
        }
    }

    fn apply(&mut self, event: ConnectionEvent) {
        for effect in self.machine.handle(event) {
            self.perform(effect);
        }
    }

    fn perform(&mut self, effect: Effect) {
        match effect {
            Effect::OpenTransport(connection) => self.open_transport(connection),
            Effect::CloseTransport(connection) => {
                if self.transport.as_ref().map(TransportHandle::connection) == Some(connection) {
                    if let Some(transport) = self.transport.take() {
                        transport.close();
                    }
                }
            }
            Effect::ScheduleReconnect {
                timer,
                delay,
                attempt,
            } => {
                metrics::record_reconnect_scheduled();
                debug!(
                    target: "beach_pier::runtime",
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "reconnect timer armed"
                );
                self.scheduler.schedule(timer, delay);
            }
            Effect::CancelReconnect(timer) => self.scheduler.cancel(timer),
            Effect::Emit(event) => {
                if let UpdateEvent::StatusChanged(state) = &event {
                    metrics::set_connection_state(*state);
                }
                self.sink.publish(event);
            }
        }
    }

    fn open_transport(&mut self, connection: ConnectionId) {
        let resolved = self.identity.get_or_create_client_id();
        let ephemeral = resolved.is_ephemeral();
        let client_id = match (ephemeral, self.session.client_id()) {
            // Keep one ephemeral id for the whole process rather than a new
            // one per attempt.
            (true, Some(previous)) => previous.clone(),
            _ => resolved.id,
        };
        if ephemeral && !self.warned_ephemeral {
            self.warned_ephemeral = true;
            self.sink.publish(UpdateEvent::Notice(Notice::EphemeralIdentity(
                client_id.to_string(),
            )));
        }

        let url = self.server.websocket_url(&client_id);
        self.session.set_client_id(client_id);
        info!(
            target: "beach_pier::runtime",
            connection = %connection,
            url = %url,
            "opening transport"
        );
        if let Some(previous) = self.transport.take() {
            previous.close();
        }
        self.transport = Some(
            self.connector
                .open(&url, connection, self.transport_tx.clone()),
        );
    }

    fn send(&mut self, request: &OutboundRequest) -> SendOutcome {
        let sender = self.transport.as_ref().map(|t| t as &dyn FrameSender);
        let outcome = outbound::send(
            self.machine.state(),
            sender,
            &mut self.session,
            request,
            TimestampMs::now(),
        );
        if outcome.is_sent() && matches!(request, OutboundRequest::Chat { .. }) {
            self.sink
                .publish(UpdateEvent::MetricsChanged(self.session.metrics()));
        }
        outcome
    }
}
