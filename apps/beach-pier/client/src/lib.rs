//! Realtime chat client for a horizontally scaled chat backend.
//!
//! The client keeps one WebSocket open to `/ws/<client_id>`, reconnects with
//! bounded linear backoff when the server goes away, and notices when the
//! load balancer hands it to a different backend instance. Connection
//! lifecycle lives in the pure [`connection`] state machine; the [`runtime`]
//! driver performs its effects and feeds inbound frames through the
//! [`router`].

pub mod config;
pub mod connection;
pub mod events;
pub mod identity;
pub mod metrics;
pub mod outbound;
pub mod router;
pub mod runtime;
pub mod scheduler;
pub mod session;
pub mod status;
pub mod telemetry;
pub mod transport;

pub use config::{ConfigError, PierConfig, ServerEndpoint};
pub use connection::{
    ConnectingFailurePolicy, ConnectionEvent, ConnectionId, ConnectionMachine, ConnectionState,
    Effect, ReconnectPolicy, TimerId,
};
pub use events::{ChannelSink, Notice, PresentationSink, UpdateEvent};
pub use identity::{
    ClientIdentity, FileStore, IdentitySource, IdentityStore, KeyValueStore, MemoryStore,
    ResolvedIdentity, StoreError,
};
pub use outbound::{OutboundRequest, RejectReason, SendOutcome};
pub use runtime::{ClientError, PierClient, PierHandle};
pub use session::{
    ChatMessageRecord, SessionMetrics, SessionSnapshot, SessionState, TaskRecord, TaskStatus,
};
pub use status::{StatusClient, StatusError};
pub use transport::{Connector, TransportError, TransportHandle, WebSocketConnector};
