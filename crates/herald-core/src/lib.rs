pub mod client;
pub mod credentials;
pub mod errors;
pub mod events;
pub mod ids;
pub mod reason;
pub mod state;

pub use client::{AttemptEvent, ClientConnection, ClientEvent, EventSink, ProtocolClient};
pub use credentials::Credentials;
pub use errors::{ClientError, CommandError};
pub use events::SessionEvent;
pub use ids::{AttemptId, DeliveryId, ObserverId};
pub use reason::{CloseSignal, DisconnectReason, RetryClass};
pub use state::{SessionState, SessionStatus};
