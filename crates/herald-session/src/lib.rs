//! Session lifecycle: the connection controller, its reconnection policy,
//! observer fan-out and the command gateway in front of it.

pub mod backoff;
pub mod controller;
pub mod errors;
pub mod gateway;
pub mod hub;
pub mod mock;
pub mod sidecar;

pub use backoff::ReconnectPolicy;
pub use controller::{SessionController, Snapshot};
pub use errors::ControllerError;
pub use gateway::{BulkOutcome, CommandGateway, GatewayLimits, SendReceipt};
pub use hub::{EventHub, Subscription};
pub use mock::{MockClient, MockConnect};
pub use sidecar::{SidecarClient, SidecarConfig, SidecarConnection};
