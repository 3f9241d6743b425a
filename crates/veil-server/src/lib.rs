//! Veil Server
//!
//! Transport-agnostic interaction dispatch. Every inbound request moves
//! through the same state machine:
//!
//! ```text
//! received -> authenticated (HTTP only) -> classified -> acknowledged
//!          -> processing -> completed
//! ```
//!
//! Classification and acknowledgment happen before any blocking work so
//! the platform's 3-second deadline is satisfied structurally, not by
//! racing the clock. Two transports feed the same dispatcher: a
//! persistent gateway connection delivering raw event frames, and a
//! one-shot HTTP endpoint whose synchronous response *is* the
//! acknowledgment.

pub mod auth;
pub mod context;
pub mod delivery;
pub mod dispatch;
pub mod gateway;
pub mod http;
pub mod model;

pub use context::InteractionContext;
pub use delivery::{DeliveryClient, RecordingDelivery, RestDelivery};
pub use dispatch::{CommitOutcome, Dispatcher, EchoPayload, PayloadSource};
pub use gateway::{GatewaySink, GatewayTransport};
pub use http::{router, AppState};
pub use model::{classify, parse, AckShape, Action, Command, Interaction};
