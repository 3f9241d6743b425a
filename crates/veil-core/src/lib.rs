//! Veil Core
//!
//! Core types, errors, configuration and constants shared by the Veil
//! stores and server.
//!
//! Veil is an interaction service with two bounded-lifetime resources:
//! claimable hidden-result sessions (disclosed at most once, then gone)
//! and recurring scheduled timers (capped by occurrences and lifetime).
//! This crate carries everything both halves need:
//!
//! - Explicit limits with units in the name (e.g. `SESSION_TTL_SECONDS_DEFAULT`)
//! - A single error taxonomy that distinguishes "expired or never existed"
//!   from "the backend is down"
//! - A `Clock` abstraction so nothing in business logic reads the system
//!   clock directly

pub mod clock;
pub mod config;
pub mod constants;
pub mod error;

pub use clock::{Clock, TestClock, WallClock};
pub use config::{BackendKind, VeilConfig};
pub use constants::*;
pub use error::{Error, Result};
