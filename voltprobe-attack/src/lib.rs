//! # Voltprobe attack toolkit
//!
//! Offensive exercises built on the voltprobe OCPP core, for assessing
//! charging infrastructure you are authorized to test:
//!
//! - [`relay`]: a transparent WebSocket relay between charge point and
//!   central system that applies a [`transform::Transform`] to every
//!   message it forwards
//! - [`transform`]: pluggable message rewrites, including the classic
//!   inflated-meter-reading tamper
//! - [`flood`]: many concurrent spoofed charge point sessions held open
//!   with heartbeats
//! - [`spoof`]: one-shot hand-built calls injected outside any session

pub mod flood;
pub mod relay;
pub mod spoof;
pub mod transform;

pub use flood::{flood, FloodConfig, FloodReport, SessionOutcome};
pub use relay::{serve, LinkState, RelayLink, RelayReport};
pub use transform::{Direction, EndpointRewrite, Identity, MeterInflator, Transform, TransformError};
