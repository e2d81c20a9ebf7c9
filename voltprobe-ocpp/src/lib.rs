//! # Voltprobe OCPP core
//!
//! The message-exchange core of OCPP (Open Charge Point Protocol) 1.6-J:
//! envelope framing, request/response correlation, per-session transaction
//! accounting, and action dispatch, assembled into sessions over pluggable
//! duplex streams.
//!
//! ## Architecture
//!
//! ```text
//!            ┌──────────────────────────────────┐
//!            │            Session               │
//!            │  ┌─────────────┐ ┌────────────┐  │
//!  stream ◄──┼─►│ Correlation │ │ Dispatcher │  │
//!  (WS or    │  │   Table     │ │  + Ledger  │  │
//!  channel)  │  └─────────────┘ └────────────┘  │
//!            └──────────────────────────────────┘
//!                        ▲
//!                frame::OcppMessage
//!            [2,id,action,{…}] / [3,id,{…}] / [4,id,code,desc,{…}]
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use voltprobe_ocpp::{connect, Dispatcher, Session, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SessionConfig::new("CP_1");
//!     let stream = connect("ws://localhost:9000", &config.identity).await?;
//!     let (session, handle) = Session::new(&config, stream, Dispatcher::charge_point());
//!     tokio::spawn(session.run());
//!
//!     let boot = handle
//!         .call("BootNotification", serde_json::json!({
//!             "chargePointVendor": "GreenCharge",
//!             "chargePointModel": "Falcon",
//!         }))
//!         .await?;
//!     println!("registered: {}", boot["status"]);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod correlation;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod ledger;
pub mod session;
pub mod stream;
pub mod types;

pub use config::SessionConfig;
pub use correlation::{CallOutcome, CorrelationTable};
pub use dispatch::{DispatchContext, Dispatcher, HandlerError};
pub use error::OcppError;
pub use frame::{Call, CallError, CallResult, ErrorCode, MessageType, OcppMessage};
pub use ledger::{LedgerError, Transaction, TransactionLedger, TransactionState};
pub use session::{Session, SessionHandle};
pub use stream::{connect, ChannelStream, MessageStream, WsStream, OCPP_SUBPROTOCOL};
