//! # wterm Client Library
//!
//! Client side of the wterm remote terminal service: many interactive
//! shells and file-transfer sessions multiplexed over one WebSocket.
//!
//! ## Overview
//!
//! - **Connection**: owns a transport and every session on it
//! - **Session Registry**: id allocation, lifecycle and liveness counting
//! - **Dispatcher**: typed events fanned out to subscribed handlers
//! - **File-Operation Tracker**: one outstanding request per session,
//!   resolved as a future
//! - **Dialects**: the multiplexed `standard` protocol and the
//!   single-session `goTTYd` compatibility mode
//! - **Connection Manager**: explicitly owned map of live connections
//! - **HTTP Transfer**: moves download and upload contents once a file
//!   operation has produced the URL
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      ConnectionManager                        │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Connection                                                   │
//! │  ┌──────────────┐  ┌──────────────┐  ┌─────────────────────┐ │
//! │  │   Session    │  │  File-Op     │  │     Dispatcher      │ │
//! │  │   Registry   │  │  Tracker     │  │                     │ │
//! │  └──────────────┘  └──────────────┘  └─────────────────────┘ │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │            WireDialect (standard | goTTYd)             │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │              Transport (WebSocket)                     │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use client::{Connection, Dialect, EventKind, Event};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let (mut conn, mut events) = Connection::open("ws://localhost:32300/ws", Dialect::FullMultiplex)?;
//!
//!     conn.subscribe(EventKind::TermData, |event: &Event| {
//!         if let Event::TermData { data, .. } = event {
//!             print!("{}", String::from_utf8_lossy(data));
//!         }
//!         Ok(())
//!     });
//!
//!     let _shell = conn.open_shell()?;
//!     while let Some(event) = events.recv().await {
//!         conn.handle_transport_event(event);
//!         if conn.is_closed() {
//!             break;
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod dialect;
pub mod dispatcher;
pub mod logging;
pub mod manager;
pub mod profile;
pub mod registry;
pub mod tracker;
pub mod transfer;
pub mod transport;

pub use config::{ClientConfig, ConfigError};
pub use connection::Connection;
pub use dialect::{Dialect, WireDialect};
pub use dispatcher::{Dispatcher, Event, EventKind, SubscriptionId};
pub use manager::ConnectionManager;
pub use profile::SessionProfile;
pub use registry::{SessionId, SessionRecord, SessionRegistry, SessionState};
pub use tracker::{FileOperationTracker, InFlightPolicy, PendingOperation};
pub use transfer::{HttpTransfer, TransferError};
pub use transport::{Transport, TransportEvent, WebSocketTransport};
