//! WebSocket connection handling on top of `wirebridge-codec`.
//!
//! This crate runs the protocol over any Tokio byte stream: it answers the
//! opening handshake, replies to pings, runs the close handshake, keeps idle
//! connections alive, and hands application data frames to the caller.
//!
//! # Features
//!
//! - **Interceptor** state machine deciding how each frame is answered
//! - **Resequencing** so replies leave in the order requests arrived
//! - **Connection registry** with a global connection limit and graceful shutdown
//! - **Idle pinger** that pings connections with no recent writes
//! - **Lifecycle events** on a broadcast channel
//! - **Layered configuration** from TOML, JSON and environment variables
//!
//! # Example
//!
//! ```no_run
//! use wirebridge_ws::{ConfigLoader, Endpoint, init_logging};
//!
//! # async fn run(stream: tokio::net::TcpStream) -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::new()
//!     .with_optional_file("wirebridge.toml")?
//!     .with_env_prefix("WIREBRIDGE")
//!     .load()?;
//! init_logging(&config.logging)?;
//!
//! let endpoint = Endpoint::new(config)?;
//! let mut events = endpoint.subscribe();
//! let mut accepted = endpoint.accept(stream)?;
//!
//! while let Some(message) = accepted.recv().await {
//!     println!("{:?}", message.text());
//! }
//! while let Ok(event) = events.try_recv() {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod event;
pub mod interceptor;
pub mod loader;
pub mod pinger;
pub mod registry;
pub mod resequencer;
pub mod telemetry;

pub use config::{ConfigError, WsConfig};
pub use connection::{BoxedWriter, ConnectionHandle, ConnectionId};
pub use endpoint::{Accepted, Endpoint};
pub use error::{WsError, WsResult};
pub use event::{ConnectionEvent, ConnectionEventKind, InboundMessage};
pub use interceptor::{Interceptor, Phase, Reaction};
pub use loader::ConfigLoader;
pub use pinger::{IdlePinger, IdlePingerHandle};
pub use registry::{ConnectionRegistry, RegistryStats};
pub use resequencer::Resequencer;
pub use telemetry::{init_logging, LogConfig, LoggingError};

pub use wirebridge_codec::{CloseCode, Frame, FrameKind, Role};
