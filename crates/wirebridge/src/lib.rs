//! # Wirebridge
//!
//! **WebSocket framing and connection interception for raw byte streams**
//!
//! Wirebridge speaks RFC 6455 directly over any Tokio stream, without an
//! HTTP server in front of it:
//!
//! - **Codec** – resumable frame decoder, masking encoder, opening handshake
//! - **Interceptor** – answers pings, runs the close handshake, rejects protocol violations
//! - **Connections** – registry with limits, idle pinger, lifecycle events
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use wirebridge::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let endpoint = Endpoint::new(WsConfig::default())?;
//!     let pinger = endpoint.idle_pinger().spawn();
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:9001").await?;
//!
//!     let (stream, _) = listener.accept().await?;
//!     let mut accepted = endpoint.accept(stream)?;
//!     while let Some(message) = accepted.recv().await {
//!         accepted.handle.send(&message.frame).await?;
//!     }
//!
//!     pinger.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! bytes → FrameDecoder → Resequencer → Interceptor → application
//!                                          ↓
//! bytes ← FrameEncoder ← ConnectionHandle ←┘
//! ```

#![forbid(unsafe_code)]

// Re-export the codec
pub use wirebridge_codec as codec;

// Re-export connection handling
pub use wirebridge_ws as ws;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use wirebridge::prelude::*;
///
/// let frame = Frame::text("hello");
/// assert_eq!(frame.kind(), FrameKind::Text);
/// ```
pub mod prelude {
    // Re-export codec types
    pub use wirebridge_codec::{
        CloseCode, DecodeError, DecoderConfig, Frame, FrameDecoder, FrameEncoder, FrameKind,
        FrameReader, Role, SessionFlags,
    };

    // Re-export connection types
    pub use wirebridge_ws::{
        Accepted, ConfigLoader, ConnectionEvent, ConnectionEventKind, ConnectionHandle,
        ConnectionId, ConnectionRegistry, Endpoint, IdlePinger, InboundMessage, WsConfig,
        WsError, WsResult,
    };
}
