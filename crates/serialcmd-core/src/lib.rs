//! # serialcmd Core Library
//!
//! Concurrency-safe, retryable command/response exchanges over a blocking
//! serial link.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - A single-worker async transport for blocking serial handles
//! - Scoped read/write timeout overrides that always restore
//! - Keyword-based response classification (acknowledged, error, alarm)
//! - Bounded retries with link-reset recovery
//!
//! ## Example
//!
//! ```rust,no_run
//! use serialcmd_core::protocol::{Connection, ConnectionConfig};
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), serialcmd_core::protocol::ProtocolError> {
//! let conn = Connection::create(ConnectionConfig::new("/dev/ttyUSB0", "OK")).await?;
//!
//! // Two retries, 500ms read timeout for this call only
//! let version = conn.send("VER?\r\n", 2, Some(Duration::from_millis(500))).await?;
//! println!("firmware {version}");
//!
//! conn.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod protocol;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::protocol::{
        CommandBuilder, Connection, ConnectionConfig, ProtocolError, ResponseVocabulary,
        TimeoutProperty, Transport, TransportConfig,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
