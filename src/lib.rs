//! A lightweight SOCKS5 connect proxy library
//!
//! ## SOCKS5 Implementation
//!
//! - Features:
//!     - CONNECT semantics for every request command
//!     - No Authentication (always selected)
//!     - One task per client, cancellation scoped to the session
//!     - Replies echo the requested address instead of the bound address
//! - [SOCKS5 (RFC 1928)](https://datatracker.ietf.org/doc/html/rfc1928)
//!
//! # Example
//! ```no_run
//! use lightproxy::Socks5Server;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let mut server = Socks5Server::new("127.0.0.1:22333");
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod address;
pub mod error;
pub mod protocol;
pub mod relay;
pub mod resolver;
pub mod server;
pub mod session;

// Re-export main types at crate root for convenience
pub use error::{DecodeError, ProxyError};
pub use protocol::{AddressType, Command, ReplyCode, Version};
pub use relay::RelaySettings;
pub use resolver::{Resolver, SystemResolver};
pub use server::Socks5Server;
pub use session::{ConnectionHandler, Session, SessionEvent, Stage};
