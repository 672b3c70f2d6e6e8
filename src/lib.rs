//! # pollserve
//!
//! A single-threaded TCP listener that multiplexes a bounded set of
//! connections with readiness polling and tokenizes the HTTP request line
//! each connection sends.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pollserve::{Config, Server};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config { port: 8080, num_conns: 4, ..Config::default() };
//!     let mut server = Server::bind(config)?;
//!     println!("Listening on {}", server.local_addr());
//!     server.run()?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod http;
pub mod listener;
pub mod registry;
pub mod server;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use config::{Cli, Config, ConfigError};
pub use http::{MalformedRequest, Method, RequestLine, Version, parse_request_line};
pub use listener::ProvisionError;
pub use registry::{Registry, RegistryError};
pub use server::{REJECTION_MESSAGE, Server, ServerError, ShutdownHandle, Stats};
