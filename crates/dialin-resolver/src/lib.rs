//! Tunnel endpoint resolution for SSH-over-tunnel automation
//!
//! A tunneling agent (ngrok-style) exposes a local port through a public
//! relay and reports its active tunnels on a loopback HTTP status API. This
//! crate polls that API until a tunnel of the requested protocol appears,
//! parses the tunnel's public URL, and resolves the public host to a numeric
//! address, producing a dialable [`ConnectionEndpoint`].
//!
//! Resolution is retried within a bounded attempt budget: the agent may not
//! be listening yet, the tunnel may not be registered yet, and the public
//! hostname may not have propagated through DNS yet. Structural problems
//! (a descriptor whose URL cannot name a host and port) abort immediately.
//!
//! # Quick Start
//!
//! ```ignore
//! use dialin_resolver::{EndpointResolver, TunnelProtocol};
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let resolver = EndpointResolver::new()
//!         .with_max_attempts(30)
//!         .with_poll_interval(Duration::from_secs(2));
//!
//!     let endpoint = resolver
//!         .resolve(
//!             "http://127.0.0.1:4040/api/tunnels",
//!             TunnelProtocol::Tcp,
//!             &CancellationToken::new(),
//!         )
//!         .await?;
//!
//!     println!("root@{} -p {}", endpoint.host, endpoint.port);
//!     Ok(())
//! }
//! ```

mod descriptor;
mod lookup;
mod resolver;

pub use descriptor::{TunnelDescriptor, TunnelProtocol};
pub use lookup::{HostResolver, SystemResolver};
pub use resolver::{ConnectionEndpoint, EndpointResolver, ResolveError};
