//! Client side of the vulp bouncer protocol: login/resume, per-packet
//! acknowledgment, retransmission cache and ordered delivery.
//!
//! A [`Client`] wraps one logical session that survives any number of
//! transport connections. Reliable packets are numbered and cached until the
//! bouncer acknowledges them; after a reconnect the bouncer's resync tells the
//! client what to replay.
//!
//! ## Features
//!
//! - **Resumable sessions**: session key and resume cursor presented on login
//! - **Retransmission**: unacknowledged packets replayed in order on resync
//! - **Stream reassembly**: frames recovered from arbitrarily chunked reads
//! - **TLS**: optional `tokio-rustls` transport behind the `tls` feature
//!
//! ## Example
//!
//! ```rust,no_run
//! use vulp_session::{Client, ClientConfig, ClientEvent, ConnectionState};
//! use vulp_wire::{build_debug_command, PacketType};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let (client, mut events) = Client::new(ClientConfig::default());
//! client.connect("127.0.0.1:5454".parse()?).await?;
//! client.login().await?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         ClientEvent::StateChanged(ConnectionState::Authenticated) => {
//!             client
//!                 .send(PacketType::DEBUG_COMMAND, build_debug_command("status"))
//!                 .await?;
//!         }
//!         ClientEvent::Packet { packet_type, payload } => {
//!             println!("{} ({} bytes)", packet_type, payload.len());
//!         }
//!         ClientEvent::Disconnected { reason } => {
//!             println!("Disconnected: {}", reason);
//!             break;
//!         }
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod assembler;
pub mod cache;
pub mod client;
pub mod dispatch;
pub mod error;
pub mod sequence;
pub mod state;
pub mod transport;

// Re-export main types
pub use assembler::{Frames, ReceiveAssembler};
pub use cache::RetransmissionCache;
pub use client::{Client, ClientConfig, SendOutcome};
pub use dispatch::{ClientEvent, ClientEvents, DisconnectReason, Dispatcher};
pub use error::{CacheError, ClientError};
pub use sequence::SequenceIds;
pub use state::{ConnectionState, SessionState};
pub use transport::{connect_tcp, IoStream};

// Re-export TLS functionality when available
#[cfg(feature = "tls")]
pub use transport::tls::{connect_tls, make_client_config, TlsClientConfig};
