//! # chat-client
//!
//! Client session for hearsay.
//!
//! This crate connects the pure conversation logic in `chat-core` to the
//! outside world:
//!
//! - [`ChatSession`] - bootstrap from storage, live processing, outbound
//! - [`Intake`] - fan-in of relay subscriptions into one bounded queue
//! - [`Transport`] - relay pool abstraction ([`MockTransport`] for tests)
//! - [`RecordStore`] - persistent record storage ([`MemoryRecordStore`] for tests)
//! - [`WatchRegistry`] - growing sets of watched profiles and groups
//! - [`ClientConfig`] - TOML configuration
//!
//! ## Example
//!
//! ```ignore
//! use chat_client::{ChatSession, ClientConfig, MemoryRecordStore, MockTransport};
//! use chat_crypto::Keypair;
//! use std::sync::Arc;
//!
//! let config = ClientConfig::from_file("hearsay.toml".as_ref())?;
//! chat_client::init_tracing(&config.logging)?;
//!
//! let account = Arc::new(Keypair::generate());
//! let mut session = ChatSession::new(account, MockTransport::new(), MemoryRecordStore::new(), config);
//! session.connect().await?;
//! session.bootstrap().await?;
//!
//! let mut intake = session.new_intake();
//! session.open_subscriptions(&mut intake).await?;
//! session.send_direct_message(&peer, "hello").await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod intake;
pub mod logging;
pub mod session;
pub mod store;
pub mod transport;
pub mod watch;

pub use config::{AttachmentsConfig, ClientConfig, ConfigError, IntakeConfig, LoggingConfig, RelaysConfig};
pub use error::ClientError;
pub use intake::{Intake, IntakeError};
pub use logging::init_tracing;
pub use session::{BootstrapReport, ChatSession, Outcome, RunSummary, LOCAL_SOURCE};
pub use store::{MemoryRecordStore, RecordStore, StoreError};
pub use transport::{MockTransport, RelayRecord, Subscription, Transport, TransportError};
pub use watch::{WatchKind, WatchRegistry};

// Re-export the lower layers for convenience
pub use chat_core;
pub use chat_crypto;
pub use chat_types;
