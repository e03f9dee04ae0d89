//! Client-side batching and upload for a remote storage API.
//!
//! A [`BatchSession`] registers a version under a batch name, keeps it alive
//! with a throttled heartbeat, and queues records until they are flushed as a
//! single instance submission. Record payloads may embed [`Value::File`]
//! references to local files; during a flush each reference is replaced by a
//! content-derived identifier and the file is uploaded unless the server
//! already knows it.
//!
//! ```no_run
//! use batchup::{BatchSession, InitOptions, SessionConfig, Value};
//!
//! # async fn demo() -> Result<(), batchup::BatchError> {
//! let mut session = BatchSession::new(SessionConfig {
//!     server: "https://storage.example.com".into(),
//!     collector: "lab-3".into(),
//!     app_key: "secret".into(),
//!     name: "nightly-import".into(),
//!     buffer: 100,
//! });
//!
//! session.init(InitOptions::default()).await?;
//! session
//!     .add("event", [("img".to_string(), Value::file("/tmp/photo.jpg"))].into_iter().collect())
//!     .await?;
//! session.complete().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod value;

pub use client::session::{BatchError, BatchSession, Instance};
pub use client::transport::TransportError;
pub use config::{InitOptions, SessionConfig};
pub use value::resolve::{resolve_files, ResolveError, Resolved, ResolvedFile};
pub use value::Value;
