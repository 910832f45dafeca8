//! Clipstage Remote Backend
//!
//! HTTP side of staging: posts committed batches to
//! `{base}/user/book/{scope}/batch-update` and fetches a scope's records
//! from `{base}/user/book/{scope}`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let backend = HttpBackend::from_env()?;
//! let outcome = session.commit(&backend).await?;
//! println!("{}", outcome.summary());
//! ```

pub mod config;
pub mod envelope;
pub mod http;

pub use config::{ConfigError, RemoteConfig};
pub use envelope::{decode_commit_response, decode_scope_records};
pub use http::HttpBackend;
