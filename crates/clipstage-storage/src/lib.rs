//! Clipstage Durable Storage
//!
//! File-backed `ScopeStore`: every key (`staging:{scope}`,
//! `snapshot:{scope}`) is one JSON document under a root directory, so
//! staged edits and the confirmed snapshot survive restarts.
//!
//! ```text
//! .clipstage/
//! ├── staging%3Abook-1.json     pending operations
//! └── snapshot%3Abook-1.json    last confirmed records
//! ```

pub mod file_store;

#[cfg(test)]
mod tests;

pub use file_store::{escape_key, unescape_key, FileScopeStore};
