//! Scope record loading
//!
//! Serves a scope's base records from the snapshot while it is fresh and
//! refreshes it wholesale from the backend otherwise.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::commit::TransportError;
use crate::filter::{sort_records, SortKey};
use crate::model::Record;
use crate::snapshot::LocalSnapshotCache;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Scope {0} not found")]
    NotFound(String),

    #[error("Malformed scope payload: {0}")]
    Malformed(String),
}

/// Source of a scope's full record collection
#[async_trait]
pub trait RecordFetcher: Send + Sync {
    async fn fetch(&self, scope_id: &str) -> Result<Vec<Record>, FetchError>;
}

/// Where loaded records came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    Cache,
    Remote,
    /// The fetch failed and an expired snapshot was served instead
    StaleCache,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadedScope {
    pub records: Vec<Record>,
    pub source: LoadSource,
    pub cached_at: DateTime<Utc>,
}

pub struct ScopeLoader {
    cache: LocalSnapshotCache,
    fetcher: Arc<dyn RecordFetcher>,
    ttl: Duration,
}

impl ScopeLoader {
    pub fn new(cache: LocalSnapshotCache, fetcher: Arc<dyn RecordFetcher>, ttl: Duration) -> Self {
        Self {
            cache,
            fetcher,
            ttl,
        }
    }

    pub async fn load(&self, scope_id: &str, force_refresh: bool) -> Result<LoadedScope, FetchError> {
        self.load_at(scope_id, force_refresh, Utc::now()).await
    }

    pub async fn load_at(
        &self,
        scope_id: &str,
        force_refresh: bool,
        now: DateTime<Utc>,
    ) -> Result<LoadedScope, FetchError> {
        let cached = self.cache.read_entry(scope_id);

        if let Some(entry) = &cached {
            if !force_refresh && entry.is_fresh(self.ttl, now) {
                tracing::debug!(scope = %scope_id, "serving records from snapshot");
                return Ok(LoadedScope {
                    records: entry.records.clone(),
                    source: LoadSource::Cache,
                    cached_at: entry.cached_at,
                });
            }
        }

        match self.fetcher.fetch(scope_id).await {
            Ok(mut records) => {
                sort_records(&mut records, SortKey::Location);
                if let Err(err) = self.cache.write_at(scope_id, records.clone(), now) {
                    tracing::warn!(scope = %scope_id, error = %err, "failed to cache fetched records");
                }
                tracing::info!(scope = %scope_id, count = records.len(), "fetched scope records");
                Ok(LoadedScope {
                    records,
                    source: LoadSource::Remote,
                    cached_at: now,
                })
            }
            Err(err) => match cached {
                Some(entry) => {
                    tracing::warn!(
                        scope = %scope_id,
                        error = %err,
                        "fetch failed, serving stale snapshot"
                    );
                    Ok(LoadedScope {
                        records: entry.records,
                        source: LoadSource::StaleCache,
                        cached_at: entry.cached_at,
                    })
                }
                None => Err(err),
            },
        }
    }
}
