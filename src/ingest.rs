//! Ingestion orchestrator: fetch → normalize → store, item by item.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::error::VaultError;
use crate::fetch::transport::Connector;
use crate::fetch::{FetchClient, FetchOptions};
use crate::model::message::CanonicalMessage;
use crate::normalize::Normalizer;
use crate::store::{MessageStore, PutOutcome};

/// One per-item failure in a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemError {
    /// Transport reference, record id, or the failing stage for fatal errors.
    pub identifier: String,
    pub reason: String,
}

impl ItemError {
    fn from_error(err: &VaultError, fallback_identifier: &str) -> Self {
        match err {
            VaultError::FetchItemFailed { identifier, cause }
            | VaultError::NormalizationFailed { identifier, cause } => Self {
                identifier: identifier.clone(),
                reason: cause.clone(),
            },
            other => Self {
                identifier: fallback_identifier.to_string(),
                reason: other.to_string(),
            },
        }
    }
}

/// Counts and errors of one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchOutcome {
    pub inserted_count: usize,
    pub duplicate_count: usize,
    pub failed_count: usize,
    /// In the order they happened.
    pub errors: Vec<ItemError>,
    /// When the run finished, aborted or was cancelled.
    pub completed_at: Option<DateTime<Utc>>,
    /// The progress callback asked to stop early.
    pub cancelled: bool,
}

impl FetchOutcome {
    /// Items that reached a terminal state.
    pub fn processed(&self) -> usize {
        self.inserted_count + self.duplicate_count + self.failed_count
    }

    fn record_failure(&mut self, item: ItemError) {
        self.failed_count += 1;
        self.errors.push(item);
    }
}

/// A run stopped by a connection, search or storage failure.
///
/// Everything counted in `partial` is durable; the fatal failure itself is
/// the last entry of `partial.errors`.
#[derive(Debug, Error)]
#[error("ingestion aborted: {cause}")]
pub struct IngestAborted {
    pub partial: FetchOutcome,
    #[source]
    pub cause: VaultError,
}

/// Drives one fetch client, normalizer and store.
pub struct Ingestor<C: Connector, S: MessageStore> {
    fetch: FetchClient<C>,
    normalizer: Normalizer,
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<C: Connector, S: MessageStore> Ingestor<C, S> {
    pub fn new(
        fetch: FetchClient<C>,
        normalizer: Normalizer,
        store: Arc<S>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            fetch,
            normalizer,
            store,
            clock,
        }
    }

    /// Ingest every message of the window starting at `since`.
    ///
    /// `progress` is called with the number of items handled so far before
    /// each pull from the transport; returning `false` stops the run there.
    /// Per-item fetch and normalization failures are counted and listed,
    /// never fatal.
    pub fn ingest(
        &self,
        since: DateTime<Utc>,
        options: FetchOptions,
        progress: Option<&dyn Fn(usize) -> bool>,
    ) -> Result<FetchOutcome, IngestAborted> {
        let mut outcome = FetchOutcome::default();
        info!(since = %since.to_rfc3339(), ?options, "Ingestion started");

        let mut stream = match self.fetch.fetch_since(since, options) {
            Ok(stream) => stream,
            Err(cause) => {
                let stage = match cause {
                    VaultError::SearchFailed { .. } => "search",
                    _ => "connection",
                };
                return Err(self.abort(outcome, stage, cause));
            }
        };

        let mut handled = 0usize;
        loop {
            if let Some(keep_going) = progress {
                if !keep_going(handled) {
                    info!(handled, "Ingestion cancelled by caller");
                    outcome.cancelled = true;
                    break;
                }
            }
            let Some(item) = stream.next() else {
                break;
            };
            handled += 1;

            let raw = match item {
                Ok(raw) => raw,
                Err(e) => {
                    outcome.record_failure(ItemError::from_error(&e, "fetch"));
                    continue;
                }
            };

            let mut record = match self.normalizer.normalize(raw) {
                Ok(record) => record,
                Err(e) => {
                    warn!(error = %e, "Normalization failed");
                    outcome.record_failure(ItemError::from_error(&e, "normalize"));
                    continue;
                }
            };

            if let Err(cause) = self.resolve_thread(&mut record) {
                return Err(self.abort(outcome, &record.id, cause));
            }

            match self.store.put(&record) {
                Ok(PutOutcome::Inserted) => outcome.inserted_count += 1,
                Ok(PutOutcome::Duplicate) => outcome.duplicate_count += 1,
                Err(cause) => return Err(self.abort(outcome, &record.id, cause)),
            }
        }
        drop(stream);

        outcome.completed_at = Some(self.clock.now());
        info!(
            inserted = outcome.inserted_count,
            duplicates = outcome.duplicate_count,
            failed = outcome.failed_count,
            cancelled = outcome.cancelled,
            "Ingestion complete"
        );
        for item in &outcome.errors {
            debug!(identifier = %item.identifier, reason = %item.reason, "Item failure");
        }
        Ok(outcome)
    }

    /// Re-anchor `record` on its parent's thread when the parent is stored.
    ///
    /// A reply that only names its direct parent (`In-Reply-To` without
    /// `References`) derives the parent's id as its thread. If that parent
    /// already sits in a thread rooted further up, the reply joins it, so a
    /// chain converges on its root one hop at a time.
    fn resolve_thread(&self, record: &mut CanonicalMessage) -> Result<(), VaultError> {
        if record.thread_id == record.id {
            return Ok(());
        }
        if let Some(parent) = self.store.get(&record.thread_id)? {
            if parent.thread_id != record.thread_id {
                debug!(
                    id = %record.id,
                    parent = %record.thread_id,
                    thread = %parent.thread_id,
                    "Joining parent's thread"
                );
                record.thread_id = parent.thread_id;
            }
        }
        Ok(())
    }

    fn abort(&self, mut partial: FetchOutcome, identifier: &str, cause: VaultError) -> IngestAborted {
        error!(identifier, error = %cause, "Ingestion aborted");
        partial.record_failure(ItemError::from_error(&cause, identifier));
        partial.completed_at = Some(self.clock.now());
        IngestAborted { partial, cause }
    }
}
