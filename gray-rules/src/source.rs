//! Access to the gray release rule rows owned by the source of truth.

use crate::types::{GrayReleaseRule, RuleId, Target, target_key};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::RwLock;

/// Rows requested per page by a full scan.
pub const PAGE_SIZE: usize = 500;

#[derive(thiserror::Error, Debug)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("source unavailable after {attempts} attempts, last status {status}")]
    RetriesExceeded { attempts: u32, status: u16 },
    #[error("unexpected response status {0}")]
    UnexpectedStatus(u16),
    #[error("{0}")]
    Unavailable(String),
}

#[async_trait]
pub trait RuleRecordSource: Send + Sync {
    /// All rows for one configuration target.
    async fn find_by_target(&self, target: &Target) -> Result<Vec<GrayReleaseRule>, SourceError>;

    /// Up to `limit` rows with an id greater than `after_id`, ordered by id ascending.
    async fn find_page(
        &self,
        after_id: RuleId,
        limit: usize,
    ) -> Result<Vec<GrayReleaseRule>, SourceError>;
}

/// Rule rows kept in process memory, keyed by id.
#[derive(Default)]
pub struct InMemoryRuleSource {
    rows: RwLock<BTreeMap<RuleId, GrayReleaseRule>>,
}

impl InMemoryRuleSource {
    pub fn new(rows: impl IntoIterator<Item = GrayReleaseRule>) -> Self {
        InMemoryRuleSource {
            rows: RwLock::new(rows.into_iter().map(|row| (row.id, row)).collect()),
        }
    }

    /// Inserts or replaces the row with the same id.
    pub fn upsert(&self, row: GrayReleaseRule) {
        self.write().insert(row.id, row);
    }

    pub fn remove(&self, id: RuleId) -> Option<GrayReleaseRule> {
        self.write().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<RuleId, GrayReleaseRule>> {
        self.rows.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<RuleId, GrayReleaseRule>> {
        self.rows.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl RuleRecordSource for InMemoryRuleSource {
    async fn find_by_target(&self, target: &Target) -> Result<Vec<GrayReleaseRule>, SourceError> {
        let key = target.key();
        Ok(self
            .read()
            .values()
            .filter(|row| target_key(&row.app_id, &row.cluster_name, &row.namespace_name) == key)
            .cloned()
            .collect())
    }

    async fn find_page(
        &self,
        after_id: RuleId,
        limit: usize,
    ) -> Result<Vec<GrayReleaseRule>, SourceError> {
        Ok(self
            .read()
            .range(after_id.saturating_add(1)..)
            .take(limit)
            .map(|(_, row)| row.clone())
            .collect())
    }
}
