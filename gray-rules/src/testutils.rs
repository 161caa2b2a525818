use crate::notifier::{ReleaseMessage, ReleaseMessageSource};
use crate::source::{InMemoryRuleSource, RuleRecordSource, SourceError};
use crate::types::{BranchStatus, GrayReleaseRule, ReleaseId, RuleId, Target};
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Active rule for cluster "default", namespace "application" with no rule items.
pub fn rule(id: RuleId, app_id: &str, branch: &str, release_id: ReleaseId) -> GrayReleaseRule {
    GrayReleaseRule {
        id,
        app_id: app_id.to_string(),
        cluster_name: "default".to_string(),
        namespace_name: "application".to_string(),
        branch_name: branch.to_string(),
        release_id: Some(release_id),
        branch_status: BranchStatus::Active,
        rules: String::new(),
    }
}

pub fn ip_rules(client_app_id: &str, ips: &[&str]) -> String {
    serde_json::json!([{ "clientAppId": client_app_id, "clientIpList": ips }]).to_string()
}

pub fn label_rules(client_app_id: &str, labels: &[&str]) -> String {
    serde_json::json!([{ "clientAppId": client_app_id, "clientLabelList": labels }]).to_string()
}

/// Wraps an in-memory source, counting requests and optionally failing or stalling them.
pub struct TestRuleSource {
    pub inner: InMemoryRuleSource,
    pub page_requests: AtomicUsize,
    pub target_requests: AtomicUsize,
    // Fail the page request with this zero based index.
    pub failing_page: Mutex<Option<usize>>,
    pub page_delay: Mutex<Option<Duration>>,
}

impl TestRuleSource {
    pub fn new(rows: impl IntoIterator<Item = GrayReleaseRule>) -> Self {
        TestRuleSource {
            inner: InMemoryRuleSource::new(rows),
            page_requests: AtomicUsize::new(0),
            target_requests: AtomicUsize::new(0),
            failing_page: Mutex::new(None),
            page_delay: Mutex::new(None),
        }
    }

    pub fn page_requests(&self) -> usize {
        self.page_requests.load(Ordering::SeqCst)
    }

    pub fn target_requests(&self) -> usize {
        self.target_requests.load(Ordering::SeqCst)
    }

    pub fn fail_page(&self, index: Option<usize>) {
        *self.failing_page.lock().unwrap() = index;
    }

    pub fn delay_pages(&self, delay: Duration) {
        *self.page_delay.lock().unwrap() = Some(delay);
    }
}

#[async_trait]
impl RuleRecordSource for TestRuleSource {
    async fn find_by_target(&self, target: &Target) -> Result<Vec<GrayReleaseRule>, SourceError> {
        self.target_requests.fetch_add(1, Ordering::SeqCst);
        self.inner.find_by_target(target).await
    }

    async fn find_page(
        &self,
        after_id: RuleId,
        limit: usize,
    ) -> Result<Vec<GrayReleaseRule>, SourceError> {
        let index = self.page_requests.fetch_add(1, Ordering::SeqCst);
        let delay = *self.page_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failing = *self.failing_page.lock().unwrap() == Some(index);
        if failing {
            return Err(SourceError::Unavailable("injected failure".into()));
        }
        self.inner.find_page(after_id, limit).await
    }
}

#[derive(Default)]
pub struct TestMessageSource {
    pub messages: Mutex<Vec<ReleaseMessage>>,
    pub failures: AtomicUsize,
}

impl TestMessageSource {
    pub fn push(&self, id: i64, message: &str) {
        self.messages.lock().unwrap().push(ReleaseMessage {
            id,
            message: message.to_string(),
        });
    }

    // The next `count` calls fail.
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    fn maybe_fail(&self) -> Result<(), SourceError> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(SourceError::Unavailable("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ReleaseMessageSource for TestMessageSource {
    async fn find_latest_id(&self) -> Result<Option<i64>, SourceError> {
        self.maybe_fail()?;
        Ok(self.messages.lock().unwrap().iter().map(|m| m.id).max())
    }

    async fn find_after(
        &self,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<ReleaseMessage>, SourceError> {
        self.maybe_fail()?;
        let mut messages: Vec<_> = self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.id > after_id)
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.id);
        messages.truncate(limit);
        Ok(messages)
    }
}
