use crate::metrics_defs::{NOTIFICATIONS_DROPPED, NOTIFICATIONS_RECEIVED, counter};
use crate::notifier::{RELEASE_TOPIC, ReleaseMessage, ReleaseMessageListener};
use crate::source::{RuleRecordSource, SourceError};
use crate::store::{MergeStats, RuleCacheStore};
use crate::types::{KEY_SEPARATOR, Target};
use async_trait::async_trait;
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
pub enum ChangeError {
    #[error("malformed release message: {0:?}")]
    Malformed(String),
    #[error("failed to load rules for {app_id}+{cluster}+{namespace}: {source}")]
    Source {
        app_id: String,
        cluster: String,
        namespace: String,
        source: SourceError,
    },
}

/// Parses an `appId+cluster+namespace` payload. Anything other than exactly three
/// non-empty parts is rejected.
pub fn parse_message(payload: &str) -> Option<Target> {
    let mut parts = payload.split(KEY_SEPARATOR);
    let (app_id, cluster, namespace) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() || [app_id, cluster, namespace].iter().any(|p| p.is_empty()) {
        return None;
    }
    Some(Target::new(app_id, cluster, namespace))
}

/// Refreshes the rules of a single target when its release changes.
///
/// This is a point update and never starts a new epoch.
pub struct ChangeHandler {
    store: Arc<RuleCacheStore>,
    source: Arc<dyn RuleRecordSource>,
}

impl ChangeHandler {
    pub fn new(store: Arc<RuleCacheStore>, source: Arc<dyn RuleRecordSource>) -> Self {
        ChangeHandler { store, source }
    }

    pub async fn refresh_target(&self, target: &Target) -> Result<MergeStats, ChangeError> {
        let rows = self
            .source
            .find_by_target(target)
            .await
            .map_err(|source| ChangeError::Source {
                app_id: target.app_id.clone(),
                cluster: target.cluster.clone(),
                namespace: target.namespace.clone(),
                source,
            })?;
        Ok(self.store.merge(&rows))
    }

    pub async fn handle(&self, payload: &str) -> Result<MergeStats, ChangeError> {
        let target =
            parse_message(payload).ok_or_else(|| ChangeError::Malformed(payload.to_string()))?;
        self.refresh_target(&target).await
    }
}

#[async_trait]
impl ReleaseMessageListener for ChangeHandler {
    async fn handle_message(&self, message: &ReleaseMessage, channel: &str) {
        if channel != RELEASE_TOPIC || message.message.is_empty() {
            return;
        }
        counter!(NOTIFICATIONS_RECEIVED).increment(1);

        match self.handle(&message.message).await {
            Ok(stats) => {
                tracing::debug!(
                    message_id = message.id,
                    message = %message.message,
                    installed = stats.installed,
                    reconfirmed = stats.reconfirmed,
                    "refreshed gray release rules"
                );
            }
            Err(err) => {
                counter!(NOTIFICATIONS_DROPPED).increment(1);
                tracing::warn!(message_id = message.id, error = %err, "dropping release message");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::{TestRuleSource, ip_rules, rule};
    use crate::types::{BranchStatus, GrayReleaseRule};

    #[test]
    fn test_parse_message() {
        assert_eq!(
            parse_message("app+default+application"),
            Some(Target::new("app", "default", "application"))
        );
        for invalid in [
            "",
            "app",
            "app+default",
            "app++application",
            "+default+ns",
            "a+b+c+d",
            "a+b+",
        ] {
            assert_eq!(parse_message(invalid), None, "{invalid:?}");
        }
    }

    fn message(id: i64, payload: &str) -> ReleaseMessage {
        ReleaseMessage {
            id,
            message: payload.to_string(),
        }
    }

    fn setup(
        rows: Vec<GrayReleaseRule>,
    ) -> (Arc<RuleCacheStore>, Arc<TestRuleSource>, ChangeHandler) {
        let store = Arc::new(RuleCacheStore::new());
        let source = Arc::new(TestRuleSource::new(rows));
        let handler = ChangeHandler::new(store.clone(), source.clone());
        (store, source, handler)
    }

    #[tokio::test]
    async fn test_notification_refreshes_only_the_target() {
        let (store, source, handler) = setup(vec![
            GrayReleaseRule {
                rules: ip_rules("client", &["1.2.3.4"]),
                ..rule(1, "app", "gray", 10)
            },
            GrayReleaseRule {
                rules: ip_rules("client", &["1.2.3.4"]),
                ..rule(2, "other", "gray", 20)
            },
        ]);

        handler
            .handle_message(&message(1, "app+default+application"), RELEASE_TOPIC)
            .await;
        assert_eq!(source.target_requests(), 1);
        assert_eq!(source.page_requests(), 0);
        assert_eq!(store.target_count(), 1);
        assert_eq!(
            store.lookup_release("client", "1.2.3.4", "", "app", "default", "application"),
            Some(10)
        );
        assert_eq!(
            store.lookup_release("client", "1.2.3.4", "", "other", "default", "application"),
            None
        );
        // Point updates do not start a cycle.
        assert_eq!(store.epoch(), 0);
    }

    #[tokio::test]
    async fn test_notification_applies_deactivation() {
        let (store, source, handler) = setup(vec![GrayReleaseRule {
            rules: ip_rules("client", &["1.2.3.4"]),
            ..rule(1, "app", "gray", 10)
        }]);
        handler.handle("app+default+application").await.unwrap();
        assert!(store.has_gray_rule("client", "1.2.3.4", "", "application"));

        source.inner.upsert(GrayReleaseRule {
            branch_status: BranchStatus::Merged,
            ..rule(2, "app", "gray", 10)
        });
        let stats = handler.handle("app+default+application").await.unwrap();
        assert_eq!(stats.installed, 1);
        assert!(!store.has_gray_rule("client", "1.2.3.4", "", "application"));
        assert_eq!(
            store.lookup_release("client", "1.2.3.4", "", "app", "default", "application"),
            None
        );
    }

    #[tokio::test]
    async fn test_bad_messages_are_dropped() {
        let (store, source, handler) = setup(vec![rule(1, "app", "gray", 10)]);

        handler.handle_message(&message(1, "garbage"), RELEASE_TOPIC).await;
        handler.handle_message(&message(2, ""), RELEASE_TOPIC).await;
        handler
            .handle_message(&message(3, "app+default+application"), "some-other-topic")
            .await;
        assert_eq!(source.target_requests(), 0);
        assert_eq!(store.target_count(), 0);

        assert!(matches!(
            handler.handle("app+default").await,
            Err(ChangeError::Malformed(_))
        ));

        // Later messages are still processed.
        handler
            .handle_message(&message(4, "app+default+application"), RELEASE_TOPIC)
            .await;
        assert_eq!(store.target_count(), 1);
    }
}
