use crate::store::RuleCacheStore;
use crate::types::{ALL_IP, ALL_LABEL, ReleaseId, RuleCache, RuleItem};
use std::collections::HashSet;
use std::sync::Arc;

impl RuleItem {
    /// A client matches when the app id is the same and either its IP or its label is
    /// listed, literally or through the wildcard. Comparisons ignore ASCII case, like the
    /// reverse index keys.
    pub fn matches(&self, client_app_id: &str, client_ip: &str, client_label: &str) -> bool {
        self.client_app_id.eq_ignore_ascii_case(client_app_id)
            && (self.ip_matches(client_ip) || self.label_matches(client_label))
    }

    fn ip_matches(&self, client_ip: &str) -> bool {
        self.client_ip_list.contains(ALL_IP)
            || contains_ignore_case(&self.client_ip_list, client_ip)
    }

    fn label_matches(&self, client_label: &str) -> bool {
        self.client_label_list.contains(ALL_LABEL)
            || contains_ignore_case(&self.client_label_list, client_label)
    }
}

fn contains_ignore_case(values: &HashSet<String>, value: &str) -> bool {
    values.contains(value) || values.iter().any(|v| v.eq_ignore_ascii_case(value))
}

pub(crate) fn rule_matches(
    cache: &RuleCache,
    client_app_id: &str,
    client_ip: &str,
    client_label: &str,
) -> bool {
    cache
        .rule_items
        .iter()
        .any(|item| item.matches(client_app_id, client_ip, client_label))
}

/// Read-only view of the rule indices for the config serving path.
#[derive(Clone)]
pub struct Matcher {
    store: Arc<RuleCacheStore>,
}

impl Matcher {
    pub fn new(store: Arc<RuleCacheStore>) -> Self {
        Matcher { store }
    }

    /// Returns the gray release id the client should receive for the target, if any.
    pub fn lookup_release(
        &self,
        client_app_id: &str,
        client_ip: &str,
        client_label: &str,
        app_id: &str,
        cluster: &str,
        namespace: &str,
    ) -> Option<ReleaseId> {
        self.store
            .lookup_release(client_app_id, client_ip, client_label, app_id, cluster, namespace)
    }

    pub fn has_gray_rule(
        &self,
        client_app_id: &str,
        client_ip: &str,
        client_label: &str,
        namespace: &str,
    ) -> bool {
        self.store
            .has_gray_rule(client_app_id, client_ip, client_label, namespace)
    }
}
