use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

pub type RuleId = i64;
pub type ReleaseId = i64;

/// Wildcard entry in a rule item's IP list matching every client IP.
pub const ALL_IP: &str = "*";
/// Wildcard entry in a rule item's label list matching every client label.
pub const ALL_LABEL: &str = "*";

pub const KEY_SEPARATOR: char = '+';

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchStatus {
    Deleted,
    Active,
    Merged,
}

impl BranchStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, BranchStatus::Active)
    }
}

/// A gray release rule row as stored by the source of truth.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GrayReleaseRule {
    pub id: RuleId,
    pub app_id: String,
    pub cluster_name: String,
    pub namespace_name: String,
    pub branch_name: String,
    // None or 0 means the branch was never released.
    #[serde(default)]
    pub release_id: Option<ReleaseId>,
    pub branch_status: BranchStatus,
    // Serialized list of rule items, see `RuleItem::parse_list`.
    #[serde(default)]
    pub rules: String,
}

impl GrayReleaseRule {
    pub fn released_id(&self) -> Option<ReleaseId> {
        self.release_id.filter(|id| *id != 0)
    }
}

/// Configuration target a gray release applies to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Target {
    pub app_id: String,
    pub cluster: String,
    pub namespace: String,
}

impl Target {
    pub fn new<A, C, N>(app_id: A, cluster: C, namespace: N) -> Self
    where
        A: Into<String>,
        C: Into<String>,
        N: Into<String>,
    {
        Target {
            app_id: app_id.into(),
            cluster: cluster.into(),
            namespace: namespace.into(),
        }
    }

    pub fn key(&self) -> String {
        target_key(&self.app_id, &self.cluster, &self.namespace)
    }
}

/// One match condition of a gray release rule.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleItem {
    pub client_app_id: String,
    #[serde(default)]
    pub client_ip_list: HashSet<String>,
    #[serde(default)]
    pub client_label_list: HashSet<String>,
}

impl RuleItem {
    /// Parses the `rules` column of a gray release rule row.
    pub fn parse_list(raw: &str) -> Result<Vec<RuleItem>, serde_json::Error> {
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(raw)
    }
}

/// In-memory view of one branch rule, derived from a `GrayReleaseRule` row.
///
/// Equality and hashing only consider the rule id, which is unique per row.
#[derive(Debug)]
pub struct RuleCache {
    pub rule_id: RuleId,
    pub branch_name: String,
    pub namespace_name: String,
    pub release_id: ReleaseId,
    pub branch_status: BranchStatus,
    load_version: AtomicU64,
    pub rule_items: Vec<RuleItem>,
}

impl RuleCache {
    pub(crate) fn new(
        rule: &GrayReleaseRule,
        release_id: ReleaseId,
        rule_items: Vec<RuleItem>,
        load_version: u64,
    ) -> Self {
        RuleCache {
            rule_id: rule.id,
            branch_name: rule.branch_name.clone(),
            namespace_name: rule.namespace_name.clone(),
            release_id,
            branch_status: rule.branch_status,
            load_version: AtomicU64::new(load_version),
            rule_items,
        }
    }

    pub fn is_active(&self) -> bool {
        self.branch_status.is_active()
    }

    pub fn load_version(&self) -> u64 {
        self.load_version.load(Ordering::Acquire)
    }

    pub(crate) fn set_load_version(&self, version: u64) {
        self.load_version.store(version, Ordering::Release);
    }
}

impl PartialEq for RuleCache {
    fn eq(&self, other: &Self) -> bool {
        self.rule_id == other.rule_id
    }
}

impl Eq for RuleCache {}

impl Hash for RuleCache {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rule_id.hash(state);
    }
}

// Keys ignore ASCII case, matching how rule items compare app ids, IPs and labels.
fn join_key(parts: [&str; 3]) -> String {
    let mut key = String::with_capacity(parts.iter().map(|p| p.len() + 1).sum());
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            key.push(KEY_SEPARATOR);
        }
        key.push_str(&part.to_ascii_lowercase());
    }
    key
}

pub fn target_key(app_id: &str, cluster: &str, namespace: &str) -> String {
    join_key([app_id, cluster, namespace])
}

pub fn reverse_key(client_app_id: &str, namespace: &str, ip_or_label: &str) -> String {
    join_key([client_app_id, namespace, ip_or_label])
}
