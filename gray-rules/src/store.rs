use crate::matcher::rule_matches;
use crate::metrics_defs::{MERGE_OUTCOME, TARGETS, counter, gauge};
use crate::multimap::ConcurrentMultimap;
use crate::types::{
    ALL_IP, ALL_LABEL, GrayReleaseRule, ReleaseId, RuleCache, RuleId, RuleItem, reverse_key,
    target_key,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// In-memory indices over the gray release rules.
///
/// `forward` maps appId+cluster+namespace to the branch rules of that target.
/// `reverse_by_ip` and `reverse_by_label` map clientAppId+namespace+ip (or label) to the
/// ids of active rules mentioning it. All three are mutated one key at a time so readers
/// never wait on a whole merge.
pub struct RuleCacheStore {
    forward: ConcurrentMultimap<Arc<RuleCache>>,
    reverse_by_ip: ConcurrentMultimap<RuleId>,
    reverse_by_label: ConcurrentMultimap<RuleId>,
    // Incremented once per full scan pass.
    load_version: AtomicU64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeStats {
    pub installed: usize,
    pub reconfirmed: usize,
    pub purged: usize,
    pub skipped: usize,
}

impl MergeStats {
    fn record(&self) {
        for (outcome, count) in [
            ("installed", self.installed),
            ("reconfirmed", self.reconfirmed),
            ("purged", self.purged),
        ] {
            if count > 0 {
                counter!(MERGE_OUTCOME, "outcome" => outcome).increment(count as u64);
            }
        }
    }
}

impl RuleCacheStore {
    pub fn new() -> Self {
        RuleCacheStore {
            forward: ConcurrentMultimap::new(),
            reverse_by_ip: ConcurrentMultimap::new(),
            reverse_by_label: ConcurrentMultimap::new(),
            load_version: AtomicU64::new(0),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.load_version.load(Ordering::Acquire)
    }

    /// Starts a new full scan cycle.
    pub fn advance_epoch(&self) -> u64 {
        self.load_version.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Number of configuration targets with at least one branch rule.
    pub fn target_count(&self) -> usize {
        self.forward.len()
    }

    /// Current branch rules for a target, in no particular order.
    pub fn branches(&self, app_id: &str, cluster: &str, namespace: &str) -> Vec<Arc<RuleCache>> {
        self.forward.snapshot(&target_key(app_id, cluster, namespace))
    }

    /// Folds source rows into the indices. Rows may arrive in any order and any number
    /// of times; for each branch the row with the highest id wins.
    pub fn merge(&self, rows: &[GrayReleaseRule]) -> MergeStats {
        let mut stats = MergeStats::default();

        for row in rows {
            let Some(release_id) = row.released_id() else {
                stats.skipped += 1;
                continue;
            };

            let key = target_key(&row.app_id, &row.cluster_name, &row.namespace_name);
            let existing = self
                .forward
                .snapshot(&key)
                .into_iter()
                .filter(|cache| cache.branch_name == row.branch_name)
                .max_by_key(|cache| cache.rule_id);

            match existing {
                None if !row.branch_status.is_active() => {
                    stats.skipped += 1;
                }
                None => {
                    self.install(&key, row, release_id);
                    stats.installed += 1;
                }
                Some(old) if row.id > old.rule_id => {
                    self.install(&key, row, release_id);
                    stats.installed += 1;
                }
                Some(old) => {
                    let epoch = self.epoch();
                    if old.is_active() {
                        old.set_load_version(epoch);
                        stats.reconfirmed += 1;
                    } else if epoch.saturating_sub(old.load_version()) > 1 {
                        // Inactive and not reconfirmed for two full cycles.
                        tracing::debug!(
                            rule_id = old.rule_id,
                            branch = %old.branch_name,
                            "purging inactive branch rule"
                        );
                        self.remove_cache(&key, &old);
                        stats.purged += 1;
                    } else {
                        stats.skipped += 1;
                    }
                }
            }
        }

        stats.record();
        gauge!(TARGETS).set(self.forward.len() as f64);
        stats
    }

    /// Matches a client against the active branch rules of a target and returns the
    /// release id of the first matching branch.
    pub fn lookup_release(
        &self,
        client_app_id: &str,
        client_ip: &str,
        client_label: &str,
        app_id: &str,
        cluster: &str,
        namespace: &str,
    ) -> Option<ReleaseId> {
        let key = target_key(app_id, cluster, namespace);
        if !self.forward.contains_key(&key) {
            return None;
        }

        self.forward
            .snapshot(&key)
            .iter()
            .filter(|cache| cache.is_active())
            .find(|cache| rule_matches(cache, client_app_id, client_ip, client_label))
            .map(|cache| cache.release_id)
    }

    /// Whether any active gray rule mentions this client in the namespace. The cluster is
    /// not part of the reverse keys, so a true result does not guarantee that
    /// `lookup_release` picks a gray release for every cluster.
    pub fn has_gray_rule(
        &self,
        client_app_id: &str,
        client_ip: &str,
        client_label: &str,
        namespace: &str,
    ) -> bool {
        if self
            .reverse_by_ip
            .contains_key(&reverse_key(client_app_id, namespace, client_ip))
            || self
                .reverse_by_ip
                .contains_key(&reverse_key(client_app_id, namespace, ALL_IP))
        {
            return true;
        }

        !client_label.is_empty()
            && (self
                .reverse_by_label
                .contains_key(&reverse_key(client_app_id, namespace, client_label))
                || self
                    .reverse_by_label
                    .contains_key(&reverse_key(client_app_id, namespace, ALL_LABEL)))
    }

    fn install(&self, key: &str, row: &GrayReleaseRule, release_id: ReleaseId) {
        let rule_items = RuleItem::parse_list(&row.rules).unwrap_or_else(|err| {
            tracing::error!(
                rule_id = row.id,
                error = %err,
                "failed to parse gray release rule items, branch serves no gray traffic"
            );
            Vec::new()
        });

        let cache = Arc::new(RuleCache::new(row, release_id, rule_items, self.epoch()));
        self.add_cache(key, cache);
        self.evict_superseded(key, &row.branch_name);
    }

    // New entries are added before the superseded ones are removed so a reader never
    // sees the branch missing.
    fn add_cache(&self, key: &str, cache: Arc<RuleCache>) {
        if cache.is_active() {
            for item in &cache.rule_items {
                for ip in &item.client_ip_list {
                    self.reverse_by_ip.put(
                        reverse_key(&item.client_app_id, &cache.namespace_name, ip),
                        cache.rule_id,
                    );
                }
                for label in &item.client_label_list {
                    self.reverse_by_label.put(
                        reverse_key(&item.client_app_id, &cache.namespace_name, label),
                        cache.rule_id,
                    );
                }
            }
        }
        self.forward.put(key.to_string(), cache);
    }

    /// Keeps only the highest rule id for `branch_name` under `key`. Concurrent writers
    /// installing different rows of one branch all converge on the same survivor.
    fn evict_superseded(&self, key: &str, branch_name: &str) {
        let same_branch: Vec<_> = self
            .forward
            .snapshot(key)
            .into_iter()
            .filter(|cache| cache.branch_name == branch_name)
            .collect();

        let Some(newest) = same_branch.iter().map(|cache| cache.rule_id).max() else {
            return;
        };

        for cache in same_branch.iter().filter(|cache| cache.rule_id < newest) {
            self.remove_cache(key, cache);
        }
    }

    fn remove_cache(&self, key: &str, cache: &Arc<RuleCache>) {
        self.forward.remove(key, cache);
        for item in &cache.rule_items {
            for ip in &item.client_ip_list {
                self.reverse_by_ip.remove(
                    &reverse_key(&item.client_app_id, &cache.namespace_name, ip),
                    &cache.rule_id,
                );
            }
            for label in &item.client_label_list {
                self.reverse_by_label.remove(
                    &reverse_key(&item.client_app_id, &cache.namespace_name, label),
                    &cache.rule_id,
                );
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn reverse_ip_rules(
        &self,
        client_app_id: &str,
        namespace: &str,
        ip: &str,
    ) -> Vec<RuleId> {
        let mut ids = self
            .reverse_by_ip
            .snapshot(&reverse_key(client_app_id, namespace, ip));
        ids.sort();
        ids
    }

    #[cfg(test)]
    pub(crate) fn reverse_key_count(&self) -> usize {
        self.reverse_by_ip.len() + self.reverse_by_label.len()
    }
}

impl Default for RuleCacheStore {
    fn default() -> Self {
        Self::new()
    }
}
