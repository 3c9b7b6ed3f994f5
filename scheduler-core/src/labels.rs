//! Per-account, per-label-prefix concurrency counter.
//!
//! Tracks how many currently-running (or already-matched-this-pass) tasks
//! match each of an account's configured label-key prefixes, so the
//! matcher can enforce `perLabelTaskLimits` without rescanning the whole
//! worker table on every candidate.

use std::collections::HashMap;

use crate::account::{AccountId, LabelLimits};

#[derive(Debug, Default, Clone)]
pub struct LabelCounter {
    // (account_id, key prefix) -> running count
    counts: HashMap<(AccountId, String), u32>,
}

impl LabelCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// The single label (if any) in `labels` whose value starts with
    /// `key_prefix`, chosen deterministically: the lexicographically
    /// smallest matching label, per §4.4's "first encountered by
    /// deterministic iteration" rule.
    fn first_match<'a>(labels: &'a std::collections::HashSet<String>, key_prefix: &str) -> Option<&'a str> {
        let mut matches: Vec<&str> = labels
            .iter()
            .filter(|l| l.starts_with(key_prefix))
            .map(|s| s.as_str())
            .collect();
        matches.sort_unstable();
        matches.into_iter().next()
    }

    /// Record one task's labels against `account`'s configured limits.
    /// For every limit key the label set matches (exactly one match is
    /// used even if several labels share the prefix), the bucket is
    /// incremented once.
    pub fn count(
        &mut self,
        labels: &std::collections::HashSet<String>,
        account_id: &str,
        limits: &LabelLimits,
    ) {
        for key in limits.keys() {
            if Self::first_match(labels, key).is_some() {
                *self
                    .counts
                    .entry((account_id.to_string(), key.clone()))
                    .or_insert(0) += 1;
            }
        }
    }

    /// Undo a previous [`LabelCounter::count`] call, used when a
    /// preempted task's labels must be released back.
    pub fn release(
        &mut self,
        labels: &std::collections::HashSet<String>,
        account_id: &str,
        limits: &LabelLimits,
    ) {
        for key in limits.keys() {
            if Self::first_match(labels, key).is_some() {
                if let Some(count) = self.counts.get_mut(&(account_id.to_string(), key.clone())) {
                    *count = count.saturating_sub(1);
                }
            }
        }
    }

    /// True iff adding one more task with `labels` would push any
    /// matching key's bucket to or past its configured limit. An
    /// account with no `perLabelTaskLimits` always returns false.
    pub fn is_at_any_limit(
        &self,
        labels: &std::collections::HashSet<String>,
        account_id: &str,
        limits: &LabelLimits,
    ) -> bool {
        for (key, &limit) in limits {
            if Self::first_match(labels, key).is_some() {
                let current = self
                    .counts
                    .get(&(account_id.to_string(), key.clone()))
                    .copied()
                    .unwrap_or(0);
                if current >= limit {
                    return true;
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn labels(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn no_limits_never_at_limit() {
        let counter = LabelCounter::new();
        assert!(!counter.is_at_any_limit(&labels(&["gpu:v100"]), "a", &LabelLimits::new()));
    }

    #[test]
    fn duplicate_prefix_matches_count_once() {
        let mut counter = LabelCounter::new();
        let mut limits = LabelLimits::new();
        limits.insert("gpu:".to_string(), 1);

        let task_labels = labels(&["gpu:v100", "gpu:a100"]);
        counter.count(&task_labels, "a", &limits);
        assert!(counter.is_at_any_limit(&task_labels, "a", &limits));
    }

    #[test]
    fn release_undoes_count() {
        let mut counter = LabelCounter::new();
        let mut limits = LabelLimits::new();
        limits.insert("gpu:".to_string(), 1);
        let task_labels = labels(&["gpu:v100"]);

        counter.count(&task_labels, "a", &limits);
        assert!(counter.is_at_any_limit(&task_labels, "a", &limits));
        counter.release(&task_labels, "a", &limits);
        assert!(!counter.is_at_any_limit(&task_labels, "a", &limits));
    }
}
