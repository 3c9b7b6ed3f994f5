//! Account registry: quota holders and their balances.
//!
//! Mirrors the register/get/list shape of a typical in-memory pool
//! registry (register, mutate by id, list all), generalized from a
//! per-account `bool` availability flag to a per-priority credit vector.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::balance::Balance;
use crate::error::{SchedulerError, SchedulerResult};

/// Opaque account identifier.
pub type AccountId = String;

/// Per-label task limit: a key prefix paired with a maximum concurrent count.
pub type LabelLimits = HashMap<String, u32>;

/// Immutable-for-the-pass configuration of one account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Credits added per second to each of the `P` capped priority buckets.
    pub charge_rate: Vec<f64>,
    /// Scalar cap applied uniformly to every capped bucket.
    pub max_balance: f64,
    /// Maximum concurrently running tasks for this account (0 = unlimited).
    pub max_fanout: u32,
    /// When true, this account's tasks never cause preemption of others.
    pub disable_preemption: bool,
    /// Label key prefix -> max concurrent tasks whose labels match it.
    pub per_label_task_limits: LabelLimits,
}

impl AccountConfig {
    pub fn new(charge_rate: Vec<f64>, max_balance: f64) -> Self {
        Self {
            charge_rate,
            max_balance,
            max_fanout: 0,
            disable_preemption: false,
            per_label_task_limits: LabelLimits::new(),
        }
    }

    pub fn with_max_fanout(mut self, max_fanout: u32) -> Self {
        self.max_fanout = max_fanout;
        self
    }

    pub fn with_disable_preemption(mut self, disable: bool) -> Self {
        self.disable_preemption = disable;
        self
    }

    pub fn with_label_limit(mut self, key_prefix: impl Into<String>, limit: u32) -> Self {
        self.per_label_task_limits.insert(key_prefix.into(), limit);
        self
    }

    /// The implicit configuration applied to a task whose `account_id`
    /// names no registered account: no charge rate, no cap, unlimited
    /// fanout, no label limits, and never a cause of preemption. Used so
    /// such a task is matched "as if at priority P, the free bucket"
    /// (§3) instead of being refused or treated as unconstrained at
    /// every priority.
    pub(crate) fn unregistered_default() -> Self {
        Self::new(Vec::new(), 0.0)
    }

    /// Reject malformed configuration per §7 `InvalidArgument`.
    pub fn validate(&self) -> SchedulerResult<()> {
        if self.max_balance < 0.0 {
            return Err(SchedulerError::invalid("max_balance must be >= 0"));
        }
        if self.charge_rate.iter().any(|&r| r < 0.0) {
            return Err(SchedulerError::invalid("charge_rate entries must be >= 0"));
        }
        if self.per_label_task_limits.values().any(|&limit| limit == 0) {
            return Err(SchedulerError::invalid(
                "per_label_task_limits entries must be > 0",
            ));
        }
        Ok(())
    }
}

/// Mutable per-account state.
#[derive(Debug, Clone)]
struct Account {
    config: AccountConfig,
    balance: Balance,
}

/// Registry of all accounts known to the engine for the current pass.
#[derive(Debug, Default)]
pub struct AccountRegistry {
    accounts: HashMap<AccountId, Account>,
    /// Fixed number of capped priority levels, `P`. Set by the first
    /// registered account and enforced on every subsequent one.
    priority_levels: Option<usize>,
}

impl AccountRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn priority_levels(&self) -> Option<usize> {
        self.priority_levels
    }

    pub fn contains(&self, id: &str) -> bool {
        self.accounts.contains_key(id)
    }

    /// Register or replace an account's configuration. `initial_balance`
    /// defaults to the zero vector when absent.
    pub fn add_account(
        &mut self,
        id: impl Into<AccountId>,
        config: AccountConfig,
        initial_balance: Option<Balance>,
    ) -> SchedulerResult<()> {
        config.validate()?;
        let id = id.into();

        let levels = config.charge_rate.len();
        if let Some(expected) = self.priority_levels {
            if levels != expected && !config.charge_rate.is_empty() {
                return Err(SchedulerError::invalid(format!(
                    "account {id} charge_rate has {levels} levels, pool is configured for {expected}"
                )));
            }
        } else if levels > 0 {
            self.priority_levels = Some(levels);
        }

        let levels = self.priority_levels.unwrap_or(levels);
        let mut balance = initial_balance.unwrap_or_else(|| Balance::zero(levels));
        balance.apply_cap(config.max_balance);

        debug!(account_id = %id, max_fanout = config.max_fanout, "account registered");
        self.accounts.insert(id, Account { config, balance });
        Ok(())
    }

    pub fn remove_account(&mut self, id: &str) -> SchedulerResult<()> {
        self.accounts
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| SchedulerError::AccountNotFound { id: id.to_string() })
    }

    pub fn set_account_config(&mut self, id: &str, config: AccountConfig) -> SchedulerResult<()> {
        config.validate()?;
        let account = self
            .accounts
            .get_mut(id)
            .ok_or_else(|| SchedulerError::AccountNotFound { id: id.to_string() })?;
        account.balance.apply_cap(config.max_balance);
        account.config = config;
        Ok(())
    }

    /// Administrative reset, bounded by the account's `max_balance`.
    pub fn set_balance(&mut self, id: &str, mut vector: Balance) -> SchedulerResult<()> {
        let account = self
            .accounts
            .get_mut(id)
            .ok_or_else(|| SchedulerError::AccountNotFound { id: id.to_string() })?;
        vector.apply_cap(account.config.max_balance);
        account.balance = vector;
        Ok(())
    }

    pub fn balance(&self, id: &str) -> SchedulerResult<&Balance> {
        self.accounts
            .get(id)
            .map(|a| &a.balance)
            .ok_or_else(|| SchedulerError::AccountNotFound { id: id.to_string() })
    }

    pub fn config(&self, id: &str) -> SchedulerResult<&AccountConfig> {
        self.accounts
            .get(id)
            .map(|a| &a.config)
            .ok_or_else(|| SchedulerError::AccountNotFound { id: id.to_string() })
    }

    /// Deterministic iteration order (sorted by id), per §9's
    /// iteration-determinism design note.
    pub fn ids(&self) -> Vec<AccountId> {
        let mut ids: Vec<_> = self.accounts.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn iter_sorted(&self) -> impl Iterator<Item = (&AccountId, &AccountConfig, &Balance)> {
        let mut entries: BTreeMap<&AccountId, &Account> = BTreeMap::new();
        for (id, account) in &self.accounts {
            entries.insert(id, account);
        }
        entries
            .into_iter()
            .map(|(id, account)| (id, &account.config, &account.balance))
    }

    /// Advance one account's balance forward by `dt` seconds, charging
    /// `charges[p]` worth of running-task cost out of bucket `p`. This is
    /// the per-account body of §4.1's `advance`; the caller (`Engine`)
    /// is responsible for computing `charges` from the worker table and
    /// invoking this once per account, per pass.
    pub(crate) fn advance_account(
        &mut self,
        id: &str,
        dt: f64,
        charges: &[f64],
    ) -> SchedulerResult<()> {
        let account = self
            .accounts
            .get_mut(id)
            .ok_or_else(|| SchedulerError::AccountNotFound { id: id.to_string() })?;

        let had_deficit = {
            let p = account.balance.priority_levels();
            (0..p.min(charges.len())).any(|i| charges[i] > account.balance.get(i))
        };

        account.balance.apply_pass(
            &account.config.charge_rate,
            dt,
            charges,
            account.config.max_balance,
        );

        if had_deficit {
            warn!(account_id = %id, "balance spillover: cost cascaded into a lower priority bucket");
        }
        Ok(())
    }

    /// Credit `amount` back onto bucket `q` of one account's balance, then
    /// re-clamp to its cap. Used by preemption (§4.6 step 5) to return a
    /// victim's accrued-but-unfinished cost rather than let it vanish.
    /// A missing account is treated as a no-op: an unregistered account's
    /// tasks never accrue cost in the first place (see `unregistered_default`).
    pub(crate) fn refund_account(&mut self, id: &str, q: usize, amount: f64) {
        if amount == 0.0 {
            return;
        }
        if let Some(account) = self.accounts.get_mut(id) {
            account.balance.refund(q, amount);
            account.balance.apply_cap(account.config.max_balance);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_account_clamps_initial_balance_to_cap() {
        let mut registry = AccountRegistry::new();
        let config = AccountConfig::new(vec![1.0, 0.0, 0.0], 10.0);
        registry
            .add_account("a", config, Some(Balance::from_vec(vec![50.0, 0.0, 0.0, 0.0])))
            .unwrap();
        assert_eq!(registry.balance("a").unwrap().get(0), 10.0);
    }

    #[test]
    fn rejects_negative_charge_rate() {
        let config = AccountConfig::new(vec![-1.0], 10.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_account_is_not_found() {
        let registry = AccountRegistry::new();
        assert!(matches!(
            registry.balance("missing"),
            Err(SchedulerError::AccountNotFound { .. })
        ));
    }
}
