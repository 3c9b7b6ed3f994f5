//! Balance vectors: the economic representation of priority.
//!
//! A [`Balance`] is a fixed-length vector of `P + 1` credits: one bucket
//! per priority level `0..P`, plus a final "free" bucket `P` that never
//! requires credit and is never capped. Index 0 is the highest priority.
//! Tasks running at priority `p < P` cost one credit per second out of
//! bucket `p`; when that bucket empties mid-task the deficit spills into
//! `p + 1`, which is how a task gets demoted without any explicit state
//! transition (see [`Balance::apply_pass`]).

use serde::{Deserialize, Serialize};

/// A priority-bucketed credit vector of length `priority_levels() + 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance(Vec<f64>);

impl Balance {
    /// A zeroed balance with `priority_levels` capped buckets plus the free bucket.
    pub fn zero(priority_levels: usize) -> Self {
        Self(vec![0.0; priority_levels + 1])
    }

    /// Build from an explicit vector; `len() - 1` becomes the number of capped levels.
    pub fn from_vec(values: Vec<f64>) -> Self {
        Self(values)
    }

    /// Number of capped priority levels `P` (the vector has `P + 1` entries).
    pub fn priority_levels(&self) -> usize {
        self.0.len() - 1
    }

    /// Index of the free bucket (`P`).
    pub fn free_bucket(&self) -> usize {
        self.priority_levels()
    }

    pub fn get(&self, index: usize) -> f64 {
        self.0[index]
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    fn set(&mut self, index: usize, value: f64) {
        self.0[index] = value;
    }

    /// Administrative reset, bounded by `max_balance` on every capped level.
    pub fn clamp_to_cap(&mut self, max_balance: f64) {
        let p = self.priority_levels();
        for i in 0..p {
            if self.0[i] > max_balance {
                self.0[i] = max_balance;
            }
            if self.0[i] < 0.0 {
                self.0[i] = 0.0;
            }
        }
    }

    /// Add `charge_rate[i] * dt` to every capped bucket. `charge_rate` may be
    /// shorter than `priority_levels()` (missing entries are treated as zero),
    /// matching the "empty chargeRate may still dispatch via the free bucket" case.
    pub fn recharge(&mut self, charge_rate: &[f64], dt: f64) {
        let p = self.priority_levels();
        for i in 0..p {
            let rate = charge_rate.get(i).copied().unwrap_or(0.0);
            self.0[i] += rate * dt;
        }
    }

    /// Apply one pass's worth of accounting to this balance:
    /// recharge, then per-priority running-task charges, then cap clamp,
    /// then the spillover cascade. `charges[p]` is the total seconds of
    /// priority-`p` running-task cost accrued since the last pass.
    ///
    /// This is the single place the spillover rule lives, per the design
    /// note that any code path advancing time must preserve the invariant.
    pub fn apply_pass(&mut self, charge_rate: &[f64], dt: f64, charges: &[f64], max_balance: f64) {
        let p = self.priority_levels();

        self.recharge(charge_rate, dt);

        for i in 0..p.min(charges.len()) {
            self.0[i] -= charges[i];
        }

        // Cap clamp (step 3): only the upper bound, only on capped levels.
        // A balance driven negative by step 2 is left negative here; the
        // spillover cascade below is what brings it back to zero.
        for i in 0..p {
            if self.0[i] > max_balance {
                self.0[i] = max_balance;
            }
        }

        // Spillover cascade (step 4): clamp deficits to zero, pushing the
        // excess into the next bucket, cascading all the way to the free
        // bucket if needed.
        let mut carry = 0.0;
        for i in 0..=p {
            self.0[i] -= carry;
            if i < p && self.0[i] < 0.0 {
                carry = -self.0[i];
                self.0[i] = 0.0;
            } else {
                carry = 0.0;
            }
        }
    }

    /// Apply the upper-bound cap (called separately from `apply_pass` by
    /// administrative resets such as `set_balance`).
    pub fn apply_cap(&mut self, max_balance: f64) {
        self.clamp_to_cap(max_balance);
    }

    pub fn add_assign(&mut self, other: &Balance) {
        for (a, b) in self.0.iter_mut().zip(other.0.iter()) {
            *a += b;
        }
    }

    pub fn sub_assign(&mut self, other: &Balance) {
        for (a, b) in self.0.iter_mut().zip(other.0.iter()) {
            *a -= b;
        }
    }

    /// The smallest priority class the account can currently afford,
    /// per the `balance[p] > 0` gating rule resolved in DESIGN.md
    /// (level `P`, the free bucket, always qualifies).
    pub fn affordable_priority(&self) -> usize {
        let p = self.priority_levels();
        for i in 0..p {
            if self.0[i] > 0.0 {
                return i;
            }
        }
        p
    }

    /// Whether the account can be charged at priority `p` (`p == P` is
    /// always true: the free bucket needs no balance).
    pub fn can_afford(&self, p: usize) -> bool {
        if p >= self.priority_levels() {
            true
        } else {
            self.0[p] > 0.0
        }
    }

    /// The §4.2 sort key: smallest `p` with `balance[p] > balance[p+1]`,
    /// falling back to the free bucket if no such level exists.
    pub fn priority_class(&self) -> usize {
        let p = self.priority_levels();
        for i in 0..p {
            if self.0[i] > self.0[i + 1] {
                return i;
            }
        }
        p
    }

    /// Credit a one-time refund at priority `q` (used when preemption
    /// returns a partially-charged task's remaining cost to its account).
    pub fn refund(&mut self, q: usize, amount: f64) {
        self.0[q] += amount;
    }

    /// Charge a one-time cost at priority `q`.
    pub fn charge(&mut self, q: usize, amount: f64) {
        self.0[q] -= amount;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recharge_respects_missing_rates() {
        let mut b = Balance::zero(3);
        b.recharge(&[1.0], 5.0);
        assert_eq!(b.as_slice(), &[5.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn spillover_cascades_deficit_forward() {
        let mut b = Balance::from_vec(vec![2.0, 0.0, 0.0, 0.0]);
        // Charge 5 seconds of priority-0 work against only 2 credits.
        b.apply_pass(&[0.0, 0.0, 0.0], 0.0, &[5.0], 100.0);
        assert_eq!(b.get(0), 0.0);
        assert_eq!(b.get(1), 0.0);
        assert_eq!(b.get(2), 0.0);
        assert_eq!(b.get(3), -3.0); // free bucket is never clamped
    }

    #[test]
    fn affordable_priority_skips_drained_buckets() {
        let b = Balance::from_vec(vec![0.0, 4.0, 0.0, 0.0]);
        assert_eq!(b.affordable_priority(), 1);
        assert!(b.can_afford(3));
        assert!(!b.can_afford(0));
    }

    #[test]
    fn cap_clamps_upper_bound_only() {
        let mut b = Balance::from_vec(vec![150.0, -5.0, 0.0, 0.0]);
        b.clamp_to_cap(100.0);
        assert_eq!(b.get(0), 100.0);
        assert_eq!(b.get(1), 0.0);
    }
}
