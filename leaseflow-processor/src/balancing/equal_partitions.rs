use std::{collections::BTreeMap, time::Duration};

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use crate::lease::Lease;

use super::LoadBalancingStrategy;

/// Spreads leases evenly: every host aims for `ceil(partitions / workers)`
/// leases, clamped to the configured bounds. Hosts under target take expired
/// or unowned leases first, and otherwise steal one lease per cycle from the
/// busiest worker.
///
/// Ties are broken deterministically: expired leases are taken in ascending
/// partition token order, the busiest worker is the lexicographically
/// smallest host name among those holding the most leases, and the stolen
/// lease is that worker's lease with the smallest partition token.
#[derive(Debug, Clone)]
pub struct EqualPartitionsBalancingStrategy {
    host_name: String,
    min_partition_count: usize,
    max_partition_count: usize,
    lease_expiration_interval: Duration,
}

impl EqualPartitionsBalancingStrategy {
    /// A zero `min_partition_count` or `max_partition_count` leaves that
    /// bound unset.
    pub fn new(
        host_name: impl Into<String>,
        min_partition_count: usize,
        max_partition_count: usize,
        lease_expiration_interval: Duration,
    ) -> Self {
        Self {
            host_name: host_name.into(),
            min_partition_count,
            max_partition_count,
            lease_expiration_interval,
        }
    }

    pub fn select_leases_to_take_at(&self, all_leases: &[Lease], now: DateTime<Utc>) -> Vec<Lease> {
        let mut all_partitions: BTreeMap<&str, &Lease> = BTreeMap::new();
        let mut expired: BTreeMap<&str, &Lease> = BTreeMap::new();
        let mut worker_counts: BTreeMap<&str, usize> = BTreeMap::new();

        for lease in all_leases {
            all_partitions.insert(&lease.partition_token, lease);
            if lease.is_unowned() || lease.is_expired(now, self.lease_expiration_interval) {
                expired.insert(&lease.partition_token, lease);
            } else {
                *worker_counts.entry(lease.owner.as_str()).or_default() += 1;
            }
        }
        worker_counts.entry(self.host_name.as_str()).or_default();

        let partition_count = all_partitions.len();
        let worker_count = worker_counts.len();
        if partition_count == 0 {
            return vec![];
        }

        let target = self.target_partition_count(partition_count, worker_count);
        let my_count = worker_counts
            .get(self.host_name.as_str())
            .copied()
            .unwrap_or_default();
        if my_count >= target {
            trace!(target, my_count, "at or above quota");
            return vec![];
        }
        let needed = target - my_count;

        if !expired.is_empty() {
            return expired
                .into_values()
                .take(needed)
                .cloned()
                .collect();
        }

        match Self::lease_to_steal(&worker_counts, target, needed, &all_partitions) {
            Some(lease) => {
                debug!(
                    partition = %lease.partition_token,
                    from = %lease.owner,
                    target,
                    my_count,
                    "stealing lease"
                );
                vec![lease.clone()]
            }
            None => vec![],
        }
    }

    fn target_partition_count(&self, partition_count: usize, worker_count: usize) -> usize {
        let mut target = 1;
        if partition_count > worker_count {
            target = partition_count.div_ceil(worker_count);
        }
        if self.max_partition_count > 0 && target > self.max_partition_count {
            target = self.max_partition_count;
        }
        if self.min_partition_count > 0 && target < self.min_partition_count {
            target = self.min_partition_count;
        }
        target
    }

    fn lease_to_steal<'a>(
        worker_counts: &BTreeMap<&str, usize>,
        target: usize,
        needed: usize,
        all_partitions: &BTreeMap<&str, &'a Lease>,
    ) -> Option<&'a Lease> {
        // BTreeMap iterates hosts in ascending order, so keeping the first
        // strict maximum breaks ties toward the smallest name.
        let mut busiest: Option<(&str, usize)> = None;
        for (&worker, &count) in worker_counts {
            if busiest.is_none_or(|(_, most)| count > most) {
                busiest = Some((worker, count));
            }
        }
        let (worker, count) = busiest?;

        let threshold = target - usize::from(needed > 1);
        if count <= threshold {
            return None;
        }
        all_partitions
            .values()
            .find(|lease| lease.is_owned_by(worker))
            .copied()
    }
}

impl LoadBalancingStrategy for EqualPartitionsBalancingStrategy {
    fn select_leases_to_take(&self, all_leases: &[Lease]) -> Vec<Lease> {
        self.select_leases_to_take_at(all_leases, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXPIRY: Duration = Duration::from_secs(60);

    fn owned(token: &str, owner: &str, now: DateTime<Utc>) -> Lease {
        Lease::new(token).with_owner(owner, now)
    }

    fn strategy(host: &str) -> EqualPartitionsBalancingStrategy {
        EqualPartitionsBalancingStrategy::new(host, 0, 0, EXPIRY)
    }

    #[test]
    fn test_takes_all_unowned_when_alone() {
        let now = Utc::now();
        let leases: Vec<_> = (0..5).map(|i| Lease::new(i.to_string())).collect();
        let taken = strategy("a").select_leases_to_take_at(&leases, now);
        assert_eq!(taken.len(), 5);
    }

    #[test]
    fn test_steals_from_busiest_worker() {
        let now = Utc::now();
        let leases = vec![
            owned("0", "a", now),
            owned("1", "b", now),
            owned("2", "b", now),
            owned("3", "b", now),
        ];
        let taken = strategy("a").select_leases_to_take_at(&leases, now);
        assert_eq!(taken.len(), 1);
        assert_eq!(taken[0].owner, "b");
        assert_eq!(taken[0].partition_token, "1");
    }

    #[test]
    fn test_prefers_expired_over_stealing() {
        let now = Utc::now();
        let stale = now - chrono::Duration::seconds(120);
        let leases = vec![
            owned("0", "a", now),
            owned("1", "b", now),
            owned("2", "b", now),
            owned("3", "c", stale),
        ];
        let taken = strategy("a").select_leases_to_take_at(&leases, now);
        assert_eq!(taken.len(), 1);
        assert_eq!(taken[0].partition_token, "3");
    }

    #[test]
    fn test_expired_taken_in_token_order_up_to_need() {
        let now = Utc::now();
        let leases = vec![
            Lease::new("d"),
            Lease::new("b"),
            owned("a", "other", now),
            owned("e", "other", now),
            Lease::new("c"),
            owned("f", "other", now),
        ];
        // 6 partitions over 2 workers: target 3, need 3
        let taken = strategy("me").select_leases_to_take_at(&leases, now);
        let tokens: Vec<_> = taken.iter().map(|l| l.partition_token.as_str()).collect();
        assert_eq!(tokens, vec!["b", "c", "d"]);
    }

    #[test]
    fn test_no_action_at_quota() {
        let now = Utc::now();
        let leases = vec![
            owned("0", "a", now),
            owned("1", "a", now),
            owned("2", "b", now),
            owned("3", "b", now),
        ];
        assert!(strategy("a").select_leases_to_take_at(&leases, now).is_empty());
    }

    #[test]
    fn test_above_quota_does_not_release() {
        let now = Utc::now();
        let leases = vec![
            owned("0", "a", now),
            owned("1", "a", now),
            owned("2", "a", now),
            owned("3", "b", now),
            Lease::new("4"),
        ];
        assert!(strategy("a").select_leases_to_take_at(&leases, now).is_empty());
    }

    #[test]
    fn test_no_steal_when_balanced_within_one() {
        let now = Utc::now();
        // 5 partitions, 2 workers: target 3; b holds 3, a holds 2, need 1.
        // b is not above target, nothing to steal.
        let leases = vec![
            owned("0", "a", now),
            owned("1", "a", now),
            owned("2", "b", now),
            owned("3", "b", now),
            owned("4", "b", now),
        ];
        assert!(strategy("a").select_leases_to_take_at(&leases, now).is_empty());
    }

    #[test]
    fn test_steal_threshold_relaxed_when_needing_several() {
        let now = Utc::now();
        // 6 partitions, 3 workers: target 2. c owns none, needs 2; a and b
        // own 3 each, which exceeds target - 1. Tie goes to "a".
        let leases = vec![
            owned("0", "a", now),
            owned("1", "a", now),
            owned("2", "a", now),
            owned("3", "b", now),
            owned("4", "b", now),
            owned("5", "b", now),
        ];
        let taken = strategy("c").select_leases_to_take_at(&leases, now);
        assert_eq!(taken.len(), 1);
        assert_eq!(taken[0].owner, "a");
        assert_eq!(taken[0].partition_token, "0");
    }

    #[test]
    fn test_target_bounds() {
        let now = Utc::now();
        let leases: Vec<_> = (0..10).map(|i| Lease::new(i.to_string())).collect();

        let capped = EqualPartitionsBalancingStrategy::new("a", 0, 4, EXPIRY);
        assert_eq!(capped.select_leases_to_take_at(&leases, now).len(), 4);

        let leases = vec![owned("0", "b", now), owned("1", "c", now), Lease::new("2")];
        // 3 partitions, 3 workers: target 1, raised to 2 by the minimum.
        let floored = EqualPartitionsBalancingStrategy::new("a", 2, 0, EXPIRY);
        assert_eq!(floored.select_leases_to_take_at(&leases, now).len(), 1);
    }

    #[test]
    fn test_never_exceeds_need() {
        let now = Utc::now();
        let stale = now - chrono::Duration::seconds(600);
        for owned_by_me in 0..6 {
            for expired_count in 0..6 {
                let mut leases = vec![];
                for i in 0..owned_by_me {
                    leases.push(owned(&format!("m{i}"), "me", now));
                }
                for i in 0..expired_count {
                    leases.push(owned(&format!("x{i}"), "gone", stale));
                }
                for i in 0..4 {
                    leases.push(owned(&format!("o{i}"), "other", now));
                }
                let partitions = leases.len();
                let workers = 2;
                let target = if partitions > workers {
                    partitions.div_ceil(workers)
                } else {
                    1
                };
                let taken = strategy("me").select_leases_to_take_at(&leases, now);
                let need = target.saturating_sub(owned_by_me);
                assert!(taken.len() <= need, "{owned_by_me} {expired_count}");
                if need == 0 {
                    assert!(taken.is_empty());
                }
            }
        }
    }

    #[test]
    fn test_empty_snapshot() {
        assert!(strategy("a").select_leases_to_take(&[]).is_empty());
    }
}
