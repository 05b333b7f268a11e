//! Standard correctness predicates.

use std::collections::BTreeMap;

use faultline_core::Notification;

use super::{Predicate, PredicateResult, ScenarioSnapshot, Violation};

/// Correct replicas never commit different entries at the same sequence.
///
/// Compares every pair of correct replicas over the sequences both have
/// committed and fails on the first mismatch.
#[derive(Debug, Default, Clone, Copy)]
pub struct Agreement;

impl Predicate for Agreement {
    fn name(&self) -> &'static str {
        "Agreement"
    }

    fn check(&self, state: &ScenarioSnapshot) -> PredicateResult {
        let correct: Vec<_> = state.correct_replicas().collect();
        for (i, left) in correct.iter().enumerate() {
            for right in &correct[i + 1..] {
                for (sequence, ours) in left.log.iter() {
                    let Some(theirs) = right.log.get(sequence) else {
                        continue;
                    };
                    if ours != theirs {
                        return Err(Violation::new(
                            self.name(),
                            format!(
                                "replicas {} and {} disagree at sequence {sequence}: {ours} vs \
                                 {theirs}",
                                left.id, right.id
                            ),
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

/// A correct replica never commits the same entry twice.
#[derive(Debug, Default, Clone, Copy)]
pub struct Integrity;

impl Predicate for Integrity {
    fn name(&self) -> &'static str {
        "Integrity"
    }

    fn check(&self, state: &ScenarioSnapshot) -> PredicateResult {
        for replica in state.correct_replicas() {
            let mut seen = BTreeMap::new();
            for (sequence, entry) in replica.log.iter() {
                if let Some(first) = seen.insert(entry, sequence) {
                    return Err(Violation::new(
                        self.name(),
                        format!(
                            "replica {} committed {entry} at sequences {first} and {sequence}",
                            replica.id
                        ),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Some replica commits within a grace period after GST.
///
/// Holds trivially before GST. Once GST is observed the predicate counts
/// schedule entries; it holds while no more than `grace_period` have
/// elapsed, and for good once any replica commits after GST.
#[derive(Debug, Clone, Copy)]
pub struct BoundedLiveness {
    grace_period: usize,
    gst_at: Option<usize>,
    committed_since_gst: bool,
}

impl BoundedLiveness {
    /// Liveness with the given grace period.
    pub fn new(grace_period: usize) -> Self {
        Self { grace_period, gst_at: None, committed_since_gst: false }
    }
}

impl Predicate for BoundedLiveness {
    fn name(&self) -> &'static str {
        "Liveness"
    }

    fn observe(&mut self, notice: &Notification, schedule_len: usize) {
        match notice {
            Notification::GlobalStabilization if self.gst_at.is_none() => {
                self.gst_at = Some(schedule_len);
            },
            Notification::LocalCommit { .. } if self.gst_at.is_some() => {
                self.committed_since_gst = true;
            },
            _ => {},
        }
    }

    fn check(&self, state: &ScenarioSnapshot) -> PredicateResult {
        let Some(gst_at) = self.gst_at else {
            return Ok(());
        };
        if self.committed_since_gst {
            return Ok(());
        }

        let elapsed = state.schedule_len.saturating_sub(gst_at);
        if elapsed > self.grace_period {
            return Err(Violation::new(
                self.name(),
                format!(
                    "Liveness violated: {elapsed} events since GST (max allowed: {})",
                    self.grace_period
                ),
            ));
        }
        Ok(())
    }
}

/// At least one event is still queued.
#[derive(Debug, Default, Clone, Copy)]
pub struct Deadlock;

impl Predicate for Deadlock {
    fn name(&self) -> &'static str {
        "Deadlock"
    }

    fn check(&self, state: &ScenarioSnapshot) -> PredicateResult {
        if state.queued == 0 {
            return Err(Violation::new(
                self.name(),
                format!(
                    "no queued events ({} delivered, {} dropped)",
                    state.delivered, state.dropped
                ),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicates::ReplicaSnapshot;

    fn replica(id: &str, log: &[(u64, &str)]) -> ReplicaSnapshot {
        log.iter().fold(ReplicaSnapshot::new(id), |r, (seq, entry)| r.with_entry(*seq, *entry))
    }

    fn cluster(replicas: Vec<ReplicaSnapshot>) -> ScenarioSnapshot {
        let base = ScenarioSnapshot::empty().with_events(1, 0, 0);
        replicas.into_iter().fold(base, ScenarioSnapshot::with_replica)
    }

    #[test]
    fn agreement_holds_on_common_prefix() {
        let state = cluster(vec![
            replica("A", &[(1, "X"), (2, "Y")]),
            replica("B", &[(1, "X")]),
            replica("C", &[]),
        ]);
        assert!(Agreement.check(&state).is_ok());
    }

    #[test]
    fn agreement_names_conflicting_sequence() {
        let state = cluster(vec![replica("A", &[(1, "X")]), replica("B", &[(1, "Y")])]);

        let violation = Agreement.check(&state).expect_err("conflict");
        assert_eq!(violation.predicate, "Agreement");
        assert!(violation.message.contains("sequence 1"), "{violation}");
    }

    #[test]
    fn agreement_ignores_faulty_replicas() {
        let state = ScenarioSnapshot::empty()
            .with_replica(ReplicaSnapshot::new("A").with_entry(1, "X"))
            .with_replica(ReplicaSnapshot::new("D").faulty().with_entry(1, "Y"));
        assert!(Agreement.check(&state).is_ok());
    }

    #[test]
    fn integrity_rejects_duplicate_entries() {
        let state = cluster(vec![replica("A", &[(1, "X"), (2, "X")])]);

        let violation = Integrity.check(&state).expect_err("duplicate");
        assert!(violation.message.contains("sequences 1 and 2"), "{violation}");
    }

    #[test]
    fn integrity_allows_distinct_entries() {
        let state = cluster(vec![replica("A", &[(1, "X"), (2, "Y")])]);
        assert!(Integrity.check(&state).is_ok());
    }

    #[test]
    fn liveness_holds_before_gst() {
        let liveness = BoundedLiveness::new(10);
        let state = ScenarioSnapshot::empty().with_schedule_len(1_000);
        assert!(liveness.check(&state).is_ok());
    }

    #[test]
    fn liveness_fails_after_grace_period() {
        let mut liveness = BoundedLiveness::new(10);
        liveness.observe(&Notification::GlobalStabilization, 5);

        let at_bound = ScenarioSnapshot::empty().with_schedule_len(15);
        assert!(liveness.check(&at_bound).is_ok());

        let past = ScenarioSnapshot::empty().with_schedule_len(16);
        let violation = liveness.check(&past).expect_err("stalled");
        assert_eq!(
            violation.message,
            "Liveness violated: 11 events since GST (max allowed: 10)"
        );
    }

    #[test]
    fn liveness_holds_for_good_after_commit() {
        let mut liveness = BoundedLiveness::new(10);
        liveness.observe(&Notification::GlobalStabilization, 5);
        liveness.observe(&Notification::LocalCommit { replica: "A".into(), sequence: 1 }, 12);

        let state = ScenarioSnapshot::empty().with_schedule_len(10_000);
        assert!(liveness.check(&state).is_ok());
    }

    #[test]
    fn commits_before_gst_do_not_count() {
        let mut liveness = BoundedLiveness::new(2);
        liveness.observe(&Notification::LocalCommit { replica: "A".into(), sequence: 1 }, 1);
        liveness.observe(&Notification::GlobalStabilization, 3);

        let state = ScenarioSnapshot::empty().with_schedule_len(6);
        assert!(liveness.check(&state).is_err());
    }

    #[test]
    fn deadlock_depends_only_on_queue() {
        let idle = ScenarioSnapshot::empty().with_events(0, 40, 3);
        let busy = ScenarioSnapshot::empty().with_events(1, 0, 0);

        assert!(Deadlock.check(&idle).is_err());
        assert!(Deadlock.check(&busy).is_ok());
    }
}
