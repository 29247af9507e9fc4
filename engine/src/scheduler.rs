//! Generation-tokened deferred work.
//!
//! Every unit of deferred work captures the [SchedulerToken] that was current when
//! it was scheduled. Outstanding work is never cancelled: when it comes due, the
//! caller compares the captured token with the current one and drops the work if
//! they differ.

use cometa_types::RoundId;
use std::{cmp::Ordering, collections::BinaryHeap};

/// Generation counter bound to the round it was issued for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SchedulerToken {
    round: Option<RoundId>,
    generation: u64,
}

impl SchedulerToken {
    pub fn round(&self) -> Option<RoundId> {
        self.round
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The token that supersedes `self`, bound to `round`.
    pub(crate) fn bump(self, round: RoundId) -> Self {
        Self {
            round: Some(round),
            generation: self.generation + 1,
        }
    }
}

/// Kinds of deferred work the engine schedules.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Task {
    /// Insert the next synthetic participant during betting.
    SeedInsertion,
    /// Retire synthetic participants whose target has been crossed.
    RetirementSweep,
}

#[derive(Debug)]
struct Deferred {
    due: u64,
    seq: u64,
    token: SchedulerToken,
    task: Task,
}

impl PartialEq for Deferred {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Deferred {}

impl PartialOrd for Deferred {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Deferred {
    // Reversed so the max-heap yields the earliest due (then earliest scheduled) first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Queue of deferred work ordered by due instant.
#[derive(Debug, Default)]
pub struct Scheduler {
    queue: BinaryHeap<Deferred>,
    seq: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, token: SchedulerToken, due: u64, task: Task) {
        self.seq += 1;
        self.queue.push(Deferred {
            due,
            seq: self.seq,
            token,
            task,
        });
    }

    /// Earliest instant at which queued work comes due.
    pub fn next_deadline(&self) -> Option<u64> {
        self.queue.peek().map(|deferred| deferred.due)
    }

    /// Removes and returns the earliest work due at or before `now`.
    pub fn pop_due(&mut self, now: u64) -> Option<(SchedulerToken, Task)> {
        if self.queue.peek()?.due > now {
            return None;
        }
        self.queue
            .pop()
            .map(|deferred| (deferred.token, deferred.task))
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
