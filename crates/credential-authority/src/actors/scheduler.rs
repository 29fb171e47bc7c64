//! FIFO eviction schedule.
//!
//! Every successful user fetch cuts one [`EvictionTicket`]. Tickets arrive in
//! creation order, so `scheduled_at` is non-decreasing along the queue and a
//! sweep can stop at the first ticket that is still too young.

use super::messages::EvictionTicket;
use crate::types::{Timestamp, Uid};

use std::collections::VecDeque;

/// Append-only queue of pending eviction reviews.
#[derive(Debug)]
pub struct EvictionScheduler {
    retention: chrono::TimeDelta,
    tickets: VecDeque<EvictionTicket>,
}

impl EvictionScheduler {
    /// Create a scheduler that reviews tickets once they are older than `retention`.
    #[must_use]
    pub fn new(retention: std::time::Duration) -> Self {
        Self {
            retention: chrono::TimeDelta::from_std(retention).unwrap_or(chrono::TimeDelta::MAX),
            tickets: VecDeque::new(),
        }
    }

    pub fn push(&mut self, ticket: EvictionTicket) {
        self.tickets.push_back(ticket);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }

    /// Pop every ticket older than the retention window and return those
    /// whose user should be evicted.
    ///
    /// `last_access` reports when a user was last touched, or `None` when the
    /// user is no longer cached. A ticket evicts only if its user is cached and
    /// has not been touched after the ticket was cut; all examined tickets are
    /// discarded either way.
    pub fn sweep<F>(&mut self, now: Timestamp, last_access: F) -> Vec<Uid>
    where
        F: Fn(&Uid) -> Option<Timestamp>,
    {
        let mut evict = Vec::new();

        while let Some(ticket) = self.tickets.front() {
            if now.signed_duration_since(ticket.scheduled_at) <= self.retention {
                // All later tickets are younger still
                break;
            }

            if let Some(ticket) = self.tickets.pop_front() {
                let idle = last_access(&ticket.uid)
                    .is_some_and(|accessed| accessed <= ticket.scheduled_at);
                if idle && !evict.contains(&ticket.uid) {
                    evict.push(ticket.uid);
                }
            }
        }

        evict
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;
    use std::time::Duration;

    fn at(minutes: i64) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::TimeDelta::minutes(minutes)
    }

    fn ticket(uid: &str, minutes: i64) -> EvictionTicket {
        EvictionTicket {
            uid: Uid::new(uid),
            scheduled_at: at(minutes),
        }
    }

    fn scheduler() -> EvictionScheduler {
        EvictionScheduler::new(Duration::from_secs(8 * 60))
    }

    #[test]
    fn test_young_tickets_are_kept() {
        let mut sched = scheduler();
        sched.push(ticket("u1", 0));

        let access = HashMap::from([(Uid::new("u1"), at(0))]);
        let evicted = sched.sweep(at(8), |uid| access.get(uid).copied());

        // Exactly at the retention boundary is still too young
        assert!(evicted.is_empty());
        assert_eq!(sched.len(), 1);
    }

    #[test]
    fn test_idle_user_is_evicted() {
        let mut sched = scheduler();
        sched.push(ticket("u1", 0));

        let access = HashMap::from([(Uid::new("u1"), at(0))]);
        let evicted = sched.sweep(at(9), |uid| access.get(uid).copied());

        assert_eq!(evicted, vec![Uid::new("u1")]);
        assert!(sched.is_empty());
    }

    #[test]
    fn test_touched_user_survives_and_ticket_is_discarded() {
        let mut sched = scheduler();
        sched.push(ticket("u1", 0));

        let access = HashMap::from([(Uid::new("u1"), at(5))]);
        let evicted = sched.sweep(at(9), |uid| access.get(uid).copied());

        assert!(evicted.is_empty());
        assert!(sched.is_empty());
    }

    #[test]
    fn test_uncached_user_ticket_is_discarded() {
        let mut sched = scheduler();
        sched.push(ticket("gone", 0));

        let evicted = sched.sweep(at(20), |_| None);

        assert!(evicted.is_empty());
        assert!(sched.is_empty());
    }

    #[test]
    fn test_sweep_stops_at_first_young_ticket() {
        let mut sched = scheduler();
        sched.push(ticket("u1", 0));
        sched.push(ticket("u2", 1));
        sched.push(ticket("u3", 5));
        sched.push(ticket("u4", 6));

        let access = HashMap::from([
            (Uid::new("u1"), at(0)),
            (Uid::new("u2"), at(1)),
            (Uid::new("u3"), at(5)),
            (Uid::new("u4"), at(6)),
        ]);
        let evicted = sched.sweep(at(10), |uid| access.get(uid).copied());

        assert_eq!(evicted, vec![Uid::new("u1"), Uid::new("u2")]);
        assert_eq!(sched.len(), 2);

        // u4's ticket is exactly at the retention boundary and stays
        let evicted = sched.sweep(at(14), |uid| access.get(uid).copied());
        assert_eq!(evicted, vec![Uid::new("u3")]);
        assert_eq!(sched.len(), 1);

        let evicted = sched.sweep(at(15), |uid| access.get(uid).copied());
        assert_eq!(evicted, vec![Uid::new("u4")]);
        assert!(sched.is_empty());
    }

    #[test]
    fn test_duplicate_tickets_evict_once() {
        let mut sched = scheduler();
        sched.push(ticket("u1", 0));
        sched.push(ticket("u1", 1));

        let access = HashMap::from([(Uid::new("u1"), at(0))]);
        let evicted = sched.sweep(at(20), |uid| access.get(uid).copied());

        assert_eq!(evicted, vec![Uid::new("u1")]);
    }
}
