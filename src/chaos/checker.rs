//! History recording and invariant checking for simulated clusters.
//!
//! The runner records every driver action and every observed callback into
//! one globally ordered history, then verifies:
//! - Safety: at most one instance holds the lock at any step.
//! - Trichotomy: the three accessor predicates agree with the state.
//! - Callback discipline: every observed event has a qualifying cause
//!   earlier in the history.

use serde::{Deserialize, Serialize};

use crate::mutex::callbacks::LockEvent;

/// Something the driver did to an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    Request,
    Release,
    Pump,
    /// The instance's process died: all its connections sever at once.
    Kill,
}

/// One entry in the globally ordered run history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryEntry {
    Acted { instance: usize, action: Action },
    Observed { instance: usize, event: LockEvent },
}

/// An invariant the run failed, with enough context to debug from a seed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// More than one instance in the holding state at one step.
    MultipleHolders { step: usize, holders: Vec<usize> },

    /// Accessor predicates disagreed with the state enum.
    BrokenTrichotomy { step: usize, instance: usize },

    /// An event fired with no qualifying cause in the preceding history.
    UndisciplinedEvent { instance: usize, event: LockEvent },
}

/// Globally ordered log of actions and observations.
///
/// The simulation is single-threaded, so append order is causal order.
#[derive(Debug, Default)]
pub struct History {
    entries: Vec<HistoryEntry>,
}

impl History {
    pub fn new() -> Self {
        History {
            entries: Vec::new(),
        }
    }

    pub fn record_action(&mut self, instance: usize, action: Action) {
        self.entries.push(HistoryEntry::Acted { instance, action });
    }

    pub fn record_event(&mut self, instance: usize, event: LockEvent) {
        self.entries.push(HistoryEntry::Observed { instance, event });
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Verify callback discipline over the whole run.
    ///
    /// Tracked causes:
    /// - A `request` call licenses exactly one later Granted or Denied.
    /// - A `release` by a holding instance licenses one Released at every
    ///   instance (its own local hook plus each peer parked behind it).
    /// - A `release` by a requesting instance (a cancellation) licenses
    ///   one Released at every *other* instance, since a peer may have
    ///   granted before seeing the cancellation.
    /// - A kill licenses holder-lost events.
    ///
    /// Licenses may go unconsumed (answers still in flight when the run
    /// ends); consuming one that was never issued is a violation.
    pub fn check_discipline(&self, instances: usize) -> Result<(), Violation> {
        let mut pending_requests = vec![0usize; instances];
        let mut holding = vec![false; instances];
        let mut release_credit = vec![0usize; instances];
        let mut kills = 0usize;

        for entry in &self.entries {
            match *entry {
                HistoryEntry::Acted { instance, action } => match action {
                    Action::Request => pending_requests[instance] += 1,
                    Action::Release => {
                        if holding[instance] {
                            holding[instance] = false;
                            for credit in release_credit.iter_mut() {
                                *credit += 1;
                            }
                        } else if pending_requests[instance] > 0 {
                            for (other, credit) in release_credit.iter_mut().enumerate() {
                                if other != instance {
                                    *credit += 1;
                                }
                            }
                        }
                    }
                    Action::Pump => {}
                    Action::Kill => kills += 1,
                },
                HistoryEntry::Observed { instance, event } => match event {
                    LockEvent::Granted => {
                        if pending_requests[instance] == 0 {
                            return Err(Violation::UndisciplinedEvent { instance, event });
                        }
                        pending_requests[instance] -= 1;
                        holding[instance] = true;
                    }
                    LockEvent::Denied => {
                        if pending_requests[instance] == 0 {
                            return Err(Violation::UndisciplinedEvent { instance, event });
                        }
                        pending_requests[instance] -= 1;
                    }
                    LockEvent::Released => {
                        if release_credit[instance] == 0 {
                            return Err(Violation::UndisciplinedEvent { instance, event });
                        }
                        release_credit[instance] -= 1;
                    }
                    LockEvent::HolderLost(_) => {
                        if kills == 0 {
                            return Err(Violation::UndisciplinedEvent { instance, event });
                        }
                    }
                },
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discipline_accepts_plain_acquire_release() {
        let mut history = History::new();
        history.record_action(0, Action::Request);
        history.record_event(0, LockEvent::Granted);
        history.record_action(0, Action::Release);
        history.record_event(0, LockEvent::Released);
        history.record_event(1, LockEvent::Released);
        assert_eq!(history.check_discipline(2), Ok(()));
    }

    #[test]
    fn test_discipline_rejects_unrequested_grant() {
        let mut history = History::new();
        history.record_event(0, LockEvent::Granted);
        assert!(matches!(
            history.check_discipline(1),
            Err(Violation::UndisciplinedEvent {
                instance: 0,
                event: LockEvent::Granted
            })
        ));
    }

    #[test]
    fn test_discipline_rejects_release_without_holder() {
        let mut history = History::new();
        history.record_action(0, Action::Release); // no-op release licenses nothing
        history.record_event(1, LockEvent::Released);
        assert!(matches!(
            history.check_discipline(2),
            Err(Violation::UndisciplinedEvent { .. })
        ));
    }

    #[test]
    fn test_discipline_cancellation_covers_peer_release() {
        let mut history = History::new();
        history.record_action(0, Action::Request);
        history.record_action(0, Action::Release); // cancel
        history.record_event(0, LockEvent::Denied);
        history.record_event(1, LockEvent::Released); // peer had granted
        assert_eq!(history.check_discipline(2), Ok(()));
        // The cancelling instance itself gets no release.
        history.record_event(0, LockEvent::Released);
        assert!(matches!(
            history.check_discipline(2),
            Err(Violation::UndisciplinedEvent { .. })
        ));
    }
}
