use dashmap::DashMap;

use crate::models::{TickerState, TickerStatus};

/// Last known state of every ticker, keyed by id.
///
/// Workers write their own entry; listing reads copies. Nothing here waits
/// on network I/O, so a slow fetch never blocks a listing.
#[derive(Debug, Default)]
pub struct StateBoard {
    states: DashMap<String, TickerState>,
}

impl StateBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, state: TickerState) {
        self.states.insert(state.id().to_string(), state);
    }

    /// Apply `f` to an entry if it exists
    pub fn update<F>(&self, id: &str, f: F)
    where
        F: FnOnce(&mut TickerState),
    {
        if let Some(mut state) = self.states.get_mut(id) {
            f(&mut state);
        }
    }

    /// Move an entry to `next`, ignoring transitions the lifecycle forbids
    pub fn transition(&self, id: &str, next: TickerStatus) -> bool {
        let mut moved = false;
        self.update(id, |state| {
            if state.status.can_transition_to(next) {
                state.status = next;
                moved = true;
            } else if state.status != next {
                tracing::debug!(id = %id, from = ?state.status, to = ?next, "Ignoring status transition");
            }
        });
        moved
    }

    pub fn get(&self, id: &str) -> Option<TickerState> {
        self.states.get(id).map(|s| s.clone())
    }

    pub fn remove(&self, id: &str) -> Option<TickerState> {
        self.states.remove(id).map(|(_, s)| s)
    }

    /// Copies of every entry, ordered by id
    pub fn list(&self) -> Vec<TickerState> {
        let mut states: Vec<TickerState> = self.states.iter().map(|e| e.value().clone()).collect();
        states.sort_by(|a, b| a.id().cmp(b.id()));
        states
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn count_by_status(&self, status: TickerStatus) -> usize {
        self.states.iter().filter(|e| e.status == status).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SourceKind, TickerConfig};
    use crate::testing::spec;
    use std::sync::Arc;

    fn state(id: &str) -> TickerState {
        TickerState::starting(Arc::new(
            TickerConfig::from_spec(spec(id, "BTC", SourceKind::Crypto)).unwrap(),
        ))
    }

    #[test]
    fn test_list_is_ordered() {
        let board = StateBoard::new();
        board.insert(state("c"));
        board.insert(state("a"));
        board.insert(state("b"));
        let ids: Vec<String> = board.list().iter().map(|s| s.id().to_string()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_stopped_is_terminal() {
        let board = StateBoard::new();
        board.insert(state("a"));
        assert!(board.transition("a", TickerStatus::Running));
        assert!(board.transition("a", TickerStatus::Stopped));
        assert!(!board.transition("a", TickerStatus::Running));
        assert_eq!(board.get("a").unwrap().status, TickerStatus::Stopped);
        assert_eq!(board.count_by_status(TickerStatus::Stopped), 1);
    }
}
