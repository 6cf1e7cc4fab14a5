use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use document::{CanvasState, CanvasStateData};
use protocol::{ContextId, LayerId};

/// Last known pointer position of a remote user, taken from their most
/// recent drawing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserCursor {
    pub context_id: ContextId,
    pub layer_id: LayerId,
    pub x: i32,
    pub y: i32,
}

/// Latest-value cell the paint thread publishes into. Readers never block
/// the writer: loading the state is a lock-free pointer read.
pub struct PublishedState {
    state: ArcSwap<CanvasStateData>,
    cursors: Mutex<Vec<UserCursor>>,
}

impl PublishedState {
    pub fn new(initial: &CanvasState) -> Self {
        Self {
            state: ArcSwap::new(Arc::clone(initial.as_arc())),
            cursors: Mutex::new(Vec::new()),
        }
    }

    pub fn latest(&self) -> CanvasState {
        CanvasState::from(self.state.load_full())
    }

    /// Returns the published state if it is not `prev`.
    pub fn compare_and_get(&self, prev: &CanvasState) -> Option<CanvasState> {
        let latest = self.state.load_full();
        if Arc::ptr_eq(&latest, prev.as_arc()) {
            None
        } else {
            Some(CanvasState::from(latest))
        }
    }

    /// Moves the cursors recorded since the last call into `out`.
    pub fn take_cursors(&self, out: &mut Vec<UserCursor>) {
        let mut cursors = self.cursors.lock().expect("cursor buffer lock poisoned");
        out.append(&mut cursors);
    }

    pub(crate) fn publish(&self, state: &CanvasState) {
        self.state.store(Arc::clone(state.as_arc()));
    }

    pub(crate) fn push_cursor(&self, cursor: UserCursor) {
        let mut cursors = self.cursors.lock().expect("cursor buffer lock poisoned");
        match cursors.iter_mut().find(|c| c.context_id == cursor.context_id) {
            Some(existing) => *existing = cursor,
            None => cursors.push(cursor),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_and_get_only_reports_new_states() {
        let initial = CanvasState::new();
        let published = PublishedState::new(&initial);
        assert!(published.compare_and_get(&initial).is_none());

        let next = initial.to_transient().persist();
        published.publish(&next);
        let seen = published.compare_and_get(&initial).expect("new state");
        assert!(CanvasState::ptr_eq(&seen, &next));
        assert!(published.compare_and_get(&seen).is_none());
    }

    #[test]
    fn cursors_keep_the_latest_position_per_user() {
        let published = PublishedState::new(&CanvasState::new());
        let cursor = |context_id, x| UserCursor {
            context_id,
            layer_id: 1,
            x,
            y: 0,
        };
        published.push_cursor(cursor(2, 10));
        published.push_cursor(cursor(3, 5));
        published.push_cursor(cursor(2, 20));

        let mut out = Vec::new();
        published.take_cursors(&mut out);
        assert_eq!(out, vec![cursor(2, 20), cursor(3, 5)]);

        out.clear();
        published.take_cursors(&mut out);
        assert!(out.is_empty());
    }
}
