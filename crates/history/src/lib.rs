//! Authoritative operation history of a canvas.
//!
//! [`CanvasHistory`] is owned by the paint thread. It keeps the operations
//! applied since the oldest reachable state, per-user undo bookkeeping and
//! the fork of local operations that were applied ahead of the server's
//! echo. Other threads only see the result through [`PublishedState`].

mod published;

use std::collections::VecDeque;
use std::sync::Arc;

use document::{ApplyError, CanvasState, Compositor};
use protocol::{ContextId, Message, MessageBody, Origin};

pub use published::{PublishedState, UserCursor};

pub const DEFAULT_UNDO_DEPTH_LIMIT: usize = 30;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HistoryError {
    #[error("{message_type} from context {context_id} could not be applied: {source}")]
    Apply {
        context_id: ContextId,
        message_type: &'static str,
        #[source]
        source: ApplyError,
    },
}

impl HistoryError {
    fn apply(message: &Message, source: ApplyError) -> Self {
        HistoryError::Apply {
            context_id: message.context_id(),
            message_type: message.message_type().name(),
            source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UndoState {
    Done,
    Undone,
    /// Undone and then cut off by a newer undo point; cannot be redone.
    Gone,
}

struct HistoryEntry {
    message: Message,
    undo: UndoState,
    /// State right before this entry, kept for undo points only.
    savepoint: Option<CanvasState>,
}

impl HistoryEntry {
    fn is_undo_point_of(&self, context_id: ContextId) -> bool {
        matches!(self.message.body(), MessageBody::UndoPoint)
            && self.message.context_id() == context_id
    }
}

/// The oldest reachable state plus every operation applied since, enough
/// to reproduce the current authoritative state from scratch.
#[derive(Debug, Clone)]
pub struct HistorySnapshot {
    pub base: CanvasState,
    pub messages: Vec<Message>,
}

enum ForkMatch {
    Empty,
    Head,
    Desync,
    Foreign,
}

pub struct CanvasHistory {
    compositor: Arc<dyn Compositor>,
    published: Arc<PublishedState>,
    base: CanvasState,
    entries: Vec<HistoryEntry>,
    history_state: CanvasState,
    current: CanvasState,
    fork: VecDeque<Message>,
    undo_depth_limit: usize,
}

impl CanvasHistory {
    pub fn new(initial: CanvasState, undo_depth_limit: usize, compositor: Arc<dyn Compositor>) -> Self {
        Self {
            compositor,
            published: Arc::new(PublishedState::new(&initial)),
            base: initial.clone(),
            entries: Vec::new(),
            history_state: initial.clone(),
            current: initial,
            fork: VecDeque::new(),
            undo_depth_limit: undo_depth_limit.max(1),
        }
    }

    pub fn published(&self) -> Arc<PublishedState> {
        Arc::clone(&self.published)
    }

    /// Authoritative state with the local fork applied on top.
    pub fn current_state(&self) -> &CanvasState {
        &self.current
    }

    /// Authoritative state as confirmed by the server.
    pub fn history_state(&self) -> &CanvasState {
        &self.history_state
    }

    pub fn fork_len(&self) -> usize {
        self.fork.len()
    }

    pub fn undo_depth_limit(&self) -> usize {
        self.undo_depth_limit
    }

    pub fn set_undo_depth_limit(&mut self, limit: usize) {
        self.undo_depth_limit = limit.max(1);
        self.prune();
    }

    pub fn handle(&mut self, origin: Origin, message: &Message) -> Result<(), HistoryError> {
        let result = match origin {
            Origin::Local => self.handle_local(message),
            Origin::Remote => self.handle_remote(message),
        };
        self.published.publish(&self.current);
        result
    }

    /// Applies a run of draw-dab messages and publishes once at the end.
    pub fn handle_multidab(&mut self, origin: Origin, messages: &[Message]) {
        match origin {
            Origin::Local => {
                self.fork.extend(messages.iter().cloned());
                self.current = self.current.apply_multidab(&*self.compositor, messages);
            }
            Origin::Remote if self.fork.is_empty() => {
                for message in messages {
                    self.record_cursor(message);
                    self.entries.push(HistoryEntry {
                        message: message.clone(),
                        undo: UndoState::Done,
                        savepoint: None,
                    });
                }
                self.history_state = self
                    .history_state
                    .apply_multidab(&*self.compositor, messages);
                self.current = self.history_state.clone();
            }
            Origin::Remote => {
                for message in messages {
                    if let Err(err) = self.handle_remote(message) {
                        log::warn!("{err}");
                    }
                }
            }
        }
        self.published.publish(&self.current);
    }

    fn handle_local(&mut self, message: &Message) -> Result<(), HistoryError> {
        self.fork.push_back(message.clone());
        if is_undo_control(message) {
            return Ok(());
        }
        let next = self
            .current
            .apply(&*self.compositor, message)
            .map_err(|err| HistoryError::apply(message, err))?;
        self.current = next;
        Ok(())
    }

    fn handle_remote(&mut self, message: &Message) -> Result<(), HistoryError> {
        self.record_cursor(message);
        let fork_match = match self.fork.front() {
            None => ForkMatch::Empty,
            Some(head) if head == message => ForkMatch::Head,
            Some(head) if head.context_id() == message.context_id() => ForkMatch::Desync,
            Some(_) => ForkMatch::Foreign,
        };
        match fork_match {
            ForkMatch::Head => {
                self.fork.pop_front();
                let result = self.commit(message);
                if self.fork.is_empty() || is_undo_control(message) {
                    self.rebuild_current();
                }
                result
            }
            ForkMatch::Desync => {
                log::warn!(
                    "local fork out of sync with context {}, discarding {} pending operations",
                    message.context_id(),
                    self.fork.len()
                );
                self.fork.clear();
                let result = self.commit(message);
                self.current = self.history_state.clone();
                result
            }
            ForkMatch::Empty | ForkMatch::Foreign => {
                let result = self.commit(message);
                self.rebuild_current();
                result
            }
        }
    }

    fn record_cursor(&self, message: &Message) {
        if let Some(dabs) = message.draw_dabs() {
            let (x, y) = dabs.last_position();
            self.published.push_cursor(UserCursor {
                context_id: message.context_id(),
                layer_id: dabs.layer_id,
                x,
                y,
            });
        }
    }

    /// Current state: the history state, with the fork re-applied on top if
    /// there is one.
    fn rebuild_current(&mut self) {
        let mut state = self.history_state.clone();
        for message in self.fork.iter().filter(|m| !is_undo_control(m)) {
            match state.apply(&*self.compositor, message) {
                Ok(next) => state = next,
                Err(err) => log::debug!("local operation no longer applies: {err}"),
            }
        }
        self.current = state;
    }

    fn commit(&mut self, message: &Message) -> Result<(), HistoryError> {
        let context_id = message.context_id();
        match message.body() {
            MessageBody::UndoPoint => {
                for entry in &mut self.entries {
                    if entry.message.context_id() == context_id && entry.undo == UndoState::Undone {
                        entry.undo = UndoState::Gone;
                    }
                }
                self.entries.push(HistoryEntry {
                    message: message.clone(),
                    undo: UndoState::Done,
                    savepoint: Some(self.history_state.clone()),
                });
                self.prune();
                Ok(())
            }
            MessageBody::Undo { redo } => {
                self.entries.push(HistoryEntry {
                    message: message.clone(),
                    undo: UndoState::Done,
                    savepoint: None,
                });
                self.undo(context_id, *redo);
                Ok(())
            }
            _ => {
                let next = self
                    .history_state
                    .apply(&*self.compositor, message)
                    .map_err(|err| HistoryError::apply(message, err))?;
                self.history_state = next;
                self.entries.push(HistoryEntry {
                    message: message.clone(),
                    undo: UndoState::Done,
                    savepoint: None,
                });
                Ok(())
            }
        }
    }

    fn undo(&mut self, context_id: ContextId, redo: bool) {
        let start = if redo {
            let mut candidate = None;
            for (index, entry) in self.entries.iter().enumerate().rev() {
                if entry.is_undo_point_of(context_id) {
                    match entry.undo {
                        UndoState::Undone => candidate = Some(index),
                        UndoState::Done | UndoState::Gone => break,
                    }
                }
            }
            candidate
        } else {
            self.entries
                .iter()
                .rposition(|entry| entry.is_undo_point_of(context_id) && entry.undo == UndoState::Done)
        };
        let Some(start) = start else {
            log::debug!(
                "nothing to {} for context {context_id}",
                if redo { "redo" } else { "undo" }
            );
            return;
        };

        let (from, to) = if redo {
            (UndoState::Undone, UndoState::Done)
        } else {
            (UndoState::Done, UndoState::Undone)
        };
        for (offset, entry) in self.entries[start..].iter_mut().enumerate() {
            if entry.message.context_id() != context_id || is_undo(&entry.message) {
                continue;
            }
            if offset > 0 && entry.is_undo_point_of(context_id) {
                break;
            }
            if entry.undo == from {
                entry.undo = to;
            }
        }
        self.replay_from(start);
    }

    /// Recomputes the history state from the savepoint of the undo point at
    /// `start`, refreshing later savepoints on the way.
    fn replay_from(&mut self, start: usize) {
        let mut state = self.entries[start]
            .savepoint
            .clone()
            .expect("undo point without savepoint");
        let compositor = &*self.compositor;
        for entry in &mut self.entries[start..] {
            if matches!(entry.message.body(), MessageBody::UndoPoint) {
                entry.savepoint = Some(state.clone());
                continue;
            }
            if entry.undo != UndoState::Done || is_undo(&entry.message) {
                continue;
            }
            match state.apply(compositor, &entry.message) {
                Ok(next) => state = next,
                Err(err) => log::warn!("replaying history: {err}"),
            }
        }
        self.history_state = state;
    }

    /// Drops everything older than the oldest undo point still within the
    /// depth limit.
    fn prune(&mut self) {
        let undo_points: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| matches!(e.message.body(), MessageBody::UndoPoint))
            .map(|(index, _)| index)
            .collect();
        if undo_points.len() <= self.undo_depth_limit {
            return;
        }
        let cut = undo_points[undo_points.len() - self.undo_depth_limit];
        if let Some(savepoint) = self.entries[cut].savepoint.clone() {
            self.base = savepoint;
        }
        self.entries.drain(..cut);
        log::debug!("pruned history to {} entries", self.entries.len());
    }

    pub fn reset(&mut self) {
        self.reset_to_state(CanvasState::new());
    }

    pub fn reset_to_state(&mut self, state: CanvasState) {
        self.base = state.clone();
        self.entries.clear();
        self.fork.clear();
        self.history_state = state.clone();
        self.current = state;
        self.published.publish(&self.current);
    }

    /// Forgets the history but keeps the current content as the new base.
    pub fn soft_reset(&mut self) {
        self.base = self.history_state.clone();
        self.entries.clear();
    }

    pub fn snapshot(&self) -> HistorySnapshot {
        HistorySnapshot {
            base: self.base.clone(),
            messages: self.entries.iter().map(|e| e.message.clone()).collect(),
        }
    }

    /// Drops the local operations still waiting for their echo, after the
    /// server refused one of them.
    pub fn clear_fork(&mut self) {
        if !self.fork.is_empty() {
            log::debug!("clearing {} local operations", self.fork.len());
            self.fork.clear();
        }
        self.current = self.history_state.clone();
        self.published.publish(&self.current);
    }

    /// Hands every pending local operation to `push` and falls back to the
    /// authoritative state.
    pub fn cleanup(&mut self, mut push: impl FnMut(Message)) {
        for message in self.fork.drain(..) {
            push(message);
        }
        self.current = self.history_state.clone();
        self.published.publish(&self.current);
    }
}

fn is_undo(message: &Message) -> bool {
    matches!(message.body(), MessageBody::Undo { .. })
}

fn is_undo_control(message: &Message) -> bool {
    matches!(message.body(), MessageBody::Undo { .. } | MessageBody::UndoPoint)
}
