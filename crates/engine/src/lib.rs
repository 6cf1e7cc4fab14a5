//! The paint engine: queues operations for a single paint thread that owns
//! the canvas history, and turns each newly published state into a local
//! view, change events and rendered tiles.
//!
//! [`EngineHandle`] is the producer side. It can be cloned into network,
//! input and playback threads. [`PaintEngine`] is the consumer side and
//! belongs to the thread that calls [`PaintEngine::tick`] once per frame and
//! renders.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use document::{CanvasDiff, CanvasState, Compositor, OnionSkins, ViewMode};
use history::{CanvasHistory, HistorySnapshot, UserCursor};
use model::{Color, Pixel15, Pixel8, Tile, TilePos};
use protocol::{AclState, ContextId, LayerId, Message, MessageBody, Origin};
use renderer::{RenderParams, RenderPool};
use view::{CutPreview, DabsPreview, LocalView, Preview};

mod config;
mod error;
mod events;
mod paint_thread;
mod player;
mod queue;
mod recorder;

pub use config::{BatchConfig, CheckerConfig, EngineConfig};
pub use error::{EngineError, PlayerError, RecorderError};
pub use events::{HandleOutcome, MetaEvent, TickEvent};
pub use player::{IndexEntry, IndexSnapshot, Playback, PlaybackStatus, Player};
pub use recorder::Recorder;

use paint_thread::{EngineShared, NO_VALUE, PaintThread};
use queue::{InternalMessage, PreviewChange, QueuedMessage};

/// How often a request blocked on the paint thread checks whether the
/// engine is shutting down.
const REPLY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Producer side of the engine.
#[derive(Clone)]
pub struct EngineHandle {
    shared: Arc<EngineShared>,
}

impl EngineHandle {
    /// Admits and queues `messages`.
    ///
    /// Local messages are queued if they have an effect on the canvas.
    /// Remote messages first pass `acl`; pointer and laser messages among
    /// them are returned as meta events, the rest are recorded and queued.
    /// A filtered message from the local user drops the local operations
    /// still waiting for their echo.
    pub fn handle(
        &self,
        origin: Origin,
        override_acls: bool,
        acl: &mut dyn AclState,
        messages: &[Message],
    ) -> HandleOutcome {
        let mut outcome = HandleOutcome::default();
        match origin {
            Origin::Local => {
                let pushable = messages
                    .iter()
                    .filter(|message| message.message_type().is_pushable())
                    .cloned();
                outcome.accepted = self.shared.queues.push(Origin::Local, pushable);
            }
            Origin::Remote => {
                let local_context_id = acl.local_context_id();
                let mut admitted: Vec<QueuedMessage> = Vec::new();
                for message in messages {
                    let verdict = acl.handle(message, override_acls);
                    outcome.acl_changes |= verdict.changes;
                    if verdict.filtered {
                        log::debug!(
                            "filtered {} from context {}",
                            message.message_type().name(),
                            message.context_id()
                        );
                        if local_context_id == Some(message.context_id()) {
                            admitted.push(InternalMessage::ClearLocalFork.into());
                        }
                        continue;
                    }
                    match *message.body() {
                        MessageBody::MovePointer { x, y } => outcome.push_meta(MetaEvent::MovePointer {
                            context_id: message.context_id(),
                            x,
                            y,
                        }),
                        MessageBody::LaserTrail { color, persistence } => {
                            outcome.push_meta(MetaEvent::LaserTrail {
                                context_id: message.context_id(),
                                color,
                                persistence,
                            })
                        }
                        _ => {}
                    }
                    admitted.push(message.clone().into());
                }
                if !admitted.is_empty() {
                    outcome.accepted = self.push_remote(admitted);
                }
            }
        }
        outcome
    }

    /// Discards the canvas and its history. An active recording restarts
    /// without history.
    pub fn reset(&self) {
        let mut recorder = self.shared.recorder.lock().expect("recorder lock poisoned");
        recorder.restart(&self.shared.recorder_state_changed);
        self.shared.queues.push_one(Origin::Remote, InternalMessage::Reset);
    }

    /// Collapses the history into the current state, keeping its content.
    pub fn soft_reset(&self) {
        self.shared
            .queues
            .push_one(Origin::Remote, InternalMessage::SoftReset);
    }

    /// Replaces the canvas with `state` and discards the history.
    pub fn reset_to_state(&self, state: CanvasState) {
        let _recorder = self.shared.recorder.lock().expect("recorder lock poisoned");
        self.shared
            .queues
            .push_one(Origin::Remote, InternalMessage::ResetToState(state));
    }

    /// Reports session loading progress. The value is delivered by the tick
    /// that follows the remote messages queued before it.
    pub fn catchup(&self, progress: i32) {
        self.shared
            .queues
            .push_one(Origin::Remote, InternalMessage::Catchup(progress));
    }

    /// Hands the local fork back to the remote queue after the connection to
    /// the server ended, along with anything still waiting in the local
    /// queue.
    pub fn cleanup(&self) {
        self.shared
            .queues
            .push_one(Origin::Remote, InternalMessage::Cleanup);
    }

    pub fn set_undo_depth_limit(&self, limit: usize) {
        self.shared
            .queues
            .push_one(Origin::Remote, InternalMessage::UndoDepthLimit(limit.max(1)));
    }

    /// Installs `preview` once the local edits queued before it have been
    /// handled. The previous preview is disposed.
    pub fn set_preview(&self, preview: Preview) {
        self.shared.queues.push_one(
            Origin::Local,
            InternalMessage::Preview(PreviewChange::Set(preview)),
        );
    }

    pub fn clear_preview(&self) {
        self.shared
            .queues
            .push_one(Origin::Local, InternalMessage::Preview(PreviewChange::Clear));
    }

    /// Starts recording into `recorder`, replacing any active recording.
    ///
    /// With `with_history`, this waits for the paint thread to reach the
    /// point where the request was queued and hands the recorder the oldest
    /// reachable state plus every message since, so the recording reproduces
    /// the whole canvas. Remote messages are held back until the recorder
    /// has been started.
    pub fn recorder_start(
        &self,
        mut recorder: Box<dyn Recorder>,
        with_history: bool,
    ) -> Result<(), RecorderError> {
        let mut slot = self.shared.recorder.lock().expect("recorder lock poisoned");
        let snapshot = if with_history {
            Some(self.request_snapshot()?)
        } else {
            None
        };
        recorder.start(snapshot.as_ref())?;
        slot.replace(recorder, &self.shared.recorder_state_changed);
        log::debug!("recording started");
        Ok(())
    }

    /// The paint thread's current state, taken once everything queued before
    /// this call has been handled. Blocks until then.
    pub fn sync_canvas_state(&self) -> Result<CanvasState, EngineError> {
        if !self.shared.is_running() {
            return Err(EngineError::Stopped);
        }
        let (sender, receiver) = crossbeam_channel::bounded(1);
        self.shared
            .queues
            .push_one(Origin::Remote, InternalMessage::SyncCanvasState(sender));
        self.wait_for_reply(&receiver).ok_or(EngineError::Stopped)
    }

    /// False once the engine has shut down. Messages queued from then on
    /// are never handled.
    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Finishes the active recording. Returns false if there was none.
    pub fn recorder_stop(&self) -> bool {
        self.shared
            .recorder
            .lock()
            .expect("recorder lock poisoned")
            .stop(&self.shared.recorder_state_changed)
    }

    pub fn is_recording(&self) -> bool {
        self.shared
            .recorder
            .lock()
            .expect("recorder lock poisoned")
            .is_recording()
    }

    /// The latest state the paint thread has published, whether or not a
    /// tick has picked it up yet.
    pub fn sample_canvas_state(&self) -> CanvasState {
        self.shared.published.latest()
    }

    /// Messages waiting in the local and remote queues.
    pub fn queued_len(&self) -> (usize, usize) {
        self.shared.queues.len()
    }

    /// Records the messages among `queued` and queues everything with an
    /// effect on the paint thread. Returns how many messages were queued.
    fn push_remote(&self, queued: Vec<QueuedMessage>) -> usize {
        let mut recorder = self.shared.recorder.lock().expect("recorder lock poisoned");
        let mut accepted = 0;
        let pushable: Vec<QueuedMessage> = queued
            .into_iter()
            .filter(|queued| match queued {
                QueuedMessage::Message(message) => {
                    recorder.push(message, &self.shared.recorder_state_changed);
                    let pushable = message.message_type().is_pushable();
                    accepted += usize::from(pushable);
                    pushable
                }
                QueuedMessage::Internal(_) => true,
            })
            .collect();
        self.shared.queues.push(Origin::Remote, pushable);
        accepted
    }

    pub(crate) fn push_played(&self, messages: Vec<Message>) {
        if !messages.is_empty() {
            self.push_remote(messages.into_iter().map(QueuedMessage::from).collect());
        }
    }

    pub(crate) fn push_playback_position(&self, position: i64, interval: i32) {
        self.shared
            .queues
            .push_one(Origin::Remote, InternalMessage::Playback { position, interval });
    }

    fn request_snapshot(&self) -> Result<HistorySnapshot, RecorderError> {
        if !self.shared.is_running() {
            return Err(RecorderError::Disconnected);
        }
        let (sender, receiver) = crossbeam_channel::bounded(1);
        self.shared
            .queues
            .push_one(Origin::Remote, InternalMessage::Snapshot(sender));
        self.wait_for_reply(&receiver)
            .ok_or(RecorderError::Disconnected)
    }

    /// Waits for the paint thread to answer a request. `None` if it stopped
    /// before getting to it.
    fn wait_for_reply<T>(&self, receiver: &Receiver<T>) -> Option<T> {
        loop {
            match receiver.recv_timeout(REPLY_POLL_INTERVAL) {
                Ok(reply) => return Some(reply),
                Err(RecvTimeoutError::Timeout) if self.shared.is_running() => {}
                Err(_) => return None,
            }
        }
    }
}

pub struct PaintEngine {
    handle: EngineHandle,
    paint_thread: Option<PaintThread>,
    render_pool: RenderPool,
    compositor: Arc<dyn Compositor>,
    history_cs: CanvasState,
    view_cs: CanvasState,
    /// Drained into tile events by the tick.
    change_diff: CanvasDiff,
    /// Drained by rendering.
    render_diff: CanvasDiff,
    local_view: LocalView,
    cursors: Vec<UserCursor>,
    layers_can_decrease_opacity: bool,
    checker: Tile,
}

impl PaintEngine {
    /// Starts the paint thread and render pool on `initial`, or on an empty
    /// canvas. Layers `initial` marks hidden start out hidden in the local
    /// view.
    pub fn new(
        config: EngineConfig,
        initial: Option<CanvasState>,
        compositor: Arc<dyn Compositor>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let render_pool = RenderPool::new(config.resolved_render_thread_count())?;
        let initial = initial.unwrap_or_default();

        let history = CanvasHistory::new(
            initial.clone(),
            config.undo_depth_limit,
            Arc::clone(&compositor),
        );
        let shared = Arc::new(EngineShared::new(config.batch, history.published()));
        let paint_thread = PaintThread::spawn(Arc::clone(&shared), history);

        let mut local_view = LocalView::new(&initial);
        let mut change_diff = CanvasDiff::new();
        let view_cs = local_view.apply(&initial, compositor.as_ref(), &mut change_diff);
        let empty = CanvasState::new();
        change_diff.diff(&empty, &view_cs);
        let mut render_diff = CanvasDiff::new();
        render_diff.diff(&empty, &view_cs);
        let layers_can_decrease_opacity = view_cs.layer_props().can_decrease_opacity();

        Ok(Self {
            handle: EngineHandle { shared },
            paint_thread: Some(paint_thread),
            render_pool,
            compositor,
            history_cs: initial,
            view_cs,
            change_diff,
            render_diff,
            local_view,
            cursors: Vec::new(),
            layers_can_decrease_opacity,
            checker: config.checker.tile(),
        })
    }

    pub fn handle(&self) -> &EngineHandle {
        &self.handle
    }

    pub fn render_thread_count(&self) -> usize {
        self.render_pool.thread_count()
    }

    /// Picks up what the paint thread and the local view changed since the
    /// last call and reports it.
    pub fn tick(&mut self) -> Vec<TickEvent> {
        let mut events = Vec::new();
        let shared = Arc::clone(&self.handle.shared);

        let catchup = shared.catchup.swap(NO_VALUE, Ordering::AcqRel);
        if catchup != NO_VALUE {
            events.push(TickEvent::Catchup(catchup));
        }
        if shared.recorder_state_changed.swap(false, Ordering::AcqRel) {
            events.push(TickEvent::RecorderStateChanged {
                recording: self.handle.is_recording(),
            });
        }

        let history_changed = match shared.published.compare_and_get(&self.history_cs) {
            Some(next) => {
                self.history_cs = next;
                true
            }
            None => false,
        };
        shared.published.take_cursors(&mut self.cursors);

        if let Some(change) = shared.take_preview_change() {
            self.local_view.set_preview(match change {
                PreviewChange::Set(preview) => Some(preview),
                PreviewChange::Clear => None,
            });
        }
        let invalidation = self.local_view.take_invalidation();
        if invalidation.check_all {
            self.change_diff.check_all();
            self.render_diff.check_all();
        }
        if history_changed || !invalidation.is_empty() || self.change_diff.is_check_all() {
            self.update_view(&mut events);
        }

        events.extend(self.cursors.drain(..).map(TickEvent::CursorMoved));

        let default_layer = shared.default_layer.swap(NO_VALUE, Ordering::AcqRel);
        if default_layer != NO_VALUE {
            events.push(TickEvent::DefaultLayerSet(default_layer));
        }
        let undo_depth_limit = shared.undo_depth_limit.swap(0, Ordering::AcqRel);
        if undo_depth_limit != 0 {
            events.push(TickEvent::UndoDepthLimitSet(undo_depth_limit));
        }
        if let Some(playback) = shared.take_playback() {
            events.push(TickEvent::PlaybackPosition {
                position: playback.position,
                interval: playback.interval,
            });
        }
        events
    }

    fn update_view(&mut self, events: &mut Vec<TickEvent>) {
        let prev = self.view_cs.clone();
        let next = self
            .local_view
            .apply(&self.history_cs, self.compositor.as_ref(), &mut self.change_diff);
        if self.change_diff.is_check_all() {
            self.render_diff.check_all();
        }
        self.change_diff.diff(&prev, &next);
        self.render_diff.diff(&prev, &next);
        if !Arc::ptr_eq(prev.layer_props(), next.layer_props()) {
            self.layers_can_decrease_opacity = next.layer_props().can_decrease_opacity();
        }

        if prev.width() != next.width()
            || prev.height() != next.height()
            || prev.offset_x() != next.offset_x()
            || prev.offset_y() != next.offset_y()
        {
            events.push(TickEvent::Resized {
                offset_x: prev.offset_x() - next.offset_x(),
                offset_y: prev.offset_y() - next.offset_y(),
                prev_width: prev.width(),
                prev_height: prev.height(),
            });
        }
        self.change_diff
            .each_pos_reset(|pos| events.push(TickEvent::TileChanged(pos)));
        self.render_diff.layer_props_changed_reset();
        if self.change_diff.layer_props_changed_reset() {
            events.push(TickEvent::LayerPropsChanged(Arc::clone(next.layer_props())));
        }
        if !Arc::ptr_eq(prev.annotations(), next.annotations()) {
            events.push(TickEvent::AnnotationsChanged(Arc::clone(next.annotations())));
        }
        if !Arc::ptr_eq(prev.metadata(), next.metadata()) {
            events.push(TickEvent::MetadataChanged(Arc::clone(next.metadata())));
        }
        if !Arc::ptr_eq(prev.timeline(), next.timeline()) {
            events.push(TickEvent::TimelineChanged(Arc::clone(next.timeline())));
        }
        self.view_cs = next;
    }

    /// Renders every tile of the view and clears the pending changes.
    pub fn render_everything<F>(&mut self, callback: &F)
    where
        F: Fn(TilePos, &[Pixel8], usize) + Sync,
    {
        let filter = self.local_view.filter(&self.view_cs);
        let params = RenderParams {
            view: &self.view_cs,
            compositor: self.compositor.as_ref(),
            filter: &filter,
            onion_skins: onion_skins(&self.local_view),
            checker: (!self.view_cs.background_opaque() || self.layers_can_decrease_opacity)
                .then_some(&self.checker),
        };
        self.render_pool
            .render_everything(&params, &mut self.render_diff, callback);
    }

    /// Renders the changed tiles in the inclusive tile rectangle. Changes
    /// outside of it stay pending.
    pub fn render_tile_range<F>(&mut self, left: i64, top: i64, right: i64, bottom: i64, callback: &F)
    where
        F: Fn(TilePos, &[Pixel8], usize) + Sync,
    {
        let filter = self.local_view.filter(&self.view_cs);
        let params = RenderParams {
            view: &self.view_cs,
            compositor: self.compositor.as_ref(),
            filter: &filter,
            onion_skins: onion_skins(&self.local_view),
            checker: (!self.view_cs.background_opaque() || self.layers_can_decrease_opacity)
                .then_some(&self.checker),
        };
        self.render_pool.render_tile_range(
            &params,
            &mut self.render_diff,
            left,
            top,
            right,
            bottom,
            callback,
        );
    }

    /// The displayed state as of the last tick.
    pub fn view_canvas_state(&self) -> &CanvasState {
        &self.view_cs
    }

    /// The authoritative state as of the last tick.
    pub fn history_canvas_state(&self) -> &CanvasState {
        &self.history_cs
    }

    pub fn sample_canvas_state(&self) -> CanvasState {
        self.handle.sample_canvas_state()
    }

    pub fn local_view(&self) -> &LocalView {
        &self.local_view
    }

    pub fn set_active_layer(&mut self, layer_id: LayerId) {
        self.local_view.set_active_layer(layer_id);
    }

    pub fn set_active_frame(&mut self, frame_index: i32) {
        self.local_view.set_active_frame(frame_index);
    }

    pub fn set_view_mode(&mut self, view_mode: ViewMode) {
        self.local_view.set_view_mode(view_mode);
    }

    pub fn set_onion_skins(&mut self, onion_skins: OnionSkins) {
        self.local_view.set_onion_skins(onion_skins);
    }

    pub fn set_layer_hidden(&mut self, layer_id: LayerId, hidden: bool) {
        self.local_view.set_layer_hidden(layer_id, hidden);
    }

    pub fn set_reveal_censored(&mut self, reveal: bool) {
        self.local_view.set_reveal_censored(reveal);
    }

    /// Highlights tiles last touched by `context_id`. Zero turns it off.
    pub fn set_inspect_context_id(&mut self, context_id: ContextId) {
        self.local_view.set_inspect_context_id(context_id);
    }

    /// Shows `color` instead of the canvas background, or the canvas's own
    /// background for `None`.
    pub fn set_local_background(&mut self, color: Option<Color>) {
        let tile = color.map(|color| Tile::new_filled(Pixel15::from_color(color), 0));
        self.local_view.set_background_tile(tile);
    }

    pub fn set_checker_colors(&mut self, checker: CheckerConfig) {
        self.checker = checker.tile();
        self.change_diff.check_all();
        self.render_diff.check_all();
    }

    /// Previews cutting the given rectangle out of `layer_id`. `mask` holds
    /// one alpha byte per pixel of the rectangle.
    pub fn preview_cut(
        &self,
        layer_id: LayerId,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        mask: Option<Vec<u8>>,
    ) {
        let cut = CutPreview::new(layer_id, x, y, width, height, mask);
        self.handle.set_preview(self.new_preview(Box::new(cut)));
    }

    /// Previews `messages` drawn onto `layer_id` without committing them.
    pub fn preview_dabs(&self, layer_id: LayerId, messages: Vec<Message>) {
        let dabs = DabsPreview::new(layer_id, messages);
        self.handle.set_preview(self.new_preview(Box::new(dabs)));
    }

    pub fn preview_clear(&self) {
        self.handle.clear_preview();
    }

    fn new_preview(&self, renderer: Box<dyn view::PreviewRender>) -> Preview {
        Preview::new(renderer, self.view_cs.offset_x(), self.view_cs.offset_y())
    }
}

fn onion_skins(local_view: &LocalView) -> Option<(&OnionSkins, i32)> {
    let skins = local_view.onion_skins();
    (local_view.view_mode() == ViewMode::Frame && !skins.is_empty())
        .then(|| (skins, local_view.active_frame_index()))
}

impl Drop for PaintEngine {
    fn drop(&mut self) {
        drop(self.paint_thread.take());
        let shared = &self.handle.shared;
        shared
            .recorder
            .lock()
            .expect("recorder lock poisoned")
            .stop(&shared.recorder_state_changed);
        if let Some(PreviewChange::Set(preview)) = shared.take_preview_change() {
            preview.dispose();
        }
    }
}
