use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use history::{CanvasHistory, PublishedState};
use protocol::{Message, MessageBody, Origin};

use crate::config::BatchConfig;
use crate::queue::{Dequeued, InternalMessage, MessageQueues, PreviewChange};
use crate::recorder::RecorderSlot;

pub(crate) const NO_VALUE: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PlaybackPosition {
    pub position: i64,
    pub interval: i32,
}

/// State shared between the engine handles, the paint thread and the tick.
/// Values the paint thread reports back sit in single-slot cells that the
/// tick takes and resets.
pub(crate) struct EngineShared {
    pub queues: MessageQueues,
    pub running: AtomicBool,
    pub published: Arc<PublishedState>,
    pub catchup: AtomicI32,
    pub default_layer: AtomicI32,
    pub undo_depth_limit: AtomicUsize,
    pub recorder: Mutex<RecorderSlot>,
    pub recorder_state_changed: AtomicBool,
    pub next_preview: Mutex<Option<PreviewChange>>,
    pub playback: Mutex<Option<PlaybackPosition>>,
}

impl EngineShared {
    pub fn new(batch: BatchConfig, published: Arc<PublishedState>) -> Self {
        Self {
            queues: MessageQueues::new(batch),
            running: AtomicBool::new(true),
            published,
            catchup: AtomicI32::new(NO_VALUE),
            default_layer: AtomicI32::new(NO_VALUE),
            undo_depth_limit: AtomicUsize::new(0),
            recorder: Mutex::new(RecorderSlot::default()),
            recorder_state_changed: AtomicBool::new(false),
            next_preview: Mutex::new(None),
            playback: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn take_preview_change(&self) -> Option<PreviewChange> {
        self.next_preview
            .lock()
            .expect("next preview lock poisoned")
            .take()
    }

    pub fn take_playback(&self) -> Option<PlaybackPosition> {
        self.playback.lock().expect("playback lock poisoned").take()
    }
}

pub(crate) struct PaintThread {
    handle: Option<JoinHandle<()>>,
    shared: Arc<EngineShared>,
}

impl PaintThread {
    pub fn spawn(shared: Arc<EngineShared>, history: CanvasHistory) -> Self {
        let thread_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("paint".to_owned())
            .spawn(move || run(&thread_shared, history))
            .expect("spawn paint thread");
        Self {
            handle: Some(handle),
            shared,
        }
    }
}

impl Drop for PaintThread {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        self.shared.queues.wake();
        if let Some(handle) = self.handle.take() {
            handle.join().expect("join paint thread");
        }
    }
}

fn run(shared: &EngineShared, mut history: CanvasHistory) {
    log::info!("paint thread started");
    while shared.queues.wait() {
        if !shared.is_running() {
            break;
        }
        match shared.queues.take() {
            Some(Dequeued::Messages { origin, messages }) => {
                handle_messages(shared, &mut history, origin, &messages)
            }
            Some(Dequeued::Internal(internal)) => handle_internal(shared, &mut history, internal),
            None => {}
        }
    }
    // Pending requests would otherwise wait forever on their reply.
    shared.queues.clear();
    log::info!("paint thread stopped");
}

fn handle_messages(
    shared: &EngineShared,
    history: &mut CanvasHistory,
    origin: Origin,
    messages: &[Message],
) {
    match messages {
        [message] => {
            if let MessageBody::DefaultLayer { id } = message.body() {
                shared.default_layer.store(*id, Ordering::Release);
            } else if let Err(err) = history.handle(origin, message) {
                log::warn!("{err}");
            }
        }
        _ => history.handle_multidab(origin, messages),
    }
}

fn handle_internal(shared: &EngineShared, history: &mut CanvasHistory, internal: InternalMessage) {
    match internal {
        InternalMessage::Reset => history.reset(),
        InternalMessage::SoftReset => history.soft_reset(),
        InternalMessage::ResetToState(state) => history.reset_to_state(state),
        InternalMessage::Snapshot(reply) => {
            if reply.send(history.snapshot()).is_err() {
                log::warn!("history snapshot requested but nobody is waiting");
            }
        }
        InternalMessage::Catchup(progress) => shared.catchup.store(progress, Ordering::Release),
        InternalMessage::Cleanup => {
            let mut fork = Vec::new();
            history.cleanup(|message| fork.push(message));
            log::debug!("cleanup requeued {} local messages", fork.len());
            shared.queues.cleanup(fork);
            shared.catchup.store(100, Ordering::Release);
        }
        InternalMessage::ClearLocalFork => history.clear_fork(),
        InternalMessage::SyncCanvasState(reply) => {
            if reply.send(history.current_state().clone()).is_err() {
                log::debug!("canvas state requested but nobody is waiting");
            }
        }
        InternalMessage::Preview(change) => {
            let previous = shared
                .next_preview
                .lock()
                .expect("next preview lock poisoned")
                .replace(change);
            if let Some(PreviewChange::Set(preview)) = previous {
                preview.dispose();
            }
        }
        InternalMessage::Playback { position, interval } => {
            *shared.playback.lock().expect("playback lock poisoned") =
                Some(PlaybackPosition { position, interval });
        }
        InternalMessage::UndoDepthLimit(limit) => {
            history.set_undo_depth_limit(limit);
            shared.undo_depth_limit.store(limit, Ordering::Release);
        }
    }
}
