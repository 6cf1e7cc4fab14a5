use std::collections::VecDeque;
use std::sync::Mutex;

use crossbeam_channel::{Receiver, Sender, TryRecvError, unbounded};
use document::CanvasState;
use history::HistorySnapshot;
use protocol::{Message, Origin};
use view::Preview;

use crate::config::BatchConfig;

/// Replacement for the active preview, handed from the paint thread to
/// the next tick.
#[derive(Debug)]
pub(crate) enum PreviewChange {
    Set(Preview),
    Clear,
}

/// Control messages the engine sends itself. They travel through the
/// queues so they are ordered with the operations around them.
#[derive(Debug)]
pub(crate) enum InternalMessage {
    Reset,
    SoftReset,
    ResetToState(CanvasState),
    Snapshot(Sender<HistorySnapshot>),
    Catchup(i32),
    Cleanup,
    /// The server refused a local operation; its prediction must go.
    ClearLocalFork,
    /// Reply with the current state once everything queued before has
    /// been handled.
    SyncCanvasState(Sender<CanvasState>),
    Preview(PreviewChange),
    Playback { position: i64, interval: i32 },
    UndoDepthLimit(usize),
}

#[derive(Debug)]
pub(crate) enum QueuedMessage {
    Message(Message),
    Internal(InternalMessage),
}

impl From<Message> for QueuedMessage {
    fn from(message: Message) -> Self {
        QueuedMessage::Message(message)
    }
}

impl From<InternalMessage> for QueuedMessage {
    fn from(internal: InternalMessage) -> Self {
        QueuedMessage::Internal(internal)
    }
}

/// What the paint thread handles next: a run of operations from one
/// queue, or a single control message.
#[derive(Debug)]
pub(crate) enum Dequeued {
    Messages {
        origin: Origin,
        messages: Vec<Message>,
    },
    Internal(InternalMessage),
}

#[derive(Default)]
struct Queues {
    local: VecDeque<QueuedMessage>,
    remote: VecDeque<QueuedMessage>,
}

impl Queues {
    fn get_mut(&mut self, origin: Origin) -> &mut VecDeque<QueuedMessage> {
        match origin {
            Origin::Local => &mut self.local,
            Origin::Remote => &mut self.remote,
        }
    }
}

/// The local and remote message queues plus a counting signal holding one
/// token per queued message. Tokens are sent while the queue lock is held,
/// so a queued message always has its token available.
pub(crate) struct MessageQueues {
    queues: Mutex<Queues>,
    signal_sender: Sender<()>,
    signal_receiver: Receiver<()>,
    batch: BatchConfig,
}

impl MessageQueues {
    pub fn new(batch: BatchConfig) -> Self {
        let (signal_sender, signal_receiver) = unbounded();
        Self {
            queues: Mutex::new(Queues::default()),
            signal_sender,
            signal_receiver,
            batch,
        }
    }

    /// Appends `messages` to the queue for `origin`. Returns how many were
    /// queued.
    pub fn push<I>(&self, origin: Origin, messages: I) -> usize
    where
        I: IntoIterator,
        I::Item: Into<QueuedMessage>,
    {
        let mut queues = self.queues.lock().expect("message queue lock poisoned");
        let queue = queues.get_mut(origin);
        let mut count = 0;
        for message in messages {
            queue.push_back(message.into());
            self.signal();
            count += 1;
        }
        count
    }

    pub fn push_one(&self, origin: Origin, message: impl Into<QueuedMessage>) {
        self.push(origin, std::iter::once(message.into()));
    }

    /// Blocks until a message (or a wake-up) is available. Returns false if
    /// the signal is gone, which only happens while tearing down.
    pub fn wait(&self) -> bool {
        self.signal_receiver.recv().is_ok()
    }

    /// Posts a token without a message, unblocking a waiting paint thread.
    pub fn wake(&self) {
        self.signal();
    }

    /// Removes the next unit of work, preferring the local queue. A draw-dab
    /// message small enough to start a batch pulls further draw-dab
    /// messages from the same queue while the batch limits allow.
    pub fn take(&self) -> Option<Dequeued> {
        let mut queues = self.queues.lock().expect("message queue lock poisoned");
        let (origin, first) = if let Some(first) = queues.local.pop_front() {
            (Origin::Local, first)
        } else if let Some(first) = queues.remote.pop_front() {
            (Origin::Remote, first)
        } else {
            return None;
        };
        let first = match first {
            QueuedMessage::Message(message) => message,
            QueuedMessage::Internal(internal) => return Some(Dequeued::Internal(internal)),
        };

        let BatchConfig {
            max_messages,
            max_area,
            threshold_area,
        } = self.batch;
        let limit = max_area.saturating_add(1);
        let mut area = match first.draw_dabs() {
            Some(dabs) => dabs.accumulate_area(0, limit),
            None => limit,
        };
        let mut messages = vec![first];
        if area < threshold_area {
            let queue = queues.get_mut(origin);
            while messages.len() < max_messages {
                let Some(QueuedMessage::Message(next)) = queue.front() else {
                    break;
                };
                let Some(dabs) = next.draw_dabs() else {
                    break;
                };
                let next_area = dabs.accumulate_area(area, limit);
                if next_area > max_area {
                    break;
                }
                area = next_area;
                if let Some(QueuedMessage::Message(next)) = queue.pop_front() {
                    messages.push(next);
                }
                self.consume_signal();
            }
            if messages.len() > 1 {
                log::trace!("batched {} draw dab messages covering {area} pixels", messages.len());
            }
        }
        Some(Dequeued::Messages { origin, messages })
    }

    /// Appends `fork` to the remote queue, then moves everything still
    /// waiting in the local queue behind it.
    pub fn cleanup(&self, fork: Vec<Message>) {
        let mut queues = self.queues.lock().expect("message queue lock poisoned");
        for message in fork {
            queues.remote.push_back(QueuedMessage::Message(message));
            self.signal();
        }
        let local = std::mem::take(&mut queues.local);
        queues.remote.extend(local);
    }

    /// Drops everything queued.
    pub fn clear(&self) {
        let mut queues = self.queues.lock().expect("message queue lock poisoned");
        queues.local.clear();
        queues.remote.clear();
        while self.signal_receiver.try_recv().is_ok() {}
    }

    pub fn len(&self) -> (usize, usize) {
        let queues = self.queues.lock().expect("message queue lock poisoned");
        (queues.local.len(), queues.remote.len())
    }

    fn signal(&self) {
        if self.signal_sender.send(()).is_err() {
            panic!("message queue signal disconnected");
        }
    }

    fn consume_signal(&self) {
        match self.signal_receiver.try_recv() {
            Ok(()) => {}
            Err(TryRecvError::Empty) => panic!("queued message without a signal token"),
            Err(TryRecvError::Disconnected) => panic!("message queue signal disconnected"),
        }
    }
}
