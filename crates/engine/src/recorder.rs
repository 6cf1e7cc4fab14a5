use std::sync::atomic::{AtomicBool, Ordering};

use history::HistorySnapshot;
use protocol::Message;

use crate::error::RecorderError;

/// Sink for the session's operations, in the order they are admitted.
///
/// The engine calls a recorder with its own lock held, so calls never
/// interleave with queueing and the recorded order matches the order the
/// paint thread sees.
pub trait Recorder: Send {
    /// Called once before the first message. `snapshot` is the history to
    /// write ahead of the live messages when recording was started with
    /// history.
    fn start(&mut self, snapshot: Option<&HistorySnapshot>) -> Result<(), RecorderError>;

    fn push(&mut self, message: &Message) -> Result<(), RecorderError>;

    /// The canvas is being reset. Recorders that write a self-contained
    /// recording start a new segment here.
    fn restart(&mut self) -> Result<(), RecorderError> {
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<(), RecorderError>;
}

/// The engine's recorder slot.
#[derive(Default)]
pub(crate) struct RecorderSlot {
    recorder: Option<Box<dyn Recorder>>,
}

impl RecorderSlot {
    pub fn is_recording(&self) -> bool {
        self.recorder.is_some()
    }

    pub fn replace(&mut self, recorder: Box<dyn Recorder>, changed: &AtomicBool) {
        self.stop(changed);
        self.recorder = Some(recorder);
        changed.store(true, Ordering::Release);
    }

    /// Finishes the active recorder, if any. Returns whether there was one.
    pub fn stop(&mut self, changed: &AtomicBool) -> bool {
        let Some(recorder) = self.recorder.take() else {
            return false;
        };
        changed.store(true, Ordering::Release);
        if let Err(err) = recorder.finish() {
            log::warn!("failed to finish recording: {err}");
        }
        true
    }

    /// Records `message`. A recorder that fails is stopped.
    pub fn push(&mut self, message: &Message, changed: &AtomicBool) {
        if let Some(recorder) = self.recorder.as_mut()
            && let Err(err) = recorder.push(message)
        {
            log::warn!("recording stopped: {err}");
            self.stop(changed);
        }
    }

    pub fn restart(&mut self, changed: &AtomicBool) {
        if let Some(recorder) = self.recorder.as_mut()
            && let Err(err) = recorder.restart()
        {
            log::warn!("recording stopped on reset: {err}");
            self.stop(changed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::MessageBody;
    use std::sync::{Arc, Mutex};

    struct FailingRecorder {
        finished: Arc<Mutex<bool>>,
    }

    impl Recorder for FailingRecorder {
        fn start(&mut self, _snapshot: Option<&HistorySnapshot>) -> Result<(), RecorderError> {
            Ok(())
        }

        fn push(&mut self, _message: &Message) -> Result<(), RecorderError> {
            Err(RecorderError::Rejected("disk full".to_owned()))
        }

        fn finish(self: Box<Self>) -> Result<(), RecorderError> {
            *self.finished.lock().expect("finished lock") = true;
            Ok(())
        }
    }

    #[test]
    fn failing_recorder_is_stopped_and_finished() {
        let finished = Arc::new(Mutex::new(false));
        let changed = AtomicBool::new(false);
        let mut slot = RecorderSlot::default();
        slot.replace(
            Box::new(FailingRecorder {
                finished: Arc::clone(&finished),
            }),
            &changed,
        );
        assert!(slot.is_recording());
        changed.store(false, Ordering::Release);

        slot.push(&Message::new(1, MessageBody::UndoPoint), &changed);
        assert!(!slot.is_recording());
        assert!(changed.load(Ordering::Acquire));
        assert!(*finished.lock().expect("finished lock"));
        assert!(!slot.stop(&changed));
    }
}
