//! Driving the engine from a recording.
//!
//! A [`Player`] reads messages from a recording and, if it has an index,
//! can load the snapshot nearest to a message position. [`Playback`] wraps
//! a player with the timing state needed for real-time playback, and the
//! `playback_*` methods on [`EngineHandle`] push what it reads into the
//! remote queue. Every navigation ends by queueing a playback position, so
//! the position event arrives at the tick after the messages it covers.

use document::CanvasState;
use protocol::{Message, MessageBody, MessageType};

use crate::EngineHandle;
use crate::error::PlayerError;

/// Longest pause a single interval message may add to timed playback.
const MAX_INTERVAL_MSECS: i64 = 1000;

/// A position in the recording's index that a snapshot was taken at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub message_index: i64,
    pub message_offset: u64,
}

/// Canvas state at an index entry, plus the messages that were still in
/// flight at that point and must be replayed on top of it.
#[derive(Debug, Clone)]
pub struct IndexSnapshot {
    pub state: CanvasState,
    pub messages: Vec<Message>,
}

pub trait Player: Send {
    /// The next message, or `None` at the end of the recording. A
    /// [`PlayerError::Parse`] skips one message; other errors end playback.
    fn step(&mut self) -> Result<Option<Message>, PlayerError>;

    fn rewind(&mut self) -> Result<(), PlayerError>;

    /// Index of the next message to be read.
    fn position(&self) -> i64;

    /// Fraction of the recording read so far, from 0 to 1.
    fn progress(&self) -> f64;

    fn index_loaded(&self) -> bool;

    fn index_message_count(&self) -> i64;

    /// The last entry at or before `position`, or the first one after it if
    /// `after` is set.
    fn index_entry_search(&self, position: i64, after: bool) -> Option<IndexEntry>;

    fn index_entry_load(&mut self, entry: IndexEntry) -> Result<IndexSnapshot, PlayerError>;

    fn seek(&mut self, entry: IndexEntry) -> Result<(), PlayerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStatus {
    Playing,
    /// The recording ended. A negative playback position has been queued.
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepUnit {
    Messages,
    UndoPoints,
    Msecs,
}

/// A player plus the timing carried between timed playback calls.
pub struct Playback {
    player: Box<dyn Player>,
    msecs: i64,
    next_has_time: bool,
}

impl Playback {
    pub fn new(player: Box<dyn Player>) -> Self {
        Self {
            player,
            msecs: 0,
            next_has_time: true,
        }
    }

    pub fn player(&self) -> &dyn Player {
        self.player.as_ref()
    }

    pub fn player_mut(&mut self) -> &mut dyn Player {
        self.player.as_mut()
    }

    pub fn into_player(self) -> Box<dyn Player> {
        self.player
    }

    /// Clears the timing carried over from the last timed call.
    pub fn begin(&mut self) {
        self.msecs = 0;
        self.next_has_time = true;
    }

    fn reported_position(&self) -> i64 {
        if self.player.index_loaded() {
            self.player.position()
        } else {
            (self.player.progress() * 100.0).round() as i64
        }
    }
}

/// Rough duration of a message when played back in real time. Recordings
/// carry no timing apart from interval messages.
fn guess_message_msecs(message: &Message, next_has_time: &mut bool) -> i64 {
    match message.body() {
        MessageBody::DrawDabs(_) => 5,
        MessageBody::FillRect(_) | MessageBody::MovePointer { .. } => 10,
        MessageBody::LayerCreate(_)
        | MessageBody::LayerAttributes(_)
        | MessageBody::LayerRetitle { .. }
        | MessageBody::LayerOrder { .. }
        | MessageBody::LayerDelete { .. }
        | MessageBody::AnnotationCreate { .. }
        | MessageBody::AnnotationEdit { .. } => 20,
        MessageBody::CanvasResize { .. } => 60,
        // An undo from context 0 marks the next message as an already undone
        // entry, which does not show up on the canvas.
        MessageBody::Undo { .. } if message.context_id() == 0 => {
            *next_has_time = false;
            0
        }
        MessageBody::Undo { .. } => 20,
        _ => 0,
    }
}

impl EngineHandle {
    /// Plays the next `steps` messages. Interval messages count as steps.
    pub fn playback_step(
        &self,
        playback: &mut Playback,
        steps: i64,
    ) -> Result<PlaybackStatus, PlayerError> {
        self.skip_playback_forward(playback, steps, StepUnit::Messages)
    }

    /// Plays `msecs` worth of the recording, carrying the remainder over to
    /// the next call.
    pub fn playback_play(
        &self,
        playback: &mut Playback,
        msecs: i64,
    ) -> Result<PlaybackStatus, PlayerError> {
        self.skip_playback_forward(playback, msecs, StepUnit::Msecs)
    }

    /// Moves forward by `steps` undo points, or backward by jumping to the
    /// index snapshot and stepping to the exact position. With
    /// `by_snapshots`, moves to the nearest snapshot in either direction.
    pub fn playback_skip_by(
        &self,
        playback: &mut Playback,
        steps: i64,
        by_snapshots: bool,
    ) -> Result<PlaybackStatus, PlayerError> {
        if steps < 0 || by_snapshots {
            self.jump_playback_to(playback, steps, true, !by_snapshots)
        } else {
            self.skip_playback_forward(playback, steps, StepUnit::UndoPoints)
        }
    }

    /// Moves to message `position`. Positions at or before the start rewind
    /// the recording and reset the canvas.
    pub fn playback_jump_to(
        &self,
        playback: &mut Playback,
        position: i64,
    ) -> Result<PlaybackStatus, PlayerError> {
        if position > 0 {
            return self.jump_playback_to(playback, position, false, true);
        }
        match playback.player.rewind() {
            Ok(()) => {
                playback.begin();
                self.reset();
                self.push_playback_position(0, 0);
                Ok(PlaybackStatus::Playing)
            }
            Err(err) => {
                self.push_playback_position(-1, 0);
                Err(err)
            }
        }
    }

    fn skip_playback_forward(
        &self,
        playback: &mut Playback,
        steps: i64,
        unit: StepUnit,
    ) -> Result<PlaybackStatus, PlayerError> {
        log::debug!("skipping playback forward by {steps} {unit:?}");
        let mut done = if unit == StepUnit::Msecs { playback.msecs } else { 0 };
        let mut interval: i64 = 0;
        let mut messages = Vec::new();

        while done < steps {
            match playback.player.step() {
                Ok(Some(message)) => {
                    if let MessageBody::Interval { msecs } = message.body() {
                        let msecs = i64::from(*msecs);
                        interval = interval.saturating_add(msecs);
                        match unit {
                            StepUnit::Messages => done += 1,
                            StepUnit::Msecs => done += msecs.min(MAX_INTERVAL_MSECS),
                            StepUnit::UndoPoints => {}
                        }
                        continue;
                    }
                    match unit {
                        StepUnit::Messages => done += 1,
                        StepUnit::UndoPoints => {
                            if message.message_type() == MessageType::UndoPoint {
                                done += 1;
                            }
                        }
                        StepUnit::Msecs => {
                            if playback.next_has_time {
                                done += guess_message_msecs(&message, &mut playback.next_has_time);
                            } else {
                                playback.next_has_time = true;
                            }
                        }
                    }
                    messages.push(message);
                }
                Ok(None) => {
                    self.push_played(messages);
                    self.push_playback_position(-1, clamp_interval(interval));
                    return Ok(PlaybackStatus::Finished);
                }
                Err(PlayerError::Parse(reason)) => {
                    if unit == StepUnit::Messages {
                        done += 1;
                    }
                    log::warn!("can't play back message: {reason}");
                }
                Err(err) => {
                    self.push_played(messages);
                    self.push_playback_position(-1, clamp_interval(interval));
                    return Err(err);
                }
            }
        }

        if unit == StepUnit::Msecs {
            playback.msecs = done - steps;
        }
        self.push_played(messages);
        self.push_playback_position(playback.reported_position(), clamp_interval(interval));
        Ok(PlaybackStatus::Playing)
    }

    fn jump_playback_to(
        &self,
        playback: &mut Playback,
        to: i64,
        relative: bool,
        exact: bool,
    ) -> Result<PlaybackStatus, PlayerError> {
        let player_position = playback.player.position();
        if !playback.player.index_loaded() {
            self.push_playback_position(-1, 0);
            return Err(PlayerError::NoIndex);
        }

        let message_count = playback.player.index_message_count();
        if message_count <= 0 {
            self.push_playback_position(player_position, 0);
            return Err(PlayerError::EmptyRecording);
        }
        let target = if relative { player_position + to } else { to };
        let target = target.clamp(0, message_count - 1);
        log::debug!(
            "jumping playback from {player_position} to {} {target}",
            if exact { "exactly" } else { "the snapshot nearest" }
        );

        let after = relative && !exact && to > 0;
        let Some(entry) = playback.player.index_entry_search(target, after) else {
            self.push_playback_position(player_position, 0);
            return Err(PlayerError::NoSuchEntry(target));
        };

        if player_position >= entry.message_index && player_position < target {
            log::debug!("already past snapshot, stepping forward");
            match self.skip_playback_forward(playback, target - player_position, StepUnit::Messages) {
                Ok(status) => return Ok(status),
                Err(err) => log::warn!("stepping inside snapshot failed, reloading it: {err}"),
            }
        }

        let snapshot = match playback.player.index_entry_load(entry) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                self.push_playback_position(player_position, 0);
                return Err(err);
            }
        };
        if let Err(err) = playback.player.seek(entry) {
            self.push_playback_position(player_position, 0);
            return Err(err);
        }
        playback.begin();
        self.reset_to_state(snapshot.state);
        self.push_played(snapshot.messages);

        let steps = if exact { target - entry.message_index } else { 0 };
        self.skip_playback_forward(playback, steps, StepUnit::Messages)
    }
}

fn clamp_interval(interval: i64) -> i32 {
    i32::try_from(interval).unwrap_or(i32::MAX)
}
