mod common;

use common::*;
use document::CanvasState;
use engine::{IndexEntry, IndexSnapshot, PaintEngine, Playback, PlaybackStatus, Player, PlayerError, TickEvent};
use model::Color;
use protocol::{Message, MessageBody};

/// In-memory recording with an index entry every `snapshot_every`
/// messages. Index snapshots are empty canvases.
struct VecPlayer {
    messages: Vec<Result<Message, String>>,
    position: usize,
    snapshot_every: Option<usize>,
}

impl VecPlayer {
    fn new(messages: Vec<Result<Message, String>>, snapshot_every: Option<usize>) -> Self {
        Self {
            messages,
            position: 0,
            snapshot_every,
        }
    }
}

impl Player for VecPlayer {
    fn step(&mut self) -> Result<Option<Message>, PlayerError> {
        let Some(next) = self.messages.get(self.position) else {
            return Ok(None);
        };
        self.position += 1;
        next.clone().map(Some).map_err(PlayerError::Parse)
    }

    fn rewind(&mut self) -> Result<(), PlayerError> {
        self.position = 0;
        Ok(())
    }

    fn position(&self) -> i64 {
        self.position as i64
    }

    fn progress(&self) -> f64 {
        self.position as f64 / self.messages.len().max(1) as f64
    }

    fn index_loaded(&self) -> bool {
        self.snapshot_every.is_some()
    }

    fn index_message_count(&self) -> i64 {
        self.messages.len() as i64
    }

    fn index_entry_search(&self, position: i64, after: bool) -> Option<IndexEntry> {
        let every = self.snapshot_every? as i64;
        let mut index = position / every * every;
        if after && index < position {
            index += every;
        }
        Some(IndexEntry {
            message_index: index,
            message_offset: index as u64,
        })
    }

    fn index_entry_load(&mut self, _entry: IndexEntry) -> Result<IndexSnapshot, PlayerError> {
        Ok(IndexSnapshot {
            state: CanvasState::new(),
            messages: Vec::new(),
        })
    }

    fn seek(&mut self, entry: IndexEntry) -> Result<(), PlayerError> {
        self.position = entry.message_offset as usize;
        Ok(())
    }
}

fn recording() -> Vec<Result<Message, String>> {
    vec![
        Ok(resize(1, 64, 64)),
        Ok(Message::new(1, MessageBody::Interval { msecs: 40 })),
        Err("truncated message".to_owned()),
        Ok(layer(1, 1, Color::BLACK)),
    ]
}

fn next_position(engine: &mut PaintEngine) -> (i64, i32) {
    let events = tick_until(engine, |e| matches!(e, TickEvent::PlaybackPosition { .. }));
    events
        .iter()
        .rev()
        .find_map(|e| match e {
            TickEvent::PlaybackPosition { position, interval } => Some((*position, *interval)),
            _ => None,
        })
        .expect("playback position")
}

#[test]
fn stepping_reports_progress_without_an_index() {
    let mut engine = engine();
    let mut playback = Playback::new(Box::new(VecPlayer::new(recording(), None)));

    let status = engine.handle().playback_step(&mut playback, 2).expect("step");
    assert_eq!(status, PlaybackStatus::Playing);
    assert_eq!(next_position(&mut engine), (50, 40));
    assert_eq!(engine.history_canvas_state().width(), 64);

    // The unreadable message counts as a step and is skipped.
    let status = engine.handle().playback_step(&mut playback, 10).expect("step");
    assert_eq!(status, PlaybackStatus::Finished);
    assert_eq!(next_position(&mut engine), (-1, 0));
    assert_eq!(engine.history_canvas_state().layer_props().len(), 1);
}

#[test]
fn jumping_needs_an_index() {
    let mut engine = engine();
    let mut playback = Playback::new(Box::new(VecPlayer::new(recording(), None)));
    assert!(matches!(
        engine.handle().playback_jump_to(&mut playback, 2),
        Err(PlayerError::NoIndex)
    ));
    assert_eq!(next_position(&mut engine), (-1, 0));
}

#[test]
fn jumping_loads_the_nearest_snapshot_and_steps_to_the_target() {
    let mut engine = engine();
    let mut playback = Playback::new(Box::new(VecPlayer::new(recording(), Some(2))));

    let status = engine.handle().playback_jump_to(&mut playback, 3).expect("jump");
    assert_eq!(status, PlaybackStatus::Playing);
    assert_eq!(playback.player().position(), 3);
    assert_eq!(next_position(&mut engine), (3, 0));

    // Jumping to the start rewinds and resets the canvas.
    engine.handle().playback_jump_to(&mut playback, 0).expect("rewind");
    assert_eq!(playback.player().position(), 0);
    assert_eq!(next_position(&mut engine), (0, 0));
    assert_eq!(engine.history_canvas_state().width(), 0);
}

#[test]
fn skipping_forward_counts_undo_points() {
    let mut engine = engine();
    let messages = vec![
        Ok(resize(1, 64, 64)),
        Ok(undo_point(1)),
        Ok(layer(1, 1, Color::TRANSPARENT)),
        Ok(undo_point(1)),
        Ok(layer(1, 2, Color::TRANSPARENT)),
    ];
    let mut playback = Playback::new(Box::new(VecPlayer::new(messages, Some(10))));
    engine
        .handle()
        .playback_skip_by(&mut playback, 2, false)
        .expect("skip");
    assert_eq!(next_position(&mut engine), (4, 0));
    assert_eq!(engine.history_canvas_state().layer_props().len(), 1);
}
