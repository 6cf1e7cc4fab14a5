mod common;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use common::*;
use crossbeam_channel::{Receiver, Sender};
use document::{BasicCompositor, CanvasState, Compositor, ViewMode, ViewModeFilter, flatten_tile};
use engine::{EngineError, PaintEngine, Recorder, RecorderError, TickEvent};
use history::HistorySnapshot;
use model::{BlendMode, Color, Pixel15, Pixel8, TILE_SIZE, TilePos, TransientTile};
use protocol::{
    AclState, AclVerdict, ContextId, LayerAttributes, LayerId, Message, MessageBody, MetadataField,
    Origin,
};
use view::{Preview, PreviewRender};

fn flattened(state: &CanvasState) -> Vec<TransientTile> {
    (0..state.tile_counts().total())
        .map(|index| {
            let mut tile = TransientTile::new_blank(0);
            flatten_tile(state, &BasicCompositor, &mut tile, index, &ViewModeFilter::Normal);
            tile
        })
        .collect()
}

fn alpha_at(state: &CanvasState, x: u32, y: u32) -> u16 {
    flattened(state)[0].pixels()[(y * TILE_SIZE + x) as usize].a
}

const OPAQUE_BLACK: Pixel8 = Pixel8 {
    b: 0,
    g: 0,
    r: 0,
    a: u8::MAX,
};

fn changed_tiles(events: &[TickEvent]) -> HashSet<TilePos> {
    events
        .iter()
        .filter_map(|e| match e {
            TickEvent::TileChanged(pos) => Some(*pos),
            _ => None,
        })
        .collect()
}

/// First pixel of every tile rendered from the pending changes inside the
/// tile rectangle.
fn render_first_pixels(engine: &mut PaintEngine, right: i64, bottom: i64) -> Vec<(TilePos, Pixel8)> {
    let rendered = Mutex::new(Vec::new());
    engine.render_tile_range(0, 0, right, bottom, &|pos: TilePos, pixels: &[Pixel8], _: usize| {
        rendered.lock().expect("rendered").push((pos, pixels[0]));
    });
    rendered.into_inner().expect("rendered")
}

#[test]
fn small_local_dabs_match_sequential_application() {
    let mut engine = engine();
    let setup = [resize(1, 256, 256), layer(1, 1, Color::TRANSPARENT)];
    assert_eq!(remote(&engine, &setup), 2);
    sync(&mut engine, 1);

    let dabs: Vec<Message> = (0..1000).map(|i| dab(1, 1, (i * 7) % 256, (i * 13) % 256)).collect();
    assert_eq!(local(&engine, &dabs), 1000);
    sync(&mut engine, 2);

    let mut expected = CanvasState::new();
    for message in setup.iter().chain(&dabs) {
        expected = expected.apply(&BasicCompositor, message).expect("apply");
    }
    let actual = flattened(engine.history_canvas_state());
    let expected = flattened(&expected);
    assert_eq!(actual.len(), expected.len());
    for (a, b) in actual.iter().zip(&expected) {
        assert!(a.pixels() == b.pixels());
    }
}

struct DenyAll;

impl AclState for DenyAll {
    fn handle(&mut self, _message: &Message, _override_acls: bool) -> AclVerdict {
        AclVerdict::FILTER
    }
}

#[test]
fn denied_remote_messages_are_dropped() {
    let mut engine = engine();
    remote(&engine, &[resize(1, 64, 64)]);
    sync(&mut engine, 1);
    let before = engine.history_canvas_state().clone();

    let outcome =
        engine
            .handle()
            .handle(Origin::Remote, false, &mut DenyAll, &[layer(2, 7, Color::BLACK)]);
    assert_eq!(outcome.accepted, 0);
    assert_eq!(engine.handle().queued_len(), (0, 0));

    let events = sync(&mut engine, 2);
    assert!(!events.iter().any(|e| matches!(e, TickEvent::TileChanged(_))));
    assert!(CanvasState::ptr_eq(&before, engine.history_canvas_state()));
}

/// Filters everything from one context, which is the local user.
struct RefuseLocalUser(ContextId);

impl AclState for RefuseLocalUser {
    fn handle(&mut self, message: &Message, _override_acls: bool) -> AclVerdict {
        if message.context_id() == self.0 {
            AclVerdict::FILTER
        } else {
            AclVerdict::ADMIT
        }
    }

    fn local_context_id(&self) -> Option<ContextId> {
        Some(self.0)
    }
}

#[test]
fn refused_echo_removes_the_local_prediction() {
    let mut engine = engine();
    remote(&engine, &[resize(1, 64, 64), layer(1, 1, Color::TRANSPARENT)]);
    sync(&mut engine, 1);

    let own = dab(2, 1, 10, 10);
    assert_eq!(local(&engine, &[own.clone()]), 1);
    sync(&mut engine, 2);
    assert!(alpha_at(engine.history_canvas_state(), 10, 10) > 0);

    let outcome = engine.handle().handle(
        Origin::Remote,
        false,
        &mut RefuseLocalUser(2),
        &[own, dab(3, 1, 40, 40)],
    );
    assert_eq!(outcome.accepted, 1);
    sync(&mut engine, 3);

    let state = engine.history_canvas_state();
    assert_eq!(alpha_at(state, 10, 10), 0);
    assert!(alpha_at(state, 40, 40) > 0);
}

#[test]
fn synced_canvas_state_follows_everything_queued_before() {
    let engine = engine();
    remote(&engine, &[resize(1, 96, 32), layer(1, 1, Color::BLACK)]);
    let state = engine.handle().sync_canvas_state().expect("sync canvas state");
    assert_eq!(state.width(), 96);
    assert_eq!(state.layer_props().len(), 1);
}

#[test]
fn hiding_a_layer_only_changes_the_view() {
    let mut engine = engine();
    remote(
        &engine,
        &[
            resize(1, 128, 128),
            layer(1, 6, Color::WHITE),
            layer(1, 5, Color::TRANSPARENT),
            fill(1, 5, 0, 0, 10),
        ],
    );
    let events = sync(&mut engine, 1);
    assert!(events.iter().any(|e| matches!(e, TickEvent::Resized { .. })));
    assert!(events.iter().any(|e| matches!(e, TickEvent::LayerPropsChanged(_))));
    engine.render_everything(&|_: TilePos, _: &[Pixel8], _: usize| {});

    engine.set_layer_hidden(5, true);
    let events = engine.tick();
    let changed: Vec<TilePos> = events
        .iter()
        .filter_map(|e| match e {
            TickEvent::TileChanged(pos) => Some(*pos),
            _ => None,
        })
        .collect();
    assert_eq!(changed, vec![TilePos { x: 0, y: 0 }]);

    let props_of = |state: &CanvasState| {
        state
            .layer_props()
            .iter()
            .find(|lp| lp.id() == 5)
            .map(|lp| lp.hidden())
            .expect("layer 5")
    };
    assert!(props_of(engine.view_canvas_state()));
    assert!(!props_of(engine.history_canvas_state()));

    let rendered = Mutex::new(Vec::new());
    engine.render_tile_range(0, 0, 10, 10, &|pos: TilePos, pixels: &[Pixel8], _thread: usize| {
        rendered.lock().expect("rendered").push((pos, pixels[0]));
    });
    let rendered = rendered.into_inner().expect("rendered");
    assert_eq!(rendered.len(), 1);
    // Layer 5's black square is hidden, the white layer below shows.
    assert_eq!(rendered[0].1.r, u8::MAX);
}

#[derive(Default)]
struct RecordingLog {
    snapshot: Option<HistorySnapshot>,
    messages: Vec<Message>,
    finished: bool,
}

struct LogRecorder(Arc<Mutex<RecordingLog>>);

impl Recorder for LogRecorder {
    fn start(&mut self, snapshot: Option<&HistorySnapshot>) -> Result<(), RecorderError> {
        let mut log = self.0.lock().expect("log");
        log.snapshot = snapshot.cloned();
        Ok(())
    }

    fn push(&mut self, message: &Message) -> Result<(), RecorderError> {
        self.0.lock().expect("log").messages.push(message.clone());
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<(), RecorderError> {
        self.0.lock().expect("log").finished = true;
        Ok(())
    }
}

#[test]
fn recording_with_history_starts_from_the_oldest_state() {
    let mut engine = engine();
    let before = [
        resize(1, 64, 64),
        layer(1, 1, Color::TRANSPARENT),
        undo_point(1),
        dab(1, 1, 4, 4),
    ];
    remote(&engine, &before);
    sync(&mut engine, 1);

    let log = Arc::new(Mutex::new(RecordingLog::default()));
    engine
        .handle()
        .recorder_start(Box::new(LogRecorder(Arc::clone(&log))), true)
        .expect("start recording");
    let events = engine.tick();
    assert!(events
        .iter()
        .any(|e| matches!(e, TickEvent::RecorderStateChanged { recording: true })));

    let after = [undo_point(1), dab(1, 1, 8, 8)];
    remote(&engine, &after);
    sync(&mut engine, 2);
    assert!(engine.handle().recorder_stop());

    let log = log.lock().expect("log");
    let snapshot = log.snapshot.as_ref().expect("snapshot");
    assert_eq!(snapshot.base.width(), 0);
    for message in &before {
        assert!(snapshot.messages.contains(message), "{message:?} missing");
    }
    assert_eq!(log.messages, after);
    assert!(log.finished);
}

struct CountingPreview {
    disposed: Arc<AtomicUsize>,
}

impl PreviewRender for CountingPreview {
    fn render(
        &mut self,
        base: &CanvasState,
        _compositor: &dyn Compositor,
        _offset_x: i32,
        _offset_y: i32,
    ) -> CanvasState {
        base.clone()
    }

    fn dispose(self: Box<Self>) {
        self.disposed.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn installing_a_preview_disposes_the_previous_one_once() {
    let mut engine = engine();
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));

    engine.handle().set_preview(Preview::new(
        Box::new(CountingPreview {
            disposed: Arc::clone(&first),
        }),
        0,
        0,
    ));
    sync(&mut engine, 1);
    assert!(engine.local_view().has_preview());

    engine.handle().set_preview(Preview::new(
        Box::new(CountingPreview {
            disposed: Arc::clone(&second),
        }),
        0,
        0,
    ));
    sync(&mut engine, 2);
    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(second.load(Ordering::SeqCst), 0);

    engine.preview_clear();
    sync(&mut engine, 3);
    assert!(!engine.local_view().has_preview());
    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(second.load(Ordering::SeqCst), 1);
}

#[test]
fn revealing_censored_layers_only_changes_the_view() {
    let mut engine = engine();
    remote(
        &engine,
        &[
            resize(1, 128, 128),
            layer(1, 1, Color::TRANSPARENT),
            fill(1, 1, 0, 0, 10),
            Message::new(
                1,
                MessageBody::LayerAttributes(LayerAttributes {
                    id: 1,
                    opacity: u8::MAX,
                    blend_mode: BlendMode::Normal,
                    hidden: false,
                    censored: true,
                    isolated: false,
                }),
            ),
        ],
    );
    sync(&mut engine, 1);
    let censored = render_first_pixels(&mut engine, 0, 0);
    assert_eq!(censored.len(), 1);
    assert_ne!(censored[0].1, OPAQUE_BLACK);

    engine.set_reveal_censored(true);
    let events = engine.tick();
    assert_eq!(changed_tiles(&events), HashSet::from([TilePos { x: 0, y: 0 }]));
    assert!(events.iter().any(|e| matches!(e, TickEvent::LayerPropsChanged(_))));

    let censored_in = |state: &CanvasState| {
        state
            .layer_props()
            .iter()
            .find(|lp| lp.id() == 1)
            .map(|lp| lp.censored())
            .expect("layer 1")
    };
    assert!(!censored_in(engine.view_canvas_state()));
    assert!(censored_in(engine.history_canvas_state()));

    let revealed = render_first_pixels(&mut engine, 0, 0);
    assert_eq!(revealed, vec![(TilePos { x: 0, y: 0 }, OPAQUE_BLACK)]);
}

fn timeline_frame(layer_ids: Vec<LayerId>) -> Message {
    Message::new(
        1,
        MessageBody::SetTimelineFrame {
            frame: 0,
            insert: false,
            layer_ids,
        },
    )
}

#[test]
fn swapping_the_timeline_in_frame_mode_redraws_every_tile() {
    let mut engine = engine();
    remote(
        &engine,
        &[
            resize(1, 128, 128),
            layer(1, 1, Color::BLACK),
            layer(1, 2, Color::TRANSPARENT),
            Message::new(
                1,
                MessageBody::SetMetadataInt {
                    field: MetadataField::UseTimeline,
                    value: 1,
                },
            ),
            timeline_frame(vec![1]),
        ],
    );
    sync(&mut engine, 1);
    engine.set_view_mode(ViewMode::Frame);
    engine.tick();
    let before = render_first_pixels(&mut engine, 1, 1);
    assert_eq!(before.len(), 4);
    assert!(before.iter().all(|(_, pixel)| *pixel == OPAQUE_BLACK));

    // Only the timeline changes; no layer content does.
    remote(&engine, &[timeline_frame(vec![2])]);
    let events = sync(&mut engine, 2);
    assert!(events.iter().any(|e| matches!(e, TickEvent::TimelineChanged(_))));
    let all: HashSet<TilePos> = (0..2)
        .flat_map(|y| (0..2).map(move |x| TilePos { x, y }))
        .collect();
    assert_eq!(changed_tiles(&events), all);

    let after = render_first_pixels(&mut engine, 1, 1);
    assert_eq!(after.len(), 4);
    assert!(after.iter().all(|(_, pixel)| *pixel != OPAQUE_BLACK));
}

fn recorded_history(engine: &PaintEngine) -> Vec<Message> {
    let log = Arc::new(Mutex::new(RecordingLog::default()));
    engine
        .handle()
        .recorder_start(Box::new(LogRecorder(Arc::clone(&log))), true)
        .expect("start recording");
    engine.handle().recorder_stop();
    let log = log.lock().expect("log");
    log.snapshot.as_ref().expect("snapshot").messages.clone()
}

#[test]
fn cleanup_commits_pending_local_operations() {
    let mut engine = engine();
    remote(&engine, &[resize(1, 64, 64), layer(1, 1, Color::TRANSPARENT)]);
    sync(&mut engine, 1);
    let own = dab(2, 1, 10, 10);
    local(&engine, &[own.clone()]);
    sync(&mut engine, 2);
    assert!(!recorded_history(&engine).contains(&own));

    engine.handle().cleanup();
    tick_until(&mut engine, |e| matches!(e, TickEvent::Catchup(100)));
    sync(&mut engine, 3);
    assert!(recorded_history(&engine).contains(&own));
    assert!(alpha_at(engine.history_canvas_state(), 10, 10) > 0);
}

/// Blocks the first blend after being armed until the gate opens.
struct GatedCompositor {
    armed: AtomicBool,
    entered: Sender<()>,
    gate: Receiver<()>,
}

impl GatedCompositor {
    fn pass(&self) {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.send(()).expect("entered");
            self.gate.recv().expect("gate");
        }
    }
}

impl Compositor for GatedCompositor {
    fn blend(&self, dst: &mut [Pixel15], src: &[Pixel15], opacity: u16, mode: BlendMode) {
        self.pass();
        BasicCompositor.blend(dst, src, opacity, mode);
    }

    fn blend_mask(
        &self,
        dst: &mut [Pixel15],
        color: Pixel15,
        mask: &[u16],
        opacity: u16,
        mode: BlendMode,
    ) {
        self.pass();
        BasicCompositor.blend_mask(dst, color, mask, opacity, mode);
    }
}

#[test]
fn shutdown_leaves_queued_work_unhandled() {
    let (entered_sender, entered) = crossbeam_channel::bounded(1);
    let (open, gate) = crossbeam_channel::bounded(1);
    let compositor = Arc::new(GatedCompositor {
        armed: AtomicBool::new(false),
        entered: entered_sender,
        gate,
    });
    let mut engine = engine_with(Arc::clone(&compositor) as Arc<dyn Compositor>);
    remote(&engine, &[resize(1, 64, 64), layer(1, 1, Color::TRANSPARENT)]);
    sync(&mut engine, 1);

    compositor.armed.store(true, Ordering::SeqCst);
    remote(&engine, &[fill(1, 1, 0, 0, 10)]);
    entered
        .recv_timeout(Duration::from_secs(10))
        .expect("paint thread busy with the fill");
    remote(&engine, &[resize(1, 128, 128)]);

    let handle = engine.handle().clone();
    let opener = {
        let handle = handle.clone();
        std::thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(10);
            while handle.is_running() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(1));
            }
            open.send(()).expect("open gate");
        })
    };
    drop(engine);
    opener.join().expect("gate opener");

    assert!(!handle.is_running());
    assert_eq!(handle.sample_canvas_state().width(), 64);
    assert_eq!(handle.queued_len(), (0, 0));
    assert!(matches!(handle.sync_canvas_state(), Err(EngineError::Stopped)));
    let log = Arc::new(Mutex::new(RecordingLog::default()));
    assert!(matches!(
        handle.recorder_start(Box::new(LogRecorder(log)), true),
        Err(RecorderError::Disconnected)
    ));
}

#[test]
fn render_everything_covers_the_whole_view() {
    let mut engine = engine();
    remote(&engine, &[resize(1, 130, 70), layer(1, 1, Color::BLACK)]);
    sync(&mut engine, 1);

    let seen = Mutex::new(HashSet::new());
    engine.render_everything(&|pos: TilePos, pixels: &[Pixel8], _thread: usize| {
        assert_eq!(pixels[0], Pixel8 { b: 0, g: 0, r: 0, a: u8::MAX });
        seen.lock().expect("seen").insert(pos);
    });
    assert_eq!(seen.into_inner().expect("seen").len(), 3 * 2);
}

#[test]
fn remote_draws_report_cursors_and_default_layer() {
    let mut engine = engine();
    remote(&engine, &[resize(1, 64, 64), layer(1, 1, Color::TRANSPARENT)]);
    remote(&engine, &[dab(4, 1, 10, 20)]);
    remote(
        &engine,
        &[Message::new(1, protocol::MessageBody::DefaultLayer { id: 1 })],
    );
    let events = sync(&mut engine, 1);
    assert!(events.iter().any(|e| matches!(
        e,
        TickEvent::CursorMoved(cursor) if cursor.context_id == 4 && cursor.x == 10 && cursor.y == 20
    )));
    assert!(events.iter().any(|e| matches!(e, TickEvent::DefaultLayerSet(1))));
}

#[test]
fn undo_depth_limit_changes_are_reported() {
    let mut engine = engine();
    engine.handle().set_undo_depth_limit(5);
    let events = sync(&mut engine, 1);
    assert!(events.iter().any(|e| matches!(e, TickEvent::UndoDepthLimitSet(5))));
}
