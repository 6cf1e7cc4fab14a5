#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use document::{BasicCompositor, Compositor};
use engine::{EngineConfig, PaintEngine, TickEvent};
use model::Color;
use protocol::{AllowAll, DrawDabs, FillRect, LayerCreate, LayerId, Message, MessageBody, Origin};

const TIMEOUT: Duration = Duration::from_secs(10);

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn engine() -> PaintEngine {
    engine_with(Arc::new(BasicCompositor))
}

pub fn engine_with(compositor: Arc<dyn Compositor>) -> PaintEngine {
    init_logger();
    let config = EngineConfig {
        render_thread_count: Some(2),
        ..EngineConfig::default()
    };
    PaintEngine::new(config, None, compositor).expect("engine")
}

/// Ticks until an event matches `done`, returning every event seen.
pub fn tick_until(
    engine: &mut PaintEngine,
    mut done: impl FnMut(&TickEvent) -> bool,
) -> Vec<TickEvent> {
    let deadline = Instant::now() + TIMEOUT;
    let mut seen = Vec::new();
    loop {
        let events = engine.tick();
        let finished = events.iter().any(&mut done);
        seen.extend(events);
        if finished {
            return seen;
        }
        assert!(Instant::now() < deadline, "timed out, saw {seen:?}");
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// Waits until everything queued so far has been handled. Local messages
/// always go first, so a remote marker comes out after all of them.
pub fn sync(engine: &mut PaintEngine, marker: i32) -> Vec<TickEvent> {
    engine.handle().catchup(marker);
    tick_until(engine, |event| matches!(event, TickEvent::Catchup(m) if *m == marker))
}

pub fn remote(engine: &PaintEngine, messages: &[Message]) -> usize {
    engine
        .handle()
        .handle(Origin::Remote, false, &mut AllowAll, messages)
        .accepted
}

pub fn local(engine: &PaintEngine, messages: &[Message]) -> usize {
    engine
        .handle()
        .handle(Origin::Local, false, &mut AllowAll, messages)
        .accepted
}

pub fn resize(context_id: u32, width: i32, height: i32) -> Message {
    Message::new(
        context_id,
        MessageBody::CanvasResize {
            top: 0,
            right: width,
            bottom: height,
            left: 0,
        },
    )
}

pub fn layer(context_id: u32, id: LayerId, fill: Color) -> Message {
    Message::new(
        context_id,
        MessageBody::LayerCreate(LayerCreate {
            id,
            parent: None,
            group: false,
            fill,
            title: format!("Layer {id}"),
        }),
    )
}

pub fn fill(context_id: u32, layer_id: LayerId, x: u32, y: u32, size: u32) -> Message {
    Message::new(
        context_id,
        MessageBody::FillRect(FillRect {
            layer_id,
            x,
            y,
            width: size,
            height: size,
            color: Color::BLACK,
            blend_mode: model::BlendMode::Normal,
        }),
    )
}

/// One dab of radius 2, covering 16 pixels.
pub fn dab(context_id: u32, layer_id: LayerId, x: i32, y: i32) -> Message {
    Message::new(
        context_id,
        MessageBody::DrawDabs(DrawDabs::new(layer_id, x, y, Color::BLACK).with_dab(0, 0, 2, 128)),
    )
}

pub fn undo_point(context_id: u32) -> Message {
    Message::new(context_id, MessageBody::UndoPoint)
}
