use std::sync::Arc;

use document::{AnnotationList, DocumentMetadata, LayerPropsList, Timeline};
use history::UserCursor;
use model::{Color, TilePos};
use protocol::{AclChanges, ContextId, LayerId};

/// Notifications produced by [`crate::PaintEngine::tick`], in the order a
/// client should process them.
#[derive(Debug, Clone)]
pub enum TickEvent {
    /// Progress of loading a session, 0 to 100.
    Catchup(i32),
    RecorderStateChanged { recording: bool },
    /// The canvas changed size or origin. Offsets are how far existing
    /// content moved right and down.
    Resized {
        offset_x: i32,
        offset_y: i32,
        prev_width: u32,
        prev_height: u32,
    },
    TileChanged(TilePos),
    LayerPropsChanged(Arc<LayerPropsList>),
    AnnotationsChanged(Arc<AnnotationList>),
    MetadataChanged(Arc<DocumentMetadata>),
    TimelineChanged(Arc<Timeline>),
    CursorMoved(UserCursor),
    DefaultLayerSet(LayerId),
    UndoDepthLimitSet(usize),
    /// Playback moved. A negative position means the recording ended.
    PlaybackPosition { position: i64, interval: i32 },
}

/// Remote messages that only affect the user interface. They are reported
/// to the caller instead of being queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaEvent {
    MovePointer {
        context_id: ContextId,
        x: i32,
        y: i32,
    },
    LaserTrail {
        context_id: ContextId,
        color: Color,
        persistence: u8,
    },
}

impl MetaEvent {
    fn context_id(&self) -> ContextId {
        match *self {
            MetaEvent::MovePointer { context_id, .. } | MetaEvent::LaserTrail { context_id, .. } => {
                context_id
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandleOutcome {
    /// Messages queued for the paint thread.
    pub accepted: usize,
    pub acl_changes: AclChanges,
    /// One entry per user and kind; later messages replace earlier ones.
    pub meta: Vec<MetaEvent>,
}

impl HandleOutcome {
    pub(crate) fn push_meta(&mut self, event: MetaEvent) {
        let same = |other: &MetaEvent| {
            std::mem::discriminant(other) == std::mem::discriminant(&event)
                && other.context_id() == event.context_id()
        };
        match self.meta.iter_mut().find(|other| same(other)) {
            Some(existing) => *existing = event,
            None => self.meta.push(event),
        }
    }
}
