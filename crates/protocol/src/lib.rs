use std::sync::Arc;

use model::{BlendMode, Color};

mod acl;
mod dabs;

pub use acl::{AclChanges, AclState, AclVerdict, AllowAll};
pub use dabs::{Dab, DabShape, DrawDabs};

/// Identifies the participant an operation originates from. Zero is reserved
/// for "nobody" (internal messages, blank tiles).
pub type ContextId = u32;

/// Layer ids are positive for document layers. Sublayers created for
/// indirect strokes use the drawing context id; view-only sublayers use
/// negative ids.
pub type LayerId = i32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    Local,
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    CanvasResize,
    LayerCreate,
    LayerAttributes,
    LayerRetitle,
    LayerOrder,
    LayerDelete,
    FillRect,
    DrawDabs,
    PenUp,
    AnnotationCreate,
    AnnotationEdit,
    AnnotationDelete,
    SetMetadataInt,
    SetTimelineFrame,
    RemoveTimelineFrame,
    UndoPoint,
    Undo,
    DefaultLayer,
    MovePointer,
    LaserTrail,
    Interval,
    Chat,
}

impl MessageType {
    /// Whether operations of this type are queued for the paint thread.
    /// The rest is meta traffic that never touches the canvas.
    pub const fn is_pushable(self) -> bool {
        !matches!(
            self,
            MessageType::MovePointer
                | MessageType::LaserTrail
                | MessageType::Interval
                | MessageType::Chat
        )
    }

    pub const fn is_draw_dabs(self) -> bool {
        matches!(self, MessageType::DrawDabs)
    }

    pub const fn name(self) -> &'static str {
        match self {
            MessageType::CanvasResize => "CanvasResize",
            MessageType::LayerCreate => "LayerCreate",
            MessageType::LayerAttributes => "LayerAttributes",
            MessageType::LayerRetitle => "LayerRetitle",
            MessageType::LayerOrder => "LayerOrder",
            MessageType::LayerDelete => "LayerDelete",
            MessageType::FillRect => "FillRect",
            MessageType::DrawDabs => "DrawDabs",
            MessageType::PenUp => "PenUp",
            MessageType::AnnotationCreate => "AnnotationCreate",
            MessageType::AnnotationEdit => "AnnotationEdit",
            MessageType::AnnotationDelete => "AnnotationDelete",
            MessageType::SetMetadataInt => "SetMetadataInt",
            MessageType::SetTimelineFrame => "SetTimelineFrame",
            MessageType::RemoveTimelineFrame => "RemoveTimelineFrame",
            MessageType::UndoPoint => "UndoPoint",
            MessageType::Undo => "Undo",
            MessageType::DefaultLayer => "DefaultLayer",
            MessageType::MovePointer => "MovePointer",
            MessageType::LaserTrail => "LaserTrail",
            MessageType::Interval => "Interval",
            MessageType::Chat => "Chat",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataField {
    DpiX,
    DpiY,
    Framerate,
    UseTimeline,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerCreate {
    pub id: LayerId,
    /// Group to insert into, on top of its children. `None` inserts at the
    /// top of the root list.
    pub parent: Option<LayerId>,
    pub group: bool,
    pub fill: Color,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerAttributes {
    pub id: LayerId,
    pub opacity: u8,
    pub blend_mode: BlendMode,
    pub hidden: bool,
    pub censored: bool,
    pub isolated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillRect {
    pub layer_id: LayerId,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub color: Color,
    pub blend_mode: BlendMode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    CanvasResize {
        top: i32,
        right: i32,
        bottom: i32,
        left: i32,
    },
    LayerCreate(LayerCreate),
    LayerAttributes(LayerAttributes),
    LayerRetitle {
        id: LayerId,
        title: String,
    },
    /// New bottom-to-top order of the root layer list.
    LayerOrder {
        ids: Vec<LayerId>,
    },
    LayerDelete {
        id: LayerId,
    },
    FillRect(FillRect),
    DrawDabs(DrawDabs),
    PenUp,
    AnnotationCreate {
        id: u16,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    },
    AnnotationEdit {
        id: u16,
        background: Color,
        text: String,
    },
    AnnotationDelete {
        id: u16,
    },
    SetMetadataInt {
        field: MetadataField,
        value: i32,
    },
    SetTimelineFrame {
        frame: u16,
        insert: bool,
        layer_ids: Vec<LayerId>,
    },
    RemoveTimelineFrame {
        frame: u16,
    },
    UndoPoint,
    Undo {
        redo: bool,
    },
    DefaultLayer {
        id: LayerId,
    },
    MovePointer {
        x: i32,
        y: i32,
    },
    LaserTrail {
        color: Color,
        persistence: u8,
    },
    Interval {
        msecs: u16,
    },
    Chat {
        text: String,
    },
}

impl MessageBody {
    pub fn message_type(&self) -> MessageType {
        match self {
            MessageBody::CanvasResize { .. } => MessageType::CanvasResize,
            MessageBody::LayerCreate(_) => MessageType::LayerCreate,
            MessageBody::LayerAttributes(_) => MessageType::LayerAttributes,
            MessageBody::LayerRetitle { .. } => MessageType::LayerRetitle,
            MessageBody::LayerOrder { .. } => MessageType::LayerOrder,
            MessageBody::LayerDelete { .. } => MessageType::LayerDelete,
            MessageBody::FillRect(_) => MessageType::FillRect,
            MessageBody::DrawDabs(_) => MessageType::DrawDabs,
            MessageBody::PenUp => MessageType::PenUp,
            MessageBody::AnnotationCreate { .. } => MessageType::AnnotationCreate,
            MessageBody::AnnotationEdit { .. } => MessageType::AnnotationEdit,
            MessageBody::AnnotationDelete { .. } => MessageType::AnnotationDelete,
            MessageBody::SetMetadataInt { .. } => MessageType::SetMetadataInt,
            MessageBody::SetTimelineFrame { .. } => MessageType::SetTimelineFrame,
            MessageBody::RemoveTimelineFrame { .. } => MessageType::RemoveTimelineFrame,
            MessageBody::UndoPoint => MessageType::UndoPoint,
            MessageBody::Undo { .. } => MessageType::Undo,
            MessageBody::DefaultLayer { .. } => MessageType::DefaultLayer,
            MessageBody::MovePointer { .. } => MessageType::MovePointer,
            MessageBody::LaserTrail { .. } => MessageType::LaserTrail,
            MessageBody::Interval { .. } => MessageType::Interval,
            MessageBody::Chat { .. } => MessageType::Chat,
        }
    }
}

/// One operation as it travels through the engine. Cloning is cheap: the
/// body is shared between the queues, the history and any recorder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    context_id: ContextId,
    body: Arc<MessageBody>,
}

impl Message {
    pub fn new(context_id: ContextId, body: MessageBody) -> Self {
        Self {
            context_id,
            body: Arc::new(body),
        }
    }

    pub fn context_id(&self) -> ContextId {
        self.context_id
    }

    pub fn body(&self) -> &MessageBody {
        &self.body
    }

    pub fn message_type(&self) -> MessageType {
        self.body.message_type()
    }

    pub fn draw_dabs(&self) -> Option<&DrawDabs> {
        match self.body() {
            MessageBody::DrawDabs(dabs) => Some(dabs),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_messages_are_not_pushable() {
        let pointer = Message::new(2, MessageBody::MovePointer { x: 1, y: 2 });
        let laser = Message::new(
            2,
            MessageBody::LaserTrail {
                color: Color::BLACK,
                persistence: 1,
            },
        );
        assert!(!pointer.message_type().is_pushable());
        assert!(!laser.message_type().is_pushable());
        assert!(Message::new(2, MessageBody::UndoPoint).message_type().is_pushable());
        assert!(Message::new(2, MessageBody::DefaultLayer { id: 1 }).message_type().is_pushable());
    }

    #[test]
    fn messages_compare_by_value_and_context() {
        let a = Message::new(3, MessageBody::Undo { redo: false });
        let b = Message::new(3, MessageBody::Undo { redo: false });
        let c = Message::new(4, MessageBody::Undo { redo: false });
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.clone().context_id(), 3);
    }
}
