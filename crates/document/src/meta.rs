use std::sync::Arc;

use model::Color;
use protocol::{LayerId, MetadataField};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    pub id: u16,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub background: Color,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnotationList {
    entries: Vec<Arc<Annotation>>,
}

impl AnnotationList {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Annotation>> {
        self.entries.iter()
    }

    pub fn get_by_id(&self, id: u16) -> Option<&Arc<Annotation>> {
        self.entries.iter().find(|a| a.id == id)
    }

    pub fn index_of(&self, id: u16) -> Option<usize> {
        self.entries.iter().position(|a| a.id == id)
    }

    pub fn push(&mut self, annotation: Annotation) {
        self.entries.push(Arc::new(annotation));
    }

    pub fn get_mut(&mut self, index: usize) -> &mut Annotation {
        Arc::make_mut(&mut self.entries[index])
    }

    pub fn remove(&mut self, index: usize) -> Arc<Annotation> {
        self.entries.remove(index)
    }

    /// Moves every annotation by (`dx`, `dy`), used when the canvas grows
    /// or shrinks at its top or left edge.
    pub fn shifted(&self, dx: i32, dy: i32) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .map(|a| {
                    Arc::new(Annotation {
                        x: a.x + dx,
                        y: a.y + dy,
                        ..Annotation::clone(a)
                    })
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentMetadata {
    pub dpix: i32,
    pub dpiy: i32,
    pub framerate: i32,
    pub use_timeline: bool,
}

impl Default for DocumentMetadata {
    fn default() -> Self {
        Self {
            dpix: 72,
            dpiy: 72,
            framerate: 24,
            use_timeline: false,
        }
    }
}

impl DocumentMetadata {
    pub fn with_field(mut self, field: MetadataField, value: i32) -> Self {
        match field {
            MetadataField::DpiX => self.dpix = value,
            MetadataField::DpiY => self.dpiy = value,
            MetadataField::Framerate => self.framerate = value,
            MetadataField::UseTimeline => self.use_timeline = value != 0,
        }
        self
    }
}

/// One animation frame: the top-level layers shown while it is active.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimelineFrame {
    pub layer_ids: Vec<LayerId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Timeline {
    frames: Vec<Arc<TimelineFrame>>,
}

impl Timeline {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frame(&self, index: usize) -> Option<&TimelineFrame> {
        self.frames.get(index).map(Arc::as_ref)
    }

    pub fn frames(&self) -> impl Iterator<Item = &TimelineFrame> {
        self.frames.iter().map(Arc::as_ref)
    }

    pub fn insert(&mut self, index: usize, frame: TimelineFrame) {
        self.frames.insert(index, Arc::new(frame));
    }

    pub fn replace(&mut self, index: usize, frame: TimelineFrame) {
        self.frames[index] = Arc::new(frame);
    }

    pub fn remove(&mut self, index: usize) {
        self.frames.remove(index);
    }
}
