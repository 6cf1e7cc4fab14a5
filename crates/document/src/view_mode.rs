use model::{BIT15, Color};
use protocol::LayerId;

use crate::layer::LayerProps;
use crate::state::CanvasState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ViewMode {
    #[default]
    Normal,
    /// Only the active layer (and the groups leading to it).
    Layer,
    /// Only the layers of the active animation frame.
    Frame,
}

/// What a filter decides for one layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterResult {
    Exclude,
    /// Render the layer and everything below it unfiltered.
    IncludeAll,
    /// Render the layer, filtering its children with the same filter.
    Continue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewModeFilter {
    Normal,
    Layer { layer_id: LayerId },
    Frame { layer_ids: Vec<LayerId> },
    Nothing,
}

impl ViewModeFilter {
    pub fn make(
        state: &CanvasState,
        mode: ViewMode,
        active_layer_id: LayerId,
        active_frame_index: i32,
    ) -> Self {
        match mode {
            ViewMode::Normal => ViewModeFilter::Normal,
            ViewMode::Layer => ViewModeFilter::Layer {
                layer_id: active_layer_id,
            },
            ViewMode::Frame => Self::make_frame(state, active_frame_index),
        }
    }

    /// Filter for animation frame `frame_index`. With the timeline disabled
    /// every top-level layer is one frame, counted from the bottom.
    pub fn make_frame(state: &CanvasState, frame_index: i32) -> Self {
        let Ok(index) = usize::try_from(frame_index) else {
            return ViewModeFilter::Nothing;
        };
        if state.metadata().use_timeline {
            match state.timeline().frame(index) {
                Some(frame) => ViewModeFilter::Frame {
                    layer_ids: frame.layer_ids.clone(),
                },
                None => ViewModeFilter::Nothing,
            }
        } else {
            match state.layer_props().get(index) {
                Some(lp) => ViewModeFilter::Frame {
                    layer_ids: vec![lp.id()],
                },
                None => ViewModeFilter::Nothing,
            }
        }
    }

    pub fn excludes_everything(&self) -> bool {
        matches!(self, ViewModeFilter::Nothing)
    }

    pub fn apply(&self, lp: &LayerProps) -> FilterResult {
        match self {
            ViewModeFilter::Normal => FilterResult::IncludeAll,
            ViewModeFilter::Layer { layer_id } => {
                if lp.id() == *layer_id {
                    FilterResult::IncludeAll
                } else if lp.is_group() && lp.contains(*layer_id) {
                    FilterResult::Continue
                } else {
                    FilterResult::Exclude
                }
            }
            ViewModeFilter::Frame { layer_ids } => {
                if layer_ids.contains(&lp.id()) {
                    FilterResult::IncludeAll
                } else {
                    FilterResult::Exclude
                }
            }
            ViewModeFilter::Nothing => FilterResult::Exclude,
        }
    }
}

/// One onion skin: a neighbouring frame drawn at `opacity`, recolored with
/// `tint` unless the tint is fully transparent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OnionSkin {
    pub opacity: u16,
    pub tint: Color,
}

impl OnionSkin {
    pub fn new(opacity: u16, tint: Color) -> Self {
        Self {
            opacity: opacity.min(BIT15),
            tint,
        }
    }
}

/// Skins for the frames below and above the active one, nearest last for
/// `below` and nearest first for `above`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OnionSkins {
    pub below: Vec<OnionSkin>,
    pub above: Vec<OnionSkin>,
}

impl OnionSkins {
    pub fn is_empty(&self) -> bool {
        self.below.is_empty() && self.above.is_empty()
    }

    /// Frame offsets relative to the active frame, paired with their skin,
    /// in drawing order.
    pub fn frames(&self, active_frame_index: i32) -> impl Iterator<Item = (i32, &OnionSkin)> {
        let below_count = self.below.len() as i32;
        let below = self
            .below
            .iter()
            .enumerate()
            .map(move |(i, skin)| (active_frame_index - below_count + i as i32, skin));
        let above = self
            .above
            .iter()
            .enumerate()
            .map(move |(i, skin)| (active_frame_index + i as i32 + 1, skin));
        below.chain(above)
    }
}
