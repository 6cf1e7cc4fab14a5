//! Versioned canvas model.
//!
//! A [`CanvasState`] is an immutable snapshot of the document. New versions
//! are derived through [`TransientCanvasState`], which shares every piece of
//! substructure that the derivation does not touch. Tiles, layer contents,
//! props and metadata are all behind `Arc`s, so comparing two versions by
//! pointer tells which parts changed.

mod diff;
mod error;
mod flatten;
mod layer;
mod meta;
mod ops;
mod paint;
mod routes;
mod state;
mod view_mode;

pub use diff::CanvasDiff;
pub use error::ApplyError;
pub use flatten::{flatten_list, flatten_tile};
pub use layer::{
    LayerContent, LayerGroup, LayerList, LayerListEntry, LayerProps, LayerPropsList, Sublayer,
};
pub use meta::{Annotation, AnnotationList, DocumentMetadata, Timeline, TimelineFrame};
pub use paint::{draw_dabs, draw_dabs_in_sublayer, fill_rect, pen_up};
pub use routes::{LayerRoute, LayerRoutes, find_route};
pub use state::{CanvasState, CanvasStateData, TransientCanvasState};
pub use view_mode::{FilterResult, OnionSkin, OnionSkins, ViewMode, ViewModeFilter};

pub use model::{BasicCompositor, Compositor};
