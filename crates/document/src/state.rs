use std::fmt;
use std::sync::{Arc, OnceLock};

use model::{Tile, TileCounts};
use protocol::LayerId;

use crate::layer::{LayerList, LayerPropsList};
use crate::meta::{AnnotationList, DocumentMetadata, Timeline};
use crate::routes::{LayerRoute, LayerRoutes, find_route};

/// Contents of a published canvas state. Only reachable through
/// [`CanvasState`] (shared, immutable) or [`TransientCanvasState`]
/// (exclusively owned while being derived).
#[derive(Clone, Default)]
pub struct CanvasStateData {
    width: u32,
    height: u32,
    offset_x: i32,
    offset_y: i32,
    background_tile: Option<Tile>,
    background_opaque: bool,
    layers: Arc<LayerList>,
    layer_props: Arc<LayerPropsList>,
    annotations: Arc<AnnotationList>,
    metadata: Arc<DocumentMetadata>,
    timeline: Arc<Timeline>,
    routes: OnceLock<Arc<LayerRoutes>>,
}

/// Immutable snapshot of the whole document. Cloning is a reference count
/// bump; two states that are [`CanvasState::ptr_eq`] are identical.
#[derive(Clone, Default)]
pub struct CanvasState(Arc<CanvasStateData>);

/// A canvas state being derived from a previous one. Unchanged
/// substructure stays shared with the source until it is touched.
pub struct TransientCanvasState {
    data: CanvasStateData,
}

impl CanvasState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn width(&self) -> u32 {
        self.0.width
    }

    pub fn height(&self) -> u32 {
        self.0.height
    }

    pub fn offset_x(&self) -> i32 {
        self.0.offset_x
    }

    pub fn offset_y(&self) -> i32 {
        self.0.offset_y
    }

    pub fn tile_counts(&self) -> TileCounts {
        TileCounts::for_size(self.0.width, self.0.height)
    }

    pub fn background_tile(&self) -> Option<&Tile> {
        self.0.background_tile.as_ref()
    }

    pub fn background_opaque(&self) -> bool {
        self.0.background_opaque
    }

    pub fn layers(&self) -> &Arc<LayerList> {
        &self.0.layers
    }

    pub fn layer_props(&self) -> &Arc<LayerPropsList> {
        &self.0.layer_props
    }

    pub fn annotations(&self) -> &Arc<AnnotationList> {
        &self.0.annotations
    }

    pub fn metadata(&self) -> &Arc<DocumentMetadata> {
        &self.0.metadata
    }

    pub fn timeline(&self) -> &Arc<Timeline> {
        &self.0.timeline
    }

    /// Id lookup for every layer, built on first use and kept for the
    /// lifetime of this state.
    pub fn routes(&self) -> &LayerRoutes {
        self.0
            .routes
            .get_or_init(|| Arc::new(LayerRoutes::build(&self.0.layer_props)))
    }

    pub fn search_layer(&self, id: LayerId) -> Option<&LayerRoute> {
        self.routes().search(id)
    }

    pub fn ptr_eq(a: &CanvasState, b: &CanvasState) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    pub fn as_arc(&self) -> &Arc<CanvasStateData> {
        &self.0
    }

    pub fn to_transient(&self) -> TransientCanvasState {
        let mut data = CanvasStateData::clone(&self.0);
        data.routes = OnceLock::new();
        TransientCanvasState { data }
    }
}

impl From<Arc<CanvasStateData>> for CanvasState {
    fn from(data: Arc<CanvasStateData>) -> Self {
        Self(data)
    }
}

impl fmt::Debug for CanvasState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CanvasState")
            .field("ptr", &Arc::as_ptr(&self.0))
            .field("width", &self.0.width)
            .field("height", &self.0.height)
            .field("layers", &self.0.layer_props.len())
            .finish()
    }
}

impl TransientCanvasState {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            data: CanvasStateData {
                width,
                height,
                ..CanvasStateData::default()
            },
        }
    }

    pub fn width(&self) -> u32 {
        self.data.width
    }

    pub fn height(&self) -> u32 {
        self.data.height
    }

    pub fn offset_x(&self) -> i32 {
        self.data.offset_x
    }

    pub fn offset_y(&self) -> i32 {
        self.data.offset_y
    }

    pub fn layers(&self) -> &Arc<LayerList> {
        &self.data.layers
    }

    pub fn layer_props(&self) -> &Arc<LayerPropsList> {
        &self.data.layer_props
    }

    pub fn annotations(&self) -> &Arc<AnnotationList> {
        &self.data.annotations
    }

    pub fn metadata(&self) -> &Arc<DocumentMetadata> {
        &self.data.metadata
    }

    pub fn timeline(&self) -> &Arc<Timeline> {
        &self.data.timeline
    }

    pub fn set_size(&mut self, width: u32, height: u32) {
        self.data.width = width;
        self.data.height = height;
    }

    pub fn set_offset(&mut self, offset_x: i32, offset_y: i32) {
        self.data.offset_x = offset_x;
        self.data.offset_y = offset_y;
    }

    pub fn set_background_tile(&mut self, tile: Option<Tile>) {
        self.data.background_opaque = tile.as_ref().is_some_and(Tile::is_opaque);
        self.data.background_tile = tile;
    }

    pub fn set_layers(&mut self, layers: Arc<LayerList>) {
        self.data.layers = layers;
    }

    pub fn set_layer_props(&mut self, props: Arc<LayerPropsList>) {
        self.data.layer_props = props;
    }

    /// Both layer trees at once, for mutators that keep them congruent.
    pub fn layer_trees_mut(&mut self) -> (&mut Arc<LayerList>, &mut Arc<LayerPropsList>) {
        (&mut self.data.layers, &mut self.data.layer_props)
    }

    pub fn annotations_mut(&mut self) -> &mut AnnotationList {
        Arc::make_mut(&mut self.data.annotations)
    }

    pub fn set_annotations(&mut self, annotations: Arc<AnnotationList>) {
        self.data.annotations = annotations;
    }

    pub fn set_metadata(&mut self, metadata: DocumentMetadata) {
        self.data.metadata = Arc::new(metadata);
    }

    pub fn timeline_mut(&mut self) -> &mut Timeline {
        Arc::make_mut(&mut self.data.timeline)
    }

    pub fn find_route(&self, id: LayerId) -> Option<LayerRoute> {
        find_route(&self.data.layer_props, id)
    }

    pub fn persist(self) -> CanvasState {
        debug_assert_eq!(
            self.data.layers.len(),
            self.data.layer_props.len(),
            "layer list and props list out of step"
        );
        CanvasState(Arc::new(self.data))
    }
}
