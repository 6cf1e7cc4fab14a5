//! Per-client view of the canvas.
//!
//! [`LocalView`] holds the settings that only affect what this client sees
//! (view mode, hidden layers, inspect, local background, the active preview)
//! and derives the displayed state from the authoritative one.

use std::sync::Arc;

use document::{
    CanvasDiff, CanvasState, Compositor, LayerPropsList, OnionSkins, Timeline, ViewMode,
    ViewModeFilter,
};
use model::Tile;
use protocol::{ContextId, LayerId};

mod overlay;
mod preview;

pub use overlay::INSPECT_SUBLAYER_ID;
pub use preview::{CutPreview, DabsPreview, PREVIEW_SUBLAYER_ID, Preview, PreviewRender};

/// What changed in the local view since it was last taken.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ViewInvalidation {
    /// The displayed state must be derived again.
    pub rebuild: bool,
    /// Every tile must be re-rendered, whether or not its content changed.
    pub check_all: bool,
}

impl ViewInvalidation {
    pub fn is_empty(&self) -> bool {
        !self.rebuild && !self.check_all
    }
}

pub struct LocalView {
    active_layer_id: LayerId,
    active_frame_index: i32,
    view_mode: ViewMode,
    onion_skins: OnionSkins,
    hidden_layer_ids: Vec<LayerId>,
    reveal_censored: bool,
    inspect_context_id: ContextId,
    background_tile: Option<Tile>,
    preview: Option<Preview>,
    invalidation: ViewInvalidation,
    output: Option<(CanvasState, CanvasState)>,
    props: Option<(Arc<LayerPropsList>, Arc<LayerPropsList>)>,
    timeline: Option<Arc<Timeline>>,
}

impl LocalView {
    /// A view hiding whatever `initial` has marked hidden.
    pub fn new(initial: &CanvasState) -> Self {
        let mut hidden_layer_ids = Vec::new();
        overlay::collect_hidden(initial.layer_props(), &mut hidden_layer_ids);
        Self {
            active_layer_id: 0,
            active_frame_index: 0,
            view_mode: ViewMode::Normal,
            onion_skins: OnionSkins::default(),
            hidden_layer_ids,
            reveal_censored: false,
            inspect_context_id: 0,
            background_tile: None,
            preview: None,
            invalidation: ViewInvalidation::default(),
            output: None,
            props: None,
            timeline: None,
        }
    }

    pub fn active_layer_id(&self) -> LayerId {
        self.active_layer_id
    }

    pub fn active_frame_index(&self) -> i32 {
        self.active_frame_index
    }

    pub fn view_mode(&self) -> ViewMode {
        self.view_mode
    }

    pub fn onion_skins(&self) -> &OnionSkins {
        &self.onion_skins
    }

    pub fn hidden_layer_ids(&self) -> &[LayerId] {
        &self.hidden_layer_ids
    }

    pub fn reveal_censored(&self) -> bool {
        self.reveal_censored
    }

    pub fn inspect_context_id(&self) -> ContextId {
        self.inspect_context_id
    }

    pub fn background_tile(&self) -> Option<&Tile> {
        self.background_tile.as_ref()
    }

    pub fn has_preview(&self) -> bool {
        self.preview.is_some()
    }

    /// Layer filter for rendering `state` with the current settings.
    pub fn filter(&self, state: &CanvasState) -> ViewModeFilter {
        ViewModeFilter::make(
            state,
            self.view_mode,
            self.active_layer_id,
            self.active_frame_index,
        )
    }

    pub fn set_active_layer(&mut self, layer_id: LayerId) {
        if self.active_layer_id != layer_id {
            self.active_layer_id = layer_id;
            if self.view_mode == ViewMode::Layer {
                self.invalidation.check_all = true;
            }
        }
    }

    pub fn set_active_frame(&mut self, frame_index: i32) {
        if self.active_frame_index != frame_index {
            self.active_frame_index = frame_index;
            if self.view_mode == ViewMode::Frame {
                self.invalidation.check_all = true;
            }
        }
    }

    pub fn set_view_mode(&mut self, view_mode: ViewMode) {
        if self.view_mode != view_mode {
            self.view_mode = view_mode;
            self.invalidation.check_all = true;
        }
    }

    pub fn set_onion_skins(&mut self, onion_skins: OnionSkins) {
        if self.onion_skins != onion_skins {
            self.onion_skins = onion_skins;
            self.invalidation.check_all = true;
        }
    }

    pub fn set_layer_hidden(&mut self, layer_id: LayerId, hidden: bool) {
        let position = self.hidden_layer_ids.iter().position(|id| *id == layer_id);
        match (position, hidden) {
            (None, true) => self.hidden_layer_ids.push(layer_id),
            (Some(index), false) => {
                self.hidden_layer_ids.swap_remove(index);
            }
            _ => return,
        }
        self.props = None;
        self.invalidate();
    }

    pub fn set_reveal_censored(&mut self, reveal: bool) {
        if self.reveal_censored != reveal {
            self.reveal_censored = reveal;
            self.props = None;
            self.invalidate();
        }
    }

    /// Highlights the tiles last touched by `context_id`; zero turns the
    /// highlight off.
    pub fn set_inspect_context_id(&mut self, context_id: ContextId) {
        if self.inspect_context_id != context_id {
            self.inspect_context_id = context_id;
            self.invalidate();
        }
    }

    /// Replaces the document background for display only.
    pub fn set_background_tile(&mut self, tile: Option<Tile>) {
        if !Tile::opt_ptr_eq(self.background_tile.as_ref(), tile.as_ref()) {
            self.background_tile = tile;
            self.invalidate();
        }
    }

    /// Installs `preview`, disposing of the one it replaces.
    pub fn set_preview(&mut self, preview: Option<Preview>) {
        if preview.is_none() && self.preview.is_none() {
            return;
        }
        if let Some(old) = std::mem::replace(&mut self.preview, preview) {
            old.dispose();
        }
        self.invalidate();
    }

    pub fn take_invalidation(&mut self) -> ViewInvalidation {
        std::mem::take(&mut self.invalidation)
    }

    fn invalidate(&mut self) {
        self.output = None;
        self.invalidation.rebuild = true;
    }

    /// Derives the displayed state from `state`: the preview first, then the
    /// inspect highlight, local layer visibility and the local background.
    /// Applying the same state twice without a settings change in between
    /// returns the same derived state.
    pub fn apply(
        &mut self,
        state: &CanvasState,
        compositor: &dyn Compositor,
        diff: &mut CanvasDiff,
    ) -> CanvasState {
        if let Some((input, output)) = &self.output
            && CanvasState::ptr_eq(input, state)
        {
            return output.clone();
        }
        self.check_timeline(state, diff);

        let mut view = state.clone();
        if let Some(preview) = &mut self.preview {
            view = preview.render(&view, compositor);
        }
        if self.inspect_context_id != 0 {
            view = overlay::inspect(&view, self.inspect_context_id);
        }
        view = self.apply_local_props(&view);
        if let Some(background) = &self.background_tile
            && !Tile::opt_ptr_eq(view.background_tile(), Some(background))
        {
            let mut transient = view.to_transient();
            transient.set_background_tile(Some(background.clone()));
            view = transient.persist();
        }

        self.output = Some((state.clone(), view.clone()));
        view
    }

    /// In frame mode, the timeline decides which layers are visible at all,
    /// so any change to it affects every tile.
    fn check_timeline(&mut self, state: &CanvasState, diff: &mut CanvasDiff) {
        let timeline = state.timeline();
        let changed = self
            .timeline
            .as_ref()
            .is_some_and(|prev| !Arc::ptr_eq(prev, timeline));
        if changed && self.view_mode == ViewMode::Frame && state.metadata().use_timeline {
            diff.check_all();
        }
        self.timeline = Some(Arc::clone(timeline));
    }

    fn apply_local_props(&mut self, state: &CanvasState) -> CanvasState {
        let input = state.layer_props();
        let output = match &self.props {
            Some((memo_input, memo_output)) if Arc::ptr_eq(memo_input, input) => {
                Arc::clone(memo_output)
            }
            _ => {
                let output = if self.hidden_layer_ids.is_empty()
                    && !self.reveal_censored
                    && !overlay::any_hidden(input)
                {
                    Arc::clone(input)
                } else {
                    let mut found = Vec::new();
                    let output = overlay::local_props(
                        input,
                        &self.hidden_layer_ids,
                        self.reveal_censored,
                        &mut found,
                    );
                    self.hidden_layer_ids.retain(|id| found.contains(id));
                    output
                };
                self.props = Some((Arc::clone(input), Arc::clone(&output)));
                output
            }
        };
        if Arc::ptr_eq(&output, input) {
            return state.clone();
        }
        let mut transient = state.to_transient();
        transient.set_layer_props(output);
        transient.persist()
    }
}

impl Drop for LocalView {
    fn drop(&mut self) {
        if let Some(preview) = self.preview.take() {
            preview.dispose();
        }
    }
}
