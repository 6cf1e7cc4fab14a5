use std::sync::Arc;

use bitvec::prelude::{BitVec, Lsb0};
use model::{Tile, TileCounts, TilePos, TileRect};
use protocol::LayerId;

use crate::layer::{LayerContent, LayerList, LayerListEntry, LayerProps, LayerPropsList};
use crate::state::CanvasState;

/// Tile positions whose flattened output may have changed, accumulated over
/// any number of state transitions until drained.
///
/// Tiles and layers are compared by pointer: a persisted tile never
/// changes, so a shared pointer proves identical pixels and the walk only
/// visits substructure that was actually replaced.
#[derive(Debug, Clone, Default)]
pub struct CanvasDiff {
    counts: TileCounts,
    dirty: BitVec<usize, Lsb0>,
    dirty_count: usize,
    check_all: bool,
    layer_props_changed: bool,
}

impl CanvasDiff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tile_counts(&self) -> TileCounts {
        self.counts
    }

    /// Folds the changes from `prev` to `next` into the pending set.
    pub fn diff(&mut self, prev: &CanvasState, next: &CanvasState) {
        if CanvasState::ptr_eq(prev, next) {
            return;
        }
        let counts = next.tile_counts();
        if counts != self.counts {
            self.counts = counts;
            self.dirty = BitVec::repeat(false, counts.total());
            self.dirty_count = 0;
            self.check_all = true;
        }
        if prev.width() != next.width()
            || prev.height() != next.height()
            || prev.offset_x() != next.offset_x()
            || prev.offset_y() != next.offset_y()
            || !Tile::opt_ptr_eq(prev.background_tile(), next.background_tile())
        {
            self.check_all = true;
        }
        if !Arc::ptr_eq(prev.layer_props(), next.layer_props()) {
            self.layer_props_changed = true;
        }
        if !self.check_all {
            self.diff_lists(
                prev.layers(),
                prev.layer_props(),
                next.layers(),
                next.layer_props(),
            );
        }
    }

    fn diff_lists(
        &mut self,
        prev_layers: &Arc<LayerList>,
        prev_props: &Arc<LayerPropsList>,
        next_layers: &Arc<LayerList>,
        next_props: &Arc<LayerPropsList>,
    ) {
        if Arc::ptr_eq(prev_layers, next_layers) && Arc::ptr_eq(prev_props, next_props) {
            return;
        }
        let len = prev_layers.len().max(next_layers.len());
        for index in 0..len {
            let prev = prev_layers.get(index).zip(prev_props.get(index));
            let next = next_layers.get(index).zip(next_props.get(index));
            match (prev, next) {
                (Some((prev_entry, prev_lp)), Some((next_entry, next_lp))) => {
                    self.diff_entries(prev_entry, prev_lp, next_entry, next_lp);
                }
                (Some((entry, _)), None) | (None, Some((entry, _))) => self.mark_entry(entry),
                (None, None) => {}
            }
        }
    }

    fn diff_entries(
        &mut self,
        prev_entry: &LayerListEntry,
        prev_lp: &Arc<LayerProps>,
        next_entry: &LayerListEntry,
        next_lp: &Arc<LayerProps>,
    ) {
        if !Arc::ptr_eq(prev_lp, next_lp) && !prev_lp.render_eq(next_lp) {
            self.mark_entry(prev_entry);
            self.mark_entry(next_entry);
            return;
        }
        match (prev_entry, next_entry) {
            (LayerListEntry::Content(prev), LayerListEntry::Content(next)) => {
                if !Arc::ptr_eq(prev, next) {
                    self.diff_contents(prev, next);
                }
            }
            (LayerListEntry::Group(prev), LayerListEntry::Group(next)) => {
                if !Arc::ptr_eq(prev, next) {
                    let empty = Arc::new(LayerPropsList::default());
                    self.diff_lists(
                        prev.children(),
                        prev_lp.children().unwrap_or(&empty),
                        next.children(),
                        next_lp.children().unwrap_or(&empty),
                    );
                }
            }
            _ => {
                self.mark_entry(prev_entry);
                self.mark_entry(next_entry);
            }
        }
    }

    fn diff_contents(&mut self, prev: &LayerContent, next: &LayerContent) {
        for (index, (a, b)) in prev.tiles().iter().zip(next.tiles()).enumerate() {
            if !Tile::opt_ptr_eq(a.as_ref(), b.as_ref()) {
                self.mark_index(index);
            }
        }
        let (prev_subs, next_subs) = (prev.sublayers(), next.sublayers());
        let len = prev_subs.len().max(next_subs.len());
        for index in 0..len {
            match (prev_subs.get(index), next_subs.get(index)) {
                (Some(a), Some(b))
                    if Arc::ptr_eq(&a.props, &b.props) || a.props.render_eq(&b.props) =>
                {
                    if !Arc::ptr_eq(&a.content, &b.content) {
                        self.diff_contents(&a.content, &b.content);
                    }
                }
                (a, b) => {
                    for sublayer in a.into_iter().chain(b) {
                        self.mark_content(&sublayer.content);
                    }
                }
            }
        }
    }

    /// Marks every tile position `entry` has any pixels at.
    pub fn mark_entry(&mut self, entry: &LayerListEntry) {
        match entry {
            LayerListEntry::Content(content) => self.mark_content(content),
            LayerListEntry::Group(group) => {
                for child in group.children().iter() {
                    self.mark_entry(child);
                }
            }
        }
    }

    fn mark_content(&mut self, content: &LayerContent) {
        for (index, tile) in content.tiles().iter().enumerate() {
            if tile.is_some() {
                self.mark_index(index);
            }
        }
        for sublayer in content.sublayers() {
            self.mark_content(&sublayer.content);
        }
    }

    /// Marks the tiles covered by layer `id` of `state`. Unknown ids mark
    /// nothing.
    pub fn mark_layer(&mut self, state: &CanvasState, id: LayerId) {
        if state.tile_counts() != self.counts {
            self.check_all = true;
            return;
        }
        if let Some(route) = state.search_layer(id) {
            self.mark_entry(route.entry(state.layers()));
        }
    }

    fn mark_index(&mut self, index: usize) {
        if !self.dirty.replace(index, true) {
            self.dirty_count += 1;
        }
    }

    pub fn mark(&mut self, pos: TilePos) {
        if let Ok(index) = self.counts.tile_index(pos) {
            self.mark_index(index);
        }
    }

    /// Forces every position to be reported on the next drain.
    pub fn check_all(&mut self) {
        self.check_all = true;
    }

    pub fn is_check_all(&self) -> bool {
        self.check_all
    }

    pub fn is_empty(&self) -> bool {
        !self.check_all && self.dirty_count == 0
    }

    pub fn is_dirty(&self, pos: TilePos) -> bool {
        self.counts
            .tile_index(pos)
            .is_ok_and(|index| self.check_all || self.dirty[index])
    }

    pub fn each_pos(&self, mut f: impl FnMut(TilePos)) {
        if self.check_all {
            self.counts.positions().for_each(f);
        } else {
            for index in self.dirty.iter_ones() {
                if let Ok(pos) = self.counts.tile_pos(index) {
                    f(pos);
                }
            }
        }
    }

    /// Like [`CanvasDiff::each_pos`], clearing the pending set afterwards.
    pub fn each_pos_reset(&mut self, f: impl FnMut(TilePos)) {
        self.each_pos(f);
        self.dirty.fill(false);
        self.dirty_count = 0;
        self.check_all = false;
    }

    /// Drains only the positions inside `bounds`; the rest stays pending.
    pub fn each_pos_tile_bounds_reset(&mut self, bounds: TileRect, mut f: impl FnMut(TilePos)) {
        if self.check_all {
            self.dirty.fill(true);
            self.dirty_count = self.dirty.len();
            self.check_all = false;
        }
        for pos in bounds.positions() {
            let Ok(index) = self.counts.tile_index(pos) else {
                continue;
            };
            if self.dirty.replace(index, false) {
                self.dirty_count -= 1;
                f(pos);
            }
        }
    }

    pub fn layer_props_changed_reset(&mut self) -> bool {
        std::mem::replace(&mut self.layer_props_changed, false)
    }
}
