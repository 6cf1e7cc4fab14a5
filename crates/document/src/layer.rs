use std::sync::Arc;

use model::{BIT15, BlendMode, Tile, TileCounts};
use protocol::LayerId;

/// Pixel content of one layer: a tile grid plus the sublayers that are
/// composited onto it (indirect strokes, previews, inspect highlights).
#[derive(Debug, Clone)]
pub struct LayerContent {
    width: u32,
    height: u32,
    tiles: Vec<Option<Tile>>,
    sublayers: Vec<Sublayer>,
}

#[derive(Debug, Clone)]
pub struct Sublayer {
    pub props: Arc<LayerProps>,
    pub content: Arc<LayerContent>,
}

#[derive(Debug, Clone)]
pub struct LayerGroup {
    width: u32,
    height: u32,
    children: Arc<LayerList>,
}

#[derive(Debug, Clone)]
pub enum LayerListEntry {
    Content(Arc<LayerContent>),
    Group(Arc<LayerGroup>),
}

/// Layers ordered bottom to top.
#[derive(Debug, Clone, Default)]
pub struct LayerList {
    entries: Vec<LayerListEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayerProps {
    id: LayerId,
    title: String,
    opacity: u16,
    blend_mode: BlendMode,
    hidden: bool,
    censored: bool,
    isolated: bool,
    children: Option<Arc<LayerPropsList>>,
}

/// Parallel structure to [`LayerList`]: entry `i` describes layer `i`, and
/// groups carry a children list congruent to the group's layer list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayerPropsList {
    entries: Vec<Arc<LayerProps>>,
}

impl LayerContent {
    pub fn new(width: u32, height: u32) -> Self {
        Self::new_filled(width, height, None)
    }

    pub fn new_filled(width: u32, height: u32, tile: Option<Tile>) -> Self {
        let total = TileCounts::for_size(width, height).total();
        Self {
            width,
            height,
            tiles: vec![tile; total],
            sublayers: Vec::new(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn tile_counts(&self) -> TileCounts {
        TileCounts::for_size(self.width, self.height)
    }

    pub fn tile_at(&self, index: usize) -> Option<&Tile> {
        self.tiles.get(index).and_then(Option::as_ref)
    }

    pub fn tiles(&self) -> &[Option<Tile>] {
        &self.tiles
    }

    pub fn set_tile(&mut self, index: usize, tile: Option<Tile>) {
        self.tiles[index] = tile;
    }

    pub fn sublayers(&self) -> &[Sublayer] {
        &self.sublayers
    }

    pub fn sublayer(&self, id: LayerId) -> Option<&Sublayer> {
        self.sublayers.iter().find(|sublayer| sublayer.props.id == id)
    }

    /// Returns the sublayer with `id`, appending a fresh one built from
    /// `make_props` if there is none yet.
    pub fn sublayer_mut_or_insert(
        &mut self,
        id: LayerId,
        make_props: impl FnOnce() -> LayerProps,
    ) -> &mut Sublayer {
        let index = match self.sublayers.iter().position(|s| s.props.id == id) {
            Some(index) => index,
            None => {
                let props = make_props();
                debug_assert_eq!(props.id, id);
                self.sublayers.push(Sublayer {
                    props: Arc::new(props),
                    content: Arc::new(LayerContent::new(self.width, self.height)),
                });
                self.sublayers.len() - 1
            }
        };
        &mut self.sublayers[index]
    }

    pub fn insert_sublayer(&mut self, sublayer: Sublayer) {
        self.sublayers.retain(|s| s.props.id != sublayer.props.id);
        self.sublayers.push(sublayer);
    }

    pub fn remove_sublayer(&mut self, id: LayerId) -> Option<Sublayer> {
        let index = self.sublayers.iter().position(|s| s.props.id == id)?;
        Some(self.sublayers.remove(index))
    }

    /// Content of a canvas grown or shrunk to `width` x `height`, with the old
    /// pixel (x, y) landing on (x + `shift_x`, y + `shift_y`). Shifts by whole
    /// tiles reuse the existing tiles.
    pub fn resized(&self, shift_x: i32, shift_y: i32, width: u32, height: u32) -> Self {
        let counts = TileCounts::for_size(width, height);
        let size = model::TILE_SIZE as i32;
        let tile_aligned = shift_x % size == 0 && shift_y % size == 0;
        let tiles = if tile_aligned {
            let old_counts = self.tile_counts();
            counts
                .positions()
                .map(|pos| {
                    let old_x = pos.x as i32 - shift_x / size;
                    let old_y = pos.y as i32 - shift_y / size;
                    if old_x < 0 || old_y < 0 || old_x >= old_counts.x as i32 || old_y >= old_counts.y as i32 {
                        None
                    } else {
                        self.tiles[old_y as usize * old_counts.x as usize + old_x as usize].clone()
                    }
                })
                .collect()
        } else {
            self.shifted_tiles(shift_x, shift_y, counts)
        };
        Self {
            width,
            height,
            tiles,
            sublayers: self
                .sublayers
                .iter()
                .map(|sublayer| Sublayer {
                    props: Arc::clone(&sublayer.props),
                    content: Arc::new(sublayer.content.resized(shift_x, shift_y, width, height)),
                })
                .collect(),
        }
    }

    fn shifted_tiles(&self, shift_x: i32, shift_y: i32, counts: TileCounts) -> Vec<Option<Tile>> {
        let size = model::TILE_SIZE as i64;
        let old_counts = self.tile_counts();
        counts
            .positions()
            .map(|pos| {
                let mut tile = model::TransientTile::new_blank(0);
                let mut context_id = 0;
                for ty in 0..size {
                    for tx in 0..size {
                        let old_x = pos.x as i64 * size + tx - shift_x as i64;
                        let old_y = pos.y as i64 * size + ty - shift_y as i64;
                        if old_x < 0 || old_y < 0 || old_x >= self.width as i64 || old_y >= self.height as i64 {
                            continue;
                        }
                        let old_index = (old_y / size) as usize * old_counts.x as usize + (old_x / size) as usize;
                        if let Some(old_tile) = &self.tiles[old_index] {
                            let pixel = old_tile.pixels()[((old_y % size) * size + old_x % size) as usize];
                            tile.pixels_mut()[(ty * size + tx) as usize] = pixel;
                            context_id = old_tile.context_id();
                        }
                    }
                }
                tile.set_context_id(context_id);
                if tile.is_blank() { None } else { Some(tile.persist()) }
            })
            .collect()
    }
}

impl LayerGroup {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            children: Arc::new(LayerList::default()),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn children(&self) -> &Arc<LayerList> {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut Arc<LayerList> {
        &mut self.children
    }

    pub fn resized(&self, shift_x: i32, shift_y: i32, width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            children: Arc::new(self.children.resized(shift_x, shift_y, width, height)),
        }
    }
}

impl LayerListEntry {
    pub fn is_group(&self) -> bool {
        matches!(self, LayerListEntry::Group(_))
    }

    pub fn ptr_eq(a: &LayerListEntry, b: &LayerListEntry) -> bool {
        match (a, b) {
            (LayerListEntry::Content(a), LayerListEntry::Content(b)) => Arc::ptr_eq(a, b),
            (LayerListEntry::Group(a), LayerListEntry::Group(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    fn resized(&self, shift_x: i32, shift_y: i32, width: u32, height: u32) -> Self {
        match self {
            LayerListEntry::Content(content) => {
                LayerListEntry::Content(Arc::new(content.resized(shift_x, shift_y, width, height)))
            }
            LayerListEntry::Group(group) => {
                LayerListEntry::Group(Arc::new(group.resized(shift_x, shift_y, width, height)))
            }
        }
    }
}

impl LayerList {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&LayerListEntry> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LayerListEntry> {
        self.entries.iter()
    }

    pub fn entries_mut(&mut self) -> &mut Vec<LayerListEntry> {
        &mut self.entries
    }

    pub fn resized(&self, shift_x: i32, shift_y: i32, width: u32, height: u32) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .map(|entry| entry.resized(shift_x, shift_y, width, height))
                .collect(),
        }
    }
}

impl LayerProps {
    pub fn new(id: LayerId, title: impl Into<String>, group: bool) -> Self {
        Self {
            id,
            title: title.into(),
            opacity: BIT15,
            blend_mode: BlendMode::Normal,
            hidden: false,
            censored: false,
            isolated: true,
            children: group.then(|| Arc::new(LayerPropsList::default())),
        }
    }

    pub fn id(&self) -> LayerId {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn opacity(&self) -> u16 {
        self.opacity
    }

    pub fn blend_mode(&self) -> BlendMode {
        self.blend_mode
    }

    pub fn hidden(&self) -> bool {
        self.hidden
    }

    pub fn censored(&self) -> bool {
        self.censored
    }

    pub fn isolated(&self) -> bool {
        self.isolated
    }

    pub fn children(&self) -> Option<&Arc<LayerPropsList>> {
        self.children.as_ref()
    }

    pub fn is_group(&self) -> bool {
        self.children.is_some()
    }

    pub fn visible(&self) -> bool {
        !self.hidden && self.opacity > 0
    }

    /// Whether two props would composite identically, ignoring title and
    /// children.
    pub fn render_eq(&self, other: &LayerProps) -> bool {
        self.id == other.id
            && self.opacity == other.opacity
            && self.blend_mode == other.blend_mode
            && self.hidden == other.hidden
            && self.censored == other.censored
            && self.isolated == other.isolated
            && self.is_group() == other.is_group()
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    pub fn set_opacity(&mut self, opacity: u16) {
        self.opacity = opacity.min(BIT15);
    }

    pub fn set_blend_mode(&mut self, blend_mode: BlendMode) {
        self.blend_mode = blend_mode;
    }

    pub fn set_hidden(&mut self, hidden: bool) {
        self.hidden = hidden;
    }

    pub fn set_censored(&mut self, censored: bool) {
        self.censored = censored;
    }

    pub fn set_isolated(&mut self, isolated: bool) {
        self.isolated = isolated;
    }

    pub fn children_mut(&mut self) -> Option<&mut Arc<LayerPropsList>> {
        self.children.as_mut()
    }

    /// Whether `id` names this layer or one of its descendants.
    pub fn contains(&self, id: LayerId) -> bool {
        self.id == id
            || self
                .children
                .as_ref()
                .is_some_and(|children| children.iter().any(|child| child.contains(id)))
    }
}

impl LayerPropsList {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<LayerProps>> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<LayerProps>> {
        self.entries.iter()
    }

    pub fn entries_mut(&mut self) -> &mut Vec<Arc<LayerProps>> {
        &mut self.entries
    }

    /// Whether some visible layer could punch through to the canvas
    /// background. Pass-through groups are looked into, isolated groups
    /// contain their children's effect.
    pub fn can_decrease_opacity(&self) -> bool {
        self.entries.iter().any(|props| {
            props.visible()
                && (props.blend_mode.can_decrease_opacity()
                    || (!props.isolated
                        && props
                            .children
                            .as_ref()
                            .is_some_and(|children| children.can_decrease_opacity())))
        })
    }
}
