use std::collections::BTreeMap;
use std::sync::Arc;

use model::{
    BIT15, BlendMode, Color, Compositor, Pixel15, TILE_SIZE, TileCounts, TilePos, TileRect,
    TransientTile, channel8_to_15,
};
use protocol::{ContextId, Dab, DabShape, DrawDabs, FillRect, LayerId};

use crate::error::ApplyError;
use crate::layer::{LayerContent, LayerListEntry, LayerProps};
use crate::state::TransientCanvasState;

/// Tiles being edited by one operation, written back once it is done.
struct TileEdits<'a> {
    content: &'a mut LayerContent,
    context_id: ContextId,
    tiles: BTreeMap<usize, TransientTile>,
}

impl<'a> TileEdits<'a> {
    fn new(content: &'a mut LayerContent, context_id: ContextId) -> Self {
        Self {
            content,
            context_id,
            tiles: BTreeMap::new(),
        }
    }

    fn tile(&mut self, index: usize) -> &mut TransientTile {
        let content = &*self.content;
        let context_id = self.context_id;
        self.tiles
            .entry(index)
            .or_insert_with(|| TransientTile::from_nullable(content.tile_at(index), context_id))
    }

    fn finish(self) {
        for (index, tile) in self.tiles {
            let tile = if tile.is_blank() { None } else { Some(tile.persist()) };
            self.content.set_tile(index, tile);
        }
    }
}

/// Pixel rectangle `[x0, x1) x [y0, y1)` clipped to the canvas.
fn clip(x0: i64, y0: i64, x1: i64, y1: i64, width: u32, height: u32) -> Option<(i64, i64, i64, i64)> {
    let x0 = x0.max(0);
    let y0 = y0.max(0);
    let x1 = x1.min(width as i64);
    let y1 = y1.min(height as i64);
    (x0 < x1 && y0 < y1).then_some((x0, y0, x1, y1))
}

/// Calls `f(tile_index, tile_pos, left, top, right, bottom)` for each tile the
/// clipped pixel rect touches, with tile-local half-open bounds.
fn for_each_tile_span(
    rect: (i64, i64, i64, i64),
    counts: TileCounts,
    mut f: impl FnMut(usize, TilePos, u32, u32, u32, u32),
) {
    let (x0, y0, x1, y1) = rect;
    let Some(tiles) = TileRect::covering_pixels(x0, y0, x1, y1, counts) else {
        return;
    };
    let size = TILE_SIZE as i64;
    for pos in tiles.positions() {
        let Ok(index) = counts.tile_index(pos) else {
            continue;
        };
        let tile_x = pos.x as i64 * size;
        let tile_y = pos.y as i64 * size;
        let left = (x0 - tile_x).max(0) as u32;
        let top = (y0 - tile_y).max(0) as u32;
        let right = (x1 - tile_x).min(size) as u32;
        let bottom = (y1 - tile_y).min(size) as u32;
        f(index, pos, left, top, right, bottom);
    }
}

fn content_target<'a>(
    transient: &'a mut TransientCanvasState,
    layer_id: LayerId,
) -> Result<&'a mut LayerContent, ApplyError> {
    let route = transient
        .find_route(layer_id)
        .ok_or(ApplyError::LayerNotFound(layer_id))?;
    if route.is_group() {
        return Err(ApplyError::LayerIsGroup(layer_id));
    }
    let (layers, _) = transient.layer_trees_mut();
    Ok(route.content_mut(layers))
}

pub fn fill_rect(
    transient: &mut TransientCanvasState,
    compositor: &dyn Compositor,
    context_id: ContextId,
    fill: &FillRect,
) -> Result<(), ApplyError> {
    let (width, height) = (transient.width(), transient.height());
    let content = content_target(transient, fill.layer_id)?;
    let Some(rect) = clip(
        fill.x as i64,
        fill.y as i64,
        fill.x as i64 + fill.width as i64,
        fill.y as i64 + fill.height as i64,
        width,
        height,
    ) else {
        return Ok(());
    };
    let color = Pixel15::from_color(fill.color);
    let counts = content.tile_counts();
    let mut edits = TileEdits::new(content, context_id);
    for_each_tile_span(rect, counts, |index, _, left, top, right, bottom| {
        let (w, h) = (right - left, bottom - top);
        let mask = vec![BIT15; (w * h) as usize];
        edits
            .tile(index)
            .brush_apply(compositor, color, fill.blend_mode, &mask, BIT15, left, top, w, h);
    });
    edits.finish();
    Ok(())
}

pub fn draw_dabs(
    transient: &mut TransientCanvasState,
    compositor: &dyn Compositor,
    context_id: ContextId,
    dabs: &DrawDabs,
) -> Result<(), ApplyError> {
    draw_dabs_in_sublayer(transient, compositor, context_id, dabs, context_id as LayerId)
}

/// Draws `dabs`, sending indirect strokes to sublayer `sublayer_id` of the
/// target layer instead of the drawing context's own sublayer.
pub fn draw_dabs_in_sublayer(
    transient: &mut TransientCanvasState,
    compositor: &dyn Compositor,
    context_id: ContextId,
    dabs: &DrawDabs,
    sublayer_id: LayerId,
) -> Result<(), ApplyError> {
    let (width, height) = (transient.width(), transient.height());
    let content = content_target(transient, dabs.layer_id)?;
    let color = Pixel15::from_color(dabs.color.with_alpha(u8::MAX));
    if dabs.indirect {
        let sublayer = content.sublayer_mut_or_insert(sublayer_id, || {
            let mut props = LayerProps::new(sublayer_id, "", false);
            props.set_opacity(channel8_to_15(dabs.color.alpha()));
            props.set_blend_mode(dabs.blend_mode);
            props
        });
        let target = Arc::make_mut(&mut sublayer.content);
        paint_dabs(target, compositor, context_id, dabs, color, BlendMode::Normal, width, height);
    } else {
        paint_dabs(content, compositor, context_id, dabs, color, dabs.blend_mode, width, height);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn paint_dabs(
    content: &mut LayerContent,
    compositor: &dyn Compositor,
    context_id: ContextId,
    dabs: &DrawDabs,
    color: Pixel15,
    mode: BlendMode,
    width: u32,
    height: u32,
) {
    let counts = content.tile_counts();
    let mut edits = TileEdits::new(content, context_id);
    for (cx, cy, dab) in dabs.positions() {
        let r = dab.radius as i64;
        let (x0, y0, x1, y1) = if r == 0 {
            (cx as i64, cy as i64, cx as i64 + 1, cy as i64 + 1)
        } else {
            (cx as i64 - r, cy as i64 - r, cx as i64 + r, cy as i64 + r)
        };
        let Some(rect) = clip(x0, y0, x1, y1, width, height) else {
            continue;
        };
        let opacity = channel8_to_15(dab.opacity);
        for_each_tile_span(rect, counts, |index, pos, left, top, right, bottom| {
            let origin_x = pos.x as i64 * TILE_SIZE as i64;
            let origin_y = pos.y as i64 * TILE_SIZE as i64;
            let (w, h) = (right - left, bottom - top);
            let mut mask = Vec::with_capacity((w * h) as usize);
            for y in top..bottom {
                for x in left..right {
                    let covered = covers(
                        dabs.shape,
                        dab,
                        cx as i64,
                        cy as i64,
                        origin_x + x as i64,
                        origin_y + y as i64,
                    );
                    mask.push(if covered { BIT15 } else { 0 });
                }
            }
            edits
                .tile(index)
                .brush_apply(compositor, color, mode, &mask, opacity, left, top, w, h);
        });
    }
    edits.finish();
}

/// Whether pixel (`gx`, `gy`) lies inside the dab centered on (`cx`, `cy`).
/// Square dabs fill their whole bounding box; round dabs test the pixel
/// center against the radius.
fn covers(shape: DabShape, dab: Dab, cx: i64, cy: i64, gx: i64, gy: i64) -> bool {
    match shape {
        DabShape::Square => true,
        DabShape::Round if dab.radius == 0 => true,
        DabShape::Round => {
            let r = dab.radius as i64;
            let dx = 2 * gx + 1 - 2 * cx;
            let dy = 2 * gy + 1 - 2 * cy;
            dx * dx + dy * dy <= 4 * r * r
        }
    }
}

/// Merges the indirect stroke sublayers of `context_id` into their layers.
pub fn pen_up(
    transient: &mut TransientCanvasState,
    compositor: &dyn Compositor,
    context_id: ContextId,
) {
    let sublayer_id = context_id as LayerId;
    let (layers, _) = transient.layer_trees_mut();
    if !list_has_sublayer(layers, sublayer_id) {
        return;
    }
    merge_sublayers(Arc::make_mut(layers), compositor, sublayer_id);
}

fn list_has_sublayer(list: &crate::layer::LayerList, sublayer_id: LayerId) -> bool {
    list.iter().any(|entry| match entry {
        LayerListEntry::Content(content) => content.sublayer(sublayer_id).is_some(),
        LayerListEntry::Group(group) => list_has_sublayer(group.children(), sublayer_id),
    })
}

fn merge_sublayers(list: &mut crate::layer::LayerList, compositor: &dyn Compositor, sublayer_id: LayerId) {
    for entry in list.entries_mut() {
        match entry {
            LayerListEntry::Content(content) => {
                if content.sublayer(sublayer_id).is_none() {
                    continue;
                }
                let content = Arc::make_mut(content);
                let Some(sublayer) = content.remove_sublayer(sublayer_id) else {
                    continue;
                };
                let mut edits = TileEdits::new(content, sublayer_id as ContextId);
                for (index, tile) in sublayer.content.tiles().iter().enumerate() {
                    if let Some(tile) = tile {
                        edits.tile(index).merge(
                            compositor,
                            tile.pixels(),
                            sublayer.props.opacity(),
                            sublayer.props.blend_mode(),
                        );
                    }
                }
                edits.finish();
            }
            LayerListEntry::Group(group) => {
                if list_has_sublayer(group.children(), sublayer_id) {
                    let group = Arc::make_mut(group);
                    merge_sublayers(Arc::make_mut(group.children_mut()), compositor, sublayer_id);
                }
            }
        }
    }
}

/// Fill used for new layers: a single shared tile repeated across the
/// grid, or nothing for a transparent fill.
pub(crate) fn fill_tile(color: Color) -> Option<model::Tile> {
    (color.alpha() > 0).then(|| model::Tile::new_filled(Pixel15::from_color(color), 0))
}
