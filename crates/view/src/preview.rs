use std::sync::Arc;

use document::{
    CanvasState, Compositor, LayerContent, LayerProps, Sublayer, draw_dabs_in_sublayer,
};
use model::{BIT15, BlendMode, Pixel15, TILE_SIZE, TileRect, TransientTile, channel8_to_15};
use protocol::{LayerId, Message};

/// Sublayer id previews draw into.
pub const PREVIEW_SUBLAYER_ID: LayerId = -100;

/// A display-only edit rendered on top of the authoritative state.
pub trait PreviewRender: Send {
    /// Derives the previewed state from `base`. The preview was created
    /// against a canvas offset by (`offset_x`, `offset_y`) from the
    /// current one.
    fn render(
        &mut self,
        base: &CanvasState,
        compositor: &dyn Compositor,
        offset_x: i32,
        offset_y: i32,
    ) -> CanvasState;

    /// Releases the preview's resources. Called exactly once, when the
    /// preview is replaced or cleared.
    fn dispose(self: Box<Self>) {}
}

/// A preview together with the canvas offset it was created at.
pub struct Preview {
    renderer: Box<dyn PreviewRender>,
    initial_offset_x: i32,
    initial_offset_y: i32,
}

impl Preview {
    pub fn new(renderer: Box<dyn PreviewRender>, initial_offset_x: i32, initial_offset_y: i32) -> Self {
        Self {
            renderer,
            initial_offset_x,
            initial_offset_y,
        }
    }

    pub fn render(&mut self, base: &CanvasState, compositor: &dyn Compositor) -> CanvasState {
        let offset_x = self.initial_offset_x - base.offset_x();
        let offset_y = self.initial_offset_y - base.offset_y();
        self.renderer.render(base, compositor, offset_x, offset_y)
    }

    pub fn dispose(self) {
        self.renderer.dispose();
    }
}

impl std::fmt::Debug for Preview {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Preview")
            .field("initial_offset_x", &self.initial_offset_x)
            .field("initial_offset_y", &self.initial_offset_y)
            .finish_non_exhaustive()
    }
}

fn insert_sublayer(base: &CanvasState, layer_id: LayerId, sublayer: Sublayer) -> CanvasState {
    let Some(route) = base.search_layer(layer_id).cloned() else {
        return base.clone();
    };
    if route.is_group() {
        return base.clone();
    }
    let mut transient = base.to_transient();
    let (layers, _) = transient.layer_trees_mut();
    route.content_mut(layers).insert_sublayer(sublayer);
    transient.persist()
}

/// Erases a rectangle (optionally through an 8-bit mask) out of a layer,
/// showing what a cut or move leaves behind.
pub struct CutPreview {
    layer_id: LayerId,
    x: i32,
    y: i32,
    width: u32,
    height: u32,
    mask: Option<Vec<u8>>,
    cached: Option<CutContent>,
}

struct CutContent {
    canvas_width: u32,
    canvas_height: u32,
    offset_x: i32,
    offset_y: i32,
    content: Arc<LayerContent>,
}

impl CutPreview {
    /// `mask`, when given, holds `width * height` coverage values. A mask
    /// of any other length is ignored and the whole rectangle is erased.
    pub fn new(layer_id: LayerId, x: i32, y: i32, width: u32, height: u32, mask: Option<Vec<u8>>) -> Self {
        let expected = (width as usize).checked_mul(height as usize);
        let mask = match mask {
            Some(mask) if Some(mask.len()) != expected => {
                log::warn!(
                    "cut mask holds {} values for a {width}x{height} rectangle, ignoring it",
                    mask.len()
                );
                None
            }
            mask => mask,
        };
        Self {
            layer_id,
            x,
            y,
            width,
            height,
            mask,
            cached: None,
        }
    }

    fn content(&mut self, canvas_width: u32, canvas_height: u32, offset_x: i32, offset_y: i32) -> Arc<LayerContent> {
        if let Some(cached) = &self.cached
            && cached.canvas_width == canvas_width
            && cached.canvas_height == canvas_height
            && cached.offset_x == offset_x
            && cached.offset_y == offset_y
        {
            return Arc::clone(&cached.content);
        }
        let content = Arc::new(self.build_content(canvas_width, canvas_height, offset_x, offset_y));
        self.cached = Some(CutContent {
            canvas_width,
            canvas_height,
            offset_x,
            offset_y,
            content: Arc::clone(&content),
        });
        content
    }

    fn build_content(&self, canvas_width: u32, canvas_height: u32, offset_x: i32, offset_y: i32) -> LayerContent {
        let mut content = LayerContent::new(canvas_width, canvas_height);
        let counts = content.tile_counts();
        let left = self.x as i64 + offset_x as i64;
        let top = self.y as i64 + offset_y as i64;
        let right = left + self.width as i64;
        let bottom = top + self.height as i64;
        let Some(tiles) = TileRect::covering_pixels(left, top, right, bottom, counts) else {
            return content;
        };
        let size = TILE_SIZE as i64;
        for pos in tiles.positions() {
            let Ok(index) = counts.tile_index(pos) else {
                continue;
            };
            let mut tile = TransientTile::new_blank(0);
            for (i, pixel) in tile.pixels_mut().iter_mut().enumerate() {
                let px = pos.x as i64 * size + i as i64 % size;
                let py = pos.y as i64 * size + i as i64 / size;
                if px < left || px >= right || py < top || py >= bottom {
                    continue;
                }
                let alpha = match &self.mask {
                    Some(mask) => {
                        let mi = (py - top) * self.width as i64 + (px - left);
                        channel8_to_15(mask[mi as usize])
                    }
                    None => BIT15,
                };
                *pixel = Pixel15 {
                    b: 0,
                    g: 0,
                    r: 0,
                    a: alpha,
                };
            }
            if !tile.is_blank() {
                content.set_tile(index, Some(tile.persist()));
            }
        }
        content
    }
}

impl PreviewRender for CutPreview {
    fn render(
        &mut self,
        base: &CanvasState,
        _compositor: &dyn Compositor,
        offset_x: i32,
        offset_y: i32,
    ) -> CanvasState {
        if base.search_layer(self.layer_id).is_none_or(|route| route.is_group()) {
            return base.clone();
        }
        let content = self.content(base.width(), base.height(), offset_x, offset_y);
        let mut props = LayerProps::new(PREVIEW_SUBLAYER_ID, "", false);
        props.set_blend_mode(BlendMode::Erase);
        insert_sublayer(
            base,
            self.layer_id,
            Sublayer {
                props: Arc::new(props),
                content,
            },
        )
    }
}

/// Strokes drawn locally but not yet part of the history.
pub struct DabsPreview {
    layer_id: LayerId,
    messages: Vec<Message>,
}

impl DabsPreview {
    pub fn new(layer_id: LayerId, messages: Vec<Message>) -> Self {
        Self { layer_id, messages }
    }
}

impl PreviewRender for DabsPreview {
    fn render(
        &mut self,
        base: &CanvasState,
        compositor: &dyn Compositor,
        offset_x: i32,
        offset_y: i32,
    ) -> CanvasState {
        if base.search_layer(self.layer_id).is_none_or(|route| route.is_group()) {
            return base.clone();
        }
        let mut transient = base.to_transient();
        for message in &self.messages {
            let Some(dabs) = message.draw_dabs() else {
                continue;
            };
            let mut dabs = dabs.clone();
            dabs.layer_id = self.layer_id;
            dabs.x += offset_x;
            dabs.y += offset_y;
            if let Err(err) = draw_dabs_in_sublayer(
                &mut transient,
                compositor,
                message.context_id(),
                &dabs,
                PREVIEW_SUBLAYER_ID,
            ) {
                log::warn!("dab preview: {err}");
            }
        }
        transient.persist()
    }
}
