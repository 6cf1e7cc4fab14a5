use document::{CanvasState, Compositor, OnionSkins, ViewModeFilter, flatten_tile};
use model::{BIT15, BlendMode, Pixel15, Tile, TransientTile, channel8_to_15};

/// Everything a worker needs to flatten tiles of one view state.
pub struct RenderParams<'a> {
    pub view: &'a CanvasState,
    pub compositor: &'a dyn Compositor,
    pub filter: &'a ViewModeFilter,
    /// Onion skins around the given active frame, in frame view mode only.
    pub onion_skins: Option<(&'a OnionSkins, i32)>,
    /// Matte drawn behind everything when transparency could show.
    pub checker: Option<&'a Tile>,
}

/// Composites tile `index` of the view: background, onion skins, the
/// filtered layer tree and finally the checkerboard behind it all.
pub fn flatten_view_tile(params: &RenderParams<'_>, index: usize) -> TransientTile {
    let view = params.view;
    let compositor = params.compositor;
    let mut tile = TransientTile::from_nullable(view.background_tile(), 0);

    if let Some((skins, active_frame_index)) = params.onion_skins {
        for (frame_index, skin) in skins.frames(active_frame_index) {
            let filter = ViewModeFilter::make_frame(view, frame_index);
            if filter.excludes_everything() || skin.opacity == 0 {
                continue;
            }
            let mut skin_tile = TransientTile::new_blank(0);
            flatten_tile(view, compositor, &mut skin_tile, index, &filter);
            if skin.tint.alpha() != 0 {
                let tint = TransientTile::new_filled(
                    Pixel15::from_color(skin.tint.with_alpha(u8::MAX)),
                    0,
                );
                skin_tile.merge(
                    compositor,
                    tint.pixels(),
                    channel8_to_15(skin.tint.alpha()),
                    BlendMode::Recolor,
                );
            }
            tile.merge(compositor, skin_tile.pixels(), skin.opacity, BlendMode::Normal);
        }
    }

    flatten_tile(view, compositor, &mut tile, index, params.filter);

    if let Some(checker) = params.checker {
        tile.merge(compositor, checker.pixels(), BIT15, BlendMode::Behind);
    }
    tile
}
