use model::{BIT15, BlendMode, Compositor, Tile, TransientTile, mul15};

use crate::layer::{LayerContent, LayerGroup, LayerList, LayerListEntry, LayerProps, LayerPropsList};
use crate::state::CanvasState;
use crate::view_mode::{FilterResult, ViewModeFilter};

/// Composites every visible layer of `state` at tile `index` onto `dst`,
/// bottom to top. The background is not included.
pub fn flatten_tile(
    state: &CanvasState,
    compositor: &dyn Compositor,
    dst: &mut TransientTile,
    index: usize,
    filter: &ViewModeFilter,
) {
    flatten_list(
        state.layers(),
        state.layer_props(),
        compositor,
        dst,
        index,
        BIT15,
        filter,
    );
}

pub fn flatten_list(
    layers: &LayerList,
    props: &LayerPropsList,
    compositor: &dyn Compositor,
    dst: &mut TransientTile,
    index: usize,
    parent_opacity: u16,
    filter: &ViewModeFilter,
) {
    assert_eq!(layers.len(), props.len(), "layer list and props list out of step");
    let normal = ViewModeFilter::Normal;
    for (entry, lp) in layers.iter().zip(props.iter()) {
        if !lp.visible() {
            continue;
        }
        let child_filter = match filter.apply(lp) {
            FilterResult::Exclude => continue,
            FilterResult::IncludeAll => &normal,
            FilterResult::Continue => filter,
        };
        match entry {
            LayerListEntry::Content(content) => {
                flatten_content(content, lp, compositor, dst, index, parent_opacity);
            }
            LayerListEntry::Group(group) => {
                flatten_group(group, lp, compositor, dst, index, parent_opacity, child_filter);
            }
        }
    }
}

fn flatten_content(
    content: &LayerContent,
    lp: &LayerProps,
    compositor: &dyn Compositor,
    dst: &mut TransientTile,
    index: usize,
    parent_opacity: u16,
) {
    let opacity = mul15(lp.opacity() as u32, parent_opacity as u32) as u16;
    let tile = content.tile_at(index);
    let mut sublayers = content
        .sublayers()
        .iter()
        .filter(|sublayer| sublayer.props.visible())
        .filter_map(|sublayer| sublayer.content.tile_at(index).map(|t| (sublayer, t)))
        .peekable();

    if lp.censored() {
        if tile.is_some() || sublayers.peek().is_some() {
            dst.merge(compositor, Tile::censored().pixels(), opacity, BlendMode::Normal);
        }
    } else if sublayers.peek().is_some() {
        let mut merged = TransientTile::from_nullable(tile, 0);
        for (sublayer, sub_tile) in sublayers {
            merged.merge(
                compositor,
                sub_tile.pixels(),
                sublayer.props.opacity(),
                sublayer.props.blend_mode(),
            );
        }
        dst.merge(compositor, merged.pixels(), opacity, lp.blend_mode());
    } else if let Some(tile) = tile {
        dst.merge(compositor, tile.pixels(), opacity, lp.blend_mode());
    }
}

fn flatten_group(
    group: &LayerGroup,
    lp: &LayerProps,
    compositor: &dyn Compositor,
    dst: &mut TransientTile,
    index: usize,
    parent_opacity: u16,
    filter: &ViewModeFilter,
) {
    let Some(children) = lp.children() else {
        panic!("group layer {} has no child props", lp.id());
    };
    let opacity = mul15(lp.opacity() as u32, parent_opacity as u32) as u16;
    if lp.isolated() {
        let mut isolated = TransientTile::new_blank(0);
        flatten_list(group.children(), children, compositor, &mut isolated, index, BIT15, filter);
        if !isolated.is_blank() {
            dst.merge(compositor, isolated.pixels(), opacity, lp.blend_mode());
        }
    } else {
        flatten_list(group.children(), children, compositor, dst, index, opacity, filter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use model::{BasicCompositor, Pixel15};

    use crate::layer::Sublayer;
    use crate::state::TransientCanvasState;

    fn opaque(r: u16, g: u16, b: u16) -> Pixel15 {
        Pixel15 { b, g, r, a: BIT15 }
    }

    fn content_with(pixel: Pixel15) -> LayerContent {
        let mut content = LayerContent::new(64, 64);
        content.set_tile(0, Some(Tile::new_filled(pixel, 1)));
        content
    }

    fn state(entries: Vec<(LayerListEntry, LayerProps)>) -> CanvasState {
        let mut transient = TransientCanvasState::new(64, 64);
        let (layers, props) = transient.layer_trees_mut();
        for (entry, lp) in entries {
            Arc::make_mut(layers).entries_mut().push(entry);
            Arc::make_mut(props).entries_mut().push(Arc::new(lp));
        }
        transient.persist()
    }

    fn flatten(state: &CanvasState, filter: &ViewModeFilter) -> Pixel15 {
        let mut dst = TransientTile::new_blank(0);
        flatten_tile(state, &BasicCompositor, &mut dst, 0, filter);
        dst.pixels()[0]
    }

    #[test]
    fn top_layer_covers_bottom_layer() {
        let red = opaque(BIT15, 0, 0);
        let blue = opaque(0, 0, BIT15);
        let state = state(vec![
            (
                LayerListEntry::Content(Arc::new(content_with(red))),
                LayerProps::new(1, "", false),
            ),
            (
                LayerListEntry::Content(Arc::new(content_with(blue))),
                LayerProps::new(2, "", false),
            ),
        ]);
        assert_eq!(flatten(&state, &ViewModeFilter::Normal), blue);
        assert_eq!(flatten(&state, &ViewModeFilter::Layer { layer_id: 1 }), red);
        assert_eq!(flatten(&state, &ViewModeFilter::Nothing), Pixel15::TRANSPARENT);
    }

    #[test]
    fn hidden_layers_are_skipped() {
        let mut lp = LayerProps::new(1, "", false);
        lp.set_hidden(true);
        let state = state(vec![(
            LayerListEntry::Content(Arc::new(content_with(opaque(BIT15, 0, 0)))),
            lp,
        )]);
        assert_eq!(flatten(&state, &ViewModeFilter::Normal), Pixel15::TRANSPARENT);
    }

    #[test]
    fn censored_layers_show_the_censor_pattern() {
        let mut lp = LayerProps::new(1, "", false);
        lp.set_censored(true);
        let state = state(vec![(
            LayerListEntry::Content(Arc::new(content_with(opaque(BIT15, 0, 0)))),
            lp,
        )]);
        assert_eq!(
            flatten(&state, &ViewModeFilter::Normal),
            Tile::censored().pixels()[0]
        );
    }

    #[test]
    fn erase_sublayer_punches_through_its_layer() {
        let mut content = content_with(opaque(BIT15, 0, 0));
        let mut erase = LayerProps::new(-100, "", false);
        erase.set_blend_mode(BlendMode::Erase);
        content.insert_sublayer(Sublayer {
            props: Arc::new(erase),
            content: Arc::new(content_with(opaque(0, 0, 0))),
        });
        let state = state(vec![(
            LayerListEntry::Content(Arc::new(content)),
            LayerProps::new(1, "", false),
        )]);
        assert_eq!(flatten(&state, &ViewModeFilter::Normal).a, 0);
    }

    #[test]
    fn group_opacity_applies_to_children() {
        let mut group = LayerGroup::new(64, 64);
        Arc::make_mut(group.children_mut())
            .entries_mut()
            .push(LayerListEntry::Content(Arc::new(content_with(opaque(BIT15, 0, 0)))));
        let mut lp = LayerProps::new(1, "", true);
        Arc::make_mut(lp.children_mut().expect("group"))
            .entries_mut()
            .push(Arc::new(LayerProps::new(2, "", false)));
        lp.set_opacity(BIT15 / 2);

        let isolated = state(vec![(LayerListEntry::Group(Arc::new(group.clone())), lp.clone())]);
        lp.set_isolated(false);
        let pass_through = state(vec![(LayerListEntry::Group(Arc::new(group)), lp)]);

        let a = flatten(&isolated, &ViewModeFilter::Normal);
        let b = flatten(&pass_through, &ViewModeFilter::Normal);
        assert_eq!(a.a, BIT15 / 2);
        assert_eq!(a, b);
    }
}
