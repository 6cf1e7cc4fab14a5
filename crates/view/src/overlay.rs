use std::sync::Arc;

use document::{CanvasState, LayerContent, LayerList, LayerListEntry, LayerProps, LayerPropsList, Sublayer};
use model::{BIT15, BlendMode, Tile};
use protocol::{ContextId, LayerId};

/// Sublayer id of the inspect highlight.
pub const INSPECT_SUBLAYER_ID: LayerId = -200;

const INSPECT_OPACITY: u16 = BIT15 - BIT15 / 4;

/// Highlights every tile last touched by `context_id`.
pub(crate) fn inspect(state: &CanvasState, context_id: ContextId) -> CanvasState {
    let mut layers = Arc::clone(state.layers());
    inspect_list(&mut layers, context_id);
    if Arc::ptr_eq(&layers, state.layers()) {
        return state.clone();
    }
    let mut transient = state.to_transient();
    transient.set_layers(layers);
    transient.persist()
}

fn inspect_list(list: &mut Arc<LayerList>, context_id: ContextId) {
    for index in 0..list.len() {
        let Some(entry) = list.get(index).cloned() else {
            continue;
        };
        match entry {
            LayerListEntry::Content(content) => {
                let Some(sublayer) = inspect_sublayer(&content, context_id) else {
                    continue;
                };
                if let LayerListEntry::Content(content) = &mut Arc::make_mut(list).entries_mut()[index] {
                    Arc::make_mut(content).insert_sublayer(sublayer);
                }
            }
            LayerListEntry::Group(group) => {
                let mut children = Arc::clone(group.children());
                inspect_list(&mut children, context_id);
                if Arc::ptr_eq(&children, group.children()) {
                    continue;
                }
                if let LayerListEntry::Group(group) = &mut Arc::make_mut(list).entries_mut()[index] {
                    *Arc::make_mut(group).children_mut() = children;
                }
            }
        }
    }
}

fn inspect_sublayer(content: &LayerContent, context_id: ContextId) -> Option<Sublayer> {
    let mut highlight: Option<LayerContent> = None;
    for (index, tile) in content.tiles().iter().enumerate() {
        if tile.as_ref().is_some_and(|t| t.context_id() == context_id) {
            highlight
                .get_or_insert_with(|| LayerContent::new(content.width(), content.height()))
                .set_tile(index, Some(Tile::censored()));
        }
    }
    let highlight = highlight?;
    let mut props = LayerProps::new(INSPECT_SUBLAYER_ID, "", false);
    props.set_blend_mode(BlendMode::Recolor);
    props.set_opacity(INSPECT_OPACITY);
    Some(Sublayer {
        props: Arc::new(props),
        content: Arc::new(highlight),
    })
}

pub(crate) fn any_hidden(list: &LayerPropsList) -> bool {
    list.iter()
        .any(|lp| lp.hidden() || lp.children().is_some_and(|c| any_hidden(c)))
}

pub(crate) fn collect_hidden(list: &LayerPropsList, out: &mut Vec<LayerId>) {
    for lp in list.iter() {
        if lp.hidden() {
            out.push(lp.id());
        }
        if let Some(children) = lp.children() {
            collect_hidden(children, out);
        }
    }
}

/// Props with visibility taken from `hidden_ids` instead of the document,
/// and censoring lifted when `reveal` is set. Unchanged props stay shared.
/// Ids from `hidden_ids` that exist in the tree are pushed to `found`.
pub(crate) fn local_props(
    list: &Arc<LayerPropsList>,
    hidden_ids: &[LayerId],
    reveal: bool,
    found: &mut Vec<LayerId>,
) -> Arc<LayerPropsList> {
    let mut rebuilt: Option<LayerPropsList> = None;
    for (index, lp) in list.iter().enumerate() {
        let next = local_layer_props(lp, hidden_ids, reveal, found);
        if !Arc::ptr_eq(&next, lp) {
            rebuilt.get_or_insert_with(|| LayerPropsList::clone(list)).entries_mut()[index] = next;
        }
    }
    match rebuilt {
        Some(rebuilt) => Arc::new(rebuilt),
        None => Arc::clone(list),
    }
}

fn local_layer_props(
    lp: &Arc<LayerProps>,
    hidden_ids: &[LayerId],
    reveal: bool,
    found: &mut Vec<LayerId>,
) -> Arc<LayerProps> {
    let hidden = hidden_ids.contains(&lp.id());
    if hidden {
        found.push(lp.id());
    }
    let children = lp
        .children()
        .map(|children| (children, local_props(children, hidden_ids, reveal, found)));
    let children_changed = children
        .as_ref()
        .is_some_and(|(old, new)| !Arc::ptr_eq(old, new));
    let uncensor = reveal && lp.censored();
    if lp.hidden() == hidden && !uncensor && !children_changed {
        return Arc::clone(lp);
    }
    let mut next = LayerProps::clone(lp);
    next.set_hidden(hidden);
    if uncensor {
        next.set_censored(false);
    }
    if let (Some(slot), Some((_, new))) = (next.children_mut(), children) {
        *slot = new;
    }
    Arc::new(next)
}
