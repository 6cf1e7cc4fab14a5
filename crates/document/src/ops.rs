use std::sync::Arc;

use model::{Color, Compositor, channel8_to_15};
use protocol::{LayerAttributes, LayerCreate, LayerId, Message, MessageBody};

use crate::error::ApplyError;
use crate::layer::{LayerContent, LayerGroup, LayerListEntry, LayerProps};
use crate::meta::{Annotation, TimelineFrame};
use crate::paint;
use crate::state::{CanvasState, TransientCanvasState};

const MAX_CANVAS_SIZE: i64 = 65535;

impl CanvasState {
    /// Derives the state that results from applying `message`. Message
    /// types without an effect on the canvas return this state unchanged.
    pub fn apply(
        &self,
        compositor: &dyn Compositor,
        message: &Message,
    ) -> Result<CanvasState, ApplyError> {
        let context_id = message.context_id();
        match message.body() {
            MessageBody::CanvasResize {
                top,
                right,
                bottom,
                left,
            } => self.resize(*top, *right, *bottom, *left),
            MessageBody::LayerCreate(create) => self.edit(|t| layer_create(t, create)),
            MessageBody::LayerAttributes(attrs) => self.edit(|t| layer_attributes(t, attrs)),
            MessageBody::LayerRetitle { id, title } => self.edit(|t| {
                let route = t.find_route(*id).ok_or(ApplyError::LayerNotFound(*id))?;
                let (_, props) = t.layer_trees_mut();
                route.props_mut(props).set_title(title.clone());
                Ok(())
            }),
            MessageBody::LayerOrder { ids } => self.edit(|t| layer_order(t, ids)),
            MessageBody::LayerDelete { id } => self.edit(|t| layer_delete(t, *id)),
            MessageBody::FillRect(fill) => {
                self.edit(|t| paint::fill_rect(t, compositor, context_id, fill))
            }
            MessageBody::DrawDabs(dabs) => {
                self.edit(|t| paint::draw_dabs(t, compositor, context_id, dabs))
            }
            MessageBody::PenUp => self.edit(|t| {
                paint::pen_up(t, compositor, context_id);
                Ok(())
            }),
            MessageBody::AnnotationCreate {
                id,
                x,
                y,
                width,
                height,
            } => self.edit(|t| {
                if t.annotations().get_by_id(*id).is_some() {
                    return Err(ApplyError::AnnotationExists(*id));
                }
                t.annotations_mut().push(Annotation {
                    id: *id,
                    x: *x,
                    y: *y,
                    width: *width,
                    height: *height,
                    background: Color::TRANSPARENT,
                    text: String::new(),
                });
                Ok(())
            }),
            MessageBody::AnnotationEdit {
                id,
                background,
                text,
            } => self.edit(|t| {
                let index = t
                    .annotations()
                    .index_of(*id)
                    .ok_or(ApplyError::AnnotationNotFound(*id))?;
                let annotation = t.annotations_mut().get_mut(index);
                annotation.background = *background;
                annotation.text = text.clone();
                Ok(())
            }),
            MessageBody::AnnotationDelete { id } => self.edit(|t| {
                let index = t
                    .annotations()
                    .index_of(*id)
                    .ok_or(ApplyError::AnnotationNotFound(*id))?;
                t.annotations_mut().remove(index);
                Ok(())
            }),
            MessageBody::SetMetadataInt { field, value } => self.edit(|t| {
                let metadata = t.metadata().with_field(*field, *value);
                t.set_metadata(metadata);
                Ok(())
            }),
            MessageBody::SetTimelineFrame {
                frame,
                insert,
                layer_ids,
            } => self.edit(|t| {
                let len = t.timeline().len();
                let index = *frame as usize;
                let entry = TimelineFrame {
                    layer_ids: layer_ids.clone(),
                };
                if index == len || (index < len && *insert) {
                    t.timeline_mut().insert(index, entry);
                } else if index < len {
                    t.timeline_mut().replace(index, entry);
                } else {
                    return Err(ApplyError::FrameOutOfRange { frame: *frame, len });
                }
                Ok(())
            }),
            MessageBody::RemoveTimelineFrame { frame } => self.edit(|t| {
                let len = t.timeline().len();
                if *frame as usize >= len {
                    return Err(ApplyError::FrameOutOfRange { frame: *frame, len });
                }
                t.timeline_mut().remove(*frame as usize);
                Ok(())
            }),
            MessageBody::UndoPoint
            | MessageBody::Undo { .. }
            | MessageBody::DefaultLayer { .. }
            | MessageBody::MovePointer { .. }
            | MessageBody::LaserTrail { .. }
            | MessageBody::Interval { .. }
            | MessageBody::Chat { .. } => Ok(self.clone()),
        }
    }

    /// Applies a run of draw-dab messages through a single transient state.
    /// Messages that fail are logged and skipped; the rest still apply.
    pub fn apply_multidab(&self, compositor: &dyn Compositor, messages: &[Message]) -> CanvasState {
        let mut transient = self.to_transient();
        let mut applied = false;
        for message in messages {
            let result = match message.draw_dabs() {
                Some(dabs) => {
                    paint::draw_dabs(&mut transient, compositor, message.context_id(), dabs)
                }
                None => {
                    log::warn!(
                        "{} message in a dab batch, skipping",
                        message.message_type().name()
                    );
                    continue;
                }
            };
            match result {
                Ok(()) => applied = true,
                Err(err) => log::warn!(
                    "dropping dabs from context {}: {err}",
                    message.context_id()
                ),
            }
        }
        if applied {
            transient.persist()
        } else {
            self.clone()
        }
    }

    fn edit(
        &self,
        f: impl FnOnce(&mut TransientCanvasState) -> Result<(), ApplyError>,
    ) -> Result<CanvasState, ApplyError> {
        let mut transient = self.to_transient();
        f(&mut transient)?;
        Ok(transient.persist())
    }

    fn resize(&self, top: i32, right: i32, bottom: i32, left: i32) -> Result<CanvasState, ApplyError> {
        let width = self.width() as i64 + left as i64 + right as i64;
        let height = self.height() as i64 + top as i64 + bottom as i64;
        if width <= 0 || height <= 0 || width > MAX_CANVAS_SIZE || height > MAX_CANVAS_SIZE {
            return Err(ApplyError::InvalidSize { width, height });
        }
        let (width, height) = (width as u32, height as u32);
        let mut transient = self.to_transient();
        transient.set_size(width, height);
        transient.set_offset(self.offset_x() - left, self.offset_y() - top);
        transient.set_layers(Arc::new(self.layers().resized(left, top, width, height)));
        if left != 0 || top != 0 {
            transient.set_annotations(Arc::new(self.annotations().shifted(left, top)));
        }
        Ok(transient.persist())
    }
}

fn layer_create(t: &mut TransientCanvasState, create: &LayerCreate) -> Result<(), ApplyError> {
    if create.id <= 0 {
        return Err(ApplyError::InvalidLayerId(create.id));
    }
    if t.find_route(create.id).is_some() {
        return Err(ApplyError::LayerExists(create.id));
    }
    let (width, height) = (t.width(), t.height());
    let entry = if create.group {
        LayerListEntry::Group(Arc::new(LayerGroup::new(width, height)))
    } else {
        LayerListEntry::Content(Arc::new(LayerContent::new_filled(
            width,
            height,
            paint::fill_tile(create.fill),
        )))
    };
    let props = Arc::new(LayerProps::new(create.id, create.title.clone(), create.group));

    let parent_route = match create.parent {
        Some(parent) => {
            let route = t.find_route(parent).ok_or(ApplyError::LayerNotFound(parent))?;
            if !route.is_group() {
                return Err(ApplyError::NotAGroup(parent));
            }
            Some(route)
        }
        None => None,
    };
    let (layers, layer_props) = t.layer_trees_mut();
    let (list, props_list) = match &parent_route {
        Some(route) => route.child_lists_mut(layers, layer_props),
        None => (Arc::make_mut(layers), Arc::make_mut(layer_props)),
    };
    list.entries_mut().push(entry);
    props_list.entries_mut().push(props);
    Ok(())
}

fn layer_attributes(t: &mut TransientCanvasState, attrs: &LayerAttributes) -> Result<(), ApplyError> {
    let route = t.find_route(attrs.id).ok_or(ApplyError::LayerNotFound(attrs.id))?;
    let (_, props) = t.layer_trees_mut();
    let lp = route.props_mut(props);
    lp.set_opacity(channel8_to_15(attrs.opacity));
    lp.set_blend_mode(attrs.blend_mode);
    lp.set_hidden(attrs.hidden);
    lp.set_censored(attrs.censored);
    lp.set_isolated(attrs.isolated);
    Ok(())
}

fn layer_order(t: &mut TransientCanvasState, ids: &[LayerId]) -> Result<(), ApplyError> {
    let current: Vec<LayerId> = t.layer_props().iter().map(|lp| lp.id()).collect();
    let mut sorted_new = ids.to_vec();
    sorted_new.sort_unstable();
    let mut sorted_current = current.clone();
    sorted_current.sort_unstable();
    if sorted_new != sorted_current {
        return Err(ApplyError::InvalidLayerOrder);
    }
    let indexes: Vec<usize> = ids
        .iter()
        .filter_map(|id| current.iter().position(|c| c == id))
        .collect();

    let (layers, props) = t.layer_trees_mut();
    let old_layers = Arc::make_mut(layers).entries_mut();
    let reordered: Vec<_> = indexes.iter().map(|&i| old_layers[i].clone()).collect();
    *old_layers = reordered;
    let old_props = Arc::make_mut(props).entries_mut();
    let reordered: Vec<_> = indexes.iter().map(|&i| Arc::clone(&old_props[i])).collect();
    *old_props = reordered;
    Ok(())
}

fn layer_delete(t: &mut TransientCanvasState, id: LayerId) -> Result<(), ApplyError> {
    let route = t.find_route(id).ok_or(ApplyError::LayerNotFound(id))?;
    let (layers, props) = t.layer_trees_mut();
    let (list, props_list) = route.parent_lists_mut(layers, props);
    list.entries_mut().remove(route.last_index());
    props_list.entries_mut().remove(route.last_index());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::{BIT15, BasicCompositor, BlendMode};
    use protocol::{DrawDabs, MetadataField};

    fn msg(body: MessageBody) -> Message {
        Message::new(1, body)
    }

    fn apply(state: &CanvasState, body: MessageBody) -> Result<CanvasState, ApplyError> {
        state.apply(&BasicCompositor, &msg(body))
    }

    fn create(id: LayerId, parent: Option<LayerId>, group: bool) -> MessageBody {
        MessageBody::LayerCreate(LayerCreate {
            id,
            parent,
            group,
            fill: Color::TRANSPARENT,
            title: format!("layer {id}"),
        })
    }

    fn canvas() -> CanvasState {
        let state = apply(
            &CanvasState::new(),
            MessageBody::CanvasResize {
                top: 0,
                right: 200,
                bottom: 100,
                left: 0,
            },
        )
        .expect("resize");
        let state = apply(&state, create(1, None, false)).expect("layer 1");
        apply(&state, create(2, None, false)).expect("layer 2")
    }

    fn dabs(layer_id: LayerId, x: i32, y: i32) -> MessageBody {
        MessageBody::DrawDabs(DrawDabs::new(layer_id, x, y, Color::BLACK).with_dab(0, 0, 2, 255))
    }

    #[test]
    fn drawing_shares_everything_outside_the_layer() {
        let before = canvas();
        let after = apply(&before, dabs(2, 10, 10)).expect("draw");

        let (Some(LayerListEntry::Content(a1)), Some(LayerListEntry::Content(b1))) =
            (before.layers().get(0), after.layers().get(0))
        else {
            panic!("content layers expected");
        };
        assert!(Arc::ptr_eq(a1, b1));
        assert!(Arc::ptr_eq(before.layer_props(), after.layer_props()));
        assert!(Arc::ptr_eq(before.annotations(), after.annotations()));

        let Some(LayerListEntry::Content(b2)) = after.layers().get(1) else {
            panic!("content layer expected");
        };
        assert!(b2.tile_at(0).is_some());
        assert!(b2.tile_at(1).is_none());
    }

    #[test]
    fn layers_nest_into_groups() {
        let state = apply(&canvas(), create(3, None, true)).expect("group");
        let state = apply(&state, create(4, Some(3), false)).expect("child");
        assert_eq!(state.search_layer(4).map(|r| r.indexes().to_vec()), Some(vec![2, 0]));
        assert_eq!(
            apply(&state, create(5, Some(1), false)).err(),
            Some(ApplyError::NotAGroup(1))
        );
        assert_eq!(
            apply(&state, create(4, None, false)).err(),
            Some(ApplyError::LayerExists(4))
        );
        assert_eq!(
            apply(&state, create(0, None, false)).err(),
            Some(ApplyError::InvalidLayerId(0))
        );

        let state = apply(&state, MessageBody::LayerDelete { id: 3 }).expect("delete group");
        assert!(state.search_layer(4).is_none());
        assert_eq!(state.layers().len(), 2);
    }

    #[test]
    fn attributes_update_props_only() {
        let before = canvas();
        let after = apply(
            &before,
            MessageBody::LayerAttributes(LayerAttributes {
                id: 1,
                opacity: 128,
                blend_mode: BlendMode::Multiply,
                hidden: true,
                censored: false,
                isolated: true,
            }),
        )
        .expect("attributes");
        assert!(Arc::ptr_eq(before.layers(), after.layers()));
        let lp = after.search_layer(1).expect("layer").props(after.layer_props());
        assert_eq!(lp.opacity(), channel8_to_15(128));
        assert_eq!(lp.blend_mode(), BlendMode::Multiply);
        assert!(lp.hidden());
    }

    #[test]
    fn layer_order_must_be_a_permutation() {
        let state = canvas();
        let reordered = apply(&state, MessageBody::LayerOrder { ids: vec![2, 1] }).expect("order");
        let ids: Vec<_> = reordered.layer_props().iter().map(|lp| lp.id()).collect();
        assert_eq!(ids, vec![2, 1]);
        assert_eq!(
            apply(&state, MessageBody::LayerOrder { ids: vec![2, 3] }).err(),
            Some(ApplyError::InvalidLayerOrder)
        );
    }

    #[test]
    fn resize_moves_offset_and_annotations() {
        let state = apply(
            &canvas(),
            MessageBody::AnnotationCreate {
                id: 1,
                x: 5,
                y: 5,
                width: 10,
                height: 10,
            },
        )
        .expect("annotation");
        let grown = apply(
            &state,
            MessageBody::CanvasResize {
                top: 10,
                right: 0,
                bottom: 0,
                left: 64,
            },
        )
        .expect("resize");
        assert_eq!((grown.width(), grown.height()), (264, 110));
        assert_eq!((grown.offset_x(), grown.offset_y()), (-64, -10));
        let annotation = grown.annotations().get_by_id(1).expect("annotation");
        assert_eq!((annotation.x, annotation.y), (69, 15));

        assert!(matches!(
            apply(
                &state,
                MessageBody::CanvasResize {
                    top: 0,
                    right: -200,
                    bottom: 0,
                    left: 0,
                }
            ),
            Err(ApplyError::InvalidSize { .. })
        ));
    }

    #[test]
    fn timeline_frames_insert_replace_and_remove() {
        let state = canvas();
        let frame = |frame, insert, ids: Vec<LayerId>| MessageBody::SetTimelineFrame {
            frame,
            insert,
            layer_ids: ids,
        };
        let state = apply(&state, frame(0, false, vec![1])).expect("append");
        let state = apply(&state, frame(0, true, vec![2])).expect("insert");
        let state = apply(&state, frame(1, false, vec![1, 2])).expect("replace");
        assert_eq!(state.timeline().len(), 2);
        assert_eq!(state.timeline().frame(0).map(|f| f.layer_ids.clone()), Some(vec![2]));
        assert_eq!(
            state.timeline().frame(1).map(|f| f.layer_ids.clone()),
            Some(vec![1, 2])
        );
        assert!(apply(&state, frame(5, false, vec![])).is_err());

        let state = apply(&state, MessageBody::RemoveTimelineFrame { frame: 0 }).expect("remove");
        assert_eq!(state.timeline().len(), 1);

        let state = apply(
            &state,
            MessageBody::SetMetadataInt {
                field: MetadataField::UseTimeline,
                value: 1,
            },
        )
        .expect("metadata");
        assert!(state.metadata().use_timeline);
    }

    #[test]
    fn meta_messages_leave_the_state_alone() {
        let state = canvas();
        let same = apply(&state, MessageBody::UndoPoint).expect("undo point");
        assert!(CanvasState::ptr_eq(&state, &same));
    }

    #[test]
    fn multidab_matches_sequential_application() {
        let state = canvas();
        let messages: Vec<Message> = (0..20).map(|i| msg(dabs(1, 3 * i, 2 * i))).collect();

        let batched = state.apply_multidab(&BasicCompositor, &messages);
        let sequential = messages.iter().fold(state.clone(), |s, m| {
            s.apply(&BasicCompositor, m).expect("draw")
        });

        let (Some(LayerListEntry::Content(a)), Some(LayerListEntry::Content(b))) =
            (batched.layers().get(0), sequential.layers().get(0))
        else {
            panic!("content layers expected");
        };
        for (x, y) in a.tiles().iter().zip(b.tiles()) {
            assert_eq!(x.as_ref().map(|t| t.pixels()), y.as_ref().map(|t| t.pixels()));
        }
        assert!(a.tile_at(0).is_some_and(|t| t.pixels()[63 * 64 + 63].a == 0));
        assert!(a.tile_at(0).is_some_and(|t| t.pixels()[8 * 64 + 12].a == BIT15));
    }

    #[test]
    fn failed_dabs_in_a_batch_are_skipped() {
        let state = canvas();
        let messages = vec![msg(dabs(9, 0, 0)), msg(dabs(1, 5, 5))];
        let batched = state.apply_multidab(&BasicCompositor, &messages);
        assert!(!CanvasState::ptr_eq(&state, &batched));

        let only_bad = state.apply_multidab(&BasicCompositor, &messages[..1]);
        assert!(CanvasState::ptr_eq(&state, &only_bad));
    }
}
