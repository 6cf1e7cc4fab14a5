use std::collections::HashMap;
use std::sync::Arc;

use protocol::LayerId;
use smallvec::SmallVec;

use crate::layer::{LayerContent, LayerGroup, LayerList, LayerListEntry, LayerProps, LayerPropsList};

/// Index path from the root layer list down to one layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerRoute {
    indexes: SmallVec<[usize; 4]>,
    group: bool,
}

/// Id to route lookup for every layer of a canvas state.
#[derive(Debug, Default)]
pub struct LayerRoutes {
    routes: HashMap<LayerId, LayerRoute>,
}

impl LayerRoutes {
    pub fn build(props: &LayerPropsList) -> Self {
        let mut routes = HashMap::new();
        let mut path = SmallVec::new();
        collect_routes(props, &mut path, &mut routes);
        Self { routes }
    }

    pub fn search(&self, id: LayerId) -> Option<&LayerRoute> {
        self.routes.get(&id)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

fn collect_routes(
    props: &LayerPropsList,
    path: &mut SmallVec<[usize; 4]>,
    routes: &mut HashMap<LayerId, LayerRoute>,
) {
    for (index, lp) in props.iter().enumerate() {
        path.push(index);
        routes.insert(
            lp.id(),
            LayerRoute {
                indexes: path.clone(),
                group: lp.is_group(),
            },
        );
        if let Some(children) = lp.children() {
            collect_routes(children, path, routes);
        }
        path.pop();
    }
}

/// Depth-first search for `id`, for states whose routes are not cached.
pub fn find_route(props: &LayerPropsList, id: LayerId) -> Option<LayerRoute> {
    fn search(props: &LayerPropsList, id: LayerId, path: &mut SmallVec<[usize; 4]>) -> Option<bool> {
        for (index, lp) in props.iter().enumerate() {
            path.push(index);
            if lp.id() == id {
                return Some(lp.is_group());
            }
            if let Some(children) = lp.children()
                && let Some(group) = search(children, id, path)
            {
                return Some(group);
            }
            path.pop();
        }
        None
    }

    let mut indexes = SmallVec::new();
    search(props, id, &mut indexes).map(|group| LayerRoute { indexes, group })
}

fn list_at_mut<'a>(mut list: &'a mut Arc<LayerList>, path: &[usize]) -> &'a mut LayerList {
    for &index in path {
        match &mut Arc::make_mut(list).entries_mut()[index] {
            LayerListEntry::Group(group) => list = Arc::make_mut(group).children_mut(),
            LayerListEntry::Content(_) => panic!("layer route passes through a content layer"),
        }
    }
    Arc::make_mut(list)
}

fn props_list_at_mut<'a>(
    mut list: &'a mut Arc<LayerPropsList>,
    path: &[usize],
) -> &'a mut LayerPropsList {
    for &index in path {
        let props = Arc::make_mut(&mut Arc::make_mut(list).entries_mut()[index]);
        list = props
            .children_mut()
            .expect("layer route passes through a non-group layer");
    }
    Arc::make_mut(list)
}

impl LayerRoute {
    pub fn indexes(&self) -> &[usize] {
        &self.indexes
    }

    pub fn is_group(&self) -> bool {
        self.group
    }

    pub fn parent_indexes(&self) -> &[usize] {
        &self.indexes[..self.indexes.len() - 1]
    }

    pub fn last_index(&self) -> usize {
        self.indexes[self.indexes.len() - 1]
    }

    pub fn props<'a>(&self, root: &'a LayerPropsList) -> &'a Arc<LayerProps> {
        let mut list = root;
        for &index in self.parent_indexes() {
            list = list.get(index).and_then(|lp| lp.children()).expect("valid layer route");
        }
        list.get(self.last_index()).expect("valid layer route")
    }

    pub fn entry<'a>(&self, root: &'a LayerList) -> &'a LayerListEntry {
        let mut list = root;
        for &index in self.parent_indexes() {
            list = match list.get(index) {
                Some(LayerListEntry::Group(group)) => group.children(),
                _ => panic!("layer route passes through a content layer"),
            };
        }
        list.get(self.last_index()).expect("valid layer route")
    }

    pub fn content<'a>(&self, root: &'a LayerList) -> Option<&'a Arc<LayerContent>> {
        match self.entry(root) {
            LayerListEntry::Content(content) => Some(content),
            LayerListEntry::Group(_) => None,
        }
    }

    /// Copy-on-write access to the content layer at this route. Every list
    /// and group along the path is unshared; siblings stay shared.
    pub fn content_mut<'a>(&self, root: &'a mut Arc<LayerList>) -> &'a mut LayerContent {
        let parent = list_at_mut(root, self.parent_indexes());
        match &mut parent.entries_mut()[self.last_index()] {
            LayerListEntry::Content(content) => Arc::make_mut(content),
            LayerListEntry::Group(_) => panic!("layer route leads to a group"),
        }
    }

    pub fn group_mut<'a>(&self, root: &'a mut Arc<LayerList>) -> &'a mut LayerGroup {
        let parent = list_at_mut(root, self.parent_indexes());
        match &mut parent.entries_mut()[self.last_index()] {
            LayerListEntry::Group(group) => Arc::make_mut(group),
            LayerListEntry::Content(_) => panic!("layer route leads to a content layer"),
        }
    }

    pub fn props_mut<'a>(&self, root: &'a mut Arc<LayerPropsList>) -> &'a mut LayerProps {
        let parent = props_list_at_mut(root, self.parent_indexes());
        Arc::make_mut(&mut parent.entries_mut()[self.last_index()])
    }

    /// Unshared parent lists of this layer, for insertion and removal.
    pub fn parent_lists_mut<'a>(
        &self,
        layers: &'a mut Arc<LayerList>,
        props: &'a mut Arc<LayerPropsList>,
    ) -> (&'a mut LayerList, &'a mut LayerPropsList) {
        (
            list_at_mut(layers, self.parent_indexes()),
            props_list_at_mut(props, self.parent_indexes()),
        )
    }

    /// Lists holding the children of the group at this route.
    pub fn child_lists_mut<'a>(
        &self,
        layers: &'a mut Arc<LayerList>,
        props: &'a mut Arc<LayerPropsList>,
    ) -> (&'a mut LayerList, &'a mut LayerPropsList) {
        assert!(self.group, "layer route leads to a content layer");
        (
            list_at_mut(layers, &self.indexes),
            props_list_at_mut(props, &self.indexes),
        )
    }
}
