//! In-process mirror of the host page's element tree.
//!
//! The browser extension forwards the page structure and every mutation it
//! sees; this module keeps an arena of element and text nodes in sync with
//! it and offers MutationObserver-style subscriptions so trackers can react
//! to changes the host application makes on its own schedule.
//!
//! Nothing here trusts the host structure: every lookup of a node may come
//! back empty, and callers are expected to re-read the tree after each
//! notification instead of caching what they saw.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use tokio::sync::mpsc;
use tracing::trace;

/// Handle to a node in the mirror. Ids are assigned by the extension for
/// nodes it reports and by the mirror for nodes created locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The document node. Always present, never removed.
pub const ROOT: NodeId = NodeId(0);

/// Tag used for text nodes in snapshots
pub const TEXT_TAG: &str = "#text";

/// First id handed out for nodes that arrive without one, kept clear of
/// the range the extension assigns from
const LOCAL_ID_BASE: u64 = 1 << 48;

#[derive(Debug, thiserror::Error)]
pub enum DomError {
    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("Node {0} is not an element")]
    NotAnElement(NodeId),

    #[error("Node {0} is not connected to the document")]
    Disconnected(NodeId),

    #[error("Cannot insert {child} under {parent}: would create a cycle")]
    HierarchyRequest { parent: NodeId, child: NodeId },
}

/// Serialized form of a subtree, as sent by the extension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<NodeId>,
    /// Lowercase tag name, or `#text`
    pub tag: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, String>,
    /// Character data, text nodes only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeSnapshot>,
}

impl NodeSnapshot {
    pub fn element(tag: &str) -> Self {
        Self {
            id: None,
            tag: tag.to_ascii_lowercase(),
            attrs: BTreeMap::new(),
            text: None,
            children: Vec::new(),
        }
    }

    pub fn text_node(text: &str) -> Self {
        Self {
            id: None,
            tag: TEXT_TAG.to_string(),
            attrs: BTreeMap::new(),
            text: Some(text.to_string()),
            children: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(NodeId(id));
        self
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    /// Append a text child
    pub fn with_text(mut self, text: &str) -> Self {
        self.children.push(NodeSnapshot::text_node(text));
        self
    }

    pub fn child(mut self, child: NodeSnapshot) -> Self {
        self.children.push(child);
        self
    }

    fn is_text(&self) -> bool {
        self.tag == TEXT_TAG
    }
}

#[derive(Debug, Clone)]
enum NodeData {
    Document,
    Element {
        tag: String,
        attrs: BTreeMap<String, String>,
    },
    Text(String),
}

#[derive(Debug, Clone)]
struct Node {
    data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl Node {
    fn new(data: NodeData) -> Self {
        Self {
            data,
            parent: None,
            children: Vec::new(),
        }
    }
}

struct Tree {
    nodes: HashMap<NodeId, Node>,
    location: String,
    next_id: u64,
    /// Detached roots kept because something below them is observed
    parked: HashSet<NodeId>,
}

/// Side effects of one edit, delivered once the write lock is released
#[derive(Debug, Default)]
struct Changes {
    records: Vec<MutationRecord>,
    /// Roots of the subtrees the edit cut loose
    detached: Vec<NodeId>,
}

impl Tree {
    fn new(location: &str) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(ROOT, Node::new(NodeData::Document));
        Self {
            nodes,
            location: location.to_string(),
            next_id: LOCAL_ID_BASE,
            parked: HashSet::new(),
        }
    }

    fn allocate(&mut self) -> NodeId {
        while self.nodes.contains_key(&NodeId(self.next_id)) {
            self.next_id += 1;
        }
        let id = NodeId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Build a detached subtree from a snapshot. Nodes the snapshot
    /// re-reports are replaced in place and the replacement is recorded.
    fn import(&mut self, snapshot: &NodeSnapshot, changes: &mut Changes) -> NodeId {
        let data = if snapshot.is_text() {
            NodeData::Text(snapshot.text.clone().unwrap_or_default())
        } else {
            NodeData::Element {
                tag: snapshot.tag.to_ascii_lowercase(),
                attrs: snapshot.attrs.clone(),
            }
        };

        let id = match snapshot.id {
            Some(id) if id != ROOT => {
                let replaced = self
                    .nodes
                    .get(&id)
                    .map(|old| replacement_records(id, old, &data, !snapshot.children.is_empty()));
                if let Some(records) = replaced {
                    changes.records.extend(records);
                    if let Some(parent) = self.detach(id) {
                        changes.records.push(MutationRecord::child_list(parent));
                    }
                    changes.detached.extend(self.orphan_children(id));
                }
                id
            }
            _ => self.allocate(),
        };

        let is_text = matches!(data, NodeData::Text(_));
        self.nodes.insert(id, Node::new(data));

        if !is_text {
            for child in &snapshot.children {
                let child_id = self.import(child, changes);
                if let Some(node) = self.nodes.get_mut(&child_id) {
                    node.parent = Some(id);
                }
                if let Some(node) = self.nodes.get_mut(&id) {
                    node.children.push(child_id);
                }
            }
        }

        id
    }

    fn is_element_or_root(&self, id: NodeId) -> bool {
        matches!(
            self.nodes.get(&id).map(|n| &n.data),
            Some(NodeData::Element { .. } | NodeData::Document)
        )
    }

    /// Move `child` under `parent`. A `before` that is not a child of
    /// `parent` appends.
    fn link(
        &mut self,
        parent: NodeId,
        child: NodeId,
        before: Option<NodeId>,
        records: &mut Vec<MutationRecord>,
    ) -> Result<(), DomError> {
        if !self.nodes.contains_key(&child) || child == ROOT {
            return Err(DomError::UnknownNode(child));
        }
        match self.nodes.get(&parent).map(|n| &n.data) {
            None => return Err(DomError::UnknownNode(parent)),
            Some(NodeData::Text(_)) => return Err(DomError::NotAnElement(parent)),
            Some(_) => {}
        }
        if self.is_inclusive_ancestor(child, parent) {
            return Err(DomError::HierarchyRequest { parent, child });
        }

        if let Some(old_parent) = self.detach(child) {
            records.push(MutationRecord::child_list(old_parent));
        }
        if let Some(node) = self.nodes.get_mut(&child) {
            node.parent = Some(parent);
        }
        if let Some(parent_node) = self.nodes.get_mut(&parent) {
            let position = before
                .and_then(|b| parent_node.children.iter().position(|c| *c == b))
                .unwrap_or(parent_node.children.len());
            parent_node.children.insert(position, child);
        }
        records.push(MutationRecord::child_list(parent));
        Ok(())
    }

    /// Unlink a node from its parent. Returns the former parent.
    fn detach(&mut self, id: NodeId) -> Option<NodeId> {
        let parent = self.nodes.get_mut(&id)?.parent.take()?;
        if let Some(parent_node) = self.nodes.get_mut(&parent) {
            parent_node.children.retain(|c| *c != id);
        }
        Some(parent)
    }

    /// Unlink every child of `id`, leaving them detached. Returns them.
    fn orphan_children(&mut self, id: NodeId) -> Vec<NodeId> {
        let children = self
            .nodes
            .get_mut(&id)
            .map(|n| std::mem::take(&mut n.children))
            .unwrap_or_default();
        for child in &children {
            if let Some(node) = self.nodes.get_mut(child) {
                node.parent = None;
            }
        }
        children
    }

    /// `id` and everything below it
    fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = vec![id];
        let mut i = 0;
        while i < out.len() {
            if let Some(node) = self.nodes.get(&out[i]) {
                out.extend(node.children.iter().copied());
            }
            i += 1;
        }
        out
    }

    /// Topmost ancestor of a known node
    fn root_of(&self, mut id: NodeId) -> Option<NodeId> {
        self.nodes.get(&id)?;
        while let Some(parent) = self.nodes.get(&id).and_then(|n| n.parent) {
            id = parent;
        }
        Some(id)
    }

    /// Drop the given detached subtrees, parking any that hold a watched
    /// node. Candidates that were re-attached meanwhile are skipped.
    fn sweep(&mut self, candidates: impl IntoIterator<Item = NodeId>, watched: &HashSet<NodeId>) -> usize {
        let mut freed = 0;
        for candidate in candidates {
            match self.nodes.get(&candidate) {
                Some(node) if candidate != ROOT && node.parent.is_none() => {}
                _ => {
                    self.parked.remove(&candidate);
                    continue;
                }
            }
            let subtree = self.subtree(candidate);
            if subtree.iter().any(|id| watched.contains(id)) {
                self.parked.insert(candidate);
                continue;
            }
            self.parked.remove(&candidate);
            for id in &subtree {
                self.nodes.remove(id);
            }
            freed += subtree.len();
        }
        freed
    }

    /// Drop every node neither reachable from the document nor sharing a
    /// detached subtree with a watched node
    fn prune_detached(&mut self, watched: &HashSet<NodeId>) -> usize {
        let mut reachable = HashSet::with_capacity(self.nodes.len());
        let mut stack = vec![ROOT];
        stack.extend(watched.iter().filter_map(|id| self.root_of(*id)));
        while let Some(id) = stack.pop() {
            if reachable.insert(id) {
                if let Some(node) = self.nodes.get(&id) {
                    stack.extend(node.children.iter().copied());
                }
            }
        }
        let before = self.nodes.len();
        self.nodes.retain(|id, _| reachable.contains(id));
        let nodes = &self.nodes;
        self.parked.retain(|id| nodes.get(id).map_or(false, |n| n.parent.is_none()));
        before - self.nodes.len()
    }

    fn is_inclusive_ancestor(&self, ancestor: NodeId, mut node: NodeId) -> bool {
        loop {
            if node == ancestor {
                return true;
            }
            match self.nodes.get(&node).and_then(|n| n.parent) {
                Some(parent) => node = parent,
                None => return false,
            }
        }
    }
}

/// Records describing how re-reporting `id` changes the stored copy
fn replacement_records(id: NodeId, old: &Node, new: &NodeData, has_children: bool) -> Vec<MutationRecord> {
    let mut records = Vec::new();
    let mut structural = has_children || !old.children.is_empty();
    match (&old.data, new) {
        (NodeData::Element { attrs: before, .. }, NodeData::Element { attrs: after, .. }) => {
            let names: BTreeSet<&String> = before.keys().chain(after.keys()).collect();
            for name in names {
                if before.get(name) != after.get(name) {
                    records.push(MutationRecord {
                        target: id,
                        kind: MutationKind::Attributes { name: name.clone() },
                    });
                }
            }
        }
        (NodeData::Text(before), NodeData::Text(after)) => {
            if before != after {
                records.push(MutationRecord {
                    target: id,
                    kind: MutationKind::CharacterData,
                });
            }
        }
        _ => structural = true,
    }
    if structural {
        records.push(MutationRecord::child_list(id));
    }
    records
}

/// What kind of change a record describes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationKind {
    ChildList,
    Attributes { name: String },
    CharacterData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    pub target: NodeId,
    pub kind: MutationKind,
}

impl MutationRecord {
    fn child_list(target: NodeId) -> Self {
        Self {
            target,
            kind: MutationKind::ChildList,
        }
    }
}

/// Which changes an observer wants to hear about
#[derive(Debug, Clone, Default)]
pub struct ObserveOptions {
    pub child_list: bool,
    pub attributes: bool,
    pub character_data: bool,
    pub subtree: bool,
    /// Only these attribute names, when set
    pub attribute_filter: Option<Vec<String>>,
}

impl ObserveOptions {
    /// Structural changes anywhere below the target
    pub fn structure() -> Self {
        Self {
            child_list: true,
            subtree: true,
            ..Self::default()
        }
    }

    fn wants(&self, kind: &MutationKind) -> bool {
        match kind {
            MutationKind::ChildList => self.child_list,
            MutationKind::CharacterData => self.character_data,
            MutationKind::Attributes { name } => {
                self.attributes
                    && self
                        .attribute_filter
                        .as_ref()
                        .map_or(true, |filter| filter.iter().any(|f| f == name))
            }
        }
    }
}

struct ObserverSlot {
    id: u64,
    target: NodeId,
    options: ObserveOptions,
    tx: mpsc::UnboundedSender<MutationRecord>,
}

/// Live subscription to mutations. Dropping it disconnects.
pub struct MutationObserver {
    id: u64,
    target: NodeId,
    document: Weak<Document>,
    rx: mpsc::UnboundedReceiver<MutationRecord>,
}

impl MutationObserver {
    /// Wait for the next record. `None` once the document is gone.
    pub async fn next(&mut self) -> Option<MutationRecord> {
        self.rx.recv().await
    }

    /// Non-blocking variant of [`next`](Self::next)
    pub fn try_next(&mut self) -> Option<MutationRecord> {
        self.rx.try_recv().ok()
    }

    pub fn target(&self) -> NodeId {
        self.target
    }
}

impl Drop for MutationObserver {
    fn drop(&mut self) {
        if let Some(document) = self.document.upgrade() {
            document.disconnect(self.id);
        }
    }
}

/// The mirrored document
pub struct Document {
    tree: RwLock<Tree>,
    observers: Mutex<Vec<ObserverSlot>>,
    next_observer: AtomicU64,
}

impl Document {
    /// Empty document at the given location
    pub fn new(location: &str) -> Arc<Self> {
        Arc::new(Self {
            tree: RwLock::new(Tree::new(location)),
            observers: Mutex::new(Vec::new()),
            next_observer: AtomicU64::new(1),
        })
    }

    /// Read-only view. Do not hold it across an `.await`.
    pub fn view(&self) -> DocumentView<'_> {
        DocumentView {
            tree: self.tree.read().unwrap_or_else(PoisonError::into_inner),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tree> {
        self.tree.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn slots(&self) -> MutexGuard<'_, Vec<ObserverSlot>> {
        self.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Targets of every live observer
    fn watched(&self) -> HashSet<NodeId> {
        self.slots().iter().map(|slot| slot.target).collect()
    }

    /// Free what `changes` cut loose, then notify observers
    fn settle(&self, mut tree: RwLockWriteGuard<'_, Tree>, changes: Changes, watched: &HashSet<NodeId>) {
        let freed = tree.sweep(changes.detached, watched);
        if freed > 0 {
            trace!("Freed {} detached nodes", freed);
        }
        drop(tree);
        self.dispatch(changes.records);
    }

    /// Replace the whole page, e.g. after a full navigation
    pub fn load(&self, location: &str, root: &NodeSnapshot) -> NodeId {
        let watched = self.watched();
        let mut changes = Changes::default();
        let id = {
            let mut tree = self.write();
            tree.orphan_children(ROOT);
            tree.location = location.to_string();
            let id = tree.import(root, &mut changes);
            if let Some(node) = tree.nodes.get_mut(&id) {
                node.parent = Some(ROOT);
            }
            if let Some(node) = tree.nodes.get_mut(&ROOT) {
                node.children.push(id);
            }
            let pruned = tree.prune_detached(&watched);
            trace!("Loaded {}, pruned {} detached nodes", location, pruned);
            id
        };
        changes.records.push(MutationRecord::child_list(ROOT));
        self.dispatch(changes.records);
        id
    }

    pub fn set_location(&self, location: &str) {
        self.write().location = location.to_string();
    }

    /// Create a detached subtree
    pub fn create(&self, snapshot: &NodeSnapshot) -> NodeId {
        let watched = self.watched();
        let mut changes = Changes::default();
        let mut tree = self.write();
        let id = tree.import(snapshot, &mut changes);
        self.settle(tree, changes, &watched);
        id
    }

    /// Create a subtree and insert it under `parent`, before `before` if given
    pub fn insert(
        &self,
        parent: NodeId,
        before: Option<NodeId>,
        snapshot: &NodeSnapshot,
    ) -> Result<NodeId, DomError> {
        let watched = self.watched();
        let mut changes = Changes::default();
        let mut tree = self.write();
        if !tree.is_element_or_root(parent) {
            return Err(DomError::NotAnElement(parent));
        }
        let id = tree.import(snapshot, &mut changes);
        let linked = tree.link(parent, id, before, &mut changes.records);
        if linked.is_err() {
            changes.detached.push(id);
        }
        self.settle(tree, changes, &watched);
        linked.map(|()| id)
    }

    pub fn append_child(&self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        self.insert_before(parent, child, None)
    }

    /// Move `child` under `parent`. A `before` that is not a child of
    /// `parent` appends.
    pub fn insert_before(
        &self,
        parent: NodeId,
        child: NodeId,
        before: Option<NodeId>,
    ) -> Result<(), DomError> {
        let mut records = Vec::with_capacity(2);
        self.write().link(parent, child, before, &mut records)?;
        self.dispatch(records);
        Ok(())
    }

    /// Unlink a node from the tree. The subtree is freed unless an
    /// observer still watches a node in it, in which case it stays
    /// readable (but disconnected) until the last such observer goes.
    pub fn remove(&self, id: NodeId) -> Result<(), DomError> {
        if id == ROOT {
            return Err(DomError::HierarchyRequest { parent: ROOT, child: ROOT });
        }
        let watched = self.watched();
        let mut changes = Changes::default();
        let mut tree = self.write();
        if !tree.nodes.contains_key(&id) {
            return Err(DomError::UnknownNode(id));
        }
        if let Some(parent) = tree.detach(id) {
            changes.records.push(MutationRecord::child_list(parent));
        }
        changes.detached.push(id);
        self.settle(tree, changes, &watched);
        Ok(())
    }

    /// Set or (with `None`) remove an attribute
    pub fn set_attribute(&self, id: NodeId, name: &str, value: Option<&str>) -> Result<(), DomError> {
        let name = name.to_ascii_lowercase();
        {
            let mut tree = self.write();
            match tree.nodes.get_mut(&id).map(|n| &mut n.data) {
                Some(NodeData::Element { attrs, .. }) => match value {
                    Some(v) => {
                        attrs.insert(name.clone(), v.to_string());
                    }
                    None => {
                        attrs.remove(&name);
                    }
                },
                Some(_) => return Err(DomError::NotAnElement(id)),
                None => return Err(DomError::UnknownNode(id)),
            }
        }
        self.dispatch(vec![MutationRecord {
            target: id,
            kind: MutationKind::Attributes { name },
        }]);
        Ok(())
    }

    pub fn remove_attribute(&self, id: NodeId, name: &str) -> Result<(), DomError> {
        self.set_attribute(id, name, None)
    }

    /// Update character data of a text node, or replace an element's
    /// children with a single text node
    pub fn set_text(&self, id: NodeId, text: &str) -> Result<(), DomError> {
        let watched = self.watched();
        let mut changes = Changes::default();
        let mut tree = self.write();
        let is_element = match tree.nodes.get_mut(&id).map(|n| &mut n.data) {
            Some(NodeData::Text(data)) => {
                *data = text.to_string();
                false
            }
            Some(NodeData::Element { .. }) => true,
            Some(NodeData::Document) => return Err(DomError::NotAnElement(id)),
            None => return Err(DomError::UnknownNode(id)),
        };

        if is_element {
            changes.detached = tree.orphan_children(id);
            let text_id = tree.import(&NodeSnapshot::text_node(text), &mut changes);
            if let Some(node) = tree.nodes.get_mut(&text_id) {
                node.parent = Some(id);
            }
            if let Some(node) = tree.nodes.get_mut(&id) {
                node.children.push(text_id);
            }
            changes.records.push(MutationRecord::child_list(id));
        } else {
            changes.records.push(MutationRecord {
                target: id,
                kind: MutationKind::CharacterData,
            });
        }
        self.settle(tree, changes, &watched);
        Ok(())
    }

    /// Subscribe to mutations on `target` (and below it, with `subtree`)
    pub fn observe(
        self: &Arc<Self>,
        target: NodeId,
        options: ObserveOptions,
    ) -> Result<MutationObserver, DomError> {
        if !self.view().contains(target) {
            return Err(DomError::UnknownNode(target));
        }
        let id = self.next_observer.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.slots().push(ObserverSlot {
            id,
            target,
            options,
            tx,
        });
        trace!("Observer {} attached to {}", id, target);

        Ok(MutationObserver {
            id,
            target,
            document: Arc::downgrade(self),
            rx,
        })
    }

    fn disconnect(&self, observer_id: u64) {
        let watched = {
            let mut slots = self.slots();
            slots.retain(|slot| slot.id != observer_id);
            slots.iter().map(|slot| slot.target).collect::<HashSet<_>>()
        };
        trace!("Observer {} disconnected", observer_id);

        // Subtrees parked for this observer can go now. Skipped when the
        // tree is busy; the next sweep or load picks them up.
        if let Ok(mut tree) = self.tree.try_write() {
            let parked: Vec<NodeId> = tree.parked.drain().collect();
            let freed = tree.sweep(parked, &watched);
            if freed > 0 {
                trace!("Freed {} parked nodes", freed);
            }
        }
    }

    /// Number of nodes held, attached or not
    pub fn node_count(&self) -> usize {
        self.view().tree.nodes.len()
    }

    /// Number of live observers
    pub fn observer_count(&self) -> usize {
        self.slots().len()
    }

    fn dispatch(&self, records: Vec<MutationRecord>) {
        let mut slots = self.slots();
        if slots.is_empty() {
            return;
        }
        let tree = self.tree.read().unwrap_or_else(PoisonError::into_inner);

        slots.retain(|slot| {
            for record in &records {
                let in_scope = slot.target == record.target
                    || (slot.options.subtree && tree.is_inclusive_ancestor(slot.target, record.target));
                if in_scope && slot.options.wants(&record.kind) && slot.tx.send(record.clone()).is_err() {
                    return false;
                }
            }
            true
        });
    }
}

/// Read-only access to the tree
pub struct DocumentView<'a> {
    tree: RwLockReadGuard<'a, Tree>,
}

impl<'a> DocumentView<'a> {
    pub fn location(&self) -> &str {
        &self.tree.location
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.tree.nodes.contains_key(&id)
    }

    /// Whether the node is reachable from the document root
    pub fn is_connected(&self, id: NodeId) -> bool {
        self.contains(id) && self.tree.is_inclusive_ancestor(ROOT, id)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.tree.nodes.get(&id)?.parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.tree
            .nodes
            .get(&id)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    /// Tag name of an element node
    pub fn tag(&self, id: NodeId) -> Option<&str> {
        match &self.tree.nodes.get(&id)?.data {
            NodeData::Element { tag, .. } => Some(tag.as_str()),
            _ => None,
        }
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        self.tag(id).is_some()
    }

    pub fn attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        match &self.tree.nodes.get(&id)?.data {
            NodeData::Element { attrs, .. } => attrs.get(name).map(String::as_str),
            _ => None,
        }
    }

    pub fn has_class(&self, id: NodeId, class: &str) -> bool {
        self.attribute(id, "class")
            .map_or(false, |classes| classes.split_whitespace().any(|c| c == class))
    }

    /// Concatenated character data of every descendant text node
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        match self.tree.nodes.get(&id).map(|n| &n.data) {
            Some(NodeData::Text(text)) => out.push_str(text),
            Some(_) => {
                for node in self.descendants(id) {
                    if let Some(NodeData::Text(text)) = self.tree.nodes.get(&node).map(|n| &n.data) {
                        out.push_str(text);
                    }
                }
            }
            None => {}
        }
        out
    }

    /// Descendants in document order, excluding `id`
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(self.children(node).iter().rev().copied());
        }
        out
    }

    /// First descendant element (document order) matching `pred`
    pub fn find_descendant<F>(&self, id: NodeId, pred: F) -> Option<NodeId>
    where
        F: Fn(&Self, NodeId) -> bool,
    {
        self.descendants(id)
            .into_iter()
            .find(|node| self.is_element(*node) && pred(self, *node))
    }

    /// Proper ancestors, nearest first, excluding the document node
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut current = self.parent(id);
        while let Some(node) = current {
            if node == ROOT {
                break;
            }
            out.push(node);
            current = self.parent(node);
        }
        out
    }

    /// Nearest inclusive ancestor element matching `pred`
    pub fn closest<F>(&self, id: NodeId, pred: F) -> Option<NodeId>
    where
        F: Fn(&Self, NodeId) -> bool,
    {
        let mut current = Some(id);
        while let Some(node) = current {
            if self.is_element(node) && pred(self, node) {
                return Some(node);
            }
            current = self.parent(node);
        }
        None
    }
}
