use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::stream::Stream;

/// Id of the per-connection root node. It owns no stream.
pub const ROOT: u32 = 0;

#[derive(Debug, Default)]
struct Node {
    stream: Option<Arc<Stream>>,
    parent: Option<u32>,
    child: Option<u32>,
    peer: Option<u32>,
}

struct Tree {
    nodes: HashMap<u32, Node>,
    next_id: u32,
}

impl Tree {
    fn node(&self, id: u32) -> Result<&Node> {
        self.nodes.get(&id).ok_or(Error::UnknownStream(id))
    }

    fn node_mut(&mut self, id: u32) -> Result<&mut Node> {
        self.nodes.get_mut(&id).ok_or(Error::UnknownStream(id))
    }

    fn children(&self, id: u32) -> Vec<u32> {
        let mut out = Vec::new();
        let mut next = self.nodes.get(&id).and_then(|n| n.child);
        while let Some(c) = next {
            out.push(c);
            next = self.nodes.get(&c).and_then(|n| n.peer);
        }
        out
    }

    /// Pushes `id` at the head of `parent`'s child list.
    fn link(&mut self, parent: u32, id: u32) -> Result<()> {
        let first = self.node(parent)?.child;
        let node = self.node_mut(id)?;
        node.parent = Some(parent);
        node.peer = first;
        self.node_mut(parent)?.child = Some(id);
        Ok(())
    }

    /// Detaches `id` from its parent's child list; its own children stay.
    fn unlink(&mut self, id: u32) -> Result<()> {
        let (parent, peer) = {
            let node = self.node(id)?;
            (node.parent, node.peer)
        };
        let Some(parent) = parent else {
            return Ok(());
        };
        if self.node(parent)?.child == Some(id) {
            self.node_mut(parent)?.child = peer;
        } else {
            let mut cursor = self.node(parent)?.child;
            while let Some(c) = cursor {
                let next = self.node(c)?.peer;
                if next == Some(id) {
                    self.node_mut(c)?.peer = peer;
                    break;
                }
                cursor = next;
            }
        }
        let node = self.node_mut(id)?;
        node.parent = None;
        node.peer = None;
        Ok(())
    }

    fn is_descendant(&self, id: u32, ancestor: u32) -> bool {
        let mut cursor = self.nodes.get(&id).and_then(|n| n.parent);
        while let Some(p) = cursor {
            if p == ancestor {
                return true;
            }
            cursor = self.nodes.get(&p).and_then(|n| n.parent);
        }
        false
    }
}

/// Streams of one connection, arranged as a dependency tree.
///
/// The map is the only owner of each stream; tree links are ids. Every
/// operation holds the set's lock for its whole duration and never calls
/// out while holding it.
pub struct StreamSet {
    tree: Mutex<Tree>,
}

impl StreamSet {
    /// `first_id` is the first identifier `assign_stream_id` hands out.
    pub fn new(first_id: u32) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(ROOT, Node::default());
        Self {
            tree: Mutex::new(Tree {
                nodes,
                next_id: first_id,
            }),
        }
    }

    /// Returns the next identifier and advances the counter by `addend`.
    pub fn assign_stream_id(&self, addend: u32) -> u32 {
        let mut tree = self.tree.lock();
        let id = tree.next_id;
        tree.next_id = tree.next_id.wrapping_add(addend);
        id
    }

    pub fn get_stream(&self, id: u32) -> Option<Arc<Stream>> {
        self.tree.lock().nodes.get(&id).and_then(|n| n.stream.clone())
    }

    /// Maps `stream` under `parent`.
    pub fn insert(&self, parent: u32, stream: Arc<Stream>) -> Result<()> {
        let id = stream.id();
        let mut tree = self.tree.lock();
        if tree.nodes.contains_key(&id) {
            return Err(Error::DuplicateStream(id));
        }
        tree.node(parent)?;
        tree.nodes.insert(
            id,
            Node {
                stream: Some(stream),
                ..Node::default()
            },
        );
        tree.link(parent, id)
    }

    /// Unmaps a stream. Its children move up to its parent.
    pub fn remove(&self, id: u32) -> Option<Arc<Stream>> {
        if id == ROOT {
            return None;
        }
        let mut tree = self.tree.lock();
        let parent = tree.nodes.get(&id)?.parent.unwrap_or(ROOT);
        for child in tree.children(id) {
            if tree.unlink(child).is_ok() {
                let _ = tree.link(parent, child);
            }
        }
        let _ = tree.unlink(id);
        tree.nodes.remove(&id).and_then(|n| n.stream)
    }

    /// Moves `id` under `new_parent`.
    ///
    /// If `new_parent` currently depends on `id`, it is first moved to
    /// `id`'s former parent so no cycle forms.
    pub fn change(&self, new_parent: u32, id: u32) -> Result<()> {
        if id == ROOT || id == new_parent {
            return Err(Error::InvalidArgument(format!(
                "stream {id} cannot depend on {new_parent}"
            )));
        }
        let mut tree = self.tree.lock();
        tree.node(new_parent)?;
        let old_parent = tree.node(id)?.parent.unwrap_or(ROOT);
        if tree.is_descendant(new_parent, id) {
            tree.unlink(new_parent)?;
            tree.link(old_parent, new_parent)?;
        }
        tree.unlink(id)?;
        tree.link(new_parent, id)
    }

    pub fn parent(&self, id: u32) -> Option<u32> {
        self.tree.lock().nodes.get(&id).and_then(|n| n.parent)
    }

    /// Child ids, most recently linked first.
    pub fn children(&self, id: u32) -> Vec<u32> {
        self.tree.lock().children(id)
    }

    /// Number of mapped streams, root excluded.
    pub fn len(&self) -> usize {
        self.tree.lock().nodes.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every mapped stream.
    pub fn streams(&self) -> Vec<Arc<Stream>> {
        self.tree
            .lock()
            .nodes
            .values()
            .filter_map(|n| n.stream.clone())
            .collect()
    }
}
