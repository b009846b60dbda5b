//! Sample tree: a prefix tree of stack traces with cumulative sample counts.

use serde::{Deserialize, Serialize};

use std::fmt;

use crate::DecodeErrorKind;

/// Byte separating frames in the wire form of a stack-trace key.
pub const FRAME_SEPARATOR: u8 = b';';

/// An ordered sequence of frames, outermost first, kept in its wire form
/// (frames joined by `;`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StackKey(Vec<u8>);

impl StackKey {
    /// Validates a raw `;`-joined key. Keys without frames or with an empty
    /// frame are rejected.
    pub fn parse(raw: &[u8]) -> Result<Self, DecodeErrorKind> {
        if raw.is_empty() {
            return Err(DecodeErrorKind::EmptyKey);
        }
        if raw.split(|b| *b == FRAME_SEPARATOR).any(<[u8]>::is_empty) {
            return Err(DecodeErrorKind::EmptyFrame);
        }
        Ok(Self(raw.to_vec()))
    }

    pub fn frames(&self) -> impl Iterator<Item = &[u8]> {
        self.0.split(|b| *b == FRAME_SEPARATOR)
    }

    pub fn depth(&self) -> usize {
        self.frames().count()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for StackKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

/// One frame of the tree. `total` covers the node and its whole subtree,
/// `self_count` only the samples whose stack ends at this frame.
///
/// Stacks can be arbitrarily deep, so every whole-subtree walk here (clone,
/// compare, merge, drop, export) runs on a heap work list, never the call
/// stack.
#[derive(Default)]
pub struct Node {
    name: Box<[u8]>,
    self_count: u64,
    total: u64,
    children: Vec<Node>,
}

impl Node {
    fn new(name: &[u8]) -> Self {
        Self {
            name: name.into(),
            self_count: 0,
            total: 0,
            children: Vec::new(),
        }
    }

    pub fn name(&self) -> &[u8] {
        &self.name
    }

    pub fn self_count(&self) -> u64 {
        self.self_count
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Children sorted by frame name.
    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub fn child(&self, name: &[u8]) -> Option<&Node> {
        self.children
            .binary_search_by(|c| c.name.as_ref().cmp(name))
            .ok()
            .map(|idx| &self.children[idx])
    }

    fn child_or_insert(&mut self, name: &[u8]) -> &mut Node {
        let idx = match self.children.binary_search_by(|c| c.name.as_ref().cmp(name)) {
            Ok(idx) => idx,
            Err(idx) => {
                self.children.insert(idx, Node::new(name));
                idx
            }
        };
        &mut self.children[idx]
    }

    fn merge(&mut self, other: Node) {
        let mut work: Vec<(&mut Node, Node)> = vec![(self, other)];
        while let Some((dst, mut src)) = work.pop() {
            dst.self_count = dst.self_count.saturating_add(src.self_count);
            dst.total = dst.total.saturating_add(src.total);

            let mut matched = Vec::new();
            let mut fresh = Vec::new();
            for child in std::mem::take(&mut src.children) {
                if dst.child(&child.name).is_some() {
                    matched.push(child);
                } else {
                    fresh.push(child);
                }
            }
            if !fresh.is_empty() {
                dst.children.append(&mut fresh);
                dst.children.sort_by(|a, b| a.name.cmp(&b.name));
            }

            // Both sides are name-sorted, so one forward scan pairs them.
            let mut slots = dst.children.iter_mut();
            for child in matched {
                if let Some(slot) = slots.by_ref().find(|n| n.name == child.name) {
                    work.push((slot, child));
                }
            }
        }
    }

    fn count_nodes(&self) -> usize {
        let mut count = 0;
        let mut work: Vec<&Node> = self.children.iter().collect();
        while let Some(node) = work.pop() {
            count += 1;
            work.extend(node.children.iter());
        }
        count
    }

    /// Depth-first, name-ordered walk below this node. `visit` receives each
    /// node with the `;`-joined path ending at it.
    fn walk_paths(&self, mut visit: impl FnMut(&Node, &[u8])) {
        let mut path = Vec::new();
        let mut work: Vec<(&Node, usize, usize)> =
            self.children.iter().rev().map(|c| (c, 1, 0)).collect();
        while let Some((node, depth, parent_len)) = work.pop() {
            path.truncate(parent_len);
            if depth > 1 {
                path.push(FRAME_SEPARATOR);
            }
            path.extend_from_slice(&node.name);
            visit(node, &path);
            let len = path.len();
            work.extend(node.children.iter().rev().map(|c| (c, depth + 1, len)));
        }
    }

    fn collect_folded(&self, out: &mut Vec<FoldedStack>) {
        self.walk_paths(|node, path| {
            if node.self_count > 0 {
                out.push(FoldedStack {
                    stack: String::from_utf8_lossy(path).into_owned(),
                    weight: node.self_count,
                });
            }
        });
    }

    /// Pre-order walk including `self` at depth 0.
    pub(crate) fn preorder(&self) -> impl Iterator<Item = (&Node, usize)> {
        let mut work = vec![(self, 0usize)];
        std::iter::from_fn(move || {
            let (node, depth) = work.pop()?;
            work.extend(node.children.iter().rev().map(|c| (c, depth + 1)));
            Some((node, depth))
        })
    }
}

impl Clone for Node {
    fn clone(&self) -> Self {
        struct Pending<'a> {
            src: &'a Node,
            next: usize,
            children: Vec<Node>,
        }
        fn pending(src: &Node) -> Pending<'_> {
            Pending {
                src,
                next: 0,
                children: Vec::with_capacity(src.children.len()),
            }
        }

        let mut stack = vec![pending(self)];
        while let Some(top) = stack.last_mut() {
            let src = top.src;
            if let Some(child) = src.children.get(top.next) {
                top.next += 1;
                stack.push(pending(child));
                continue;
            }
            let Some(done) = stack.pop() else { break };
            let node = Node {
                name: done.src.name.clone(),
                self_count: done.src.self_count,
                total: done.src.total,
                children: done.children,
            };
            match stack.last_mut() {
                Some(parent) => parent.children.push(node),
                None => return node,
            }
        }
        Node::default()
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        let mut work = vec![(self, other)];
        while let Some((a, b)) = work.pop() {
            if a.name != b.name
                || a.self_count != b.self_count
                || a.total != b.total
                || a.children.len() != b.children.len()
            {
                return false;
            }
            work.extend(a.children.iter().zip(&b.children));
        }
        true
    }
}

impl Eq for Node {}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &String::from_utf8_lossy(&self.name))
            .field("self_count", &self.self_count)
            .field("total", &self.total)
            .field("children", &self.children.len())
            .finish()
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        let mut work = std::mem::take(&mut self.children);
        while let Some(mut node) = work.pop() {
            work.append(&mut node.children);
        }
    }
}

/// A collapsed stack line: `frame;frame;frame weight`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoldedStack {
    pub stack: String,
    pub weight: u64,
}

/// Aggregate of one ingestion batch. Insert-only; children stay sorted so two
/// trees holding the same samples compare equal whatever the insert order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tree {
    root: Node,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `count` samples for `key`. Zero counts leave the tree untouched.
    pub fn insert(&mut self, key: &StackKey, count: u64) {
        if count == 0 {
            return;
        }
        let mut node = &mut self.root;
        node.total = node.total.saturating_add(count);
        for frame in key.frames() {
            node = node.child_or_insert(frame);
            node.total = node.total.saturating_add(count);
        }
        node.self_count = node.self_count.saturating_add(count);
    }

    pub fn merge(&mut self, other: Tree) {
        self.root.merge(other.root);
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    /// Total samples in the tree.
    pub fn total(&self) -> u64 {
        self.root.total
    }

    pub fn is_empty(&self) -> bool {
        self.root.children.is_empty()
    }

    /// Number of frame nodes, root excluded.
    pub fn node_count(&self) -> usize {
        self.root.count_nodes()
    }

    /// Looks up the node at the end of a frame path.
    pub fn get<I, F>(&self, path: I) -> Option<&Node>
    where
        I: IntoIterator<Item = F>,
        F: AsRef<[u8]>,
    {
        let mut node = &self.root;
        for frame in path {
            node = node.child(frame.as_ref())?;
        }
        Some(node)
    }

    /// Collapsed stacks in depth-first, name-sorted order.
    pub fn folded(&self) -> Vec<FoldedStack> {
        let mut out = Vec::new();
        self.root.collect_folded(&mut out);
        out
    }
}

impl fmt::Display for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in self.folded() {
            writeln!(f, "{} {}", row.stack, row.weight)?;
        }
        Ok(())
    }
}
