//! Fragment tree.
//!
//! Nodes live in an arena owned by [`Tree`] and reference their children by
//! [`NodeIndex`]. A child index is always smaller than its parent's index and
//! every node except the root has exactly one parent, so a forward pass over
//! the arena visits children before parents.

use alloc::vec::Vec;
use core::fmt;

use bitcoin::PublicKey;
use bitcoin::hashes::{hash160, ripemd160, sha256, sha256d};

use crate::limits::{self, LimitsError};

// AST Visitor

pub trait ASTVisitor<T> {
    type Error;

    fn visit_node(&mut self, tree: &Tree, index: NodeIndex) -> Result<T, Self::Error>;

    #[inline]
    fn visit(&mut self, tree: &Tree) -> Result<T, Self::Error> {
        self.visit_node(tree, tree.root())
    }
}

pub type NodeIndex = u16;

/// Largest absolute or relative locktime value a timelock fragment accepts.
pub const MAX_TIMELOCK: u32 = 0x7FFF_FFFF;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    // Basic Fragments
    /// 0
    False,
    /// 1
    True,

    // Key Fragments
    /// pk_k(key)
    PkK { key: PublicKey },
    /// pk_h(key)
    PkH { key: PublicKey },

    // Time fragments
    /// older(n)
    Older { n: u32 },
    /// after(n)
    After { n: u32 },

    // Hash Fragments
    /// sha256(h)
    Sha256 { h: sha256::Hash },
    /// hash256(h)
    Hash256 { h: sha256d::Hash },
    /// ripemd160(h)
    Ripemd160 { h: ripemd160::Hash },
    /// hash160(h)
    Hash160 { h: hash160::Hash },

    // Logical Fragments
    /// andor(X,Y,Z)
    AndOr {
        x: NodeIndex,
        y: NodeIndex,
        z: NodeIndex,
    },
    /// and_v(X,Y)
    AndV { x: NodeIndex, y: NodeIndex },
    /// and_b(X,Y)
    AndB { x: NodeIndex, y: NodeIndex },
    /// and_n(X,Y) = andor(X,Y,0)
    AndN { x: NodeIndex, y: NodeIndex },
    /// or_b(X,Z)
    OrB { x: NodeIndex, z: NodeIndex },
    /// or_c(X,Z)
    OrC { x: NodeIndex, z: NodeIndex },
    /// or_d(X,Z)
    OrD { x: NodeIndex, z: NodeIndex },
    /// or_i(X,Z)
    OrI { x: NodeIndex, z: NodeIndex },

    // Threshold Fragments
    /// thresh(k,X1,...,Xn)
    Thresh { k: usize, xs: Vec<NodeIndex> },
    /// multi(k,key1,...,keyn)
    Multi { k: usize, keys: Vec<PublicKey> },

    /// Single-child wrapper, e.g. `v:X`
    Wrap { wrapper: Wrapper, x: NodeIndex },
}

impl Fragment {
    /// Miniscript name of the fragment, as used in diagnostics.
    pub const fn name(&self) -> &'static str {
        match self {
            Fragment::False => "0",
            Fragment::True => "1",
            Fragment::PkK { .. } => "pk_k",
            Fragment::PkH { .. } => "pk_h",
            Fragment::Older { .. } => "older",
            Fragment::After { .. } => "after",
            Fragment::Sha256 { .. } => "sha256",
            Fragment::Hash256 { .. } => "hash256",
            Fragment::Ripemd160 { .. } => "ripemd160",
            Fragment::Hash160 { .. } => "hash160",
            Fragment::AndOr { .. } => "andor",
            Fragment::AndV { .. } => "and_v",
            Fragment::AndB { .. } => "and_b",
            Fragment::AndN { .. } => "and_n",
            Fragment::OrB { .. } => "or_b",
            Fragment::OrC { .. } => "or_c",
            Fragment::OrD { .. } => "or_d",
            Fragment::OrI { .. } => "or_i",
            Fragment::Thresh { .. } => "thresh",
            Fragment::Multi { .. } => "multi",
            Fragment::Wrap { wrapper, .. } => wrapper.name(),
        }
    }

    /// Iterate over the child node indices, in argument order.
    pub fn children(&self) -> Children<'_> {
        match self {
            Fragment::AndOr { x, y, z } => Children::inline(&[*x, *y, *z]),
            Fragment::AndV { x, y }
            | Fragment::AndB { x, y }
            | Fragment::AndN { x, y } => Children::inline(&[*x, *y]),
            Fragment::OrB { x, z }
            | Fragment::OrC { x, z }
            | Fragment::OrD { x, z }
            | Fragment::OrI { x, z } => Children::inline(&[*x, *z]),
            Fragment::Wrap { x, .. } => Children::inline(&[*x]),
            Fragment::Thresh { xs, .. } => Children::Slice(xs.iter()),
            _ => Children::inline(&[]),
        }
    }
}

/// Iterator over a fragment's children.
pub enum Children<'a> {
    Inline {
        nodes: [NodeIndex; 3],
        len: usize,
        next: usize,
    },
    Slice(core::slice::Iter<'a, NodeIndex>),
}

impl Children<'_> {
    fn inline(children: &[NodeIndex]) -> Self {
        let mut nodes = [0; 3];
        nodes[..children.len()].copy_from_slice(children);
        Children::Inline {
            nodes,
            len: children.len(),
            next: 0,
        }
    }
}

impl Iterator for Children<'_> {
    type Item = NodeIndex;

    fn next(&mut self) -> Option<NodeIndex> {
        match self {
            Children::Inline { nodes, len, next } => {
                if *next < *len {
                    *next += 1;
                    Some(nodes[*next - 1])
                } else {
                    None
                }
            }
            Children::Slice(iter) => iter.next().copied(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Wrapper {
    /// a:X = TOALTSTACK X FROMALTSTACK
    A,
    /// s:X = SWAP X
    S,
    /// c:X = X CHECKSIG
    C,
    /// d:X = DUP IF X ENDIF
    D,
    /// v:X = X VERIFY
    V,
    /// j:X = SIZE 0NOTEQUAL IF X ENDIF
    J,
    /// n:X = X 0NOTEQUAL
    N,
    /// t:X = and_v(X,1)
    T,
    /// l:X = or_i(0,X)
    L,
    /// u:X = or_i(X,0)
    U,
}

impl Wrapper {
    pub const fn as_char(self) -> char {
        match self {
            Wrapper::A => 'a',
            Wrapper::S => 's',
            Wrapper::C => 'c',
            Wrapper::D => 'd',
            Wrapper::V => 'v',
            Wrapper::J => 'j',
            Wrapper::N => 'n',
            Wrapper::T => 't',
            Wrapper::L => 'l',
            Wrapper::U => 'u',
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Wrapper::A => "a:",
            Wrapper::S => "s:",
            Wrapper::C => "c:",
            Wrapper::D => "d:",
            Wrapper::V => "v:",
            Wrapper::J => "j:",
            Wrapper::N => "n:",
            Wrapper::T => "t:",
            Wrapper::L => "l:",
            Wrapper::U => "u:",
        }
    }
}

/// Child positions from the root down to a node.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodePath(Vec<usize>);

impl NodePath {
    pub fn positions(&self) -> &[usize] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("/");
        }
        for position in &self.0 {
            write!(f, "/{}", position)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("tree has no nodes")]
    Empty,
    #[error("tree has {count} nodes, more than a node index can address")]
    TooManyNodes { count: usize },
    #[error("node {parent} references node {child}, which was not built before it")]
    ForwardReference { parent: usize, child: NodeIndex },
    #[error("node {node} is used as a child more than once")]
    SharedNode { node: NodeIndex },
    #[error("node {node} is not reachable from the root")]
    Orphan { node: usize },
    #[error("node {node}: threshold k={k} is outside 1..={n}")]
    InvalidThreshold { node: usize, k: usize, n: usize },
    #[error("node {node}: timelock {n} is outside 1..={max}", max = MAX_TIMELOCK)]
    InvalidTimelock { node: usize, n: u32 },
    #[error("node {node}: uncompressed public key")]
    UncompressedKey { node: usize },
    #[error(transparent)]
    Limits(#[from] LimitsError),
}

/// An immutable, structurally valid fragment tree. The root is the last node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tree {
    nodes: Vec<Fragment>,
    parents: Vec<Option<NodeIndex>>,
    height: usize,
}

impl Tree {
    #[inline]
    pub fn root(&self) -> NodeIndex {
        (self.nodes.len() - 1) as NodeIndex
    }

    #[inline]
    pub fn node(&self, index: NodeIndex) -> &Fragment {
        &self.nodes[usize::from(index)]
    }

    /// All nodes, children before parents.
    #[inline]
    pub fn nodes(&self) -> &[Fragment] {
        &self.nodes[..]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of nodes on the longest root-to-leaf path.
    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn parent(&self, index: NodeIndex) -> Option<NodeIndex> {
        self.parents[usize::from(index)]
    }

    pub fn path(&self, index: NodeIndex) -> NodePath {
        let mut positions = Vec::new();
        let mut current = index;
        while let Some(parent) = self.parent(current) {
            let position = self
                .node(parent)
                .children()
                .position(|child| child == current)
                .unwrap_or_default();
            positions.push(position);
            current = parent;
        }
        positions.reverse();
        NodePath(positions)
    }

    /// Iterate over all the keys.
    pub fn iterate_keys(&self, mut callback: impl FnMut(&PublicKey)) {
        self.nodes.iter().for_each(|node| match node {
            Fragment::PkK { key } | Fragment::PkH { key } => callback(key),
            Fragment::Multi { keys, .. } => keys.iter().for_each(&mut callback),
            _ => (),
        });
    }
}

impl fmt::Display for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&crate::utils::serialize::Serializer::new().serialize(self)?)
    }
}

/// Incrementally builds a [`Tree`]. Each method pushes one node and returns its
/// index; the node pushed last becomes the root.
#[derive(Debug, Default, Clone)]
pub struct TreeBuilder {
    nodes: Vec<Fragment>,
}

impl TreeBuilder {
    #[inline]
    pub const fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    #[inline]
    pub fn push(&mut self, fragment: Fragment) -> NodeIndex {
        let index = self.nodes.len() as NodeIndex;
        self.nodes.push(fragment);
        index
    }

    pub fn zero(&mut self) -> NodeIndex {
        self.push(Fragment::False)
    }

    pub fn one(&mut self) -> NodeIndex {
        self.push(Fragment::True)
    }

    pub fn pk_k(&mut self, key: PublicKey) -> NodeIndex {
        self.push(Fragment::PkK { key })
    }

    pub fn pk_h(&mut self, key: PublicKey) -> NodeIndex {
        self.push(Fragment::PkH { key })
    }

    /// pk(key) = c:pk_k(key)
    pub fn pk(&mut self, key: PublicKey) -> NodeIndex {
        let x = self.pk_k(key);
        self.c(x)
    }

    /// pkh(key) = c:pk_h(key)
    pub fn pkh(&mut self, key: PublicKey) -> NodeIndex {
        let x = self.pk_h(key);
        self.c(x)
    }

    pub fn older(&mut self, n: u32) -> NodeIndex {
        self.push(Fragment::Older { n })
    }

    pub fn after(&mut self, n: u32) -> NodeIndex {
        self.push(Fragment::After { n })
    }

    pub fn sha256(&mut self, h: sha256::Hash) -> NodeIndex {
        self.push(Fragment::Sha256 { h })
    }

    pub fn hash256(&mut self, h: sha256d::Hash) -> NodeIndex {
        self.push(Fragment::Hash256 { h })
    }

    pub fn ripemd160(&mut self, h: ripemd160::Hash) -> NodeIndex {
        self.push(Fragment::Ripemd160 { h })
    }

    pub fn hash160(&mut self, h: hash160::Hash) -> NodeIndex {
        self.push(Fragment::Hash160 { h })
    }

    pub fn and_or(&mut self, x: NodeIndex, y: NodeIndex, z: NodeIndex) -> NodeIndex {
        self.push(Fragment::AndOr { x, y, z })
    }

    pub fn and_v(&mut self, x: NodeIndex, y: NodeIndex) -> NodeIndex {
        self.push(Fragment::AndV { x, y })
    }

    pub fn and_b(&mut self, x: NodeIndex, y: NodeIndex) -> NodeIndex {
        self.push(Fragment::AndB { x, y })
    }

    pub fn and_n(&mut self, x: NodeIndex, y: NodeIndex) -> NodeIndex {
        self.push(Fragment::AndN { x, y })
    }

    pub fn or_b(&mut self, x: NodeIndex, z: NodeIndex) -> NodeIndex {
        self.push(Fragment::OrB { x, z })
    }

    pub fn or_c(&mut self, x: NodeIndex, z: NodeIndex) -> NodeIndex {
        self.push(Fragment::OrC { x, z })
    }

    pub fn or_d(&mut self, x: NodeIndex, z: NodeIndex) -> NodeIndex {
        self.push(Fragment::OrD { x, z })
    }

    pub fn or_i(&mut self, x: NodeIndex, z: NodeIndex) -> NodeIndex {
        self.push(Fragment::OrI { x, z })
    }

    pub fn thresh(&mut self, k: usize, xs: Vec<NodeIndex>) -> NodeIndex {
        self.push(Fragment::Thresh { k, xs })
    }

    pub fn multi(&mut self, k: usize, keys: Vec<PublicKey>) -> NodeIndex {
        self.push(Fragment::Multi { k, keys })
    }

    pub fn wrap(&mut self, wrapper: Wrapper, x: NodeIndex) -> NodeIndex {
        self.push(Fragment::Wrap { wrapper, x })
    }

    pub fn a(&mut self, x: NodeIndex) -> NodeIndex {
        self.wrap(Wrapper::A, x)
    }

    pub fn s(&mut self, x: NodeIndex) -> NodeIndex {
        self.wrap(Wrapper::S, x)
    }

    pub fn c(&mut self, x: NodeIndex) -> NodeIndex {
        self.wrap(Wrapper::C, x)
    }

    pub fn d(&mut self, x: NodeIndex) -> NodeIndex {
        self.wrap(Wrapper::D, x)
    }

    pub fn v(&mut self, x: NodeIndex) -> NodeIndex {
        self.wrap(Wrapper::V, x)
    }

    pub fn j(&mut self, x: NodeIndex) -> NodeIndex {
        self.wrap(Wrapper::J, x)
    }

    pub fn n(&mut self, x: NodeIndex) -> NodeIndex {
        self.wrap(Wrapper::N, x)
    }

    pub fn t(&mut self, x: NodeIndex) -> NodeIndex {
        self.wrap(Wrapper::T, x)
    }

    pub fn l(&mut self, x: NodeIndex) -> NodeIndex {
        self.wrap(Wrapper::L, x)
    }

    pub fn u(&mut self, x: NodeIndex) -> NodeIndex {
        self.wrap(Wrapper::U, x)
    }

    /// Validate the structure and freeze the tree.
    pub fn build(self) -> Result<Tree, BuildError> {
        let nodes = self.nodes;
        if nodes.is_empty() {
            return Err(BuildError::Empty);
        }
        if nodes.len() > usize::from(NodeIndex::MAX) + 1 {
            return Err(BuildError::TooManyNodes { count: nodes.len() });
        }

        let mut parents: Vec<Option<NodeIndex>> = alloc::vec![None; nodes.len()];
        let mut heights: Vec<usize> = Vec::with_capacity(nodes.len());

        for (index, fragment) in nodes.iter().enumerate() {
            check_parameters(index, fragment)?;

            let mut height = 0;
            for child in fragment.children() {
                let slot = usize::from(child);
                if slot >= index {
                    return Err(BuildError::ForwardReference {
                        parent: index,
                        child,
                    });
                }
                if parents[slot].is_some() {
                    return Err(BuildError::SharedNode { node: child });
                }
                parents[slot] = Some(index as NodeIndex);
                height = height.max(heights[slot]);
            }
            heights.push(height + 1);
        }

        let root = nodes.len() - 1;
        if let Some(orphan) = parents[..root].iter().position(Option::is_none) {
            return Err(BuildError::Orphan { node: orphan });
        }

        let height = heights[root];
        limits::check_recursion_depth(height)?;

        tracing::trace!(nodes = nodes.len(), height, "built fragment tree");

        Ok(Tree {
            nodes,
            parents,
            height,
        })
    }
}

fn check_parameters(index: usize, fragment: &Fragment) -> Result<(), BuildError> {
    match fragment {
        Fragment::Older { n } | Fragment::After { n } => {
            if *n < 1 || *n > MAX_TIMELOCK {
                return Err(BuildError::InvalidTimelock { node: index, n: *n });
            }
        }
        Fragment::PkK { key } | Fragment::PkH { key } => {
            if !key.compressed {
                return Err(BuildError::UncompressedKey { node: index });
            }
        }
        Fragment::Thresh { k, xs } => {
            if *k < 1 || *k > xs.len() {
                return Err(BuildError::InvalidThreshold {
                    node: index,
                    k: *k,
                    n: xs.len(),
                });
            }
        }
        Fragment::Multi { k, keys } => {
            if *k < 1 || *k > keys.len() {
                return Err(BuildError::InvalidThreshold {
                    node: index,
                    k: *k,
                    n: keys.len(),
                });
            }
            if keys.iter().any(|key| !key.compressed) {
                return Err(BuildError::UncompressedKey { node: index });
            }
        }
        _ => (),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::key;

    #[test]
    fn test_build_sets_root_and_parents() {
        let mut b = TreeBuilder::new();
        let k1 = b.pk(key(1));
        let v = b.v(k1);
        let k2 = b.pk(key(2));
        let root = b.and_v(v, k2);
        let tree = b.build().unwrap();

        assert_eq!(tree.root(), root);
        assert_eq!(tree.len(), 6);
        assert_eq!(tree.height(), 4);
        assert_eq!(tree.parent(v), Some(root));
        assert_eq!(tree.parent(root), None);
        assert_eq!(tree.path(0).positions(), &[0, 0, 0]);
        assert_eq!(tree.path(k2).to_string(), "/1");
        assert!(tree.path(root).is_root());
    }

    #[test]
    fn test_children_order() {
        let fragment = Fragment::AndOr { x: 4, y: 1, z: 7 };
        assert_eq!(fragment.children().collect::<Vec<_>>(), [4, 1, 7]);

        let fragment = Fragment::Thresh {
            k: 1,
            xs: alloc::vec![0, 2, 3],
        };
        assert_eq!(fragment.children().collect::<Vec<_>>(), [0, 2, 3]);
        assert_eq!(Fragment::True.children().count(), 0);
    }

    #[test]
    fn test_shared_node_rejected() {
        let mut b = TreeBuilder::new();
        let x = b.pk(key(1));
        let v = b.v(x);
        b.and_v(v, x);
        assert!(matches!(b.build(), Err(BuildError::SharedNode { .. })));
    }

    #[test]
    fn test_orphan_rejected() {
        let mut b = TreeBuilder::new();
        // c:pk_k(1) at index 1 is left without a parent
        b.pk(key(1));
        b.pk(key(2));
        assert!(matches!(b.build(), Err(BuildError::Orphan { node: 1 })));

        let mut b = TreeBuilder::new();
        b.pk_k(key(1));
        b.pk(key(2));
        assert!(matches!(b.build(), Err(BuildError::Orphan { node: 0 })));
    }

    #[test]
    fn test_forward_reference_rejected() {
        let mut b = TreeBuilder::new();
        b.push(Fragment::Wrap {
            wrapper: Wrapper::V,
            x: 3,
        });
        assert!(matches!(
            b.build(),
            Err(BuildError::ForwardReference { parent: 0, child: 3 })
        ));
    }

    #[test]
    fn test_parameters_rejected() {
        let mut b = TreeBuilder::new();
        b.older(0);
        assert!(matches!(b.build(), Err(BuildError::InvalidTimelock { .. })));

        let mut b = TreeBuilder::new();
        b.after(0x8000_0000);
        assert!(matches!(b.build(), Err(BuildError::InvalidTimelock { .. })));

        let mut b = TreeBuilder::new();
        b.multi(3, alloc::vec![key(1), key(2)]);
        assert!(matches!(
            b.build(),
            Err(BuildError::InvalidThreshold { k: 3, n: 2, .. })
        ));

        let mut b = TreeBuilder::new();
        b.thresh(0, alloc::vec![]);
        assert!(matches!(b.build(), Err(BuildError::InvalidThreshold { .. })));

        assert_eq!(TreeBuilder::new().build(), Err(BuildError::Empty));
    }

    #[test]
    fn test_recursion_depth_limit() {
        let mut b = TreeBuilder::new();
        let mut x = b.one();
        for _ in 0..limits::MAX_RECURSION_DEPTH {
            x = b.n(x);
        }
        assert!(matches!(
            b.build(),
            Err(BuildError::Limits(LimitsError::MaxRecursiveDepthExceeded { .. }))
        ));
    }

    #[test]
    fn test_iterate_keys() {
        let mut b = TreeBuilder::new();
        let x = b.pk(key(1));
        let z = b.multi(1, alloc::vec![key(2), key(3)]);
        let z = b.a(z);
        b.or_b(x, z);
        let tree = b.build().unwrap();

        let mut keys = Vec::new();
        tree.iterate_keys(|k| keys.push(*k));
        assert_eq!(keys, [key(1), key(2), key(3)]);
    }
}
