//! Static Merkle registry over voter commitments.
//!
//! Node rule (shared with the sparse tree and the incremental stream):
//!
//! - a leaf commitment `c` becomes the level-0 node `H(0x00 ‖ c)`,
//! - an interior node is `H(0x01 ‖ left ‖ right)`,
//! - a missing right child at level `l` is the all-zero sentinel subtree hash `Z[l]`, where
//!   `Z[0]` is 32 zero bytes and `Z[l+1] = H(0x01 ‖ Z[l] ‖ Z[l])`.
//!
//! A tree of `n` leaves has depth `ceil(log2(n))`; a single leaf is its own root.

use crate::*;
use std::collections::HashMap;

/// Path masks are `u64`, so no tree is deeper than this.
pub const MAX_TREE_DEPTH: usize = 64;

/// Sentinel subtree hashes `Z[0..=depth]`.
pub(crate) fn zero_hashes(depth: usize) -> Vec<Hash256> {
    let mut zeros = Vec::with_capacity(depth + 1);
    zeros.push(Hash256::ZERO);
    for level in 0..depth {
        let below = zeros[level];
        zeros.push(hash_node(&below, &below));
    }
    zeros
}

/// Depth of a tree holding `len` leaves.
pub(crate) fn depth_for(len: usize) -> usize {
    if len <= 1 {
        0
    } else {
        (usize::BITS - (len - 1).leading_zeros()) as usize
    }
}

/// Per-level node hashes indexed by (level, position).
///
/// Level 0 holds leaf nodes; level `depth_for(len)` holds the single root. Only the nodes that
/// exist are stored; everything to the right of them is a sentinel.
#[derive(Clone, Debug)]
pub(crate) struct NodeArena {
    levels: Vec<Vec<Hash256>>,
    zeros: Vec<Hash256>,
}

impl NodeArena {
    pub(crate) fn new() -> Self {
        NodeArena {
            levels: vec![vec![]],
            zeros: zero_hashes(MAX_TREE_DEPTH),
        }
    }

    /// Build all levels at once from leaf nodes in O(n).
    pub(crate) fn from_leaf_nodes(nodes: Vec<Hash256>) -> Self {
        let mut arena = NodeArena::new();
        let depth = depth_for(nodes.len());
        arena.levels[0] = nodes;

        for level in 0..depth {
            let zero = arena.zeros[level];
            let next: Vec<Hash256> = arena.levels[level]
                .chunks(2)
                .map(|pair| hash_node(&pair[0], pair.get(1).unwrap_or(&zero)))
                .collect();
            arena.levels.push(next);
        }
        arena
    }

    pub(crate) fn len(&self) -> usize {
        self.levels[0].len()
    }

    pub(crate) fn depth(&self) -> usize {
        depth_for(self.len())
    }

    pub(crate) fn node(&self, level: usize, position: usize) -> Hash256 {
        self.levels
            .get(level)
            .and_then(|nodes| nodes.get(position))
            .copied()
            .unwrap_or(self.zeros[level])
    }

    fn set(&mut self, level: usize, position: usize, hash: Hash256) {
        if self.levels.len() <= level {
            self.levels.resize_with(level + 1, Vec::new);
        }
        let nodes = &mut self.levels[level];
        if position == nodes.len() {
            nodes.push(hash);
        } else {
            nodes[position] = hash;
        }
    }

    pub(crate) fn root(&self) -> Hash256 {
        if self.len() == 0 {
            return Hash256::ZERO;
        }
        self.node(self.depth(), 0)
    }

    /// Append one leaf node and recompute only its path.
    ///
    /// Returns `(siblings, path)`: the sibling used at each level and the recomputed node hashes
    /// from the leaf node up to the new root.
    pub(crate) fn push(&mut self, leaf_node: Hash256) -> (Vec<Hash256>, Vec<Hash256>) {
        let index = self.len();
        self.levels[0].push(leaf_node);
        let depth = depth_for(index + 1);

        let mut siblings = Vec::with_capacity(depth);
        let mut path = Vec::with_capacity(depth + 1);
        path.push(leaf_node);

        let mut position = index;
        let mut current = leaf_node;
        for level in 0..depth {
            let sibling = self.node(level, position ^ 1);
            let parent = if position & 1 == 0 {
                hash_node(&current, &sibling)
            } else {
                hash_node(&sibling, &current)
            };
            position >>= 1;
            self.set(level + 1, position, parent);
            siblings.push(sibling);
            path.push(parent);
            current = parent;
        }
        (siblings, path)
    }

    pub(crate) fn siblings(&self, index: usize) -> Vec<Hash256> {
        let depth = self.depth();
        let mut siblings = Vec::with_capacity(depth);
        let mut position = index;
        for level in 0..depth {
            siblings.push(self.node(level, position ^ 1));
            position >>= 1;
        }
        siblings
    }
}

/// Membership proof for one leaf.
///
/// Bit `i` of `path` is set when the running node is the right child at level `i`; for trees
/// built here it is the leaf index.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct MerkleProof {
    pub leaf: Commitment,
    pub siblings: Vec<Hash256>,
    pub path: u64,
    pub root: Hash256,
}

impl MerkleProof {
    /// Recompute the root from the leaf and siblings, or `None` if the proof is malformed.
    pub fn compute_root(&self) -> Option<Hash256> {
        compute_root(&hash_leaf(&self.leaf), &self.siblings, self.path)
    }

    /// Verify against the root claimed in the proof.
    pub fn verify(&self) -> bool {
        self.compute_root() == Some(self.root)
    }

    /// Verify against a root obtained out of band (e.g. the published registry root).
    pub fn verify_against(&self, root: &Hash256) -> bool {
        self.root == *root && self.verify()
    }

    pub fn index(&self) -> u64 {
        self.path
    }
}

/// Fold a node up through its siblings using the path bits.
pub(crate) fn compute_root(node: &Hash256, siblings: &[Hash256], path: u64) -> Option<Hash256> {
    if siblings.len() > MAX_TREE_DEPTH {
        return None;
    }
    // Bits above the proof depth would address a different leaf
    if siblings.len() < MAX_TREE_DEPTH && path >> siblings.len() != 0 {
        return None;
    }

    let mut current = *node;
    for (level, sibling) in siblings.iter().enumerate() {
        current = if (path >> level) & 1 == 0 {
            hash_node(&current, sibling)
        } else {
            hash_node(sibling, &current)
        };
    }
    Some(current)
}

/// Verify a membership proof against its claimed root.
pub fn verify_membership(proof: &MerkleProof) -> bool {
    proof.verify()
}

/// Build the published registry: leaves are sorted first, so any ordering of the same multiset
/// of commitments produces the same root.
pub fn build_registry(leaves: Vec<Commitment>) -> MerkleTree {
    let mut leaves = leaves;
    leaves.sort_unstable();
    MerkleTree::from_ordered(leaves)
}

/// An immutable Merkle tree. Once built it is only read, so it can be shared across threads
/// behind an `Arc` without locking.
#[derive(Clone, Debug)]
pub struct MerkleTree {
    leaves: Vec<Commitment>,
    arena: NodeArena,
    positions: HashMap<Commitment, usize>,
}

impl MerkleTree {
    /// Build with leaves in the given positions (no canonicalization).
    pub fn from_ordered(leaves: Vec<Commitment>) -> Self {
        let arena = NodeArena::from_leaf_nodes(leaves.iter().map(hash_leaf).collect());

        let mut positions = HashMap::with_capacity(leaves.len());
        for (index, leaf) in leaves.iter().enumerate() {
            // Duplicates resolve to their first position
            positions.entry(*leaf).or_insert(index);
        }

        MerkleTree {
            leaves,
            arena,
            positions,
        }
    }

    pub fn root(&self) -> Hash256 {
        self.arena.root()
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.arena.depth()
    }

    pub fn leaves(&self) -> &[Commitment] {
        &self.leaves
    }

    pub fn leaf(&self, index: usize) -> Option<&Commitment> {
        self.leaves.get(index)
    }

    /// Position of a commitment in the tree.
    pub fn position(&self, leaf: &Commitment) -> Option<usize> {
        self.positions.get(leaf).copied()
    }

    pub fn contains(&self, leaf: &Commitment) -> bool {
        self.positions.contains_key(leaf)
    }

    pub fn prove_membership(&self, index: usize) -> Result<MerkleProof, Error> {
        let leaf = self.leaves.get(index).ok_or(Error::IndexOutOfRange {
            index: index as u64,
            bound: self.leaves.len() as u64,
        })?;

        Ok(MerkleProof {
            leaf: *leaf,
            siblings: self.arena.siblings(index),
            path: index as u64,
            root: self.root(),
        })
    }

    /// Proof for a commitment, if it is in the tree.
    pub fn prove_commitment(&self, leaf: &Commitment) -> Option<MerkleProof> {
        let index = self.position(leaf)?;
        self.prove_membership(index).ok()
    }
}
