use crate::*;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// A fixed-depth Merkle tree addressed by voter slot.
///
/// Only occupied leaves and the interior nodes above them are stored, keyed by
/// `(level, position)`; anything absent is the sentinel subtree hash for its level. Storage is
/// proportional to the number of occupied slots times the depth, so the slot universe can be far
/// larger than the electorate.
#[derive(Clone, Debug)]
pub struct SparseMerkleTree {
    depth: usize,
    zeros: Vec<Hash256>,
    nodes: HashMap<(usize, u64), Hash256>,
    leaves: BTreeMap<u64, Commitment>,
    slots: HashMap<Commitment, BTreeSet<u64>>,
}

impl SparseMerkleTree {
    pub fn new(depth: usize) -> Result<Self, Error> {
        if depth == 0 || depth > MAX_TREE_DEPTH {
            return Err(Error::Config(format!(
                "sparse tree depth must be between 1 and {}, got {}",
                MAX_TREE_DEPTH, depth
            )));
        }
        Ok(SparseMerkleTree {
            depth,
            zeros: zero_hashes(depth),
            nodes: HashMap::new(),
            leaves: BTreeMap::new(),
            slots: HashMap::new(),
        })
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Number of addressable slots, or `None` when it is 2^64.
    pub fn capacity(&self) -> Option<u64> {
        1u64.checked_shl(self.depth as u32)
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    pub fn root(&self) -> Hash256 {
        self.node(self.depth, 0)
    }

    fn node(&self, level: usize, position: u64) -> Hash256 {
        self.nodes
            .get(&(level, position))
            .copied()
            .unwrap_or(self.zeros[level])
    }

    fn check_slot(&self, slot: u64) -> Result<(), Error> {
        match self.capacity() {
            Some(bound) if slot >= bound => Err(Error::IndexOutOfRange { index: slot, bound }),
            _ => Ok(()),
        }
    }

    /// Place a commitment in a slot, replacing whatever was there. Returns the new root.
    pub fn insert(&mut self, slot: u64, leaf: Commitment) -> Result<Hash256, Error> {
        self.check_slot(slot)?;

        if let Some(previous) = self.leaves.insert(slot, leaf) {
            if let Some(held) = self.slots.get_mut(&previous) {
                held.remove(&slot);
                if held.is_empty() {
                    self.slots.remove(&previous);
                }
            }
        }
        self.slots.entry(leaf).or_default().insert(slot);

        let mut current = hash_leaf(&leaf);
        let mut position = slot;
        self.nodes.insert((0, position), current);

        for level in 0..self.depth {
            let sibling = self.node(level, position ^ 1);
            current = if position & 1 == 0 {
                hash_node(&current, &sibling)
            } else {
                hash_node(&sibling, &current)
            };
            position >>= 1;
            self.nodes.insert((level + 1, position), current);
        }

        Ok(current)
    }

    pub fn get(&self, slot: u64) -> Option<&Commitment> {
        self.leaves.get(&slot)
    }

    /// Lowest slot holding a commitment.
    pub fn slot_of(&self, leaf: &Commitment) -> Option<u64> {
        self.slots.get(leaf).and_then(|held| held.iter().next().copied())
    }

    /// Membership proof for an occupied slot; `Ok(None)` for an empty one.
    pub fn prove(&self, slot: u64) -> Result<Option<MerkleProof>, Error> {
        self.check_slot(slot)?;
        let leaf = match self.leaves.get(&slot) {
            Some(leaf) => *leaf,
            None => return Ok(None),
        };

        let mut siblings = Vec::with_capacity(self.depth);
        let mut position = slot;
        for level in 0..self.depth {
            siblings.push(self.node(level, position ^ 1));
            position >>= 1;
        }

        Ok(Some(MerkleProof {
            leaf,
            siblings,
            path: slot,
            root: self.root(),
        }))
    }

    /// Occupied slots in ascending order.
    pub fn occupied(&self) -> impl Iterator<Item = (&u64, &Commitment)> {
        self.leaves.iter()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}
