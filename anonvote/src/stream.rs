//! Append-only Merkle accumulator over confirmed vote commitments.
//!
//! Each append returns a [`StreamUpdate`] carrying the recomputed path, so a light client that
//! only tracks roots can check that the new root extends the one it already trusts.

use crate::*;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::RwLock;
use tracing::{debug, info, warn};

/// Root of the stream as it stood after `leaf_count` appends.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Checkpoint {
    pub root: Hash256,
    pub leaf_count: usize,
    pub timestamp: DateTime<Utc>,
}

/// Proof that one append turned `previous_root` into `new_root`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct StreamUpdate {
    /// Position of the appended leaf.
    pub index: u64,

    pub leaf: Commitment,

    /// Sibling used at each level, leaf level first.
    pub siblings: Vec<Hash256>,

    /// Recomputed nodes from the leaf node up to the new root.
    pub path: Vec<Hash256>,

    pub previous_root: Hash256,
    pub new_root: Hash256,
}

impl StreamUpdate {
    /// Node hashes recomputed by this append.
    pub fn affected_path(&self) -> &[Hash256] {
        &self.path
    }

    /// Membership proof for the appended leaf against `new_root`.
    pub fn to_proof(&self) -> MerkleProof {
        MerkleProof {
            leaf: self.leaf,
            siblings: self.siblings.clone(),
            path: self.index,
            root: self.new_root,
        }
    }
}

/// Check a stream update against the root the caller already trusts.
///
/// Besides recomputing the new root, this derives the pre-append root from the same siblings, so
/// an update that does not extend `previous_root` is refused even if its own fields agree.
pub fn verify_update(update: &StreamUpdate, previous_root: &Hash256) -> bool {
    if update.previous_root != *previous_root {
        return false;
    }
    if update.path.len() != update.siblings.len() + 1 {
        return false;
    }
    if update.path[0] != hash_leaf(&update.leaf) {
        return false;
    }

    let index = match usize::try_from(update.index) {
        Ok(index) if index < usize::MAX => index,
        _ => return false,
    };
    let depth = depth_for(index + 1);
    if update.siblings.len() != depth {
        return false;
    }
    if depth < MAX_TREE_DEPTH && update.index >> depth != 0 {
        return false;
    }

    for (level, sibling) in update.siblings.iter().enumerate() {
        let current = &update.path[level];
        let parent = if (update.index >> level) & 1 == 0 {
            hash_node(current, sibling)
        } else {
            hash_node(sibling, current)
        };
        if parent != update.path[level + 1] {
            return false;
        }
    }
    if update.path[depth] != update.new_root {
        return false;
    }

    prior_root(index, &update.siblings) == Some(*previous_root)
}

/// Root of the first `index` leaves, rebuilt from the siblings of leaf `index`.
fn prior_root(index: usize, siblings: &[Hash256]) -> Option<Hash256> {
    if index == 0 {
        return Some(Hash256::ZERO);
    }
    let old_depth = depth_for(index);
    if old_depth < siblings.len() {
        // The tree grew a level; the whole previous tree is the left sibling at the old depth
        return siblings.get(old_depth).copied();
    }
    compute_root(&Hash256::ZERO, siblings, index as u64)
}

#[derive(Debug)]
struct StreamState {
    leaves: Vec<Commitment>,
    arena: NodeArena,
    checkpoints: VecDeque<Checkpoint>,
}

/// The confirmed-vote stream.
///
/// Appends take the write lock for O(log n) work; roots, proofs and checkpoints are served under
/// the read lock, so readers never observe a half-applied append. A checkpoint is an O(1) push
/// made by the append that reaches it, in append order, with no second lock.
#[derive(Debug)]
pub struct IncrementalStream {
    config: StreamConfig,
    state: RwLock<StreamState>,
}

impl IncrementalStream {
    pub fn new(config: StreamConfig) -> Result<Self, Error> {
        config.validate()?;
        Ok(IncrementalStream {
            config,
            state: RwLock::new(StreamState {
                leaves: Vec::new(),
                arena: NodeArena::new(),
                checkpoints: VecDeque::new(),
            }),
        })
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn append(&self, leaf: Commitment) -> Result<StreamUpdate, Error> {
        let mut state = write_lock(&self.state);
        self.check_capacity(state.leaves.len(), 1)?;
        Ok(self.push(&mut state, leaf))
    }

    /// Append several leaves as one step: either all are appended or none are.
    pub fn append_batch(&self, leaves: &[Commitment]) -> Result<Vec<StreamUpdate>, Error> {
        let mut state = write_lock(&self.state);
        self.check_capacity(state.leaves.len(), leaves.len())?;
        Ok(leaves
            .iter()
            .map(|leaf| self.push(&mut state, *leaf))
            .collect())
    }

    fn check_capacity(&self, len: usize, adding: usize) -> Result<(), Error> {
        let bound = self.config.capacity();
        let wanted = len as u64 + adding as u64;
        if wanted > bound {
            return Err(Error::IndexOutOfRange {
                index: wanted - 1,
                bound,
            });
        }
        Ok(())
    }

    fn push(&self, state: &mut StreamState, leaf: Commitment) -> StreamUpdate {
        let index = state.leaves.len();
        let previous_root = state.arena.root();

        state.leaves.push(leaf);
        let (siblings, path) = state.arena.push(hash_leaf(&leaf));
        let new_root = state.arena.root();

        let leaf_count = index + 1;
        if leaf_count % self.config.checkpoint_interval == 0 {
            let checkpoints = &mut state.checkpoints;
            checkpoints.push_back(Checkpoint {
                root: new_root,
                leaf_count,
                timestamp: Utc::now(),
            });
            while checkpoints.len() > self.config.checkpoint_history {
                checkpoints.pop_front();
            }
            debug!(leaf_count, root = %new_root, "stream checkpoint");
        }

        StreamUpdate {
            index: index as u64,
            leaf,
            siblings,
            path,
            previous_root,
            new_root,
        }
    }

    pub fn root(&self) -> Hash256 {
        read_lock(&self.state).arena.root()
    }

    pub fn len(&self) -> usize {
        read_lock(&self.state).leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn leaves(&self) -> Vec<Commitment> {
        read_lock(&self.state).leaves.clone()
    }

    pub fn leaf(&self, index: usize) -> Option<Commitment> {
        read_lock(&self.state).leaves.get(index).copied()
    }

    /// Membership proof for leaf `index` against the current root.
    pub fn prove(&self, index: usize) -> Result<MerkleProof, Error> {
        let state = read_lock(&self.state);
        let leaf = state.leaves.get(index).ok_or(Error::IndexOutOfRange {
            index: index as u64,
            bound: state.leaves.len() as u64,
        })?;
        Ok(MerkleProof {
            leaf: *leaf,
            siblings: state.arena.siblings(index),
            path: index as u64,
            root: state.arena.root(),
        })
    }

    /// Retained checkpoints, oldest first.
    pub fn checkpoints(&self) -> Vec<Checkpoint> {
        read_lock(&self.state).checkpoints.iter().cloned().collect()
    }

    pub fn last_checkpoint(&self) -> Option<Checkpoint> {
        read_lock(&self.state).checkpoints.back().cloned()
    }

    pub fn checkpoint_at(&self, leaf_count: usize) -> Option<Checkpoint> {
        read_lock(&self.state)
            .checkpoints
            .iter()
            .find(|c| c.leaf_count == leaf_count)
            .cloned()
    }

    /// Discard every leaf appended after a retained checkpoint.
    ///
    /// Checkpoints newer than the target are dropped with the leaves.
    pub fn rollback(&self, checkpoint: &Checkpoint) -> Result<(), Error> {
        let mut state = write_lock(&self.state);

        let retained = state
            .checkpoints
            .iter()
            .any(|c| c.leaf_count == checkpoint.leaf_count && c.root == checkpoint.root);
        if !retained || checkpoint.leaf_count > state.leaves.len() {
            return Err(Error::UnknownCheckpoint(checkpoint.leaf_count));
        }

        let mut leaves = state.leaves.clone();
        leaves.truncate(checkpoint.leaf_count);
        let arena = NodeArena::from_leaf_nodes(leaves.iter().map(hash_leaf).collect());
        if arena.root() != checkpoint.root {
            warn!(leaf_count = checkpoint.leaf_count, "checkpoint root does not match stream prefix");
            return Err(Error::CorruptSnapshot(format!(
                "checkpoint at {} leaves does not match the stream",
                checkpoint.leaf_count
            )));
        }

        let discarded = state.leaves.len() - checkpoint.leaf_count;
        state.leaves = leaves;
        state.arena = arena;
        state
            .checkpoints
            .retain(|c| c.leaf_count <= checkpoint.leaf_count);

        info!(
            leaf_count = checkpoint.leaf_count,
            discarded,
            root = %checkpoint.root,
            "stream rolled back"
        );
        Ok(())
    }
}

/// Read-only handle on a stream whose appends belong to someone else: roots, proofs and
/// checkpoints, but no append or rollback.
#[derive(Clone, Copy, Debug)]
pub struct StreamView<'a> {
    stream: &'a IncrementalStream,
}

impl<'a> From<&'a IncrementalStream> for StreamView<'a> {
    fn from(stream: &'a IncrementalStream) -> Self {
        StreamView { stream }
    }
}

impl<'a> StreamView<'a> {
    pub fn config(&self) -> &'a StreamConfig {
        self.stream.config()
    }

    pub fn root(&self) -> Hash256 {
        self.stream.root()
    }

    pub fn len(&self) -> usize {
        self.stream.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stream.is_empty()
    }

    pub fn leaves(&self) -> Vec<Commitment> {
        self.stream.leaves()
    }

    pub fn leaf(&self, index: usize) -> Option<Commitment> {
        self.stream.leaf(index)
    }

    pub fn prove(&self, index: usize) -> Result<MerkleProof, Error> {
        self.stream.prove(index)
    }

    pub fn checkpoints(&self) -> Vec<Checkpoint> {
        self.stream.checkpoints()
    }

    pub fn last_checkpoint(&self) -> Option<Checkpoint> {
        self.stream.last_checkpoint()
    }

    pub fn checkpoint_at(&self, leaf_count: usize) -> Option<Checkpoint> {
        self.stream.checkpoint_at(leaf_count)
    }
}

/// Persisted form of the confirmed-vote stream.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct StreamSnapshot {
    pub config: StreamConfig,
    pub leaves: Vec<Commitment>,
    pub root: Hash256,
    pub checkpoints: Vec<Checkpoint>,
}

impl Snapshot for IncrementalStream {
    type Image = StreamSnapshot;

    fn export(&self) -> StreamSnapshot {
        let state = read_lock(&self.state);
        StreamSnapshot {
            config: self.config.clone(),
            leaves: state.leaves.clone(),
            root: state.arena.root(),
            checkpoints: state.checkpoints.iter().cloned().collect(),
        }
    }

    /// Replays the leaves, checking every recorded checkpoint on the way.
    fn import(image: StreamSnapshot) -> Result<Self, Error> {
        image.config.validate()?;
        if image.leaves.len() as u64 > image.config.capacity() {
            return Err(Error::CorruptSnapshot("stream exceeds its capacity".into()));
        }

        let mut expected = image.checkpoints.iter().peekable();
        let mut arena = NodeArena::new();
        if let Some(c) = expected.peek() {
            if c.leaf_count == 0 {
                return Err(Error::CorruptSnapshot("checkpoint at 0 leaves".into()));
            }
        }
        for leaf in &image.leaves {
            arena.push(hash_leaf(leaf));
            while let Some(c) = expected.peek() {
                if c.leaf_count != arena.len() {
                    break;
                }
                if c.root != arena.root() {
                    return Err(Error::CorruptSnapshot(format!(
                        "checkpoint at {} leaves does not match the stream",
                        c.leaf_count
                    )));
                }
                expected.next();
            }
        }
        if expected.next().is_some() {
            return Err(Error::CorruptSnapshot(
                "checkpoints out of order or beyond the stream".into(),
            ));
        }
        if arena.root() != image.root {
            warn!(expected = %image.root, found = %arena.root(), "refusing stream import");
            return Err(Error::CorruptSnapshot("stream root mismatch".into()));
        }

        Ok(IncrementalStream {
            config: image.config,
            state: RwLock::new(StreamState {
                leaves: image.leaves,
                arena,
                checkpoints: image.checkpoints.into_iter().collect(),
            }),
        })
    }
}
