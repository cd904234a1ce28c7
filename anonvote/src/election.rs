use crate::*;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// A published voter registry an election can check membership proofs against.
pub trait MembershipRegistry: Send + Sync {
    fn root(&self) -> Hash256;

    /// Membership proof for a registered commitment.
    fn prove(&self, leaf: &Commitment) -> Option<MerkleProof>;

    fn len(&self) -> usize;
}

impl MembershipRegistry for MerkleTree {
    fn root(&self) -> Hash256 {
        MerkleTree::root(self)
    }

    fn prove(&self, leaf: &Commitment) -> Option<MerkleProof> {
        self.prove_commitment(leaf)
    }

    fn len(&self) -> usize {
        MerkleTree::len(self)
    }
}

impl MembershipRegistry for SparseMerkleTree {
    fn root(&self) -> Hash256 {
        SparseMerkleTree::root(self)
    }

    fn prove(&self, leaf: &Commitment) -> Option<MerkleProof> {
        let slot = self.slot_of(leaf)?;
        SparseMerkleTree::prove(self, slot).ok().flatten()
    }

    fn len(&self) -> usize {
        SparseMerkleTree::len(self)
    }
}

/// Everything one election needs to accept votes: the published registry, the nullifier set and
/// the confirmed-vote stream.
///
/// Shared across request handlers behind an `Arc`; all methods take `&self`.
pub struct ElectionContext {
    id: Uuid,
    config: ElectionConfig,
    registry: Arc<dyn MembershipRegistry>,
    registry_root: Hash256,
    nullifiers: NullifierSet,
    votes: IncrementalStream,
    verifier: Arc<dyn EligibilityVerifier>,
}

impl ElectionContext {
    pub fn new(
        id: Uuid,
        config: &ElectionConfig,
        registry: Arc<dyn MembershipRegistry>,
        verifier: Arc<dyn EligibilityVerifier>,
    ) -> Result<Self, Error> {
        config.validate()?;
        let registry_root = registry.root();
        info!(election = %id, registry_root = %registry_root, voters = registry.len(), "election opened");
        Ok(ElectionContext {
            id,
            config: config.clone(),
            registry,
            registry_root,
            nullifiers: NullifierSet::new(id),
            votes: IncrementalStream::new(config.votes.clone())?,
            verifier,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &ElectionConfig {
        &self.config
    }

    pub fn threshold(&self) -> u32 {
        self.config.threshold
    }

    pub fn num_authorities(&self) -> u32 {
        self.config.num_authorities
    }

    pub fn registry(&self) -> &dyn MembershipRegistry {
        self.registry.as_ref()
    }

    /// Root the election was opened with.
    pub fn registry_root(&self) -> Hash256 {
        self.registry_root
    }

    /// Nullifiers of accepted votes. Only a cast records one.
    pub fn nullifiers(&self) -> NullifierView<'_> {
        NullifierView::from(&self.nullifiers)
    }

    /// The confirmed-vote stream. Only a cast appends to it, and it is never rolled back, so
    /// every vote in it has its nullifier recorded and every receipt stays auditable.
    pub fn votes(&self) -> StreamView<'_> {
        StreamView::from(&self.votes)
    }

    pub(crate) fn nullifier_set(&self) -> &NullifierSet {
        &self.nullifiers
    }

    pub(crate) fn vote_stream(&self) -> &IncrementalStream {
        &self.votes
    }

    pub(crate) fn verifier(&self) -> &dyn EligibilityVerifier {
        self.verifier.as_ref()
    }

    /// Admit a request and return the cast to be driven step by step.
    pub fn start_cast(&self, request: CastRequest) -> Cast<'_> {
        Cast::new(self, request)
    }

    /// Run a cast to completion.
    pub fn cast(&self, request: CastRequest) -> Result<VoteReceipt, ValidationError> {
        self.start_cast(request).run()
    }

    /// Stop accepting votes.
    pub fn close(&self) {
        self.nullifiers.close();
        info!(election = %self.id, votes = self.votes.len(), votes_root = %self.votes.root(), "election closed");
    }

    pub fn is_closed(&self) -> bool {
        self.nullifiers.is_closed()
    }

    /// Inclusion proof for the vote at `position` against the current stream root.
    pub fn prove_vote(&self, position: u64) -> Result<MerkleProof, Error> {
        let index = position as usize;
        if index as u64 != position {
            return Err(Error::IndexOutOfRange {
                index: position,
                bound: self.votes.len() as u64,
            });
        }
        self.votes.prove(index)
    }

    /// Check that a receipt's vote is in the stream where the receipt says, and that its
    /// nullifier was recorded.
    pub fn audit_vote(&self, receipt: &VoteReceipt) -> bool {
        if receipt.election_id != self.id || !self.nullifiers.contains(&receipt.nullifier) {
            return false;
        }
        match self.prove_vote(receipt.position) {
            Ok(proof) => proof.leaf == receipt.vote_commitment && proof.verify(),
            Err(_) => false,
        }
    }

    /// Threshold decryption of this election's tally among the given authorities.
    pub fn tally_decryption(&self, authorities: Vec<Authority>) -> Result<TallyDecryption, Error> {
        if authorities.len() as u32 != self.config.num_authorities {
            return Err(Error::RosterSizeMismatch {
                expected: self.config.num_authorities,
                found: authorities.len() as u32,
            });
        }
        TallyDecryption::new(self.id, self.config.threshold, authorities)
    }

    pub fn snapshot(&self) -> ElectionSnapshot {
        // Casts append under the nullifier lock, so exporting the stream under it too keeps the
        // two in step
        let (nullifiers, votes) = self.nullifiers.export_then(|| self.votes.export());
        ElectionSnapshot {
            id: self.id,
            config: self.config.clone(),
            registry_root: self.registry_root,
            nullifiers,
            votes,
        }
    }

    /// Rebuild an election from a snapshot, refusing it unless the supplied registry is the one
    /// the snapshot was taken against and the stored parts agree with each other.
    pub fn restore(
        snapshot: ElectionSnapshot,
        registry: Arc<dyn MembershipRegistry>,
        verifier: Arc<dyn EligibilityVerifier>,
    ) -> Result<Self, Error> {
        snapshot.config.validate()?;
        if registry.root() != snapshot.registry_root {
            warn!(election = %snapshot.id, expected = %snapshot.registry_root, found = %registry.root(), "refusing election restore");
            return Err(Error::CorruptSnapshot("registry root mismatch".into()));
        }
        if snapshot.nullifiers.election_id != snapshot.id {
            return Err(Error::CorruptSnapshot("nullifier set belongs to another election".into()));
        }
        if snapshot.votes.config != snapshot.config.votes {
            return Err(Error::CorruptSnapshot("stream settings differ from the election".into()));
        }
        // Every accepted cast records exactly one nullifier and one vote
        if snapshot.nullifiers.count != snapshot.votes.leaves.len() {
            return Err(Error::CorruptSnapshot(format!(
                "{} nullifiers for {} votes",
                snapshot.nullifiers.count,
                snapshot.votes.leaves.len()
            )));
        }

        let nullifiers = NullifierSet::import(snapshot.nullifiers)?;
        let votes = IncrementalStream::import(snapshot.votes)?;
        info!(election = %snapshot.id, votes = votes.len(), "election restored");

        Ok(ElectionContext {
            id: snapshot.id,
            config: snapshot.config,
            registry,
            registry_root: snapshot.registry_root,
            nullifiers,
            votes,
            verifier,
        })
    }
}

/// Persisted state of one election. The registry itself is stored separately and only its root
/// is recorded here.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ElectionSnapshot {
    pub id: Uuid,
    pub config: ElectionConfig,
    pub registry_root: Hash256,
    pub nullifiers: NullifierSnapshot,
    pub votes: StreamSnapshot,
}

impl ElectionSnapshot {
    /// Pack into CBOR bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        Ok(serde_cbor::to_vec(self)?)
    }

    /// Unpack from JSON or CBOR bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        decode_image(bytes)
    }
}
