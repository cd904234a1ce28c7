//! Casting a vote: a request moves `Registered → ProofPending → Accepted | Rejected`.

use crate::*;
use tracing::debug;
use uuid::Uuid;

/// Values an eligibility proof is bound to.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PublicInputs {
    pub registry_root: Hash256,
    pub nullifier: Nullifier,
    pub vote_commitment: Commitment,
    pub election_id: Uuid,
}

impl PublicInputs {
    /// Canonical encoding: root ‖ nullifier ‖ vote commitment ‖ election id.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(3 * HASH_LEN + ELECTION_ID_LEN);
        bytes.extend_from_slice(self.registry_root.as_ref());
        bytes.extend_from_slice(self.nullifier.as_ref());
        bytes.extend_from_slice(self.vote_commitment.as_ref());
        bytes.extend_from_slice(self.election_id.as_bytes());
        bytes
    }
}

/// External check that the voter knows the secret behind a registered commitment and that the
/// nullifier and vote commitment were derived from it. The proof system itself lives outside
/// this crate.
pub trait EligibilityVerifier: Send + Sync {
    fn verify(&self, proof: &[u8], inputs: &PublicInputs) -> bool;
}

/// A voter's request to cast one vote.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CastRequest {
    pub election_id: Uuid,
    pub membership: MerkleProof,
    pub nullifier: Nullifier,
    pub vote_commitment: Commitment,

    #[serde(with = "hex_serde")]
    pub eligibility_proof: Vec<u8>,
}

impl CastRequest {
    /// Build a request from the voter's secret and their vote opening. The eligibility proof is
    /// attached separately with `with_proof`.
    pub fn new(
        election_id: Uuid,
        secret: &VoterSecret,
        membership: MerkleProof,
        opening: &VoteOpening,
    ) -> Self {
        CastRequest {
            election_id,
            membership,
            nullifier: secret.nullifier(&election_id),
            vote_commitment: opening.commitment(),
            eligibility_proof: vec![],
        }
    }

    pub fn with_proof(mut self, proof: Vec<u8>) -> Self {
        self.eligibility_proof = proof;
        self
    }

    /// Public inputs as the voter sees them (against the root their membership proof claims).
    pub fn public_inputs(&self) -> PublicInputs {
        PublicInputs {
            registry_root: self.membership.root,
            nullifier: self.nullifier,
            vote_commitment: self.vote_commitment,
            election_id: self.election_id,
        }
    }
}

/// Returned to the voter once their vote is recorded.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct VoteReceipt {
    pub election_id: Uuid,
    pub nullifier: Nullifier,
    pub vote_commitment: Commitment,

    /// Position of the vote commitment in the confirmed-vote stream.
    pub position: u64,

    /// Stream root right after this vote was appended.
    pub votes_root: Hash256,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum CastState {
    Registered,
    ProofPending,
    Accepted(VoteReceipt),
    Rejected(ValidationError),
}

impl CastState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CastState::Accepted(_) | CastState::Rejected(_))
    }
}

/// One cast in progress against an election.
pub struct Cast<'e> {
    election: &'e ElectionContext,
    request: CastRequest,
    state: CastState,
}

impl<'e> Cast<'e> {
    /// Admit a request: it must be addressed to this election, arrive while voting is open, and
    /// carry a membership proof against the published registry root.
    pub(crate) fn new(election: &'e ElectionContext, request: CastRequest) -> Self {
        let state = match admit(election, &request) {
            Ok(()) => CastState::Registered,
            Err(reason) => CastState::Rejected(reason),
        };
        Cast {
            election,
            request,
            state,
        }
    }

    pub fn state(&self) -> &CastState {
        &self.state
    }

    pub fn request(&self) -> &CastRequest {
        &self.request
    }

    /// Take one transition. Terminal states do not move.
    pub fn advance(&mut self) -> &CastState {
        let next = match &self.state {
            CastState::Registered => Some(CastState::ProofPending),
            CastState::ProofPending => Some(match self.finish() {
                Ok(receipt) => CastState::Accepted(receipt),
                Err(reason) => CastState::Rejected(reason),
            }),
            CastState::Accepted(_) | CastState::Rejected(_) => None,
        };
        if let Some(next) = next {
            debug!(election = %self.election.id(), state = ?next, "cast advanced");
            self.state = next;
        }
        &self.state
    }

    /// Drive the cast to a terminal state.
    pub fn run(mut self) -> Result<VoteReceipt, ValidationError> {
        loop {
            match self.advance() {
                CastState::Accepted(receipt) => return Ok(receipt.clone()),
                CastState::Rejected(reason) => return Err(reason.clone()),
                CastState::Registered | CastState::ProofPending => {}
            }
        }
    }

    fn finish(&self) -> Result<VoteReceipt, ValidationError> {
        let election = self.election;
        let inputs = PublicInputs {
            registry_root: election.registry_root(),
            nullifier: self.request.nullifier,
            vote_commitment: self.request.vote_commitment,
            election_id: election.id(),
        };
        if !election
            .verifier()
            .verify(&self.request.eligibility_proof, &inputs)
        {
            return Err(ValidationError::InvalidEligibilityProof);
        }

        // The vote is appended while the nullifier set is locked, so a nullifier is recorded
        // if and only if its vote made it into the stream.
        election
            .nullifier_set()
            .insert_then(self.request.nullifier, || {
                let update = election
                    .vote_stream()
                    .append(self.request.vote_commitment)
                    .map_err(|_| ValidationError::VoteStreamFull)?;
                Ok(VoteReceipt {
                    election_id: election.id(),
                    nullifier: self.request.nullifier,
                    vote_commitment: self.request.vote_commitment,
                    position: update.index,
                    votes_root: update.new_root,
                })
            })
    }
}

fn admit(election: &ElectionContext, request: &CastRequest) -> Result<(), ValidationError> {
    if request.election_id != election.id() {
        return Err(ValidationError::ElectionMismatch);
    }
    if election.is_closed() {
        return Err(ValidationError::ElectionClosed);
    }
    if !request.membership.verify_against(&election.registry_root()) {
        return Err(ValidationError::InvalidMembershipProof);
    }
    Ok(())
}

/// Accepts a proof equal to SHA-256 of the public inputs. Stands in for a real proof system.
#[cfg(test)]
pub(crate) struct DigestVerifier;

#[cfg(test)]
impl DigestVerifier {
    pub(crate) fn prove(inputs: &PublicInputs) -> Vec<u8> {
        use digest::Digest;
        sha2::Sha256::digest(&inputs.to_bytes()).to_vec()
    }
}

#[cfg(test)]
impl EligibilityVerifier for DigestVerifier {
    fn verify(&self, proof: &[u8], inputs: &PublicInputs) -> bool {
        proof == DigestVerifier::prove(inputs).as_slice()
    }
}
