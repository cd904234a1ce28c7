use crate::*;
use digest::Digest;
use rand::{CryptoRng, RngCore};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::Sha256;
use std::str::FromStr;
use uuid::Uuid;

pub const HASH_LEN: usize = 32;
pub const SECRET_LEN: usize = 32;
pub const CHOICE_LEN: usize = 32;
pub const RANDOMNESS_LEN: usize = 32;
pub const ELECTION_ID_LEN: usize = 16;

const VOTER_COMMITMENT_TAG: &[u8] = b"anonvote/voter-commitment/v1";
const VOTE_COMMITMENT_TAG: &[u8] = b"anonvote/vote-commitment/v1";
const NULLIFIER_TAG: &[u8] = b"anonvote/nullifier/v1";

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

/// A 256-bit digest: commitments, nullifiers and tree roots are all one of these.
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash256(pub [u8; HASH_LEN]);

/// Published digest of a hidden value.
pub type Commitment = Hash256;

/// Per-election tag that detects a reused voter secret.
pub type Nullifier = Hash256;

impl Hash256 {
    /// The all-zero value, used as the empty-leaf sentinel.
    pub const ZERO: Hash256 = Hash256([0; HASH_LEN]);

    /// Parse from a byte slice that must be exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, Error> {
        check_len(bytes, HASH_LEN)?;
        // OK to unwrap - length checked above
        Ok(Hash256(bytes.try_into().unwrap()))
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; HASH_LEN]> for Hash256 {
    fn from(bytes: [u8; HASH_LEN]) -> Self {
        Hash256(bytes)
    }
}

impl From<Hash256> for [u8; HASH_LEN] {
    fn from(hash: Hash256) -> Self {
        hash.0
    }
}

impl FromStr for Hash256 {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        Hash256::from_slice(&bytes)
    }
}

impl std::fmt::Display for Hash256 {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl std::fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Hash256({})", self.to_hex())
    }
}

impl Serialize for Hash256 {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Hash256::from_str(&s).map_err(de::Error::custom)
    }
}

fn check_len(input: &[u8], expected: usize) -> Result<(), Error> {
    if input.len() != expected {
        return Err(Error::InvalidInputLength {
            expected,
            found: input.len(),
        });
    }
    Ok(())
}

/// SHA-256 over a domain tag followed by the given parts.
pub(crate) fn tagged_hash(tag: &[u8], parts: &[&[u8]]) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update(tag);
    for part in parts {
        hasher.update(part);
    }
    Hash256(hasher.finalize().into())
}

/// Commit to a 32-byte value (typically a vote choice) under 32 bytes of private randomness.
pub fn commit(value: &[u8], randomness: &[u8]) -> Result<Commitment, Error> {
    check_len(value, CHOICE_LEN)?;
    check_len(randomness, RANDOMNESS_LEN)?;
    Ok(tagged_hash(VOTE_COMMITMENT_TAG, &[value, randomness]))
}

/// Derive the nullifier of a voter secret for one election.
///
/// Deterministic by construction: the same secret and election always produce the same value,
/// which is what lets the nullifier set catch a second attempt.
pub fn nullifier(secret: &[u8], election_id: &[u8]) -> Result<Nullifier, Error> {
    check_len(secret, SECRET_LEN)?;
    check_len(election_id, ELECTION_ID_LEN)?;
    Ok(tagged_hash(NULLIFIER_TAG, &[secret, election_id]))
}

/// The registry entry published for a voter secret.
pub fn voter_commitment(secret: &[u8]) -> Result<Commitment, Error> {
    check_len(secret, SECRET_LEN)?;
    Ok(tagged_hash(VOTER_COMMITMENT_TAG, &[secret]))
}

/// Level-0 node for a registry leaf.
pub(crate) fn hash_leaf(leaf: &Commitment) -> Hash256 {
    tagged_hash(&[LEAF_PREFIX], &[leaf.as_ref()])
}

/// Interior node. Order matters: `left` is the even position.
pub(crate) fn hash_node(left: &Hash256, right: &Hash256) -> Hash256 {
    tagged_hash(&[NODE_PREFIX], &[left.as_ref(), right.as_ref()])
}

/// A voter's long-term secret seed.
#[derive(Clone, PartialEq, Eq)]
pub struct VoterSecret([u8; SECRET_LEN]);

impl VoterSecret {
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut seed = [0u8; SECRET_LEN];
        rng.fill_bytes(&mut seed);
        VoterSecret(seed)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        check_len(bytes, SECRET_LEN)?;
        // OK to unwrap - length checked above
        Ok(VoterSecret(bytes.try_into().unwrap()))
    }

    pub fn as_bytes(&self) -> &[u8; SECRET_LEN] {
        &self.0
    }

    pub fn commitment(&self) -> Commitment {
        tagged_hash(VOTER_COMMITMENT_TAG, &[&self.0])
    }

    pub fn nullifier(&self, election_id: &Uuid) -> Nullifier {
        tagged_hash(NULLIFIER_TAG, &[&self.0, election_id.as_bytes()])
    }
}

impl std::fmt::Debug for VoterSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "VoterSecret(..)")
    }
}

/// The private opening of a vote commitment.
#[derive(Clone, PartialEq, Eq)]
pub struct VoteOpening {
    pub choice: [u8; CHOICE_LEN],
    pub randomness: [u8; RANDOMNESS_LEN],
}

impl VoteOpening {
    pub fn new<R: RngCore + CryptoRng>(choice: [u8; CHOICE_LEN], rng: &mut R) -> Self {
        let mut randomness = [0u8; RANDOMNESS_LEN];
        rng.fill_bytes(&mut randomness);
        VoteOpening { choice, randomness }
    }

    /// Choice encoded as a big-endian option number in the last four bytes.
    pub fn for_option<R: RngCore + CryptoRng>(option: u32, rng: &mut R) -> Self {
        let mut choice = [0u8; CHOICE_LEN];
        choice[CHOICE_LEN - 4..].copy_from_slice(&option.to_be_bytes());
        VoteOpening::new(choice, rng)
    }

    pub fn commitment(&self) -> Commitment {
        tagged_hash(VOTE_COMMITMENT_TAG, &[&self.choice, &self.randomness])
    }

    pub fn opens(&self, commitment: &Commitment) -> bool {
        self.commitment() == *commitment
    }
}

impl std::fmt::Debug for VoteOpening {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "VoteOpening {{ choice: {}, .. }}", hex::encode(self.choice))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::rand_core::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn test_commit_hiding() {
        let value = [7u8; 32];
        let c1 = commit(&value, &[1u8; 32]).unwrap();
        let c2 = commit(&value, &[2u8; 32]).unwrap();
        assert_ne!(c1, c2);

        // Same inputs, same commitment
        assert_eq!(c1, commit(&value, &[1u8; 32]).unwrap());
    }

    #[test]
    fn test_nullifier_deterministic() {
        let secret = [9u8; 32];
        let election = Uuid::new_v4();
        let a = nullifier(&secret, election.as_bytes()).unwrap();
        let b = nullifier(&secret, election.as_bytes()).unwrap();
        assert_eq!(a, b);

        // A different election gives an unlinkable nullifier
        let other = Uuid::new_v4();
        assert_ne!(a, nullifier(&secret, other.as_bytes()).unwrap());

        // Typed and byte-level APIs agree
        let voter = VoterSecret::from_bytes(&secret).unwrap();
        assert_eq!(voter.nullifier(&election), a);
        assert_eq!(voter.commitment(), voter_commitment(&secret).unwrap());
    }

    #[test]
    fn test_invalid_lengths() {
        match commit(&[0u8; 31], &[0u8; 32]) {
            Err(Error::InvalidInputLength { expected, found }) => {
                assert_eq!(expected, 32);
                assert_eq!(found, 31);
            }
            _ => panic!("expected InvalidInputLength"),
        }
        assert!(commit(&[0u8; 32], &[0u8; 33]).is_err());
        assert!(nullifier(&[0u8; 32], &[0u8; 32]).is_err());
        assert!(voter_commitment(&[]).is_err());
        assert!(Hash256::from_slice(&[1, 2, 3]).is_err());
        assert!(VoterSecret::from_bytes(&[0u8; 16]).is_err());
    }

    #[test]
    fn test_domain_separation() {
        // The same 32 bytes committed as a voter secret and as a vote are unrelated
        let bytes = [3u8; 32];
        let voter = voter_commitment(&bytes).unwrap();
        let leaf = hash_leaf(&Hash256(bytes));
        assert_ne!(voter, leaf);
        assert_ne!(hash_node(&voter, &leaf), hash_node(&leaf, &voter));
    }

    #[test]
    fn test_vote_opening() {
        let mut rng = ChaCha20Rng::from_seed([1u8; 32]);
        let opening = VoteOpening::for_option(2, &mut rng);
        let commitment = opening.commitment();
        assert!(opening.opens(&commitment));

        let other = VoteOpening::for_option(2, &mut rng);
        assert!(!other.opens(&commitment));
        assert_eq!(&opening.choice[28..], &[0, 0, 0, 2]);
    }

    #[test]
    fn test_hash_hex() {
        let hash = voter_commitment(&[5u8; 32]).unwrap();
        let stringed = hash.to_string();
        assert_eq!(stringed.len(), 64);
        assert_eq!(Hash256::from_str(&stringed).unwrap(), hash);

        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", stringed));
        let back: Hash256 = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);

        assert!(Hash256::from_str("zz").is_err());
    }
}
