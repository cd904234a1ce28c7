use thiserror::Error;
use uuid::Uuid;

/// Error types
#[derive(Debug, Error)]
pub enum Error {
    #[error("anonvote: invalid input length: expected {expected} bytes, found {found}")]
    InvalidInputLength { expected: usize, found: usize },

    #[error("anonvote: index {index} out of range (bound {bound})")]
    IndexOutOfRange { index: u64, bound: u64 },

    #[error("anonvote: insufficient quorum: have {have}, need {need}")]
    InsufficientQuorum { have: usize, need: usize },

    #[error("anonvote: element has no inverse (duplicate share indices?)")]
    NonInvertibleElement,

    #[error("anonvote: value is not a canonical field element")]
    NotAFieldElement,

    #[error("anonvote: threshold {threshold} is invalid for {total} shares")]
    InvalidThreshold { threshold: u32, total: u32 },

    #[error("anonvote: election expects {expected} authorities, roster has {found}")]
    RosterSizeMismatch { expected: u32, found: u32 },

    #[error("anonvote: share index must be non-zero")]
    InvalidShareIndex,

    #[error("anonvote: shares were dealt with different thresholds")]
    MismatchedThreshold,

    #[error("anonvote: authority index {0} is assigned twice")]
    DuplicateAuthorityIndex(u32),

    #[error("anonvote: unknown authority {0}")]
    UnknownAuthority(Uuid),

    #[error("anonvote: authority {0} is inactive")]
    AuthorityInactive(Uuid),

    #[error("anonvote: authority {0} was never dealt a share")]
    AuthorityNotShared(Uuid),

    #[error("anonvote: contribution from authority {0} failed verification")]
    InvalidContribution(Uuid),

    #[error("anonvote: contribution addressed to election {0}")]
    WrongElection(Uuid),

    #[error("anonvote: no retained checkpoint at {0} leaves")]
    UnknownCheckpoint(usize),

    #[error("anonvote: corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    #[error("anonvote: invalid hexadecimal: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("anonvote: CBOR error: {0}")]
    CBORSerialization(#[from] serde_cbor::Error),

    #[error("anonvote: JSON error: {0}")]
    JSONSerialization(#[from] serde_json::Error),

    #[error("anonvote: error deserializing snapshot: unknown format")]
    DeserializationUnknownFormat,

    #[error("anonvote: invalid configuration: {0}")]
    Config(String),
}

/// Reasons a cast is rejected.
///
/// These are expected protocol outcomes rather than system faults; the caller reports them to the
/// voter and does not retry.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationError {
    #[error("anonvote validation: nullifier already recorded (double vote)")]
    DoubleVote,

    #[error("anonvote validation: membership proof does not verify against the registry root")]
    InvalidMembershipProof,

    #[error("anonvote validation: eligibility proof rejected")]
    InvalidEligibilityProof,

    #[error("anonvote validation: election is closed")]
    ElectionClosed,

    #[error("anonvote validation: election mismatch")]
    ElectionMismatch,

    #[error("anonvote validation: confirmed-vote stream is full")]
    VoteStreamFull,
}
