use crate::*;
use uuid::Uuid;

/// An authority safeguards one share of a threshold secret (the tally decryption key, or an
/// escrowed voter credential), dealt to it by Shamir secret sharing.
///
/// Most elections will have a handful of authorities (between 3 and 30), with a quorum set to
/// about 2/3 of them. Any quorum may reconstruct the secret; fewer learn nothing about it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Authority {
    pub id: Uuid,

    /// Share index: the x-coordinate this authority's share is evaluated at. Never zero.
    pub index: u32,

    /// Inactive authorities keep their share but may not contribute.
    pub active: bool,
}

impl Authority {
    pub fn new(index: u32) -> Result<Self, Error> {
        Authority::with_id(Uuid::new_v4(), index)
    }

    pub fn with_id(id: Uuid, index: u32) -> Result<Self, Error> {
        if index == 0 {
            return Err(Error::InvalidShareIndex);
        }
        Ok(Authority {
            id,
            index,
            active: true,
        })
    }
}

/// A fresh roster of `n` authorities at indices `1..=n`.
pub fn authority_roster(n: u32) -> Vec<Authority> {
    (1..=n)
        .map(|index| Authority {
            id: Uuid::new_v4(),
            index,
            active: true,
        })
        .collect()
}
