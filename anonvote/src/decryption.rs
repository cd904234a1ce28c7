use crate::*;
use indexmap::IndexMap;
use rand::{CryptoRng, RngCore};
use uuid::Uuid;

/// An authority's contribution toward decrypting one tally.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PartialDecryption {
    pub election_id: Uuid,
    pub tally_id: Uuid,
    pub authority_id: Uuid,
    pub share: Share,

    #[serde(with = "hex_serde")]
    pub proof: Vec<u8>,
}

impl PartialDecryption {
    pub fn new(election_id: Uuid, tally_id: Uuid, authority_id: Uuid, share: Share) -> Self {
        PartialDecryption {
            election_id,
            tally_id,
            authority_id,
            share,
            proof: vec![],
        }
    }
}

/// k-of-n election authorities jointly holding the tally decryption key.
pub struct TallyDecryption {
    election_id: Uuid,
    service: ThresholdService<Uuid>,
}

impl TallyDecryption {
    pub fn new(election_id: Uuid, threshold: u32, authorities: Vec<Authority>) -> Result<Self, Error> {
        Ok(TallyDecryption {
            election_id,
            service: ThresholdService::new(threshold, authorities)?,
        })
    }

    pub fn from_service(election_id: Uuid, service: ThresholdService<Uuid>) -> Self {
        TallyDecryption {
            election_id,
            service,
        }
    }

    pub fn election_id(&self) -> Uuid {
        self.election_id
    }

    pub fn service(&self) -> &ThresholdService<Uuid> {
        &self.service
    }

    /// Generate a fresh decryption key and deal it to the authorities.
    ///
    /// The key is returned to the dealer, who uses it once and discards it.
    pub fn deal_key<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
    ) -> Result<(FieldElement, IndexMap<Uuid, Share>), Error> {
        let key = FieldElement::random(rng);
        let shares = self.service.distribute_shares(&key, rng)?;
        Ok((key, shares))
    }

    /// Returns the number of authorities that have contributed to this tally.
    pub fn submit(&self, partial: &PartialDecryption) -> Result<usize, Error> {
        if partial.election_id != self.election_id {
            return Err(Error::WrongElection(partial.election_id));
        }
        self.service.submit_partial(
            partial.tally_id,
            partial.authority_id,
            partial.share.clone(),
            &partial.proof,
        )
    }

    /// Reconstruct the decryption key once a quorum has contributed to `tally_id`.
    pub fn decryption_key(&self, tally_id: &Uuid) -> Result<FieldElement, Error> {
        self.service.tally(tally_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn test_tally_decryption() {
        let mut rng = ChaCha20Rng::seed_from_u64(3);
        let election_id = Uuid::new_v4();
        let tally_id = Uuid::new_v4();
        let decryption = TallyDecryption::new(election_id, 3, authority_roster(5)).unwrap();
        let (key, shares) = decryption.deal_key(&mut rng).unwrap();

        let partials: Vec<PartialDecryption> = shares
            .iter()
            .map(|(id, share)| PartialDecryption::new(election_id, tally_id, *id, share.clone()))
            .collect();

        // Partials survive transport
        let json = serde_json::to_string(&partials[0]).unwrap();
        let back: PartialDecryption = serde_json::from_str(&json).unwrap();
        assert_eq!(back, partials[0]);

        decryption.submit(&partials[1]).unwrap();
        decryption.submit(&partials[3]).unwrap();
        assert!(decryption.decryption_key(&tally_id).is_err());
        assert_eq!(decryption.submit(&partials[4]).unwrap(), 3);
        assert_eq!(decryption.decryption_key(&tally_id).unwrap(), key);

        let mut foreign = partials[0].clone();
        foreign.election_id = Uuid::new_v4();
        assert!(decryption.submit(&foreign).is_err());
    }
}
