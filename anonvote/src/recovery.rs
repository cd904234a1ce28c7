use crate::*;
use indexmap::IndexMap;
use rand::{CryptoRng, RngCore};
use tracing::info;
use uuid::Uuid;

/// A voter credential escrowed with k-of-n guardians, released when a quorum approves a recovery
/// request.
pub struct CredentialRecovery {
    service: ThresholdService<String>,
}

impl CredentialRecovery {
    pub fn new(threshold: u32, guardians: Vec<Authority>) -> Result<Self, Error> {
        Ok(CredentialRecovery {
            service: ThresholdService::new(threshold, guardians)?,
        })
    }

    pub fn service(&self) -> &ThresholdService<String> {
        &self.service
    }

    /// Escrow a 32-byte credential. Returns the share for each guardian.
    pub fn enroll<R: RngCore + CryptoRng>(
        &self,
        credential: &[u8],
        rng: &mut R,
    ) -> Result<IndexMap<Uuid, Share>, Error> {
        let secret = FieldElement::from_bytes_be(credential)?;
        self.service.distribute_shares(&secret, rng)
    }

    /// A guardian approves `request_id` by contributing its share.
    pub fn approve(
        &self,
        request_id: &str,
        guardian_id: Uuid,
        share: Share,
        proof: &[u8],
    ) -> Result<usize, Error> {
        self.service
            .submit_partial(request_id.to_owned(), guardian_id, share, proof)
    }

    /// Release the credential once a quorum approved. The approvals are consumed, so each
    /// approved request releases the credential once.
    pub fn recover(&self, request_id: &str) -> Result<[u8; 32], Error> {
        let secret = self.service.take(&request_id.to_owned())?;
        info!(request = request_id, "credential recovered");
        Ok(secret.to_bytes_be())
    }
}
