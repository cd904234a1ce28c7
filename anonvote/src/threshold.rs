//! k-of-n threshold protocol: a dealer distributes shares of a secret to authorities, authorities
//! later submit their contributions for a specific item, and the secret is reconstructed once a
//! quorum has contributed.

use crate::*;
use indexmap::IndexMap;
use rand::{CryptoRng, RngCore};
use std::collections::{BTreeSet, HashMap};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

const SHARE_FINGERPRINT_TAG: &[u8] = b"anonvote/share-fingerprint/v1";

/// Binding digest of a share, recorded at distribution time.
pub fn share_fingerprint(share: &Share) -> Hash256 {
    tagged_hash(
        SHARE_FINGERPRINT_TAG,
        &[&share.index.to_be_bytes(), &share.value.to_bytes_be()],
    )
}

/// What the service remembers about a dealt share. The share itself is not retained.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ShareRecord {
    pub authority_id: Uuid,
    pub index: u32,
    pub threshold: u32,
    pub fingerprint: Hash256,
}

/// Checks that a submitted contribution is the one its authority was dealt.
pub trait ContributionVerifier: Send + Sync {
    fn verify(&self, authority: &Authority, record: &ShareRecord, share: &Share, proof: &[u8])
        -> bool;
}

/// Accepts a contribution whose fingerprint matches the one recorded at distribution.
///
/// The proof bytes are unused.
#[derive(Clone, Copy, Debug, Default)]
pub struct FingerprintVerifier;

impl ContributionVerifier for FingerprintVerifier {
    fn verify(
        &self,
        _authority: &Authority,
        record: &ShareRecord,
        share: &Share,
        _proof: &[u8],
    ) -> bool {
        share_fingerprint(share) == record.fingerprint
    }
}

/// Persisted form of a threshold service: the roster and the distribution records.
///
/// Submitted contributions are transient and not part of the table.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ShareTable {
    pub threshold: u32,
    pub authorities: Vec<Authority>,
    pub records: Vec<ShareRecord>,
}

/// Threshold protocol over items of type `I` (a tally id, a recovery request id, ...).
pub struct ThresholdService<I> {
    threshold: u32,
    authorities: RwLock<IndexMap<Uuid, Authority>>,
    records: RwLock<IndexMap<Uuid, ShareRecord>>,
    partials: RwLock<HashMap<I, IndexMap<Uuid, Share>>>,
    verifier: Box<dyn ContributionVerifier>,
}

fn roster(threshold: u32, authorities: Vec<Authority>) -> Result<IndexMap<Uuid, Authority>, Error> {
    let total = authorities.len() as u32;
    if threshold == 0 || threshold > total {
        return Err(Error::InvalidThreshold { threshold, total });
    }

    let mut indices = BTreeSet::new();
    let mut map = IndexMap::with_capacity(authorities.len());
    for authority in authorities {
        if authority.index == 0 {
            return Err(Error::InvalidShareIndex);
        }
        if !indices.insert(authority.index) {
            return Err(Error::DuplicateAuthorityIndex(authority.index));
        }
        if map.contains_key(&authority.id) {
            return Err(Error::Config(format!("authority {} listed twice", authority.id)));
        }
        map.insert(authority.id, authority);
    }
    Ok(map)
}

impl<I> ThresholdService<I>
where
    I: Eq + Hash + Clone + Debug,
{
    pub fn new(threshold: u32, authorities: Vec<Authority>) -> Result<Self, Error> {
        Ok(ThresholdService {
            threshold,
            authorities: RwLock::new(roster(threshold, authorities)?),
            records: RwLock::new(IndexMap::new()),
            partials: RwLock::new(HashMap::new()),
            verifier: Box::new(FingerprintVerifier),
        })
    }

    /// Replace the contribution verifier.
    pub fn with_verifier<V: ContributionVerifier + 'static>(mut self, verifier: V) -> Self {
        self.verifier = Box::new(verifier);
        self
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn authorities(&self) -> Vec<Authority> {
        read_lock(&self.authorities).values().cloned().collect()
    }

    pub fn authority(&self, id: &Uuid) -> Option<Authority> {
        read_lock(&self.authorities).get(id).cloned()
    }

    /// Deal fresh shares of `secret` to every authority, keyed by authority id.
    ///
    /// This is a full re-share: previous records are replaced and pending contributions dropped.
    pub fn distribute_shares<R: RngCore + CryptoRng>(
        &self,
        secret: &FieldElement,
        rng: &mut R,
    ) -> Result<IndexMap<Uuid, Share>, Error> {
        let authorities = read_lock(&self.authorities);
        let indices: Vec<u32> = authorities.values().map(|a| a.index).collect();
        let shares = split_at(secret, self.threshold, &indices, rng)?;

        let mut records = write_lock(&self.records);
        let mut partials = write_lock(&self.partials);
        records.clear();
        partials.clear();

        let mut dealt = IndexMap::with_capacity(shares.len());
        for (authority, share) in authorities.values().zip(shares) {
            records.insert(
                authority.id,
                ShareRecord {
                    authority_id: authority.id,
                    index: share.index,
                    threshold: share.threshold,
                    fingerprint: share_fingerprint(&share),
                },
            );
            dealt.insert(authority.id, share);
        }

        info!(
            threshold = self.threshold,
            authorities = dealt.len(),
            "shares distributed"
        );
        Ok(dealt)
    }

    /// Record an authority's contribution toward `item`. Returns how many distinct authorities
    /// have now contributed to it.
    ///
    /// A second submission from the same authority for the same item replaces the first.
    pub fn submit_partial(
        &self,
        item: I,
        authority_id: Uuid,
        share: Share,
        proof: &[u8],
    ) -> Result<usize, Error> {
        let authorities = read_lock(&self.authorities);
        let authority = authorities
            .get(&authority_id)
            .ok_or(Error::UnknownAuthority(authority_id))?;
        if !authority.active {
            return Err(Error::AuthorityInactive(authority_id));
        }

        let records = read_lock(&self.records);
        let record = records
            .get(&authority_id)
            .ok_or(Error::AuthorityNotShared(authority_id))?;

        if share.index != authority.index
            || share.threshold != record.threshold
            || !self.verifier.verify(authority, record, &share, proof)
        {
            warn!(authority = %authority_id, ?item, "contribution refused");
            return Err(Error::InvalidContribution(authority_id));
        }

        let mut partials = write_lock(&self.partials);
        let contributions = partials.entry(item.clone()).or_insert_with(IndexMap::new);
        contributions.insert(authority_id, share);
        let count = contributions.len();

        debug!(authority = %authority_id, ?item, count, "contribution recorded");
        Ok(count)
    }

    /// Stop accepting new contributions from an authority. Its existing ones still count.
    pub fn deactivate(&self, authority_id: &Uuid) -> Result<(), Error> {
        self.set_active(authority_id, false)
    }

    pub fn reactivate(&self, authority_id: &Uuid) -> Result<(), Error> {
        self.set_active(authority_id, true)
    }

    fn set_active(&self, authority_id: &Uuid, active: bool) -> Result<(), Error> {
        let mut authorities = write_lock(&self.authorities);
        let authority = authorities
            .get_mut(authority_id)
            .ok_or(Error::UnknownAuthority(*authority_id))?;
        authority.active = active;
        info!(authority = %authority_id, active, "authority status changed");
        Ok(())
    }

    /// Number of distinct authorities that contributed to `item`.
    pub fn contributions(&self, item: &I) -> usize {
        read_lock(&self.partials)
            .get(item)
            .map(|c| c.len())
            .unwrap_or(0)
    }

    /// Reconstruct the secret for `item` from the submitted contributions.
    pub fn tally(&self, item: &I) -> Result<FieldElement, Error> {
        let partials = read_lock(&self.partials);
        self.reconstruct(item, partials.get(item))
    }

    /// Reconstruct the secret for `item` and drop its contributions in one step.
    ///
    /// Of two concurrent takes of one item at most one succeeds. Below quorum the contributions
    /// are left in place.
    pub fn take(&self, item: &I) -> Result<FieldElement, Error> {
        let mut partials = write_lock(&self.partials);
        let secret = self.reconstruct(item, partials.get(item))?;
        partials.remove(item);
        Ok(secret)
    }

    fn reconstruct(
        &self,
        item: &I,
        contributions: Option<&IndexMap<Uuid, Share>>,
    ) -> Result<FieldElement, Error> {
        let shares: Vec<Share> = contributions
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default();

        let need = self.threshold as usize;
        if shares.len() < need {
            return Err(Error::InsufficientQuorum {
                have: shares.len(),
                need,
            });
        }

        let secret = combine(&shares)?;
        info!(?item, contributions = shares.len(), "quorum reached");
        Ok(secret)
    }

    /// Drop the contributions for a finished item.
    pub fn forget(&self, item: &I) -> bool {
        write_lock(&self.partials).remove(item).is_some()
    }
}

impl<I> Snapshot for ThresholdService<I>
where
    I: Eq + Hash + Clone + Debug,
{
    type Image = ShareTable;

    fn export(&self) -> ShareTable {
        ShareTable {
            threshold: self.threshold,
            authorities: self.authorities(),
            records: read_lock(&self.records).values().cloned().collect(),
        }
    }

    /// Restores with the default `FingerprintVerifier`.
    fn import(table: ShareTable) -> Result<Self, Error> {
        let authorities = roster(table.threshold, table.authorities)
            .map_err(|e| Error::CorruptSnapshot(e.to_string()))?;

        let mut records = IndexMap::with_capacity(table.records.len());
        for record in table.records {
            let matches = authorities
                .get(&record.authority_id)
                .map(|a| a.index == record.index)
                .unwrap_or(false);
            if !matches || record.threshold != table.threshold {
                warn!(authority = %record.authority_id, "refusing share table import");
                return Err(Error::CorruptSnapshot(format!(
                    "share record for {} does not match the roster",
                    record.authority_id
                )));
            }
            if records.insert(record.authority_id, record).is_some() {
                return Err(Error::CorruptSnapshot("share record listed twice".into()));
            }
        }

        Ok(ThresholdService {
            threshold: table.threshold,
            authorities: RwLock::new(authorities),
            records: RwLock::new(records),
            partials: RwLock::new(HashMap::new()),
            verifier: Box::new(FingerprintVerifier),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn setup(k: u32, n: u32) -> (ThresholdService<String>, IndexMap<Uuid, Share>, FieldElement) {
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        let service = ThresholdService::new(k, authority_roster(n)).unwrap();
        let secret = FieldElement::random(&mut rng);
        let shares = service.distribute_shares(&secret, &mut rng).unwrap();
        (service, shares, secret)
    }

    fn item() -> String {
        "tally-1".to_string()
    }

    #[test]
    fn test_quorum_reconstructs() {
        let (service, shares, secret) = setup(3, 5);
        let ids: Vec<Uuid> = shares.keys().cloned().collect();

        service
            .submit_partial(item(), ids[0], shares[&ids[0]].clone(), &[])
            .unwrap();
        service
            .submit_partial(item(), ids[2], shares[&ids[2]].clone(), &[])
            .unwrap();
        assert!(matches!(
            service.tally(&item()),
            Err(Error::InsufficientQuorum { have: 2, need: 3 })
        ));

        let count = service
            .submit_partial(item(), ids[4], shares[&ids[4]].clone(), &[])
            .unwrap();
        assert_eq!(count, 3);
        assert_eq!(service.tally(&item()).unwrap(), secret);

        // Other items are independent
        assert_eq!(service.contributions(&"other".to_string()), 0);
        assert!(service.tally(&"other".to_string()).is_err());
    }

    #[test]
    fn test_resubmission_replaces() {
        let (service, shares, _) = setup(2, 3);
        let id = *shares.keys().next().unwrap();
        for _ in 0..3 {
            let count = service
                .submit_partial(item(), id, shares[&id].clone(), &[])
                .unwrap();
            assert_eq!(count, 1);
        }
        assert!(service.tally(&item()).is_err());
    }

    #[test]
    fn test_submission_checks() {
        let (service, shares, _) = setup(2, 3);
        let ids: Vec<Uuid> = shares.keys().cloned().collect();

        let stranger = Uuid::new_v4();
        assert!(matches!(
            service.submit_partial(item(), stranger, shares[&ids[0]].clone(), &[]),
            Err(Error::UnknownAuthority(id)) if id == stranger
        ));

        // Someone else's share
        assert!(matches!(
            service.submit_partial(item(), ids[0], shares[&ids[1]].clone(), &[]),
            Err(Error::InvalidContribution(_))
        ));

        // Tampered value at the right index
        let mut tampered = shares[&ids[0]].clone();
        tampered.value = &tampered.value + &FieldElement::one();
        assert!(matches!(
            service.submit_partial(item(), ids[0], tampered, &[]),
            Err(Error::InvalidContribution(_))
        ));

        // Known but never dealt to
        let fresh: ThresholdService<String> = ThresholdService::new(1, authority_roster(1)).unwrap();
        let only = fresh.authorities()[0].id;
        assert!(matches!(
            fresh.submit_partial(item(), only, shares[&ids[0]].clone(), &[]),
            Err(Error::AuthorityNotShared(_))
        ));
    }

    #[test]
    fn test_deactivation_gates_new_submissions_only() {
        let (service, shares, secret) = setup(2, 3);
        let ids: Vec<Uuid> = shares.keys().cloned().collect();

        service
            .submit_partial(item(), ids[0], shares[&ids[0]].clone(), &[])
            .unwrap();
        service.deactivate(&ids[0]).unwrap();
        service.deactivate(&ids[1]).unwrap();

        assert!(matches!(
            service.submit_partial(item(), ids[1], shares[&ids[1]].clone(), &[]),
            Err(Error::AuthorityInactive(_))
        ));

        service.reactivate(&ids[1]).unwrap();
        service
            .submit_partial(item(), ids[1], shares[&ids[1]].clone(), &[])
            .unwrap();
        // The contribution made before deactivation still counts
        assert_eq!(service.tally(&item()).unwrap(), secret);

        assert!(service.deactivate(&Uuid::new_v4()).is_err());
    }

    #[test]
    fn test_reshare_drops_pending() {
        let (service, shares, _) = setup(2, 3);
        let ids: Vec<Uuid> = shares.keys().cloned().collect();
        service
            .submit_partial(item(), ids[0], shares[&ids[0]].clone(), &[])
            .unwrap();

        let mut rng = ChaCha20Rng::seed_from_u64(9);
        let new_secret = FieldElement::from(5u64);
        let reshared = service.distribute_shares(&new_secret, &mut rng).unwrap();
        assert_eq!(service.contributions(&item()), 0);

        // Old shares no longer pass the fingerprint check
        assert!(service
            .submit_partial(item(), ids[0], shares[&ids[0]].clone(), &[])
            .is_err());
        for id in &ids[..2] {
            service
                .submit_partial(item(), *id, reshared[id].clone(), &[])
                .unwrap();
        }
        assert_eq!(service.tally(&item()).unwrap(), new_secret);
        assert!(service.forget(&item()));
    }

    #[test]
    fn test_take_releases_once() {
        let (service, shares, secret) = setup(2, 3);
        let service = Arc::new(service);
        let ids: Vec<Uuid> = shares.keys().cloned().collect();

        service
            .submit_partial(item(), ids[0], shares[&ids[0]].clone(), &[])
            .unwrap();
        assert!(service.take(&item()).is_err());
        // Below quorum nothing is consumed
        assert_eq!(service.contributions(&item()), 1);

        service
            .submit_partial(item(), ids[1], shares[&ids[1]].clone(), &[])
            .unwrap();

        let barrier = Arc::new(Barrier::new(4));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let service = service.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    service.take(&item())
                })
            })
            .collect();
        let released: Vec<FieldElement> = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap().ok())
            .collect();
        assert_eq!(released, vec![secret]);
        assert_eq!(service.contributions(&item()), 0);
    }

    #[test]
    fn test_invalid_roster() {
        let roster = authority_roster(3);
        assert!(matches!(
            ThresholdService::<String>::new(4, roster.clone()),
            Err(Error::InvalidThreshold { .. })
        ));
        let mut dup = roster.clone();
        dup[2].index = 1;
        assert!(matches!(
            ThresholdService::<String>::new(2, dup),
            Err(Error::DuplicateAuthorityIndex(1))
        ));
    }

    struct RejectAll;

    impl ContributionVerifier for RejectAll {
        fn verify(&self, _: &Authority, _: &ShareRecord, _: &Share, _: &[u8]) -> bool {
            false
        }
    }

    #[test]
    fn test_custom_verifier() {
        let mut rng = ChaCha20Rng::seed_from_u64(1);
        let service: ThresholdService<String> = ThresholdService::new(1, authority_roster(2))
            .unwrap()
            .with_verifier(RejectAll);
        let shares = service
            .distribute_shares(&FieldElement::one(), &mut rng)
            .unwrap();
        let (id, share) = shares.iter().next().unwrap();
        assert!(service
            .submit_partial(item(), *id, share.clone(), b"proof")
            .is_err());
    }

    #[test]
    fn test_share_table_roundtrip() {
        let (service, shares, secret) = setup(2, 4);
        let restored = ThresholdService::<String>::from_bytes(&service.to_bytes().unwrap()).unwrap();
        assert_eq!(restored.export(), service.export());

        let ids: Vec<Uuid> = shares.keys().cloned().collect();
        for id in &ids[1..3] {
            restored
                .submit_partial(item(), *id, shares[id].clone(), &[])
                .unwrap();
        }
        assert_eq!(restored.tally(&item()).unwrap(), secret);

        let mut bad = service.export();
        bad.records[0].index = 99;
        assert!(matches!(
            ThresholdService::<String>::import(bad),
            Err(Error::CorruptSnapshot(_))
        ));

        let mut short = service.export();
        short.authorities.truncate(1);
        assert!(ThresholdService::<String>::import(short).is_err());
    }
}
