use crate::*;
use std::collections::HashSet;
use std::sync::Mutex;
use tracing::info;
use uuid::Uuid;

const NULLIFIER_SET_TAG: &[u8] = b"anonvote/nullifier-set/v1";

#[derive(Debug, Default)]
struct NullifierState {
    entries: HashSet<Nullifier>,
    closed: bool,
}

/// Nullifiers recorded for one election.
///
/// Membership is monotonic: entries are never removed. Check-and-insert happens under one mutex,
/// so of two concurrent inserts of the same nullifier exactly one succeeds.
#[derive(Debug)]
pub struct NullifierSet {
    election_id: Uuid,
    inner: Mutex<NullifierState>,
}

impl NullifierSet {
    pub fn new(election_id: Uuid) -> Self {
        NullifierSet {
            election_id,
            inner: Mutex::new(NullifierState::default()),
        }
    }

    pub fn election_id(&self) -> Uuid {
        self.election_id
    }

    pub fn insert(&self, nullifier: Nullifier) -> Result<(), ValidationError> {
        self.insert_then(nullifier, || Ok(()))
    }

    /// Check that `nullifier` is fresh, run `effect`, and record the nullifier only if the effect
    /// succeeded. The whole sequence holds the set's lock.
    pub fn insert_then<T, F>(&self, nullifier: Nullifier, effect: F) -> Result<T, ValidationError>
    where
        F: FnOnce() -> Result<T, ValidationError>,
    {
        let mut state = lock(&self.inner);
        if state.closed {
            return Err(ValidationError::ElectionClosed);
        }
        if state.entries.contains(&nullifier) {
            return Err(ValidationError::DoubleVote);
        }
        let out = effect()?;
        state.entries.insert(nullifier);
        Ok(out)
    }

    pub fn contains(&self, nullifier: &Nullifier) -> bool {
        lock(&self.inner).entries.contains(nullifier)
    }

    /// Refuse all further inserts. Idempotent.
    pub fn close(&self) {
        let mut state = lock(&self.inner);
        if !state.closed {
            state.closed = true;
            info!(election = %self.election_id, recorded = state.entries.len(), "nullifier set closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.inner).closed
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Export, then run `f` before the lock is released, so `f` sees no insert the export missed.
    pub(crate) fn export_then<T, F>(&self, f: F) -> (NullifierSnapshot, T)
    where
        F: FnOnce() -> T,
    {
        let state = lock(&self.inner);
        let mut nullifiers: Vec<Nullifier> = state.entries.iter().copied().collect();
        nullifiers.sort_unstable();
        let snapshot = NullifierSnapshot {
            election_id: self.election_id,
            closed: state.closed,
            count: nullifiers.len(),
            digest: set_digest(&self.election_id, &nullifiers),
            nullifiers,
        };
        (snapshot, f())
    }
}

/// Read-only handle on a nullifier set whose inserts belong to someone else.
#[derive(Clone, Copy, Debug)]
pub struct NullifierView<'a> {
    set: &'a NullifierSet,
}

impl<'a> From<&'a NullifierSet> for NullifierView<'a> {
    fn from(set: &'a NullifierSet) -> Self {
        NullifierView { set }
    }
}

impl NullifierView<'_> {
    pub fn election_id(&self) -> Uuid {
        self.set.election_id()
    }

    pub fn contains(&self, nullifier: &Nullifier) -> bool {
        self.set.contains(nullifier)
    }

    pub fn is_closed(&self) -> bool {
        self.set.is_closed()
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }
}

/// Persisted form of a nullifier set. Entries are sorted so the digest is canonical.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct NullifierSnapshot {
    pub election_id: Uuid,
    pub closed: bool,
    pub count: usize,
    pub digest: Hash256,
    pub nullifiers: Vec<Nullifier>,
}

fn set_digest(election_id: &Uuid, sorted: &[Nullifier]) -> Hash256 {
    let mut parts: Vec<&[u8]> = Vec::with_capacity(sorted.len() + 1);
    parts.push(election_id.as_bytes());
    parts.extend(sorted.iter().map(|n| &n.0[..]));
    tagged_hash(NULLIFIER_SET_TAG, &parts)
}

impl Snapshot for NullifierSet {
    type Image = NullifierSnapshot;

    fn export(&self) -> NullifierSnapshot {
        self.export_then(|| ()).0
    }

    fn import(image: NullifierSnapshot) -> Result<Self, Error> {
        let entries: HashSet<Nullifier> = image.nullifiers.iter().copied().collect();
        if entries.len() != image.nullifiers.len() || entries.len() != image.count {
            tracing::warn!(
                expected = image.count,
                found = entries.len(),
                "refusing nullifier set import"
            );
            return Err(Error::CorruptSnapshot("nullifier count mismatch".into()));
        }

        let mut sorted = image.nullifiers;
        sorted.sort_unstable();
        if set_digest(&image.election_id, &sorted) != image.digest {
            tracing::warn!(election = %image.election_id, "refusing nullifier set import");
            return Err(Error::CorruptSnapshot("nullifier digest mismatch".into()));
        }

        Ok(NullifierSet {
            election_id: image.election_id,
            inner: Mutex::new(NullifierState {
                entries,
                closed: image.closed,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn nf(i: u8) -> Nullifier {
        nullifier(&[i; 32], Uuid::nil().as_bytes()).unwrap()
    }

    #[test]
    fn test_insert_once() {
        let set = NullifierSet::new(Uuid::new_v4());
        set.insert(nf(1)).unwrap();
        assert_eq!(set.insert(nf(1)), Err(ValidationError::DoubleVote));
        assert!(set.contains(&nf(1)));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_failed_effect_leaves_set_untouched() {
        let set = NullifierSet::new(Uuid::new_v4());
        let result: Result<(), _> =
            set.insert_then(nf(2), || Err(ValidationError::VoteStreamFull));
        assert_eq!(result, Err(ValidationError::VoteStreamFull));
        assert!(!set.contains(&nf(2)));

        let value = set.insert_then(nf(2), || Ok(7)).unwrap();
        assert_eq!(value, 7);
        assert!(set.contains(&nf(2)));
    }

    #[test]
    fn test_closed() {
        let set = NullifierSet::new(Uuid::new_v4());
        set.insert(nf(1)).unwrap();
        set.close();
        set.close();
        assert!(set.is_closed());
        assert_eq!(set.insert(nf(2)), Err(ValidationError::ElectionClosed));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_concurrent_inserts() {
        let set = Arc::new(NullifierSet::new(Uuid::new_v4()));
        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let set = set.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    set.insert(nf(9)).is_ok()
                })
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_snapshot() {
        let set = NullifierSet::new(Uuid::new_v4());
        for i in 0..10 {
            set.insert(nf(i)).unwrap();
        }
        set.close();

        let restored = NullifierSet::from_bytes(&set.to_bytes().unwrap()).unwrap();
        assert_eq!(restored.len(), 10);
        assert!(restored.is_closed());
        assert!(restored.contains(&nf(4)));

        let mut truncated = set.export();
        truncated.nullifiers.pop();
        assert!(matches!(
            NullifierSet::import(truncated),
            Err(Error::CorruptSnapshot(_))
        ));

        let mut swapped = set.export();
        swapped.nullifiers[0] = nf(200);
        assert!(NullifierSet::import(swapped).is_err());

        let mut duplicated = set.export();
        duplicated.nullifiers[1] = duplicated.nullifiers[0];
        assert!(NullifierSet::import(duplicated).is_err());
    }
}
