use crate::*;
use content_inspector::ContentType;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;

/// A stateful structure that a storage engine can persist and restore losslessly.
///
/// `import` fails closed: an image that does not reproduce its own recorded root, digest or count
/// is refused with `Error::CorruptSnapshot` rather than partially loaded.
pub trait Snapshot: Sized {
    type Image: Serialize + DeserializeOwned;

    fn export(&self) -> Self::Image;

    fn import(image: Self::Image) -> Result<Self, Error>;

    /// Pack into CBOR bytes
    fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        Ok(serde_cbor::to_vec(&self.export())?)
    }

    /// Unpack from JSON or CBOR bytes
    fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        Self::import(decode_image(bytes)?)
    }
}

/// Decode JSON or CBOR, sniffing which one it is.
///
/// CBOR made only of text and small integers has no NUL bytes and inspects as UTF-8, so text is
/// only treated as JSON when it opens like a JSON document.
pub fn decode_image<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, Error> {
    let image = match content_inspector::inspect(bytes) {
        ContentType::UTF_8 if looks_like_json(bytes) => serde_json::from_slice(bytes)?,
        ContentType::UTF_8 | ContentType::BINARY => serde_cbor::from_slice(bytes)?,
        _ => return Err(Error::DeserializationUnknownFormat),
    };
    Ok(image)
}

fn looks_like_json(bytes: &[u8]) -> bool {
    matches!(
        bytes.iter().find(|b| !b.is_ascii_whitespace()),
        Some(b'{') | Some(b'[')
    )
}

/// A simple snapshot store that uses an in-memory BTreeMap
#[derive(Default, Clone)]
pub struct MemStore {
    inner: BTreeMap<String, Vec<u8>>,
}

impl MemStore {
    pub fn set<S: Snapshot>(&mut self, key: &str, value: &S) -> Result<(), Error> {
        self.inner.insert(key.to_owned(), value.to_bytes()?);
        Ok(())
    }

    pub fn get<S: Snapshot>(&self, key: &str) -> Result<Option<S>, Error> {
        match self.inner.get(key) {
            Some(bytes) => Ok(Some(S::from_bytes(bytes)?)),
            None => Ok(None),
        }
    }

    /// Raw stored bytes, e.g. to hand to a durable backend.
    pub fn raw(&self, key: &str) -> Option<&[u8]> {
        self.inner.get(key).map(|v| v.as_slice())
    }

    pub fn set_raw(&mut self, key: &str, bytes: Vec<u8>) {
        self.inner.insert(key.to_owned(), bytes);
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.inner.keys()
    }
}

/// Persisted form of a static registry.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RegistrySnapshot {
    pub root: Hash256,
    pub leaves: Vec<Commitment>,
}

impl Snapshot for MerkleTree {
    type Image = RegistrySnapshot;

    fn export(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            root: self.root(),
            leaves: self.leaves().to_vec(),
        }
    }

    fn import(image: RegistrySnapshot) -> Result<Self, Error> {
        // Leaves are stored in tree order, so no re-sorting
        let tree = MerkleTree::from_ordered(image.leaves);
        if tree.root() != image.root {
            tracing::warn!(expected = %image.root, found = %tree.root(), "refusing registry import");
            return Err(Error::CorruptSnapshot("registry root mismatch".into()));
        }
        Ok(tree)
    }
}

/// Persisted form of a slot-addressed registry.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SparseSnapshot {
    pub depth: usize,
    pub root: Hash256,
    pub slots: Vec<(u64, Commitment)>,
}

impl Snapshot for SparseMerkleTree {
    type Image = SparseSnapshot;

    fn export(&self) -> SparseSnapshot {
        SparseSnapshot {
            depth: self.depth(),
            root: self.root(),
            slots: self.occupied().map(|(slot, leaf)| (*slot, *leaf)).collect(),
        }
    }

    fn import(image: SparseSnapshot) -> Result<Self, Error> {
        let mut tree = SparseMerkleTree::new(image.depth)?;
        for (slot, leaf) in image.slots {
            if tree.get(slot).is_some() {
                return Err(Error::CorruptSnapshot(format!("slot {} listed twice", slot)));
            }
            tree.insert(slot, leaf)?;
        }
        if tree.root() != image.root {
            tracing::warn!(expected = %image.root, found = %tree.root(), "refusing sparse registry import");
            return Err(Error::CorruptSnapshot("sparse registry root mismatch".into()));
        }
        Ok(tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(n: u8) -> Vec<Commitment> {
        (0..n).map(|i| voter_commitment(&[i; 32]).unwrap()).collect()
    }

    #[test]
    fn test_registry_roundtrip_cbor_and_json() {
        let tree = build_registry(leaves(9));

        let bytes = tree.to_bytes().unwrap();
        let restored = MerkleTree::from_bytes(&bytes).unwrap();
        assert_eq!(restored.root(), tree.root());
        assert_eq!(restored.leaves(), tree.leaves());

        let json = serde_json::to_vec(&tree.export()).unwrap();
        let restored = MerkleTree::from_bytes(&json).unwrap();
        assert_eq!(restored.root(), tree.root());
    }

    #[test]
    fn test_truncated_registry_fails_closed() {
        let tree = build_registry(leaves(9));

        // A dropped leaf no longer reproduces the recorded root
        let mut image = tree.export();
        image.leaves.pop();
        assert!(matches!(
            MerkleTree::import(image),
            Err(Error::CorruptSnapshot(_))
        ));

        // Truncated bytes do not decode at all
        let bytes = tree.to_bytes().unwrap();
        assert!(MerkleTree::from_bytes(&bytes[..bytes.len() / 2]).is_err());
    }

    #[test]
    fn test_sparse_roundtrip() {
        let mut tree = SparseMerkleTree::new(24).unwrap();
        for (i, leaf) in leaves(4).into_iter().enumerate() {
            tree.insert((i as u64) * 1000, leaf).unwrap();
        }

        let restored = SparseMerkleTree::from_bytes(&tree.to_bytes().unwrap()).unwrap();
        assert_eq!(restored.root(), tree.root());
        assert_eq!(restored.len(), 4);

        let mut image = tree.export();
        image.slots.push(image.slots[0]);
        assert!(SparseMerkleTree::import(image).is_err());
    }

    #[test]
    fn test_decode_unknown_format() {
        // UTF-16 with a byte order mark
        let utf16 = [0xff, 0xfe, b'{', 0, b'}', 0];
        assert!(matches!(
            decode_image::<RegistrySnapshot>(&utf16),
            Err(Error::DeserializationUnknownFormat)
        ));
        assert!(decode_image::<RegistrySnapshot>(b"not a snapshot").is_err());
    }

    #[test]
    fn test_memstore() {
        let tree = build_registry(leaves(3));
        let mut store = MemStore::default();
        store.set("registry", &tree).unwrap();

        let restored: MerkleTree = store.get("registry").unwrap().unwrap();
        assert_eq!(restored.root(), tree.root());
        assert!(store.get::<MerkleTree>("missing").unwrap().is_none());
        assert_eq!(store.keys().count(), 1);

        // Corrupting the stored bytes is detected on load
        let mut raw = store.raw("registry").unwrap().to_vec();
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        store.set_raw("registry", raw);
        assert!(store.get::<MerkleTree>("registry").is_err());
    }
}
