use crate::RepoError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Named signing keys, stored as 64-character hex strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyring {
    #[serde(default)]
    pub keys: BTreeMap<String, String>,
}

impl Keyring {
    pub fn load(path: &Path) -> Result<Self, RepoError> {
        let content = fs::read_to_string(path).map_err(|e| {
            RepoError::VerificationFailed(format!("cannot read keyring {}: {e}", path.display()))
        })?;
        serde_json::from_str(&content)
            .map_err(|e| RepoError::VerificationFailed(format!("invalid keyring: {e}")))
    }

    pub fn save(&self, path: &Path) -> Result<(), RepoError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| RepoError::Serialization(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn insert(&mut self, key_id: &str, key: &[u8; 32]) {
        self.keys
            .insert(key_id.to_owned(), blake3::Hash::from(*key).to_hex().to_string());
    }

    fn key(&self, key_id: &str) -> Result<[u8; 32], RepoError> {
        let hex = self.keys.get(key_id).ok_or_else(|| {
            RepoError::VerificationFailed(format!("key '{key_id}' is not in the keyring"))
        })?;
        blake3::Hash::from_hex(hex)
            .map(|h| *h.as_bytes())
            .map_err(|e| RepoError::VerificationFailed(format!("malformed key '{key_id}': {e}")))
    }
}

/// Provenance record stored next to an archive as `<archive>.prov`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub name: String,
    pub version: String,
    /// blake3 digest of the archive bytes.
    pub digest: String,
    pub key_id: String,
    /// blake3 keyed hash of the archive bytes under `key_id`.
    pub signature: String,
}

pub fn prov_path(archive: &Path) -> PathBuf {
    let mut name = archive.as_os_str().to_owned();
    name.push(".prov");
    PathBuf::from(name)
}

/// Produce a provenance record for `data` signed with `key`.
pub fn sign_archive(
    data: &[u8],
    name: &str,
    version: &str,
    key_id: &str,
    key: &[u8; 32],
) -> Provenance {
    Provenance {
        name: name.to_owned(),
        version: version.to_owned(),
        digest: blake3::hash(data).to_hex().to_string(),
        key_id: key_id.to_owned(),
        signature: blake3::keyed_hash(key, data).to_hex().to_string(),
    }
}

/// Check an archive against its `.prov` sidecar and the keyring.
pub fn verify_archive(archive: &Path, keyring: &Keyring) -> Result<Provenance, RepoError> {
    let data = fs::read(archive)?;
    let sidecar = prov_path(archive);
    let raw = fs::read(&sidecar).map_err(|e| {
        RepoError::VerificationFailed(format!(
            "cannot read provenance {}: {e}",
            sidecar.display()
        ))
    })?;
    let prov: Provenance = serde_json::from_slice(&raw)
        .map_err(|e| RepoError::VerificationFailed(format!("invalid provenance: {e}")))?;

    let actual = blake3::hash(&data);
    if actual.to_hex().as_str() != prov.digest {
        return Err(RepoError::VerificationFailed(format!(
            "digest mismatch for {}: expected {}, got {}",
            archive.display(),
            prov.digest,
            actual.to_hex()
        )));
    }

    let key = keyring.key(&prov.key_id)?;
    let expected = blake3::Hash::from_hex(&prov.signature)
        .map_err(|e| RepoError::VerificationFailed(format!("malformed signature: {e}")))?;
    // blake3::Hash equality is constant-time.
    if blake3::keyed_hash(&key, &data) != expected {
        return Err(RepoError::VerificationFailed(format!(
            "signature by '{}' does not match {}",
            prov.key_id,
            archive.display()
        )));
    }

    tracing::debug!(
        "verified {} {} signed by {}",
        prov.name,
        prov.version,
        prov.key_id
    );
    Ok(prov)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 32] = [7u8; 32];

    fn write_signed(dir: &Path, data: &[u8]) -> (PathBuf, Keyring) {
        let archive = dir.join("app-1.0.0.tgz");
        fs::write(&archive, data).unwrap();
        let prov = sign_archive(data, "app", "1.0.0", "release-key", &KEY);
        fs::write(prov_path(&archive), serde_json::to_vec(&prov).unwrap()).unwrap();
        let mut keyring = Keyring::default();
        keyring.insert("release-key", &KEY);
        (archive, keyring)
    }

    #[test]
    fn prov_path_appends_suffix() {
        assert_eq!(
            prov_path(Path::new("/tmp/app-1.0.0.tgz")),
            PathBuf::from("/tmp/app-1.0.0.tgz.prov")
        );
    }

    #[test]
    fn signed_archive_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let (archive, keyring) = write_signed(dir.path(), b"chart bytes");
        let prov = verify_archive(&archive, &keyring).unwrap();
        assert_eq!(prov.name, "app");
        assert_eq!(prov.key_id, "release-key");
    }

    #[test]
    fn tampered_archive_fails_digest() {
        let dir = tempfile::tempdir().unwrap();
        let (archive, keyring) = write_signed(dir.path(), b"chart bytes");
        fs::write(&archive, b"tampered bytes").unwrap();
        let err = verify_archive(&archive, &keyring).unwrap_err();
        assert!(err.to_string().contains("digest mismatch"));
    }

    #[test]
    fn unknown_key_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (archive, _) = write_signed(dir.path(), b"chart bytes");
        let err = verify_archive(&archive, &Keyring::default()).unwrap_err();
        assert!(matches!(err, RepoError::VerificationFailed(_)));
        assert!(err.to_string().contains("release-key"));
    }

    #[test]
    fn wrong_key_fails_signature() {
        let dir = tempfile::tempdir().unwrap();
        let (archive, _) = write_signed(dir.path(), b"chart bytes");
        let mut other = Keyring::default();
        other.insert("release-key", &[9u8; 32]);
        let err = verify_archive(&archive, &other).unwrap_err();
        assert!(err.to_string().contains("signature"));
    }

    #[test]
    fn missing_provenance_fails() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("bare.tgz");
        fs::write(&archive, b"data").unwrap();
        let err = verify_archive(&archive, &Keyring::default()).unwrap_err();
        assert!(err.to_string().contains("provenance"));
    }

    #[test]
    fn keyring_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keyring.json");
        let mut keyring = Keyring::default();
        keyring.insert("k1", &KEY);
        keyring.save(&path).unwrap();
        assert_eq!(Keyring::load(&path).unwrap(), keyring);
    }
}
