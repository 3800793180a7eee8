use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use rand::Rng;
use tokio::io::AsyncWriteExt;

use crate::credential::Credential;
use crate::error::Error;
use crate::token::decode_unverified;

/// Nonce size for ChaCha20-Poly1305 (96 bits).
const NONCE_SIZE: usize = 12;
/// Key size for ChaCha20-Poly1305 (256 bits).
const KEY_SIZE: usize = 32;

/// Symmetric key for encrypted token files.
#[derive(Clone, PartialEq, Eq)]
pub struct StoreKey([u8; KEY_SIZE]);

impl StoreKey {
    /// Environment variable holding the base64-encoded key.
    pub const ENV_VAR: &'static str = "IEC_TOKEN_ENCRYPTION_KEY";

    #[must_use]
    pub fn generate() -> Self {
        Self(rand::rng().random())
    }

    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parses a key from URL-safe or standard base64 (padded) of exactly 32 bytes.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the text is not base64 or has the wrong length.
    pub fn from_base64(encoded: &str) -> Result<Self, Error> {
        Self::parse(encoded).map_err(Error::Config)
    }

    /// Reads the key from [`StoreKey::ENV_VAR`]; `Ok(None)` when unset or blank.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the variable is set but invalid.
    pub fn from_env() -> Result<Option<Self>, Error> {
        match std::env::var(Self::ENV_VAR) {
            Ok(value) if !value.trim().is_empty() => Self::parse(&value)
                .map(Some)
                .map_err(|e| Error::Config(format!("{}: {e}", Self::ENV_VAR))),
            _ => Ok(None),
        }
    }

    fn parse(encoded: &str) -> Result<Self, String> {
        let encoded = encoded.trim();
        let bytes = URL_SAFE
            .decode(encoded)
            .or_else(|_| STANDARD.decode(encoded))
            .map_err(|e| format!("invalid key encoding: {e}"))?;
        let bytes: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| format!("invalid key length: expected {KEY_SIZE}, got {}", b.len()))?;
        Ok(Self(bytes))
    }

    #[must_use]
    pub fn to_base64(&self) -> String {
        URL_SAFE.encode(self.0)
    }

    fn cipher(&self) -> Result<ChaCha20Poly1305, Error> {
        ChaCha20Poly1305::new_from_slice(&self.0).map_err(|e| Error::Store(format!("cipher: {e}")))
    }
}

impl std::fmt::Debug for StoreKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StoreKey(..)")
    }
}

/// File-backed storage for one [`Credential`].
///
/// Without a key the file is plain JSON. With a key it is a random nonce
/// followed by the ChaCha20-Poly1305 ciphertext of that JSON. Loading with a key
/// still accepts plain JSON files written before encryption was enabled.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
    key: Option<StoreKey>,
}

impl TokenStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            key: None,
        }
    }

    #[must_use]
    pub fn with_key(mut self, key: Option<StoreKey>) -> Self {
        self.key = key;
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.key.is_some()
    }

    /// Writes `credential`, replacing any previous file atomically.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if serialization, encryption or the write fails.
    pub async fn save(&self, credential: &Credential) -> Result<(), Error> {
        let json = serde_json::to_vec(credential)
            .map_err(|e| Error::Store(format!("serialize credential: {e}")))?;
        let contents = match &self.key {
            Some(key) => encrypt(key, &json)?,
            None => json,
        };

        let tmp = self.tmp_path();
        let written = match write_private(&tmp, &contents).await {
            Ok(()) => tokio::fs::rename(&tmp, &self.path).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(Error::Store(format!("write {}: {e}", self.path.display())));
        }

        tracing::debug!(path = %self.path.display(), encrypted = self.is_encrypted(), "Saved token");
        Ok(())
    }

    /// Reads the stored credential and checks that its ID token decodes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the file is unreadable, or neither decryptable
    /// nor plain JSON, and [`Error::Token`] if the ID token is corrupt.
    pub async fn load(&self) -> Result<Credential, Error> {
        let contents = tokio::fs::read(&self.path)
            .await
            .map_err(|e| Error::Store(format!("read {}: {e}", self.path.display())))?;

        let credential = match &self.key {
            Some(key) => match decrypt(key, &contents) {
                Ok(json) => parse(&json)?,
                Err(e) => {
                    tracing::debug!(error = %e, "Token file not decryptable, reading as plaintext");
                    parse(&contents)?
                }
            },
            None => parse(&contents)?,
        };

        decode_unverified(&credential.id_token)?;
        Ok(credential)
    }

    // Unique per save, so concurrent saves never share a temporary file.
    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "token".into());
        name.push(format!(".{:08x}.tmp", rand::rng().random::<u32>()));
        self.path.with_file_name(name)
    }
}

/// Creates `path` readable by the owner only and writes `contents` to disk.
async fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await?;
    file.write_all(contents).await?;
    file.sync_all().await
}

fn parse(bytes: &[u8]) -> Result<Credential, Error> {
    serde_json::from_slice(bytes).map_err(|e| Error::Store(format!("parse credential: {e}")))
}

fn encrypt(key: &StoreKey, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
    let nonce: [u8; NONCE_SIZE] = rand::rng().random();
    let ciphertext = key
        .cipher()?
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| Error::Store(format!("encrypt: {e}")))?;

    let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn decrypt(key: &StoreKey, contents: &[u8]) -> Result<Vec<u8>, Error> {
    if contents.len() < NONCE_SIZE {
        return Err(Error::Store("encrypted token file is truncated".into()));
    }
    let (nonce, ciphertext) = contents.split_at(NONCE_SIZE);
    key.cipher()?
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|e| Error::Store(format!("decrypt: {e}")))
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::test_support::{signed_id_token, unsigned_id_token};

    fn credential() -> Credential {
        Credential::new("access", "refresh", signed_id_token(2_000_000_000))
            .with_expires_in(3600)
            .with_scope("openid email profile offline_access")
    }

    #[tokio::test]
    async fn plaintext_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = TokenStore::new(dir.path().join("token.json"));

        store.save(&credential()).await.unwrap();
        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("\"access_token\":\"access\""));
        assert_eq!(store.load().await.unwrap(), credential());
    }

    #[tokio::test]
    async fn encrypted_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = TokenStore::new(dir.path().join("token.json")).with_key(Some(StoreKey::generate()));

        store.save(&credential()).await.unwrap();
        let raw = std::fs::read(store.path()).unwrap();
        assert!(serde_json::from_slice::<Credential>(&raw).is_err());
        assert_eq!(store.load().await.unwrap(), credential());
    }

    #[tokio::test]
    async fn plaintext_file_loads_with_key_configured() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("token.json");
        TokenStore::new(&path).save(&credential()).await.unwrap();

        let keyed = TokenStore::new(&path).with_key(Some(StoreKey::generate()));
        assert_eq!(keyed.load().await.unwrap(), credential());
    }

    #[tokio::test]
    async fn encrypted_file_is_unreadable_without_key() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("token.json");
        TokenStore::new(&path)
            .with_key(Some(StoreKey::generate()))
            .save(&credential())
            .await
            .unwrap();

        let err = TokenStore::new(&path).load().await.unwrap_err();
        assert!(matches!(err, Error::Store(_)));

        let err = TokenStore::new(&path)
            .with_key(Some(StoreKey::generate()))
            .load()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Store(_)));
    }

    fn leftover_tmp_files(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "tmp"))
            .collect()
    }

    #[tokio::test]
    async fn failed_save_leaves_no_tmp_file() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("token.json");
        std::fs::create_dir(&target).unwrap();
        std::fs::write(target.join("occupied"), b"x").unwrap();

        let err = TokenStore::new(&target).save(&credential()).await.unwrap_err();

        assert!(matches!(err, Error::Store(_)));
        assert!(leftover_tmp_files(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn concurrent_saves_both_succeed() {
        let dir = TempDir::new().unwrap();
        let store = TokenStore::new(dir.path().join("token.json"));
        let other = Credential::new("access-2", "refresh-2", signed_id_token(2_000_000_000));

        let first = credential();
        let (a, b) = tokio::join!(store.save(&first), store.save(&other));
        a.unwrap();
        b.unwrap();

        let loaded = store.load().await.unwrap();
        assert!(loaded == credential() || loaded == other);
        assert!(leftover_tmp_files(dir.path()).is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn token_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let store = TokenStore::new(dir.path().join("token.json"));
        store.save(&credential()).await.unwrap();

        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn missing_file_is_store_error() {
        let dir = TempDir::new().unwrap();
        let err = TokenStore::new(dir.path().join("absent.json")).load().await.unwrap_err();
        assert!(matches!(err, Error::Store(_)));
    }

    #[tokio::test]
    async fn corrupt_id_token_fails_load() {
        let dir = TempDir::new().unwrap();
        let store = TokenStore::new(dir.path().join("token.json"));
        store
            .save(&Credential::new("access", "refresh", "garbage"))
            .await
            .unwrap();

        let err = store.load().await.unwrap_err();
        assert!(matches!(err, Error::Token(_)));
    }

    #[tokio::test]
    async fn unparseable_signature_still_loads() {
        let dir = TempDir::new().unwrap();
        let store = TokenStore::new(dir.path().join("token.json"));
        let stored = Credential::new("access", "refresh", unsigned_id_token(2_000_000_000));
        store.save(&stored).await.unwrap();

        assert_eq!(store.load().await.unwrap(), stored);
    }

    #[test]
    fn key_parses_both_base64_alphabets() {
        let key = StoreKey::from_bytes([0xfb; KEY_SIZE]);
        let url_safe = key.to_base64();
        let standard = STANDARD.encode([0xfb; KEY_SIZE]);
        assert_ne!(url_safe, standard);

        assert_eq!(StoreKey::from_base64(&url_safe).unwrap(), key);
        assert_eq!(StoreKey::from_base64(&standard).unwrap(), key);
    }

    #[test]
    fn key_rejects_wrong_length() {
        let err = StoreKey::from_base64(&STANDARD.encode([1u8; 16])).unwrap_err();
        assert!(matches!(err, Error::Config(ref m) if m.contains("expected 32, got 16")));
        assert!(StoreKey::from_base64("not base64!").is_err());
    }

    #[test]
    fn key_debug_is_redacted() {
        assert_eq!(format!("{:?}", StoreKey::generate()), "StoreKey(..)");
    }
}
