//! Encrypted on-disk template cache
//!
//! One file per user, `template_{id}.bin`, holding `nonce(12) || ciphertext+tag`
//! under AES-256-GCM. The key lives next to the entries in `device.key`
//! (hex) and is generated on first use.

use std::fs::{self, File};
use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use tracing::{debug, info, warn};

use uru4k_types::{Template, UserId};

use crate::error::{Error, Result};

const KEY_FILE: &str = "device.key";
const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// AEAD-protected template cache keyed by user
#[derive(Clone)]
pub struct SecureCache {
    dir: PathBuf,
    cipher: Aes256Gcm,
}

impl SecureCache {
    /// Open (creating if needed) the cache in `dir`
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let key = load_or_create_key(&dir.join(KEY_FILE))?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|_| Error::Config("cache key has the wrong length".into()))?;

        debug!("Template cache at {}", dir.display());
        Ok(Self { dir, cipher })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, user_id: UserId) -> PathBuf {
        self.dir.join(format!("template_{}.bin", user_id))
    }

    /// Cached template for `user_id`
    ///
    /// Returns `Ok(None)` when nothing is cached and `CacheDecryptionFailed`
    /// when the entry exists but does not authenticate.
    pub fn get(&self, user_id: UserId) -> Result<Option<Template>> {
        let data = match fs::read(self.entry_path(user_id)) {
            Ok(data) => data,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let plain = self.decrypt(&data)?;
        Ok(Some(Template::new(plain)))
    }

    /// Store `template`, replacing any previous entry
    pub fn put(&self, user_id: UserId, template: &Template) -> Result<()> {
        let sealed = self.encrypt(template.as_bytes())?;

        let path = self.entry_path(user_id);
        let tmp = path.with_extension("bin.tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&sealed)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;

        debug!(%user_id, bytes = template.len(), "Template cached");
        Ok(())
    }

    /// Drop the entry for `user_id`; returns whether one existed
    pub fn remove(&self, user_id: UserId) -> Result<bool> {
        match fs::remove_file(self.entry_path(user_id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove every entry (the key is kept); returns how many were removed
    pub fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with("template_") && name.ends_with(".bin") {
                fs::remove_file(entry.path())?;
                removed += 1;
            }
        }

        info!("Cleared {} cached templates", removed);
        Ok(removed)
    }

    fn encrypt(&self, plain: &[u8]) -> Result<Vec<u8>> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plain)
            .map_err(|_| Error::Unknown("template encryption failed".into()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(Error::CacheDecryptionFailed);
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::CacheDecryptionFailed)
    }
}

impl std::fmt::Debug for SecureCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureCache")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

/// Read the hex key, or generate and persist a new one
///
/// An unreadable key makes every entry undecryptable, so it is replaced.
fn load_or_create_key(path: &Path) -> Result<Vec<u8>> {
    match fs::read_to_string(path) {
        Ok(text) => match hex::decode(text.trim()) {
            Ok(key) if key.len() == KEY_LEN => return Ok(key),
            Ok(key) => warn!(
                "Cache key {} has {} bytes, regenerating",
                path.display(),
                key.len()
            ),
            Err(e) => warn!("Cache key {} is not hex ({}), regenerating", path.display(), e),
        },
        Err(e) if e.kind() == IoErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let key = Aes256Gcm::generate_key(OsRng);
    let mut file = create_private(path)?;
    file.write_all(hex::encode(key).as_bytes())?;
    file.sync_all()?;

    info!("Generated cache key at {}", path.display());
    Ok(key.to_vec())
}

/// Open `path` for writing, readable by the owner only
///
/// The mode given at creation does not apply to a file that already exists,
/// so it is set again before anything is written.
fn create_private(path: &Path) -> Result<File> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

        options.mode(0o600);
        let file = options.open(path)?;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
        Ok(file)
    }

    #[cfg(not(unix))]
    {
        Ok(options.open(path)?)
    }
}
