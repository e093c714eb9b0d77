//! Encrypted on-disk cache of previously obtained auth tokens.
//!
//! Tokens are sealed with a key derived from the account password and
//! keyed by a stable account identifier, so a token can only be unlocked
//! by whoever knows the password that obtained it. A corrupt, unreadable,
//! or foreign-keyed store never fails the caller: every lookup problem
//! degrades to a cache miss.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use crate::crypto;
use crate::error::Result;

/// Directory under the per-user config dir holding the token file.
const STORE_DIR: &str = "goseafile";

/// File name of the token cache.
const STORE_FILE: &str = "tokens.json";

/// One cache entry as serialized on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredToken {
    /// Base64 of the sealed token blob.
    #[serde(rename = "Token")]
    token: String,
    #[serde(rename = "TimeStamp", with = "time::serde::rfc3339")]
    timestamp: OffsetDateTime,
}

/// A decrypted cache hit.
#[derive(Debug, Clone)]
pub struct CachedToken {
    pub token: String,
    pub timestamp: OffsetDateTime,
}

impl CachedToken {
    /// Age of the entry relative to the current wall clock.
    pub fn age(&self) -> Duration {
        let elapsed = OffsetDateTime::now_utc() - self.timestamp;
        elapsed.try_into().unwrap_or(Duration::ZERO)
    }
}

/// Stable identifier for a (server, user) pair.
///
/// A cache key, not a security boundary.
pub fn account_id(url: &str, user: &str) -> String {
    hex::encode(Sha256::digest(format!("{url}##{user}").as_bytes()))
}

/// Handle to the token cache file.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    /// Use an explicit file location.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the fixed per-user location
    /// (`<config-dir>/goseafile/tokens.json`), or `None` when no config
    /// directory can be resolved.
    pub fn open_default() -> Option<Self> {
        let dir = dirs::config_dir()?;
        Some(Self::new(dir.join(STORE_DIR).join(STORE_FILE)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look up the cached token for `account`, unlocking it with `key`.
    ///
    /// Any failure along the way is logged and reported as a miss.
    pub fn lookup(&self, account: &str, key: &[u8; crypto::KEY_SIZE]) -> Option<CachedToken> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) => {
                log::debug!("token store: could not read {}: {err}", self.path.display());
                return None;
            }
        };
        let entries: HashMap<String, StoredToken> = match serde_json::from_slice(&bytes) {
            Ok(entries) => entries,
            Err(err) => {
                log::warn!(
                    "token store: could not parse {}: {err}",
                    self.path.display()
                );
                return None;
            }
        };
        let entry = match entries.get(account) {
            Some(entry) => entry,
            None => {
                log::debug!("token store: no entry for account {account}");
                return None;
            }
        };
        let sealed = match BASE64.decode(&entry.token) {
            Ok(sealed) => sealed,
            Err(err) => {
                log::warn!("token store: entry for {account} is not valid base64: {err}");
                return None;
            }
        };
        let plaintext = match crypto::unseal(key, &sealed) {
            Ok(plaintext) => plaintext,
            Err(err) => {
                log::warn!("token store: could not decrypt token for {account}: {err}");
                return None;
            }
        };
        match String::from_utf8(plaintext) {
            Ok(token) => Some(CachedToken {
                token,
                timestamp: entry.timestamp,
            }),
            Err(err) => {
                log::warn!("token store: decrypted token for {account} is not UTF-8: {err}");
                None
            }
        }
    }

    /// Insert the token for `account`, or delete the entry when `token` is
    /// empty.
    ///
    /// The file is re-read and merged, entries older than `expiry` are
    /// purged (when `expiry` is nonzero), and the whole map is rewritten.
    /// Concurrent writers race last-writer-wins; acceptable for a
    /// single-user CLI.
    pub fn store(
        &self,
        account: &str,
        token: &str,
        key: &[u8; crypto::KEY_SIZE],
        expiry: Duration,
    ) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
            restrict_permissions(parent, 0o700)?;
        }

        let mut entries: HashMap<String, StoredToken> = match fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(err) => {
                log::debug!(
                    "token store: starting fresh, could not re-read {}: {err}",
                    self.path.display()
                );
                HashMap::new()
            }
        };

        if !expiry.is_zero() {
            let now = OffsetDateTime::now_utc();
            entries.retain(|id, entry| {
                let fresh = (now - entry.timestamp) <= expiry;
                if !fresh {
                    log::debug!("token store: purging expired entry {id}");
                }
                fresh
            });
        }

        if token.is_empty() {
            entries.remove(account);
        } else {
            let sealed = crypto::seal(key, token.as_bytes())?;
            entries.insert(
                account.to_string(),
                StoredToken {
                    token: BASE64.encode(sealed),
                    timestamp: OffsetDateTime::now_utc(),
                },
            );
        }

        fs::write(&self.path, serde_json::to_vec(&entries)?)?;
        restrict_permissions(&self.path, 0o600)?;
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}
