//! Durable store backed by a JSON file, the desktop equivalent of browser local
//! storage. The file holds exactly two string values under the fixed keys
//! `accessToken` and `refreshToken`; there is no schema version and no expiry
//! metadata (expiry is only discovered through a `401`).
//!
//! Writes go to a sibling temporary file that is then renamed over the target,
//! so a reader never sees a half-written pair, even across processes.

use super::{holds_refresh, CredentialPair, CredentialStore};
use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::RwLock,
};
use tracing::{debug, warn};

#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    cached: RwLock<Option<CredentialPair>>,
}

impl FileStore {
    /// Opens the store at `path`, loading any pair already persisted there.
    ///
    /// A missing file is an empty store. A malformed file, or one holding only
    /// one of the two tokens, is logged and treated as no session.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let cached = match read_pair(&path) {
            Ok(pair) => pair,
            Err(err) => {
                warn!(path = %path.display(), "Ignoring unreadable credential file: {err}");
                None
            }
        };

        Self {
            path,
            cached: RwLock::new(cached),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, pair: &CredentialPair) -> io::Result<()> {
        let payload = serde_json::to_vec_pretty(pair)?;
        let tmp = temp_path(&self.path);

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        fs::write(&tmp, payload)?;
        restrict_permissions(&tmp)?;

        if let Err(err) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(err);
        }

        Ok(())
    }

    /// Applies `next` to disk and to the cache. Caller holds the write lock.
    fn write_locked(&self, cached: &mut Option<CredentialPair>, next: Option<CredentialPair>) {
        match next {
            Some(pair) if pair.is_complete() => {
                // The cache is updated even if the write fails: this process keeps
                // its session, and the next start simply prompts for login again.
                if let Err(err) = self.persist(&pair) {
                    warn!(path = %self.path.display(), "Failed to persist credentials: {err}");
                } else {
                    debug!(path = %self.path.display(), "credentials persisted");
                }
                *cached = Some(pair);
            }
            next => {
                if next.is_some() {
                    warn!("Refusing to store an incomplete credential pair; clearing instead");
                }
                if let Err(err) = self.remove() {
                    warn!(path = %self.path.display(), "Failed to remove credential file: {err}");
                }
                *cached = None;
            }
        }
    }

    fn remove(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }
}

impl CredentialStore for FileStore {
    fn save(&self, pair: CredentialPair) {
        let mut guard = self
            .cached
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        self.write_locked(&mut guard, Some(pair));
    }

    fn clear(&self) {
        let mut guard = self
            .cached
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        self.write_locked(&mut guard, None);
    }

    fn replace_if(&self, expected_refresh: &str, next: Option<CredentialPair>) -> bool {
        let mut guard = self
            .cached
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if !holds_refresh(guard.as_ref(), expected_refresh) {
            return false;
        }
        self.write_locked(&mut guard, next);
        true
    }

    fn load(&self) -> Option<CredentialPair> {
        self.cached
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

fn read_pair(path: &Path) -> io::Result<Option<CredentialPair>> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };

    let pair: CredentialPair = serde_json::from_slice(&raw)?;

    Ok(pair.is_complete().then_some(pair))
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map_or_else(|| "credentials".into(), |n| n.to_string_lossy());
    path.with_file_name(format!(".{name}.{}.tmp", uuid::Uuid::new_v4().simple()))
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> io::Result<()> {
    Ok(())
}
