use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// The signed-in user as far as the claimer is concerned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    pub user_token: Option<String>,
    #[serde(default)]
    pub wallet_address: Option<String>,
}

impl Session {
    /// Token and wallet, if both are present and non-blank.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        let token = self.user_token.as_deref().map(str::trim)?;
        let wallet = self.wallet_address.as_deref().map(str::trim)?;
        if token.is_empty() || wallet.is_empty() {
            return None;
        }
        Some((token, wallet))
    }
}

pub trait SessionStore {
    fn load(&self) -> Result<Session>;
    fn save(&self, session: &Session) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// JSON file store; a missing file is an empty session.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lease file guarding claims for this session, next to the session file.
    pub fn lock_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Takes the per-session claim lease, or `None` while another process holds a live one.
    pub fn try_lock_claim(&self, lease_ms: u64) -> Result<Option<ClaimLease>> {
        ClaimLease::try_acquire(self.lock_path(), lease_ms, now_ms())
    }
}

fn now_ms() -> u64 {
    u64::try_from(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis(),
    )
    .unwrap_or(u64::MAX)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub holder_id: String,
    pub acquired_at_ms: u64,
    pub expires_at_ms: u64,
}

impl LeaseRecord {
    fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

/// Held claim lease; the file is removed on drop if this process still owns it.
#[derive(Debug)]
pub struct ClaimLease {
    path: PathBuf,
    record: LeaseRecord,
}

impl ClaimLease {
    /// Creates the lease file exclusively. An expired lease left by a crashed run is taken over.
    pub fn try_acquire(path: PathBuf, lease_ms: u64, now_ms: u64) -> Result<Option<Self>> {
        let record = LeaseRecord {
            holder_id: format!("pid-{}-{now_ms}", std::process::id()),
            acquired_at_ms: now_ms,
            expires_at_ms: now_ms.saturating_add(lease_ms.max(1)),
        };

        for _ in 0..2 {
            match Self::create(&path, &record) {
                Ok(()) => {
                    debug!(path = %path.display(), holder = %record.holder_id, "claim lease acquired");
                    return Ok(Some(Self { path, record }));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("failed creating lease file: {}", path.display()))
                }
            }

            match read_lease(&path, lease_ms)? {
                Some(current) if !current.is_expired(now_ms) => return Ok(None),
                Some(current) => {
                    warn!(holder = %current.holder_id, "taking over expired claim lease");
                    remove_if_present(&path)?;
                }
                None => {}
            }
        }
        Ok(None)
    }

    fn create(path: &Path, record: &LeaseRecord) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut f = OpenOptions::new().write(true).create_new(true).open(path)?;
        let raw = serde_json::to_vec(record).map_err(std::io::Error::other)?;
        f.write_all(&raw)?;
        f.sync_all()
    }

    pub fn record(&self) -> &LeaseRecord {
        &self.record
    }
}

impl Drop for ClaimLease {
    fn drop(&mut self) {
        let still_ours = matches!(
            read_lease(&self.path, 0),
            Ok(Some(current)) if current.holder_id == self.record.holder_id
        );
        if still_ours {
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!(path = %self.path.display(), error = %e, "failed releasing claim lease");
            }
        }
    }
}

/// Reads the lease at `path`. A file that does not parse (mid-write, or left by a crash) is
/// dated by its mtime and lives `lease_ms` from then.
fn read_lease(path: &Path, lease_ms: u64) -> Result<Option<LeaseRecord>> {
    match std::fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(_) => {
                let modified_ms = std::fs::metadata(path)
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .and_then(|d| u64::try_from(d.as_millis()).ok())
                    .unwrap_or_else(now_ms);
                Ok(Some(LeaseRecord {
                    holder_id: "unknown".to_string(),
                    acquired_at_ms: modified_ms,
                    expires_at_ms: modified_ms.saturating_add(lease_ms.max(1)),
                }))
            }
        },
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("failed reading lease file: {}", path.display())),
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("failed removing lease file: {}", path.display())),
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Result<Session> {
        if !self.path.exists() {
            return Ok(Session::default());
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed reading session file: {}", self.path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed parsing session file: {}", self.path.display()))
    }

    fn save(&self, session: &Session) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed creating {}", parent.display()))?;
            }
        }
        let raw = serde_json::to_string_pretty(session).context("failed encoding session")?;
        std::fs::write(&self.path, raw)
            .with_context(|| format!("failed writing session file: {}", self.path.display()))
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e)
                .with_context(|| format!("failed removing session file: {}", self.path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_require_both_fields() {
        let mut s = Session::default();
        assert!(s.credentials().is_none());
        s.user_token = Some("tok".to_string());
        assert!(s.credentials().is_none());
        s.wallet_address = Some("  ".to_string());
        assert!(s.credentials().is_none());
        s.wallet_address = Some(" 0xabc ".to_string());
        assert_eq!(s.credentials(), Some(("tok", "0xabc")));
    }
}
