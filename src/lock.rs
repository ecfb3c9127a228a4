//! Startup lock (§4.9), an advisory lock file preventing two scheduler
//! processes from running against one database. The atomic write (temp
//! file, 0600, fsync, rename) is lifted from the teacher's
//! `keyvault/src/auth.rs::atomic_write_token_file`; everything else here
//! (staleness, PID content, release) is new.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;

pub struct ProcessLock {
    path: PathBuf,
}

impl ProcessLock {
    /// Acquire the lock at `path`. Fails if the lock is held and not older
    /// than `stale_after`; a stale lock is forcibly overwritten.
    pub fn acquire(path: &Path, stale_after: Duration) -> Result<Self> {
        if let Ok(existing) = fs::read_to_string(path) {
            if let Some(age) = lock_age(&existing) {
                if age < stale_after {
                    anyhow::bail!(
                        "startup lock at {} is held (age {:?}); another scheduler instance may be running",
                        path.display(),
                        age
                    );
                }
                tracing::warn!(path = %path.display(), "stale lock evicted");
            }
        }

        let contents = format!("pid={}\nacquired_at={}\n", std::process::id(), Utc::now().to_rfc3339());
        atomic_write(path, &contents)?;
        Ok(Self { path: path.to_path_buf() })
    }

    pub fn release(self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path).with_context(|| format!("removing lock file {}", self.path.display()))?;
        }
        Ok(())
    }
}

fn lock_age(contents: &str) -> Option<Duration> {
    let acquired_at = contents
        .lines()
        .find_map(|line| line.strip_prefix("acquired_at="))?
        .parse::<chrono::DateTime<Utc>>()
        .ok()?;
    let elapsed = Utc::now().signed_duration_since(acquired_at);
    elapsed.to_std().ok()
}

fn atomic_write(path: &Path, contents: &str) -> Result<()> {
    let tmp_path = path.with_extension("lock.tmp");
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)
            .context("creating temp lock file")?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(0o600))?;
        }

        use std::io::Write;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path).context("renaming temp lock file into place")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn acquire_then_release_removes_the_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scheduler.lock");
        let lock = ProcessLock::acquire(&path, Duration::from_secs(3600)).unwrap();
        assert!(path.exists());
        lock.release().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn second_acquire_fails_while_first_is_fresh() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scheduler.lock");
        let _lock = ProcessLock::acquire(&path, Duration::from_secs(3600)).unwrap();
        let second = ProcessLock::acquire(&path, Duration::from_secs(3600));
        assert!(second.is_err());
    }

    #[test]
    fn stale_lock_is_evicted_and_reacquired() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scheduler.lock");
        let stale_time = Utc::now() - chrono::Duration::hours(2);
        atomic_write(&path, &format!("pid=1\nacquired_at={}\n", stale_time.to_rfc3339())).unwrap();
        let lock = ProcessLock::acquire(&path, Duration::from_secs(3600));
        assert!(lock.is_ok());
    }
}
