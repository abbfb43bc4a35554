//! Advisory per-path locks serializing read-modify-write cycles on storage.
//!
//! Holders inside this process are tracked in a mutex guarded map; a lock
//! file under the lock directory extends the exclusion to other processes
//! sharing the same storage. A lock older than the staleness threshold is
//! broken by the next contender, and the original holder's release then
//! fails instead of silently succeeding.
use std::collections::HashMap;
use std::fs;
use std::io::{
    self,
    Write,
};
use std::path::{
    Path,
    PathBuf,
};
use std::sync::{
    Condvar,
    Mutex,
    MutexGuard,
};
use std::time::{
    Duration,
    Instant,
    SystemTime,
};

use log::{
    debug,
    warn,
};
use sha2::{
    Digest,
    Sha256,
};
use uuid::Uuid;

use crate::error::LdpError;

pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(30);
pub const DEFAULT_RETRIES: u32 = 10;
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(50);
const MAX_RETRY_INTERVAL: Duration = Duration::from_secs(1);

struct Holder {
    token: String,
    acquired_at: Instant,
}

pub struct LockManager {
    dir: PathBuf,
    stale_after: Duration,
    retries: u32,
    retry_interval: Duration,
    held: Mutex<HashMap<PathBuf, Holder>>,
    released: Condvar,
}

/// A held lock. Released explicitly with [`Lock::release`], or on drop.
pub struct Lock<'a> {
    manager: &'a LockManager,
    pub path: PathBuf,
    pub acquired_at: SystemTime,
    pub stale_after: Duration,
    pub retry_budget: u32,
    lock_file: PathBuf,
    token: String,
    done: bool,
}

fn poisoned<T>(_: T) -> LdpError {
    LdpError::Internal("lock table poisoned".to_string())
}

impl LockManager {

    pub fn new(dir: &Path) -> LockManager {
        LockManager::with_policy(dir, DEFAULT_STALE_AFTER, DEFAULT_RETRIES, DEFAULT_RETRY_INTERVAL)
    }

    pub fn with_policy(dir: &Path, stale_after: Duration, retries: u32, retry_interval: Duration) -> LockManager {
        LockManager {
            dir: dir.to_path_buf(),
            stale_after,
            retries,
            retry_interval,
            held: Mutex::new(HashMap::new()),
            released: Condvar::new(),
        }
    }

    fn lock_file_for(&self, path: &Path) -> PathBuf {
        let mut h = Sha256::new();
        h.update(path.to_string_lossy().as_bytes());
        let name = format!("{}.lock", hex::encode(h.finalize()));
        self.dir.join(name)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        let wait = self.retry_interval.saturating_mul(factor);
        wait.min(MAX_RETRY_INTERVAL)
    }

    fn file_is_stale(&self, lock_file: &Path) -> bool {
        let modified = match fs::metadata(lock_file).and_then(|m| m.modified()) {
            Ok(v) => v,
            Err(_) => {
                return false;
            },
        };
        match SystemTime::now().duration_since(modified) {
            Ok(age) => age >= self.stale_after,
            Err(_) => false,
        }
    }

    fn create_lock_file(lock_file: &Path, token: &str) -> io::Result<()> {
        let mut f = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(lock_file)?;
        f.write_all(token.as_bytes())?;
        f.sync_all()
    }

    /// Blocks until the lock on `path` is held, or the retry budget runs out.
    pub fn acquire(&self, path: &Path) -> Result<Lock<'_>, LdpError> {
        let key = path.to_path_buf();
        let lock_file = self.lock_file_for(&key);
        if let Err(e) = fs::create_dir_all(&self.dir) {
            return Err(LdpError::internal("cannot create lock directory", e));
        }
        let token = Uuid::new_v4().simple().to_string();

        let mut held = self.held.lock().map_err(poisoned)?;
        let mut attempt: u32 = 0;
        loop {
            let local_stale = held
                .get(&key)
                .map(|h| h.acquired_at.elapsed() >= self.stale_after);
            let busy = match local_stale {
                Some(false) => true,
                other => {
                    if other == Some(true) {
                        warn!("breaking stale lock on {:?}", key);
                        held.remove(&key);
                        let _ = fs::remove_file(&lock_file);
                    }
                    match LockManager::create_lock_file(&lock_file, &token) {
                        Ok(()) => {
                            held.insert(key.clone(), Holder {
                                token: token.clone(),
                                acquired_at: Instant::now(),
                            });
                            debug!("locked {:?}", key);
                            return Ok(Lock {
                                manager: self,
                                path: key,
                                acquired_at: SystemTime::now(),
                                stale_after: self.stale_after,
                                retry_budget: self.retries,
                                lock_file,
                                token,
                                done: false,
                            });
                        },
                        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                            if self.file_is_stale(&lock_file) {
                                warn!("breaking stale lock file {:?} for {:?}", lock_file, key);
                                if let Err(e) = fs::remove_file(&lock_file) {
                                    if e.kind() != io::ErrorKind::NotFound {
                                        return Err(LdpError::internal("cannot break stale lock", e));
                                    }
                                }
                                continue;
                            }
                            true
                        },
                        Err(e) => {
                            return Err(LdpError::internal("cannot create lock file", e));
                        },
                    }
                },
            };

            if busy {
                if attempt >= self.retries {
                    return Err(LdpError::Locked(format!("resource {:?} is locked, try again later", key)));
                }
                let wait = self.backoff(attempt);
                let (guard, res) = self.released.wait_timeout(held, wait).map_err(poisoned)?;
                held = guard;
                if res.timed_out() {
                    attempt += 1;
                }
            }
        }
    }

    fn release(&self, path: &Path, lock_file: &Path, token: &str) -> Result<(), LdpError> {
        let mut held: MutexGuard<HashMap<PathBuf, Holder>> = self.held.lock().map_err(poisoned)?;
        let ours = match held.get(path) {
            Some(h) => h.token == token,
            None => false,
        };
        if ours {
            held.remove(path);
        }
        let file_ours = match fs::read_to_string(lock_file) {
            Ok(v) => v.trim() == token,
            Err(_) => false,
        };
        if file_ours {
            if let Err(e) = fs::remove_file(lock_file) {
                warn!("cannot remove lock file {:?}: {}", lock_file, e);
            }
        }
        drop(held);
        self.released.notify_all();

        if !ours || !file_ours {
            warn!("lock on {:?} was broken while held", path);
            return Err(LdpError::Internal(format!("lock on {:?} was compromised", path)));
        }
        debug!("unlocked {:?}", path);
        Ok(())
    }

    /// Runs `f` while holding the lock on `path`.
    ///
    /// The lock is released on every exit path of `f`. An error from `f`
    /// takes precedence over a failed release.
    pub fn with_lock<T, F>(&self, path: &Path, f: F) -> Result<T, LdpError>
    where
        F: FnOnce() -> Result<T, LdpError>,
    {
        let lock = self.acquire(path)?;
        let result = f();
        let released = lock.release();
        match result {
            Ok(v) => released.map(|_| v),
            Err(e) => {
                if let Err(r) = released {
                    warn!("{}", r);
                }
                Err(e)
            },
        }
    }
}

impl<'a> Lock<'a> {
    pub fn release(mut self) -> Result<(), LdpError> {
        self.done = true;
        self.manager.release(&self.path, &self.lock_file, &self.token)
    }
}

impl<'a> Drop for Lock<'a> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        if let Err(e) = self.manager.release(&self.path, &self.lock_file, &self.token) {
            warn!("{}", e);
        }
    }
}
