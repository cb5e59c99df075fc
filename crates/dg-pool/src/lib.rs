//! Cross-process device pool allocation using `flock(2)` directly.
//!
//! Worker processes share one persisted counter per named pool. Each
//! `allocate_next` call takes an exclusive advisory lock on the pool's
//! lock file, reads the counter, hands out `pool[counter % K]`, and
//! writes back `counter + 1`. The lock file carries a JSON diagnostic
//! so waiters can tell who holds it and reclaim it when the holder is
//! presumed dead.
//!
//! Uses raw `libc::flock` on an owned `File` rather than RAII lock
//! wrapper crates; `Drop` releases with `LOCK_UN`.

pub mod state;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use dg_core::{Allocation, DevicePool, Ticket};
use serde::{Deserialize, Serialize};
use state::{AuditEntry, CounterState};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::MetadataExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Diagnostic information written to pool lock files.
#[derive(Debug, Serialize, Deserialize)]
struct LockDiagnostic {
    pid: u32,
    pool: String,
    acquired_at: DateTime<Utc>,
}

/// Exclusive lock on one pool's counter file, backed by `flock(2)`.
struct PoolLock {
    /// The open lock file. Closing it also releases flock, but we call
    /// `LOCK_UN` explicitly in `Drop` for deterministic release timing.
    file: File,
    lock_path: PathBuf,
}

impl std::fmt::Debug for PoolLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolLock")
            .field("lock_path", &self.lock_path)
            .finish()
    }
}

impl Drop for PoolLock {
    fn drop(&mut self) {
        let fd = self.file.as_raw_fd();
        // SAFETY: `fd` is a valid file descriptor owned by `self.file`.
        // `LOCK_UN` releases the advisory lock. If the call fails, the
        // lock is still released when the fd is closed moments later.
        unsafe {
            libc::flock(fd, libc::LOCK_UN);
        }
    }
}

/// Retry and staleness policy for lock acquisition.
#[derive(Debug, Clone)]
pub struct AllocatorOptions {
    /// Bounded attempt count before degrading.
    pub max_attempts: u32,
    /// First backoff sleep; doubles per attempt.
    pub initial_backoff: Duration,
    /// Backoff cap.
    pub max_backoff: Duration,
    /// A lock older than this is presumed abandoned and reclaimed.
    pub stale_after: Duration,
}

impl Default for AllocatorOptions {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(25),
            max_backoff: Duration::from_millis(800),
            stale_after: Duration::from_secs(30),
        }
    }
}

/// Issues globally ordered device assignments against a fixed pool.
///
/// The pool itself is immutable; all mutable state lives in the
/// counter file shared by every worker process of the run. Pools with
/// different names use different counter and lock files and never
/// interfere.
#[derive(Debug)]
pub struct DevicePoolAllocator {
    pool: DevicePool,
    pools_dir: PathBuf,
    run_id: String,
    options: AllocatorOptions,
}

impl DevicePoolAllocator {
    /// `state_dir` is the run's state root; counter files live under
    /// `{state_dir}/pools/`.
    pub fn new(pool: DevicePool, state_dir: &Path) -> Self {
        Self::with_options(pool, state_dir, AllocatorOptions::default())
    }

    pub fn with_options(pool: DevicePool, state_dir: &Path, options: AllocatorOptions) -> Self {
        Self {
            pool,
            pools_dir: state_dir.join("pools"),
            run_id: ulid::Ulid::new().to_string(),
            options,
        }
    }

    pub fn pool(&self) -> &DevicePool {
        &self.pool
    }

    fn state_path(&self) -> PathBuf {
        self.pools_dir.join(format!("{}.json", self.pool.name()))
    }

    fn lock_path(&self) -> PathBuf {
        self.pools_dir.join(format!("{}.lock", self.pool.name()))
    }

    /// Allocate the next device.
    ///
    /// On the primary path the returned ticket is the pre-increment
    /// counter value: over M calls from any number of processes the
    /// tickets are exactly {0..M-1}. If the lock cannot be acquired
    /// within the bounded retry budget, a degraded allocation is
    /// returned instead of blocking forever; its ticket derives from
    /// wall-clock time and the process id and is flagged.
    pub fn allocate_next(&self) -> Result<Allocation> {
        fs::create_dir_all(&self.pools_dir).with_context(|| {
            format!("Failed to create pools directory: {}", self.pools_dir.display())
        })?;

        let Some(lock) = self.acquire_lock_with_retry()? else {
            let ticket = degraded_ticket();
            warn!(
                pool = self.pool.name(),
                ticket = ticket.value(),
                "lock retries exhausted, issuing degraded time+pid ticket"
            );
            return Ok(Allocation {
                device: self.pool.device_for(ticket).clone(),
                ticket,
                degraded: true,
            });
        };

        let state_path = self.state_path();
        let mut state = read_state(&state_path);
        if state.repair() {
            warn!(
                pool = self.pool.name(),
                path = %state_path.display(),
                "repaired corrupted counter to zero"
            );
        }

        let ticket = Ticket::new(state.counter as u64);
        let device = self.pool.device_for(ticket).clone();
        state.push_audit(AuditEntry {
            index: (ticket.value() as usize) % self.pool.len(),
            device: device.clone(),
            process_id: std::process::id(),
            run_id: self.run_id.clone(),
            timestamp: Utc::now(),
        });
        state.counter += 1;
        state.total_allocations += 1;
        state.last_updated = Some(Utc::now());

        write_state(&state_path, &state)?;
        drop(lock);

        debug!(
            pool = self.pool.name(),
            ticket = ticket.value(),
            device = %device,
            "allocated device"
        );
        Ok(Allocation {
            device,
            ticket,
            degraded: false,
        })
    }

    /// Read the persisted counter state without mutating it (for
    /// status reporting). Still takes the lock so the snapshot is
    /// consistent with in-flight writers.
    pub fn status(&self) -> Result<CounterState> {
        fs::create_dir_all(&self.pools_dir).with_context(|| {
            format!("Failed to create pools directory: {}", self.pools_dir.display())
        })?;
        let Some(_lock) = self.acquire_lock_with_retry()? else {
            anyhow::bail!(dg_core::GridError::LockExhausted {
                pool: self.pool.name().to_string(),
                attempts: self.options.max_attempts,
            });
        };
        Ok(read_state(&self.state_path()))
    }

    /// Bounded retry with exponential backoff. `Ok(None)` means the
    /// retry budget is exhausted and the caller should degrade.
    fn acquire_lock_with_retry(&self) -> Result<Option<PoolLock>> {
        let lock_path = self.lock_path();
        let mut backoff = self.options.initial_backoff;

        for attempt in 0..self.options.max_attempts {
            if let Some(lock) = try_acquire(&lock_path, self.pool.name())? {
                return Ok(Some(lock));
            }

            if self.reclaim_if_stale(&lock_path)? {
                // Lock file replaced; retry immediately.
                continue;
            }

            debug!(
                pool = self.pool.name(),
                attempt,
                backoff_ms = backoff.as_millis() as u64,
                "pool lock held, backing off"
            );
            std::thread::sleep(backoff);
            backoff = (backoff * 2).min(self.options.max_backoff);
        }

        Ok(None)
    }

    /// Reclaim a lock whose holder is presumed dead: if the diagnostic
    /// timestamp is older than `stale_after`, unlink the lock file so
    /// waiters lock a fresh inode. Returns true when a reclaim
    /// happened.
    ///
    /// Reclaims are serialized through a meta-lock and the diagnostic
    /// is read only after taking it, so a waiter that saw the stale
    /// holder earlier can never unlink a fresh lock another reclaimer
    /// already re-created. The meta-lock file itself is never
    /// unlinked.
    fn reclaim_if_stale(&self, lock_path: &Path) -> Result<bool> {
        let meta_path = self
            .pools_dir
            .join(format!("{}.reclaim.lock", self.pool.name()));
        let meta = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&meta_path)
            .with_context(|| format!("Failed to open reclaim lock: {}", meta_path.display()))?;

        // SAFETY: `meta` owns a valid fd. `LOCK_EX | LOCK_NB` requests
        // an exclusive non-blocking lock; the return value is checked.
        // Closing `meta` at the end of this function releases it.
        let ret = unsafe { libc::flock(meta.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if ret != 0 {
            // Another waiter is mid-reclaim; let it finish and retry.
            return Ok(false);
        }

        let contents = match fs::read_to_string(lock_path) {
            Ok(c) => c,
            // Already gone (the previous reclaim finished).
            Err(_) => return Ok(false),
        };
        let Ok(diagnostic) = serde_json::from_str::<LockDiagnostic>(&contents) else {
            // Holder has the flock but has not written its diagnostic
            // yet; not reclaimable.
            return Ok(false);
        };

        let age = Utc::now().signed_duration_since(diagnostic.acquired_at);
        let stale = chrono::Duration::from_std(self.options.stale_after)
            .unwrap_or_else(|_| chrono::Duration::seconds(30));
        if age <= stale {
            return Ok(false);
        }

        warn!(
            pool = self.pool.name(),
            holder_pid = diagnostic.pid,
            age_secs = age.num_seconds(),
            "reclaiming stale pool lock"
        );
        match fs::remove_file(lock_path) {
            Ok(()) => Ok(true),
            // Lost a benign race with an external cleanup.
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err)
                .with_context(|| format!("Failed to reclaim stale lock: {}", lock_path.display())),
        }
    }
}

/// Non-blocking exclusive lock attempt. `Ok(None)` when held elsewhere.
fn try_acquire(lock_path: &Path, pool_name: &str) -> Result<Option<PoolLock>> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path)
        .with_context(|| format!("Failed to open lock file: {}", lock_path.display()))?;

    let fd = file.as_raw_fd();

    // SAFETY: `fd` is a valid file descriptor from the `File` we just
    // opened. `LOCK_EX | LOCK_NB` requests an exclusive non-blocking
    // lock; the return value is checked.
    let ret = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
    if ret != 0 {
        return Ok(None);
    }

    // A reclaim may have unlinked the path between our open and the
    // flock; the lock then sits on an orphaned inode and excludes
    // nobody. Dropping `file` releases it and the caller retries on
    // the fresh path.
    let locked_ino = file
        .metadata()
        .context("Failed to stat lock file")?
        .ino();
    match fs::metadata(lock_path) {
        Ok(current) if current.ino() == locked_ino => {}
        _ => return Ok(None),
    }

    let mut lock = PoolLock {
        file,
        lock_path: lock_path.to_path_buf(),
    };

    let diagnostic = LockDiagnostic {
        pid: std::process::id(),
        pool: pool_name.to_string(),
        acquired_at: Utc::now(),
    };
    let json = serde_json::to_string(&diagnostic).context("Failed to serialize lock diagnostic")?;
    lock.file.set_len(0).context("Failed to truncate lock file")?;
    lock.file
        .write_all(json.as_bytes())
        .context("Failed to write lock diagnostic")?;
    lock.file.flush().context("Failed to flush lock file")?;

    Ok(Some(lock))
}

/// Read counter state; a missing or unparseable file is an empty
/// (repaired) state.
fn read_state(state_path: &Path) -> CounterState {
    match fs::read_to_string(state_path) {
        Ok(contents) if !contents.trim().is_empty() => {
            match serde_json::from_str::<CounterState>(&contents) {
                Ok(state) => state,
                Err(err) => {
                    warn!(
                        path = %state_path.display(),
                        error = %err,
                        "unparseable pool state, starting from zero"
                    );
                    CounterState::default()
                }
            }
        }
        _ => CounterState::default(),
    }
}

/// Rewrite the state file in place and fsync. Only called under the
/// pool lock, so truncate-and-rewrite is safe against other writers.
fn write_state(state_path: &Path, state: &CounterState) -> Result<()> {
    let json = serde_json::to_string_pretty(state).context("Failed to serialize pool state")?;
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(state_path)
        .with_context(|| format!("Failed to open state file: {}", state_path.display()))?;
    file.write_all(json.as_bytes())
        .with_context(|| format!("Failed to write state file: {}", state_path.display()))?;
    file.sync_all()
        .with_context(|| format!("Failed to sync state file: {}", state_path.display()))?;
    Ok(())
}

/// Fallback ticket for degraded mode: wall-clock milliseconds combined
/// with the process id. Collisions are possible but require two
/// processes with the same pid-mod-100000 in the same millisecond.
fn degraded_ticket() -> Ticket {
    let millis = Utc::now().timestamp_millis().max(0) as u64;
    let pid = std::process::id() as u64 % 100_000;
    Ticket::new(millis * 100_000 + pid)
}
