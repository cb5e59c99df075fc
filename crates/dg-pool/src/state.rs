//! Persisted allocation-counter state, one file per named pool.

use chrono::{DateTime, Utc};
use dg_core::Device;
use serde::{Deserialize, Serialize};

/// Maximum number of audit entries retained per pool.
pub const AUDIT_RING_CAPACITY: usize = 32;

/// One allocation recorded in the audit ring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Device index that was handed out (`ticket % pool_size`).
    pub index: usize,
    pub device: Device,
    pub process_id: u32,
    /// ULID of the allocator instance that made the call.
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
}

/// The shared counter record, serialized as JSON.
///
/// This is the only mutable cross-process entity in the system and is
/// always read and written under the pool's exclusive lock.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CounterState {
    /// Next ticket to issue. Strictly increases by 1 per successful
    /// non-degraded allocation.
    pub counter: i64,
    pub last_updated: Option<DateTime<Utc>>,
    pub total_allocations: u64,
    /// Bounded ring of recent allocations, oldest first.
    #[serde(default)]
    pub recent: Vec<AuditEntry>,
}

impl CounterState {
    /// Clamp a corrupted (negative) counter back to zero. Returns true
    /// when a repair happened.
    pub fn repair(&mut self) -> bool {
        if self.counter < 0 {
            self.counter = 0;
            true
        } else {
            false
        }
    }

    /// Append an audit entry, dropping the oldest past capacity.
    pub fn push_audit(&mut self, entry: AuditEntry) {
        self.recent.push(entry);
        if self.recent.len() > AUDIT_RING_CAPACITY {
            let excess = self.recent.len() - AUDIT_RING_CAPACITY;
            self.recent.drain(..excess);
        }
    }
}
