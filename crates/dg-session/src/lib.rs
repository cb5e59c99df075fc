//! Per-worker session lifecycle coordination.
//!
//! A worker process runs units strictly sequentially. Before each unit
//! the coordinator allocates a device, assembles a capability, and
//! asks the backend for a fresh session; if a session from the
//! previous unit is still active it is torn down first, so one unit
//! always equals one isolated session even when the OS process is
//! reused across units.
//!
//! The allocator, assembler inputs, and backend are injected at
//! construction rather than looked up ambiently, keeping lifetimes and
//! test setup explicit.

use chrono::{DateTime, Utc};
use dg_capability::{Capability, PlatformConfig, assemble};
use dg_core::{AppBuild, Device, GridError};
use dg_locale::ResolvedLocale;
use dg_pool::DevicePoolAllocator;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Opaque handle to a live remote session. The external runner owns
/// the session; the coordinator only requests creation and teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle(pub String);

/// Implemented by the external runner's session machinery.
pub trait SessionBackend {
    fn create(&mut self, capability: &Capability) -> Result<SessionHandle, GridError>;
    fn teardown(&mut self, handle: SessionHandle) -> Result<(), GridError>;
}

/// Outcome of one finished unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitOutcome {
    pub unit_id: String,
    pub passed: bool,
    pub device: Device,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug)]
enum CoordinatorState {
    NoSession,
    SessionActive {
        unit_id: String,
        device: Device,
        handle: SessionHandle,
    },
}

/// Ties allocation and capability assembly to session creation and
/// teardown, driven by the runner's per-unit hooks.
pub struct SessionLifecycleCoordinator<'a, B: SessionBackend> {
    allocator: &'a DevicePoolAllocator,
    platform: &'a PlatformConfig,
    build: &'a AppBuild,
    backend: B,
    state: CoordinatorState,
    outcomes: Vec<UnitOutcome>,
}

impl<'a, B: SessionBackend> SessionLifecycleCoordinator<'a, B> {
    pub fn new(
        allocator: &'a DevicePoolAllocator,
        platform: &'a PlatformConfig,
        build: &'a AppBuild,
        backend: B,
    ) -> Self {
        Self {
            allocator,
            platform,
            build,
            backend,
            state: CoordinatorState::NoSession,
            outcomes: Vec::new(),
        }
    }

    /// Pre-unit hook: guarantee a fresh session on a newly allocated
    /// device for `unit_id`.
    ///
    /// Allocation, assembly, or creation failures propagate; in every
    /// failure case the coordinator is left in `NoSession` so a stale
    /// session can never be silently reused.
    pub fn before_unit(
        &mut self,
        unit_id: &str,
        locale: &ResolvedLocale,
    ) -> anyhow::Result<&SessionHandle> {
        if let CoordinatorState::SessionActive { unit_id: prev, handle, .. } =
            std::mem::replace(&mut self.state, CoordinatorState::NoSession)
        {
            debug!(previous_unit = %prev, "tearing down session before next unit");
            self.backend.teardown(handle)?;
        }

        let allocation = self.allocator.allocate_next()?;
        if allocation.degraded {
            warn!(
                unit = unit_id,
                ticket = allocation.ticket.value(),
                "running unit on a degraded allocation"
            );
        }
        let capability = assemble(&allocation.device, self.build, locale, self.platform)?;
        let handle = self.backend.create(&capability)?;

        info!(
            unit = unit_id,
            device = %allocation.device,
            ticket = allocation.ticket.value(),
            "session created"
        );
        self.state = CoordinatorState::SessionActive {
            unit_id: unit_id.to_string(),
            device: allocation.device,
            handle,
        };
        match &self.state {
            CoordinatorState::SessionActive { handle, .. } => Ok(handle),
            CoordinatorState::NoSession => unreachable!("state set above"),
        }
    }

    /// Post-unit hook: record the outcome. The session stays active
    /// until the next `before_unit` or `shutdown`.
    pub fn after_unit(&mut self, unit_id: &str, passed: bool) {
        let device = match &self.state {
            CoordinatorState::SessionActive { device, .. } => device.clone(),
            CoordinatorState::NoSession => {
                warn!(unit = unit_id, "outcome reported with no active session");
                return;
            }
        };
        debug!(unit = unit_id, passed, "unit finished");
        self.outcomes.push(UnitOutcome {
            unit_id: unit_id.to_string(),
            passed,
            device,
            finished_at: Utc::now(),
        });
    }

    /// Process-shutdown hook: release any active session.
    pub fn shutdown(&mut self) -> anyhow::Result<()> {
        if let CoordinatorState::SessionActive { unit_id, handle, .. } =
            std::mem::replace(&mut self.state, CoordinatorState::NoSession)
        {
            info!(unit = %unit_id, "releasing session at shutdown");
            self.backend.teardown(handle)?;
        }
        Ok(())
    }

    pub fn has_active_session(&self) -> bool {
        matches!(self.state, CoordinatorState::SessionActive { .. })
    }

    pub fn outcomes(&self) -> &[UnitOutcome] {
        &self.outcomes
    }
}
