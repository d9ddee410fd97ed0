/*!
 * Scan coordination.
 *
 * Aggregates per-manager scanning activity into a single global scan
 * lifecycle: one scan in flight at a time, exactly one `ScanningFinished`
 * published per scan once every manager reports idle.
 */
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use devrelay_core::error::{Error, Result};
use devrelay_core::message::{ServerMessage, SYSTEM_MESSAGE_ID};

use crate::fanout::EventFanout;
use crate::manager::{ManagerSet, SubtypeManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanPhase {
    Idle,
    Starting,
    Scanning,
}

#[derive(Debug)]
struct ScanState {
    phase: ScanPhase,
    sent_finished: bool,
}

/// State machine coordinating the global scan across all subtype managers.
///
/// The state mutex is held across the whole start sequence and across each
/// aggregation check, so completion events from fast managers serialize
/// behind it instead of firing the check before every manager has been
/// asked to start.
#[derive(Debug)]
pub struct ScanCoordinator {
    state: Mutex<ScanState>,
    managers: Arc<ManagerSet>,
    fanout: EventFanout,
}

impl ScanCoordinator {
    /// Create a coordinator over the given manager set.
    pub fn new(managers: Arc<ManagerSet>, fanout: EventFanout) -> Self {
        Self {
            state: Mutex::new(ScanState {
                phase: ScanPhase::Idle,
                sent_finished: true,
            }),
            managers,
            fanout,
        }
    }

    /// Start a global scan.
    ///
    /// Fails with `AlreadyScanning` while a scan is in flight and with
    /// `NoScanBackends` when the manager set is empty. Runs the completion
    /// check exactly once before returning, so a set of managers that all
    /// finish synchronously still produces one `ScanningFinished`.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.phase != ScanPhase::Idle {
            return Err(Error::device("A device scan is already in progress"));
        }

        let managers = self.managers.all().await;
        if managers.is_empty() {
            return Err(Error::device("No scan backends available"));
        }

        state.phase = ScanPhase::Starting;
        state.sent_finished = false;

        for manager in &managers {
            if let Err(e) = manager.start_scanning().await {
                // Roll back so a later start can retry. Managers already
                // running keep scanning; their completions are ignored in
                // Idle, so no stray ScanningFinished escapes.
                state.phase = ScanPhase::Idle;
                state.sent_finished = true;
                return Err(Error::device(format!(
                    "scan start failed in {} backend: {e}",
                    manager.kind()
                )));
            }
            debug!(kind = manager.kind(), "scan backend started");
        }

        state.phase = ScanPhase::Scanning;
        self.finish_check(&mut state, &managers);
        Ok(())
    }

    /// Stop an in-progress scan.
    ///
    /// Each manager fires its own `ScanningFinished` afterwards, which
    /// drives the aggregation to completion; no synthetic completion is
    /// published here. Stopping with no scan in flight is a no-op.
    pub async fn stop(&self) -> Result<()> {
        let state = self.state.lock().await;
        if state.phase == ScanPhase::Idle {
            debug!("stop requested with no scan in progress");
        }
        for manager in self.managers.all().await {
            if let Err(e) = manager.stop_scanning().await {
                warn!(kind = manager.kind(), error = %e, "scan backend stop failed");
            }
        }
        Ok(())
    }

    /// A subtype manager reported its own scan complete.
    pub async fn on_manager_finished(&self) {
        let mut state = self.state.lock().await;
        match state.phase {
            ScanPhase::Idle => {
                debug!("scan backend finished outside of a scan, ignoring");
            }
            ScanPhase::Starting => {
                debug!("scan backend finished while others are still starting, suppressed");
            }
            ScanPhase::Scanning => {
                let managers = self.managers.all().await;
                self.finish_check(&mut state, &managers);
            }
        }
    }

    /// Whether a scan is in flight.
    pub async fn is_scanning(&self) -> bool {
        self.state.lock().await.phase != ScanPhase::Idle
    }

    fn finish_check(&self, state: &mut ScanState, managers: &[Arc<dyn SubtypeManager>]) {
        if state.sent_finished {
            return;
        }
        if managers.iter().any(|manager| manager.is_scanning()) {
            return;
        }
        state.sent_finished = true;
        state.phase = ScanPhase::Idle;
        info!("all scan backends finished");
        self.fanout.publish(ServerMessage::ScanningFinished {
            id: SYSTEM_MESSAGE_ID,
        });
    }
}
