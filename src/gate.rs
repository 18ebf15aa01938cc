//! Firmware relay readiness gate.
//!
//! The relay may only start once everything it depends on is in place:
//! backhaul up, both firmware handles resolved, no relay already running,
//! and no relay already completed this boot. The gate is re-evaluated after
//! every event that could flip one of those inputs; the `TransferState`
//! claim makes concurrent evaluations race-safe, so a readiness event
//! arriving while a launch is in flight starts nothing extra.

use log::info;

use crate::session::{AttrHandle, PeerSession};
use crate::transfer::TransferState;

/// The readiness predicate, kept pure for exhaustive testing.
pub fn ready(network_up: bool, ctrl: bool, data: bool, in_progress: bool, completed: bool) -> bool {
    network_up && ctrl && data && !in_progress && !completed
}

/// Spawns the relay worker once the gate opens. On target this creates the
/// pinned relay task; tests record the launch.
pub trait RelayLauncher {
    fn launch(&mut self, ctrl_handle: AttrHandle, data_handle: AttrHandle);
}

/// Evaluate the gate and, if it opens, claim the relay slot and launch.
/// Returns whether a launch happened.
pub fn check_and_launch<L: RelayLauncher>(
    network_up: bool,
    session: &PeerSession,
    state: &TransferState,
    launcher: &mut L,
) -> bool {
    let Some((ctrl, data)) = session.firmware_handles() else {
        return false;
    };
    if !ready(network_up, true, true, state.in_progress(), state.completed()) {
        return false;
    }
    // The claim is the only mutation; losing the race to another evaluation
    // is the same as the gate having been closed.
    if !state.try_begin() {
        return false;
    }
    info!("gate: all conditions met, starting firmware relay");
    launcher.launch(ctrl, data);
    true
}
