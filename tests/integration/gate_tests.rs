//! Readiness gate scenarios: launch triggering across the event orderings
//! the main loop actually sees.

use crate::mock_link::RecordingLauncher;
use shmgate::config::{
    FIRMWARE_CTRL_UUID, FIRMWARE_DATA_UUID, GatewayConfig,
};
use shmgate::gate::check_and_launch;
use shmgate::session::{LinkEvent, PeerAddr, SessionMachine};
use shmgate::transfer::TransferState;

const NODE: PeerAddr = PeerAddr {
    value: [0x84, 0xf7, 0x03, 0x10, 0x20, 0x30],
    addr_type: 0,
};

/// Drive a machine until both firmware handles are resolved.
fn machine_with_handles() -> SessionMachine {
    let mut m = SessionMachine::new(&GatewayConfig::default());
    let _ = m.start();
    let _ = m.handle(LinkEvent::ScanResult {
        addr: NODE,
        name: Some(b"SHM_Node_C3"),
    });
    let _ = m.handle(LinkEvent::ConnectResult {
        conn_handle: 3,
        status: 0,
    });
    let _ = m.handle(LinkEvent::CharacteristicFound {
        uuid: FIRMWARE_CTRL_UUID,
        value_handle: 15,
    });
    let _ = m.handle(LinkEvent::CharacteristicFound {
        uuid: FIRMWARE_DATA_UUID,
        value_handle: 17,
    });
    m
}

/// Handles first, network later: the launch happens on the network-up
/// re-evaluation, exactly once.
#[test]
fn network_up_after_discovery_launches_once() {
    let m = machine_with_handles();
    let state = TransferState::new();
    let mut launcher = RecordingLauncher::default();

    assert!(!check_and_launch(false, m.session(), &state, &mut launcher));
    assert!(check_and_launch(true, m.session(), &state, &mut launcher));
    // Subsequent readiness events re-evaluate but must not double-launch.
    assert!(!check_and_launch(true, m.session(), &state, &mut launcher));
    assert_eq!(launcher.launches, vec![(15, 17)]);
}

/// Network first, discovery later: the launch happens on the
/// handle-resolved re-evaluation.
#[test]
fn discovery_after_network_launches_once() {
    let mut m = SessionMachine::new(&GatewayConfig::default());
    let state = TransferState::new();
    let mut launcher = RecordingLauncher::default();
    let _ = m.start();

    assert!(!check_and_launch(true, m.session(), &state, &mut launcher));

    let _ = m.handle(LinkEvent::ScanResult {
        addr: NODE,
        name: Some(b"SHM_Node_C3"),
    });
    let _ = m.handle(LinkEvent::ConnectResult {
        conn_handle: 3,
        status: 0,
    });
    let _ = m.handle(LinkEvent::CharacteristicFound {
        uuid: FIRMWARE_CTRL_UUID,
        value_handle: 15,
    });
    // Only one of the two handles so far.
    assert!(!check_and_launch(true, m.session(), &state, &mut launcher));

    let _ = m.handle(LinkEvent::CharacteristicFound {
        uuid: FIRMWARE_DATA_UUID,
        value_handle: 17,
    });
    assert!(check_and_launch(true, m.session(), &state, &mut launcher));
    assert_eq!(launcher.launches, vec![(15, 17)]);
}

/// After a completed transfer, a reconnect re-resolves handles but the
/// completed latch keeps the gate shut until reboot.
#[test]
fn completed_latch_survives_reconnect() {
    let mut m = machine_with_handles();
    let state = TransferState::new();
    let mut launcher = RecordingLauncher::default();

    assert!(check_and_launch(true, m.session(), &state, &mut launcher));
    state.end(true); // relay finished

    // Node reboots into the new image; session re-establishes.
    let _ = m.handle(LinkEvent::Disconnect { reason: 0x0213 });
    let m = machine_with_handles();
    assert!(!check_and_launch(true, m.session(), &state, &mut launcher));
    assert_eq!(launcher.launches.len(), 1);
}

/// An aborted transfer plus a rediscovered session relaunches.
#[test]
fn abort_then_rediscovery_relaunches() {
    let m = machine_with_handles();
    let state = TransferState::new();
    let mut launcher = RecordingLauncher::default();

    assert!(check_and_launch(true, m.session(), &state, &mut launcher));
    state.end(false); // relay aborted

    assert!(check_and_launch(true, m.session(), &state, &mut launcher));
    assert_eq!(launcher.launches.len(), 2);
}
