//! End-to-end peer session flows: scan → connect → discovery → subscribe
//! → telemetry, plus disconnect recovery at each stage.

use shmgate::config::{
    FIRMWARE_CTRL_UUID, FIRMWARE_DATA_UUID, FIRMWARE_SERVICE_UUID, GatewayConfig,
    TELEMETRY_CHAR_UUID, TELEMETRY_SERVICE_UUID,
};
use shmgate::session::uuid::CCCD_UUID16;
use shmgate::session::{Effect, LinkEvent, PeerAddr, SessionMachine, SessionState};

const NODE: PeerAddr = PeerAddr {
    value: [0x84, 0xf7, 0x03, 0x10, 0x20, 0x30],
    addr_type: 0,
};

fn sample_frame(ax: f32, ay: f32, az: f32) -> [u8; 12] {
    let mut buf = [0u8; 12];
    buf[0..4].copy_from_slice(&ax.to_le_bytes());
    buf[4..8].copy_from_slice(&ay.to_le_bytes());
    buf[8..12].copy_from_slice(&az.to_le_bytes());
    buf
}

/// Drive the machine through the full establishment sequence, asserting
/// the effect chain at every step.
#[test]
fn full_establishment_flow() {
    let mut m = SessionMachine::new(&GatewayConfig::default());
    assert_eq!(m.start().as_slice(), &[Effect::StartScan]);

    // Other advertisers in range are skipped.
    let fx = m.handle(LinkEvent::ScanResult {
        addr: NODE,
        name: Some(b"Kitchen_Lamp"),
    });
    assert!(fx.is_empty());

    // Target node appears.
    let fx = m.handle(LinkEvent::ScanResult {
        addr: NODE,
        name: Some(b"SHM_Node_C3"),
    });
    assert_eq!(fx[0], Effect::CancelScan);
    let Effect::Connect { addr, timeout_ms } = fx[1] else {
        panic!("expected Connect, got {:?}", fx[1]);
    };
    assert_eq!(addr, NODE);
    assert_eq!(timeout_ms, 30_000);

    // Connection lands; MTU + service walk kick off.
    let fx = m.handle(LinkEvent::ConnectResult {
        conn_handle: 3,
        status: 0,
    });
    assert_eq!(fx.as_slice(), &[Effect::ExchangeMtu, Effect::DiscoverServices]);

    // Telemetry service → characteristic → CCCD → subscribed.
    let fx = m.handle(LinkEvent::ServiceFound {
        uuid: TELEMETRY_SERVICE_UUID,
        start_handle: 1,
        end_handle: 12,
    });
    assert_eq!(
        fx.as_slice(),
        &[Effect::DiscoverCharacteristics {
            start_handle: 1,
            end_handle: 12,
        }]
    );
    let fx = m.handle(LinkEvent::CharacteristicFound {
        uuid: TELEMETRY_CHAR_UUID,
        value_handle: 5,
    });
    assert_eq!(
        fx.as_slice(),
        &[Effect::DiscoverDescriptors {
            start_handle: 5,
            end_handle: 15,
        }]
    );
    let fx = m.handle(LinkEvent::DescriptorFound {
        uuid16: CCCD_UUID16,
        handle: 6,
    });
    assert_eq!(
        fx.as_slice(),
        &[Effect::WriteDescriptor {
            handle: 6,
            value: [0x01, 0x00],
        }]
    );
    assert_eq!(m.state(), SessionState::Active);

    // Firmware service resolves both relay handles.
    let _ = m.handle(LinkEvent::ServiceFound {
        uuid: FIRMWARE_SERVICE_UUID,
        start_handle: 13,
        end_handle: 20,
    });
    let fx = m.handle(LinkEvent::CharacteristicFound {
        uuid: FIRMWARE_CTRL_UUID,
        value_handle: 15,
    });
    assert_eq!(fx.as_slice(), &[Effect::FirmwareHandleResolved]);
    let fx = m.handle(LinkEvent::CharacteristicFound {
        uuid: FIRMWARE_DATA_UUID,
        value_handle: 17,
    });
    assert_eq!(fx.as_slice(), &[Effect::FirmwareHandleResolved]);
    assert_eq!(m.session().firmware_handles(), Some((15, 17)));

    // Telemetry flows.
    let frame = sample_frame(0.02, -0.01, 0.98);
    let fx = m.handle(LinkEvent::Notification {
        attr_handle: 5,
        payload: &frame,
    });
    assert!(matches!(fx.as_slice(), &[Effect::EmitSample(_)]));
}

/// A disconnect at any stage of establishment resets to scanning with no
/// stale handles.
#[test]
fn disconnect_at_every_stage_resets_cleanly() {
    let stages: &[&[LinkEvent<'_>]] = &[
        // While connecting.
        &[LinkEvent::ScanResult {
            addr: NODE,
            name: Some(b"SHM_Node_C3"),
        }],
        // While discovering services.
        &[
            LinkEvent::ScanResult {
                addr: NODE,
                name: Some(b"SHM_Node_C3"),
            },
            LinkEvent::ConnectResult {
                conn_handle: 3,
                status: 0,
            },
        ],
        // While discovering characteristics.
        &[
            LinkEvent::ScanResult {
                addr: NODE,
                name: Some(b"SHM_Node_C3"),
            },
            LinkEvent::ConnectResult {
                conn_handle: 3,
                status: 0,
            },
            LinkEvent::ServiceFound {
                uuid: TELEMETRY_SERVICE_UUID,
                start_handle: 1,
                end_handle: 12,
            },
        ],
    ];

    for stage in stages {
        let mut m = SessionMachine::new(&GatewayConfig::default());
        let _ = m.start();
        for event in *stage {
            let _ = m.handle(*event);
        }
        let fx = m.handle(LinkEvent::Disconnect { reason: 0x0208 });
        assert_eq!(fx.as_slice(), &[Effect::StartScan]);
        assert_eq!(m.state(), SessionState::Scanning);
        assert_eq!(m.session().conn_handle, None);
        assert_eq!(m.session().firmware_handles(), None);
    }
}

/// Stale events from the previous connection (late discovery callbacks,
/// queued notifications) are ignored after a disconnect.
#[test]
fn stale_events_after_disconnect_are_ignored() {
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
    let _ = m.handle(LinkEvent::Disconnect { reason: 0x0213 });

    let fx = m.handle(LinkEvent::CharacteristicFound {
        uuid: FIRMWARE_CTRL_UUID,
        value_handle: 15,
    });
    assert!(fx.is_empty());
    assert_eq!(m.session().firmware_handles(), None);

    let fx = m.handle(LinkEvent::Notification {
        attr_handle: 5,
        payload: &sample_frame(0.0, 0.0, 1.0),
    });
    assert!(fx.is_empty());
}

/// A configured peer name other than the default is honoured.
#[test]
fn custom_peer_name_is_matched() {
    let mut config = GatewayConfig::default();
    config.peer_name = heapless::String::try_from("SHM_Node_B7").unwrap();
    let mut m = SessionMachine::new(&config);
    let _ = m.start();

    let fx = m.handle(LinkEvent::ScanResult {
        addr: NODE,
        name: Some(b"SHM_Node_C3"),
    });
    assert!(fx.is_empty(), "default name must not match a custom config");

    let fx = m.handle(LinkEvent::ScanResult {
        addr: NODE,
        name: Some(b"SHM_Node_B7"),
    });
    assert_eq!(fx[0], Effect::CancelScan);
}
