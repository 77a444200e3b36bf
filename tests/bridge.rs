//! End-to-end workflow over the in-memory adapter: scan, connect, chat,
//! tear down.

use hm10_bridge::{
    BleScanner, BridgeExit, CharProperties, CharacteristicDescriptor, DiscoveredDevice, Error,
    MockCall, MockCentral, ServiceDescriptor, Session, WriteKind, HM10_CHARACTERISTIC_UUID,
    HM10_SERVICE_UUID,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream};

const ADDRESS: &str = "AA:BB";
const NAME: &str = "sallen_hm10";

fn hm10_services() -> Vec<ServiceDescriptor> {
    vec![ServiceDescriptor {
        uuid: HM10_SERVICE_UUID,
        primary: true,
        characteristics: vec![CharacteristicDescriptor {
            uuid: HM10_CHARACTERISTIC_UUID,
            service_uuid: HM10_SERVICE_UUID,
            properties: CharProperties {
                write: true,
                notify: true,
                ..Default::default()
            },
            descriptors: Vec::new(),
        }],
    }]
}

fn hm10_mock() -> MockCentral {
    MockCentral::new()
        .with_advertisement(DiscoveredDevice::new(ADDRESS, Some(NAME.to_string()), Some(-61)))
        .with_advertisement(DiscoveredDevice::new("CC:DD", None, Some(-80)))
        .with_finite_advertisements()
        .with_peripheral(ADDRESS, hm10_services())
}

async fn find_and_connect(mock: &MockCentral) -> Session {
    let scanner = BleScanner::new(Arc::new(mock.clone()));
    let device = scanner
        .find_by_name(NAME, Duration::from_secs(1))
        .await
        .unwrap()
        .expect("target advertised");
    assert_eq!(device.address, ADDRESS);

    Session::connect(mock, &device.address, Duration::from_secs(1))
        .await
        .unwrap()
}

/// Read console output until it contains `needle`.
async fn read_until(console: &mut DuplexStream, seen: &mut Vec<u8>, needle: &str) {
    let mut buf = [0u8; 1024];
    let found = tokio::time::timeout(Duration::from_secs(5), async {
        while !String::from_utf8_lossy(seen).contains(needle) {
            let n = console.read(&mut buf).await.unwrap();
            assert!(n > 0, "output closed before {:?}", needle);
            seen.extend_from_slice(&buf[..n]);
        }
    })
    .await;
    assert!(found.is_ok(), "timed out waiting for {:?}", needle);
}

#[tokio::test]
async fn test_chat_session_end_to_end() {
    let mock = hm10_mock();
    let session = find_and_connect(&mock).await;
    mock.clear_calls();

    let (mut keyboard, input) = tokio::io::duplex(256);
    let (mut output, mut console) = tokio::io::duplex(64 * 1024);

    let bridge = hm10_bridge::run(
        &session,
        HM10_CHARACTERISTIC_UUID,
        BufReader::new(input),
        &mut output,
        std::future::pending::<()>(),
    );

    let driver = async {
        let mut seen = Vec::new();
        read_until(&mut console, &mut seen, "INTERACTIVE COMMUNICATION MODE").await;

        assert!(mock.notify(HM10_CHARACTERISTIC_UUID, &[0x68, 0x69]));
        read_until(&mut console, &mut seen, "(Hex: 6869)").await;

        keyboard.write_all(b"hello\n\n   \nEXIT\n").await.unwrap();
        read_until(&mut console, &mut seen, "✓ Disconnected from device").await;
        String::from_utf8(seen).unwrap()
    };

    let (exit, text) = tokio::join!(bridge, driver);

    assert_eq!(exit.unwrap(), BridgeExit::Sentinel);
    assert!(text.contains("Subscribing to notifications on characteristic 0000ffe1-0000-1000-8000-00805f9b34fb..."));
    assert!(text.contains("✓ Subscribed to notifications"));
    assert!(text.contains("\n<< Received: hi\n   (Hex: 6869)\n>> "));
    assert!(text.contains("   Sent: hello (Hex: 68656c6c6f)"));

    assert_eq!(
        mock.calls(),
        vec![
            MockCall::Subscribe(HM10_CHARACTERISTIC_UUID),
            MockCall::Write(
                HM10_CHARACTERISTIC_UUID,
                b"hello".to_vec(),
                WriteKind::WithResponse
            ),
            MockCall::Unsubscribe(HM10_CHARACTERISTIC_UUID),
            MockCall::Disconnect,
        ]
    );
    assert!(!session.is_connected());
}

#[tokio::test]
async fn test_notifications_shown_while_write_pending() {
    let mock = hm10_mock();
    let session = find_and_connect(&mock).await;
    mock.delay_writes(Duration::from_millis(500));

    let (mut keyboard, input) = tokio::io::duplex(256);
    let (mut output, mut console) = tokio::io::duplex(64 * 1024);

    let bridge = hm10_bridge::run(
        &session,
        HM10_CHARACTERISTIC_UUID,
        BufReader::new(input),
        &mut output,
        std::future::pending::<()>(),
    );

    let driver = async {
        let mut seen = Vec::new();
        read_until(&mut console, &mut seen, "INTERACTIVE COMMUNICATION MODE").await;

        keyboard.write_all(b"ping\n").await.unwrap();
        while mock.count_calls(|c| matches!(c, MockCall::Write(..))) == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        // The write is still waiting for its acknowledgement.
        let sent_at = std::time::Instant::now();
        assert!(mock.notify(HM10_CHARACTERISTIC_UUID, b"pong"));
        read_until(&mut console, &mut seen, "<< Received: pong").await;
        assert!(sent_at.elapsed() < Duration::from_millis(400));

        read_until(&mut console, &mut seen, "   Sent: ping").await;
        keyboard.write_all(b"exit\n").await.unwrap();
        read_until(&mut console, &mut seen, "✓ Disconnected from device").await;
        String::from_utf8(seen).unwrap()
    };

    let (exit, text) = tokio::join!(bridge, driver);
    assert_eq!(exit.unwrap(), BridgeExit::Sentinel);

    let received = text.find("<< Received: pong").unwrap();
    let sent = text.find("   Sent: ping").unwrap();
    assert!(received < sent);
}

#[tokio::test]
async fn test_binary_notification_falls_back_to_escapes() {
    let mock = hm10_mock();
    let session = find_and_connect(&mock).await;

    let (mut keyboard, input) = tokio::io::duplex(256);
    let (mut output, mut console) = tokio::io::duplex(64 * 1024);

    let bridge = hm10_bridge::run(
        &session,
        HM10_CHARACTERISTIC_UUID,
        BufReader::new(input),
        &mut output,
        std::future::pending::<()>(),
    );

    let driver = async {
        let mut seen = Vec::new();
        read_until(&mut console, &mut seen, "INTERACTIVE COMMUNICATION MODE").await;

        assert!(mock.notify(HM10_CHARACTERISTIC_UUID, &[0x4f, 0x4b, 0xff]));
        read_until(&mut console, &mut seen, "(Hex: 4f4bff)").await;

        keyboard.write_all(b"exit\n").await.unwrap();
        read_until(&mut console, &mut seen, "✓ Disconnected from device").await;
        String::from_utf8(seen).unwrap()
    };

    let (exit, text) = tokio::join!(bridge, driver);
    assert_eq!(exit.unwrap(), BridgeExit::Sentinel);
    assert!(text.contains("<< Received: OK\\xff"));
}

#[tokio::test]
async fn test_interrupt_ends_chat_and_disconnects() {
    let mock = hm10_mock();
    let session = find_and_connect(&mock).await;
    mock.clear_calls();

    let (_keyboard, input) = tokio::io::duplex(256);
    let (mut output, mut console) = tokio::io::duplex(64 * 1024);
    let (interrupt, interrupted) = tokio::sync::oneshot::channel::<()>();

    let bridge = hm10_bridge::run(
        &session,
        HM10_CHARACTERISTIC_UUID,
        BufReader::new(input),
        &mut output,
        async {
            let _ = interrupted.await;
        },
    );

    let driver = async {
        let mut seen = Vec::new();
        read_until(&mut console, &mut seen, ">> ").await;
        interrupt.send(()).unwrap();
        read_until(&mut console, &mut seen, "✓ Disconnected from device").await;
        String::from_utf8(seen).unwrap()
    };

    let (exit, text) = tokio::join!(bridge, driver);
    assert_eq!(exit.unwrap(), BridgeExit::Cancelled);
    assert!(text.contains("Stopping..."));
    assert_eq!(
        mock.calls(),
        vec![
            MockCall::Subscribe(HM10_CHARACTERISTIC_UUID),
            MockCall::Unsubscribe(HM10_CHARACTERISTIC_UUID),
            MockCall::Disconnect,
        ]
    );
}

#[tokio::test]
async fn test_closed_input_ends_chat() {
    let mock = hm10_mock();
    let session = find_and_connect(&mock).await;

    let (keyboard, input) = tokio::io::duplex(256);
    drop(keyboard);
    let mut output = Vec::new();

    let exit = hm10_bridge::run(
        &session,
        HM10_CHARACTERISTIC_UUID,
        BufReader::new(input),
        &mut output,
        std::future::pending::<()>(),
    )
    .await;

    assert_eq!(tokio_test::assert_ok!(exit), BridgeExit::InputClosed);
    assert_eq!(mock.count_calls(|c| *c == MockCall::Disconnect), 1);
}

#[tokio::test]
async fn test_target_not_advertised() {
    let mock = MockCentral::new()
        .with_advertisement(DiscoveredDevice::new("CC:DD", Some("other".to_string()), None))
        .with_finite_advertisements();
    let scanner = BleScanner::new(Arc::new(mock.clone()));

    let found = scanner.find_by_name(NAME, Duration::from_secs(1)).await;
    assert_eq!(tokio_test::assert_ok!(found), None);
    assert_eq!(mock.calls(), vec![MockCall::StartScan, MockCall::StopScan]);
}

#[tokio::test]
async fn test_unreachable_device_is_fatal() {
    let mock = MockCentral::new().refuse_connect(ADDRESS);

    let result = Session::connect(&mock, ADDRESS, Duration::from_secs(1)).await;
    match result {
        Err(e @ Error::ConnectionFailed { .. }) => assert!(e.is_fatal()),
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("connected to an unreachable device"),
    }
}
