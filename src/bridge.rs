//! Interactive serial bridge.
//!
//! Subscribes to the serial characteristic of a connected session and runs a
//! duplex loop: notifications are echoed to an output sink while lines read
//! from an input source are written to the characteristic.

use std::future::Future;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ble::gatt::NotificationEvent;
use crate::ble::session::Session;
use crate::config::{is_exit_command, NOTIFICATION_CHANNEL_CAPACITY, PROMPT};
use crate::error::Result;
use crate::utils::{render_payload, to_hex};

/// Why the interactive loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeExit {
    /// The exit command was entered.
    Sentinel,
    /// The shutdown signal fired.
    Cancelled,
    /// The input source reached end of file.
    InputClosed,
}

const RULE_WIDTH: usize = 70;

/// Duplex loop between a session characteristic and a line-oriented console.
pub struct InteractiveBridge<'a> {
    session: &'a Session,
    characteristic: Uuid,
}

impl<'a> InteractiveBridge<'a> {
    /// Create a bridge for `characteristic` of `session`.
    pub fn new(session: &'a Session, characteristic: Uuid) -> Self {
        Self {
            session,
            characteristic,
        }
    }

    /// Run until the exit command, end of input, or `shutdown` completes.
    ///
    /// The session is unsubscribed and then disconnected on every exit path.
    /// Teardown failures are reported to `output` and otherwise ignored.
    ///
    /// # Errors
    ///
    /// Returns the subscription error if notifications cannot be enabled, or
    /// an I/O error if the input or output fails.
    pub async fn run<R, W, F>(&self, input: R, output: &mut W, shutdown: F) -> Result<BridgeExit>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
        F: Future<Output = ()>,
    {
        let (tx, rx) = mpsc::channel(NOTIFICATION_CHANNEL_CAPACITY);

        let _ = emit(
            output,
            &format!(
                "Subscribing to notifications on characteristic {}...\n",
                self.characteristic
            ),
        )
        .await;

        let subscribed = self
            .session
            .subscribe(&self.characteristic, move |event: NotificationEvent| {
                if let Err(e) = tx.try_send(event) {
                    warn!("Dropping notification: {}", e);
                }
            })
            .await;

        if let Err(e) = subscribed {
            let _ = emit(output, &format!("✗ Failed to subscribe: {}\n", e)).await;
            self.teardown(output).await;
            return Err(e);
        }

        let result = self.duplex(input, output, rx, shutdown).await;
        self.teardown(output).await;

        if let Ok(exit) = &result {
            info!("Interactive session ended: {:?}", exit);
        }
        result
    }

    async fn duplex<R, W, F>(
        &self,
        input: R,
        output: &mut W,
        mut notifications: mpsc::Receiver<NotificationEvent>,
        shutdown: F,
    ) -> Result<BridgeExit>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
        F: Future<Output = ()>,
    {
        let rule = "=".repeat(RULE_WIDTH);
        emit(
            output,
            &format!(
                "✓ Subscribed to notifications\n\n{rule}\nINTERACTIVE COMMUNICATION MODE\n{rule}\n\
                 Type your message and press Enter to send\n\
                 Press Ctrl+C or type 'exit' to quit\n{rule}\n"
            ),
        )
        .await?;

        let mut lines = input.split(b'\n');
        tokio::pin!(shutdown);

        emit(output, PROMPT).await?;

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    emit(output, "\n\nStopping...\n").await?;
                    return Ok(BridgeExit::Cancelled);
                }

                Some(event) = notifications.recv() => {
                    self.show_notification(output, &event).await?;
                }

                segment = lines.next_segment() => {
                    let Some(raw) = segment? else {
                        emit(output, "\nInput closed, exiting...\n").await?;
                        return Ok(BridgeExit::InputClosed);
                    };

                    let text = String::from_utf8_lossy(&raw);
                    if std::str::from_utf8(&raw).is_err() {
                        warn!("Input line is not valid UTF-8, sending it with replacement characters");
                    }

                    let line = text.trim();
                    if is_exit_command(line) {
                        emit(output, "\nExiting...\n").await?;
                        return Ok(BridgeExit::Sentinel);
                    }

                    if !line.is_empty() {
                        let write = self.session.write(&self.characteristic, line.as_bytes());
                        tokio::pin!(write);

                        // Keep echoing notifications while the write is pending.
                        loop {
                            tokio::select! {
                                biased;

                                _ = &mut shutdown => {
                                    emit(output, "\n\nStopping...\n").await?;
                                    return Ok(BridgeExit::Cancelled);
                                }

                                Some(event) = notifications.recv() => {
                                    self.show_notification(output, &event).await?;
                                }

                                sent = &mut write => {
                                    let report = match sent {
                                        Ok(()) => format!(
                                            "   Sent: {} (Hex: {})\n",
                                            line,
                                            to_hex(line.as_bytes())
                                        ),
                                        Err(e) => format!("   Write failed: {}\n", e),
                                    };
                                    emit(output, &report).await?;
                                    break;
                                }
                            }
                        }
                    }

                    emit(output, PROMPT).await?;
                }
            }
        }
    }

    async fn show_notification<W>(&self, output: &mut W, event: &NotificationEvent) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        debug!(
            "Notification from {}: {} bytes",
            event.characteristic_uuid,
            event.payload.len()
        );

        emit(
            output,
            &format!(
                "\n<< Received: {}\n   (Hex: {})\n{}",
                render_payload(&event.payload),
                to_hex(&event.payload),
                PROMPT
            ),
        )
        .await
    }

    /// Unsubscribe, then disconnect. Never fails.
    async fn teardown<W>(&self, output: &mut W)
    where
        W: AsyncWrite + Unpin,
    {
        if let Err(e) = self.session.unsubscribe(&self.characteristic).await {
            let _ = emit(output, &format!("   Unsubscribe failed: {}\n", e)).await;
        }

        let report = match self.session.disconnect().await {
            Ok(()) => "✓ Disconnected from device\n".to_string(),
            Err(e) => format!("   Disconnect failed: {}\n", e),
        };
        let _ = emit(output, &report).await;
    }
}

/// Run the interactive bridge on `characteristic` of `session`.
///
/// See [`InteractiveBridge::run`].
pub async fn run<R, W, F>(
    session: &Session,
    characteristic: Uuid,
    input: R,
    output: &mut W,
    shutdown: F,
) -> Result<BridgeExit>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    F: Future<Output = ()>,
{
    InteractiveBridge::new(session, characteristic)
        .run(input, output, shutdown)
        .await
}

async fn emit<W>(output: &mut W, text: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    output.write_all(text.as_bytes()).await?;
    output.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::gatt::{CharProperties, CharacteristicDescriptor, ServiceDescriptor, WriteKind};
    use crate::ble::mock::{MockCall, MockCentral};
    use crate::ble::uuids::{HM10_CHARACTERISTIC_UUID, HM10_SERVICE_UUID};
    use crate::error::Error;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    const ADDRESS: &str = "AA:BB";

    async fn connected(properties: CharProperties) -> (MockCentral, Session) {
        let services = vec![ServiceDescriptor {
            uuid: HM10_SERVICE_UUID,
            primary: true,
            characteristics: vec![CharacteristicDescriptor {
                uuid: HM10_CHARACTERISTIC_UUID,
                service_uuid: HM10_SERVICE_UUID,
                properties,
                descriptors: Vec::new(),
            }],
        }];
        let mock = MockCentral::new().with_peripheral(ADDRESS, services);
        let session = Session::connect(&mock, ADDRESS, Duration::from_secs(1))
            .await
            .unwrap();
        mock.clear_calls();
        (mock, session)
    }

    fn write_notify() -> CharProperties {
        CharProperties {
            write: true,
            notify: true,
            ..Default::default()
        }
    }

    fn writes(mock: &MockCentral) -> Vec<Vec<u8>> {
        mock.calls()
            .into_iter()
            .filter_map(|c| match c {
                MockCall::Write(_, data, _) => Some(data),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_exit_sentinel_tears_down_in_order() {
        let (mock, session) = connected(write_notify()).await;
        let mut output = Vec::new();

        let exit = run(
            &session,
            HM10_CHARACTERISTIC_UUID,
            &b"hello\nExIt\nnot sent\n"[..],
            &mut output,
            std::future::pending::<()>(),
        )
        .await
        .unwrap();

        assert_eq!(exit, BridgeExit::Sentinel);
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

        let text = String::from_utf8(output).unwrap();
        assert!(text.contains("   Sent: hello (Hex: 68656c6c6f)"));
        assert!(text.contains("Exiting..."));
        assert!(text.contains("✓ Disconnected from device"));
    }

    #[tokio::test]
    async fn test_blank_lines_are_not_sent() {
        let (mock, session) = connected(write_notify()).await;
        let mut output = Vec::new();

        run(
            &session,
            HM10_CHARACTERISTIC_UUID,
            &b"\n   \n\t\n  AT  \n"[..],
            &mut output,
            std::future::pending::<()>(),
        )
        .await
        .unwrap();

        assert_eq!(writes(&mock), vec![b"AT".to_vec()]);
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_does_not_end_session() {
        let (mock, session) = connected(write_notify()).await;
        let mut output = Vec::new();

        let exit = run(
            &session,
            HM10_CHARACTERISTIC_UUID,
            &b"\xff\xfe\nhello\r\nexit\n"[..],
            &mut output,
            std::future::pending::<()>(),
        )
        .await;

        assert_eq!(tokio_test::assert_ok!(exit), BridgeExit::Sentinel);
        assert_eq!(
            writes(&mock),
            vec!["\u{fffd}\u{fffd}".as_bytes().to_vec(), b"hello".to_vec()]
        );
    }

    #[tokio::test]
    async fn test_end_of_input_tears_down() {
        let (mock, session) = connected(write_notify()).await;
        let mut output = Vec::new();

        let exit = run(
            &session,
            HM10_CHARACTERISTIC_UUID,
            &b""[..],
            &mut output,
            std::future::pending::<()>(),
        )
        .await
        .unwrap();

        assert_eq!(exit, BridgeExit::InputClosed);
        assert_eq!(mock.count_calls(|c| matches!(c, MockCall::Unsubscribe(_))), 1);
        assert_eq!(mock.count_calls(|c| *c == MockCall::Disconnect), 1);
    }

    #[tokio::test]
    async fn test_failed_write_is_reported_and_loop_continues() {
        let (mock, session) = connected(write_notify()).await;
        mock.fail_writes(1);
        let mut output = Vec::new();

        let exit = run(
            &session,
            HM10_CHARACTERISTIC_UUID,
            &b"first\nsecond\nexit\n"[..],
            &mut output,
            std::future::pending::<()>(),
        )
        .await
        .unwrap();

        assert_eq!(exit, BridgeExit::Sentinel);
        assert_eq!(writes(&mock), vec![b"first".to_vec(), b"second".to_vec()]);

        let text = String::from_utf8(output).unwrap();
        assert!(text.contains("   Write failed:"));
        assert!(text.contains("   Sent: second (Hex: 7365636f6e64)"));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_pending_read() {
        let (mock, session) = connected(write_notify()).await;
        let (_keep_open, reader) = tokio::io::duplex(64);
        let mut output = Vec::new();

        let exit = run(
            &session,
            HM10_CHARACTERISTIC_UUID,
            tokio::io::BufReader::new(reader),
            &mut output,
            tokio::time::sleep(Duration::from_millis(20)),
        )
        .await
        .unwrap();

        assert_eq!(exit, BridgeExit::Cancelled);
        assert_eq!(
            mock.calls(),
            vec![
                MockCall::Subscribe(HM10_CHARACTERISTIC_UUID),
                MockCall::Unsubscribe(HM10_CHARACTERISTIC_UUID),
                MockCall::Disconnect,
            ]
        );
        assert!(String::from_utf8(output).unwrap().contains("Stopping..."));
    }

    #[tokio::test]
    async fn test_subscribe_failure_still_disconnects() {
        let (mock, session) = connected(CharProperties {
            write: true,
            ..Default::default()
        })
        .await;
        let mut output = Vec::new();

        let result = run(
            &session,
            HM10_CHARACTERISTIC_UUID,
            &b"exit\n"[..],
            &mut output,
            std::future::pending::<()>(),
        )
        .await;

        assert!(matches!(result, Err(Error::Subscribe { .. })));
        assert_eq!(mock.calls(), vec![MockCall::Disconnect]);
    }

    #[tokio::test]
    async fn test_teardown_errors_are_reported_not_raised() {
        let (mock, session) = connected(write_notify()).await;
        mock.fail_teardown();
        let mut output = Vec::new();

        let exit = run(
            &session,
            HM10_CHARACTERISTIC_UUID,
            &b"exit\n"[..],
            &mut output,
            std::future::pending::<()>(),
        )
        .await;

        assert_eq!(tokio_test::assert_ok!(exit), BridgeExit::Sentinel);
        let text = String::from_utf8(output).unwrap();
        assert!(text.contains("   Unsubscribe failed:"));
        assert!(text.contains("   Disconnect failed:"));
        assert!(!session.is_connected());
    }
}
