//! In-memory adapter backend.
//!
//! Scripted advertisements and peripherals, failure injection and a log of
//! every transport call. Used by the test suite and for exercising the
//! bridge without a radio.

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::ble::adapter::{Central, Link};
use crate::ble::gatt::{DiscoveredDevice, NotificationEvent, ServiceDescriptor, WriteKind};
use crate::error::{Error, Result};

/// A transport call recorded by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    /// `Central::start_scan`.
    StartScan,
    /// `Central::stop_scan`.
    StopScan,
    /// `Central::connect`.
    Connect(String),
    /// `Link::discover_services`.
    DiscoverServices,
    /// `Link::read`.
    Read(Uuid),
    /// `Link::write`.
    Write(Uuid, Vec<u8>, WriteKind),
    /// `Link::subscribe`.
    Subscribe(Uuid),
    /// `Link::unsubscribe`.
    Unsubscribe(Uuid),
    /// `Link::disconnect`.
    Disconnect,
}

#[derive(Debug, Clone, Default)]
struct MockPeripheral {
    services: Vec<ServiceDescriptor>,
    values: HashMap<Uuid, Vec<u8>>,
    refuse_connect: bool,
    hang_connect: bool,
    fail_discovery: bool,
    hang_discovery: bool,
}

#[derive(Default)]
struct MockState {
    adapter_available: bool,
    end_advertisements: bool,
    advertisements: Vec<DiscoveredDevice>,
    peripherals: HashMap<String, MockPeripheral>,
    failing_writes: usize,
    write_delay: Option<Duration>,
    fail_stop_scan: bool,
    fail_teardown: bool,
    calls: Vec<MockCall>,
    notification_tx: Option<mpsc::UnboundedSender<NotificationEvent>>,
}

/// In-memory [`Central`].
///
/// Cloning yields another handle to the same mock, so a test can keep one
/// handle for assertions and give another to the code under test.
#[derive(Clone)]
pub struct MockCentral {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockCentral {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCentral {
    /// Create an available adapter with nothing in range.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                adapter_available: true,
                ..Default::default()
            })),
        }
    }

    /// Create an adapter that refuses to scan.
    pub fn unavailable() -> Self {
        let mock = Self::new();
        mock.state.lock().adapter_available = false;
        mock
    }

    /// Queue an advertisement report, delivered in order once scanning starts.
    pub fn with_advertisement(self, device: DiscoveredDevice) -> Self {
        self.state.lock().advertisements.push(device);
        self
    }

    /// End the advertisement stream after the queued reports instead of
    /// keeping it open until the scan times out.
    pub fn with_finite_advertisements(self) -> Self {
        self.state.lock().end_advertisements = true;
        self
    }

    /// Make a connectable peripheral with the given service table.
    pub fn with_peripheral(self, address: &str, services: Vec<ServiceDescriptor>) -> Self {
        self.state.lock().peripherals.insert(
            address.to_string(),
            MockPeripheral {
                services,
                ..Default::default()
            },
        );
        self
    }

    /// Set the value returned when reading a characteristic of `address`.
    pub fn with_value(self, address: &str, characteristic: Uuid, value: &[u8]) -> Self {
        if let Some(peripheral) = self.state.lock().peripherals.get_mut(address) {
            peripheral.values.insert(characteristic, value.to_vec());
        }
        self
    }

    /// Make connecting to `address` fail.
    pub fn refuse_connect(self, address: &str) -> Self {
        self.state
            .lock()
            .peripherals
            .entry(address.to_string())
            .or_default()
            .refuse_connect = true;
        self
    }

    /// Make service discovery on `address` fail.
    pub fn fail_discovery(self, address: &str) -> Self {
        self.state
            .lock()
            .peripherals
            .entry(address.to_string())
            .or_default()
            .fail_discovery = true;
        self
    }

    /// Make connecting to `address` never complete.
    pub fn hang_connect(self, address: &str) -> Self {
        self.state
            .lock()
            .peripherals
            .entry(address.to_string())
            .or_default()
            .hang_connect = true;
        self
    }

    /// Make service discovery on `address` never complete.
    pub fn hang_discovery(self, address: &str) -> Self {
        self.state
            .lock()
            .peripherals
            .entry(address.to_string())
            .or_default()
            .hang_discovery = true;
        self
    }

    /// Hold every write for `delay` before acknowledging it.
    pub fn delay_writes(&self, delay: Duration) {
        self.state.lock().write_delay = Some(delay);
    }

    /// Make `stop_scan` report an adapter error.
    pub fn fail_stop_scan(&self) {
        self.state.lock().fail_stop_scan = true;
    }

    /// Make the next `count` writes fail.
    pub fn fail_writes(&self, count: usize) {
        self.state.lock().failing_writes = count;
    }

    /// Make unsubscribe and disconnect report transport errors.
    pub fn fail_teardown(&self) {
        self.state.lock().fail_teardown = true;
    }

    /// Push a notification as if the peripheral had sent it.
    ///
    /// Returns false when no notification stream is open.
    pub fn notify(&self, characteristic: Uuid, payload: &[u8]) -> bool {
        let state = self.state.lock();
        match &state.notification_tx {
            Some(tx) => tx
                .unbounded_send(NotificationEvent::new(characteristic, payload.to_vec()))
                .is_ok(),
            None => false,
        }
    }

    /// Every transport call so far, in order.
    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().calls.clone()
    }

    /// Number of recorded calls matching `predicate`.
    pub fn count_calls(&self, predicate: impl Fn(&MockCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| predicate(c)).count()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    fn record(&self, call: MockCall) {
        self.state.lock().calls.push(call);
    }
}

#[async_trait]
impl Central for MockCentral {
    async fn start_scan(&self) -> Result<()> {
        if !self.state.lock().adapter_available {
            return Err(Error::AdapterUnavailable);
        }
        self.record(MockCall::StartScan);
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.record(MockCall::StopScan);
        if self.state.lock().fail_stop_scan {
            return Err(Error::Transport {
                reason: "adapter refused to stop scanning".to_string(),
            });
        }
        Ok(())
    }

    async fn advertisements(&self) -> Result<BoxStream<'static, DiscoveredDevice>> {
        let state = self.state.lock();
        if !state.adapter_available {
            return Err(Error::AdapterUnavailable);
        }

        let reports = stream::iter(state.advertisements.clone());
        if state.end_advertisements {
            Ok(reports.boxed())
        } else {
            Ok(reports.chain(stream::pending()).boxed())
        }
    }

    async fn connect(&self, address: &str) -> Result<Box<dyn Link>> {
        self.record(MockCall::Connect(address.to_string()));

        let (refused, hangs) = self
            .state
            .lock()
            .peripherals
            .get(address)
            .map(|p| (p.refuse_connect, p.hang_connect))
            .unwrap_or((true, false));
        if hangs {
            std::future::pending::<()>().await;
        }
        if refused {
            return Err(Error::Transport {
                reason: format!("{} did not respond", address),
            });
        }

        Ok(Box::new(MockLink {
            mock: self.clone(),
            address: address.to_string(),
        }))
    }
}

/// Connection handed out by [`MockCentral::connect`].
pub struct MockLink {
    mock: MockCentral,
    address: String,
}

impl MockLink {
    fn teardown_result(&self) -> Result<()> {
        if self.mock.state.lock().fail_teardown {
            Err(Error::Transport {
                reason: "link lost".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Link for MockLink {
    fn address(&self) -> &str {
        &self.address
    }

    async fn discover_services(&self) -> Result<Vec<ServiceDescriptor>> {
        self.mock.record(MockCall::DiscoverServices);

        let peripheral = self
            .mock
            .state
            .lock()
            .peripherals
            .get(&self.address)
            .cloned()
            .unwrap_or_default();
        if peripheral.hang_discovery {
            std::future::pending::<()>().await;
        }
        if peripheral.fail_discovery {
            return Err(Error::Transport {
                reason: "service discovery failed".to_string(),
            });
        }
        Ok(peripheral.services)
    }

    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>> {
        self.mock.record(MockCall::Read(characteristic));

        Ok(self
            .mock
            .state
            .lock()
            .peripherals
            .get(&self.address)
            .and_then(|p| p.values.get(&characteristic).cloned())
            .unwrap_or_default())
    }

    async fn write(&self, characteristic: Uuid, data: &[u8], kind: WriteKind) -> Result<()> {
        self.mock
            .record(MockCall::Write(characteristic, data.to_vec(), kind));

        let (delay, failed) = {
            let mut state = self.mock.state.lock();
            let failed = state.failing_writes > 0;
            if failed {
                state.failing_writes -= 1;
            }
            (state.write_delay, failed)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if failed {
            return Err(Error::Transport {
                reason: "write not acknowledged".to_string(),
            });
        }
        Ok(())
    }

    async fn subscribe(&self, characteristic: Uuid) -> Result<()> {
        self.mock.record(MockCall::Subscribe(characteristic));
        Ok(())
    }

    async fn unsubscribe(&self, characteristic: Uuid) -> Result<()> {
        self.mock.record(MockCall::Unsubscribe(characteristic));
        self.teardown_result()
    }

    async fn notifications(&self) -> Result<BoxStream<'static, NotificationEvent>> {
        let (tx, rx) = mpsc::unbounded();
        self.mock.state.lock().notification_tx = Some(tx);
        Ok(rx.boxed())
    }

    async fn disconnect(&self) -> Result<()> {
        self.mock.record(MockCall::Disconnect);
        self.mock.state.lock().notification_tx = None;
        self.teardown_result()
    }
}
