//! Connected GATT session.
//!
//! A [`Session`] owns one link to a peripheral, the service table discovered
//! when it connected, and the notification handlers registered on its
//! characteristics.

use futures::stream::{BoxStream, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::ble::adapter::{Central, Link};
use crate::ble::gatt::{CharacteristicDescriptor, NotificationEvent, ServiceDescriptor};
use crate::error::{Error, Result};

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ConnectionState {
    /// Not connected to the peripheral.
    #[default]
    Disconnected,
    /// Link establishment and service discovery in progress.
    Connecting,
    /// Connected, services discovered.
    Connected,
    /// Tearing the connection down.
    Disconnecting,
}

impl ConnectionState {
    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if in a transitional state.
    pub fn is_transitioning(&self) -> bool {
        matches!(self, Self::Connecting | Self::Disconnecting)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnecting => write!(f, "Disconnecting"),
        }
    }
}

/// Callback invoked for each notification on a subscribed characteristic.
pub type NotificationHandler = Box<dyn FnMut(NotificationEvent) + Send + 'static>;

/// Handlers by characteristic. The lock is held for the whole invocation so
/// removing a handler waits for a call in progress.
type HandlerMap = Arc<Mutex<HashMap<Uuid, NotificationHandler>>>;

/// One live connection to a peripheral.
pub struct Session {
    /// Address of the peripheral.
    address: String,
    /// The connection handle. Only this session touches it.
    link: Box<dyn Link>,
    /// Service table discovered at connect time.
    services: Vec<ServiceDescriptor>,
    /// Current connection state.
    state: RwLock<ConnectionState>,
    /// Notification handlers by characteristic.
    handlers: HandlerMap,
    /// Task routing notifications to handlers.
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Default bound on link establishment plus service discovery.
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = crate::config::DEFAULT_CONNECT_TIMEOUT;

    /// Connect to `address` and discover its services.
    ///
    /// Makes a single attempt bounded by `timeout`. The returned session is
    /// always [`ConnectionState::Connected`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionFailed`] if the device is unreachable,
    /// discovery fails, or the timeout elapses.
    pub async fn connect(central: &dyn Central, address: &str, timeout: Duration) -> Result<Self> {
        debug!(
            "Connection state changed: {} -> {}",
            ConnectionState::Disconnected,
            ConnectionState::Connecting
        );
        info!("Connecting to {}", address);

        // One budget covers link establishment and service discovery.
        let deadline = tokio::time::Instant::now() + timeout;

        let link = match tokio::time::timeout_at(deadline, central.connect(address)).await {
            Ok(Ok(link)) => link,
            Ok(Err(e)) => return Err(Self::connect_failed(address, e.to_string())),
            Err(_) => {
                return Err(Self::connect_failed(
                    address,
                    format!("timed out after {:?}", timeout),
                ))
            }
        };
        debug!("Link established to {}", link.address());

        let setup = async {
            let services = link.discover_services().await?;
            let notifications = link.notifications().await?;
            Ok::<_, Error>((services, notifications))
        };

        let (services, notifications) = match tokio::time::timeout_at(deadline, setup).await {
            Ok(Ok(setup)) => setup,
            Ok(Err(e)) => {
                Self::abandon(link.as_ref()).await;
                return Err(Self::connect_failed(address, e.to_string()));
            }
            Err(_) => {
                Self::abandon(link.as_ref()).await;
                return Err(Self::connect_failed(
                    address,
                    format!("service discovery timed out after {:?}", timeout),
                ));
            }
        };

        for service in &services {
            for characteristic in &service.characteristics {
                debug!(
                    "Found characteristic: {} in service {}",
                    characteristic.uuid, service.uuid
                );
            }
        }

        let handlers: HandlerMap = Arc::new(Mutex::new(HashMap::new()));
        let dispatcher = tokio::spawn(Self::dispatch(notifications, handlers.clone()));

        debug!(
            "Connection state changed: {} -> {}",
            ConnectionState::Connecting,
            ConnectionState::Connected
        );
        info!("Connected to {} ({} services)", address, services.len());

        Ok(Self {
            address: address.to_string(),
            link,
            services,
            state: RwLock::new(ConnectionState::Connected),
            handlers,
            dispatcher: Mutex::new(Some(dispatcher)),
        })
    }

    fn connect_failed(address: &str, reason: String) -> Error {
        debug!(
            "Connection state changed: {} -> {}",
            ConnectionState::Connecting,
            ConnectionState::Disconnected
        );
        warn!("Connection to {} failed: {}", address, reason);
        Error::ConnectionFailed { reason }
    }

    /// Best-effort teardown of a half-open link.
    async fn abandon(link: &dyn Link) {
        if let Err(e) = link.disconnect().await {
            debug!("Disconnect after failed setup: {}", e);
        }
    }

    /// Route notifications to their handlers, in arrival order.
    async fn dispatch(
        mut notifications: BoxStream<'static, NotificationEvent>,
        handlers: HandlerMap,
    ) {
        debug!("Notification dispatcher starting");

        while let Some(event) = notifications.next().await {
            trace!(
                "Notification received from {}: {} bytes",
                event.characteristic_uuid,
                event.payload.len()
            );

            {
                let mut map = handlers.lock();
                match map.get_mut(&event.characteristic_uuid) {
                    Some(handler) => handler(event),
                    None => trace!("No handler for {}, dropping", event.characteristic_uuid),
                }
            }
        }

        debug!("Notification dispatcher stopped");
    }

    /// Address of the peripheral.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// The service table discovered at connect time. No I/O.
    pub fn list_services(&self) -> Result<&[ServiceDescriptor]> {
        self.ensure_connected("list services")?;
        Ok(&self.services)
    }

    /// Find a discovered service.
    pub fn service(&self, uuid: &Uuid) -> Option<&ServiceDescriptor> {
        self.services.iter().find(|s| s.uuid == *uuid)
    }

    /// Find a discovered characteristic in any service.
    pub fn characteristic(&self, uuid: &Uuid) -> Option<&CharacteristicDescriptor> {
        self.services
            .iter()
            .flat_map(|s| s.characteristics.iter())
            .find(|c| c.uuid == *uuid)
    }

    /// Check whether a handler is registered for a characteristic.
    pub fn is_subscribed(&self, uuid: &Uuid) -> bool {
        self.handlers.lock().contains_key(uuid)
    }

    /// Read a characteristic value.
    pub async fn read(&self, uuid: &Uuid) -> Result<Vec<u8>> {
        self.ensure_connected("read")?;
        let characteristic = self.lookup(uuid)?;

        if !characteristic.properties.read {
            return Err(Error::Transport {
                reason: format!("characteristic {} is not readable", uuid),
            });
        }

        let data = self.link.read(*uuid).await?;
        trace!("Read {} bytes from characteristic {}", data.len(), uuid);
        Ok(data)
    }

    /// Write to a characteristic.
    ///
    /// Uses an acknowledged write when the characteristic supports one, in
    /// which case this returns after the peripheral acknowledges it; otherwise
    /// returns once the write is queued.
    pub async fn write(&self, uuid: &Uuid, data: &[u8]) -> Result<()> {
        self.ensure_connected("write")?;
        let characteristic = self.lookup(uuid)?;

        let kind = characteristic
            .properties
            .write_kind()
            .ok_or_else(|| Error::Write {
                uuid: uuid.to_string(),
                reason: "characteristic does not support writes".to_string(),
            })?;

        self.link
            .write(*uuid, data, kind)
            .await
            .map_err(|e| Error::Write {
                uuid: uuid.to_string(),
                reason: e.to_string(),
            })?;

        trace!("Wrote {} bytes to characteristic {}", data.len(), uuid);

        Ok(())
    }

    /// Register `handler` for notifications from a characteristic.
    ///
    /// The handler runs on the session's dispatcher task, once per
    /// notification, in arrival order. Subscribing again replaces the handler
    /// without touching the transport.
    pub async fn subscribe<F>(&self, uuid: &Uuid, handler: F) -> Result<()>
    where
        F: FnMut(NotificationEvent) + Send + 'static,
    {
        self.ensure_connected("subscribe")?;
        let characteristic = self.lookup(uuid)?;

        if !characteristic.properties.can_notify() {
            return Err(Error::Subscribe {
                uuid: uuid.to_string(),
                reason: "characteristic does not support notifications".to_string(),
            });
        }

        let replaced = self
            .handlers
            .lock()
            .insert(*uuid, Box::new(handler))
            .is_some();
        if replaced {
            debug!("Replaced notification handler for {}", uuid);
            return Ok(());
        }

        if let Err(e) = self.link.subscribe(*uuid).await {
            self.handlers.lock().remove(uuid);
            return Err(Error::Subscribe {
                uuid: uuid.to_string(),
                reason: e.to_string(),
            });
        }

        debug!("Successfully subscribed to notifications from {}", uuid);

        Ok(())
    }

    /// Stop notifications from a characteristic.
    ///
    /// No-op when not subscribed or not connected. Waits for a handler call in
    /// progress to finish. The characteristic counts as unsubscribed even when
    /// the transport reports an error.
    pub async fn unsubscribe(&self, uuid: &Uuid) -> Result<()> {
        if !self.is_connected() {
            return Ok(());
        }
        self.release(uuid).await
    }

    async fn release(&self, uuid: &Uuid) -> Result<()> {
        if self.handlers.lock().remove(uuid).is_none() {
            return Ok(());
        }

        match self.link.unsubscribe(*uuid).await {
            Ok(()) => {
                debug!("Unsubscribed from notifications from {}", uuid);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to unsubscribe from {}: {}", uuid, e);
                Err(e)
            }
        }
    }

    /// Disconnect from the peripheral.
    ///
    /// Releases every subscription first. No-op unless connected; the state
    /// always ends up [`ConnectionState::Disconnected`].
    pub async fn disconnect(&self) -> Result<()> {
        {
            let mut state = self.state.write();
            if !state.is_connected() {
                return Ok(());
            }
            *state = ConnectionState::Disconnecting;
        }
        debug!(
            "Connection state changed: {} -> {}",
            ConnectionState::Connected,
            ConnectionState::Disconnecting
        );

        let subscribed: Vec<Uuid> = self.handlers.lock().keys().copied().collect();
        let mut first_error = None;
        for uuid in subscribed {
            if let Err(e) = self.release(&uuid).await {
                first_error.get_or_insert(e);
            }
        }

        let dispatcher = self.dispatcher.lock().take();
        if let Some(handle) = dispatcher {
            handle.abort();
            let _ = handle.await;
        }

        let result = self.link.disconnect().await;

        *self.state.write() = ConnectionState::Disconnected;
        debug!(
            "Connection state changed: {} -> {}",
            ConnectionState::Disconnecting,
            ConnectionState::Disconnected
        );

        match result {
            Ok(()) => {
                info!("Successfully disconnected from {}", self.address);
                first_error.map_or(Ok(()), Err)
            }
            Err(e) => {
                error!("Failed to disconnect: {}", e);
                Err(e)
            }
        }
    }

    fn ensure_connected(&self, operation: &'static str) -> Result<()> {
        let state = self.state();
        if state.is_connected() {
            Ok(())
        } else {
            Err(Error::InvalidState {
                operation,
                state: state.to_string(),
            })
        }
    }

    fn lookup(&self, uuid: &Uuid) -> Result<&CharacteristicDescriptor> {
        self.characteristic(uuid)
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: uuid.to_string(),
            })
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(handle) = self.dispatcher.lock().take() {
            handle.abort();
        }
    }
}
