//! Resident bus monitor
//!
//! A dedicated thread owns the USB context and the lifecycle controller:
//! it rescans the bus on a short interval, attaches birds as they appear,
//! opens them so the status stream is armed, and detaches them when they
//! vanish. Events flow to the async main task over a bounded channel.

use crate::config::HostConfig;
use crate::transport::{UsbBirdTransport, find_birds};
use rusb::{Context, Device, UsbContext};
use session::{
    CancelToken, InboundObserver, LifecycleController, MinorId, SessionHandle, SessionRegistry,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// What the monitor reports upstream.
#[derive(Debug)]
pub enum MonitorEvent {
    Attached { minor: MinorId, serial: String },
    AttachFailed { message: String },
    Detached { minor: MinorId },
    /// Bytes arrived on a session's status stream.
    Payload { minor: MinorId, len: usize },
}

/// Forwards status payloads out of the completion context. Never blocks;
/// events are dropped when the consumer lags.
struct PayloadForwarder {
    event_tx: async_channel::Sender<MonitorEvent>,
}

impl InboundObserver for PayloadForwarder {
    fn on_payload(&self, minor: MinorId, payload: &[u8]) {
        let _ = self
            .event_tx
            .try_send(MonitorEvent::Payload { minor, len: payload.len() });
    }
}

struct Bird {
    minor: MinorId,
    handle: SessionHandle,
}

/// Monitor thread state.
pub struct MonitorWorker {
    context: Context,
    controller: LifecycleController,
    config: HostConfig,
    event_tx: async_channel::Sender<MonitorEvent>,
    shutdown: Arc<AtomicBool>,
    /// Birds currently attached, keyed by (bus, address).
    birds: HashMap<(u8, u8), Bird>,
}

impl MonitorWorker {
    pub fn new(
        config: HostConfig,
        event_tx: async_channel::Sender<MonitorEvent>,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self, rusb::Error> {
        let context = Context::new()?;
        let controller = LifecycleController::new(Arc::new(SessionRegistry::new()))
            .with_observer(Arc::new(PayloadForwarder { event_tx: event_tx.clone() }));

        Ok(MonitorWorker {
            context,
            controller,
            config,
            event_tx,
            shutdown,
            birds: HashMap::new(),
        })
    }

    /// Scan loop; runs until the shutdown flag is raised, then detaches
    /// everything on the way out.
    pub fn run(mut self) {
        info!("USB monitor thread started");
        let interval = Duration::from_millis(self.config.monitor.scan_interval_ms);

        while !self.shutdown.load(Ordering::Acquire) {
            if let Err(e) = self.scan() {
                warn!("Bus scan failed: {}", e);
            }
            std::thread::sleep(interval);
        }

        let keys: Vec<(u8, u8)> = self.birds.keys().copied().collect();
        for key in keys {
            self.remove_bird(key);
        }
        info!("USB monitor thread stopped");
    }

    /// One pass: diff the bus against the attached set. Hot-plug events
    /// land between scans.
    fn scan(&mut self) -> Result<(), rusb::Error> {
        let present: HashMap<(u8, u8), Device<Context>> = find_birds(
            &self.context,
            self.config.device.vendor_id,
            self.config.device.product_id,
        )?
        .into_iter()
        .map(|device| ((device.bus_number(), device.address()), device))
        .collect();

        let gone: Vec<(u8, u8)> = self
            .birds
            .keys()
            .filter(|key| !present.contains_key(key))
            .copied()
            .collect();
        for key in gone {
            self.remove_bird(key);
        }

        for (key, device) in present {
            if !self.birds.contains_key(&key) {
                self.add_bird(key, &device);
            }
        }
        Ok(())
    }

    fn add_bird(&mut self, key: (u8, u8), device: &Device<Context>) {
        let transport = match UsbBirdTransport::open(device) {
            Ok(transport) => transport,
            Err(e) => {
                warn!("Could not open bird at bus {} addr {}: {}", key.0, key.1, e);
                self.send(MonitorEvent::AttachFailed { message: e.to_string() });
                return;
            }
        };

        let minor = match self.controller.attach(Arc::new(transport)) {
            Ok(minor) => minor,
            Err(e) => {
                warn!("Attach failed for bus {} addr {}: {}", key.0, key.1, e);
                self.send(MonitorEvent::AttachFailed { message: e.to_string() });
                return;
            }
        };

        // Hold the session open so the status stream stays armed while we
        // watch.
        let handle = match self.controller.registry().open(minor, &CancelToken::new()) {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Open failed for session {}: {}", minor, e);
                let _ = self.controller.detach(minor);
                self.send(MonitorEvent::AttachFailed { message: e.to_string() });
                return;
            }
        };

        let serial = self
            .controller
            .registry()
            .sessions()
            .into_iter()
            .find(|snapshot| snapshot.minor == minor)
            .map(|snapshot| snapshot.serial)
            .unwrap_or_default();

        self.birds.insert(key, Bird { minor, handle });
        self.send(MonitorEvent::Attached { minor, serial });
    }

    fn remove_bird(&mut self, key: (u8, u8)) {
        if let Some(bird) = self.birds.remove(&key) {
            if let Err(e) = self.controller.detach(bird.minor) {
                warn!("Detach failed: {}", e);
            }
            if let Err(e) = bird.handle.close() {
                debug!("Close after unplug failed: {}", e);
            }
            self.send(MonitorEvent::Detached { minor: bird.minor });
        }
    }

    fn send(&self, event: MonitorEvent) {
        // The receiver going away just means nobody is listening anymore.
        let _ = self.event_tx.send_blocking(event);
    }
}

/// Spawn the monitor thread. It runs until the shutdown flag is raised.
pub fn spawn_monitor(
    config: HostConfig,
    event_tx: async_channel::Sender<MonitorEvent>,
    shutdown: Arc<AtomicBool>,
) -> std::thread::JoinHandle<Result<(), rusb::Error>> {
    std::thread::Builder::new()
        .name("usb-monitor".to_string())
        .spawn(move || {
            let worker = MonitorWorker::new(config, event_tx, shutdown)?;
            worker.run();
            Ok(())
        })
        .expect("Failed to spawn USB monitor thread")
}
