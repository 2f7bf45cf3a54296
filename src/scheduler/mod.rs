use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::apns::{DispatchResult, Gateway};
use crate::content::{ContentSource, RotationSlot};
use crate::registry::{short_token, DeviceRegistry};

#[derive(Debug, Default, Clone, Copy)]
pub struct TickSummary {
    pub dispatched: usize,
    pub delivered: usize,
    pub transient: usize,
    pub evicted: usize,
}

/// One rotation pass: advance every registered device, render the slot its
/// new index lands on, and push it. Devices are dispatched concurrently; the
/// only registry mutations afterwards are evictions and delivery timestamps.
pub async fn run_tick<G: Gateway>(
    registry: &DeviceRegistry,
    content: &ContentSource,
    gateway: &G,
) -> TickSummary {
    let devices = registry.list().await;

    let results = join_all(devices.into_iter().map(|device| async move {
        // The device may have unregistered between snapshot and dispatch.
        let index = registry.advance_rotation(&device.device_token).await?;
        let slot = RotationSlot::from_index(index);
        let state = content.content_for(slot, device.user_id.as_deref()).await;
        let result = gateway
            .send_update(&device.device_token, &device.activity_id, &state, "update")
            .await;
        Some((device.device_token, result))
    }))
    .await;

    let mut summary = TickSummary::default();
    for (device_token, result) in results.into_iter().flatten() {
        summary.dispatched += 1;
        match result {
            DispatchResult::Delivered => {
                summary.delivered += 1;
                registry.touch(&device_token).await;
            }
            DispatchResult::TransientFailure => summary.transient += 1,
            DispatchResult::PermanentFailure { evict } => {
                if evict {
                    warn!("evicting dead device {}...", short_token(&device_token));
                    registry.unregister(&device_token).await;
                    summary.evicted += 1;
                }
            }
        }
    }
    summary
}

/// Out-of-cycle dispatch with caller-supplied content; bypasses rotation but
/// follows the same eviction rule.
pub async fn dispatch_now<G: Gateway>(
    registry: &DeviceRegistry,
    gateway: &G,
    device_token: &str,
    activity_id: &str,
    content_state: &crate::content::ContentState,
) -> DispatchResult {
    let result = gateway
        .send_update(device_token, activity_id, content_state, "update")
        .await;
    match result {
        DispatchResult::Delivered => registry.touch(device_token).await,
        DispatchResult::PermanentFailure { evict: true } => {
            registry.unregister(device_token).await;
        }
        _ => {}
    }
    result
}

/// Recurring dispatch timer. `start` and `stop` are both idempotent; a tick
/// that overruns its interval defers the next one instead of stacking.
pub struct DispatchScheduler<G: Gateway + 'static> {
    registry: Arc<DeviceRegistry>,
    content: Arc<ContentSource>,
    gateway: Arc<G>,
    tick: Duration,
    handle: Mutex<Option<JoinHandle<()>>>,
    tick_running: Arc<AtomicBool>,
}

impl<G: Gateway + 'static> DispatchScheduler<G> {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        content: Arc<ContentSource>,
        gateway: Arc<G>,
        tick: Duration,
    ) -> Self {
        Self {
            registry,
            content,
            gateway,
            tick,
            handle: Mutex::new(None),
            tick_running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn start(&self) {
        let mut handle = self.handle.lock().await;
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("scheduler already running");
            return;
        }

        let registry = Arc::clone(&self.registry);
        let content = Arc::clone(&self.content);
        let gateway = Arc::clone(&self.gateway);
        let tick_running = Arc::clone(&self.tick_running);
        let tick = self.tick;

        *handle = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;

                // The interval alone already serializes ticks within this
                // task; the flag guards against any future second entry point.
                if tick_running.swap(true, Ordering::SeqCst) {
                    continue;
                }
                let summary = run_tick(&registry, &content, gateway.as_ref()).await;
                tick_running.store(false, Ordering::SeqCst);

                if summary.dispatched > 0 {
                    info!(
                        "tick: {} dispatched, {} delivered, {} transient, {} evicted",
                        summary.dispatched,
                        summary.delivered,
                        summary.transient,
                        summary.evicted
                    );
                }
            }
        }));
        info!("dispatch scheduler started (every {:?})", self.tick);
    }

    pub async fn stop(&self) {
        if let Some(handle) = self.handle.lock().await.take() {
            handle.abort();
            info!("dispatch scheduler stopped");
        }
    }
}
