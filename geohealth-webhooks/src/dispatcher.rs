//! Webhook dispatcher.
//!
//! `publish` is synchronous. It matches subscriptions, prepares one
//! [`Delivery`] per match and pushes it onto that subscription's lane without
//! waiting. Each lane is a tracked task draining a bounded queue, so
//! deliveries to one endpoint are strictly sequential while different
//! endpoints proceed in parallel. A shared semaphore caps concurrent outbound
//! attempts across all lanes.
//!
//! Backoff sleeps happen inside the lane task. A full lane drops the new
//! delivery and counts it under `webhook/dropped`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use geohealth_core::{outcomes, MetricsAggregator};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::WebhookConfig;
use crate::delivery::{AbandonReason, AttemptOutcome, Delivery, DeliveryState, RetryPolicy};
use crate::error::{TransportError, WebhookError, WebhookResult};
use crate::store::SubscriptionStore;
use crate::transport::{OutboundRequest, WebhookTransport};
use crate::types::{EventScope, EventType, NewSubscription, SubscriptionId, WebhookSubscription};

/// Latency series for outbound attempts.
pub const WEBHOOK_SERIES: &str = outcomes::WEBHOOK;

/// What `publish` did with an event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReceipt {
    /// Subscriptions whose events and filters matched.
    pub matched: usize,
    /// Deliveries queued onto a lane.
    pub enqueued: usize,
    /// Deliveries discarded because a lane was full, the subscription was
    /// removed mid-publish, or the dispatcher closed.
    pub dropped: usize,
}

#[derive(Debug)]
struct Inner {
    store: SubscriptionStore,
    lanes: Mutex<HashMap<SubscriptionId, mpsc::Sender<Delivery>>>,
    transport: Arc<dyn WebhookTransport>,
    metrics: Arc<MetricsAggregator>,
    permits: Semaphore,
    policy: RetryPolicy,
    config: WebhookConfig,
    runtime: Handle,
    tracker: TaskTracker,
    cancel: CancellationToken,
    closed: AtomicBool,
}

/// Owns subscriptions and their delivery lanes.
///
/// Construct one per process inside a Tokio runtime. Dropping the dispatcher
/// cancels outstanding lanes; call [`WebhookDispatcher::shutdown`] first to
/// let queued deliveries finish.
#[derive(Debug)]
pub struct WebhookDispatcher {
    inner: Arc<Inner>,
}

impl WebhookDispatcher {
    pub fn new(
        config: WebhookConfig,
        transport: Arc<dyn WebhookTransport>,
        metrics: Arc<MetricsAggregator>,
    ) -> WebhookResult<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| WebhookError::NoRuntime)?;
        let permits = config.concurrency.min(Semaphore::MAX_PERMITS);

        Ok(Self {
            inner: Arc::new(Inner {
                store: SubscriptionStore::new(config.max_per_owner),
                lanes: Mutex::new(HashMap::new()),
                transport,
                metrics,
                permits: Semaphore::new(permits),
                policy: config.retry_policy(),
                config,
                runtime,
                tracker: TaskTracker::new(),
                cancel: CancellationToken::new(),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &WebhookConfig {
        &self.inner.config
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    // ========================================================================
    // SUBSCRIPTIONS
    // ========================================================================

    pub fn subscribe(
        &self,
        owner_key: &str,
        request: NewSubscription,
    ) -> WebhookResult<WebhookSubscription> {
        if self.is_closed() {
            return Err(WebhookError::ShutDown);
        }
        let subscription = self.inner.store.insert(owner_key, request, Utc::now())?;
        tracing::info!(
            webhook_id = %subscription.id,
            url = %subscription.url,
            events = ?subscription.events,
            "Webhook registered"
        );
        Ok(subscription)
    }

    pub fn list(&self, owner_key: &str) -> Vec<WebhookSubscription> {
        self.inner.store.list(owner_key)
    }

    pub fn get(&self, owner_key: &str, id: SubscriptionId) -> WebhookResult<WebhookSubscription> {
        self.inner
            .store
            .get(owner_key, id)
            .ok_or(WebhookError::NotFound(id))
    }

    /// Remove a subscription. Deliveries already queued on its lane still run.
    pub fn unsubscribe(&self, owner_key: &str, id: SubscriptionId) -> bool {
        // Lanes lock first, as in `enqueue`, so no lane is started for `id`
        // once it leaves the store.
        let mut lanes = self.inner.lanes();
        if self.inner.store.remove(owner_key, id).is_none() {
            return false;
        }
        lanes.remove(&id);
        drop(lanes);
        tracing::info!(webhook_id = %id, "Webhook removed");
        true
    }

    // ========================================================================
    // PUBLISH
    // ========================================================================

    /// Fan `data` out to every matching subscription.
    ///
    /// When `scope` is `None` it is read from `data` (see
    /// [`EventScope::from_data`]). Returns after queueing; delivery failures
    /// are only visible through metrics.
    pub fn publish(&self, event: EventType, data: Value, scope: Option<EventScope>) -> PublishReceipt {
        let mut receipt = PublishReceipt::default();
        if self.is_closed() {
            tracing::warn!(event = %event, "Publish after shutdown ignored");
            return receipt;
        }

        let scope = scope.unwrap_or_else(|| EventScope::from_data(&data));
        let matched = self.inner.store.matching(event, &scope);
        receipt.matched = matched.len();
        let timestamp = Utc::now();

        for subscription in &matched {
            let delivery = match Delivery::prepare(
                subscription,
                event,
                data.clone(),
                timestamp,
                &self.inner.config.user_agent,
            ) {
                Ok(delivery) => delivery,
                Err(e) => {
                    tracing::error!(webhook_id = %subscription.id, error = %e, "Failed to prepare webhook delivery");
                    self.inner.metrics.record_outcome(outcomes::WEBHOOK, outcomes::FAILED);
                    receipt.dropped += 1;
                    continue;
                }
            };

            if Inner::enqueue(&self.inner, delivery) {
                receipt.enqueued += 1;
            } else {
                self.inner.metrics.record_outcome(outcomes::WEBHOOK, outcomes::DROPPED);
                receipt.dropped += 1;
            }
        }

        tracing::debug!(
            event = %event,
            matched = receipt.matched,
            enqueued = receipt.enqueued,
            dropped = receipt.dropped,
            "Event published"
        );
        receipt
    }

    // ========================================================================
    // SHUTDOWN
    // ========================================================================

    /// Stop accepting events and drain the lanes.
    ///
    /// Waits up to `shutdown_grace` for queued and in-flight deliveries, then
    /// cancels whatever remains. Returns `true` if everything drained in time.
    pub async fn shutdown(&self) -> bool {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            self.inner.tracker.wait().await;
            return true;
        }

        // Dropping the senders lets each lane finish its queue and exit.
        let lanes = std::mem::take(&mut *self.inner.lanes());
        let lane_count = lanes.len();
        drop(lanes);
        self.inner.tracker.close();

        let grace = self.inner.config.shutdown_grace;
        let drained = tokio::time::timeout(grace, self.inner.tracker.wait())
            .await
            .is_ok();
        if !drained {
            tracing::warn!(
                grace_ms = grace.as_millis() as u64,
                "Webhook deliveries still pending after grace period, abandoning"
            );
            self.inner.cancel.cancel();
            self.inner.tracker.wait().await;
        }

        tracing::info!(lanes = lane_count, drained, "Webhook dispatcher stopped");
        drained
    }
}

impl Drop for WebhookDispatcher {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

// ============================================================================
// LANES
// ============================================================================

impl Inner {
    fn lanes(&self) -> MutexGuard<'_, HashMap<SubscriptionId, mpsc::Sender<Delivery>>> {
        self.lanes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn spawn_lane(inner: &Arc<Self>, id: SubscriptionId) -> mpsc::Sender<Delivery> {
        let (tx, rx) = mpsc::channel(inner.config.lane_capacity);
        inner
            .tracker
            .spawn_on(run_lane(Arc::clone(inner), id, rx), &inner.runtime);
        tx
    }

    /// Queue onto the subscription's lane, starting it if needed.
    fn enqueue(inner: &Arc<Self>, delivery: Delivery) -> bool {
        let id = delivery.subscription_id;
        let mut lanes = inner.lanes();
        // Checked under the lanes lock so no lane starts after shutdown took the map.
        if inner.closed.load(Ordering::Acquire) {
            return false;
        }
        if !inner.store.contains(id) {
            tracing::debug!(webhook_id = %id, "Webhook removed before enqueue, dropping delivery");
            return false;
        }
        let sender = lanes
            .entry(id)
            .or_insert_with(|| Self::spawn_lane(inner, id));

        match sender.try_send(delivery) {
            Ok(()) => true,
            Err(TrySendError::Full(delivery)) => {
                tracing::warn!(
                    webhook_id = %id,
                    delivery_id = %delivery.id,
                    capacity = inner.config.lane_capacity,
                    "Webhook lane full, dropping delivery"
                );
                false
            }
            Err(TrySendError::Closed(delivery)) => {
                let sender = Self::spawn_lane(inner, id);
                let queued = sender.try_send(delivery).is_ok();
                lanes.insert(id, sender);
                queued
            }
        }
    }

    /// Drive one delivery to a terminal state.
    async fn deliver(&self, mut delivery: Delivery) {
        let request = delivery.request();

        loop {
            let attempt = delivery.begin_attempt();
            let Some(outcome) = self.attempt(&request).await else {
                self.abandon_for_shutdown(&mut delivery);
                return;
            };

            match delivery.record(outcome, &self.policy).clone() {
                DeliveryState::Delivered { attempts, status } => {
                    self.metrics.record_outcome(outcomes::WEBHOOK, outcomes::DELIVERED);
                    self.store.record_delivery(delivery.subscription_id, true, Utc::now());
                    tracing::info!(
                        webhook_id = %delivery.subscription_id,
                        delivery_id = %delivery.id,
                        status,
                        attempts,
                        "Webhook delivered"
                    );
                    return;
                }
                DeliveryState::Retrying { delay, .. } => {
                    self.metrics.record_outcome(outcomes::WEBHOOK, outcomes::RETRY);
                    tracing::warn!(
                        webhook_id = %delivery.subscription_id,
                        delivery_id = %delivery.id,
                        attempt,
                        max_attempts = self.policy.max_attempts(),
                        delay_ms = delay.as_millis() as u64,
                        "Webhook delivery failed, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => {
                            self.abandon_for_shutdown(&mut delivery);
                            return;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                DeliveryState::Abandoned { attempts, reason } => {
                    self.metrics.record_outcome(outcomes::WEBHOOK, outcomes::FAILED);
                    self.store.record_delivery(delivery.subscription_id, false, Utc::now());
                    tracing::error!(
                        webhook_id = %delivery.subscription_id,
                        delivery_id = %delivery.id,
                        attempts,
                        reason = ?reason,
                        "Webhook delivery abandoned"
                    );
                    return;
                }
                DeliveryState::Pending | DeliveryState::Attempting { .. } => return,
            }
        }
    }

    /// One bounded attempt. `None` means the dispatcher was cancelled.
    async fn attempt(&self, request: &OutboundRequest) -> Option<AttemptOutcome> {
        let _permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return None,
            permit = self.permits.acquire() => match permit {
                Ok(permit) => permit,
                Err(_) => return None,
            },
        };

        let timeout = self.config.attempt_timeout;
        let started = Instant::now();
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return None,
            result = tokio::time::timeout(timeout, self.transport.send(request)) => result,
        };
        self.metrics
            .record_latency(WEBHOOK_SERIES, started.elapsed().as_secs_f64() * 1000.0);

        Some(AttemptOutcome::from_transport(
            result.unwrap_or(Err(TransportError::Timeout(timeout))),
        ))
    }

    fn abandon_for_shutdown(&self, delivery: &mut Delivery) {
        delivery.abandon(AbandonReason::ShuttingDown);
        self.metrics.record_outcome(outcomes::WEBHOOK, outcomes::DROPPED);
        tracing::warn!(
            webhook_id = %delivery.subscription_id,
            delivery_id = %delivery.id,
            attempts = delivery.attempts(),
            "Webhook delivery abandoned at shutdown"
        );
    }
}

async fn run_lane(inner: Arc<Inner>, id: SubscriptionId, mut rx: mpsc::Receiver<Delivery>) {
    tracing::debug!(webhook_id = %id, "Webhook lane started");

    loop {
        let delivery = tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(delivery) => delivery,
                None => break,
            },
        };
        inner.deliver(delivery).await;
    }

    rx.close();
    let mut discarded = 0usize;
    while rx.try_recv().is_ok() {
        inner.metrics.record_outcome(outcomes::WEBHOOK, outcomes::DROPPED);
        discarded += 1;
    }
    tracing::debug!(webhook_id = %id, discarded, "Webhook lane stopped");
}
