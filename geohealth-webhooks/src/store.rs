//! In-memory subscription store.
//!
//! Every operation except [`SubscriptionStore::matching`] and
//! [`SubscriptionStore::record_delivery`] is scoped to an owner: one caller
//! can never read or delete another caller's subscriptions. Locks are held
//! only for map access and never across an await.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use reqwest::Url;

use crate::error::{WebhookError, WebhookResult};
use crate::types::{EventScope, EventType, NewSubscription, SubscriptionId, WebhookSubscription};

/// Maximum accepted secret length.
pub const MAX_SECRET_LEN: usize = 64;

#[derive(Debug)]
pub struct SubscriptionStore {
    subscriptions: RwLock<HashMap<SubscriptionId, WebhookSubscription>>,
    max_per_owner: usize,
}

impl SubscriptionStore {
    pub fn new(max_per_owner: usize) -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            max_per_owner,
        }
    }

    pub fn max_per_owner(&self) -> usize {
        self.max_per_owner
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<SubscriptionId, WebhookSubscription>> {
        self.subscriptions.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<SubscriptionId, WebhookSubscription>> {
        self.subscriptions.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Validate and register a subscription for `owner_key`.
    ///
    /// The per-owner limit check and the insert happen under one write lock.
    pub fn insert(
        &self,
        owner_key: &str,
        request: NewSubscription,
        now: DateTime<Utc>,
    ) -> WebhookResult<WebhookSubscription> {
        let url = validate(&request)?;

        let mut subscriptions = self.write();
        let active = subscriptions
            .values()
            .filter(|s| s.active && s.owner_key == owner_key)
            .count();
        if active >= self.max_per_owner {
            return Err(WebhookError::LimitExceeded {
                max: self.max_per_owner,
            });
        }

        let subscription = WebhookSubscription {
            id: SubscriptionId::new(),
            owner_key: owner_key.to_string(),
            url,
            events: request.events,
            filters: request.filters.filter(|f| !f.is_empty()),
            secret: request.secret.filter(|s| !s.is_empty()),
            active: true,
            created_at: now,
            success_count: 0,
            failure_count: 0,
            last_delivery_at: None,
        };
        subscriptions.insert(subscription.id, subscription.clone());
        Ok(subscription)
    }

    /// Subscriptions owned by `owner_key`, oldest first.
    pub fn list(&self, owner_key: &str) -> Vec<WebhookSubscription> {
        let mut owned: Vec<_> = self
            .read()
            .values()
            .filter(|s| s.owner_key == owner_key)
            .cloned()
            .collect();
        owned.sort_by_key(|s| s.id);
        owned
    }

    pub fn get(&self, owner_key: &str, id: SubscriptionId) -> Option<WebhookSubscription> {
        self.read()
            .get(&id)
            .filter(|s| s.owner_key == owner_key)
            .cloned()
    }

    pub fn remove(&self, owner_key: &str, id: SubscriptionId) -> Option<WebhookSubscription> {
        let mut subscriptions = self.write();
        match subscriptions.get(&id) {
            Some(s) if s.owner_key == owner_key => subscriptions.remove(&id),
            _ => None,
        }
    }

    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.read().contains_key(&id)
    }

    /// Active subscriptions that want `event` under `scope`.
    pub fn matching(&self, event: EventType, scope: &EventScope) -> Vec<WebhookSubscription> {
        self.read()
            .values()
            .filter(|s| s.wants(event, scope))
            .cloned()
            .collect()
    }

    /// Update delivery statistics. Unknown ids (deleted mid-delivery) are ignored.
    pub fn record_delivery(&self, id: SubscriptionId, success: bool, at: DateTime<Utc>) {
        if let Some(subscription) = self.write().get_mut(&id) {
            subscription.last_delivery_at = Some(at);
            if success {
                subscription.success_count += 1;
            } else {
                subscription.failure_count += 1;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

/// Check a registration request, returning the normalised URL.
fn validate(request: &NewSubscription) -> WebhookResult<String> {
    let url = Url::parse(request.url.trim()).map_err(|e| WebhookError::InvalidUrl {
        url: request.url.clone(),
        reason: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(WebhookError::InvalidUrl {
            url: request.url.clone(),
            reason: format!("unsupported scheme '{}'", url.scheme()),
        });
    }
    if url.host_str().is_none() {
        return Err(WebhookError::InvalidUrl {
            url: request.url.clone(),
            reason: "missing host".to_string(),
        });
    }

    if request.events.is_empty() {
        return Err(WebhookError::NoEvents);
    }
    for (i, event) in request.events.iter().enumerate() {
        if request.events[..i].contains(event) {
            return Err(WebhookError::DuplicateEvent(*event));
        }
    }

    if let Some(secret) = &request.secret {
        if secret.chars().count() > MAX_SECRET_LEN {
            return Err(WebhookError::SecretTooLong {
                max: MAX_SECRET_LEN,
            });
        }
    }

    if let Some(filters) = &request.filters {
        filters.validate()?;
    }

    Ok(url.to_string())
}
