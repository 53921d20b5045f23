//! In-memory provider doubles for tests
//!
//! Responses are scripted per operation with a default fallback, and every
//! call is recorded so tests can assert on traffic.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use calmesh_types::{CalError, ProjectedPayload, Provider, Result};

use crate::api::{CalendarApi, TokenClient};
use crate::types::{EventsPage, SubscriptionInfo, TokenGrant, WatchInfo};

#[derive(Debug, Default)]
pub struct RecordedCalls {
    pub refreshes: u64,
    pub revokes: u64,
    pub lists: u64,
    pub inserted: Vec<(String, ProjectedPayload)>,
    pub patched: Vec<(String, String, ProjectedPayload)>,
    pub deleted: Vec<(String, String)>,
    pub stopped_channels: Vec<String>,
    pub deleted_subscriptions: Vec<String>,
}

#[derive(Default)]
struct Scripted {
    refresh: VecDeque<Result<TokenGrant>>,
    list: VecDeque<Result<EventsPage>>,
    insert: VecDeque<Result<String>>,
    patch: VecDeque<Result<()>>,
    delete: VecDeque<Result<()>>,
}

/// A fake provider implementing both trait seams
#[derive(Default)]
pub struct FakeProvider {
    scripted: Mutex<Scripted>,
    calls: Mutex<RecordedCalls>,
    counter: AtomicU64,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_refresh(&self, result: Result<TokenGrant>) {
        self.scripted.lock().unwrap().refresh.push_back(result);
    }

    pub fn script_list(&self, result: Result<EventsPage>) {
        self.scripted.lock().unwrap().list.push_back(result);
    }

    pub fn script_insert(&self, result: Result<String>) {
        self.scripted.lock().unwrap().insert.push_back(result);
    }

    pub fn script_patch(&self, result: Result<()>) {
        self.scripted.lock().unwrap().patch.push_back(result);
    }

    pub fn script_delete(&self, result: Result<()>) {
        self.scripted.lock().unwrap().delete.push_back(result);
    }

    /// Inspect recorded traffic
    pub fn with_calls<R>(&self, f: impl FnOnce(&RecordedCalls) -> R) -> R {
        f(&self.calls.lock().unwrap())
    }

    pub fn refresh_count(&self) -> u64 {
        self.calls.lock().unwrap().refreshes
    }

    fn next_id(&self, prefix: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{prefix}{n}")
    }
}

#[async_trait]
impl TokenClient for FakeProvider {
    async fn refresh(&self, _provider: Provider, _refresh_token: &str) -> Result<TokenGrant> {
        self.calls.lock().unwrap().refreshes += 1;
        match self.scripted.lock().unwrap().refresh.pop_front() {
            Some(result) => result,
            None => Ok(TokenGrant {
                access_token: self.next_id("fake-access-"),
                expires_in: 3600,
            }),
        }
    }

    async fn revoke(&self, provider: Provider, _refresh_token: &str) -> Result<bool> {
        self.calls.lock().unwrap().revokes += 1;
        Ok(provider == Provider::Google)
    }
}

#[async_trait]
impl CalendarApi for FakeProvider {
    async fn list_events(
        &self,
        _provider: Provider,
        _access_token: &str,
        _calendar_id: &str,
        _sync_token: Option<&str>,
        _page_token: Option<&str>,
    ) -> Result<EventsPage> {
        self.calls.lock().unwrap().lists += 1;
        match self.scripted.lock().unwrap().list.pop_front() {
            Some(result) => result,
            None => Ok(EventsPage {
                events: Vec::new(),
                next_page_token: None,
                next_sync_token: Some(self.next_id("sync-")),
            }),
        }
    }

    async fn insert_event(
        &self,
        _provider: Provider,
        _access_token: &str,
        calendar_id: &str,
        payload: &ProjectedPayload,
    ) -> Result<String> {
        let scripted = self.scripted.lock().unwrap().insert.pop_front();
        let result = match scripted {
            Some(result) => result,
            None => Ok(self.next_id("prov-evt-")),
        };
        if result.is_ok() {
            self.calls
                .lock()
                .unwrap()
                .inserted
                .push((calendar_id.to_string(), payload.clone()));
        }
        result
    }

    async fn patch_event(
        &self,
        _provider: Provider,
        _access_token: &str,
        calendar_id: &str,
        provider_event_id: &str,
        payload: &ProjectedPayload,
    ) -> Result<()> {
        let scripted = self.scripted.lock().unwrap().patch.pop_front();
        let result = scripted.unwrap_or(Ok(()));
        if result.is_ok() {
            self.calls.lock().unwrap().patched.push((
                calendar_id.to_string(),
                provider_event_id.to_string(),
                payload.clone(),
            ));
        }
        result
    }

    async fn delete_event(
        &self,
        _provider: Provider,
        _access_token: &str,
        calendar_id: &str,
        provider_event_id: &str,
    ) -> Result<()> {
        let scripted = self.scripted.lock().unwrap().delete.pop_front();
        let result = scripted.unwrap_or(Ok(()));
        if result.is_ok() || matches!(result, Err(CalError::Provider { status: 404, .. })) {
            self.calls
                .lock()
                .unwrap()
                .deleted
                .push((calendar_id.to_string(), provider_event_id.to_string()));
        }
        result
    }

    async fn find_managed_event(
        &self,
        _provider: Provider,
        _access_token: &str,
        _calendar_id: &str,
        canonical_event_id: &str,
    ) -> Result<Option<String>> {
        Ok(Some(format!("existing-{canonical_event_id}")))
    }

    async fn ensure_overlay_calendar(
        &self,
        _provider: Provider,
        _access_token: &str,
    ) -> Result<String> {
        Ok("overlay-cal-1".to_string())
    }

    async fn watch_calendar(
        &self,
        _access_token: &str,
        _calendar_id: &str,
        _channel_id: &str,
        _webhook_url: &str,
    ) -> Result<WatchInfo> {
        Ok(WatchInfo {
            resource_id: self.next_id("resource-"),
            expiry: calmesh_types::time::now_millis() + 7 * 24 * 3600 * 1000,
        })
    }

    async fn stop_channel(
        &self,
        _access_token: &str,
        channel_id: &str,
        _resource_id: &str,
    ) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .stopped_channels
            .push(channel_id.to_string());
        Ok(())
    }

    async fn create_subscription(
        &self,
        _access_token: &str,
        _webhook_url: &str,
        _resource: &str,
        _client_state: &str,
    ) -> Result<SubscriptionInfo> {
        Ok(SubscriptionInfo {
            subscription_id: self.next_id("graph-sub-"),
            expiry: calmesh_types::time::now_millis() + 4230 * 60 * 1000,
        })
    }

    async fn renew_subscription(&self, _access_token: &str, _subscription_id: &str) -> Result<i64> {
        Ok(calmesh_types::time::now_millis() + 4230 * 60 * 1000)
    }

    async fn delete_subscription(&self, _access_token: &str, subscription_id: &str) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .deleted_subscriptions
            .push(subscription_id.to_string());
        Ok(())
    }
}
