//! Provider trait seams

use async_trait::async_trait;

use calmesh_types::{ProjectedPayload, Provider, Result};

use crate::types::{EventsPage, SubscriptionInfo, TokenGrant, WatchInfo};

/// OAuth token endpoint operations
#[async_trait]
pub trait TokenClient: Send + Sync {
    /// Exchange a refresh token for a fresh access token. Non-2xx surfaces
    /// as `RefreshFailed(status, body)`.
    async fn refresh(&self, provider: Provider, refresh_token: &str) -> Result<TokenGrant>;

    /// Best-effort server-side revocation. Returns whether the server
    /// accepted; Microsoft has no standard revoke endpoint and returns
    /// `false` without a network call.
    async fn revoke(&self, provider: Provider, refresh_token: &str) -> Result<bool>;
}

/// Calendar data-plane operations
#[async_trait]
pub trait CalendarApi: Send + Sync {
    /// List events, paging with `page_token`; `sync_token` requests an
    /// incremental listing. Non-2xx surfaces as `Provider(status, body)`,
    /// including `410 Gone` for expired sync tokens.
    async fn list_events(
        &self,
        provider: Provider,
        access_token: &str,
        calendar_id: &str,
        sync_token: Option<&str>,
        page_token: Option<&str>,
    ) -> Result<EventsPage>;

    /// Insert a projected mirror event; returns the provider event id
    async fn insert_event(
        &self,
        provider: Provider,
        access_token: &str,
        calendar_id: &str,
        payload: &ProjectedPayload,
    ) -> Result<String>;

    /// Patch an existing mirror event
    async fn patch_event(
        &self,
        provider: Provider,
        access_token: &str,
        calendar_id: &str,
        provider_event_id: &str,
        payload: &ProjectedPayload,
    ) -> Result<()>;

    /// Delete an event. 404 is surfaced as `Provider { status: 404, .. }`;
    /// callers treat it as success.
    async fn delete_event(
        &self,
        provider: Provider,
        access_token: &str,
        calendar_id: &str,
        provider_event_id: &str,
    ) -> Result<()>;

    /// Find an existing managed event by its canonical id marker. Used for
    /// the 409-duplicate fallback on insert.
    async fn find_managed_event(
        &self,
        provider: Provider,
        access_token: &str,
        calendar_id: &str,
        canonical_event_id: &str,
    ) -> Result<Option<String>>;

    /// Resolve or create the overlay calendar; returns its id
    async fn ensure_overlay_calendar(
        &self,
        provider: Provider,
        access_token: &str,
    ) -> Result<String>;

    /// Register a webhook watch on a calendar (Google)
    async fn watch_calendar(
        &self,
        access_token: &str,
        calendar_id: &str,
        channel_id: &str,
        webhook_url: &str,
    ) -> Result<WatchInfo>;

    /// Stop a watch channel (Google). Callers swallow failures.
    async fn stop_channel(
        &self,
        access_token: &str,
        channel_id: &str,
        resource_id: &str,
    ) -> Result<()>;

    /// Create a Graph change-notification subscription (Microsoft)
    async fn create_subscription(
        &self,
        access_token: &str,
        webhook_url: &str,
        resource: &str,
        client_state: &str,
    ) -> Result<SubscriptionInfo>;

    /// Extend a Graph subscription; returns the new expiry in epoch millis
    async fn renew_subscription(&self, access_token: &str, subscription_id: &str) -> Result<i64>;

    /// Delete a Graph subscription. Callers swallow failures.
    async fn delete_subscription(&self, access_token: &str, subscription_id: &str) -> Result<()>;
}
