//! Production HTTP provider client

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use calmesh_types::{time, CalError, ProjectedPayload, Provider, Result};

use crate::api::{CalendarApi, TokenClient};
use crate::google::{payload_to_google, GoogleEventsResponse};
use crate::microsoft::{payload_to_graph, GraphEventsResponse};
use crate::types::{
    EventsPage, SubscriptionInfo, TokenGrant, WatchInfo, OVERLAY_CALENDAR_NAME,
};

const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_REVOKE_URL: &str = "https://oauth2.googleapis.com/revoke";
const GOOGLE_CALENDAR_BASE: &str = "https://www.googleapis.com/calendar/v3";
const GOOGLE_CHANNELS_STOP_URL: &str = "https://www.googleapis.com/calendar/v3/channels/stop";
const MS_TOKEN_URL: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/token";
const GRAPH_BASE: &str = "https://graph.microsoft.com/v1.0";

/// Graph caps event subscriptions at 4230 minutes
const MS_SUBSCRIPTION_TTL_MILLIS: i64 = 4230 * 60 * 1000;

/// OAuth client credentials per provider
#[derive(Debug, Clone, Default)]
pub struct OAuthClientConfig {
    pub google_client_id: String,
    pub google_client_secret: String,
    pub ms_client_id: String,
    pub ms_client_secret: String,
}

/// Production implementation of [`TokenClient`] and [`CalendarApi`]
pub struct HttpProviderClient {
    http: reqwest::Client,
    oauth: OAuthClientConfig,
}

impl HttpProviderClient {
    pub fn new(oauth: OAuthClientConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            oauth,
        }
    }

    fn net_err(e: reqwest::Error) -> CalError {
        CalError::Provider {
            status: 599,
            body: e.to_string(),
        }
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(CalError::Provider {
            status: status.as_u16(),
            body,
        })
    }

    fn google_events_url(calendar_id: &str) -> String {
        format!("{GOOGLE_CALENDAR_BASE}/calendars/{calendar_id}/events")
    }

    fn graph_events_url(calendar_id: &str) -> String {
        if calendar_id == "primary" {
            format!("{GRAPH_BASE}/me/events")
        } else {
            format!("{GRAPH_BASE}/me/calendars/{calendar_id}/events")
        }
    }
}

#[async_trait]
impl TokenClient for HttpProviderClient {
    async fn refresh(&self, provider: Provider, refresh_token: &str) -> Result<TokenGrant> {
        let (url, client_id, client_secret) = match provider {
            Provider::Google => (
                GOOGLE_TOKEN_URL,
                &self.oauth.google_client_id,
                &self.oauth.google_client_secret,
            ),
            Provider::Microsoft => (
                MS_TOKEN_URL,
                &self.oauth.ms_client_id,
                &self.oauth.ms_client_secret,
            ),
        };
        let resp = self
            .http
            .post(url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(Self::net_err)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CalError::RefreshFailed {
                status: status.as_u16(),
                body,
            });
        }
        resp.json::<TokenGrant>().await.map_err(Self::net_err)
    }

    async fn revoke(&self, provider: Provider, refresh_token: &str) -> Result<bool> {
        match provider {
            Provider::Google => {
                let resp = self
                    .http
                    .post(GOOGLE_REVOKE_URL)
                    .form(&[("token", refresh_token)])
                    .send()
                    .await;
                match resp {
                    Ok(resp) => Ok(resp.status().is_success()),
                    Err(e) => {
                        debug!(error = %e, "Google revoke call failed");
                        Ok(false)
                    }
                }
            }
            // No standard refresh-token revoke endpoint on Microsoft
            Provider::Microsoft => Ok(false),
        }
    }
}

#[async_trait]
impl CalendarApi for HttpProviderClient {
    async fn list_events(
        &self,
        provider: Provider,
        access_token: &str,
        calendar_id: &str,
        sync_token: Option<&str>,
        page_token: Option<&str>,
    ) -> Result<EventsPage> {
        match provider {
            Provider::Google => {
                let mut req = self
                    .http
                    .get(Self::google_events_url(calendar_id))
                    .bearer_auth(access_token)
                    .query(&[("maxResults", "250")]);
                if let Some(token) = sync_token {
                    req = req.query(&[("syncToken", token)]);
                }
                if let Some(token) = page_token {
                    req = req.query(&[("pageToken", token)]);
                }
                let resp = Self::check(req.send().await.map_err(Self::net_err)?).await?;
                let parsed: GoogleEventsResponse = resp.json().await.map_err(Self::net_err)?;
                Ok(parsed.into_page())
            }
            Provider::Microsoft => {
                // Graph paging and delta cursors are full URLs
                let url = page_token
                    .or(sync_token)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("{}/delta", Self::graph_events_url(calendar_id)));
                let resp = self
                    .http
                    .get(&url)
                    .bearer_auth(access_token)
                    .send()
                    .await
                    .map_err(Self::net_err)?;
                let resp = Self::check(resp).await?;
                let parsed: GraphEventsResponse = resp.json().await.map_err(Self::net_err)?;
                Ok(parsed.into_page())
            }
        }
    }

    async fn insert_event(
        &self,
        provider: Provider,
        access_token: &str,
        calendar_id: &str,
        payload: &ProjectedPayload,
    ) -> Result<String> {
        let (url, body) = match provider {
            Provider::Google => (Self::google_events_url(calendar_id), payload_to_google(payload)),
            Provider::Microsoft => (Self::graph_events_url(calendar_id), payload_to_graph(payload)),
        };
        let resp = self
            .http
            .post(&url)
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await
            .map_err(Self::net_err)?;
        let resp = Self::check(resp).await?;
        let created: serde_json::Value = resp.json().await.map_err(Self::net_err)?;
        created["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| CalError::Provider {
                status: 200,
                body: "insert response missing event id".to_string(),
            })
    }

    async fn patch_event(
        &self,
        provider: Provider,
        access_token: &str,
        calendar_id: &str,
        provider_event_id: &str,
        payload: &ProjectedPayload,
    ) -> Result<()> {
        let (url, body) = match provider {
            Provider::Google => (
                format!("{}/{provider_event_id}", Self::google_events_url(calendar_id)),
                payload_to_google(payload),
            ),
            Provider::Microsoft => (
                format!("{GRAPH_BASE}/me/events/{provider_event_id}"),
                payload_to_graph(payload),
            ),
        };
        let resp = self
            .http
            .patch(&url)
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await
            .map_err(Self::net_err)?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn delete_event(
        &self,
        provider: Provider,
        access_token: &str,
        calendar_id: &str,
        provider_event_id: &str,
    ) -> Result<()> {
        let url = match provider {
            Provider::Google => {
                format!("{}/{provider_event_id}", Self::google_events_url(calendar_id))
            }
            Provider::Microsoft => format!("{GRAPH_BASE}/me/events/{provider_event_id}"),
        };
        let resp = self
            .http
            .delete(&url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(Self::net_err)?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn find_managed_event(
        &self,
        provider: Provider,
        access_token: &str,
        calendar_id: &str,
        canonical_event_id: &str,
    ) -> Result<Option<String>> {
        match provider {
            Provider::Google => {
                let resp = self
                    .http
                    .get(Self::google_events_url(calendar_id))
                    .bearer_auth(access_token)
                    .query(&[(
                        "privateExtendedProperty",
                        format!("canonical_event_id={canonical_event_id}"),
                    )])
                    .send()
                    .await
                    .map_err(Self::net_err)?;
                let resp = Self::check(resp).await?;
                let parsed: GoogleEventsResponse = resp.json().await.map_err(Self::net_err)?;
                Ok(parsed.into_page().events.into_iter().next().map(|e| e.id))
            }
            Provider::Microsoft => {
                // Graph cannot filter on open extensions; scan the listing
                let page = self
                    .list_events(provider, access_token, calendar_id, None, None)
                    .await?;
                Ok(page
                    .events
                    .into_iter()
                    .find(|e| {
                        e.extended_properties.canonical_event_id.as_deref()
                            == Some(canonical_event_id)
                    })
                    .map(|e| e.id))
            }
        }
    }

    async fn ensure_overlay_calendar(
        &self,
        provider: Provider,
        access_token: &str,
    ) -> Result<String> {
        match provider {
            Provider::Google => {
                let resp = self
                    .http
                    .get(format!("{GOOGLE_CALENDAR_BASE}/users/me/calendarList"))
                    .bearer_auth(access_token)
                    .send()
                    .await
                    .map_err(Self::net_err)?;
                let resp = Self::check(resp).await?;
                let listing: serde_json::Value = resp.json().await.map_err(Self::net_err)?;
                if let Some(items) = listing["items"].as_array() {
                    for item in items {
                        if item["summary"].as_str() == Some(OVERLAY_CALENDAR_NAME) {
                            if let Some(id) = item["id"].as_str() {
                                return Ok(id.to_string());
                            }
                        }
                    }
                }
                let resp = self
                    .http
                    .post(format!("{GOOGLE_CALENDAR_BASE}/calendars"))
                    .bearer_auth(access_token)
                    .json(&json!({ "summary": OVERLAY_CALENDAR_NAME }))
                    .send()
                    .await
                    .map_err(Self::net_err)?;
                let resp = Self::check(resp).await?;
                let created: serde_json::Value = resp.json().await.map_err(Self::net_err)?;
                created["id"]
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| CalError::Provider {
                        status: 200,
                        body: "calendar insert response missing id".to_string(),
                    })
            }
            Provider::Microsoft => {
                let resp = self
                    .http
                    .get(format!("{GRAPH_BASE}/me/calendars"))
                    .bearer_auth(access_token)
                    .send()
                    .await
                    .map_err(Self::net_err)?;
                let resp = Self::check(resp).await?;
                let listing: serde_json::Value = resp.json().await.map_err(Self::net_err)?;
                if let Some(items) = listing["value"].as_array() {
                    for item in items {
                        if item["name"].as_str() == Some(OVERLAY_CALENDAR_NAME) {
                            if let Some(id) = item["id"].as_str() {
                                return Ok(id.to_string());
                            }
                        }
                    }
                }
                let resp = self
                    .http
                    .post(format!("{GRAPH_BASE}/me/calendars"))
                    .bearer_auth(access_token)
                    .json(&json!({ "name": OVERLAY_CALENDAR_NAME }))
                    .send()
                    .await
                    .map_err(Self::net_err)?;
                let resp = Self::check(resp).await?;
                let created: serde_json::Value = resp.json().await.map_err(Self::net_err)?;
                created["id"]
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| CalError::Provider {
                        status: 200,
                        body: "calendar insert response missing id".to_string(),
                    })
            }
        }
    }

    async fn watch_calendar(
        &self,
        access_token: &str,
        calendar_id: &str,
        channel_id: &str,
        webhook_url: &str,
    ) -> Result<WatchInfo> {
        let resp = self
            .http
            .post(format!(
                "{}/watch",
                Self::google_events_url(calendar_id)
            ))
            .bearer_auth(access_token)
            .json(&json!({
                "id": channel_id,
                "type": "web_hook",
                "address": webhook_url,
            }))
            .send()
            .await
            .map_err(Self::net_err)?;
        let resp = Self::check(resp).await?;
        let body: serde_json::Value = resp.json().await.map_err(Self::net_err)?;
        let resource_id = body["resourceId"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let expiry = body["expiration"]
            .as_str()
            .and_then(|s| s.parse::<i64>().ok())
            .or_else(|| body["expiration"].as_i64())
            .unwrap_or_else(|| time::now_millis() + 7 * 24 * 3600 * 1000);
        Ok(WatchInfo {
            resource_id,
            expiry,
        })
    }

    async fn stop_channel(
        &self,
        access_token: &str,
        channel_id: &str,
        resource_id: &str,
    ) -> Result<()> {
        let resp = self
            .http
            .post(GOOGLE_CHANNELS_STOP_URL)
            .bearer_auth(access_token)
            .json(&json!({ "id": channel_id, "resourceId": resource_id }))
            .send()
            .await
            .map_err(Self::net_err)?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn create_subscription(
        &self,
        access_token: &str,
        webhook_url: &str,
        resource: &str,
        client_state: &str,
    ) -> Result<SubscriptionInfo> {
        let expiry = time::now_millis() + MS_SUBSCRIPTION_TTL_MILLIS;
        let resp = self
            .http
            .post(format!("{GRAPH_BASE}/subscriptions"))
            .bearer_auth(access_token)
            .json(&json!({
                "changeType": "created,updated,deleted",
                "notificationUrl": webhook_url,
                "resource": resource,
                "expirationDateTime": time::to_rfc3339(expiry),
                "clientState": client_state,
            }))
            .send()
            .await
            .map_err(Self::net_err)?;
        let resp = Self::check(resp).await?;
        let body: serde_json::Value = resp.json().await.map_err(Self::net_err)?;
        let subscription_id = body["id"]
            .as_str()
            .ok_or_else(|| CalError::Provider {
                status: 200,
                body: "subscription response missing id".to_string(),
            })?
            .to_string();
        let expiry = body["expirationDateTime"]
            .as_str()
            .and_then(|s| time::parse_rfc3339(s).ok())
            .unwrap_or(expiry);
        Ok(SubscriptionInfo {
            subscription_id,
            expiry,
        })
    }

    async fn renew_subscription(&self, access_token: &str, subscription_id: &str) -> Result<i64> {
        let expiry = time::now_millis() + MS_SUBSCRIPTION_TTL_MILLIS;
        let resp = self
            .http
            .patch(format!("{GRAPH_BASE}/subscriptions/{subscription_id}"))
            .bearer_auth(access_token)
            .json(&json!({ "expirationDateTime": time::to_rfc3339(expiry) }))
            .send()
            .await
            .map_err(Self::net_err)?;
        let resp = Self::check(resp).await?;
        let body: serde_json::Value = resp.json().await.map_err(Self::net_err)?;
        Ok(body["expirationDateTime"]
            .as_str()
            .and_then(|s| time::parse_rfc3339(s).ok())
            .unwrap_or(expiry))
    }

    async fn delete_subscription(&self, access_token: &str, subscription_id: &str) -> Result<()> {
        let resp = self
            .http
            .delete(format!("{GRAPH_BASE}/subscriptions/{subscription_id}"))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(Self::net_err)?;
        Self::check(resp).await?;
        Ok(())
    }
}
