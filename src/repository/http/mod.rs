mod client;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::domain::notification::Notification;
use crate::repository::errors::ApiError;
use crate::usecase::contracts::NotificationApi;

pub use client::{AuthorizedClient, SessionCredentials};

#[derive(Deserialize)]
#[serde(untagged)]
enum HistoryPayload {
    List(Vec<serde_json::Value>),
    Envelope { data: Vec<serde_json::Value> },
}

pub struct HttpNotificationApi {
    client: Arc<AuthorizedClient>,
}

impl HttpNotificationApi {
    pub fn new(client: Arc<AuthorizedClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NotificationApi for HttpNotificationApi {
    #[tracing::instrument(skip(self))]
    async fn fetch_history(&self) -> Result<Vec<Notification>, ApiError> {
        tracing::debug!("fetching notification history");

        let url = self.client.endpoint(&["notifications"])?;
        let response = self.client.send(|http| http.get(url.clone())).await?;
        let payload: HistoryPayload = response.json().await?;

        let notifications = parse_history(payload);
        tracing::debug!(count = notifications.len(), "notification history fetched");
        Ok(notifications)
    }

    #[tracing::instrument(skip(self), fields(notification_id = %id))]
    async fn mark_as_read(&self, id: &str) -> Result<(), ApiError> {
        tracing::debug!("marking notification as read");

        let url = self.client.endpoint(&["notifications", id, "read"])?;
        self.client.send(|http| http.put(url.clone())).await?;

        tracing::debug!(notification_id = %id, "notification marked as read");
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn mark_all_as_read(&self) -> Result<(), ApiError> {
        tracing::debug!("marking all notifications as read");

        let url = self.client.endpoint(&["notifications", "read-all"])?;
        self.client.send(|http| http.put(url.clone())).await?;

        tracing::debug!("all notifications marked as read");
        Ok(())
    }
}

// One bad element must not cost the whole backlog.
fn parse_history(payload: HistoryPayload) -> Vec<Notification> {
    let values = match payload {
        HistoryPayload::List(values) => values,
        HistoryPayload::Envelope { data } => data,
    };

    values
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<Notification>(value) {
            Ok(notification) => Some(notification),
            Err(e) => {
                metrics::counter!("notifications_malformed_total", "source" => "history").increment(1);
                tracing::warn!(error = %e, "skipping malformed notification in history");
                None
            }
        })
        .collect()
}
