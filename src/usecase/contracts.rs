use async_trait::async_trait;

use crate::{domain::notification::Notification, repository::errors::ApiError};

/// Server-side notification endpoints, reached through the authenticated
/// request layer.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationApi: Send + Sync {
    async fn fetch_history(&self) -> Result<Vec<Notification>, ApiError>;
    async fn mark_as_read(&self, id: &str) -> Result<(), ApiError>;
    async fn mark_all_as_read(&self) -> Result<(), ApiError>;
}

/// Supplies the credential presented when the push channel connects.
#[cfg_attr(test, mockall::automock)]
pub trait AccessTokenSource: Send + Sync {
    fn access_token(&self) -> Option<String>;
}
