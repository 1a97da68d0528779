use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::sync::{broadcast, watch};

use storefront_notify::config::AppConfig;
use storefront_notify::domain::session::UserIdentity;
use storefront_notify::repository::http::{AuthorizedClient, HttpNotificationApi, SessionCredentials};
use storefront_notify::telemetry::Telemetry;
use storefront_notify::usecase::session::NotificationService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("failed to load configuration")?;
    let telemetry = Telemetry::init(&config).context("failed to initialize telemetry")?;

    tracing::info!("starting notify-watcher");

    if let Some(addr) = &config.metrics_listen_addr {
        let addr: SocketAddr = addr
            .parse()
            .with_context(|| format!("invalid metrics_listen_addr '{}'", addr))?;
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to install Prometheus exporter")?;
        tracing::info!(%addr, "prometheus metrics listener started");
    }

    let channel_config = config.channel_config()?;
    let credentials = Arc::new(SessionCredentials::new());

    let initial_user = match (&config.session_user_id, &config.session_access_token) {
        (Some(user_id), Some(access_token)) => {
            credentials.set(access_token.clone(), config.session_refresh_token.clone());
            Some(UserIdentity::new(user_id.clone()))
        }
        _ => {
            tracing::warn!("no session credentials configured, no notifications will be received");
            None
        }
    };

    let (auth_tx, auth_rx) = watch::channel(initial_user);
    let client = AuthorizedClient::new(
        &config.api_base_url,
        config.http_timeout(),
        credentials.clone(),
        auth_tx.clone(),
    )?;
    let api = Arc::new(HttpNotificationApi::new(Arc::new(client)));
    let service = Arc::new(NotificationService::new(api, credentials, channel_config));

    let mut alerts = service.subscribe_alerts();
    let alert_task = tokio::spawn(async move {
        loop {
            match alerts.recv().await {
                Ok(notification) => tracing::info!(
                    notification_id = %notification.id,
                    notification_type = ?notification.notification_type,
                    title = %notification.title,
                    message = %notification.message,
                    "new notification"
                ),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "alert listener lagged behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let runner = {
        let service = service.clone();
        tokio::spawn(async move { service.run(auth_rx).await })
    };

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    tracing::info!(
        unread = service.query().unread_count(),
        "shutting down notify-watcher"
    );

    auth_tx.send_replace(None);
    service.shutdown();
    runner.abort();
    alert_task.abort();

    telemetry.shutdown();
    Ok(())
}
