//! tracker-watch: follow a project's progress and urgent notifications.
//!
//! Usage: `tracker-watch <project-id>`; configuration comes from `TRACKER_*`
//! environment variables.

use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use project_tracker::notifications::{NotificationChannel, ReconnectPolicy, SseTransport};
use project_tracker::workflow::{HttpWorkflowRemote, ProjectId, WorkflowEvent, WorkflowService};
use project_tracker::{Config, SettingsStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("project_tracker=info,tracker_watch=info")),
        )
        .init();

    let project = std::env::args()
        .nth(1)
        .context("usage: tracker-watch <project-id>")?
        .parse::<i64>()
        .map(ProjectId)
        .context("project id must be an integer")?;

    let config = Config::from_env().context("Invalid configuration")?;
    let settings = SettingsStore::new(&config.working_dir).await.get().await;

    let client = reqwest::Client::builder()
        .timeout(config.request_timeout)
        .build()
        .context("Failed to build HTTP client")?;
    let remote = Arc::new(HttpWorkflowRemote::new(
        client,
        config.api_url.clone(),
        config.access_token.clone(),
    ));

    let service = WorkflowService::new(remote.clone(), settings.policy, config.settle_delay);
    let progress = service
        .load_project(project)
        .await
        .with_context(|| format!("Failed to load {}", project))?;
    for phase in &progress.phases {
        info!(
            phase = %phase.phase_id,
            order = phase.order,
            status = %phase.status,
            percent = phase.percent,
            can_end = phase.can_end,
            "Phase"
        );
    }

    // The push stream is long-lived, so it gets a client without a request timeout.
    let transport = Arc::new(SseTransport::new(
        reqwest::Client::new(),
        config.stream_url.clone(),
    ));
    let reconnect = ReconnectPolicy::fixed(config.reconnect_interval)
        .with_escalation(settings.reconnect_escalation);
    let channel = Arc::new(NotificationChannel::new(
        transport,
        config.access_token.clone().unwrap_or_default(),
        reconnect,
    ));
    match channel.bootstrap(remote.as_ref()).await {
        Ok(urgent) => info!(urgent = urgent.len(), "Urgent notifications loaded"),
        Err(e) => warn!("Notification bootstrap failed: {}", e),
    }
    let channel_task = channel.spawn();

    let (workflow_sub, mut workflow_rx) = service.subscribe();
    let (urgent_sub, mut urgent_rx) = channel.subscribe();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
            Some(event) = workflow_rx.recv() => match event {
                WorkflowEvent::Progress(progress) => info!(
                    project = %progress.project_id,
                    percent = progress.percent,
                    completed = progress.completed,
                    "Progress"
                ),
                WorkflowEvent::Changed(entity) => debug!(entity = %entity, "Changed"),
                WorkflowEvent::Removed(entity) => info!(entity = %entity, "Removed"),
            },
            Some(urgent) = urgent_rx.recv() => {
                info!(count = urgent.len(), "Urgent notifications changed");
                for notification in &urgent {
                    info!(
                        id = %notification.id,
                        priority = notification.priority.as_str(),
                        "{}",
                        notification.title
                    );
                }
            }
        }
    }

    service.unsubscribe(workflow_sub);
    channel.unsubscribe(urgent_sub);
    channel.teardown();
    service.shutdown();
    if let Err(e) = channel_task.await {
        warn!("Notification channel task failed: {}", e);
    }
    Ok(())
}
