//! REST client for the workflow store and the notification feed.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use super::error::{classify_http_status, error_from_response, EntityRef, StatusClass};
use super::error::{WorkflowError, WorkflowResult};
use super::phase_gate::PhaseAction;
use super::project_gate::Eligibility;
use super::remote::WorkflowRemote;
use super::task_engine::TaskAction;
use super::types::{
    NewTask, PhaseEdit, PhaseId, PhaseInstance, Progression, Project, ProjectId, Task, TaskEdit,
    TaskId,
};
use crate::notifications::{Notification, NotificationFeed, NotificationId, NotificationPriority};

/// Listings come back either bare or wrapped in a page envelope.
#[derive(Deserialize)]
#[serde(untagged)]
enum Listing<T> {
    Plain(Vec<T>),
    Paged { results: Vec<T> },
}

impl<T> Listing<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Self::Plain(items) | Self::Paged { results: items } => items,
        }
    }
}

#[derive(Clone)]
pub struct HttpWorkflowRemote {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpWorkflowRemote {
    pub fn new(client: Client, base_url: impl Into<String>, token: Option<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client,
            base_url,
            token: token.filter(|t| !t.is_empty()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, self.endpoint(path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Send `builder` and return the body of a success response. Any other
    /// status is turned into an error by `refused`.
    async fn exchange(
        &self,
        builder: RequestBuilder,
        refused: impl FnOnce(u16, &str) -> WorkflowError + Send,
    ) -> WorkflowResult<String> {
        let resp = builder
            .send()
            .await
            .map_err(|e| WorkflowError::TransportUnavailable(e.to_string()))?;
        let status = resp.status().as_u16();
        let text = resp
            .text()
            .await
            .map_err(|e| WorkflowError::TransportUnavailable(e.to_string()))?;

        if classify_http_status(status) != StatusClass::Success {
            return Err(refused(status, &text));
        }
        Ok(text)
    }

    async fn send_raw(&self, builder: RequestBuilder, entity: EntityRef) -> WorkflowResult<String> {
        self.exchange(builder, move |status, text| {
            tracing::debug!(status, entity = %entity, "Store refused request");
            error_from_response(status, text, entity)
        })
        .await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        entity: EntityRef,
    ) -> WorkflowResult<T> {
        let text = self.send_raw(builder, entity).await?;
        parse_body(&text)
    }

    async fn send_listing<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        entity: EntityRef,
    ) -> WorkflowResult<Vec<T>> {
        let listing: Listing<T> = self.send(builder, entity).await?;
        Ok(listing.into_vec())
    }
}

fn parse_body<T: DeserializeOwned>(text: &str) -> WorkflowResult<T> {
    serde_json::from_str(text).map_err(|e| {
        WorkflowError::TransportUnavailable(format!("Failed to parse store response: {}", e))
    })
}

/// The feed has no entity to blame, so refusals read as transport failures.
fn feed_refusal(what: String) -> impl FnOnce(u16, &str) -> WorkflowError + Send {
    move |status, body| {
        tracing::debug!(status, "{} refused", what);
        WorkflowError::TransportUnavailable(format!(
            "{} failed: HTTP {} - {}",
            what,
            status,
            body.trim()
        ))
    }
}

fn task_action_path(task: TaskId, action: TaskAction) -> String {
    format!("tasks/{}/{}/", task.0, action.as_str())
}

fn phase_action_path(phase: PhaseId, action: PhaseAction) -> String {
    format!("phases/{}/{}/", phase.0, action.as_str())
}

#[async_trait]
impl WorkflowRemote for HttpWorkflowRemote {
    async fn fetch_project(&self, project: ProjectId) -> WorkflowResult<Project> {
        let path = format!("projects/{}/", project.0);
        self.send(self.request(Method::GET, &path), EntityRef::Project(project))
            .await
    }

    async fn list_phases(&self, project: ProjectId) -> WorkflowResult<Vec<PhaseInstance>> {
        let path = format!("projects/{}/phases/", project.0);
        self.send_listing(self.request(Method::GET, &path), EntityRef::Project(project))
            .await
    }

    async fn fetch_phase(&self, phase: PhaseId) -> WorkflowResult<PhaseInstance> {
        let path = format!("phases/{}/", phase.0);
        self.send(self.request(Method::GET, &path), EntityRef::Phase(phase))
            .await
    }

    async fn list_tasks(&self, phase: PhaseId) -> WorkflowResult<Vec<Task>> {
        let path = format!("phases/{}/tasks/", phase.0);
        self.send_listing(self.request(Method::GET, &path), EntityRef::Phase(phase))
            .await
    }

    async fn fetch_task(&self, task: TaskId) -> WorkflowResult<Task> {
        let path = format!("tasks/{}/", task.0);
        self.send(self.request(Method::GET, &path), EntityRef::Task(task))
            .await
    }

    async fn fetch_progression(&self, project: ProjectId) -> WorkflowResult<Progression> {
        let path = format!("projects/{}/progression/", project.0);
        self.send(self.request(Method::GET, &path), EntityRef::Project(project))
            .await
    }

    async fn transition_task(&self, task: TaskId, action: TaskAction) -> WorkflowResult<Task> {
        let path = task_action_path(task, action);
        self.send(self.request(Method::POST, &path), EntityRef::Task(task))
            .await
    }

    async fn update_task(&self, task: TaskId, edit: &TaskEdit) -> WorkflowResult<Task> {
        let path = format!("tasks/{}/", task.0);
        self.send(
            self.request(Method::PATCH, &path).json(edit),
            EntityRef::Task(task),
        )
        .await
    }

    async fn create_task(&self, phase: PhaseId, task: &NewTask) -> WorkflowResult<Task> {
        let path = format!("phases/{}/tasks/", phase.0);
        self.send(
            self.request(Method::POST, &path).json(task),
            EntityRef::Phase(phase),
        )
        .await
    }

    async fn delete_task(&self, task: TaskId) -> WorkflowResult<()> {
        let path = format!("tasks/{}/", task.0);
        self.send_raw(self.request(Method::DELETE, &path), EntityRef::Task(task))
            .await
            .map(|_| ())
    }

    async fn transition_phase(
        &self,
        phase: PhaseId,
        action: PhaseAction,
    ) -> WorkflowResult<PhaseInstance> {
        let path = phase_action_path(phase, action);
        self.send(self.request(Method::POST, &path), EntityRef::Phase(phase))
            .await
    }

    async fn update_phase(
        &self,
        phase: PhaseId,
        edit: &PhaseEdit,
    ) -> WorkflowResult<PhaseInstance> {
        let path = format!("phases/{}/", phase.0);
        self.send(
            self.request(Method::PATCH, &path).json(edit),
            EntityRef::Phase(phase),
        )
        .await
    }

    async fn project_eligibility(&self, project: ProjectId) -> WorkflowResult<Eligibility> {
        let path = format!("projects/{}/completion/", project.0);
        self.send(self.request(Method::GET, &path), EntityRef::Project(project))
            .await
    }

    async fn set_project_completed(
        &self,
        project: ProjectId,
        completed: bool,
    ) -> WorkflowResult<Project> {
        let path = format!("projects/{}/completion/", project.0);
        self.send(
            self.request(Method::POST, &path)
                .json(&json!({ "completed": completed })),
            EntityRef::Project(project),
        )
        .await
    }
}

#[async_trait]
impl NotificationFeed for HttpWorkflowRemote {
    async fn list_unread(
        &self,
        priority: NotificationPriority,
        limit: usize,
    ) -> Result<Vec<Notification>, WorkflowError> {
        let path = format!(
            "notifications/?read_state=unread&priority={}&limit={}",
            priority.as_str(),
            limit
        );
        let text = self
            .exchange(
                self.request(Method::GET, &path),
                feed_refusal("Notification listing".to_string()),
            )
            .await?;
        let listing: Listing<Notification> = parse_body(&text)?;
        Ok(listing.into_vec())
    }

    async fn mark_read(&self, id: NotificationId) -> Result<(), WorkflowError> {
        let path = format!("notifications/{}/read/", id.0);
        self.exchange(
            self.request(Method::POST, &path),
            feed_refusal(format!("Marking {} read", id)),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalized() {
        let remote = HttpWorkflowRemote::new(Client::new(), "https://store.test/api///", None);
        assert_eq!(remote.base_url(), "https://store.test/api");
        assert_eq!(
            remote.endpoint("/projects/3/"),
            "https://store.test/api/projects/3/"
        );
    }

    #[test]
    fn action_paths_name_the_transition() {
        assert_eq!(
            task_action_path(TaskId(7), TaskAction::Complete),
            "tasks/7/complete/"
        );
        assert_eq!(
            phase_action_path(PhaseId(2), PhaseAction::End),
            "phases/2/end/"
        );
    }

    #[test]
    fn listings_accept_bare_and_paged_bodies() {
        let bare: Listing<u8> = serde_json::from_str("[1, 2]").unwrap();
        assert_eq!(bare.into_vec(), vec![1, 2]);
        let paged: Listing<u8> =
            serde_json::from_str(r#"{"count": 1, "results": [3]}"#).unwrap();
        assert_eq!(paged.into_vec(), vec![3]);
    }

    #[test]
    fn feed_refusals_are_transport_failures() {
        let err = feed_refusal("Notification listing".to_string())(503, " busy \n");
        assert_eq!(
            err,
            WorkflowError::TransportUnavailable(
                "Notification listing failed: HTTP 503 - busy".to_string()
            )
        );
        assert!(err.is_retryable());
    }

    #[test]
    fn unparseable_bodies_are_transport_failures() {
        let err = parse_body::<Project>("<html>").unwrap_err();
        assert!(matches!(err, WorkflowError::TransportUnavailable(_)));
    }

    #[test]
    fn empty_token_is_dropped() {
        let remote = HttpWorkflowRemote::new(Client::new(), "http://x", Some(String::new()));
        assert!(remote.token.is_none());
    }
}
