use anyhow::{bail, Context};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::{check_status, read_json, transport_error, RemoteAdapter};
use crate::config::AppConfig;
use crate::error::RemoteError;
use crate::model::external_id::ExternalId;
use crate::model::mapping::{same_state, BoardMapping};
use crate::model::remote_item::{Assignee, FieldDelta, NewRemoteItem, RemoteItem};

const SYSTEM: &str = "GitHub";
const DEFAULT_API_URL: &str = "https://api.github.com";
const PAGE_SIZE: usize = 100;
const PRIORITY_PREFIXES: &[&str] = &["priority:", "priority/"];

pub struct GitHubAdapter {
    api_url: String,
    token: String,
    /// `owner/repo`
    repo: String,
    client: reqwest::Client,
}

impl GitHubAdapter {
    pub fn new(token: &str, repo: &str, api_url: Option<&str>) -> Self {
        Self {
            api_url: api_url
                .unwrap_or(DEFAULT_API_URL)
                .trim_end_matches('/')
                .to_string(),
            token: token.to_string(),
            repo: repo.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(
        config: &AppConfig,
        mapping: &BoardMapping,
    ) -> anyhow::Result<Box<dyn RemoteAdapter>> {
        let cfg = config
            .github
            .as_ref()
            .context("Mapping targets github but the [github] section is missing")?;
        if !mapping.project.contains('/') {
            bail!(
                "GitHub project must be 'owner/repo', got '{}'",
                mapping.project
            );
        }
        Ok(Box::new(Self::new(
            &cfg.token,
            &mapping.project,
            cfg.api_url.as_deref(),
        )))
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}/repos/{}{path}", self.api_url, self.repo))
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "lanesync")
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response, RemoteError> {
        let resp = req.send().await.map_err(|e| transport_error(SYSTEM, e))?;
        check_status(SYSTEM, resp).await
    }
}

#[derive(Deserialize)]
struct GhIssue {
    number: u64,
    title: String,
    body: Option<String>,
    state: String,
    html_url: Option<String>,
    #[serde(default)]
    labels: Vec<GhLabel>,
    assignee: Option<GhUser>,
    milestone: Option<GhMilestone>,
    updated_at: Option<DateTime<Utc>>,
    pull_request: Option<Value>,
}

#[derive(Deserialize)]
struct GhLabel {
    name: String,
}

#[derive(Deserialize)]
struct GhUser {
    login: String,
}

#[derive(Deserialize)]
struct GhMilestone {
    due_on: Option<DateTime<Utc>>,
}

fn issue_number(id: &ExternalId) -> Result<u64, RemoteError> {
    id.remote_id
        .trim_start_matches('#')
        .parse()
        .map_err(|_| RemoteError::MalformedExternalId(id.to_string()))
}

fn is_priority_label(label: &str) -> bool {
    let lower = label.to_ascii_lowercase();
    PRIORITY_PREFIXES.iter().any(|p| lower.starts_with(p))
}

fn priority_from_labels(labels: &[String]) -> Option<String> {
    labels.iter().find(|l| is_priority_label(l)).map(|l| {
        let idx = l.find([':', '/']).map(|i| i + 1).unwrap_or(0);
        l[idx..].trim().to_string()
    })
}

fn priority_label(priority: &str) -> String {
    format!("priority: {}", priority.trim().to_ascii_lowercase())
}

/// Replace any priority label with one for `priority`.
fn with_priority(labels: &[String], priority: &str) -> Vec<String> {
    let mut out: Vec<String> = labels
        .iter()
        .filter(|l| !is_priority_label(l))
        .cloned()
        .collect();
    out.push(priority_label(priority));
    out
}

fn issue_to_item(issue: GhIssue) -> RemoteItem {
    let labels: Vec<String> = issue.labels.into_iter().map(|l| l.name).collect();
    RemoteItem {
        id: issue.number.to_string(),
        display_key: None,
        title: issue.title,
        body: issue.body.filter(|b| !b.trim().is_empty()),
        state: issue.state,
        assignee: issue.assignee.map(|u| u.login),
        priority: priority_from_labels(&labels),
        labels,
        due_date: issue
            .milestone
            .and_then(|m| m.due_on)
            .map(|d| d.date_naive()),
        item_type: None,
        updated_at: issue.updated_at,
        url: issue.html_url,
    }
}

/// Open and closed are the only states; each reaches the other.
fn transitions_from(state: &str) -> Vec<String> {
    if same_state(state, "open") {
        vec!["closed".to_string()]
    } else if same_state(state, "closed") {
        vec!["open".to_string()]
    } else {
        Vec::new()
    }
}

/// The member's user name as a GitHub login. Emails and display names
/// cannot be assigned directly.
fn as_login(assignee: &Assignee) -> Option<&str> {
    let login = assignee.user_name.trim();
    if login.is_empty() || login.contains('@') || login.contains(char::is_whitespace) {
        None
    } else {
        Some(login)
    }
}

/// Splits a delta into the PATCH body and comment notes for fields GitHub
/// issues cannot carry.
pub(crate) fn patch_body(delta: &FieldDelta, current_labels: Option<&[String]>) -> (Map<String, Value>, Vec<String>) {
    let mut body = Map::new();
    let mut notes = Vec::new();

    if let Some(title) = &delta.title {
        body.insert("title".into(), json!(title));
    }
    if let Some(text) = &delta.body {
        body.insert("body".into(), json!(text));
    }

    let labels = match (&delta.labels, &delta.priority) {
        (Some(labels), Some(priority)) => Some(with_priority(labels, priority)),
        (Some(labels), None) => Some(labels.clone()),
        (None, Some(priority)) => Some(with_priority(current_labels.unwrap_or_default(), priority)),
        (None, None) => None,
    };
    if let Some(labels) = labels {
        body.insert("labels".into(), json!(labels));
    }

    match &delta.assignee {
        Some(Some(assignee)) => match as_login(assignee) {
            Some(login) => {
                body.insert("assignees".into(), json!([login]));
            }
            None => notes.push(format!("Assigned on the board to {}", assignee.display_name())),
        },
        Some(None) => {
            body.insert("assignees".into(), json!([]));
        }
        None => {}
    }
    match &delta.due_date {
        Some(Some(due)) => notes.push(format!("Due date on the board set to {due}")),
        Some(None) => notes.push("Due date on the board cleared".to_string()),
        None => {}
    }
    if let Some(item_type) = &delta.item_type {
        notes.push(format!("Card type on the board changed to {item_type}"));
    }
    if let Some(blocked) = &delta.blocked {
        notes.push(blocked.note());
    }

    (body, notes)
}

#[async_trait]
impl RemoteAdapter for GitHubAdapter {
    fn name(&self) -> &str {
        SYSTEM
    }

    async fn list_changed_since(&self, since: DateTime<Utc>) -> Result<Vec<RemoteItem>, RemoteError> {
        let since = since.to_rfc3339_opts(SecondsFormat::Secs, true);
        let mut items = Vec::new();
        let mut page = 1;

        loop {
            let path = format!(
                "/issues?state=all&sort=updated&direction=asc&since={}&per_page={PAGE_SIZE}&page={page}",
                urlencoding::encode(&since)
            );
            let resp = self
                .request(reqwest::Method::GET, &path)
                .send()
                .await
                .map_err(|e| transport_error(SYSTEM, e))?;
            let issues: Vec<GhIssue> = read_json(SYSTEM, resp).await?;

            let count = issues.len();
            items.extend(
                issues
                    .into_iter()
                    .filter(|i| i.pull_request.is_none())
                    .map(issue_to_item),
            );
            if count < PAGE_SIZE {
                break;
            }
            page += 1;
        }

        Ok(items)
    }

    async fn fetch(&self, id: &ExternalId) -> Result<RemoteItem, RemoteError> {
        let number = issue_number(id)?;
        let resp = self
            .request(reqwest::Method::GET, &format!("/issues/{number}"))
            .send()
            .await
            .map_err(|e| transport_error(SYSTEM, e))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(RemoteError::not_found(SYSTEM, id.to_string()));
        }
        let issue: GhIssue = read_json(SYSTEM, resp).await?;
        Ok(issue_to_item(issue))
    }

    async fn create(&self, fields: &NewRemoteItem) -> Result<RemoteItem, RemoteError> {
        let mut labels = fields.labels.clone();
        if let Some(priority) = &fields.priority {
            labels = with_priority(&labels, priority);
        }
        let mut body = json!({
            "title": fields.title,
            "body": fields.body,
            "labels": labels,
        });
        if let Some(login) = fields.assignee.as_ref().and_then(as_login) {
            body["assignees"] = json!([login]);
        }

        let resp = self
            .send(self.request(reqwest::Method::POST, "/issues").json(&body))
            .await?;
        let issue: GhIssue = resp
            .json()
            .await
            .map_err(|e| RemoteError::transient(SYSTEM, format!("Failed to parse created issue: {e}")))?;
        Ok(issue_to_item(issue))
    }

    async fn patch(&self, id: &ExternalId, delta: &FieldDelta) -> Result<(), RemoteError> {
        let number = issue_number(id)?;
        let current_labels = if delta.priority.is_some() && delta.labels.is_none() {
            Some(self.fetch(id).await?.labels)
        } else {
            None
        };
        let (body, notes) = patch_body(delta, current_labels.as_deref());

        if !body.is_empty() {
            self.send(
                self.request(reqwest::Method::PATCH, &format!("/issues/{number}"))
                    .json(&body),
            )
            .await?;
        }
        for note in notes {
            self.add_comment(id, &note).await?;
        }
        Ok(())
    }

    async fn list_valid_transitions(&self, id: &ExternalId) -> Result<Vec<String>, RemoteError> {
        let item = self.fetch(id).await?;
        Ok(transitions_from(&item.state))
    }

    async fn transition(&self, id: &ExternalId, state: &str) -> Result<(), RemoteError> {
        let number = issue_number(id)?;
        let target = if same_state(state, "open") {
            "open"
        } else if same_state(state, "closed") {
            "closed"
        } else {
            return Err(RemoteError::validation(
                SYSTEM,
                format!("'{state}' is not a GitHub issue state"),
            ));
        };
        self.send(
            self.request(reqwest::Method::PATCH, &format!("/issues/{number}"))
                .json(&json!({ "state": target })),
        )
        .await?;
        Ok(())
    }

    async fn add_comment(&self, id: &ExternalId, text: &str) -> Result<(), RemoteError> {
        let number = issue_number(id)?;
        self.send(
            self.request(reqwest::Method::POST, &format!("/issues/{number}/comments"))
                .json(&json!({ "body": text })),
        )
        .await?;
        Ok(())
    }
}
