use anyhow::Context;
use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::{check_status, read_json, transport_error, RemoteAdapter};
use crate::config::AppConfig;
use crate::error::RemoteError;
use crate::model::external_id::ExternalId;
use crate::model::mapping::{same_state, BoardMapping};
use crate::model::remote_item::{FieldDelta, NewRemoteItem, RemoteItem};
use crate::util::adf::{extract_text_from_adf, text_to_adf};

const SYSTEM: &str = "Jira";
const FIELDS: &str = "summary,description,status,priority,labels,assignee,duedate,issuetype,updated";
const PAGE_SIZE: usize = 50;
const DEFAULT_ISSUE_TYPE: &str = "Task";

pub struct JiraAdapter {
    base_url: String,
    auth_header: String,
    project: String,
    client: reqwest::Client,
}

impl JiraAdapter {
    pub fn new(domain: &str, email: &str, api_token: &str, project: &str) -> Self {
        let creds = format!("{email}:{api_token}");
        let encoded = base64::engine::general_purpose::STANDARD.encode(creds);
        let base_url = if domain.starts_with("http://") || domain.starts_with("https://") {
            domain.trim_end_matches('/').to_string()
        } else {
            format!("https://{domain}.atlassian.net")
        };
        Self {
            base_url,
            auth_header: format!("Basic {encoded}"),
            project: project.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(
        config: &AppConfig,
        mapping: &BoardMapping,
    ) -> anyhow::Result<Box<dyn RemoteAdapter>> {
        let cfg = config
            .jira
            .as_ref()
            .context("Mapping targets jira but the [jira] section is missing")?;
        Ok(Box::new(Self::new(
            &cfg.domain,
            &cfg.email,
            &cfg.api_token,
            &mapping.project,
        )))
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{path}", self.base_url))
            .header("Authorization", &self.auth_header)
            .header("Accept", "application/json")
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response, RemoteError> {
        let resp = req.send().await.map_err(|e| transport_error(SYSTEM, e))?;
        check_status(SYSTEM, resp).await
    }

    async fn fetch_by_key(&self, key: &str) -> Result<RemoteItem, RemoteError> {
        let path = format!("/rest/api/3/issue/{}?fields={FIELDS}", urlencoding::encode(key));
        let resp = self
            .request(reqwest::Method::GET, &path)
            .send()
            .await
            .map_err(|e| transport_error(SYSTEM, e))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(RemoteError::not_found(SYSTEM, key));
        }
        let issue: JiraIssue = read_json(SYSTEM, resp).await?;
        Ok(issue_to_item(issue, &self.base_url))
    }

    async fn transitions(&self, key: &str) -> Result<Vec<Transition>, RemoteError> {
        let path = format!("/rest/api/3/issue/{}/transitions", urlencoding::encode(key));
        let resp = self
            .request(reqwest::Method::GET, &path)
            .send()
            .await
            .map_err(|e| transport_error(SYSTEM, e))?;
        let body: TransitionsResponse = read_json(SYSTEM, resp).await?;
        Ok(body.transitions)
    }

    /// Account id for an email or display name, if Jira knows the user.
    async fn find_account_id(&self, identity: &str) -> Result<Option<String>, RemoteError> {
        let path = format!("/rest/api/3/user/search?query={}", urlencoding::encode(identity));
        let resp = self
            .request(reqwest::Method::GET, &path)
            .send()
            .await
            .map_err(|e| transport_error(SYSTEM, e))?;
        let users: Vec<UserField> = read_json(SYSTEM, resp).await?;
        Ok(users.into_iter().find_map(|u| u.account_id))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    #[serde(default)]
    issues: Vec<JiraIssue>,
    #[serde(default)]
    total: usize,
}

#[derive(Deserialize)]
struct JiraIssue {
    id: String,
    key: String,
    fields: IssueFields,
}

#[derive(Deserialize)]
struct IssueFields {
    summary: Option<String>,
    description: Option<Value>,
    status: Option<NameField>,
    priority: Option<NameField>,
    #[serde(default)]
    labels: Vec<String>,
    assignee: Option<UserField>,
    duedate: Option<String>,
    issuetype: Option<NameField>,
    updated: Option<String>,
}

#[derive(Deserialize)]
struct NameField {
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserField {
    account_id: Option<String>,
    display_name: Option<String>,
    email_address: Option<String>,
}

#[derive(Deserialize)]
struct TransitionsResponse {
    #[serde(default)]
    transitions: Vec<Transition>,
}

#[derive(Deserialize)]
struct Transition {
    id: String,
    name: String,
    to: NameField,
}

#[derive(Deserialize)]
struct CreatedIssue {
    id: String,
    key: String,
}

fn issue_to_item(issue: JiraIssue, base_url: &str) -> RemoteItem {
    let fields = issue.fields;
    let assignee = fields.assignee.and_then(|u| {
        u.email_address
            .filter(|e| !e.is_empty())
            .or(u.display_name)
    });
    RemoteItem {
        url: Some(format!("{base_url}/browse/{}", issue.key)),
        id: issue.id,
        display_key: Some(issue.key),
        title: fields.summary.unwrap_or_default(),
        body: fields.description.as_ref().and_then(extract_text_from_adf),
        state: fields.status.map(|s| s.name).unwrap_or_default(),
        assignee,
        labels: fields.labels,
        due_date: fields
            .duedate
            .and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
        priority: fields.priority.map(|p| p.name),
        item_type: fields.issuetype.map(|t| t.name),
        updated_at: fields.updated.as_deref().and_then(parse_jira_timestamp),
    }
}

fn parse_jira_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z")
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// JQL for items updated since `since`. Absolute JQL dates are read in the
/// API user's profile timezone, so the bound is given in minutes relative to
/// `now`, rounded up so the window never shrinks.
fn build_jql(project: &str, since: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (now - since).num_seconds().max(0);
    let minutes = ((seconds + 59) / 60).max(1);
    format!(
        "project = \"{}\" AND updated >= \"-{minutes}m\" ORDER BY updated ASC",
        project.replace('"', "\\\"")
    )
}

fn create_body(project: &str, fields: &NewRemoteItem) -> Value {
    let mut body = Map::new();
    body.insert("project".into(), json!({ "key": project }));
    body.insert("summary".into(), json!(fields.title));
    body.insert(
        "issuetype".into(),
        json!({ "name": fields.item_type.as_deref().unwrap_or(DEFAULT_ISSUE_TYPE) }),
    );
    if !fields.body.trim().is_empty() {
        body.insert("description".into(), text_to_adf(&fields.body));
    }
    if !fields.labels.is_empty() {
        body.insert("labels".into(), json!(jira_labels(&fields.labels)));
    }
    if let Some(priority) = &fields.priority {
        body.insert("priority".into(), json!({ "name": priority }));
    }
    if let Some(due) = fields.due_date {
        body.insert("duedate".into(), json!(due.format("%Y-%m-%d").to_string()));
    }
    json!({ "fields": body })
}

/// Jira labels cannot contain spaces.
fn jira_labels(labels: &[String]) -> Vec<String> {
    labels.iter().map(|l| l.trim().replace(' ', "_")).collect()
}

/// Fields a Jira `PUT /issue` can carry directly. Assignee is resolved separately.
fn patch_fields(delta: &FieldDelta) -> Map<String, Value> {
    let mut fields = Map::new();
    if let Some(title) = &delta.title {
        fields.insert("summary".into(), json!(title));
    }
    if let Some(body) = &delta.body {
        fields.insert("description".into(), text_to_adf(body));
    }
    if let Some(priority) = &delta.priority {
        fields.insert("priority".into(), json!({ "name": priority }));
    }
    if let Some(labels) = &delta.labels {
        fields.insert("labels".into(), json!(jira_labels(labels)));
    }
    if let Some(due) = &delta.due_date {
        let value = due.map(|d| d.format("%Y-%m-%d").to_string());
        fields.insert("duedate".into(), json!(value));
    }
    if let Some(item_type) = &delta.item_type {
        fields.insert("issuetype".into(), json!({ "name": item_type }));
    }
    fields
}

#[async_trait]
impl RemoteAdapter for JiraAdapter {
    fn name(&self) -> &str {
        SYSTEM
    }

    async fn list_changed_since(&self, since: DateTime<Utc>) -> Result<Vec<RemoteItem>, RemoteError> {
        let jql = build_jql(&self.project, since, Utc::now());
        let mut items = Vec::new();
        let mut start_at = 0;

        loop {
            let path = format!(
                "/rest/api/3/search?jql={}&startAt={start_at}&maxResults={PAGE_SIZE}&fields={FIELDS}",
                urlencoding::encode(&jql)
            );
            let resp = self
                .request(reqwest::Method::GET, &path)
                .send()
                .await
                .map_err(|e| transport_error(SYSTEM, e))?;
            let page: SearchResponse = read_json(SYSTEM, resp).await?;

            let count = page.issues.len();
            items.extend(
                page.issues
                    .into_iter()
                    .map(|issue| issue_to_item(issue, &self.base_url)),
            );
            start_at += count;
            if count == 0 || start_at >= page.total {
                break;
            }
        }

        Ok(items)
    }

    async fn fetch(&self, id: &ExternalId) -> Result<RemoteItem, RemoteError> {
        self.fetch_by_key(id.key()).await
    }

    async fn create(&self, fields: &NewRemoteItem) -> Result<RemoteItem, RemoteError> {
        let mut body = create_body(&self.project, fields);
        if let Some(term) = fields.assignee.as_ref().and_then(|a| a.search_term()) {
            if let Some(account_id) = self.find_account_id(term).await? {
                body["fields"]["assignee"] = json!({ "accountId": account_id });
            }
        }

        let resp = self
            .send(self.request(reqwest::Method::POST, "/rest/api/3/issue").json(&body))
            .await?;
        let created: CreatedIssue = resp
            .json()
            .await
            .map_err(|e| RemoteError::transient(SYSTEM, format!("Failed to parse created issue: {e}")))?;

        self.fetch(&ExternalId::keyed(created.id, created.key)).await
    }

    async fn patch(&self, id: &ExternalId, delta: &FieldDelta) -> Result<(), RemoteError> {
        let key = id.key();
        let mut fields = patch_fields(delta);
        let mut notes = Vec::new();

        match &delta.assignee {
            Some(Some(assignee)) => {
                let account_id = match assignee.search_term() {
                    Some(term) => self.find_account_id(term).await?,
                    None => None,
                };
                match account_id {
                    Some(account_id) => {
                        fields.insert("assignee".into(), json!({ "accountId": account_id }));
                    }
                    None => notes.push(format!("Assigned on the board to {}", assignee.display_name())),
                }
            }
            Some(None) => {
                fields.insert("assignee".into(), Value::Null);
            }
            None => {}
        }
        if let Some(blocked) = &delta.blocked {
            notes.push(blocked.note());
        }

        if !fields.is_empty() {
            let path = format!("/rest/api/3/issue/{}", urlencoding::encode(key));
            self.send(
                self.request(reqwest::Method::PUT, &path)
                    .json(&json!({ "fields": fields })),
            )
            .await?;
        }
        for note in notes {
            self.add_comment(id, &note).await?;
        }
        Ok(())
    }

    async fn list_valid_transitions(&self, id: &ExternalId) -> Result<Vec<String>, RemoteError> {
        let transitions = self.transitions(id.key()).await?;
        Ok(transitions.into_iter().map(|t| t.to.name).collect())
    }

    async fn transition(&self, id: &ExternalId, state: &str) -> Result<(), RemoteError> {
        let key = id.key();
        let transitions = self.transitions(key).await?;
        let transition = transitions
            .iter()
            .find(|t| same_state(&t.to.name, state))
            .or_else(|| transitions.iter().find(|t| same_state(&t.name, state)))
            .ok_or_else(|| {
                RemoteError::validation(SYSTEM, format!("{key} has no transition to '{state}'"))
            })?;

        let path = format!("/rest/api/3/issue/{}/transitions", urlencoding::encode(key));
        self.send(
            self.request(reqwest::Method::POST, &path)
                .json(&json!({ "transition": { "id": transition.id } })),
        )
        .await?;
        Ok(())
    }

    async fn add_comment(&self, id: &ExternalId, text: &str) -> Result<(), RemoteError> {
        let path = format!("/rest/api/3/issue/{}/comment", urlencoding::encode(id.key()));
        self.send(
            self.request(reqwest::Method::POST, &path)
                .json(&json!({ "body": text_to_adf(text) })),
        )
        .await?;
        Ok(())
    }
}
