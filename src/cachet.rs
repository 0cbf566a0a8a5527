//! CachetHQ API client.
//!
//! API reference: https://docs.cachethq.io/reference

use crate::types::{
    AlertOutcome, Component, ComponentId, ComponentStatus, Incident, IncidentId, IncidentStatus,
    UpstreamPolicy,
};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Upper bound on page requests for one listing. The pagination metadata is
/// the only stop signal, so a server that never reports the last page must
/// not keep us looping.
pub const MAX_PAGES: u32 = 99;

pub const TOKEN_HEADER: &str = "X-Cachet-Token";

pub type ComponentMap = HashMap<String, ComponentId>;

#[derive(Debug, Error)]
pub enum CachetError {
    #[error("request to CachetHQ failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected CachetHQ response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("CachetHQ answered {status}: {body}")]
    UnexpectedStatus { status: StatusCode, body: String },
    #[error("no component found for {name:?} ({matches} matches)")]
    ComponentNotFound { name: String, matches: usize },
    #[error("cannot read root CA {}: {source}", .path.display())]
    RootCa {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Operations the bridge needs from an incident-management API.
#[async_trait]
pub trait IncidentClient: Send + Sync {
    /// Every component, keyed by name. On duplicate names the last page wins.
    async fn list_components(&self) -> Result<ComponentMap, CachetError>;

    /// The id of the one component called `name`.
    async fn search_component(&self, name: &str) -> Result<ComponentId, CachetError>;

    /// Incidents of a component, newest first.
    async fn search_incidents(
        &self,
        component_id: ComponentId,
    ) -> Result<Vec<Incident>, CachetError>;

    async fn create_incident(
        &self,
        component_name: &str,
        component_id: ComponentId,
        outcome: AlertOutcome,
        component_status: ComponentStatus,
    ) -> Result<(), CachetError>;

    async fn update_incident(
        &self,
        component_name: &str,
        component_id: ComponentId,
        incident_id: IncidentId,
        outcome: AlertOutcome,
    ) -> Result<(), CachetError>;
}

#[derive(Debug, Clone)]
pub struct CachetConfig {
    pub url: String,
    pub token: String,
    pub root_ca: Option<PathBuf>,
    pub insecure: bool,
    pub timeout: Duration,
    pub policy: UpstreamPolicy,
}

impl Default for CachetConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1/".to_string(),
            token: String::new(),
            root_ca: None,
            insecure: false,
            timeout: Duration::from_secs(10),
            policy: UpstreamPolicy::Lenient,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct Pagination {
    #[serde(default)]
    current_page: u32,
    #[serde(default)]
    total_pages: u32,
}

#[derive(Debug, Default, Deserialize)]
struct Meta {
    #[serde(default)]
    pagination: Pagination,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default)]
    meta: Meta,
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

impl<T> Page<T> {
    fn is_last(&self) -> bool {
        self.meta.pagination.current_page >= self.meta.pagination.total_pages
    }
}

#[derive(Debug, Deserialize)]
struct IncidentRecord {
    id: IncidentId,
    component_id: ComponentId,
    status: IncidentStatus,
    #[serde(default)]
    component_status: Option<ComponentStatus>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    visible: Visibility,
}

/// Cachet reports `visible` as 0/1, older releases as a boolean.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Visibility {
    Flag(bool),
    Number(u8),
}

impl Default for Visibility {
    fn default() -> Self {
        Visibility::Flag(true)
    }
}

impl From<IncidentRecord> for Incident {
    fn from(record: IncidentRecord) -> Self {
        Incident {
            id: record.id,
            component_id: record.component_id,
            status: record.status,
            component_status: record.component_status,
            name: record.name,
            message: record.message,
            visible: match record.visible {
                Visibility::Flag(flag) => flag,
                Visibility::Number(n) => n != 0,
            },
        }
    }
}

/// Request body for POST /api/v1/incidents and PUT /api/v1/incidents/{id}.
#[derive(Debug, Serialize, PartialEq)]
pub struct IncidentRequest {
    pub name: String,
    pub message: String,
    pub status: IncidentStatus,
    pub component_id: ComponentId,
    pub component_status: ComponentStatus,
    pub visible: u8,
}

impl IncidentRequest {
    pub fn new(
        component_name: &str,
        component_id: ComponentId,
        outcome: AlertOutcome,
        component_status: ComponentStatus,
    ) -> Self {
        Self {
            name: outcome.incident_name(component_name),
            message: outcome.incident_message(component_name),
            status: outcome.incident_status(),
            component_id,
            component_status,
            visible: 1,
        }
    }
}

/// HTTP implementation of [`IncidentClient`]. Cheap to clone, the underlying
/// connection pool is shared.
#[derive(Debug, Clone)]
pub struct CachetClient {
    url: String,
    token: String,
    policy: UpstreamPolicy,
    client: reqwest::Client,
}

impl CachetClient {
    pub fn new(config: CachetConfig) -> Result<Self, CachetError> {
        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(config.insecure);

        if let Some(path) = &config.root_ca {
            let pem = std::fs::read(path).map_err(|source| CachetError::RootCa {
                path: path.clone(),
                source,
            })?;
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(&pem)?);
        }

        Ok(Self::with_client(config, builder.build()?))
    }

    pub fn with_client(config: CachetConfig, client: reqwest::Client) -> Self {
        Self {
            url: config.url.trim_end_matches('/').to_string(),
            token: config.token,
            policy: config.policy,
            client,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.url, path))
            .header(CONTENT_TYPE, "application/json")
            .header(TOKEN_HEADER, &self.token)
    }

    /// Applies the upstream policy to a non-2xx answer.
    fn check_status(&self, status: StatusCode, body: &str) -> Result<(), CachetError> {
        if status.is_success() {
            return Ok(());
        }
        match self.policy {
            UpstreamPolicy::Lenient => {
                warn!("CachetHQ answered {}: {}", status, body);
                Ok(())
            }
            UpstreamPolicy::Strict => Err(CachetError::UnexpectedStatus {
                status,
                body: body.to_string(),
            }),
        }
    }

    async fn get_page<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Page<T>, CachetError> {
        let response = self.request(Method::GET, path).query(query).send().await?;
        let status = response.status();
        let body = response.text().await?;
        self.check_status(status, &body)?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Walks `page=1,2,...` until the server reports the last page, or
    /// [`MAX_PAGES`] requests were made.
    async fn get_all<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, CachetError> {
        let mut items = Vec::new();
        for page in 1..=MAX_PAGES {
            let mut params = query.to_vec();
            params.push(("page", page.to_string()));

            let result: Page<T> = self.get_page(path, &params).await?;
            let last = result.is_last();
            items.extend(result.data);
            if last {
                return Ok(items);
            }
        }
        warn!(
            "{} still not exhausted after {} pages, using what was fetched",
            path, MAX_PAGES
        );
        Ok(items)
    }

    async fn send_incident(
        &self,
        method: Method,
        path: &str,
        incident: &IncidentRequest,
    ) -> Result<(), CachetError> {
        debug!("{} {} for component {}", method, path, incident.component_id);
        let response = self.request(method, path).json(incident).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await?;
            self.check_status(status, &body)?;
        }
        Ok(())
    }
}

#[async_trait]
impl IncidentClient for CachetClient {
    async fn list_components(&self) -> Result<ComponentMap, CachetError> {
        let components: Vec<Component> = self.get_all("/api/v1/components", &[]).await?;
        Ok(components.into_iter().map(|c| (c.name, c.id)).collect())
    }

    async fn search_component(&self, name: &str) -> Result<ComponentId, CachetError> {
        let query = [("name", name.to_string()), ("page", "1".to_string())];
        let result: Page<Component> = self.get_page("/api/v1/components", &query).await?;
        match result.data.as_slice() {
            [component] => Ok(component.id),
            matches => Err(CachetError::ComponentNotFound {
                name: name.to_string(),
                matches: matches.len(),
            }),
        }
    }

    async fn search_incidents(
        &self,
        component_id: ComponentId,
    ) -> Result<Vec<Incident>, CachetError> {
        let query = [
            ("component_id", component_id.to_string()),
            ("sort", "id".to_string()),
            ("order", "desc".to_string()),
        ];
        let records: Vec<IncidentRecord> = self.get_all("/api/v1/incidents", &query).await?;
        Ok(records.into_iter().map(Incident::from).collect())
    }

    async fn create_incident(
        &self,
        component_name: &str,
        component_id: ComponentId,
        outcome: AlertOutcome,
        component_status: ComponentStatus,
    ) -> Result<(), CachetError> {
        let incident = IncidentRequest::new(component_name, component_id, outcome, component_status);
        self.send_incident(Method::POST, "/api/v1/incidents", &incident)
            .await
    }

    async fn update_incident(
        &self,
        component_name: &str,
        component_id: ComponentId,
        incident_id: IncidentId,
        outcome: AlertOutcome,
    ) -> Result<(), CachetError> {
        let incident = IncidentRequest::new(
            component_name,
            component_id,
            outcome,
            outcome.component_status(),
        );
        let path = format!("/api/v1/incidents/{}", incident_id);
        self.send_incident(Method::PUT, &path, &incident).await
    }
}
