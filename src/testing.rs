//! Test doubles: a fake CachetHQ HTTP server and an in-memory `IncidentClient`.

use crate::cachet::{CachetError, ComponentMap, IncidentClient};
use crate::types::{
    AlertOutcome, ComponentId, ComponentStatus, Incident, IncidentId, IncidentStatus,
};
use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
    pub token: Option<String>,
    pub content_type: Option<String>,
    pub body: Option<Value>,
}

#[derive(Default)]
struct MockState {
    components: Vec<(ComponentId, String)>,
    incidents: Vec<(IncidentId, ComponentId, IncidentStatus)>,
    per_page: usize,
    endless: bool,
    status: Option<StatusCode>,
    raw_body: Option<String>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockState {
    fn record(
        &self,
        method: &Method,
        uri: &Uri,
        headers: &HeaderMap,
        query: &HashMap<String, String>,
        body: &[u8],
    ) {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        self.requests.lock().unwrap().push(RecordedRequest {
            method: method.to_string(),
            path: uri.path().to_string(),
            query: query.clone(),
            token: header("x-cachet-token"),
            content_type: header("content-type"),
            body: serde_json::from_slice(body).ok(),
        });
    }

    fn respond(&self, body: Value) -> Response {
        let status = self.status.unwrap_or(StatusCode::OK);
        match &self.raw_body {
            Some(raw) => (status, raw.clone()).into_response(),
            None => (status, Json(body)).into_response(),
        }
    }
}

async fn components_handler(
    State(state): State<Arc<MockState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    state.record(&method, &uri, &headers, &params, &[]);

    let matching: Vec<&(ComponentId, String)> = state
        .components
        .iter()
        .filter(|(_, name)| params.get("name").is_none_or(|wanted| wanted == name))
        .collect();

    let page: usize = params
        .get("page")
        .and_then(|p| p.parse().ok())
        .unwrap_or(1);
    let per_page = state.per_page.max(1);
    let (current_page, total_pages, slice) = if state.endless {
        (1, 1000, matching.clone())
    } else {
        let total = matching.len().div_ceil(per_page).max(1);
        let slice = matching
            .iter()
            .skip(page.saturating_sub(1) * per_page)
            .take(per_page)
            .copied()
            .collect();
        (page, total, slice)
    };

    let data: Vec<Value> = slice
        .iter()
        .map(|(id, name)| {
            json!({
                "id": id,
                "name": name,
                "description": "",
                "link": "",
                "status": 1,
                "order": 0,
                "group_id": 0,
                "created_at": "2015-07-24 14:42:10",
                "updated_at": "2015-07-24 14:42:10",
                "deleted_at": null,
                "status_name": "Operational"
            })
        })
        .collect();

    state.respond(json!({
        "meta": {
            "pagination": {
                "total": matching.len(),
                "count": data.len(),
                "per_page": per_page,
                "current_page": current_page,
                "total_pages": total_pages,
                "links": {"next_page": null, "previous_page": null}
            }
        },
        "data": data
    }))
}

async fn incidents_handler(
    State(state): State<Arc<MockState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    state.record(&method, &uri, &headers, &params, &body);

    if method == Method::POST {
        return state.respond(json!({"data": {"id": 4, "component_id": 1, "status": 2}}));
    }

    let component_id: Option<ComponentId> =
        params.get("component_id").and_then(|c| c.parse().ok());
    let mut incidents: Vec<&(IncidentId, ComponentId, IncidentStatus)> = state
        .incidents
        .iter()
        .filter(|(_, c, _)| component_id.is_none_or(|wanted| wanted == *c))
        .collect();
    if params.get("order").map(String::as_str) == Some("desc") {
        incidents.sort_by(|a, b| b.0.cmp(&a.0));
    }

    let data: Vec<Value> = incidents
        .iter()
        .map(|(id, component_id, status)| {
            json!({
                "id": id,
                "component_id": component_id,
                "name": "Incident Name",
                "status": *status as u8,
                "visible": 1,
                "message": "Incident Message",
                "scheduled_at": "2015-08-01 12:00:00",
                "created_at": "2015-08-01 12:00:00",
                "updated_at": "2015-08-01 12:00:00",
                "deleted_at": null,
                "human_status": status.to_string()
            })
        })
        .collect();

    state.respond(json!({
        "meta": {
            "pagination": {
                "total": data.len(),
                "count": data.len(),
                "per_page": "20",
                "current_page": 1,
                "total_pages": 1
            }
        },
        "data": data
    }))
}

async fn incident_handler(
    State(state): State<Arc<MockState>>,
    Path(id): Path<IncidentId>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.record(&method, &uri, &headers, &HashMap::new(), &body);
    state.respond(json!({"data": {"id": id, "component_id": 1, "status": 4}}))
}

pub struct MockCachetBuilder {
    state: MockState,
}

impl MockCachetBuilder {
    pub fn component(mut self, id: ComponentId, name: &str) -> Self {
        self.state.components.push((id, name.to_string()));
        self
    }

    pub fn incident(
        mut self,
        id: IncidentId,
        component_id: ComponentId,
        status: IncidentStatus,
    ) -> Self {
        self.state.incidents.push((id, component_id, status));
        self
    }

    pub fn per_page(mut self, per_page: usize) -> Self {
        self.state.per_page = per_page;
        self
    }

    /// Pagination metadata that never reports the last page.
    pub fn endless_pagination(mut self) -> Self {
        self.state.endless = true;
        self
    }

    /// Status code for every response.
    pub fn status(mut self, status: StatusCode) -> Self {
        self.state.status = Some(status);
        self
    }

    /// Replace every response body with `body`.
    pub fn raw_body(mut self, body: &str) -> Self {
        self.state.raw_body = Some(body.to_string());
        self
    }

    pub async fn start(self) -> MockCachet {
        let state = Arc::new(self.state);
        let app = Router::new()
            .route("/api/v1/components", get(components_handler))
            .route(
                "/api/v1/incidents",
                get(incidents_handler).post(incidents_handler),
            )
            .route("/api/v1/incidents/:id", put(incident_handler))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let (tx, rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    rx.await.ok();
                })
                .await
                .unwrap();
        });

        MockCachet {
            url,
            state,
            shutdown: tx,
            handle,
        }
    }
}

/// A fake CachetHQ API listening on a random local port.
pub struct MockCachet {
    pub url: String,
    state: Arc<MockState>,
    shutdown: oneshot::Sender<()>,
    handle: tokio::task::JoinHandle<()>,
}

impl MockCachet {
    pub fn builder() -> MockCachetBuilder {
        MockCachetBuilder {
            state: MockState {
                per_page: 20,
                ..MockState::default()
            },
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    /// POST and PUT requests only.
    pub fn writes(&self) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == "POST" || r.method == "PUT")
            .collect()
    }

    pub async fn stop(self) {
        self.shutdown.send(()).ok();
        self.handle.await.unwrap();
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    ListComponents,
    SearchComponent(String),
    SearchIncidents(ComponentId),
    CreateIncident {
        component_name: String,
        component_id: ComponentId,
        outcome: AlertOutcome,
        component_status: ComponentStatus,
    },
    UpdateIncident {
        component_name: String,
        component_id: ComponentId,
        incident_id: IncidentId,
        outcome: AlertOutcome,
    },
}

/// In-memory `IncidentClient` recording every call it receives.
#[derive(Default)]
pub struct InMemoryIncidentClient {
    components: Vec<(String, ComponentId)>,
    incidents: Vec<Incident>,
    fail_listing: bool,
    fail_writes_for: Option<ComponentId>,
    calls: Mutex<Vec<Call>>,
}

impl InMemoryIncidentClient {
    pub fn new(components: &[(&str, ComponentId)]) -> Self {
        Self {
            components: components
                .iter()
                .map(|(name, id)| (name.to_string(), *id))
                .collect(),
            ..Self::default()
        }
    }

    pub fn with_incident(
        mut self,
        id: IncidentId,
        component_id: ComponentId,
        status: IncidentStatus,
    ) -> Self {
        self.incidents.push(Incident {
            id,
            component_id,
            status,
            component_status: None,
            name: format!("incident {}", id),
            message: String::new(),
            visible: true,
        });
        self
    }

    pub fn failing_listing(mut self) -> Self {
        self.fail_listing = true;
        self
    }

    pub fn failing_writes_for(mut self, component_id: ComponentId) -> Self {
        self.fail_writes_for = Some(component_id);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn writes(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::CreateIncident { .. } | Call::UpdateIncident { .. }))
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn write_result(&self, component_id: ComponentId) -> Result<(), CachetError> {
        if self.fail_writes_for == Some(component_id) {
            return Err(CachetError::UnexpectedStatus {
                status: reqwest::StatusCode::BAD_GATEWAY,
                body: "upstream down".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl IncidentClient for InMemoryIncidentClient {
    async fn list_components(&self) -> Result<ComponentMap, CachetError> {
        self.record(Call::ListComponents);
        if self.fail_listing {
            return Err(CachetError::Decode(
                serde_json::from_str::<Value>("<html>").unwrap_err(),
            ));
        }
        Ok(self.components.iter().cloned().collect())
    }

    async fn search_component(&self, name: &str) -> Result<ComponentId, CachetError> {
        self.record(Call::SearchComponent(name.to_string()));
        let matches: Vec<ComponentId> = self
            .components
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, id)| *id)
            .collect();
        match matches.as_slice() {
            [id] => Ok(*id),
            _ => Err(CachetError::ComponentNotFound {
                name: name.to_string(),
                matches: matches.len(),
            }),
        }
    }

    async fn search_incidents(
        &self,
        component_id: ComponentId,
    ) -> Result<Vec<Incident>, CachetError> {
        self.record(Call::SearchIncidents(component_id));
        let mut incidents: Vec<Incident> = self
            .incidents
            .iter()
            .filter(|i| i.component_id == component_id)
            .cloned()
            .collect();
        incidents.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(incidents)
    }

    async fn create_incident(
        &self,
        component_name: &str,
        component_id: ComponentId,
        outcome: AlertOutcome,
        component_status: ComponentStatus,
    ) -> Result<(), CachetError> {
        self.record(Call::CreateIncident {
            component_name: component_name.to_string(),
            component_id,
            outcome,
            component_status,
        });
        self.write_result(component_id)
    }

    async fn update_incident(
        &self,
        component_name: &str,
        component_id: ComponentId,
        incident_id: IncidentId,
        outcome: AlertOutcome,
    ) -> Result<(), CachetError> {
        self.record(Call::UpdateIncident {
            component_name: component_name.to_string(),
            component_id,
            incident_id,
            outcome,
        });
        self.write_result(component_id)
    }
}
