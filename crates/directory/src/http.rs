use crate::models::{Paginated, ProjectModel, ScenarioModel};
use crate::{
    BaseScenario, DirectoryClient, DirectoryError, ProjectRef, RegionalScenarioRef, Result,
};
use async_trait::async_trait;
use conductor_protocol::{
    BaseScenarioId, PairKey, ProjectId, RegionalScenarioId, TerritoryId, UserId,
};
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;

const MAX_PAGES: usize = 10_000;
const PING_PATH: &str = "health_check/ping";
const PING_REPLY: &str = "Pong!";

#[derive(Debug, Clone)]
pub struct HttpDirectoryConfig {
    pub host: String,
    pub api_token: String,
    pub ping_timeout: Duration,
    pub operation_timeout: Duration,
    pub page_size: u32,
}

impl Default for HttpDirectoryConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost:8000/".to_string(),
            api_token: String::new(),
            ping_timeout: Duration::from_secs(2),
            operation_timeout: Duration::from_secs(30),
            page_size: 100,
        }
    }
}

/// Directory client speaking the registry's REST API.
///
/// Cloning is cheap: clones share one connection pool.
#[derive(Debug, Clone)]
pub struct HttpDirectoryClient {
    base: Url,
    api_token: String,
    ping_timeout: Duration,
    page_size: u32,
    http: reqwest::Client,
}

impl HttpDirectoryClient {
    pub fn new(config: HttpDirectoryConfig) -> Result<Self> {
        let base = Url::parse(&normalize_host(&config.host)).map_err(|err| {
            DirectoryError::Configuration(format!("invalid host {:?}: {err}", config.host))
        })?;
        let http = reqwest::Client::builder()
            .timeout(config.operation_timeout)
            .build()
            .map_err(|err| {
                DirectoryError::Configuration(format!("failed to build HTTP client: {err}"))
            })?;

        Ok(Self {
            base,
            api_token: config.api_token,
            ping_timeout: config.ping_timeout,
            page_size: config.page_size.max(1),
            http,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Returns true when the registry answers its health check. Never fails.
    pub async fn ping(&self) -> bool {
        let url = match self.base.join(PING_PATH) {
            Ok(url) => url,
            Err(err) => {
                log::warn!("error on ping: {err}");
                return false;
            }
        };

        match self.http.get(url).timeout(self.ping_timeout).send().await {
            Ok(resp) if resp.status() == StatusCode::OK => {
                let body: serde_json::Value = match resp.json().await {
                    Ok(body) => body,
                    Err(err) => {
                        log::warn!("error on ping: unreadable body: {err}");
                        return false;
                    }
                };
                if body.get("message").and_then(|m| m.as_str()) == Some(PING_REPLY) {
                    return true;
                }
                log::warn!("error on ping: unexpected body {body}");
                false
            }
            Ok(resp) => {
                let status = resp.status();
                let text = resp.text().await.unwrap_or_default();
                log::warn!("error on ping: status={status} body={text}");
                false
            }
            Err(err) if err.is_timeout() => {
                log::warn!("timeout on ping");
                false
            }
            Err(err) => {
                log::warn!("error on ping: {err}");
                false
            }
        }
    }

    /// Version reported by the registry's OpenAPI document.
    pub async fn version(&self) -> Result<String> {
        let request = self.request(Method::GET, "api/openapi")?;
        let doc: serde_json::Value = self.fetch_json(request, "GET api/openapi").await?;
        doc.get("info")
            .and_then(|info| info.get("version"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| DirectoryError::Decode("openapi document has no info.version".into()))
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let url = self
            .base
            .join(path)
            .map_err(|err| DirectoryError::Configuration(format!("invalid path {path}: {err}")))?;
        Ok(self.http.request(method, url).bearer_auth(&self.api_token))
    }

    async fn send(&self, request: RequestBuilder, label: &str) -> Result<Response> {
        let resp = request.send().await.map_err(|err| {
            if err.is_timeout() {
                DirectoryError::Unavailable(format!("{label} timed out: {err}"))
            } else {
                DirectoryError::Unavailable(format!("{label} failed: {err}"))
            }
        })?;

        let status = resp.status();
        if status == StatusCode::OK || status == StatusCode::CREATED {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(status_error(label, status, body))
    }

    async fn fetch_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        label: &str,
    ) -> Result<T> {
        let resp = self.send(request, label).await?;
        let text = resp
            .text()
            .await
            .map_err(|err| DirectoryError::Unavailable(format!("{label} body: {err}")))?;
        serde_json::from_str(&text).map_err(|err| DirectoryError::Decode(format!("{label}: {err}")))
    }
}

#[async_trait]
impl DirectoryClient for HttpDirectoryClient {
    async fn list_regional_scenarios_for_user(
        &self,
        user_id: &UserId,
        territory_id: TerritoryId,
    ) -> Result<Vec<RegionalScenarioRef>> {
        let request = self.request(Method::GET, "api/v1/scenarios")?.query(&[
            ("territory_id", territory_id.to_string()),
            ("is_based", "false".to_string()),
            ("only_own", "false".to_string()),
        ]);
        let scenarios: Vec<ScenarioModel> =
            self.fetch_json(request, "GET api/v1/scenarios").await?;

        Ok(scenarios
            .into_iter()
            .map(RegionalScenarioRef::from)
            .filter(|scenario| {
                &scenario.user_id == user_id
                    && scenario.territory_id == territory_id
                    && !scenario.is_based
            })
            .collect())
    }

    async fn list_projects_for_user_in_territory(
        &self,
        user_id: &UserId,
        territory_id: TerritoryId,
    ) -> Result<Vec<ProjectRef>> {
        let label = "GET api/v1/projects";
        let mut request = self.request(Method::GET, "api/v1/projects")?.query(&[
            ("territory_id", territory_id.to_string()),
            ("is_regional", "false".to_string()),
            ("only_own", "false".to_string()),
            ("page_size", self.page_size.to_string()),
        ]);

        let mut projects = Vec::new();
        for _ in 0..MAX_PAGES {
            let page: Paginated<ProjectModel> = self.fetch_json(request, label).await?;
            projects.extend(page.results.into_iter().map(ProjectRef::from));

            let Some(next) = page.next.filter(|next| !next.is_empty()) else {
                return Ok(projects
                    .into_iter()
                    .filter(|p| &p.user_id == user_id && p.territory_id == territory_id)
                    .collect());
            };
            let next = self.base.join(&next).map_err(|err| {
                DirectoryError::Decode(format!("{label}: invalid next link {next:?}: {err}"))
            })?;
            request = self.http.get(next).bearer_auth(&self.api_token);
        }

        Err(DirectoryError::Decode(format!(
            "{label}: pagination exceeded {MAX_PAGES} pages"
        )))
    }

    async fn create_base_scenario(
        &self,
        project_id: ProjectId,
        regional_scenario_id: RegionalScenarioId,
    ) -> Result<BaseScenario> {
        let path = format!("api/v1/projects/{project_id}/base_scenario/{regional_scenario_id}");
        let label = format!("POST {path}");
        let request = self.request(Method::POST, &path)?;
        let scenario: ScenarioModel = self.fetch_json(request, &label).await?;

        Ok(BaseScenario {
            id: BaseScenarioId(scenario.scenario_id),
            key: PairKey::new(project_id, regional_scenario_id),
        })
    }
}

/// Adds a default scheme and a trailing slash so relative API paths join correctly.
pub(crate) fn normalize_host(host: &str) -> String {
    let host = host.trim();
    let with_scheme = if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        log::warn!("http/https schema is not set, defaulting to http");
        format!("http://{host}")
    };
    format!("{}/", with_scheme.trim_end_matches('/'))
}

pub(crate) fn status_error(label: &str, status: StatusCode, body: String) -> DirectoryError {
    match status.as_u16() {
        400 => DirectoryError::Rejected {
            status: 400,
            message: format!("{label} returned BAD REQUEST: {body}"),
        },
        404 => DirectoryError::NotFound(format!("{label} returned NOT FOUND: {body}")),
        409 => DirectoryError::Conflict(format!("{label} returned CONFLICT: {body}")),
        429 => DirectoryError::Unavailable(format!("{label} returned TOO MANY REQUESTS: {body}")),
        code if status.is_server_error() => {
            DirectoryError::Unavailable(format!("{label} returned {code}: {body}"))
        }
        code => {
            log::error!("request failed: {label} status={code} body={body}");
            DirectoryError::Rejected {
                status: code,
                message: format!("{label} returned unexpected status: {code}"),
            }
        }
    }
}
