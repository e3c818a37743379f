//! reqwest-backed [`PlatformApi`] implementation.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, AUTHORIZATION};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use super::models::{
    AllocatorInfo, DeploymentCreateRequest, DeploymentCreateResponse, DeploymentGetResponse,
    DeploymentTemplateInfo, DeploymentsSearchResponse, MoveClustersResponse, ResourceInfo,
    ResourceKind, StackVersionsResponse, VacateRequest,
};
use super::{PlatformApi, TemplateQuery};
use crate::config::{Config, HOSTED_ENDPOINT, REDACTED};
use crate::utils::http::{create_client, join_url};
use crate::{Error, Result};

const API_PREFIX: &str = "/api/v1";

/// How requests are authenticated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    ApiKey(String),
    /// Exchanged for a bearer token on first use.
    Login { user: String, pass: String },
}

enum Auth {
    ApiKey(String),
    Login {
        user: String,
        pass: String,
        token: Mutex<Option<String>>,
    },
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

/// One outgoing request, rebuilt for every attempt.
struct Call<'a> {
    method: Method,
    url: String,
    query: Vec<(&'a str, String)>,
    body: Option<Value>,
}

impl<'a> Call<'a> {
    fn new(method: Method, url: String) -> Self {
        Self {
            method,
            url,
            query: Vec::new(),
            body: None,
        }
    }

    fn query(mut self, key: &'a str, value: impl ToString) -> Self {
        self.query.push((key, value.to_string()));
        self
    }

    fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// HTTP client for the platform API.
pub struct HttpApi {
    client: reqwest::Client,
    host: String,
    region: Option<String>,
    auth: Auth,
    verbose: bool,
}

impl HttpApi {
    /// Build a client from a validated configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let host = config.host.clone().unwrap_or_default();
        let credentials = match (&config.api_key, &config.user, &config.pass) {
            (Some(key), _, _) if !key.is_empty() => Credentials::ApiKey(key.clone()),
            (_, Some(user), Some(pass)) => Credentials::Login {
                user: user.clone(),
                pass: pass.clone(),
            },
            _ => return Err(Error::validation("either api_key or both user and pass must be set")),
        };
        let client = create_client(config.timeout(), config.insecure)?;
        Ok(Self::new(client, host, config.region.clone(), credentials, config.verbose))
    }

    pub fn new(
        client: reqwest::Client,
        host: impl Into<String>,
        region: Option<String>,
        credentials: Credentials,
        verbose: bool,
    ) -> Self {
        let auth = match credentials {
            Credentials::ApiKey(key) => Auth::ApiKey(key),
            Credentials::Login { user, pass } => Auth::Login {
                user,
                pass,
                token: Mutex::new(None),
            },
        };
        Self {
            client,
            host: host.into().trim_end_matches('/').to_string(),
            region: region.filter(|r| !r.is_empty()),
            auth,
            verbose,
        }
    }

    fn is_hosted(&self) -> bool {
        self.host == HOSTED_ENDPOINT
    }

    /// URL of a path that is never region scoped.
    fn unscoped(&self, path: &str) -> String {
        join_url(&self.host, &format!("{}{}", API_PREFIX, path))
    }

    /// URL of a path that carries the region prefix on self-managed installations.
    fn scoped(&self, path: &str) -> String {
        match &self.region {
            Some(region) if !self.is_hosted() => join_url(
                &self.host,
                &format!("{}/regions/{}{}", API_PREFIX, region, path),
            ),
            _ => self.unscoped(path),
        }
    }

    async fn login(&self, user: &str, pass: &str) -> Result<String> {
        let call = Call::new(Method::POST, self.unscoped("/users/auth/_login"))
            .body(json!({ "username": user, "password": pass }));
        let (status, text) = self.dispatch(&call, None).await?;
        if !status.is_success() {
            return Err(Error::Remote {
                status: status.as_u16(),
                body: text,
            });
        }
        let response: LoginResponse = serde_json::from_str(&text)?;
        tracing::debug!(user = %user, "obtained login token");
        Ok(response.token)
    }

    /// Authorization header value, logging in first when no token is cached.
    async fn authorization(&self) -> Result<String> {
        match &self.auth {
            Auth::ApiKey(key) => Ok(format!("ApiKey {}", key)),
            Auth::Login { user, pass, token } => {
                let mut cached = token.lock().await;
                if let Some(token) = cached.as_ref() {
                    return Ok(format!("Bearer {}", token));
                }
                let fresh = self.login(user, pass).await?;
                let header = format!("Bearer {}", fresh);
                *cached = Some(fresh);
                Ok(header)
            }
        }
    }

    async fn forget_token(&self) {
        if let Auth::Login { token, .. } = &self.auth {
            *token.lock().await = None;
        }
    }

    async fn dispatch(&self, call: &Call<'_>, authorization: Option<&str>) -> Result<(StatusCode, String)> {
        let mut builder = self.client.request(call.method.clone(), &call.url);
        if !call.query.is_empty() {
            builder = builder.query(&call.query);
        }
        if let Some(value) = authorization {
            builder = builder.header(AUTHORIZATION, value);
        }
        if let Some(body) = &call.body {
            builder = builder.json(body);
        }
        let request = builder.build()?;

        if self.verbose {
            tracing::debug!(
                method = %request.method(),
                url = %request.url(),
                headers = %dump_headers(request.headers()),
                body = %call.body.as_ref().map(redact_body).unwrap_or_default(),
                "==================== Start of Request ===================="
            );
        }

        let response = self.client.execute(request).await?;
        let status = response.status();
        let headers = self.verbose.then(|| dump_headers(response.headers()));
        let text = response.text().await?;

        match headers {
            Some(headers) => tracing::debug!(
                status = status.as_u16(),
                headers = %headers,
                body = %text,
                "==================== End of Response ===================="
            ),
            None => tracing::trace!(method = %call.method, url = %call.url, status = status.as_u16(), "api call"),
        }
        Ok((status, text))
    }

    /// Send a call, refreshing the login token once on 401.
    async fn send<T: DeserializeOwned>(&self, call: Call<'_>) -> Result<T> {
        let mut refreshed = false;
        loop {
            let authorization = self.authorization().await?;
            let (status, text) = self.dispatch(&call, Some(&authorization)).await?;

            if status == StatusCode::UNAUTHORIZED && matches!(self.auth, Auth::Login { .. }) && !refreshed {
                tracing::debug!(url = %call.url, "login token rejected, logging in again");
                self.forget_token().await;
                refreshed = true;
                continue;
            }
            if !status.is_success() {
                return Err(Error::Remote {
                    status: status.as_u16(),
                    body: text,
                });
            }

            let text = if text.trim().is_empty() { "null" } else { text.as_str() };
            return Ok(serde_json::from_str(text)?);
        }
    }
}

/// `name: value` pairs, with the authorization header masked.
fn dump_headers(headers: &HeaderMap) -> String {
    headers
        .iter()
        .map(|(name, value)| {
            let value = if *name == AUTHORIZATION {
                REDACTED
            } else {
                value.to_str().unwrap_or("<binary>")
            };
            format!("{}: {}", name, value)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn redact_body(body: &Value) -> String {
    let mut copy = body.clone();
    if let Some(password) = copy.get_mut("password") {
        *password = Value::String(REDACTED.to_string());
    }
    copy.to_string()
}

#[async_trait]
impl PlatformApi for HttpApi {
    async fn get_deployment_template(&self, query: &TemplateQuery) -> Result<DeploymentTemplateInfo> {
        let url = self.unscoped(&format!("/deployments/templates/{}", query.template_id));
        let mut call = Call::new(Method::GET, url)
            .query("region", &query.region)
            .query("show_instance_configurations", query.show_instance_configurations);
        if let Some(version) = query.stack_version.as_deref().filter(|v| !v.is_empty()) {
            call = call.query("stack_version", version);
        }
        self.send(call).await
    }

    async fn list_stack_versions(&self) -> Result<Vec<String>> {
        let call = Call::new(Method::GET, self.scoped("/stack/versions"))
            .query("show_deleted", false)
            .query("show_unusable", false);
        let response: StackVersionsResponse = self.send(call).await?;
        let mut versions: Vec<String> = response.stacks.into_iter().map(|s| s.version).collect();
        sort_versions_desc(&mut versions);
        Ok(versions)
    }

    async fn create_deployment(
        &self,
        request_id: &str,
        request: &DeploymentCreateRequest,
    ) -> Result<DeploymentCreateResponse> {
        let call = Call::new(Method::POST, self.unscoped("/deployments"))
            .query("request_id", request_id)
            .body(serde_json::to_value(request)?);
        self.send(call).await
    }

    async fn get_deployment(&self, deployment_id: &str) -> Result<DeploymentGetResponse> {
        let call = Call::new(Method::GET, self.unscoped(&format!("/deployments/{}", deployment_id)))
            .query("show_plans", true)
            .query("show_plan_logs", true)
            .query("show_plan_defaults", true)
            .query("show_metadata", true)
            .query("show_settings", true)
            .query("show_system_alerts", 5);
        self.send(call).await
    }

    async fn get_resource(
        &self,
        deployment_id: &str,
        kind: ResourceKind,
        ref_id: &str,
    ) -> Result<ResourceInfo> {
        let path = format!("/deployments/{}/{}/{}", deployment_id, kind.as_str(), ref_id);
        let call = Call::new(Method::GET, self.unscoped(&path))
            .query("show_plans", true)
            .query("show_plan_logs", true);
        self.send(call).await
    }

    async fn find_deployment_id(&self, kind: ResourceKind, resource_id: &str) -> Result<Option<String>> {
        let field = format!("resources.{}", kind.as_str());
        let body = json!({
            "query": {
                "nested": {
                    "path": field,
                    "query": {
                        "term": { format!("{}.id", field): { "value": resource_id } }
                    }
                }
            }
        });
        let call = Call::new(Method::POST, self.unscoped("/deployments/_search")).body(body);
        let response: DeploymentsSearchResponse = self.send(call).await?;
        Ok(response.deployments.into_iter().next().map(|d| d.id))
    }

    async fn get_allocator(&self, allocator_id: &str) -> Result<AllocatorInfo> {
        let path = format!("/platform/infrastructure/allocators/{}", allocator_id);
        self.send(Call::new(Method::GET, self.scoped(&path))).await
    }

    async fn vacate_allocator(&self, request: &VacateRequest) -> Result<MoveClustersResponse> {
        let path = format!("/platform/infrastructure/allocators/{}/_vacate", request.allocator_id);
        let mut call = Call::new(Method::POST, self.scoped(&path));
        if let Some(down) = request.allocator_down {
            call = call.query("allocator_down", down);
        }
        let call = call
            .query("move_only", request.move_only)
            .body(serde_json::to_value(&request.body)?);
        self.send(call).await
    }

    async fn set_allocator_maintenance(&self, allocator_id: &str, enabled: bool) -> Result<()> {
        let action = if enabled { "_start" } else { "_stop" };
        let path = format!(
            "/platform/infrastructure/allocators/{}/maintenance-mode/{}",
            allocator_id, action
        );
        let _: Value = self.send(Call::new(Method::POST, self.scoped(&path))).await?;
        Ok(())
    }

    async fn current_user(&self) -> Result<Value> {
        self.send(Call::new(Method::GET, self.unscoped("/users/me"))).await
    }

    async fn list_deployments(&self) -> Result<Value> {
        self.send(Call::new(Method::GET, self.unscoped("/deployments"))).await
    }
}

/// Sort newest first; versions that are not semver sort last, in input order.
fn sort_versions_desc(versions: &mut [String]) {
    versions.sort_by(|a, b| {
        match (semver::Version::parse(a), semver::Version::parse(b)) {
            (Ok(a), Ok(b)) => b.cmp(&a),
            (Ok(_), Err(_)) => std::cmp::Ordering::Less,
            (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
            (Err(_), Err(_)) => std::cmp::Ordering::Equal,
        }
    });
}
