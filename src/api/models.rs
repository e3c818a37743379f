//! Typed request and response documents of the platform API.
//!
//! Only the fields ecctl reads or writes are modelled; everything else a
//! document carries is kept in an order-preserving `extra` map so payloads
//! round-trip unchanged.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// Unknown document fields, kept in source order.
pub type Extra = IndexMap<String, Value>;

/// Step id of the final step of every plan attempt.
pub const PLAN_COMPLETED_STEP: &str = "plan-completed";

/// Kind of a deployment resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Elasticsearch,
    Kibana,
    Apm,
    Appsearch,
    EnterpriseSearch,
    IntegrationsServer,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 6] = [
        ResourceKind::Elasticsearch,
        ResourceKind::Kibana,
        ResourceKind::Apm,
        ResourceKind::Appsearch,
        ResourceKind::EnterpriseSearch,
        ResourceKind::IntegrationsServer,
    ];

    /// Name used in API paths and payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Elasticsearch => "elasticsearch",
            ResourceKind::Kibana => "kibana",
            ResourceKind::Apm => "apm",
            ResourceKind::Appsearch => "appsearch",
            ResourceKind::EnterpriseSearch => "enterprise_search",
            ResourceKind::IntegrationsServer => "integrations_server",
        }
    }

    /// Name used in progress output.
    pub fn title(&self) -> &'static str {
        match self {
            ResourceKind::Elasticsearch => "Elasticsearch",
            ResourceKind::Kibana => "Kibana",
            ResourceKind::Apm => "Apm",
            ResourceKind::Appsearch => "Appsearch",
            ResourceKind::EnterpriseSearch => "EnterpriseSearch",
            ResourceKind::IntegrationsServer => "IntegrationsServer",
        }
    }

    /// Conventional ref id of the first resource of this kind.
    pub fn default_ref_id(&self) -> String {
        format!("main-{}", self.as_str())
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        ResourceKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| {
                Error::validation(format!(
                    "unknown resource kind \"{}\", expected one of: {}",
                    s,
                    ResourceKind::ALL.map(|k| k.as_str()).join(", ")
                ))
            })
    }
}

// ---------------------------------------------------------------------------
// Deployment templates and create payloads
// ---------------------------------------------------------------------------

/// Deployment template as returned by `GET /deployments/templates/<id>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentTemplateInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub deployment_template: DeploymentCreateRequest,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instance_configurations: Vec<Value>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Body of `POST /deployments`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeploymentCreateRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub resources: DeploymentCreateResources,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Per-kind resource payloads. Disabled kinds serialize as `null`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeploymentCreateResources {
    #[serde(default)]
    pub elasticsearch: Vec<ElasticsearchPayload>,
    pub kibana: Option<Vec<KibanaPayload>>,
    pub apm: Option<Vec<ApmPayload>>,
    pub appsearch: Option<Vec<AppSearchPayload>>,
    pub enterprise_search: Option<Vec<EnterpriseSearchPayload>>,
    pub integrations_server: Option<Vec<IntegrationsServerPayload>>,
}

impl DeploymentCreateResources {
    /// Payload slot of a non-Elasticsearch kind.
    pub fn stateless(&self, kind: ResourceKind) -> Option<&Vec<StatelessPayload>> {
        match kind {
            ResourceKind::Elasticsearch => None,
            ResourceKind::Kibana => self.kibana.as_ref(),
            ResourceKind::Apm => self.apm.as_ref(),
            ResourceKind::Appsearch => self.appsearch.as_ref(),
            ResourceKind::EnterpriseSearch => self.enterprise_search.as_ref(),
            ResourceKind::IntegrationsServer => self.integrations_server.as_ref(),
        }
    }

    pub fn set_stateless(&mut self, kind: ResourceKind, payloads: Option<Vec<StatelessPayload>>) {
        match kind {
            ResourceKind::Elasticsearch => {}
            ResourceKind::Kibana => self.kibana = payloads,
            ResourceKind::Apm => self.apm = payloads,
            ResourceKind::Appsearch => self.appsearch = payloads,
            ResourceKind::EnterpriseSearch => self.enterprise_search = payloads,
            ResourceKind::IntegrationsServer => self.integrations_server = payloads,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElasticsearchPayload {
    #[serde(default)]
    pub ref_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub plan: ElasticsearchClusterPlan,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<ElasticsearchClusterSettings>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ElasticsearchClusterPlan {
    #[serde(default)]
    pub cluster_topology: Vec<ElasticsearchTopologyElement>,
    #[serde(default)]
    pub elasticsearch: ElasticsearchConfiguration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_template: Option<DeploymentTemplateReference>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ElasticsearchConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub user_plugins: Vec<ElasticsearchUserPlugin>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElasticsearchUserPlugin {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub elasticsearch_version: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ElasticsearchClusterSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedicated_masters_threshold: Option<i32>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentTemplateReference {
    pub id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ElasticsearchTopologyElement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_configuration_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<TopologySize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone_count: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_type: Option<ElasticsearchNodeType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_roles: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Pre-7.10 boolean node type flags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElasticsearchNodeType {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingest: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ml: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologySize {
    pub resource: String,
    pub value: i32,
}

impl TopologySize {
    pub fn memory(value: i32) -> Self {
        Self {
            resource: "memory".to_string(),
            value,
        }
    }
}

/// Payload shape shared by every non-Elasticsearch kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatelessPayload {
    #[serde(default)]
    pub elasticsearch_cluster_ref_id: String,
    #[serde(default)]
    pub ref_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub plan: StatelessPlan,
    #[serde(flatten)]
    pub extra: Extra,
}

pub type KibanaPayload = StatelessPayload;
pub type ApmPayload = StatelessPayload;
pub type AppSearchPayload = StatelessPayload;
pub type EnterpriseSearchPayload = StatelessPayload;
pub type IntegrationsServerPayload = StatelessPayload;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatelessPlan {
    #[serde(default)]
    pub cluster_topology: Vec<StatelessTopologyElement>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl StatelessPlan {
    /// Set `plan.<kind>.version`, creating the section when the template omits it.
    pub fn set_version(&mut self, kind: ResourceKind, version: &str) {
        let section = self
            .extra
            .entry(kind.as_str().to_string())
            .or_insert_with(|| Value::Object(Default::default()));
        if !section.is_object() {
            *section = Value::Object(Default::default());
        }
        if let Value::Object(map) = section {
            map.insert("version".to_string(), Value::String(version.to_string()));
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatelessTopologyElement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_configuration_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<TopologySize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone_count: Option<i32>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Response of `POST /deployments`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentCreateResponse {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub created: bool,
    #[serde(default)]
    pub resources: Vec<DeploymentResource>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Resource entry of a create response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentResource {
    pub id: String,
    pub kind: ResourceKind,
    pub ref_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct StackVersionsResponse {
    #[serde(default)]
    pub stacks: Vec<StackVersion>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct StackVersion {
    pub version: String,
}

// ---------------------------------------------------------------------------
// Deployments and plans
// ---------------------------------------------------------------------------

/// Response of `GET /deployments/<id>`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeploymentGetResponse {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub resources: DeploymentResources,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeploymentResources {
    #[serde(default)]
    pub elasticsearch: Vec<ResourceInfo>,
    #[serde(default)]
    pub kibana: Vec<ResourceInfo>,
    #[serde(default)]
    pub apm: Vec<ResourceInfo>,
    #[serde(default)]
    pub appsearch: Vec<ResourceInfo>,
    #[serde(default)]
    pub enterprise_search: Vec<ResourceInfo>,
    #[serde(default)]
    pub integrations_server: Vec<ResourceInfo>,
}

impl DeploymentResources {
    pub fn of_kind(&self, kind: ResourceKind) -> &[ResourceInfo] {
        match kind {
            ResourceKind::Elasticsearch => &self.elasticsearch,
            ResourceKind::Kibana => &self.kibana,
            ResourceKind::Apm => &self.apm,
            ResourceKind::Appsearch => &self.appsearch,
            ResourceKind::EnterpriseSearch => &self.enterprise_search,
            ResourceKind::IntegrationsServer => &self.integrations_server,
        }
    }

    pub fn of_kind_mut(&mut self, kind: ResourceKind) -> &mut Vec<ResourceInfo> {
        match kind {
            ResourceKind::Elasticsearch => &mut self.elasticsearch,
            ResourceKind::Kibana => &mut self.kibana,
            ResourceKind::Apm => &mut self.apm,
            ResourceKind::Appsearch => &mut self.appsearch,
            ResourceKind::EnterpriseSearch => &mut self.enterprise_search,
            ResourceKind::IntegrationsServer => &mut self.integrations_server,
        }
    }

    /// Every resource paired with its kind, Elasticsearch first.
    pub fn iter(&self) -> impl Iterator<Item = (ResourceKind, &ResourceInfo)> {
        ResourceKind::ALL
            .into_iter()
            .flat_map(move |kind| self.of_kind(kind).iter().map(move |r| (kind, r)))
    }
}

/// Response of `GET /deployments/<id>/<kind>/<ref_id>`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceInfo {
    pub id: String,
    #[serde(default)]
    pub ref_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default)]
    pub info: ResourceDetails,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceDetails {
    #[serde(default)]
    pub plan_info: PlanInfo,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<PlanAttempt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<PlanAttempt>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<PlanAttempt>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanAttempt {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_attempt_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt_start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt_end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthy: Option<bool>,
    #[serde(default)]
    pub plan_attempt_log: Vec<StepLog>,
}

/// One entry of a plan attempt log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepLog {
    pub step_id: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_in_millis: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub info_log: Vec<StepInfoLog>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<StepStage>,
}

impl StepLog {
    pub fn is_plan_completed(&self) -> bool {
        self.step_id == PLAN_COMPLETED_STEP
    }

    /// Message of the most recent info log entry.
    pub fn last_info(&self) -> Option<&str> {
        self.info_log
            .last()
            .map(|entry| entry.message.as_str())
            .filter(|m| !m.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Success,
    Error,
    Warning,
}

impl StepStatus {
    /// Whether a step with this status will not change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepStatus::Success | StepStatus::Error | StepStatus::Warning)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::InProgress => "in_progress",
            StepStatus::Success => "success",
            StepStatus::Error => "error",
            StepStatus::Warning => "warning",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStage {
    Starting,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepInfoLog {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct DeploymentsSearchResponse {
    #[serde(default)]
    pub deployments: Vec<DeploymentSearchEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct DeploymentSearchEntry {
    pub id: String,
}

// ---------------------------------------------------------------------------
// Allocators
// ---------------------------------------------------------------------------

/// Response of `GET /platform/infrastructure/allocators/<id>`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AllocatorInfo {
    pub allocator_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AllocatorHealth>,
    #[serde(default)]
    pub instances: Vec<AllocatorInstance>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AllocatorHealth {
    #[serde(default)]
    pub connected: bool,
    #[serde(default)]
    pub healthy: bool,
    #[serde(default)]
    pub maintenance_mode: bool,
}

/// Resource instance hosted on an allocator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocatorInstance {
    pub cluster_id: String,
    pub cluster_type: ResourceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,
    #[serde(default)]
    pub instance_name: String,
    #[serde(default)]
    pub node_memory: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moving: Option<bool>,
}

/// Plan settings applied to a moved resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanOverrides {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preferred_allocators: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_snapshot: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_data_migration: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_failsafe: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransientPlanConfiguration {
    pub plan_configuration: PlanOverrides,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveClusterConfiguration {
    pub cluster_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_override: Option<TransientPlanConfiguration>,
}

/// Body of the allocator vacate call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MoveClustersRequest {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub elasticsearch_clusters: Vec<MoveClusterConfiguration>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kibana_clusters: Vec<MoveClusterConfiguration>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub apm_clusters: Vec<MoveClusterConfiguration>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub appsearch_clusters: Vec<MoveClusterConfiguration>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enterprise_search_clusters: Vec<MoveClusterConfiguration>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub integrations_server_clusters: Vec<MoveClusterConfiguration>,
}

impl MoveClustersRequest {
    /// Request moving exactly one resource.
    pub fn single(kind: ResourceKind, resource_id: &str, overrides: &PlanOverrides) -> Self {
        let mut request = Self::default();
        let plan_override = if overrides == &PlanOverrides::default() {
            None
        } else {
            Some(TransientPlanConfiguration {
                plan_configuration: overrides.clone(),
            })
        };
        request.of_kind_mut(kind).push(MoveClusterConfiguration {
            cluster_ids: vec![resource_id.to_string()],
            plan_override,
        });
        request
    }

    pub fn of_kind(&self, kind: ResourceKind) -> &[MoveClusterConfiguration] {
        match kind {
            ResourceKind::Elasticsearch => &self.elasticsearch_clusters,
            ResourceKind::Kibana => &self.kibana_clusters,
            ResourceKind::Apm => &self.apm_clusters,
            ResourceKind::Appsearch => &self.appsearch_clusters,
            ResourceKind::EnterpriseSearch => &self.enterprise_search_clusters,
            ResourceKind::IntegrationsServer => &self.integrations_server_clusters,
        }
    }

    fn of_kind_mut(&mut self, kind: ResourceKind) -> &mut Vec<MoveClusterConfiguration> {
        match kind {
            ResourceKind::Elasticsearch => &mut self.elasticsearch_clusters,
            ResourceKind::Kibana => &mut self.kibana_clusters,
            ResourceKind::Apm => &mut self.apm_clusters,
            ResourceKind::Appsearch => &mut self.appsearch_clusters,
            ResourceKind::EnterpriseSearch => &mut self.enterprise_search_clusters,
            ResourceKind::IntegrationsServer => &mut self.integrations_server_clusters,
        }
    }
}

/// Parameters of the allocator vacate call.
#[derive(Debug, Clone, PartialEq)]
pub struct VacateRequest {
    pub allocator_id: String,
    pub allocator_down: Option<bool>,
    pub move_only: bool,
    pub body: MoveClustersRequest,
}

/// Response of the allocator vacate call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MoveClustersResponse {
    #[serde(default)]
    pub moves: MoveClustersDetails,
    #[serde(default)]
    pub failures: MoveClustersDetails,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MoveClustersDetails {
    #[serde(default)]
    pub elasticsearch: Vec<MoveClusterResult>,
    #[serde(default)]
    pub kibana: Vec<MoveClusterResult>,
    #[serde(default)]
    pub apm: Vec<MoveClusterResult>,
    #[serde(default)]
    pub appsearch: Vec<MoveClusterResult>,
    #[serde(default)]
    pub enterprise_search: Vec<MoveClusterResult>,
    #[serde(default)]
    pub integrations_server: Vec<MoveClusterResult>,
}

impl MoveClustersDetails {
    pub fn of_kind(&self, kind: ResourceKind) -> &[MoveClusterResult] {
        match kind {
            ResourceKind::Elasticsearch => &self.elasticsearch,
            ResourceKind::Kibana => &self.kibana,
            ResourceKind::Apm => &self.apm,
            ResourceKind::Appsearch => &self.appsearch,
            ResourceKind::EnterpriseSearch => &self.enterprise_search,
            ResourceKind::IntegrationsServer => &self.integrations_server,
        }
    }

    pub fn of_kind_mut(&mut self, kind: ResourceKind) -> &mut Vec<MoveClusterResult> {
        match kind {
            ResourceKind::Elasticsearch => &mut self.elasticsearch,
            ResourceKind::Kibana => &mut self.kibana,
            ResourceKind::Apm => &mut self.apm,
            ResourceKind::Appsearch => &mut self.appsearch,
            ResourceKind::EnterpriseSearch => &mut self.enterprise_search,
            ResourceKind::IntegrationsServer => &mut self.integrations_server,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (ResourceKind, &MoveClusterResult)> {
        ResourceKind::ALL
            .into_iter()
            .flat_map(move |kind| self.of_kind(kind).iter().map(move |r| (kind, r)))
    }

    pub fn find(&self, kind: ResourceKind, resource_id: &str) -> Option<&MoveClusterResult> {
        self.of_kind(kind).iter().find(|r| r.cluster_id == resource_id)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MoveClusterResult {
    pub cluster_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<MoveClusterError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calculated_plan: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MoveClusterError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

impl fmt::Display for MoveClusterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code.is_empty(), self.message.is_empty()) {
            (false, false) => write!(f, "{}: {}", self.code, self.message),
            (false, true) => f.write_str(&self.code),
            _ => f.write_str(&self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_kind_parsing() {
        assert_eq!("kibana".parse::<ResourceKind>().unwrap(), ResourceKind::Kibana);
        assert_eq!(
            "enterprise-search".parse::<ResourceKind>().unwrap(),
            ResourceKind::EnterpriseSearch
        );
        assert!("logstash".parse::<ResourceKind>().is_err());
        assert_eq!(ResourceKind::IntegrationsServer.title(), "IntegrationsServer");
        assert_eq!(ResourceKind::Apm.default_ref_id(), "main-apm");
    }

    #[test]
    fn test_disabled_kinds_serialize_as_null() {
        let resources = DeploymentCreateResources::default();
        let json = serde_json::to_value(&resources).unwrap();
        assert_eq!(json["elasticsearch"], serde_json::json!([]));
        assert!(json["apm"].is_null());
        assert!(json["integrations_server"].is_null());
        assert!(json.as_object().unwrap().contains_key("appsearch"));
    }

    #[test]
    fn test_plan_attempt_parsing() {
        let json = r#"{
            "plan_attempt_id": "attempt-1",
            "attempt_start_time": "2021-01-01T10:00:00Z",
            "plan_attempt_log": [
                {"step_id": "plan-validation", "status": "success", "started": "2021-01-01T10:00:00Z"},
                {"step_id": "waiting-for-some-step", "status": "in_progress", "stage": "in_progress",
                 "info_log": [{"message": "first"}, {"message": "second"}]}
            ]
        }"#;
        let attempt: PlanAttempt = serde_json::from_str(json).unwrap();
        assert_eq!(attempt.plan_attempt_log.len(), 2);
        assert_eq!(attempt.plan_attempt_log[1].status, StepStatus::InProgress);
        assert_eq!(attempt.plan_attempt_log[1].last_info(), Some("second"));
        assert!(!attempt.plan_attempt_log[0].is_plan_completed());
    }

    #[test]
    fn test_unknown_fields_round_trip_in_order() {
        let json = r#"{"instance_configuration_id":"aws.data","zone_count":2,"zeta":1,"alpha":{"b":2}}"#;
        let element: StatelessTopologyElement = serde_json::from_str(json).unwrap();
        assert_eq!(serde_json::to_string(&element).unwrap(), json);
    }

    #[test]
    fn test_single_move_request() {
        let overrides = PlanOverrides {
            preferred_allocators: vec!["i-2".to_string()],
            skip_snapshot: Some(true),
            ..Default::default()
        };
        let request = MoveClustersRequest::single(ResourceKind::Kibana, "abc", &overrides);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "kibana_clusters": [{
                    "cluster_ids": ["abc"],
                    "plan_override": {"plan_configuration": {
                        "preferred_allocators": ["i-2"],
                        "skip_snapshot": true
                    }}
                }]
            })
        );

        let plain = MoveClustersRequest::single(ResourceKind::Apm, "def", &PlanOverrides::default());
        assert!(plain.apm_clusters[0].plan_override.is_none());
    }

    #[test]
    fn test_stateless_plan_set_version() {
        let mut plan = StatelessPlan::default();
        plan.set_version(ResourceKind::Kibana, "7.11.2");
        assert_eq!(plan.extra["kibana"]["version"], "7.11.2");
    }
}
