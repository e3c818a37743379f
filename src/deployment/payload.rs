//! Builds deployment create requests from a deployment template.
//!
//! [`build_payload`] is pure: given the same template snapshot and options
//! it always produces the same request. [`new_payload`] resolves the stack
//! version and fetches the template first.

use semver::Version;
use serde::Deserialize;

use crate::api::models::{
    DeploymentCreateRequest, DeploymentTemplateInfo, DeploymentTemplateReference,
    ElasticsearchClusterSettings, ElasticsearchNodeType, ElasticsearchPayload,
    ElasticsearchTopologyElement, ElasticsearchUserPlugin, ResourceKind, StatelessPayload,
    TopologySize,
};
use crate::api::{PlatformApi, TemplateQuery};
use crate::{Error, Result};

/// Lowest stack version deployments can be created with.
const MIN_VERSION: Version = Version::new(6, 0, 0);

/// First version whose topology uses `node_roles` instead of `node_type`.
const NODE_ROLES_VERSION: Version = Version::new(7, 10, 0);

pub const DEDICATED_MASTERS_THRESHOLD: i32 = 6;

pub const DEFAULT_TEMPLATE_ID: &str = "default";

/// Ref id, size and zone count of one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSpec {
    pub ref_id: String,
    /// Memory per zone in MB. Zero keeps the template value.
    pub size_mb: i32,
    /// Zero keeps the template value.
    pub zone_count: i32,
}

impl ResourceSpec {
    pub fn new(kind: ResourceKind, size_mb: i32, zone_count: i32) -> Self {
        Self {
            ref_id: kind.default_ref_id(),
            size_mb,
            zone_count,
        }
    }
}

/// User choices layered over the template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadOptions {
    pub name: Option<String>,
    pub region: String,
    pub template_id: String,
    /// Empty picks the latest available version.
    pub version: Option<String>,
    pub elasticsearch: ResourceSpec,
    pub kibana: Option<ResourceSpec>,
    pub apm: Option<ResourceSpec>,
    pub appsearch: Option<ResourceSpec>,
    pub enterprise_search: Option<ResourceSpec>,
    pub integrations_server: Option<ResourceSpec>,
    /// Raw `--topology-element` JSON fragments.
    pub topology_elements: Vec<String>,
    /// `name` or `name=url`.
    pub plugins: Vec<String>,
}

impl Default for PayloadOptions {
    fn default() -> Self {
        Self {
            name: None,
            region: String::new(),
            template_id: DEFAULT_TEMPLATE_ID.to_string(),
            version: None,
            elasticsearch: ResourceSpec::new(ResourceKind::Elasticsearch, 0, 0),
            kibana: Some(ResourceSpec::new(ResourceKind::Kibana, 0, 0)),
            apm: None,
            appsearch: None,
            enterprise_search: None,
            integrations_server: None,
            topology_elements: Vec::new(),
            plugins: Vec::new(),
        }
    }
}

impl PayloadOptions {
    fn stateless(&self, kind: ResourceKind) -> Option<&ResourceSpec> {
        match kind {
            ResourceKind::Elasticsearch => None,
            ResourceKind::Kibana => self.kibana.as_ref(),
            ResourceKind::Apm => self.apm.as_ref(),
            ResourceKind::Appsearch => self.appsearch.as_ref(),
            ResourceKind::EnterpriseSearch => self.enterprise_search.as_ref(),
            ResourceKind::IntegrationsServer => self.integrations_server.as_ref(),
        }
    }
}

/// `--topology-element` flag value.
#[derive(Debug, Deserialize)]
struct TopologyElementFlag {
    name: String,
    #[serde(default)]
    size: i32,
    #[serde(default)]
    zone_count: i32,
}

/// Resolve the version, fetch the template and build the request.
pub async fn new_payload(api: &dyn PlatformApi, options: &PayloadOptions) -> Result<DeploymentCreateRequest> {
    let version = match options.version.as_deref().filter(|v| !v.is_empty()) {
        Some(version) => version.to_string(),
        None => latest_version(api).await?,
    };
    // Reject bad versions before any template traffic.
    parse_version(&version)?;

    let query = TemplateQuery {
        template_id: options.template_id.clone(),
        region: options.region.clone(),
        stack_version: Some(version.clone()),
        show_instance_configurations: true,
    };
    let template = match api.get_deployment_template(&query).await {
        Ok(template) => template,
        Err(Error::Remote { status: 404, .. }) => {
            return Err(Error::TemplateNotFound {
                template_id: options.template_id.clone(),
            })
        }
        Err(e) => return Err(e),
    };

    build_payload(&template, options, &version)
}

async fn latest_version(api: &dyn PlatformApi) -> Result<String> {
    let versions = api.list_stack_versions().await?;
    let latest = versions
        .into_iter()
        .next()
        .ok_or_else(|| Error::validation("no stack versions are available in the region"))?;
    tracing::debug!(version = %latest, "using latest stack version");
    Ok(latest)
}

/// Parse a stack version, accepting `major.minor` shorthand.
pub fn parse_version(version: &str) -> Result<Version> {
    let trimmed = version.trim().trim_start_matches('v');
    let parsed = Version::parse(trimmed)
        .or_else(|_| Version::parse(&format!("{}.0", trimmed)))
        .map_err(|e| Error::IncompatibleVersion {
            version: version.to_string(),
            reason: e.to_string(),
        })?;
    if parsed < MIN_VERSION {
        return Err(Error::IncompatibleVersion {
            version: version.to_string(),
            reason: format!("minimum supported version is {}", MIN_VERSION),
        });
    }
    Ok(parsed)
}

/// Build a create request from a frozen template snapshot.
pub fn build_payload(
    template: &DeploymentTemplateInfo,
    options: &PayloadOptions,
    version: &str,
) -> Result<DeploymentCreateRequest> {
    let parsed = parse_version(version)?;
    let use_node_roles = parsed >= NODE_ROLES_VERSION;

    let mut request = template.deployment_template.clone();
    request.name = options.name.clone().filter(|n| !n.is_empty());

    let elasticsearch = build_elasticsearch(template, options, version, use_node_roles)?;
    let es_ref_id = elasticsearch.ref_id.clone();
    request.resources.elasticsearch = vec![elasticsearch];

    for kind in ResourceKind::ALL.into_iter().skip(1) {
        let payload = match options.stateless(kind) {
            Some(spec) => build_stateless(template, kind, spec, &es_ref_id, &options.region, version),
            None => None,
        };
        request.resources.set_stateless(kind, payload.map(|p| vec![p]));
    }

    Ok(request)
}

fn build_elasticsearch(
    template: &DeploymentTemplateInfo,
    options: &PayloadOptions,
    version: &str,
    use_node_roles: bool,
) -> Result<ElasticsearchPayload> {
    let mut payload = template
        .deployment_template
        .resources
        .elasticsearch
        .first()
        .cloned()
        .ok_or_else(|| {
            Error::validation(format!(
                "deployment template {} has no elasticsearch resource",
                options.template_id
            ))
        })?;

    payload.ref_id = options.elasticsearch.ref_id.clone();
    if !options.region.is_empty() {
        payload.region = Some(options.region.clone());
    }
    payload.plan.elasticsearch.version = Some(version.to_string());
    if payload.plan.deployment_template.is_none() {
        payload.plan.deployment_template = Some(DeploymentTemplateReference {
            id: options.template_id.clone(),
        });
    }

    let mut topology = if options.topology_elements.is_empty() {
        let mut topology = payload.plan.cluster_topology.clone();
        if let Some(index) = default_data_element(&topology) {
            apply_size(&mut topology[index], options.elasticsearch.size_mb, options.elasticsearch.zone_count);
        }
        topology
    } else {
        select_topology(&payload.plan.cluster_topology, &options.topology_elements)?
    };
    for element in &mut topology {
        normalize_node_roles(element, use_node_roles);
    }
    payload.plan.cluster_topology = topology;

    for plugin in &options.plugins {
        let plugin = parse_plugin(plugin, version)?;
        if !payload.plan.elasticsearch.user_plugins.contains(&plugin) {
            payload.plan.elasticsearch.user_plugins.push(plugin);
        }
    }

    payload
        .settings
        .get_or_insert_with(ElasticsearchClusterSettings::default)
        .dedicated_masters_threshold = Some(DEDICATED_MASTERS_THRESHOLD);

    Ok(payload)
}

fn build_stateless(
    template: &DeploymentTemplateInfo,
    kind: ResourceKind,
    spec: &ResourceSpec,
    es_ref_id: &str,
    region: &str,
    version: &str,
) -> Option<StatelessPayload> {
    let Some(mut payload) = template
        .deployment_template
        .resources
        .stateless(kind)
        .and_then(|payloads| payloads.first().cloned())
    else {
        tracing::warn!(kind = %kind, "deployment template has no {} resource, skipping it", kind);
        return None;
    };

    payload.ref_id = spec.ref_id.clone();
    payload.elasticsearch_cluster_ref_id = es_ref_id.to_string();
    if !region.is_empty() {
        payload.region = Some(region.to_string());
    }
    payload.plan.set_version(kind, version);
    if let Some(element) = payload.plan.cluster_topology.first_mut() {
        if spec.size_mb > 0 {
            element.size = Some(TopologySize::memory(spec.size_mb));
        }
        if spec.zone_count > 0 {
            element.zone_count = Some(spec.zone_count);
        }
    }
    Some(payload)
}

/// Template element id a `--topology-element` name refers to.
fn topology_id(name: &str) -> Option<&'static str> {
    match name {
        "data" | "hot_content" => Some("hot_content"),
        "warm" => Some("warm"),
        "cold" => Some("cold"),
        "frozen" => Some("frozen"),
        "master" => Some("master"),
        "coordinating" => Some("coordinating"),
        "ml" => Some("ml"),
        _ => None,
    }
}

/// Replace the template topology with the user-specified elements.
fn select_topology(
    template: &[ElasticsearchTopologyElement],
    flags: &[String],
) -> Result<Vec<ElasticsearchTopologyElement>> {
    let mut selected: Vec<ElasticsearchTopologyElement> = Vec::with_capacity(flags.len());
    for raw in flags {
        let flag: TopologyElementFlag = serde_json::from_str(raw).map_err(|e| Error::InvalidTopologyJson {
            message: format!("{}: {}", raw, e),
        })?;
        let unknown = || Error::UnknownTopologyElement {
            name: flag.name.clone(),
        };
        let id = topology_id(&flag.name).ok_or_else(unknown)?;
        let mut element = template
            .iter()
            .find(|e| e.id.as_deref() == Some(id))
            .cloned()
            .ok_or_else(unknown)?;
        apply_size(&mut element, flag.size, flag.zone_count);

        match selected.iter_mut().find(|e| e.id.as_deref() == Some(id)) {
            Some(existing) => *existing = element,
            None => selected.push(element),
        }
    }
    Ok(selected)
}

fn apply_size(element: &mut ElasticsearchTopologyElement, size_mb: i32, zone_count: i32) {
    if size_mb > 0 {
        element.size = Some(TopologySize::memory(size_mb));
    }
    if zone_count > 0 {
        element.zone_count = Some(zone_count);
    }
}

/// Element `--size` and `--zones` apply to when no topology element is given.
fn default_data_element(topology: &[ElasticsearchTopologyElement]) -> Option<usize> {
    topology
        .iter()
        .position(|e| e.id.as_deref() == Some("hot_content"))
        .or_else(|| {
            topology.iter().position(|e| {
                e.node_type.as_ref().and_then(|t| t.data).unwrap_or(false)
                    || e.node_roles
                        .as_ref()
                        .map_or(false, |roles| roles.iter().any(|r| r.starts_with("data")))
            })
        })
        .or(if topology.is_empty() { None } else { Some(0) })
}

/// Keep exactly one of `node_type` and `node_roles`, deriving the kept one when missing.
fn normalize_node_roles(element: &mut ElasticsearchTopologyElement, use_node_roles: bool) {
    if use_node_roles {
        if element.node_roles.is_none() {
            element.node_roles = element.node_type.as_ref().map(roles_from_node_type);
        }
        element.node_type = None;
    } else {
        if element.node_type.is_none() {
            element.node_type = element.node_roles.as_deref().map(node_type_from_roles);
        }
        element.node_roles = None;
    }
}

fn roles_from_node_type(node_type: &ElasticsearchNodeType) -> Vec<String> {
    let mut roles = Vec::new();
    if node_type.master == Some(true) {
        roles.push("master");
    }
    if node_type.ingest == Some(true) {
        roles.push("ingest");
    }
    if node_type.data == Some(true) {
        roles.extend(["data_hot", "data_content"]);
    }
    if node_type.ml == Some(true) {
        roles.push("ml");
    }
    roles.push("remote_cluster_client");
    roles.into_iter().map(String::from).collect()
}

fn node_type_from_roles(roles: &[String]) -> ElasticsearchNodeType {
    let has = |role: &str| roles.iter().any(|r| r == role);
    ElasticsearchNodeType {
        data: Some(roles.iter().any(|r| r.starts_with("data"))),
        ingest: Some(has("ingest")),
        master: Some(has("master")),
        ml: has("ml").then_some(true),
    }
}

fn parse_plugin(raw: &str, version: &str) -> Result<ElasticsearchUserPlugin> {
    let (name, url) = match raw.split_once('=') {
        Some((name, url)) => (name.trim(), Some(url.trim().to_string())),
        None => (raw.trim(), None),
    };
    if name.is_empty() || url.as_deref() == Some("") {
        return Err(Error::validation(format!(
            "invalid plugin \"{}\", expected <name> or <name>=<url>",
            raw
        )));
    }
    Ok(ElasticsearchUserPlugin {
        name: name.to_string(),
        url,
        elasticsearch_version: version.to_string(),
    })
}
