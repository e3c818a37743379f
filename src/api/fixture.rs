//! In-memory [`PlatformApi`] used by unit tests.
//!
//! Every call is recorded; plan snapshots are replayed from per-resource
//! scripts whose last entry repeats forever.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};

use super::models::*;
use super::{PlatformApi, TemplateQuery};
use crate::{Error, Result};

/// One scripted answer to a resource poll.
#[derive(Debug, Clone)]
pub enum Poll {
    Snapshot(PlanInfo),
    TransportError,
}

#[derive(Default)]
struct State {
    templates: HashMap<String, DeploymentTemplateInfo>,
    stack_versions: Vec<String>,
    create_response: Option<std::result::Result<DeploymentCreateResponse, (u16, String)>>,
    deployments: HashMap<String, DeploymentGetResponse>,
    owners: HashMap<String, String>,
    resource_ids: HashMap<String, String>,
    polls: HashMap<String, VecDeque<Poll>>,
    allocators: HashMap<String, AllocatorInfo>,
    rejected_moves: HashSet<String>,
    failed_dispatches: HashSet<String>,
    maintenance_failures: HashSet<String>,
    user_status: Option<u16>,
    deployments_status: Option<u16>,
    lookup_failures: usize,

    calls: Vec<String>,
    template_queries: Vec<TemplateQuery>,
    create_requests: Vec<(String, DeploymentCreateRequest)>,
    vacate_requests: Vec<VacateRequest>,
    maintenance: Vec<(String, bool)>,
}

pub struct FixtureApi {
    state: Mutex<State>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    move_latency: Duration,
}

impl Default for FixtureApi {
    fn default() -> Self {
        Self::new()
    }
}

impl FixtureApi {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            move_latency: Duration::ZERO,
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn lookup(&self) -> Result<()> {
        let mut state = self.state();
        if state.lookup_failures > 0 {
            state.lookup_failures -= 1;
            return Err(Error::transport("connection reset by peer"));
        }
        Ok(())
    }

    pub fn with_template(mut self, id: &str, template: DeploymentTemplateInfo) -> Self {
        self.state.get_mut().unwrap().templates.insert(id.to_string(), template);
        self
    }

    pub fn with_stack_versions(mut self, versions: &[&str]) -> Self {
        self.state.get_mut().unwrap().stack_versions = versions.iter().map(|v| v.to_string()).collect();
        self
    }

    pub fn with_create_response(mut self, response: DeploymentCreateResponse) -> Self {
        self.state.get_mut().unwrap().create_response = Some(Ok(response));
        self
    }

    pub fn with_create_error(mut self, status: u16, body: &str) -> Self {
        self.state.get_mut().unwrap().create_response = Some(Err((status, body.to_string())));
        self
    }

    /// Register a deployment; its resources become resolvable by id.
    pub fn with_deployment(mut self, deployment: DeploymentGetResponse) -> Self {
        let state = self.state.get_mut().unwrap();
        for (kind, resource) in deployment.resources.iter() {
            state.owners.insert(resource.id.clone(), deployment.id.clone());
            state.resource_ids.insert(
                poll_key(&deployment.id, kind, &resource.ref_id),
                resource.id.clone(),
            );
        }
        state.deployments.insert(deployment.id.clone(), deployment);
        self
    }

    /// Script the plan snapshots returned for one resource.
    pub fn script(mut self, deployment_id: &str, kind: ResourceKind, ref_id: &str, polls: Vec<Poll>) -> Self {
        self.state
            .get_mut()
            .unwrap()
            .polls
            .insert(poll_key(deployment_id, kind, ref_id), polls.into());
        self
    }

    /// The next `count` deployment lookups fail with a transport error.
    pub fn fail_lookups(mut self, count: usize) -> Self {
        self.state.get_mut().unwrap().lookup_failures = count;
        self
    }

    pub fn with_allocator(mut self, allocator: AllocatorInfo) -> Self {
        self.state
            .get_mut()
            .unwrap()
            .allocators
            .insert(allocator.allocator_id.clone(), allocator);
        self
    }

    /// The move call answers with an error entry for this resource.
    pub fn reject_move(mut self, resource_id: &str) -> Self {
        self.state.get_mut().unwrap().rejected_moves.insert(resource_id.to_string());
        self
    }

    /// The move call fails at the transport level for this resource.
    pub fn fail_dispatch(mut self, resource_id: &str) -> Self {
        self.state.get_mut().unwrap().failed_dispatches.insert(resource_id.to_string());
        self
    }

    pub fn fail_maintenance(mut self, allocator_id: &str) -> Self {
        self.state
            .get_mut()
            .unwrap()
            .maintenance_failures
            .insert(allocator_id.to_string());
        self
    }

    pub fn with_move_latency(mut self, latency: Duration) -> Self {
        self.move_latency = latency;
        self
    }

    pub fn with_user_status(mut self, status: u16) -> Self {
        self.state.get_mut().unwrap().user_status = Some(status);
        self
    }

    pub fn with_deployments_status(mut self, status: u16) -> Self {
        self.state.get_mut().unwrap().deployments_status = Some(status);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn template_queries(&self) -> Vec<TemplateQuery> {
        self.state().template_queries.clone()
    }

    pub fn create_requests(&self) -> Vec<(String, DeploymentCreateRequest)> {
        self.state().create_requests.clone()
    }

    pub fn vacate_requests(&self) -> Vec<VacateRequest> {
        self.state().vacate_requests.clone()
    }

    pub fn maintenance(&self) -> Vec<(String, bool)> {
        self.state().maintenance.clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn record(&self, call: String) {
        self.state().calls.push(call);
    }
}

fn poll_key(deployment_id: &str, kind: ResourceKind, ref_id: &str) -> String {
    format!("{}/{}/{}", deployment_id, kind.as_str(), ref_id)
}

fn not_found(what: &str) -> Error {
    Error::Remote {
        status: 404,
        body: format!(r#"{{"errors":[{{"code":"not_found","message":"{} not found"}}]}}"#, what),
    }
}

fn status_error(status: u16) -> Error {
    Error::Remote {
        status,
        body: "{}".to_string(),
    }
}

#[async_trait]
impl PlatformApi for FixtureApi {
    async fn get_deployment_template(&self, query: &TemplateQuery) -> Result<DeploymentTemplateInfo> {
        self.record(format!("GET /deployments/templates/{}", query.template_id));
        let mut state = self.state();
        state.template_queries.push(query.clone());
        state
            .templates
            .get(&query.template_id)
            .cloned()
            .ok_or_else(|| not_found(&query.template_id))
    }

    async fn list_stack_versions(&self) -> Result<Vec<String>> {
        self.record("GET /stack/versions".to_string());
        Ok(self.state().stack_versions.clone())
    }

    async fn create_deployment(
        &self,
        request_id: &str,
        request: &DeploymentCreateRequest,
    ) -> Result<DeploymentCreateResponse> {
        self.record(format!("POST /deployments?request_id={}", request_id));
        let mut state = self.state();
        state
            .create_requests
            .push((request_id.to_string(), request.clone()));
        match state.create_response.clone() {
            Some(Ok(response)) => Ok(response),
            Some(Err((status, body))) => Err(Error::Remote { status, body }),
            None => Err(status_error(500)),
        }
    }

    async fn get_deployment(&self, deployment_id: &str) -> Result<DeploymentGetResponse> {
        self.record(format!("GET /deployments/{}", deployment_id));
        self.lookup()?;
        self.state()
            .deployments
            .get(deployment_id)
            .cloned()
            .ok_or_else(|| not_found(deployment_id))
    }

    async fn get_resource(
        &self,
        deployment_id: &str,
        kind: ResourceKind,
        ref_id: &str,
    ) -> Result<ResourceInfo> {
        let key = poll_key(deployment_id, kind, ref_id);
        self.record(format!("GET /deployments/{}", key));
        let mut state = self.state();
        let id = state
            .resource_ids
            .get(&key)
            .cloned()
            .unwrap_or_else(|| format!("{}-id", ref_id));
        let queue = state.polls.get_mut(&key).ok_or_else(|| not_found(&key))?;
        let next = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        match next {
            Some(Poll::Snapshot(plan_info)) => Ok(ResourceInfo {
                id,
                ref_id: ref_id.to_string(),
                region: None,
                info: ResourceDetails {
                    plan_info,
                    extra: Default::default(),
                },
            }),
            Some(Poll::TransportError) => Err(Error::transport("connection reset by peer")),
            None => Err(not_found(&key)),
        }
    }

    async fn find_deployment_id(&self, kind: ResourceKind, resource_id: &str) -> Result<Option<String>> {
        self.record(format!("POST /deployments/_search {}:{}", kind, resource_id));
        self.lookup()?;
        Ok(self.state().owners.get(resource_id).cloned())
    }

    async fn get_allocator(&self, allocator_id: &str) -> Result<AllocatorInfo> {
        self.record(format!("GET /platform/infrastructure/allocators/{}", allocator_id));
        self.state()
            .allocators
            .get(allocator_id)
            .cloned()
            .ok_or_else(|| not_found(allocator_id))
    }

    async fn vacate_allocator(&self, request: &VacateRequest) -> Result<MoveClustersResponse> {
        self.record(format!("POST /platform/infrastructure/allocators/{}/_vacate", request.allocator_id));

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if !self.move_latency.is_zero() {
            tokio::time::sleep(self.move_latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut state = self.state();
        state.vacate_requests.push(request.clone());

        let mut response = MoveClustersResponse::default();
        for kind in ResourceKind::ALL {
            for config in request.body.of_kind(kind) {
                for cluster_id in &config.cluster_ids {
                    if state.failed_dispatches.contains(cluster_id) {
                        return Err(Error::transport("connection refused"));
                    }
                    if state.rejected_moves.contains(cluster_id) {
                        response.failures.of_kind_mut(kind).push(MoveClusterResult {
                            cluster_id: cluster_id.clone(),
                            errors: vec![MoveClusterError {
                                code: "clusters.cluster_plan_state_error".to_string(),
                                message: "There is a plan still pending".to_string(),
                            }],
                            calculated_plan: None,
                        });
                    } else {
                        response.moves.of_kind_mut(kind).push(MoveClusterResult {
                            cluster_id: cluster_id.clone(),
                            errors: Vec::new(),
                            calculated_plan: Some(json!({})),
                        });
                    }
                }
            }
        }
        Ok(response)
    }

    async fn set_allocator_maintenance(&self, allocator_id: &str, enabled: bool) -> Result<()> {
        let action = if enabled { "_start" } else { "_stop" };
        self.record(format!(
            "POST /platform/infrastructure/allocators/{}/maintenance-mode/{}",
            allocator_id, action
        ));
        let mut state = self.state();
        if state.maintenance_failures.contains(allocator_id) {
            return Err(status_error(500));
        }
        state.maintenance.push((allocator_id.to_string(), enabled));
        Ok(())
    }

    async fn current_user(&self) -> Result<Value> {
        self.record("GET /users/me".to_string());
        match self.state().user_status {
            Some(status) => Err(status_error(status)),
            None => Ok(json!({ "user_id": "fixture" })),
        }
    }

    async fn list_deployments(&self) -> Result<Value> {
        self.record("GET /deployments".to_string());
        match self.state().deployments_status {
            Some(status) => Err(status_error(status)),
            None => Ok(json!({ "deployments": [] })),
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot builders
// ---------------------------------------------------------------------------

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2021, 1, 1, 10, 0, 0).unwrap()
}

/// Step started `offset_secs` after the attempt started.
pub fn step(step_id: &str, status: StepStatus, offset_secs: i64) -> StepLog {
    let started = base_time() + chrono::Duration::seconds(offset_secs);
    StepLog {
        step_id: step_id.to_string(),
        status,
        started: Some(started),
        completed: status.is_terminal().then_some(started),
        duration_in_millis: None,
        info_log: Vec::new(),
        stage: None,
    }
}

pub fn attempt(steps: Vec<StepLog>) -> PlanAttempt {
    PlanAttempt {
        plan_attempt_id: Some("attempt-1".to_string()),
        attempt_start_time: Some(base_time()),
        attempt_end_time: None,
        healthy: None,
        plan_attempt_log: steps,
    }
}

pub fn pending(steps: Vec<StepLog>) -> Poll {
    Poll::Snapshot(PlanInfo {
        current: None,
        pending: Some(attempt(steps)),
        history: Vec::new(),
    })
}

pub fn current(steps: Vec<StepLog>) -> Poll {
    Poll::Snapshot(PlanInfo {
        current: Some(attempt(steps)),
        pending: None,
        history: Vec::new(),
    })
}

pub fn empty() -> Poll {
    Poll::Snapshot(PlanInfo::default())
}

/// A pending plan running `waiting-for-some-step` followed by its completion.
pub fn running_then_completed() -> Vec<Poll> {
    vec![
        pending(vec![step("waiting-for-some-step", StepStatus::InProgress, 0)]),
        current(vec![
            step("waiting-for-some-step", StepStatus::Success, 0),
            step(PLAN_COMPLETED_STEP, StepStatus::Success, 65),
        ]),
    ]
}

pub fn resource(id: &str, ref_id: &str) -> ResourceInfo {
    ResourceInfo {
        id: id.to_string(),
        ref_id: ref_id.to_string(),
        region: None,
        info: ResourceDetails::default(),
    }
}

pub fn instance(cluster_id: &str, kind: ResourceKind, deployment_id: &str) -> AllocatorInstance {
    AllocatorInstance {
        cluster_id: cluster_id.to_string(),
        cluster_type: kind,
        cluster_name: None,
        instance_name: format!("instance-{}", cluster_id),
        node_memory: 1024,
        deployment_id: Some(deployment_id.to_string()),
        moving: None,
    }
}

pub fn allocator(id: &str, instances: Vec<AllocatorInstance>) -> AllocatorInfo {
    AllocatorInfo {
        allocator_id: id.to_string(),
        zone_id: Some("zone-1".to_string()),
        status: None,
        instances,
    }
}
