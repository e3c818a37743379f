//! Follows plan changes of deployment resources until they finish.
//!
//! One poller task runs per tracked resource. Pollers share nothing but the
//! output sink; each returns its own outcome and the results are aggregated
//! into a [`MultiError`].

pub mod state;

use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use tokio::task::JoinSet;

use crate::api::models::{ResourceKind, StepStatus};
use crate::api::PlatformApi;
use crate::format::helpers::format_duration;
use crate::format::OutputSink;
use crate::{Error, MultiError, Result};

pub use state::{Outcome, PlanTracker, StepLine, Transition};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_NO_PLAN_THRESHOLD: u32 = 2;

/// A resource to follow. Either `deployment_id` or `resource_id` must be set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedResource {
    pub deployment_id: Option<String>,
    pub resource_id: Option<String>,
    pub kind: ResourceKind,
    pub ref_id: Option<String>,
}

impl TrackedResource {
    /// Best available identifier, for messages.
    pub fn label(&self) -> String {
        self.resource_id
            .clone()
            .or_else(|| self.ref_id.clone())
            .unwrap_or_else(|| self.kind.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct TrackParams {
    pub resources: Vec<TrackedResource>,
    pub poll_interval: Duration,
    pub max_retries: u32,
    /// Consecutive polls without a pending plan before giving up on one appearing.
    pub no_plan_threshold: u32,
}

impl Default for TrackParams {
    fn default() -> Self {
        Self {
            resources: Vec::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_retries: DEFAULT_MAX_RETRIES,
            no_plan_threshold: DEFAULT_NO_PLAN_THRESHOLD,
        }
    }
}

/// Fully resolved coordinates of a tracked resource.
#[derive(Debug, Clone)]
struct Target {
    deployment_id: String,
    kind: ResourceKind,
    ref_id: String,
    resource_id: String,
}

impl Target {
    fn prefix(&self) -> String {
        format!(
            "Deployment [{}] - [{}][{}]",
            self.deployment_id,
            self.kind.title(),
            self.resource_id
        )
    }
}

/// Track every resource in `params` to completion.
///
/// Returns an aggregate with one leaf per resource that failed, timed out,
/// never showed a plan or could not be resolved.
pub async fn track_change(api: Arc<dyn PlatformApi>, params: TrackParams, sink: &OutputSink) -> Result<()> {
    let mut tasks = JoinSet::new();
    for resource in params.resources.iter().cloned() {
        let api = api.clone();
        let sink = sink.clone();
        let params = params.clone();
        tasks.spawn(async move { track_resource(api.as_ref(), &resource, &params, &sink).await });
    }

    let mut merr = MultiError::new("deployment track");
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => merr.push(e),
            Err(e) => merr.push(Error::validation(format!("tracking task aborted: {}", e))),
        }
    }
    merr.into_result()
}

/// Track a single resource to completion, emitting progress lines to `sink`.
pub async fn track_resource(
    api: &dyn PlatformApi,
    resource: &TrackedResource,
    params: &TrackParams,
    sink: &OutputSink,
) -> Result<()> {
    let mut target = resolve_with_retries(api, resource, params).await?;
    let mut tracker = PlanTracker::new(params.max_retries, params.no_plan_threshold);
    tracing::debug!(
        deployment_id = %target.deployment_id,
        kind = %target.kind,
        ref_id = %target.ref_id,
        "tracking resource"
    );

    loop {
        let transitions = match api.get_resource(&target.deployment_id, target.kind, &target.ref_id).await {
            Ok(info) => {
                if !info.id.is_empty() {
                    target.resource_id = info.id;
                }
                tracker.observe(&info.info.plan_info)
            }
            Err(e) => {
                tracing::debug!(resource = %target.resource_id, error = %e, "plan poll failed");
                tracker.fetch_failed().into_iter().collect()
            }
        };

        for transition in transitions {
            match transition {
                Transition::Step(line) => sink.emit_line(&render_step(&target, &line, sink.color())),
                Transition::Finished(outcome) => return finish(&target, outcome, sink),
            }
        }

        tokio::time::sleep(params.poll_interval).await;
    }
}

fn finish(target: &Target, outcome: Outcome, sink: &OutputSink) -> Result<()> {
    let resource_id = target.resource_id.clone();
    match outcome {
        Outcome::Succeeded => Ok(()),
        Outcome::Failed { step_id, status } => Err(Error::PlanFailed {
            resource_id,
            step_id,
            status: status.to_string(),
        }),
        Outcome::NoPlan => {
            sink.emit_line(&format!("{}: no plan found", target.prefix()));
            Err(Error::NoPlan { resource_id })
        }
        Outcome::TimedOut { retries } => {
            sink.emit_line(&format!(
                "{}: tracking timed out after {} retries",
                target.prefix(),
                retries
            ));
            Err(Error::TrackTimeout { resource_id, retries })
        }
    }
}

fn render_step(target: &Target, line: &StepLine, color: bool) -> String {
    let phrase = if line.status == StepStatus::Error {
        paint("failed step", color, false)
    } else if line.step_id == crate::api::models::PLAN_COMPLETED_STEP {
        paint("finished running all the plan steps", color, true)
    } else {
        "running step".to_string()
    };

    let mut rendered = format!(
        "{}: {} \"{}\" (Plan duration {})",
        target.prefix(),
        phrase,
        line.step_id,
        format_duration(line.elapsed)
    );
    if let Some(info) = &line.info {
        rendered.push_str(&format!(" ({})", info));
    }
    rendered
}

fn paint(text: &str, color: bool, ok: bool) -> String {
    match (color, ok) {
        (false, _) => text.to_string(),
        (true, true) => text.green().to_string(),
        (true, false) => text.red().to_string(),
    }
}

/// [`resolve`] with transient failures charged to the retry budget.
async fn resolve_with_retries(
    api: &dyn PlatformApi,
    resource: &TrackedResource,
    params: &TrackParams,
) -> Result<Target> {
    let mut failures = 0;
    loop {
        match resolve(api, resource).await {
            Ok(target) => return Ok(target),
            Err(e) if e.is_retryable() => {
                failures += 1;
                tracing::debug!(kind = %resource.kind, failures, error = %e, "resource lookup failed");
                if failures >= params.max_retries {
                    return Err(Error::TrackTimeout {
                        resource_id: resource.label(),
                        retries: failures,
                    });
                }
                tokio::time::sleep(params.poll_interval).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Fill in the deployment id and ref id of a resource.
async fn resolve(api: &dyn PlatformApi, resource: &TrackedResource) -> Result<Target> {
    let deployment_id = match (&resource.deployment_id, &resource.resource_id) {
        (Some(id), _) => id.clone(),
        (None, Some(resource_id)) => api
            .find_deployment_id(resource.kind, resource_id)
            .await?
            .ok_or_else(|| {
                Error::validation(format!(
                    "could not find the deployment for {} resource {}",
                    resource.kind, resource_id
                ))
            })?,
        (None, None) => {
            return Err(Error::validation(format!(
                "either a deployment id or a resource id is required to track a {} resource",
                resource.kind
            )))
        }
    };

    if let Some(ref_id) = &resource.ref_id {
        return Ok(Target {
            resource_id: resource.resource_id.clone().unwrap_or_else(|| ref_id.clone()),
            deployment_id,
            kind: resource.kind,
            ref_id: ref_id.clone(),
        });
    }

    let deployment = api.get_deployment(&deployment_id).await?;
    let found = deployment
        .resources
        .of_kind(resource.kind)
        .iter()
        .find(|r| resource.resource_id.as_deref().map_or(true, |id| r.id == id))
        .ok_or_else(|| {
            Error::validation(format!(
                "deployment {} has no matching {} resource",
                deployment_id, resource.kind
            ))
        })?;

    Ok(Target {
        deployment_id,
        kind: resource.kind,
        ref_id: found.ref_id.clone(),
        resource_id: found.id.clone(),
    })
}

/// One tracked resource per resource of a deployment, optionally filtered.
pub async fn deployment_resources(
    api: &dyn PlatformApi,
    deployment_id: &str,
    kind: Option<ResourceKind>,
    ref_id: Option<&str>,
) -> Result<Vec<TrackedResource>> {
    let deployment = api.get_deployment(deployment_id).await?;
    let resources: Vec<TrackedResource> = deployment
        .resources
        .iter()
        .filter(|(k, _)| kind.map_or(true, |want| *k == want))
        .filter(|(_, r)| ref_id.map_or(true, |want| r.ref_id == want))
        .map(|(k, r)| TrackedResource {
            deployment_id: Some(deployment.id.clone()),
            resource_id: Some(r.id.clone()),
            kind: k,
            ref_id: Some(r.ref_id.clone()),
        })
        .collect();

    if resources.is_empty() {
        return Err(Error::validation(format!(
            "deployment {} has no resources matching the given filters",
            deployment_id
        )));
    }
    Ok(resources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fixture::{self, current, empty, pending, step, FixtureApi, Poll};
    use crate::api::models::{DeploymentGetResponse, DeploymentResources, PLAN_COMPLETED_STEP};
    use crate::format::sink::Captured;

    const DEP: &str = "0123456789abcdef0123456789abcdef";

    fn params(resources: Vec<TrackedResource>) -> TrackParams {
        TrackParams {
            resources,
            poll_interval: Duration::from_millis(1),
            ..Default::default()
        }
    }

    fn tracked(kind: ResourceKind, ref_id: &str, resource_id: &str) -> TrackedResource {
        TrackedResource {
            deployment_id: Some(DEP.to_string()),
            resource_id: Some(resource_id.to_string()),
            kind,
            ref_id: Some(ref_id.to_string()),
        }
    }

    fn deployment() -> DeploymentGetResponse {
        let mut resources = DeploymentResources::default();
        resources
            .elasticsearch
            .push(fixture::resource("es-id", "main-elasticsearch"));
        resources.kibana.push(fixture::resource("kb-id", "main-kibana"));
        DeploymentGetResponse {
            id: DEP.to_string(),
            name: "test".to_string(),
            resources,
        }
    }

    #[tokio::test]
    async fn test_three_resources_each_stream_and_finish_once() {
        let api = FixtureApi::new()
            .script(DEP, ResourceKind::Elasticsearch, "main-elasticsearch", fixture::running_then_completed())
            .script(DEP, ResourceKind::Kibana, "main-kibana", fixture::running_then_completed())
            .script(DEP, ResourceKind::Apm, "main-apm", fixture::running_then_completed());
        let api: Arc<dyn PlatformApi> = Arc::new(api);
        let (sink, captured) = Captured::sink();

        let resources = vec![
            tracked(ResourceKind::Elasticsearch, "main-elasticsearch", "es-id"),
            tracked(ResourceKind::Kibana, "main-kibana", "kb-id"),
            tracked(ResourceKind::Apm, "main-apm", "apm-id"),
        ];
        track_change(api, params(resources), &sink).await.unwrap();

        let lines = captured.lines();
        assert_eq!(lines.len(), 6);
        for (title, id) in [("Elasticsearch", "main-elasticsearch-id"), ("Kibana", "main-kibana-id"), ("Apm", "main-apm-id")] {
            let prefix = format!("Deployment [{}] - [{}][{}]: ", DEP, title, id);
            let running = lines
                .iter()
                .position(|l| l == &format!("{}running step \"waiting-for-some-step\" (Plan duration 0s)", prefix))
                .unwrap();
            let finished = lines
                .iter()
                .position(|l| {
                    l == &format!(
                        "{}finished running all the plan steps \"{}\" (Plan duration 1m5s)",
                        prefix, PLAN_COMPLETED_STEP
                    )
                })
                .unwrap();
            assert!(running < finished);
        }
    }

    #[tokio::test]
    async fn test_no_plan_emits_warning_once() {
        let api: Arc<dyn PlatformApi> = Arc::new(FixtureApi::new().script(
            DEP,
            ResourceKind::Kibana,
            "main-kibana",
            vec![empty()],
        ));
        let (sink, captured) = Captured::sink();

        let err = track_change(api, params(vec![tracked(ResourceKind::Kibana, "main-kibana", "kb-id")]), &sink)
            .await
            .unwrap_err();

        match err {
            Error::Multi(merr) => {
                assert_eq!(merr.len(), 1);
                assert!(matches!(merr.errors()[0], Error::NoPlan { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(
            captured.lines(),
            vec![format!("Deployment [{}] - [Kibana][main-kibana-id]: no plan found", DEP)]
        );
    }

    #[tokio::test]
    async fn test_transport_errors_exhaust_budget() {
        let api: Arc<dyn PlatformApi> = Arc::new(FixtureApi::new().script(
            DEP,
            ResourceKind::Apm,
            "main-apm",
            vec![Poll::TransportError],
        ));
        let (sink, captured) = Captured::sink();

        let err = track_change(api, params(vec![tracked(ResourceKind::Apm, "main-apm", "apm-id")]), &sink)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("tracking timed out after 3 retries"));
        assert_eq!(
            captured.lines(),
            vec![format!("Deployment [{}] - [Apm][apm-id]: tracking timed out after 3 retries", DEP)]
        );
    }

    #[tokio::test]
    async fn test_plan_vanishing_mid_stream_terminates() {
        let api: Arc<dyn PlatformApi> = Arc::new(FixtureApi::new().script(
            DEP,
            ResourceKind::Kibana,
            "main-kibana",
            vec![pending(vec![step("step-a", StepStatus::InProgress, 0)]), empty()],
        ));
        let (sink, captured) = Captured::sink();

        let tracking = track_change(api, params(vec![tracked(ResourceKind::Kibana, "main-kibana", "kb-id")]), &sink);
        let err = tokio::time::timeout(Duration::from_secs(2), tracking)
            .await
            .expect("tracking should terminate")
            .unwrap_err();

        assert!(err.to_string().contains("tracking timed out after 3 retries"));
        let prefix = format!("Deployment [{}] - [Kibana][main-kibana-id]: ", DEP);
        assert_eq!(
            captured.lines(),
            vec![
                format!("{}running step \"step-a\" (Plan duration 0s)", prefix),
                format!("{}tracking timed out after 3 retries", prefix),
            ]
        );
    }

    #[tokio::test]
    async fn test_transient_errors_are_survived() {
        let mut polls = vec![Poll::TransportError, Poll::TransportError];
        polls.extend(fixture::running_then_completed());
        let api: Arc<dyn PlatformApi> =
            Arc::new(FixtureApi::new().script(DEP, ResourceKind::Apm, "main-apm", polls));
        let (sink, captured) = Captured::sink();

        track_change(api, params(vec![tracked(ResourceKind::Apm, "main-apm", "apm-id")]), &sink)
            .await
            .unwrap();
        assert_eq!(captured.lines().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_plan_is_reported() {
        let api: Arc<dyn PlatformApi> = Arc::new(FixtureApi::new().script(
            DEP,
            ResourceKind::Elasticsearch,
            "main-elasticsearch",
            vec![
                pending(vec![step("rolling-upgrade", StepStatus::InProgress, 0)]),
                current(vec![
                    step("rolling-upgrade", StepStatus::Error, 0),
                    step(PLAN_COMPLETED_STEP, StepStatus::Error, 30),
                ]),
            ],
        ));
        let (sink, captured) = Captured::sink();

        let err = track_change(
            api,
            params(vec![tracked(ResourceKind::Elasticsearch, "main-elasticsearch", "es-id")]),
            &sink,
        )
        .await
        .unwrap_err();

        assert!(err
            .to_string()
            .contains("plan failed at step \"rolling-upgrade\" with status error"));
        let lines = captured.lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains(": failed step \"plan-completed\" (Plan duration 30s)"));
    }

    #[tokio::test]
    async fn test_resolves_deployment_and_ref_id_from_resource_id() {
        let api = FixtureApi::new()
            .with_deployment(deployment())
            .script(DEP, ResourceKind::Kibana, "main-kibana", fixture::running_then_completed());
        let api = Arc::new(api);
        let (sink, captured) = Captured::sink();

        let resource = TrackedResource {
            deployment_id: None,
            resource_id: Some("kb-id".to_string()),
            kind: ResourceKind::Kibana,
            ref_id: None,
        };
        track_change(api.clone(), params(vec![resource]), &sink).await.unwrap();

        assert!(captured.lines()[0].starts_with(&format!("Deployment [{}] - [Kibana][kb-id]:", DEP)));
        assert!(api.calls().iter().any(|c| c.starts_with("POST /deployments/_search")));
    }

    #[tokio::test]
    async fn test_unresolvable_resource_is_a_leaf_error() {
        let api: Arc<dyn PlatformApi> = Arc::new(FixtureApi::new());
        let (sink, _) = Captured::sink();
        let resource = TrackedResource {
            deployment_id: None,
            resource_id: Some("ghost".to_string()),
            kind: ResourceKind::Apm,
            ref_id: None,
        };
        let err = track_change(api, params(vec![resource]), &sink).await.unwrap_err();
        assert!(matches!(err, Error::Multi(ref m) if m.len() == 1));
    }

    #[tokio::test]
    async fn test_lookup_errors_are_retried() {
        let api = FixtureApi::new()
            .with_deployment(deployment())
            .script(DEP, ResourceKind::Kibana, "main-kibana", fixture::running_then_completed())
            .fail_lookups(2);
        let api = Arc::new(api);
        let (sink, captured) = Captured::sink();

        let resource = TrackedResource {
            deployment_id: None,
            resource_id: Some("kb-id".to_string()),
            kind: ResourceKind::Kibana,
            ref_id: None,
        };
        track_change(api.clone(), params(vec![resource]), &sink).await.unwrap();

        assert_eq!(captured.lines().len(), 2);
        let searches = api.calls().iter().filter(|c| c.starts_with("POST /deployments/_search")).count();
        assert_eq!(searches, 3);
    }

    #[tokio::test]
    async fn test_lookup_errors_exhaust_budget() {
        let api: Arc<dyn PlatformApi> = Arc::new(FixtureApi::new().with_deployment(deployment()).fail_lookups(10));
        let (sink, _) = Captured::sink();
        let resource = TrackedResource {
            deployment_id: None,
            resource_id: Some("kb-id".to_string()),
            kind: ResourceKind::Kibana,
            ref_id: None,
        };

        let err = track_change(api, params(vec![resource]), &sink).await.unwrap_err();
        let Error::Multi(merr) = err else {
            panic!("expected an aggregate error");
        };
        assert!(matches!(
            &merr.errors()[0],
            Error::TrackTimeout { resource_id, retries: 3 } if resource_id == "kb-id"
        ));
    }

    #[tokio::test]
    async fn test_deployment_resources_filters() {
        let api = FixtureApi::new().with_deployment(deployment());

        let all = deployment_resources(&api, DEP, None, None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].kind, ResourceKind::Elasticsearch);

        let kibana = deployment_resources(&api, DEP, Some(ResourceKind::Kibana), None).await.unwrap();
        assert_eq!(kibana.len(), 1);
        assert_eq!(kibana[0].ref_id.as_deref(), Some("main-kibana"));

        assert!(deployment_resources(&api, DEP, Some(ResourceKind::Apm), None).await.is_err());
    }
}
