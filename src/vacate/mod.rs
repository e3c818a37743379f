//! Moves every resource off one or more allocators.
//!
//! Allocators are vacated concurrently. Within one allocator moves are
//! dispatched in listing order, spaced by [`VacateParams::move_delay`], and
//! each move holds a permit of a shared semaphore until its plan has been
//! tracked to completion. Failures never abort sibling moves; they are
//! collected into one aggregate error.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::api::models::{AllocatorInfo, MoveClustersRequest, PlanOverrides, ResourceKind, VacateRequest};
use crate::api::PlatformApi;
use crate::format::Output;
use crate::tracker::{self, TrackParams, TrackedResource};
use crate::{Error, MultiError, Result};

pub const DEFAULT_CONCURRENCY: u16 = 8;

/// Pause between two moves off the same allocator. Spacing moves avoids
/// server errors observed when they are issued back to back.
pub const DEFAULT_MOVE_DELAY: Duration = Duration::from_secs(1);

const ERROR_PREFIX: &str = "allocator vacate";

#[derive(Debug, Clone)]
pub struct VacateParams {
    pub allocators: Vec<String>,
    pub preferred_targets: Vec<String>,
    pub cluster_filter: Vec<String>,
    pub kind_filter: Option<ResourceKind>,
    pub concurrency: u16,
    /// Overrides allocator health auto-discovery. Only valid for a single allocator.
    pub allocator_down: Option<bool>,
    pub move_only: bool,
    pub skip_snapshot: Option<bool>,
    pub skip_data_migration: Option<bool>,
    pub override_failsafe: Option<bool>,
    pub set_maintenance: bool,
    pub poll_interval: Duration,
    pub max_retries: u32,
    pub move_delay: Duration,
}

impl Default for VacateParams {
    fn default() -> Self {
        Self {
            allocators: Vec::new(),
            preferred_targets: Vec::new(),
            cluster_filter: Vec::new(),
            kind_filter: None,
            concurrency: DEFAULT_CONCURRENCY,
            allocator_down: None,
            move_only: true,
            skip_snapshot: None,
            skip_data_migration: None,
            override_failsafe: None,
            set_maintenance: false,
            poll_interval: tracker::DEFAULT_POLL_INTERVAL,
            max_retries: tracker::DEFAULT_MAX_RETRIES,
            move_delay: DEFAULT_MOVE_DELAY,
        }
    }
}

impl VacateParams {
    /// Reject invalid flag combinations. A zero concurrency is raised to one.
    pub fn validate(&mut self) -> Result<()> {
        if self.allocators.is_empty() {
            return Err(Error::validation("at least one source allocator is required"));
        }
        if self.skip_data_migration == Some(true) && (self.cluster_filter.is_empty() || !self.move_only) {
            return Err(Error::InvalidSkipDataMigration);
        }
        if self.allocators.len() > 1 && self.allocator_down.is_some() {
            return Err(Error::AmbiguousAllocatorDown);
        }
        if self.concurrency == 0 {
            self.concurrency = 1;
        }
        Ok(())
    }

    fn overrides(&self) -> PlanOverrides {
        PlanOverrides {
            preferred_allocators: self.preferred_targets.clone(),
            skip_snapshot: self.skip_snapshot,
            skip_data_migration: self.skip_data_migration,
            override_failsafe: self.override_failsafe,
        }
    }

    fn track_params(&self) -> TrackParams {
        TrackParams {
            resources: Vec::new(),
            poll_interval: self.poll_interval,
            max_retries: self.max_retries,
            ..Default::default()
        }
    }
}

/// One resource to move off an allocator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkItem {
    pub allocator_id: String,
    pub resource_id: String,
    pub kind: ResourceKind,
    pub deployment_id: Option<String>,
    pub instance_name: String,
    pub size_mb: i32,
}

impl WorkItem {
    fn describe(&self) -> String {
        format!("allocator {} {} resource {}", self.allocator_id, self.kind, self.resource_id)
    }
}

#[derive(Serialize)]
struct Workload<'a> {
    items: &'a [WorkItem],
}

/// Resources hosted on `allocator` that pass the kind and cluster filters,
/// one entry per resource, in listing order.
pub fn workload(allocator: &AllocatorInfo, params: &VacateParams) -> Vec<WorkItem> {
    let mut items: Vec<WorkItem> = Vec::new();
    for instance in &allocator.instances {
        if params.kind_filter.map_or(false, |kind| kind != instance.cluster_type) {
            continue;
        }
        if !params.cluster_filter.is_empty() && !params.cluster_filter.contains(&instance.cluster_id) {
            continue;
        }
        if items
            .iter()
            .any(|i| i.kind == instance.cluster_type && i.resource_id == instance.cluster_id)
        {
            continue;
        }
        items.push(WorkItem {
            allocator_id: allocator.allocator_id.clone(),
            resource_id: instance.cluster_id.clone(),
            kind: instance.cluster_type,
            deployment_id: instance.deployment_id.clone(),
            instance_name: instance.instance_name.clone(),
            size_mb: instance.node_memory,
        });
    }
    items
}

/// Vacate every allocator in `params`.
pub async fn vacate(api: Arc<dyn PlatformApi>, mut params: VacateParams, output: &Output) -> Result<()> {
    params.validate()?;
    let params = Arc::new(params);
    let merr = Arc::new(Mutex::new(MultiError::new(ERROR_PREFIX)));

    if params.set_maintenance {
        for allocator_id in &params.allocators {
            if let Err(e) = api.set_allocator_maintenance(allocator_id, true).await {
                record(&merr, e);
            }
        }
    }

    let mut workloads = Vec::with_capacity(params.allocators.len());
    for allocator_id in &params.allocators {
        match api.get_allocator(allocator_id).await {
            Ok(allocator) => {
                let items = workload(&allocator, &params);
                tracing::debug!(allocator = %allocator_id, items = items.len(), "allocator workload");
                workloads.push(items);
            }
            Err(e) => record(&merr, e),
        }
    }

    let all: Vec<WorkItem> = workloads.iter().flatten().cloned().collect();
    if !all.is_empty() {
        output.format("allocator/vacate", &Workload { items: &all })?;
    }

    let semaphore = Arc::new(Semaphore::new(params.concurrency as usize));
    let dispatches = workloads.into_iter().map(|items| {
        dispatch_allocator(api.clone(), items, params.clone(), semaphore.clone(), output, merr.clone())
    });
    join_all(dispatches).await;

    let merr = std::mem::take(&mut *merr.lock().unwrap_or_else(|p| p.into_inner()));
    merr.into_result()
}

fn record(merr: &Mutex<MultiError>, error: Error) {
    tracing::debug!(error = %error, "vacate failure recorded");
    merr.lock().unwrap_or_else(|p| p.into_inner()).push(error);
}

async fn dispatch_allocator(
    api: Arc<dyn PlatformApi>,
    items: Vec<WorkItem>,
    params: Arc<VacateParams>,
    semaphore: Arc<Semaphore>,
    output: &Output,
    merr: Arc<Mutex<MultiError>>,
) {
    let mut tasks = JoinSet::new();
    for (index, item) in items.into_iter().enumerate() {
        if index > 0 && !params.move_delay.is_zero() {
            tokio::time::sleep(params.move_delay).await;
        }
        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            break;
        };

        let api = api.clone();
        let params = params.clone();
        let sink = output.sink().clone();
        let merr = merr.clone();
        tasks.spawn(async move {
            let _permit = permit;
            if let Err(e) = move_and_track(api.as_ref(), &item, &params, &sink).await {
                record(&merr, e);
            }
        });
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            record(&merr, Error::validation(format!("vacate task aborted: {}", e)));
        }
    }
}

async fn move_and_track(
    api: &dyn PlatformApi,
    item: &WorkItem,
    params: &VacateParams,
    sink: &crate::format::OutputSink,
) -> Result<()> {
    let request = VacateRequest {
        allocator_id: item.allocator_id.clone(),
        allocator_down: params.allocator_down,
        move_only: params.move_only,
        body: MoveClustersRequest::single(item.kind, &item.resource_id, &params.overrides()),
    };

    let response = api
        .vacate_allocator(&request)
        .await
        .map_err(|e| Error::MoveDispatchFailed {
            item: item.describe(),
            cause: e.to_string(),
        })?;

    if let Some(failure) = response.failures.find(item.kind, &item.resource_id) {
        let cause = failure
            .errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(Error::MoveDispatchFailed {
            item: item.describe(),
            cause,
        });
    }

    let resource = TrackedResource {
        deployment_id: item.deployment_id.clone(),
        resource_id: Some(item.resource_id.clone()),
        kind: item.kind,
        ref_id: None,
    };
    tracker::track_resource(api, &resource, &params.track_params(), sink)
        .await
        .map_err(|e| match e {
            Error::PlanFailed { step_id, status, .. } => Error::MovePlanFailed {
                item: item.describe(),
                step_id,
                status,
            },
            Error::TrackTimeout { .. } => Error::MoveTrackTimeout { item: item.describe() },
            other => Error::MoveDispatchFailed {
                item: item.describe(),
                cause: other.to_string(),
            },
        })
}
