use std::time::Duration;

use clap::{ArgAction, Args};
use serde::Serialize;

use super::{parse_kind, Context};
use crate::api::models::ResourceKind;
use crate::tracker::DEFAULT_MAX_RETRIES;
use crate::vacate::{VacateParams, DEFAULT_CONCURRENCY, DEFAULT_MOVE_DELAY};
use crate::Result;

#[derive(Args, Debug)]
pub struct VacateArgs {
    /// Allocators to vacate
    #[arg(required = true)]
    pub allocators: Vec<String>,

    /// Preferred target allocator
    #[arg(long = "target", short = 't')]
    pub targets: Vec<String>,

    /// Only move this resource
    #[arg(long = "cluster", short = 'c')]
    pub clusters: Vec<String>,

    /// Only move resources of this kind
    #[arg(long, short = 'k', value_parser = parse_kind)]
    pub kind: Option<ResourceKind>,

    /// Moves in flight at once
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: u16,

    /// Override allocator health auto-discovery (single allocator only)
    #[arg(long)]
    pub allocator_down: Option<bool>,

    /// Keep the moved instances' configuration unchanged
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub move_only: bool,

    #[arg(long)]
    pub skip_snapshot: Option<bool>,

    /// Skip data migration; needs --cluster and --move-only=true
    #[arg(long)]
    pub skip_data_migration: Option<bool>,

    /// Move even when the failsafe checks object
    #[arg(long)]
    pub override_failsafe: bool,

    /// Put the allocators in maintenance mode first
    #[arg(long)]
    pub maintenance: bool,

    /// Seconds between plan polls
    #[arg(long, default_value_t = 5)]
    pub poll_interval: u64,

    /// Consecutive failed polls tolerated per move
    #[arg(long, default_value_t = DEFAULT_MAX_RETRIES)]
    pub max_retries: u32,
}

impl VacateArgs {
    pub fn params(&self) -> VacateParams {
        VacateParams {
            allocators: self.allocators.clone(),
            preferred_targets: self.targets.clone(),
            cluster_filter: self.clusters.clone(),
            kind_filter: self.kind,
            concurrency: self.concurrency,
            allocator_down: self.allocator_down,
            move_only: self.move_only,
            skip_snapshot: self.skip_snapshot,
            skip_data_migration: self.skip_data_migration,
            override_failsafe: self.override_failsafe.then_some(true),
            set_maintenance: self.maintenance,
            poll_interval: Duration::from_secs(self.poll_interval),
            max_retries: self.max_retries,
            move_delay: DEFAULT_MOVE_DELAY,
        }
    }
}

pub async fn vacate(ctx: &Context, args: VacateArgs) -> Result<()> {
    let mut params = args.params();
    // Flag combinations fail before any traffic.
    params.validate()?;
    let api = ctx.api()?;
    crate::vacate::vacate(api, params, &ctx.output).await
}

#[derive(Args, Debug)]
pub struct MaintenanceArgs {
    /// Allocator to update
    pub allocator_id: String,

    /// Stop maintenance mode instead of starting it
    #[arg(long)]
    pub unset: bool,
}

#[derive(Serialize)]
struct MaintenanceResult<'a> {
    allocator_id: &'a str,
    enabled: bool,
}

pub async fn maintenance(ctx: &Context, args: MaintenanceArgs) -> Result<()> {
    let api = ctx.api()?;
    let enabled = !args.unset;
    api.set_allocator_maintenance(&args.allocator_id, enabled).await?;
    ctx.output.format(
        "allocator/maintenance",
        &MaintenanceResult {
            allocator_id: &args.allocator_id,
            enabled,
        },
    )
}
