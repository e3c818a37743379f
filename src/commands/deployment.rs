use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Args};

use super::{parse_kind, Context};
use crate::api::models::ResourceKind;
use crate::deployment::create::CreateParams;
use crate::deployment::payload::{PayloadOptions, ResourceSpec, DEFAULT_TEMPLATE_ID};
use crate::tracker::{self, TrackParams, DEFAULT_MAX_RETRIES};
use crate::utils::id::is_deployment_id;
use crate::{Error, Result};

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// JSON create request; bypasses the template builder
    #[arg(long, short = 'f')]
    pub file: Option<PathBuf>,

    /// Deployment name
    #[arg(long)]
    pub name: Option<String>,

    /// Deployment template id
    #[arg(long = "deployment-template", default_value = DEFAULT_TEMPLATE_ID)]
    pub template: String,

    /// Stack version, latest when omitted
    #[arg(long)]
    pub version: Option<String>,

    /// Elasticsearch ref id
    #[arg(long, default_value = "main-elasticsearch")]
    pub ref_id: String,

    /// Memory per zone of the data tier, in MB
    #[arg(long, default_value_t = 0)]
    pub size: i32,

    #[arg(long, default_value_t = 0)]
    pub zones: i32,

    /// Elasticsearch topology element as JSON, e.g. '{"name":"hot_content","size":8192,"zone_count":2}'
    #[arg(long = "topology-element", short = 'e')]
    pub topology_elements: Vec<String>,

    /// Elasticsearch plugin, `name` or `name=url`
    #[arg(long = "plugin")]
    pub plugins: Vec<String>,

    /// Create a Kibana instance
    #[arg(long, default_value_t = true, action = ArgAction::Set, num_args = 0..=1, default_missing_value = "true")]
    pub kibana: bool,

    #[arg(long, default_value_t = 0)]
    pub kibana_size: i32,

    #[arg(long, default_value_t = 0)]
    pub kibana_zones: i32,

    /// Create an APM instance
    #[arg(long)]
    pub apm: bool,

    #[arg(long, default_value_t = 0)]
    pub apm_size: i32,

    #[arg(long, default_value_t = 0)]
    pub apm_zones: i32,

    /// Create an App Search instance
    #[arg(long)]
    pub appsearch: bool,

    #[arg(long, default_value_t = 0)]
    pub appsearch_size: i32,

    #[arg(long, default_value_t = 0)]
    pub appsearch_zones: i32,

    /// Create an Enterprise Search instance
    #[arg(long)]
    pub enterprise_search: bool,

    #[arg(long, default_value_t = 0)]
    pub enterprise_search_size: i32,

    #[arg(long, default_value_t = 0)]
    pub enterprise_search_zones: i32,

    /// Create an Integrations Server instance
    #[arg(long)]
    pub integrations_server: bool,

    #[arg(long, default_value_t = 0)]
    pub integrations_server_size: i32,

    #[arg(long, default_value_t = 0)]
    pub integrations_server_zones: i32,

    /// Print the create request instead of sending it
    #[arg(long)]
    pub generate_payload: bool,

    /// Idempotency token, generated when omitted
    #[arg(long)]
    pub request_id: Option<String>,

    /// Follow the creation plans until they finish
    #[arg(long, short = 't')]
    pub track: bool,
}

impl CreateArgs {
    pub fn params(&self, region: String) -> CreateParams {
        let spec = |enabled: bool, kind: ResourceKind, size: i32, zones: i32| {
            enabled.then(|| ResourceSpec::new(kind, size, zones))
        };

        let options = PayloadOptions {
            name: self.name.clone(),
            region,
            template_id: self.template.clone(),
            version: self.version.clone(),
            elasticsearch: ResourceSpec {
                ref_id: self.ref_id.clone(),
                size_mb: self.size,
                zone_count: self.zones,
            },
            kibana: spec(self.kibana, ResourceKind::Kibana, self.kibana_size, self.kibana_zones),
            apm: spec(self.apm, ResourceKind::Apm, self.apm_size, self.apm_zones),
            appsearch: spec(self.appsearch, ResourceKind::Appsearch, self.appsearch_size, self.appsearch_zones),
            enterprise_search: spec(
                self.enterprise_search,
                ResourceKind::EnterpriseSearch,
                self.enterprise_search_size,
                self.enterprise_search_zones,
            ),
            integrations_server: spec(
                self.integrations_server,
                ResourceKind::IntegrationsServer,
                self.integrations_server_size,
                self.integrations_server_zones,
            ),
            topology_elements: self.topology_elements.clone(),
            plugins: self.plugins.clone(),
        };

        CreateParams {
            file: self.file.clone(),
            options,
            generate_payload: self.generate_payload,
            request_id: self.request_id.clone(),
            track: self.track,
            track_params: TrackParams::default(),
        }
    }
}

pub async fn create(ctx: &Context, args: CreateArgs) -> Result<()> {
    let region = ctx.config.region.clone().unwrap_or_default();
    if region.is_empty() && args.file.is_none() {
        return Err(Error::validation("a region is required to fetch the deployment template"));
    }
    let api = ctx.api()?;
    crate::deployment::create::create(api, args.params(region), &ctx.output, &ctx.stderr).await
}

#[derive(Args, Debug)]
pub struct TrackArgs {
    /// Deployment to follow
    pub deployment_id: String,

    /// Only follow resources of this kind
    #[arg(long, short = 'k', value_parser = parse_kind)]
    pub kind: Option<ResourceKind>,

    /// Only follow the resource with this ref id
    #[arg(long)]
    pub ref_id: Option<String>,

    /// Seconds between plan polls
    #[arg(long, default_value_t = 5)]
    pub poll_interval: u64,

    /// Consecutive failed polls tolerated per resource
    #[arg(long, default_value_t = DEFAULT_MAX_RETRIES)]
    pub max_retries: u32,
}

pub async fn track(ctx: &Context, args: TrackArgs) -> Result<()> {
    if !is_deployment_id(&args.deployment_id) {
        return Err(Error::validation(format!(
            "invalid deployment id \"{}\": expected 32 hexadecimal characters",
            args.deployment_id
        )));
    }
    let api = ctx.api()?;
    let resources =
        tracker::deployment_resources(api.as_ref(), &args.deployment_id, args.kind, args.ref_id.as_deref()).await?;

    let params = TrackParams {
        resources,
        poll_interval: Duration::from_secs(args.poll_interval),
        max_retries: args.max_retries,
        ..Default::default()
    };
    tracker::track_change(api, params, ctx.output.sink()).await
}

#[cfg(test)]
mod tests {
    use super::super::{Cli, Commands, DeploymentCommands};
    use super::*;
    use clap::Parser;

    fn create_args(args: &[&str]) -> CreateArgs {
        let mut argv = vec!["ecctl", "deployment", "create"];
        argv.extend_from_slice(args);
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Deployment {
                command: DeploymentCommands::Create(args),
            } => *args,
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_create_defaults() {
        let params = create_args(&[]).params("ece-region".to_string());
        assert_eq!(params.options, PayloadOptions {
            region: "ece-region".to_string(),
            ..Default::default()
        });
        assert!(!params.track);
        assert!(params.request_id.is_none());
    }

    #[test]
    fn test_create_flags() {
        let args = create_args(&[
            "--version",
            "7.8.0",
            "--deployment-template",
            "aws-io-optimized-v2",
            "--name",
            "with_default",
            "--request-id",
            "some_request_id",
            "--kibana=false",
            "--apm",
            "--apm-size",
            "1024",
            "--topology-element",
            r#"{"name":"data","size":8192}"#,
            "--plugin",
            "analysis-icu",
            "--track",
        ]);
        let params = args.params("ece-region".to_string());

        assert_eq!(params.options.template_id, "aws-io-optimized-v2");
        assert_eq!(params.options.version.as_deref(), Some("7.8.0"));
        assert_eq!(params.options.kibana, None);
        assert_eq!(
            params.options.apm,
            Some(ResourceSpec {
                ref_id: "main-apm".to_string(),
                size_mb: 1024,
                zone_count: 0,
            })
        );
        assert_eq!(params.options.topology_elements.len(), 1);
        assert_eq!(params.options.plugins, vec!["analysis-icu"]);
        assert_eq!(params.request_id.as_deref(), Some("some_request_id"));
        assert!(params.track);
    }

    #[test]
    fn test_track_kind_filter() {
        let cli = Cli::try_parse_from([
            "ecctl",
            "deployment",
            "track",
            "0123456789abcdef0123456789abcdef",
            "--kind",
            "kibana",
        ])
        .unwrap();
        let Commands::Deployment {
            command: DeploymentCommands::Track(args),
        } = cli.command
        else {
            panic!("expected deployment track");
        };
        assert_eq!(args.kind, Some(ResourceKind::Kibana));
        assert_eq!(args.max_retries, 3);
        assert_eq!(args.poll_interval, 5);
    }
}
