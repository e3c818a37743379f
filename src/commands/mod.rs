//! Command-line surface.

pub mod allocator;
pub mod deployment;
pub mod init;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};

use crate::api::{HttpApi, PlatformApi};
use crate::api::models::ResourceKind;
use crate::config::{Config, OutputFormat};
use crate::format::{Output, OutputSink};
use crate::Result;

#[derive(Parser, Debug)]
#[command(name = "ecctl")]
#[command(about = "Manage Elastic Cloud deployments and platform infrastructure", long_about = None)]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (built ", env!("ECCTL_BUILD_DATE"), ")"))]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Flags accepted by every command. Set values override the configuration file and environment.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Configuration file (default ~/.ecctl/config.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// API endpoint
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Region scoping platform calls
    #[arg(long, global = true)]
    pub region: Option<String>,

    /// API key, exclusive with --user/--pass
    #[arg(long, global = true)]
    pub api_key: Option<String>,

    #[arg(long, global = true)]
    pub user: Option<String>,

    #[arg(long, global = true)]
    pub pass: Option<String>,

    /// Output format
    #[arg(long, short = 'o', global = true, value_enum)]
    pub output: Option<OutputFormat>,

    /// Text template used in place of the built-in ones
    #[arg(long, global = true)]
    pub format: Option<String>,

    /// HTTP timeout in seconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Dump HTTP traffic to stderr
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Skip TLS certificate verification
    #[arg(long, global = true)]
    pub insecure: bool,
}

impl GlobalArgs {
    /// Flag values as a configuration overlay.
    pub fn overrides(&self) -> Config {
        Config {
            api_key: self.api_key.clone(),
            format: self.format.clone(),
            host: self.host.clone(),
            insecure: self.insecure,
            message: None,
            output: self.output,
            pass: self.pass.clone(),
            region: self.region.clone(),
            timeout: self.timeout,
            user: self.user.clone(),
            verbose: self.verbose,
        }
    }

    pub fn config_path(&self) -> Result<PathBuf> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => Config::default_path(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create or update the configuration file interactively
    Init(init::InitArgs),

    /// Manage deployments
    Deployment {
        #[command(subcommand)]
        command: DeploymentCommands,
    },

    /// Manage platform infrastructure
    Platform {
        #[command(subcommand)]
        command: PlatformCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum DeploymentCommands {
    /// Create a deployment from a template or a request file
    Create(Box<deployment::CreateArgs>),

    /// Follow the pending plans of a deployment
    Track(deployment::TrackArgs),
}

#[derive(Subcommand, Debug)]
pub enum PlatformCommands {
    /// Manage allocators
    Allocator {
        #[command(subcommand)]
        command: AllocatorCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum AllocatorCommands {
    /// Move every resource off one or more allocators
    Vacate(allocator::VacateArgs),

    /// Start or stop maintenance mode on an allocator
    Maintenance(allocator::MaintenanceArgs),
}

impl Cli {
    /// Space separated command names, used to prefix fatal errors.
    pub fn command_path(&self) -> &'static str {
        match &self.command {
            Commands::Init(_) => "init",
            Commands::Deployment { command } => match command {
                DeploymentCommands::Create(_) => "deployment create",
                DeploymentCommands::Track(_) => "deployment track",
            },
            Commands::Platform { command } => match command {
                PlatformCommands::Allocator { command } => match command {
                    AllocatorCommands::Vacate(_) => "platform allocator vacate",
                    AllocatorCommands::Maintenance(_) => "platform allocator maintenance",
                },
            },
        }
    }
}

/// Resolved state shared by command handlers.
pub struct Context {
    pub config: Config,
    pub config_path: PathBuf,
    pub output: Output,
    pub stderr: OutputSink,
}

impl Context {
    /// Context for `command`. `init` only reads flags, so it can replace a broken file.
    pub fn for_command(global: &GlobalArgs, command: &Commands) -> Result<Self> {
        match command {
            Commands::Init(_) => Self::from_flags(global),
            _ => Self::resolve(global),
        }
    }

    /// Resolve the configuration from file, environment and flags.
    pub fn resolve(global: &GlobalArgs) -> Result<Self> {
        let config_path = global.config_path()?;
        let config = Config::resolve(&config_path, |key| std::env::var(key).ok(), global.overrides())?;
        Self::build(config, config_path)
    }

    /// Defaults overlaid with flags; the file and environment are not read.
    pub fn from_flags(global: &GlobalArgs) -> Result<Self> {
        let mut config = Config::default();
        config.merge(global.overrides());
        Self::build(config, global.config_path()?)
    }

    fn build(config: Config, config_path: PathBuf) -> Result<Self> {
        let output = Output::new(config.output_format(), config.format.clone(), OutputSink::stdout())?;
        Ok(Self {
            config,
            config_path,
            output,
            stderr: OutputSink::stderr(),
        })
    }

    /// Client for the configured endpoint.
    pub fn api(&self) -> Result<Arc<dyn PlatformApi>> {
        Ok(Arc::new(HttpApi::from_config(&self.config)?))
    }
}

/// Execute a parsed command against a resolved context.
pub async fn run(ctx: &Context, command: Commands) -> Result<()> {
    match command {
        Commands::Init(args) => init::run(ctx, args).await,
        Commands::Deployment { command } => match command {
            DeploymentCommands::Create(args) => deployment::create(ctx, *args).await,
            DeploymentCommands::Track(args) => deployment::track(ctx, args).await,
        },
        Commands::Platform { command } => match command {
            PlatformCommands::Allocator { command } => match command {
                AllocatorCommands::Vacate(args) => allocator::vacate(ctx, args).await,
                AllocatorCommands::Maintenance(args) => allocator::maintenance(ctx, args).await,
            },
        },
    }
}

/// Parse a resource kind flag value.
pub(crate) fn parse_kind(value: &str) -> std::result::Result<ResourceKind, String> {
    value.parse::<ResourceKind>().map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_become_overrides() {
        let cli = Cli::try_parse_from([
            "ecctl",
            "--host",
            "https://ece.example.com:12443",
            "--region",
            "ece-region",
            "--output",
            "json",
            "platform",
            "allocator",
            "maintenance",
            "i-1",
            "--verbose",
        ])
        .unwrap();

        let overrides = cli.global.overrides();
        assert_eq!(overrides.host.as_deref(), Some("https://ece.example.com:12443"));
        assert_eq!(overrides.region.as_deref(), Some("ece-region"));
        assert_eq!(overrides.output, Some(OutputFormat::Json));
        assert!(overrides.verbose);
        assert!(!overrides.insecure);
        assert_eq!(overrides.api_key, None);
        assert_eq!(cli.command_path(), "platform allocator maintenance");
    }

    #[test]
    fn test_command_paths() {
        let cases = [
            (vec!["ecctl", "init"], "init"),
            (vec!["ecctl", "deployment", "create"], "deployment create"),
            (
                vec!["ecctl", "deployment", "track", "0123456789abcdef0123456789abcdef"],
                "deployment track",
            ),
            (vec!["ecctl", "platform", "allocator", "vacate", "i-1"], "platform allocator vacate"),
        ];
        for (args, path) in cases {
            assert_eq!(Cli::try_parse_from(args).unwrap().command_path(), path);
        }
    }

    #[test]
    fn test_explicit_config_path() {
        let cli = Cli::try_parse_from(["ecctl", "--config", "/tmp/ecctl.json", "init"]).unwrap();
        assert_eq!(cli.global.config_path().unwrap(), PathBuf::from("/tmp/ecctl.json"));
    }

    #[test]
    fn test_init_context_ignores_broken_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        let path_arg = path.to_str().unwrap();

        let cli = Cli::try_parse_from(["ecctl", "--config", path_arg, "--host", "https://ece.example.com", "init"]).unwrap();
        let ctx = Context::for_command(&cli.global, &cli.command).unwrap();
        assert_eq!(ctx.config_path, path);
        assert_eq!(ctx.config.host.as_deref(), Some("https://ece.example.com"));
        assert!(init::existing_config(&ctx.config_path).is_none());

        let cli = Cli::try_parse_from(["ecctl", "--config", path_arg, "platform", "allocator", "maintenance", "i-1"])
            .unwrap();
        assert!(Context::for_command(&cli.global, &cli.command).is_err());
    }

    #[test]
    fn test_parse_kind() {
        assert_eq!(parse_kind("apm").unwrap(), ResourceKind::Apm);
        assert!(parse_kind("logstash").is_err());
    }
}
