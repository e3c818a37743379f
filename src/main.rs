use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ecctl::{Cli, Context, Error};

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .init();
}

async fn execute(cli: Cli) -> anyhow::Result<()> {
    let ctx = Context::for_command(&cli.global, &cli.command)?;
    init_tracing(ctx.config.verbose);

    tokio::select! {
        result = ecctl::run(&ctx, cli.command) => result?,
        _ = tokio::signal::ctrl_c() => return Err(Error::Interrupted.into()),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let command_path = cli.command_path();

    match execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ecctl {}: {:#}", command_path, e);
            let code = e.downcast_ref::<Error>().map_or(1, Error::exit_code);
            ExitCode::from(code)
        }
    }
}
