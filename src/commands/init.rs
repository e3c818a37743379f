use std::path::Path;

use clap::Args;
use colored::Colorize;

use super::Context;
use crate::api::HttpApi;
use crate::config::init::{collect, finish, TerminalPrompter};
use crate::config::Config;
use crate::{Error, Result};

#[derive(Args, Debug, Default)]
pub struct InitArgs {}

/// The configuration at `path`, or `None` when it is missing or unreadable.
pub(crate) fn existing_config(path: &Path) -> Option<Config> {
    if !path.exists() {
        return None;
    }
    match Config::from_file(path) {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable configuration");
            None
        }
    }
}

pub async fn run(ctx: &Context, _args: InitArgs) -> Result<()> {
    let path = ctx.config_path.clone();
    let existing = existing_config(&path);

    let collected = tokio::task::spawn_blocking(move || collect(&mut TerminalPrompter, existing.as_ref()))
        .await
        .map_err(|e| Error::validation(format!("prompt task failed: {}", e)))??;

    let Some(config) = collected else {
        println!("Keeping the existing configuration at {}", path.display());
        return Ok(());
    };

    let api = HttpApi::from_config(&config)?;
    let written = finish(&api, &config, &path).await?;

    println!("\n{} Config written to {}", "✓".green().bold(), written.display().to_string().bold());
    println!("\n{}:", "Next steps".bold());
    println!("  • Run {} to create a deployment", "ecctl deployment create --track".cyan());
    Ok(())
}
