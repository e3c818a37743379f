//! Interactive configuration bootstrap.
//!
//! [`collect`] walks the user through a fixed sequence of numbered questions
//! and builds a [`Config`]. The answers are checked against the API with
//! [`validate_credentials`] before [`finish`] writes them to disk.

use std::path::{Path, PathBuf};

use colored::Colorize;
use inquire::error::InquireError;
use inquire::{Password, PasswordDisplayMode, Text};

use super::{Config, OutputFormat, HOSTED_ENDPOINT};
use crate::api::PlatformApi;
use crate::{Error, Result};

/// Regions offered for the hosted and private flavours, first one is the default.
pub const HOSTED_REGIONS: &[&str] = &[
    "gcp-us-central1",
    "gcp-us-east4",
    "gcp-europe-west1",
    "gcp-asia-northeast1",
    "aws-us-east-1",
    "aws-us-west-2",
    "aws-eu-west-1",
    "aws-ap-southeast-2",
    "azure-eastus2",
    "azure-westeurope",
];

/// Region name used by self-managed installations.
pub const ECE_REGION: &str = "ece-region";

const ECE_DEFAULT_HOST: &str = "https://localhost:12443";

/// Source of answers for the bootstrap questions.
pub trait Prompter {
    /// Ask a question and return the trimmed answer.
    fn ask(&mut self, question: &str) -> Result<String>;

    /// Ask for a secret without echoing it.
    fn ask_secret(&mut self, question: &str) -> Result<String>;

    /// Print an informational line.
    fn say(&mut self, line: &str);
}

/// Prompter reading from the controlling terminal.
#[derive(Debug, Default)]
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn ask(&mut self, question: &str) -> Result<String> {
        let answer = Text::new(question).prompt().map_err(prompt_error)?;
        Ok(answer.trim().to_string())
    }

    fn ask_secret(&mut self, question: &str) -> Result<String> {
        let answer = Password::new(question)
            .without_confirmation()
            .with_display_mode(PasswordDisplayMode::Hidden)
            .prompt()
            .map_err(prompt_error)?;
        Ok(answer.trim().to_string())
    }

    fn say(&mut self, line: &str) {
        println!("{}", line);
    }
}

fn prompt_error(err: InquireError) -> Error {
    match err {
        InquireError::OperationCanceled | InquireError::OperationInterrupted => Error::Interrupted,
        other => Error::validation(format!("failed reading answer: {}", other)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavour {
    Hosted,
    Enterprise,
    Private,
}

/// Ask a numbered question until a valid choice is given. An empty answer picks the first option.
fn choose(prompter: &mut dyn Prompter, question: &str, options: &[&str]) -> Result<usize> {
    prompter.say(&format!("{}", question.bold()));
    for (index, option) in options.iter().enumerate() {
        prompter.say(&format!("  [{}] {}", index + 1, option));
    }

    loop {
        let answer = prompter.ask("Please enter your choice:")?;
        if answer.is_empty() {
            return Ok(0);
        }
        match answer.parse::<usize>() {
            Ok(n) if (1..=options.len()).contains(&n) => return Ok(n - 1),
            _ => prompter.say(&format!(
                "{} \"{}\" is not a valid option, pick a number between 1 and {}",
                "!".yellow(),
                answer,
                options.len()
            )),
        }
    }
}

fn ask_host(prompter: &mut dyn Prompter, default: &str) -> Result<String> {
    loop {
        let answer = prompter.ask(&format!("Enter the API endpoint [{}]:", default))?;
        let host = if answer.is_empty() { default.to_string() } else { answer };
        if host.starts_with("http://") || host.starts_with("https://") {
            return Ok(host.trim_end_matches('/').to_string());
        }
        prompter.say(&format!(
            "{} the endpoint must start with http:// or https://",
            "!".yellow()
        ));
    }
}

fn ask_non_empty(prompter: &mut dyn Prompter, question: &str, secret: bool) -> Result<String> {
    loop {
        let answer = if secret {
            prompter.ask_secret(question)?
        } else {
            prompter.ask(question)?
        };
        if !answer.is_empty() {
            return Ok(answer);
        }
        prompter.say(&format!("{} a value is required", "!".yellow()));
    }
}

/// Run the question sequence.
///
/// When `existing` is set it is shown with secrets redacted and the user is
/// asked whether to overwrite it; `None` is returned when they decline.
pub fn collect(prompter: &mut dyn Prompter, existing: Option<&Config>) -> Result<Option<Config>> {
    if let Some(existing) = existing {
        prompter.say("Found an existing configuration:");
        prompter.say(&serde_json::to_string_pretty(&existing.redacted())?);
        let answer = prompter.ask("Overwrite the existing configuration? [y/N]:")?;
        if !matches!(answer.to_ascii_lowercase().as_str(), "y" | "yes") {
            return Ok(None);
        }
    }

    let mut config = Config {
        insecure: true,
        ..Default::default()
    };

    let flavour = match choose(
        prompter,
        "Select which type of Elastic Cloud offering you will be working with:",
        &[
            "Elasticsearch Service (hosted)",
            "Elastic Cloud Enterprise (self-managed)",
            "Elasticsearch Service Private",
        ],
    )? {
        0 => Flavour::Hosted,
        1 => Flavour::Enterprise,
        _ => Flavour::Private,
    };

    match flavour {
        Flavour::Hosted => {
            config.host = Some(HOSTED_ENDPOINT.to_string());
            let region = choose(prompter, "Select a region you would like to have as default:", HOSTED_REGIONS)?;
            config.region = Some(HOSTED_REGIONS[region].to_string());
        }
        Flavour::Enterprise => {
            config.host = Some(ask_host(prompter, ECE_DEFAULT_HOST)?);
            config.region = Some(ECE_REGION.to_string());
        }
        Flavour::Private => {
            config.host = Some(ask_host(prompter, HOSTED_ENDPOINT)?);
            let region = choose(prompter, "Select a region you would like to have as default:", HOSTED_REGIONS)?;
            config.region = Some(HOSTED_REGIONS[region].to_string());
        }
    }

    let auth = choose(
        prompter,
        "Which authentication mechanism would you like to use?",
        &["API Keys (recommended)", "Username and password"],
    )?;
    if auth == 0 {
        config.api_key = Some(ask_non_empty(prompter, "Paste your API Key and press enter:", true)?);
    } else {
        config.user = Some(ask_non_empty(prompter, "Type in your username:", false)?);
        config.pass = Some(ask_non_empty(prompter, "Type in your password:", true)?);
    }

    let output = choose(
        prompter,
        "What default output format would you like?",
        &["text - human-readable output", "json - machine-readable output"],
    )?;
    config.output = Some(if output == 0 {
        OutputFormat::Text
    } else {
        OutputFormat::Json
    });

    config.validate()?;
    Ok(Some(config))
}

/// Check the credentials work by fetching the current user.
///
/// Installations without the user endpoint answer 404, in which case listing
/// deployments is used instead.
pub async fn validate_credentials(api: &dyn PlatformApi) -> Result<()> {
    let err = match api.current_user().await {
        Ok(_) => return Ok(()),
        Err(Error::Remote { status: 404, .. }) => {
            tracing::debug!("user endpoint not found, validating with the deployment list");
            match api.list_deployments().await {
                Ok(_) => return Ok(()),
                Err(e) => e,
            }
        }
        Err(e) => e,
    };
    Err(Error::InvalidCredentials {
        message: err.to_string(),
    })
}

/// Validate `config` and write it to `path`. Returns the path written.
pub async fn finish(api: &dyn PlatformApi, config: &Config, path: &Path) -> Result<PathBuf> {
    validate_credentials(api).await?;
    let written = config.write(path)?;
    tracing::debug!(path = %written.display(), "configuration written");
    Ok(written)
}
