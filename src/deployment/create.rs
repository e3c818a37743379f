//! Deployment creation.

use std::path::PathBuf;
use std::sync::Arc;

use crate::api::models::{DeploymentCreateRequest, DeploymentCreateResponse};
use crate::api::PlatformApi;
use crate::format::{Output, OutputSink};
use crate::tracker::{self, TrackParams, TrackedResource};
use crate::utils::id::random_request_id;
use crate::Result;

use super::payload::{new_payload, PayloadOptions};

#[derive(Debug, Clone)]
pub struct CreateParams {
    /// Full request document; bypasses the template builder.
    pub file: Option<PathBuf>,
    pub options: PayloadOptions,
    /// Print the request instead of sending it.
    pub generate_payload: bool,
    pub request_id: Option<String>,
    pub track: bool,
    pub track_params: TrackParams,
}

/// Read a create request from a JSON file.
pub fn read_payload(path: &std::path::Path) -> Result<DeploymentCreateRequest> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Create a deployment, optionally following its plans to completion.
pub async fn create(
    api: Arc<dyn PlatformApi>,
    params: CreateParams,
    output: &Output,
    stderr: &OutputSink,
) -> Result<()> {
    let request = match &params.file {
        Some(path) => read_payload(path)?,
        None => new_payload(api.as_ref(), &params.options).await?,
    };

    if params.generate_payload {
        return output.json(&request);
    }

    let request_id = params
        .request_id
        .clone()
        .filter(|id| !id.is_empty())
        .unwrap_or_else(random_request_id);

    let response = match api.create_deployment(&request_id, &request).await {
        Ok(response) => response,
        Err(e) => {
            stderr.emit_line(
                "The deployment creation returned with an error. Use the displayed request ID to recreate the deployment resources",
            );
            stderr.emit_line(&format!("Request ID: {}", request_id));
            return Err(e);
        }
    };
    tracing::debug!(deployment_id = %response.id, "deployment created");

    output.format("deployment/create", &response)?;

    if !params.track {
        return Ok(());
    }
    let track_params = TrackParams {
        resources: tracked_resources(&response),
        ..params.track_params
    };
    tracker::track_change(api, track_params, output.sink()).await
}

fn tracked_resources(response: &DeploymentCreateResponse) -> Vec<TrackedResource> {
    response
        .resources
        .iter()
        .map(|r| TrackedResource {
            deployment_id: Some(response.id.clone()),
            resource_id: Some(r.id.clone()),
            kind: r.kind,
            ref_id: Some(r.ref_id.clone()),
        })
        .collect()
}
