//! Typed access to the platform management API.
//!
//! [`PlatformApi`] is the seam every subsystem talks through. [`HttpApi`] is
//! the reqwest-backed implementation used by the binary.

pub mod client;
pub mod models;

#[cfg(test)]
pub mod fixture;

use async_trait::async_trait;
use serde_json::Value;

use crate::Result;

pub use client::{Credentials, HttpApi};
pub use models::*;

/// Parameters of a deployment template fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateQuery {
    pub template_id: String,
    pub region: String,
    pub stack_version: Option<String>,
    pub show_instance_configurations: bool,
}

/// Remote operations consumed by ecctl.
///
/// Implementations never retry; retry policy belongs to the caller.
#[async_trait]
pub trait PlatformApi: Send + Sync {
    /// `GET /deployments/templates/<id>`
    async fn get_deployment_template(&self, query: &TemplateQuery) -> Result<DeploymentTemplateInfo>;

    /// Available stack versions, newest first.
    async fn list_stack_versions(&self) -> Result<Vec<String>>;

    /// `POST /deployments?request_id=<token>`
    async fn create_deployment(
        &self,
        request_id: &str,
        request: &DeploymentCreateRequest,
    ) -> Result<DeploymentCreateResponse>;

    /// `GET /deployments/<id>` with plans and plan logs.
    async fn get_deployment(&self, deployment_id: &str) -> Result<DeploymentGetResponse>;

    /// `GET /deployments/<id>/<kind>/<ref_id>` with plans and plan logs.
    async fn get_resource(
        &self,
        deployment_id: &str,
        kind: ResourceKind,
        ref_id: &str,
    ) -> Result<ResourceInfo>;

    /// Deployment owning the resource, if any.
    async fn find_deployment_id(&self, kind: ResourceKind, resource_id: &str) -> Result<Option<String>>;

    /// `GET /platform/infrastructure/allocators/<id>`
    async fn get_allocator(&self, allocator_id: &str) -> Result<AllocatorInfo>;

    /// `POST /platform/infrastructure/allocators/<id>/_vacate`
    async fn vacate_allocator(&self, request: &VacateRequest) -> Result<MoveClustersResponse>;

    /// Start or stop maintenance mode on an allocator.
    async fn set_allocator_maintenance(&self, allocator_id: &str, enabled: bool) -> Result<()>;

    /// `GET /users/me`
    async fn current_user(&self) -> Result<Value>;

    /// `GET /deployments`
    async fn list_deployments(&self) -> Result<Value>;
}
