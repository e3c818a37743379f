//! Deployment creation from templates.

pub mod create;
pub mod payload;

pub use create::{create, CreateParams};
pub use payload::{build_payload, new_payload, PayloadOptions, ResourceSpec};
