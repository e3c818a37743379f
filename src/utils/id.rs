//! Identifier helpers.

use once_cell::sync::Lazy;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use regex::Regex;

/// Length of a generated idempotency token.
pub const REQUEST_ID_LEN: usize = 64;

static DEPLOYMENT_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-f0-9]{32}$").expect("deployment id pattern is valid"));

/// Generate a cryptographically random `[A-Za-z0-9]{64}` idempotency token.
pub fn random_request_id() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(REQUEST_ID_LEN)
        .map(char::from)
        .collect()
}

/// Whether `id` has the shape of a deployment id.
pub fn is_deployment_id(id: &str) -> bool {
    DEPLOYMENT_ID.is_match(id)
}
