use chrono::{DateTime, Utc};

fn main() {
    // SOURCE_DATE_EPOCH keeps release builds reproducible.
    let built_at = std::env::var("SOURCE_DATE_EPOCH")
        .ok()
        .and_then(|epoch| epoch.parse::<i64>().ok())
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or_else(Utc::now);

    println!("cargo:rustc-env=ECCTL_BUILD_DATE={}", built_at.format("%Y-%m-%dT%H:%M:%SZ"));
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");
}
