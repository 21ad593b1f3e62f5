pub mod commands;
pub mod config;
pub mod fetch;
pub mod k8s;
pub mod manifests;
pub mod params;
pub mod precondition;
pub mod prompt;
pub mod reconcile;
pub mod record;
pub mod telemetry;
#[cfg(test)]
pub mod test_utils;
pub mod version;
pub mod yaml;
