pub mod commands;
pub mod config;
pub mod k8s;
pub mod telemetry;
#[cfg(test)]
pub mod test_utils;
pub mod yaml;
