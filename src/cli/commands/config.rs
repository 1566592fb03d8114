//! `config`: print the effective configuration.

use anyhow::Result;
use serde::Serialize;

use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct ConfigOutput(pub Config);

impl CommandOutput for ConfigOutput {
    fn to_human(&self) -> String {
        serde_yaml::to_string(&self.0).unwrap_or_default()
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.0).unwrap_or_default()
    }
}

pub fn execute(config: Config, json: bool) -> Result<()> {
    output(&ConfigOutput(config), json);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_output_is_reloadable() {
        let mut config = Config::default();
        config.consumer.group_id = "grading-workers".to_string();

        let yaml = ConfigOutput(config).to_human();
        let reparsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(reparsed.consumer.group_id, "grading-workers");
        assert_eq!(reparsed.retry.max_retries, 3);
    }
}
