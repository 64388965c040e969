//! Search configuration, loaded from JSON with per-field defaults.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Parameters of the genetic search. Every field has a default, so a
/// config file only needs to name what it changes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GaConfig {
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    #[serde(default = "default_population_start_size")]
    pub population_start_size: usize,
    /// Share of the population kept by selection, in percent.
    #[serde(default = "default_selection_percent")]
    pub selection_percent: u32,
    /// Probability that an iteration mutates at all.
    #[serde(default)]
    pub mutation_probability: f64,
    /// Share of the population touched when mutation happens, in percent.
    #[serde(default = "default_mutation_percent")]
    pub mutation_percent: u32,
    #[serde(default = "default_max_no_improvement_epochs")]
    pub max_no_improvement_epochs: usize,
    /// Probability that a layer flag starts set in the initial population.
    #[serde(default = "default_init_probability")]
    pub dp_by_parts_init_probability: f64,
    /// Bytes per data token, used to report buffer sizes in MB.
    #[serde(default = "default_data_token_size")]
    pub data_token_size: u64,
    #[serde(default = "default_parallel_workers")]
    pub parallel_workers: usize,
    #[serde(default)]
    pub seed: u64,
    #[serde(default = "default_verbose")]
    pub verbose: bool,
}

fn default_epochs() -> usize {
    10
}

fn default_population_start_size() -> usize {
    100
}

fn default_selection_percent() -> u32 {
    50
}

fn default_mutation_percent() -> u32 {
    10
}

fn default_max_no_improvement_epochs() -> usize {
    10
}

fn default_init_probability() -> f64 {
    0.5
}

fn default_data_token_size() -> u64 {
    4
}

fn default_parallel_workers() -> usize {
    1
}

fn default_verbose() -> bool {
    true
}

impl Default for GaConfig {
    fn default() -> Self {
        GaConfig {
            epochs: default_epochs(),
            population_start_size: default_population_start_size(),
            selection_percent: default_selection_percent(),
            mutation_probability: 0.0,
            mutation_percent: default_mutation_percent(),
            max_no_improvement_epochs: default_max_no_improvement_epochs(),
            dp_by_parts_init_probability: default_init_probability(),
            data_token_size: default_data_token_size(),
            parallel_workers: default_parallel_workers(),
            seed: 0,
            verbose: default_verbose(),
        }
    }
}

impl GaConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| Error::Io(format!("config {}: {e}", path.display())))?;
        let config: GaConfig = serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("config {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.population_start_size == 0 {
            return Err(Error::Config("population_start_size must be positive".into()));
        }
        if self.selection_percent > 100 {
            return Err(Error::Config(format!(
                "selection_percent {} exceeds 100",
                self.selection_percent
            )));
        }
        if self.mutation_percent > 100 {
            return Err(Error::Config(format!(
                "mutation_percent {} exceeds 100",
                self.mutation_percent
            )));
        }
        if !(0.0..=1.0).contains(&self.mutation_probability) {
            return Err(Error::Config(format!(
                "mutation_probability {} outside [0, 1]",
                self.mutation_probability
            )));
        }
        if !(0.0..=1.0).contains(&self.dp_by_parts_init_probability) {
            return Err(Error::Config(format!(
                "dp_by_parts_init_probability {} outside [0, 1]",
                self.dp_by_parts_init_probability
            )));
        }
        if self.data_token_size == 0 {
            return Err(Error::Config("data_token_size must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_file_fills_in_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"epochs": 3, "seed": 42}}"#).unwrap();
        let config = GaConfig::load(file.path()).unwrap();
        assert_eq!(config.epochs, 3);
        assert_eq!(config.seed, 42);
        assert_eq!(config.population_start_size, 100);
        assert_eq!(config.selection_percent, 50);
        assert_eq!(config.data_token_size, 4);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let mut config = GaConfig::default();
        config.selection_percent = 150;
        assert!(config.validate().is_err());

        let mut config = GaConfig::default();
        config.mutation_probability = 1.5;
        assert!(config.validate().is_err());

        let mut config = GaConfig::default();
        config.population_start_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let err = GaConfig::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("config"));
    }
}
