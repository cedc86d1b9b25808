//! Configuration for the chat pipeline.

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// Configuration parameters for planning, retrieval and answering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RagConfig {
    /// Result-count ceiling used for "all relevant" queries.
    pub max_results: usize,
    /// Sampling temperature for answer generation.
    pub temperature: f32,
    /// Language answers fall back to when the user's language is unclear.
    pub locale: String,
    /// Name of the persona the assistant speaks as.
    pub persona: String,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            max_results: 5,
            temperature: 0.7,
            locale: "French".to_string(),
            persona: "Chroniqueur de Runeterra".to_string(),
        }
    }
}

impl RagConfig {
    /// Create a new builder for constructing a [`RagConfig`].
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }
}

/// Builder for constructing a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Set the ceiling for "all relevant" queries.
    pub fn max_results(mut self, max_results: usize) -> Self {
        self.config.max_results = max_results;
        self
    }

    /// Set the sampling temperature.
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.config.temperature = temperature;
        self
    }

    /// Set the default answer language.
    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.config.locale = locale.into();
        self
    }

    /// Set the assistant persona.
    pub fn persona(mut self, persona: impl Into<String>) -> Self {
        self.config.persona = persona.into();
        self
    }

    /// Build the [`RagConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if:
    /// - `max_results == 0`
    /// - `temperature` is outside `0.0..=2.0`
    /// - `locale` or `persona` is blank
    pub fn build(self) -> Result<RagConfig> {
        if self.config.max_results == 0 {
            return Err(RagError::ConfigError("max_results must be greater than zero".to_string()));
        }
        if !(0.0..=2.0).contains(&self.config.temperature) {
            return Err(RagError::ConfigError(format!(
                "temperature ({}) must be between 0.0 and 2.0",
                self.config.temperature
            )));
        }
        if self.config.locale.trim().is_empty() {
            return Err(RagError::ConfigError("locale must not be empty".to_string()));
        }
        if self.config.persona.trim().is_empty() {
            return Err(RagError::ConfigError("persona must not be empty".to_string()));
        }
        Ok(self.config)
    }
}
