//! Mandatory configuration options of the GCP authentication extension.
//!
//! Each option is read from an environment variable first and from a
//! pipeline property second. The property name is derived from the
//! environment variable name: `GOOGLE_CLOUD_PROJECT` becomes
//! `google.cloud.project`. Empty values count as unset and there are no
//! defaults.

use crate::config::{ConfigProperties, Environment};
use crate::error::ConfigurationError;

/// A configurable option, identified by its canonical (env var) name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConfigurableOption {
    name: &'static str,
    readable_name: &'static str,
}

impl ConfigurableOption {
    /// Google Cloud project id, used for the `gcp.project_id` resource attribute
    pub const GOOGLE_CLOUD_PROJECT: Self = Self {
        name: "GOOGLE_CLOUD_PROJECT",
        readable_name: "Google Cloud Project ID",
    };

    /// Google Cloud region, used to compute the default OTLP endpoint
    pub const GOOGLE_CLOUD_REGION: Self = Self {
        name: "GOOGLE_CLOUD_REGION",
        readable_name: "Google Cloud Region",
    };

    pub const ALL: [Self; 2] = [Self::GOOGLE_CLOUD_PROJECT, Self::GOOGLE_CLOUD_REGION];

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn readable_name(&self) -> &'static str {
        self.readable_name
    }

    /// Environment variable name (e.g. `GOOGLE_CLOUD_PROJECT`)
    pub fn env_var(&self) -> &'static str {
        self.name
    }

    /// Property name (e.g. `google.cloud.project`)
    pub fn property(&self) -> String {
        self.name.to_ascii_lowercase().replace('_', ".")
    }

    /// Resolves the option, env var first.
    pub fn resolve(
        &self,
        env: &dyn Environment,
        properties: &ConfigProperties,
    ) -> Result<String, ConfigurationError> {
        if let Some(value) = env.var(self.env_var()).filter(|v| !v.is_empty()) {
            return Ok(value);
        }

        let property = self.property();
        match properties.get(&property).filter(|v| !v.is_empty()) {
            Some(value) => Ok(value.to_string()),
            None => Err(ConfigurationError {
                option: self.readable_name,
                env_var: self.env_var(),
                property,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn derived_names() {
        let option = ConfigurableOption::GOOGLE_CLOUD_REGION;

        assert_eq!(option.env_var(), "GOOGLE_CLOUD_REGION");
        assert_eq!(option.property(), "google.cloud.region");
        assert_eq!(
            ConfigurableOption::GOOGLE_CLOUD_PROJECT.property(),
            "google.cloud.project"
        );
    }

    #[test]
    fn canonical_names_are_unique() {
        let [a, b] = ConfigurableOption::ALL;
        assert_ne!(a.name(), b.name());
    }

    #[test]
    fn env_var_only() {
        for option in ConfigurableOption::ALL {
            let env = env(&[(option.env_var(), "from-env")]);

            let value = option.resolve(&env, &ConfigProperties::new()).unwrap();

            assert_eq!(value, "from-env");
        }
    }

    #[test]
    fn property_only() {
        for option in ConfigurableOption::ALL {
            let props = ConfigProperties::new().with(option.property(), "from-prop");

            let value = option.resolve(&HashMap::<String, String>::new(), &props).unwrap();

            assert_eq!(value, "from-prop");
        }
    }

    #[test]
    fn env_var_wins_over_property() {
        for option in ConfigurableOption::ALL {
            let env = env(&[(option.env_var(), "from-env")]);
            let props = ConfigProperties::new().with(option.property(), "from-prop");

            assert_eq!(option.resolve(&env, &props).unwrap(), "from-env");
        }
    }

    #[test]
    fn empty_env_var_falls_back_to_property() {
        let option = ConfigurableOption::GOOGLE_CLOUD_PROJECT;
        let env = env(&[("GOOGLE_CLOUD_PROJECT", "")]);
        let props = ConfigProperties::new().with("google.cloud.project", "proj-prop");

        assert_eq!(option.resolve(&env, &props).unwrap(), "proj-prop");
    }

    #[test]
    fn unset_fails_naming_both_sources() {
        for option in ConfigurableOption::ALL {
            let err = option
                .resolve(&HashMap::<String, String>::new(), &ConfigProperties::new())
                .unwrap_err();

            assert_eq!(err.env_var, option.env_var());
            assert_eq!(err.property, option.property());
            assert_eq!(err.option, option.readable_name());
        }
    }

    #[test]
    fn both_empty_fails() {
        let option = ConfigurableOption::GOOGLE_CLOUD_REGION;
        let env = env(&[("GOOGLE_CLOUD_REGION", "")]);
        let props = ConfigProperties::new().with("google.cloud.region", "");

        assert!(option.resolve(&env, &props).is_err());
    }
}
