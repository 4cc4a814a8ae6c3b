//! Facilities for reading runtime configuration values
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::error;

/// Property set parser limits
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Maximum size of a PropertySetStream, including all of its property sets
    #[serde(default = "Config::default_max_property_set_size")]
    pub max_property_set_size: u64,
    /// Maximum number of elements in a single VT_VECTOR or VT_ARRAY
    #[serde(default = "Config::default_max_sequence_items")]
    pub max_sequence_items: u32,
    /// Maximum number of entries in a Dictionary
    #[serde(default = "Config::default_max_dictionary_entries")]
    pub max_dictionary_entries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_property_set_size: Self::default_max_property_set_size(),
            max_sequence_items: Self::default_max_sequence_items(),
            max_dictionary_entries: Self::default_max_dictionary_entries(),
        }
    }
}

impl Config {
    /// Loads the configuration from `ole.toml` and `OLE__*` environment variables
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let config: Self = Figment::new()
            .merge(Toml::file("ole.toml"))
            .merge(Env::prefixed("OLE__").split("__"))
            .extract()
            .map_err(|err| {
                error!("Failed to validate configuration: {}", err);
                err
            })?;
        // From MS-OLEPS 2.21: the limit MUST be at least 262,144 bytes
        if config.max_property_set_size < 262_144 {
            error!(
                "Value of max_property_set_size too small (must be at least 262144, got {})",
                config.max_property_set_size
            );
            return Err("Value of max_property_set_size too small".into());
        }
        Ok(config)
    }

    // From MS-OLEPS 2.21
    // An implementation SHOULD enforce a limit on the total size of a PropertySetStream packet.
    // This limit MUST be at least 262,144 bytes, and for maximum interoperability SHOULD be
    // 2,097,152 bytes.
    fn default_max_property_set_size() -> u64 {
        2_097_152
    }

    fn default_max_sequence_items() -> u32 {
        1_048_576
    }

    fn default_max_dictionary_entries() -> u32 {
        65_536
    }
}
