//! Facilities for reading runtime configuration values
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::*;

#[derive(Debug, Clone, Deserialize)]
/// Link parser limits
pub struct Config {
    /// Maximum number of ExtraData blocks decoded from a single link
    #[serde(default = "Config::default_max_extra_blocks")]
    pub max_extra_blocks: usize,
    /// Maximum number of items in an ITEMIDLIST
    #[serde(default = "Config::default_max_idlist_items")]
    pub max_idlist_items: usize,
    /// The code page of the ANSI strings found in links
    #[serde(default = "Config::default_codepage")]
    pub codepage: u16,
    /// Limits for the property values embedded in property stores
    #[serde(default)]
    pub oleps: ctxole::config::Config,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_extra_blocks: Self::default_max_extra_blocks(),
            max_idlist_items: Self::default_max_idlist_items(),
            codepage: Self::default_codepage(),
            oleps: ctxole::config::Config::default(),
        }
    }
}

impl Config {
    /// Loads the configuration from `lnk.toml` and `LNK__*` environment variables
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let config: Self = Figment::new()
            .merge(Toml::file("lnk.toml"))
            .merge(Env::prefixed("LNK__").split("__"))
            .extract()
            .map_err(|err| {
                error!("Failed to validate configuration: {}", err);
                err
            })?;
        Ok(config)
    }

    fn default_max_extra_blocks() -> usize {
        256
    }

    fn default_max_idlist_items() -> usize {
        1024
    }

    fn default_codepage() -> u16 {
        1252
    }
}
