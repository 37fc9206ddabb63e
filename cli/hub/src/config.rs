use std::collections::{BTreeMap, HashMap};
use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Config as HierarchicalConfig, Environment};
use hub_catalog::{DEFAULT_BASE_URL, HubClientConfig};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Name of the hub directory under the user's config directory
const HUB_DIR_NAME: &str = "hub";
const HUB_CONFIG_DIR_VAR: &str = "HUB_CONFIG_DIR";
const HUB_ENV_PREFIX: &str = "HUB_";
pub const HUB_CONFIG_FILE: &str = "hub.toml";

#[derive(Clone, Debug, Deserialize, Default, Serialize)]
pub struct Config {
    /// Base URL of the hub API (default: [DEFAULT_BASE_URL])
    ///
    /// Set through `$HUB_API_BASE_URL` to point a build at another service.
    pub api_base_url: Option<String>,

    /// User agent sent with every request
    pub user_agent: Option<String>,

    /// Additional headers to include in requests
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// First segment of every cache key
    pub cache_namespace: Option<String>,

    /// Serve the catalog from a JSON file instead of the hub API
    pub mock_data: Option<PathBuf>,

    /// Directory the config file is read from (default: `$XDG_CONFIG_HOME/hub`)
    pub config_dir: PathBuf,
}

impl Config {
    /// Creates a [Config] from the config file and the environment
    pub fn parse() -> Result<Config> {
        let config_dir = match env::var(HUB_CONFIG_DIR_VAR) {
            Ok(dir) => {
                debug!("`${HUB_CONFIG_DIR_VAR}` set: {dir}");
                PathBuf::from(dir)
            },
            Err(_) => {
                let config_dir = dirs::config_dir()
                    .context("Could not determine the user's config directory")?
                    .join(HUB_DIR_NAME);
                debug!("`${HUB_CONFIG_DIR_VAR}` not set, using {config_dir:?}");
                config_dir
            },
        };

        Self::read(&config_dir, env::vars())
    }

    /// Layer defaults, `{config_dir}/hub.toml` and `HUB_` prefixed `vars`.
    fn read(config_dir: &Path, vars: impl IntoIterator<Item = (String, String)>) -> Result<Config> {
        let hub_vars = vars
            .into_iter()
            .filter_map(|(k, v)| k.strip_prefix(HUB_ENV_PREFIX).map(|k| (k.to_lowercase(), v)))
            .collect::<HashMap<_, _>>();

        let config_file = config_dir.join(HUB_CONFIG_FILE);
        debug!(path = ?config_file, n_vars = hub_vars.len(), "reading config");

        let final_config = HierarchicalConfig::builder()
            .set_default("api_base_url", DEFAULT_BASE_URL)?
            // The config file cannot change the config dir.
            .set_override("config_dir", config_dir.to_string_lossy().as_ref())?
            .add_source(
                config::File::from(config_file)
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(Environment::default().source(Some(hub_vars)))
            .build()?;

        final_config
            .try_deserialize()
            .context("Could not parse config")
    }

    /// Configuration of the hub client
    pub fn client_config(&self) -> HubClientConfig {
        let default_headers = (!self.headers.is_empty()).then(|| {
            let mut headers = BTreeMap::from([("accept".to_string(), "application/json".to_string())]);
            headers.extend(
                self.headers
                    .iter()
                    .map(|(name, value)| (name.to_lowercase(), value.clone())),
            );
            headers
        });

        HubClientConfig {
            base_url: self
                .api_base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            default_headers,
            user_agent: Some(
                self.user_agent
                    .clone()
                    .unwrap_or_else(|| format!("hub/{}", env!("CARGO_PKG_VERSION"))),
            ),
        }
    }
}
