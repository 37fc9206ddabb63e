use anyhow::{Context, bail};
use hub_catalog::{Client, HubClient, MockClient};
use tracing::debug;

use crate::config::Config;

/// Initialize the hub client
///
/// - Serve the catalog from a file if `mock_data` (`$HUB_MOCK_DATA`) is set
/// - Talk to the hub API at `api_base_url` otherwise
pub fn init_client(config: &Config) -> Result<Client, anyhow::Error> {
    if let Some(path) = &config.mock_data {
        if !path.exists() {
            bail!("path to mock data file doesn't exist: {}", path.display());
        }

        debug!(mock_data_path = %path.display(), "using mock hub client");
        let client = MockClient::from_path(path).context("Could not load mock data")?;
        return Ok(client.into());
    }

    let client_config = config.client_config();
    debug!(base_url = %client_config.base_url, "using hub client");
    let client = HubClient::new(client_config).context("Could not create hub client")?;
    Ok(client.into())
}
