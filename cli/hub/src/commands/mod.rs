mod entries;
mod health;
mod tags;

use anyhow::Result;
use bpaf::Bpaf;
use hub_catalog::{Client, HubQueries, KeyScheme};
use indoc::indoc;
use tracing::debug;

use crate::config::Config;
use crate::utils::init::init_client;

const HUB_DESCRIPTION: &str = indoc! {"
    Browse the hub catalog from the terminal.

    Entries, single entries and the tag vocabulary are read from the hub API
    configured in 'hub.toml' or through '$HUB_API_BASE_URL'."
};

fn vec_len<T>(x: Vec<T>) -> usize {
    Vec::len(&x)
}

#[derive(Bpaf, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verbosity {
    Verbose(
        /// Increase logging verbosity
        ///
        /// Invoke multiple times for increasing detail.
        #[bpaf(short('v'), long("verbose"), req_flag(()), many, map(vec_len))]
        usize,
    ),

    /// Silence logs except for errors
    #[bpaf(short, long)]
    Quiet,
}

impl Default for Verbosity {
    fn default() -> Self {
        Verbosity::Verbose(0)
    }
}

#[derive(Bpaf)]
#[bpaf(options, descr(HUB_DESCRIPTION))]
pub struct HubCli(#[bpaf(external(hub_args))] pub HubArgs);

/// Main hub args parser
///
/// To parse the hub CLI, use [`HubCli`] instead using [`hub_cli()`].
#[derive(Debug, Bpaf)]
#[bpaf(ignore_rustdoc)]
pub struct HubArgs {
    #[bpaf(external, fallback(Default::default()))]
    pub verbosity: Verbosity,

    #[bpaf(external(commands))]
    command: Commands,
}

impl HubArgs {
    /// Build the client from `config` and run the selected command.
    pub async fn handle(self, config: Config) -> Result<()> {
        let client = init_client(&config)?;
        let keys = config
            .cache_namespace
            .as_deref()
            .map(KeyScheme::new)
            .unwrap_or_default();
        debug!(namespace = keys.namespace(), "initialized hub queries");
        let queries = HubQueries::new(client, keys);

        self.command.handle(&queries).await
    }
}

#[derive(Bpaf, Clone, Debug)]
enum Commands {
    /// List catalog entries
    #[bpaf(command)]
    Entries(#[bpaf(external(entries::entries))] entries::Entries),

    /// Show a single catalog entry
    #[bpaf(command)]
    Entry(#[bpaf(external(entries::entry))] entries::Entry),

    /// List the tag vocabulary
    #[bpaf(command)]
    Tags(#[bpaf(external(tags::tags))] tags::Tags),

    /// Check that the hub API is alive
    #[bpaf(command)]
    Health(#[bpaf(external(health::probe))] health::Probe),

    /// Check that the hub API is ready to serve requests
    #[bpaf(command)]
    Ready(#[bpaf(external(health::probe))] health::Probe),
}

impl Commands {
    async fn handle(self, queries: &HubQueries<Client>) -> Result<()> {
        match self {
            Commands::Entries(args) => args.handle(queries).await,
            Commands::Entry(args) => args.handle(queries).await,
            Commands::Tags(args) => args.handle(queries).await,
            Commands::Health(args) => args.handle(queries, health::ProbeKind::Health).await,
            Commands::Ready(args) => args.handle(queries, health::ProbeKind::Readiness).await,
        }
    }
}
