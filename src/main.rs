use clap::Parser;

use persona_sim::cli::{dispatch, resolve_config, Cli};
use persona_sim::logging;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = resolve_config(cli.config.as_deref())?;
    logging::init(&config.log);
    dispatch(cli, config)
}
