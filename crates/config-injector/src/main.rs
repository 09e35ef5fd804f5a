use anyhow::Result;
use tokio::runtime::Runtime;

use config_injector::config::Config;
use config_injector::{cli, server, tracing};

fn main() -> Result<()> {
    let matches = cli::build_cli().get_matches();
    let config = Config::from_args(&matches)?;

    tracing::setup_tracing(&config.log_level, &config.log_fmt, config.log_no_color)?;

    Runtime::new()?.block_on(server::run(config))
}
