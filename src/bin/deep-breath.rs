use clap::Parser;
use log::{error, info, LevelFilter};
use deep_breath::app::Cli;
use deep_breath::error::{AppRunError, ConfigError};
use deep_breath::{init_logging, run};

fn main() -> Result<(), AppRunError> {
    let cli = Cli::parse();
    init_logging(if cli.verbose { LevelFilter::Debug } else { LevelFilter::Info });
    info!(concat!("DeepBreath ", env!("CARGO_PKG_VERSION")));

    match run(cli) {
        Err(AppRunError::ConfigError { source: ConfigError::CanNotLock { .. } }) => {
            error!("Another instance is already connected to the sensor");
            Ok(())
        },
        Err(err) => {
            error!("Unexpected error: {}", err);
            Err(err)
        },
        Ok(_) => Ok(()),
    }
}
