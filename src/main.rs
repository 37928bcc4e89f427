//! Main entry point for the fan control daemon and client

use anyhow::Context;
use clap::Parser;
use omen_fan::{
    args::{Args, Commands},
    client::{self, FanControlClient},
    daemon::{self, DaemonOptions},
    logging, DaemonConfig, FanControlError, LifecycleState,
};

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    let result = runtime.block_on(run(args));
    // Blocking sysfs tasks still stuck in the kernel are abandoned, not joined.
    runtime.shutdown_background();
    result
}

async fn run(args: Args) -> anyhow::Result<()> {
    let log_file = match &args.command {
        Commands::Daemon { log_file, .. } => log_file.clone(),
        _ => None,
    };
    logging::setup(args.verbose, log_file.as_deref()).context("failed to set up logging")?;

    let config_path = args.config.clone().unwrap_or_else(DaemonConfig::default_path);

    match args.command {
        Commands::Daemon {
            monitor_only, csv, ..
        } => {
            log::info!(
                "omen-fan v{} (git {} / {}) built {}",
                env!("CARGO_PKG_VERSION"),
                option_env!("GIT_HASH").unwrap_or("unknown"),
                option_env!("GIT_DESC").unwrap_or("unknown"),
                option_env!("BUILD_TIME").unwrap_or("unknown")
            );
            let state = daemon::run(DaemonOptions {
                config_path: Some(config_path),
                monitor_only,
                csv,
            })
            .await
            .context("fan control daemon failed")?;

            if state == LifecycleState::Faulted {
                anyhow::bail!(FanControlError::Faulted(
                    "fans were handed back to the BIOS; see the log for the cause".to_string()
                ));
            }
            Ok(())
        }
        Commands::Preview { temp, battery } => {
            let config = client::load_local_config(&config_path)
                .with_context(|| format!("failed to read {}", config_path.display()))?;
            let duty = client::preview(&config, temp, battery);
            println!(
                "{}°C -> {}%{}",
                temp,
                duty,
                if battery { " (on battery)" } else { "" }
            );
            Ok(())
        }
        Commands::Sensors => {
            let config = client::load_local_config(&config_path)
                .with_context(|| format!("failed to read {}", config_path.display()))?;
            client::print_sensors(&config).await?;
            Ok(())
        }
        command => {
            let client = FanControlClient::new()
                .await
                .context("failed to connect to the system bus")?;
            client.handle(command).await?;
            Ok(())
        }
    }
}
