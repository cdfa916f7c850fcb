//! SUOTA updater for BLE devices
//!
//! Finds a device advertising in SUOTA mode, sends it a firmware image and
//! reboots it into the new firmware.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::{LevelFilter, debug, warn};
use suota_engine::{Config, Image, RunSummary, Transport, Updater, channel};

mod btle;
mod console;
mod prompt;

use btle::BtleTransport;
use console::Console;
use prompt::StdinPrompt;

#[derive(Parser)]
#[command(name = "suota-ble")]
#[command(about = "Update a BLE device over the air (SUOTA)")]
struct Cli {
    /// Firmware image to send
    #[arg(short, long)]
    fw: PathBuf,
    /// Show debug output
    #[arg(short, long)]
    debug: bool,
    /// Bluetooth adapter to use, matched against the adapter info
    #[arg(short, long)]
    port: Option<String>,
    /// JSON file with timeouts and pacing
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Always exit with status 1, like the old updater script
    #[arg(long)]
    legacy_exit_code: bool,
}

fn init_logger(debug: bool) {
    let level = if debug { LevelFilter::Debug } else { LevelFilter::Info };
    let mut builder = pretty_env_logger::formatted_builder();
    builder.filter_level(level);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    builder.init();
}

fn exit_status(summary: &RunSummary, legacy: bool) -> u8 {
    if legacy || !summary.succeeded() { 1 } else { 0 }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logger(cli.debug);

    let image = match Image::load(&cli.fw) {
        Ok(image) => image,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    debug!("File size: {} bytes", image.len());

    let config = match &cli.config {
        Some(path) => match Config::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{}: {e}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => Config::default(),
    };

    println!("Looking to update a device with fw: {}", cli.fw.display());

    tokio::select! {
        code = run(&cli, &image, config) => code,
        _ = tokio::signal::ctrl_c() => {
            println!("Exiting...");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli, image: &Image, config: Config) -> ExitCode {
    let adapter = match btle::select_adapter(cli.port.as_deref()).await {
        Ok(adapter) => adapter,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let (sink, queues) = channel(config.event_queue_capacity);
    let mut transport = BtleTransport::new(adapter, sink);
    // leftovers from an earlier run
    if let Err(e) = transport.cancel_connect().await {
        warn!("cannot cancel connect: {e}");
    }
    if let Err(e) = transport.disconnect_all().await {
        warn!("disconnect failed: {e}");
    }

    let mut updater = Updater::new(transport, queues, config);
    let summary = updater.run(image, &mut Console, &mut StdinPrompt::new()).await;

    println!(
        "Done after {} attempt{}. Shutting down...",
        summary.attempts,
        if summary.attempts == 1 { "" } else { "s" }
    );
    ExitCode::from(exit_status(&summary, cli.legacy_exit_code))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use suota_engine::SuotaError;

    use super::*;

    #[test]
    fn cli_flags() {
        let cli = Cli::parse_from(["suota-ble", "-f", "fw.img", "-d", "-p", "hci1", "--legacy-exit-code"]);
        assert_eq!(cli.fw, PathBuf::from("fw.img"));
        assert!(cli.debug);
        assert_eq!(cli.port.as_deref(), Some("hci1"));
        assert!(cli.config.is_none());
        assert!(cli.legacy_exit_code);

        assert!(Cli::try_parse_from(["suota-ble"]).is_err());
    }

    #[test]
    fn exit_status_follows_last_attempt() {
        let failed = RunSummary {
            attempts: 2,
            last: Some(Err(SuotaError::ScanTimeout { window: Duration::from_secs(1) })),
        };
        assert_eq!(exit_status(&failed, false), 1);
        assert_eq!(exit_status(&failed, true), 1);

        let nothing = RunSummary { attempts: 0, last: None };
        assert_eq!(exit_status(&nothing, false), 1);
    }
}
