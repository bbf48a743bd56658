use clap::Parser;
use log::{error, info};
use rollcall::configuration::config::{CliArgs, Config};
use rollcall::controller::controller_handler::Controller;

#[tokio::main]
async fn main() {
    // RUST_LOG overrides the default level
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_target(false)
        .init();

    println!(
        "
==============================================================================
               rollcall {} - classroom attendance service
==============================================================================
",
        env!("CARGO_PKG_VERSION")
    );

    info!("Importing configuration");
    let args = CliArgs::parse();

    let config = Config::load(&args).unwrap_or_else(|e| {
        error!("Unable to load configuration: {}", e);
        std::process::exit(1);
    });
    info!("Configuration imported successfully");

    let mut controller = Controller::new(config).unwrap_or_else(|e| {
        error!("Unable to create a controller instance: {}, exiting...", e);
        std::process::exit(1);
    });

    tokio::select! {
        result = controller.run() => {
            if let Err(e) = result {
                error!("Error occured in the controller process: {}, exiting...", e);
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested, exiting");
        }
    }
}
