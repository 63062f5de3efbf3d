//! Main entry point for the Tessera server.
//!
//! Loads configuration, bootstraps every configured module in dependency
//! order, then serves until Ctrl+C or SIGTERM.

use tessera_module::ModuleManager;
use tessera_server::{
    Configuration, RunMode, provider_catalog,
    startup::{self, ShutdownSignal},
};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let configuration = Configuration::new()?;

    let _logging_guard = startup::init_logging(&configuration.logging_config())?;
    info!(
        "Loaded configuration from {}",
        configuration.config_path().display()
    );

    let application = configuration.application_configuration()?;
    info!("Configured modules: {:?}", application.module_list());

    let mut manager = ModuleManager::new();
    if let Err(e) = manager.init(&application, &provider_catalog()).await {
        error!("Tessera server failed to start: {}", e);
        manager.shutdown().await;
        return Err(e.into());
    }

    if configuration.run_mode() == RunMode::Init {
        info!("Tessera initialization completed, exiting");
        manager.shutdown().await;
        return Ok(());
    }

    info!("Tessera server started");

    let shutdown = ShutdownSignal::new();
    let receiver = shutdown.subscribe();
    startup::listen_for_shutdown_signal(shutdown);
    startup::wait_for_shutdown(receiver).await;

    manager.shutdown().await;
    info!("Tessera server stopped");
    Ok(())
}
