use anyhow::Result;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;

use config::{BusKind, Config};
use dbus_interface::{IdentityService, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("healidd starting");

    let config = Config::load()?;
    tracing::info!(
        data_dir = %config.identity.data_dir.display(),
        remote = config.identity.fhir_url.as_deref().unwrap_or("offline"),
        bus = %config.bus,
        "configuration loaded"
    );

    let engine = engine::spawn_engine(config.identity.clone()).await?;

    let builder = match config.bus {
        BusKind::System => zbus::connection::Builder::system()?,
        BusKind::Session => zbus::connection::Builder::session()?,
    };
    let _connection = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, IdentityService::new(engine))?
        .build()
        .await?;

    tracing::info!(name = BUS_NAME, path = OBJECT_PATH, "healidd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("healidd shutting down");

    Ok(())
}
