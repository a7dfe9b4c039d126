use scoremate_api::{setup, telemetry};
use scoremate_core::Config;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = Config::from_env()?;
    telemetry::init_tracing(config.is_production())?;

    let (state, router) = setup::initialize_app(config.clone()).await?;
    setup::server::start_server(&config, state, router).await?;

    Ok(())
}
