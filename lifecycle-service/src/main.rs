use lifecycle_service::{config::Config, Application};
use service_core::observability::init_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("lifecycle-service", "info,lifecycle_service=debug");

    let config = Config::from_env().expect("Failed to load configuration");
    let application = Application::build(config).await?;
    application.run_until_stopped().await?;

    Ok(())
}
