use thumbsmith_core::Config;

// Use mimalloc as the global allocator for lower fragmentation in long-running containers.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = Config::from_env()?;

    // Initialize the application (database, services, routes)
    let (state, router) = thumbsmith_api::setup::initialize_app(config.clone()).await?;

    thumbsmith_api::setup::server::start_server(&config, router).await?;

    state.runner.shutdown().await;
    tracing::info!("Workflow runner stopped; unfinished runs resume on next start");

    Ok(())
}
