use skycloud_api::setup;
use skycloud_core::Config;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = Config::from_env()?;

    // Storage self-test failures abort here with a non-zero exit status.
    let app = setup::initialize_app(config.clone()).await?;

    setup::server::start_server(&config, app.router).await?;

    app.scheduler.shutdown().await;

    Ok(())
}
