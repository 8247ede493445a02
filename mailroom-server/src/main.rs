use mailroom_service::{config::Config, observability, routes, server::Server, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Optional first argument: path to a config file (defaults to ./config.toml)
    let config = match std::env::args().nth(1) {
        Some(path) => Config::load_from(&path)?,
        None => Config::load()?,
    };

    observability::init_tracing(&config)?;

    let state = AppState::initialize(config).await?;
    let app = routes::router(state.clone());

    Server::new(state).serve(app).await?;
    Ok(())
}
