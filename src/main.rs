use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use plaza::auth::handlers::create_account;
use plaza::config::{Cli, Command, Config};
use plaza::db;
use plaza::forms::FormData;
use plaza::schedule::{SqliteTaskQueue, Worker};
use plaza::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse CLI args and load config
    let cli = Cli::parse();
    let data_dir = Config::data_dir(&cli);
    std::fs::create_dir_all(&data_dir)?;
    tracing::info!("Data directory: {}", data_dir.display());

    let config = Config::load(&cli)?;

    // Ensure media directory exists
    std::fs::create_dir_all(config.media_root())?;

    // Initialize database
    let pool = db::create_pool(config.db_path())?;
    db::run_migrations(&pool)?;

    let state = AppState::new(pool.clone(), config.clone());

    if let Some(Command::CreateSuperuser {
        email,
        username,
        password,
    }) = cli.command
    {
        let form = FormData::new()
            .with_field("email", email)
            .with_field("username", username)
            .with_field("password", password);
        let user = create_account(&*state.store, &form, config.auth.password_cost, true)
            .await
            .map_err(|e| anyhow::anyhow!("could not create superuser: {:?}", e))?;
        tracing::info!("Created superuser {} (id {})", user.email, user.id);
        return Ok(());
    }

    if config.scheduler.enabled {
        let worker = Worker::new(
            Arc::new(SqliteTaskQueue::new(pool)),
            state.store.clone(),
            state.media.clone(),
            config.scheduler.clone(),
        );
        tokio::spawn(worker.run());
    } else {
        tracing::info!("Scheduled task worker disabled");
    }

    let app = plaza::app::build_router(state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
