use background_service::BackgroundService;
use delta_engine::CycleTracker;
use deltabot_core::{BotConfig, CoreError, ErrorExt};
use reddit_client::RedditClient;
use tracing_subscriber::EnvFilter;

const CONFIG_ENV: &str = "DELTABOT_CONFIG";
const DEFAULT_CONFIG: &str = "config.toml";
const DEFAULT_FILTER: &str =
    "deltabot=info,delta_engine=info,background_service=info,reddit_client=info";

fn config_path() -> String {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var(CONFIG_ENV).ok())
        .unwrap_or_else(|| DEFAULT_CONFIG.to_string())
}

#[tokio::main]
async fn main() -> Result<(), CoreError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
        )
        .init();

    tracing::info!("Starting DeltaBot");

    let config = BotConfig::load(config_path()).map_err(|e| {
        let error = CoreError::from(e);
        tracing::error!("{}", error.user_friendly_message());
        error
    })?;

    let client = RedditClient::from_config(&config)?;
    client.authenticate().await?;
    tracing::info!("Logged in as {}", config.account.username);

    let tracker = CycleTracker::load(&config.last_comment_filename).await;
    let mut service = BackgroundService::new(client, config, tracker)?;
    service.start().await?;

    // Only the stop command ends the loop.
    std::process::exit(1)
}
