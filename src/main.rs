mod admin;
mod bot;
mod callback;
mod cart;
mod config;
mod error;
mod handlers;
mod menu;
mod order;
mod store;
mod utils;

use anyhow::{Context, Result};
use config::{Config, StoreBackend};
use handlers::{Router, ShopSettings};
use std::sync::Arc;
use store::{JsonFileStore, MemoryStore, OrderStore};
use teloxide::prelude::*;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    info!("Starting UrbanFungi bot...");
    info!("Mini App URL: {}", config.webapp_url);
    match config.admin_chat_id {
        Some(chat) => info!("Admin chat: {}", chat.0),
        None => warn!("ADMIN_CHAT_ID not set, order notifications are disabled"),
    }
    if config.admin_user_id.is_none() && config.admin_chat_id.is_none() {
        warn!("No admin configured, admin buttons will be rejected");
    }
    if config.has_placeholder_btc_address() {
        warn!("BTC_ADDRESS not set, buyers will see a placeholder address");
    }

    let store: Arc<dyn OrderStore> = match &config.store {
        StoreBackend::Memory => {
            warn!("Orders are kept in memory only and are lost on restart");
            Arc::new(MemoryStore::new())
        }
        StoreBackend::File(path) => {
            let file_store = JsonFileStore::open(path)
                .await
                .with_context(|| format!("Failed to open order store {}", path.display()))?;
            info!("Order store: {}", file_store.path().display());
            Arc::new(file_store)
        }
    };

    let router = Arc::new(Router::new(store, ShopSettings::from(&config)));

    // Create bot
    let client = reqwest::Client::builder()
        .timeout(config.request_timeout)
        .build()
        .context("Failed to build HTTP client")?;
    let bot = Bot::with_client(&config.telegram_token, client);

    // Start bot
    bot::start_bot(bot, router, config.webapp_url.clone()).await?;

    Ok(())
}
