use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use teloxide::types::{ChatId, UserId};

use crate::admin::AdminPolicy;

const DEFAULT_WEBAPP_URL: &str = "https://urbanfungi-miniapp.onrender.com/";
const DEFAULT_BTC_ADDRESS: &str = "TON_ADRESSE_BTC_ICI";
const DEFAULT_TRANSCASH_TEXT: &str =
    "Envoyez votre code Transcash (copier/coller) + montant exact dans ce chat.";
const MEMORY_STORE: &str = ":memory:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub telegram_token: String,
    pub webapp_url: reqwest::Url,
    pub admin_chat_id: Option<ChatId>,
    pub admin_user_id: Option<UserId>,
    pub btc_address: String,
    pub transcash_text: String,
    pub store: StoreBackend,
    pub request_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let telegram_token = var("TELEGRAM_BOT_TOKEN")
            .or_else(|| var("BOT_TOKEN"))
            .context("TELEGRAM_BOT_TOKEN environment variable is required")?;

        let webapp_url = var("WEBAPP_URL").unwrap_or_else(|| DEFAULT_WEBAPP_URL.to_string());
        let webapp_url = reqwest::Url::parse(&webapp_url)
            .with_context(|| format!("WEBAPP_URL is not a valid URL: {}", webapp_url))?;

        let admin_chat_id = parse_id::<i64>(var("ADMIN_CHAT_ID"), "ADMIN_CHAT_ID")?.map(ChatId);
        let admin_user_id = parse_id::<u64>(var("ADMIN_USER_ID"), "ADMIN_USER_ID")?.map(UserId);

        let store = match var("ORDERS_STORE") {
            Some(value) if value == MEMORY_STORE => StoreBackend::Memory,
            Some(path) => StoreBackend::File(PathBuf::from(path)),
            None => StoreBackend::File(PathBuf::from("orders.json")),
        };

        let request_timeout = match var("REQUEST_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(
                raw.parse()
                    .with_context(|| format!("REQUEST_TIMEOUT_SECS must be a number of seconds, got {}", raw))?,
            ),
            None => Duration::from_secs(30),
        };

        Ok(Self {
            telegram_token,
            webapp_url,
            admin_chat_id,
            admin_user_id,
            btc_address: var("BTC_ADDRESS").unwrap_or_else(|| DEFAULT_BTC_ADDRESS.to_string()),
            transcash_text: var("TRANSCASH_TEXT").unwrap_or_else(|| DEFAULT_TRANSCASH_TEXT.to_string()),
            store,
            request_timeout,
        })
    }

    pub fn admin_policy(&self) -> AdminPolicy {
        AdminPolicy::new(self.admin_user_id, self.admin_chat_id)
    }

    pub fn has_placeholder_btc_address(&self) -> bool {
        self.btc_address == DEFAULT_BTC_ADDRESS
    }
}

/// `0` means "not configured", like an unset variable.
fn parse_id<T>(raw: Option<String>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr + PartialEq + Default,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw {
        None => Ok(None),
        Some(raw) => {
            let id: T = raw
                .parse()
                .with_context(|| format!("{} must be a numeric Telegram id, got {}", key, raw))?;
            Ok((id != T::default()).then_some(id))
        }
    }
}
