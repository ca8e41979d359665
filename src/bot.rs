use crate::handlers::{self, Actor, Buyer, DocumentUpload, Inbound, Outbound, Router};
use anyhow::Result;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::{BotCommand, CallbackQuery, Message, MessageKind, ParseMode};
use tracing::{debug, info, warn};

pub async fn start_bot(bot: Bot, router: Arc<Router>, webapp_url: reqwest::Url) -> Result<()> {
    info!("Bot is starting...");

    if let Err(e) = setup_bot_commands(&bot).await {
        warn!("Failed to register bot commands: {} (continuing anyway)", e);
    }

    let webapp_url = Arc::new(webapp_url);
    let url_clone1 = webapp_url.clone();
    let url_clone2 = webapp_url.clone();
    let url_clone3 = webapp_url.clone();
    let router_clone1 = router.clone();
    let router_clone2 = router.clone();
    let handler = dptree::entry()
        .branch(
            Update::filter_message()
                .filter(|msg: Message| {
                    if let Some(text) = msg.text() {
                        text.starts_with('/')
                    } else {
                        false
                    }
                })
                .endpoint(move |bot: Bot, msg: Message| {
                    let webapp_url = url_clone1.clone();
                    async move { handle_commands(bot, msg, webapp_url).await }
                }),
        )
        .branch(
            Update::filter_callback_query().endpoint(move |bot: Bot, q: CallbackQuery| {
                let router = router_clone1.clone();
                let webapp_url = url_clone2.clone();
                async move { handle_callback(bot, q, router, webapp_url).await }
            }),
        )
        .branch(
            Update::filter_message().endpoint(move |bot: Bot, msg: Message| {
                let router = router_clone2.clone();
                let webapp_url = url_clone3.clone();
                async move { handle_messages(bot, msg, router, webapp_url).await }
            }),
        );

    Dispatcher::builder(bot, handler)
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn setup_bot_commands(bot: &Bot) -> Result<(), teloxide::RequestError> {
    bot.set_my_commands(vec![
        BotCommand::new("start", "Démarrer"),
        BotCommand::new("shop", "Ouvrir la boutique"),
        BotCommand::new("help", "Comment commander"),
        BotCommand::new("ping", "Vérifier que le bot répond"),
    ])
    .await?;
    Ok(())
}

async fn handle_commands(bot: Bot, msg: Message, webapp_url: Arc<reqwest::Url>) -> ResponseResult<()> {
    let text = msg.text().unwrap_or_default();
    let command = text.split_whitespace().next().unwrap_or("");
    // "/start@UrbanFungiBot" in groups
    let command = command.split('@').next().unwrap_or(command);

    let effects = match command {
        "/start" => handlers::handle_start(),
        "/shop" => handlers::handle_shop(),
        "/ping" => handlers::handle_ping(),
        "/help" => handlers::handle_help(),
        _ => {
            debug!("Ignoring unknown command {} in chat {}", command, msg.chat.id.0);
            return Ok(());
        }
    };

    let origin = Origin {
        chat: msg.chat.id,
        message: None,
        callback_id: None,
    };
    deliver(&bot, &origin, effects, &webapp_url).await;
    Ok(())
}

async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    router: Arc<Router>,
    webapp_url: Arc<reqwest::Url>,
) -> ResponseResult<()> {
    let origin = Origin {
        chat: q
            .message
            .as_ref()
            .map(|msg| msg.chat.id)
            .unwrap_or(ChatId(q.from.id.0 as i64)),
        message: q.message.as_ref(),
        callback_id: Some(q.id.as_str()),
    };

    let effects = match q.data.as_deref() {
        Some(data) => {
            info!("Callback {} from user {}", data, q.from.id.0);
            let actor = Actor {
                user: q.from.id,
                chat: q.message.as_ref().map(|msg| msg.chat.id),
            };
            router.handle_callback(&actor, data).await
        }
        None => Vec::new(),
    };

    deliver(&bot, &origin, effects, &webapp_url).await;
    Ok(())
}

async fn handle_messages(
    bot: Bot,
    msg: Message,
    router: Arc<Router>,
    webapp_url: Arc<reqwest::Url>,
) -> ResponseResult<()> {
    let buyer = match msg.from() {
        Some(user) => Buyer {
            id: user.id.0 as i64,
            handle: user.username.clone(),
            chat: msg.chat.id,
        },
        None => {
            debug!("Ignoring message {} without sender", msg.id.0);
            return Ok(());
        }
    };

    let document = msg.document().map(|doc| DocumentUpload {
        file_id: doc.file.id.clone(),
        file_name: doc.file_name.clone(),
        mime_type: doc.mime_type.as_ref().map(|mime| mime.essence_str().to_string()),
        message_id: msg.id,
    });
    let inbound = match Inbound::classify(web_app_payload(&msg), document, msg.text()) {
        Some(inbound) => inbound,
        None => {
            debug!("Unhandled message {} from user {}: no text, cart or PDF", msg.id.0, buyer.id);
            return Ok(());
        }
    };

    match router.handle_inbound(&buyer, inbound).await {
        Some(effects) => {
            let origin = Origin {
                chat: msg.chat.id,
                message: None,
                callback_id: None,
            };
            deliver(&bot, &origin, effects, &webapp_url).await;
        }
        None => debug!("Unhandled text from user {}: no order awaiting a payment code", buyer.id),
    }

    Ok(())
}

/// Raw cart JSON sent by the Mini App, if this message carries one.
fn web_app_payload(msg: &Message) -> Option<&str> {
    match &msg.kind {
        MessageKind::WebAppData(data) => Some(data.web_app_data.data.as_str()),
        _ => None,
    }
}

/// Where the event being answered came from.
struct Origin<'a> {
    chat: ChatId,
    message: Option<&'a Message>,
    callback_id: Option<&'a str>,
}

/// Sends every effect independently. A failed send is logged and skipped; state changes
/// made by the handler are already committed at this point.
async fn deliver(bot: &Bot, origin: &Origin<'_>, effects: Vec<Outbound>, webapp_url: &reqwest::Url) {
    let mut answered = false;

    for effect in effects {
        match effect {
            Outbound::Reply { text, keyboard } => {
                send_text(bot, origin.chat, text, keyboard.map(|k| k.to_markup(webapp_url))).await;
            }
            Outbound::Notify { chat, text, keyboard } => {
                send_text(bot, chat, text, keyboard.map(|k| k.to_markup(webapp_url))).await;
            }
            Outbound::Forward { to, from, message_id } => {
                if let Err(e) = bot.forward_message(to, from, message_id).await {
                    warn!("Failed to forward message {} to chat {}: {}", message_id.0, to.0, e);
                }
            }
            Outbound::Answer(text) => match origin.callback_id {
                Some(id) if !answered => {
                    answered = true;
                    if let Err(e) = bot.answer_callback_query(id).text(text).await {
                        warn!("Failed to answer callback query: {}", e);
                    }
                }
                _ => debug!("Dropping callback answer outside a fresh callback: {}", text),
            },
            Outbound::EditOrigin { text, keyboard } => match origin.message {
                Some(message) => {
                    let mut request = bot
                        .edit_message_text(message.chat.id, message.id, text)
                        .parse_mode(ParseMode::Html);
                    if let Some(markup) = keyboard.and_then(|k| k.to_inline(webapp_url)) {
                        request = request.reply_markup(markup);
                    }
                    if let Err(e) = request.await {
                        warn!("Failed to edit message {} in chat {}: {}", message.id.0, message.chat.id.0, e);
                    }
                }
                None => debug!("No message to edit for this event"),
            },
        }
    }

    // Telegram keeps the button spinner until the query is answered
    if let (Some(id), false) = (origin.callback_id, answered) {
        if let Err(e) = bot.answer_callback_query(id).await {
            warn!("Failed to answer callback query: {}", e);
        }
    }
}

async fn send_text(
    bot: &Bot,
    chat: ChatId,
    text: String,
    markup: Option<teloxide::types::ReplyMarkup>,
) {
    let mut request = bot.send_message(chat, text).parse_mode(ParseMode::Html);
    if let Some(markup) = markup {
        request = request.reply_markup(markup);
    }
    if let Err(e) = request.await {
        warn!("Failed to send message to chat {}: {}", chat.0, e);
    }
}
