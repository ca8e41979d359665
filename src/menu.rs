use teloxide::types::{
    ButtonRequest, InlineKeyboardButton, InlineKeyboardMarkup, KeyboardButton, KeyboardMarkup, ReplyMarkup,
    WebAppInfo,
};

use crate::callback::CallbackAction;

const SHOP_BUTTON: &str = "🛒 Ouvrir la boutique";

/// Keyboards the router can attach to an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Keyboard {
    /// Reply keyboard with the Mini App button.
    Shop,
    /// Inline fallback for clients that hide reply keyboards.
    ShopInline,
    Payment(String),
    Admin(String),
}

impl Keyboard {
    pub fn to_markup(&self, webapp_url: &reqwest::Url) -> ReplyMarkup {
        match self {
            Keyboard::Shop => ReplyMarkup::Keyboard(create_shop_keyboard(webapp_url)),
            other => match other.to_inline(webapp_url) {
                Some(inline) => ReplyMarkup::InlineKeyboard(inline),
                None => ReplyMarkup::Keyboard(create_shop_keyboard(webapp_url)),
            },
        }
    }

    /// Inline form of the keyboard, used when editing a message in place.
    pub fn to_inline(&self, webapp_url: &reqwest::Url) -> Option<InlineKeyboardMarkup> {
        match self {
            Keyboard::Shop => None,
            Keyboard::ShopInline => Some(create_shop_inline(webapp_url)),
            Keyboard::Payment(code) => Some(create_payment_keyboard(code)),
            Keyboard::Admin(code) => Some(create_admin_keyboard(code)),
        }
    }
}

fn web_app(url: &reqwest::Url) -> WebAppInfo {
    WebAppInfo { url: url.clone() }
}

pub fn create_shop_keyboard(webapp_url: &reqwest::Url) -> KeyboardMarkup {
    let button = KeyboardButton::new(SHOP_BUTTON).request(ButtonRequest::WebApp(web_app(webapp_url)));
    KeyboardMarkup::new(vec![vec![button]])
        .resize_keyboard(true)
        .persistent()
}

pub fn create_shop_inline(webapp_url: &reqwest::Url) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::web_app(
        SHOP_BUTTON,
        web_app(webapp_url),
    )]])
}

fn callback_button(text: &str, action: CallbackAction) -> InlineKeyboardButton {
    InlineKeyboardButton::callback(text, action.to_string())
}

/// Buyer-side choice between the two manual payment methods.
pub fn create_payment_keyboard(order_code: &str) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![
            callback_button("₿ Payer en BTC", CallbackAction::PayBtc(order_code.to_string())),
            callback_button("💳 Transcash", CallbackAction::PayTranscash(order_code.to_string())),
        ],
        vec![callback_button(
            "📄 Envoyer étiquette PDF",
            CallbackAction::SendLabel(order_code.to_string()),
        )],
    ])
}

pub fn create_admin_keyboard(order_code: &str) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![
            callback_button("✅ Paiement OK", CallbackAction::AdminConfirmPaid(order_code.to_string())),
            callback_button("❌ Annuler", CallbackAction::AdminCancel(order_code.to_string())),
        ],
        vec![callback_button("✅ Terminer", CallbackAction::AdminDone(order_code.to_string()))],
    ])
}
