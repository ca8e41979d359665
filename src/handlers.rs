//! Conversation routing.
//!
//! Handlers here know nothing about the Telegram transport beyond ids: each one reads or
//! mutates the [`OrderStore`] and returns the messages to send as a list of [`Outbound`]
//! effects. `bot.rs` delivers them afterwards, one by one, on a best-effort basis, so a
//! failed notification never rolls back a committed state change.

use chrono::Utc;
use std::sync::Arc;
use teloxide::types::{ChatId, MessageId, UserId};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::admin::AdminPolicy;
use crate::callback::{CallbackAction, UnknownCallback};
use crate::cart::Cart;
use crate::config::Config;
use crate::error::{CartError, StoreError};
use crate::menu::Keyboard;
use crate::order::{new_order_code, Order, OrderStatus, PaymentMethod};
use crate::store::OrderStore;
use crate::utils::{escape_html, format_error, format_euro, format_order};

const MAX_CODE_ATTEMPTS: usize = 5;
const PAYMENT_CODE_MIN_LEN: usize = 8;
const PAYMENT_CODE_MAX_LEN: usize = 60;
const PDF_MIME: &str = "application/pdf";

const STORAGE_ERROR: &str = "⚠️ Impossible d'enregistrer pour le moment, réessayez dans un instant.";

/// Something to send once a handler is done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Message to the chat the event came from.
    Reply { text: String, keyboard: Option<Keyboard> },
    /// Message to another chat: the buyer, or the admin channel.
    Notify {
        chat: ChatId,
        text: String,
        keyboard: Option<Keyboard>,
    },
    /// Re-send a message verbatim to another chat.
    Forward {
        to: ChatId,
        from: ChatId,
        message_id: MessageId,
    },
    /// Toast answer to the button press being handled.
    Answer(String),
    /// Rewrite the message that carried the pressed button.
    EditOrigin { text: String, keyboard: Option<Keyboard> },
}

impl Outbound {
    pub fn reply(text: impl Into<String>) -> Self {
        Outbound::Reply {
            text: text.into(),
            keyboard: None,
        }
    }

    pub fn reply_with(text: impl Into<String>, keyboard: Keyboard) -> Self {
        Outbound::Reply {
            text: text.into(),
            keyboard: Some(keyboard),
        }
    }

    pub fn answer(text: impl Into<String>) -> Self {
        Outbound::Answer(text.into())
    }
}

/// The chat user behind a message.
#[derive(Debug, Clone)]
pub struct Buyer {
    pub id: i64,
    pub handle: Option<String>,
    pub chat: ChatId,
}

/// Whoever pressed an inline button, and the chat the button lived in.
#[derive(Debug, Clone, Copy)]
pub struct Actor {
    pub user: UserId,
    pub chat: Option<ChatId>,
}

impl Actor {
    fn buyer_id(&self) -> i64 {
        self.user.0 as i64
    }
}

#[derive(Debug, Clone)]
pub struct DocumentUpload {
    pub file_id: String,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    pub message_id: MessageId,
}

impl DocumentUpload {
    pub fn is_pdf(&self) -> bool {
        let mime_is_pdf = self
            .mime_type
            .as_deref()
            .map_or(false, |mime| mime.eq_ignore_ascii_case(PDF_MIME));
        let name_is_pdf = self
            .file_name
            .as_deref()
            .map_or(false, |name| name.to_lowercase().ends_with(".pdf"));
        mime_is_pdf || name_is_pdf
    }
}

/// A non-command message, classified by priority.
#[derive(Debug, Clone)]
pub enum Inbound {
    Cart(String),
    Label(DocumentUpload),
    Text(String),
}

impl Inbound {
    /// First match wins: Mini App data, then a PDF document, then plain text.
    pub fn classify(
        web_app_data: Option<&str>,
        document: Option<DocumentUpload>,
        text: Option<&str>,
    ) -> Option<Self> {
        if let Some(data) = web_app_data {
            return Some(Inbound::Cart(data.to_string()));
        }
        if let Some(document) = document {
            if document.is_pdf() {
                return Some(Inbound::Label(document));
            }
            debug!("Ignoring non-PDF document {:?}", document.file_name);
            return None;
        }
        text.map(|text| Inbound::Text(text.trim().to_string()))
            .filter(|inbound| !matches!(inbound, Inbound::Text(t) if t.is_empty()))
    }
}

pub fn looks_like_payment_code(text: &str) -> bool {
    let len = text.chars().count();
    (PAYMENT_CODE_MIN_LEN..=PAYMENT_CODE_MAX_LEN).contains(&len)
        && !text.starts_with('/')
        && text.chars().any(|c| c.is_ascii_alphanumeric())
}

#[derive(Debug, Clone)]
pub struct ShopSettings {
    pub admin_chat: Option<ChatId>,
    pub admin: AdminPolicy,
    pub btc_address: String,
    pub transcash_text: String,
}

impl From<&Config> for ShopSettings {
    fn from(config: &Config) -> Self {
        Self {
            admin_chat: config.admin_chat_id,
            admin: config.admin_policy(),
            btc_address: config.btc_address.clone(),
            transcash_text: config.transcash_text.clone(),
        }
    }
}

pub struct Router {
    store: Arc<dyn OrderStore>,
    settings: ShopSettings,
    // Serializes read-modify-write cycles on the store
    mutations: Mutex<()>,
}

impl Router {
    pub fn new(store: Arc<dyn OrderStore>, settings: ShopSettings) -> Self {
        Self {
            store,
            settings,
            mutations: Mutex::new(()),
        }
    }

    fn notify_admin(&self, effects: &mut Vec<Outbound>, text: String, keyboard: Option<Keyboard>) {
        if let Some(chat) = self.settings.admin_chat {
            effects.push(Outbound::Notify { chat, text, keyboard });
        }
    }

    /// Routes a classified message. `None` means nothing handled it.
    pub async fn handle_inbound(&self, buyer: &Buyer, inbound: Inbound) -> Option<Vec<Outbound>> {
        match inbound {
            Inbound::Cart(raw) => Some(self.handle_cart(buyer, &raw).await),
            Inbound::Label(document) => Some(self.handle_label(buyer, &document).await),
            Inbound::Text(text) => {
                if !looks_like_payment_code(&text) {
                    debug!("Text from {} does not look like a payment code", buyer.id);
                    return None;
                }
                self.handle_payment_code(buyer, &text).await
            }
        }
    }

    pub async fn handle_cart(&self, buyer: &Buyer, raw: &str) -> Vec<Outbound> {
        let cart = match Cart::parse(raw) {
            Ok(cart) => cart,
            Err(CartError::Empty) => {
                info!("Empty cart from user {}", buyer.id);
                return vec![Outbound::reply(format_error("Commande vide."))];
            }
            Err(e) => {
                warn!("Rejected cart payload from user {}: {}", buyer.id, e);
                return vec![Outbound::reply(format_error("Données commande illisibles."))];
            }
        };

        let mut attempts = 0;
        let order = loop {
            let now = Utc::now();
            let order = Order::new(
                new_order_code(now),
                buyer.id,
                buyer.handle.clone(),
                cart.items.clone(),
                cart.total_amount.clone(),
                now,
            );
            match self.store.create(&order).await {
                Ok(()) => break order,
                Err(StoreError::DuplicateCode(code)) if attempts + 1 < MAX_CODE_ATTEMPTS => {
                    attempts += 1;
                    warn!("Order code {} already taken, retrying", code);
                }
                Err(e) => {
                    error!("Failed to store order for user {}: {}", buyer.id, e);
                    return vec![Outbound::reply(STORAGE_ERROR)];
                }
            }
        };

        info!(
            "Order {} created for user {} ({} item(s), total {})",
            order.order_code,
            buyer.id,
            order.items.len(),
            order.total_amount
        );

        let code = escape_html(&order.order_code);
        let mut effects = vec![Outbound::reply_with(
            format!(
                "✅ <b>Commande reçue : {}</b>\n\n💶 Total: <b>{}</b>\n\nChoisissez votre moyen de paiement 👇",
                code,
                format_euro(&order.total_amount)
            ),
            Keyboard::Payment(order.order_code.clone()),
        )];
        self.notify_admin(
            &mut effects,
            format_order(&order),
            Some(Keyboard::Admin(order.order_code.clone())),
        );
        effects
    }

    pub async fn handle_label(&self, buyer: &Buyer, document: &DocumentUpload) -> Vec<Outbound> {
        let guard = self.mutations.lock().await;

        let mut order = match self
            .store
            .find_latest_by_buyer(buyer.id, Some(OrderStatus::AwaitingLabel))
            .await
        {
            Ok(Some(order)) => order,
            Ok(None) => {
                info!("Unexpected PDF from user {}", buyer.id);
                return vec![Outbound::reply(
                    "Je n'attends pas encore le PDF (attendez la validation du paiement).",
                )];
            }
            Err(e) => {
                error!("Failed to look up orders of user {}: {}", buyer.id, e);
                return vec![Outbound::reply(STORAGE_ERROR)];
            }
        };

        if let Err(e) = order.attach_label(document.file_id.clone()) {
            warn!("Label rejected: {}", e);
            return vec![Outbound::reply(
                "Je n'attends pas encore le PDF (attendez la validation du paiement).",
            )];
        }
        if let Err(e) = self.store.update(&order).await {
            error!("Failed to save label for order {}: {}", order.order_code, e);
            return vec![Outbound::reply(STORAGE_ERROR)];
        }
        drop(guard);

        info!("Label received for order {}", order.order_code);

        let mut effects = vec![Outbound::reply("✅ PDF reçu ! Merci, on traite la commande.")];
        if let Some(admin_chat) = self.settings.admin_chat {
            effects.push(Outbound::Notify {
                chat: admin_chat,
                text: format!("📄 PDF reçu pour <b>{}</b> ✅", escape_html(&order.order_code)),
                keyboard: None,
            });
            effects.push(Outbound::Forward {
                to: admin_chat,
                from: buyer.chat,
                message_id: document.message_id,
            });
        }
        effects
    }

    /// Records a payment proof on the buyer's latest order awaiting payment.
    /// Returns `None` when the buyer has no such order, so the text stays unhandled.
    pub async fn handle_payment_code(&self, buyer: &Buyer, text: &str) -> Option<Vec<Outbound>> {
        let guard = self.mutations.lock().await;

        let mut order = match self
            .store
            .find_latest_by_buyer(buyer.id, Some(OrderStatus::AwaitingPayment))
            .await
        {
            Ok(Some(order)) => order,
            Ok(None) => {
                debug!("No order awaiting payment for user {}", buyer.id);
                return None;
            }
            Err(e) => {
                error!("Failed to look up orders of user {}: {}", buyer.id, e);
                return Some(vec![Outbound::reply(STORAGE_ERROR)]);
            }
        };

        let replaced = match order.record_payment_proof(text) {
            Ok(replaced) => replaced,
            Err(e) => {
                warn!("Payment proof rejected: {}", e);
                return None;
            }
        };
        if let Err(e) = self.store.update(&order).await {
            error!("Failed to save payment proof for order {}: {}", order.order_code, e);
            return Some(vec![Outbound::reply(STORAGE_ERROR)]);
        }
        drop(guard);

        let code = escape_html(&order.order_code);
        match &replaced {
            Some(_) => info!("Payment proof replaced for order {}", order.order_code),
            None => info!("Payment proof received for order {}", order.order_code),
        }

        let (buyer_text, admin_title) = match order.payment_method {
            Some(PaymentMethod::Btc) => (
                format!("✅ Preuve BTC reçue pour {}.\nOn valide et on vous demandera le PDF.", code),
                "₿ Preuve BTC reçue ✅",
            ),
            Some(PaymentMethod::Transcash) | None => (
                format!("✅ Code Transcash reçu pour {}.\nOn valide et on vous demandera le PDF.", code),
                "💳 Transcash reçu ✅",
            ),
        };

        let mut admin_text = format!(
            "{}\nCommande: <b>{}</b>\nCode: <code>{}</code>",
            admin_title,
            code,
            escape_html(text)
        );
        if let Some(previous) = replaced {
            admin_text.push_str(&format!("\nRemplace: <code>{}</code>", escape_html(&previous)));
        }

        let mut effects = vec![Outbound::reply(buyer_text)];
        self.notify_admin(
            &mut effects,
            admin_text,
            Some(Keyboard::Admin(order.order_code.clone())),
        );
        Some(effects)
    }

    pub async fn handle_callback(&self, actor: &Actor, data: &str) -> Vec<Outbound> {
        let action = match data.parse::<CallbackAction>() {
            Ok(action) => action,
            Err(UnknownCallback(raw)) => {
                debug!("Unknown callback data: {}", raw);
                return vec![Outbound::answer("Action inconnue")];
            }
        };

        match action {
            CallbackAction::PayBtc(code) => self.handle_payment_choice(actor, &code, PaymentMethod::Btc).await,
            CallbackAction::PayTranscash(code) => {
                self.handle_payment_choice(actor, &code, PaymentMethod::Transcash).await
            }
            CallbackAction::SendLabel(code) => self.handle_label_request(actor, &code).await,
            admin_action => self.handle_admin_action(actor, admin_action).await,
        }
    }

    async fn buyer_order(&self, actor: &Actor, code: &str) -> Result<Option<Order>, StoreError> {
        let order = self.store.get(code).await?;
        Ok(order.filter(|order| order.buyer_id == actor.buyer_id()))
    }

    async fn handle_payment_choice(&self, actor: &Actor, code: &str, method: PaymentMethod) -> Vec<Outbound> {
        let guard = self.mutations.lock().await;

        let mut order = match self.buyer_order(actor, code).await {
            Ok(Some(order)) => order,
            Ok(None) => return vec![Outbound::answer("Introuvable")],
            Err(e) => {
                error!("Failed to load order {}: {}", code, e);
                return vec![Outbound::answer(STORAGE_ERROR)];
            }
        };

        let escaped = escape_html(code);
        if !order.awaits_payment() {
            return vec![
                Outbound::answer(order.status.label()),
                Outbound::reply(format!(
                    "ℹ️ La commande {} n'attend plus de paiement (statut : {}).",
                    escaped,
                    order.status.label()
                )),
            ];
        }

        if order.payment_method != Some(method) && order.choose_payment_method(method) {
            // Instructions still go out if the stamp cannot be saved
            if let Err(e) = self.store.update(&order).await {
                error!("Failed to save payment method for order {}: {}", code, e);
            }
        }
        drop(guard);

        let total = format_euro(&order.total_amount);
        let instructions = match method {
            PaymentMethod::Btc => format!(
                "₿ <b>Bitcoin — {}</b>\n\nMontant: <b>{}</b>\nAdresse: <code>{}</code>\n\nAprès paiement, envoyez une preuve ici (ID de transaction).\nEnsuite on vous demandera l'étiquette PDF.",
                escaped,
                total,
                escape_html(&self.settings.btc_address)
            ),
            PaymentMethod::Transcash => format!(
                "💳 <b>Transcash — {}</b>\n\nMontant: <b>{}</b>\n{}\n\nEnvoyez maintenant votre <b>code Transcash</b> dans le chat.",
                escaped,
                total,
                escape_html(&self.settings.transcash_text)
            ),
        };

        vec![Outbound::answer(method.label()), Outbound::reply(instructions)]
    }

    async fn handle_label_request(&self, actor: &Actor, code: &str) -> Vec<Outbound> {
        let order = match self.buyer_order(actor, code).await {
            Ok(Some(order)) => order,
            Ok(None) => return vec![Outbound::answer("Introuvable")],
            Err(e) => {
                error!("Failed to load order {}: {}", code, e);
                return vec![Outbound::answer(STORAGE_ERROR)];
            }
        };

        let escaped = escape_html(code);
        let text = match order.status {
            OrderStatus::AwaitingLabel => format!(
                "📄 Envoyez maintenant votre <b>étiquette PDF</b> pour la commande <b>{}</b> (en document).",
                escaped
            ),
            OrderStatus::AwaitingPayment => format!(
                "⏳ Le paiement de la commande <b>{}</b> n'est pas encore validé. Vous pourrez envoyer le PDF ensuite.",
                escaped
            ),
            status => format!("ℹ️ La commande <b>{}</b> est {}.", escaped, status.label().to_lowercase()),
        };

        vec![Outbound::answer("OK"), Outbound::reply(text)]
    }

    async fn handle_admin_action(&self, actor: &Actor, action: CallbackAction) -> Vec<Outbound> {
        if !self.settings.admin.is_admin(actor.user, actor.chat) {
            warn!("Unauthorized admin action {} by user {}", action, actor.user.0);
            return vec![Outbound::answer("Admin only")];
        }

        let code = action.order_code().to_string();
        let guard = self.mutations.lock().await;

        let mut order = match self.store.get(&code).await {
            Ok(Some(order)) => order,
            Ok(None) => return vec![Outbound::answer("Introuvable")],
            Err(e) => {
                error!("Failed to load order {}: {}", code, e);
                return vec![Outbound::answer(STORAGE_ERROR)];
            }
        };

        let escaped = escape_html(&code);
        let (result, answer, buyer_text) = match action {
            CallbackAction::AdminConfirmPaid(_) => (
                order.confirm_payment(),
                "Validé ✅",
                format!(
                    "✅ Paiement validé pour <b>{}</b>.\n\n📄 Envoyez maintenant votre <b>étiquette PDF</b> ici (document).",
                    escaped
                ),
            ),
            CallbackAction::AdminCancel(_) => (
                order.cancel(),
                "Annulé",
                format!("❌ Commande <b>{}</b> annulée.", escaped),
            ),
            CallbackAction::AdminDone(_) => (
                order.mark_done(),
                "OK",
                format!("✅ Commande <b>{}</b> finalisée. Merci !", escaped),
            ),
            _ => return vec![Outbound::answer("Action inconnue")],
        };

        if let Err(e) = result {
            info!("Ignored admin action: {}", e);
            if !e.already_settled() {
                return vec![Outbound::answer("Paiement pas encore validé")];
            }
            return vec![Outbound::answer(format!("Déjà traitée ({})", order.status.label()))];
        }
        if let Err(e) = self.store.update(&order).await {
            error!("Failed to save order {}: {}", code, e);
            return vec![Outbound::answer(STORAGE_ERROR)];
        }
        drop(guard);

        info!("Order {} moved to {} by admin {}", code, order.status, actor.user.0);

        let keyboard = (!order.status.is_terminal()).then(|| Keyboard::Admin(code.clone()));
        vec![
            Outbound::answer(answer),
            Outbound::Notify {
                chat: ChatId(order.buyer_id),
                text: buyer_text,
                keyboard: None,
            },
            Outbound::EditOrigin {
                text: format_order(&order),
                keyboard,
            },
        ]
    }
}

pub fn handle_start() -> Vec<Outbound> {
    vec![
        Outbound::reply_with(
            "🍄 <b>UrbanFungi</b>\n\nCliquez sur le bouton ci-dessous pour ouvrir la boutique.",
            Keyboard::Shop,
        ),
        Outbound::reply_with("Si le bouton disparaît : /shop", Keyboard::ShopInline),
    ]
}

pub fn handle_shop() -> Vec<Outbound> {
    vec![Outbound::reply_with("🛒 Ouvrir la boutique :", Keyboard::Shop)]
}

pub fn handle_ping() -> Vec<Outbound> {
    vec![Outbound::reply("✅ Bot OK")]
}

pub fn handle_help() -> Vec<Outbound> {
    let help = r#"📖 <b>Comment commander</b>

1. Ouvrez la boutique avec /shop et validez votre panier.
2. Choisissez le paiement : <b>BTC</b> ou <b>Transcash</b>.
3. Envoyez votre code Transcash ou votre preuve de paiement dans ce chat.
4. Une fois le paiement validé, envoyez votre <b>étiquette PDF</b> en document.

/start - Démarrer
/shop - Ouvrir la boutique
/ping - Vérifier que le bot répond"#;
    vec![Outbound::reply(help)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use bigdecimal::BigDecimal;
    use std::str::FromStr;

    const ADMIN_USER: UserId = UserId(1000);
    const ADMIN_CHAT: ChatId = ChatId(-500);
    const BUYER_ID: i64 = 77;

    fn settings() -> ShopSettings {
        ShopSettings {
            admin_chat: Some(ADMIN_CHAT),
            admin: AdminPolicy::new(Some(ADMIN_USER), Some(ADMIN_CHAT)),
            btc_address: "bc1qtestaddress".to_string(),
            transcash_text: "Achetez un ticket Transcash.".to_string(),
        }
    }

    fn setup() -> (Router, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (Router::new(store.clone(), settings()), store)
    }

    fn buyer() -> Buyer {
        Buyer {
            id: BUYER_ID,
            handle: Some("alice".to_string()),
            chat: ChatId(BUYER_ID),
        }
    }

    fn buyer_actor() -> Actor {
        Actor {
            user: UserId(BUYER_ID as u64),
            chat: Some(ChatId(BUYER_ID)),
        }
    }

    fn admin_actor() -> Actor {
        Actor {
            user: ADMIN_USER,
            chat: Some(ADMIN_CHAT),
        }
    }

    fn pdf(message_id: i32) -> DocumentUpload {
        DocumentUpload {
            file_id: format!("file-{}", message_id),
            file_name: Some("label.pdf".to_string()),
            mime_type: Some("application/pdf".to_string()),
            message_id: MessageId(message_id),
        }
    }

    const CART: &str = r#"{"items":[{"id":"a","name":"Kit","quantity":2}],"totalAmount":59.80}"#;

    async fn place_order(router: &Router, store: &MemoryStore) -> Order {
        router.handle_cart(&buyer(), CART).await;
        store.find_latest_by_buyer(BUYER_ID, None).await.unwrap().unwrap()
    }

    fn notifications_to(effects: &[Outbound], target: ChatId) -> usize {
        effects
            .iter()
            .filter(|e| matches!(e, Outbound::Notify { chat, .. } if *chat == target))
            .count()
    }

    #[tokio::test]
    async fn test_cart_creates_order_and_offers_payment() {
        let (router, store) = setup();
        let effects = router.handle_cart(&buyer(), CART).await;

        let order = store.find_latest_by_buyer(BUYER_ID, None).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::AwaitingPayment);
        assert_eq!(order.total_amount, BigDecimal::from_str("59.80").unwrap());
        assert_eq!(order.buyer_handle.as_deref(), Some("alice"));

        assert_eq!(effects.len(), 2);
        match &effects[0] {
            Outbound::Reply { text, keyboard } => {
                assert!(text.contains(&order.order_code));
                assert!(text.contains("59.80 €"));
                assert_eq!(keyboard, &Some(Keyboard::Payment(order.order_code.clone())));
            }
            other => panic!("unexpected effect: {:?}", other),
        }
        match &effects[1] {
            Outbound::Notify { chat, keyboard, .. } => {
                assert_eq!(*chat, ADMIN_CHAT);
                assert_eq!(keyboard, &Some(Keyboard::Admin(order.order_code.clone())));
            }
            other => panic!("unexpected effect: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_order_codes_are_unique() {
        let (router, store) = setup();
        let mut codes = std::collections::HashSet::new();
        for _ in 0..20 {
            let effects = router.handle_cart(&buyer(), CART).await;
            match &effects[0] {
                Outbound::Reply {
                    keyboard: Some(Keyboard::Payment(code)),
                    ..
                } => codes.insert(code.clone()),
                other => panic!("unexpected effect: {:?}", other),
            };
        }
        assert_eq!(codes.len(), 20);
        for code in &codes {
            assert!(store.get(code).await.unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn test_empty_cart_never_creates() {
        let (router, store) = setup();
        let effects = router
            .handle_cart(&buyer(), r#"{"items":[],"totalAmount":0}"#)
            .await;
        assert_eq!(effects, vec![Outbound::reply(format_error("Commande vide."))]);
        assert!(store.find_latest_by_buyer(BUYER_ID, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_malformed_cart_reported() {
        let (router, store) = setup();
        let effects = router.handle_cart(&buyer(), "{oops").await;
        assert_eq!(effects, vec![Outbound::reply(format_error("Données commande illisibles."))]);
        assert!(store.find_latest_by_buyer(BUYER_ID, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_no_admin_notification_without_admin_chat() {
        let store = Arc::new(MemoryStore::new());
        let mut settings = settings();
        settings.admin_chat = None;
        let router = Router::new(store, settings);
        let effects = router.handle_cart(&buyer(), CART).await;
        assert_eq!(effects.len(), 1);
    }

    #[tokio::test]
    async fn test_btc_choice_shows_address_and_stamps_method() {
        let (router, store) = setup();
        let order = place_order(&router, &store).await;

        let effects = router
            .handle_callback(&buyer_actor(), &format!("PAY_BTC:{}", order.order_code))
            .await;
        assert_eq!(effects[0], Outbound::answer("Bitcoin"));
        match &effects[1] {
            Outbound::Reply { text, .. } => assert!(text.contains("bc1qtestaddress")),
            other => panic!("unexpected effect: {:?}", other),
        }

        let stored = store.get(&order.order_code).await.unwrap().unwrap();
        assert_eq!(stored.payment_method, Some(PaymentMethod::Btc));
    }

    #[tokio::test]
    async fn test_payment_choice_on_foreign_order_is_not_found() {
        let (router, store) = setup();
        let order = place_order(&router, &store).await;
        let stranger = Actor {
            user: UserId(999),
            chat: Some(ChatId(999)),
        };
        let effects = router
            .handle_callback(&stranger, &format!("PAY_TC:{}", order.order_code))
            .await;
        assert_eq!(effects, vec![Outbound::answer("Introuvable")]);
        assert!(store.get(&order.order_code).await.unwrap().unwrap().payment_method.is_none());
    }

    #[tokio::test]
    async fn test_payment_code_recorded_and_admin_notified() {
        let (router, store) = setup();
        let order = place_order(&router, &store).await;

        let effects = router
            .handle_inbound(&buyer(), Inbound::Text("ABCD1234EFGH5678".to_string()))
            .await
            .unwrap();
        assert_eq!(notifications_to(&effects, ADMIN_CHAT), 1);

        let stored = store.get(&order.order_code).await.unwrap().unwrap();
        assert_eq!(stored.payment_proof_text.as_deref(), Some("ABCD1234EFGH5678"));
    }

    #[tokio::test]
    async fn test_later_payment_code_replaces_chatter_and_reaches_admin() {
        let (router, store) = setup();
        let order = place_order(&router, &store).await;

        router
            .handle_inbound(&buyer(), Inbound::Text("Bonjour, je paie ce soir".to_string()))
            .await
            .unwrap();
        let effects = router
            .handle_inbound(&buyer(), Inbound::Text("TC-9F3K2L8M7N6P".to_string()))
            .await
            .unwrap();

        let admin_texts: Vec<_> = effects
            .iter()
            .filter_map(|e| match e {
                Outbound::Notify { chat, text, keyboard } if *chat == ADMIN_CHAT => Some((text, keyboard)),
                _ => None,
            })
            .collect();
        assert_eq!(admin_texts.len(), 1);
        let (text, keyboard) = admin_texts[0];
        assert!(text.contains("TC-9F3K2L8M7N6P"));
        assert!(text.contains("Bonjour, je paie ce soir"));
        assert_eq!(keyboard, &Some(Keyboard::Admin(order.order_code.clone())));

        let stored = store.get(&order.order_code).await.unwrap().unwrap();
        assert_eq!(stored.payment_proof_text.as_deref(), Some("TC-9F3K2L8M7N6P"));
    }

    #[tokio::test]
    async fn test_text_without_pending_order_is_unhandled() {
        let (router, _store) = setup();
        let handled = router
            .handle_inbound(&buyer(), Inbound::Text("ABCD1234EFGH5678".to_string()))
            .await;
        assert!(handled.is_none());

        let (router, store) = setup();
        place_order(&router, &store).await;
        let handled = router.handle_inbound(&buyer(), Inbound::Text("hi".to_string())).await;
        assert!(handled.is_none());
    }

    #[tokio::test]
    async fn test_confirm_paid_notifies_buyer_once() {
        let (router, store) = setup();
        let order = place_order(&router, &store).await;
        let data = format!("ADM_PAID:{}", order.order_code);

        let effects = router.handle_callback(&admin_actor(), &data).await;
        assert_eq!(notifications_to(&effects, ChatId(BUYER_ID)), 1);
        assert!(effects.contains(&Outbound::EditOrigin {
            text: format_order(&store.get(&order.order_code).await.unwrap().unwrap()),
            keyboard: Some(Keyboard::Admin(order.order_code.clone())),
        }));
        let stored = store.get(&order.order_code).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::AwaitingLabel);

        let repeated = router.handle_callback(&admin_actor(), &data).await;
        assert_eq!(notifications_to(&repeated, ChatId(BUYER_ID)), 0);
        assert_eq!(repeated.len(), 1);
        assert!(matches!(&repeated[0], Outbound::Answer(_)));
    }

    #[tokio::test]
    async fn test_terminal_order_rejects_admin_actions() {
        let (router, store) = setup();
        let order = place_order(&router, &store).await;
        router
            .handle_callback(&admin_actor(), &format!("ADM_CANCEL:{}", order.order_code))
            .await;

        for verb in ["ADM_PAID", "ADM_DONE", "ADM_CANCEL"] {
            let effects = router
                .handle_callback(&admin_actor(), &format!("{}:{}", verb, order.order_code))
                .await;
            assert_eq!(notifications_to(&effects, ChatId(BUYER_ID)), 0);
        }
        let stored = store.get(&order.order_code).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Canceled);
    }

    #[tokio::test]
    async fn test_non_admin_cannot_cancel_or_finish() {
        let (router, store) = setup();
        let order = place_order(&router, &store).await;

        for verb in ["ADM_CANCEL", "ADM_DONE", "ADM_PAID"] {
            let effects = router
                .handle_callback(&buyer_actor(), &format!("{}:{}", verb, order.order_code))
                .await;
            assert_eq!(effects, vec![Outbound::answer("Admin only")]);
        }
        let stored = store.get(&order.order_code).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::AwaitingPayment);
    }

    #[tokio::test]
    async fn test_done_before_payment_confirmed_is_not_already_processed() {
        let (router, store) = setup();
        let order = place_order(&router, &store).await;

        let effects = router
            .handle_callback(&admin_actor(), &format!("ADM_DONE:{}", order.order_code))
            .await;
        assert_eq!(effects, vec![Outbound::answer("Paiement pas encore validé")]);
        let stored = store.get(&order.order_code).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::AwaitingPayment);

        router
            .handle_callback(&admin_actor(), &format!("ADM_PAID:{}", order.order_code))
            .await;
        let repeated = router
            .handle_callback(&admin_actor(), &format!("ADM_PAID:{}", order.order_code))
            .await;
        assert_eq!(
            repeated,
            vec![Outbound::answer("Déjà traitée (En attente de l'étiquette PDF)")]
        );
    }

    #[tokio::test]
    async fn test_admin_action_on_unknown_order() {
        let (router, _store) = setup();
        let effects = router.handle_callback(&admin_actor(), "ADM_DONE:UF-00000000-NOPE00").await;
        assert_eq!(effects, vec![Outbound::answer("Introuvable")]);
    }

    #[tokio::test]
    async fn test_unexpected_pdf_changes_nothing() {
        let (router, store) = setup();
        let order = place_order(&router, &store).await;

        let effects = router.handle_label(&buyer(), &pdf(10)).await;
        assert_eq!(effects.len(), 1);
        match &effects[0] {
            Outbound::Reply { text, .. } => assert!(text.contains("Je n'attends pas encore le PDF")),
            other => panic!("unexpected effect: {:?}", other),
        }
        let stored = store.get(&order.order_code).await.unwrap().unwrap();
        assert_eq!(stored, order);
    }

    #[tokio::test]
    async fn test_pdf_completes_order_and_forwards_once() {
        let (router, store) = setup();
        let order = place_order(&router, &store).await;
        router
            .handle_callback(&admin_actor(), &format!("ADM_PAID:{}", order.order_code))
            .await;

        let effects = router.handle_label(&buyer(), &pdf(11)).await;
        let forwards: Vec<_> = effects
            .iter()
            .filter(|e| matches!(e, Outbound::Forward { .. }))
            .collect();
        assert_eq!(
            forwards,
            vec![&Outbound::Forward {
                to: ADMIN_CHAT,
                from: ChatId(BUYER_ID),
                message_id: MessageId(11),
            }]
        );

        let stored = store.get(&order.order_code).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Done);
        assert_eq!(stored.shipping_label_ref.as_deref(), Some("file-11"));
    }

    #[tokio::test]
    async fn test_full_scenario() {
        let (router, store) = setup();

        let created = router
            .handle_inbound(&buyer(), Inbound::Cart(CART.to_string()))
            .await
            .unwrap();
        assert!(matches!(&created[0], Outbound::Reply { keyboard: Some(Keyboard::Payment(_)), .. }));
        let order = store.find_latest_by_buyer(BUYER_ID, None).await.unwrap().unwrap();
        let code = order.order_code.clone();

        let btc = router.handle_callback(&buyer_actor(), &format!("PAY_BTC:{}", code)).await;
        assert!(btc
            .iter()
            .any(|e| matches!(e, Outbound::Reply { text, .. } if text.contains("bc1qtestaddress"))));

        router
            .handle_inbound(&buyer(), Inbound::Text("0123456789abcdef".to_string()))
            .await
            .unwrap();
        assert_eq!(
            store.get(&code).await.unwrap().unwrap().payment_proof_text.as_deref(),
            Some("0123456789abcdef")
        );

        let confirm = router.handle_callback(&admin_actor(), &format!("ADM_PAID:{}", code)).await;
        assert!(confirm.iter().any(
            |e| matches!(e, Outbound::Notify { chat, text, .. } if *chat == ChatId(BUYER_ID) && text.contains("PDF"))
        ));
        assert_eq!(store.get(&code).await.unwrap().unwrap().status, OrderStatus::AwaitingLabel);

        // Proof is no longer accepted once payment is confirmed
        let late = router
            .handle_inbound(&buyer(), Inbound::Text("another-code-123".to_string()))
            .await;
        assert!(late.is_none());

        let label = router
            .handle_inbound(&buyer(), Inbound::Label(pdf(42)))
            .await
            .unwrap();
        assert_eq!(
            label.iter().filter(|e| matches!(e, Outbound::Forward { .. })).count(),
            1
        );
        let done = store.get(&code).await.unwrap().unwrap();
        assert_eq!(done.status, OrderStatus::Done);
        assert_eq!(done.payment_method, Some(PaymentMethod::Btc));
    }

    #[tokio::test]
    async fn test_label_request_depends_on_status() {
        let (router, store) = setup();
        let order = place_order(&router, &store).await;
        let data = format!("SEND_PDF:{}", order.order_code);

        let waiting = router.handle_callback(&buyer_actor(), &data).await;
        assert!(matches!(&waiting[1], Outbound::Reply { text, .. } if text.contains("pas encore validé")));

        router
            .handle_callback(&admin_actor(), &format!("ADM_PAID:{}", order.order_code))
            .await;
        let ready = router.handle_callback(&buyer_actor(), &data).await;
        assert!(matches!(&ready[1], Outbound::Reply { text, .. } if text.contains("étiquette PDF")));
    }

    #[test]
    fn test_classify_priority() {
        let inbound = Inbound::classify(Some("{}"), Some(pdf(1)), Some("text"));
        assert!(matches!(inbound, Some(Inbound::Cart(_))));

        let inbound = Inbound::classify(None, Some(pdf(1)), None);
        assert!(matches!(inbound, Some(Inbound::Label(_))));

        let mut image = pdf(2);
        image.file_name = Some("photo.jpg".to_string());
        image.mime_type = Some("image/jpeg".to_string());
        assert!(Inbound::classify(None, Some(image), None).is_none());

        let inbound = Inbound::classify(None, None, Some("  CODE12345  "));
        assert!(matches!(inbound, Some(Inbound::Text(t)) if t == "CODE12345"));
        assert!(Inbound::classify(None, None, Some("   ")).is_none());
        assert!(Inbound::classify(None, None, None).is_none());
    }

    #[test]
    fn test_pdf_detection_by_name_or_mime() {
        let mut doc = pdf(1);
        doc.mime_type = None;
        doc.file_name = Some("LABEL.PDF".to_string());
        assert!(doc.is_pdf());

        doc.file_name = None;
        doc.mime_type = Some("application/pdf".to_string());
        assert!(doc.is_pdf());

        doc.mime_type = Some("application/zip".to_string());
        assert!(!doc.is_pdf());
    }

    #[test]
    fn test_payment_code_heuristic() {
        assert!(looks_like_payment_code("ABCD1234"));
        assert!(looks_like_payment_code("1234 5678 9012 3456"));
        assert!(!looks_like_payment_code("short"));
        assert!(!looks_like_payment_code("/start now please"));
        assert!(!looks_like_payment_code("!!!!!!!!!!"));
        assert!(!looks_like_payment_code(&"A".repeat(61)));
    }

    #[test]
    fn test_static_commands() {
        assert_eq!(handle_ping(), vec![Outbound::reply("✅ Bot OK")]);
        let start = handle_start();
        assert_eq!(start.len(), 2);
        assert!(matches!(&start[0], Outbound::Reply { keyboard: Some(Keyboard::Shop), .. }));
        assert!(matches!(&handle_shop()[0], Outbound::Reply { keyboard: Some(Keyboard::Shop), .. }));
        assert_eq!(handle_help().len(), 1);
    }
}
