//! Order record and its status state machine.
//!
//! ```text
//! AWAITING_PAYMENT --confirm--> AWAITING_LABEL --label/done--> DONE
//!        |                            |
//!        +----------cancel------------+--> CANCELED
//! ```
//!
//! `DONE` and `CANCELED` are terminal: every transition out of them is rejected.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::TransitionError;

const ORDER_CODE_PREFIX: &str = "UF";
const ORDER_CODE_SUFFIX_LEN: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    AwaitingPayment,
    AwaitingLabel,
    Done,
    Canceled,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Done | OrderStatus::Canceled)
    }

    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (AwaitingPayment, AwaitingLabel)
                | (AwaitingPayment, Canceled)
                | (AwaitingLabel, Done)
                | (AwaitingLabel, Canceled)
        )
    }

    /// Human-readable label shown to buyers and in the admin summary.
    pub fn label(self) -> &'static str {
        match self {
            OrderStatus::AwaitingPayment => "En attente de paiement",
            OrderStatus::AwaitingLabel => "En attente de l'étiquette PDF",
            OrderStatus::Done => "Terminée",
            OrderStatus::Canceled => "Annulée",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            OrderStatus::AwaitingPayment => "AWAITING_PAYMENT",
            OrderStatus::AwaitingLabel => "AWAITING_LABEL",
            OrderStatus::Done => "DONE",
            OrderStatus::Canceled => "CANCELED",
        };
        f.write_str(code)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    #[serde(rename = "BTC")]
    Btc,
    #[serde(rename = "TRANSCASH")]
    Transcash,
}

impl PaymentMethod {
    pub fn label(self) -> &'static str {
        match self {
            PaymentMethod::Btc => "Bitcoin",
            PaymentMethod::Transcash => "Transcash",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: String,
    pub name: String,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_price: Option<BigDecimal>,
    #[serde(default)]
    pub selected_options: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub order_code: String,
    pub buyer_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buyer_handle: Option<String>,
    pub items: Vec<OrderItem>,
    pub total_amount: BigDecimal,
    pub status: OrderStatus,
    #[serde(default)]
    pub payment_method: Option<PaymentMethod>,
    #[serde(default)]
    pub payment_proof_text: Option<String>,
    #[serde(default)]
    pub shipping_label_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// A freshly created order always starts awaiting payment.
    pub fn new(
        order_code: String,
        buyer_id: i64,
        buyer_handle: Option<String>,
        items: Vec<OrderItem>,
        total_amount: BigDecimal,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            order_code,
            buyer_id,
            buyer_handle,
            items,
            total_amount,
            status: OrderStatus::AwaitingPayment,
            payment_method: None,
            payment_proof_text: None,
            shipping_label_ref: None,
            created_at,
        }
    }

    fn transition(&mut self, next: OrderStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                code: self.order_code.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn confirm_payment(&mut self) -> Result<(), TransitionError> {
        self.transition(OrderStatus::AwaitingLabel)
    }

    pub fn cancel(&mut self) -> Result<(), TransitionError> {
        self.transition(OrderStatus::Canceled)
    }

    pub fn mark_done(&mut self) -> Result<(), TransitionError> {
        self.transition(OrderStatus::Done)
    }

    /// Accepts the buyer's shipping label and completes the order.
    pub fn attach_label(&mut self, file_ref: String) -> Result<(), TransitionError> {
        self.transition(OrderStatus::Done)?;
        self.shipping_label_ref = Some(file_ref);
        Ok(())
    }

    pub fn awaits_payment(&self) -> bool {
        self.status == OrderStatus::AwaitingPayment
    }

    /// Stamps the chosen payment method. Only meaningful before payment is confirmed.
    pub fn choose_payment_method(&mut self, method: PaymentMethod) -> bool {
        if !self.awaits_payment() {
            return false;
        }
        self.payment_method = Some(method);
        true
    }

    /// Records a payment proof while awaiting payment. A later submission replaces the
    /// earlier one and the previous text is returned.
    pub fn record_payment_proof(&mut self, proof: &str) -> Result<Option<String>, TransitionError> {
        if !self.awaits_payment() {
            return Err(TransitionError {
                code: self.order_code.clone(),
                from: self.status,
                to: self.status,
            });
        }
        Ok(self.payment_proof_text.replace(proof.to_string()))
    }
}

/// Generates `UF-YYYYMMDD-XXXXXX`. Uniqueness is enforced by the store, not here.
pub fn new_order_code(now: DateTime<Utc>) -> String {
    let suffix: String = Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(ORDER_CODE_SUFFIX_LEN)
        .collect();
    format!(
        "{}-{}-{}",
        ORDER_CODE_PREFIX,
        now.format("%Y%m%d"),
        suffix.to_uppercase()
    )
}

/// Converts a JSON number amount into a two-decimal fixed-point value.
pub fn amount_from_f64(value: f64) -> Option<BigDecimal> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    BigDecimal::from_str(&format!("{:.2}", value)).ok()
}
