use thiserror::Error;

use crate::order::OrderStatus;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("order code already taken: {0}")]
    DuplicateCode(String),

    #[error("order not found: {0}")]
    NotFound(String),
}

/// Why a Mini App cart payload was rejected.
#[derive(Debug, Error)]
pub enum CartError {
    #[error("unreadable cart payload: {0}")]
    Unreadable(#[from] serde_json::Error),

    #[error("cart has no items")]
    Empty,

    #[error("invalid cart item: {0}")]
    InvalidItem(String),

    #[error("invalid cart total: {0}")]
    InvalidTotal(String),
}

/// A status change the order state machine does not allow.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("order {code} cannot go from {from} to {to}")]
pub struct TransitionError {
    pub code: String,
    pub from: OrderStatus,
    pub to: OrderStatus,
}

impl TransitionError {
    /// True when the order already reached a final state, as opposed to a step being skipped.
    pub fn already_settled(&self) -> bool {
        self.from.is_terminal() || self.from == self.to
    }
}
