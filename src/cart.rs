//! Cart payload handed over by the Mini App through `web_app_data`.
//!
//! The payload is validated against a strict schema at the boundary:
//! `{ "items": [{ "id", "name", "quantity", "unitPrice"?, "options"? }], "totalAmount" }`.
//! The shop front-end's older field names (`nom`, `qty`, `totalEur`) are accepted as aliases.

use bigdecimal::BigDecimal;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::CartError;
use crate::order::{amount_from_f64, OrderItem};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ProductId {
    Text(String),
    Number(serde_json::Number),
}

impl ProductId {
    fn into_string(self) -> String {
        match self {
            ProductId::Text(text) => text.trim().to_string(),
            ProductId::Number(number) => number.to_string(),
        }
    }
}

fn default_quantity() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawItem {
    id: ProductId,
    #[serde(default, alias = "nom")]
    name: Option<String>,
    #[serde(default = "default_quantity", alias = "qty")]
    quantity: u32,
    #[serde(default, rename = "unitPrice", alias = "price")]
    unit_price: Option<f64>,
    #[serde(default)]
    options: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCart {
    items: Vec<RawItem>,
    #[serde(rename = "totalAmount", alias = "totalEur")]
    total_amount: f64,
}

/// A validated cart, ready to become an order.
#[derive(Debug, Clone, PartialEq)]
pub struct Cart {
    pub items: Vec<OrderItem>,
    pub total_amount: BigDecimal,
}

impl Cart {
    pub fn parse(raw: &str) -> Result<Self, CartError> {
        let cart: RawCart = serde_json::from_str(raw)?;

        if cart.items.is_empty() {
            return Err(CartError::Empty);
        }

        let total_amount = amount_from_f64(cart.total_amount)
            .ok_or_else(|| CartError::InvalidTotal(cart.total_amount.to_string()))?;

        let items = cart
            .items
            .into_iter()
            .map(validate_item)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { items, total_amount })
    }
}

fn validate_item(item: RawItem) -> Result<OrderItem, CartError> {
    let product_id = item.id.into_string();
    if product_id.is_empty() {
        return Err(CartError::InvalidItem("empty product id".to_string()));
    }
    if item.quantity == 0 {
        return Err(CartError::InvalidItem(format!("zero quantity for {}", product_id)));
    }

    let unit_price = match item.unit_price {
        Some(price) => Some(
            amount_from_f64(price)
                .ok_or_else(|| CartError::InvalidItem(format!("bad unit price for {}", product_id)))?,
        ),
        None => None,
    };

    // Products without a display name fall back to their id
    let name = item
        .name
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| product_id.clone());

    let selected_options = item
        .options
        .into_iter()
        .map(|(key, value)| (key, option_value_to_string(&value)))
        .collect();

    Ok(OrderItem {
        product_id,
        name,
        quantity: item.quantity,
        unit_price,
        selected_options,
    })
}

fn option_value_to_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Array(values) => values
            .iter()
            .map(option_value_to_string)
            .collect::<Vec<_>>()
            .join(","),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
