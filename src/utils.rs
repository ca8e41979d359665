use bigdecimal::BigDecimal;

use crate::order::Order;

/// Formats an amount as euros with two decimals, e.g. `59.80 €`.
pub fn format_euro(amount: &BigDecimal) -> String {
    format!("{} €", amount.with_scale(2))
}

/// Order summary sent to the admin channel, HTML formatted.
pub fn format_order(order: &Order) -> String {
    let mut result = String::new();

    result.push_str(&format!("🧾 <b>Commande {}</b>\n", escape_html(&order.order_code)));
    let client = match &order.buyer_handle {
        Some(handle) => format!("@{}", escape_html(handle)),
        None => order.buyer_id.to_string(),
    };
    result.push_str(&format!("👤 Client: {}\n", client));
    result.push_str(&format!("💶 Total: <b>{}</b>\n\n", format_euro(&order.total_amount)));

    result.push_str("📦 Articles :\n");
    for item in &order.items {
        let options = if item.selected_options.is_empty() {
            String::new()
        } else {
            let joined = item
                .selected_options
                .iter()
                .map(|(key, value)| format!("{}:{}", escape_html(key), escape_html(value)))
                .collect::<Vec<_>>()
                .join(" | ");
            format!(" ({})", joined)
        };
        result.push_str(&format!("- x{} {}{}\n", item.quantity, escape_html(&item.name), options));
    }

    if let Some(method) = order.payment_method {
        result.push_str(&format!("\n💳 Paiement: {}", method.label()));
    }
    if let Some(proof) = &order.payment_proof_text {
        result.push_str(&format!("\n🔑 Preuve: <code>{}</code>", escape_html(proof)));
    }

    result.push_str(&format!("\n\n📌 Statut: <b>{}</b>", order.status.label()));
    result
}

pub fn format_error(error: &str) -> String {
    format!("❌ {}", escape_html(error))
}

pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
