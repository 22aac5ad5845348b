use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::Cents;

/// Proof of a captured payment, as returned by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub provider: String,
    /// Provider's order/capture id.
    pub reference: String,
    pub payer: Option<String>,
    pub amount: Cents,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    pub attempt: Ulid,
    pub amount: Cents,
    pub currency: String,
    pub description: String,
}

impl PaymentRequest {
    /// Amount as the provider expects it, e.g. `"480.00"`.
    pub fn amount_text(&self) -> String {
        format_amount(self.amount)
    }
}

/// The three ways a hosted checkout can end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    Approved(PaymentReceipt),
    Cancelled,
    Failed(String),
}

/// Third-party hosted payment flow. Implementations may take as long as the
/// guest does; callers impose no deadline.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn capture(&self, request: &PaymentRequest) -> PaymentOutcome;
}

pub fn format_amount(cents: Cents) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

/// Parse a decimal amount (`"120"`, `"120.5"`, `"120.50"`) into minor units.
/// More than two fractional digits is rejected rather than rounded.
pub fn parse_amount(text: &str) -> Option<Cents> {
    let text = text.trim();
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));
    if whole.is_empty() || frac.len() > 2 {
        return None;
    }
    if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let whole: Cents = whole.parse().ok()?;
    let frac: Cents = match frac.len() {
        0 => 0,
        1 => frac.parse::<Cents>().ok()? * 10,
        _ => frac.parse().ok()?,
    };
    let value = whole.checked_mul(100)?.checked_add(frac)?;
    Some(if negative { -value } else { value })
}
