//! Stripe resource payloads
//!
//! Transient views of remote Stripe objects. Each payload has typed fields for
//! the values billing logic reads, and keeps everything else Stripe sent in
//! `other`, so callers still see the full remote document.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

/// A page of Stripe objects (`object: "list"`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct List<T> {
    pub data: Vec<T>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub url: Option<String>,
}

impl<T> Default for List<T> {
    fn default() -> Self {
        Self {
            data: Vec::new(),
            has_more: false,
            url: None,
        }
    }
}

impl<T> From<Vec<T>> for List<T> {
    fn from(data: Vec<T>) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }
}

/// Stripe customer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    /// ID of the card used when no source is given explicitly
    #[serde(default)]
    pub default_source: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// Card attached to a customer as a payment source
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Card {
    pub id: String,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    pub last4: String,
    #[serde(default)]
    pub exp_month: Option<i64>,
    #[serde(default)]
    pub exp_year: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// Response to deleting a card
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeletedCard {
    pub id: String,
    #[serde(default)]
    pub deleted: bool,
}

/// Plan a subscription is on
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanRef {
    pub id: String,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub interval: Option<String>,
}

/// Stripe subscription
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub customer: String,
    pub status: String,
    #[serde(default)]
    pub plan: Option<PlanRef>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    #[serde(default, with = "time::serde::timestamp::option")]
    pub trial_start: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::timestamp::option")]
    pub trial_end: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::timestamp::option")]
    pub current_period_start: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::timestamp::option")]
    pub current_period_end: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::timestamp::option")]
    pub canceled_at: Option<OffsetDateTime>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl Subscription {
    pub fn plan_id(&self) -> Option<&str> {
        self.plan.as_ref().map(|plan| plan.id.as_str())
    }

    /// Whether Stripe currently grants access (`active` or `trialing`)
    pub fn is_active(&self) -> bool {
        matches!(self.status.as_str(), "active" | "trialing")
    }
}

/// Stripe invoice. Upcoming invoices have no `id` until they are finalized.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Invoice {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub subscription: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub amount_due: i64,
    #[serde(default)]
    pub amount_paid: i64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub hosted_invoice_url: Option<String>,
    #[serde(default)]
    pub invoice_pdf: Option<String>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl Invoice {
    /// Whether the invoice was issued to the given Stripe customer
    pub fn belongs_to(&self, customer_id: &str) -> bool {
        self.customer.as_deref() == Some(customer_id)
    }
}

/// One-off charge
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Charge {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub paid: bool,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}
