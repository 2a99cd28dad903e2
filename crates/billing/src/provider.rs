//! Payment provider seam
//!
//! `PaymentProvider` groups the Stripe capabilities billing needs: customers,
//! cards (scoped by customer), subscriptions, invoices and charges. The live
//! implementation is [`crate::client::StripeClient`]; tests use an in-memory
//! one.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Serialize, Serializer};

use crate::error::BillingResult;
use crate::resources::{Card, Charge, Customer, DeletedCard, Invoice, List, Subscription};

/// Parameters for creating a customer (`POST /customers`)
#[derive(Debug, Clone, Default, Serialize)]
pub struct CreateCustomerParams {
    /// Payment source token, e.g. `tok_visa`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

/// Parameters for updating a customer (`POST /customers/{id}`)
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateCustomerParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
}

/// Raw card details, for when no token was collected client side
#[derive(Debug, Clone, Serialize)]
pub struct CardDetails {
    object: &'static str,
    pub number: String,
    pub exp_month: u8,
    pub exp_year: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cvc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl CardDetails {
    pub fn new(number: impl Into<String>, exp_month: u8, exp_year: u16) -> Self {
        Self {
            object: "card",
            number: number.into(),
            exp_month,
            exp_year,
            cvc: None,
            name: None,
        }
    }
}

/// A new card: either a token or raw details
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum CardSource {
    Token(String),
    Details(CardDetails),
}

impl From<&str> for CardSource {
    fn from(token: &str) -> Self {
        CardSource::Token(token.to_string())
    }
}

impl From<String> for CardSource {
    fn from(token: String) -> Self {
        CardSource::Token(token)
    }
}

impl From<CardDetails> for CardSource {
    fn from(details: CardDetails) -> Self {
        CardSource::Details(details)
    }
}

/// Mutable card fields (`POST /customers/{id}/sources/{card}`)
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateCardParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp_month: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp_year: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address_line1: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address_city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address_zip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address_country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
}

/// Trial end as Stripe accepts it: a unix timestamp or `now`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialEnd {
    Now,
    At(i64),
}

impl Serialize for TrialEnd {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            TrialEnd::Now => serializer.serialize_str("now"),
            TrialEnd::At(timestamp) => serializer.serialize_i64(*timestamp),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionItemParams {
    pub plan: String,
}

/// Parameters for creating a subscription (`POST /subscriptions`)
#[derive(Debug, Clone, Serialize)]
pub struct CreateSubscriptionParams {
    pub customer: String,
    pub items: Vec<SubscriptionItemParams>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl CreateSubscriptionParams {
    pub fn new(customer: impl Into<String>, plan_id: impl Into<String>) -> Self {
        Self {
            customer: customer.into(),
            items: vec![SubscriptionItemParams {
                plan: plan_id.into(),
            }],
            metadata: HashMap::new(),
        }
    }
}

/// Parameters for updating a subscription (`POST /subscriptions/{id}`)
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateSubscriptionParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_at_period_end: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trial_end: Option<TrialEnd>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proration_behavior: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
}

/// Parameters for a one-off charge (`POST /charges`)
#[derive(Debug, Clone, Serialize)]
pub struct CreateChargeParams {
    pub amount: i64,
    pub currency: String,
    pub customer: String,
    /// Card to charge; the customer's default source when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

/// The Stripe operations billing forwards to
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    // Customers
    async fn create_customer(&self, params: CreateCustomerParams) -> BillingResult<Customer>;
    async fn find_customer(&self, customer_id: &str) -> BillingResult<Customer>;
    async fn update_customer(
        &self,
        customer_id: &str,
        params: UpdateCustomerParams,
    ) -> BillingResult<Customer>;

    // Cards
    async fn create_card(&self, customer_id: &str, source: CardSource) -> BillingResult<Card>;
    async fn find_card(&self, customer_id: &str, card_id: &str) -> BillingResult<Card>;
    async fn all_cards(&self, customer_id: &str) -> BillingResult<List<Card>>;
    async fn update_card(
        &self,
        customer_id: &str,
        card_id: &str,
        params: UpdateCardParams,
    ) -> BillingResult<Card>;
    async fn delete_card(&self, customer_id: &str, card_id: &str) -> BillingResult<DeletedCard>;

    // Subscriptions
    async fn create_subscription(
        &self,
        params: CreateSubscriptionParams,
    ) -> BillingResult<Subscription>;
    async fn find_subscription(&self, subscription_id: &str) -> BillingResult<Subscription>;
    async fn all_subscriptions(&self, customer_id: &str) -> BillingResult<List<Subscription>>;
    async fn update_subscription(
        &self,
        subscription_id: &str,
        params: UpdateSubscriptionParams,
    ) -> BillingResult<Subscription>;

    // Invoices
    async fn find_invoice(&self, invoice_id: &str) -> BillingResult<Invoice>;
    async fn all_invoices(&self, customer_id: &str) -> BillingResult<List<Invoice>>;
    async fn upcoming_invoice(&self, customer_id: &str) -> BillingResult<Invoice>;

    // Charges
    async fn create_charge(&self, params: CreateChargeParams) -> BillingResult<Charge>;
}
