//! Stripe client configuration and the live payment provider

use async_trait::async_trait;
use serde::Serialize;
use stripe::Client;

use crate::error::{BillingError, BillingResult};
use crate::provider::{
    CardSource, CreateChargeParams, CreateCustomerParams, CreateSubscriptionParams,
    PaymentProvider, UpdateCardParams, UpdateCustomerParams, UpdateSubscriptionParams,
};
use crate::resources::{Card, Charge, Customer, DeletedCard, Invoice, List, Subscription};

/// Default currency for one-off charges
pub const DEFAULT_CURRENCY: &str = "usd";

/// Page size for list calls. Stripe's maximum.
const LIST_LIMIT: u8 = 100;

/// Configuration for Stripe billing
#[derive(Debug, Clone)]
pub struct StripeConfig {
    /// Stripe secret API key
    pub secret_key: String,
    /// Currency for charges that don't name one
    pub currency: String,
    /// Override for the Stripe API host (e.g. a local stripe-mock)
    pub api_base: Option<String>,
}

impl StripeConfig {
    pub fn new(secret_key: impl Into<String>) -> Self {
        Self {
            secret_key: secret_key.into(),
            currency: DEFAULT_CURRENCY.to_string(),
            api_base: None,
        }
    }

    /// Create config from environment variables
    pub fn from_env() -> BillingResult<Self> {
        let secret_key = std::env::var("STRIPE_SECRET_KEY")
            .map_err(|_| BillingError::Config("STRIPE_SECRET_KEY not set".to_string()))?;
        if secret_key.trim().is_empty() {
            return Err(BillingError::Config("STRIPE_SECRET_KEY is empty".to_string()));
        }

        Ok(Self {
            secret_key,
            currency: std::env::var("BILLING_CURRENCY")
                .map(|c| c.to_lowercase())
                .unwrap_or_else(|_| DEFAULT_CURRENCY.to_string()),
            api_base: std::env::var("STRIPE_API_BASE").ok(),
        })
    }
}

/// Stripe billing client
#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    config: StripeConfig,
}

impl StripeClient {
    /// Create a new Stripe client from config
    pub fn new(config: StripeConfig) -> Self {
        let client = match config.api_base.as_deref() {
            Some(base) => Client::from_url(base, config.secret_key.as_str()),
            None => Client::new(config.secret_key.as_str()),
        };
        Self { client, config }
    }

    /// Create a new Stripe client from environment variables
    pub fn from_env() -> BillingResult<Self> {
        let config = StripeConfig::from_env()?;
        Ok(Self::new(config))
    }

    /// Get the inner Stripe client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Get the config
    pub fn config(&self) -> &StripeConfig {
        &self.config
    }
}

#[derive(Serialize)]
struct CustomerQuery<'a> {
    customer: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<u8>,
}

#[derive(Serialize)]
struct CardQuery {
    object: &'static str,
    limit: u8,
}

#[derive(Serialize)]
struct NewSource {
    source: CardSource,
}

#[async_trait]
impl PaymentProvider for StripeClient {
    async fn create_customer(&self, params: CreateCustomerParams) -> BillingResult<Customer> {
        Ok(self.client.post_form("/customers", params).await?)
    }

    async fn find_customer(&self, customer_id: &str) -> BillingResult<Customer> {
        Ok(self.client.get(&format!("/customers/{}", customer_id)).await?)
    }

    async fn update_customer(
        &self,
        customer_id: &str,
        params: UpdateCustomerParams,
    ) -> BillingResult<Customer> {
        Ok(self
            .client
            .post_form(&format!("/customers/{}", customer_id), params)
            .await?)
    }

    async fn create_card(&self, customer_id: &str, source: CardSource) -> BillingResult<Card> {
        Ok(self
            .client
            .post_form(
                &format!("/customers/{}/sources", customer_id),
                NewSource { source },
            )
            .await?)
    }

    async fn find_card(&self, customer_id: &str, card_id: &str) -> BillingResult<Card> {
        Ok(self
            .client
            .get(&format!("/customers/{}/sources/{}", customer_id, card_id))
            .await?)
    }

    async fn all_cards(&self, customer_id: &str) -> BillingResult<List<Card>> {
        Ok(self
            .client
            .get_query(
                &format!("/customers/{}/sources", customer_id),
                CardQuery {
                    object: "card",
                    limit: LIST_LIMIT,
                },
            )
            .await?)
    }

    async fn update_card(
        &self,
        customer_id: &str,
        card_id: &str,
        params: UpdateCardParams,
    ) -> BillingResult<Card> {
        Ok(self
            .client
            .post_form(
                &format!("/customers/{}/sources/{}", customer_id, card_id),
                params,
            )
            .await?)
    }

    async fn delete_card(&self, customer_id: &str, card_id: &str) -> BillingResult<DeletedCard> {
        Ok(self
            .client
            .delete(&format!("/customers/{}/sources/{}", customer_id, card_id))
            .await?)
    }

    async fn create_subscription(
        &self,
        params: CreateSubscriptionParams,
    ) -> BillingResult<Subscription> {
        Ok(self.client.post_form("/subscriptions", params).await?)
    }

    async fn find_subscription(&self, subscription_id: &str) -> BillingResult<Subscription> {
        Ok(self
            .client
            .get(&format!("/subscriptions/{}", subscription_id))
            .await?)
    }

    async fn all_subscriptions(&self, customer_id: &str) -> BillingResult<List<Subscription>> {
        Ok(self
            .client
            .get_query(
                "/subscriptions",
                CustomerQuery {
                    customer: customer_id,
                    limit: Some(LIST_LIMIT),
                },
            )
            .await?)
    }

    async fn update_subscription(
        &self,
        subscription_id: &str,
        params: UpdateSubscriptionParams,
    ) -> BillingResult<Subscription> {
        Ok(self
            .client
            .post_form(&format!("/subscriptions/{}", subscription_id), params)
            .await?)
    }

    async fn find_invoice(&self, invoice_id: &str) -> BillingResult<Invoice> {
        Ok(self.client.get(&format!("/invoices/{}", invoice_id)).await?)
    }

    async fn all_invoices(&self, customer_id: &str) -> BillingResult<List<Invoice>> {
        Ok(self
            .client
            .get_query(
                "/invoices",
                CustomerQuery {
                    customer: customer_id,
                    limit: Some(LIST_LIMIT),
                },
            )
            .await?)
    }

    async fn upcoming_invoice(&self, customer_id: &str) -> BillingResult<Invoice> {
        Ok(self
            .client
            .get_query(
                "/invoices/upcoming",
                CustomerQuery {
                    customer: customer_id,
                    limit: None,
                },
            )
            .await?)
    }

    async fn create_charge(&self, params: CreateChargeParams) -> BillingResult<Charge> {
        Ok(self.client.post_form("/charges", params).await?)
    }
}
