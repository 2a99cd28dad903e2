//! Billing operations on a billable account
//!
//! `BillingCapability` borrows a host record for the duration of a request and
//! forwards each operation to the payment provider, using the record's Stripe
//! customer ID as the join key. Local state (the record's `stripe_id` and new
//! subscription records) is only written after the remote call succeeded.

use std::collections::HashMap;
use std::sync::Arc;

use hubbub_shared::SecondaryEntityId;
use time::OffsetDateTime;

use crate::account::BillableAccount;
use crate::error::{BillingError, BillingResult};
use crate::period;
use crate::provider::{
    CardSource, CreateChargeParams, CreateCustomerParams, CreateSubscriptionParams,
    PaymentProvider, TrialEnd, UpdateCardParams, UpdateCustomerParams, UpdateSubscriptionParams,
};
use crate::records::{NewSubscriptionRecord, SubscriptionRecord, SubscriptionStore};
use crate::resources::{Card, Charge, Customer, DeletedCard, Invoice, List, Subscription};

/// Options for a one-off charge
#[derive(Debug, Clone, Default)]
pub struct ChargeOptions {
    /// Overrides the configured currency
    pub currency: Option<String>,
    /// Card to charge instead of the customer's default
    pub card_id: Option<String>,
    pub description: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// Billing operations bound to one account
pub struct BillingCapability<'a, A: BillableAccount + ?Sized> {
    account: &'a mut A,
    provider: Arc<dyn PaymentProvider>,
    store: Arc<dyn SubscriptionStore>,
    currency: String,
}

impl<'a, A: BillableAccount + ?Sized> BillingCapability<'a, A> {
    pub(crate) fn new(
        account: &'a mut A,
        provider: Arc<dyn PaymentProvider>,
        store: Arc<dyn SubscriptionStore>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            account,
            provider,
            store,
            currency: currency.into(),
        }
    }

    /// Whether a Stripe customer exists for this account
    pub fn is_ready_for_billing(&self) -> bool {
        self.account.stripe_id().is_some()
    }

    fn customer_id(&self) -> BillingResult<&str> {
        self.account.stripe_id().ok_or(BillingError::NotReady)
    }

    // =========================================================================
    // Customer
    // =========================================================================

    /// Create a Stripe customer paying with `payment_token`, then store and
    /// persist its ID on the account.
    pub async fn create_customer(
        &mut self,
        payment_token: &str,
        metadata: HashMap<String, String>,
    ) -> BillingResult<Customer> {
        let params = CreateCustomerParams {
            source: Some(payment_token.to_string()),
            email: None,
            metadata,
        };
        let customer = self.provider.create_customer(params).await?;

        let previous = self.account.stripe_id().map(str::to_owned);
        if let Some(previous) = previous.as_deref() {
            tracing::warn!(
                account_id = %self.account.id(),
                previous_customer_id = %previous,
                customer_id = %customer.id,
                "Replacing existing Stripe customer on account"
            );
        }

        self.account.set_stripe_id(Some(customer.id.clone()));
        if let Err(e) = self.account.save().await {
            self.account.set_stripe_id(previous);
            tracing::error!(
                account_id = %self.account.id(),
                customer_id = %customer.id,
                error = %e,
                "Created Stripe customer but failed to save account"
            );
            return Err(e);
        }

        tracing::info!(
            account_id = %self.account.id(),
            customer_id = %customer.id,
            "Created Stripe customer"
        );

        Ok(customer)
    }

    pub async fn get_customer(&self) -> BillingResult<Customer> {
        let customer_id = self.customer_id()?;
        tracing::debug!(
            account_id = %self.account.id(),
            customer_id = %customer_id,
            "Fetching Stripe customer"
        );
        self.provider.find_customer(customer_id).await
    }

    /// Email Stripe has on file for the customer
    pub async fn get_stripe_email(&self) -> BillingResult<Option<String>> {
        Ok(self.get_customer().await?.email)
    }

    // =========================================================================
    // Cards
    // =========================================================================

    pub async fn add_card(&self, source: impl Into<CardSource>) -> BillingResult<Card> {
        let customer_id = self.customer_id()?;
        let card = self.provider.create_card(customer_id, source.into()).await?;

        tracing::info!(
            account_id = %self.account.id(),
            customer_id = %customer_id,
            card_id = %card.id,
            "Added card"
        );

        Ok(card)
    }

    pub async fn get_card(&self, card_id: &str) -> BillingResult<Card> {
        let customer_id = self.customer_id()?;
        tracing::debug!(
            account_id = %self.account.id(),
            customer_id = %customer_id,
            card_id = %card_id,
            "Fetching card"
        );
        self.provider.find_card(customer_id, card_id).await
    }

    pub async fn list_cards(&self) -> BillingResult<List<Card>> {
        let customer_id = self.customer_id()?;
        tracing::debug!(account_id = %self.account.id(), customer_id = %customer_id, "Listing cards");
        self.provider.all_cards(customer_id).await
    }

    pub async fn update_card(&self, card_id: &str, params: UpdateCardParams) -> BillingResult<Card> {
        let customer_id = self.customer_id()?;
        let card = self.provider.update_card(customer_id, card_id, params).await?;

        tracing::info!(
            account_id = %self.account.id(),
            customer_id = %customer_id,
            card_id = %card.id,
            "Updated card"
        );

        Ok(card)
    }

    pub async fn delete_card(&self, card_id: &str) -> BillingResult<DeletedCard> {
        let customer_id = self.customer_id()?;
        let deleted = self.provider.delete_card(customer_id, card_id).await?;

        tracing::info!(
            account_id = %self.account.id(),
            customer_id = %customer_id,
            card_id = %card_id,
            "Deleted card"
        );

        Ok(deleted)
    }

    /// Make `card_id` the customer's default payment source
    pub async fn make_default_card(&self, card_id: &str) -> BillingResult<Customer> {
        let customer_id = self.customer_id()?;
        let params = UpdateCustomerParams {
            default_source: Some(card_id.to_string()),
            ..Default::default()
        };
        let customer = self.provider.update_customer(customer_id, params).await?;

        tracing::info!(
            account_id = %self.account.id(),
            customer_id = %customer_id,
            card_id = %card_id,
            "Changed default card"
        );

        Ok(customer)
    }

    pub async fn get_default_card(&self) -> BillingResult<Card> {
        let customer = self.get_customer().await?;
        let card_id = customer
            .default_source
            .ok_or_else(|| BillingError::NotFound("default card".to_string()))?;

        self.provider.find_card(&customer.id, &card_id).await
    }

    pub fn get_last_four_digits<'c>(&self, card: &'c Card) -> &'c str {
        &card.last4
    }

    // =========================================================================
    // Invoices
    // =========================================================================

    pub async fn list_invoices(&self) -> BillingResult<List<Invoice>> {
        let customer_id = self.customer_id()?;
        tracing::debug!(account_id = %self.account.id(), customer_id = %customer_id, "Listing invoices");
        self.provider.all_invoices(customer_id).await
    }

    pub async fn get_upcoming_invoice(&self) -> BillingResult<Invoice> {
        let customer_id = self.customer_id()?;
        tracing::debug!(
            account_id = %self.account.id(),
            customer_id = %customer_id,
            "Fetching upcoming invoice"
        );
        self.provider.upcoming_invoice(customer_id).await
    }

    /// Fetch an invoice, but only if it was issued to this account's customer
    pub async fn find_invoice(&self, invoice_id: &str) -> BillingResult<Invoice> {
        let customer_id = self.customer_id()?;
        tracing::debug!(
            account_id = %self.account.id(),
            customer_id = %customer_id,
            invoice_id = %invoice_id,
            "Fetching invoice"
        );
        let invoice = self.provider.find_invoice(invoice_id).await?;

        if !invoice.belongs_to(customer_id) {
            tracing::warn!(
                account_id = %self.account.id(),
                customer_id = %customer_id,
                invoice_id = %invoice_id,
                "Invoice belongs to a different customer"
            );
            return Err(BillingError::NotFound(format!("invoice {}", invoice_id)));
        }

        Ok(invoice)
    }

    /// URL of the invoice's PDF, after the same ownership check as `find_invoice`
    pub async fn download_invoice(&self, invoice_id: &str) -> BillingResult<String> {
        let invoice = self.find_invoice(invoice_id).await?;
        invoice
            .invoice_pdf
            .ok_or_else(|| BillingError::NotFound(format!("PDF for invoice {}", invoice_id)))
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    pub async fn list_subscriptions(&self) -> BillingResult<List<Subscription>> {
        let customer_id = self.customer_id()?;
        tracing::debug!(
            account_id = %self.account.id(),
            customer_id = %customer_id,
            "Listing subscriptions"
        );
        self.provider.all_subscriptions(customer_id).await
    }

    /// Fetch a subscription, but only if it belongs to this account's customer
    pub async fn get_subscription(&self, subscription_id: &str) -> BillingResult<Subscription> {
        let customer_id = self.customer_id()?;
        tracing::debug!(
            account_id = %self.account.id(),
            customer_id = %customer_id,
            subscription_id = %subscription_id,
            "Fetching subscription"
        );
        let subscription = self.provider.find_subscription(subscription_id).await?;

        if subscription.customer != customer_id {
            tracing::warn!(
                account_id = %self.account.id(),
                customer_id = %customer_id,
                subscription_id = %subscription_id,
                "Subscription belongs to a different customer"
            );
            return Err(BillingError::NotFound(format!(
                "subscription {}",
                subscription_id
            )));
        }

        Ok(subscription)
    }

    pub async fn update_subscription(
        &self,
        subscription_id: &str,
        params: UpdateSubscriptionParams,
    ) -> BillingResult<Subscription> {
        self.get_subscription(subscription_id).await?;
        let subscription = self
            .provider
            .update_subscription(subscription_id, params)
            .await?;

        tracing::info!(
            account_id = %self.account.id(),
            subscription_id = %subscription.id,
            status = %subscription.status,
            cancel_at_period_end = subscription.cancel_at_period_end,
            "Updated subscription"
        );

        Ok(subscription)
    }

    pub async fn get_trial_start_date(
        &self,
        subscription_id: &str,
    ) -> BillingResult<Option<OffsetDateTime>> {
        Ok(self.get_subscription(subscription_id).await?.trial_start)
    }

    pub async fn get_trial_end_date(
        &self,
        subscription_id: &str,
    ) -> BillingResult<Option<OffsetDateTime>> {
        Ok(self.get_subscription(subscription_id).await?.trial_end)
    }

    /// `current_period_end` if the subscription is cancelling, else `None`
    pub async fn get_subscription_end_date(
        &self,
        subscription_id: &str,
    ) -> BillingResult<Option<OffsetDateTime>> {
        let subscription = self.get_subscription(subscription_id).await?;
        Ok(period::subscription_ends_at(&subscription))
    }

    /// Whether today (UTC) is before the trial end date
    pub async fn is_on_trial(&self, subscription_id: &str) -> BillingResult<bool> {
        let trial_end = self.get_trial_end_date(subscription_id).await?;
        Ok(period::is_on_trial_at(trial_end, period::today_utc()))
    }

    /// Whether a cancelling subscription has not reached its end yet
    pub async fn is_on_grace_period(&self, subscription_id: &str) -> BillingResult<bool> {
        let ends_at = self.get_subscription_end_date(subscription_id).await?;
        Ok(period::is_on_grace_period_at(ends_at, OffsetDateTime::now_utc()))
    }

    /// End the trial immediately
    pub async fn end_trial(&self, subscription_id: &str) -> BillingResult<Subscription> {
        let params = UpdateSubscriptionParams {
            trial_end: Some(TrialEnd::Now),
            ..Default::default()
        };
        let subscription = self.update_subscription(subscription_id, params).await?;

        tracing::info!(
            account_id = %self.account.id(),
            subscription_id = %subscription_id,
            "Ended trial"
        );

        Ok(subscription)
    }

    /// Subscribe the customer to `plan_id` on behalf of `secondary_entity_id`
    /// and record the subscription locally.
    pub async fn subscribe_to_plan(
        &self,
        plan_id: &str,
        secondary_entity_id: SecondaryEntityId,
    ) -> BillingResult<Subscription> {
        let customer_id = self.customer_id()?;
        let account_id = self.account.id();

        let mut params = CreateSubscriptionParams::new(customer_id, plan_id);
        params
            .metadata
            .insert("account_id".to_string(), account_id.to_string());
        params.metadata.insert(
            "secondary_entity_id".to_string(),
            secondary_entity_id.to_string(),
        );

        let subscription = self.provider.create_subscription(params).await?;

        let record = NewSubscriptionRecord {
            account_id,
            secondary_entity_id,
            plan_id: plan_id.to_string(),
            stripe_subscription_id: subscription.id.clone(),
            trial_ends_at: subscription.trial_end,
            subscription_ends_at: period::subscription_ends_at(&subscription),
        };

        if let Err(e) = self.store.insert(record).await {
            tracing::error!(
                account_id = %account_id,
                subscription_id = %subscription.id,
                error = %e,
                "Created Stripe subscription but failed to record it"
            );
            return Err(e);
        }

        tracing::info!(
            account_id = %account_id,
            customer_id = %customer_id,
            subscription_id = %subscription.id,
            plan_id = %plan_id,
            secondary_entity_id = %secondary_entity_id,
            "Created subscription"
        );

        Ok(subscription)
    }

    /// Whether any active or trialing subscription is on `plan_id`
    pub async fn is_subscribed_to(&self, plan_id: &str) -> BillingResult<bool> {
        let subscriptions = self.list_subscriptions().await?;
        Ok(subscriptions
            .data
            .iter()
            .any(|s| s.is_active() && s.plan_id() == Some(plan_id)))
    }

    /// Subscription records stored for this account, newest first
    pub async fn subscription_records(&self) -> BillingResult<Vec<SubscriptionRecord>> {
        self.store.list_for_account(self.account.id()).await
    }

    // =========================================================================
    // Charges
    // =========================================================================

    /// Charge `amount` (smallest currency unit) to the customer
    pub async fn charge(&self, amount: i64, options: ChargeOptions) -> BillingResult<Charge> {
        if amount <= 0 {
            return Err(BillingError::InvalidInput(format!(
                "charge amount must be positive, got {}",
                amount
            )));
        }
        let customer_id = self.customer_id()?;

        let params = CreateChargeParams {
            amount,
            currency: options
                .currency
                .unwrap_or_else(|| self.currency.clone())
                .to_lowercase(),
            customer: customer_id.to_string(),
            source: options.card_id,
            description: options.description,
            metadata: options.metadata,
        };
        let charge = self.provider.create_charge(params).await?;

        tracing::info!(
            account_id = %self.account.id(),
            customer_id = %customer_id,
            charge_id = %charge.id,
            amount = charge.amount,
            currency = %charge.currency,
            "Created charge"
        );

        Ok(charge)
    }
}
