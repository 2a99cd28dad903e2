// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Hubbub Billing Module
//!
//! Adds Stripe billing to a host application's user records, for applications
//! where one account can hold several concurrent subscriptions (e.g. a parent
//! paying for several students).
//!
//! ## Features
//!
//! - **Customers**: Create the Stripe customer for an account and store its ID
//! - **Cards**: Add, update, delete and choose the default card
//! - **Invoices**: List, preview, look up and download invoices owned by the account
//! - **Subscriptions**: Subscribe to plans, inspect trials and grace periods
//! - **Charges**: One-off charges against the customer
//!
//! Every query goes to Stripe; the only local state is the account's Stripe
//! customer ID and one [`SubscriptionRecord`] per subscribe call.

pub mod account;
pub mod billable;
pub mod client;
pub mod error;
pub mod period;
pub mod provider;
pub mod records;
pub mod resources;

#[cfg(test)]
pub(crate) mod testing;

// Account
pub use account::{BillableAccount, PgBillableAccount};

// Capability
pub use billable::{BillingCapability, ChargeOptions};

// Client
pub use client::{StripeClient, StripeConfig, DEFAULT_CURRENCY};

// Error
pub use error::{BillingError, BillingResult};

// Provider
pub use provider::{
    CardDetails, CardSource, CreateChargeParams, CreateCustomerParams, CreateSubscriptionParams,
    PaymentProvider, TrialEnd, UpdateCardParams, UpdateCustomerParams, UpdateSubscriptionParams,
};

// Records
pub use records::{
    NewSubscriptionRecord, PgSubscriptionStore, SubscriptionRecord, SubscriptionStore,
};

// Resources
pub use resources::{Card, Charge, Customer, DeletedCard, Invoice, List, PlanRef, Subscription};

use std::sync::Arc;

use sqlx::PgPool;

/// Main billing service that hands out billing capabilities for accounts
#[derive(Clone)]
pub struct BillingService {
    provider: Arc<dyn PaymentProvider>,
    store: Arc<dyn SubscriptionStore>,
    currency: String,
}

impl BillingService {
    /// Create a new billing service from environment variables
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        let config = StripeConfig::from_env()?;
        Ok(Self::from_config(config, pool))
    }

    /// Create a new billing service with explicit config
    pub fn from_config(config: StripeConfig, pool: PgPool) -> Self {
        let currency = config.currency.clone();
        Self::new(
            Arc::new(StripeClient::new(config)),
            Arc::new(PgSubscriptionStore::new(pool)),
            currency,
        )
    }

    pub fn new(
        provider: Arc<dyn PaymentProvider>,
        store: Arc<dyn SubscriptionStore>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            store,
            currency: currency.into(),
        }
    }

    /// Billing operations for one account
    pub fn for_account<'a, A: BillableAccount + ?Sized>(
        &self,
        account: &'a mut A,
    ) -> BillingCapability<'a, A> {
        BillingCapability::new(
            account,
            Arc::clone(&self.provider),
            Arc::clone(&self.store),
            self.currency.clone(),
        )
    }
}
