//! Billable account seam
//!
//! The host application owns its user records. Billing only needs to read the
//! record's ID, read/write its Stripe customer ID, and ask it to save itself.

use async_trait::async_trait;
use hubbub_shared::AccountId;
use sqlx::PgPool;

use crate::error::{BillingError, BillingResult};

/// A host record that can hold a Stripe customer
#[async_trait]
pub trait BillableAccount: Send + Sync {
    fn id(&self) -> AccountId;

    /// Stripe customer ID, `None` until a customer has been created
    fn stripe_id(&self) -> Option<&str>;

    fn set_stripe_id(&mut self, stripe_id: Option<String>);

    /// Persist the record's current state
    async fn save(&mut self) -> BillingResult<()>;
}

/// `users` row that persists its Stripe customer ID to Postgres
#[derive(Debug, Clone)]
pub struct PgBillableAccount {
    id: AccountId,
    stripe_id: Option<String>,
    pool: PgPool,
}

impl PgBillableAccount {
    /// Load the billing view of an existing user
    pub async fn load(pool: PgPool, id: AccountId) -> BillingResult<Self> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT stripe_id FROM users WHERE id = $1")
                .bind(id)
                .fetch_optional(&pool)
                .await?;

        match row {
            Some((stripe_id,)) => Ok(Self {
                id,
                stripe_id,
                pool,
            }),
            None => Err(BillingError::NotFound(format!("account {}", id))),
        }
    }
}

#[async_trait]
impl BillableAccount for PgBillableAccount {
    fn id(&self) -> AccountId {
        self.id
    }

    fn stripe_id(&self) -> Option<&str> {
        self.stripe_id.as_deref()
    }

    fn set_stripe_id(&mut self, stripe_id: Option<String>) {
        self.stripe_id = stripe_id;
    }

    async fn save(&mut self) -> BillingResult<()> {
        let result = sqlx::query("UPDATE users SET stripe_id = $1 WHERE id = $2")
            .bind(self.stripe_id.as_deref())
            .bind(self.id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(BillingError::NotFound(format!("account {}", self.id)));
        }

        Ok(())
    }
}
