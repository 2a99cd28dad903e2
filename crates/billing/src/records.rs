//! Locally persisted subscription records
//!
//! One row per successful subscribe call, linking the account, the entity the
//! subscription was bought for, and the Stripe subscription.

use async_trait::async_trait;
use hubbub_shared::{AccountId, SecondaryEntityId, SubscriptionRecordId};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;

use crate::error::BillingResult;

/// A row of `subscription_records`
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct SubscriptionRecord {
    pub id: SubscriptionRecordId,
    pub account_id: AccountId,
    pub secondary_entity_id: SecondaryEntityId,
    pub plan_id: String,
    pub stripe_subscription_id: String,
    pub trial_ends_at: Option<OffsetDateTime>,
    /// Only set when the subscription is marked to cancel at period end
    pub subscription_ends_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

/// Values for a record about to be inserted
#[derive(Debug, Clone, PartialEq)]
pub struct NewSubscriptionRecord {
    pub account_id: AccountId,
    pub secondary_entity_id: SecondaryEntityId,
    pub plan_id: String,
    pub stripe_subscription_id: String,
    pub trial_ends_at: Option<OffsetDateTime>,
    pub subscription_ends_at: Option<OffsetDateTime>,
}

impl NewSubscriptionRecord {
    pub fn into_record(self, id: SubscriptionRecordId, created_at: OffsetDateTime) -> SubscriptionRecord {
        SubscriptionRecord {
            id,
            account_id: self.account_id,
            secondary_entity_id: self.secondary_entity_id,
            plan_id: self.plan_id,
            stripe_subscription_id: self.stripe_subscription_id,
            trial_ends_at: self.trial_ends_at,
            subscription_ends_at: self.subscription_ends_at,
            created_at,
        }
    }
}

/// Storage for subscription records
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn insert(&self, record: NewSubscriptionRecord) -> BillingResult<SubscriptionRecord>;

    /// Records for one account, newest first
    async fn list_for_account(&self, account_id: AccountId)
        -> BillingResult<Vec<SubscriptionRecord>>;
}

/// Postgres-backed subscription records
#[derive(Debug, Clone)]
pub struct PgSubscriptionStore {
    pool: PgPool,
}

impl PgSubscriptionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionStore for PgSubscriptionStore {
    async fn insert(&self, record: NewSubscriptionRecord) -> BillingResult<SubscriptionRecord> {
        let row: SubscriptionRecord = sqlx::query_as(
            r#"
            INSERT INTO subscription_records (
                id, account_id, secondary_entity_id, plan_id,
                stripe_subscription_id, trial_ends_at, subscription_ends_at, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
            RETURNING id, account_id, secondary_entity_id, plan_id,
                      stripe_subscription_id, trial_ends_at, subscription_ends_at, created_at
            "#,
        )
        .bind(SubscriptionRecordId::new())
        .bind(record.account_id)
        .bind(record.secondary_entity_id)
        .bind(&record.plan_id)
        .bind(&record.stripe_subscription_id)
        .bind(record.trial_ends_at)
        .bind(record.subscription_ends_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn list_for_account(
        &self,
        account_id: AccountId,
    ) -> BillingResult<Vec<SubscriptionRecord>> {
        let rows: Vec<SubscriptionRecord> = sqlx::query_as(
            r#"
            SELECT id, account_id, secondary_entity_id, plan_id,
                   stripe_subscription_id, trial_ends_at, subscription_ends_at, created_at
            FROM subscription_records
            WHERE account_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
