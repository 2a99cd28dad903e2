//! In-memory doubles for the billing seams

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use hubbub_shared::{AccountId, SubscriptionRecordId};
use serde_json::Map;
use time::OffsetDateTime;

use crate::account::BillableAccount;
use crate::error::{BillingError, BillingResult};
use crate::provider::{
    CardSource, CreateChargeParams, CreateCustomerParams, CreateSubscriptionParams,
    PaymentProvider, UpdateCardParams, UpdateCustomerParams, UpdateSubscriptionParams, TrialEnd,
};
use crate::records::{NewSubscriptionRecord, SubscriptionRecord, SubscriptionStore};
use crate::resources::{
    Card, Charge, Customer, DeletedCard, Invoice, List, PlanRef, Subscription,
};

#[derive(Default)]
struct State {
    counter: u64,
    customers: HashMap<String, Customer>,
    cards: HashMap<String, Vec<Card>>,
    subscriptions: HashMap<String, Subscription>,
    invoices: HashMap<String, Invoice>,
    upcoming: HashMap<String, Invoice>,
    charges: Vec<Charge>,
    next_customer_id: Option<String>,
    next_subscription: Option<Subscription>,
    fail_next: Option<String>,
    calls: usize,
}

impl State {
    fn next_id(&mut self, prefix: &str) -> String {
        self.counter += 1;
        format!("{}_{}", prefix, self.counter)
    }

    fn check_failure(&mut self) -> BillingResult<()> {
        self.calls += 1;
        match self.fail_next.take() {
            Some(message) => Err(BillingError::StripeApi(message)),
            None => Ok(()),
        }
    }

    fn customer_mut(&mut self, customer_id: &str) -> BillingResult<&mut Customer> {
        self.customers
            .get_mut(customer_id)
            .ok_or_else(|| no_such("customer", customer_id))
    }

    fn attach_card(&mut self, customer_id: &str, source: CardSource) -> BillingResult<Card> {
        let (last4, exp_month, exp_year, name) = match source {
            CardSource::Token(token) if token.starts_with("tok_invalid") => {
                return Err(no_such("token", &token));
            }
            CardSource::Token(token) if token.starts_with("tok_mastercard") => {
                ("4444".to_string(), 12, 2030, None)
            }
            CardSource::Token(_) => ("4242".to_string(), 12, 2030, None),
            CardSource::Details(details) => {
                let digits = details.number.len();
                let last4 = details.number[digits.saturating_sub(4)..].to_string();
                (
                    last4,
                    i64::from(details.exp_month),
                    i64::from(details.exp_year),
                    details.name,
                )
            }
        };

        let card = Card {
            id: self.next_id("card"),
            customer: Some(customer_id.to_string()),
            brand: Some(if last4 == "4444" { "MasterCard" } else { "Visa" }.to_string()),
            last4,
            exp_month: Some(exp_month),
            exp_year: Some(exp_year),
            name,
            other: Map::new(),
        };

        let customer = self.customer_mut(customer_id)?;
        if customer.default_source.is_none() {
            customer.default_source = Some(card.id.clone());
        }
        self.cards
            .entry(customer_id.to_string())
            .or_default()
            .push(card.clone());
        Ok(card)
    }
}

fn no_such(kind: &str, id: &str) -> BillingError {
    BillingError::StripeApi(format!("No such {}: '{}'", kind, id))
}

pub fn subscription(id: &str, customer: &str, plan_id: &str) -> Subscription {
    let now = OffsetDateTime::now_utc();
    Subscription {
        id: id.to_string(),
        customer: customer.to_string(),
        status: "active".to_string(),
        plan: Some(PlanRef {
            id: plan_id.to_string(),
            ..Default::default()
        }),
        cancel_at_period_end: false,
        trial_start: None,
        trial_end: None,
        current_period_start: Some(now),
        current_period_end: Some(now + time::Duration::days(30)),
        canceled_at: None,
        other: Map::new(),
    }
}

pub fn invoice(id: &str, customer: &str) -> Invoice {
    Invoice {
        id: Some(id.to_string()),
        customer: Some(customer.to_string()),
        status: Some("paid".to_string()),
        amount_due: 900,
        amount_paid: 900,
        currency: Some("usd".to_string()),
        ..Default::default()
    }
}

/// Stripe stand-in that keeps every object in memory
#[derive(Default)]
pub struct InMemoryProvider {
    state: Mutex<State>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next provider call fail with the given Stripe message
    pub fn fail_next(&self, message: &str) {
        self.state.lock().unwrap().fail_next = Some(message.to_string());
    }

    /// ID to give the next created customer
    pub fn queue_customer_id(&self, id: &str) {
        self.state.lock().unwrap().next_customer_id = Some(id.to_string());
    }

    /// Subscription the next create call returns (customer and plan are filled in)
    pub fn queue_subscription(&self, subscription: Subscription) {
        self.state.lock().unwrap().next_subscription = Some(subscription);
    }

    pub fn insert_customer(&self, id: &str) {
        let customer = Customer {
            id: id.to_string(),
            ..Default::default()
        };
        self.state
            .lock()
            .unwrap()
            .customers
            .insert(id.to_string(), customer);
    }

    pub fn insert_subscription(&self, subscription: Subscription) {
        self.state
            .lock()
            .unwrap()
            .subscriptions
            .insert(subscription.id.clone(), subscription);
    }

    pub fn insert_invoice(&self, invoice: Invoice) {
        let mut state = self.state.lock().unwrap();
        let id = invoice.id.clone().unwrap_or_default();
        state.invoices.insert(id, invoice);
    }

    pub fn set_upcoming_invoice(&self, customer_id: &str, invoice: Invoice) {
        self.state
            .lock()
            .unwrap()
            .upcoming
            .insert(customer_id.to_string(), invoice);
    }

    pub fn customer(&self, id: &str) -> Option<Customer> {
        self.state.lock().unwrap().customers.get(id).cloned()
    }

    pub fn subscription(&self, id: &str) -> Option<Subscription> {
        self.state.lock().unwrap().subscriptions.get(id).cloned()
    }

    pub fn customer_count(&self) -> usize {
        self.state.lock().unwrap().customers.len()
    }

    pub fn charges(&self) -> Vec<Charge> {
        self.state.lock().unwrap().charges.clone()
    }

    /// Number of provider calls made so far
    pub fn calls(&self) -> usize {
        self.state.lock().unwrap().calls
    }
}

#[async_trait]
impl PaymentProvider for InMemoryProvider {
    async fn create_customer(&self, params: CreateCustomerParams) -> BillingResult<Customer> {
        let mut state = self.state.lock().unwrap();
        state.check_failure()?;
        if let Some(token) = params.source.as_deref() {
            if token.starts_with("tok_invalid") {
                return Err(no_such("token", token));
            }
        }

        let id = match state.next_customer_id.take() {
            Some(id) => id,
            None => state.next_id("cus"),
        };
        state.customers.insert(
            id.clone(),
            Customer {
                id: id.clone(),
                email: params.email,
                metadata: params.metadata,
                ..Default::default()
            },
        );
        if let Some(token) = params.source {
            state.attach_card(&id, CardSource::Token(token))?;
        }

        Ok(state.customer_mut(&id)?.clone())
    }

    async fn find_customer(&self, customer_id: &str) -> BillingResult<Customer> {
        let mut state = self.state.lock().unwrap();
        state.check_failure()?;
        Ok(state.customer_mut(customer_id)?.clone())
    }

    async fn update_customer(
        &self,
        customer_id: &str,
        params: UpdateCustomerParams,
    ) -> BillingResult<Customer> {
        let mut state = self.state.lock().unwrap();
        state.check_failure()?;

        if let Some(card_id) = params.default_source.as_deref() {
            let owns_card = state
                .cards
                .get(customer_id)
                .is_some_and(|cards| cards.iter().any(|c| c.id == card_id));
            if !owns_card {
                return Err(no_such("source", card_id));
            }
        }

        let customer = state.customer_mut(customer_id)?;
        if let Some(card_id) = params.default_source {
            customer.default_source = Some(card_id);
        }
        if let Some(email) = params.email {
            customer.email = Some(email);
        }
        if let Some(metadata) = params.metadata {
            customer.metadata.extend(metadata);
        }
        Ok(customer.clone())
    }

    async fn create_card(&self, customer_id: &str, source: CardSource) -> BillingResult<Card> {
        let mut state = self.state.lock().unwrap();
        state.check_failure()?;
        state.attach_card(customer_id, source)
    }

    async fn find_card(&self, customer_id: &str, card_id: &str) -> BillingResult<Card> {
        let mut state = self.state.lock().unwrap();
        state.check_failure()?;
        state
            .cards
            .get(customer_id)
            .and_then(|cards| cards.iter().find(|c| c.id == card_id))
            .cloned()
            .ok_or_else(|| no_such("source", card_id))
    }

    async fn all_cards(&self, customer_id: &str) -> BillingResult<List<Card>> {
        let mut state = self.state.lock().unwrap();
        state.check_failure()?;
        state.customer_mut(customer_id)?;
        Ok(state.cards.get(customer_id).cloned().unwrap_or_default().into())
    }

    async fn update_card(
        &self,
        customer_id: &str,
        card_id: &str,
        params: UpdateCardParams,
    ) -> BillingResult<Card> {
        let mut state = self.state.lock().unwrap();
        state.check_failure()?;
        let card = state
            .cards
            .get_mut(customer_id)
            .and_then(|cards| cards.iter_mut().find(|c| c.id == card_id))
            .ok_or_else(|| no_such("source", card_id))?;

        if let Some(name) = params.name {
            card.name = Some(name);
        }
        if let Some(month) = params.exp_month {
            if !(1..=12).contains(&month) {
                return Err(BillingError::StripeApi(
                    "Your card's expiration month is invalid.".to_string(),
                ));
            }
            card.exp_month = Some(i64::from(month));
        }
        if let Some(year) = params.exp_year {
            card.exp_year = Some(i64::from(year));
        }
        Ok(card.clone())
    }

    async fn delete_card(&self, customer_id: &str, card_id: &str) -> BillingResult<DeletedCard> {
        let mut state = self.state.lock().unwrap();
        state.check_failure()?;
        let cards = state
            .cards
            .get_mut(customer_id)
            .ok_or_else(|| no_such("source", card_id))?;
        let before = cards.len();
        cards.retain(|c| c.id != card_id);
        if cards.len() == before {
            return Err(no_such("source", card_id));
        }

        let customer = state.customer_mut(customer_id)?;
        if customer.default_source.as_deref() == Some(card_id) {
            customer.default_source = None;
        }
        Ok(DeletedCard {
            id: card_id.to_string(),
            deleted: true,
        })
    }

    async fn create_subscription(
        &self,
        params: CreateSubscriptionParams,
    ) -> BillingResult<Subscription> {
        let mut state = self.state.lock().unwrap();
        state.check_failure()?;
        state.customer_mut(&params.customer)?;

        let plan_id = params
            .items
            .first()
            .map(|item| item.plan.clone())
            .ok_or_else(|| BillingError::StripeApi("Missing required param: items".to_string()))?;
        if plan_id.starts_with("plan_missing") {
            return Err(no_such("plan", &plan_id));
        }

        let mut sub = match state.next_subscription.take() {
            Some(sub) => sub,
            None => {
                let id = state.next_id("sub");
                subscription(&id, &params.customer, &plan_id)
            }
        };
        sub.customer = params.customer;
        sub.plan = Some(PlanRef {
            id: plan_id,
            ..Default::default()
        });
        if !params.metadata.is_empty() {
            let metadata: Map<String, serde_json::Value> = params
                .metadata
                .into_iter()
                .map(|(key, value)| (key, value.into()))
                .collect();
            sub.other
                .insert("metadata".to_string(), serde_json::Value::Object(metadata));
        }

        state.subscriptions.insert(sub.id.clone(), sub.clone());
        Ok(sub)
    }

    async fn find_subscription(&self, subscription_id: &str) -> BillingResult<Subscription> {
        let mut state = self.state.lock().unwrap();
        state.check_failure()?;
        state
            .subscriptions
            .get(subscription_id)
            .cloned()
            .ok_or_else(|| no_such("subscription", subscription_id))
    }

    async fn all_subscriptions(&self, customer_id: &str) -> BillingResult<List<Subscription>> {
        let mut state = self.state.lock().unwrap();
        state.check_failure()?;
        let mut subs: Vec<Subscription> = state
            .subscriptions
            .values()
            .filter(|s| s.customer == customer_id)
            .cloned()
            .collect();
        subs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(subs.into())
    }

    async fn update_subscription(
        &self,
        subscription_id: &str,
        params: UpdateSubscriptionParams,
    ) -> BillingResult<Subscription> {
        let mut state = self.state.lock().unwrap();
        state.check_failure()?;
        let sub = state
            .subscriptions
            .get_mut(subscription_id)
            .ok_or_else(|| no_such("subscription", subscription_id))?;

        if let Some(cancel) = params.cancel_at_period_end {
            sub.cancel_at_period_end = cancel;
        }
        match params.trial_end {
            Some(TrialEnd::Now) => {
                sub.trial_end = Some(OffsetDateTime::now_utc());
                sub.status = "active".to_string();
            }
            Some(TrialEnd::At(ts)) => {
                sub.trial_end = OffsetDateTime::from_unix_timestamp(ts).ok();
                sub.status = "trialing".to_string();
            }
            None => {}
        }
        Ok(sub.clone())
    }

    async fn find_invoice(&self, invoice_id: &str) -> BillingResult<Invoice> {
        let mut state = self.state.lock().unwrap();
        state.check_failure()?;
        state
            .invoices
            .get(invoice_id)
            .cloned()
            .ok_or_else(|| no_such("invoice", invoice_id))
    }

    async fn all_invoices(&self, customer_id: &str) -> BillingResult<List<Invoice>> {
        let mut state = self.state.lock().unwrap();
        state.check_failure()?;
        let mut invoices: Vec<Invoice> = state
            .invoices
            .values()
            .filter(|i| i.belongs_to(customer_id))
            .cloned()
            .collect();
        invoices.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(invoices.into())
    }

    async fn upcoming_invoice(&self, customer_id: &str) -> BillingResult<Invoice> {
        let mut state = self.state.lock().unwrap();
        state.check_failure()?;
        state
            .upcoming
            .get(customer_id)
            .cloned()
            .ok_or_else(|| BillingError::StripeApi("No upcoming invoices for customer".to_string()))
    }

    async fn create_charge(&self, params: CreateChargeParams) -> BillingResult<Charge> {
        let mut state = self.state.lock().unwrap();
        state.check_failure()?;
        let source = match params.source {
            Some(card_id) => Some(card_id),
            None => state.customer_mut(&params.customer)?.default_source.clone(),
        };
        if source.is_none() {
            return Err(BillingError::StripeApi(
                "Cannot charge a customer that has no active card".to_string(),
            ));
        }

        let charge = Charge {
            id: state.next_id("ch"),
            amount: params.amount,
            currency: params.currency,
            customer: Some(params.customer),
            description: params.description,
            paid: true,
            status: Some("succeeded".to_string()),
            other: Map::new(),
        };
        state.charges.push(charge.clone());
        Ok(charge)
    }
}

/// Host record double that counts saves
#[derive(Debug, Default)]
pub struct InMemoryAccount {
    pub id: AccountId,
    pub stripe_id: Option<String>,
    pub saves: usize,
    pub fail_save: bool,
}

impl InMemoryAccount {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stripe_id(stripe_id: &str) -> Self {
        Self {
            stripe_id: Some(stripe_id.to_string()),
            ..Self::default()
        }
    }
}

#[async_trait]
impl BillableAccount for InMemoryAccount {
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
        if self.fail_save {
            return Err(BillingError::Database("connection reset".to_string()));
        }
        self.saves += 1;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemorySubscriptionStore {
    records: Mutex<Vec<SubscriptionRecord>>,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<SubscriptionRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn insert(&self, record: NewSubscriptionRecord) -> BillingResult<SubscriptionRecord> {
        let record = record.into_record(SubscriptionRecordId::new(), OffsetDateTime::now_utc());
        self.records.lock().unwrap().push(record.clone());
        Ok(record)
    }

    async fn list_for_account(
        &self,
        account_id: AccountId,
    ) -> BillingResult<Vec<SubscriptionRecord>> {
        let mut records: Vec<SubscriptionRecord> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.account_id == account_id)
            .cloned()
            .collect();
        records.reverse();
        Ok(records)
    }
}

/// `tracing` writer that keeps formatted events in memory
#[derive(Clone, Default)]
pub struct CapturedLogs(std::sync::Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
