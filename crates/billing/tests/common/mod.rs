//! In-memory collaborator store for integration tests
//!
//! Records how many batched calls each kind received, can be told to fail a
//! kind, and can delay every call to exercise deadlines and cancellation.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use paylens_billing::{BillingError, BillingResult, CollaboratorStore, DiscountKey, PromoCreditKey};
use paylens_shared::{
    CreditTransaction, GatewayId, Invoice, Merchant, MerchantDiscountCode, MerchantGateway,
    MerchantId, Payment, Plan, PlanId, Refund, Subscription, SubscriptionPendingUpdate,
    UserAccount, UserId,
};

#[derive(Default)]
pub struct MemoryStore {
    pub invoices: Mutex<HashMap<String, Invoice>>,
    pub payments: Mutex<HashMap<String, Payment>>,
    pub refunds: Mutex<HashMap<String, Refund>>,
    pub gateways: Mutex<HashMap<GatewayId, MerchantGateway>>,
    pub users: Mutex<HashMap<UserId, UserAccount>>,
    pub subscriptions: Mutex<HashMap<String, Subscription>>,
    pub merchants: Mutex<HashMap<MerchantId, Merchant>>,
    pub discounts: Mutex<HashMap<DiscountKey, MerchantDiscountCode>>,
    pub promo_credits: Mutex<HashMap<PromoCreditKey, CreditTransaction>>,
    pub pending_updates: Mutex<HashMap<String, SubscriptionPendingUpdate>>,
    pub plans: Mutex<HashMap<PlanId, Plan>>,

    calls: Mutex<HashMap<&'static str, usize>>,
    failing: Mutex<HashSet<&'static str>>,
    delay: Mutex<Option<Duration>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of batched calls made for a kind
    pub fn calls(&self, kind: &str) -> usize {
        self.calls.lock().unwrap().get(kind).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn fail(&self, kind: &'static str) {
        self.failing.lock().unwrap().insert(kind);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    async fn enter(&self, kind: &'static str) -> BillingResult<()> {
        *self.calls.lock().unwrap().entry(kind).or_insert(0) += 1;
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().unwrap().contains(kind) {
            return Err(BillingError::Database(format!("{kind} lookup unavailable")));
        }
        Ok(())
    }

    pub fn insert_invoice(&self, invoice: Invoice) {
        self.invoices
            .lock()
            .unwrap()
            .insert(invoice.invoice_id.clone(), invoice);
    }

    pub fn insert_payment(&self, payment: Payment) {
        self.payments
            .lock()
            .unwrap()
            .insert(payment.payment_id.clone(), payment);
    }

    pub fn insert_refund(&self, refund: Refund) {
        self.refunds
            .lock()
            .unwrap()
            .insert(refund.refund_id.clone(), refund);
    }

    pub fn insert_gateway(&self, gateway: MerchantGateway) {
        self.gateways.lock().unwrap().insert(gateway.id, gateway);
    }

    pub fn insert_user(&self, user: UserAccount) {
        self.users.lock().unwrap().insert(user.id, user);
    }

    pub fn insert_subscription(&self, subscription: Subscription) {
        self.subscriptions
            .lock()
            .unwrap()
            .insert(subscription.subscription_id.clone(), subscription);
    }

    pub fn insert_merchant(&self, merchant: Merchant) {
        self.merchants.lock().unwrap().insert(merchant.id, merchant);
    }

    pub fn insert_discount(&self, discount: MerchantDiscountCode) {
        self.discounts.lock().unwrap().insert(
            DiscountKey::new(discount.merchant_id, discount.code.clone()),
            discount,
        );
    }

    pub fn insert_promo_credit(&self, transaction: CreditTransaction) {
        self.promo_credits.lock().unwrap().insert(
            PromoCreditKey::new(transaction.user_id, transaction.invoice_id.clone()),
            transaction,
        );
    }

    pub fn insert_pending_update(&self, pending: SubscriptionPendingUpdate) {
        self.pending_updates
            .lock()
            .unwrap()
            .insert(pending.invoice_id.clone(), pending);
    }

    pub fn insert_plan(&self, plan: Plan) {
        self.plans.lock().unwrap().insert(plan.id, plan);
    }
}

fn pick<K, V>(map: &Mutex<HashMap<K, V>>, keys: &[K]) -> HashMap<K, V>
where
    K: std::hash::Hash + Eq + Clone,
    V: Clone,
{
    let map = map.lock().unwrap();
    keys.iter()
        .filter_map(|k| map.get(k).map(|v| (k.clone(), v.clone())))
        .collect()
}

#[async_trait]
impl CollaboratorStore for MemoryStore {
    async fn get_invoices_by_ids(&self, ids: &[String]) -> BillingResult<HashMap<String, Invoice>> {
        self.enter("invoice").await?;
        Ok(pick(&self.invoices, ids))
    }

    async fn get_payments_by_ids(&self, ids: &[String]) -> BillingResult<HashMap<String, Payment>> {
        self.enter("payment").await?;
        Ok(pick(&self.payments, ids))
    }

    async fn get_refunds_by_ids(&self, ids: &[String]) -> BillingResult<HashMap<String, Refund>> {
        self.enter("refund").await?;
        Ok(pick(&self.refunds, ids))
    }

    async fn get_gateways_by_ids(
        &self,
        ids: &[GatewayId],
    ) -> BillingResult<HashMap<GatewayId, MerchantGateway>> {
        self.enter("gateway").await?;
        Ok(pick(&self.gateways, ids))
    }

    async fn get_users_by_ids(&self, ids: &[UserId]) -> BillingResult<HashMap<UserId, UserAccount>> {
        self.enter("user").await?;
        Ok(pick(&self.users, ids))
    }

    async fn get_subscriptions_by_ids(
        &self,
        ids: &[String],
    ) -> BillingResult<HashMap<String, Subscription>> {
        self.enter("subscription").await?;
        Ok(pick(&self.subscriptions, ids))
    }

    async fn get_merchants_by_ids(
        &self,
        ids: &[MerchantId],
    ) -> BillingResult<HashMap<MerchantId, Merchant>> {
        self.enter("merchant").await?;
        Ok(pick(&self.merchants, ids))
    }

    async fn get_discounts_by_codes(
        &self,
        keys: &[DiscountKey],
    ) -> BillingResult<HashMap<DiscountKey, MerchantDiscountCode>> {
        self.enter("discount").await?;
        Ok(pick(&self.discounts, keys))
    }

    async fn get_promo_credit_transactions_by_keys(
        &self,
        keys: &[PromoCreditKey],
    ) -> BillingResult<HashMap<PromoCreditKey, CreditTransaction>> {
        self.enter("promo_credit").await?;
        Ok(pick(&self.promo_credits, keys))
    }

    async fn get_pending_updates_by_invoice_ids(
        &self,
        ids: &[String],
    ) -> BillingResult<HashMap<String, SubscriptionPendingUpdate>> {
        self.enter("pending_update").await?;
        Ok(pick(&self.pending_updates, ids))
    }

    async fn get_plans_by_ids(&self, ids: &[PlanId]) -> BillingResult<HashMap<PlanId, Plan>> {
        self.enter("plan").await?;
        Ok(pick(&self.plans, ids))
    }
}
