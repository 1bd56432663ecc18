//! Read-only collaborator lookups
//!
//! Every lookup is batched: callers hand over a set of natural keys and get back a
//! map keyed the same way. Missing rows are simply absent from the map. The
//! single-key helpers are thin wrappers over the batched calls, so an in-memory
//! implementation only has to provide the batched methods.

use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashMap;
use std::fmt;

use paylens_shared::{
    CreditTransaction, GatewayId, Invoice, Merchant, MerchantDiscountCode, MerchantGateway,
    MerchantId, Payment, Plan, PlanId, Refund, Subscription, SubscriptionPendingUpdate,
    UserAccount, UserId, CREDIT_ACCOUNT_TYPE_PROMO,
};

use crate::error::BillingResult;

/// Discount codes are only unique per merchant
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DiscountKey {
    pub merchant_id: MerchantId,
    pub code: String,
}

impl DiscountKey {
    pub fn new(merchant_id: MerchantId, code: impl Into<String>) -> Self {
        Self {
            merchant_id,
            code: code.into(),
        }
    }
}

/// Promo-credit transactions are keyed by the paying user and the invoice
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PromoCreditKey {
    pub user_id: UserId,
    pub invoice_id: String,
}

impl PromoCreditKey {
    pub fn new(user_id: UserId, invoice_id: impl Into<String>) -> Self {
        Self {
            user_id,
            invoice_id: invoice_id.into(),
        }
    }
}

impl fmt::Display for PromoCreditKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.user_id, self.invoice_id)
    }
}

#[async_trait]
pub trait CollaboratorStore: Send + Sync {
    async fn get_invoices_by_ids(&self, invoice_ids: &[String])
        -> BillingResult<HashMap<String, Invoice>>;

    async fn get_payments_by_ids(&self, payment_ids: &[String])
        -> BillingResult<HashMap<String, Payment>>;

    async fn get_refunds_by_ids(&self, refund_ids: &[String])
        -> BillingResult<HashMap<String, Refund>>;

    async fn get_gateways_by_ids(
        &self,
        gateway_ids: &[GatewayId],
    ) -> BillingResult<HashMap<GatewayId, MerchantGateway>>;

    async fn get_users_by_ids(&self, user_ids: &[UserId])
        -> BillingResult<HashMap<UserId, UserAccount>>;

    async fn get_subscriptions_by_ids(
        &self,
        subscription_ids: &[String],
    ) -> BillingResult<HashMap<String, Subscription>>;

    async fn get_merchants_by_ids(
        &self,
        merchant_ids: &[MerchantId],
    ) -> BillingResult<HashMap<MerchantId, Merchant>>;

    async fn get_discounts_by_codes(
        &self,
        keys: &[DiscountKey],
    ) -> BillingResult<HashMap<DiscountKey, MerchantDiscountCode>>;

    async fn get_promo_credit_transactions_by_keys(
        &self,
        keys: &[PromoCreditKey],
    ) -> BillingResult<HashMap<PromoCreditKey, CreditTransaction>>;

    /// Latest pending update per invoice
    async fn get_pending_updates_by_invoice_ids(
        &self,
        invoice_ids: &[String],
    ) -> BillingResult<HashMap<String, SubscriptionPendingUpdate>>;

    async fn get_plans_by_ids(&self, plan_ids: &[PlanId]) -> BillingResult<HashMap<PlanId, Plan>>;

    // Single-key lookups

    async fn get_invoice(&self, invoice_id: &str) -> BillingResult<Option<Invoice>> {
        if invoice_id.is_empty() {
            return Ok(None);
        }
        let mut found = self.get_invoices_by_ids(&[invoice_id.to_string()]).await?;
        Ok(found.remove(invoice_id))
    }

    async fn get_payment(&self, payment_id: &str) -> BillingResult<Option<Payment>> {
        if payment_id.is_empty() {
            return Ok(None);
        }
        let mut found = self.get_payments_by_ids(&[payment_id.to_string()]).await?;
        Ok(found.remove(payment_id))
    }

    async fn get_refund(&self, refund_id: &str) -> BillingResult<Option<Refund>> {
        if refund_id.is_empty() {
            return Ok(None);
        }
        let mut found = self.get_refunds_by_ids(&[refund_id.to_string()]).await?;
        Ok(found.remove(refund_id))
    }

    async fn get_gateway(&self, gateway_id: GatewayId) -> BillingResult<Option<MerchantGateway>> {
        if !gateway_id.is_set() {
            return Ok(None);
        }
        let mut found = self.get_gateways_by_ids(&[gateway_id]).await?;
        Ok(found.remove(&gateway_id))
    }

    async fn get_user(&self, user_id: UserId) -> BillingResult<Option<UserAccount>> {
        if !user_id.is_set() {
            return Ok(None);
        }
        let mut found = self.get_users_by_ids(&[user_id]).await?;
        Ok(found.remove(&user_id))
    }

    async fn get_subscription(&self, subscription_id: &str) -> BillingResult<Option<Subscription>> {
        if subscription_id.is_empty() {
            return Ok(None);
        }
        let mut found = self
            .get_subscriptions_by_ids(&[subscription_id.to_string()])
            .await?;
        Ok(found.remove(subscription_id))
    }

    async fn get_merchant(&self, merchant_id: MerchantId) -> BillingResult<Option<Merchant>> {
        if !merchant_id.is_set() {
            return Ok(None);
        }
        let mut found = self.get_merchants_by_ids(&[merchant_id]).await?;
        Ok(found.remove(&merchant_id))
    }

    async fn get_discount(&self, key: &DiscountKey) -> BillingResult<Option<MerchantDiscountCode>> {
        if key.code.is_empty() {
            return Ok(None);
        }
        let mut found = self.get_discounts_by_codes(std::slice::from_ref(key)).await?;
        Ok(found.remove(key))
    }

    async fn get_promo_credit_transaction(
        &self,
        key: &PromoCreditKey,
    ) -> BillingResult<Option<CreditTransaction>> {
        if !key.user_id.is_set() || key.invoice_id.is_empty() {
            return Ok(None);
        }
        let mut found = self
            .get_promo_credit_transactions_by_keys(std::slice::from_ref(key))
            .await?;
        Ok(found.remove(key))
    }

    async fn get_pending_update(
        &self,
        invoice_id: &str,
    ) -> BillingResult<Option<SubscriptionPendingUpdate>> {
        if invoice_id.is_empty() {
            return Ok(None);
        }
        let mut found = self
            .get_pending_updates_by_invoice_ids(&[invoice_id.to_string()])
            .await?;
        Ok(found.remove(invoice_id))
    }
}

/// Postgres-backed collaborator store
#[derive(Clone)]
pub struct PgCollaboratorStore {
    pool: PgPool,
}

impl PgCollaboratorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl CollaboratorStore for PgCollaboratorStore {
    async fn get_invoices_by_ids(
        &self,
        invoice_ids: &[String],
    ) -> BillingResult<HashMap<String, Invoice>> {
        if invoice_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows: Vec<Invoice> = sqlx::query_as(
            r#"
            SELECT *
            FROM invoice
            WHERE invoice_id = ANY($1)
            "#,
        )
        .bind(invoice_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| (row.invoice_id.clone(), row))
            .collect())
    }

    async fn get_payments_by_ids(
        &self,
        payment_ids: &[String],
    ) -> BillingResult<HashMap<String, Payment>> {
        if payment_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows: Vec<Payment> = sqlx::query_as(
            r#"
            SELECT *
            FROM payment
            WHERE payment_id = ANY($1)
            "#,
        )
        .bind(payment_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| (row.payment_id.clone(), row))
            .collect())
    }

    async fn get_refunds_by_ids(
        &self,
        refund_ids: &[String],
    ) -> BillingResult<HashMap<String, Refund>> {
        if refund_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows: Vec<Refund> = sqlx::query_as(
            r#"
            SELECT *
            FROM refund
            WHERE refund_id = ANY($1)
            "#,
        )
        .bind(refund_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| (row.refund_id.clone(), row))
            .collect())
    }

    async fn get_gateways_by_ids(
        &self,
        gateway_ids: &[GatewayId],
    ) -> BillingResult<HashMap<GatewayId, MerchantGateway>> {
        if gateway_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let ids: Vec<i64> = gateway_ids.iter().map(|id| id.0).collect();
        let rows: Vec<MerchantGateway> = sqlx::query_as(
            r#"
            SELECT *
            FROM merchant_gateway
            WHERE id = ANY($1)
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|row| (row.id, row)).collect())
    }

    async fn get_users_by_ids(
        &self,
        user_ids: &[UserId],
    ) -> BillingResult<HashMap<UserId, UserAccount>> {
        if user_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let ids: Vec<i64> = user_ids.iter().map(|id| id.0).collect();
        let rows: Vec<UserAccount> = sqlx::query_as(
            r#"
            SELECT *
            FROM user_account
            WHERE id = ANY($1)
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|row| (row.id, row)).collect())
    }

    async fn get_subscriptions_by_ids(
        &self,
        subscription_ids: &[String],
    ) -> BillingResult<HashMap<String, Subscription>> {
        if subscription_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows: Vec<Subscription> = sqlx::query_as(
            r#"
            SELECT *
            FROM subscription
            WHERE subscription_id = ANY($1)
            "#,
        )
        .bind(subscription_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| (row.subscription_id.clone(), row))
            .collect())
    }

    async fn get_merchants_by_ids(
        &self,
        merchant_ids: &[MerchantId],
    ) -> BillingResult<HashMap<MerchantId, Merchant>> {
        if merchant_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let ids: Vec<i64> = merchant_ids.iter().map(|id| id.0).collect();
        let rows: Vec<Merchant> = sqlx::query_as(
            r#"
            SELECT *
            FROM merchant
            WHERE id = ANY($1)
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|row| (row.id, row)).collect())
    }

    async fn get_discounts_by_codes(
        &self,
        keys: &[DiscountKey],
    ) -> BillingResult<HashMap<DiscountKey, MerchantDiscountCode>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let merchant_ids: Vec<i64> = keys.iter().map(|k| k.merchant_id.0).collect();
        let codes: Vec<String> = keys.iter().map(|k| k.code.clone()).collect();

        // (merchant_id, code) pairs in one round trip
        let rows: Vec<MerchantDiscountCode> = sqlx::query_as(
            r#"
            SELECT d.*
            FROM merchant_discount_code d
            JOIN UNNEST($1::bigint[], $2::text[]) AS k(merchant_id, code)
              ON d.merchant_id = k.merchant_id AND d.code = k.code
            "#,
        )
        .bind(merchant_ids)
        .bind(codes)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| (DiscountKey::new(row.merchant_id, row.code.clone()), row))
            .collect())
    }

    async fn get_promo_credit_transactions_by_keys(
        &self,
        keys: &[PromoCreditKey],
    ) -> BillingResult<HashMap<PromoCreditKey, CreditTransaction>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let user_ids: Vec<i64> = keys.iter().map(|k| k.user_id.0).collect();
        let invoice_ids: Vec<String> = keys.iter().map(|k| k.invoice_id.clone()).collect();

        let rows: Vec<CreditTransaction> = sqlx::query_as(
            r#"
            SELECT DISTINCT ON (t.user_id, t.invoice_id) t.*
            FROM credit_transaction t
            JOIN UNNEST($1::bigint[], $2::text[]) AS k(user_id, invoice_id)
              ON t.user_id = k.user_id AND t.invoice_id = k.invoice_id
            WHERE t.account_type = $3
            ORDER BY t.user_id, t.invoice_id, t.id DESC
            "#,
        )
        .bind(user_ids)
        .bind(invoice_ids)
        .bind(CREDIT_ACCOUNT_TYPE_PROMO)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| (PromoCreditKey::new(row.user_id, row.invoice_id.clone()), row))
            .collect())
    }

    async fn get_pending_updates_by_invoice_ids(
        &self,
        invoice_ids: &[String],
    ) -> BillingResult<HashMap<String, SubscriptionPendingUpdate>> {
        if invoice_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows: Vec<SubscriptionPendingUpdate> = sqlx::query_as(
            r#"
            SELECT DISTINCT ON (invoice_id) *
            FROM subscription_pending_update
            WHERE invoice_id = ANY($1)
            ORDER BY invoice_id, id DESC
            "#,
        )
        .bind(invoice_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| (row.invoice_id.clone(), row))
            .collect())
    }

    async fn get_plans_by_ids(&self, plan_ids: &[PlanId]) -> BillingResult<HashMap<PlanId, Plan>> {
        if plan_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let ids: Vec<i64> = plan_ids.iter().map(|id| id.0).collect();
        let rows: Vec<Plan> = sqlx::query_as(
            r#"
            SELECT *
            FROM plan
            WHERE id = ANY($1)
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|row| (row.id, row)).collect())
    }
}
