//! Integration tests for invoice detail assembly
//!
//! ## Test Coverage
//! - Single-item and bulk paths produce identical details
//! - Bulk requests issue one fetch per collaborator kind
//! - A failing collaborator kind only empties its own fields
//! - Cancellation and deadlines fail the whole call
//! - Plan snapshots through the full path (pending update, sign partition)
//!
//! ## Running Tests
//! ```bash
//! cargo test -p paylens-billing --test detail_assembly
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

mod common;

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use common::MemoryStore;
use paylens_billing::{BillingError, ChargeType, DetailConfig, InvoiceDetailService};
use paylens_shared::{
    CreditTransaction, GatewayId, Invoice, InvoiceStatus, Merchant, MerchantDiscountCode,
    MerchantGateway, MerchantId, Payment, Plan, PlanId, Refund, Subscription,
    SubscriptionPendingUpdate, UserAccount, UserId, CREDIT_ACCOUNT_TYPE_PROMO,
};

// ============================================================================
// Test Utilities
// ============================================================================

fn plan(id: i64, plan_type: i32, name: &str) -> Plan {
    Plan {
        id: PlanId(id),
        merchant_id: MerchantId(1),
        plan_name: name.to_string(),
        plan_type,
        currency: "USD".to_string(),
        ..Default::default()
    }
}

fn line(amount_excluding_tax: i64, quantity: i64, plan: &Plan) -> serde_json::Value {
    json!({
        "currency": "USD",
        "amount": amount_excluding_tax,
        "amountExcludingTax": amount_excluding_tax,
        "quantity": quantity,
        "name": plan.plan_name,
        "plan": plan,
    })
}

fn base_invoice(invoice_id: &str, invoice_name: &str) -> Invoice {
    Invoice {
        id: invoice_id.len() as i64,
        invoice_id: invoice_id.to_string(),
        invoice_name: invoice_name.to_string(),
        merchant_id: MerchantId(1),
        user_id: UserId(7),
        gateway_id: GatewayId(3),
        subscription_id: "sub_1".to_string(),
        currency: "USD".to_string(),
        tax_percentage: 1000,
        status: InvoiceStatus::Paid.code(),
        create_time: 1_700_000_000,
        ..Default::default()
    }
}

const ALL_INVOICES: [&str; 6] = [
    "iv_create",
    "iv_upgrade",
    "iv_downgrade",
    "iv_refund",
    "iv_failed_refund",
    "iv_broken",
];

fn seeded_store() -> Arc<MemoryStore> {
    let store = MemoryStore::new();
    let basic = plan(1, 1, "Basic");
    let pro = plan(2, 1, "Pro");
    let seats = plan(10, 2, "Seats");
    for p in [&basic, &pro, &seats] {
        store.insert_plan(p.clone());
    }

    store.insert_merchant(Merchant {
        id: MerchantId(1),
        name: "Acme".to_string(),
        ..Default::default()
    });
    store.insert_gateway(MerchantGateway {
        id: GatewayId(3),
        gateway_name: "stripe".to_string(),
        gateway_secret: "sk_live_secret".to_string(),
        ..Default::default()
    });
    for (id, email) in [(7, "seven@example.com"), (8, "eight@example.com")] {
        store.insert_user(UserAccount {
            id: UserId(id),
            email: email.to_string(),
            ..Default::default()
        });
    }
    store.insert_subscription(Subscription {
        subscription_id: "sub_1".to_string(),
        plan_id: PlanId(2),
        ..Default::default()
    });
    store.insert_discount(MerchantDiscountCode {
        merchant_id: MerchantId(1),
        code: "SPRING".to_string(),
        discount_percentage: 1000,
        ..Default::default()
    });

    // New subscription with an addon, discounted
    let mut create = base_invoice("iv_create", "SubscriptionCreate");
    create.payment_id = "pay_create".to_string();
    create.discount_code = "SPRING".to_string();
    create.total_amount = 1800;
    create.discount_amount = 200;
    create.lines = Some(json!([line(1000, 1, &basic), line(1000, 2, &seats)]).to_string());
    create.meta_data = Some(r#"{"campaign":"spring"}"#.to_string());
    store.insert_payment(Payment {
        payment_id: "pay_create".to_string(),
        invoice_id: "iv_create".to_string(),
        paid_time: 1_700_000_100,
        ..Default::default()
    });
    store.insert_invoice(create);

    // Upgrade backed by a pending update; its lines disagree on purpose
    let mut upgrade = base_invoice("iv_upgrade", "SubscriptionUpdate");
    upgrade.create_from = "AutoRenew".to_string();
    upgrade.lines = Some(json!([line(-300, 1, &seats)]).to_string());
    store.insert_pending_update(SubscriptionPendingUpdate {
        pending_update_id: "pu_1".to_string(),
        invoice_id: "iv_upgrade".to_string(),
        plan_id: PlanId(1),
        update_plan_id: PlanId(2),
        addon_data: "[]".to_string(),
        update_addon_data: r#"[{"quantity":5,"addonPlanId":10}]"#.to_string(),
        ..Default::default()
    });
    store.insert_invoice(upgrade);

    // Downgrade flagged through metadata, reconstructed from line signs
    let mut downgrade = base_invoice("iv_downgrade", "SubscriptionUpdate");
    downgrade.meta_data = Some(r#"{"IsUpgrade":"false"}"#.to_string());
    downgrade.lines = Some(json!([line(-500, 1, &pro), line(1200, 1, &basic)]).to_string());
    store.insert_invoice(downgrade);

    // Refund of the create invoice, with promo credit
    let mut refund = base_invoice("iv_refund", "Refund");
    refund.status = InvoiceStatus::Reversed.code();
    refund.payment_id = "pay_create".to_string();
    refund.refund_id = "ref_1".to_string();
    refund.total_amount = -1800;
    refund.promo_credit_discount_amount = 100;
    store.insert_refund(Refund {
        refund_id: "ref_1".to_string(),
        payment_id: "pay_create".to_string(),
        refund_comment: "Requested by customer".to_string(),
        refund_comment_explain: "Within grace period".to_string(),
        refund_time: 1_700_000_900,
        ..Default::default()
    });
    store.insert_promo_credit(CreditTransaction {
        user_id: UserId(7),
        invoice_id: "iv_refund".to_string(),
        account_type: CREDIT_ACCOUNT_TYPE_PROMO,
        delta_amount: -100,
        ..Default::default()
    });
    store.insert_invoice(refund);

    // Failed refund for another user, snapshot in the data blob
    let mut failed = base_invoice("iv_failed_refund", "Refund");
    failed.user_id = UserId(8);
    failed.status = InvoiceStatus::Failed.code();
    failed.refund_id = "ref_2".to_string();
    failed.data = Some(r#"{"id":8,"email":"snapshot@example.com"}"#.to_string());
    store.insert_refund(Refund {
        refund_id: "ref_2".to_string(),
        refund_comment: "Card expired".to_string(),
        refund_comment_explain: "Gateway declined".to_string(),
        ..Default::default()
    });
    store.insert_invoice(failed);

    // Every blob malformed
    let mut broken = base_invoice("iv_broken", "SubscriptionCycle");
    broken.lines = Some("garbage".to_string());
    broken.meta_data = Some("{{".to_string());
    broken.data = Some("[".to_string());
    broken.metric_charge = Some("}".to_string());
    store.insert_invoice(broken);

    Arc::new(store)
}

fn service(store: Arc<MemoryStore>) -> InvoiceDetailService<MemoryStore> {
    InvoiceDetailService::new(store, DetailConfig::default())
}

fn ids(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

// ============================================================================
// Path equivalence
// ============================================================================

#[tokio::test]
async fn test_bulk_matches_single_for_every_invoice() {
    let store = seeded_store();
    let svc = service(store.clone());
    let cancel = CancellationToken::new();

    let bulk = svc
        .assemble_bulk(&ids(&ALL_INVOICES), &cancel)
        .await
        .unwrap();
    assert_eq!(bulk.len(), ALL_INVOICES.len());

    for (invoice_id, from_bulk) in ALL_INVOICES.iter().zip(&bulk) {
        let single = svc.assemble_one(invoice_id, &cancel).await.unwrap();
        assert_eq!(&single, from_bulk, "detail mismatch for {invoice_id}");
    }
}

#[tokio::test]
async fn test_credit_note_bulk_matches_single() {
    let store = seeded_store();
    let svc = service(store.clone());
    let cancel = CancellationToken::new();

    let bulk = svc
        .credit_note_bulk(&ids(&ALL_INVOICES), &cancel)
        .await
        .unwrap();

    for (invoice_id, from_bulk) in ALL_INVOICES.iter().zip(&bulk) {
        let single = svc.credit_note_one(invoice_id, &cancel).await.unwrap();
        assert_eq!(&single, from_bulk, "credit note mismatch for {invoice_id}");
    }
}

// ============================================================================
// Batched fetch cardinality
// ============================================================================

#[tokio::test]
async fn test_bulk_issues_one_fetch_per_kind() {
    let store = seeded_store();
    let svc = service(store.clone());

    let mut request = ids(&ALL_INVOICES);
    // duplicates do not add fetches
    request.extend(ids(&ALL_INVOICES));

    svc.assemble_bulk(&request, &CancellationToken::new())
        .await
        .unwrap();

    for kind in [
        "payment",
        "refund",
        "gateway",
        "user",
        "subscription",
        "merchant",
        "discount",
        "promo_credit",
        "pending_update",
        "plan",
    ] {
        assert_eq!(store.calls(kind), 1, "{kind} fetched more than once");
    }
    // primary rows plus the invoices refunded payments point back to
    assert_eq!(store.calls("invoice"), 2);
}

#[tokio::test]
async fn test_assemble_invoices_skips_primary_fetch() {
    let store = seeded_store();
    let invoices: Vec<Invoice> = {
        let map = store.invoices.lock().unwrap();
        ["iv_create", "iv_upgrade"]
            .iter()
            .map(|id| map[*id].clone())
            .collect()
    };
    let svc = service(store.clone());

    let details = svc
        .assemble_invoices(&invoices, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(details.len(), 2);
    // no refunds in this batch, so no original-invoice round either
    assert_eq!(store.calls("invoice"), 0);
    assert_eq!(store.calls("gateway"), 1);
}

#[tokio::test]
async fn test_empty_bulk_makes_no_fetches() {
    let store = seeded_store();
    let svc = service(store.clone());

    let details = svc
        .assemble_invoices(&[], &CancellationToken::new())
        .await
        .unwrap();
    assert!(details.is_empty());
    assert_eq!(store.total_calls(), 0);
}

#[tokio::test]
async fn test_credit_note_scope_skips_merchants() {
    let store = seeded_store();
    let svc = service(store.clone());

    svc.credit_note_bulk(&ids(&ALL_INVOICES), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(store.calls("merchant"), 0);
    assert_eq!(store.calls("user"), 1);
}

// ============================================================================
// Failure isolation
// ============================================================================

#[tokio::test]
async fn test_failed_kind_only_empties_its_fields() {
    let store = seeded_store();
    store.fail("gateway");
    store.fail("plan");
    let svc = service(store.clone());

    let details = svc
        .assemble_bulk(&ids(&["iv_create", "iv_upgrade"]), &CancellationToken::new())
        .await
        .unwrap();

    let create = &details[0];
    assert!(create.gateway.is_none());
    assert!(create.merchant.is_some());
    assert!(create.user_account.is_some());
    assert!(create.discount.is_some());

    // pending update still found, but its plans could not be resolved
    let upgrade = &details[1];
    let pending = upgrade.subscription_pending_update.as_ref().unwrap();
    assert!(pending.update_plan.is_none());
    assert!(upgrade.plan_snapshot.plan.is_none());
    assert!(upgrade.plan_snapshot.addons.is_empty());
}

#[tokio::test]
async fn test_single_path_degrades_the_same_way() {
    let store = seeded_store();
    store.fail("refund");
    let svc = service(store.clone());

    let detail = svc
        .assemble_one("iv_refund", &CancellationToken::new())
        .await
        .unwrap();
    assert!(detail.refund.is_none());
    assert!(detail.original_payment_invoice.is_none());
    assert_eq!(detail.message, "");
    assert!(detail.payment.is_some());
}

#[tokio::test]
async fn test_primary_fetch_failure_fails_the_call() {
    let store = seeded_store();
    store.fail("invoice");
    let svc = service(store);

    let err = svc
        .assemble_bulk(&ids(&ALL_INVOICES), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::Database(_)));
}

// ============================================================================
// Cancellation and deadlines
// ============================================================================

#[tokio::test]
async fn test_cancellation_fails_whole_call() {
    let store = seeded_store();
    store.set_delay(Duration::from_millis(500));
    let svc = service(store);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let err = svc
        .assemble_bulk(&ids(&ALL_INVOICES), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::Cancelled));
}

#[tokio::test]
async fn test_deadline_fails_whole_call() {
    let store = seeded_store();
    store.set_delay(Duration::from_millis(500));
    let svc = InvoiceDetailService::new(
        store,
        DetailConfig {
            assembly_timeout: Duration::from_millis(30),
            ..Default::default()
        },
    );

    let err = svc
        .assemble_one("iv_create", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::DeadlineExceeded(30)));
}

// ============================================================================
// Field resolution through the full path
// ============================================================================

#[tokio::test]
async fn test_ordering_and_missing_ids() {
    let svc = service(seeded_store());
    let details = svc
        .assemble_bulk(
            &ids(&["iv_refund", "nope", "iv_create", "iv_refund"]),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    let order: Vec<&str> = details.iter().map(|d| d.invoice_id.as_str()).collect();
    assert_eq!(order, vec!["iv_refund", "iv_create", "iv_refund"]);
}

#[tokio::test]
async fn test_create_invoice_detail() {
    let svc = service(seeded_store());
    let detail = svc
        .assemble_one("iv_create", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(detail.origin_amount, 2000);
    assert_eq!(detail.paid_time, 1_700_000_100);
    assert_eq!(detail.discount.as_ref().unwrap().code, "SPRING");
    assert_eq!(detail.merchant.as_ref().unwrap().name, "Acme");
    assert_eq!(detail.metadata.get("campaign"), Some(&json!("spring")));
    assert_eq!(detail.lines.len(), 2);
    assert!(detail.lines.iter().all(|l| l.tax_percentage == 1000));

    let snapshot = &detail.plan_snapshot;
    assert_eq!(snapshot.charge_type, ChargeType::SubscriptionCreate);
    assert_eq!(snapshot.plan.as_ref().unwrap().plan_name, "Basic");
    assert_eq!(snapshot.addons.len(), 1);
    assert_eq!(snapshot.addons[0].quantity, 2);
    assert!(detail.subscription_pending_update.is_none());
}

#[tokio::test]
async fn test_upgrade_uses_pending_update() {
    let svc = service(seeded_store());
    let detail = svc
        .assemble_one("iv_upgrade", &CancellationToken::new())
        .await
        .unwrap();

    let snapshot = &detail.plan_snapshot;
    assert_eq!(snapshot.charge_type, ChargeType::SubscriptionUpgrade);
    assert!(snapshot.auto_charge);
    assert!(!detail.auto_charge);
    assert_eq!(snapshot.plan.as_ref().unwrap().plan_name, "Pro");
    assert_eq!(snapshot.previous_plan.as_ref().unwrap().plan_name, "Basic");
    assert_eq!(snapshot.addons.len(), 1);
    assert_eq!(snapshot.addons[0].quantity, 5);
    assert!(snapshot.previous_addons.is_empty());
    assert_eq!(
        detail
            .subscription_pending_update
            .as_ref()
            .unwrap()
            .record
            .pending_update_id,
        "pu_1"
    );
}

#[tokio::test]
async fn test_downgrade_from_line_signs() {
    let svc = service(seeded_store());
    let detail = svc
        .assemble_one("iv_downgrade", &CancellationToken::new())
        .await
        .unwrap();

    let snapshot = &detail.plan_snapshot;
    assert_eq!(snapshot.charge_type, ChargeType::SubscriptionDowngrade);
    assert_eq!(snapshot.previous_plan.as_ref().unwrap().plan_name, "Pro");
    assert_eq!(snapshot.plan.as_ref().unwrap().plan_name, "Basic");
    assert!(detail.subscription_pending_update.is_none());
}

#[tokio::test]
async fn test_refund_invoice_detail() {
    let svc = service(seeded_store());
    let detail = svc
        .assemble_one("iv_refund", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(detail.message, "Requested by customer");
    assert_eq!(detail.paid_time, 1_700_000_900);
    assert_eq!(detail.origin_amount, -1700);
    assert_eq!(
        detail.original_payment_invoice.as_ref().unwrap().invoice_id,
        "iv_create"
    );
    assert_eq!(
        detail.promo_credit_transaction.as_ref().unwrap().delta_amount,
        -100
    );
}

#[tokio::test]
async fn test_failed_refund_credit_note() {
    let svc = service(seeded_store());
    let note = svc
        .credit_note_one("iv_failed_refund", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(note.message, "Card expired, Gateway declined");
    assert_eq!(note.paid_time, 0);
    assert_eq!(
        note.user_snapshot.as_ref().unwrap().email,
        "snapshot@example.com"
    );
    assert!(note.original_payment_invoice.is_none());
}

#[tokio::test]
async fn test_credit_note_falls_back_to_live_user() {
    let svc = service(seeded_store());
    let note = svc
        .credit_note_one("iv_refund", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(
        note.user_snapshot.as_ref().unwrap().email,
        "seven@example.com"
    );
}

#[tokio::test]
async fn test_malformed_blobs_do_not_fail_assembly() {
    let svc = service(seeded_store());
    let detail = svc
        .assemble_one("iv_broken", &CancellationToken::new())
        .await
        .unwrap();

    assert!(detail.lines.is_empty());
    assert!(detail.metadata.is_empty());
    assert!(detail.user_snapshot.is_none());
    assert!(detail.user_metric_charge_for_invoice.is_none());
    assert_eq!(detail.plan_snapshot.charge_type, ChargeType::SubscriptionCycle);
    assert!(detail.plan_snapshot.plan.is_none());
    assert!(detail.gateway.is_some());
}

#[tokio::test]
async fn test_null_line_fields_keep_the_snapshot() {
    let store = seeded_store();
    let mut invoice = base_invoice("iv_nulls", "SubscriptionCreate");
    invoice.lines = Some(
        r#"[{"amountExcludingTax":100,"quantity":1,"discountAmount":null,
             "plan":{"id":1,"type":1,"planName":"Basic","description":null}}]"#
            .to_string(),
    );
    store.insert_invoice(invoice);
    let svc = service(store);

    let detail = svc
        .assemble_one("iv_nulls", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(detail.lines.len(), 1);
    assert_eq!(detail.lines[0].discount_amount, 0);
    assert_eq!(
        detail.plan_snapshot.plan.as_ref().map(|p| p.plan_name.as_str()),
        Some("Basic")
    );
}

#[tokio::test]
async fn test_detail_json_hides_gateway_secret() {
    let svc = service(seeded_store());
    let detail = svc
        .assemble_one("iv_create", &CancellationToken::new())
        .await
        .unwrap();

    let json = serde_json::to_string(&detail).unwrap();
    assert!(json.contains("\"gatewayName\":\"stripe\""));
    assert!(!json.contains("sk_live_secret"));
}
