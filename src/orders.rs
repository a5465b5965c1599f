//! Order model, checkout, cancellation, and payment confirmation.
//!
//! Orders live in the remote `orders` collection; the client only ever
//! issues point reads and merge writes against them. Every mutation here
//! is split into a pure planner that produces the `orderDetails` merge
//! fields and a thin async wrapper that applies them through the
//! `StoreClient`, so the rules stay unit-testable without a network.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::api::StoreClient;
use crate::cart::CartItem;
use crate::db::DbState;
use crate::errors::ClientError;
use crate::notifications::{self, NotificationInput};
use crate::status::{self, CanonicalStatus};

/// Customer-selectable cancellation reasons. `other` requires a
/// free-text note.
pub const CANCELLATION_REASONS: &[&str] = &[
    "change_of_mind",
    "found_alternative",
    "schedule_issues",
    "duplicate_order",
    "payment_issues",
    "other",
];

/// Reason recorded when a denied appeal auto-cancels the order.
pub const REASON_PAYMENT_REJECTED: &str = "payment_rejected";

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// One line of an order: a sized product with optional varieties.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrderItem {
    pub product_price: f64,
    pub product_quantity: u32,
    /// Either a plain string or an object with a `name` field; older app
    /// versions wrote both shapes.
    pub product_size: Value,
    pub product_varieties: Vec<String>,
}

impl OrderItem {
    /// Resolve the size display name regardless of which shape was stored.
    pub fn size_name(&self) -> String {
        match &self.product_size {
            Value::String(s) => s.clone(),
            Value::Object(obj) => obj
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
            _ => String::new(),
        }
    }
}

/// Mutable order sub-object holding status, payment, and schedule fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrderDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pickup_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pickup_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pickup_option: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_status: Option<String>,
    /// Canonical status field.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_status: Option<String>,
    /// Legacy status field, still written by cancellation and older
    /// back-office tools.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub total_amount: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gcash_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gcash_screenshot_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancellation_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancellation_note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_appealed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub appeal_timestamp: Option<String>,
    /// Append-only: a status label is never un-stamped once reached.
    pub status_timestamps: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl OrderDetails {
    pub fn is_gcash(&self) -> bool {
        self.payment_method.as_deref() == Some("gcash")
    }

    pub fn pickup_later(&self) -> bool {
        self.pickup_option.as_deref() == Some("later")
    }

    /// The normalized status, preferring the canonical field over the
    /// legacy one.
    pub fn canonical_status(&self) -> Option<CanonicalStatus> {
        self.order_status
            .as_deref()
            .and_then(status::normalize_status)
            .or_else(|| self.status.as_deref().and_then(status::normalize_status))
    }

    /// Cancelled if either status field says so.
    pub fn is_cancelled(&self) -> bool {
        let cancelled = |s: &str| status::normalize_status(s) == Some(CanonicalStatus::Cancelled);
        self.order_status.as_deref().is_some_and(cancelled)
            || self.status.as_deref().is_some_and(cancelled)
    }

    /// The raw current status string used for transition diffing
    /// (canonical field first, legacy fallback).
    pub fn raw_status(&self) -> &str {
        self.order_status
            .as_deref()
            .or(self.status.as_deref())
            .unwrap_or("")
    }
}

/// A full order document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Order {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    pub items: Vec<OrderItem>,
    pub order_details: OrderDetails,
}

/// Human-readable order number: the first six characters of the id,
/// uppercased.
pub fn order_number(id: &str) -> String {
    id.chars().take(6).collect::<String>().to_uppercase()
}

/// Merge a new status stamp into the timestamps map without overwriting
/// an existing one (append-only per distinct label).
fn stamped(timestamps: &BTreeMap<String, String>, label: &str, now: &str) -> Value {
    let mut merged = timestamps.clone();
    merged
        .entry(label.to_string())
        .or_insert_with(|| now.to_string());
    json!(merged)
}

// ---------------------------------------------------------------------------
// Checkout
// ---------------------------------------------------------------------------

/// Schedule and payment choices collected at checkout.
#[derive(Debug, Clone, Default)]
pub struct CheckoutInput {
    pub pickup_option: String,
    pub pickup_date: Option<String>,
    pub pickup_time: Option<String>,
    pub payment_method: String,
}

/// Build the order document for checkout. Pure; fails only on local
/// validation.
pub fn build_order(
    user_id: &str,
    items: &[CartItem],
    input: &CheckoutInput,
    now: &str,
) -> Result<Value, ClientError> {
    if items.is_empty() {
        return Err(ClientError::Validation("Your cart is empty".into()));
    }
    if !matches!(input.payment_method.as_str(), "cash" | "gcash") {
        return Err(ClientError::Validation(format!(
            "Unsupported payment method: {}",
            input.payment_method
        )));
    }
    match input.pickup_option.as_str() {
        "now" => {}
        "later" => {
            if input.pickup_date.as_deref().unwrap_or("").is_empty()
                || input.pickup_time.as_deref().unwrap_or("").is_empty()
            {
                return Err(ClientError::Validation(
                    "Scheduled pickup needs a date and time".into(),
                ));
            }
        }
        other => {
            return Err(ClientError::Validation(format!(
                "Unsupported pickup option: {other}"
            )));
        }
    }

    let total: f64 = items.iter().map(|i| i.product_price).sum();
    let order_items: Vec<Value> = items
        .iter()
        .map(|i| {
            json!({
                "productPrice": i.product_price,
                "productQuantity": i.product_quantity,
                "productSize": i.product_size,
                "productVarieties": i.product_varieties,
            })
        })
        .collect();

    // GCash orders wait for payment verification; cash orders are
    // confirmed immediately.
    let (order_status, timestamps) = if input.payment_method == "gcash" {
        (
            status::STATUS_AWAITING_PAYMENT_VERIFICATION,
            json!({}),
        )
    } else {
        (
            status::STATUS_ORDER_CONFIRMED,
            json!({ status::STATUS_ORDER_CONFIRMED: now }),
        )
    };

    Ok(json!({
        "id": Uuid::new_v4().to_string(),
        "userId": user_id,
        "createdAt": now,
        "items": order_items,
        "orderDetails": {
            "pickupOption": input.pickup_option,
            "pickupDate": input.pickup_date,
            "pickupTime": input.pickup_time,
            "paymentMethod": input.payment_method,
            "paymentStatus": "pending",
            "orderStatus": order_status,
            "totalAmount": total,
            "statusTimestamps": timestamps,
            "updatedAt": now,
        },
    }))
}

/// Place an order: create the document, clear the cart, and log a local
/// notification. The cart clear and notification are best-effort; the
/// order itself is the primary operation.
pub async fn place_order(
    client: &StoreClient,
    db: &DbState,
    user_id: &str,
    items: &[CartItem],
    input: &CheckoutInput,
) -> Result<String, ClientError> {
    let now = Utc::now().to_rfc3339();
    let doc = build_order(user_id, items, input, &now)?;
    let order_id = doc["id"].as_str().unwrap_or_default().to_string();

    client
        .create_document(&format!("orders/{order_id}"), &doc)
        .await?;
    info!(order_id = %order_id, total = doc["orderDetails"]["totalAmount"].as_f64().unwrap_or(0.0), "Order placed");

    if let Err(e) = crate::cart::clear_cart(client, user_id).await {
        tracing::warn!(order_id = %order_id, error = %e, "cart clear after checkout failed");
    }
    if let Err(e) = notifications::add(
        db,
        user_id,
        NotificationInput {
            title: "Order Placed".into(),
            message: format!("Order #{} has been placed.", order_number(&order_id)),
            kind: "success".into(),
            order_id: Some(order_id.clone()),
        },
    ) {
        tracing::warn!(order_id = %order_id, error = %e, "order-placed notification failed");
    }

    Ok(order_id)
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Validate a customer cancellation and produce the `orderDetails` merge
/// fields. Pure; no store write happens on rejection.
///
/// Orders already being prepared, ready, or completed can no longer be
/// cancelled. Re-cancelling an already-cancelled order is rejected here,
/// which also absorbs a double-tap racing the first write.
pub fn validate_cancellation(
    details: &OrderDetails,
    reason: &str,
    note: Option<&str>,
    now: &str,
) -> Result<Value, ClientError> {
    if !CANCELLATION_REASONS.contains(&reason) {
        return Err(ClientError::Validation(format!(
            "Unknown cancellation reason: {reason}"
        )));
    }
    if reason == "other" && note.map(str::trim).unwrap_or("").is_empty() {
        return Err(ClientError::Validation(
            "Please tell us why you are cancelling".into(),
        ));
    }
    if details.is_cancelled() {
        return Err(ClientError::Validation(
            "This order is already cancelled".into(),
        ));
    }
    match details.canonical_status() {
        Some(
            CanonicalStatus::PreparingOrder
            | CanonicalStatus::ReadyForPickup
            | CanonicalStatus::Completed,
        ) => {
            return Err(ClientError::Validation(
                "This order is already being prepared and can no longer be cancelled".into(),
            ));
        }
        _ => {}
    }

    let mut fields = json!({
        "status": status::STATUS_CANCELLED,
        "cancellationReason": reason,
        "statusTimestamps": stamped(&details.status_timestamps, status::STATUS_CANCELLED, now),
        "updatedAt": now,
    });
    if let Some(note) = note.map(str::trim).filter(|n| !n.is_empty()) {
        fields["cancellationNote"] = json!(note);
    }
    Ok(fields)
}

/// Cancel an order. The snapshot's `updatedAt` is echoed as an
/// optimistic-concurrency precondition so a stale-read cancel cannot
/// silently overwrite a concurrent staff transition.
pub async fn cancel_order(
    client: &StoreClient,
    db: &DbState,
    user_id: &str,
    order: &Order,
    reason: &str,
    note: Option<&str>,
) -> Result<(), ClientError> {
    let now = Utc::now().to_rfc3339();
    let fields = validate_cancellation(&order.order_details, reason, note, &now)?;

    client
        .patch_document_if(
            &format!("orders/{}", order.id),
            &json!({ "orderDetails": fields }),
            order.order_details.updated_at.as_deref(),
        )
        .await?;
    info!(order_id = %order.id, reason = reason, "Order cancelled by customer");

    record_cancellation_notice(db, user_id, &order.id);
    Ok(())
}

/// Append the "Order Cancelled" notification. The cancellation itself
/// already succeeded at this point, so a failed append is logged only.
fn record_cancellation_notice(db: &DbState, user_id: &str, order_id: &str) {
    if let Err(e) = notifications::add(
        db,
        user_id,
        NotificationInput {
            title: "Order Cancelled".into(),
            message: format!("Order #{} has been cancelled.", order_number(order_id)),
            kind: "danger".into(),
            order_id: Some(order_id.to_string()),
        },
    ) {
        tracing::warn!(order_id = %order_id, error = %e, "order-cancelled notification failed");
    }
}

// ---------------------------------------------------------------------------
// Payment confirmation
// ---------------------------------------------------------------------------

/// Idempotent transition upgrading a payment-verified GCash order out of
/// its waiting substatus. Returns the merge fields, or `None` when the
/// precondition does not hold (so repeated delivery of the same snapshot
/// is a no-op).
pub fn confirm_payment_approval(details: &OrderDetails, now: &str) -> Option<Value> {
    if !details.is_gcash()
        || details.payment_status.as_deref() != Some("approved")
        || details.is_cancelled()
        || details.canonical_status() != Some(CanonicalStatus::AwaitingPaymentVerification)
    {
        return None;
    }
    Some(json!({
        "orderStatus": status::STATUS_ORDER_CONFIRMED,
        "statusTimestamps": stamped(
            &details.status_timestamps,
            status::STATUS_ORDER_CONFIRMED,
            now,
        ),
        "updatedAt": now,
    }))
}

/// Merge fields for the automatic cancellation performed when a payment
/// is rejected again after an appeal.
pub fn auto_cancel_fields(details: &OrderDetails, now: &str) -> Value {
    json!({
        "status": status::STATUS_CANCELLED,
        "cancellationReason": REASON_PAYMENT_REJECTED,
        "statusTimestamps": stamped(&details.status_timestamps, status::STATUS_CANCELLED, now),
        "updatedAt": now,
    })
}

// ===========================================================================
// Tests
// ===========================================================================
