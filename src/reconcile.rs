//! Live order reconciliation.
//!
//! While a customer is viewing an order, a watcher task polls its
//! document and diffs each delivered snapshot against the previous one.
//! Detected transitions trigger local notifications, the write-through
//! that upgrades a payment-verified order out of its waiting substatus,
//! and the automatic cancellation of an order whose appeal was denied.
//!
//! The diff itself is a pure function over explicit `WatchState`, so
//! every transition rule is unit-testable without a live subscription.
//! Corrective writes are caught and logged; the read-side state update
//! always proceeds from the snapshot as delivered, keeping the UI
//! consistent with the remote store even when a write fails.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::StoreClient;
use crate::db::DbState;
use crate::notifications::{self, NotificationInput};
use crate::orders::{self, Order, OrderDetails};
use crate::status::{self, DisplayStage};

/// Default poll cadence for the order watcher.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Transition detection
// ---------------------------------------------------------------------------

/// Status fields of the previously delivered snapshot. `None` means no
/// snapshot has been seen yet, so the very first delivery never fires a
/// spurious "changed" event.
#[derive(Debug, Clone, Default)]
pub struct WatchState {
    pub previous_status: Option<String>,
    pub previous_payment_status: Option<String>,
}

/// A side effect owed for one detected transition.
#[derive(Debug, Clone, PartialEq)]
pub enum SideEffect {
    /// Write-through upgrading a verified payment out of
    /// `awaiting_payment_verification` (carries the merge fields).
    ConfirmPaymentApproval(serde_json::Value),
    /// The order status changed; notify with the projector's label.
    StatusChanged { stage: DisplayStage },
    PaymentApproved,
    PaymentRejected,
    /// A rejected payment after an appeal: cancel the order (carries the
    /// merge fields).
    AutoCancel(serde_json::Value),
}

/// Diff a delivered snapshot against the watch state. Pure: ordering of
/// the returned effects matches the write/notify order the executor
/// applies them in. Each transition produces its effect exactly once
/// because the caller advances the state via `observe` afterwards.
pub fn plan_side_effects(
    state: &WatchState,
    details: &OrderDetails,
    now: &str,
) -> Vec<SideEffect> {
    let mut effects = Vec::new();

    // A verified payment still sitting in the waiting substatus gets
    // upgraded as part of reconciliation. Gated on the previous payment
    // status so only the pending -> approved edge triggers the write.
    if state.previous_payment_status.as_deref() == Some("pending") {
        if let Some(fields) = orders::confirm_payment_approval(details, now) {
            effects.push(SideEffect::ConfirmPaymentApproval(fields));
        }
    }

    if let Some(prev) = state.previous_status.as_deref() {
        if prev != details.raw_status() {
            effects.push(SideEffect::StatusChanged {
                stage: status::project_stage(details),
            });
        }
    }

    if details.is_gcash() {
        if let Some(prev_payment) = state.previous_payment_status.as_deref() {
            let payment = details.payment_status.as_deref().unwrap_or("");
            if prev_payment != payment {
                match payment {
                    "approved" => effects.push(SideEffect::PaymentApproved),
                    "rejected" => {
                        effects.push(SideEffect::PaymentRejected);
                        if details.has_appealed.unwrap_or(false) {
                            effects.push(SideEffect::AutoCancel(orders::auto_cancel_fields(
                                details, now,
                            )));
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    effects
}

/// Advance the watch state to the delivered snapshot.
pub fn observe(state: &mut WatchState, details: &OrderDetails) {
    state.previous_status = Some(details.raw_status().to_string());
    state.previous_payment_status =
        Some(details.payment_status.as_deref().unwrap_or("").to_string());
}

// ---------------------------------------------------------------------------
// Effect execution
// ---------------------------------------------------------------------------

fn stage_kind(stage: DisplayStage) -> &'static str {
    match stage {
        DisplayStage::Completed => "success",
        DisplayStage::Cancelled | DisplayStage::PaymentRejected => "danger",
        _ => "info",
    }
}

/// Apply planned side effects. Store writes are best-effort: a failed
/// corrective write is logged and the remaining effects still run.
/// Notification failures are likewise logged only.
pub async fn apply_side_effects(
    client: &StoreClient,
    db: &DbState,
    user_id: &str,
    order: &Order,
    effects: Vec<SideEffect>,
) {
    let number = orders::order_number(&order.id);
    let order_path = format!("orders/{}", order.id);

    for effect in effects {
        match effect {
            SideEffect::ConfirmPaymentApproval(fields) => {
                if let Err(e) = client
                    .patch_document(&order_path, &json!({ "orderDetails": fields }))
                    .await
                {
                    warn!(order_id = %order.id, error = %e, "payment-approval write-through failed");
                } else {
                    info!(order_id = %order.id, "order confirmed after payment verification");
                }
            }
            SideEffect::StatusChanged { stage } => {
                add_notification(
                    db,
                    user_id,
                    order,
                    "Order Status Updated",
                    format!("Order #{number} is now {}.", stage.label()),
                    stage_kind(stage),
                );
            }
            SideEffect::PaymentApproved => {
                add_notification(
                    db,
                    user_id,
                    order,
                    "Payment Approved",
                    format!("Your GCash payment for order #{number} has been approved."),
                    "success",
                );
            }
            SideEffect::PaymentRejected => {
                add_notification(
                    db,
                    user_id,
                    order,
                    "Payment Rejected",
                    format!("Your GCash payment for order #{number} was rejected."),
                    "danger",
                );
            }
            SideEffect::AutoCancel(fields) => {
                if let Err(e) = client
                    .patch_document(&order_path, &json!({ "orderDetails": fields }))
                    .await
                {
                    warn!(order_id = %order.id, error = %e, "auto-cancel write failed");
                }
                add_notification(
                    db,
                    user_id,
                    order,
                    "Order Cancelled",
                    format!(
                        "Order #{number} was cancelled because the resubmitted payment was rejected."
                    ),
                    "danger",
                );
            }
        }
    }
}

fn add_notification(
    db: &DbState,
    user_id: &str,
    order: &Order,
    title: &str,
    message: String,
    kind: &str,
) {
    if let Err(e) = notifications::add(
        db,
        user_id,
        NotificationInput {
            title: title.into(),
            message,
            kind: kind.into(),
            order_id: Some(order.id.clone()),
        },
    ) {
        warn!(order_id = %order.id, error = %e, "reconciliation notification failed");
    }
}

// ---------------------------------------------------------------------------
// Watcher
// ---------------------------------------------------------------------------

/// Handle to a running order watcher. The subscription lifetime is bound
/// to the viewing screen: call `stop` on unmount. Writes already issued
/// when the watcher stops are fire-and-forget.
pub struct OrderWatcher {
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

impl OrderWatcher {
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Stop and wait for the poll task to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}

/// Start watching one order document. Each delivered snapshot runs
/// plan -> apply -> observe and is then handed to `on_update` for the UI.
pub fn watch_order(
    client: Arc<StoreClient>,
    db: Arc<DbState>,
    user_id: String,
    order_id: String,
    poll_interval: Duration,
    on_update: impl Fn(&Order) + Send + 'static,
) -> OrderWatcher {
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    let handle = tokio::spawn(async move {
        let mut state = WatchState::default();
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(order_id = %order_id, "order watcher started");

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let doc = match client.get_document(&format!("orders/{order_id}")).await {
                Ok(doc) => doc,
                Err(e) => {
                    warn!(order_id = %order_id, error = %e, "order snapshot fetch failed");
                    continue;
                }
            };
            let order: Order = match serde_json::from_value(doc) {
                Ok(order) => order,
                Err(e) => {
                    warn!(order_id = %order_id, "malformed order document: {e}");
                    continue;
                }
            };

            let now = Utc::now().to_rfc3339();
            let effects = plan_side_effects(&state, &order.order_details, &now);
            if !effects.is_empty() {
                debug!(order_id = %order_id, count = effects.len(), "applying reconciliation effects");
            }
            apply_side_effects(&client, &db, &user_id, &order, effects).await;
            observe(&mut state, &order.order_details);
            on_update(&order);
        }

        debug!(order_id = %order_id, "order watcher stopped");
    });

    OrderWatcher { cancel, handle }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn gcash_details(order_status: &str, payment_status: &str, has_appealed: bool) -> OrderDetails {
        OrderDetails {
            payment_method: Some("gcash".into()),
            payment_status: Some(payment_status.into()),
            order_status: Some(order_status.into()),
            has_appealed: Some(has_appealed),
            pickup_option: Some("now".into()),
            ..OrderDetails::default()
        }
    }

    #[test]
    fn test_first_delivery_fires_nothing() {
        let state = WatchState::default();
        let details = gcash_details("awaiting_payment_verification", "pending", false);
        assert!(plan_side_effects(&state, &details, "t").is_empty());
    }

    #[test]
    fn test_pending_to_approved_confirms_exactly_once() {
        let mut state = WatchState::default();
        let pending = gcash_details("awaiting_payment_verification", "pending", false);
        observe(&mut state, &pending);

        let approved = gcash_details("awaiting_payment_verification", "approved", false);
        let effects = plan_side_effects(&state, &approved, "t1");
        assert_eq!(effects.len(), 2);
        let SideEffect::ConfirmPaymentApproval(fields) = &effects[0] else {
            panic!("expected write-through first, got {effects:?}");
        };
        assert_eq!(fields["orderStatus"], "Order Confirmed");
        assert_eq!(fields["statusTimestamps"]["Order Confirmed"], "t1");
        assert_eq!(effects[1], SideEffect::PaymentApproved);

        // Repeated delivery of the same snapshot is a no-op.
        observe(&mut state, &approved);
        assert!(plan_side_effects(&state, &approved, "t2").is_empty());
    }

    #[test]
    fn test_approved_from_non_pending_does_not_write_through() {
        let mut state = WatchState::default();
        let rejected = gcash_details("awaiting_payment_verification", "rejected", false);
        observe(&mut state, &rejected);

        // rejected -> approved notifies but must not run the pending-gated
        // write-through.
        let approved = gcash_details("awaiting_payment_verification", "approved", false);
        let effects = plan_side_effects(&state, &approved, "t");
        assert_eq!(effects, vec![SideEffect::PaymentApproved]);
    }

    #[test]
    fn test_status_change_notifies_with_projected_stage() {
        let mut state = WatchState::default();
        let confirmed = gcash_details("Order Confirmed", "approved", false);
        observe(&mut state, &confirmed);

        let preparing = gcash_details("Preparing Order", "approved", false);
        let effects = plan_side_effects(&state, &preparing, "t");
        assert_eq!(
            effects,
            vec![SideEffect::StatusChanged {
                stage: DisplayStage::PreparingOrder
            }]
        );
    }

    #[test]
    fn test_legacy_status_spelling_still_diffs() {
        let mut state = WatchState::default();
        let mut legacy = OrderDetails {
            status: Some("pending".into()),
            payment_method: Some("cash".into()),
            payment_status: Some("pending".into()),
            ..OrderDetails::default()
        };
        observe(&mut state, &legacy);

        legacy.status = Some("processing".into());
        let effects = plan_side_effects(&state, &legacy, "t");
        assert_eq!(
            effects,
            vec![SideEffect::StatusChanged {
                stage: DisplayStage::PreparingOrder
            }]
        );
    }

    #[test]
    fn test_rejection_after_appeal_auto_cancels_once() {
        let mut state = WatchState::default();
        let appealed = gcash_details("awaiting_payment_verification", "pending", true);
        observe(&mut state, &appealed);

        let denied = gcash_details("awaiting_payment_verification", "rejected", true);
        let effects = plan_side_effects(&state, &denied, "t1");
        assert_eq!(effects.len(), 2);
        assert_eq!(effects[0], SideEffect::PaymentRejected);
        let SideEffect::AutoCancel(fields) = &effects[1] else {
            panic!("expected auto-cancel, got {effects:?}");
        };
        assert_eq!(fields["status"], "Cancelled");
        assert_eq!(fields["cancellationReason"], "payment_rejected");
        assert_eq!(status::project_stage(&denied), DisplayStage::Cancelled);

        // The denied snapshot arriving again must not cancel twice.
        observe(&mut state, &denied);
        assert!(plan_side_effects(&state, &denied, "t2").is_empty());
    }

    #[test]
    fn test_first_rejection_without_appeal_only_notifies() {
        let mut state = WatchState::default();
        let pending = gcash_details("awaiting_payment_verification", "pending", false);
        observe(&mut state, &pending);

        let rejected = gcash_details("awaiting_payment_verification", "rejected", false);
        let effects = plan_side_effects(&state, &rejected, "t");
        assert_eq!(effects, vec![SideEffect::PaymentRejected]);
        assert_eq!(
            status::project_stage(&rejected),
            DisplayStage::PaymentRejected
        );
    }

    #[test]
    fn test_cash_orders_ignore_payment_field_noise() {
        let mut state = WatchState::default();
        let mut cash = OrderDetails {
            payment_method: Some("cash".into()),
            payment_status: Some("pending".into()),
            order_status: Some("Order Confirmed".into()),
            ..OrderDetails::default()
        };
        observe(&mut state, &cash);

        cash.payment_status = Some("approved".into());
        assert!(plan_side_effects(&state, &cash, "t").is_empty());
    }

    #[test]
    fn test_observe_tracks_raw_fields() {
        let mut state = WatchState::default();
        let details = gcash_details("Order Confirmed", "approved", false);
        observe(&mut state, &details);
        assert_eq!(state.previous_status.as_deref(), Some("Order Confirmed"));
        assert_eq!(state.previous_payment_status.as_deref(), Some("approved"));
    }

    #[test]
    fn test_appeal_roundtrip_scenario() {
        // Rejected, not yet appealed: actionable.
        let rejected = gcash_details("awaiting_payment_verification", "rejected", false);
        assert_eq!(
            status::project_stage(&rejected),
            DisplayStage::PaymentRejected
        );

        // After a successful appeal the order waits for re-verification.
        let appeal_fields = crate::appeal::plan_appeal(
            &rejected,
            &crate::appeal::AppealEvidence::Reference("1234567890123".into()),
            "t1",
        )
        .unwrap();
        let appealed = OrderDetails {
            payment_status: Some(appeal_fields["paymentStatus"].as_str().unwrap().into()),
            order_status: Some(appeal_fields["orderStatus"].as_str().unwrap().into()),
            has_appealed: Some(appeal_fields["hasAppealed"].as_bool().unwrap()),
            ..rejected.clone()
        };
        assert_eq!(
            status::project_stage(&appealed),
            DisplayStage::AwaitingPaymentVerification
        );
    }
}
