//! Order status vocabulary and the tracking-stage projector.
//!
//! Orders carry two overlapping status vocabularies: the canonical
//! labels written by current clients ("Order Confirmed", "Preparing
//! Order", ...) and the legacy lowercase values written by older app
//! versions ("pending", "processing", ...). Both are normalized into a
//! single `CanonicalStatus` at the store boundary so nothing downstream
//! ever compares raw strings.
//!
//! `project_stage` is a pure derivation: it maps a snapshot of the
//! order's status and payment fields to exactly one user-facing
//! `DisplayStage`. It never mutates anything.

use crate::orders::OrderDetails;

// Canonical status labels as stored in the order document.
pub const STATUS_ORDER_CONFIRMED: &str = "Order Confirmed";
pub const STATUS_STOCK_RESERVED: &str = "Stock Reserved";
pub const STATUS_PREPARING_ORDER: &str = "Preparing Order";
pub const STATUS_READY_FOR_PICKUP: &str = "Ready for Pickup";
pub const STATUS_COMPLETED: &str = "Completed";
pub const STATUS_CANCELLED: &str = "Cancelled";
/// Waiting substatus for GCash orders whose payment is not yet verified.
pub const STATUS_AWAITING_PAYMENT_VERIFICATION: &str = "awaiting_payment_verification";

// ---------------------------------------------------------------------------
// Canonical status
// ---------------------------------------------------------------------------

/// The closed status vocabulary after alias normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalStatus {
    OrderConfirmed,
    StockReserved,
    PreparingOrder,
    ReadyForPickup,
    Completed,
    Cancelled,
    AwaitingPaymentVerification,
}

impl CanonicalStatus {
    /// The label written to the store for this status.
    pub fn as_label(&self) -> &'static str {
        match self {
            CanonicalStatus::OrderConfirmed => STATUS_ORDER_CONFIRMED,
            CanonicalStatus::StockReserved => STATUS_STOCK_RESERVED,
            CanonicalStatus::PreparingOrder => STATUS_PREPARING_ORDER,
            CanonicalStatus::ReadyForPickup => STATUS_READY_FOR_PICKUP,
            CanonicalStatus::Completed => STATUS_COMPLETED,
            CanonicalStatus::Cancelled => STATUS_CANCELLED,
            CanonicalStatus::AwaitingPaymentVerification => STATUS_AWAITING_PAYMENT_VERIFICATION,
        }
    }
}

/// Normalize a raw status string (canonical or legacy spelling) into the
/// closed vocabulary. Returns `None` for unknown or empty values so
/// callers can choose their own default.
pub fn normalize_status(raw: &str) -> Option<CanonicalStatus> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    // Compare case-insensitively: legacy clients wrote lowercase, and a
    // few back-office writes have shown up with odd capitalization.
    match trimmed.to_lowercase().as_str() {
        "order confirmed" | "pending" => Some(CanonicalStatus::OrderConfirmed),
        "stock reserved" | "scheduled" => Some(CanonicalStatus::StockReserved),
        "preparing order" | "processing" => Some(CanonicalStatus::PreparingOrder),
        "ready for pickup" | "ready" => Some(CanonicalStatus::ReadyForPickup),
        "completed" => Some(CanonicalStatus::Completed),
        "cancelled" | "canceled" => Some(CanonicalStatus::Cancelled),
        "awaiting_payment_verification" => Some(CanonicalStatus::AwaitingPaymentVerification),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Display stages
// ---------------------------------------------------------------------------

/// The single user-facing tracking stage derived from an order snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisplayStage {
    OrderConfirmed,
    StockReserved,
    PreparingOrder,
    ReadyForPickup,
    Completed,
    AwaitingPaymentVerification,
    PaymentRejected,
    Cancelled,
}

impl DisplayStage {
    pub fn label(&self) -> &'static str {
        match self {
            DisplayStage::OrderConfirmed => "Order Confirmed",
            DisplayStage::StockReserved => "Stock Reserved",
            DisplayStage::PreparingOrder => "Preparing Order",
            DisplayStage::ReadyForPickup => "Ready for Pickup",
            DisplayStage::Completed => "Completed",
            DisplayStage::AwaitingPaymentVerification => "Awaiting Payment Verification",
            DisplayStage::PaymentRejected => "Payment Rejected",
            DisplayStage::Cancelled => "Cancelled",
        }
    }

    /// UI color token for badges and the progress bar.
    pub fn color(&self) -> &'static str {
        match self {
            DisplayStage::OrderConfirmed => "primary",
            DisplayStage::StockReserved => "tertiary",
            DisplayStage::PreparingOrder => "warning",
            DisplayStage::ReadyForPickup => "secondary",
            DisplayStage::Completed => "success",
            DisplayStage::AwaitingPaymentVerification => "warning",
            DisplayStage::PaymentRejected => "danger",
            DisplayStage::Cancelled => "medium",
        }
    }

    /// Whether this stage offers the appeal/cancel choice to the customer.
    pub fn is_actionable_rejection(&self) -> bool {
        matches!(self, DisplayStage::PaymentRejected)
    }
}

// ---------------------------------------------------------------------------
// Projection
// ---------------------------------------------------------------------------

/// Derive the display stage for an order snapshot.
///
/// Precedence, first match wins:
/// 1. Cancelled (either status field, or a GCash payment that was
///    appealed and rejected again)
/// 2. GCash payment rejected with no appeal yet
/// 3. GCash payment not yet approved
/// 4. Lookup on the order status, defaulting to `OrderConfirmed`
pub fn project_stage(details: &OrderDetails) -> DisplayStage {
    let gcash = details.is_gcash();
    let payment = details.payment_status.as_deref().unwrap_or("");
    let appealed = details.has_appealed.unwrap_or(false);

    if details.is_cancelled() || (gcash && payment == "rejected" && appealed) {
        return DisplayStage::Cancelled;
    }
    if gcash && payment == "rejected" && !appealed {
        return DisplayStage::PaymentRejected;
    }
    if gcash && payment != "approved" {
        return DisplayStage::AwaitingPaymentVerification;
    }

    let stage = match details.canonical_status() {
        Some(CanonicalStatus::StockReserved) => DisplayStage::StockReserved,
        Some(CanonicalStatus::PreparingOrder) => DisplayStage::PreparingOrder,
        Some(CanonicalStatus::ReadyForPickup) => DisplayStage::ReadyForPickup,
        Some(CanonicalStatus::Completed) => DisplayStage::Completed,
        // "Order Confirmed", the waiting substatus, cancellation (already
        // handled above), and anything unknown all land on the first step.
        _ => DisplayStage::OrderConfirmed,
    };

    // A walk-in order has no reservation step; a stray "Stock Reserved"
    // written to one must not render an invalid step.
    if stage == DisplayStage::StockReserved && !details.pickup_later() {
        return DisplayStage::OrderConfirmed;
    }
    stage
}

/// The progress-bar step sequence: five steps for scheduled pickups,
/// four for walk-ins (no `StockReserved`).
pub fn tracking_steps(pickup_later: bool) -> &'static [DisplayStage] {
    if pickup_later {
        &[
            DisplayStage::OrderConfirmed,
            DisplayStage::StockReserved,
            DisplayStage::PreparingOrder,
            DisplayStage::ReadyForPickup,
            DisplayStage::Completed,
        ]
    } else {
        &[
            DisplayStage::OrderConfirmed,
            DisplayStage::PreparingOrder,
            DisplayStage::ReadyForPickup,
            DisplayStage::Completed,
        ]
    }
}

/// Zero-based index of a stage within the tracking sequence, used for
/// progress-bar completion. `None` for stages outside the sequence
/// (cancelled, rejected, awaiting verification).
pub fn stage_index(stage: DisplayStage, pickup_later: bool) -> Option<usize> {
    tracking_steps(pickup_later).iter().position(|s| *s == stage)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn details(
        order_status: &str,
        payment_method: &str,
        payment_status: &str,
        pickup_option: &str,
        has_appealed: bool,
    ) -> OrderDetails {
        OrderDetails {
            order_status: Some(order_status.to_string()).filter(|s| !s.is_empty()),
            payment_method: Some(payment_method.to_string()),
            payment_status: Some(payment_status.to_string()),
            pickup_option: Some(pickup_option.to_string()),
            has_appealed: Some(has_appealed),
            ..OrderDetails::default()
        }
    }

    #[test]
    fn test_normalize_legacy_aliases() {
        assert_eq!(
            normalize_status("pending"),
            Some(CanonicalStatus::OrderConfirmed)
        );
        assert_eq!(
            normalize_status("scheduled"),
            Some(CanonicalStatus::StockReserved)
        );
        assert_eq!(
            normalize_status("processing"),
            Some(CanonicalStatus::PreparingOrder)
        );
        assert_eq!(
            normalize_status("ready"),
            Some(CanonicalStatus::ReadyForPickup)
        );
        assert_eq!(
            normalize_status("completed"),
            Some(CanonicalStatus::Completed)
        );
        assert_eq!(
            normalize_status("cancelled"),
            Some(CanonicalStatus::Cancelled)
        );
    }

    #[test]
    fn test_normalize_canonical_labels() {
        for status in [
            CanonicalStatus::OrderConfirmed,
            CanonicalStatus::StockReserved,
            CanonicalStatus::PreparingOrder,
            CanonicalStatus::ReadyForPickup,
            CanonicalStatus::Completed,
            CanonicalStatus::Cancelled,
            CanonicalStatus::AwaitingPaymentVerification,
        ] {
            assert_eq!(normalize_status(status.as_label()), Some(status));
        }
    }

    #[test]
    fn test_normalize_unknown_is_none() {
        assert_eq!(normalize_status(""), None);
        assert_eq!(normalize_status("   "), None);
        assert_eq!(normalize_status("shipped"), None);
    }

    #[test]
    fn test_projector_is_pure() {
        let d = details("Preparing Order", "cash", "pending", "now", false);
        let first = project_stage(&d);
        for _ in 0..10 {
            assert_eq!(project_stage(&d), first);
        }
        assert_eq!(first, DisplayStage::PreparingOrder);
    }

    #[test]
    fn test_cancelled_wins_over_everything() {
        let mut d = details("Preparing Order", "gcash", "rejected", "later", false);
        d.status = Some("Cancelled".to_string());
        assert_eq!(project_stage(&d), DisplayStage::Cancelled);

        // Legacy field spelling also counts.
        let mut d = details("pending", "cash", "pending", "now", false);
        d.status = Some("cancelled".to_string());
        assert_eq!(project_stage(&d), DisplayStage::Cancelled);
    }

    #[test]
    fn test_appealed_then_rejected_is_cancelled() {
        let d = details("awaiting_payment_verification", "gcash", "rejected", "now", true);
        assert_eq!(project_stage(&d), DisplayStage::Cancelled);
    }

    #[test]
    fn test_rejected_without_appeal_is_actionable() {
        let d = details("awaiting_payment_verification", "gcash", "rejected", "now", false);
        let stage = project_stage(&d);
        assert_eq!(stage, DisplayStage::PaymentRejected);
        assert!(stage.is_actionable_rejection());
    }

    #[test]
    fn test_gcash_unverified_awaits_verification() {
        let d = details("Order Confirmed", "gcash", "pending", "now", false);
        assert_eq!(project_stage(&d), DisplayStage::AwaitingPaymentVerification);
    }

    #[test]
    fn test_gcash_approved_falls_through_to_lookup() {
        let d = details("Ready for Pickup", "gcash", "approved", "now", false);
        assert_eq!(project_stage(&d), DisplayStage::ReadyForPickup);
    }

    #[test]
    fn test_unknown_status_defaults_to_confirmed() {
        let d = details("warming_the_oven", "cash", "pending", "now", false);
        assert_eq!(project_stage(&d), DisplayStage::OrderConfirmed);
        let d = details("", "cash", "pending", "now", false);
        assert_eq!(project_stage(&d), DisplayStage::OrderConfirmed);
    }

    #[test]
    fn test_stock_reserved_downmaps_for_walk_in() {
        let d = details("Stock Reserved", "cash", "pending", "now", false);
        assert_eq!(project_stage(&d), DisplayStage::OrderConfirmed);

        let d = details("Stock Reserved", "cash", "pending", "later", false);
        assert_eq!(project_stage(&d), DisplayStage::StockReserved);
    }

    #[test]
    fn test_walk_in_sequence_never_contains_stock_reserved() {
        assert!(!tracking_steps(false).contains(&DisplayStage::StockReserved));
        assert_eq!(tracking_steps(false).len(), 4);
        assert_eq!(tracking_steps(true).len(), 5);
    }

    #[test]
    fn test_stage_index_accounts_for_sequence_length() {
        assert_eq!(stage_index(DisplayStage::PreparingOrder, true), Some(2));
        assert_eq!(stage_index(DisplayStage::PreparingOrder, false), Some(1));
        assert_eq!(stage_index(DisplayStage::Completed, true), Some(4));
        assert_eq!(stage_index(DisplayStage::Completed, false), Some(3));
        assert_eq!(stage_index(DisplayStage::Cancelled, true), None);
        assert_eq!(stage_index(DisplayStage::StockReserved, false), None);
    }

    #[test]
    fn test_labels_and_colors() {
        assert_eq!(DisplayStage::PaymentRejected.color(), "danger");
        assert_eq!(
            DisplayStage::AwaitingPaymentVerification.label(),
            "Awaiting Payment Verification"
        );
        assert_eq!(DisplayStage::Completed.color(), "success");
    }
}
