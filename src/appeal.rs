//! One-time correction of a rejected GCash payment.
//!
//! A customer whose GCash payment was rejected may resubmit evidence
//! exactly once: either the 13-digit GCash reference number or a
//! screenshot of the transaction. A successful appeal puts the payment
//! back into verification; if staff reject it again, the reconciliation
//! loop auto-cancels the order and no second appeal is offered.

use chrono::Utc;
use image::ImageFormat;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::api::{self, StoreClient};
use crate::db::DbState;
use crate::errors::ClientError;
use crate::notifications::{self, NotificationInput};
use crate::orders::{order_number, Order, OrderDetails};
use crate::status;

/// GCash reference numbers are exactly 13 decimal digits.
pub const REFERENCE_LEN: usize = 13;

/// Maximum accepted screenshot size.
pub const MAX_SCREENSHOT_BYTES: usize = 5 * 1024 * 1024;

/// Sentinel written to `gcashReference` when the evidence is a
/// screenshot rather than a reference number.
pub const SCREENSHOT_REFERENCE_SENTINEL: &str = "screenshot_attached";

/// Push topic staff monitor for resubmitted payments.
const STAFF_APPEALS_TOPIC: &str = "staff-payment-appeals";

// ---------------------------------------------------------------------------
// Reference validation
// ---------------------------------------------------------------------------

/// Result of validating a reference number as typed. Runs on every
/// keystroke, so the three failure cases are mutually exclusive and
/// carry the message to show inline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceCheck {
    Valid,
    TooShort(usize),
    TooLong(usize),
    NonDigit,
}

impl ReferenceCheck {
    /// The inline error message, or `None` when valid.
    pub fn message(&self) -> Option<String> {
        match self {
            ReferenceCheck::Valid => None,
            ReferenceCheck::TooShort(n) => {
                Some(format!("Reference number is too short ({n}/{REFERENCE_LEN})"))
            }
            ReferenceCheck::TooLong(n) => {
                Some(format!("Reference number is too long ({n}/{REFERENCE_LEN})"))
            }
            ReferenceCheck::NonDigit => {
                Some("Reference number must contain only digits".to_string())
            }
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, ReferenceCheck::Valid)
    }
}

/// Validate a GCash reference number. A non-digit character fails
/// regardless of length.
pub fn check_reference(input: &str) -> ReferenceCheck {
    let trimmed = input.trim();
    if !trimmed.chars().all(|c| c.is_ascii_digit()) {
        return ReferenceCheck::NonDigit;
    }
    let len = trimmed.chars().count();
    if len < REFERENCE_LEN {
        ReferenceCheck::TooShort(len)
    } else if len > REFERENCE_LEN {
        ReferenceCheck::TooLong(len)
    } else {
        ReferenceCheck::Valid
    }
}

// ---------------------------------------------------------------------------
// Screenshot validation
// ---------------------------------------------------------------------------

/// Validate screenshot bytes: at most 5 MB and sniffed as JPEG or PNG.
/// Returns the file extension to use for the upload.
pub fn validate_screenshot(bytes: &[u8]) -> Result<&'static str, ClientError> {
    if bytes.is_empty() {
        return Err(ClientError::Validation("Screenshot is empty".into()));
    }
    if bytes.len() > MAX_SCREENSHOT_BYTES {
        return Err(ClientError::Validation(
            "Screenshot is larger than 5 MB".into(),
        ));
    }
    match image::guess_format(bytes) {
        Ok(ImageFormat::Jpeg) => Ok("jpg"),
        Ok(ImageFormat::Png) => Ok("png"),
        _ => Err(ClientError::Validation(
            "Screenshot must be a JPEG or PNG image".into(),
        )),
    }
}

/// Decode a `data:image/...;base64,` URI into raw bytes. The frontend
/// file picker hands images over in this shape.
pub fn decode_data_uri(data: &str) -> Result<Vec<u8>, ClientError> {
    use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
    use base64::Engine as _;

    let encoded = data
        .split_once(";base64,")
        .map(|(_, rest)| rest)
        .unwrap_or(data);
    BASE64_STANDARD
        .decode(encoded.trim())
        .map_err(|e| ClientError::Validation(format!("Invalid image data: {e}")))
}

// ---------------------------------------------------------------------------
// Appeal planning
// ---------------------------------------------------------------------------

/// Evidence already resolved to its persisted form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppealEvidence {
    Reference(String),
    ScreenshotUrl(String),
}

/// Evidence as submitted by the customer.
#[derive(Debug, Clone)]
pub enum AppealSubmission {
    Reference(String),
    Screenshot(Vec<u8>),
}

/// The appeal entry condition: a rejected GCash payment that has not
/// been appealed yet.
pub fn check_appeal_entry(details: &OrderDetails) -> Result<(), ClientError> {
    if !details.is_gcash() {
        return Err(ClientError::Validation(
            "Only GCash payments can be appealed".into(),
        ));
    }
    if details.has_appealed.unwrap_or(false) {
        return Err(ClientError::Validation(
            "This payment has already been appealed once".into(),
        ));
    }
    if details.payment_status.as_deref() != Some("rejected") {
        return Err(ClientError::Validation(
            "Only a rejected payment can be appealed".into(),
        ));
    }
    Ok(())
}

/// Check the entry condition and produce the `orderDetails` merge fields
/// for an appeal. Pure; nothing is mutated on failure.
pub fn plan_appeal(
    details: &OrderDetails,
    evidence: &AppealEvidence,
    now: &str,
) -> Result<Value, ClientError> {
    check_appeal_entry(details)?;

    let mut fields = json!({
        "paymentStatus": "pending",
        "orderStatus": status::STATUS_AWAITING_PAYMENT_VERIFICATION,
        "hasAppealed": true,
        "appealTimestamp": now,
        "updatedAt": now,
    });
    match evidence {
        AppealEvidence::Reference(reference) => {
            fields["gcashReference"] = json!(reference);
        }
        AppealEvidence::ScreenshotUrl(url) => {
            fields["gcashReference"] = json!(SCREENSHOT_REFERENCE_SENTINEL);
            fields["gcashScreenshotUrl"] = json!(url);
        }
    }
    Ok(fields)
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

/// Submit an appeal: validate the evidence, upload a screenshot if that
/// is the chosen method, merge the appeal fields into the order, and log
/// the event. Validation or upload failure leaves the order untouched.
pub async fn submit_appeal(
    client: &StoreClient,
    db: &DbState,
    user_id: &str,
    order: &Order,
    submission: AppealSubmission,
    asset_upload_url: &str,
) -> Result<(), ClientError> {
    // Entry condition first: a stale screen must get the real rejection
    // (already appealed, not rejected, not GCash) before any screenshot
    // is uploaded, and an ineligible appeal must never orphan an image
    // on the asset host.
    check_appeal_entry(&order.order_details)?;

    let now = Utc::now().to_rfc3339();

    let evidence = match submission {
        AppealSubmission::Reference(reference) => {
            let check = check_reference(&reference);
            if let Some(message) = check.message() {
                return Err(ClientError::Validation(message));
            }
            AppealEvidence::Reference(reference.trim().to_string())
        }
        AppealSubmission::Screenshot(bytes) => {
            let ext = validate_screenshot(&bytes)?;
            let filename = format!("appeal-{}.{ext}", order_number(&order.id).to_lowercase());
            let url = api::upload_image(asset_upload_url, bytes, &filename).await?;
            AppealEvidence::ScreenshotUrl(url)
        }
    };

    let fields = plan_appeal(&order.order_details, &evidence, &now)?;
    client
        .patch_document(
            &format!("orders/{}", order.id),
            &json!({ "orderDetails": fields }),
        )
        .await?;
    info!(order_id = %order.id, "payment appeal submitted");

    if let Err(e) = notifications::add(
        db,
        user_id,
        NotificationInput {
            title: "Appeal Submitted".into(),
            message: format!(
                "Your payment for order #{} is being re-verified.",
                order_number(&order.id)
            ),
            kind: "info".into(),
            order_id: Some(order.id.clone()),
        },
    ) {
        warn!(order_id = %order.id, error = %e, "appeal notification failed");
    }

    // Staff channel ping is non-critical: never surface its failure over
    // a successfully submitted appeal.
    if let Err(e) = client
        .send_push_to_topic(
            STAFF_APPEALS_TOPIC,
            "Payment appeal",
            &format!("Order #{} resubmitted payment evidence", order_number(&order.id)),
            json!({ "orderId": order.id }),
        )
        .await
    {
        warn!(order_id = %order.id, error = %e, "staff appeal notification failed");
    }

    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_exactly_13_digits_is_valid() {
        let check = check_reference("1234567890123");
        assert!(check.is_valid());
        assert_eq!(check.message(), None);
    }

    #[test]
    fn test_reference_length_messages() {
        assert_eq!(check_reference("123456789012"), ReferenceCheck::TooShort(12));
        assert_eq!(
            check_reference("123456789012").message().unwrap(),
            "Reference number is too short (12/13)"
        );
        assert_eq!(
            check_reference("12345678901234"),
            ReferenceCheck::TooLong(14)
        );
        assert_eq!(
            check_reference("12345678901234").message().unwrap(),
            "Reference number is too long (14/13)"
        );
    }

    #[test]
    fn test_reference_non_digit_wins_regardless_of_length() {
        assert_eq!(check_reference("12345abc"), ReferenceCheck::NonDigit);
        assert_eq!(check_reference("123456789012x"), ReferenceCheck::NonDigit);
        assert_eq!(check_reference("12345678901234x"), ReferenceCheck::NonDigit);
    }

    #[test]
    fn test_screenshot_size_limit() {
        let oversized = vec![0u8; MAX_SCREENSHOT_BYTES + 1];
        assert!(matches!(
            validate_screenshot(&oversized),
            Err(ClientError::Validation(_))
        ));
    }

    #[test]
    fn test_screenshot_mime_sniffing() {
        // PNG magic bytes
        let png = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR".to_vec();
        assert_eq!(validate_screenshot(&png).unwrap(), "png");
        // JPEG magic bytes
        let jpg = b"\xff\xd8\xff\xe0\x00\x10JFIF".to_vec();
        assert_eq!(validate_screenshot(&jpg).unwrap(), "jpg");
        // GIF is rejected
        let gif = b"GIF89a\x01\x00\x01\x00".to_vec();
        assert!(validate_screenshot(&gif).is_err());
    }

    #[test]
    fn test_decode_data_uri() {
        use base64::engine::general_purpose::STANDARD;
        use base64::Engine as _;
        let payload = STANDARD.encode(b"\x89PNG");
        let decoded = decode_data_uri(&format!("data:image/png;base64,{payload}")).unwrap();
        assert_eq!(decoded, b"\x89PNG");
        // Bare base64 without the prefix also decodes
        assert_eq!(decode_data_uri(&payload).unwrap(), b"\x89PNG");
        assert!(decode_data_uri("not base64 !!!").is_err());
    }

    fn rejected_gcash() -> OrderDetails {
        OrderDetails {
            payment_method: Some("gcash".into()),
            payment_status: Some("rejected".into()),
            order_status: Some("awaiting_payment_verification".into()),
            ..OrderDetails::default()
        }
    }

    #[test]
    fn test_plan_appeal_with_reference() {
        let fields = plan_appeal(
            &rejected_gcash(),
            &AppealEvidence::Reference("1234567890123".into()),
            "t1",
        )
        .unwrap();
        assert_eq!(fields["paymentStatus"], "pending");
        assert_eq!(fields["orderStatus"], "awaiting_payment_verification");
        assert_eq!(fields["hasAppealed"], true);
        assert_eq!(fields["appealTimestamp"], "t1");
        assert_eq!(fields["gcashReference"], "1234567890123");
        assert!(fields.get("gcashScreenshotUrl").is_none());
    }

    #[test]
    fn test_plan_appeal_with_screenshot_sets_sentinel() {
        let fields = plan_appeal(
            &rejected_gcash(),
            &AppealEvidence::ScreenshotUrl("https://assets.example/shot.png".into()),
            "t1",
        )
        .unwrap();
        assert_eq!(fields["gcashReference"], SCREENSHOT_REFERENCE_SENTINEL);
        assert_eq!(
            fields["gcashScreenshotUrl"],
            "https://assets.example/shot.png"
        );
    }

    #[test]
    fn test_plan_appeal_rejects_second_appeal() {
        let mut details = rejected_gcash();
        details.has_appealed = Some(true);
        let err = plan_appeal(
            &details,
            &AppealEvidence::Reference("1234567890123".into()),
            "t1",
        )
        .unwrap_err();
        assert!(matches!(err, ClientError::Validation(_)));
    }

    #[tokio::test]
    async fn test_ineligible_screenshot_appeal_fails_before_upload() {
        let client = crate::api::StoreClient::new("http://127.0.0.1:9", "key").unwrap();
        let db = crate::db::test_db();
        let mut details = rejected_gcash();
        details.has_appealed = Some(true);
        let order = Order {
            id: "order-1".into(),
            order_details: details,
            ..Order::default()
        };

        // Valid PNG bytes and an unreachable asset host: the entry
        // condition must reject first, so no upload is ever attempted.
        let png = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR".to_vec();
        let err = submit_appeal(
            &client,
            &db,
            "user-1",
            &order,
            AppealSubmission::Screenshot(png),
            "http://127.0.0.1:9/upload",
        )
        .await
        .unwrap_err();
        assert!(
            matches!(&err, ClientError::Validation(m) if m.contains("already been appealed")),
            "expected the appeal rejection, got {err:?}"
        );
    }

    #[test]
    fn test_plan_appeal_requires_rejected_gcash() {
        let mut details = rejected_gcash();
        details.payment_status = Some("pending".into());
        assert!(plan_appeal(
            &details,
            &AppealEvidence::Reference("1234567890123".into()),
            "t1"
        )
        .is_err());

        let mut details = rejected_gcash();
        details.payment_method = Some("cash".into());
        assert!(plan_appeal(
            &details,
            &AppealEvidence::Reference("1234567890123".into()),
            "t1"
        )
        .is_err());
    }
}
