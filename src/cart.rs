//! Per-user cart over the remote `customers/{uid}/cart` sub-collection.
//!
//! `productPrice` on a cart line is always derived as
//! `originalPrice × productQuantity`; `originalPrice` is the immutable
//! base unit price and is never itself multiplied. A line that has lost
//! its `originalPrice` cannot be repriced and is surfaced as a
//! validation error rather than silently guessed at.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::api::StoreClient;
use crate::errors::ClientError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CartItem {
    pub cart_id: String,
    /// Either a plain string or an object with a `name` field.
    pub product_size: Value,
    pub product_varieties: Vec<String>,
    pub product_quantity: u32,
    /// Derived line total: `original_price * product_quantity`.
    pub product_price: f64,
    /// Immutable base unit price. Absent only on records written by a
    /// pre-repricing app version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_price: Option<f64>,
}

fn cart_path(user_id: &str) -> String {
    format!("customers/{user_id}/cart")
}

// ---------------------------------------------------------------------------
// Quantity updates
// ---------------------------------------------------------------------------

/// Plan a quantity change. Returns `Ok(None)` for `new_quantity < 1`
/// (a no-op, matching the stepper's lower bound) and recomputes the
/// derived line price otherwise.
pub fn plan_quantity_update(
    item: &CartItem,
    new_quantity: i64,
) -> Result<Option<CartItem>, ClientError> {
    if new_quantity < 1 {
        return Ok(None);
    }
    let unit_price = item.original_price.ok_or_else(|| {
        ClientError::Validation(
            "This cart item is missing its base price and cannot be repriced. Please remove it and add the product again".into(),
        )
    })?;
    let quantity = u32::try_from(new_quantity)
        .map_err(|_| ClientError::Validation("Quantity is too large".into()))?;
    Ok(Some(CartItem {
        product_quantity: quantity,
        product_price: unit_price * quantity as f64,
        ..item.clone()
    }))
}

/// Apply a quantity change to the remote cart line.
pub async fn update_quantity(
    client: &StoreClient,
    user_id: &str,
    item: &CartItem,
    new_quantity: i64,
) -> Result<(), ClientError> {
    let Some(updated) = plan_quantity_update(item, new_quantity)? else {
        return Ok(());
    };
    client
        .patch_document(
            &format!("{}/{}", cart_path(user_id), item.cart_id),
            &json!({
                "productQuantity": updated.product_quantity,
                "productPrice": updated.product_price,
            }),
        )
        .await
}

// ---------------------------------------------------------------------------
// Add / remove / list
// ---------------------------------------------------------------------------

/// Add a build-your-own line to the cart. `unit_price` is persisted as
/// the immutable `originalPrice`.
pub async fn add_to_cart(
    client: &StoreClient,
    user_id: &str,
    product_size: Value,
    product_varieties: Vec<String>,
    quantity: u32,
    unit_price: f64,
) -> Result<String, ClientError> {
    if quantity < 1 {
        return Err(ClientError::Validation("Quantity must be at least 1".into()));
    }
    if unit_price <= 0.0 {
        return Err(ClientError::Validation("Price must be positive".into()));
    }
    let item = CartItem {
        cart_id: Uuid::new_v4().to_string(),
        product_size,
        product_varieties,
        product_quantity: quantity,
        product_price: unit_price * quantity as f64,
        original_price: Some(unit_price),
    };
    client
        .create_document(
            &format!("{}/{}", cart_path(user_id), item.cart_id),
            &serde_json::to_value(&item)
                .map_err(|e| ClientError::Validation(format!("cart item encode: {e}")))?,
        )
        .await?;
    info!(cart_id = %item.cart_id, quantity, "Added item to cart");
    Ok(item.cart_id)
}

pub async fn list_cart(client: &StoreClient, user_id: &str) -> Result<Vec<CartItem>, ClientError> {
    let docs = client.list_documents(&cart_path(user_id)).await?;
    let mut items = Vec::new();
    for doc in docs {
        match serde_json::from_value::<CartItem>(doc) {
            Ok(item) => items.push(item),
            Err(e) => tracing::warn!("skipping malformed cart item: {e}"),
        }
    }
    Ok(items)
}

pub async fn remove_item(
    client: &StoreClient,
    user_id: &str,
    cart_id: &str,
) -> Result<(), ClientError> {
    client
        .delete_document(&format!("{}/{cart_id}", cart_path(user_id)))
        .await
}

/// Delete every line in the cart. The store has no batch-delete
/// primitive for sub-collections, so lines are removed one by one.
pub async fn clear_cart(client: &StoreClient, user_id: &str) -> Result<(), ClientError> {
    for item in list_cart(client, user_id).await? {
        remove_item(client, user_id, &item.cart_id).await?;
    }
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn item(quantity: u32, unit: f64) -> CartItem {
        CartItem {
            cart_id: "c-1".into(),
            product_size: json!("Medium"),
            product_varieties: vec!["Pandesal".into()],
            product_quantity: quantity,
            product_price: unit * quantity as f64,
            original_price: Some(unit),
        }
    }

    #[test]
    fn test_price_invariant_holds_after_update() {
        let base = item(2, 75.0);
        for qty in 1..=10 {
            let updated = plan_quantity_update(&base, qty).unwrap().unwrap();
            assert_eq!(
                updated.product_price,
                updated.original_price.unwrap() * updated.product_quantity as f64
            );
        }
    }

    #[test]
    fn test_update_below_one_is_noop() {
        let base = item(3, 50.0);
        assert!(plan_quantity_update(&base, 0).unwrap().is_none());
        assert!(plan_quantity_update(&base, -4).unwrap().is_none());
    }

    #[test]
    fn test_update_above_u32_max_is_rejected_not_wrapped() {
        let base = item(2, 75.0);
        // u32::MAX + 2 would wrap to quantity 1 under a plain cast.
        let err = plan_quantity_update(&base, u32::MAX as i64 + 2).unwrap_err();
        assert!(matches!(err, ClientError::Validation(_)));
        // The boundary itself still converts.
        let updated = plan_quantity_update(&base, u32::MAX as i64).unwrap().unwrap();
        assert_eq!(updated.product_quantity, u32::MAX);
    }

    #[test]
    fn test_original_price_never_multiplied() {
        let base = item(2, 75.0);
        let updated = plan_quantity_update(&base, 5).unwrap().unwrap();
        assert_eq!(updated.original_price, Some(75.0));
        assert_eq!(updated.product_price, 375.0);
        let again = plan_quantity_update(&updated, 2).unwrap().unwrap();
        assert_eq!(again.original_price, Some(75.0));
        assert_eq!(again.product_price, 150.0);
    }

    #[test]
    fn test_missing_original_price_is_an_error() {
        let mut base = item(2, 75.0);
        base.original_price = None;
        let err = plan_quantity_update(&base, 3).unwrap_err();
        assert!(matches!(err, ClientError::Validation(_)));
    }

    #[test]
    fn test_cart_item_round_trips_camel_case() {
        let base = item(2, 75.0);
        let value = serde_json::to_value(&base).unwrap();
        assert_eq!(value["cartId"], "c-1");
        assert_eq!(value["originalPrice"], 75.0);
        let back: CartItem = serde_json::from_value(value).unwrap();
        assert_eq!(back.product_quantity, 2);
        assert_eq!(back.original_price, Some(75.0));
    }
}
