//! Fan-out/fan-in aggregation of recent purchases.
//!
//! One aggregation run fetches a user's recent purchase list, then launches
//! a (details, history) pair of backend calls per distinct product, joins
//! them all, merges each product with its purchase history, and ranks the
//! results by history length. All backend failures are absorbed here and
//! converted into an [`Outcome`]; nothing below this layer reaches the
//! response mapper as a raw error.

use futures::future;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::backend::{BackendClient, PurchaseList};
use crate::error::BackendError;

/// Result of one aggregation run for a username. `Clone` because completed
/// outcomes are shared between coalesced requesters and cached until expiry.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Enriched products, ranked by recent-purchase count descending.
    Found(Vec<Value>),
    /// Unknown username (a 404, or the backend's empty-list quirk).
    NotFound,
    /// The backend answered with an unexpected status.
    UpstreamError,
    /// Transport failure, malformed response, or a failed fan-out leaf.
    /// The detail is logged server-side and never rendered to clients.
    InternalError(String),
}

pub struct Aggregator {
    backend: Arc<BackendClient>,
}

impl Aggregator {
    pub fn new(backend: Arc<BackendClient>) -> Self {
        Self { backend }
    }

    pub async fn aggregate(&self, username: &str) -> Outcome {
        let list = match self.backend.recent_purchases(username).await {
            Ok(list) => list,
            Err(BackendError::Status(404)) => return Outcome::NotFound,
            Err(BackendError::Status(code)) => {
                warn!(username = %username, status = code, "Purchase list fetch rejected");
                return Outcome::UpstreamError;
            }
            Err(err) => {
                error!(username = %username, error = %err, "Purchase list fetch failed");
                return Outcome::InternalError(err.to_string());
            }
        };

        let product_ids = distinct_product_ids(&list);
        if product_ids.is_empty() {
            // The backend returns an empty list rather than a 404 for unknown
            // usernames; treat it as not-found.
            return Outcome::NotFound;
        }

        debug!(
            username = %username,
            products = product_ids.len(),
            "Fanning out product lookups"
        );

        // One (details, history) pair per product, all pairs concurrent.
        // try_join_all preserves input order, so results stay paired with
        // product_ids by position regardless of arrival order, and the join
        // fails fast on the first leaf error.
        let lookups = product_ids.iter().map(|&product_id| {
            let backend = Arc::clone(&self.backend);
            async move {
                tokio::try_join!(
                    backend.product_details(product_id),
                    backend.purchase_history(product_id)
                )
            }
        });

        match future::try_join_all(lookups).await {
            Ok(products) => Outcome::Found(rank_products(products)),
            Err(err) => {
                error!(username = %username, error = %err, "Product fan-out failed");
                Outcome::InternalError(err.to_string())
            }
        }
    }
}

/// Distinct product ids in first-occurrence order. The purchase list may
/// repeat a product; each product is enriched once.
fn distinct_product_ids(list: &PurchaseList) -> Vec<u64> {
    let mut seen = HashSet::new();
    list.purchases
        .iter()
        .map(|purchase| purchase.product_id)
        .filter(|id| seen.insert(*id))
        .collect()
}

/// Merge each product with its purchase history under a `"recent"` field and
/// sort by history length descending. The sort is stable, so products with
/// equal counts keep their purchase-list order.
pub fn rank_products(products: Vec<(Map<String, Value>, Vec<String>)>) -> Vec<Value> {
    let mut ranked: Vec<(usize, Map<String, Value>)> = products
        .into_iter()
        .map(|(mut detail, history)| {
            let count = history.len();
            detail.insert(
                "recent".to_string(),
                Value::Array(history.into_iter().map(Value::String).collect()),
            );
            (count, detail)
        })
        .collect();

    ranked.sort_by(|a, b| b.0.cmp(&a.0));

    ranked
        .into_iter()
        .map(|(_, detail)| Value::Object(detail))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::PurchaseRef;
    use serde_json::json;

    fn detail(id: u64, name: &str) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("id".to_string(), json!(id));
        map.insert("name".to_string(), json!(name));
        map
    }

    fn usernames(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_rank_products_descending_by_history() {
        let ranked = rank_products(vec![
            (detail(20, "mug"), usernames(&["u4"])),
            (detail(10, "lamp"), usernames(&["u1", "u2", "u3"])),
        ]);

        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0]["id"], json!(10));
        assert_eq!(ranked[0]["recent"], json!(["u1", "u2", "u3"]));
        assert_eq!(ranked[1]["id"], json!(20));
        assert_eq!(ranked[1]["recent"], json!(["u4"]));
    }

    #[test]
    fn test_rank_products_stable_on_ties() {
        let ranked = rank_products(vec![
            (detail(1, "a"), usernames(&["x"])),
            (detail(2, "b"), usernames(&["y", "z"])),
            (detail(3, "c"), usernames(&["w"])),
        ]);

        // Products 1 and 3 tie at one purchase each; purchase-list order holds.
        let ids: Vec<&Value> = ranked.iter().map(|p| &p["id"]).collect();
        assert_eq!(ids, vec![&json!(2), &json!(1), &json!(3)]);
    }

    #[test]
    fn test_rank_products_recent_length_matches_history() {
        let ranked = rank_products(vec![(detail(7, "kite"), usernames(&["a", "b"]))]);
        assert_eq!(ranked[0]["recent"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_rank_products_preserves_detail_fields() {
        let mut extra = detail(5, "boots");
        extra.insert("cost".to_string(), json!(12.5));
        let ranked = rank_products(vec![(extra, usernames(&["a"]))]);

        assert_eq!(ranked[0]["name"], json!("boots"));
        assert_eq!(ranked[0]["cost"], json!(12.5));
    }

    #[test]
    fn test_distinct_product_ids_dedupes_in_order() {
        let list = PurchaseList {
            purchases: vec![
                PurchaseRef { product_id: 10 },
                PurchaseRef { product_id: 20 },
                PurchaseRef { product_id: 10 },
                PurchaseRef { product_id: 30 },
            ],
        };

        assert_eq!(distinct_product_ids(&list), vec![10, 20, 30]);
    }
}
