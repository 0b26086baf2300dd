use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::config::BackendConfig;
use crate::error::{BackendError, GatewayError, GatewayResult};

/// Characters escaped when a username is interpolated into a URL path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'<')
    .add(b'>')
    .add(b'`')
    .add(b'?')
    .add(b'#')
    .add(b'{')
    .add(b'}')
    .add(b'/')
    .add(b'%');

/// The backend's by-user purchase list: `{ "purchases": [ { "productId": .. }, .. ] }`.
/// Extra fields on each entry are ignored; a missing `purchases` field is a
/// decode error.
#[derive(Debug, Deserialize)]
pub struct PurchaseList {
    pub purchases: Vec<PurchaseRef>,
}

#[derive(Debug, Deserialize)]
pub struct PurchaseRef {
    #[serde(rename = "productId")]
    pub product_id: u64,
}

#[derive(Debug, Deserialize)]
struct ProductEnvelope {
    product: Value,
}

#[derive(Debug, Deserialize)]
struct HistoryEnvelope {
    purchases: Vec<HistoryRef>,
}

#[derive(Debug, Deserialize)]
struct HistoryRef {
    username: String,
}

/// HTTP client for the purchase/product backend. Stateless: one outbound GET
/// per call, no retries, no caching (all caching happens on aggregated
/// responses, not individual backend calls).
pub struct BackendClient {
    client: Client,
    base_url: String,
    purchase_limit: u32,
}

impl BackendClient {
    pub fn new(config: &BackendConfig) -> GatewayResult<Self> {
        let client = Client::builder()
            .gzip(true)
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .pool_max_idle_per_host(config.max_idle_per_host)
            .build()
            .map_err(|e| GatewayError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            base_url = %config.base_url,
            timeout_secs = config.timeout_secs,
            connect_timeout_secs = config.connect_timeout_secs,
            max_idle = config.max_idle_per_host,
            "Initialized backend HTTP client"
        );

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            purchase_limit: config.purchase_limit,
        })
    }

    /// Issue one GET and parse the body as JSON. 200 yields the parsed body;
    /// any other status yields `BackendError::Status`.
    pub async fn fetch_json(&self, path: &str) -> Result<Value, BackendError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "Fetching from backend");

        let response = self.client.get(&url).send().await?;
        let status = response.status();

        if status != StatusCode::OK {
            warn!(url = %url, status = status.as_u16(), "Backend returned non-200 status");
            return Err(BackendError::Status(status.as_u16()));
        }

        let body = response.json::<Value>().await?;
        Ok(body)
    }

    /// `GET /api/purchases/by_user/{username}?limit=N`. The backend returns
    /// an empty list (not a 404) for unknown usernames; interpreting that is
    /// the aggregator's job.
    pub async fn recent_purchases(&self, username: &str) -> Result<PurchaseList, BackendError> {
        let user = utf8_percent_encode(username, PATH_SEGMENT);
        let body = self
            .fetch_json(&format!(
                "/api/purchases/by_user/{}?limit={}",
                user, self.purchase_limit
            ))
            .await?;

        serde_json::from_value(body).map_err(|e| BackendError::Decode(e.to_string()))
    }

    /// `GET /api/products/{id}`, unwrapping the `"product"` envelope. The
    /// product must be a JSON object since the aggregator merges fields into it.
    pub async fn product_details(&self, product_id: u64) -> Result<Map<String, Value>, BackendError> {
        let body = self.fetch_json(&format!("/api/products/{}", product_id)).await?;

        let envelope: ProductEnvelope =
            serde_json::from_value(body).map_err(|e| BackendError::Decode(e.to_string()))?;

        match envelope.product {
            Value::Object(detail) => Ok(detail),
            other => Err(BackendError::Decode(format!(
                "product {} is not a JSON object: {}",
                product_id, other
            ))),
        }
    }

    /// `GET /api/purchases/by_product/{id}`, reduced to the ordered list of
    /// purchaser usernames. Duplicates and order are backend-defined and
    /// passed through unchanged.
    pub async fn purchase_history(&self, product_id: u64) -> Result<Vec<String>, BackendError> {
        let body = self
            .fetch_json(&format!("/api/purchases/by_product/{}", product_id))
            .await?;

        let envelope: HistoryEnvelope =
            serde_json::from_value(body).map_err(|e| BackendError::Decode(e.to_string()))?;

        Ok(envelope
            .purchases
            .into_iter()
            .map(|entry| entry.username)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_purchase_list_ignores_extra_fields() {
        let list: PurchaseList = serde_json::from_value(serde_json::json!({
            "purchases": [
                { "id": 1, "username": "alice", "productId": 10, "date": "2020-01-01" },
                { "productId": 20 }
            ]
        }))
        .unwrap();

        let ids: Vec<u64> = list.purchases.iter().map(|p| p.product_id).collect();
        assert_eq!(ids, vec![10, 20]);
    }

    #[test]
    fn test_purchase_list_missing_field_is_error() {
        let result: Result<PurchaseList, _> =
            serde_json::from_value(serde_json::json!({ "results": [] }));
        assert!(result.is_err());
    }

    #[test]
    fn test_username_path_encoding() {
        let encoded = utf8_percent_encode("bob smith/../x?", PATH_SEGMENT).to_string();
        assert_eq!(encoded, "bob%20smith%2F..%2Fx%3F");
    }
}
