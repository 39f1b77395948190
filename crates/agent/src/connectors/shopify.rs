use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use parley_core::domain::agent::ShopifyIntegration;

use super::{read_json, transport, CommerceConnector, ConnectorError};

const SERVICE: &str = "shopify";
const MAX_PRODUCTS: usize = 10;

pub struct ShopifyConnector {
    client: Client,
    config: ShopifyIntegration,
    base_url: String,
}

impl ShopifyConnector {
    pub fn new(client: Client, config: ShopifyIntegration) -> Self {
        let base_url =
            format!("https://{}/admin/api/{}", config.shop_domain.trim(), config.api_version.trim());
        Self { client, config, base_url }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value, ConnectorError> {
        let response = self
            .client
            .get(format!("{}/{}", self.base_url, path))
            .header("X-Shopify-Access-Token", &self.config.access_token)
            .query(query)
            .send()
            .await
            .map_err(transport(SERVICE))?;
        read_json(SERVICE, response).await
    }
}

#[async_trait]
impl CommerceConnector for ShopifyConnector {
    async fn search_products(&self, query: &str, limit: usize) -> Result<Value, ConnectorError> {
        let limit = limit.clamp(1, MAX_PRODUCTS);
        let payload = self
            .get("products.json", &[("title", query.to_string()), ("limit", limit.to_string())])
            .await?;
        Ok(product_summaries(&payload))
    }

    async fn order_status(&self, order_number: &str) -> Result<Value, ConnectorError> {
        let name = format!("#{}", order_number.trim().trim_start_matches('#'));
        let payload = self
            .get("orders.json", &[("name", name.clone()), ("status", "any".to_string())])
            .await?;
        order_summary(&name, &payload)
    }
}

fn product_summaries(payload: &Value) -> Value {
    let products: Vec<Value> = payload["products"]
        .as_array()
        .map(|products| {
            products
                .iter()
                .map(|product| {
                    let variant = &product["variants"][0];
                    json!({
                        "id": product["id"],
                        "title": product["title"],
                        "vendor": product["vendor"],
                        "price": variant["price"],
                        "in_stock": variant["inventory_quantity"].as_i64().map(|qty| qty > 0),
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    json!({ "count": products.len(), "products": products })
}

fn order_summary(name: &str, payload: &Value) -> Result<Value, ConnectorError> {
    let order = payload["orders"]
        .as_array()
        .and_then(|orders| orders.first())
        .ok_or_else(|| ConnectorError::NotFound(format!("order {name} was not found")))?;
    Ok(json!({
        "order": order["name"],
        "financial_status": order["financial_status"],
        "fulfillment_status": order["fulfillment_status"].as_str().unwrap_or("unfulfilled"),
        "created_at": order["created_at"],
        "total": order["total_price"],
    }))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{order_summary, product_summaries};
    use crate::connectors::ConnectorError;

    #[test]
    fn products_are_trimmed_to_customer_facing_fields() {
        let summary = product_summaries(&json!({
            "products": [{
                "id": 1, "title": "Whitening kit", "vendor": "Acme", "body_html": "<p>long</p>",
                "variants": [{ "price": "29.90", "inventory_quantity": 4 }]
            }]
        }));
        assert_eq!(summary["count"], json!(1));
        assert_eq!(summary["products"][0]["price"], json!("29.90"));
        assert_eq!(summary["products"][0]["in_stock"], json!(true));
        assert!(summary["products"][0].get("body_html").is_none());
    }

    #[test]
    fn unknown_order_is_reported_as_not_found() {
        let error = order_summary("#1001", &json!({ "orders": [] })).expect_err("no order");
        assert_eq!(error, ConnectorError::NotFound("order #1001 was not found".to_string()));

        let found = order_summary(
            "#1002",
            &json!({ "orders": [{ "name": "#1002", "financial_status": "paid", "fulfillment_status": null }] }),
        )
        .expect("order");
        assert_eq!(found["fulfillment_status"], json!("unfulfilled"));
    }
}
