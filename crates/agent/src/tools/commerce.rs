use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use parley_core::domain::tool::ToolCall;

use super::{arguments_object, required_str, Capability, ToolContext, ToolError};
use crate::connectors::CommerceConnector;
use crate::llm::ToolDescriptor;

pub const SEARCH_PRODUCTS_TOOL: &str = "shopify_search_products";
pub const ORDER_STATUS_TOOL: &str = "shopify_get_order_status";

const DEFAULT_PRODUCT_LIMIT: usize = 5;

pub struct CommerceCapability {
    connector: Arc<dyn CommerceConnector>,
}

impl CommerceCapability {
    pub fn new(connector: Arc<dyn CommerceConnector>) -> Self {
        Self { connector }
    }
}

#[async_trait]
impl Capability for CommerceCapability {
    fn tools(&self) -> Vec<ToolDescriptor> {
        vec![
            ToolDescriptor::new(
                SEARCH_PRODUCTS_TOOL,
                "Search the store catalog by product name.",
                json!({
                    "type": "object",
                    "properties": {
                        "query": { "type": "string" },
                        "limit": { "type": "integer", "description": "At most 10, default 5" }
                    },
                    "required": ["query"]
                }),
            ),
            ToolDescriptor::new(
                ORDER_STATUS_TOOL,
                "Look up payment and fulfillment status of an order by its number.",
                json!({
                    "type": "object",
                    "properties": { "order_number": { "type": "string", "description": "For example 1001 or #1001" } },
                    "required": ["order_number"]
                }),
            ),
        ]
    }

    async fn invoke(&self, call: &ToolCall, _context: &ToolContext) -> Result<Value, ToolError> {
        let arguments = arguments_object(call)?;
        match call.name.as_str() {
            SEARCH_PRODUCTS_TOOL => {
                let limit = arguments
                    .get("limit")
                    .and_then(Value::as_u64)
                    .and_then(|limit| usize::try_from(limit).ok())
                    .unwrap_or(DEFAULT_PRODUCT_LIMIT);
                Ok(self.connector.search_products(required_str(arguments, "query")?, limit).await?)
            }
            ORDER_STATUS_TOOL => {
                let order_number = match arguments.get("order_number") {
                    Some(Value::Number(number)) => number.to_string(),
                    _ => required_str(arguments, "order_number")?.to_string(),
                };
                Ok(self.connector.order_status(&order_number).await?)
            }
            other => Err(ToolError::Refused(format!("commerce cannot handle `{other}`"))),
        }
    }
}
