use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{optional_usize, required_str, ToolArguments, ToolError, ToolFunction};
use crate::search::Collection;

/// Recipe similarity search over the indexed `recipes` collection. Returns the
/// metadata records of the closest recipes, best first.
pub struct QueryVectorDb {
    recipes: Collection,
}

impl QueryVectorDb {
    pub fn new(recipes: Collection) -> Self {
        Self { recipes }
    }
}

#[async_trait]
impl ToolFunction for QueryVectorDb {
    async fn call(&self, arguments: &ToolArguments) -> Result<Value, ToolError> {
        let query = required_str(arguments, "query")?;
        let n_results = optional_usize(arguments, "n_results", 1)?;

        let result = self.recipes.query(&[query.to_string()], n_results)?;
        let metadatas: Vec<Value> = result
            .metadatas
            .into_iter()
            .next()
            .unwrap_or_default()
            .into_iter()
            .map(Value::Object)
            .collect();
        debug!(query, hits = metadatas.len(), "Recipe search");
        Ok(Value::Array(metadatas))
    }
}
