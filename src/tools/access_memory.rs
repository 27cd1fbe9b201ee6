use async_trait::async_trait;
use serde_json::Value;

use super::{optional_usize, required_str, ToolArguments, ToolError, ToolFunction};
use crate::memory::{self, SharedMemory};

/// Recalls earlier agent responses by similarity to the query.
pub struct AccessMemory {
    memory: SharedMemory,
}

impl AccessMemory {
    pub fn new(memory: SharedMemory) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl ToolFunction for AccessMemory {
    async fn call(&self, arguments: &ToolArguments) -> Result<Value, ToolError> {
        let query = required_str(arguments, "query")?;
        let n_results = optional_usize(arguments, "n_results", 1)?;
        let documents = memory::lock(&self.memory)?.query(query, n_results)?;
        Ok(Value::from(documents))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::search::{HashingEmbedder, VectorStore};
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn recalls_stored_responses() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let store = VectorStore::open(dir.path(), Arc::new(HashingEmbedder::default()))?;
        let shared = MemoryStore::reset(&store)?.shared();
        let tool = AccessMemory::new(shared.clone());

        let args = json!({"query": "banana bread"});
        assert_eq!(tool.call(args.as_object().unwrap()).await?, json!([]));

        memory::lock(&shared)?.add("Eggless banana bread with flax")?;
        assert_eq!(
            tool.call(args.as_object().unwrap()).await?,
            json!(["Eggless banana bread with flax"])
        );
        Ok(())
    }
}
