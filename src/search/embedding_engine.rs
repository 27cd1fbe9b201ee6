use anyhow::{Context, Result};
use model2vec_rs::model::StaticModel;

pub const EMBEDDING_MODEL_ID: &str = "minishlab/potion-base-32M";

pub const EMBEDDING_DIMENSION: usize = 512;

/// Width of the vectors produced by [`HashingEmbedder`].
pub const HASHING_DIMENSION: usize = 256;

/// Turns text into fixed-width vectors for the vector store.
pub trait TextEmbedder: Send + Sync {
    fn dimension(&self) -> usize;

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text.to_string()])?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Failed to generate embedding for single text: {}", text))
    }
}

pub struct EmbeddingEngine {
    model: StaticModel,
    dimension: usize,
}

impl EmbeddingEngine {
    pub fn new() -> Result<Self> {
        Self::from_pretrained(EMBEDDING_MODEL_ID)
    }

    pub fn from_pretrained(model_id: &str) -> Result<Self> {
        let model = StaticModel::from_pretrained(model_id, None, None, None)
            .with_context(|| format!("Failed to load embedding model '{}'", model_id))?;

        // model2vec does not expose the width; embed one string to read it.
        let dimension = model
            .encode(&["dimension".to_string()])
            .first()
            .map(Vec::len)
            .unwrap_or(EMBEDDING_DIMENSION);

        Ok(Self { model, dimension })
    }
}

impl TextEmbedder for EmbeddingEngine {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.model.encode(texts))
    }
}

/// Feature-hashed bag of words. Needs no model download, so it backs
/// `--offline` runs and the tests; similarity is purely lexical.
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension: dimension.max(1) }
    }

    fn bucket(&self, token: &str) -> usize {
        // FNV-1a
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in token.bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        (hash % self.dimension as u64) as usize
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(HASHING_DIMENSION)
    }
}

impl TextEmbedder for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut vector = vec![0.0; self.dimension];
                for token in text
                    .split(|c: char| !c.is_alphanumeric())
                    .filter(|token| !token.is_empty())
                {
                    vector[self.bucket(&token.to_lowercase())] += 1.0;
                }
                vector
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore] // This test downloads a model and might be slow/network-dependent
    fn test_embedding_engine_init_and_embed() -> Result<()> {
        let engine = EmbeddingEngine::new()?;
        assert_eq!(engine.dimension(), EMBEDDING_DIMENSION);

        let sentences = vec!["banana bread".to_string(), "vegan lasagna".to_string()];
        let embeddings = engine.embed(&sentences)?;
        assert_eq!(embeddings.len(), 2);
        assert_eq!(embeddings[0].len(), EMBEDDING_DIMENSION);

        let single_embedding = engine.embed_one("eggless muffins")?;
        assert_eq!(single_embedding.len(), EMBEDDING_DIMENSION);
        Ok(())
    }

    #[test]
    fn hashing_embedder_is_deterministic_and_case_insensitive() -> Result<()> {
        let embedder = HashingEmbedder::default();
        let a = embedder.embed_one("Banana Bread")?;
        let b = embedder.embed_one("banana bread")?;
        assert_eq!(a.len(), HASHING_DIMENSION);
        assert_eq!(a, b);
        assert_eq!(a.iter().sum::<f32>(), 2.0);
        Ok(())
    }

    #[test]
    fn hashing_embedder_handles_empty_text() -> Result<()> {
        let embedder = HashingEmbedder::new(8);
        let v = embedder.embed_one("  !! ")?;
        assert!(v.iter().all(|&x| x == 0.0));
        Ok(())
    }
}
