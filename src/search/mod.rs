pub mod data_loader;
pub mod embedding_engine;
pub mod recipe_index;
pub mod vector_store;

pub use data_loader::{load_scraped_recipes, load_substitution_table, SubstitutionRecord};
pub use embedding_engine::{EmbeddingEngine, HashingEmbedder, TextEmbedder, EMBEDDING_DIMENSION};
pub use recipe_index::{index_directory, index_file, RECIPES_COLLECTION};
pub use vector_store::{Collection, Metadata, QueryResult, VectorStore};
