use anyhow::{Context, Result};
use serde_json::Value;
use std::path::Path;
use tracing::info;

use super::data_loader::{load_scraped_recipes, preprocess_text};
use super::vector_store::{Metadata, VectorStore};
use crate::memory::content_digest;
use crate::scraping::ScrapedRecipe;

pub const RECIPES_COLLECTION: &str = "recipes";
pub const INDEX_BATCH_SIZE: usize = 32;

/// Text that gets embedded for a recipe.
pub fn recipe_text(recipe: &ScrapedRecipe) -> String {
    let text = [
        recipe.title.clone(),
        recipe.description.clone(),
        recipe.ingredients.join(" "),
        recipe.instructions.join(" "),
        recipe.cuisine.clone(),
        recipe.category.join(" "),
    ]
    .join(" ");
    preprocess_text(&text)
}

fn optional_minutes(value: Option<u32>) -> String {
    value.map_or_else(|| "None".to_string(), |m| m.to_string())
}

/// Flat, all-string metadata returned to the agent by `query_vectordb`.
pub fn recipe_metadata(recipe: &ScrapedRecipe) -> Metadata {
    let nutrients = match &recipe.nutrients {
        Value::Null => "\"\"".to_string(),
        other => other.to_string(),
    };
    [
        ("prep_time", optional_minutes(recipe.prep_time)),
        ("cook_time", optional_minutes(recipe.cook_time)),
        ("total_time", optional_minutes(recipe.total_time)),
        ("title", recipe.title.clone()),
        ("category", recipe.category.join(", ")),
        ("cuisine", recipe.cuisine.clone()),
        ("description", recipe.description.clone()),
        ("ingredients", recipe.ingredients.join(", ")),
        ("instructions", recipe.instructions.join(", ")),
        ("nutrients", nutrients),
        ("yields", recipe.yields.clone()),
        ("url", recipe.url.clone()),
    ]
    .into_iter()
    .map(|(key, value)| (key.to_string(), Value::String(value)))
    .collect()
}

/// Loads one scraped JSON file into the recipes collection. Recipes are keyed
/// by the digest of their URL, so re-indexing a file replaces its entries.
pub fn index_file(store: &VectorStore, path: &Path) -> Result<usize> {
    let mut collection = store.get_or_create_collection(RECIPES_COLLECTION)?;
    let batches = load_scraped_recipes(path, INDEX_BATCH_SIZE)?;
    let total_batches = batches.len();
    let mut indexed = 0;

    for (batch_index, batch) in batches.into_iter().enumerate() {
        let documents = batch.iter().map(recipe_text).collect();
        let metadatas = batch.iter().map(recipe_metadata).collect();
        let ids = batch.iter().map(|recipe| content_digest(&recipe.url)).collect();

        collection
            .add(documents, Some(metadatas), ids)
            .with_context(|| format!("Failed to index batch {} of {:?}", batch_index + 1, path))?;
        indexed += batch.len();
        info!(file = ?path, batch = batch_index + 1, total_batches, "Indexed batch");
    }

    info!(file = ?path, recipes = indexed, "All recipes inserted into the vector database");
    Ok(indexed)
}

/// Indexes every `*.json` file of a directory, in name order.
pub fn index_directory(store: &VectorStore, dir: &Path) -> Result<usize> {
    let mut files: Vec<_> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to list {:?}", dir))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some("json"))
        .collect();
    files.sort();

    let mut total = 0;
    for file in files {
        total += index_file(store, &file)?;
    }
    Ok(total)
}
