use anyhow::{Context, Result};
use csv::ReaderBuilder;
use std::collections::BTreeMap;
use std::path::Path;

use crate::scraping::recipe_page::ScrapedRecipe;

/// Column (or key) naming the ingredient a substitution applies to.
pub const INGREDIENT_FIELD: &str = "Ingredient";

/// One row of the substitution table. Keys are kept sorted so two records
/// with the same fields compare and serialize identically.
pub type SubstitutionRecord = BTreeMap<String, serde_json::Value>;

/// Loads a scraped-recipes JSON file (an array written by `scrape-recipes`)
/// and splits it into batches. Entries carrying an `"error"` key are failed
/// fetches and are dropped.
pub fn load_scraped_recipes(json_path: &Path, batch_size: usize) -> Result<Vec<Vec<ScrapedRecipe>>> {
    let contents = std::fs::read_to_string(json_path)
        .with_context(|| format!("Failed to read scraped recipes at {:?}", json_path))?;
    let entries: Vec<serde_json::Value> = serde_json::from_str(&contents)
        .with_context(|| format!("Scraped recipes at {:?} are not a JSON array", json_path))?;

    let mut recipes = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        if entry.get("error").is_some() {
            continue;
        }
        let recipe: ScrapedRecipe = serde_json::from_value(entry)
            .with_context(|| format!("Malformed recipe at index {} in {:?}", index, json_path))?;
        recipes.push(recipe);
    }

    Ok(recipes
        .chunks(batch_size.max(1))
        .map(<[ScrapedRecipe]>::to_vec)
        .collect())
}

/// Lowercases, strips ASCII punctuation and collapses whitespace.
pub fn preprocess_text(text: &str) -> String {
    let lowered: String = text
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_ascii_punctuation())
        .collect();
    lowered.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Reads the substitution table from either a JSON array of objects or a CSV
/// file with a header row, depending on the extension.
pub fn load_substitution_table(path: &Path) -> Result<Vec<SubstitutionRecord>> {
    if !path.exists() {
        return Err(anyhow::anyhow!("Substitution table not found at: {:?}", path));
    }

    let is_csv = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));

    if is_csv {
        load_substitution_csv(path)
    } else {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read substitution table at {:?}", path))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Error loading substitutions data from {:?}", path))
    }
}

fn load_substitution_csv(path: &Path) -> Result<Vec<SubstitutionRecord>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open substitution CSV at {:?}", path))?;
    let mut rdr = ReaderBuilder::new().has_headers(true).from_reader(file);

    let headers = rdr.headers()?.clone();
    if !headers.iter().any(|h| h == INGREDIENT_FIELD) {
        return Err(anyhow::anyhow!("Column '{}' not found", INGREDIENT_FIELD));
    }

    let mut table = Vec::new();
    for (row_index, result) in rdr.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read record at row index {}", row_index))?;
        let row: SubstitutionRecord = headers
            .iter()
            .zip(record.iter())
            .map(|(header, value)| {
                (header.to_string(), serde_json::Value::String(value.trim().to_string()))
            })
            .collect();
        table.push(row);
    }
    Ok(table)
}
