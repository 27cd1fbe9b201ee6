//! Recipe extraction from arbitrary web pages.
//!
//! Recipe sites almost universally embed a schema.org `Recipe` object as
//! JSON-LD for search engines; that object is what gets read here.

use anyhow::{anyhow, Context, Result};
use futures::future::join_all;
use reqwest::Client;
use scraper::{Html, Selector};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Per-request timeout of the batch pipeline.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_BATCH_SIZE: usize = 10;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScrapedRecipe {
    #[serde(default)]
    pub prep_time: Option<u32>,
    #[serde(default)]
    pub cook_time: Option<u32>,
    #[serde(default)]
    pub total_time: Option<u32>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub category: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub cuisine: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub ingredients: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub instructions: Vec<String>,
    #[serde(default)]
    pub nutrients: Value,
    #[serde(default, deserialize_with = "null_as_default")]
    pub yields: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub url: String,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Parses the page and returns its recipe, or an error when the page
/// carries no schema.org `Recipe`.
pub fn scrape_html(html: &str, url: &str) -> Result<ScrapedRecipe> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(r#"script[type="application/ld+json"]"#)
        .map_err(|e| anyhow!("Invalid JSON-LD selector: {}", e))?;

    let recipe = document
        .select(&selector)
        .filter_map(|script| {
            let raw = script.text().collect::<String>();
            serde_json::from_str::<Value>(raw.trim()).ok()
        })
        .find_map(|value| find_recipe_node(&value).cloned())
        .ok_or_else(|| anyhow!("No schema.org Recipe found at {}", url))?;

    Ok(ScrapedRecipe {
        prep_time: recipe.get("prepTime").and_then(duration_minutes),
        cook_time: recipe.get("cookTime").and_then(duration_minutes),
        total_time: recipe.get("totalTime").and_then(duration_minutes),
        title: recipe.get("name").map(text_of).unwrap_or_default(),
        category: recipe.get("recipeCategory").map(split_list).unwrap_or_default(),
        cuisine: recipe
            .get("recipeCuisine")
            .map(|v| split_list(v).join(", "))
            .unwrap_or_default(),
        description: recipe.get("description").map(text_of).unwrap_or_default(),
        ingredients: recipe
            .get("recipeIngredient")
            .or_else(|| recipe.get("ingredients"))
            .map(string_list)
            .unwrap_or_default(),
        instructions: recipe
            .get("recipeInstructions")
            .map(|v| {
                let mut steps = Vec::new();
                collect_instructions(v, &mut steps);
                steps
            })
            .unwrap_or_default(),
        nutrients: recipe.get("nutrition").map(nutrients_of).unwrap_or(Value::Null),
        yields: recipe.get("recipeYield").map(yields_of).unwrap_or_default(),
        url: url.to_string(),
    })
}

fn is_recipe_type(node: &Value) -> bool {
    match node.get("@type") {
        Some(Value::String(t)) => t == "Recipe",
        Some(Value::Array(types)) => types.iter().any(|t| t == "Recipe"),
        _ => false,
    }
}

fn find_recipe_node(value: &Value) -> Option<&Value> {
    match value {
        Value::Array(items) => items.iter().find_map(find_recipe_node),
        Value::Object(map) => {
            if is_recipe_type(value) {
                return Some(value);
            }
            map.get("@graph").and_then(find_recipe_node)
        }
        _ => None,
    }
}

fn clean(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => clean(s),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items.first().map(text_of).unwrap_or_default(),
        Value::Object(map) => map.get("text").or_else(|| map.get("name")).map(text_of).unwrap_or_default(),
        _ => String::new(),
    }
}

fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(text_of)
            .filter(|s| !s.is_empty())
            .collect(),
        other => {
            let single = text_of(other);
            if single.is_empty() { Vec::new() } else { vec![single] }
        }
    }
}

/// Comma-separated strings and arrays both become a flat list.
fn split_list(value: &Value) -> Vec<String> {
    string_list(value)
        .iter()
        .flat_map(|s| s.split(','))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn collect_instructions(value: &Value, steps: &mut Vec<String>) {
    match value {
        Value::String(s) => steps.extend(s.lines().map(clean).filter(|line| !line.is_empty())),
        Value::Array(items) => items.iter().for_each(|item| collect_instructions(item, steps)),
        Value::Object(map) => {
            // HowToSection nests its HowToSteps.
            if let Some(inner) = map.get("itemListElement") {
                collect_instructions(inner, steps);
            } else if let Some(text) = map.get("text").or_else(|| map.get("name")) {
                collect_instructions(text, steps);
            }
        }
        _ => {}
    }
}

fn nutrients_of(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| !key.starts_with('@'))
                .map(|(key, v)| (key.clone(), Value::String(text_of(v))))
                .collect(),
        ),
        _ => Value::Null,
    }
}

fn yields_of(value: &Value) -> String {
    let text = text_of(value);
    if !text.is_empty() && text.chars().all(|c| c.is_ascii_digit()) {
        let servings = if text == "1" { "serving" } else { "servings" };
        format!("{} {}", text, servings)
    } else {
        text
    }
}

fn duration_minutes(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|m| u32::try_from(m).ok()),
        Value::String(s) => parse_iso_duration(s),
        _ => None,
    }
}

/// Minutes in an ISO-8601 duration such as `PT1H30M` or `P0DT0H15M`.
/// Bare integers are taken as minutes already.
pub fn parse_iso_duration(text: &str) -> Option<u32> {
    let text = text.trim();
    if let Ok(minutes) = text.parse::<u32>() {
        return Some(minutes);
    }
    let rest = text.strip_prefix('P').or_else(|| text.strip_prefix('p'))?;

    let mut seconds = 0.0_f64;
    let mut in_time = false;
    let mut number = String::new();
    for c in rest.chars() {
        match c.to_ascii_uppercase() {
            'T' => in_time = true,
            d if d.is_ascii_digit() || d == '.' => number.push(d),
            unit => {
                let amount: f64 = number.parse().ok()?;
                number.clear();
                seconds += amount
                    * match (unit, in_time) {
                        ('W', false) => 604_800.0,
                        ('D', false) => 86_400.0,
                        ('H', true) => 3_600.0,
                        ('M', true) => 60.0,
                        ('S', true) => 1.0,
                        // Years and months have no place in a recipe.
                        _ => return None,
                    };
            }
        }
    }
    if !number.is_empty() {
        return None;
    }
    Some((seconds / 60.0).round() as u32)
}

fn error_payload(error: String, link: &str) -> Value {
    json!({ "error": error, "attempted_url": link })
}

/// Fetches `link` and scrapes it. Failures of any kind come back as an
/// `{"error", "attempted_url"}` payload instead of an `Err`.
pub async fn fetch_and_scrape(client: &Client, link: &str, timeout: Option<Duration>) -> Value {
    let mut request = client.get(link);
    if let Some(timeout) = timeout {
        request = request.timeout(timeout);
    }

    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            warn!(url = link, error = %e, "Recipe fetch failed");
            return error_payload(format!("Request error: {}", e), link);
        }
    };

    let status = response.status();
    if status != reqwest::StatusCode::OK {
        debug!(url = link, %status, "Recipe page returned non-200");
        return error_payload(format!("HTTP {}", status.as_u16()), link);
    }

    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => return error_payload(format!("Request error: {}", e), link),
    };

    match scrape_html(&body, link).and_then(|recipe| Ok(serde_json::to_value(recipe)?)) {
        Ok(value) => value,
        Err(e) => error_payload(e.to_string(), link),
    }
}

/// Scrapes `links` in batches of `batch_size` concurrent requests. The output
/// is in input order, one entry per link.
pub async fn scrape_all_links(client: &Client, links: &[String], batch_size: usize) -> Vec<Value> {
    let batch_size = batch_size.max(1);
    let total_batches = links.len().div_ceil(batch_size);
    let mut results = Vec::with_capacity(links.len());

    for (batch_index, batch) in links.chunks(batch_size).enumerate() {
        let fetches = batch
            .iter()
            .map(|link| fetch_and_scrape(client, link, Some(FETCH_TIMEOUT)));
        results.extend(join_all(fetches).await);
        info!(batch = batch_index + 1, total_batches, "Scraping recipes");
    }

    results
}

/// Link files hold one URL per line; blank lines are ignored.
pub fn read_link_file(path: &std::path::Path) -> Result<Vec<String>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read link file {:?}", path))?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}
