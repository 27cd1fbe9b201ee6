use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{AgentConfig, Settings, DEFAULT_API_KEY_VAR};
use crate::scraping::DEFAULT_BATCH_SIZE;

#[derive(Parser, Debug)]
#[command(author, version, about = "Diet-aware recipe assistant", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Chat model identifier (defaults to MEALMATCH_MODEL or Llama 3.1 8B)
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Sampling temperature for the recipe agent
    #[arg(long, global = true)]
    pub temperature: Option<f32>,

    /// Maximum tool-resolution rounds per turn
    #[arg(long, global = true)]
    pub max_iterations: Option<usize>,

    /// Directory holding the vector store, substitution table and scraped data
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Environment variable that holds the API key
    #[arg(long, global = true, default_value = DEFAULT_API_KEY_VAR)]
    pub api_key_env: String,

    /// Log filter used when RUST_LOG is unset (e.g. "debug", "mealmatch=trace")
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Use the built-in hashing embedder instead of downloading a model
    #[arg(long, global = true)]
    pub offline: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Interactive conversation with the recipe agent (type /quit to leave)
    Chat {
        /// Do not store responses in conversation memory
        #[arg(long)]
        no_memory: bool,
    },
    /// Single question; prints the answer and the steps taken
    Ask {
        message: String,
        #[arg(long)]
        no_memory: bool,
    },
    /// Check a recipe against dietary criteria
    Evaluate {
        #[arg(short, long)]
        recipe_file: PathBuf,
        #[arg(short, long)]
        criteria: String,
    },
    /// Collect recipe links from one site's listing pages
    ScrapeLinks {
        /// Site key, e.g. "beyond_frosting" or "food"
        site: String,
        /// Defaults to <data-dir>/scraped_links/<site>.txt
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Scrape every link file into <data-dir>/scraped_json
    ScrapeRecipes {
        #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,
    },
    /// Load scraped recipes into the recipes collection
    Index,
}

impl Cli {
    /// Environment settings with command-line overrides applied.
    pub fn settings(&self) -> Settings {
        let mut settings = Settings::from_env();
        settings.api_key_env = self.api_key_env.clone();
        if let Some(model) = &self.model {
            settings.model = model.clone();
        }
        if let Some(dir) = &self.data_dir {
            settings.data_dir = dir.clone();
        }
        settings
    }

    pub fn agent_config(&self, settings: &Settings) -> AgentConfig {
        let defaults = AgentConfig::default();
        AgentConfig {
            model: settings.model.clone(),
            temperature: self.temperature.unwrap_or(defaults.temperature),
            max_internal_iteration: self.max_iterations.unwrap_or(defaults.max_internal_iteration),
        }
    }
}

pub fn parse_args() -> Cli {
    Cli::parse()
}
