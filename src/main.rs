use anyhow::{Context, Result};
use reqwest::Client;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mealmatch::agent::{AgentResponse, EvaluationAgent, RecipeAgent};
use mealmatch::api_connection::ChatBackend;
use mealmatch::cli::{parse_args, Cli, Command};
use mealmatch::config::{Settings, EVALUATION_TEMPERATURE};
use mealmatch::memory::MemoryStore;
use mealmatch::scraping::{gather_links, read_link_file, scrape_all_links, site_scraper, POLITE_PAUSE, SITES};
use mealmatch::search::{
    index_directory, load_substitution_table, EmbeddingEngine, HashingEmbedder, TextEmbedder, VectorStore,
    RECIPES_COLLECTION,
};
use mealmatch::tools::{default_registry, AccessMemory, QueryVectorDb, ScrapeWebRecipe, SubstitutionFilter};

const QUIT_COMMAND: &str = "/quit";

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open_store(settings: &Settings, offline: bool) -> Result<VectorStore> {
    let embedder: Arc<dyn TextEmbedder> = if offline {
        Arc::new(HashingEmbedder::default())
    } else {
        info!("Loading embedding model (this may take a moment)...");
        Arc::new(EmbeddingEngine::new()?)
    };
    VectorStore::open(settings.store_dir(), embedder)
}

fn backend(settings: &Settings) -> Arc<dyn ChatBackend> {
    Arc::new(settings.provider())
}

fn build_agent(cli: &Cli, settings: &Settings) -> Result<RecipeAgent> {
    let store = open_store(settings, cli.offline)?;
    let memory = MemoryStore::open(&store)?.shared();
    let recipes = store.get_or_create_collection(RECIPES_COLLECTION)?;
    if recipes.is_empty() {
        warn!("The recipes collection is empty; run `mealmatch index` first");
    }

    let substitutions_path = settings.substitutions_path();
    let table = if substitutions_path.exists() {
        load_substitution_table(&substitutions_path)?
    } else {
        warn!(path = ?substitutions_path, "No substitution table found; substitutions will fall back to removal");
        Vec::new()
    };

    let tools = default_registry(
        QueryVectorDb::new(recipes),
        SubstitutionFilter::new(table),
        ScrapeWebRecipe::new(Client::new()),
        AccessMemory::new(memory.clone()),
    );
    Ok(RecipeAgent::new(
        backend(settings),
        tools,
        memory,
        cli.agent_config(settings),
    )?)
}

fn print_steps(steps: &[AgentResponse]) {
    for step in steps {
        if let AgentResponse::Tool(tool) = step {
            println!("[{}] {}", tool.tool_name, tool.text);
        }
    }
}

async fn run_chat(mut agent: RecipeAgent, add_to_memory: bool) -> Result<()> {
    println!("Ask for a recipe, mention any dietary needs. Type {} to leave.", QUIT_COMMAND);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let message = line.trim();
        if message.is_empty() {
            continue;
        }
        if message == QUIT_COMMAND {
            break;
        }

        match agent.respond(message, add_to_memory).await {
            Ok((response, steps)) => {
                print_steps(&steps);
                println!("\n{}\n", response.text);
            }
            Err(e) => eprintln!("\nError: {}\n", e),
        }
    }
    Ok(())
}

async fn scrape_recipes(settings: &Settings, batch_size: usize) -> Result<()> {
    let links_dir = settings.scraped_links_dir();
    let output_dir = settings.scraped_json_dir();
    fs::create_dir_all(&output_dir)
        .await
        .with_context(|| format!("Failed to create {:?}", output_dir))?;

    let mut link_files: Vec<_> = std::fs::read_dir(&links_dir)
        .with_context(|| format!("Failed to list link files in {:?}", links_dir))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some("txt"))
        .collect();
    link_files.sort();

    let client = Client::new();
    for link_file in link_files {
        let links = read_link_file(&link_file)?;
        info!(file = ?link_file, links = links.len(), "Scraping recipes");
        let scraped = scrape_all_links(&client, &links, batch_size).await;

        let stem = link_file
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("recipes");
        let output = output_dir.join(format!("{}.json", stem));
        fs::write(&output, serde_json::to_string_pretty(&scraped)?)
            .await
            .with_context(|| format!("Failed to write {:?}", output))?;
        info!(?output, recipes = scraped.len(), "Wrote scraped recipes");
    }
    Ok(())
}

async fn scrape_links(settings: &Settings, site: &str, output: Option<&Path>) -> Result<()> {
    let scraper = site_scraper(site)
        .with_context(|| format!("Unknown site '{}'; expected one of: {}", site, SITES.join(", ")))?;
    let output = match output {
        Some(path) => path.to_path_buf(),
        None => settings.scraped_links_dir().join(format!("{}.txt", site)),
    };
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent).await?;
    }

    let count = gather_links(&Client::new(), scraper.as_ref(), &output, POLITE_PAUSE).await?;
    println!("Collected {} links into {:?}", count, output);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cli = parse_args();
    init_tracing(&cli.log_level);
    let settings = cli.settings();

    match &cli.command {
        Command::Chat { no_memory } => {
            let agent = build_agent(&cli, &settings)?;
            run_chat(agent, !no_memory).await?;
        }
        Command::Ask { message, no_memory } => {
            let mut agent = build_agent(&cli, &settings)?;
            let (response, steps) = agent
                .respond(message, !no_memory)
                .await
                .context("Recipe agent failed")?;
            print_steps(&steps);
            println!("{}", response.text);
        }
        Command::Evaluate { recipe_file, criteria } => {
            let recipe = fs::read_to_string(recipe_file)
                .await
                .with_context(|| format!("Failed to read recipe file {:?}", recipe_file))?;
            let evaluator = EvaluationAgent::new(backend(&settings), settings.model.clone(), EVALUATION_TEMPERATURE);
            let verdict = evaluator
                .say(&recipe, criteria)
                .await
                .context("Evaluation failed")?;
            println!("{}", verdict);
        }
        Command::ScrapeLinks { site, output } => {
            scrape_links(&settings, site, output.as_deref()).await?;
        }
        Command::ScrapeRecipes { batch_size } => {
            scrape_recipes(&settings, *batch_size).await?;
        }
        Command::Index => {
            let store = open_store(&settings, cli.offline)?;
            let indexed = index_directory(&store, &settings.scraped_json_dir())?;
            println!("Indexed {} recipes into '{}'", indexed, RECIPES_COLLECTION);
        }
    }

    Ok(())
}
