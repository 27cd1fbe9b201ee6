pub mod link_scrapers;
pub mod recipe_page;

pub use link_scrapers::{gather_links, site_scraper, LinkScraper, POLITE_PAUSE, SITES};
pub use recipe_page::{
    fetch_and_scrape, read_link_file, scrape_all_links, scrape_html, ScrapedRecipe, DEFAULT_BATCH_SIZE,
};
