//! Collecting recipe URLs from the listing pages of recipe sites.
//!
//! Each site is a [`LinkScraper`]: it knows how to page through its listing
//! and how to pull recipe links out of one fetched page. [`gather_links`]
//! drives any of them.

use anyhow::{bail, Context, Result};
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, StatusCode};
use scraper::{Html, Selector};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Headers copied from a desktop browser; several sites reject bare clients.
pub const BROWSER_HEADERS: &[(&str, &str)] = &[
    ("User-Agent", "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36"),
    ("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7"),
    ("Accept-Language", "en-US,en;q=0.9"),
    ("Cache-Control", "no-cache"),
    ("Upgrade-Insecure-Requests", "1"),
    ("Sec-Fetch-Dest", "document"),
    ("Sec-Fetch-Mode", "navigate"),
    ("Sec-Fetch-Site", "none"),
    ("Sec-Fetch-User", "?1"),
    ("Sec-Ch-Ua", "\"Google Chrome\";v=\"131\", \"Chromium\";v=\"131\", \"Not_A Brand\";v=\"24\""),
];

const CHECKPOINT_EVERY: usize = 100;
/// Delay taken every `sleep_rate` listing pages.
pub const POLITE_PAUSE: Duration = Duration::from_secs(3);

pub trait LinkScraper: Send + Sync {
    fn name(&self) -> &str;

    /// Listing URL with a `{page}` placeholder; pages are 1-based.
    fn base_link(&self) -> &str;

    fn num_pages(&self) -> usize;

    /// Pause after every `sleep_rate` pages.
    fn sleep_rate(&self) -> usize {
        10
    }

    /// Whether a 200 response is really the site asking us to back off.
    fn is_throttled(&self, _page_content: &str) -> bool {
        false
    }

    fn extract_links(&self, page_content: &str) -> Vec<String>;

    fn page_url(&self, page: usize) -> String {
        self.base_link().replace("{page}", &page.to_string())
    }

    /// Sites without numbered listings name an index page instead; the
    /// listing pages are then read from it with [`Self::extract_listing_pages`].
    fn index_page(&self) -> Option<&str> {
        None
    }

    fn extract_listing_pages(&self, _index_content: &str) -> Vec<String> {
        Vec::new()
    }
}

/// Every `a[href]` under the first element matching `scope`, deduplicated in
/// document order.
fn scoped_hrefs(html: &str, scope: &str) -> Vec<String> {
    let Ok(selector) = Selector::parse(&format!("{} a[href]", scope)) else {
        warn!(scope, "Invalid link scope selector");
        return Vec::new();
    };
    let document = Html::parse_document(html);
    let mut seen = BTreeSet::new();
    document
        .select(&selector)
        .filter_map(|anchor| anchor.value().attr("href"))
        .filter(|href| seen.insert(href.to_string()))
        .map(str::to_string)
        .collect()
}

/// An HTML listing where every recipe link is found through CSS selectors:
/// `container` picks one element per recipe, `link` (if set) picks the
/// anchor inside it, otherwise the container is the anchor.
#[derive(Debug, Clone)]
pub struct SelectorLinkScraper {
    pub name: &'static str,
    pub base_link: &'static str,
    pub num_pages: usize,
    pub sleep_rate: usize,
    pub container: &'static str,
    pub link: Option<&'static str>,
    /// Prepended to relative hrefs.
    pub link_prefix: Option<&'static str>,
    pub throttle_marker: Option<&'static str>,
}

impl LinkScraper for SelectorLinkScraper {
    fn name(&self) -> &str {
        self.name
    }

    fn base_link(&self) -> &str {
        self.base_link
    }

    fn num_pages(&self) -> usize {
        self.num_pages
    }

    fn sleep_rate(&self) -> usize {
        self.sleep_rate
    }

    fn is_throttled(&self, page_content: &str) -> bool {
        self.throttle_marker
            .is_some_and(|marker| page_content.trim() == marker)
    }

    fn extract_links(&self, page_content: &str) -> Vec<String> {
        let (Ok(container), link) = (
            Selector::parse(self.container),
            self.link.map(Selector::parse).transpose(),
        ) else {
            warn!(site = self.name, "Invalid container selector");
            return Vec::new();
        };
        let Ok(link) = link else {
            warn!(site = self.name, "Invalid link selector");
            return Vec::new();
        };

        let document = Html::parse_document(page_content);
        document
            .select(&container)
            .filter_map(|element| match &link {
                Some(link) => element.select(link).next(),
                None => Some(element),
            })
            .filter_map(|anchor| anchor.value().attr("href"))
            .map(|href| match self.link_prefix {
                Some(prefix) if href.starts_with('/') => format!("{}{}", prefix, href),
                _ => href.to_string(),
            })
            .collect()
    }
}

/// food.com serves its listing through an XML search API.
#[derive(Debug, Clone, Copy, Default)]
pub struct FoodDotComLinkScraper;

impl LinkScraper for FoodDotComLinkScraper {
    fn name(&self) -> &str {
        "food"
    }

    fn base_link(&self) -> &str {
        "https://api.food.com/services/mobile/fdc/search/sectionfront?pn={page}&recordType=Recipe&collectionId=17/"
    }

    fn num_pages(&self) -> usize {
        20000
    }

    fn sleep_rate(&self) -> usize {
        50
    }

    /// Unescaped text of every `results/record_url`. A malformed document
    /// yields the links read before the error.
    fn extract_links(&self, page_content: &str) -> Vec<String> {
        let mut reader = Reader::from_str(page_content);
        let mut path: Vec<Vec<u8>> = Vec::new();
        let mut current: Option<String> = None;
        let mut links = Vec::new();

        loop {
            match reader.read_event() {
                Ok(Event::Start(start)) => {
                    let name = start.name().as_ref().to_vec();
                    if name == b"record_url" && path.last().is_some_and(|parent| parent == b"results") {
                        current = Some(String::new());
                    }
                    path.push(name);
                }
                Ok(Event::End(end)) => {
                    if end.name().as_ref() == b"record_url" {
                        if let Some(url) = current.take() {
                            let url = url.trim();
                            if !url.is_empty() {
                                links.push(url.to_string());
                            }
                        }
                    }
                    path.pop();
                }
                Ok(Event::Text(text)) => {
                    if let Some(url) = current.as_mut() {
                        match text.unescape() {
                            Ok(unescaped) => url.push_str(&unescaped),
                            Err(e) => warn!(error = %e, "Undecodable record_url text"),
                        }
                    }
                }
                Ok(Event::CData(data)) => {
                    if let Some(url) = current.as_mut() {
                        url.push_str(&String::from_utf8_lossy(&data));
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    warn!(
                        position = reader.buffer_position(),
                        error = %e,
                        "Malformed food.com listing"
                    );
                    break;
                }
                Ok(_) => {}
            }
        }
        links
    }
}

const ALL_RECIPES_INDEX: &str = "https://www.allrecipes.com/recipes-a-z-6735880";

/// allrecipes has no paged listing: its A-Z index links to topic pages, and
/// each topic page lists recipes.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllRecipesLinkScraper;

impl LinkScraper for AllRecipesLinkScraper {
    fn name(&self) -> &str {
        "all_recipes"
    }

    fn base_link(&self) -> &str {
        ALL_RECIPES_INDEX
    }

    /// Unknown until the index is read.
    fn num_pages(&self) -> usize {
        0
    }

    fn extract_links(&self, page_content: &str) -> Vec<String> {
        scoped_hrefs(page_content, "div#mntl-taxonomysc-article-list-group_1-0")
    }

    fn index_page(&self) -> Option<&str> {
        Some(ALL_RECIPES_INDEX)
    }

    fn extract_listing_pages(&self, index_content: &str) -> Vec<String> {
        scoped_hrefs(index_content, "div#mntl-alphabetical-list_1-0")
    }
}

pub const SITES: &[&str] = &[
    "celebrating_sweets",
    "beyond_frosting",
    "eat_live_run",
    "better_food_guru",
    "bowl_of_delicious",
    "all_the_healthy_things",
    "food_republic",
    "food",
    "all_recipes",
];

fn selector_site(
    name: &'static str,
    base_link: &'static str,
    num_pages: usize,
    container: &'static str,
    link: Option<&'static str>,
) -> SelectorLinkScraper {
    SelectorLinkScraper {
        name,
        base_link,
        num_pages,
        sleep_rate: 10,
        container,
        link,
        link_prefix: None,
        throttle_marker: None,
    }
}

/// Looks up one of the [`SITES`].
pub fn site_scraper(name: &str) -> Option<Box<dyn LinkScraper>> {
    let scraper: Box<dyn LinkScraper> = match name {
        "celebrating_sweets" => Box::new(selector_site(
            "celebrating_sweets",
            "https://celebratingsweets.com/category/all-recipes/page/{page}/",
            12,
            "a.entry-title-link",
            None,
        )),
        "beyond_frosting" => Box::new(selector_site(
            "beyond_frosting",
            "https://beyondfrosting.com/finder/?_paged={page}/",
            41,
            "div.post-thumb-img-content.post-thumb",
            Some("a[href]"),
        )),
        "eat_live_run" => Box::new(selector_site(
            "eat_live_run",
            "https://www.eatliverun.com/recipes/{page}",
            1,
            "li",
            Some("a[href]"),
        )),
        "better_food_guru" => Box::new(selector_site(
            "better_food_guru",
            "https://betterfoodguru.com/category/recipes/page/{page}/",
            5,
            "li.listing-item",
            Some("a[href]:not([class])"),
        )),
        "bowl_of_delicious" => Box::new(selector_site(
            "bowl_of_delicious",
            "https://www.bowlofdelicious.com/category/recipes/page/{page}/",
            26,
            "a.entry-image-link",
            None,
        )),
        "all_the_healthy_things" => Box::new(selector_site(
            "all_the_healthy_things",
            "https://allthehealthythings.com/recipe-index/?fwp_paged={page}",
            59,
            "a.entry-title",
            None,
        )),
        "food_republic" => Box::new(SelectorLinkScraper {
            link_prefix: Some("https://www.foodrepublic.com"),
            throttle_marker: Some("0"),
            sleep_rate: 100,
            ..selector_site(
                "food_republic",
                "https://www.foodrepublic.com/category/recipes/?ajax=1&offset={page}",
                286,
                "div.read-more",
                Some("a[href]"),
            )
        }),
        "food" => Box::new(FoodDotComLinkScraper),
        "all_recipes" => Box::new(AllRecipesLinkScraper),
        _ => return None,
    };
    Some(scraper)
}

pub fn browser_headers() -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for (name, value) in BROWSER_HEADERS {
        headers.insert(
            HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("Invalid header name {}", name))?,
            HeaderValue::from_str(value).with_context(|| format!("Invalid value for header {}", name))?,
        );
    }
    Ok(headers)
}

fn write_links(path: &Path, links: &BTreeSet<String>) -> Result<()> {
    let joined = links.iter().map(String::as_str).collect::<Vec<_>>().join("\n");
    std::fs::write(path, joined).with_context(|| format!("Failed to write links to {:?}", path))
}

async fn fetch_page(client: &Client, url: &str, headers: &HeaderMap) -> Option<(StatusCode, String)> {
    match client.get(url).headers(headers.clone()).send().await {
        Ok(response) => {
            let status = response.status();
            match response.text().await {
                Ok(body) => Some((status, body)),
                Err(e) => {
                    warn!(%url, %status, error = %e, "Failed to read listing page body");
                    None
                }
            }
        }
        Err(e) => {
            warn!(%url, error = %e, "Listing page request failed");
            None
        }
    }
}

/// Listing page URLs for `scraper`: numbered pages, or the deduplicated
/// links found on its index page.
async fn listing_pages(client: &Client, scraper: &dyn LinkScraper, headers: &HeaderMap) -> Result<Vec<String>> {
    let Some(index) = scraper.index_page() else {
        return Ok((1..=scraper.num_pages()).map(|page| scraper.page_url(page)).collect());
    };
    match fetch_page(client, index, headers).await {
        Some((status, body)) if status == StatusCode::OK => {
            let pages = scraper.extract_listing_pages(&body);
            info!(site = scraper.name(), pages = pages.len(), "Read listing pages from index");
            Ok(pages)
        }
        Some((status, _)) => bail!("Index page {} answered {}", index, status),
        None => bail!("Index page {} could not be fetched", index),
    }
}

/// Walks every listing page of `scraper`, writing the de-duplicated links to
/// `output` (with a checkpoint every hundred pages). `pause` is the polite
/// delay taken every `sleep_rate` pages. Returns the number of links.
pub async fn gather_links(
    client: &Client,
    scraper: &dyn LinkScraper,
    output: &Path,
    pause: Duration,
) -> Result<usize> {
    let headers = browser_headers()?;
    let mut all_links = BTreeSet::new();
    let pages = listing_pages(client, scraper, &headers).await?;

    for (page, url) in pages.iter().enumerate() {
        let mut fetched = fetch_page(client, url, &headers).await;

        // Throttled responses get one retry after a longer pause.
        if matches!(&fetched, Some((status, body)) if status.is_success() && scraper.is_throttled(body)) {
            tokio::time::sleep(pause * 2).await;
            fetched = fetch_page(client, url, &headers).await;
        }

        match fetched {
            Some((status, body)) if status == StatusCode::OK => {
                all_links.extend(scraper.extract_links(&body));
                debug!(
                    site = scraper.name(),
                    page = page + 1,
                    %status,
                    links = all_links.len(),
                    "Scraped listing page"
                );
            }
            Some((status, body)) => {
                let preview: String = body.chars().take(200).collect();
                warn!(
                    site = scraper.name(),
                    page = page + 1,
                    %status,
                    body = %preview,
                    "Listing page rejected"
                );
            }
            None => {}
        }

        if page % scraper.sleep_rate().max(1) == 0 {
            tokio::time::sleep(pause).await;
        }
        if page % CHECKPOINT_EVERY == 0 {
            write_links(output, &all_links)?;
        }
    }

    write_links(output, &all_links)?;
    info!(site = scraper.name(), links = all_links.len(), ?output, "Finished gathering links");
    Ok(all_links.len())
}
