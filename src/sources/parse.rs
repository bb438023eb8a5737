//! HTML parsing strategies for the scraped search surface.
//!
//! [`PrimaryParser`] reads the structured result blocks. When it finds
//! nothing and the page does not say "no results", the client falls back to
//! [`AlternativeParser`], which salvages title-like hyperlink texts as
//! low-confidence results. The field validators live here too.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::models::{clamp_unit, ScholarResult, ScholarResultBuilder};
use crate::utils::find_doi;

/// Source id stamped on results parsed from the scraped surface
pub const SCHOLAR_SOURCE_ID: &str = "scholar";

const ALTERNATIVE_CONFIDENCE: f64 = 0.2;
const MIN_ABSTRACT_LEN: usize = 20;
const MIN_TITLE_LEN: usize = 15;
const MAX_TITLE_LEN: usize = 300;
const MIN_TITLE_WORDS: usize = 3;

const NO_RESULTS_MARKERS: &[&str] = &[
    "did not match any articles",
    "your search did not match",
    "no results found",
    "no articles found",
    "found 0 results",
    "no matching articles",
];

const BLOCK_PAGE_MARKERS: &[&str] = &["gs_captcha", "g-recaptcha", "/sorry/index"];

const BLOCK_TEXT_MARKERS: &[&str] = &["unusual traffic", "not a robot", "automated queries"];

const PLACEHOLDER_ABSTRACTS: &[&str] = &[
    "no abstract available",
    "abstract not available",
    "abstract unavailable",
    "[no abstract available]",
    "click here to view the abstract",
];

const NAV_WORDS: &[&str] = &[
    "home", "search", "about", "settings", "help", "privacy", "terms", "sign", "login", "log",
    "in", "out", "my", "library", "profile", "profiles", "alert", "alerts", "metrics",
    "advanced", "next", "previous", "prev", "more", "cited", "by", "related", "articles",
    "versions", "version", "all", "create", "cite", "save", "saved", "images", "maps", "news",
    "scholar", "google", "feedback", "english", "language", "since", "any", "time", "sort",
    "relevance", "date", "include", "patents", "citations", "pdf", "html", "view", "as", "show",
    "hide", "menu", "back", "top", "page", "the", "and", "of", "to", "a", "for", "your",
];

const STOP_WORDS: &[&str] = &["the", "and", "for", "with", "from", "into", "that", "this"];

static CITED_BY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)cited by\s+(\d+)").expect("cited-by pattern is valid"));

static YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(1[5-9]\d{2}|20\d{2})\b").expect("year pattern is valid"));

static TITLE_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*\[(?:PDF|HTML|BOOK|B|CITATION|C|DOC)\]\s*").expect("title tag pattern is valid")
});

static NAV_PHRASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(cited by \d+|related articles|all \d+ versions|view as html|\[(pdf|html)\])")
        .expect("navigation pattern is valid")
});

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("result page selector is valid")
}

struct PrimarySelectors {
    result: Selector,
    title: Selector,
    title_link: Selector,
    byline: Selector,
    snippet: Selector,
    footer_link: Selector,
}

static PRIMARY: LazyLock<PrimarySelectors> = LazyLock::new(|| PrimarySelectors {
    result: selector("div.gs_ri"),
    title: selector("h3.gs_rt"),
    title_link: selector("h3.gs_rt a"),
    byline: selector("div.gs_a"),
    snippet: selector("div.gs_rs"),
    footer_link: selector("div.gs_fl a"),
});

static LINKS: LazyLock<Selector> = LazyLock::new(|| selector("a"));

/// A strategy for turning a result page into search results
pub trait ResultParser: Send + Sync + std::fmt::Debug {
    /// Strategy name, for logs
    fn name(&self) -> &'static str;

    /// Extract results; an empty list means nothing recognisable was found
    fn parse(&self, html: &str, query: &str) -> Vec<ScholarResult>;
}

/// Structured parsing of result blocks
#[derive(Debug, Clone, Copy, Default)]
pub struct PrimaryParser;

impl ResultParser for PrimaryParser {
    fn name(&self) -> &'static str {
        "primary"
    }

    fn parse(&self, html: &str, query: &str) -> Vec<ScholarResult> {
        let document = Html::parse_document(html);
        let terms = query_terms(query);

        let blocks: Vec<ElementRef> = document.select(&PRIMARY.result).collect();
        let total = blocks.len();

        blocks
            .into_iter()
            .enumerate()
            .filter_map(|(rank, block)| parse_block(block, &terms, rank, total))
            .collect()
    }
}

fn parse_block(
    block: ElementRef,
    terms: &[String],
    rank: usize,
    total: usize,
) -> Option<ScholarResult> {
    let raw_title = block.select(&PRIMARY.title).next().map(text_of)?;
    let title = TITLE_TAG.replace(&raw_title, "").trim().to_string();
    if title.is_empty() {
        return None;
    }

    let url = block
        .select(&PRIMARY.title_link)
        .next()
        .and_then(|a| a.value().attr("href"))
        .map(str::to_string);

    let byline = block
        .select(&PRIMARY.byline)
        .next()
        .map(text_of)
        .unwrap_or_default();
    let byline = parse_byline(&byline);

    let snippet = block
        .select(&PRIMARY.snippet)
        .next()
        .map(text_of)
        .filter(|s| is_valid_abstract(s));

    let citation_count = block
        .select(&PRIMARY.footer_link)
        .find_map(|a| {
            CITED_BY
                .captures(&text_of(a))
                .and_then(|caps| caps[1].parse::<u32>().ok())
        })
        .unwrap_or(0);

    let doi = url
        .as_deref()
        .and_then(find_doi)
        .or_else(|| snippet.as_deref().and_then(find_doi));

    let present = [
        !byline.authors.is_empty(),
        byline.year.is_some(),
        byline.journal.is_some(),
        snippet.is_some(),
        doi.is_some(),
    ]
    .iter()
    .filter(|p| **p)
    .count();

    let text = format!("{} {}", title, snippet.as_deref().unwrap_or_default());

    Some(
        ScholarResultBuilder::new(title, SCHOLAR_SOURCE_ID)
            .authors(byline.authors)
            .year(byline.year)
            .journal(byline.journal)
            .publisher(byline.publisher)
            .url(url)
            .doi(doi)
            .snippet(snippet)
            .citation_count(citation_count)
            .confidence(0.5 + 0.1 * present as f64)
            .relevance_score(score_relevance(terms, &text, rank, total))
            .keywords(matched_keywords(terms, &text))
            .build(),
    )
}

#[derive(Debug, Default, PartialEq)]
struct Byline {
    authors: Vec<String>,
    year: Option<i32>,
    journal: Option<String>,
    publisher: Option<String>,
}

/// Split "A Author, B Author - Venue, 2017 - host.org"
fn parse_byline(line: &str) -> Byline {
    let mut parts = line.split(" - ").map(str::trim);

    let authors = parts
        .next()
        .unwrap_or_default()
        .split(',')
        .map(|a| a.trim().trim_matches(['…', '.']).trim())
        .filter(|a| !a.is_empty())
        .map(str::to_string)
        .collect();

    let venue = parts.next().unwrap_or_default();
    let year = YEAR
        .find_iter(venue)
        .last()
        .and_then(|m| m.as_str().parse::<i32>().ok());
    let journal = YEAR
        .replace_all(venue, "")
        .trim()
        .trim_matches([',', '…', ' '])
        .trim()
        .to_string();

    Byline {
        authors,
        year,
        journal: (!journal.is_empty()).then_some(journal),
        publisher: parts.next().filter(|p| !p.is_empty()).map(str::to_string),
    }
}

/// Salvages title-like hyperlink texts when structured parsing found nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct AlternativeParser;

impl ResultParser for AlternativeParser {
    fn name(&self) -> &'static str {
        "alternative"
    }

    fn parse(&self, html: &str, query: &str) -> Vec<ScholarResult> {
        let document = Html::parse_document(html);
        let terms = query_terms(query);
        let mut seen = HashSet::new();

        let candidates: Vec<(String, Option<String>)> = document
            .select(&LINKS)
            .filter_map(|link| {
                let text = text_of(link);
                if !looks_like_title(&text) || !seen.insert(text.to_lowercase()) {
                    return None;
                }
                let href = link
                    .value()
                    .attr("href")
                    .filter(|h| h.starts_with("http"))
                    .map(str::to_string);
                Some((text, href))
            })
            .collect();

        let total = candidates.len();
        candidates
            .into_iter()
            .enumerate()
            .map(|(rank, (title, href))| {
                let doi = href.as_deref().and_then(find_doi);
                ScholarResultBuilder::new(title.clone(), SCHOLAR_SOURCE_ID)
                    .url(href)
                    .doi(doi)
                    .confidence(ALTERNATIVE_CONFIDENCE)
                    .relevance_score(score_relevance(&terms, &title, rank, total))
                    .keywords(matched_keywords(&terms, &title))
                    .build()
            })
            .collect()
    }
}

fn text_of(element: ElementRef) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whether `text` is a real abstract rather than a placeholder
pub fn is_valid_abstract(text: &str) -> bool {
    let text = text.trim();
    if text.chars().count() < MIN_ABSTRACT_LEN {
        return false;
    }

    let lower = text.to_lowercase();
    let bare = lower.trim_end_matches(['.', ':']);
    if PLACEHOLDER_ABSTRACTS.contains(&bare) || bare == "abstract" || bare == "pdf" {
        return false;
    }

    !text
        .chars()
        .all(|c| c.is_ascii_digit() || c.is_whitespace() || c.is_ascii_punctuation())
}

/// Heuristic for an academic title
///
/// Rejects short strings, single words, URLs and pure navigation vocabulary.
pub fn looks_like_title(text: &str) -> bool {
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let len = text.chars().count();
    if !(MIN_TITLE_LEN..=MAX_TITLE_LEN).contains(&len) {
        return false;
    }
    if text.contains("://") || text.starts_with("www.") {
        return false;
    }

    let lower = text.to_lowercase();
    if NAV_PHRASE.is_match(&lower) {
        return false;
    }

    let words: Vec<&str> = lower
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|w| !w.is_empty())
        .collect();
    if words.len() < MIN_TITLE_WORDS {
        return false;
    }

    let all_navigation = words
        .iter()
        .all(|w| NAV_WORDS.contains(w) || w.chars().all(|c| c.is_ascii_digit()));
    if all_navigation {
        return false;
    }

    words
        .iter()
        .any(|w| w.chars().filter(|c| c.is_alphabetic()).count() >= 4)
}

/// Whether the page explicitly reports an empty result set
pub fn has_no_results_indicator(html: &str) -> bool {
    let lower = html.to_lowercase();
    NO_RESULTS_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Whether the page is a robot check or block page
///
/// Challenge wording alone only counts on a page without result blocks.
pub fn is_blocked_page(html: &str) -> bool {
    let lower = html.to_lowercase();
    if BLOCK_PAGE_MARKERS.iter().any(|marker| lower.contains(marker)) {
        return true;
    }
    BLOCK_TEXT_MARKERS.iter().any(|marker| lower.contains(marker))
        && Html::parse_document(html)
            .select(&PRIMARY.result)
            .next()
            .is_none()
}

/// Distinct lowercase query terms of three or more characters
pub fn query_terms(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 3 && !STOP_WORDS.contains(t))
        .filter(|t| seen.insert(t.to_string()))
        .map(str::to_string)
        .collect()
}

/// Query terms that occur in `text`
pub(crate) fn matched_keywords(terms: &[String], text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    terms
        .iter()
        .filter(|term| lower.contains(term.as_str()))
        .cloned()
        .collect()
}

/// Term overlap blended with rank position
pub(crate) fn score_relevance(terms: &[String], text: &str, rank: usize, total: usize) -> f64 {
    let overlap = if terms.is_empty() {
        0.0
    } else {
        matched_keywords(terms, text).len() as f64 / terms.len() as f64
    };
    let position = if total <= 1 {
        1.0
    } else {
        1.0 - rank as f64 / total as f64
    };
    clamp_unit(0.7 * overlap + 0.3 * position)
}
