//! Reference metadata produced by the DOI and URL extractors.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::utils::Cacheable;

const NAME_SUFFIXES: &[&str] = &["jr", "jr.", "sr", "sr.", "ii", "iii", "iv", "v"];

/// Canonical kind of a reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReferenceType {
    JournalArticle,
    Book,
    BookChapter,
    ConferencePaper,
    Thesis,
    Report,
    Patent,
    Webpage,
    Other,
}

impl ReferenceType {
    /// Map a bibliographic API work type onto a reference type
    pub fn from_work_type(work_type: &str) -> Self {
        match work_type.trim().to_ascii_lowercase().as_str() {
            "journal-article" => ReferenceType::JournalArticle,
            "book" | "monograph" | "edited-book" | "reference-book" => ReferenceType::Book,
            "book-chapter" | "book-section" | "book-part" => ReferenceType::BookChapter,
            "proceedings-article" | "conference-paper" | "proceedings" => {
                ReferenceType::ConferencePaper
            }
            "dissertation" | "thesis" => ReferenceType::Thesis,
            "report" | "report-series" => ReferenceType::Report,
            "patent" => ReferenceType::Patent,
            _ => ReferenceType::Other,
        }
    }
}

/// A structured author name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    pub first_name: String,
    pub last_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub middle_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
}

impl Author {
    /// Build from separate given and family names; `None` if both are blank
    pub fn from_parts(given: Option<&str>, family: Option<&str>, suffix: Option<&str>) -> Option<Self> {
        let given = given.map(str::trim).filter(|s| !s.is_empty());
        let family = family.map(str::trim).filter(|s| !s.is_empty());
        if given.is_none() && family.is_none() {
            return None;
        }

        let mut given_tokens = given.unwrap_or_default().split_whitespace();
        let first_name = given_tokens.next().unwrap_or_default().to_string();
        let middle: Vec<&str> = given_tokens.collect();

        Some(Self {
            first_name,
            last_name: family.unwrap_or_default().to_string(),
            middle_name: (!middle.is_empty()).then(|| middle.join(" ")),
            suffix: suffix
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        })
    }

    /// Parse "First Middle Last Jr." or "Last, First Middle, Jr."
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }

        if name.contains(',') {
            let parts: Vec<&str> = name.split(',').map(str::trim).collect();
            let family = parts[0];
            let given = parts.get(1).copied();
            let suffix = parts.get(2).copied().filter(|s| is_suffix(s));
            return Self::from_parts(given, Some(family), suffix);
        }

        let mut tokens: Vec<&str> = name.split_whitespace().collect();
        let suffix = if tokens.len() > 2 && tokens.last().is_some_and(|t| is_suffix(t)) {
            tokens.pop()
        } else {
            None
        };

        match tokens.as_slice() {
            [] => None,
            [only] => Self::from_parts(None, Some(*only), suffix),
            [given @ .., family] => {
                Self::from_parts(Some(given.join(" ").as_str()), Some(*family), suffix)
            }
        }
    }

    /// "First Middle Last Suffix"
    pub fn full_name(&self) -> String {
        [
            Some(self.first_name.as_str()),
            self.middle_name.as_deref(),
            Some(self.last_name.as_str()),
            self.suffix.as_deref(),
        ]
        .into_iter()
        .flatten()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
    }
}

fn is_suffix(token: &str) -> bool {
    NAME_SUFFIXES.contains(&token.to_ascii_lowercase().as_str())
}

/// Metadata describing a citable reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceMetadata {
    pub title: Option<String>,
    pub authors: Vec<Author>,
    pub publication_date: Option<NaiveDate>,
    pub journal: Option<String>,
    pub volume: Option<String>,
    pub issue: Option<String>,
    pub pages: Option<String>,
    pub publisher: Option<String>,
    pub isbn: Option<String>,
    pub doi: Option<String>,
    pub url: Option<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub keywords: Vec<String>,
    #[serde(rename = "type")]
    pub reference_type: ReferenceType,
    /// Completeness estimate in `[0, 1]`
    pub confidence: f64,
}

impl ReferenceMetadata {
    pub fn new(reference_type: ReferenceType) -> Self {
        Self {
            title: None,
            authors: Vec::new(),
            publication_date: None,
            journal: None,
            volume: None,
            issue: None,
            pages: None,
            publisher: None,
            isbn: None,
            doi: None,
            url: None,
            abstract_text: None,
            keywords: Vec::new(),
            reference_type,
            confidence: 0.0,
        }
    }

    /// Whether anything identifying was extracted
    pub fn has_meaningful_content(&self) -> bool {
        self.title.as_deref().is_some_and(|t| !t.trim().is_empty())
            || self.doi.is_some()
            || self.isbn.is_some()
    }
}

/// How a citation source should be resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Url,
    Doi,
}

impl SourceKind {
    /// The other resolution method
    pub fn alternate(self) -> Self {
        match self {
            SourceKind::Url => SourceKind::Doi,
            SourceKind::Doi => SourceKind::Url,
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Url => write!(f, "url"),
            SourceKind::Doi => write!(f, "doi"),
        }
    }
}

impl std::str::FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "url" => Ok(SourceKind::Url),
            "doi" => Ok(SourceKind::Doi),
            other => Err(format!("unknown source type: {}", other)),
        }
    }
}

/// A request to resolve a citation source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionRequest {
    pub source: String,
    #[serde(rename = "type", default)]
    pub kind: Option<SourceKind>,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

impl ExtractionRequest {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            kind: None,
            conversation_id: None,
        }
    }

    pub fn kind(mut self, kind: SourceKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn conversation_id(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }
}

/// Outcome of a metadata extraction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ReferenceMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall time in milliseconds, at least 1
    pub extraction_time: u64,
    pub source: String,
    /// Method that produced the metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<SourceKind>,
}

impl ExtractionResult {
    pub fn succeeded(
        source: impl Into<String>,
        metadata: ReferenceMetadata,
        method: SourceKind,
        extraction_time: u64,
    ) -> Self {
        Self {
            success: true,
            metadata: Some(metadata),
            error: None,
            extraction_time: extraction_time.max(1),
            source: source.into(),
            method: Some(method),
        }
    }

    pub fn failed(source: impl Into<String>, error: impl Into<String>, extraction_time: u64) -> Self {
        Self {
            success: false,
            metadata: None,
            error: Some(error.into()),
            extraction_time: extraction_time.max(1),
            source: source.into(),
            method: None,
        }
    }
}

impl Cacheable for ExtractionResult {
    fn is_cacheable(&self) -> bool {
        self.success
    }
}

/// Result of format-only validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceValidation {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_type: Option<SourceKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
