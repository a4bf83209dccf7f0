use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Kind of result stored in the persistent item cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Search,
    Manga,
    Chapters,
    Chapter,
}

impl ItemKind {
    pub const ALL: [ItemKind; 4] = [
        ItemKind::Search,
        ItemKind::Manga,
        ItemKind::Chapters,
        ItemKind::Chapter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Search => "search",
            ItemKind::Manga => "manga",
            ItemKind::Chapters => "chapters",
            ItemKind::Chapter => "chapter",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ItemKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "search" => Ok(ItemKind::Search),
            "manga" => Ok(ItemKind::Manga),
            "chapters" => Ok(ItemKind::Chapters),
            "chapter" => Ok(ItemKind::Chapter),
            _ => Err(format!("Unknown item kind: {}", s)),
        }
    }
}

/// How long each kind of result stays fresh in the persistent cache.
///
/// Defaults: search 2h, manga 7d, chapter list ~1 month, chapter pages 1h.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    pub search: Duration,
    pub manga: Duration,
    pub chapters: Duration,
    pub chapter: Duration,
}

impl TtlPolicy {
    pub fn for_kind(&self, kind: ItemKind) -> Duration {
        match kind {
            ItemKind::Search => self.search,
            ItemKind::Manga => self.manga,
            ItemKind::Chapters => self.chapters,
            ItemKind::Chapter => self.chapter,
        }
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            search: Duration::from_secs(7_200),
            manga: Duration::from_secs(604_800),
            chapters: Duration::from_secs(2_628_000),
            chapter: Duration::from_secs(3_600),
        }
    }
}

/// Where an adapter wants the browser to go before extraction, and which
/// selector signals that client-side rendering has finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationTarget {
    pub url: String,
    pub selector: String,
}

impl NavigationTarget {
    pub fn new(url: impl Into<String>, selector: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            selector: selector.into(),
        }
    }
}

/// A single HTTP header the client must send to load an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderEntry {
    pub key: String,
    pub value: String,
}

/// An image reference together with the headers needed to fetch it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ApiImage {
    pub src: String,
    pub headers: Vec<HeaderEntry>,
}

impl ApiImage {
    pub fn new(src: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(HeaderEntry {
            key: key.into(),
            value: value.into(),
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MangaPreview {
    pub id: String,
    pub name: String,
    pub cover: ApiImage,
}

/// One page of search results; `next` is the opaque cursor for the following page.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SearchResults {
    pub items: Vec<MangaPreview>,
    pub next: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MangaStatus {
    Complete,
    OnGoing,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MangaExtra {
    pub name: String,
    pub value: String,
}

/// Detail page of a single title.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Manga {
    pub name: String,
    pub cover: ApiImage,
    pub share: String,
    pub status: MangaStatus,
    pub description: String,
    pub tags: Vec<String>,
    pub extras: Vec<MangaExtra>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: String,
    pub name: String,
    /// Release date as `YYYY MM DD`, when the source exposes one.
    pub released: Option<String>,
}

/// `{data, error}` body shape shared by every API response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseEnvelope<T> {
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ResponseEnvelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            data: Some(data),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Upstream location of an image that is served through the page mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyData {
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// Static identity of a registered source adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceInfo {
    pub id: String,
    pub name: String,
    pub nsfw: bool,
}

/// Results that are worth writing to the persistent cache.
///
/// Empty results are never cached so a transient empty answer does not stick.
pub trait Cacheable {
    fn is_cacheable(&self) -> bool;
}

impl Cacheable for SearchResults {
    fn is_cacheable(&self) -> bool {
        !self.items.is_empty()
    }
}

impl<T> Cacheable for Vec<T> {
    fn is_cacheable(&self) -> bool {
        !self.is_empty()
    }
}

impl<T> Cacheable for Option<T> {
    fn is_cacheable(&self) -> bool {
        self.is_some()
    }
}

/// Normalise a search query: trim, lower-case, collapse runs of spaces.
pub fn normalize_query(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    for word in query.trim().to_lowercase().split(' ') {
        if word.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}

/// Trim a chapter id, falling back to the first chapter.
pub fn normalize_chapter_id(chapter: &str) -> String {
    let trimmed = chapter.trim();
    if trimmed.is_empty() {
        "1".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Persistent-cache key of a chapter's page list.
pub fn chapter_key(manga: &str, chapter: &str) -> String {
    format!("{manga}|{chapter}")
}

/// File-cache key of a full chapter response body.
pub fn response_cache_key(source: &str, manga: &str, chapter: &str) -> String {
    format!("<--{source}|{manga}|{chapter}-->")
}
