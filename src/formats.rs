use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One raw row scraped from a table of contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TocPiece {
    pub title: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub locked: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseState {
    #[default]
    Unknown,
    Ongoing,
    Hiatus,
    Discontinued,
    Dropped,
    Complete,
}

/// Medium level metadata. At most one per TOC stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TocMeta {
    pub title: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artists: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang_media: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang_toc: Option<String>,
    #[serde(default)]
    pub status_coo: ReleaseState,
    #[serde(default)]
    pub status_tl: ReleaseState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synopsis: Option<String>,
    /// The listing is complete: no further rows will be published.
    #[serde(default)]
    pub end: bool,
}

/// Element of the raw stream an adapter hands to the normalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TocInput {
    Piece(TocPiece),
    Meta(TocMeta),
}

impl From<TocPiece> for TocInput {
    fn from(piece: TocPiece) -> Self {
        Self::Piece(piece)
    }
}

impl From<TocMeta> for TocInput {
    fn from(meta: TocMeta) -> Self {
        Self::Meta(meta)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TocEpisode {
    pub title: String,
    pub combi_index: f64,
    pub total_index: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_index: Option<u32>,
    /// Index relative to the volume, when the title carried both numberings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_index: Option<f64>,
    pub url: String,
    #[serde(default)]
    pub locked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TocPart {
    pub title: String,
    pub combi_index: f64,
    pub total_index: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_index: Option<u32>,
    pub episodes: Vec<TocEpisode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TocContent {
    Part(TocPart),
    Episode(TocEpisode),
}

/// Normalized TOC of one medium, as handed to storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TocResult {
    pub url: String,
    pub contents: Vec<TocContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<TocMeta>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeNews {
    pub medium_title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medium_toc_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_index: Option<f64>,
    pub episode_title: String,
    pub episode_index: f64,
    pub link: String,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub locked: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewsResult {
    pub episodes: Vec<EpisodeNews>,
}

/// TOC links collected from a tracked external user's lists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListResult {
    pub user: String,
    pub toc_links: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeContent {
    pub medium_title: String,
    pub episode_title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<f64>,
    pub content: Vec<String>,
}

/// Medium description used to look up a TOC on sites that were not tracked yet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchMedium {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub synonyms: Vec<String>,
}
