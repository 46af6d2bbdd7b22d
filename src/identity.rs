use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use url::Url;

const EXCLUDED_SEGMENTS: [&str; 5] = ["/user/", "/search/", "/category/", "/admin/", "/api/"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Episode,
    Season,
    Series,
    Movie,
}

impl EntityType {
    pub const ALL: [EntityType; 4] = [Self::Episode, Self::Season, Self::Series, Self::Movie];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Episode => "episode",
            Self::Season => "season",
            Self::Series => "series",
            Self::Movie => "movie",
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            Self::Episode => "EPISODE",
            Self::Season => "SEASON",
            Self::Series => "SERIES",
            Self::Movie => "MOVIE",
        }
    }

    /// Episodes and movies toggle between untracked and seen; seasons and
    /// series cycle through watching and completed.
    pub fn is_leaf(self) -> bool {
        matches!(self, Self::Episode | Self::Movie)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "episode" | "episodes" => Ok(Self::Episode),
            "season" | "seasons" => Ok(Self::Season),
            "series" => Ok(Self::Series),
            "movie" | "movies" => Ok(Self::Movie),
            other => Err(format!("unknown entity type '{other}'")),
        }
    }
}

/// Anything that exposes a link target the way a page anchor does.
pub trait Anchor {
    fn href(&self) -> &str;
}

#[derive(Clone, Copy)]
pub enum PathInput<'a> {
    Raw(&'a str),
    Url(&'a Url),
    Anchor(&'a dyn Anchor),
}

impl<'a> From<&'a str> for PathInput<'a> {
    fn from(raw: &'a str) -> Self {
        Self::Raw(raw)
    }
}

impl<'a> From<&'a String> for PathInput<'a> {
    fn from(raw: &'a String) -> Self {
        Self::Raw(raw.as_str())
    }
}

impl<'a> From<&'a Url> for PathInput<'a> {
    fn from(url: &'a Url) -> Self {
        Self::Url(url)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Hierarchy {
    pub series_id: Option<String>,
    pub season_id: Option<String>,
    pub episode_id: Option<String>,
    pub movie_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PathInfo {
    pub valid: bool,
    pub id: Option<String>,
    pub kind: Option<EntityType>,
    pub pattern: Option<&'static str>,
    pub series_slug: Option<String>,
    pub season_number: Option<u32>,
    pub episode_slug: Option<String>,
    pub movie_slug: Option<String>,
    pub hierarchy: Hierarchy,
}

impl PathInfo {
    fn invalid() -> Self {
        Self::default()
    }

    pub fn is(&self, kind: EntityType) -> bool {
        self.valid && self.kind == Some(kind)
    }

    pub fn display_name(&self) -> Option<String> {
        match self.kind? {
            EntityType::Episode => {
                let series = self.series_slug.as_deref()?;
                let season = self.season_number?;
                let episode = self.episode_slug.as_deref()?;
                Some(format!(
                    "{} - {}",
                    format_season_name(series, season),
                    slug_to_title(episode)
                ))
            }
            EntityType::Season => {
                let series = self.series_slug.as_deref()?;
                Some(match self.season_number {
                    Some(season) => format_season_name(series, season),
                    None => slug_to_title(series),
                })
            }
            EntityType::Series => self.series_slug.as_deref().map(slug_to_title),
            EntityType::Movie => self.movie_slug.as_deref().map(slug_to_title),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Shape {
    EpisodeStructured,
    EpisodeGeneric,
    Movie,
    Series,
    SeasonStandard,
    SeasonSimple,
}

struct Pattern {
    name: &'static str,
    kind: EntityType,
    shape: Shape,
    regex: Regex,
}

fn pattern(name: &'static str, kind: EntityType, shape: Shape, source: &str) -> Pattern {
    Pattern {
        name,
        kind,
        shape,
        regex: Regex::new(source).unwrap_or_else(|err| panic!("bad pattern {name}: {err}")),
    }
}

// Family order is episode, movie, series, season; within a family the most
// specific shape comes first.
static PATTERNS: LazyLock<Vec<Pattern>> = LazyLock::new(|| {
    vec![
        pattern(
            "episode-standard",
            EntityType::Episode,
            Shape::EpisodeStructured,
            r"(?i)^/episode/([a-z0-9_-]+?)-(\d+)-episodio-([a-z0-9_-]+)$",
        ),
        pattern(
            "episode-legacy",
            EntityType::Episode,
            Shape::EpisodeStructured,
            r"(?i)^/episode/([a-z0-9_-]+?)-(\d+)-(\d+)$",
        ),
        pattern(
            "episode-generic",
            EntityType::Episode,
            Shape::EpisodeGeneric,
            r"(?i)^/episode/[^/]+",
        ),
        pattern(
            "watch-generic",
            EntityType::Episode,
            Shape::EpisodeGeneric,
            r"(?i)^/watch/.+",
        ),
        pattern("movie", EntityType::Movie, Shape::Movie, r"(?i)^/movie/([^/]+)$"),
        pattern("film", EntityType::Movie, Shape::Movie, r"(?i)^/film/([^/]+)$"),
        pattern("series", EntityType::Series, Shape::Series, r"(?i)^/series/([^/]+)$"),
        pattern("serie", EntityType::Series, Shape::Series, r"(?i)^/serie/([^/]+)$"),
        pattern("tv", EntityType::Series, Shape::Series, r"(?i)^/tv/([^/]+)$"),
        pattern(
            "season-standard",
            EntityType::Season,
            Shape::SeasonStandard,
            r"(?i)^/season/([^/]+)-(\d+)$",
        ),
        pattern(
            "season-simple",
            EntityType::Season,
            Shape::SeasonSimple,
            r"(?i)^/season/([^/]+)$",
        ),
    ]
});

#[derive(Debug, Clone)]
pub struct Resolver {
    origin: Url,
}

impl Resolver {
    pub fn new(origin: Url) -> Self {
        Self { origin }
    }

    pub fn analyze<'a>(&self, input: impl Into<PathInput<'a>>) -> PathInfo {
        let Some(url) = self.resolve_url(input.into()) else {
            return PathInfo::invalid();
        };
        if !matches!(url.scheme(), "http" | "https") {
            return PathInfo::invalid();
        }

        let path = normalize_path(url.path());
        if EXCLUDED_SEGMENTS
            .iter()
            .any(|segment| path.contains(segment))
        {
            return PathInfo::invalid();
        }

        for candidate in PATTERNS.iter() {
            if let Some(caps) = candidate.regex.captures(&path) {
                return build_info(&path, candidate, &caps);
            }
        }
        PathInfo::invalid()
    }

    pub fn get_parent<'a>(&self, input: impl Into<PathInput<'a>>) -> Option<String> {
        self.get_ancestors(input).into_iter().next()
    }

    /// Ancestor ids ordered from the immediate parent up to the root.
    pub fn get_ancestors<'a>(&self, input: impl Into<PathInput<'a>>) -> Vec<String> {
        let info = self.analyze(input);
        if !info.valid {
            return Vec::new();
        }
        let hierarchy = info.hierarchy;
        match info.kind {
            Some(EntityType::Episode) => [hierarchy.season_id, hierarchy.series_id]
                .into_iter()
                .flatten()
                .collect(),
            Some(EntityType::Season) => hierarchy.series_id.into_iter().collect(),
            _ => Vec::new(),
        }
    }

    pub fn is_type<'a>(&self, input: impl Into<PathInput<'a>>, kind: EntityType) -> bool {
        self.analyze(input).is(kind)
    }

    pub fn is_episode<'a>(&self, input: impl Into<PathInput<'a>>) -> bool {
        self.is_type(input, EntityType::Episode)
    }

    pub fn is_season<'a>(&self, input: impl Into<PathInput<'a>>) -> bool {
        self.is_type(input, EntityType::Season)
    }

    pub fn is_series<'a>(&self, input: impl Into<PathInput<'a>>) -> bool {
        self.is_type(input, EntityType::Series)
    }

    pub fn is_movie<'a>(&self, input: impl Into<PathInput<'a>>) -> bool {
        self.is_type(input, EntityType::Movie)
    }

    fn resolve_url(&self, input: PathInput<'_>) -> Option<Url> {
        let raw = match input {
            PathInput::Url(url) => return Some(url.clone()),
            PathInput::Raw(raw) => raw,
            PathInput::Anchor(anchor) => anchor.href(),
        };
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        self.origin.join(raw).ok()
    }
}

fn build_info(path: &str, candidate: &Pattern, caps: &Captures<'_>) -> PathInfo {
    let group = |idx: usize| caps.get(idx).map(|m| m.as_str().to_string());
    let mut info = PathInfo {
        valid: true,
        id: Some(path.to_string()),
        kind: Some(candidate.kind),
        pattern: Some(candidate.name),
        ..PathInfo::default()
    };

    match candidate.shape {
        Shape::EpisodeStructured => {
            info.series_slug = group(1);
            info.season_number = group(2).and_then(|n| n.parse().ok());
            info.episode_slug = group(3);
        }
        Shape::EpisodeGeneric => {}
        Shape::Movie => info.movie_slug = group(1),
        Shape::Series => info.series_slug = group(1),
        Shape::SeasonStandard => {
            info.series_slug = group(1);
            info.season_number = group(2).and_then(|n| n.parse().ok());
        }
        Shape::SeasonSimple => {
            let slug = group(1).unwrap_or_default();
            let (series, season) = split_season_slug(&slug);
            info.series_slug = Some(series);
            info.season_number = season;
        }
    }

    info.hierarchy = build_hierarchy(path, &info);
    info
}

fn split_season_slug(slug: &str) -> (String, Option<u32>) {
    if let Some((head, tail)) = slug.rsplit_once('-')
        && !head.is_empty()
        && !tail.is_empty()
        && tail.bytes().all(|b| b.is_ascii_digit())
        && let Ok(number) = tail.parse::<u32>()
    {
        return (head.to_string(), Some(number));
    }
    (slug.to_string(), None)
}

fn build_hierarchy(path: &str, info: &PathInfo) -> Hierarchy {
    let mut hierarchy = Hierarchy::default();
    match info.kind {
        Some(EntityType::Episode) => {
            hierarchy.episode_id = Some(path.to_string());
            if let (Some(series), Some(season)) = (&info.series_slug, info.season_number) {
                hierarchy.season_id = Some(season_id(series, season));
                hierarchy.series_id = Some(series_id(series));
            }
        }
        Some(EntityType::Season) => {
            hierarchy.season_id = Some(path.to_string());
            hierarchy.series_id = info.series_slug.as_deref().map(series_id);
        }
        Some(EntityType::Series) => hierarchy.series_id = Some(path.to_string()),
        Some(EntityType::Movie) => hierarchy.movie_id = Some(path.to_string()),
        None => {}
    }
    hierarchy
}

pub fn season_id(series_slug: &str, season: u32) -> String {
    format!("/season/{series_slug}-{season}")
}

pub fn series_id(series_slug: &str) -> String {
    format!("/series/{series_slug}")
}

pub(crate) fn normalize_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for segment in path.split('/').filter(|segment| !segment.is_empty()) {
        out.push('/');
        out.push_str(segment);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

pub fn slug_to_title(slug: &str) -> String {
    slug.split(['-', '_'])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn format_season_name(series_slug: &str, season: u32) -> String {
    format!("{} - {}", slug_to_title(series_slug), season)
}
