use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::SourceFailure;
use crate::util::normalize_text;

/// One source's view of one open position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawListing {
    /// Connector that produced this record.
    pub source_id: String,
    pub title: String,
    pub company: String,
    /// Free text, may be empty.
    pub description: String,
    pub location: String,
    pub posted_at: Option<DateTime<Utc>>,
    /// Opaque identifier, not guaranteed stable across scrapes.
    pub url: String,
    pub fetched_at: DateTime<Utc>,
}

/// Seniority filter carried by [`SearchCriteria`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperienceLevel {
    Entry,
    Mid,
    Senior,
    Staff,
    Principal,
    Director,
}

impl ExperienceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExperienceLevel::Entry => "entry",
            ExperienceLevel::Mid => "mid",
            ExperienceLevel::Senior => "senior",
            ExperienceLevel::Staff => "staff",
            ExperienceLevel::Principal => "principal",
            ExperienceLevel::Director => "director",
        }
    }

    /// Title words that mark a listing as this level.
    pub fn title_tokens(&self) -> &'static [&'static str] {
        match self {
            ExperienceLevel::Entry => &[
                "entry", "junior", "jr", "intern", "graduate", "associate",
            ],
            ExperienceLevel::Mid => &["mid", "intermediate"],
            ExperienceLevel::Senior => &["senior", "sr"],
            ExperienceLevel::Staff => &["staff", "lead"],
            ExperienceLevel::Principal => &["principal"],
            ExperienceLevel::Director => &["director", "head", "vp"],
        }
    }

    /// Whether a listing title fits this level.
    ///
    /// Mid-level also admits titles that carry no seniority word at all.
    pub fn matches_title(&self, title: &str) -> bool {
        let words: Vec<String> = title
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect();
        let has = |tokens: &[&str]| words.iter().any(|w| tokens.contains(&w.as_str()));

        if has(self.title_tokens()) {
            return true;
        }
        *self == ExperienceLevel::Mid && !ALL_LEVELS.iter().any(|level| has(level.title_tokens()))
    }
}

const ALL_LEVELS: [ExperienceLevel; 6] = [
    ExperienceLevel::Entry,
    ExperienceLevel::Mid,
    ExperienceLevel::Senior,
    ExperienceLevel::Staff,
    ExperienceLevel::Principal,
    ExperienceLevel::Director,
];

impl fmt::Display for ExperienceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ExperienceLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "entry" | "junior" => Ok(ExperienceLevel::Entry),
            "mid" => Ok(ExperienceLevel::Mid),
            "senior" | "sr" => Ok(ExperienceLevel::Senior),
            "staff" | "lead" => Ok(ExperienceLevel::Staff),
            "principal" => Ok(ExperienceLevel::Principal),
            "director" => Ok(ExperienceLevel::Director),
            _ => Err(format!("Unknown experience level: {}", s)),
        }
    }
}

/// Caller-supplied filter for a discovery run.
///
/// All string values are normalized on insertion and kept in ordered sets,
/// so two logically equal criteria always produce the same
/// [`fingerprint`](Self::fingerprint).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchCriteria {
    /// OR-matched against listing titles.
    pub titles: BTreeSet<String>,
    pub locations: BTreeSet<String>,
    pub keywords: BTreeSet<String>,
    /// Target companies for company-direct sources.
    pub companies: BTreeSet<String>,
    pub experience_level: Option<ExperienceLevel>,
}

impl SearchCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_title(mut self, title: impl AsRef<str>) -> Self {
        insert_normalized(&mut self.titles, title.as_ref());
        self
    }

    pub fn with_location(mut self, location: impl AsRef<str>) -> Self {
        insert_normalized(&mut self.locations, location.as_ref());
        self
    }

    pub fn with_keyword(mut self, keyword: impl AsRef<str>) -> Self {
        insert_normalized(&mut self.keywords, keyword.as_ref());
        self
    }

    pub fn with_company(mut self, company: impl AsRef<str>) -> Self {
        insert_normalized(&mut self.companies, company.as_ref());
        self
    }

    pub fn with_experience_level(mut self, level: ExperienceLevel) -> Self {
        self.experience_level = Some(level);
        self
    }

    /// Deterministic SHA-256 fingerprint, used as a cache key component.
    pub fn fingerprint(&self) -> String {
        let section = |label: &str, values: &BTreeSet<String>| {
            let normalized: BTreeSet<String> = values
                .iter()
                .map(|v| normalize_text(v))
                .filter(|v| !v.is_empty())
                .collect();
            format!(
                "{label}={}",
                normalized.into_iter().collect::<Vec<_>>().join("\u{1f}")
            )
        };
        let canonical = [
            section("titles", &self.titles),
            section("locations", &self.locations),
            section("keywords", &self.keywords),
            section("companies", &self.companies),
            format!(
                "level={}",
                self.experience_level.map(|l| l.as_str()).unwrap_or("")
            ),
        ]
        .join(";");
        compute_hash(&canonical)
    }

    /// Strictly broader variants of this criteria, narrowest first.
    ///
    /// Constraints are dropped cumulatively: keywords, experience level,
    /// companies, then locations. Titles are never dropped.
    pub fn broader_scopes(&self) -> Vec<SearchCriteria> {
        let mut scopes = Vec::new();
        let mut current = self.clone();

        if !current.keywords.is_empty() {
            current.keywords.clear();
            scopes.push(current.clone());
        }
        if current.experience_level.take().is_some() {
            scopes.push(current.clone());
        }
        if !current.companies.is_empty() {
            current.companies.clear();
            scopes.push(current.clone());
        }
        if !current.locations.is_empty() {
            current.locations.clear();
            scopes.push(current.clone());
        }
        scopes
    }

    /// Whether a listing with this title, location and body text satisfies
    /// the title, location, keyword and experience-level filters. Empty
    /// filters admit anything.
    pub fn admits(&self, title: &str, location: &str, body: &str) -> bool {
        let level_ok = self
            .experience_level
            .is_none_or(|level| level.matches_title(title));
        let title = normalize_text(title);
        let location = normalize_text(location);

        let title_ok = self.titles.is_empty() || self.titles.iter().any(|t| title.contains(t));
        let location_ok =
            self.locations.is_empty() || self.locations.iter().any(|l| location.contains(l));
        let keywords_ok = self.keywords.is_empty() || {
            let body = normalize_text(body);
            self.keywords
                .iter()
                .any(|k| title.contains(k) || body.contains(k))
        };

        level_ok && title_ok && location_ok && keywords_ok
    }
}

fn insert_normalized(set: &mut BTreeSet<String>, value: &str) {
    let normalized = normalize_text(value);
    if !normalized.is_empty() {
        set.insert(normalized);
    }
}

/// One deduplicated opportunity: every raw listing judged to describe it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniqueListing {
    /// The representative member, chosen deterministically.
    pub canonical: RawListing,
    /// All folded listings, in discovery order.
    pub members: Vec<RawListing>,
}

impl UniqueListing {
    /// Number of distinct sources among the members.
    pub fn source_count(&self) -> usize {
        self.members
            .iter()
            .map(|m| m.source_id.as_str())
            .collect::<HashSet<_>>()
            .len()
    }
}

/// How a discovery result was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Live sources met the minimum-viable threshold (or answered with zero matches).
    Fresh,
    /// Fallback sources ran and the merged set is still below the threshold.
    DegradedFallback,
    /// Live sources yielded nothing; a stale cached snapshot was served.
    DegradedCached,
    /// Every live source failed and no cached snapshot exists.
    NoDataAvailable,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Fresh => "fresh",
            Provenance::DegradedFallback => "degraded_fallback",
            Provenance::DegradedCached => "degraded_cached",
            Provenance::NoDataAvailable => "no_data_available",
        }
    }

    pub fn is_degraded(&self) -> bool {
        !matches!(self, Provenance::Fresh)
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of [`Aggregator::discover`](crate::coordinator::Aggregator::discover).
#[derive(Debug, Serialize, Deserialize)]
pub struct Discovery {
    pub listings: Vec<UniqueListing>,
    pub provenance: Provenance,
    /// Raw listings that went into deduplication.
    pub raw_count: usize,
    /// Connector failures seen while producing this result.
    #[serde(skip)]
    pub failures: Vec<SourceFailure>,
    /// Tier index this result was served from; `None` when freshly produced.
    #[serde(skip)]
    pub cache_tier: Option<usize>,
}

impl Discovery {
    pub fn is_fresh(&self) -> bool {
        self.provenance == Provenance::Fresh
    }

    /// True when nothing could be retrieved at all, as opposed to a
    /// confident "zero matches".
    pub fn no_data_available(&self) -> bool {
        self.provenance == Provenance::NoDataAvailable
    }
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::make_listing;

    #[test]
    fn test_compute_hash_consistency() {
        let h1 = compute_hash("hello world");
        let h2 = compute_hash("hello world");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn test_experience_level_roundtrip() {
        for level in [
            ExperienceLevel::Entry,
            ExperienceLevel::Mid,
            ExperienceLevel::Senior,
            ExperienceLevel::Staff,
            ExperienceLevel::Principal,
            ExperienceLevel::Director,
        ] {
            let parsed: ExperienceLevel = level.as_str().parse().unwrap();
            assert_eq!(parsed, level);
        }
        assert_eq!("Sr".parse::<ExperienceLevel>(), Ok(ExperienceLevel::Senior));
        assert!("wizard".parse::<ExperienceLevel>().is_err());
    }

    #[test]
    fn test_fingerprint_ignores_insertion_order_and_case() {
        let a = SearchCriteria::new()
            .with_title("Product Manager")
            .with_title("AI PM")
            .with_location("Remote");
        let b = SearchCriteria::new()
            .with_location("  remote ")
            .with_title("ai   pm")
            .with_title("PRODUCT MANAGER");
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_fingerprint_distinguishes_sections() {
        let as_title = SearchCriteria::new().with_title("remote");
        let as_location = SearchCriteria::new().with_location("remote");
        assert_ne!(as_title.fingerprint(), as_location.fingerprint());

        let senior = SearchCriteria::new()
            .with_title("pm")
            .with_experience_level(ExperienceLevel::Senior);
        let any = SearchCriteria::new().with_title("pm");
        assert_ne!(senior.fingerprint(), any.fingerprint());
    }

    #[test]
    fn test_blank_values_are_not_inserted() {
        let criteria = SearchCriteria::new().with_title("   ").with_keyword("");
        assert!(criteria.titles.is_empty());
        assert!(criteria.keywords.is_empty());
    }

    #[test]
    fn test_broader_scopes_drop_constraints_cumulatively() {
        let criteria = SearchCriteria::new()
            .with_title("product manager")
            .with_location("remote")
            .with_keyword("llm")
            .with_company("anthropic")
            .with_experience_level(ExperienceLevel::Senior);

        let scopes = criteria.broader_scopes();
        assert_eq!(scopes.len(), 4);
        assert!(scopes[0].keywords.is_empty());
        assert_eq!(scopes[0].experience_level, Some(ExperienceLevel::Senior));
        assert!(scopes[1].experience_level.is_none());
        assert!(scopes[2].companies.is_empty());
        assert!(scopes[3].locations.is_empty());
        for scope in &scopes {
            assert_eq!(scope.titles, criteria.titles);
        }
    }

    #[test]
    fn test_broader_scopes_of_minimal_criteria_is_empty() {
        let criteria = SearchCriteria::new().with_title("pm");
        assert!(criteria.broader_scopes().is_empty());
    }

    #[test]
    fn test_admits_title_or_match() {
        let criteria = SearchCriteria::new()
            .with_title("product manager")
            .with_title("product lead");
        assert!(criteria.admits("Senior Product Manager, AI", "Remote", ""));
        assert!(criteria.admits("Product Lead", "NYC", ""));
        assert!(!criteria.admits("Staff Engineer", "Remote", ""));
    }

    #[test]
    fn test_admits_keywords_and_locations() {
        let criteria = SearchCriteria::new()
            .with_title("product manager")
            .with_location("remote")
            .with_keyword("llm");
        assert!(criteria.admits("Product Manager", "Remote (US)", "Own our LLM platform"));
        assert!(!criteria.admits("Product Manager", "Remote (US)", "Own our billing"));
        assert!(!criteria.admits("Product Manager", "Berlin", "LLM platform"));
    }

    #[test]
    fn test_admits_experience_level() {
        let senior = SearchCriteria::new()
            .with_title("product manager")
            .with_experience_level(ExperienceLevel::Senior);
        assert!(senior.admits("Senior Product Manager", "Remote", ""));
        assert!(senior.admits("Sr. Product Manager, AI", "Remote", ""));
        assert!(!senior.admits("Junior Product Manager", "Remote", "entry level role"));
        assert!(!senior.admits("Product Manager", "Remote", "senior stakeholders"));

        let director = SearchCriteria::new().with_experience_level(ExperienceLevel::Director);
        assert!(director.admits("Head of Product", "NYC", ""));
        assert!(!director.admits("Staff Engineer", "NYC", ""));
    }

    #[test]
    fn test_mid_level_admits_unmarked_titles() {
        let mid = ExperienceLevel::Mid;
        assert!(mid.matches_title("Product Manager"));
        assert!(mid.matches_title("Mid-level Product Manager"));
        assert!(!mid.matches_title("Senior Product Manager"));
        // Whole words only.
        assert!(!ExperienceLevel::Senior.matches_title("Srinivasan's Team Lead"));
    }

    #[test]
    fn test_source_count_counts_distinct_sources() {
        let a = make_listing("remoteok", "PM", "Acme", "");
        let b = make_listing("greenhouse", "PM", "Acme", "");
        let c = make_listing("remoteok", "PM", "Acme", "x");
        let unique = UniqueListing {
            canonical: c.clone(),
            members: vec![a, b, c],
        };
        assert_eq!(unique.source_count(), 2);
    }

    #[test]
    fn test_provenance_serializes_snake_case() {
        let json = serde_json::to_string(&Provenance::DegradedCached).unwrap();
        assert_eq!(json, "\"degraded_cached\"");
        assert!(Provenance::DegradedFallback.is_degraded());
        assert!(!Provenance::Fresh.is_degraded());
    }
}
