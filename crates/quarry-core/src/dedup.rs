//! Similarity-based deduplication of raw listings.
//!
//! Every pair of listings is scored on three signals:
//!
//! | Signal      | Measure                                   | Weight |
//! |-------------|-------------------------------------------|--------|
//! | title       | normalized Levenshtein on normalized text | 0.4    |
//! | description | Sørensen–Dice bigram coefficient          | 0.4    |
//! | company     | 1.0 on normalized-name equality, else 0.0 | 0.2    |
//!
//! Pairs whose combined score reaches the threshold are joined, and
//! clusters are the transitive closure of those joins (union-find).

use serde::Serialize;

use crate::models::{RawListing, UniqueListing};
use crate::util::{normalize_company, normalize_text};

const TITLE_WEIGHT: f64 = 0.4;
const DESCRIPTION_WEIGHT: f64 = 0.4;
const COMPANY_WEIGHT: f64 = 0.2;

/// Per-signal similarity of two listings, each in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SimilarityScore {
    pub title: f64,
    pub description: f64,
    pub company: f64,
    pub combined: f64,
}

impl SimilarityScore {
    pub fn new(title: f64, description: f64, company: f64) -> Self {
        Self {
            title,
            description,
            company,
            combined: TITLE_WEIGHT * title
                + DESCRIPTION_WEIGHT * description
                + COMPANY_WEIGHT * company,
        }
    }
}

/// Normalized comparison fields of one listing, computed once.
struct Normalized {
    title: String,
    description: String,
    company: String,
}

impl Normalized {
    fn of(listing: &RawListing) -> Self {
        Self {
            title: normalize_text(&listing.title),
            description: normalize_text(&listing.description),
            company: normalize_company(&listing.company),
        }
    }

    fn score(&self, other: &Normalized) -> SimilarityScore {
        let title = strsim::normalized_levenshtein(&self.title, &other.title);
        let description = if self.description.is_empty() || other.description.is_empty() {
            0.0
        } else {
            strsim::sorensen_dice(&self.description, &other.description)
        };
        let company = if !self.company.is_empty() && self.company == other.company {
            1.0
        } else {
            0.0
        };
        SimilarityScore::new(title, description, company)
    }
}

/// Disjoint-set forest with union by size.
struct UnionFind {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            size: vec![1; n],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    /// Join the sets of `a` and `b` unless the result would exceed `cap`.
    /// Returns whether the two end up in one set.
    fn union(&mut self, a: usize, b: usize, cap: Option<usize>) -> bool {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return true;
        }
        if cap.is_some_and(|cap| self.size[ra] + self.size[rb] > cap) {
            return false;
        }
        let (big, small) = if self.size[ra] >= self.size[rb] {
            (ra, rb)
        } else {
            (rb, ra)
        };
        self.parent[small] = big;
        self.size[big] += self.size[small];
        true
    }
}

/// Clusters raw listings into unique opportunities.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Deduplicator {
    threshold: f64,
    max_cluster_size: Option<usize>,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(0.85)
    }
}

impl Deduplicator {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            max_cluster_size: None,
        }
    }

    /// Refuse joins that would grow a cluster beyond `max` members.
    pub fn with_max_cluster_size(mut self, max: usize) -> Self {
        self.max_cluster_size = Some(max.max(1));
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn score(&self, a: &RawListing, b: &RawListing) -> SimilarityScore {
        Normalized::of(a).score(&Normalized::of(b))
    }

    pub fn is_match(&self, score: &SimilarityScore) -> bool {
        score.combined >= self.threshold
    }

    pub fn is_duplicate(&self, a: &RawListing, b: &RawListing) -> bool {
        self.is_match(&self.score(a, b))
    }

    /// Partition `raw` into unique listings.
    ///
    /// Members keep their input order and clusters are ordered by the
    /// position of their first member. Quadratic in the input size.
    pub fn deduplicate(&self, raw: Vec<RawListing>) -> Vec<UniqueListing> {
        let normalized: Vec<Normalized> = raw.iter().map(Normalized::of).collect();
        let mut sets = UnionFind::new(raw.len());
        let mut refused = 0usize;

        for i in 0..normalized.len() {
            for j in (i + 1)..normalized.len() {
                if self.is_match(&normalized[i].score(&normalized[j]))
                    && !sets.union(i, j, self.max_cluster_size)
                {
                    refused += 1;
                }
            }
        }
        if refused > 0 {
            tracing::debug!(
                %refused,
                max_cluster_size = ?self.max_cluster_size,
                "Cluster size cap refused matching pairs"
            );
        }

        // Group positions by root, in order of each cluster's first member.
        let mut cluster_of_root: Vec<Option<usize>> = vec![None; raw.len()];
        let mut clusters: Vec<Vec<usize>> = Vec::new();
        for position in 0..raw.len() {
            let root = sets.find(position);
            let index = *cluster_of_root[root].get_or_insert_with(|| {
                clusters.push(Vec::new());
                clusters.len() - 1
            });
            clusters[index].push(position);
        }

        let mut slots: Vec<Option<RawListing>> = raw.into_iter().map(Some).collect();
        let unique: Vec<UniqueListing> = clusters
            .into_iter()
            .filter_map(|positions| {
                let members: Vec<RawListing> = positions
                    .iter()
                    .filter_map(|&p| slots[p].take())
                    .collect();
                let canonical = pick_canonical(&members)?.clone();
                Some(UniqueListing { canonical, members })
            })
            .collect();

        tracing::debug!(
            raw = %normalized.len(),
            unique = %unique.len(),
            threshold = %self.threshold,
            "Deduplicated listings"
        );
        unique
    }
}

/// Preference order for the representative member: a non-empty
/// description, then the most recent fetch, then the lowest source id,
/// then the earliest position.
fn pick_canonical(members: &[RawListing]) -> Option<&RawListing> {
    members
        .iter()
        .enumerate()
        .min_by(|(pa, a), (pb, b)| {
            a.description
                .trim()
                .is_empty()
                .cmp(&b.description.trim().is_empty())
                .then_with(|| b.fetched_at.cmp(&a.fetched_at))
                .then_with(|| a.source_id.cmp(&b.source_id))
                .then_with(|| pa.cmp(pb))
        })
        .map(|(_, listing)| listing)
}

/// Convenience wrapper using the default threshold.
pub fn deduplicate(raw: Vec<RawListing>) -> Vec<UniqueListing> {
    Deduplicator::default().deduplicate(raw)
}
