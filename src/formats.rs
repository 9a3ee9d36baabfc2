//! Reduction of a raw variant list into the shortlist shown to users

use serde::Serialize;
use std::collections::HashSet;

use crate::config::FormatsConfig;
use crate::extraction::Variant;

/// Limits applied when building a shortlist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShortlistPolicy {
    pub max_choices: usize,
    /// Resolution ceiling; taller variants are dropped before deduplication
    pub max_height: Option<u32>,
}

impl From<&FormatsConfig> for ShortlistPolicy {
    fn from(config: &FormatsConfig) -> Self {
        Self {
            max_choices: config.max_choices,
            max_height: config.max_height,
        }
    }
}

/// Variants strictly descending by height, one per height, bounded in length
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RankedShortlist(Vec<Variant>);

impl RankedShortlist {
    pub fn get(&self, index: usize) -> Option<&Variant> {
        self.0.get(index)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Variant> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Variant] {
        &self.0
    }
}

impl<'a> IntoIterator for &'a RankedShortlist {
    type Item = &'a Variant;
    type IntoIter = std::slice::Iter<'a, Variant>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Build the shortlist: drop heightless and over-ceiling variants, sort by
/// height descending (stable, so source order breaks ties), keep the first
/// variant of each height and stop at `max_choices`.
pub fn reduce(raw: &[Variant], policy: &ShortlistPolicy) -> RankedShortlist {
    let mut visual: Vec<(u32, &Variant)> = raw
        .iter()
        .filter_map(|v| v.height.filter(|h| *h > 0).map(|h| (h, v)))
        .filter(|(h, _)| policy.max_height.is_none_or(|max| *h <= max))
        .collect();

    visual.sort_by(|a, b| b.0.cmp(&a.0));

    let mut seen = HashSet::new();
    let shortlist = visual
        .into_iter()
        .filter(|(h, _)| seen.insert(*h))
        .take(policy.max_choices)
        .map(|(_, v)| v.clone())
        .collect();

    RankedShortlist(shortlist)
}
