//! Exit classification.
//!
//! A trail is matched to the exit it actually used: the first trail position,
//! in recorded order, that falls inside any exit region decides the match.
//! When that position lies inside several overlapping regions the smallest
//! region wins, then the lexically smallest label.
//!
//! Everything here is a pure function of its inputs.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::geometry::{ExitRegion, Position};

/// Outcome of classifying one trail.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// The trail passed through the exit with this label.
    Exit(String),
    /// No trail position fell inside any exit region.
    Unmatched,
}

impl Classification {
    /// The matched label, if any.
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        match self {
            Self::Exit(label) => Some(label),
            Self::Unmatched => None,
        }
    }

    /// Whether the trail matched no exit.
    #[must_use]
    pub fn is_unmatched(&self) -> bool {
        matches!(self, Self::Unmatched)
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exit(label) => write!(f, "{label}"),
            Self::Unmatched => write!(f, "unmatched"),
        }
    }
}

/// The first trail position found inside an exit region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitHit<'r> {
    /// The matched region.
    pub region: &'r ExitRegion,
    /// Index of the matching position within the trail.
    pub trail_index: usize,
}

/// Pick among regions that all contain the same position.
fn tie_break(a: &ExitRegion, b: &ExitRegion) -> Ordering {
    a.area()
        .total_cmp(&b.area())
        .then_with(|| a.label.cmp(&b.label))
}

/// The region containing `position`, after the tie-break.
#[must_use]
pub fn region_at(position: Position, regions: &[ExitRegion]) -> Option<&ExitRegion> {
    regions
        .iter()
        .filter(|region| region.contains(position))
        .min_by(|a, b| tie_break(a, b))
}

/// Find the first trail position that lies inside an exit region.
#[must_use]
pub fn first_hit<'r, 'p, I>(trail: I, regions: &'r [ExitRegion]) -> Option<ExitHit<'r>>
where
    I: IntoIterator<Item = &'p Position>,
{
    trail
        .into_iter()
        .enumerate()
        .find_map(|(trail_index, position)| {
            region_at(*position, regions).map(|region| ExitHit {
                region,
                trail_index,
            })
        })
}

/// Classify a trail against a set of exit regions.
#[must_use]
pub fn classify<'p, I>(trail: I, regions: &[ExitRegion]) -> Classification
where
    I: IntoIterator<Item = &'p Position>,
{
    first_hit(trail, regions).map_or(Classification::Unmatched, |hit| {
        Classification::Exit(hit.region.label.clone())
    })
}

/// Like [`first_hit`], but only once a later trail position lies outside the
/// matched region, i.e. the flight entered the exit and has since left it.
#[must_use]
pub fn passed_through<'r, P>(trail: &[P], regions: &'r [ExitRegion]) -> Option<ExitHit<'r>>
where
    P: AsRef<Position>,
{
    let hit = first_hit(trail.iter().map(AsRef::as_ref), regions)?;
    trail[hit.trail_index + 1..]
        .iter()
        .any(|point| !hit.region.contains(*point.as_ref()))
        .then_some(hit)
}
