//! Multi-criteria decision analysis
//!
//! Weighted sum over four normalized criteria. Candidates rank by
//! descending total, then Urgency, then arrival order, then id, so the
//! result never depends on the order candidates were evaluated in.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::error::McdaError;

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;
/// Totals closer than this compare equal
const TOTAL_RESOLUTION: f64 = 1e9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    Safety,
    Urgency,
    Capacity,
    Impact,
}

impl Criterion {
    pub const ALL: [Criterion; 4] = [
        Criterion::Safety,
        Criterion::Urgency,
        Criterion::Capacity,
        Criterion::Impact,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Criterion::Safety => "safety",
            Criterion::Urgency => "urgency",
            Criterion::Capacity => "capacity",
            Criterion::Impact => "impact",
        }
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-criterion values, each in [0,1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CriterionScores {
    pub safety: f64,
    pub urgency: f64,
    pub capacity: f64,
    pub impact: f64,
}

impl CriterionScores {
    pub fn new(safety: f64, urgency: f64, capacity: f64, impact: f64) -> Result<Self, McdaError> {
        let scores = Self {
            safety,
            urgency,
            capacity,
            impact,
        };
        for c in Criterion::ALL {
            let value = scores.get(c);
            if !(0.0..=1.0).contains(&value) {
                return Err(McdaError::ScoreOutOfRange {
                    criterion: c.as_str(),
                    value,
                });
            }
        }
        Ok(scores)
    }

    /// Clamp into [0,1]; NaN becomes 0
    pub fn clamped(safety: f64, urgency: f64, capacity: f64, impact: f64) -> Self {
        let clamp = |v: f64| if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) };
        Self {
            safety: clamp(safety),
            urgency: clamp(urgency),
            capacity: clamp(capacity),
            impact: clamp(impact),
        }
    }

    pub fn get(&self, criterion: Criterion) -> f64 {
        match criterion {
            Criterion::Safety => self.safety,
            Criterion::Urgency => self.urgency,
            Criterion::Capacity => self.capacity,
            Criterion::Impact => self.impact,
        }
    }

    pub fn values(&self) -> [f64; 4] {
        [self.safety, self.urgency, self.capacity, self.impact]
    }

    /// Population standard deviation across the four criteria
    pub fn dispersion(&self) -> f64 {
        let values = self.values();
        let mean = values.iter().sum::<f64>() / 4.0;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / 4.0;
        variance.sqrt()
    }
}

/// Criterion weights summing to 1
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct McdaWeights {
    safety: f64,
    urgency: f64,
    capacity: f64,
    impact: f64,
}

impl Default for McdaWeights {
    fn default() -> Self {
        Self {
            safety: 0.35,
            urgency: 0.30,
            capacity: 0.20,
            impact: 0.15,
        }
    }
}

impl McdaWeights {
    pub fn new(
        safety: f64,
        urgency: f64,
        capacity: f64,
        impact: f64,
    ) -> Result<Self, McdaError> {
        let raw = [safety, urgency, capacity, impact];
        let sum: f64 = raw.iter().sum();
        let each_valid = raw.iter().all(|w| w.is_finite() && (0.0..=1.0).contains(w));
        if !each_valid || (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(McdaError::InvalidWeights { sum });
        }
        Ok(Self {
            safety,
            urgency,
            capacity,
            impact,
        })
    }

    /// Safety and urgency dominate
    pub fn for_emergency() -> Self {
        Self {
            safety: 0.45,
            urgency: 0.35,
            capacity: 0.12,
            impact: 0.08,
        }
    }

    pub fn for_routine() -> Self {
        Self {
            safety: 0.25,
            urgency: 0.20,
            capacity: 0.30,
            impact: 0.25,
        }
    }

    pub fn for_overcrowding() -> Self {
        Self {
            safety: 0.30,
            urgency: 0.25,
            capacity: 0.30,
            impact: 0.15,
        }
    }

    pub fn get(&self, criterion: Criterion) -> f64 {
        match criterion {
            Criterion::Safety => self.safety,
            Criterion::Urgency => self.urgency,
            Criterion::Capacity => self.capacity,
            Criterion::Impact => self.impact,
        }
    }
}

/// Named weight sets selectable from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum McdaPreset {
    Emergency,
    Routine,
    Overcrowding,
}

impl McdaPreset {
    pub fn weights(&self) -> McdaWeights {
        match self {
            McdaPreset::Emergency => McdaWeights::for_emergency(),
            McdaPreset::Routine => McdaWeights::for_routine(),
            McdaPreset::Overcrowding => McdaWeights::for_overcrowding(),
        }
    }
}

/// Band of a weighted total
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl PriorityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriorityLevel::Low => "low",
            PriorityLevel::Medium => "medium",
            PriorityLevel::High => "high",
            PriorityLevel::Critical => "critical",
        }
    }
}

/// Weighted total plus the per-criterion pieces that produced it
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct McdaBreakdown {
    pub scores: CriterionScores,
    pub weights: McdaWeights,
    /// weight * score per criterion
    pub contributions: CriterionScores,
    pub weighted_total: f64,
    pub dominant: Criterion,
}

impl McdaBreakdown {
    pub fn priority_level(&self) -> PriorityLevel {
        if self.weighted_total >= 0.8 {
            PriorityLevel::Critical
        } else if self.weighted_total >= 0.6 {
            PriorityLevel::High
        } else if self.weighted_total >= 0.4 {
            PriorityLevel::Medium
        } else {
            PriorityLevel::Low
        }
    }

    fn total_key(&self) -> i64 {
        (self.weighted_total * TOTAL_RESOLUTION).round() as i64
    }
}

/// One option to rank
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate<T> {
    pub id: String,
    /// Earlier arrivals win final ties
    pub arrival: u64,
    pub scores: CriterionScores,
    pub item: T,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ranked<T> {
    pub rank: usize,
    pub candidate: Candidate<T>,
    pub breakdown: McdaBreakdown,
}

#[derive(Debug, Clone, Default)]
pub struct McdaEngine {
    weights: McdaWeights,
}

impl McdaEngine {
    pub fn new(weights: McdaWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &McdaWeights {
        &self.weights
    }

    pub fn score(&self, scores: &CriterionScores) -> McdaBreakdown {
        let w = &self.weights;
        let contributions = CriterionScores {
            safety: w.safety * scores.safety,
            urgency: w.urgency * scores.urgency,
            capacity: w.capacity * scores.capacity,
            impact: w.impact * scores.impact,
        };
        let total: f64 = contributions.values().iter().sum();

        let mut dominant = Criterion::Safety;
        for c in Criterion::ALL {
            if contributions.get(c) > contributions.get(dominant) {
                dominant = c;
            }
        }

        McdaBreakdown {
            scores: *scores,
            weights: *w,
            contributions,
            weighted_total: total.clamp(0.0, 1.0),
            dominant,
        }
    }

    /// Score and sort candidates, best first
    pub fn rank<T>(&self, candidates: Vec<Candidate<T>>) -> Vec<Ranked<T>> {
        let mut scored: Vec<(McdaBreakdown, Candidate<T>)> = candidates
            .into_iter()
            .map(|c| (self.score(&c.scores), c))
            .collect();

        scored.sort_by(|(a_score, a), (b_score, b)| compare(a_score, a, b_score, b));

        scored
            .into_iter()
            .enumerate()
            .map(|(i, (breakdown, candidate))| Ranked {
                rank: i + 1,
                candidate,
                breakdown,
            })
            .collect()
    }
}

fn compare<T>(
    a_score: &McdaBreakdown,
    a: &Candidate<T>,
    b_score: &McdaBreakdown,
    b: &Candidate<T>,
) -> Ordering {
    b_score
        .total_key()
        .cmp(&a_score.total_key())
        .then_with(|| b.scores.urgency.total_cmp(&a.scores.urgency))
        .then_with(|| a.arrival.cmp(&b.arrival))
        .then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, arrival: u64, s: [f64; 4]) -> Candidate<()> {
        Candidate {
            id: id.to_string(),
            arrival,
            scores: CriterionScores::new(s[0], s[1], s[2], s[3]).unwrap(),
            item: (),
        }
    }

    fn ids<T>(ranked: &[Ranked<T>]) -> Vec<&str> {
        ranked.iter().map(|r| r.candidate.id.as_str()).collect()
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        assert!(McdaWeights::new(0.4, 0.3, 0.2, 0.1).is_ok());
        assert!(McdaWeights::new(0.4, 0.3, 0.2, 0.2).is_err());
        assert!(McdaWeights::new(1.2, -0.2, 0.0, 0.0).is_err());
        assert!(McdaWeights::new(f64::NAN, 0.3, 0.2, 0.5).is_err());
    }

    #[test]
    fn test_presets_are_valid() {
        for w in [
            McdaWeights::default(),
            McdaPreset::Emergency.weights(),
            McdaPreset::Routine.weights(),
            McdaPreset::Overcrowding.weights(),
        ] {
            let sum: f64 = Criterion::ALL.iter().map(|c| w.get(*c)).sum();
            assert!((sum - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_weighted_total_stays_in_unit_interval() {
        let weight_sets = [
            McdaWeights::default(),
            McdaWeights::new(1.0, 0.0, 0.0, 0.0).unwrap(),
            McdaWeights::new(0.25, 0.25, 0.25, 0.25).unwrap(),
            McdaPreset::Emergency.weights(),
        ];
        let grid = [0.0, 0.13, 0.5, 0.99, 1.0];
        for w in weight_sets {
            let engine = McdaEngine::new(w);
            for &a in &grid {
                for &b in &grid {
                    let scores = CriterionScores::new(a, b, 1.0 - a, b).unwrap();
                    let total = engine.score(&scores).weighted_total;
                    assert!((0.0..=1.0).contains(&total), "total {total}");
                }
            }
        }
        let max = McdaEngine::default().score(&CriterionScores::new(1.0, 1.0, 1.0, 1.0).unwrap());
        assert!((max.weighted_total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_priority_level_bands() {
        let engine = McdaEngine::new(McdaWeights::new(0.25, 0.25, 0.25, 0.25).unwrap());
        let level = |v: f64| {
            let scores = CriterionScores::new(v, v, v, v).unwrap();
            engine.score(&scores).priority_level()
        };
        assert_eq!(level(1.0), PriorityLevel::Critical);
        assert_eq!(level(0.7), PriorityLevel::High);
        assert_eq!(level(0.5), PriorityLevel::Medium);
        assert_eq!(level(0.39), PriorityLevel::Low);
    }

    #[test]
    fn test_breakdown_dominant_criterion() {
        let engine = McdaEngine::default();
        let b = engine.score(&CriterionScores::new(0.1, 0.9, 0.2, 0.2).unwrap());
        assert_eq!(b.dominant, Criterion::Urgency);
        assert!((b.contributions.urgency - 0.27).abs() < 1e-12);
        let sum: f64 = b.contributions.values().iter().sum();
        assert!((sum - b.weighted_total).abs() < 1e-12);
    }

    #[test]
    fn test_ranking_independent_of_evaluation_order() {
        let engine = McdaEngine::default();
        let set = vec![
            candidate("a", 0, [0.9, 0.2, 0.5, 0.5]),
            candidate("b", 1, [0.4, 0.9, 0.6, 0.1]),
            candidate("c", 2, [0.7, 0.7, 0.7, 0.7]),
            candidate("d", 3, [0.1, 0.1, 0.1, 0.1]),
        ];
        let forward = engine.rank(set.clone());
        let mut reversed = set.clone();
        reversed.reverse();
        let backward = engine.rank(reversed);
        let mut rotated = set;
        rotated.rotate_left(2);
        let shuffled = engine.rank(rotated);

        assert_eq!(ids(&forward), ids(&backward));
        assert_eq!(ids(&forward), ids(&shuffled));
        assert_eq!(forward[0].candidate.id, "c");
        assert_eq!(forward.last().unwrap().candidate.id, "d");
        assert_eq!(forward[0].rank, 1);
    }

    #[test]
    fn test_equal_totals_break_on_urgency() {
        // Equal weights make both totals 0.5
        let engine = McdaEngine::new(McdaWeights::new(0.25, 0.25, 0.25, 0.25).unwrap());
        let ranked = engine.rank(vec![
            candidate("low_urgency", 0, [0.8, 0.2, 0.5, 0.5]),
            candidate("high_urgency", 1, [0.2, 0.8, 0.5, 0.5]),
        ]);
        assert_eq!(
            ranked[0].breakdown.weighted_total,
            ranked[1].breakdown.weighted_total
        );
        assert_eq!(ids(&ranked), vec!["high_urgency", "low_urgency"]);
    }

    #[test]
    fn test_full_tie_breaks_on_arrival_not_insertion() {
        let engine = McdaEngine::default();
        let ranked = engine.rank(vec![
            candidate("late", 7, [0.5, 0.5, 0.5, 0.5]),
            candidate("early", 3, [0.5, 0.5, 0.5, 0.5]),
        ]);
        assert_eq!(ids(&ranked), vec!["early", "late"]);
    }

    #[test]
    fn test_out_of_range_scores_rejected() {
        assert_eq!(
            CriterionScores::new(0.5, 1.5, 0.5, 0.5),
            Err(McdaError::ScoreOutOfRange {
                criterion: "urgency",
                value: 1.5
            })
        );
        assert!(CriterionScores::new(f64::NAN, 0.5, 0.5, 0.5).is_err());
        let clamped = CriterionScores::clamped(-1.0, 2.0, f64::NAN, 0.3);
        assert_eq!(clamped.values(), [0.0, 1.0, 0.0, 0.3]);
    }
}
