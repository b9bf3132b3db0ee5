//! Proxy selection strategies.
//!
//! Each strategy picks one proxy from the ordered candidate list produced
//! by the engine. Round-robin and sticky-session keep their cursor/affinity
//! state in the coordination store so every scheduler instance shares it.

use std::collections::HashMap;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::coordination::{CoordinationError, Coordinator};
use crate::storage::Proxy;

/// How the engine picks a proxy from the candidate list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationStrategy {
    /// Cycle through candidates in order via a shared cursor.
    RoundRobin,
    /// Uniform random pick.
    Random,
    /// Random pick biased by configured or stored weights.
    WeightedRandom,
    /// Pin an affinity key (e.g. a job) to one proxy for a TTL.
    StickySession,
}

impl RotationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RotationStrategy::RoundRobin => "round_robin",
            RotationStrategy::Random => "random",
            RotationStrategy::WeightedRandom => "weighted_random",
            RotationStrategy::StickySession => "sticky_session",
        }
    }
}

impl std::fmt::Display for RotationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RotationStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round_robin" => Ok(RotationStrategy::RoundRobin),
            "random" => Ok(RotationStrategy::Random),
            "weighted_random" => Ok(RotationStrategy::WeightedRandom),
            "sticky_session" => Ok(RotationStrategy::StickySession),
            other => Err(format!("unknown rotation strategy: {}", other)),
        }
    }
}

/// Picks the candidate index for a weighted-random draw.
///
/// Weight lookup order: configured map by label/host, then the map's
/// `default` entry, then the proxy's stored weight column. Non-positive
/// weights are treated as zero; if every weight is zero the draw degrades
/// to uniform. `draw` must be in `[0, 1)`.
pub fn weighted_index(candidates: &[Proxy], weights: &HashMap<String, f64>, draw: f64) -> usize {
    let effective: Vec<f64> = candidates
        .iter()
        .map(|p| {
            weights
                .get(p.weight_key())
                .or_else(|| weights.get("default"))
                .copied()
                .unwrap_or(p.weight)
                .max(0.0)
        })
        .collect();

    let total: f64 = effective.iter().sum();
    if total <= 0.0 {
        return (draw * candidates.len() as f64) as usize % candidates.len();
    }

    let mut threshold = draw * total;
    for (idx, w) in effective.iter().enumerate() {
        threshold -= w;
        if threshold < 0.0 {
            return idx;
        }
    }
    candidates.len() - 1
}

/// Selects a candidate index according to the strategy.
///
/// The candidate list must be non-empty; the engine guards that.
pub async fn select_index(
    strategy: RotationStrategy,
    candidates: &[Proxy],
    coordinator: &Coordinator,
    weights: &HashMap<String, f64>,
    affinity: Option<&str>,
    sticky_ttl: Duration,
) -> Result<usize, CoordinationError> {
    let len = candidates.len();

    match strategy {
        RotationStrategy::RoundRobin => {
            let cursor = coordinator.incr_raw("rr:index", 1).await?;
            Ok(((cursor - 1).rem_euclid(len as i64)) as usize)
        }
        RotationStrategy::Random => {
            let idx = rand::thread_rng().gen_range(0..len);
            Ok(idx)
        }
        RotationStrategy::WeightedRandom => {
            let draw: f64 = rand::thread_rng().gen();
            Ok(weighted_index(candidates, weights, draw))
        }
        RotationStrategy::StickySession => {
            let key = format!("sticky:{}", affinity.unwrap_or("global"));

            if let Some(stored) = coordinator.get_raw(&key).await? {
                if let Ok(idx) = stored.parse::<usize>() {
                    // Candidate set may have shrunk since the pin was made.
                    return Ok(idx % len);
                }
            }

            let idx = rand::thread_rng().gen_range(0..len);
            coordinator
                .set_ex_raw(&key, &idx.to_string(), sticky_ttl)
                .await?;
            Ok(idx)
        }
    }
}
