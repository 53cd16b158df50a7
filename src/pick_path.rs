//! Pick-path optimization over bin coordinates.
//!
//! Pure and stateless: bin codes are parsed into grid coordinates and a
//! nearest-neighbor heuristic sequences the visits. Exact TSP is
//! deliberately not attempted; the heuristic is O(n²) and good enough for
//! batch-sized pick lists.

use crate::errors::ServiceError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const DEFAULT_POSITION_STEP: f64 = 5.0;
const DEFAULT_LEVEL_STEP: f64 = 1.5;
const DEFAULT_CROSS_AISLE_PENALTY: f64 = 15.0;

/// Parsed bin location mapped into warehouse grid coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinCoordinates {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub aisle: String,
    pub position: u32,
    pub level: u32,
}

/// Ordered pick path with its total walking distance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizedPath {
    pub path: Vec<String>,
    pub total_distance: f64,
    pub bin_count: usize,
}

/// Heuristic path quality versus the naive input-order traversal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EfficiencyScore {
    /// Percentage improvement over the sequential traversal.
    pub score: f64,
    pub improvement: f64,
    pub sequential_distance: f64,
    pub optimized_distance: f64,
    pub path: Vec<String>,
}

/// Site-level aisle coordinate table. Supplied externally per site; the
/// default covers a four-aisle layout.
#[derive(Debug, Clone)]
pub struct WarehouseLayout {
    aisle_x: HashMap<String, f64>,
    position_step: f64,
    level_step: f64,
    cross_aisle_penalty: f64,
}

impl Default for WarehouseLayout {
    fn default() -> Self {
        let mut aisle_x = HashMap::new();
        aisle_x.insert("A".to_string(), 0.0);
        aisle_x.insert("B".to_string(), 25.0);
        aisle_x.insert("C".to_string(), 50.0);
        aisle_x.insert("D".to_string(), 75.0);
        Self {
            aisle_x,
            position_step: DEFAULT_POSITION_STEP,
            level_step: DEFAULT_LEVEL_STEP,
            cross_aisle_penalty: DEFAULT_CROSS_AISLE_PENALTY,
        }
    }
}

impl WarehouseLayout {
    pub fn new(
        aisle_x: HashMap<String, f64>,
        position_step: f64,
        level_step: f64,
        cross_aisle_penalty: f64,
    ) -> Self {
        Self {
            aisle_x,
            position_step,
            level_step,
            cross_aisle_penalty,
        }
    }

    /// Parses a bin code like `A-07-02` (aisle-position-level; level
    /// optional) into grid coordinates. Aisles missing from the layout
    /// table fall back to x = 0.
    pub fn coordinates_of(&self, bin_location: &str) -> Result<BinCoordinates, ServiceError> {
        let parts: Vec<&str> = bin_location.split('-').collect();
        if parts.len() < 2 || parts[0].is_empty() {
            return Err(ServiceError::MalformedBinLocation(bin_location.to_string()));
        }

        let aisle = parts[0].to_uppercase();
        let position: u32 = parts[1]
            .parse()
            .map_err(|_| ServiceError::MalformedBinLocation(bin_location.to_string()))?;
        let level: u32 = match parts.get(2) {
            Some(raw) => raw
                .parse()
                .map_err(|_| ServiceError::MalformedBinLocation(bin_location.to_string()))?,
            None => 1,
        };

        let x = self.aisle_x.get(&aisle).copied().unwrap_or(0.0);
        let y = f64::from(position % 10) * self.position_step;
        let z = f64::from(level.saturating_sub(1)) * self.level_step;

        Ok(BinCoordinates {
            x,
            y,
            z,
            aisle,
            position,
            level,
        })
    }

    /// Manhattan distance on (x, y, z) plus a fixed penalty when the bins
    /// sit in different aisles. The penalty models the walk around the end
    /// of an aisle, which a plain grid distance cannot express.
    pub fn distance_between(&self, from: &BinCoordinates, to: &BinCoordinates) -> f64 {
        let manhattan = (to.x - from.x).abs() + (to.y - from.y).abs() + (to.z - from.z).abs();
        if from.aisle != to.aisle {
            manhattan + self.cross_aisle_penalty
        } else {
            manhattan
        }
    }

    /// Distance between two bin codes.
    pub fn distance(&self, bin_a: &str, bin_b: &str) -> Result<f64, ServiceError> {
        let a = self.coordinates_of(bin_a)?;
        let b = self.coordinates_of(bin_b)?;
        Ok(self.distance_between(&a, &b))
    }

    /// Nearest-neighbor pick path: start at `bins[0]`, repeatedly visit the
    /// closest unvisited bin. Never revisits a bin.
    pub fn optimize_path(&self, bins: &[String]) -> Result<OptimizedPath, ServiceError> {
        if bins.is_empty() {
            return Ok(OptimizedPath {
                path: Vec::new(),
                total_distance: 0.0,
                bin_count: 0,
            });
        }

        let coords = self.parse_all(bins)?;
        if bins.len() == 1 {
            return Ok(OptimizedPath {
                path: bins.to_vec(),
                total_distance: 0.0,
                bin_count: 1,
            });
        }

        let mut path_idx = vec![0usize];
        let mut unvisited: Vec<usize> = (1..bins.len()).collect();

        while !unvisited.is_empty() {
            let current = *path_idx.last().expect("path is never empty");
            let (pos, _) = unvisited
                .iter()
                .enumerate()
                .map(|(pos, &idx)| {
                    (pos, self.distance_between(&coords[current], &coords[idx]))
                })
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .expect("unvisited is non-empty");
            path_idx.push(unvisited.remove(pos));
        }

        let total_distance = path_idx
            .windows(2)
            .map(|w| self.distance_between(&coords[w[0]], &coords[w[1]]))
            .sum();

        Ok(OptimizedPath {
            path: path_idx.iter().map(|&i| bins[i].clone()).collect(),
            total_distance,
            bin_count: bins.len(),
        })
    }

    /// Compares the heuristic path against the naive input-order traversal.
    pub fn efficiency_score(&self, bins: &[String]) -> Result<EfficiencyScore, ServiceError> {
        if bins.len() < 2 {
            return Ok(EfficiencyScore {
                score: 0.0,
                improvement: 0.0,
                sequential_distance: 0.0,
                optimized_distance: 0.0,
                path: bins.to_vec(),
            });
        }

        let coords = self.parse_all(bins)?;
        let sequential_distance: f64 = coords
            .windows(2)
            .map(|w| self.distance_between(&w[0], &w[1]))
            .sum();

        let optimized = self.optimize_path(bins)?;
        let improvement = sequential_distance - optimized.total_distance;
        let score = if sequential_distance > 0.0 {
            improvement / sequential_distance * 100.0
        } else {
            0.0
        };

        Ok(EfficiencyScore {
            score,
            improvement,
            sequential_distance,
            optimized_distance: optimized.total_distance,
            path: optimized.path,
        })
    }

    /// The `limit` closest target bins from the current position.
    pub fn nearest_bins(
        &self,
        current: &str,
        targets: &[String],
        limit: usize,
    ) -> Result<Vec<(String, f64)>, ServiceError> {
        let from = self.coordinates_of(current)?;
        let mut distances = Vec::new();
        for target in targets {
            if target == current {
                continue;
            }
            let to = self.coordinates_of(target)?;
            distances.push((target.clone(), self.distance_between(&from, &to)));
        }
        distances.sort_by(|a, b| a.1.total_cmp(&b.1));
        distances.truncate(limit);
        Ok(distances)
    }

    fn parse_all(&self, bins: &[String]) -> Result<Vec<BinCoordinates>, ServiceError> {
        bins.iter().map(|b| self.coordinates_of(b)).collect()
    }
}
