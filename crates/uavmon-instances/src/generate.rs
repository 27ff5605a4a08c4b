//! Instance generators.
//!
//! Both generators produce the same tab-separated layout consumed by the
//! solver: a column header, one line of problem parameters, a marker line,
//! then one row per node holding the node id, travel times to every node,
//! the monitoring start time and the monitoring period.
//!
//! Travel times are distances rescaled from the source time scale
//! (`base_horizon`) to the requested planning horizon and rounded up.

use crate::name::InstanceName;
use anyhow::Result;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uavmon_core::atomic_write_bytes;

/// Self-distance of a node. Solomon sources rescale it like any other
/// distance; distance-matrix sources write it as is.
pub const INFINITY_DISTANCE: u64 = 10_000_000;
/// Period written for the depot, which is never monitored.
pub const INFINITY_PERIOD: u64 = 100_000;
/// Self-distance marker used by distance-matrix sources.
pub const DIAGONAL_MARKER: u64 = 1_111_112;

const SOLOMON_HEADER_LINES: usize = 9;
const COLUMN_HEADER: &str = "numNode\tnumCus\tID_Depot\tMile(min)\tBegin\tEnd\tnumUAV";
const NODE_MARKER: &str = "time_vec & deta1 & deta2:";

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("unknown instance family '{0}' (expected one of C1, C2, R1, RC1)")]
    UnknownFamily(String),
    #[error("source has {found} node lines, {needed} are required")]
    NotEnoughNodes { found: usize, needed: usize },
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("distance matrix is empty")]
    EmptyMatrix,
    #[error("distance matrix is not square: row {row} has {len} columns, expected {expected}")]
    NotSquare {
        row: usize,
        len: usize,
        expected: usize,
    },
    #[error("no monitoring period fits within horizon {0}")]
    NoPeriods(u32),
    #[error("base horizon must be positive")]
    ZeroBaseHorizon,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeScale {
    pub base_endurance: u64,
    pub base_horizon: u64,
}

impl TimeScale {
    pub fn for_family(family: &str) -> Result<Self, GenerateError> {
        let (base_endurance, base_horizon) = match family {
            "C1" | "C2" | "R1" => (90, 108),
            "RC1" => (110, 132),
            other => return Err(GenerateError::UnknownFamily(other.to_string())),
        };
        Ok(Self {
            base_endurance,
            base_horizon,
        })
    }

    fn scale_down(&self, value: u64, horizon: u32) -> u64 {
        value * u64::from(horizon) / self.base_horizon
    }

    fn travel_time(&self, distance: f64, horizon: u32) -> u64 {
        (distance * f64::from(horizon) / self.base_horizon as f64).ceil() as u64
    }
}

#[derive(Debug, Clone)]
pub struct GenerateParams {
    pub drones: u32,
    pub horizon: u32,
    pub periods: Vec<u32>,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRow {
    pub id: usize,
    pub travel: Vec<u64>,
    pub start: u64,
    pub period: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedInstance {
    pub name: InstanceName,
    /// node count, target count, depot id, endurance, begin, end, drone count
    pub header: [u64; 7],
    pub rows: Vec<NodeRow>,
}

impl GeneratedInstance {
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(COLUMN_HEADER);
        out.push('\n');
        push_tabbed(&mut out, self.header.iter().copied());
        out.push_str(NODE_MARKER);
        out.push('\n');
        for row in &self.rows {
            let values = std::iter::once(row.id as u64)
                .chain(row.travel.iter().copied())
                .chain([row.start, row.period]);
            push_tabbed(&mut out, values);
        }
        out
    }

    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(self.name.file_name());
        atomic_write_bytes(&path, self.render().as_bytes())?;
        Ok(path)
    }

    /// Number of targets per assigned period; the depot is excluded.
    pub fn period_distribution(&self) -> BTreeMap<u64, usize> {
        let mut out = BTreeMap::new();
        for row in self.rows.iter().skip(1) {
            *out.entry(row.period).or_default() += 1;
        }
        out
    }
}

fn push_tabbed(out: &mut String, values: impl Iterator<Item = u64>) {
    for v in values {
        out.push_str(&v.to_string());
        out.push('\t');
    }
    out.push('\n');
}

/// Reads depot plus `targets` node coordinates from a Solomon VRPTW file.
pub fn read_solomon_positions<R: BufRead>(
    reader: R,
    targets: usize,
) -> Result<Vec<(i64, i64)>, GenerateError> {
    let needed = targets + 1;
    let mut positions = Vec::with_capacity(needed);
    for (idx, line) in reader.lines().enumerate().skip(SOLOMON_HEADER_LINES) {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.len() < 3 {
            return Err(GenerateError::Parse {
                line: idx + 1,
                message: format!("expected at least 3 columns, found {}", cols.len()),
            });
        }
        let coord = |s: &str| {
            s.parse::<i64>().map_err(|e| GenerateError::Parse {
                line: idx + 1,
                message: format!("bad coordinate '{}': {}", s, e),
            })
        };
        positions.push((coord(cols[1])?, coord(cols[2])?));
        if positions.len() == needed {
            return Ok(positions);
        }
    }
    Err(GenerateError::NotEnoughNodes {
        found: positions.len(),
        needed,
    })
}

/// Pairwise Euclidean distances rounded to two decimals.
pub fn euclidean_distances(positions: &[(i64, i64)]) -> Vec<Vec<f64>> {
    positions
        .iter()
        .enumerate()
        .map(|(i, a)| {
            positions
                .iter()
                .enumerate()
                .map(|(j, b)| {
                    if i == j {
                        INFINITY_DISTANCE as f64
                    } else {
                        let dx = (a.0 - b.0) as f64;
                        let dy = (a.1 - b.1) as f64;
                        ((dx * dx + dy * dy).sqrt() * 100.0).round() / 100.0
                    }
                })
                .collect()
        })
        .collect()
}

/// Reads a tab-separated square distance matrix with a header line and a
/// leading id column.
pub fn read_distance_matrix<R: BufRead>(reader: R) -> Result<Vec<Vec<u64>>, GenerateError> {
    let mut matrix = Vec::new();
    for (idx, line) in reader.lines().enumerate().skip(1) {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() < 2 {
            continue;
        }
        let row = parts[1..]
            .iter()
            .filter(|p| !p.trim().is_empty())
            .map(|p| {
                p.trim().parse::<u64>().map_err(|e| GenerateError::Parse {
                    line: idx + 1,
                    message: format!("bad distance '{}': {}", p, e),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        matrix.push(row);
    }

    let n = matrix.len();
    if n == 0 {
        return Err(GenerateError::EmptyMatrix);
    }
    if let Some((row, r)) = matrix.iter().enumerate().find(|(_, r)| r.len() != n) {
        return Err(GenerateError::NotSquare {
            row: row + 1,
            len: r.len(),
            expected: n,
        });
    }
    Ok(matrix)
}

/// Builds an instance from a distance matrix whose first node is the depot.
/// Infinite cells are written as `INFINITY_DISTANCE` without rescaling.
pub fn build_instance<R: Rng + ?Sized>(
    family: &str,
    distances: &[Vec<f64>],
    scale: TimeScale,
    params: &GenerateParams,
    rng: &mut R,
) -> Result<GeneratedInstance, GenerateError> {
    if scale.base_horizon == 0 {
        return Err(GenerateError::ZeroBaseHorizon);
    }
    if distances.is_empty() {
        return Err(GenerateError::EmptyMatrix);
    }
    let valid: Vec<u32> = params
        .periods
        .iter()
        .copied()
        .filter(|p| *p <= params.horizon)
        .collect();
    let longest = valid
        .iter()
        .copied()
        .max()
        .ok_or(GenerateError::NoPeriods(params.horizon))?;

    let node_count = distances.len();
    let targets = node_count - 1;
    let mut rows = Vec::with_capacity(node_count);
    for (i, dist_row) in distances.iter().enumerate() {
        let travel: Vec<u64> = dist_row
            .iter()
            .map(|d| {
                if d.is_infinite() {
                    INFINITY_DISTANCE
                } else {
                    scale.travel_time(*d, params.horizon)
                }
            })
            .collect();

        let period = if i == 0 {
            INFINITY_PERIOD
        } else {
            let to_depot = travel[0];
            let candidates: Vec<u32> = valid
                .iter()
                .copied()
                .filter(|p| u64::from(*p) > to_depot)
                .collect();
            if candidates.is_empty() {
                tracing::warn!(
                    node = i,
                    to_depot,
                    period = longest,
                    "no period exceeds depot travel time, using the longest"
                );
                u64::from(longest)
            } else {
                u64::from(*candidates.choose(rng).unwrap_or(&longest))
            }
        };

        rows.push(NodeRow {
            id: i,
            travel,
            start: 0,
            period,
        });
    }

    Ok(GeneratedInstance {
        name: InstanceName::new(
            family,
            targets as u32,
            params.drones,
            params.horizon,
            &params.version,
        ),
        header: [
            node_count as u64,
            targets as u64,
            0,
            scale.scale_down(scale.base_endurance, params.horizon),
            0,
            scale.scale_down(scale.base_horizon, params.horizon),
            u64::from(params.drones),
        ],
        rows,
    })
}

pub fn from_solomon<B: BufRead, R: Rng + ?Sized>(
    reader: B,
    family: &str,
    targets: usize,
    params: &GenerateParams,
    rng: &mut R,
) -> Result<GeneratedInstance, GenerateError> {
    let scale = TimeScale::for_family(family)?;
    let positions = read_solomon_positions(reader, targets)?;
    build_instance(family, &euclidean_distances(&positions), scale, params, rng)
}

pub fn from_distance_matrix<B: BufRead, R: Rng + ?Sized>(
    reader: B,
    family: &str,
    scale: TimeScale,
    params: &GenerateParams,
    rng: &mut R,
) -> Result<GeneratedInstance, GenerateError> {
    let matrix = read_distance_matrix(reader)?;
    let distances: Vec<Vec<f64>> = matrix
        .iter()
        .enumerate()
        .map(|(i, row)| {
            row.iter()
                .enumerate()
                .map(|(j, d)| {
                    if i == j || *d == DIAGONAL_MARKER {
                        f64::INFINITY
                    } else {
                        *d as f64
                    }
                })
                .collect()
        })
        .collect();
    build_instance(family, &distances, scale, params, rng)
}
