//! Cluster definitions and their registry
//!
//! The registry turns host supplied definition records into typed
//! [`ClusterDefinition`]s, synthesizes grid groups, and counts loads in a
//! generation number that invalidates every cached result.

use super::distance::DistanceStrategy;
use super::grid::{DEFAULT_CELL_SIZE, GridGroupStrategy, GridStrategy};
use super::strategy::ClusterKind;
use super::tree::{TreeParams, TreeStrategy};
use crate::config::{self, DisplayParams, RawDefinition};
use crate::error::Result;
use rustc_hash::FxHashMap;

/// Merge distance of tree definitions without a `distance` key
pub const DEFAULT_TREE_DISTANCE: f64 = 16.0;

/// Merge distance of distance definitions without a `distance` key
pub const DEFAULT_PROXIMITY_DISTANCE: f64 = 128.0;

pub const DEFAULT_LIMIT: usize = 2;

#[derive(Debug, Clone)]
pub struct ClusterDefinition {
    pub id: String,
    pub kind: ClusterKind,
    /// Minimum member count of an emitted record
    pub limit: usize,
    pub limit_on_sum: bool,
    /// Skip shadow records for empty grid cells
    pub omit_empties: bool,
    pub group_key: Option<String>,
    pub display: DisplayParams,
}

impl ClusterDefinition {
    /// Parses one record; `index` names definitions without an `id`
    pub fn from_raw(raw: &RawDefinition, index: usize) -> Self {
        let id = config::text(raw, "id").unwrap_or_else(|| format!("cluster{}", index));
        let limit = config::number(raw, "limit", &id)
            .map(|l| l.max(1.0) as usize)
            .unwrap_or(DEFAULT_LIMIT);

        let kind = match config::text(raw, "type").as_deref().map(str::to_ascii_lowercase) {
            Some(t) if t == "tree" => ClusterKind::Tree(TreeStrategy {
                distance: positive(config::number(raw, "distance", &id))
                    .unwrap_or(DEFAULT_TREE_DISTANCE),
                params: tree_params(raw, &id),
            }),
            Some(t) if t == "distance" => ClusterKind::Distance(DistanceStrategy {
                distance: positive(config::number(raw, "distance", &id))
                    .unwrap_or(DEFAULT_PROXIMITY_DISTANCE),
            }),
            other => {
                if let Some(t) = other.filter(|t| t != "grid") {
                    log::warn!("definition {}: unknown type {}, using grid", id, t);
                }
                let fallback = positive(config::number(raw, "distance", &id));
                let cx = positive(config::number(raw, "distanceX", &id))
                    .or(fallback)
                    .unwrap_or(DEFAULT_CELL_SIZE);
                let cy = positive(config::number(raw, "distanceY", &id))
                    .or(fallback)
                    .unwrap_or(DEFAULT_CELL_SIZE);
                ClusterKind::Grid(GridStrategy {
                    cell: (cx, cy),
                    group: None,
                })
            }
        };

        let group_key = match kind {
            ClusterKind::Grid(_) => config::text(raw, "groupID").filter(|k| !k.is_empty()),
            _ => None,
        };

        ClusterDefinition {
            limit,
            limit_on_sum: config::flag(raw, "limitOnSum", &id).unwrap_or(false),
            omit_empties: config::flag(raw, "omitempties", &id).unwrap_or(true),
            group_key,
            display: DisplayParams::from_raw(raw, &id),
            kind,
            id,
        }
    }
}

fn positive(value: Option<f64>) -> Option<f64> {
    value.filter(|v| *v > 0.0)
}

fn tree_params(raw: &RawDefinition, id: &str) -> TreeParams {
    let d = TreeParams::default();
    TreeParams {
        lod_bias: config::number(raw, "lodbias", id).unwrap_or(d.lod_bias),
        max_lod: config::number(raw, "maxlod", id)
            .map(|m| m.clamp(0.0, 30.0) as i32)
            .unwrap_or(d.max_lod),
        tile_size: d.tile_size,
    }
}

#[derive(Debug, Default)]
pub struct ClusterRegistry {
    definitions: Vec<ClusterDefinition>,
    by_id: FxHashMap<String, usize>,
    generation: u64,
}

impl ClusterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces all definitions and bumps the generation
    ///
    /// Grid definitions sharing a group key are unioned by a synthesized
    /// group definition appended after the user definitions.
    pub fn load(&mut self, raw: &[RawDefinition]) {
        let mut definitions: Vec<ClusterDefinition> = raw
            .iter()
            .enumerate()
            .map(|(i, r)| ClusterDefinition::from_raw(r, i))
            .collect();

        let mut groups: Vec<(String, Vec<usize>)> = Vec::new();
        for (i, def) in definitions.iter().enumerate() {
            let Some(key) = &def.group_key else {
                continue;
            };
            match groups.iter_mut().find(|(k, _)| k == key) {
                Some((_, members)) => members.push(i),
                None => groups.push((key.clone(), vec![i])),
            }
        }

        for (key, members) in groups {
            if members.len() < 2 {
                continue;
            }
            let first = &definitions[members[0]];
            let cell = match &first.kind {
                ClusterKind::Grid(g) => g.cell,
                _ => (DEFAULT_CELL_SIZE, DEFAULT_CELL_SIZE),
            };
            let group_index = definitions.len();
            let group = ClusterDefinition {
                id: format!("group:{}", key),
                kind: ClusterKind::GridGroup(GridGroupStrategy {
                    members: members.clone(),
                    cell,
                    limit_on_sum: members.iter().any(|&m| definitions[m].limit_on_sum),
                }),
                limit: members
                    .iter()
                    .map(|&m| definitions[m].limit)
                    .min()
                    .unwrap_or(DEFAULT_LIMIT),
                limit_on_sum: members.iter().any(|&m| definitions[m].limit_on_sum),
                omit_empties: first.omit_empties,
                group_key: Some(key.clone()),
                display: first.display.clone(),
            };
            for &m in &members {
                if let ClusterKind::Grid(g) = &mut definitions[m].kind {
                    g.group = Some(group_index);
                    g.cell = cell;
                }
            }
            log::debug!("grid group {} unions {} definitions", key, members.len());
            definitions.push(group);
        }

        self.by_id = definitions
            .iter()
            .enumerate()
            .map(|(i, d)| (d.id.clone(), i))
            .collect();
        self.definitions = definitions;
        self.generation += 1;
        log::debug!(
            "loaded {} cluster definitions, generation {}",
            self.definitions.len(),
            self.generation
        );
    }

    /// Parses a JSON array of definitions and loads it
    pub fn load_json(&mut self, json: &str) -> Result<()> {
        let raw = config::parse_definitions(json)?;
        self.load(&raw);
        Ok(())
    }

    pub fn definitions(&self) -> &[ClusterDefinition] {
        &self.definitions
    }

    pub fn get(&self, index: usize) -> Option<&ClusterDefinition> {
        self.definitions.get(index)
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.by_id.get(id).copied()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Definition indices sorted by display order, load order on ties
    pub fn draw_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.definitions.len()).collect();
        order.sort_by_key(|&i| self.definitions[i].display.order);
        order
    }
}
