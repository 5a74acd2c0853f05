//! Uniform contract of the clustering strategies
//!
//! Every definition runs through the same five operations per recompute:
//! `init_workspace`, `pass1` (bucketing), `pass2` (aggregation), `decide`
//! (emitting records) and `check_cell` (single cell validity). The strategy of
//! a definition is picked once at load time as a [`ClusterKind`] variant.

use super::cache::{BaseEntry, ClusterOutput, ClusterRecord};
use super::distance::{DistanceStrategy, PointWorkspace};
use super::grid::{GridGroupStrategy, GridStrategy, GridWorkspace};
use super::point::Point;
use super::registry::ClusterDefinition;
use super::tree::TreeStrategy;
use crate::host::InstanceRef;
use bitvec::prelude::*;

/// Operations every strategy provides
pub trait ClusterStrategy {
    /// Fresh scratch data for one recompute
    fn init_workspace(&self) -> ClusterWorkspace;

    /// Collects the instances assigned to `def`
    fn pass1(&self, def: usize, pass: &mut Pass<'_>);

    /// Aggregates collected data, possibly across definitions
    fn pass2(&self, def: usize, pass: &mut Pass<'_>);

    /// Emits the output records of `def`
    fn decide(&self, def: usize, pass: &mut Pass<'_>);

    /// Checks if the instances of `cell` are to be clustered
    fn check_cell(&self, def: usize, cell: usize, pass: &Pass<'_>) -> bool;
}

/// Strategy of one definition
#[derive(Debug, Clone)]
pub enum ClusterKind {
    Grid(GridStrategy),
    GridGroup(GridGroupStrategy),
    Distance(DistanceStrategy),
    Tree(TreeStrategy),
}

impl ClusterKind {
    pub fn name(&self) -> &'static str {
        match self {
            ClusterKind::Grid(_) => "grid",
            ClusterKind::GridGroup(_) => "grid-group",
            ClusterKind::Distance(_) => "distance",
            ClusterKind::Tree(_) => "tree",
        }
    }

    /// Synthesized definitions never receive instances from the assignment rule
    pub fn is_group(&self) -> bool {
        matches!(self, ClusterKind::GridGroup(_))
    }
}

impl ClusterStrategy for ClusterKind {
    fn init_workspace(&self) -> ClusterWorkspace {
        match self {
            ClusterKind::Grid(s) => s.init_workspace(),
            ClusterKind::GridGroup(s) => s.init_workspace(),
            ClusterKind::Distance(s) => s.init_workspace(),
            ClusterKind::Tree(s) => s.init_workspace(),
        }
    }

    fn pass1(&self, def: usize, pass: &mut Pass<'_>) {
        match self {
            ClusterKind::Grid(s) => s.pass1(def, pass),
            ClusterKind::GridGroup(s) => s.pass1(def, pass),
            ClusterKind::Distance(s) => s.pass1(def, pass),
            ClusterKind::Tree(s) => s.pass1(def, pass),
        }
    }

    fn pass2(&self, def: usize, pass: &mut Pass<'_>) {
        match self {
            ClusterKind::Grid(s) => s.pass2(def, pass),
            ClusterKind::GridGroup(s) => s.pass2(def, pass),
            ClusterKind::Distance(s) => s.pass2(def, pass),
            ClusterKind::Tree(s) => s.pass2(def, pass),
        }
    }

    fn decide(&self, def: usize, pass: &mut Pass<'_>) {
        match self {
            ClusterKind::Grid(s) => s.decide(def, pass),
            ClusterKind::GridGroup(s) => s.decide(def, pass),
            ClusterKind::Distance(s) => s.decide(def, pass),
            ClusterKind::Tree(s) => s.decide(def, pass),
        }
    }

    fn check_cell(&self, def: usize, cell: usize, pass: &Pass<'_>) -> bool {
        match self {
            ClusterKind::Grid(s) => s.check_cell(def, cell, pass),
            ClusterKind::GridGroup(s) => s.check_cell(def, cell, pass),
            ClusterKind::Distance(s) => s.check_cell(def, cell, pass),
            ClusterKind::Tree(s) => s.check_cell(def, cell, pass),
        }
    }
}

/// Scratch data of one definition
#[derive(Debug, Clone, Default)]
pub enum ClusterWorkspace {
    #[default]
    Idle,
    Grid(GridWorkspace),
    Points(PointWorkspace),
}

impl ClusterWorkspace {
    pub fn grid(&self) -> Option<&GridWorkspace> {
        match self {
            ClusterWorkspace::Grid(ws) => Some(ws),
            _ => None,
        }
    }

    pub fn grid_mut(&mut self) -> Option<&mut GridWorkspace> {
        match self {
            ClusterWorkspace::Grid(ws) => Some(ws),
            _ => None,
        }
    }

    pub fn points(&self) -> Option<&PointWorkspace> {
        match self {
            ClusterWorkspace::Points(ws) => Some(ws),
            _ => None,
        }
    }

    pub fn points_mut(&mut self) -> Option<&mut PointWorkspace> {
        match self {
            ClusterWorkspace::Points(ws) => Some(ws),
            _ => None,
        }
    }

    /// Output record emitted for `cell`, if any
    pub fn record_for_cell(&self, cell: usize) -> Option<usize> {
        match self {
            ClusterWorkspace::Idle => None,
            ClusterWorkspace::Grid(ws) => ws.cells.get(cell).and_then(|c| c.record),
            ClusterWorkspace::Points(ws) => ws.cell_records.get(&cell).copied(),
        }
    }
}

/// Scratch data of all definitions for one recompute
#[derive(Debug, Default)]
pub struct Workspace {
    pub clusters: Vec<ClusterWorkspace>,
}

impl Workspace {
    /// Allocates scratch data for the definitions selected by `mask`
    pub fn new(definitions: &[ClusterDefinition], mask: &BitSlice) -> Self {
        let clusters = definitions
            .iter()
            .enumerate()
            .map(|(i, def)| {
                if mask.get(i).map(|b| *b).unwrap_or(false) {
                    def.kind.init_workspace()
                } else {
                    ClusterWorkspace::Idle
                }
            })
            .collect();
        Workspace { clusters }
    }
}

/// State shared by the passes of one recompute
pub struct Pass<'a> {
    pub lod: u8,
    /// Pixel width of the world at `lod`
    pub world_px: f64,
    /// Negated viewport origin in pixels
    pub shift: Point,
    pub definitions: &'a [ClusterDefinition],
    pub base: &'a mut [BaseEntry],
    pub clust: &'a mut [ClusterOutput],
    pub workspaces: &'a mut [ClusterWorkspace],
}

impl Pass<'_> {
    /// Instances assigned to `def` that have a position, in world coordinates
    pub fn candidates(&self, def: usize) -> Vec<(InstanceRef, Point)> {
        let mut result = Vec::new();
        for (source, entry) in self.base.iter().enumerate() {
            for (index, record) in entry.records.iter().enumerate() {
                if record.assignment != Some(def) {
                    continue;
                }
                if let Some(position) = record.position {
                    result.push((InstanceRef::new(source, index), position));
                }
            }
        }
        result
    }

    /// Absolute pixel position of a world point, wrapped horizontally
    pub fn pixel(&self, world: &Point) -> Point {
        let p = world.scale(self.world_px);
        Point([super::point::wrap_x(p.x(), self.world_px), p.y()])
    }

    /// Remembers the workspace cell an instance was bucketed into
    pub fn set_cell(&mut self, instance: InstanceRef, cell: usize) {
        if let Some(record) = self
            .base
            .get_mut(instance.source)
            .and_then(|e| e.records.get_mut(instance.index))
        {
            record.cell = Some(cell);
        }
    }

    /// Appends `record` to the output of `def` and links its members to it
    pub fn emit(&mut self, def: usize, mut record: ClusterRecord) -> usize {
        let index = self.clust[def].records.len();
        record.shift = self.shift;
        record.offset = self.definitions[def].display.offset;

        let mut color = None;
        let mut uniform = true;
        for (k, m) in record.members.iter().enumerate() {
            let Some(inst) = self
                .base
                .get_mut(m.source)
                .and_then(|e| e.records.get_mut(m.index))
            else {
                continue;
            };
            inst.cluster = Some(index);
            record.selected |= inst.selected;
            record.hot |= inst.hot;
            if k == 0 {
                color = inst.color;
            } else if inst.color != color {
                uniform = false;
            }
        }
        record.color = if uniform { color } else { None };

        self.clust[def].records.push(record);
        index
    }
}
