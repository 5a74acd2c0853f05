//! Grid and grid-group clustering
//!
//! The world is divided into cells of `cell.0 x cell.1` pixels, aligned to the
//! absolute pixel origin at the requested LOD, so panning never moves a cell
//! boundary. Columns wrap with the world.
//!
//! Grids sharing a group key are unioned by a synthesized group definition.
//! Members still bucket their own instances in `pass1`; the group sums the
//! member cells in `pass2` and emits the records of all members in `decide`.

use super::cache::ClusterRecord;
use super::point::{BoundingBox, Point};
use super::strategy::{ClusterStrategy, ClusterWorkspace, Pass};
use crate::host::InstanceRef;
use rustc_hash::FxHashMap;

/// Default cell edge in pixels
pub const DEFAULT_CELL_SIZE: f64 = 256.0;

/// Upper bound on shadow records emitted per definition
const MAX_SHADOW_CELLS: usize = 4096;

pub type CellKey = (i64, i64);

#[derive(Debug, Clone, Default)]
pub struct GridCell {
    pub key: CellKey,
    /// Instances in the cell; for group cells the sum over members
    pub count: usize,
    pub members: Vec<InstanceRef>,
    /// Pixel bounds of the members
    pub bbox: BoundingBox,
    pub record: Option<usize>,
    /// Cell of the owning group (member grids only)
    pub group_cell: Option<usize>,
    /// `(member definition, member cell)` pairs (group cells only)
    pub parts: Vec<(usize, usize)>,
    /// Some member reached its own limit (group cells only)
    pub member_exceeded: bool,
}

#[derive(Debug, Clone, Default)]
pub struct GridWorkspace {
    pub cells: Vec<GridCell>,
    pub index: FxHashMap<CellKey, usize>,
}

impl GridWorkspace {
    /// Index of the cell for `key`, creating it if needed
    pub fn cell_index(&mut self, key: CellKey) -> usize {
        if let Some(&i) = self.index.get(&key) {
            return i;
        }
        let i = self.cells.len();
        self.cells.push(GridCell {
            key,
            ..Default::default()
        });
        self.index.insert(key, i);
        i
    }

    /// Cell indices ordered by row, then column
    pub fn sorted(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.cells.len()).collect();
        order.sort_by_key(|&i| (self.cells[i].key.1, self.cells[i].key.0));
        order
    }

    /// Empty cells inside the bounding range of the occupied ones
    fn empty_cells_in_range(&self, limit: usize) -> Vec<CellKey> {
        let occupied = self.cells.iter().filter(|c| c.count > 0);
        let (mut c0, mut c1, mut r0, mut r1) = (i64::MAX, i64::MIN, i64::MAX, i64::MIN);
        for cell in occupied {
            c0 = c0.min(cell.key.0);
            c1 = c1.max(cell.key.0);
            r0 = r0.min(cell.key.1);
            r1 = r1.max(cell.key.1);
        }
        let mut result = Vec::new();
        if c0 > c1 {
            return result;
        }
        'rows: for row in r0..=r1 {
            for col in c0..=c1 {
                let occupied = self
                    .index
                    .get(&(col, row))
                    .is_some_and(|&i| self.cells[i].count > 0);
                if occupied {
                    continue;
                }
                if result.len() == limit {
                    log::warn!("shadow cells truncated at {}", limit);
                    break 'rows;
                }
                result.push((col, row));
            }
        }
        result
    }
}

/// Cell containing pixel `p` for cells of `size` pixels in a world `world_px` wide
pub fn cell_key(p: &Point, size: (f64, f64), world_px: f64) -> CellKey {
    let cols = (world_px / size.0).ceil().max(1.0) as i64;
    let col = (p.x() / size.0).floor() as i64;
    let row = (p.y() / size.1).floor() as i64;
    (col.rem_euclid(cols), row)
}

pub fn cell_bounds(key: CellKey, size: (f64, f64)) -> BoundingBox {
    let min = Point([key.0 as f64 * size.0, key.1 as f64 * size.1]);
    BoundingBox::from_corners(min, Point([min.x() + size.0, min.y() + size.1]))
}

fn shadow_record(key: CellKey, size: (f64, f64)) -> ClusterRecord {
    let bounds = cell_bounds(key, size);
    let mut record = ClusterRecord::new(bounds.center(), bounds, Vec::new());
    record.shadow = true;
    record
}

#[derive(Debug, Clone, PartialEq)]
pub struct GridStrategy {
    /// Cell size in pixels; member grids use the geometry of their group
    pub cell: (f64, f64),
    /// Owning group definition
    pub group: Option<usize>,
}

impl ClusterStrategy for GridStrategy {
    fn init_workspace(&self) -> ClusterWorkspace {
        ClusterWorkspace::Grid(GridWorkspace::default())
    }

    fn pass1(&self, def: usize, pass: &mut Pass<'_>) {
        let bucketed: Vec<(InstanceRef, Point)> = pass
            .candidates(def)
            .into_iter()
            .map(|(instance, world)| (instance, pass.pixel(&world)))
            .collect();
        let world_px = pass.world_px;
        let mut cells = Vec::with_capacity(bucketed.len());
        if let Some(ws) = pass.workspaces[def].grid_mut() {
            for (instance, p) in bucketed {
                let ci = ws.cell_index(cell_key(&p, self.cell, world_px));
                let cell = &mut ws.cells[ci];
                cell.count += 1;
                cell.members.push(instance);
                cell.bbox.extend(&p);
                cells.push((instance, ci));
            }
        }
        for (instance, ci) in cells {
            pass.set_cell(instance, ci);
        }
    }

    fn pass2(&self, _def: usize, _pass: &mut Pass<'_>) {}

    fn decide(&self, def: usize, pass: &mut Pass<'_>) {
        if self.group.is_some() {
            return;
        }

        let mut pending = Vec::new();
        let mut shadows = Vec::new();
        if let Some(ws) = pass.workspaces[def].grid() {
            for ci in ws.sorted() {
                if !self.check_cell(def, ci, pass) {
                    continue;
                }
                let cell = &ws.cells[ci];
                let center = cell_bounds(cell.key, self.cell).center();
                pending.push((ci, ClusterRecord::new(center, cell.bbox, cell.members.clone())));
            }
            if !pass.definitions[def].omit_empties {
                shadows = ws.empty_cells_in_range(MAX_SHADOW_CELLS);
            }
        }

        for (ci, record) in pending {
            let index = pass.emit(def, record);
            if let Some(ws) = pass.workspaces[def].grid_mut() {
                ws.cells[ci].record = Some(index);
            }
        }
        for key in shadows {
            pass.emit(def, shadow_record(key, self.cell));
        }
    }

    fn check_cell(&self, def: usize, cell: usize, pass: &Pass<'_>) -> bool {
        let Some(c) = pass.workspaces[def].grid().and_then(|ws| ws.cells.get(cell)) else {
            return false;
        };
        match self.group {
            Some(group) => c
                .group_cell
                .is_some_and(|gc| pass.definitions[group].kind.check_cell(group, gc, pass)),
            None => c.count >= pass.definitions[def].limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GridGroupStrategy {
    /// Member grid definitions, in load order
    pub members: Vec<usize>,
    /// Cell geometry taken from the first member
    pub cell: (f64, f64),
    /// Cluster a cell once the summed count reaches the group limit
    pub limit_on_sum: bool,
}

impl ClusterStrategy for GridGroupStrategy {
    fn init_workspace(&self) -> ClusterWorkspace {
        ClusterWorkspace::Grid(GridWorkspace::default())
    }

    fn pass1(&self, _def: usize, _pass: &mut Pass<'_>) {}

    fn pass2(&self, def: usize, pass: &mut Pass<'_>) {
        let mut group = GridWorkspace::default();
        let mut links: Vec<(usize, usize, usize)> = Vec::new();

        for &m in &self.members {
            let Some(ws) = pass.workspaces.get(m).and_then(|w| w.grid()) else {
                continue;
            };
            let member_limit = pass.definitions[m].limit;
            for (ci, cell) in ws.cells.iter().enumerate() {
                let gi = group.cell_index(cell.key);
                let gcell = &mut group.cells[gi];
                gcell.count += cell.count;
                gcell.bbox = gcell.bbox.union(&cell.bbox);
                gcell.parts.push((m, ci));
                gcell.member_exceeded |= cell.count >= member_limit;
                links.push((m, ci, gi));
            }
        }

        for (m, ci, gi) in links {
            if let Some(ws) = pass.workspaces[m].grid_mut() {
                ws.cells[ci].group_cell = Some(gi);
            }
        }
        pass.workspaces[def] = ClusterWorkspace::Grid(group);
    }

    fn decide(&self, def: usize, pass: &mut Pass<'_>) {
        let mut pending: Vec<(usize, usize, ClusterRecord)> = Vec::new();
        let mut shadows = Vec::new();
        let mut seq = 0u32;

        if let Some(ws) = pass.workspaces[def].grid() {
            for gi in ws.sorted() {
                if !self.check_cell(def, gi, pass) {
                    continue;
                }
                seq += 1;
                let gcell = &ws.cells[gi];
                let center = cell_bounds(gcell.key, self.cell).center();
                for &(m, ci) in &gcell.parts {
                    let Some(cell) = pass.workspaces[m].grid().and_then(|w| w.cells.get(ci)) else {
                        continue;
                    };
                    if cell.count == 0 {
                        continue;
                    }
                    let mut record = ClusterRecord::new(center, cell.bbox, cell.members.clone());
                    record.group_seq = Some(seq);
                    record.group_total = gcell.count;
                    pending.push((m, ci, record));
                }
            }
            if !pass.definitions[def].omit_empties {
                shadows = ws.empty_cells_in_range(MAX_SHADOW_CELLS);
            }
        }

        for (m, ci, record) in pending {
            let index = pass.emit(m, record);
            if let Some(ws) = pass.workspaces[m].grid_mut() {
                ws.cells[ci].record = Some(index);
            }
        }
        for key in shadows {
            pass.emit(def, shadow_record(key, self.cell));
        }
    }

    fn check_cell(&self, def: usize, cell: usize, pass: &Pass<'_>) -> bool {
        let Some(c) = pass.workspaces[def].grid().and_then(|ws| ws.cells.get(cell)) else {
            return false;
        };
        c.member_exceeded || (self.limit_on_sum && c.count >= pass.definitions[def].limit)
    }
}
