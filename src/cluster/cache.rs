//! Cached clustering result of one viewport and its change detection
//!
//! A [`ResultData`] holds, per source, the cluster assignment of every instance
//! (`base`) and, per definition, the emitted records (`clust`). It stays valid
//! for as long as data version and clustering generation match. Pure viewport
//! moves only adapt stored offsets, LOD changes recompute records but keep
//! built trees.

use super::point::{BoundingBox, Point, TILE_SIZE, world_extent, wrap_x};
use super::registry::ClusterDefinition;
use super::strategy::ClusterKind;
use super::tree::{AreaEdge, ClusterTree};
use crate::config::Color;
use crate::host::{InstanceKey, InstanceRef};
use bitvec::prelude::*;

/// Deepest LOD accepted in a request
pub const MAX_REQUEST_LOD: u8 = 30;

/// Viewport request for one clustering pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRequest {
    pub lod: u8,
    /// Tile column of the viewport origin
    pub x: i64,
    /// Tile row of the viewport origin
    pub y: i64,
    /// Viewport width in tiles
    pub nx: u32,
    /// Viewport height in tiles
    pub ny: u32,
}

impl TileRequest {
    pub fn new(lod: u8, x: i64, y: i64, nx: u32, ny: u32) -> Self {
        TileRequest { lod, x, y, nx, ny }
    }

    pub fn tile_count(&self) -> i64 {
        1i64 << self.lod
    }

    /// Clamps the LOD and wraps `x` into `[0, 2^lod)`
    pub fn normalized(mut self) -> Self {
        self.lod = self.lod.min(MAX_REQUEST_LOD);
        self.x = self.x.rem_euclid(self.tile_count());
        self
    }

    /// Negated pixel position of the viewport origin
    pub fn shift(&self) -> Point {
        Point([-(self.x as f64) * TILE_SIZE, -(self.y as f64) * TILE_SIZE])
    }
}

/// Per-instance entry of [`BaseEntry`]
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceRecord {
    pub key: InstanceKey,
    /// World position
    pub position: Option<Point>,
    /// Definition selected by the assignment rule
    pub assignment: Option<usize>,
    /// Record of `clust[assignment]` the instance is folded into
    pub cluster: Option<usize>,
    pub selected: bool,
    pub hot: bool,
    pub color: Option<Color>,
    /// Workspace cell of the last recompute
    pub(crate) cell: Option<usize>,
}

/// Instances of one source
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BaseEntry {
    pub records: Vec<InstanceRecord>,
    /// Instances folded into a cluster record
    pub ignored: usize,
}

/// One output cluster
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterRecord {
    /// Pixel position at the LOD the record was computed at
    pub anchor: Point,
    /// `2^(current LOD - computed LOD)`
    pub scale: f64,
    /// Negated viewport origin at the current LOD
    pub shift: Point,
    /// Configured display offset
    pub offset: Point,
    pub count: usize,
    /// Pixel bounds at the computed LOD
    pub bbox: BoundingBox,
    pub members: Vec<InstanceRef>,
    /// Tree node LOD and index (tree definitions only)
    pub lod: Option<i32>,
    pub node: Option<usize>,
    /// Running number shared by the member records of one group cell
    pub group_seq: Option<u32>,
    pub group_total: usize,
    /// Empty grid cell kept for area rendering
    pub shadow: bool,
    pub selected: bool,
    pub hot: bool,
    /// Color shared by all members
    pub color: Option<Color>,
    /// Area polygon edges in pixels at the computed LOD
    pub area_edges: Vec<(Point, Point)>,
}

impl ClusterRecord {
    pub fn new(anchor: Point, bbox: BoundingBox, members: Vec<InstanceRef>) -> Self {
        ClusterRecord {
            anchor,
            scale: 1.0,
            shift: Point::default(),
            offset: Point::default(),
            count: members.len(),
            bbox,
            members,
            lod: None,
            node: None,
            group_seq: None,
            group_total: 0,
            shadow: false,
            selected: false,
            hot: false,
            color: None,
            area_edges: Vec::new(),
        }
    }

    /// Screen position inside a viewport `view_width` pixels wide
    ///
    /// The horizontal coordinate wraps into the world span centered on the
    /// viewport.
    pub fn screen_position(&self, world_px: f64, view_width: f64) -> Point {
        let margin = ((world_px - view_width) / 2.0).max(0.0);
        let x = self.anchor.x() * self.scale + self.shift.x();
        let y = self.anchor.y() * self.scale + self.shift.y();
        Point([
            wrap_x(x + margin, world_px) - margin + self.offset.x(),
            y + self.offset.y(),
        ])
    }

    /// Adds a straggler found by the reconciliation sweep
    pub(crate) fn absorb(&mut self, instance: InstanceRef, pixel: Point, world_px: f64) {
        let mut p = pixel;
        if p.x() - self.anchor.x() > world_px / 2.0 {
            p.0[0] -= world_px;
        } else if self.anchor.x() - p.x() > world_px / 2.0 {
            p.0[0] += world_px;
        }
        self.members.push(instance);
        self.count += 1;
        self.bbox.extend(&p);
    }
}

/// Output of one definition
#[derive(Debug, Clone, Default)]
pub struct ClusterOutput {
    pub records: Vec<ClusterRecord>,
    /// Bumped whenever the records are recomputed without a full rebuild
    pub recalc_counter: u32,
    pub(crate) tree: Option<ClusterTree>,
}

impl ClusterOutput {
    pub fn tree(&self) -> Option<&ClusterTree> {
        self.tree.as_ref()
    }
}

/// Parameters the cached result was computed for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultConfig {
    pub lod: u8,
    pub x: i64,
    pub y: i64,
    pub nx: u32,
    pub ny: u32,
    pub tile_count: i64,
    pub data_version: u64,
    pub generation: u64,
    /// Accumulated LOD delta since the records were last rebuilt
    pub lod_offset: i32,
}

/// A selected instance carried across recomputes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub instance: InstanceRef,
    pub key: InstanceKey,
    /// `(definition, record)` holding the instance, if clustered
    pub cluster: Option<(usize, usize)>,
}

/// How much of the cache a request recomputed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalcMode {
    /// Nothing changed
    Skip,
    /// Viewport moved, offsets adapted
    AdaptOnly,
    /// LOD changed, records recomputed, trees reused
    Partial,
    /// Cache rebuilt
    Full,
}

/// Differences between a request and the cached result
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub position_changed: bool,
    pub lod_changed: bool,
    pub data_changed: bool,
    pub clustering_changed: bool,
    /// Requested LOD minus cached LOD
    pub lod_delta: i32,
    /// Shortest wrapped column difference (same LOD only)
    pub dx: i64,
    pub dy: i64,
}

impl ChangeSet {
    pub fn mode(&self) -> CalcMode {
        if self.data_changed || self.clustering_changed {
            CalcMode::Full
        } else if self.lod_changed {
            CalcMode::Partial
        } else if self.position_changed {
            CalcMode::AdaptOnly
        } else {
            CalcMode::Skip
        }
    }
}

/// Compares a normalized request against the cached result
///
/// A cache whose shape no longer matches the sources or definitions counts
/// as a clustering change.
pub fn determine_changes(
    cached: Option<&ResultData>,
    request: &TileRequest,
    data_version: u64,
    generation: u64,
    source_count: usize,
    definition_count: usize,
) -> ChangeSet {
    let Some(cached) = cached else {
        return ChangeSet {
            position_changed: true,
            lod_changed: true,
            data_changed: true,
            clustering_changed: true,
            ..Default::default()
        };
    };
    let config = &cached.config;

    let mut changes = ChangeSet {
        data_changed: config.data_version != data_version || cached.base.len() != source_count,
        clustering_changed: config.generation != generation
            || cached.clust.len() != definition_count,
        lod_delta: request.lod as i32 - config.lod as i32,
        ..Default::default()
    };
    changes.lod_changed = changes.lod_delta != 0;

    if !changes.lod_changed {
        let n = request.tile_count();
        let mut dx = (request.x - config.x).rem_euclid(n);
        if dx > n / 2 {
            dx -= n;
        }
        changes.dx = dx;
        changes.dy = request.y - config.y;
    }
    changes.position_changed = changes.lod_changed
        || request.x != config.x
        || request.y != config.y
        || request.nx != config.nx
        || request.ny != config.ny;

    changes
}

/// Cached clustering result of one map instance
#[derive(Debug, Clone)]
pub struct ResultData {
    pub base: Vec<BaseEntry>,
    pub clust: Vec<ClusterOutput>,
    pub config: ResultConfig,
    pub selected: Vec<Selection>,
}

impl ResultData {
    /// Empty result shaped for `definition_count` definitions
    pub fn new(request: &TileRequest, data_version: u64, generation: u64, definition_count: usize) -> Self {
        ResultData {
            base: Vec::new(),
            clust: vec![ClusterOutput::default(); definition_count],
            config: ResultConfig {
                lod: request.lod,
                x: request.x,
                y: request.y,
                nx: request.nx,
                ny: request.ny,
                tile_count: request.tile_count(),
                data_version,
                generation,
                lod_offset: 0,
            },
            selected: Vec::new(),
        }
    }

    pub fn world_px(&self) -> f64 {
        world_extent(self.config.lod)
    }

    pub fn view_width(&self) -> f64 {
        self.config.nx as f64 * TILE_SIZE
    }

    pub fn view_height(&self) -> f64 {
        self.config.ny as f64 * TILE_SIZE
    }

    pub fn instance(&self, instance: InstanceRef) -> Option<&InstanceRecord> {
        self.base
            .get(instance.source)
            .and_then(|e| e.records.get(instance.index))
    }

    fn instance_mut(&mut self, instance: InstanceRef) -> Option<&mut InstanceRecord> {
        self.base
            .get_mut(instance.source)
            .and_then(|e| e.records.get_mut(instance.index))
    }

    pub fn record(&self, def: usize, record: usize) -> Option<&ClusterRecord> {
        self.clust.get(def).and_then(|c| c.records.get(record))
    }

    /// `(definition, record)` the instance is folded into
    pub fn record_for(&self, instance: InstanceRef) -> Option<(usize, usize)> {
        let rec = self.instance(instance)?;
        Some((rec.assignment?, rec.cluster?))
    }

    /// Identity string `[generation,dataVersion,recalcCounter,clusterIndex,nodeIndex]`
    ///
    /// The node index is the tree node for tree definitions and the record
    /// index otherwise.
    pub fn identity(&self, def: usize, record: usize) -> Option<String> {
        let output = self.clust.get(def)?;
        let rec = output.records.get(record)?;
        Some(format!(
            "[{},{},{},{},{}]",
            self.config.generation,
            self.config.data_version,
            output.recalc_counter,
            def,
            rec.node.unwrap_or(record)
        ))
    }

    pub fn screen_position(&self, def: usize, record: usize) -> Option<Point> {
        self.record(def, record)
            .map(|r| r.screen_position(self.world_px(), self.view_width()))
    }

    /// Records whose screen position lies inside the viewport
    pub fn visible_records(&self) -> Vec<(usize, usize)> {
        let (w, h) = (self.view_width(), self.view_height());
        let world_px = self.world_px();
        let mut result = Vec::new();
        for (def, output) in self.clust.iter().enumerate() {
            for (i, record) in output.records.iter().enumerate() {
                let p = record.screen_position(world_px, w);
                if p.x() >= 0.0 && p.x() < w && p.y() >= 0.0 && p.y() < h {
                    result.push((def, i));
                }
            }
        }
        result
    }

    /// Rescales stored offsets to a moved viewport without recomputing
    pub fn adapt_offsets(&mut self, request: &TileRequest, changes: &ChangeSet) {
        let factor = 2f64.powi(changes.lod_delta);
        let shift = request.shift();
        for output in &mut self.clust {
            for record in &mut output.records {
                record.scale *= factor;
                record.shift = shift;
            }
        }
        self.config.lod = request.lod;
        self.config.x = request.x;
        self.config.y = request.y;
        self.config.nx = request.nx;
        self.config.ny = request.ny;
        self.config.tile_count = request.tile_count();
        self.config.lod_offset += changes.lod_delta;
        log::debug!(
            "adapted offsets to lod {} tile ({}, {}), lod offset {}",
            request.lod,
            request.x,
            request.y,
            self.config.lod_offset
        );
    }

    /// Drops records of definitions that depend on the LOD
    ///
    /// Only definitions with assigned instances are touched; grid groups are
    /// invalidated together with their members. Returns the invalidated set.
    pub fn invalidate_outdated(&mut self, definitions: &[ClusterDefinition]) -> BitVec {
        let mut mask = bitvec![0; definitions.len()];
        for entry in &self.base {
            for record in &entry.records {
                if let Some(def) = record.assignment.filter(|&d| d < definitions.len()) {
                    mask.set(def, true);
                }
            }
        }
        for (i, def) in definitions.iter().enumerate() {
            if let ClusterKind::GridGroup(group) = &def.kind {
                if group.members.iter().any(|&m| mask[m]) {
                    mask.set(i, true);
                    for &m in &group.members {
                        mask.set(m, true);
                    }
                }
            }
        }

        for def in mask.iter_ones() {
            let output = &mut self.clust[def];
            output.records.clear();
            output.recalc_counter += 1;
        }
        for entry in &mut self.base {
            for record in &mut entry.records {
                if record.assignment.is_some_and(|d| d < mask.len() && mask[d]) {
                    record.cluster = None;
                }
            }
        }
        self.config.lod_offset = 0;
        mask
    }

    /// Recounts the folded instances of every source
    pub fn update_ignored(&mut self) {
        for entry in &mut self.base {
            entry.ignored = entry.records.iter().filter(|r| r.cluster.is_some()).count();
        }
    }

    /// Marks `instance` selected; fails if it does not resolve
    pub fn select(&mut self, instance: InstanceRef) -> bool {
        let Some(record) = self.instance_mut(instance) else {
            return false;
        };
        record.selected = true;
        let key = record.key;
        let cluster = self.record_for(instance);
        if let Some((def, rec)) = cluster {
            self.clust[def].records[rec].selected = true;
        }
        if !self.selected.iter().any(|s| s.instance == instance) {
            self.selected.push(Selection {
                instance,
                key,
                cluster,
            });
        }
        true
    }

    pub fn deselect(&mut self, instance: InstanceRef) -> bool {
        let before = self.selected.len();
        self.selected.retain(|s| s.instance != instance);
        if let Some(record) = self.instance_mut(instance) {
            record.selected = false;
        }
        if let Some((def, rec)) = self.record_for(instance) {
            let still = self.clust[def].records[rec].members.iter().any(|m| {
                self.instance(*m).is_some_and(|r| r.selected)
            });
            self.clust[def].records[rec].selected = still;
        }
        self.selected.len() != before
    }

    /// Re-resolves `previous` selections against the current arrays
    ///
    /// Instances are looked up by key inside their source, so a moved
    /// instance is remapped. Unresolvable selections are dropped. Instances
    /// the host reports as selected are added.
    pub fn revalidate_selection(&mut self, previous: Vec<Selection>) {
        self.selected.clear();
        for sel in previous {
            let Some(entry) = self.base.get(sel.instance.source) else {
                continue;
            };
            let index = match entry.records.get(sel.instance.index) {
                Some(r) if r.key == sel.key => Some(sel.instance.index),
                _ => entry.records.iter().position(|r| r.key == sel.key),
            };
            if let Some(index) = index {
                self.select(InstanceRef::new(sel.instance.source, index));
            }
        }

        let mut flagged = Vec::new();
        for (source, entry) in self.base.iter().enumerate() {
            for (index, record) in entry.records.iter().enumerate() {
                if record.selected {
                    flagged.push(InstanceRef::new(source, index));
                }
            }
        }
        for instance in flagged {
            self.select(instance);
        }
    }

    /// Converts a tree node into a record in pixel space
    pub(crate) fn tree_record(tree: &ClusterTree, node: usize, world_px: f64) -> ClusterRecord {
        let n = tree.node(node);
        let mut record = ClusterRecord::new(
            n.centroid.scale(world_px),
            n.bbox.scale(world_px),
            tree.leaves(node),
        );
        record.lod = Some(n.lod);
        record.node = Some(node);
        record.area_edges = tree
            .area_edges(node)
            .iter()
            .map(|e: &AreaEdge| (e.from.scale(world_px), e.to.scale(world_px)))
            .collect();
        record
    }
}
