//! Greedy proximity clustering
//!
//! Candidates are swept along the x axis, starting after the largest
//! horizontal gap so that no group straddles the world seam unless it has to.
//! An instance joins the first open group whose bounding box it comes within
//! `distance` pixels of, on both axes.

use super::cache::ClusterRecord;
use super::point::{BoundingBox, Point};
use super::strategy::{ClusterStrategy, ClusterWorkspace, Pass};
use crate::host::InstanceRef;
use rustc_hash::FxHashMap;

/// Finds where to start a sweep over sorted horizontal coordinates
///
/// Returns the index of the first element after the largest gap, the gap
/// across the wrap (`sorted[0] + width - sorted[last]`) included. Elements
/// before the returned index are to be shifted by `width`.
pub fn wraparound_cut(sorted: &[f64], width: f64) -> usize {
    if sorted.len() < 2 {
        return 0;
    }
    let mut best = sorted[0] + width - sorted[sorted.len() - 1];
    let mut start = 0;
    for i in 0..sorted.len() - 1 {
        let gap = sorted[i + 1] - sorted[i];
        if gap > best {
            best = gap;
            start = i + 1;
        }
    }
    start
}

/// Group produced by [`proximity_groups`]
#[derive(Debug, Clone, Default)]
pub struct ProximityGroup {
    /// Indices into the grouped points
    pub members: Vec<usize>,
    /// Running coordinate sum of the members (seam-shifted)
    pub sum: Point,
    pub bbox: BoundingBox,
}

impl ProximityGroup {
    fn new(index: usize, p: Point) -> Self {
        ProximityGroup {
            members: vec![index],
            sum: p,
            bbox: BoundingBox::from_point(p),
        }
    }

    fn add(&mut self, index: usize, p: Point) {
        self.members.push(index);
        self.sum = self.sum.add(&p);
        self.bbox.extend(&p);
    }

    pub fn centroid(&self) -> Point {
        self.sum.scale(1.0 / self.members.len().max(1) as f64)
    }
}

/// Groups `points` (pixels) lying within `distance` of each other
///
/// `width` is the horizontal wrap period. Returns the groups and, per point,
/// the index of its group.
pub fn proximity_groups(
    points: &[Point],
    distance: f64,
    width: f64,
) -> (Vec<ProximityGroup>, Vec<usize>) {
    let n = points.len();
    let mut groups: Vec<ProximityGroup> = Vec::new();
    let mut group_of = vec![0; n];
    if n == 0 {
        return (groups, group_of);
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        points[a]
            .x()
            .partial_cmp(&points[b].x())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let xs: Vec<f64> = order.iter().map(|&i| points[i].x()).collect();
    let start = wraparound_cut(&xs, width);

    let mut active: Vec<usize> = Vec::new();
    for k in 0..n {
        let pos = (start + k) % n;
        let index = order[pos];
        let mut p = points[index];
        if pos < start {
            p.0[0] += width;
        }

        active.retain(|&g| groups[g].bbox.max.x() + distance >= p.x());
        match active.iter().find(|&&g| groups[g].bbox.near(&p, distance)) {
            Some(&g) => {
                groups[g].add(index, p);
                group_of[index] = g;
            }
            None => {
                group_of[index] = groups.len();
                active.push(groups.len());
                groups.push(ProximityGroup::new(index, p));
            }
        }
    }

    (groups, group_of)
}

/// Scratch data of the distance and tree strategies
#[derive(Debug, Clone, Default)]
pub struct PointWorkspace {
    /// Candidates in pixels (distance) or world units (tree)
    pub points: Vec<(InstanceRef, Point)>,
    pub groups: Vec<ProximityGroup>,
    /// Cell (group or tree node) to emitted record
    pub cell_records: FxHashMap<usize, usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DistanceStrategy {
    /// Merge distance in pixels
    pub distance: f64,
}

impl ClusterStrategy for DistanceStrategy {
    fn init_workspace(&self) -> ClusterWorkspace {
        ClusterWorkspace::Points(PointWorkspace::default())
    }

    fn pass1(&self, def: usize, pass: &mut Pass<'_>) {
        let points: Vec<(InstanceRef, Point)> = pass
            .candidates(def)
            .into_iter()
            .map(|(instance, world)| (instance, pass.pixel(&world)))
            .collect();
        if let Some(ws) = pass.workspaces[def].points_mut() {
            ws.points = points;
        }
    }

    fn pass2(&self, def: usize, pass: &mut Pass<'_>) {
        let world_px = pass.world_px;
        let Some(ws) = pass.workspaces[def].points_mut() else {
            return;
        };
        let pixels: Vec<Point> = ws.points.iter().map(|(_, p)| *p).collect();
        let (groups, group_of) = proximity_groups(&pixels, self.distance, world_px);
        ws.groups = groups;

        let cells: Vec<(InstanceRef, usize)> = ws
            .points
            .iter()
            .zip(group_of)
            .map(|((instance, _), g)| (*instance, g))
            .collect();
        for (instance, g) in cells {
            pass.set_cell(instance, g);
        }
    }

    fn decide(&self, def: usize, pass: &mut Pass<'_>) {
        let mut pending = Vec::new();
        if let Some(ws) = pass.workspaces[def].points() {
            for (g, group) in ws.groups.iter().enumerate() {
                if !self.check_cell(def, g, pass) {
                    continue;
                }
                let members = group.members.iter().map(|&i| ws.points[i].0).collect();
                pending.push((g, ClusterRecord::new(group.centroid(), group.bbox, members)));
            }
        }

        for (g, record) in pending {
            let index = pass.emit(def, record);
            if let Some(ws) = pass.workspaces[def].points_mut() {
                ws.cell_records.insert(g, index);
            }
        }
    }

    fn check_cell(&self, def: usize, cell: usize, pass: &Pass<'_>) -> bool {
        let limit = pass.definitions[def].limit;
        pass.workspaces[def]
            .points()
            .and_then(|ws| ws.groups.get(cell))
            .is_some_and(|g| g.members.len() >= limit)
    }
}
