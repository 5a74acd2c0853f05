//! Hierarchical clustering tree built from Delaunay edges
//!
//! Edges are consumed shortest first. Each edge joins the roots of its two
//! endpoints, which yields a single-linkage hierarchy. Every internal node
//! carries the LOD up to which its members are closer than the configured
//! pixel distance, so a display cut at any zoom level is a plain walk from the
//! root.
//!
//! Nodes live in one arena vector and reference each other by index. The tree
//! is independent of the zoom level and survives LOD changes; only the cached
//! screen-space reference length is rescaled.

use super::cache::ResultData;
use super::delaunay::triangulate;
use super::distance::wraparound_cut;
use super::point::{BoundingBox, Point};
use super::strategy::{ClusterStrategy, ClusterWorkspace, Pass};
use crate::host::InstanceRef;
use bitvec::prelude::*;

/// Lowest LOD an internal node can carry; such nodes never display merged
pub const MIN_NODE_LOD: i32 = -1;

/// Cross product tolerance, relative to the squared extent, for collinear input
const COLLINEAR_EPSILON: f64 = 1e-12;

/// Tuning of the edge length to LOD mapping
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeParams {
    /// Additive bias on the computed LOD
    pub lod_bias: f64,
    /// Deepest LOD an internal node can carry
    pub max_lod: i32,
    /// Pixel extent of one tile in the host's projection
    pub tile_size: f64,
}

impl Default for TreeParams {
    fn default() -> Self {
        TreeParams {
            lod_bias: 0.0,
            max_lod: 24,
            tile_size: super::point::TILE_SIZE,
        }
    }
}

impl TreeParams {
    /// LOD of the node created by merging along an edge of `length` world units
    ///
    /// Members stay merged at every zoom `L <= lod`, where the edge spans at
    /// most `distance` pixels.
    pub fn edge_lod(&self, distance: f64, length: f64) -> i32 {
        if length <= 0.0 {
            return self.max_lod;
        }
        let lod = ((distance / length).log2() + (1.0 / self.tile_size).log2() + self.lod_bias)
            .floor();
        if lod.is_nan() {
            return MIN_NODE_LOD;
        }
        lod.clamp(MIN_NODE_LOD as f64, self.max_lod as f64) as i32
    }

    pub fn leaf_lod(&self) -> i32 {
        self.max_lod + 1
    }
}

/// Triangulation edge attached to a node for area rendering
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AreaEdge {
    pub from: Point,
    pub to: Point,
    pub length: f64,
    /// Shared by two triangles, as opposed to lying on the hull
    pub inner: bool,
}

#[derive(Debug, Clone)]
pub struct TreeNode {
    pub lod: i32,
    pub count: usize,
    /// World-space bounds (x may exceed 1.0 after the wraparound cut)
    pub bbox: BoundingBox,
    pub centroid: Point,
    pub children: Vec<usize>,
    pub parent: Option<usize>,
    pub area_edges: Vec<AreaEdge>,
    /// Set on leaves only
    pub instance: Option<InstanceRef>,
}

impl TreeNode {
    fn leaf(instance: InstanceRef, position: Point, lod: i32) -> Self {
        TreeNode {
            lod,
            count: 1,
            bbox: BoundingBox::from_point(position),
            centroid: position,
            children: Vec::new(),
            parent: None,
            area_edges: Vec::new(),
            instance: Some(instance),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.instance.is_some()
    }
}

#[derive(Debug, Clone, Copy)]
pub(super) struct TreeEdge {
    pub(super) a: usize,
    pub(super) b: usize,
    pub(super) length: f64,
    pub(super) virtual_edge: bool,
    inner: bool,
}

/// Cluster hierarchy of one tree-kind definition
#[derive(Debug, Clone)]
pub struct ClusterTree {
    nodes: Vec<TreeNode>,
    root: Option<usize>,
    /// Nodes folded into a same-LOD sibling; they keep no children
    absorbed: BitVec,
    distance: f64,
    params: TreeParams,
    reference_length: f64,
}

impl ClusterTree {
    /// Builds the tree over `points` (world coordinates)
    ///
    /// `distance` is the merge distance in pixels.
    pub fn build(points: &[(InstanceRef, Point)], distance: f64, params: TreeParams) -> Self {
        let leaf_lod = params.leaf_lod();
        let mut tree = ClusterTree {
            nodes: Vec::with_capacity(points.len() * 2),
            root: None,
            absorbed: BitVec::new(),
            distance,
            params,
            reference_length: 0.0,
        };
        if points.is_empty() {
            return tree;
        }

        // Move the largest horizontal gap to the seam
        let mut order: Vec<usize> = (0..points.len()).collect();
        order.sort_by(|&a, &b| {
            points[a]
                .1
                .x()
                .partial_cmp(&points[b].1.x())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let xs: Vec<f64> = order.iter().map(|&i| points[i].1.x()).collect();
        let start = wraparound_cut(&xs, 1.0);
        let mut shifted: Vec<Point> = points.iter().map(|(_, p)| *p).collect();
        for &i in &order[..start] {
            shifted[i].0[0] += 1.0;
        }

        for (i, (instance, _)) in points.iter().enumerate() {
            tree.nodes.push(TreeNode::leaf(*instance, shifted[i], leaf_lod));
        }
        tree.absorbed = bitvec![0; tree.nodes.len()];

        let edges = collect_edges(&shifted);

        for edge in &edges {
            let lod = tree.params.edge_lod(distance, edge.length);
            tree.merge(edge.a, edge.b, lod);
        }

        tree.chain_remaining_roots();
        tree.distribute_centroids();
        tree.attach_area_edges(&edges, &shifted);
        tree
    }

    pub fn nodes(&self) -> &[TreeNode] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> &TreeNode {
        &self.nodes[index]
    }

    pub fn root(&self) -> Option<usize> {
        self.root
    }

    /// Merge distance expressed in world units at the last requested LOD
    pub fn reference_length(&self) -> f64 {
        self.reference_length
    }

    /// Rescales the reference length to a world width of `world_px` pixels
    pub fn set_reference_length(&mut self, world_px: f64) {
        self.reference_length = if world_px > 0.0 {
            self.distance / world_px
        } else {
            0.0
        };
    }

    /// Checks that `index` is a live node (not folded into a sibling)
    pub fn is_live(&self, index: usize) -> bool {
        index < self.nodes.len() && !self.absorbed[index]
    }

    fn find_root(&self, mut index: usize) -> usize {
        while let Some(parent) = self.nodes[index].parent {
            index = parent;
        }
        index
    }

    fn merge(&mut self, a: usize, b: usize, lod: i32) {
        let ra = self.find_root(a);
        let rb = self.find_root(b);
        if ra == rb {
            return;
        }

        let a_level = !self.nodes[ra].is_leaf() && self.nodes[ra].lod == lod;
        let b_level = !self.nodes[rb].is_leaf() && self.nodes[rb].lod == lod;

        match (a_level, b_level) {
            (true, true) => self.absorb(ra, rb),
            (true, false) => self.adopt(ra, rb),
            (false, true) => self.adopt(rb, ra),
            (false, false) => {
                let index = self.nodes.len();
                let bbox = self.nodes[ra].bbox.union(&self.nodes[rb].bbox);
                let count = self.nodes[ra].count + self.nodes[rb].count;
                self.nodes.push(TreeNode {
                    lod,
                    count,
                    bbox,
                    centroid: bbox.center(),
                    children: vec![ra, rb],
                    parent: None,
                    area_edges: Vec::new(),
                    instance: None,
                });
                self.absorbed.push(false);
                self.nodes[ra].parent = Some(index);
                self.nodes[rb].parent = Some(index);
            }
        }
    }

    fn adopt(&mut self, parent: usize, child: usize) {
        self.nodes[child].parent = Some(parent);
        let bbox = self.nodes[child].bbox;
        let count = self.nodes[child].count;
        let node = &mut self.nodes[parent];
        node.children.push(child);
        node.count += count;
        node.bbox = node.bbox.union(&bbox);
    }

    /// Folds `from` into `into`; both are internal roots on the same LOD
    fn absorb(&mut self, into: usize, from: usize) {
        let children = std::mem::take(&mut self.nodes[from].children);
        for &c in &children {
            self.nodes[c].parent = Some(into);
        }
        let bbox = self.nodes[from].bbox;
        let count = self.nodes[from].count;
        self.nodes[from].count = 0;
        self.absorbed.set(from, true);

        let node = &mut self.nodes[into];
        node.children.extend(children);
        node.count += count;
        node.bbox = node.bbox.union(&bbox);
    }

    /// Joins roots the triangulation left disconnected (degenerate input)
    fn chain_remaining_roots(&mut self) {
        let mut roots: Vec<usize> = (0..self.nodes.len())
            .filter(|&i| self.nodes[i].parent.is_none() && !self.absorbed[i])
            .collect();
        if roots.len() > 1 {
            log::debug!("chaining {} disconnected tree roots", roots.len());
            roots.sort_by(|&a, &b| {
                self.nodes[a].bbox.center().0[0]
                    .partial_cmp(&self.nodes[b].bbox.center().0[0])
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            for pair in roots.windows(2) {
                self.merge(pair[0], pair[1], MIN_NODE_LOD);
            }
        }
        self.root = roots.first().map(|&r| self.find_root(r));
    }

    /// Count-weighted centroids, children before parents
    fn distribute_centroids(&mut self) {
        let Some(root) = self.root else {
            return;
        };
        let mut stack = vec![(root, false)];
        while let Some((index, expanded)) = stack.pop() {
            if self.nodes[index].is_leaf() {
                continue;
            }
            if !expanded {
                stack.push((index, true));
                for &c in &self.nodes[index].children {
                    stack.push((c, false));
                }
                continue;
            }
            let mut sum = Point::default();
            let mut count = 0usize;
            for &c in &self.nodes[index].children {
                let child = &self.nodes[c];
                sum = sum.add(&child.centroid.scale(child.count as f64));
                count += child.count;
            }
            if count > 0 {
                self.nodes[index].centroid = sum.scale(1.0 / count as f64);
            }
        }
    }

    /// Lowest common ancestor, ascending the finer side until LODs match
    fn common_ancestor(&self, a: usize, b: usize) -> Option<usize> {
        let (mut u, mut v) = (a, b);
        while u != v {
            let (lu, lv) = (self.nodes[u].lod, self.nodes[v].lod);
            if lu >= lv {
                u = self.nodes[u].parent?;
            }
            if lv >= lu {
                v = self.nodes[v].parent?;
            }
        }
        Some(u)
    }

    fn attach_area_edges(&mut self, edges: &[TreeEdge], points: &[Point]) {
        for edge in edges {
            if edge.virtual_edge || edge.length <= 0.0 {
                continue;
            }
            if let Some(owner) = self.common_ancestor(edge.a, edge.b) {
                self.nodes[owner].area_edges.push(AreaEdge {
                    from: points[edge.a],
                    to: points[edge.b],
                    length: edge.length,
                    inner: edge.inner,
                });
            }
        }
    }

    /// Nodes displayed at zoom `lod`: the shallowest nodes whose LOD reaches it
    pub fn visible_nodes(&self, lod: i32) -> Vec<usize> {
        let mut result = Vec::new();
        let Some(root) = self.root else {
            return result;
        };
        let mut stack = vec![root];
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index];
            if node.is_leaf() || node.lod >= lod {
                result.push(index);
            } else {
                stack.extend(node.children.iter().rev());
            }
        }
        result
    }

    /// Instances below `index`
    pub fn leaves(&self, index: usize) -> Vec<InstanceRef> {
        let mut result = Vec::new();
        let mut stack = vec![index];
        while let Some(i) = stack.pop() {
            let node = &self.nodes[i];
            if let Some(instance) = node.instance {
                result.push(instance);
            }
            stack.extend(node.children.iter().rev());
        }
        result
    }

    /// Area edges below `index` no longer than the current reference length
    pub fn area_edges(&self, index: usize) -> Vec<AreaEdge> {
        let mut result = Vec::new();
        let mut stack = vec![index];
        while let Some(i) = stack.pop() {
            let node = &self.nodes[i];
            result.extend(
                node.area_edges
                    .iter()
                    .filter(|e| e.length <= self.reference_length)
                    .copied(),
            );
            stack.extend(node.children.iter());
        }
        result
    }
}

/// Checks if all points lie on one line
fn is_collinear(points: &[Point]) -> bool {
    let (Some(first), Some(last)) = (points.first(), points.last()) else {
        return true;
    };
    let (dx, dy) = (last.x() - first.x(), last.y() - first.y());
    let tolerance = COLLINEAR_EPSILON * (dx * dx + dy * dy);
    points.iter().all(|p| {
        let cross = dx * (p.y() - first.y()) - dy * (p.x() - first.x());
        cross.abs() <= tolerance
    })
}

/// Zero-length edges for coincident points, triangulation edges between the
/// distinct ones and seam edges across the horizontal wrap, sorted for merging
pub(super) fn collect_edges(points: &[Point]) -> Vec<TreeEdge> {
    let mut order: Vec<usize> = (0..points.len()).collect();
    order.sort_by(|&a, &b| {
        points[a]
            .0
            .partial_cmp(&points[b].0)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut edges = Vec::new();
    let mut reps: Vec<usize> = Vec::with_capacity(points.len());
    for &i in &order {
        match reps.last() {
            Some(&rep) if points[rep] == points[i] => edges.push(TreeEdge {
                a: rep.min(i),
                b: rep.max(i),
                length: 0.0,
                virtual_edge: false,
                inner: false,
            }),
            _ => reps.push(i),
        }
    }

    let rep_points: Vec<Point> = reps.iter().map(|&i| points[i]).collect();
    let hull = if is_collinear(&rep_points) {
        // Reps are sorted along the line, the chain is the whole triangulation
        for pair in reps.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            edges.push(TreeEdge {
                a: a.min(b),
                b: a.max(b),
                length: points[a].dist(&points[b]),
                virtual_edge: false,
                inner: false,
            });
        }
        if rep_points.len() > 1 {
            vec![0, rep_points.len() - 1]
        } else {
            Vec::new()
        }
    } else {
        let tri = triangulate(&rep_points);
        for e in &tri.edges {
            let (a, b) = (reps[e.a], reps[e.b]);
            edges.push(TreeEdge {
                a: a.min(b),
                b: a.max(b),
                length: e.length,
                virtual_edge: false,
                inner: e.inner,
            });
        }
        let mut hull = bitvec![0; rep_points.len()];
        for i in 0..rep_points.len() {
            hull.set(i, tri.is_boundary(i));
        }
        hull.iter_ones().collect()
    };

    for (k, &i) in hull.iter().enumerate() {
        for &j in &hull[k + 1..] {
            let (p, q) = (rep_points[i], rep_points[j]);
            let dx = (p.x() - q.x()).abs();
            let across = 1.0 - dx;
            if across >= 0.0 && across < dx {
                let dy = p.y() - q.y();
                let (a, b) = (reps[i], reps[j]);
                edges.push(TreeEdge {
                    a: a.min(b),
                    b: a.max(b),
                    length: (across * across + dy * dy).sqrt(),
                    virtual_edge: true,
                    inner: false,
                });
            }
        }
    }

    edges.sort_by(|x, y| {
        x.length
            .partial_cmp(&y.length)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(x.a.cmp(&y.a))
            .then(x.b.cmp(&y.b))
            .then(x.virtual_edge.cmp(&y.virtual_edge))
    });
    edges
}

/// Clustering along a [`ClusterTree`] cut at the requested LOD
#[derive(Debug, Clone, PartialEq)]
pub struct TreeStrategy {
    /// Merge distance in pixels
    pub distance: f64,
    pub params: TreeParams,
}

impl ClusterStrategy for TreeStrategy {
    fn init_workspace(&self) -> ClusterWorkspace {
        ClusterWorkspace::Points(Default::default())
    }

    fn pass1(&self, def: usize, pass: &mut Pass<'_>) {
        if pass.clust[def].tree.is_some() {
            return;
        }
        let points = pass.candidates(def);
        if let Some(ws) = pass.workspaces[def].points_mut() {
            ws.points = points;
        }
    }

    fn pass2(&self, def: usize, pass: &mut Pass<'_>) {
        if pass.clust[def].tree.is_none() {
            let points = pass.workspaces[def]
                .points_mut()
                .map(|ws| std::mem::take(&mut ws.points))
                .unwrap_or_default();
            log::debug!("building cluster tree over {} instances", points.len());
            pass.clust[def].tree = Some(ClusterTree::build(&points, self.distance, self.params));
        }
        let world_px = pass.world_px;
        if let Some(tree) = pass.clust[def].tree.as_mut() {
            tree.set_reference_length(world_px);
        }
    }

    fn decide(&self, def: usize, pass: &mut Pass<'_>) {
        let limit = pass.definitions[def].limit;
        let world_px = pass.world_px;
        let mut cells = Vec::new();
        let mut pending = Vec::new();
        if let Some(tree) = pass.clust[def].tree.as_ref() {
            for node in tree.visible_nodes(pass.lod as i32) {
                for instance in tree.leaves(node) {
                    cells.push((instance, node));
                }
                let n = tree.node(node);
                if !n.is_leaf() && n.count >= limit {
                    pending.push((node, ResultData::tree_record(tree, node, world_px)));
                }
            }
        }

        for (instance, node) in cells {
            pass.set_cell(instance, node);
        }
        for (node, record) in pending {
            let index = pass.emit(def, record);
            if let Some(ws) = pass.workspaces[def].points_mut() {
                ws.cell_records.insert(node, index);
            }
        }
    }

    fn check_cell(&self, def: usize, cell: usize, pass: &Pass<'_>) -> bool {
        let limit = pass.definitions[def].limit;
        pass.clust[def]
            .tree
            .as_ref()
            .filter(|tree| tree.is_live(cell))
            .map(|tree| tree.node(cell))
            .is_some_and(|n| !n.is_leaf() && n.count >= limit)
    }
}
