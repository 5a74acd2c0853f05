//! Incremental 2-D Delaunay triangulation
//!
//! Sweep variant of the Bowyer-Watson algorithm: points are inserted in
//! descending x order and a triangle whose circumcircle lies entirely to the
//! right of the sweep line can never be invalidated again, so it moves from the
//! open list to the closed list.
//!
//! Triangles touching the synthetic super-triangle are dropped from the result.
//! Their connections to real points are kept per point as virtual-edge groups,
//! which mark the points lying on the outer boundary of the set.

use super::point::Point;
use rustc_hash::FxHashMap;

/// Threshold below which coordinate and slope differences are treated as zero
const EPSILON: f64 = 1e-12;

/// Super-triangle size relative to the input extent
const SUPER_TRIANGLE_SCALE: f64 = 100.0;

/// Triangle holding indices into the input points
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Triangle(pub usize, pub usize, pub usize);

impl Triangle {
    pub fn vertices(&self) -> [usize; 3] {
        [self.0, self.1, self.2]
    }

    /// Unsigned area of the triangle over `points`
    pub fn area(&self, points: &[Point]) -> f64 {
        let (a, b, c) = (points[self.0], points[self.1], points[self.2]);
        ((b.x() - a.x()) * (c.y() - a.y()) - (c.x() - a.x()) * (b.y() - a.y())).abs() / 2.0
    }
}

/// Undirected edge between two real points, `a < b`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Edge {
    pub a: usize,
    pub b: usize,
    /// Euclidean length
    pub length: f64,
    /// Shared by two real triangles
    pub inner: bool,
}

/// Connections of one real point to the super-triangle vertices
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VirtualEdgeGroup {
    /// Super-triangle vertices (0..3) the point is connected to
    pub super_vertices: Vec<usize>,
}

impl VirtualEdgeGroup {
    fn add(&mut self, vertex: usize) {
        if !self.super_vertices.contains(&vertex) {
            self.super_vertices.push(vertex);
        }
    }

    pub fn len(&self) -> usize {
        self.super_vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.super_vertices.is_empty()
    }
}

/// Result of [`triangulate`]
#[derive(Debug, Clone, Default)]
pub struct Triangulation {
    /// Non-degenerate triangles between real points
    pub triangles: Vec<Triangle>,
    /// Deduplicated edges between real points, sorted by `(a, b)`
    pub edges: Vec<Edge>,
    /// Per input point, its virtual edges to the super-triangle (if any)
    pub virtual_edges: Vec<Option<VirtualEdgeGroup>>,
}

impl Triangulation {
    /// Checks if `index` lies on the boundary of the point set
    pub fn is_boundary(&self, index: usize) -> bool {
        matches!(self.virtual_edges.get(index), Some(Some(_)))
    }
}

#[derive(Debug, Clone, Copy)]
struct Circle {
    center: Point,
    r2: f64,
    r: f64,
}

impl Circle {
    /// Circle for collinear input; contains every point and never completes
    fn unbounded(center: Point) -> Self {
        Circle {
            center,
            r2: f64::INFINITY,
            r: f64::INFINITY,
        }
    }

    fn contains(&self, p: &Point) -> bool {
        self.center.sq_dist(p) <= self.r2
    }
}

/// Calculates the circumcircle of three points
///
/// Horizontal edges make one of the perpendicular bisector slopes infinite,
/// those are handled by the dedicated branches. Collinear input yields an
/// unbounded circle.
fn circumcircle(p1: &Point, p2: &Point, p3: &Point) -> Circle {
    let (x1, y1) = (p1.x(), p1.y());
    let (x2, y2) = (p2.x(), p2.y());
    let (x3, y3) = (p3.x(), p3.y());

    let fabs_y1y2 = (y1 - y2).abs();
    let fabs_y2y3 = (y2 - y3).abs();

    let centroid = Point([(x1 + x2 + x3) / 3.0, (y1 + y2 + y3) / 3.0]);
    if fabs_y1y2 < EPSILON && fabs_y2y3 < EPSILON {
        return Circle::unbounded(centroid);
    }

    let (xc, yc);
    if fabs_y1y2 < EPSILON {
        let m2 = -(x3 - x2) / (y3 - y2);
        let mx2 = (x2 + x3) / 2.0;
        let my2 = (y2 + y3) / 2.0;
        xc = (x2 + x1) / 2.0;
        yc = m2 * (xc - mx2) + my2;
    } else if fabs_y2y3 < EPSILON {
        let m1 = -(x2 - x1) / (y2 - y1);
        let mx1 = (x1 + x2) / 2.0;
        let my1 = (y1 + y2) / 2.0;
        xc = (x3 + x2) / 2.0;
        yc = m1 * (xc - mx1) + my1;
    } else {
        let m1 = -(x2 - x1) / (y2 - y1);
        let m2 = -(x3 - x2) / (y3 - y2);
        if (m1 - m2).abs() < EPSILON {
            return Circle::unbounded(centroid);
        }
        let mx1 = (x1 + x2) / 2.0;
        let mx2 = (x2 + x3) / 2.0;
        let my1 = (y1 + y2) / 2.0;
        let my2 = (y2 + y3) / 2.0;
        xc = (m1 * mx1 - m2 * mx2 + my2 - my1) / (m1 - m2);
        yc = if fabs_y1y2 > fabs_y2y3 {
            m1 * (xc - mx1) + my1
        } else {
            m2 * (xc - mx2) + my2
        };
    }

    if !xc.is_finite() || !yc.is_finite() {
        return Circle::unbounded(centroid);
    }

    let dx = x2 - xc;
    let dy = y2 - yc;
    let r2 = dx * dx + dy * dy;
    Circle {
        center: Point([xc, yc]),
        r2,
        r: r2.sqrt(),
    }
}

#[derive(Debug, Clone, Copy)]
struct OpenTriangle {
    v: [usize; 3],
    circle: Circle,
}

impl OpenTriangle {
    fn new(v: [usize; 3], points: &[Point]) -> Self {
        OpenTriangle {
            v,
            circle: circumcircle(&points[v[0]], &points[v[1]], &points[v[2]]),
        }
    }
}

/// Builds the super-triangle enclosing all points
fn super_triangle(points: &[Point]) -> [Point; 3] {
    let mut min = Point([f64::INFINITY, f64::INFINITY]);
    let mut max = Point([f64::NEG_INFINITY, f64::NEG_INFINITY]);
    for p in points {
        for j in 0..2 {
            min.0[j] = min.0[j].min(p.0[j]);
            max.0[j] = max.0[j].max(p.0[j]);
        }
    }

    let mut dmax = (max.x() - min.x()).max(max.y() - min.y());
    if dmax <= 0.0 || !dmax.is_finite() {
        dmax = 1.0;
    }
    let mid = Point([(max.x() + min.x()) / 2.0, (max.y() + min.y()) / 2.0]);
    let span = SUPER_TRIANGLE_SCALE * dmax;

    [
        Point([mid.x() - span, mid.y() - dmax]),
        Point([mid.x(), mid.y() + span]),
        Point([mid.x() + span, mid.y() - dmax]),
    ]
}

/// Triangulates `points`
///
/// Points are expected to be distinct; coincident points produce degenerate
/// triangles that are filtered from [`Triangulation::triangles`].
pub fn triangulate(points: &[Point]) -> Triangulation {
    let n = points.len();
    let mut result = Triangulation {
        virtual_edges: vec![None; n],
        ..Default::default()
    };
    if n == 0 {
        return result;
    }

    let mut all: Vec<Point> = points.to_vec();
    all.extend_from_slice(&super_triangle(points));

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        points[b].0[0]
            .partial_cmp(&points[a].0[0])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(
                points[b].0[1]
                    .partial_cmp(&points[a].0[1])
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
    });

    let mut open = vec![OpenTriangle::new([n, n + 1, n + 2], &all)];
    let mut closed: Vec<[usize; 3]> = Vec::new();
    let mut edge_buf: Vec<(usize, usize)> = Vec::new();

    for &p in &order {
        let pt = all[p];
        edge_buf.clear();

        let mut j = 0;
        while j < open.len() {
            let t = open[j];
            if t.circle.center.x() - t.circle.r > pt.x() {
                closed.push(t.v);
                open.swap_remove(j);
                continue;
            }
            if t.circle.contains(&pt) {
                let [a, b, c] = t.v;
                edge_buf.push(ordered(a, b));
                edge_buf.push(ordered(b, c));
                edge_buf.push(ordered(c, a));
                open.swap_remove(j);
                continue;
            }
            j += 1;
        }

        // Edges shared by two invalidated triangles are interior to the cavity
        edge_buf.sort_unstable();
        let mut k = 0;
        while k < edge_buf.len() {
            let mut m = k + 1;
            while m < edge_buf.len() && edge_buf[m] == edge_buf[k] {
                m += 1;
            }
            if m - k == 1 {
                let (a, b) = edge_buf[k];
                open.push(OpenTriangle::new([a, b, p], &all));
            }
            k = m;
        }
    }

    closed.extend(open.iter().map(|t| t.v));

    let mut edge_index: FxHashMap<(usize, usize), usize> = FxHashMap::default();
    let mut real_triangle_count: Vec<u8> = Vec::new();

    for v in &closed {
        let real = v.iter().all(|&i| i < n);
        let triangle = Triangle(v[0], v[1], v[2]);
        let solid = real && triangle.area(&all) > EPSILON * EPSILON;
        if solid {
            result.triangles.push(triangle);
        }

        for (a, b) in [(v[0], v[1]), (v[1], v[2]), (v[2], v[0])] {
            match (a < n, b < n) {
                (true, true) => {
                    let key = ordered(a, b);
                    let slot = *edge_index.entry(key).or_insert_with(|| {
                        result.edges.push(Edge {
                            a: key.0,
                            b: key.1,
                            length: all[key.0].dist(&all[key.1]),
                            inner: false,
                        });
                        real_triangle_count.push(0);
                        result.edges.len() - 1
                    });
                    if solid {
                        real_triangle_count[slot] += 1;
                    }
                }
                (true, false) => {
                    result.virtual_edges[a]
                        .get_or_insert_with(VirtualEdgeGroup::default)
                        .add(b - n);
                }
                (false, true) => {
                    result.virtual_edges[b]
                        .get_or_insert_with(VirtualEdgeGroup::default)
                        .add(a - n);
                }
                (false, false) => {}
            }
        }
    }

    for (edge, count) in result.edges.iter_mut().zip(&real_triangle_count) {
        edge.inner = *count >= 2;
    }
    result.edges.sort_by_key(|e| (e.a, e.b));

    result
}

fn ordered(a: usize, b: usize) -> (usize, usize) {
    if a < b { (a, b) } else { (b, a) }
}
