//! Points, bounding boxes and projection helpers shared by the cluster strategies
use std::f64::consts::PI;

/// Coefficient to translate from degrees to radians
pub const DEGREE_RAD: f64 = PI / 180.0;

/// Pixel extent of one map tile
pub const TILE_SIZE: f64 = 256.0;

/// Latitude limit of the Web-Mercator square
const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

/// Point represents a 2-D coordinate
///
/// The point is stored as [x, y] where:
/// - `[0]` grows to the east
/// - `[1]` grows to the south
///
/// The same type carries normalized world coordinates (`[0, 1)` on both axes)
/// and absolute pixel coordinates at some LOD.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point(pub [f64; 2]);

/// PointList is a collection of Points
pub type PointList = Vec<Point>;

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Point([x, y])
    }

    pub fn x(&self) -> f64 {
        self.0[0]
    }

    pub fn y(&self) -> f64 {
        self.0[1]
    }

    /// Returns squared euclidean distance between two points
    pub fn sq_dist(&self, b: &Point) -> f64 {
        let dx = self.0[0] - b.0[0];
        let dy = self.0[1] - b.0[1];
        dx * dx + dy * dy
    }

    pub fn dist(&self, b: &Point) -> f64 {
        self.sq_dist(b).sqrt()
    }

    pub fn scale(&self, factor: f64) -> Point {
        Point([self.0[0] * factor, self.0[1] * factor])
    }

    pub fn add(&self, b: &Point) -> Point {
        Point([self.0[0] + b.0[0], self.0[1] + b.0[1]])
    }

    /// Checks if this point is less than or equal to another point
    /// (a <= b)
    pub fn less_eq(&self, b: &Point) -> bool {
        self.0[0] <= b.0[0] && self.0[1] <= b.0[1]
    }

    /// Checks if this point is greater than or equal to another point
    /// (a >= b)
    pub fn greater_eq(&self, b: &Point) -> bool {
        self.0[0] >= b.0[0] && self.0[1] >= b.0[1]
    }
}

/// Axis aligned bounding box
///
/// An empty box has `min > max` so that extending it with the first point
/// yields a degenerate box around that point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min: Point,
    pub max: Point,
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::empty()
    }
}

impl BoundingBox {
    pub fn empty() -> Self {
        BoundingBox {
            min: Point([f64::INFINITY, f64::INFINITY]),
            max: Point([f64::NEG_INFINITY, f64::NEG_INFINITY]),
        }
    }

    pub fn from_point(p: Point) -> Self {
        BoundingBox { min: p, max: p }
    }

    pub fn from_corners(min: Point, max: Point) -> Self {
        BoundingBox { min, max }
    }

    pub fn is_empty(&self) -> bool {
        self.min.0[0] > self.max.0[0] || self.min.0[1] > self.max.0[1]
    }

    pub fn extend(&mut self, p: &Point) {
        for j in 0..2 {
            if p.0[j] < self.min.0[j] {
                self.min.0[j] = p.0[j];
            }
            if p.0[j] > self.max.0[j] {
                self.max.0[j] = p.0[j];
            }
        }
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        if other.is_empty() {
            return *self;
        }
        let mut result = *self;
        result.extend(&other.min);
        result.extend(&other.max);
        result
    }

    pub fn contains(&self, p: &Point) -> bool {
        p.greater_eq(&self.min) && p.less_eq(&self.max)
    }

    /// Checks if `p` lies within `margin` of the box on both axes
    pub fn near(&self, p: &Point, margin: f64) -> bool {
        p.0[0] >= self.min.0[0] - margin
            && p.0[0] <= self.max.0[0] + margin
            && p.0[1] >= self.min.0[1] - margin
            && p.0[1] <= self.max.0[1] + margin
    }

    pub fn center(&self) -> Point {
        Point([
            (self.min.0[0] + self.max.0[0]) / 2.0,
            (self.min.0[1] + self.max.0[1]) / 2.0,
        ])
    }

    pub fn scale(&self, factor: f64) -> BoundingBox {
        if self.is_empty() {
            return *self;
        }
        BoundingBox {
            min: self.min.scale(factor),
            max: self.max.scale(factor),
        }
    }
}

/// Calculates center and bounds of a point set
///
/// Returns `None` for an empty set.
pub fn centroid_and_bounds(points: &[Point]) -> Option<(Point, BoundingBox)> {
    if points.is_empty() {
        return None;
    }

    let mut bounds = BoundingBox::empty();
    let mut center = Point([0.0, 0.0]);

    for pt in points {
        for j in 0..2 {
            center.0[j] += pt.0[j];
        }
        bounds.extend(pt);
    }

    for j in 0..2 {
        center.0[j] /= points.len() as f64;
    }

    Some((center, bounds))
}

/// Pixel width of the whole world at `lod`
pub fn world_extent(lod: u8) -> f64 {
    2f64.powi(lod as i32) * TILE_SIZE
}

/// Wraps a horizontal coordinate into `[0, width)`
pub fn wrap_x(x: f64, width: f64) -> f64 {
    if width <= 0.0 {
        return x;
    }
    x.rem_euclid(width)
}

/// Projects longitude/latitude in degrees to the normalized Web-Mercator square
pub fn project_lon_lat(lon: f64, lat: f64) -> Point {
    let lat = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE) * DEGREE_RAD;
    let x = wrap_x((lon + 180.0) / 360.0, 1.0);
    let y = (1.0 - (lat.tan() + 1.0 / lat.cos()).ln() / PI) / 2.0;
    Point([x, y.clamp(0.0, 1.0)])
}

/// Inverse of [`project_lon_lat`]; horizontal coordinates are wrapped first
pub fn unproject(world: &Point) -> (f64, f64) {
    let lon = wrap_x(world.0[0], 1.0) * 360.0 - 180.0;
    let n = PI * (1.0 - 2.0 * world.0[1]);
    let lat = n.sinh().atan() / DEGREE_RAD;
    (lon, lat)
}
