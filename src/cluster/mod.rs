//! Package cluster implements tile based clustering of map markers
//!
//! Four strategies share one five-operation contract: grid, grid groups,
//! greedy proximity and a Delaunay built hierarchy. Results are cached per
//! viewport and only recomputed as far as a change requires.
pub mod cache;
pub mod context;
pub mod delaunay;
pub mod distance;
pub mod grid;
pub mod point;
pub mod registry;
pub mod strategy;
pub mod tree;

#[cfg(test)]
mod context_test;
#[cfg(test)]
mod grid_test;
#[cfg(test)]
mod tree_test;

pub use cache::{CalcMode, ClusterRecord, ResultData, TileRequest};
pub use context::ClusteringContext;
pub use point::{BoundingBox, Point, PointList};
pub use registry::{ClusterDefinition, ClusterRegistry};
pub use strategy::{ClusterKind, ClusterStrategy};
