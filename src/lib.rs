//! Tile based clustering of map markers
//!
//! Hosts describe their markers through [`host::VisualObjectSource`], pick a
//! definition per marker with an [`host::AssignmentRule`] and call
//! [`cluster::ClusteringContext::do_clustering`] once per viewport change.
pub mod cluster;
pub mod config;
pub mod error;
pub mod host;


pub use cluster::{CalcMode, ClusteringContext, Point, TileRequest};
pub use error::{ClusterError, Result};
