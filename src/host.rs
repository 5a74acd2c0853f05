//! Interfaces the map host implements for the clustering engine
//!
//! The engine only reads from these. Positions are normalized world coordinates
//! (see [`crate::cluster::point::project_lon_lat`]).

use crate::cluster::point::Point;
use crate::config::Color;

/// Stable identity of one instance across data versions
pub type InstanceKey = u64;

/// Address of one instance: source list and index inside it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceRef {
    pub source: usize,
    pub index: usize,
}

impl InstanceRef {
    pub fn new(source: usize, index: usize) -> Self {
        InstanceRef { source, index }
    }
}

/// A list of visual objects supplied by the host
pub trait VisualObjectSource {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn key(&self, index: usize) -> InstanceKey;

    /// World position; `None` for instances without a location
    fn position(&self, index: usize) -> Option<Point>;

    fn is_selected(&self, _index: usize) -> bool {
        false
    }

    fn is_hot(&self, _index: usize) -> bool {
        false
    }

    fn color(&self, _index: usize) -> Option<Color> {
        None
    }
}

/// Evaluation context handed to an [`AssignmentRule`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleContext {
    /// Index of the source inside the list passed to the engine
    pub source: usize,
    pub lod: u8,
}

/// Assigns an instance to a cluster definition (by index), or to none
pub trait AssignmentRule {
    fn evaluate(
        &self,
        source: &dyn VisualObjectSource,
        index: usize,
        context: &RuleContext,
    ) -> Option<usize>;
}

impl<F> AssignmentRule for F
where
    F: Fn(&dyn VisualObjectSource, usize, &RuleContext) -> Option<usize>,
{
    fn evaluate(
        &self,
        source: &dyn VisualObjectSource,
        index: usize,
        context: &RuleContext,
    ) -> Option<usize> {
        self(source, index, context)
    }
}

/// In-memory source, used by the command line tool and handy for hosts
/// without their own object model
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    pub keys: Vec<InstanceKey>,
    pub positions: Vec<Option<Point>>,
    pub selected: Vec<bool>,
    pub colors: Vec<Option<Color>>,
}

impl MemorySource {
    /// Creates a source keyed by position in `positions`
    pub fn from_points(positions: impl IntoIterator<Item = Point>) -> Self {
        let positions: Vec<Option<Point>> = positions.into_iter().map(Some).collect();
        MemorySource {
            keys: (0..positions.len() as u64).collect(),
            selected: vec![false; positions.len()],
            colors: vec![None; positions.len()],
            positions,
        }
    }

    pub fn push(&mut self, key: InstanceKey, position: Option<Point>) {
        self.keys.push(key);
        self.positions.push(position);
        self.selected.push(false);
        self.colors.push(None);
    }
}

impl VisualObjectSource for MemorySource {
    fn len(&self) -> usize {
        self.keys.len()
    }

    fn key(&self, index: usize) -> InstanceKey {
        self.keys[index]
    }

    fn position(&self, index: usize) -> Option<Point> {
        self.positions.get(index).copied().flatten()
    }

    fn is_selected(&self, index: usize) -> bool {
        self.selected.get(index).copied().unwrap_or(false)
    }

    fn color(&self, index: usize) -> Option<Color> {
        self.colors.get(index).copied().flatten()
    }
}
