//! Entry point driven by the map host once per viewport, zoom or data change
//!
//! A [`ClusteringContext`] owns one registry and the cached result of one map
//! instance. Hosts with several maps keep one context per map.

use super::cache::{BaseEntry, CalcMode, InstanceRecord, ResultData, TileRequest, determine_changes};
use super::registry::ClusterRegistry;
use super::strategy::{ClusterStrategy, Pass, Workspace};
use crate::config::RawDefinition;
use crate::error::Result;
use crate::host::{AssignmentRule, InstanceRef, RuleContext, VisualObjectSource};
use bitvec::prelude::*;

#[derive(Debug, Default)]
pub struct ClusteringContext {
    registry: ClusterRegistry,
    cache: Option<ResultData>,
}

impl ClusteringContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the definitions and drops the cached result
    pub fn load(&mut self, definitions: &[RawDefinition]) {
        self.registry.load(definitions);
        self.cache = None;
    }

    pub fn load_json(&mut self, json: &str) -> Result<()> {
        self.registry.load_json(json)?;
        self.cache = None;
        Ok(())
    }

    pub fn registry(&self) -> &ClusterRegistry {
        &self.registry
    }

    pub fn result(&self) -> Option<&ResultData> {
        self.cache.as_ref()
    }

    /// Definition indices in the order their records are to be drawn
    pub fn draw_order(&self) -> Vec<usize> {
        self.registry.draw_order()
    }

    pub fn clear_cache(&mut self) {
        self.cache = None;
    }

    pub fn select(&mut self, instance: InstanceRef) -> bool {
        self.cache.as_mut().is_some_and(|c| c.select(instance))
    }

    pub fn deselect(&mut self, instance: InstanceRef) -> bool {
        self.cache.as_mut().is_some_and(|c| c.deselect(instance))
    }

    /// Brings the cached result up to date with `request`
    ///
    /// `data_version` must change whenever the host changes the instances of
    /// any source. Returns how much work was done.
    pub fn do_clustering(
        &mut self,
        request: TileRequest,
        sources: &[&dyn VisualObjectSource],
        rule: &dyn AssignmentRule,
        data_version: u64,
    ) -> CalcMode {
        let request = request.normalized();
        let changes = determine_changes(
            self.cache.as_ref(),
            &request,
            data_version,
            self.registry.generation(),
            sources.len(),
            self.registry.len(),
        );
        let mode = changes.mode();
        log::debug!(
            "clustering lod {} tile ({}, {}): {:?}",
            request.lod,
            request.x,
            request.y,
            mode
        );

        match mode {
            CalcMode::Skip => {}
            CalcMode::AdaptOnly => {
                if let Some(cache) = self.cache.as_mut() {
                    cache.adapt_offsets(&request, &changes);
                }
            }
            CalcMode::Partial => {
                if let Some(mut cache) = self.cache.take() {
                    cache.adapt_offsets(&request, &changes);
                    let mask = cache.invalidate_outdated(self.registry.definitions());
                    self.recompute(&mut cache, &request, &mask);
                    let previous = std::mem::take(&mut cache.selected);
                    cache.revalidate_selection(previous);
                    self.cache = Some(cache);
                }
            }
            CalcMode::Full => {
                let previous = self
                    .cache
                    .take()
                    .map(|c| c.selected)
                    .unwrap_or_default();
                let mut cache = ResultData::new(
                    &request,
                    data_version,
                    self.registry.generation(),
                    self.registry.len(),
                );
                cache.base = self.assign(sources, rule, request.lod);
                let mask = bitvec![1; self.registry.len()];
                self.recompute(&mut cache, &request, &mask);
                cache.revalidate_selection(previous);
                self.cache = Some(cache);
            }
        }
        mode
    }

    /// Snapshots the sources and evaluates the assignment rule
    fn assign(
        &self,
        sources: &[&dyn VisualObjectSource],
        rule: &dyn AssignmentRule,
        lod: u8,
    ) -> Vec<BaseEntry> {
        let definitions = self.registry.definitions();
        sources
            .iter()
            .enumerate()
            .map(|(s, source)| {
                let context = RuleContext { source: s, lod };
                let records = (0..source.len())
                    .map(|i| {
                        let assignment = rule.evaluate(*source, i, &context).filter(|&d| {
                            let valid = d < definitions.len() && !definitions[d].kind.is_group();
                            if !valid {
                                log::warn!("assignment rule returned invalid definition {}", d);
                            }
                            valid
                        });
                        InstanceRecord {
                            key: source.key(i),
                            position: source.position(i),
                            assignment,
                            cluster: None,
                            selected: source.is_selected(i),
                            hot: source.is_hot(i),
                            color: source.color(i),
                            cell: None,
                        }
                    })
                    .collect();
                BaseEntry {
                    records,
                    ignored: 0,
                }
            })
            .collect()
    }

    /// Runs the three passes over the definitions selected by `mask`
    fn recompute(&self, cache: &mut ResultData, request: &TileRequest, mask: &BitSlice) {
        let definitions = self.registry.definitions();
        for entry in &mut cache.base {
            for record in &mut entry.records {
                if record.assignment.is_some_and(|d| mask[d]) {
                    record.cluster = None;
                    record.cell = None;
                }
            }
        }
        for def in mask.iter_ones() {
            cache.clust[def].records.clear();
        }

        let mut workspace = Workspace::new(definitions, mask);
        let world_px = cache.world_px();
        let mut pass = Pass {
            lod: request.lod,
            world_px,
            shift: request.shift(),
            definitions,
            base: &mut cache.base,
            clust: &mut cache.clust,
            workspaces: &mut workspace.clusters,
        };

        for def in mask.iter_ones() {
            definitions[def].kind.pass1(def, &mut pass);
        }
        for def in mask.iter_ones() {
            definitions[def].kind.pass2(def, &mut pass);
        }
        for def in mask.iter_ones() {
            definitions[def].kind.decide(def, &mut pass);
        }
        check_non_clustered(&mut pass, mask);

        cache.update_ignored();
        log::debug!(
            "recomputed {} definitions, {} records",
            mask.count_ones(),
            cache.clust.iter().map(|c| c.records.len()).sum::<usize>()
        );
    }
}

/// Attaches unclustered instances whose cell qualifies to that cell's record
///
/// Clustering covers the whole world, and every `decide` links all members of
/// the cells it emits, so this finds nothing for the built-in strategies. It
/// only matters for a strategy that emits a cell before all its members are
/// linked.
fn check_non_clustered(pass: &mut Pass<'_>, mask: &BitSlice) {
    let mut stragglers = Vec::new();
    for (source, entry) in pass.base.iter().enumerate() {
        for (index, record) in entry.records.iter().enumerate() {
            let (Some(def), None, Some(cell), Some(position)) =
                (record.assignment, record.cluster, record.cell, record.position)
            else {
                continue;
            };
            if !mask[def] || !pass.definitions[def].kind.check_cell(def, cell, pass) {
                continue;
            }
            if let Some(target) = pass.workspaces[def].record_for_cell(cell) {
                stragglers.push((InstanceRef::new(source, index), def, target, position));
            }
        }
    }

    for (instance, def, target, position) in stragglers {
        let pixel = pass.pixel(&position);
        let world_px = pass.world_px;
        if let Some(record) = pass.clust[def].records.get_mut(target) {
            record.absorb(instance, pixel, world_px);
            if let Some(inst) = pass.base[instance.source].records.get_mut(instance.index) {
                inst.cluster = Some(target);
                record.selected |= inst.selected;
                record.hot |= inst.hot;
            }
        }
    }
}
