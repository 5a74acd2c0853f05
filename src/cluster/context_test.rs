#[cfg(test)]
mod tests {
    use crate::cluster::cache::{CalcMode, TileRequest};
    use crate::cluster::context::ClusteringContext;
    use crate::cluster::point::Point;
    use crate::config::parse_definitions;
    use crate::host::{AssignmentRule, InstanceRef, MemorySource, RuleContext, VisualObjectSource};
    use quickcheck::{QuickCheck, TestResult};

    /// Assigns every instance to one definition
    struct AssignAll(usize);

    impl AssignmentRule for AssignAll {
        fn evaluate(&self, _: &dyn VisualObjectSource, _: usize, _: &RuleContext) -> Option<usize> {
            Some(self.0)
        }
    }

    /// Assigns the instances of source `n` to definition `n`
    struct BySource;

    impl AssignmentRule for BySource {
        fn evaluate(&self, _: &dyn VisualObjectSource, _: usize, context: &RuleContext) -> Option<usize> {
            Some(context.source)
        }
    }

    fn context(json: &str) -> ClusteringContext {
        let mut context = ClusteringContext::new();
        context.load_json(json).expect("valid definitions");
        context
    }

    fn source(points: &[(f64, f64)]) -> MemorySource {
        MemorySource::from_points(points.iter().map(|&(x, y)| Point::new(x, y)))
    }

    /// Three points in cell (0, 0) and one in cell (2, 2) of a 4x4 cell world
    fn grid_points() -> MemorySource {
        source(&[(0.10, 0.10), (0.11, 0.12), (0.12, 0.10), (0.60, 0.60)])
    }

    fn counts(context: &ClusteringContext, def: usize) -> Vec<usize> {
        let result = context.result().expect("result");
        result.clust[def].records.iter().map(|r| r.count).collect()
    }

    #[test]
    fn test_grid_threshold() {
        let points = grid_points();
        let request = TileRequest::new(2, 0, 0, 4, 4);

        let mut at_limit = context(r#"[{"id": "g", "type": "grid", "limit": 3}]"#);
        assert_eq!(at_limit.do_clustering(request, &[&points], &AssignAll(0), 1), CalcMode::Full);
        assert_eq!(counts(&at_limit, 0), vec![3]);

        let result = at_limit.result().expect("result");
        assert_eq!(result.base[0].ignored, 3);
        assert_eq!(result.record_for(InstanceRef::new(0, 3)), None);
        // Cell center of cell (0, 0)
        assert_eq!(result.clust[0].records[0].anchor, Point::new(128.0, 128.0));

        let mut above_limit = context(r#"[{"id": "g", "type": "grid", "limit": 4}]"#);
        above_limit.do_clustering(request, &[&points], &AssignAll(0), 1);
        assert!(counts(&above_limit, 0).is_empty());
        assert_eq!(above_limit.result().expect("result").base[0].ignored, 0);
    }

    #[test]
    fn test_repeated_request_is_skipped() {
        let points = grid_points();
        let request = TileRequest::new(2, 0, 0, 4, 4);
        let mut context = context(r#"[{"id": "g", "type": "grid"}]"#);

        assert_eq!(context.do_clustering(request, &[&points], &AssignAll(0), 1), CalcMode::Full);
        let first = context.result().expect("result").clust[0].records.clone();
        assert_eq!(context.do_clustering(request, &[&points], &AssignAll(0), 1), CalcMode::Skip);
        assert_eq!(context.result().expect("result").clust[0].records, first);
    }

    #[test]
    fn test_pan_only_adapts_offsets() {
        let points = grid_points();
        let mut context = context(r#"[{"id": "g", "type": "grid"}]"#);

        context.do_clustering(TileRequest::new(2, 0, 0, 2, 2), &[&points], &AssignAll(0), 1);
        let result = context.result().expect("result");
        let identity = result.identity(0, 0).expect("record");
        let before = result.screen_position(0, 0).expect("record");
        let members = result.clust[0].records[0].members.clone();

        let mode = context.do_clustering(TileRequest::new(2, 1, 0, 2, 2), &[&points], &AssignAll(0), 1);
        assert_eq!(mode, CalcMode::AdaptOnly);

        let result = context.result().expect("result");
        assert_eq!(result.identity(0, 0), Some(identity));
        assert_eq!(result.clust[0].records[0].members, members);
        let after = result.screen_position(0, 0).expect("record");
        assert_eq!(after.x() - before.x(), -256.0);
        assert_eq!(after.y(), before.y());
    }

    #[test]
    fn test_lod_change_recomputes() {
        let points = grid_points();
        let mut context = context(r#"[{"id": "g", "type": "grid"}]"#);

        context.do_clustering(TileRequest::new(2, 0, 0, 4, 4), &[&points], &AssignAll(0), 1);
        let before = context.result().expect("result").identity(0, 0).expect("record");

        let mode = context.do_clustering(TileRequest::new(3, 0, 0, 4, 4), &[&points], &AssignAll(0), 1);
        assert_eq!(mode, CalcMode::Partial);
        let result = context.result().expect("result");
        assert_eq!(result.clust[0].recalc_counter, 1);
        assert_eq!(result.config.lod_offset, 0);
        assert_ne!(result.identity(0, 0), Some(before));
        assert_eq!(result.clust[0].records[0].scale, 1.0);
        // Cells are 256 px at every LOD, so the group still fits one cell
        assert_eq!(counts(&context, 0), vec![3]);
    }

    #[test]
    fn test_data_change_rebuilds() {
        let points = grid_points();
        let mut context = context(r#"[{"id": "g", "type": "grid"}]"#);
        let request = TileRequest::new(2, 0, 0, 4, 4);

        context.do_clustering(request, &[&points], &AssignAll(0), 1);
        let fewer = source(&[(0.10, 0.10), (0.11, 0.12)]);
        assert_eq!(context.do_clustering(request, &[&fewer], &AssignAll(0), 2), CalcMode::Full);
        assert_eq!(counts(&context, 0), vec![2]);
        assert_eq!(context.result().expect("result").clust[0].recalc_counter, 0);
    }

    #[test]
    fn test_grid_group_union() {
        let json = r#"[
            {"id": "a", "type": "grid", "groupID": "shops", "limit": 3, "limitOnSum": true},
            {"id": "b", "type": "grid", "groupID": "shops", "limit": 3}
        ]"#;
        let first = source(&[(0.10, 0.10), (0.11, 0.11)]);
        let second = source(&[(0.12, 0.12), (0.60, 0.60)]);
        let request = TileRequest::new(2, 0, 0, 4, 4);

        let mut context = context(json);
        assert_eq!(context.registry().len(), 3);
        context.do_clustering(request, &[&first, &second], &BySource, 1);

        let result = context.result().expect("result");
        assert_eq!(result.clust[0].records.len(), 1);
        assert_eq!(result.clust[1].records.len(), 1);
        assert!(result.clust[2].records.is_empty());

        let (a, b) = (&result.clust[0].records[0], &result.clust[1].records[0]);
        assert_eq!((a.count, b.count), (2, 1));
        assert_eq!(a.group_seq, Some(1));
        assert_eq!(a.group_seq, b.group_seq);
        assert_eq!(a.group_total, 3);
        assert_eq!(a.anchor, b.anchor);
        assert_eq!(result.base[0].ignored + result.base[1].ignored, 3);
    }

    #[test]
    fn test_grid_group_without_sum() {
        let json = r#"[
            {"id": "a", "type": "grid", "groupID": "shops", "limit": 3},
            {"id": "b", "type": "grid", "groupID": "shops", "limit": 3}
        ]"#;
        let first = source(&[(0.10, 0.10), (0.11, 0.11)]);
        let second = source(&[(0.12, 0.12)]);

        let mut context = context(json);
        context.do_clustering(TileRequest::new(2, 0, 0, 4, 4), &[&first, &second], &BySource, 1);
        let result = context.result().expect("result");
        assert!(result.clust.iter().all(|c| c.records.is_empty()));
    }

    #[test]
    fn test_grid_group_member_limit() {
        let json = r#"[
            {"id": "a", "type": "grid", "groupID": "shops", "limit": 2},
            {"id": "b", "type": "grid", "groupID": "shops", "limit": 3}
        ]"#;
        let second = source(&[(0.12, 0.12)]);
        let request = TileRequest::new(2, 0, 0, 4, 4);

        // Two points reach the limit of `a`, which pulls `b` in as well
        let first = source(&[(0.10, 0.10), (0.11, 0.11)]);
        let mut reached = context(json);
        reached.do_clustering(request, &[&first, &second], &BySource, 1);

        let result = reached.result().expect("result");
        assert_eq!(result.clust[0].records.len(), 1);
        assert_eq!(result.clust[1].records.len(), 1);
        let (a, b) = (&result.clust[0].records[0], &result.clust[1].records[0]);
        assert_eq!((a.count, b.count), (2, 1));
        assert_eq!(a.group_seq, Some(1));
        assert_eq!(a.group_seq, b.group_seq);
        assert_eq!(a.group_total, 3);

        // One point short of the limit of `a`
        let single = source(&[(0.10, 0.10)]);
        let mut below = context(json);
        below.do_clustering(request, &[&single, &second], &BySource, 1);
        let result = below.result().expect("result");
        assert!(result.clust.iter().all(|c| c.records.is_empty()));
    }

    #[test]
    fn test_shadow_cells() {
        let json = r#"[{"id": "g", "type": "grid", "omitempties": false}]"#;
        let points = source(&[(0.10, 0.10), (0.11, 0.12), (0.60, 0.10), (0.61, 0.11)]);
        let mut context = context(json);
        context.do_clustering(TileRequest::new(2, 0, 0, 4, 4), &[&points], &AssignAll(0), 1);

        let result = context.result().expect("result");
        let shadows: Vec<_> = result.clust[0].records.iter().filter(|r| r.shadow).collect();
        let real: Vec<_> = result.clust[0].records.iter().filter(|r| !r.shadow).collect();
        assert_eq!(real.len(), 2);
        // Column 1 between the occupied columns 0 and 2
        assert_eq!(shadows.len(), 1);
        assert_eq!(shadows[0].count, 0);
        assert_eq!(shadows[0].anchor, Point::new(384.0, 128.0));
    }

    #[test]
    fn test_distance_strategy() {
        let json = r#"[{"id": "d", "type": "distance", "distance": 20}]"#;
        // At LOD 4 the world is 4096 px wide: 0.001 is about 4 px
        let points = source(&[(0.500, 0.5), (0.501, 0.5), (0.502, 0.501), (0.7, 0.5)]);
        let mut context = context(json);
        context.do_clustering(TileRequest::new(4, 0, 0, 16, 16), &[&points], &AssignAll(0), 1);

        assert_eq!(counts(&context, 0), vec![3]);
        let record = &context.result().expect("result").clust[0].records[0];
        assert!((record.anchor.x() - 0.501 * 4096.0).abs() < 1e-6);
    }

    #[test]
    fn test_distance_strategy_across_seam() {
        let json = r#"[{"id": "d", "type": "distance", "distance": 20}]"#;
        let points = source(&[(0.9999, 0.5), (0.0001, 0.5)]);
        let mut context = context(json);
        context.do_clustering(TileRequest::new(4, 0, 0, 16, 16), &[&points], &AssignAll(0), 1);
        assert_eq!(counts(&context, 0), vec![2]);
    }

    #[test]
    fn test_tree_reused_across_lods() {
        let json = r#"[{"id": "t", "type": "tree", "distance": 16}]"#;
        let points = source(&[(0.1, 0.5), (0.1, 0.50001), (0.6, 0.4), (0.60001, 0.4)]);
        let mut context = context(json);

        context.do_clustering(TileRequest::new(5, 0, 0, 4, 4), &[&points], &AssignAll(0), 1);
        let result = context.result().expect("result");
        assert_eq!(counts(&context, 0), vec![2, 2]);
        assert!(result.clust[0].records.iter().all(|r| r.lod == Some(12)));
        assert!(result.clust[0].records.iter().all(|r| r.node.is_some()));
        let node_count = result.clust[0].tree().expect("tree").nodes().len();
        let node = result.clust[0].records[0].node.expect("node");
        assert_eq!(result.identity(0, 0), Some(format!("[1,1,0,0,{}]", node)));

        let mode = context.do_clustering(TileRequest::new(15, 0, 0, 4, 4), &[&points], &AssignAll(0), 1);
        assert_eq!(mode, CalcMode::Partial);
        let result = context.result().expect("result");
        assert_eq!(result.clust[0].tree().expect("tree").nodes().len(), node_count);
        assert!(result.clust[0].records.is_empty());
        assert_eq!(result.base[0].ignored, 0);

        context.do_clustering(TileRequest::new(5, 0, 0, 4, 4), &[&points], &AssignAll(0), 1);
        assert_eq!(counts(&context, 0), vec![2, 2]);
        assert_eq!(context.result().expect("result").clust[0].recalc_counter, 2);
    }

    #[test]
    fn test_selection_carried_over() {
        let mut first = MemorySource::default();
        for (key, x) in [(10, 0.10), (11, 0.11), (12, 0.60)] {
            first.push(key, Some(Point::new(x, 0.1)));
        }
        let mut context = context(r#"[{"id": "g", "type": "grid"}]"#);
        let request = TileRequest::new(2, 0, 0, 4, 4);
        context.do_clustering(request, &[&first], &AssignAll(0), 1);
        assert!(context.select(InstanceRef::new(0, 1)));

        let mut second = MemorySource::default();
        for (key, x) in [(11, 0.11), (12, 0.60), (10, 0.10)] {
            second.push(key, Some(Point::new(x, 0.1)));
        }
        context.do_clustering(request, &[&second], &AssignAll(0), 2);

        let result = context.result().expect("result");
        assert_eq!(result.selected.len(), 1);
        assert_eq!(result.selected[0].instance, InstanceRef::new(0, 0));
        assert_eq!(result.selected[0].key, 11);
        assert!(result.clust[0].records[0].selected);
    }

    #[test]
    fn test_selection_survives_pan_and_drops_with_source() {
        let points = grid_points();
        let others = source(&[(0.3, 0.3)]);
        let mut context = context(r#"[{"id": "g", "type": "grid"}]"#);
        context.do_clustering(TileRequest::new(2, 0, 0, 2, 2), &[&points, &others], &AssignAll(0), 1);
        assert!(context.select(InstanceRef::new(1, 0)));

        let mode = context.do_clustering(TileRequest::new(2, 1, 1, 2, 2), &[&points, &others], &AssignAll(0), 1);
        assert_eq!(mode, CalcMode::AdaptOnly);
        assert_eq!(context.result().expect("result").selected.len(), 1);

        context.do_clustering(TileRequest::new(2, 1, 1, 2, 2), &[&points], &AssignAll(0), 2);
        assert!(context.result().expect("result").selected.is_empty());
    }

    #[test]
    fn test_host_selection_and_missing_positions() {
        let mut points = grid_points();
        points.selected[3] = true;
        points.push(99, None);
        let mut context = context(r#"[{"id": "g", "type": "grid"}]"#);
        context.do_clustering(TileRequest::new(2, 0, 0, 4, 4), &[&points], &AssignAll(0), 1);

        let result = context.result().expect("result");
        assert_eq!(result.selected.len(), 1);
        assert_eq!(result.selected[0].instance, InstanceRef::new(0, 3));
        assert_eq!(result.selected[0].cluster, None);
        assert_eq!(result.record_for(InstanceRef::new(0, 4)), None);
        assert_eq!(counts(&context, 0), vec![3]);
    }

    #[test]
    fn test_empty_definitions() {
        let points = grid_points();
        let mut context = context("[]");
        let request = TileRequest::new(2, 0, 0, 4, 4);

        assert_eq!(context.do_clustering(request, &[&points], &AssignAll(0), 1), CalcMode::Full);
        let result = context.result().expect("result");
        assert!(result.clust.is_empty());
        assert!(result.base[0].records.iter().all(|r| r.assignment.is_none()));
        assert_eq!(context.do_clustering(request, &[&points], &AssignAll(0), 1), CalcMode::Skip);
    }

    #[test]
    fn test_reload_forces_full() {
        let points = grid_points();
        let mut context = context(r#"[{"id": "g", "type": "grid"}]"#);
        let request = TileRequest::new(2, 0, 0, 4, 4);
        context.do_clustering(request, &[&points], &AssignAll(0), 1);

        let raw = parse_definitions(r#"[{"id": "g", "type": "grid", "limit": 5}]"#).expect("valid");
        context.load(&raw);
        assert!(context.result().is_none());
        assert_eq!(context.do_clustering(request, &[&points], &AssignAll(0), 1), CalcMode::Full);
        assert!(counts(&context, 0).is_empty());
        assert_eq!(context.result().expect("result").config.generation, 2);
    }

    #[test]
    fn prop_count_conservation() {
        fn prop(raw: Vec<(u16, u16)>, limit: u8) -> TestResult {
            let limit = (limit % 4) as usize + 1;
            let points: Vec<(f64, f64)> = raw
                .iter()
                .map(|&(x, y)| (x as f64 / 65536.0, y as f64 / 65536.0))
                .collect();
            let source = source(&points);
            let json = format!(
                r#"[{{"id": "g", "type": "grid", "distanceX": 64, "distanceY": 64, "limit": {}}}]"#,
                limit
            );
            let mut context = context(&json);
            context.do_clustering(TileRequest::new(3, 0, 0, 8, 8), &[&source], &AssignAll(0), 1);

            let Some(result) = context.result() else {
                return TestResult::failed();
            };
            let clustered: usize = result.clust[0].records.iter().map(|r| r.count).sum();
            let unclustered = result.base[0]
                .records
                .iter()
                .filter(|r| r.cluster.is_none())
                .count();
            let conserved = clustered + unclustered == points.len();
            let matches_limit = limit > 1 || clustered == points.len();
            let ignored = result.base[0].ignored == clustered;
            TestResult::from_bool(conserved && matches_limit && ignored)
        }
        QuickCheck::new()
            .tests(100)
            .quickcheck(prop as fn(Vec<(u16, u16)>, u8) -> TestResult);
    }
}
