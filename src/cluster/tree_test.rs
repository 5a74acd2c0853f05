#[cfg(test)]
mod tests {
    use crate::cluster::point::Point;
    use crate::cluster::tree::{ClusterTree, MIN_NODE_LOD, TreeParams, collect_edges};
    use crate::host::InstanceRef;
    use quickcheck::{QuickCheck, TestResult};

    fn with_refs(points: &[Point]) -> Vec<(InstanceRef, Point)> {
        points
            .iter()
            .enumerate()
            .map(|(i, p)| (InstanceRef::new(0, i), *p))
            .collect()
    }

    /// Two tight pairs half a world apart
    fn two_pairs() -> Vec<Point> {
        vec![
            Point::new(0.1, 0.5),
            Point::new(0.1, 0.50001),
            Point::new(0.6, 0.4),
            Point::new(0.60001, 0.4),
        ]
    }

    #[test]
    fn test_edge_lod() {
        let params = TreeParams::default();
        // 16 px at LOD 4 is 16 / 4096 of the world
        assert_eq!(params.edge_lod(16.0, 1.0 / 256.0), 4);
        assert_eq!(params.edge_lod(16.0, 0.0), params.max_lod);
        assert_eq!(params.edge_lod(16.0, 10.0), MIN_NODE_LOD);
        assert_eq!(params.edge_lod(16.0, 1e-30), params.max_lod);

        let biased = TreeParams {
            lod_bias: 2.0,
            ..TreeParams::default()
        };
        assert_eq!(biased.edge_lod(16.0, 1.0 / 256.0), 6);
        assert_eq!(params.leaf_lod(), params.max_lod + 1);
    }

    #[test]
    fn test_build_two_pairs() {
        let tree = ClusterTree::build(&with_refs(&two_pairs()), 16.0, TreeParams::default());
        let root = tree.root().expect("tree has a root");

        assert_eq!(tree.node(root).count, 4);
        assert_eq!(tree.node(root).lod, MIN_NODE_LOD);
        assert_eq!(tree.leaves(root).len(), 4);

        // Both pairs stay merged at LOD 5, split at LOD 15
        let coarse = tree.visible_nodes(5);
        assert_eq!(coarse.len(), 2);
        for &n in &coarse {
            let node = tree.node(n);
            assert!(!node.is_leaf());
            assert_eq!(node.count, 2);
            assert_eq!(node.lod, 12);
        }

        let fine = tree.visible_nodes(15);
        assert_eq!(fine.len(), 4);
        assert!(fine.iter().all(|&n| tree.node(n).is_leaf()));
    }

    #[test]
    fn test_centroid_is_count_weighted() {
        let points = vec![
            Point::new(0.2, 0.2),
            Point::new(0.2, 0.2),
            Point::new(0.2, 0.2),
            Point::new(0.3, 0.2),
        ];
        let tree = ClusterTree::build(&with_refs(&points), 16.0, TreeParams::default());
        let root = tree.node(tree.root().expect("root"));

        assert_eq!(root.count, 4);
        assert!((root.centroid.x() - 0.225).abs() < 1e-12);
        assert!((root.centroid.y() - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_coincident_points_merge_at_max_lod() {
        let points = vec![
            Point::new(0.3, 0.3),
            Point::new(0.3, 0.3),
            Point::new(0.3, 0.3),
        ];
        let params = TreeParams::default();
        let tree = ClusterTree::build(&with_refs(&points), 16.0, params);
        let root = tree.node(tree.root().expect("root"));

        assert_eq!(root.count, 3);
        assert_eq!(root.lod, params.max_lod);
        assert_eq!(root.children.len(), 3);
    }

    #[test]
    fn test_single_and_empty() {
        let empty = ClusterTree::build(&[], 16.0, TreeParams::default());
        assert!(empty.root().is_none());
        assert!(empty.visible_nodes(3).is_empty());

        let single = ClusterTree::build(&with_refs(&[Point::new(0.5, 0.5)]), 16.0, TreeParams::default());
        let root = single.root().expect("root");
        assert!(single.node(root).is_leaf());
        assert_eq!(single.visible_nodes(0), vec![root]);
    }

    #[test]
    fn test_pair_across_seam_merges_early() {
        let points = vec![Point::new(0.999, 0.5), Point::new(0.001, 0.5)];
        let tree = ClusterTree::build(&with_refs(&points), 16.0, TreeParams::default());
        let root = tree.node(tree.root().expect("root"));

        // 0.002 across the seam rather than 0.998 through the world
        assert_eq!(root.count, 2);
        assert_eq!(root.lod, 4);
    }

    #[test]
    fn test_collinear_points_form_a_chain() {
        // One latitude from 0.01 to 0.99, the ends 0.02 apart across the seam
        let points: Vec<Point> = (0..50)
            .rev()
            .map(|i| Point::new(0.01 + i as f64 * 0.02, 0.3))
            .collect();
        let edges = collect_edges(&points);

        assert_eq!(edges.len(), 50);
        let seam: Vec<_> = edges.iter().filter(|e| e.virtual_edge).collect();
        assert_eq!(seam.len(), 1);
        assert_eq!((seam[0].a, seam[0].b), (0, 49));

        let vertical: Vec<Point> = (0..20).map(|i| Point::new(0.5, i as f64 / 20.0)).collect();
        let edges = collect_edges(&vertical);
        assert_eq!(edges.len(), 19);
        assert!(edges.iter().all(|e| !e.virtual_edge));

        let long: Vec<Point> = (0..5000)
            .map(|i| Point::new(i as f64 / 5000.0, 0.7))
            .collect();
        assert_eq!(collect_edges(&long).len(), 5000);
        let tree = ClusterTree::build(&with_refs(&long), 16.0, TreeParams::default());
        assert_eq!(tree.node(tree.root().expect("root")).count, 5000);
    }

    #[test]
    fn test_area_edges_follow_reference_length() {
        let mut tree = ClusterTree::build(&with_refs(&two_pairs()), 16.0, TreeParams::default());
        let root = tree.root().expect("root");

        tree.set_reference_length(256.0);
        assert!((tree.reference_length() - 16.0 / 256.0).abs() < 1e-15);
        let short = tree.area_edges(root);

        tree.set_reference_length(1.0);
        let long = tree.area_edges(root);

        assert!(long.len() > short.len());
        assert!(long.iter().all(|e| e.length <= 16.0));
    }

    #[test]
    fn prop_parent_lod_below_child_lod() {
        fn prop(raw: Vec<(u16, u16)>) -> TestResult {
            if raw.is_empty() {
                return TestResult::discard();
            }
            let points: Vec<Point> = raw
                .iter()
                .map(|&(x, y)| Point::new(x as f64 / 65536.0, y as f64 / 65536.0))
                .collect();
            let tree = ClusterTree::build(&with_refs(&points), 16.0, TreeParams::default());
            let Some(root) = tree.root() else {
                return TestResult::failed();
            };

            let monotone = (0..tree.nodes().len())
                .filter(|&i| tree.is_live(i))
                .all(|i| match tree.node(i).parent {
                    Some(p) => tree.node(p).lod < tree.node(i).lod,
                    None => i == root,
                });
            TestResult::from_bool(monotone && tree.node(root).count == points.len())
        }
        QuickCheck::new()
            .tests(100)
            .quickcheck(prop as fn(Vec<(u16, u16)>) -> TestResult);
    }
}
