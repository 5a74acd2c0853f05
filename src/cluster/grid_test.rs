#[cfg(test)]
mod tests {
    use crate::cluster::Point;
    use crate::cluster::grid::{GridWorkspace, cell_bounds, cell_key};

    #[test]
    fn test_cell_key() {
        let size = (256.0, 256.0);
        assert_eq!(cell_key(&Point([300.0, 10.0]), size, 1024.0), (1, 0));
        assert_eq!(cell_key(&Point([0.0, 600.0]), size, 1024.0), (0, 2));
        // Columns wrap with the world
        assert_eq!(cell_key(&Point([-10.0, 0.0]), size, 1024.0), (3, 0));
        assert_eq!(cell_key(&Point([1030.0, 0.0]), size, 1024.0), (0, 0));
    }

    #[test]
    fn test_cell_key_partial_last_column() {
        // 1000 px world, 300 px cells: the fourth column is narrower
        let size = (300.0, 300.0);
        assert_eq!(cell_key(&Point([950.0, 0.0]), size, 1000.0), (3, 0));
        assert_eq!(cell_key(&Point([-1.0, 0.0]), size, 1000.0), (3, 0));
    }

    #[test]
    fn test_cell_bounds() {
        let bounds = cell_bounds((2, 1), (64.0, 32.0));
        assert_eq!(bounds.min, Point([128.0, 32.0]));
        assert_eq!(bounds.max, Point([192.0, 64.0]));
        assert_eq!(bounds.center(), Point([160.0, 48.0]));
    }

    #[test]
    fn test_workspace_cells() {
        let mut ws = GridWorkspace::default();
        let a = ws.cell_index((1, 1));
        let b = ws.cell_index((0, 1));
        let c = ws.cell_index((5, 0));
        assert_eq!(ws.cell_index((1, 1)), a);
        assert_eq!(ws.cells.len(), 3);

        // Rows first, then columns
        assert_eq!(ws.sorted(), vec![c, b, a]);
    }
}
