//! Tile clustering tool
//!
//! Reads geographic points from a CSV file, clusters them for one viewport
//! with the definitions from a JSON file and writes the resulting clusters.

use clap::Parser;
use csv::{ReaderBuilder, WriterBuilder};
use rust_tile_cluster::cluster::point::{project_lon_lat, unproject};
use rust_tile_cluster::cluster::{ClusterRegistry, ClusteringContext, ResultData, TileRequest};
use rust_tile_cluster::host::{AssignmentRule, MemorySource, RuleContext, VisualObjectSource};
use rust_tile_cluster::{ClusterError, Result};
use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;


/// Used when no definitions file is given
const DEFAULT_DEFINITIONS: &str = r#"[{"id": "grid", "type": "grid", "limit": 2}]"#;

#[derive(Parser)]
#[command(name = "rust_tile_cluster")]
#[command(about = "Tile based map marker clustering tool", long_about = None)]
struct Args {
    /// Input CSV file with latitude,longitude[,category] columns
    #[arg(short, long, default_value = "points.csv")]
    input: PathBuf,

    /// JSON file with an array of cluster definitions
    #[arg(short = 'c', long)]
    definitions: Option<PathBuf>,

    /// Output CSV file with clusters (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Level of detail (zoom)
    #[arg(short, long, default_value_t = 4)]
    lod: u8,

    /// Tile column of the viewport origin
    #[arg(short, long, default_value_t = 0)]
    x: i64,

    /// Tile row of the viewport origin
    #[arg(short, long, default_value_t = 0)]
    y: i64,

    /// Viewport width in tiles
    #[arg(long, default_value_t = 4)]
    nx: u32,

    /// Viewport height in tiles
    #[arg(long, default_value_t = 4)]
    ny: u32,

    /// Enable debug output
    #[arg(short, long)]
    debug: bool,
}

/// One output line
#[derive(Debug, Serialize, PartialEq)]
struct ClusterRow {
    definition: String,
    identity: String,
    count: usize,
    latitude: f64,
    longitude: f64,
    screen_x: f64,
    screen_y: f64,
    visible: bool,
}

/// Assigns each point to the definition named by its category column,
/// falling back to the first definition
struct CategoryRule {
    categories: Vec<Option<usize>>,
    fallback: Option<usize>,
}

impl CategoryRule {
    fn new(categories: &[Option<String>], registry: &ClusterRegistry) -> Self {
        let fallback = registry
            .definitions()
            .iter()
            .position(|d| !d.kind.is_group());
        CategoryRule {
            categories: categories
                .iter()
                .map(|c| c.as_deref().and_then(|id| registry.index_of(id)))
                .collect(),
            fallback,
        }
    }
}

impl AssignmentRule for CategoryRule {
    fn evaluate(
        &self,
        _source: &dyn VisualObjectSource,
        index: usize,
        _context: &RuleContext,
    ) -> Option<usize> {
        self.categories
            .get(index)
            .copied()
            .flatten()
            .or(self.fallback)
    }
}

fn main() {
    let args = Args::parse();

    let level = if args.debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if let Err(e) = run(&args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    let (points, categories) = read_points_and_csv(&args.input)?;
    if points.is_empty() {
        return Err(ClusterError::EmptyInput);
    }
    log::debug!("read {} points from {:?}", points.len(), args.input);

    let definitions = match &args.definitions {
        Some(path) => fs::read_to_string(path)?,
        None => DEFAULT_DEFINITIONS.to_string(),
    };
    let mut context = ClusteringContext::new();
    context.load_json(&definitions)?;

    let source = MemorySource::from_points(points);
    let rule = CategoryRule::new(&categories, context.registry());
    let request = TileRequest::new(args.lod, args.x, args.y, args.nx, args.ny);
    let mode = context.do_clustering(request, &[&source], &rule, 1);
    log::debug!("clustering finished: {:?}", mode);

    let rows = match context.result() {
        Some(result) => cluster_rows(result, context.registry()),
        None => Vec::new(),
    };
    log::debug!("writing {} clusters", rows.len());

    match &args.output {
        None => write_rows(std::io::stdout().lock(), &rows),
        Some(path) => write_rows(File::create(path)?, &rows),
    }
}

/// Reads points and categories from a file
///
/// Expected format: `latitude,longitude[,category]` (header row is optional)
///
/// # Returns
///
/// A tuple `(points, categories)` where:
/// - `points` are normalized world positions
/// - `categories` are the optional third column of every point
fn read_points_and_csv(
    filename: &PathBuf,
) -> Result<(Vec<rust_tile_cluster::Point>, Vec<Option<String>>)> {
    let file = File::open(filename)?;
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(file);

    let mut points = Vec::new();
    let mut categories = Vec::new();
    let mut first = true;

    for result in reader.records() {
        let record = result?;
        let is_header = first && record.get(0).is_some_and(|f| f.trim().parse::<f64>().is_err());
        first = false;
        if is_header || record.len() < 2 {
            continue;
        }

        let lat = record[0].trim().parse::<f64>();
        let lon = record[1].trim().parse::<f64>();
        if let (Ok(lat), Ok(lon)) = (lat, lon) {
            points.push(project_lon_lat(lon, lat));
            categories.push(
                record
                    .get(2)
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(str::to_string),
            );
        }
    }

    Ok((points, categories))
}

/// Flattens the records of a result in draw order, skipping shadow cells
fn cluster_rows(result: &ResultData, registry: &ClusterRegistry) -> Vec<ClusterRow> {
    let visible = result.visible_records();
    let world_px = result.world_px();
    let mut rows = Vec::new();

    for def in registry.draw_order() {
        let Some(output) = result.clust.get(def) else {
            continue;
        };
        for (i, record) in output.records.iter().enumerate() {
            if record.shadow {
                continue;
            }
            let world = record.anchor.scale(record.scale / world_px);
            let (longitude, latitude) = unproject(&world);
            let screen = record.screen_position(world_px, result.view_width());
            rows.push(ClusterRow {
                definition: registry.definitions()[def].id.clone(),
                identity: result.identity(def, i).unwrap_or_default(),
                count: record.count,
                latitude,
                longitude,
                screen_x: screen.x(),
                screen_y: screen.y(),
                visible: visible.contains(&(def, i)),
            });
        }
    }
    rows
}

fn write_rows<W: Write>(out: W, rows: &[ClusterRow]) -> Result<()> {
    let mut writer = WriterBuilder::new().from_writer(out);
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}
