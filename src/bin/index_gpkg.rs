use rusqlite_gpkg_index::{Envelope, Gpkg, Progress};
use wkt::to_wkt::write_geometry;

const USAGE: &str =
    "Usage: index_gpkg <path-to-gpkg> [layer] [--force] [--bbox <minx> <miny> <maxx> <maxy>]";

fn main() {
    if let Err(err) = run() {
        eprintln!("index_gpkg failed: {err}");
        std::process::exit(1);
    }
}

struct Args {
    path: String,
    layer: Option<String>,
    force: bool,
    bbox: Option<Envelope>,
}

fn parse_args() -> Result<Args, Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let path = args.next().ok_or(USAGE)?;
    let mut parsed = Args {
        path,
        layer: None,
        force: false,
        bbox: None,
    };

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--force" => parsed.force = true,
            "--bbox" => {
                let mut coords = [0.0_f64; 4];
                for coord in coords.iter_mut() {
                    *coord = args.next().ok_or(USAGE)?.parse()?;
                }
                let [min_x, min_y, max_x, max_y] = coords;
                let bbox = Envelope::new(min_x, max_x, min_y, max_y);
                bbox.validate()?;
                parsed.bbox = Some(bbox);
            }
            _ if arg.starts_with("--") => return Err(USAGE.into()),
            _ => parsed.layer = Some(arg),
        }
    }

    Ok(parsed)
}

// Prints a line to stderr roughly every tenth of the layer.
struct StderrProgress {
    layer_name: String,
    done: u64,
    max: u64,
    next_report: u64,
}

impl Progress for StderrProgress {
    fn set_max(&mut self, max: u64) {
        self.max = max;
        self.next_report = (max / 10).max(1);
    }

    fn add_progress(&mut self, rows: u64) {
        self.done += rows;
        if self.done >= self.next_report || self.done == self.max {
            eprintln!("  {}: {}/{}", self.layer_name, self.done, self.max);
            self.next_report = self.done + (self.max / 10).max(1);
        }
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = parse_args()?;
    let gpkg = Gpkg::open(&args.path)?;
    let layers = match args.layer {
        Some(layer) => vec![layer],
        None => gpkg.list_layers()?,
    };

    for layer_name in layers {
        let indexer = gpkg.feature_indexer(&layer_name)?;
        let mut progress = StderrProgress {
            layer_name: layer_name.clone(),
            done: 0,
            max: 0,
            next_report: 1,
        };
        let indexed = indexer.index_with_progress(args.force, &mut progress)?;
        if indexed == 0 && indexer.is_indexed()? {
            println!("layer: {layer_name} (up to date)");
        } else {
            println!("layer: {layer_name} ({indexed} features indexed)");
        }

        if let Some(bounds) = indexer.bounds()? {
            println!(
                "  bounds: {} {} {} {}",
                bounds.min_x, bounds.min_y, bounds.max_x, bounds.max_y
            );
        }

        let Some(bbox) = args.bbox else {
            continue;
        };
        println!("  {} features in bbox", indexer.count(Some(&bbox))?);
        for feature in indexer.query_features(Some(&bbox))? {
            let mut wkt = String::new();
            write_geometry(&mut wkt, &feature.geometry()?)?;
            println!("  {}: {wkt}", feature.id());
        }
    }

    Ok(())
}
