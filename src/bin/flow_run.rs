//! Runs a node graph over one or more images.
//!
//! # Usage
//!
//! ```bash
//! flow-run --graph inspect.json --image part1.png --image part2.png \
//!     --templates-dir templates --output result.json
//! ```
//!
//! Model nodes run against a backend that detects nothing; embedders supply
//! real backends through the library API. The CLI is useful for checking a
//! graph and exercising its geometry, template and output nodes.

use clap::Parser;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use vision_flow::inference::NullBackend;
use vision_flow::pipeline::FlowModel;
use vision_flow::utils::load_image;

/// Command-line arguments for flow-run
#[derive(Parser)]
#[command(name = "flow-run")]
#[command(about = "Run a vision-flow graph over images")]
struct Args {
    /// Path to the graph description (JSON)
    #[arg(short, long)]
    graph: PathBuf,

    /// Input images; each one is a separate run
    #[arg(short, long = "image", required = true)]
    images: Vec<PathBuf>,

    /// Directory used by template nodes
    #[arg(long)]
    templates_dir: Option<PathBuf>,

    /// Write the payloads to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Check that every model node's model can be loaded, then exit
    #[arg(long)]
    check_models: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    vision_flow::utils::init_tracing();
    let args = Args::parse();

    let mut model = FlowModel::load(&args.graph, Arc::new(NullBackend))?;
    if let Some(dir) = &args.templates_dir {
        model = model.with_templates_dir(dir);
    }

    if args.check_models {
        let report = model.load_models();
        println!("{}", serde_json::to_string_pretty(&report)?);
        return if report.is_ok() {
            Ok(())
        } else {
            Err(report.message.into())
        };
    }

    let mut payloads = Vec::with_capacity(args.images.len());
    for path in &args.images {
        let image = match load_image(path) {
            Ok(image) => image,
            Err(e) => {
                error!("skipping {}: {}", path.display(), e);
                continue;
            }
        };
        let mut ctx = model.context();
        ctx.frontend_image = Some(Arc::new(image));
        ctx.frontend_image_path = Some(path.clone());

        let start = Instant::now();
        let payload = model.infer_with(ctx)?;
        info!("{}: finished in {:?}", path.display(), start.elapsed());
        payloads.push(json!({
            "image": path.display().to_string(),
            "payload": payload,
        }));
    }
    if payloads.is_empty() {
        warn!("no image could be processed");
    }

    let text = serde_json::to_string_pretty(&Value::Array(payloads))?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, text)?;
            info!("wrote {}", path.display());
        }
        None => println!("{}", text),
    }
    Ok(())
}
