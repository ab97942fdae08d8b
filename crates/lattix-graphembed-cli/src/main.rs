//! graphembed CLI - dialogue graph embeddings from the command line.
//!
//! # Usage
//!
//! ```bash
//! # Validate settings and show the derived configuration
//! graphembed config settings.json
//!
//! # Override options from the settings file
//! graphembed config settings.json --mp-iters 2 --combine-message sum
//!
//! # Embed a batch with freshly initialized parameters
//! graphembed context settings.json --batch batch.json -o context.json
//! ```
//!
//! `settings.json` holds `{ "options": {...}, "metadata": {...}, "batch_size": n }`.
//! `batch.json` holds `{ "graphs": [...], "utterances": [[[...]]] }`.

use anyhow::{bail, Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use clap::{Args, Parser, Subcommand};
use lattix_graphembed::{
    GraphBatch, GraphConfig, GraphEmbedOptions, GraphEmbedder, GraphInput, GraphMetadata,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "graphembed")]
#[command(about = "Dialogue knowledge graph embedding CLI", long_about = None)]
struct Cli {
    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate settings and print the derived configuration
    Config {
        /// Settings file (JSON)
        settings: PathBuf,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Compute node context vectors for a batch
    Context {
        /// Settings file (JSON)
        settings: PathBuf,

        /// Batch file (JSON)
        #[arg(short, long)]
        batch: PathBuf,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        overrides: Overrides,
    },
}

/// Command-line overrides for the settings file.
#[derive(Args, Debug, Default)]
struct Overrides {
    /// Knowledge graph node/subgraph embedding size
    #[arg(long)]
    node_embed_size: Option<usize>,

    /// Knowledge graph edge label embedding size
    #[arg(long)]
    edge_embed_size: Option<usize>,

    /// Knowledge graph entity embedding size
    #[arg(long)]
    entity_embed_size: Option<usize>,

    /// Number of entities to remember per utterance
    #[arg(long)]
    entity_cache_size: Option<usize>,

    /// Use entity embedding when computing node embeddings
    #[arg(long)]
    use_entity_embedding: bool,

    /// Number of message passing iterations
    #[arg(long)]
    mp_iters: Option<usize>,

    /// How to combine propagated messages {concat, sum}
    #[arg(long = "combine-message")]
    combine_message: Option<String>,

    /// Number of graphs per batch
    #[arg(long)]
    batch_size: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct Settings {
    #[serde(default)]
    options: GraphEmbedOptions,
    metadata: GraphMetadata,
    #[serde(default = "default_batch_size")]
    batch_size: usize,
}

fn default_batch_size() -> usize {
    1
}

#[derive(Debug, Deserialize)]
struct BatchFile {
    graphs: Vec<GraphInput>,
    utterances: Vec<Vec<Vec<f32>>>,
}

#[derive(Debug, Serialize)]
struct ContextOutput {
    shape: Vec<usize>,
    context: Vec<Vec<Vec<f32>>>,
    mask: Vec<Vec<u8>>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Config {
            settings,
            overrides,
        } => {
            let config = load_config(&settings, &overrides)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }

        Commands::Context {
            settings,
            batch,
            output,
            overrides,
        } => {
            let config = load_config(&settings, &overrides)?;
            let start = Instant::now();
            let out = run_context(config, &batch)?;
            info!(
                shape = ?out.shape,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "computed graph context"
            );

            let json = serde_json::to_string(&out)?;
            match output {
                Some(path) => {
                    fs::write(&path, json)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("Wrote context {:?} to {}", out.shape, path.display());
                }
                None => println!("{json}"),
            }
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "graphembed=debug,lattix_graphembed=debug"
    } else {
        "graphembed=info,lattix_graphembed=info"
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .init();
}

fn load_config(path: &Path, overrides: &Overrides) -> Result<GraphConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read settings {}", path.display()))?;
    let mut settings: Settings = serde_json::from_str(&text)
        .with_context(|| format!("invalid settings file {}", path.display()))?;
    apply_overrides(&mut settings, overrides);
    debug!(?settings, "loaded settings");

    GraphConfig::new(&settings.options, &settings.metadata, settings.batch_size)
        .context("invalid graph embedding configuration")
}

fn apply_overrides(settings: &mut Settings, overrides: &Overrides) {
    let options = &mut settings.options;
    if let Some(v) = overrides.node_embed_size {
        options.node_embed_size = v;
    }
    if let Some(v) = overrides.edge_embed_size {
        options.edge_embed_size = v;
    }
    if let Some(v) = overrides.entity_embed_size {
        options.entity_embed_size = Some(v);
    }
    if overrides.use_entity_embedding {
        options.use_entity_embedding = true;
    }
    if let Some(v) = overrides.mp_iters {
        options.mp_iters = v;
    }
    if let Some(v) = &overrides.combine_message {
        options.message_combiner = v.clone();
    }
    if let Some(v) = overrides.entity_cache_size {
        settings.metadata.entity_cache_size = v;
    }
    if let Some(v) = overrides.batch_size {
        settings.batch_size = v;
    }
}

fn run_context(config: GraphConfig, batch_path: &Path) -> Result<ContextOutput> {
    let text = fs::read_to_string(batch_path)
        .with_context(|| format!("failed to read batch {}", batch_path.display()))?;
    let file: BatchFile = serde_json::from_str(&text)
        .with_context(|| format!("invalid batch file {}", batch_path.display()))?;

    let device = Device::Cpu;
    let utterances = utterance_tensor(&file.utterances, &device)?;
    let batch = GraphBatch::from_graphs(&file.graphs, &config, &device)
        .context("failed to build graph batch")?;

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let embedder = GraphEmbedder::new(config, vb)?;
    let out = embedder.get_context(&utterances, &batch)?;

    Ok(ContextOutput {
        shape: out.context.dims().to_vec(),
        context: out.context.to_vec3::<f32>()?,
        mask: out.mask.to_vec2::<u8>()?,
    })
}

fn utterance_tensor(rows: &[Vec<Vec<f32>>], device: &Device) -> Result<Tensor> {
    let b = rows.len();
    let r = rows.first().map(Vec::len).unwrap_or(0);
    let u = rows
        .first()
        .and_then(|g| g.first())
        .map(Vec::len)
        .unwrap_or(0);
    if rows
        .iter()
        .any(|g| g.len() != r || g.iter().any(|row| row.len() != u))
    {
        bail!("utterances must be a dense (batch, rows, utterance_size) array");
    }
    let flat: Vec<f32> = rows.iter().flatten().flatten().copied().collect();
    Ok(Tensor::from_vec(flat, (b, r, u), device)?)
}
