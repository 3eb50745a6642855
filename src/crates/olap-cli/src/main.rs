//! # olap
//!
//! Runs vertex-centric OLAP jobs over JSON graph fixtures.

use anyhow::Context;
use clap::{Parser, Subcommand};
use olap_cli::{run_program, GraphFixture, ProgramKind};
use olap_engine::ExecutorConfig;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "olap")]
#[command(about = "Run vertex-centric OLAP jobs over graph fixtures", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a built-in vertex program and print per-vertex results as JSON
    Run {
        /// Path to the JSON graph fixture
        #[arg(short, long)]
        graph: PathBuf,

        /// Program to run
        #[arg(short, long, value_enum, default_value_t = ProgramKind::Degree)]
        program: ProgramKind,

        /// Worker slots, overrides the config file
        #[arg(long, env = "OLAP_PARALLELISM")]
        parallelism: Option<usize>,

        /// Executor configuration (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Edge label offset to traverse
        #[arg(long, default_value_t = 0)]
        label: u64,
    },

    /// Validate an executor configuration file
    CheckConfig {
        /// Path to TOML file
        file: PathBuf,
    },

    /// Write a random graph fixture
    Generate {
        /// Number of vertices
        #[arg(long, default_value_t = 100)]
        vertices: u64,

        /// Outgoing edges per vertex
        #[arg(long, default_value_t = 3)]
        degree: u32,

        /// Random seed
        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(rust_log)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            graph,
            program,
            parallelism,
            config,
            label,
        } => {
            let mut executor = match config {
                Some(path) => ExecutorConfig::from_file(&path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => ExecutorConfig::default(),
            };
            if let Some(parallelism) = parallelism {
                executor = executor.with_parallelism(parallelism);
            }

            let fixture = GraphFixture::load(&graph)
                .with_context(|| format!("loading {}", graph.display()))?;
            let loaded = fixture.build()?;
            info!(
                vertices = fixture.vertices.len(),
                edges = fixture.edges.len(),
                parallelism = executor.parallelism,
                "Graph loaded"
            );

            let report = run_program(&loaded, program, label, executor).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::CheckConfig { file } => {
            let config = ExecutorConfig::from_file(&file)
                .with_context(|| format!("checking {}", file.display()))?;
            println!("{}: ok", file.display());
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Generate {
            vertices,
            degree,
            seed,
            output,
        } => {
            let json = GraphFixture::generate(vertices, degree, seed).to_json()?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json)?;
                    info!(path = %path.display(), vertices, "Fixture written");
                }
                None => println!("{}", json),
            }
        }
    }

    Ok(())
}
