//! Mache binary — thin CLI shell over the [`mache_core`] projection engine.
//!
//! Builds the projection from a records database, a topology, and source
//! directories, then serves one-shot inspection commands against the same
//! read interface a network-filesystem adapter would use.

use clap::{Parser, Subcommand};
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use mache_core::facade::read_to_vec;
use mache_core::schema::compile;
use mache_core::template::MiniTemplate;
use mache_core::vfs::DiagnosticStore;
use mache_core::{
    GraphReader, GraphStore, ProjectionView, RefIndex, SourceIngestor, TableProjection, Topology,
};

mod config;
use config::Config;

// ---------------------------------------------------------------------------
// CLI definition (clap derive)
// ---------------------------------------------------------------------------

/// Project SQL tables and source trees into a navigable, writable virtual
/// filesystem.
#[derive(Parser)]
#[command(name = "mache", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: ./.mache.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// SQLite database holding the records table
    #[arg(long)]
    database: Option<PathBuf>,

    /// Topology JSON document
    #[arg(long)]
    topology: Option<PathBuf>,

    /// Source directory to ingest (repeatable)
    #[arg(long = "source", value_name = "DIR")]
    sources: Vec<PathBuf>,

    /// Sidecar database for the cross-reference index
    #[arg(long)]
    refs_db: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the projection and report ingest/scan statistics
    Scan,
    /// List the children of a directory in the projection
    Ls {
        /// Path within the projection (empty for the root)
        #[arg(default_value = "")]
        path: String,
    },
    /// Print a projected file's content
    Cat { path: String },
    /// Paths referencing a token, plus its definition if known
    Refs { token: String },
    /// Run a read-only SQL query against the reference store
    Query { sql: String },
    /// Print the active topology
    Schema,
}

// ---------------------------------------------------------------------------
// Projection assembly
// ---------------------------------------------------------------------------

struct Projection {
    view: Arc<ProjectionView>,
    ingestor: SourceIngestor,
    topology: Topology,
    refs_db: PathBuf,
}

fn build_projection(cli: &Cli) -> Result<Projection, String> {
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default(),
    };

    let topology_path = cli
        .topology
        .clone()
        .or(config.projection.topology)
        .ok_or("no topology given (use --topology or .mache.toml)")?;
    let topology_text = std::fs::read_to_string(&topology_path)
        .map_err(|e| format!("cannot read {}: {e}", topology_path.display()))?;
    let topology = Topology::from_json(&topology_text).map_err(|e| e.to_string())?;
    let schema = compile(&topology).map_err(|e| e.to_string())?;

    let engine = Arc::new(MiniTemplate);
    let database = cli.database.clone().or(config.projection.database);
    let mut tables = Vec::new();
    if let Some(db) = &database {
        for root in schema.scan_roots() {
            let projection = TableProjection::new(
                db.clone(),
                schema.clone(),
                &root.name_template,
                engine.clone(),
            )
            .map_err(|e| e.to_string())?;
            tables.push(Arc::new(projection));
        }
    }

    let store = Arc::new(GraphStore::new());
    let ingestor = SourceIngestor::new(store.clone(), schema, engine);
    let mut sources = cli.sources.clone();
    sources.extend(config.sources.dirs);
    for dir in &sources {
        let stats = ingestor.ingest_dir(dir).map_err(|e| e.to_string())?;
        info!(
            dir = %dir.display(),
            files = stats.files,
            constructs = stats.constructs,
            "ingested"
        );
    }

    let diags = Arc::new(DiagnosticStore::new());
    let view = Arc::new(
        ProjectionView::new(store, tables, diags, &topology).map_err(|e| e.to_string())?,
    );
    let refs_db = cli
        .refs_db
        .clone()
        .or(config.projection.refs_db)
        .unwrap_or_else(|| PathBuf::from("mache-refs.db"));
    Ok(Projection { view, ingestor, topology, refs_db })
}

fn open_refs(projection: &Projection) -> Result<RefIndex, String> {
    let refs = RefIndex::open(&projection.refs_db).map_err(|e| e.to_string())?;
    projection.ingestor.publish_refs(&refs).map_err(|e| e.to_string())?;
    Ok(refs)
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn run(cli: &Cli) -> Result<(), String> {
    match &cli.command {
        Commands::Scan => {
            let projection = build_projection(cli)?;
            let roots = projection.view.list_children("").map_err(|e| e.to_string())?;
            println!("{} top-level entries:", roots.len());
            for root in roots {
                println!("  {root}");
            }
            Ok(())
        }
        Commands::Ls { path } => {
            let projection = build_projection(cli)?;
            for child in projection.view.list_children(path).map_err(|e| e.to_string())? {
                println!("{child}");
            }
            Ok(())
        }
        Commands::Cat { path } => {
            let projection = build_projection(cli)?;
            let bytes =
                read_to_vec(projection.view.as_ref(), path).map_err(|e| e.to_string())?;
            std::io::stdout().write_all(&bytes).map_err(|e| e.to_string())
        }
        Commands::Refs { token } => {
            let projection = build_projection(cli)?;
            let refs = open_refs(&projection)?;
            if let Some(def) = projection.ingestor.lookup_definition(token) {
                println!("defined at: {def}");
            }
            for path in refs.get_callers(token).map_err(|e| e.to_string())? {
                println!("{path}");
            }
            Ok(())
        }
        Commands::Query { sql } => {
            let projection = build_projection(cli)?;
            let refs = open_refs(&projection)?;
            let out = refs.query(sql).map_err(|e| e.to_string())?;
            println!("{}", out.columns.join("\t"));
            for row in out.rows {
                println!("{}", row.join("\t"));
            }
            Ok(())
        }
        Commands::Schema => {
            let projection = build_projection(cli)?;
            print!("{}", projection.topology.to_pretty_json().map_err(|e| e.to_string())?);
            Ok(())
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mache=info".parse().expect("static directive")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(&cli) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
