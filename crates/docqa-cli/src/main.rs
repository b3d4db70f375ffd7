//! docqa CLI - Command-line interface for the document QA engine.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use docqa_chunk::build_chunker;
use docqa_core::text::truncate_at_word;
use docqa_core::{
    ChunkForest, DocQaConfig, Document, Embedder, EmbeddingConfig, IndexHandle, SearchStrategy,
};
use docqa_embed::HashEmbedder;
use docqa_pipeline::Pipeline;
use docqa_query::RetrieveOptions;
use docqa_store::SqliteStore;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// docqa - Document chunking and hybrid retrieval
#[derive(Parser)]
#[command(name = "docqa")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database path (default: from config)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Config file (default: ~/.config/docqa/config.toml, then ./docqa.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Chunk a file and print the chunks without storing them
    Chunk {
        /// File to chunk
        file: PathBuf,

        /// Build the document/section/paragraph/sentence forest
        #[arg(long)]
        hierarchical: bool,

        /// Print chunk records as JSON
        #[arg(long)]
        json: bool,
    },

    /// Ingest a file or directory
    Ingest {
        /// Path to file or directory to ingest
        path: PathBuf,

        /// Recursively process directories
        #[arg(short, long)]
        recursive: bool,
    },

    /// Retrieve context for a question
    Query {
        /// Question text
        text: String,

        /// Maximum number of results
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// vector, keyword or hybrid
        #[arg(short, long)]
        strategy: Option<String>,

        /// Minimum vector similarity
        #[arg(short, long)]
        threshold: Option<f32>,

        /// Break score ties by chunk quality
        #[arg(long)]
        rerank: bool,
    },

    /// Show statistics
    Stats,
}

fn setup_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}

fn load_config(path: Option<&Path>) -> CliResult<DocQaConfig> {
    let config = match path {
        Some(path) => DocQaConfig::load(path)?,
        None => DocQaConfig::load_default()?,
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> CliResult<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(db) = cli.database {
        config.database.path = db;
    }

    match cli.command {
        Commands::Init => {
            init_database(&config)?;
        }
        Commands::Chunk {
            file,
            hierarchical,
            json,
        } => {
            chunk_file(&config, &file, hierarchical, json)?;
        }
        Commands::Ingest { path, recursive } => {
            let pipeline = open_pipeline(&config)?;
            ingest(&pipeline, &path, recursive).await?;
            pipeline.close().await?;
        }
        Commands::Query {
            text,
            top_k,
            strategy,
            threshold,
            rerank,
        } => {
            let pipeline = open_pipeline(&config)?;
            let mut options = pipeline.default_options();
            if let Some(k) = top_k {
                options.top_k = k;
            }
            if let Some(s) = strategy {
                options.strategy = s.parse::<SearchStrategy>()?;
            }
            if let Some(t) = threshold {
                options.similarity_threshold = t;
            }
            if rerank {
                options.enable_reranking = true;
            }
            query(&pipeline, &text, &options).await?;
            pipeline.close().await?;
        }
        Commands::Stats => {
            let pipeline = open_pipeline(&config)?;
            stats(&pipeline).await?;
            pipeline.close().await?;
        }
    }

    Ok(())
}

fn init_database(config: &DocQaConfig) -> CliResult<()> {
    let db_path = &config.database.path;
    // Create parent directory if needed
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)?;
    }

    // Opening the store creates the schema
    let _store = SqliteStore::from_config(&config.database, config.embedding.dimension)?;
    println!("Initialized database at: {}", db_path.display());
    Ok(())
}

#[cfg(feature = "onnx")]
fn build_embedder(config: &EmbeddingConfig) -> CliResult<Arc<dyn Embedder>> {
    if config.model_path.join("model.onnx").exists() {
        return Ok(Arc::new(docqa_embed::OnnxEmbedder::from_config(config)?));
    }
    tracing::warn!(
        "No ONNX model in {}, falling back to the hashing embedder",
        config.model_path.display()
    );
    Ok(Arc::new(HashEmbedder::from_config(config)?))
}

#[cfg(not(feature = "onnx"))]
fn build_embedder(config: &EmbeddingConfig) -> CliResult<Arc<dyn Embedder>> {
    Ok(Arc::new(HashEmbedder::from_config(config)?))
}

fn open_pipeline(config: &DocQaConfig) -> CliResult<Pipeline> {
    let db_path = &config.database.path;
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            return Err(format!(
                "Database directory {} does not exist. Run 'docqa init' first, or specify a path with -d.",
                parent.display()
            )
            .into());
        }
    }

    let embedder = build_embedder(&config.embedding)?;
    let store = Arc::new(SqliteStore::from_config(&config.database, embedder.dimension())?);
    let chunker = build_chunker(&config.chunking)?;
    Ok(Pipeline::open(
        config.clone(),
        chunker,
        embedder,
        IndexHandle::from_store(store),
    )?)
}

fn chunk_file(config: &DocQaConfig, file: &Path, hierarchical: bool, json: bool) -> CliResult<()> {
    let content = fs::read_to_string(file)?;
    let mut chunking = config.chunking.clone();
    if hierarchical {
        chunking.hierarchical = true;
    }
    chunking.validate()?;

    let chunker = build_chunker(&chunking)?;
    let doc = Document::new(&source_uri(file)?, &content);
    let forest = ChunkForest::build(&doc, chunker.chunk(&content)?)?;

    if json {
        println!("{}", serde_json::to_string_pretty(forest.chunks())?);
        return Ok(());
    }

    println!("{} chunk(s) from {}:\n", forest.len(), file.display());
    for chunk in forest.chunks() {
        let depth = match chunk.parent_id {
            Some(_) => "  ".repeat(chunk.granularity as usize),
            None => String::new(),
        };
        println!(
            "{}[{} #{}] lines {}-{}, {} tokens, quality {:.2}{}",
            depth,
            chunk.granularity,
            chunk.chunk_index,
            chunk.start_line,
            chunk.end_line,
            chunk.token_count,
            chunk.quality_score,
            chunk
                .heading
                .as_deref()
                .map(|h| format!(", heading {:?}", h))
                .unwrap_or_default()
        );
        let preview = truncate_at_word(&chunk.content, 120).replace('\n', " ");
        println!("{}  {}\n", depth, preview);
    }
    Ok(())
}

fn source_uri(path: &Path) -> CliResult<String> {
    Ok(format!("file://{}", path.canonicalize()?.display()))
}

async fn ingest(pipeline: &Pipeline, path: &Path, recursive: bool) -> CliResult<()> {
    let files = collect_files(path, recursive)?;

    if files.is_empty() {
        println!("No supported files found at: {}", path.display());
        return Ok(());
    }

    println!("Ingesting {} file(s)...", files.len());

    let mut documents = Vec::with_capacity(files.len());
    let mut read_errors = 0;
    for file_path in files {
        match fs::read_to_string(&file_path) {
            Ok(content) => documents.push((source_uri(&file_path)?, content)),
            Err(e) => {
                eprintln!("  Error reading {}: {}", file_path.display(), e);
                read_errors += 1;
            }
        }
    }

    let report = pipeline.ingest_batch(&documents).await;
    for r in &report.reports {
        if r.unchanged {
            println!("  {} - unchanged (v{})", r.source_uri, r.version);
        } else {
            println!(
                "  {} - v{}, {} chunks, {} embedded",
                r.source_uri, r.version, r.chunks, r.embedded
            );
        }
    }

    println!(
        "\nComplete: {} ingested, {} unchanged, {} failed",
        report.ingested,
        report.unchanged,
        report.failed + read_errors
    );

    Ok(())
}

fn collect_files(path: &Path, recursive: bool) -> Result<Vec<PathBuf>, std::io::Error> {
    let mut files = Vec::new();

    if path.is_file() {
        if is_supported_file(path) {
            files.push(path.to_path_buf());
        }
    } else if path.is_dir() {
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            let entry_path = entry.path();

            if entry_path.is_file() && is_supported_file(&entry_path) {
                files.push(entry_path);
            } else if entry_path.is_dir() && recursive {
                files.extend(collect_files(&entry_path, recursive)?);
            }
        }
    }

    files.sort();
    Ok(files)
}

fn is_supported_file(path: &Path) -> bool {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    matches!(ext, "txt" | "md" | "markdown" | "text" | "rst")
}

async fn query(
    pipeline: &Pipeline,
    text: &str,
    options: &RetrieveOptions,
) -> CliResult<()> {
    let context = pipeline.query(text, options).await?;

    println!(
        "Found {} results in {}ms ({:?}), confidence {:.2} -> {:?}\n",
        context.results.len(),
        context.latency_ms,
        context.strategy,
        context.confidence.confidence,
        context.assessment
    );

    for result in &context.results {
        println!(
            "---\n[{}] {} #{} (score: {:.3}, {:?})",
            result.rank,
            result.chunk.granularity,
            result.chunk.chunk_index,
            result.combined_score,
            result.source
        );
        if let Some(heading) = &result.chunk.heading {
            println!("Section: {}", heading);
        }
        println!(
            "Lines {}-{}:\n{}\n",
            result.chunk.start_line, result.chunk.end_line, result.chunk.content
        );
    }

    Ok(())
}

async fn stats(pipeline: &Pipeline) -> CliResult<()> {
    let stats = pipeline.stats().await?;

    println!("Overall statistics:\n");
    println!("- Documents: {}", stats.documents);
    println!("- Chunks: {}", stats.chunks);
    println!("- Embeddings: {}", stats.embeddings);
    println!(
        "- Storage: {:.2} MB",
        stats.storage_bytes as f64 / 1024.0 / 1024.0
    );
    Ok(())
}
