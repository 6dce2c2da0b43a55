use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use lorestore::{
    npy, ChunkMetadata, Document, Embedder, EmbeddingStore, IngestOptions, IngestReport, Indexer,
    NamespaceRegistry, OpenAiEmbedder, SearchError, SearchFilter, SimilarityIndex, StoreError,
};

#[derive(Parser, Debug)]
#[command(
    name = "lorestore",
    about = "Campaign document embedding store: ingest, search, and maintain namespaces"
)]
struct Cli {
    /// Root directory holding the per-namespace vector stores
    #[arg(
        long,
        global = true,
        env = "LORESTORE_DATA_DIR",
        default_value = "data/vectors"
    )]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Chunk, embed, and store a campaign's content directory
    Ingest(IngestArgs),
    /// Embed a query and print the closest stored chunks
    Search(SearchArgs),
    /// Delete one namespace, or every namespace of a campaign
    Clear(ClearArgs),
    /// List every namespace present under the data directory
    List,
    /// Import a legacy NumPy vector store into the JSON format
    ImportNpy(ImportNpyArgs),
}

#[derive(Args, Debug)]
struct IngestArgs {
    /// Campaign identifier, used as the namespace prefix
    #[arg(long, env = "LORESTORE_CAMPAIGN")]
    campaign: String,

    /// Content root holding `player/` and `gm/` subtrees of .txt/.md files
    #[arg(long)]
    content_dir: PathBuf,

    /// Chunk length in code points
    #[arg(long, env = "LORESTORE_CHUNK_SIZE", default_value_t = 512)]
    chunk_size: usize,

    /// Re-embed even when the stored vectors are newer than every file
    #[arg(long, default_value_t = false)]
    force: bool,

    #[command(flatten)]
    embedder: EmbedderArgs,
}

#[derive(Args, Debug)]
struct SearchArgs {
    /// Campaign identifier, used as the namespace prefix
    #[arg(long, env = "LORESTORE_CAMPAIGN")]
    campaign: String,

    /// Context directory name within the campaign ("." for the root context)
    #[arg(long, default_value = ".")]
    context: String,

    /// Query text to embed and match against stored chunks
    query: String,

    /// Maximum number of results to print
    #[arg(long, default_value_t = 5)]
    top_k: usize,

    /// Include GM-only chunks in the results
    #[arg(long, default_value_t = false)]
    gm: bool,

    /// Only match chunks with this category
    #[arg(long)]
    category: Option<String>,

    /// Only match chunks from this source file
    #[arg(long)]
    file: Option<String>,

    #[command(flatten)]
    embedder: EmbedderArgs,
}

#[derive(Args, Debug)]
struct ClearArgs {
    /// Campaign identifier, used as the namespace prefix
    #[arg(long, env = "LORESTORE_CAMPAIGN")]
    campaign: String,

    /// Context directory name; omit to clear every namespace of the campaign
    #[arg(long)]
    context: Option<String>,
}

#[derive(Args, Debug)]
struct ImportNpyArgs {
    /// Campaign identifier, used as the namespace prefix
    #[arg(long, env = "LORESTORE_CAMPAIGN")]
    campaign: String,

    /// Context directory name within the campaign
    #[arg(long, default_value = ".")]
    context: String,

    /// Legacy `.npy` file holding the float32 vectors
    #[arg(long)]
    vectors: PathBuf,

    /// Legacy metadata JSON array matching the vectors
    #[arg(long)]
    metadata: PathBuf,

    /// Legacy texts JSON array matching the vectors
    #[arg(long)]
    texts: PathBuf,
}

#[derive(Args, Debug)]
struct EmbedderArgs {
    /// API key for the OpenAI-compatible embedding endpoint
    #[arg(long, env = "OPENAI_API_KEY")]
    openai_api_key: String,

    /// Embedding model identifier (e.g. text-embedding-3-small)
    #[arg(
        long,
        env = "LORESTORE_OPENAI_MODEL",
        default_value = "text-embedding-3-small"
    )]
    openai_model: String,

    /// Optional dimension override when supported by the model
    #[arg(long, env = "LORESTORE_OPENAI_DIMENSIONS")]
    openai_dimensions: Option<usize>,

    /// Base URL for the OpenAI-compatible API
    #[arg(
        long,
        env = "LORESTORE_OPENAI_BASE",
        default_value = "https://api.openai.com/v1"
    )]
    openai_base_url: String,

    /// Max seconds to wait for each embedding request
    #[arg(long, env = "LORESTORE_OPENAI_TIMEOUT_SECS", default_value_t = 30)]
    openai_timeout_secs: u64,

    /// Number of retries for rate limits or transient errors
    #[arg(long, env = "LORESTORE_OPENAI_MAX_RETRIES", default_value_t = 5)]
    max_retries: usize,

    /// Max number of chunks to send per embedding request
    #[arg(long, env = "LORESTORE_OPENAI_BATCH", default_value_t = 32)]
    batch_size: usize,
}

impl EmbedderArgs {
    fn build(self) -> Result<OpenAiEmbedder> {
        OpenAiEmbedder::new(
            self.openai_api_key,
            self.openai_base_url,
            self.openai_model,
            self.openai_dimensions,
            Duration::from_secs(self.openai_timeout_secs.max(1)),
            self.max_retries.max(1),
            self.batch_size.max(1),
        )
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let store = EmbeddingStore::new(&cli.data_dir);
    let registry = NamespaceRegistry::new(&cli.data_dir);

    match cli.command {
        Command::Ingest(args) => run_ingest(&store, &registry, args),
        Command::Search(args) => run_search(&store, &registry, args),
        Command::Clear(args) => run_clear(&store, &registry, args),
        Command::List => run_list(&store),
        Command::ImportNpy(args) => run_import_npy(&store, &registry, args),
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_ingest(store: &EmbeddingStore, registry: &NamespaceRegistry, args: IngestArgs) -> Result<()> {
    let batch_size = args.embedder.batch_size.max(1);
    let embedder = args.embedder.build()?;
    let grouped = collect_documents(&args.content_dir)?;
    anyhow::ensure!(
        !grouped.is_empty(),
        "no .txt or .md files found under {:?} (expected player/ and gm/ subtrees)",
        args.content_dir
    );

    let indexer = Indexer::new(store, &embedder);
    let options = IngestOptions {
        chunk_size: args.chunk_size.max(1),
        batch_size,
        force: args.force,
    };

    let mut totals = IngestReport::default();
    for (context, documents) in &grouped {
        let namespace = registry.namespace(&args.campaign, context);
        let report = indexer
            .ingest(&namespace, documents, &options, None)
            .with_context(|| format!("ingestion failed for namespace {namespace}"))?;
        eprintln!(
            "namespace {}: {} embedded, {} fresh, {} empty, {} failed ({} chunks)",
            namespace,
            report.processed,
            report.skipped,
            report.skipped_empty,
            report.failed,
            report.total_chunks
        );
        totals.processed += report.processed;
        totals.skipped += report.skipped;
        totals.skipped_empty += report.skipped_empty;
        totals.failed += report.failed;
        totals.total_chunks += report.total_chunks;
    }

    eprintln!(
        "ingestion complete: {} documents embedded across {} namespace(s), {} chunks written ({} fresh, {} empty, {} failed).",
        totals.processed,
        grouped.len(),
        totals.total_chunks,
        totals.skipped,
        totals.skipped_empty,
        totals.failed
    );
    Ok(())
}

fn run_search(store: &EmbeddingStore, registry: &NamespaceRegistry, args: SearchArgs) -> Result<()> {
    let namespace = registry.namespace(&args.campaign, &args.context);
    let embedder = args.embedder.build()?;
    let query_vector = embedder
        .embed_batch(&[args.query.as_str()])
        .map_err(|err| anyhow::anyhow!("failed to embed query: {err}"))?
        .into_iter()
        .next()
        .context("embedding endpoint returned no vector for the query")?;

    let mut filter = if args.gm {
        SearchFilter::default()
    } else {
        SearchFilter::player_visible()
    };
    filter.category = args.category;
    filter.file = args.file;

    let index = SimilarityIndex::new(store);
    let hits = match index.search(&namespace, &query_vector, args.top_k, Some(&filter)) {
        Ok(hits) => hits,
        Err(SearchError::Store(StoreError::NotFound { namespace })) => {
            println!("no index available for namespace {namespace}; run ingest first.");
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };

    if hits.is_empty() {
        println!("no matching chunks in namespace {namespace}.");
        return Ok(());
    }
    for (rank, hit) in hits.iter().enumerate() {
        println!(
            "{:>2}. score {:.4}  {} [chunk {}/{}]",
            rank + 1,
            hit.score,
            hit.metadata.file,
            hit.metadata.chunk_index + 1,
            hit.metadata.total_chunks
        );
        println!("    {}", preview(&hit.text));
    }
    Ok(())
}

fn run_clear(store: &EmbeddingStore, registry: &NamespaceRegistry, args: ClearArgs) -> Result<()> {
    if let Some(context) = &args.context {
        let namespace = registry.namespace(&args.campaign, context);
        store.clear(&namespace)?;
        eprintln!("cleared namespace {namespace}.");
        return Ok(());
    }

    let root = registry.namespace(&args.campaign, ".");
    let prefix = format!("{root}_");
    let mut cleared = 0usize;
    for namespace in store.namespaces()? {
        if namespace == root || namespace.starts_with(&prefix) {
            store.clear(&namespace)?;
            eprintln!("cleared namespace {namespace}.");
            cleared += 1;
        }
    }
    if cleared == 0 {
        eprintln!("no namespaces found for campaign {}.", args.campaign);
    }
    Ok(())
}

fn run_list(store: &EmbeddingStore) -> Result<()> {
    let namespaces = store.namespaces()?;
    if namespaces.is_empty() {
        println!("no namespaces stored.");
        return Ok(());
    }
    for namespace in namespaces {
        println!("{namespace}");
    }
    Ok(())
}

fn run_import_npy(
    store: &EmbeddingStore,
    registry: &NamespaceRegistry,
    args: ImportNpyArgs,
) -> Result<()> {
    let raw = fs::read(&args.vectors)
        .with_context(|| format!("failed to read vectors {:?}", args.vectors))?;
    let vectors = npy::read_f32_vectors(&raw)
        .with_context(|| format!("failed to parse NPY file {:?}", args.vectors))?;

    let metadata: Vec<ChunkMetadata> = read_json_array(&args.metadata)?;
    let texts: Vec<String> = read_json_array(&args.texts)?;

    let namespace = registry.namespace(&args.campaign, &args.context);
    let count = vectors.len();
    store.save(&namespace, vectors, metadata, texts)?;
    eprintln!("imported {count} legacy vectors into namespace {namespace}.");
    Ok(())
}

fn read_json_array<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let raw = fs::read(path).with_context(|| format!("failed to read {path:?}"))?;
    serde_json::from_slice(&raw).with_context(|| format!("invalid JSON array in {path:?}"))
}

/// Walks `player/` and `gm/` subtrees of the content root and groups the
/// documents by context directory. A file directly under a subtree belongs to
/// the root context ".".
fn collect_documents(root: &Path) -> Result<BTreeMap<String, Vec<Document>>> {
    let mut grouped: BTreeMap<String, Vec<Document>> = BTreeMap::new();
    for (subtree, is_gm) in [("player", false), ("gm", true)] {
        let base = root.join(subtree);
        if !base.is_dir() {
            continue;
        }
        let mut files = Vec::new();
        walk_files(&base, &mut files)?;
        files.sort();
        for path in files {
            if !is_text_file(&path) {
                continue;
            }
            let rel = path
                .strip_prefix(&base)
                .ok()
                .context("walked file escaped its subtree")?;
            let mut components = rel.components();
            let first = components.next();
            let context = match (first, components.next()) {
                (Some(dir), Some(_)) => dir.as_os_str().to_string_lossy().into_owned(),
                _ => ".".to_string(),
            };

            let source_id = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .into_owned();
            let text = fs::read_to_string(&path)
                .with_context(|| format!("failed to read {path:?}"))?;
            let mtime = fs::metadata(&path)
                .and_then(|meta| meta.modified())
                .with_context(|| format!("failed to stat {path:?}"))?;

            grouped
                .entry(context)
                .or_default()
                .push(Document::new(source_id, text, mtime, is_gm));
        }
    }
    Ok(grouped)
}

fn walk_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir).with_context(|| format!("failed to read {dir:?}"))? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            walk_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

fn is_text_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some(ext) if ext.eq_ignore_ascii_case("txt") || ext.eq_ignore_ascii_case("md")
    )
}

fn preview(text: &str) -> String {
    let flat: String = text
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();
    let trimmed = flat.trim();
    if trimmed.chars().count() <= 160 {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(160).collect();
    format!("{cut}…")
}
