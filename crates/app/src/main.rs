use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use thesis_rag_core::llm::{DEFAULT_GEMINI_ENDPOINT, DEFAULT_GEMINI_MODEL};
use thesis_rag_core::{
    discover_source_files, CharacterNgramEmbedder, ConversationSession, Embedder, GeminiClient,
    GeminiConfig, Indexer, IndexingOptions, LocalVectorStore, Manifest, OcrClient, OcrEndpointConfig,
    QdrantStore, RetrievalOptions, SearchAnswer, SynthesisOptions, ThesisSearchService,
    VectorIndex, VectorStore,
};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "thesis-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory for the manifest, text cache and local vector store.
    #[arg(long, env = "THESIS_RAG_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Qdrant base URL. Vectors stay in the data directory when unset.
    #[arg(long, env = "QDRANT_URL")]
    qdrant_url: Option<String>,

    /// Qdrant collection
    #[arg(long, default_value = "thesis_chunks")]
    qdrant_collection: String,

    /// Target words per chunk.
    #[arg(long, default_value = "200")]
    chunk_size: usize,

    /// Hits at or above this cosine distance are not relevant.
    #[arg(long, default_value = "1.0")]
    distance_threshold: f32,
}

#[derive(Subcommand)]
enum Command {
    /// Index new or modified .pdf and .txt theses under a folder.
    Index {
        #[arg(long)]
        folder: PathBuf,
    },
    /// Answer a question with a cited overview and the matching theses.
    Search {
        #[arg(long)]
        query: String,
        /// JSON file holding the conversation; created when missing.
        #[arg(long)]
        session: Option<PathBuf>,
        /// Number of chunks to retrieve.
        #[arg(long, default_value = "20")]
        top_k: usize,
        #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
        gemini_api_key: String,
        #[arg(long, env = "GEMINI_MODEL", default_value = DEFAULT_GEMINI_MODEL)]
        gemini_model: String,
        #[arg(long, default_value = "60")]
        gemini_timeout_secs: u64,
        /// Ask the model once more when a source is left uncited.
        #[arg(long, default_value_t = false)]
        reprompt_on_missing: bool,
    },
    /// Print how many chunks and documents are indexed.
    Stats,
}

struct Settings {
    data_dir: PathBuf,
    chunk_size: usize,
    distance_threshold: f32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "thesis-rag boot"
    );

    let embedder = CharacterNgramEmbedder::default();
    let settings = Settings {
        data_dir: cli.data_dir,
        chunk_size: cli.chunk_size,
        distance_threshold: cli.distance_threshold,
    };

    match cli.qdrant_url {
        Some(url) => {
            let store = QdrantStore::new(&url, cli.qdrant_collection, embedder.dimensions())?;
            store.ensure_collection().await?;
            run(cli.command, settings, VectorIndex::new(embedder, store)).await
        }
        None => {
            let store = LocalVectorStore::open(settings.data_dir.join("vectors.json")).await?;
            run(cli.command, settings, VectorIndex::new(embedder, store)).await
        }
    }
}

async fn run<S>(
    command: Command,
    settings: Settings,
    index: VectorIndex<CharacterNgramEmbedder, S>,
) -> anyhow::Result<()>
where
    S: VectorStore + Send + Sync,
{
    match command {
        Command::Index { folder } => {
            let files = discover_source_files(&folder);
            info!(folder = %folder.display(), files = files.len(), "indexing folder");

            let options = IndexingOptions {
                chunk_size: settings.chunk_size,
                ..IndexingOptions::in_dir(&settings.data_dir)
            };
            let ocr = OcrEndpointConfig::from_env().map(OcrClient::new).transpose()?;
            let mut indexer = Indexer::new(&index, options)?.with_ocr(ocr);
            let report = indexer.index_files(files).await?;

            for skipped in &report.skipped {
                warn!(path = %skipped.path, reason = %skipped.reason, "skipped document");
            }

            println!(
                "{} documents indexed, {} unchanged, {} recovered, {} chunks written at {}",
                report.indexed.len(),
                report.unchanged,
                report.recovered,
                report.chunks_written,
                Utc::now().to_rfc3339()
            );
        }
        Command::Search {
            query,
            session,
            top_k,
            gemini_api_key,
            gemini_model,
            gemini_timeout_secs,
            reprompt_on_missing,
        } => {
            let mut conversation = match &session {
                Some(path) => load_session(path).await?,
                None => ConversationSession::new(),
            };

            let llm = GeminiClient::new(GeminiConfig {
                endpoint: DEFAULT_GEMINI_ENDPOINT.to_string(),
                model: gemini_model,
                api_key: gemini_api_key,
                timeout_secs: gemini_timeout_secs,
            })?;
            let retrieval = RetrievalOptions {
                top_k,
                distance_threshold: settings.distance_threshold,
                ..RetrievalOptions::default()
            };
            let synthesis = SynthesisOptions {
                relevance_threshold: settings.distance_threshold,
                reprompt_on_missing,
                ..SynthesisOptions::default()
            };

            let service = ThesisSearchService::new(index, llm, retrieval, synthesis)?;
            let answer = service.answer(&query, conversation.turns()).await?;
            print_answer(&answer);

            if let Some(path) = session {
                conversation.record(answer.query, answer.overview);
                save_session(&path, &conversation).await?;
            }
        }
        Command::Stats => {
            let manifest = Manifest::load(&IndexingOptions::in_dir(&settings.data_dir).manifest_path)?;
            println!(
                "{} chunks from {} documents",
                index.count().await?,
                manifest.len()
            );
        }
    }

    Ok(())
}

async fn load_session(path: &Path) -> anyhow::Result<ConversationSession> {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => serde_json::from_str(&raw)
            .with_context(|| format!("invalid session file {}", path.display())),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(ConversationSession::new()),
        Err(error) => Err(error.into()),
    }
}

async fn save_session(path: &Path, session: &ConversationSession) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, serde_json::to_vec_pretty(session)?).await?;
    Ok(())
}

fn print_answer(answer: &SearchAnswer) {
    println!("query: {}", answer.query);
    if answer.resolved_query != answer.query {
        println!("resolved: {}", answer.resolved_query);
    }

    println!("\n{}\n", answer.overview);

    if !answer.sources.is_empty() {
        println!("sources:");
        for source in &answer.sources {
            println!(
                "[{}] {}. {} ({}) {}",
                source.number, source.author, source.title, source.publication_year, source.file
            );
        }
    }

    if !answer.documents.is_empty() {
        println!("documents:");
        for (position, document) in answer.documents.iter().enumerate() {
            println!(
                "{}. {} ({}) distance={:.4}",
                position + 1,
                document.title,
                document.publication_year,
                document.distance
            );
            println!("   author={} file={}", document.author, document.file);
            if !document.subjects.is_empty() {
                println!("   subjects={}", document.subjects);
            }
        }
    }
}
