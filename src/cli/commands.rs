use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::suggest_id;
use crate::detector::detect;
use crate::models::{Conversation, Role, SearchScope, Source, SourceKind};
use crate::search::DEFAULT_LIMIT;
use crate::service::ArchiveService;
use crate::utils::{default_config_path, format_path_with_tilde};

#[derive(Parser)]
#[command(name = "chat-archive")]
#[command(version = "0.1.0")]
#[command(about = "Browse and search archived AI-chat exports", long_about = None)]
pub struct Cli {
    /// Source list location (defaults to the platform config directory)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage registered export roots
    Sources {
        #[command(subcommand)]
        action: SourcesCommand,
    },
    /// Print which export layout a directory holds
    Detect { path: PathBuf },
    /// List the conversations of one source
    List { source: String },
    /// Print one conversation
    Show {
        source: String,
        category: String,
        id: String,
        #[arg(long)]
        json: bool,
    },
    /// Full-text search across sources
    Search {
        query: String,
        /// Restrict to one source
        #[arg(long)]
        source: Option<String>,
        #[arg(long, default_value_t = DEFAULT_LIMIT)]
        limit: usize,
        /// How long to wait for the index before answering
        #[arg(long, default_value_t = 30)]
        wait_secs: u64,
        #[arg(long)]
        json: bool,
    },
    /// Copy a file from inside a source root
    File {
        source: String,
        path: String,
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Show statistics about registered sources
    Stats,
}

#[derive(Subcommand)]
pub enum SourcesCommand {
    List,
    Add {
        path: PathBuf,
        #[arg(long)]
        id: Option<String>,
        #[arg(long, default_value = "auto")]
        kind: SourceKind,
        #[arg(long)]
        disabled: bool,
    },
    Remove { id: String },
    Enable { id: String },
    Disable { id: String },
    /// Register every export found under a directory
    Import { root: PathBuf },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    let Some(command) = cli.command else {
        println!("Use --help for usage information");
        return Ok(());
    };
    if let Commands::Detect { path } = &command {
        return detect_command(path);
    }

    let config_path = match cli.config {
        Some(path) => path,
        None => default_config_path()?,
    };
    let service = ArchiveService::open(&config_path)
        .with_context(|| format!("Failed to open source list {}", config_path.display()))?;

    match command {
        Commands::Sources { action } => sources_command(&service, action),
        Commands::Detect { .. } => Ok(()),
        Commands::List { source } => list_command(&service, &source),
        Commands::Show { source, category, id, json } => {
            show_command(&service, &source, &category, &id, json)
        }
        Commands::Search { query, source, limit, wait_secs, json } => {
            search_command(&service, &query, source, limit, wait_secs, json)
        }
        Commands::File { source, path, output } => file_command(&service, &source, &path, output),
        Commands::Stats => show_stats(&service),
    }
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr);
    // A subscriber may already be installed when embedded; keep the existing one
    let _ = if json { builder.json().try_init() } else { builder.try_init() };
}

fn detect_command(path: &Path) -> Result<()> {
    match detect(path) {
        Some(vendor) => println!("{}", vendor),
        None => println!("unrecognized"),
    }
    Ok(())
}

fn sources_command(service: &ArchiveService, action: SourcesCommand) -> Result<()> {
    let mut sources = service.list_sources();
    match action {
        SourcesCommand::List => {
            if sources.is_empty() {
                println!("No sources registered");
            }
            for source in &sources {
                print_source(source);
            }
            return Ok(());
        }
        SourcesCommand::Add { path, id, kind, disabled } => {
            let root = fs::canonicalize(&path)
                .with_context(|| format!("Failed to resolve {}", path.display()))?;
            if !root.is_dir() {
                bail!("{} is not a directory", root.display());
            }
            let id = match id {
                Some(id) => id,
                None => {
                    let name = root.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
                    suggest_id(&name, &sources)
                }
            };
            let mut source = Source::new(id, kind, root);
            source.enabled = !disabled;
            print_source(&source);
            sources.push(source);
        }
        SourcesCommand::Remove { id } => {
            let before = sources.len();
            sources.retain(|s| s.id != id);
            if sources.len() == before {
                bail!("No source with id '{}'", id);
            }
            println!("Removed {}", id);
        }
        SourcesCommand::Enable { id } => set_enabled(&mut sources, &id, true)?,
        SourcesCommand::Disable { id } => set_enabled(&mut sources, &id, false)?,
        SourcesCommand::Import { root } => {
            let root = fs::canonicalize(&root)
                .with_context(|| format!("Failed to resolve {}", root.display()))?;
            let added = service.import_root(&root)?;
            if added.is_empty() {
                println!("No new exports found under {}", format_path_with_tilde(&root));
            }
            for source in &added {
                print_source(source);
            }
            return Ok(());
        }
    }
    service.set_sources(sources)?;
    Ok(())
}

fn set_enabled(sources: &mut [Source], id: &str, enabled: bool) -> Result<()> {
    let source = sources
        .iter_mut()
        .find(|s| s.id == id)
        .with_context(|| format!("No source with id '{}'", id))?;
    source.enabled = enabled;
    print_source(source);
    Ok(())
}

fn print_source(source: &Source) {
    println!(
        "{}\t{}\t{}\t{}",
        source.id,
        source.kind,
        if source.enabled { "enabled" } else { "disabled" },
        format_path_with_tilde(&source.root_path)
    );
}

fn list_command(service: &ArchiveService, source_id: &str) -> Result<()> {
    let listing = service.list_conversations(source_id)?;
    for (category, summaries) in &listing.categories {
        println!("{} ({})", category, summaries.len());
        for summary in summaries {
            let updated = summary
                .updated_at
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "-".to_string());
            println!("  {}  {}  {}", updated, summary.id, summary.title);
        }
    }
    if listing.skipped > 0 {
        println!("{} records skipped", listing.skipped);
    }
    Ok(())
}

fn show_command(
    service: &ArchiveService,
    source_id: &str,
    category: &str,
    id: &str,
    json: bool,
) -> Result<()> {
    let conversation = service.get_conversation(source_id, category, id)?;
    if json {
        println!("{}", serde_json::to_string_pretty(conversation.as_ref())?);
    } else {
        print!("{}", render_conversation(&conversation));
    }
    Ok(())
}

fn render_conversation(conversation: &Conversation) -> String {
    let mut out = format!("# {}\n", conversation.title);
    if let Some(model) = &conversation.meta.model_slug {
        out.push_str(&format!("model: {}\n", model));
    }
    for message in &conversation.messages {
        let role = match message.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
        };
        out.push_str(&format!("\n## {}\n", role));
        for step in &message.thinking {
            let title = step.title.as_deref().unwrap_or("Thinking");
            out.push_str(&format!("> {}: {}\n", title, step.content.replace('\n', "\n> ")));
        }
        if !message.content.is_empty() {
            out.push_str(&message.content);
            out.push('\n');
        }
    }
    out
}

fn search_command(
    service: &ArchiveService,
    query: &str,
    source: Option<String>,
    limit: usize,
    wait_secs: u64,
    json: bool,
) -> Result<()> {
    let scope = match source {
        Some(id) => SearchScope::OneSource(id),
        None => SearchScope::AllSources,
    };
    if wait_secs > 0 {
        service.wait_until_ready(Duration::from_secs(wait_secs));
    }
    let response = service.search_with_limit(query, &scope, limit);
    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    if !response.ready {
        eprintln!("Index is still building; results may be incomplete");
    }
    for hit in &response.results {
        println!("[{}] {}/{}/{}  {}", hit.score, hit.source, hit.category, hit.id, hit.title);
        println!("    {}", hit.snippet.replace('\n', " "));
    }
    println!(
        "{} results ({} documents, {} ms)",
        response.results.len(),
        response.stats.doc_count,
        response.stats.took_ms
    );
    Ok(())
}

fn file_command(
    service: &ArchiveService,
    source_id: &str,
    path: &str,
    output: Option<PathBuf>,
) -> Result<()> {
    let bytes = service.get_file(source_id, path)?;
    match output {
        Some(output) => fs::write(&output, &bytes)
            .with_context(|| format!("Failed to write {}", output.display()))?,
        None => io::stdout().write_all(&bytes).context("Failed to write to stdout")?,
    }
    Ok(())
}

fn show_stats(service: &ArchiveService) -> Result<()> {
    let sources = service.list_sources();

    println!("Chat Archive Statistics");
    println!("=======================");
    println!("Source list: {}", format_path_with_tilde(service.config_path()));
    println!("Sources: {}", sources.len());

    let mut total = 0;
    let mut skipped = 0;
    for source in &sources {
        if !source.enabled {
            println!("  {} (disabled)", source.id);
            continue;
        }
        match service.list_conversations(&source.id) {
            Ok(listing) => {
                total += listing.len();
                skipped += listing.skipped;
                println!("  {}: {} conversations", source.id, listing.len());
            }
            Err(e) => println!("  {}: unavailable ({})", source.id, e),
        }
    }
    println!("Total conversations: {}", total);
    if skipped > 0 {
        println!("Skipped records: {}", skipped);
    }
    Ok(())
}
