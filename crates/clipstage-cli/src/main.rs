//! Clipstage CLI
//!
//! Stage edits and deletes against a cached highlight collection, review
//! them, and commit them to the backend in one batch.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clipstage_core::{
    sort_view, CommitEvent, FetchError, LoadSource, Location, OperationKind, Record, RecordFetcher,
    RecordPatch, ScopeLoader, ScopeSession, SortKey, StageConfig, StagedOperation, StagingWorkspace,
    TransportError, ViewFilter, ViewRecord,
};
use clipstage_remote::HttpBackend;
use clipstage_storage::FileScopeStore;

const CONFIG_FILE: &str = "clipstage.json";

#[derive(Parser)]
#[command(name = "clipstage")]
#[command(author, version, about = "Stage and batch-commit highlight edits")]
struct Cli {
    /// Directory holding staged operations and cached snapshots
    #[arg(long, global = true, env = "CLIPSTAGE_DATA_DIR", default_value = ".clipstage")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stage an edit to a cached record
    Edit {
        scope: String,
        record: String,
        /// New highlight text
        #[arg(long)]
        body: Option<String>,
        #[arg(long)]
        page: Option<u32>,
        /// New location start
        #[arg(long)]
        start: Option<i64>,
        /// New location end (-1 for unknown)
        #[arg(long, allow_hyphen_values = true)]
        end: Option<i64>,
    },

    /// Stage a delete of a cached record
    Delete { scope: String, record: String },

    /// Drop one staged operation
    Unstage { scope: String, operation: String },

    /// Drop every staged operation for a scope
    Clear { scope: String },

    /// List staged operations, oldest first
    Pending { scope: String },

    /// Show the collection with staged changes applied
    View {
        scope: String,
        #[arg(long)]
        search: Option<String>,
        #[arg(long, conflicts_with = "annotations_only")]
        notes_only: bool,
        #[arg(long)]
        annotations_only: bool,
        #[arg(long)]
        urls_only: bool,
        #[arg(long, value_enum, default_value = "location")]
        sort: SortArg,
        /// Refetch from the backend even if the snapshot is fresh
        #[arg(long)]
        refresh: bool,
    },

    /// Refresh the cached snapshot from the backend
    Fetch { scope: String },

    /// Commit every staged operation in one batch
    Commit { scope: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum SortArg {
    Location,
    Page,
}

impl From<SortArg> for SortKey {
    fn from(arg: SortArg) -> Self {
        match arg {
            SortArg::Location => SortKey::Location,
            SortArg::Page => SortKey::Page,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let workspace = open_workspace(&cli.data_dir)?;

    match cli.command {
        Commands::Edit {
            scope,
            record,
            body,
            page,
            start,
            end,
        } => cmd_edit(&workspace, &scope, &record, body, page, start, end),
        Commands::Delete { scope, record } => cmd_delete(&workspace, &scope, &record),
        Commands::Unstage { scope, operation } => cmd_unstage(&workspace, &scope, &operation),
        Commands::Clear { scope } => cmd_clear(&workspace, &scope),
        Commands::Pending { scope } => cmd_pending(&workspace, &scope),
        Commands::View {
            scope,
            search,
            notes_only,
            annotations_only,
            urls_only,
            sort,
            refresh,
        } => {
            let mut filter = if notes_only {
                ViewFilter::notes_only()
            } else if annotations_only {
                ViewFilter::annotations_only()
            } else {
                ViewFilter::default()
            };
            filter.urls_only = urls_only;
            if let Some(search) = search {
                filter = filter.with_search(search);
            }
            cmd_view(&workspace, &scope, &filter, sort.into(), refresh, fetcher()).await
        }
        Commands::Fetch { scope } => cmd_fetch(&workspace, &scope).await,
        Commands::Commit { scope } => cmd_commit(&workspace, &scope).await,
    }
}

// ============================================================================
// Setup
// ============================================================================

fn load_config(data_dir: &Path) -> Result<StageConfig> {
    let path = data_dir.join(CONFIG_FILE);
    if !path.exists() {
        return Ok(StageConfig::default());
    }
    let raw = fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
    StageConfig::from_json(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn open_workspace(data_dir: &Path) -> Result<StagingWorkspace> {
    let store = FileScopeStore::open(data_dir)
        .with_context(|| format!("opening data directory {}", data_dir.display()))?;
    let config = load_config(data_dir)?;
    tracing::debug!(data_dir = %data_dir.display(), ?config, "opened workspace");
    Ok(StagingWorkspace::new(Arc::new(store), config))
}

fn backend() -> Result<Arc<HttpBackend>> {
    Ok(Arc::new(HttpBackend::from_env()?))
}

/// Stands in for the backend when none is configured, so a cached
/// snapshot still loads offline
struct Unconfigured(String);

#[async_trait]
impl RecordFetcher for Unconfigured {
    async fn fetch(&self, _scope_id: &str) -> Result<Vec<Record>, FetchError> {
        Err(FetchError::Transport(TransportError::Network(self.0.clone())))
    }
}

fn fetcher() -> Arc<dyn RecordFetcher> {
    match HttpBackend::from_env() {
        Ok(backend) => Arc::new(backend),
        Err(err) => {
            tracing::debug!(error = %err, "no backend configured, serving cached records only");
            Arc::new(Unconfigured(err.to_string()))
        }
    }
}

fn loader(workspace: &StagingWorkspace, fetcher: Arc<dyn RecordFetcher>) -> ScopeLoader {
    ScopeLoader::new(
        workspace.snapshot_cache(),
        fetcher,
        workspace.config().snapshot_ttl(),
    )
}

fn cached_record(session: &ScopeSession, record_id: &str) -> Result<Record> {
    let records = session.snapshot().ok_or_else(|| {
        anyhow!(
            "no cached records for {}; run `clipstage fetch {}` first",
            session.scope_id(),
            session.scope_id()
        )
    })?;
    records
        .into_iter()
        .find(|r| r.id == record_id)
        .ok_or_else(|| anyhow!("record {record_id} is not in the cached snapshot"))
}

// ============================================================================
// Staging commands
// ============================================================================

fn cmd_edit(
    workspace: &StagingWorkspace,
    scope: &str,
    record_id: &str,
    body: Option<String>,
    page: Option<u32>,
    start: Option<i64>,
    end: Option<i64>,
) -> Result<()> {
    let session = workspace.open(scope);
    let original = cached_record(&session, record_id)?;

    let location = match (start, end) {
        (None, None) => None,
        (start, end) => Some(Location::new(
            start.unwrap_or(original.location.start),
            end.unwrap_or(original.location.end),
        )),
    };
    let patch = RecordPatch {
        body,
        page,
        location,
        captured_at: None,
    };
    if patch.is_empty() {
        bail!("nothing to edit; pass --body, --page, --start or --end");
    }

    let staged = session.stage_edit(original, patch)?;
    print_staged("Staged edit", &staged, workspace.config().preview_chars);
    Ok(())
}

fn cmd_delete(workspace: &StagingWorkspace, scope: &str, record_id: &str) -> Result<()> {
    let session = workspace.open(scope);
    let original = cached_record(&session, record_id)?;
    if !original.is_active() {
        bail!("record {record_id} is already deleted");
    }

    let staged = session.stage_delete(original);
    print_staged("Staged delete", &staged, workspace.config().preview_chars);
    Ok(())
}

fn cmd_unstage(workspace: &StagingWorkspace, scope: &str, operation_id: &str) -> Result<()> {
    match workspace.open(scope).unstage(operation_id) {
        Some(op) => println!("{} {}", "Unstaged".green().bold(), op.id),
        None => println!("{} {operation_id} was not staged", "note:".yellow()),
    }
    Ok(())
}

fn cmd_clear(workspace: &StagingWorkspace, scope: &str) -> Result<()> {
    let session = workspace.open(scope);
    let count = session.pending_count();
    session.clear();
    println!("{} {count} staged operations", "Cleared".green().bold());
    Ok(())
}

fn cmd_pending(workspace: &StagingWorkspace, scope: &str) -> Result<()> {
    let pending = workspace.open(scope).pending();
    if pending.is_empty() {
        println!("Nothing staged for {scope}");
        return Ok(());
    }

    println!("{} ({})", "Pending changes".bold(), pending.len());
    for op in &pending {
        println!(
            "  {} {} {}",
            kind_label(op.kind),
            op.id.dimmed(),
            op.preview(workspace.config().preview_chars)
        );
    }
    Ok(())
}

fn print_staged(label: &str, op: &StagedOperation, preview_chars: usize) {
    println!("{} {}", label.green().bold(), op.id);
    println!("  {}", op.preview(preview_chars));
}

fn kind_label(kind: OperationKind) -> colored::ColoredString {
    match kind {
        OperationKind::Edit => "edit  ".yellow().bold(),
        OperationKind::Delete => "delete".red().bold(),
    }
}

// ============================================================================
// Backend commands
// ============================================================================

async fn cmd_view(
    workspace: &StagingWorkspace,
    scope: &str,
    filter: &ViewFilter,
    sort: SortKey,
    refresh: bool,
    fetcher: Arc<dyn RecordFetcher>,
) -> Result<()> {
    let session = workspace.open(scope);
    let loaded = loader(workspace, fetcher).load(scope, refresh).await?;
    if loaded.source == LoadSource::StaleCache {
        eprintln!(
            "{} showing records cached at {}",
            "stale:".yellow().bold(),
            loaded.cached_at
        );
    }
    let base = loaded.records;

    let mut view = filter.apply(session.view(&base));
    sort_view(&mut view, sort);

    if view.is_empty() {
        println!("No highlights match");
        return Ok(());
    }
    for entry in &view {
        print_view_record(entry);
    }
    let pending = session.pending_count();
    if pending > 0 {
        println!();
        println!("{} staged change(s) not yet committed", pending.to_string().yellow());
    }
    Ok(())
}

fn print_view_record(entry: &ViewRecord) {
    let record = &entry.record;
    let page = record
        .page
        .map(|p| format!("p.{p}"))
        .unwrap_or_else(|| "-".to_string());
    let location = if record.location.is_unbounded() {
        format!("{}", record.location.start)
    } else {
        format!("{}-{}", record.location.start, record.location.end)
    };
    let marker = if entry.is_pending() {
        "*".yellow().bold()
    } else {
        " ".normal()
    };

    println!(
        "{marker} {} {} {} {}",
        record.id.dimmed(),
        page.cyan(),
        location.cyan(),
        record.body
    );
}

async fn cmd_fetch(workspace: &StagingWorkspace, scope: &str) -> Result<()> {
    let loaded = loader(workspace, backend()?).load(scope, true).await?;
    println!(
        "{} {} records for {scope} ({:?})",
        "Fetched".green().bold(),
        loaded.records.len(),
        loaded.source
    );
    Ok(())
}

async fn cmd_commit(workspace: &StagingWorkspace, scope: &str) -> Result<()> {
    let backend = backend()?;
    let session = workspace.open(scope);

    session.on_event(Box::new(|event| {
        if let CommitEvent::OperationFailed(notice) = event {
            eprintln!("{} {}", "failed:".red().bold(), notice.message());
        }
    }));

    let outcome = session.commit(backend.as_ref()).await?;
    if outcome.is_complete() {
        println!("{}", outcome.summary().green().bold());
    } else {
        println!("{}", outcome.summary().yellow().bold());
    }
    Ok(())
}
