//! lexibase command line: manage memories and run bulk jobs against them.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use lexibase::config::Config;
use lexibase::error::LexiError;
use lexibase::glossary::Term;
use lexibase::model::MemoryRecord;
use lexibase::tasks::{TaskKind, TaskState};
use lexibase::Lexibase;

#[derive(Parser)]
#[command(name = "lexibase", version, about = "Translation memory and glossary engine")]
struct Args {
    /// Work folder holding the memory index and local stores
    #[arg(long, env = "LEXIBASE_HOME")]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List known memories, sorted by name
    List,
    /// Create a local memory
    Create {
        name: String,
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        client: Option<String>,
        #[arg(long)]
        subject: Option<String>,
    },
    /// Register a memory hosted on a remote server
    AddRemote {
        name: String,
        /// Memory id on the server
        #[arg(long)]
        id: String,
        #[arg(long, env = "LEXIBASE_SERVER")]
        server: String,
        #[arg(long, env = "LEXIBASE_USER")]
        user: String,
        #[arg(long, env = "LEXIBASE_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Import a document into a memory
    Import {
        memory: String,
        file: PathBuf,
        #[arg(long, default_value = "")]
        project: String,
        #[arg(long, default_value = "")]
        client: String,
        #[arg(long, default_value = "")]
        subject: String,
    },
    /// Export a memory to a document
    Export {
        memory: String,
        file: PathBuf,
        /// Comma-separated language codes; no filter when omitted
        #[arg(long, value_delimiter = ',')]
        languages: Vec<String>,
        /// Pivot language
        #[arg(long)]
        src_lang: Option<String>,
    },
    /// Fuzzy search for translations
    Search {
        memory: String,
        query: String,
        #[arg(long)]
        src: String,
        #[arg(long)]
        tgt: String,
        #[arg(long, default_value = "70")]
        similarity: u8,
        #[arg(long)]
        case_sensitive: bool,
    },
    /// Delete memories and their local storage
    Delete {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Add a term pair to a glossary
    AddTerm {
        glossary: String,
        #[command(flatten)]
        term: TermArgs,
    },
    /// Replace a glossary term, keeping its id
    UpdateTerm {
        glossary: String,
        term_id: String,
        #[command(flatten)]
        term: TermArgs,
    },
    /// Remove a glossary term
    DeleteTerm { glossary: String, term_id: String },
    /// Fuzzy lookup in a glossary
    SearchTerms {
        glossary: String,
        query: String,
        #[arg(long)]
        src: String,
        #[arg(long, default_value = "70")]
        similarity: u8,
        #[arg(long)]
        case_sensitive: bool,
    },
}

#[derive(clap::Args)]
struct TermArgs {
    #[arg(long)]
    src: String,
    #[arg(long)]
    tgt: String,
    source: String,
    target: String,
}

impl From<TermArgs> for Term {
    fn from(a: TermArgs) -> Self {
        Term::new(a.src, a.tgt, a.source, a.target)
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = Config::from_env();
    if let Some(home) = args.home {
        config.home = home;
    }

    let app = match Lexibase::open(config) {
        Ok(app) => app,
        Err(e) => {
            error!(error = %e, "failed to start");
            std::process::exit(1);
        }
    };

    let result = run(&app, args.command).await;
    if let Err(e) = app.shutdown().await {
        warn!(error = %e, "shutdown incomplete");
    }
    if let Err(e) = result {
        error!(kind = ?e.kind(), "{e}");
        std::process::exit(1);
    }
}

async fn run(app: &Lexibase, command: Command) -> Result<(), LexiError> {
    match command {
        Command::List => {
            let rows: Vec<_> = app
                .registry
                .list_memories()
                .into_iter()
                .map(|(id, name)| json!({ "id": id, "name": name }))
                .collect();
            print_json(&json!(rows))
        }
        Command::Create { name, id, project, client, subject } => {
            let mut record = MemoryRecord::local(id.unwrap_or_default(), name);
            record.project = project;
            record.client = client;
            record.subject = subject;
            let record = app.registry.create_memory(record).await?;
            print_json(&json!({ "id": record.id, "name": record.name }))
        }
        Command::AddRemote { name, id, server, user, password } => {
            let record = MemoryRecord::remote(id, name, server, user, password);
            let record = app.registry.add_memory(record)?;
            print_json(&json!({ "id": record.id, "name": record.name }))
        }
        Command::Import { memory, file, project, client, subject } => {
            let kind = TaskKind::Import { memory, file, project, client, subject };
            follow(app, kind).await
        }
        Command::Export { memory, file, languages, src_lang } => {
            let languages = (!languages.is_empty()).then_some(languages);
            follow(app, TaskKind::Export { memory, file, languages, src_lang }).await
        }
        Command::Search { memory, query, src, tgt, similarity, case_sensitive } => {
            let engine = app.registry.open(&memory).await?;
            let found = engine
                .search_translation(&query, &src, &tgt, similarity, case_sensitive)
                .await;
            app.registry.close(&memory).await?;
            let matches = found?;
            info!(memory = %memory, hits = matches.len(), "search done");
            print_json(&serde_json::to_value(&matches)?)
        }
        Command::Delete { ids } => follow(app, TaskKind::DeleteMemories { ids }).await,
        Command::AddTerm { glossary, term } => {
            let id = app.registry.add_term(&glossary, &term.into()).await?;
            print_json(&json!({ "glossary": glossary, "termId": id }))
        }
        Command::UpdateTerm { glossary, term_id, term } => {
            app.registry.update_term(&glossary, &term_id, &term.into()).await?;
            print_json(&json!({ "glossary": glossary, "termId": term_id }))
        }
        Command::DeleteTerm { glossary, term_id } => {
            app.registry.delete_term(&glossary, &term_id).await?;
            print_json(&json!({ "glossary": glossary, "termId": term_id }))
        }
        Command::SearchTerms { glossary, query, src, similarity, case_sensitive } => {
            let hits = app.registry.search_terms(&glossary, &query, &src, similarity, case_sensitive).await?;
            print_json(&json!({ "count": hits.len(), "terms": hits }))
        }
    }
}

/// Start `kind` and poll until it finishes. Ctrl-C cancels the task.
async fn follow(app: &Lexibase, kind: TaskKind) -> Result<(), LexiError> {
    let pid = app.tasks.start(kind)?;
    info!(pid = %pid, "task running");
    let mut interrupted = false;
    loop {
        let state = app.tasks.status(&pid)?;
        if state.is_terminal() {
            print_json(&serde_json::to_value(&state)?)?;
            return match state {
                TaskState::Failed { reason } => Err(LexiError::Backend(reason)),
                _ => Ok(()),
            };
        }
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(250)) => {}
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                info!(pid = %pid, "interrupted, cancelling");
                app.tasks.cancel(&pid)?;
            }
        }
    }
}

fn print_json(value: &serde_json::Value) -> Result<(), LexiError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| LexiError::Internal(e.to_string()))?;
    println!("{text}");
    Ok(())
}
