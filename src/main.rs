// Command-line front end for the course advisor

use anyhow::Context;
use clap::{Parser, Subcommand};
use course_advisor::{
    ingest, AppBuilder, AppDependencies, ChatReply, ChatRequest, ConfigService, EnvConfigService,
    LlmAdapter, Outcome,
};
use futures::future::join_all;
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "course-advisor")]
#[command(about = "How hard is that course? Grade history plus student chatter")]
#[command(version)]
struct Cli {
    /// Rule-based parsing and plain replies even if OPENROUTER_API_KEY is set
    #[arg(long, global = true, default_value = "false")]
    no_llm: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer one or more questions (run concurrently)
    Ask {
        /// Questions, e.g. "How hard is CS 250 with Adams?"
        #[arg(required = true)]
        questions: Vec<String>,

        /// Print the full assessment as JSON
        #[arg(long)]
        json: bool,
    },
    /// Interactive loop on stdin ("exit" or "quit" to leave)
    Chat,
    /// ChatRequest JSON lines on stdin, ChatReply JSON lines on stdout
    ServeJson,
    /// Build the grade database from cleaned JSON records
    Ingest {
        /// JSON array of section records
        json: PathBuf,

        /// Output database (defaults to GRADES_DB_PATH)
        #[arg(long)]
        db: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout stays clean for replies
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    tracing::debug!("{}", course_advisor::version::full_version_info());

    match cli.command {
        Commands::Ingest { json, db } => run_ingest(json, db).await,
        Commands::Ask { questions, json } => {
            let deps = build_deps(cli.no_llm)?;
            run_ask(&deps, questions, json).await
        }
        Commands::Chat => {
            let deps = build_deps(cli.no_llm)?;
            run_chat(&deps).await
        }
        Commands::ServeJson => {
            let deps = build_deps(cli.no_llm)?;
            run_serve_json(&deps).await
        }
    }
}

fn build_deps(no_llm: bool) -> anyhow::Result<AppDependencies> {
    let mut builder = AppBuilder::new();
    if no_llm {
        builder = builder.without_llm();
    }

    let deps = builder
        .with_production_deps()
        .context("Failed to load configuration")?
        .build()
        .context("Failed to wire the advisor")?;

    if let Some(llm) = &deps.llm_adapter {
        tracing::info!("Language model enabled for parsing and phrasing ({})", llm.name());
    }
    Ok(deps)
}

async fn run_ask(deps: &AppDependencies, questions: Vec<String>, json: bool) -> anyhow::Result<()> {
    if json {
        let outcomes = join_all(questions.iter().map(|q| deps.advisor.run(q))).await;
        for (question, outcome) in questions.iter().zip(outcomes) {
            let value = match outcome {
                Outcome::Done(assessment) => serde_json::to_value(&assessment)?,
                Outcome::Compared(assessments) => serde_json::json!({
                    "question": question,
                    "options": serde_json::to_value(&assessments)?,
                }),
                Outcome::Failed { state_trace, error } => serde_json::json!({
                    "question": question,
                    "trace": state_trace,
                    "error": error.to_string(),
                    "clarification": error.clarification(),
                }),
            };
            println!("{}", serde_json::to_string(&value)?);
        }
        return Ok(());
    }

    let replies = join_all(questions.iter().map(|q| deps.advisor.advise(q))).await;
    let many = questions.len() > 1;
    for (question, reply) in questions.iter().zip(replies) {
        if many {
            println!("Q: {}", question);
        }
        println!("{}\n", reply);
    }
    Ok(())
}

async fn run_chat(deps: &AppDependencies) -> anyhow::Result<()> {
    println!(
        "Course advisor {} - ask about a course, or type 'exit'.",
        course_advisor::version::version_string()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question.eq_ignore_ascii_case("exit") || question.eq_ignore_ascii_case("quit") {
            break;
        }

        println!("{}\n", deps.advisor.advise(question).await);
    }
    Ok(())
}

async fn run_serve_json(deps: &AppDependencies) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let reply = match serde_json::from_str::<ChatRequest>(&line) {
            Ok(request) => deps.advisor.chat(request).await,
            Err(e) => {
                tracing::warn!("Rejected malformed request: {}", e);
                ChatReply {
                    reply: format!("Invalid request: {}", e),
                }
            }
        };

        println!("{}", serde_json::to_string(&reply)?);
        std::io::stdout().flush()?;
    }
    Ok(())
}

async fn run_ingest(json: PathBuf, db: Option<PathBuf>) -> anyhow::Result<()> {
    let db = match db {
        Some(path) => path,
        None => EnvConfigService::load()?.grades_db_path(),
    };

    let target = db.clone();
    let report = tokio::task::spawn_blocking(move || ingest::ingest_file(&json, &target))
        .await
        .context("Ingestion task panicked")??;

    println!(
        "Built {}: {} sections inserted, {} invalid skipped, {} duplicates skipped",
        db.display(),
        report.inserted,
        report.skipped_invalid,
        report.skipped_duplicate
    );
    Ok(())
}
