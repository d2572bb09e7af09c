use anyhow::{Context, Result};
use clap::Parser;
use querybot::config::Settings;
use querybot::db::{init_pool, PgScalarExecutor};
use querybot::llm::LlmClient;
use querybot::prompts::PromptStore;
use querybot::TextToSqlService;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const GENERIC_FAILURE: &str = "Sorry, I could not answer that question.";

#[derive(Parser)]
#[command(name = "querybot")]
#[command(about = "Answer questions about video statistics with a single number")]
struct Args {
    /// The question in natural language. Without it, questions are read from
    /// stdin, one per line.
    question: Option<String>,

    /// Attempts per question before giving up (overrides MAX_ATTEMPTS)
    #[arg(long, value_parser = parse_max_attempts)]
    max_attempts: Option<usize>,

    /// Directory holding on_start.md and on_error.md (overrides PROMPTS_DIR)
    #[arg(long)]
    prompts_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut settings = Settings::from_env().context("failed to load settings")?;
    if let Some(max_attempts) = args.max_attempts {
        settings.max_attempts = max_attempts;
    }
    if let Some(dir) = args.prompts_dir {
        settings.prompts_dir = dir;
    }
    info!("starting with {:?}", settings);

    let prompts = PromptStore::load(&settings.prompts_dir)?;
    let llm = LlmClient::with_options(
        settings.llm.api_key.clone(),
        settings.llm.model.clone(),
        settings.llm.base_url.clone(),
        settings.llm.timeout,
    )?;
    let pool = init_pool(settings.database.readonly_connect_options()?, settings.database.max_connections)
        .await
        .context("failed to connect to the database")?;

    let service = TextToSqlService::new(
        Arc::new(llm),
        Arc::new(PgScalarExecutor::new(pool.clone())),
        prompts,
    )
    .with_max_attempts(settings.max_attempts);

    match args.question {
        Some(question) => answer(&service, &question).await,
        None => {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Some(line) = lines.next_line().await? {
                let question = line.trim();
                if !question.is_empty() {
                    answer(&service, question).await;
                }
            }
        }
    }

    pool.close().await;
    Ok(())
}

fn parse_max_attempts(raw: &str) -> std::result::Result<usize, String> {
    match raw.parse::<usize>() {
        Ok(0) => Err("must be positive".to_string()),
        Ok(value) => Ok(value),
        Err(e) => Err(e.to_string()),
    }
}

async fn answer(service: &TextToSqlService, question: &str) {
    match service.process_query(question).await {
        Ok(value) => println!("{}", value),
        Err(e) => {
            error!("failed to process query '{}': {}", question, e);
            println!("{}", GENERIC_FAILURE);
        }
    }
}
