use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use flux_analyst::audit::AuditEntry;
use flux_analyst::{AnalystRequest, AnalystResponse, AppConfig, AuditSink, QueryLog, Row};
use serde_json::Value;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Columns shown first when printing result rows.
const PRIORITY_COLUMNS: &[&str] = &[
    "testname",
    "status",
    "owner",
    "execution_number",
    "duration",
    "previous_status",
    "current_status",
    "fail_count",
    "flakiness_score",
    "occurrence_count",
];

#[derive(Parser)]
#[command(name = "flux-analyst")]
#[command(about = "Ask questions about test execution history stored in InfluxDB")]
struct Args {
    /// Query log file (or set QUERY_LOG_PATH)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ask a question in plain language
    Ask {
        text: String,

        /// Execution number bound to ${execution_number}
        #[arg(short, long)]
        execution: Option<String>,

        /// Maximum generation attempts
        #[arg(short, long)]
        max_attempts: Option<u32>,

        /// Print the full response as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show recent entries from the query log
    History {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Search the query log
    Search { term: String },
    /// Query log statistics
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = AppConfig::from_env()?;
    if let Some(path) = args.log_file {
        config.query_log_path = path;
    }

    match args.command {
        Command::Ask {
            text,
            execution,
            max_attempts,
            json,
        } => {
            let service = flux_analyst::build_service(&config).context("Failed to initialize collaborators")?;
            info!("Question: {}", text);
            let response = service
                .handle(AnalystRequest {
                    text,
                    default_execution_id: execution,
                    max_attempts,
                })
                .await;
            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                print_response(&response);
            }
        }
        Command::History { limit } => {
            let log = QueryLog::open(&config.query_log_path, config.query_log_capacity)?;
            print_entries(&log.recent(limit));
        }
        Command::Search { term } => {
            let log = QueryLog::open(&config.query_log_path, config.query_log_capacity)?;
            print_entries(&log.search(&term));
        }
        Command::Stats => {
            let log = QueryLog::open(&config.query_log_path, config.query_log_capacity)?;
            println!("{}", serde_json::to_string_pretty(&log.statistics())?);
        }
    }

    Ok(())
}

fn print_response(response: &AnalystResponse) {
    if let Some(intent) = &response.intent {
        println!("Intent: {}", intent.kind().as_str());
    }
    if let Some(query) = &response.query_text {
        println!("\n=== Query ===\n{}", query);
    }
    if !response.success {
        println!(
            "\n=== Failed after {} attempt(s) ===\n{}",
            response.attempts_used,
            response.error.as_deref().unwrap_or("unknown error")
        );
        return;
    }
    if let Some(summary) = &response.summary_text {
        println!("\n=== Summary ===\n{}", summary);
    }
    if let Some(rows) = &response.rows {
        println!("\n=== Results ({} rows) ===", response.row_count);
        print_rows(rows);
    }
}

fn column_order(rows: &[Row]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for key in rows.iter().flat_map(|row| row.keys()) {
        if !columns.contains(key) {
            columns.push(key.clone());
        }
    }
    columns.sort_by_key(|c| {
        PRIORITY_COLUMNS
            .iter()
            .position(|p| *p == c.as_str())
            .unwrap_or(PRIORITY_COLUMNS.len())
    });
    columns
}

fn print_rows(rows: &[Row]) {
    let columns = column_order(rows);
    println!("{}", columns.join("\t"));
    for row in rows {
        let cells: Vec<String> = columns
            .iter()
            .map(|c| match row.get(c) {
                Some(Value::String(s)) => s.replace(['\n', '\t'], " "),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            })
            .collect();
        println!("{}", cells.join("\t"));
    }
}

fn print_entries(entries: &[AuditEntry]) {
    if entries.is_empty() {
        println!("No log entries.");
        return;
    }
    for entry in entries {
        println!(
            "[{}] {} | attempts={} rows={} | {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            if entry.success { "OK  " } else { "FAIL" },
            entry.attempts,
            entry.row_count,
            entry.user_query
        );
        if let Some(error) = &entry.error {
            println!("    error: {}", error);
        }
    }
}
