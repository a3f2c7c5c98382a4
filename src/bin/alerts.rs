//! alerts - print recent alert records from the alert store

use anyhow::{anyhow, Result};
use clap::Parser;
use threat_gate::storage::{AlertStore, SqliteAlertStore, MAX_QUERY_LIMIT};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the alert database.
    #[arg(long, env = "THREAT_DB_PATH", default_value = "threat.db")]
    db_path: String,
    /// Maximum number of records, newest first.
    #[arg(long, default_value_t = 20)]
    limit: usize,
    /// Print records as a JSON array instead of a table.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    if args.limit == 0 || args.limit > MAX_QUERY_LIMIT {
        return Err(anyhow!("--limit must be within 1..={}", MAX_QUERY_LIMIT));
    }
    if !std::path::Path::new(&args.db_path).exists() && !args.db_path.starts_with("file:") {
        return Err(anyhow!("alert database {} not found", args.db_path));
    }

    let store = SqliteAlertStore::open(&args.db_path)?;
    let records = store.query(args.limit)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("no alerts recorded in {}", args.db_path);
        return Ok(());
    }
    println!(
        "{:>6}  {:<16}  {:>14}  {:<18}  {:<12}  {:<18}  {}",
        "id", "source", "timestamp_ms", "reason", "sequence", "notify", "evidence"
    );
    for record in &records {
        println!(
            "{:>6}  {:<16}  {:>14}  {:<18}  {:<12}  {:<18}  {}",
            record.id.map(|id| id.to_string()).unwrap_or_default(),
            record.source,
            record.timestamp_ms,
            record.reason.as_str(),
            format!("{} {:.2}", record.sequence_label, record.sequence_probability),
            record.notify.to_string(),
            record.evidence_id.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}
