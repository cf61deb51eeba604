use clap::{Parser, Subcommand};
use receipt_intake::config::Config;
use receipt_intake::heuristics;
use receipt_intake::intake;
use receipt_intake::ocr::LayeredRecognizer;
use receipt_intake::receipt_db::ReceiptStore;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "receipt_intake")]
#[command(about = "Receipt PDF intake: upload, validate, OCR and deduplicate")]
struct Cli {
    /// TOML config file; defaults apply when it does not exist.
    #[arg(long, env = "RECEIPT_INTAKE_CONFIG", default_value = "receipts.toml")]
    config: PathBuf,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Copy a PDF into the upload directory and register it.
    Upload { pdf: PathBuf },
    /// Check that a registered file exists and is a PDF.
    Validate { file_id: i64 },
    /// OCR a validated file and store the extracted receipt.
    Process { file_id: i64 },
    /// List all stored receipts.
    Receipts,
    /// Show one stored receipt.
    Receipt { id: i64 },
    /// Run field extraction on a plain-text file without touching the database.
    Extract { text_file: PathBuf },
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // init tracing
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let cfg = Config::load_or_default(&cli.config)?;

    if let Command::Extract { text_file } = &cli.cmd {
        let text = std::fs::read_to_string(text_file)?;
        return print_json(&heuristics::extract_fields(&text));
    }

    let db = ReceiptStore::open(&cfg.db_path)?;

    match cli.cmd {
        Command::Upload { pdf } => {
            print_json(&intake::upload(&db, Path::new(&cfg.upload_dir), &pdf)?)?;
        }
        Command::Validate { file_id } => {
            print_json(&intake::validate(&db, file_id)?)?;
        }
        Command::Process { file_id } => {
            let recognizer = LayeredRecognizer::from_config(&cfg.ocr);
            print_json(&intake::process(&db, &recognizer, file_id)?)?;
        }
        Command::Receipts => {
            print_json(&intake::list_receipts(&db)?)?;
        }
        Command::Receipt { id } => {
            print_json(&intake::get_receipt(&db, id)?)?;
        }
        // handled above, before the database is opened
        Command::Extract { .. } => {}
    }

    let counts = db.counts()?;
    info!(
        files_total = counts.files_total,
        files_valid = counts.files_valid,
        files_processed = counts.files_processed,
        receipts = counts.receipts,
        "Database statistics"
    );

    Ok(())
}
