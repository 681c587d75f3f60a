use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Value};
use statement_normalizer::{
    ensure_rules_dir_seeded, get_job, import_file_at_db_path, init_logging, list_job_transactions,
    list_jobs, open_job_db, preview_file_at_path, receipt_at_path, sniff_kind, ExportOptions,
    PipelineConfig, StatementPipeline,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::warn;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "statement-normalizer")]
#[command(about = "Normalize statements, exports and receipts into canonical transactions")]
#[command(version)]
struct Cli {
    /// TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding merchant_map.csv and the other rule tables
    #[arg(long, global = true)]
    rules_dir: Option<PathBuf>,

    /// Job database path
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    /// Pretty-print the JSON response
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct ExportArgs {
    /// three-column or four-column
    #[arg(long)]
    layout: Option<String>,
    /// month-first or day-first
    #[arg(long)]
    date_order: Option<String>,
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract and assemble a file without recording a job
    Preview { file: PathBuf },
    /// Process one file as a job and write its CSV
    Process {
        file: PathBuf,
        #[command(flatten)]
        export: ExportArgs,
    },
    /// Process every supported file under a directory
    Batch {
        dir: PathBuf,
        #[command(flatten)]
        export: ExportArgs,
    },
    /// Read vendor, date and total from a receipt
    Receipt { file: PathBuf },
    /// Inspect recorded jobs
    Jobs {
        #[command(subcommand)]
        command: JobCommands,
    },
    /// Manage rule tables
    Rules {
        #[command(subcommand)]
        command: RuleCommands,
    },
}

#[derive(Subcommand)]
enum JobCommands {
    List {
        #[arg(long, default_value_t = 20)]
        limit: u32,
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },
    Show {
        job_id: String,
        /// Include the stored transactions
        #[arg(long)]
        transactions: bool,
    },
}

#[derive(Subcommand)]
enum RuleCommands {
    /// Write the default rule tables into the rules directory
    Seed { dir: Option<PathBuf> },
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum Response {
    Success { payload: Value },
    Error { message: String },
}

fn export_options(config: &PipelineConfig, args: &ExportArgs) -> Result<ExportOptions, String> {
    Ok(ExportOptions {
        layout: config
            .resolve_layout(args.layout.as_deref())
            .map_err(|e| e.to_string())?,
        date_order: config
            .resolve_date_order(args.date_order.as_deref())
            .map_err(|e| e.to_string())?,
        output_dir: config.resolve_output_dir(args.output_dir.as_deref()),
    })
}

fn job_failed(report: &Value) -> bool {
    report["job"]["status"] == "FAILED"
}

fn batch(
    dir: &Path,
    db_path: &Path,
    pipeline: &StatementPipeline,
    options: &ExportOptions,
) -> Result<Value, String> {
    if !dir.is_dir() {
        return Err(format!("not a directory: {}", dir.display()));
    }
    let mut files = WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file() && sniff_kind(e.path()).is_some())
        .map(|e| e.into_path())
        .collect::<Vec<_>>();
    files.sort();

    let mut completed = 0_usize;
    let mut failed = 0_usize;
    let mut results = Vec::new();
    for file in &files {
        match import_file_at_db_path(db_path, file, pipeline, options) {
            Ok(report) => {
                if job_failed(&report) {
                    failed += 1;
                } else {
                    completed += 1;
                }
                results.push(json!({ "file": file, "job": report["job"] }));
            }
            Err(message) => {
                warn!(file = %file.display(), "{message}");
                failed += 1;
                results.push(json!({ "file": file, "error": message }));
            }
        }
    }
    Ok(json!({
        "dir": dir,
        "files": files.len(),
        "completed": completed,
        "failed": failed,
        "results": results,
    }))
}

fn dispatch(cli: &Cli) -> Result<(Value, bool), String> {
    let config = PipelineConfig::load_or_default(cli.config.as_deref()).map_err(|e| e.to_string())?;
    let rules_dir = config.resolve_rules_dir(cli.rules_dir.as_deref());
    let db_path = config.resolve_db_path(cli.db.as_deref());

    let pipeline = || StatementPipeline::from_config(&config, rules_dir.as_deref());

    match &cli.command {
        Commands::Preview { file } => Ok((preview_file_at_path(&pipeline()?, file)?, true)),
        Commands::Receipt { file } => Ok((receipt_at_path(&pipeline()?, file)?, true)),
        Commands::Process { file, export } => {
            let options = export_options(&config, export)?;
            let report = import_file_at_db_path(&db_path, file, &pipeline()?, &options)?;
            let ok = !job_failed(&report);
            Ok((report, ok))
        }
        Commands::Batch { dir, export } => {
            let options = export_options(&config, export)?;
            let report = batch(dir, &db_path, &pipeline()?, &options)?;
            let ok = report["failed"] == 0;
            Ok((report, ok))
        }
        Commands::Jobs { command } => {
            let conn = open_job_db(&db_path)?;
            match command {
                JobCommands::List { limit, offset } => {
                    let jobs = list_jobs(&conn, *limit, *offset)?;
                    Ok((json!({ "jobs": jobs, "limit": limit, "offset": offset }), true))
                }
                JobCommands::Show {
                    job_id,
                    transactions,
                } => {
                    let job = get_job(&conn, job_id)?
                        .ok_or_else(|| format!("job not found: {job_id}"))?;
                    let mut payload = json!({ "job": job });
                    if *transactions {
                        payload["transactions"] = json!(list_job_transactions(&conn, job_id)?);
                    }
                    Ok((payload, true))
                }
            }
        }
        Commands::Rules {
            command: RuleCommands::Seed { dir },
        } => {
            let target = dir
                .clone()
                .or_else(|| rules_dir.clone())
                .ok_or_else(|| "rules seed needs a directory or --rules-dir".to_string())?;
            let written = ensure_rules_dir_seeded(&target)?;
            Ok((json!({ "dir": target, "written": written }), true))
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    let (resp, code) = match dispatch(&cli) {
        Ok((payload, true)) => (Response::Success { payload }, ExitCode::SUCCESS),
        Ok((payload, false)) => (Response::Success { payload }, ExitCode::from(2)),
        Err(message) => (Response::Error { message }, ExitCode::FAILURE),
    };

    let out = if cli.pretty {
        serde_json::to_string_pretty(&resp)
    } else {
        serde_json::to_string(&resp)
    }
    .unwrap_or_else(|e| {
        json!({
            "status": "error",
            "message": format!("serialize response failed: {e}"),
        })
        .to_string()
    });
    println!("{out}");
    code
}
