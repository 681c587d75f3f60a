use crate::config::PipelineConfig;
use crate::description_normalizer::categorize_with;
use crate::export::{write_csv_to_path, CsvLayout, DateOrder};
use crate::job_store::{
    create_job, open_job_db, replace_job_transactions, update_job_status, JobRecord, JobStatus,
    JobUpdate, NewJob,
};
use crate::model::{RawRecord, RecordPosition, SourceKind};
use crate::ocr::{PdftoppmRasterizer, TesseractOcr};
use crate::receipt_extractor::extract_receipt_with;
use crate::rules_store::resolve_rules;
use crate::source_adapter::{extract, sniff_kind, source_name_of, ExtractContext};
use crate::transaction_assembler::{Assembler, BatchOutcome};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

const PREVIEW_SAMPLE_ROWS: usize = 10;
const PREVIEW_REJECTION_SAMPLES: usize = 20;

/// Adapters plus assembler, configured once and reused for every file.
#[derive(Debug, Clone)]
pub struct StatementPipeline {
    ctx: ExtractContext,
    assembler: Assembler,
}

/// Where and how a job writes its CSV.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub layout: CsvLayout,
    pub date_order: DateOrder,
    pub output_dir: PathBuf,
}

impl StatementPipeline {
    pub fn new(ctx: ExtractContext, assembler: Assembler) -> Self {
        Self { ctx, assembler }
    }

    pub fn from_config(config: &PipelineConfig, rules_dir: Option<&Path>) -> Result<Self, String> {
        let rules = resolve_rules(rules_dir)?;
        let policy = config.resolve_amount_policy().map_err(|e| e.to_string())?;
        let ctx = ExtractContext::new(
            Arc::new(TesseractOcr::new(config.ocr.tesseract_cmd.clone())),
            Arc::new(PdftoppmRasterizer::new(config.ocr.pdftoppm_cmd.clone())),
            config.ocr.min_page_text_chars,
        );
        Ok(Self::new(ctx, Assembler::new(rules, policy)))
    }

    pub fn assembler(&self) -> &Assembler {
        &self.assembler
    }

    pub fn extract(&self, path: &Path) -> Result<(SourceKind, Vec<RawRecord>), String> {
        let kind = resolve_kind(path)?;
        Ok((kind, extract(path, kind, &self.ctx)))
    }

    pub fn run(&self, path: &Path) -> Result<(SourceKind, BatchOutcome), String> {
        let (kind, records) = self.extract(path)?;
        Ok((kind, self.assembler.assemble_batch(&records)))
    }
}

fn resolve_kind(path: &Path) -> Result<SourceKind, String> {
    sniff_kind(path).ok_or_else(|| format!("unsupported file type: {}", path.display()))
}

fn preview_value(path: &Path, kind: SourceKind, outcome: &BatchOutcome, assembler: &Assembler) -> Value {
    let samples = outcome
        .transactions
        .iter()
        .take(PREVIEW_SAMPLE_ROWS)
        .map(|t| {
            json!({
                "id": t.id(),
                "date": t.date().format("%Y-%m-%d").to_string(),
                "description": t.description(),
                "amount": t.amount(),
                "kind": t.kind().as_str(),
                "category": categorize_with(t.description(), assembler.rules()),
            })
        })
        .collect::<Vec<_>>();

    json!({
        "file": {
            "path": path.to_string_lossy().to_string(),
            "name": source_name_of(path),
            "kind": kind.as_str(),
        },
        "summary": {
            "records": outcome.record_count,
            "accepted": outcome.transactions.len(),
            "rejected": outcome.rejections.len(),
            "text": outcome.summary(),
        },
        "rejection_reasons": outcome.rejection_counts(),
        "rejections": outcome.rejections.iter().take(PREVIEW_REJECTION_SAMPLES).collect::<Vec<_>>(),
        "samples": samples,
    })
}

/// Runs extraction and assembly without touching the database.
pub fn preview_file_at_path(pipeline: &StatementPipeline, path: &Path) -> Result<Value, String> {
    let (kind, outcome) = pipeline.run(path)?;
    Ok(preview_value(path, kind, &outcome, &pipeline.assembler))
}

fn output_path_for(source: &Path, job_id: &str, output_dir: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "statement".to_string());
    let short_id = job_id.get(..8).unwrap_or(job_id);
    output_dir.join(format!("{stem}_{short_id}.csv"))
}

fn count(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// Processes one file as a tracked job: extract, assemble, write the CSV and persist
/// the transactions. A job with nothing to show for it ends FAILED with a message.
pub fn import_file_at_db_path(
    db_path: &Path,
    source_path: &Path,
    pipeline: &StatementPipeline,
    options: &ExportOptions,
) -> Result<Value, String> {
    let kind = resolve_kind(source_path)?;
    let mut conn = open_job_db(db_path)?;
    let source_file = source_path.to_string_lossy().to_string();
    let job = create_job(
        &conn,
        &NewJob {
            source_file: &source_file,
            source_kind: kind.as_str(),
            csv_layout: options.layout.as_str(),
            date_order: options.date_order.as_str(),
        },
    )?;
    update_job_status(&conn, &job.job_id, JobStatus::Processing, &JobUpdate::default())?;
    info!(job_id = %job.job_id, file = %source_file, "job started");

    let records = extract(source_path, kind, &pipeline.ctx);
    let outcome = pipeline.assembler.assemble_batch(&records);
    let counts = JobUpdate {
        record_count: Some(count(outcome.record_count)),
        transaction_count: Some(count(outcome.transactions.len())),
        ..JobUpdate::default()
    };

    let failure = if records.is_empty() {
        Some("no records could be extracted from the file".to_string())
    } else if outcome.transactions.is_empty() {
        Some(format!(
            "no transactions could be assembled from {} records",
            outcome.record_count
        ))
    } else {
        None
    };

    let finished: JobRecord = match failure {
        Some(message) => fail_job(&conn, &job.job_id, message, counts)?,
        None => {
            let output_path = output_path_for(source_path, &job.job_id, &options.output_dir);
            let stored = write_csv_to_path(
                &output_path,
                &outcome.transactions,
                options.layout,
                options.date_order,
            )
            .and_then(|_| replace_job_transactions(&mut conn, &job.job_id, &outcome.transactions));
            match stored {
                Ok(_) => update_job_status(
                    &conn,
                    &job.job_id,
                    JobStatus::Completed,
                    &JobUpdate {
                        output_file: Some(output_path.to_string_lossy().to_string()),
                        ..counts
                    },
                )?,
                Err(message) => fail_job(&conn, &job.job_id, message, counts)?,
            }
        }
    };

    info!(
        job_id = %finished.job_id,
        status = finished.status.as_str(),
        "{}",
        outcome.summary()
    );
    Ok(json!({
        "db_path": db_path.to_string_lossy().to_string(),
        "job": finished,
        "preview": preview_value(source_path, kind, &outcome, &pipeline.assembler),
    }))
}

fn fail_job(
    conn: &rusqlite::Connection,
    job_id: &str,
    message: String,
    counts: JobUpdate,
) -> Result<JobRecord, String> {
    warn!(job_id, "job failed: {message}");
    update_job_status(
        conn,
        job_id,
        JobStatus::Failed,
        &JobUpdate {
            error_message: Some(message),
            ..counts
        },
    )
}

/// Reads a receipt (usually an image) and extracts vendor, date and total.
pub fn receipt_at_path(pipeline: &StatementPipeline, path: &Path) -> Result<Value, String> {
    let (_kind, records) = pipeline.extract(path)?;
    if records.is_empty() {
        return Err(format!("no text could be read from {}", path.display()));
    }
    let text = records
        .iter()
        .map(RawRecord::text)
        .collect::<Vec<_>>()
        .join("\n");
    let whole = RawRecord::new(text, source_name_of(path), SourceKind::Image, RecordPosition::Whole);
    let receipt = extract_receipt_with(&whole, pipeline.assembler.rules())
        .ok_or_else(|| format!("no receipt vendor, date and total found in {}", path.display()))?;
    serde_json::to_value(receipt).map_err(|e| format!("failed to encode receipt: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_store::{get_job, list_job_transactions};
    use crate::ocr::{NoOcr, OcrEngine};
    use std::fs;
    use uuid::Uuid;

    fn pipeline() -> StatementPipeline {
        StatementPipeline::new(ExtractContext::without_ocr(), Assembler::default())
    }

    fn temp_path(name: &str, ext: &str) -> PathBuf {
        std::env::temp_dir().join(format!("stmt_job_{name}_{}.{ext}", Uuid::new_v4()))
    }

    fn write_statement(body: &str) -> PathBuf {
        let path = temp_path("statement", "csv");
        fs::write(&path, body).expect("write statement");
        path
    }

    fn options() -> ExportOptions {
        ExportOptions {
            layout: CsvLayout::ThreeColumn,
            date_order: DateOrder::MonthFirst,
            output_dir: std::env::temp_dir().join(format!("stmt_out_{}", Uuid::new_v4())),
        }
    }

    const STATEMENT: &str = "Date,Description,Amount\n\
        07/31/2025,Salary Acme Corp,2500.00\n\
        08/01/2025,Corner Bakery,-45.99\n\
        not a date,Mystery,\n";

    #[test]
    fn preview_counts_accepted_and_rejected() {
        let path = write_statement(STATEMENT);
        let preview = preview_file_at_path(&pipeline(), &path).expect("preview");
        assert_eq!(preview["file"]["kind"], "tabular");
        assert_eq!(preview["summary"]["records"], 3);
        assert_eq!(preview["summary"]["accepted"], 2);
        assert_eq!(preview["summary"]["rejected"], 1);
        assert_eq!(preview["samples"][0]["kind"], "Credit");
        assert_eq!(preview["samples"][1]["amount"], -45.99);
        assert!(preview["samples"][0]["category"].is_string());
        let _ = fs::remove_file(path);
    }

    #[test]
    fn import_completes_and_persists_job() {
        let path = write_statement(STATEMENT);
        let db = temp_path("db", "db");
        let opts = options();
        let report = import_file_at_db_path(&db, &path, &pipeline(), &opts).expect("import");
        assert_eq!(report["job"]["status"], "COMPLETED");
        assert_eq!(report["job"]["transaction_count"], 2);
        assert_eq!(report["job"]["record_count"], 3);

        let output = report["job"]["output_file"].as_str().expect("output file");
        let csv = fs::read_to_string(output).expect("read csv");
        assert!(csv.starts_with("Date,Description,Amount\n07/31/2025,"));

        let job_id = report["job"]["job_id"].as_str().expect("job id");
        let conn = open_job_db(&db).expect("open db");
        assert_eq!(list_job_transactions(&conn, job_id).expect("list").len(), 2);

        let _ = fs::remove_file(path);
        let _ = fs::remove_file(db);
        let _ = fs::remove_dir_all(opts.output_dir);
    }

    #[test]
    fn import_without_transactions_fails_the_job() {
        let path = write_statement("Date,Description,Amount\nnope,Nothing,\n");
        let db = temp_path("db_fail", "db");
        let report = import_file_at_db_path(&db, &path, &pipeline(), &options()).expect("import");
        assert_eq!(report["job"]["status"], "FAILED");
        let message = report["job"]["error_message"].as_str().expect("message");
        assert!(message.contains("no transactions"));

        let conn = open_job_db(&db).expect("open db");
        let job_id = report["job"]["job_id"].as_str().expect("job id");
        let stored = get_job(&conn, job_id).expect("get").expect("job exists");
        assert_eq!(stored.status, JobStatus::Failed);
        assert!(stored.output_file.is_none());
        let _ = fs::remove_file(path);
        let _ = fs::remove_file(db);
    }

    #[test]
    fn unsupported_files_are_refused_up_front() {
        let path = temp_path("notes", "exe");
        let db = temp_path("db_unsupported", "db");
        let err = import_file_at_db_path(&db, &path, &pipeline(), &options())
            .expect_err("unsupported");
        assert!(err.contains("unsupported file type"));
        assert!(!db.exists());
    }

    struct EchoOcr;

    impl OcrEngine for EchoOcr {
        fn recognize(&self, image: &[u8]) -> Option<String> {
            Some(String::from_utf8_lossy(image).to_string())
        }
    }

    #[test]
    fn receipt_image_is_read_through_ocr() {
        let path = temp_path("receipt", "png");
        fs::write(&path, "KROGER #123\n07/31/2025 14:02\nMilk 3.49\nTOTAL $3.49\n").expect("write");
        let ocr_pipeline = StatementPipeline::new(
            ExtractContext::new(Arc::new(EchoOcr), Arc::new(NoOcr), 100),
            Assembler::default(),
        );
        let receipt = receipt_at_path(&ocr_pipeline, &path).expect("receipt");
        assert_eq!(receipt["vendor_name"], "KROGER #123");
        assert_eq!(receipt["total_amount"], 3.49);
        assert_eq!(receipt["transaction_date"], "2025-07-31");

        assert!(receipt_at_path(&pipeline(), &path).is_err());
        let _ = fs::remove_file(path);
    }
}
