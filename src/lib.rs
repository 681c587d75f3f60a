//! Turns heterogeneous financial documents (CSV/XLSX exports, PDF statements, DOCX
//! statements, receipt images) into canonical transactions with a signed amount, an
//! ISO date and a cleaned description.
//!
//! Records flow through source adapters, the candidate miner, the date, amount and
//! description normalizers and finally the transaction assembler.

pub mod amount_normalizer;
pub mod candidate_miner;
pub mod config;
pub mod date_normalizer;
pub mod description_normalizer;
pub mod docx_import;
pub mod error;
pub mod export;
pub mod image_import;
pub mod job_store;
mod logging;
pub mod model;
pub mod ocr;
pub mod pdf_import;
pub mod receipt_extractor;
pub mod rules_store;
pub mod source_adapter;
pub mod statement_job;
pub mod tabular_import;
pub mod transaction_assembler;

pub use amount_normalizer::AmountPolicy;
pub use candidate_miner::mine;
pub use config::PipelineConfig;
pub use error::{AmountError, ConfigError, DateError, Rejection};
pub use export::{render_csv, write_csv_to_path, CsvLayout, DateOrder};
pub use job_store::{
    apply_embedded_migrations, create_job, get_job, list_job_transactions, list_jobs,
    open_job_db, replace_job_transactions, update_job_status, JobRecord, JobStatus, JobUpdate,
    NewJob,
};
pub use logging::init_logging;
pub use model::{
    AmountCandidate, CandidateField, CanonicalTransaction, FieldCandidates, RawRecord,
    RecordPosition, SourceKind, TransactionKind,
};
pub use ocr::{NoOcr, OcrEngine, PageRasterizer};
pub use receipt_extractor::{extract_receipt, LineItem, ReceiptData};
pub use rules_store::{ensure_rules_dir_seeded, resolve_rules, RuleSet};
pub use source_adapter::{extract, sniff_kind, ExtractContext};
pub use statement_job::{
    import_file_at_db_path, preview_file_at_path, receipt_at_path, ExportOptions,
    StatementPipeline,
};
pub use transaction_assembler::{Assembler, BatchOutcome, RecordRejection};
