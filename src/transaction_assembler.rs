use crate::amount_normalizer::{self, AmountPolicy};
use crate::candidate_miner::mine;
use crate::date_normalizer;
use crate::description_normalizer;
use crate::error::Rejection;
use crate::model::{CanonicalTransaction, FieldCandidates, RawRecord};
use crate::rules_store::RuleSet;
use chrono::{Datelike, Local};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

pub const UNKNOWN_DESCRIPTION: &str = "Unknown Transaction";

/// A record the assembler refused, with enough context to find it again.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordRejection {
    pub locator: String,
    pub reason_key: &'static str,
    pub reason: String,
    #[serde(skip)]
    pub rejection: Rejection,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchOutcome {
    pub record_count: usize,
    pub transactions: Vec<CanonicalTransaction>,
    pub rejections: Vec<RecordRejection>,
}

impl BatchOutcome {
    pub fn summary(&self) -> String {
        format!(
            "{} of {} records produced a transaction",
            self.transactions.len(),
            self.record_count
        )
    }

    pub fn rejection_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for r in &self.rejections {
            *counts.entry(r.reason_key).or_insert(0) += 1;
        }
        counts
    }
}

#[derive(Debug, Clone)]
pub struct Assembler {
    rules: RuleSet,
    policy: AmountPolicy,
    current_year: i32,
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new(RuleSet::embedded(), AmountPolicy::default())
    }
}

impl Assembler {
    pub fn new(rules: RuleSet, policy: AmountPolicy) -> Self {
        Self {
            rules,
            policy,
            current_year: Local::now().year(),
        }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Turns one record's candidates into a transaction. Date and amount failures
    /// reject the record; a missing description is replaced by a placeholder.
    pub fn assemble(
        &self,
        candidates: &FieldCandidates,
        record: &RawRecord,
    ) -> Result<CanonicalTransaction, Rejection> {
        let mut notes = vec![format!("Record: {}", record.locator())];

        let date = date_normalizer::normalize_in_year(candidates.date(), self.current_year)?;
        if let Some(raw) = candidates.date() {
            notes.push(format!("Date parsed from: {raw}"));
        }

        let amount = amount_normalizer::normalize_with(
            candidates.amount(),
            candidates.credit(),
            candidates.debit(),
            &self.rules,
            self.policy,
        )?;
        notes.push(format!(
            "Amount parsed from: {} ({}, {})",
            amount.raw,
            amount.source.as_str(),
            amount.evidence.describe()
        ));

        let description =
            match description_normalizer::normalize_with(candidates.description(), &self.rules) {
                Some(cleaned) => {
                    if let Some(raw) = candidates.description() {
                        notes.push(format!("Description cleaned from: {raw}"));
                    }
                    cleaned
                }
                None => {
                    notes.push(
                        "Used default description due to missing or invalid description"
                            .to_string(),
                    );
                    UNKNOWN_DESCRIPTION.to_string()
                }
            };

        Ok(CanonicalTransaction::new(
            date,
            description,
            amount.amount,
            amount.kind,
            record.source_name(),
            notes,
        ))
    }

    /// Mines and assembles a single record.
    pub fn process(&self, record: &RawRecord) -> Result<CanonicalTransaction, Rejection> {
        let candidates = mine(record);
        self.assemble(&candidates, record)
    }

    /// Processes records in parallel; output keeps input order.
    pub fn assemble_batch(&self, records: &[RawRecord]) -> BatchOutcome {
        let results = records
            .par_iter()
            .map(|record| (record, self.process(record)))
            .collect::<Vec<_>>();

        let mut outcome = BatchOutcome {
            record_count: records.len(),
            ..BatchOutcome::default()
        };
        for (record, result) in results {
            match result {
                Ok(txn) => outcome.transactions.push(txn),
                Err(rejection) => {
                    debug!(
                        record = %record.locator(),
                        reason = rejection.reason_key(),
                        "record rejected: {rejection}"
                    );
                    outcome.rejections.push(RecordRejection {
                        locator: record.locator(),
                        reason_key: rejection.reason_key(),
                        reason: rejection.to_string(),
                        rejection,
                    });
                }
            }
        }
        info!(
            records = outcome.record_count,
            accepted = outcome.transactions.len(),
            rejected = outcome.rejections.len(),
            "{}",
            outcome.summary()
        );
        outcome
    }
}

/// Assembles with the embedded rules and default policy.
pub fn assemble(
    candidates: &FieldCandidates,
    record: &RawRecord,
) -> Result<CanonicalTransaction, Rejection> {
    Assembler::default().assemble(candidates, record)
}
