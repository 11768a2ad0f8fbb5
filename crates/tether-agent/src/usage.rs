//! Token usage records and the per-conversation ledger.

use std::iter::Sum;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

/// Token accounting reported by one reasoning operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }
}

impl Add for Usage {
    type Output = Usage;

    fn add(mut self, rhs: Usage) -> Usage {
        self += rhs;
        self
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, rhs: Usage) {
        self.input_tokens += rhs.input_tokens;
        self.output_tokens += rhs.output_tokens;
        self.total_tokens += rhs.total_tokens;
    }
}

impl Sum for Usage {
    fn sum<I: Iterator<Item = Usage>>(iter: I) -> Usage {
        iter.fold(Usage::default(), Add::add)
    }
}

impl<'a> Sum<&'a Usage> for Usage {
    fn sum<I: Iterator<Item = &'a Usage>>(iter: I) -> Usage {
        iter.copied().sum()
    }
}

/// Append-only list of usage records, in the order their operations completed.
///
/// The total is computed lazily by field-wise summation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UsageLedger {
    records: Vec<Usage>,
}

impl UsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record usage if the operation reported any
    pub fn record(&mut self, usage: Option<Usage>) {
        if let Some(usage) = usage {
            self.records.push(usage);
        }
    }

    pub fn records(&self) -> &[Usage] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop records added after `len`; used to roll back a failed step.
    pub fn truncate(&mut self, len: usize) {
        self.records.truncate(len);
    }

    /// Field-wise sum of every record
    pub fn total(&self) -> Usage {
        self.records.iter().sum()
    }

    pub fn into_records(self) -> Vec<Usage> {
        self.records
    }
}

impl From<Vec<Usage>> for UsageLedger {
    fn from(records: Vec<Usage>) -> Self {
        Self { records }
    }
}
