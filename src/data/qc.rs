// qc.rs - Per-sample quality checks

use crate::core::distance::presence_ratio;
use serde::Serialize;
use std::fmt;

/// Start of every marker written in place of a code.
pub const QC_MARKER_PREFIX: &str = "FAILED QC";

/// Why a sample failed quality control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QcReason {
    /// Too few core loci called
    Core,
    /// Assembly length outside the accepted range
    Length,
}

impl fmt::Display for QcReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QcReason::Core => write!(f, "CORE"),
            QcReason::Length => write!(f, "LENGTH"),
        }
    }
}

/// A sample kept out of the tree, with the reasons.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QcFailure {
    pub key: String,
    pub reasons: Vec<QcReason>,
}

impl QcFailure {
    /// Marker written in place of a code, e.g. `FAILED QC: CORE , LENGTH`.
    pub fn marker(&self) -> String {
        let reasons: Vec<String> = self.reasons.iter().map(|r| r.to_string()).collect();
        format!("{}: {}", QC_MARKER_PREFIX, reasons.join(" , "))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QcSettings {
    /// Minimum fraction of called loci (compared after rounding to 2 decimals)
    pub min_presence: f64,
    /// Inclusive accepted assembly length range
    pub length_range: Option<(u64, u64)>,
}

impl Default for QcSettings {
    fn default() -> Self {
        Self {
            min_presence: 0.95,
            length_range: None,
        }
    }
}

impl QcSettings {
    pub fn core_ok(&self, calls: &[i32]) -> bool {
        presence_ratio(calls) >= self.min_presence
    }

    /// An unknown length fails when a range is configured.
    pub fn length_ok(&self, length: Option<u64>) -> bool {
        match (self.length_range, length) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some((min, max)), Some(len)) => len >= min && len <= max,
        }
    }

    /// Failed criteria, core first; empty when the sample passes.
    pub fn check(&self, calls: &[i32], length: Option<u64>) -> Vec<QcReason> {
        let mut reasons = Vec::new();
        if !self.core_ok(calls) {
            reasons.push(QcReason::Core);
        }
        if !self.length_ok(length) {
            reasons.push(QcReason::Length);
        }
        reasons
    }
}
