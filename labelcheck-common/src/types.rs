//! Wire types for the remote label analysis service
//!
//! Records returned by the analysis and batch endpoints, plus the
//! aggregate progress snapshot pushed over the batch event stream.
//!
//! # Status vocabularies
//!
//! Both status enums carry an `Unknown` catch-all so that a newer server
//! adding a processing stage does not break decoding. `Unknown` is always
//! treated as transient.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ========================================
// Handles
// ========================================

/// Identifier returned by a single-item upload; scopes all status polling
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubmissionHandle(String);

impl SubmissionHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubmissionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier returned by a batch upload; scopes the progress stream and
/// the results fetch
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchHandle(String);

impl BatchHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ========================================
// Single analysis
// ========================================

/// Processing status of one submitted label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    /// Accepted, not yet started
    Pending,
    /// Text extraction running
    ProcessingOcr,
    /// Rule evaluation running
    ProcessingCompliance,
    /// Verdict available
    Completed,
    /// Analysis aborted; see `error_message`
    Failed,
    /// Status value this client does not know
    #[serde(other)]
    Unknown,
}

impl AnalysisStatus {
    /// `completed` and `failed` end polling; everything else is transient
    pub fn is_terminal(self) -> bool {
        matches!(self, AnalysisStatus::Completed | AnalysisStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisStatus::Pending => "pending",
            AnalysisStatus::ProcessingOcr => "processing_ocr",
            AnalysisStatus::ProcessingCompliance => "processing_compliance",
            AnalysisStatus::Completed => "completed",
            AnalysisStatus::Failed => "failed",
            AnalysisStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overall pass/fail/warning verdict for a completed analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallVerdict {
    Pass,
    Fail,
    Warnings,
}

impl OverallVerdict {
    pub fn as_str(self) -> &'static str {
        match self {
            OverallVerdict::Pass => "pass",
            OverallVerdict::Fail => "fail",
            OverallVerdict::Warnings => "warnings",
        }
    }
}

impl fmt::Display for OverallVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OverallVerdict {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pass" => Ok(OverallVerdict::Pass),
            "fail" => Ok(OverallVerdict::Fail),
            "warnings" | "warning" => Ok(OverallVerdict::Warnings),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown verdict '{}' (expected pass, fail or warnings)",
                other
            ))),
        }
    }
}

/// Severity of a single compliance finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Pass,
    Warning,
    Fail,
    Info,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Pass => "pass",
            Severity::Warning => "warning",
            Severity::Fail => "fail",
            Severity::Info => "info",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One rule evaluation outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceFinding {
    pub rule_id: String,
    pub rule_name: String,
    pub severity: Severity,
    pub message: String,
    #[serde(default)]
    pub extracted_value: Option<String>,
    #[serde(default)]
    pub regulation_reference: Option<String>,
}

impl ComplianceFinding {
    /// Application field this finding compares against the label, if it is
    /// one of the application matching rules
    pub fn matched_field(&self) -> Option<&'static str> {
        match self.rule_id.as_str() {
            "BRAND_MATCH" => Some("brand_name"),
            "CLASS_TYPE_MATCH" => Some("class_type"),
            "ALCOHOL_MATCH" => Some("alcohol_content"),
            "NET_CONTENTS_MATCH" => Some("net_contents"),
            "NAME_ADDRESS_MATCH" => Some("bottler_name_address"),
            "ORIGIN_MATCH" => Some("country_of_origin"),
            _ => None,
        }
    }
}

/// Optional application metadata sent alongside a label image
///
/// Empty fields are never transmitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alcohol_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net_contents: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bottler_name_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_of_origin: Option<String>,
}

impl ApplicationDetails {
    /// Non-empty `(field, value)` pairs in form-field order
    pub fn fields(&self) -> Vec<(&'static str, &str)> {
        [
            ("brand_name", &self.brand_name),
            ("class_type", &self.class_type),
            ("alcohol_content", &self.alcohol_content),
            ("net_contents", &self.net_contents),
            ("bottler_name_address", &self.bottler_name_address),
            ("country_of_origin", &self.country_of_origin),
        ]
        .into_iter()
        .filter_map(|(name, value)| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(|v| (name, v))
        })
        .collect()
    }

    /// Non-empty value of one field by its form name
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields()
            .into_iter()
            .find(|(name, _)| *name == field)
            .map(|(_, value)| value)
    }
}

/// Full status record for one analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub id: String,
    pub label_id: String,
    pub status: AnalysisStatus,
    #[serde(default)]
    pub extracted_text: Option<String>,
    #[serde(default)]
    pub ocr_confidence: Option<f64>,
    #[serde(default)]
    pub ocr_duration_ms: Option<u64>,
    #[serde(default)]
    pub compliance_findings: Option<Vec<ComplianceFinding>>,
    /// Details submitted with the label; the expected side of matching
    #[serde(default)]
    pub application_details: Option<ApplicationDetails>,
    #[serde(default)]
    pub overall_verdict: Option<OverallVerdict>,
    #[serde(default)]
    pub compliance_duration_ms: Option<u64>,
    #[serde(default)]
    pub detected_beverage_type: Option<String>,
    #[serde(default)]
    pub detected_brand_name: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub total_duration_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
}

/// Response of the single-item upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadAccepted {
    pub analysis_id: SubmissionHandle,
}

/// Page of past analyses, newest first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisPage {
    pub items: Vec<AnalysisRecord>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

/// Query for the analysis history listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryQuery {
    pub page: u32,
    pub page_size: u32,
    pub verdict: Option<OverallVerdict>,
}

impl HistoryQuery {
    pub const MAX_PAGE_SIZE: u32 = 100;

    /// Remote bounds: page >= 1, 1 <= page_size <= 100
    pub fn validate(&self) -> crate::Result<()> {
        if self.page == 0 {
            return Err(crate::Error::InvalidInput("page must be at least 1".to_string()));
        }
        if self.page_size == 0 || self.page_size > Self::MAX_PAGE_SIZE {
            return Err(crate::Error::InvalidInput(format!(
                "page_size must be between 1 and {}",
                Self::MAX_PAGE_SIZE
            )));
        }
        Ok(())
    }
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 20,
            verdict: None,
        }
    }
}

// ========================================
// Sample labels
// ========================================

/// Reference label published by the service, with the details it was
/// designed to match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleLabel {
    pub filename: String,
    #[serde(default)]
    pub brand_name: String,
    #[serde(default)]
    pub class_type: String,
    #[serde(default)]
    pub alcohol_content: String,
    #[serde(default)]
    pub net_contents: String,
    #[serde(default)]
    pub bottler_name_address: String,
    #[serde(default)]
    pub country_of_origin: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub expected_verdict: String,
    #[serde(default)]
    pub image_url: String,
}

impl SampleLabel {
    /// Application details to submit alongside the sample image
    pub fn details(&self) -> ApplicationDetails {
        let field = |value: &String| Some(value.clone()).filter(|v| !v.trim().is_empty());
        ApplicationDetails {
            brand_name: field(&self.brand_name),
            class_type: field(&self.class_type),
            alcohol_content: field(&self.alcohol_content),
            net_contents: field(&self.net_contents),
            bottler_name_address: field(&self.bottler_name_address),
            country_of_origin: field(&self.country_of_origin),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleLabelsResponse {
    pub samples: Vec<SampleLabel>,
}

// ========================================
// Batch
// ========================================

/// Aggregate status of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
    #[serde(other)]
    Unknown,
}

impl BatchStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
            BatchStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One pushed message from the batch progress stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BatchProgressSnapshot {
    pub status: BatchStatus,
    pub total: u32,
    pub completed: u32,
    pub failed: u32,
}

impl BatchProgressSnapshot {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Items finished either way
    pub fn processed(&self) -> u32 {
        self.completed.saturating_add(self.failed)
    }

    /// `completed + failed` never exceeds a known (non-zero) total
    pub fn is_within_total(&self) -> bool {
        self.total == 0 || self.processed() <= self.total
    }

    /// True when either counter went backwards relative to `previous`
    pub fn regresses_from(&self, previous: &BatchProgressSnapshot) -> bool {
        self.completed < previous.completed || self.failed < previous.failed
    }
}

/// Response of the batch upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchAccepted {
    pub batch_id: BatchHandle,
    pub total_labels: u32,
}

/// Stored batch record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRecord {
    pub id: String,
    pub status: BatchStatus,
    pub total_labels: u32,
    pub completed_labels: u32,
    pub failed_labels: u32,
    pub created_at: DateTime<Utc>,
}

/// Batch record with every per-item analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchDetail {
    pub batch: BatchRecord,
    pub analyses: Vec<AnalysisRecord>,
}
