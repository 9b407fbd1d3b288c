use serde::Serialize;

const MAX_FINDINGS: usize = 32;

/// Specifies the depth of verification checks to perform.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyLevel {
    /// Sizes, ID runs and directory only.
    Fast,
    /// Also loads every page and walks every record.
    Full,
}

/// Indicates the severity level of a verification finding.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifySeverity {
    /// Allowed but unusual state.
    Warning,
    /// Broken invariant.
    Error,
}

/// A single issue discovered during verification.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyFinding {
    /// The severity level of this finding.
    pub severity: VerifySeverity,
    /// Human-readable description of the issue.
    pub message: String,
}

/// Statistics collected during verification.
#[derive(Clone, Debug, Default, Serialize)]
pub struct VerifyCounts {
    /// Records walked.
    pub nodes: u64,
    /// Elements walked.
    pub elements: u64,
    /// Attributes walked.
    pub attributes: u64,
    /// Text nodes walked.
    pub texts: u64,
    /// Logical pages in the directory.
    pub pages: u64,
    /// Blocks available for reuse.
    pub free_blocks: u64,
    /// Runs in the ID index.
    pub id_runs: u64,
}

/// Complete report of a verification pass.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyReport {
    /// The verification level that was performed.
    pub level: VerifyLevel,
    /// Whether no error was found. Warnings do not clear this flag.
    pub success: bool,
    /// Issues discovered, capped at 32.
    pub findings: Vec<VerifyFinding>,
    /// Statistics about the structures examined.
    pub counts: VerifyCounts,
}

impl VerifyReport {
    pub(crate) fn new(level: VerifyLevel) -> Self {
        Self {
            level,
            success: true,
            findings: Vec::new(),
            counts: VerifyCounts::default(),
        }
    }

    pub(crate) fn error(&mut self, message: impl Into<String>) {
        self.success = false;
        self.push(VerifySeverity::Error, message.into());
    }

    pub(crate) fn warning(&mut self, message: impl Into<String>) {
        self.push(VerifySeverity::Warning, message.into());
    }

    /// Returns true once the finding list is full.
    pub(crate) fn saturated(&self) -> bool {
        self.findings.len() >= MAX_FINDINGS
    }

    fn push(&mut self, severity: VerifySeverity, message: String) {
        if !self.saturated() {
            self.findings.push(VerifyFinding { severity, message });
        }
    }

    /// Error findings only.
    pub fn errors(&self) -> impl Iterator<Item = &VerifyFinding> {
        self.findings
            .iter()
            .filter(|f| f.severity == VerifySeverity::Error)
    }
}
