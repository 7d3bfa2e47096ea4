//! Per-operation audit trail and the persisted operation report.

use std::fmt;

use fleet_core::{OperationId, TaskOutcome, VersionHandle, VmRecord};
use serde::{Deserialize, Serialize};

/// Lifecycle operation that produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub enum Operation {
    Create,
    Start,
    Stop,
    Delete,
    SetBootOrder,
    SetConfig,
    Lookup,
    Sync,
}

impl Operation {
    /// Returns the kebab-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Delete => "delete",
            Self::SetBootOrder => "set-boot-order",
            Self::SetConfig => "set-config",
            Self::Lookup => "lookup",
            Self::Sync => "sync",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered, human-readable status lines for one operation.
///
/// Every line is also emitted through `tracing` with the VM name and
/// operation as fields.
#[derive(Debug, Clone)]
pub struct OperationLog {
    vm: String,
    operation: Operation,
    lines: Vec<String>,
}

impl OperationLog {
    /// Start an empty log for `operation` on `vm`.
    pub fn new(operation: Operation, vm: impl Into<String>) -> Self {
        Self {
            vm: vm.into(),
            operation,
            lines: Vec::new(),
        }
    }

    /// Append a status line.
    pub fn push(&mut self, line: impl Into<String>) {
        let line = line.into();
        tracing::info!(vm = %self.vm, operation = %self.operation, "{line}");
        self.lines.push(line);
    }

    /// Append a line for a failure that was tolerated.
    pub fn warn(&mut self, line: impl Into<String>) {
        let line = line.into();
        tracing::warn!(vm = %self.vm, operation = %self.operation, "{line}");
        self.lines.push(line);
    }

    /// Lines in the order they were pushed.
    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Newline-joined log, as persisted in `lastOperationLog`.
    #[must_use]
    pub fn render(&self) -> String {
        self.lines.join("\n")
    }
}

/// Attributes persisted as one `vm` resource version.
///
/// The [`VmRecord`] fields are flattened into the top level so downstream
/// readers see `status`, `ip`, and friends directly.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct OperationReport {
    #[serde(flatten)]
    pub record: VmRecord,
    pub operation: Operation,
    pub operation_id: OperationId,
    pub success: bool,
    /// `start`: whether a start task was submitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_issued: Option<bool>,
    /// `stop`: whether a stop task was submitted; `false` when already stopped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_issued: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub already_absent: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boot_order: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_keys: Option<Vec<String>>,
    /// Outcomes of the hypervisor tasks awaited, in order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<TaskOutcome>,
}

impl OperationReport {
    /// A successful report for `record`, with the log rendered into it.
    #[must_use]
    pub fn new(operation: Operation, mut record: VmRecord, log: &OperationLog) -> Self {
        record.last_operation_log = log.render();
        Self {
            record,
            operation,
            operation_id: OperationId::new(),
            success: true,
            start_issued: None,
            stop_issued: None,
            already_absent: None,
            boot_order: None,
            config_keys: None,
            tasks: Vec::new(),
        }
    }
}

/// A persisted operation: where it was written and what was written.
#[derive(Debug, Clone, Serialize)]
#[non_exhaustive]
pub struct OperationOutcome {
    pub version: VersionHandle,
    pub report: OperationReport,
}

impl OperationOutcome {
    /// Pair a written version with its report.
    #[must_use]
    pub fn new(version: VersionHandle, report: OperationReport) -> Self {
        Self { version, report }
    }
}
