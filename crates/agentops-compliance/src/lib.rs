// Compliance reporting
//
// Aggregates the audit packet stream over a date range into a report:
// totals, per-tool counts, per-segment write counts, approvals vs
// rejections, and a violations list. The raw range can also be exported,
// sorted by timestamp, for offline review.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use agentops_core::packet::MemorySegment;
use agentops_storage::{PacketRow, PacketStore, StoreError};

/// High-risk tools: an audit_tool packet for one of these without an
/// `approved_by` is a violation.
pub const HIGH_RISK_TOOLS: [&str; 7] = [
    "shell_exec",
    "file_write",
    "file_delete",
    "database_write",
    "git_commit",
    "git_push",
    "gmp_run",
];

/// Packet segments scanned for a report.
const AUDIT_SEGMENTS: [MemorySegment; 4] = [
    MemorySegment::AuditCommand,
    MemorySegment::ToolAudit,
    MemorySegment::AuditApproval,
    MemorySegment::AuditMemoryWrite,
];

const SCAN_LIMIT: i64 = 10_000;

#[derive(Debug, thiserror::Error)]
pub enum ComplianceError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// One detected violation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    #[serde(rename = "type")]
    pub violation_type: String,
    pub tool_name: String,
    pub agent_id: Option<String>,
    pub call_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Compliance report for a time period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub report_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub from_date: DateTime<Utc>,
    pub to_date: DateTime<Utc>,

    // Summary counts
    pub total_commands: u64,
    pub total_tool_calls: u64,
    pub total_approvals: u64,
    pub total_rejections: u64,
    pub total_memory_writes: u64,

    // Violations
    pub unapproved_high_risk_calls: u64,
    pub failed_tool_calls: u64,
    pub violations: Vec<Violation>,

    // Breakdown
    pub commands_by_type: BTreeMap<String, u64>,
    pub tools_by_name: BTreeMap<String, u64>,
    pub memory_writes_by_segment: BTreeMap<String, u64>,
}

impl ComplianceReport {
    fn empty(from_date: DateTime<Utc>, to_date: DateTime<Utc>) -> Self {
        Self {
            report_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            from_date,
            to_date,
            total_commands: 0,
            total_tool_calls: 0,
            total_approvals: 0,
            total_rejections: 0,
            total_memory_writes: 0,
            unapproved_high_risk_calls: 0,
            failed_tool_calls: 0,
            violations: Vec::new(),
            commands_by_type: BTreeMap::new(),
            tools_by_name: BTreeMap::new(),
            memory_writes_by_segment: BTreeMap::new(),
        }
    }
}

/// Generates compliance reports from the audit packet stream.
pub struct ComplianceReporter {
    store: Arc<dyn PacketStore>,
}

impl ComplianceReporter {
    pub fn new(store: Arc<dyn PacketStore>) -> Self {
        Self { store }
    }

    /// Report for one calendar day.
    pub async fn generate_daily_report(
        &self,
        date: DateTime<Utc>,
    ) -> Result<ComplianceReport, ComplianceError> {
        let from = date
            .date_naive()
            .and_time(chrono::NaiveTime::MIN)
            .and_utc();
        self.generate_report(from, from + Duration::days(1)).await
    }

    /// Report for an arbitrary date range.
    pub async fn generate_report(
        &self,
        from_date: DateTime<Utc>,
        to_date: DateTime<Utc>,
    ) -> Result<ComplianceReport, ComplianceError> {
        let mut report = ComplianceReport::empty(from_date, to_date);

        for row in self.scan_range(from_date, to_date).await? {
            match row.packet_type {
                MemorySegment::AuditCommand => {
                    report.total_commands += 1;
                    let command_type = row.envelope.payload["command_type"]
                        .as_str()
                        .unwrap_or("unknown")
                        .to_string();
                    *report.commands_by_type.entry(command_type).or_insert(0) += 1;
                }
                MemorySegment::ToolAudit => self.process_tool_call(&mut report, &row),
                MemorySegment::AuditApproval => {
                    let approved = row.envelope.payload["approved"].as_bool().unwrap_or(false);
                    if approved {
                        report.total_approvals += 1;
                    } else {
                        report.total_rejections += 1;
                    }
                }
                MemorySegment::AuditMemoryWrite => {
                    report.total_memory_writes += 1;
                    let segment = row.envelope.payload["segment"]
                        .as_str()
                        .unwrap_or("unknown")
                        .to_string();
                    *report.memory_writes_by_segment.entry(segment).or_insert(0) += 1;
                }
                _ => {}
            }
        }

        info!(
            report_id = %report.report_id,
            from = %from_date,
            to = %to_date,
            tool_calls = report.total_tool_calls,
            violations = report.violations.len(),
            "compliance report generated"
        );
        Ok(report)
    }

    fn process_tool_call(&self, report: &mut ComplianceReport, row: &PacketRow) {
        report.total_tool_calls += 1;

        let payload = &row.envelope.payload;
        let tool_name = payload["tool_id"]
            .as_str()
            .or_else(|| payload["tool_name"].as_str())
            .unwrap_or("unknown")
            .to_string();
        *report.tools_by_name.entry(tool_name.clone()).or_insert(0) += 1;

        if payload["status"].as_str() == Some("failure") {
            report.failed_tool_calls += 1;
        }

        // Violation rule: high-risk tool without an approver on record.
        let approved_by = payload.get("approved_by").and_then(Value::as_str);
        if HIGH_RISK_TOOLS.contains(&tool_name.as_str()) && approved_by.is_none() {
            report.unapproved_high_risk_calls += 1;
            report.violations.push(Violation {
                violation_type: "unapproved_high_risk".to_string(),
                tool_name,
                agent_id: payload["agent_id"].as_str().map(String::from),
                call_id: payload["call_id"].as_str().map(String::from),
                timestamp: row.timestamp,
            });
            warn!(
                call_id = ?report.violations.last().and_then(|v| v.call_id.clone()),
                "unapproved high-risk tool call recorded"
            );
        }
    }

    /// Export the raw audit packet stream in the range, sorted by timestamp
    /// ascending, for offline compliance review.
    pub async fn export_range(
        &self,
        from_date: DateTime<Utc>,
        to_date: DateTime<Utc>,
    ) -> Result<Vec<PacketRow>, ComplianceError> {
        let mut rows = self.scan_range(from_date, to_date).await?;
        rows.sort_by_key(|r| r.timestamp);
        Ok(rows)
    }

    async fn scan_range(
        &self,
        from_date: DateTime<Utc>,
        to_date: DateTime<Utc>,
    ) -> Result<Vec<PacketRow>, ComplianceError> {
        let mut rows = Vec::new();
        for segment in AUDIT_SEGMENTS {
            let batch = self
                .store
                .find_by_type(segment, None, Some(from_date), SCAN_LIMIT)
                .await?;
            rows.extend(batch.into_iter().filter(|r| r.timestamp <= to_date));
        }
        Ok(rows)
    }
}
