use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::pipeline::PublishReport;

/// Represents the status of a webhook delivery
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Running,
    Success,
    Failed,
    Ignored,
}

impl DeliveryStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "ignored" => Some(Self::Ignored),
            _ => None,
        }
    }
}

/// One webhook delivery and what became of it
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRecord {
    pub id: String,
    pub event_type: String,
    pub repository: Option<String>,
    pub branch: Option<String>,
    pub head_commit: Option<String>,
    pub dry_run: bool,
    pub status: DeliveryStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub report: Option<PublishReport>,
    pub error: Option<String>,
}

impl DeliveryRecord {
    /// Create a new record in Running status
    pub fn new(id: impl Into<String>, event_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            event_type: event_type.into(),
            repository: None,
            branch: None,
            head_commit: None,
            dry_run: false,
            status: DeliveryStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            report: None,
            error: None,
        }
    }

    pub fn mark_ignored(&mut self, reason: impl Into<String>) {
        self.status = DeliveryStatus::Ignored;
        self.completed_at = Some(Utc::now());
        self.error = Some(reason.into());
    }

    /// Record the report; status follows whether every step succeeded.
    pub fn mark_finished(&mut self, report: PublishReport) {
        self.status = if report.is_complete() {
            DeliveryStatus::Success
        } else {
            DeliveryStatus::Failed
        };
        self.completed_at = Some(Utc::now());
        self.report = Some(report);
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = DeliveryStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error = Some(error.into());
    }
}

/// Bounded in-memory history of deliveries, newest last
pub struct DeliveryStore {
    records: VecDeque<DeliveryRecord>,
    capacity: usize,
}

impl DeliveryStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Insert `record`, replacing an earlier record with the same id
    /// (GitHub redeliveries reuse the id) and evicting the oldest when full.
    pub fn add(&mut self, record: DeliveryRecord) {
        self.records.retain(|r| r.id != record.id);
        while self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn update(&mut self, id: &str, f: impl FnOnce(&mut DeliveryRecord)) {
        if let Some(record) = self.records.iter_mut().find(|r| r.id == id) {
            f(record);
        }
    }

    pub fn get(&self, id: &str) -> Option<&DeliveryRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    /// Up to `limit` records, most recent first.
    pub fn recent(&self, limit: usize) -> Vec<DeliveryRecord> {
        self.records.iter().rev().take(limit).cloned().collect()
    }

    pub fn by_status(&self, status: DeliveryStatus, limit: usize) -> Vec<DeliveryRecord> {
        self.records
            .iter()
            .rev()
            .filter(|r| r.status == status)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn running_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.status == DeliveryStatus::Running)
            .count()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
