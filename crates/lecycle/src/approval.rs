//! Approval workflow
//!
//! Gates ask the workflow for a request and poll it until it completes. Any single
//! rejection decides the request; otherwise it is approved once `minimum_approvals`
//! distinct approvers agreed, or expires when its deadline passes first.

use crate::error::{CoordinationError, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

/// Lifecycle of an approval request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

/// Verdict of a single approver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalDecision {
    Approved,
    Rejected,
}

/// One recorded verdict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalResponse {
    pub approver: String,
    pub decision: ApprovalDecision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub responded_at: DateTime<Utc>,
}

/// A request for human sign-off
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    pub approval_id: String,
    /// What is being approved, usually `<operation>/<gate>`
    pub subject: String,
    pub description: String,
    pub status: ApprovalStatus,
    pub responses: Vec<ApprovalResponse>,
    pub minimum_approvals: u32,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_decision: Option<ApprovalDecision>,
    pub created_at: DateTime<Utc>,
}

impl ApprovalRequest {
    /// Whether the request reached a final status
    pub fn is_completed(&self) -> bool {
        self.status != ApprovalStatus::Pending
    }

    /// When the request reached its final status
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        match self.status {
            ApprovalStatus::Pending => None,
            ApprovalStatus::Expired => Some(self.expires_at),
            ApprovalStatus::Approved | ApprovalStatus::Rejected => {
                self.responses.last().map(|r| r.responded_at)
            }
        }
    }

    fn approvals(&self) -> u32 {
        self.responses
            .iter()
            .filter(|r| r.decision == ApprovalDecision::Approved)
            .count() as u32
    }

    fn refresh(&mut self, now: DateTime<Utc>) {
        if self.status == ApprovalStatus::Pending && now >= self.expires_at {
            self.status = ApprovalStatus::Expired;
            info!("Approval {} expired", self.approval_id);
        }
    }
}

/// Parameters of a new approval request
#[derive(Debug, Clone)]
pub struct NewApproval {
    pub subject: String,
    pub description: String,
    pub minimum_approvals: u32,
    pub timeout: Duration,
}

/// Source of approval decisions
pub trait ApprovalWorkflow: Send + Sync {
    /// Open a new pending request
    fn request_approval(&self, request: NewApproval) -> Result<ApprovalRequest>;

    /// Current state, with expiry applied
    fn get_status(&self, approval_id: &str) -> Result<ApprovalRequest>;

    /// Record one approver's verdict
    fn submit_response(
        &self,
        approval_id: &str,
        approver: &str,
        decision: ApprovalDecision,
        comment: Option<String>,
    ) -> Result<ApprovalRequest>;

    /// Requests still waiting for responses
    fn pending(&self) -> Vec<ApprovalRequest>;

    /// Forget requests completed before `cutoff`; returns how many were (or would be)
    /// dropped
    fn purge_completed(&self, cutoff: DateTime<Utc>, dry_run: bool) -> usize;
}

/// Process-local approval workflow
#[derive(Debug, Default)]
pub struct InMemoryApprovalWorkflow {
    requests: Mutex<HashMap<String, ApprovalRequest>>,
}

impl InMemoryApprovalWorkflow {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ApprovalWorkflow for InMemoryApprovalWorkflow {
    fn request_approval(&self, request: NewApproval) -> Result<ApprovalRequest> {
        if request.minimum_approvals == 0 {
            return Err(CoordinationError::Validation(
                "minimum_approvals must be at least 1".to_string(),
            ));
        }
        let timeout = chrono::Duration::from_std(request.timeout).map_err(|_| {
            CoordinationError::Validation(format!(
                "approval timeout out of range: {:?}",
                request.timeout
            ))
        })?;

        let now = Utc::now();
        let approval = ApprovalRequest {
            approval_id: format!("approval-{}", uuid::Uuid::new_v4()),
            subject: request.subject,
            description: request.description,
            status: ApprovalStatus::Pending,
            responses: Vec::new(),
            minimum_approvals: request.minimum_approvals,
            expires_at: now + timeout,
            final_decision: None,
            created_at: now,
        };

        info!(
            "Approval {} requested for {} ({} required)",
            approval.approval_id, approval.subject, approval.minimum_approvals
        );
        self.requests
            .lock()
            .insert(approval.approval_id.clone(), approval.clone());
        Ok(approval)
    }

    fn get_status(&self, approval_id: &str) -> Result<ApprovalRequest> {
        let mut requests = self.requests.lock();
        let approval = requests
            .get_mut(approval_id)
            .ok_or_else(|| CoordinationError::not_found("Approval", approval_id))?;
        approval.refresh(Utc::now());
        Ok(approval.clone())
    }

    fn submit_response(
        &self,
        approval_id: &str,
        approver: &str,
        decision: ApprovalDecision,
        comment: Option<String>,
    ) -> Result<ApprovalRequest> {
        if approver.trim().is_empty() {
            return Err(CoordinationError::Validation(
                "approver must not be empty".to_string(),
            ));
        }

        let now = Utc::now();
        let mut requests = self.requests.lock();
        let approval = requests
            .get_mut(approval_id)
            .ok_or_else(|| CoordinationError::not_found("Approval", approval_id))?;
        approval.refresh(now);

        if approval.is_completed() {
            return Err(CoordinationError::Validation(format!(
                "approval {} is already {:?}",
                approval_id, approval.status
            )));
        }

        if approval.responses.iter().any(|r| r.approver == approver) {
            debug!(
                "Ignoring repeated response from {} on {}",
                approver, approval_id
            );
            return Ok(approval.clone());
        }

        approval.responses.push(ApprovalResponse {
            approver: approver.to_string(),
            decision,
            comment,
            responded_at: now,
        });

        match decision {
            ApprovalDecision::Rejected => {
                approval.status = ApprovalStatus::Rejected;
                approval.final_decision = Some(ApprovalDecision::Rejected);
            }
            ApprovalDecision::Approved if approval.approvals() >= approval.minimum_approvals => {
                approval.status = ApprovalStatus::Approved;
                approval.final_decision = Some(ApprovalDecision::Approved);
            }
            ApprovalDecision::Approved => {}
        }

        if approval.is_completed() {
            info!("Approval {} is {:?}", approval_id, approval.status);
        }
        Ok(approval.clone())
    }

    fn pending(&self) -> Vec<ApprovalRequest> {
        let now = Utc::now();
        let mut requests = self.requests.lock();
        let mut pending: Vec<ApprovalRequest> = requests
            .values_mut()
            .filter_map(|approval| {
                approval.refresh(now);
                (!approval.is_completed()).then(|| approval.clone())
            })
            .collect();
        pending.sort_by_key(|a| a.created_at);
        pending
    }

    fn purge_completed(&self, cutoff: DateTime<Utc>, dry_run: bool) -> usize {
        let now = Utc::now();
        let mut requests = self.requests.lock();

        let mut purged = 0;
        requests.retain(|_, approval| {
            approval.refresh(now);
            if approval.completed_at().is_some_and(|at| at < cutoff) {
                purged += 1;
                dry_run
            } else {
                true
            }
        });
        if purged > 0 {
            debug!(
                "{} {} completed approval requests",
                if dry_run { "Would purge" } else { "Purged" },
                purged
            );
        }
        purged
    }
}
