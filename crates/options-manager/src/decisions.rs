//! Daily decision budget.
//!
//! Caps how many decisions may be *executed* per trading day. Recording a
//! decision as pending always succeeds; marking one executed is refused once
//! the cap is reached. Rolling to a new day clears the log.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::error::BudgetExceeded;
use crate::types::{Adjustment, Decision, DecisionAction, DecisionPriority, DecisionStatus, ExecutionResult};

/// Decisions kept in the summary's recent list.
const RECENT: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecisionError {
    #[error(transparent)]
    BudgetExceeded(#[from] BudgetExceeded),

    #[error("decision {0} not found for today")]
    Unknown(u64),

    #[error("decision {0} was already executed")]
    AlreadyExecuted(u64),
}

/// What a decision is about, before it has an id.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionDraft {
    pub symbol: String,
    pub subject: String,
    pub action: DecisionAction,
    pub priority: DecisionPriority,
    pub reason: String,
}

impl From<&Adjustment> for DecisionDraft {
    fn from(adj: &Adjustment) -> Self {
        Self {
            symbol: adj.position.symbol.clone(),
            subject: adj.position.label(),
            action: adj.action,
            priority: adj.priority,
            reason: adj.reason.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionSummary {
    pub date: NaiveDate,
    pub total_made: usize,
    pub executed: usize,
    pub pending: usize,
    pub remaining: usize,
    pub max_daily: usize,
    pub recent: Vec<Decision>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionBreakdown {
    pub by_action: BTreeMap<DecisionAction, usize>,
    pub by_priority: BTreeMap<DecisionPriority, usize>,
    pub by_result: BTreeMap<ExecutionResult, usize>,
}

#[derive(Debug, Clone)]
pub struct DecisionCounter {
    max_daily: usize,
    day: NaiveDate,
    decisions: Vec<Decision>,
    next_id: u64,
}

impl DecisionCounter {
    pub fn new(max_daily: usize, today: NaiveDate) -> Self {
        Self {
            max_daily,
            day: today,
            decisions: Vec::new(),
            next_id: 1,
        }
    }

    /// Applies a reloaded cap. Decisions already executed today still count.
    pub fn set_max_daily(&mut self, max_daily: usize) {
        self.max_daily = max_daily;
    }

    /// Clears the log when `today` is a new day.
    pub fn roll_day(&mut self, today: NaiveDate) {
        if today != self.day {
            info!(
                previous = %self.day,
                executed = self.executed_count(),
                "Decision budget reset for new day"
            );
            self.day = today;
            self.decisions.clear();
        }
    }

    pub fn executed_count(&self) -> usize {
        self.decisions.iter().filter(|d| d.is_executed()).count()
    }

    pub fn remaining(&mut self, today: NaiveDate) -> usize {
        self.roll_day(today);
        self.max_daily.saturating_sub(self.executed_count())
    }

    pub fn can_make_decision(&mut self, today: NaiveDate) -> bool {
        self.remaining(today) > 0
    }

    /// Records a pending decision and returns its id.
    pub fn record(&mut self, draft: DecisionDraft, now: DateTime<Utc>, today: NaiveDate) -> u64 {
        self.roll_day(today);
        let id = self.next_id;
        self.next_id += 1;
        info!(
            id,
            symbol = %draft.symbol,
            subject = %draft.subject,
            action = %draft.action,
            priority = %draft.priority,
            reason = %draft.reason,
            "Decision recorded"
        );
        self.decisions.push(Decision {
            id,
            timestamp: now,
            symbol: draft.symbol,
            subject: draft.subject,
            action: draft.action,
            reason: draft.reason,
            priority: draft.priority,
            status: DecisionStatus::Pending,
            notes: Vec::new(),
        });
        id
    }

    /// Transitions a pending decision to executed.
    ///
    /// # Errors
    ///
    /// `BudgetExceeded` once today's cap is used up, `Unknown` for an id not
    /// recorded today, `AlreadyExecuted` if the decision is terminal.
    pub fn mark_executed(
        &mut self,
        id: u64,
        result: ExecutionResult,
        note: Option<String>,
        now: DateTime<Utc>,
        today: NaiveDate,
    ) -> Result<(), DecisionError> {
        self.roll_day(today);
        let executed = self.executed_count();
        let max = self.max_daily;

        let decision = self
            .decisions
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or(DecisionError::Unknown(id))?;
        if decision.is_executed() {
            return Err(DecisionError::AlreadyExecuted(id));
        }
        if executed >= max {
            info!(id, executed, max, "Decision limit reached, execution refused");
            return Err(BudgetExceeded { executed, max }.into());
        }

        decision.status = DecisionStatus::Executed { result, at: now };
        if let Some(note) = note {
            decision.notes.push(note);
        }
        info!(id, %result, executed = executed + 1, max, "Decision executed");
        Ok(())
    }

    /// Appends a note without changing status.
    pub fn annotate(&mut self, id: u64, note: impl Into<String>) {
        if let Some(d) = self.decisions.iter_mut().find(|d| d.id == id) {
            d.notes.push(note.into());
        }
    }

    pub fn decisions(&self) -> &[Decision] {
        &self.decisions
    }

    /// Today's most recent decision to take `action` on `subject`.
    pub fn latest_for(&self, subject: &str, action: DecisionAction) -> Option<&Decision> {
        self.decisions
            .iter()
            .rev()
            .find(|d| d.subject == subject && d.action == action)
    }

    pub fn summary(&self) -> DecisionSummary {
        let executed = self.executed_count();
        let start = self.decisions.len().saturating_sub(RECENT);
        DecisionSummary {
            date: self.day,
            total_made: self.decisions.len(),
            executed,
            pending: self.decisions.len() - executed,
            remaining: self.max_daily.saturating_sub(executed),
            max_daily: self.max_daily,
            recent: self.decisions[start..].to_vec(),
        }
    }

    pub fn breakdown(&self) -> DecisionBreakdown {
        let mut out = DecisionBreakdown::default();
        for d in &self.decisions {
            *out.by_action.entry(d.action).or_default() += 1;
            *out.by_priority.entry(d.priority).or_default() += 1;
            if let Some(result) = d.result() {
                *out.by_result.entry(result).or_default() += 1;
            }
        }
        out
    }
}
