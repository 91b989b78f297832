//! Error types shared by the gateways and the engine.

use thiserror::Error;

/// A collaborator could not supply data a rule depends on.
///
/// Callers treat this as "cannot approve": no rule silently falls back to a
/// synthetic value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{what} unavailable{}: {reason}", subject_suffix(.subject))]
pub struct DataUnavailable {
    /// Which datum was requested (e.g. "quote", "option chain").
    pub what: String,
    /// Symbol or contract the request was about, if any.
    pub subject: Option<String>,
    /// Provider-side explanation.
    pub reason: String,
}

impl DataUnavailable {
    pub fn new(what: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            what: what.into(),
            subject: None,
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn for_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}

fn subject_suffix(subject: &Option<String>) -> String {
    subject.as_ref().map(|s| format!(" for {s}")).unwrap_or_default()
}

/// Errors returned by the brokerage gateway.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// Broker could not be reached or returned no data.
    #[error(transparent)]
    Unavailable(#[from] DataUnavailable),

    /// Broker refused the order.
    #[error("order rejected: {0}")]
    Rejected(String),

    /// Order handle is not known to the broker.
    #[error("unknown order {0}")]
    UnknownOrder(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_subject_when_present() {
        let err = DataUnavailable::new("quote", "timeout").for_subject("AAPL");
        assert_eq!(err.to_string(), "quote unavailable for AAPL: timeout");

        let err = DataUnavailable::new("account summary", "disconnected");
        assert_eq!(err.to_string(), "account summary unavailable: disconnected");
    }

    #[test]
    fn broker_error_wraps_data_unavailable() {
        let err: BrokerError = DataUnavailable::new("positions", "gateway down").into();
        assert!(matches!(err, BrokerError::Unavailable(_)));
        assert_eq!(err.to_string(), "positions unavailable: gateway down");
    }
}
