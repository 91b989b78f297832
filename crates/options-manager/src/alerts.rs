//! Alert fan-out to notification channels.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use wheel_core::{Alert, AlertPriority, ChannelKind, LogChannel, NotificationChannel};

/// Alerts kept for the dashboard.
const HISTORY: usize = 50;

/// Routes alerts to every channel their priority escalates to.
///
/// Sends run on a spawned task so a slow channel never holds up a pass.
pub struct AlertDispatcher {
    channels: Vec<Arc<dyn NotificationChannel>>,
    history: Mutex<VecDeque<Alert>>,
}

impl AlertDispatcher {
    pub fn new(channels: Vec<Arc<dyn NotificationChannel>>) -> Self {
        let critical = Self::reach(&channels, AlertPriority::Critical);
        if critical < 2 {
            warn!(
                channels = critical,
                "Critical alerts reach fewer than two channels"
            );
        }
        Self {
            channels,
            history: Mutex::new(VecDeque::with_capacity(HISTORY)),
        }
    }

    /// One tracing-backed channel per medium.
    pub fn logging() -> Self {
        let channels: Vec<Arc<dyn NotificationChannel>> = [ChannelKind::Push, ChannelKind::Email, ChannelKind::Sms]
            .into_iter()
            .map(|kind| Arc::new(LogChannel::new(kind)) as Arc<dyn NotificationChannel>)
            .collect();
        Self::new(channels)
    }

    fn reach(channels: &[Arc<dyn NotificationChannel>], priority: AlertPriority) -> usize {
        let kinds = ChannelKind::escalation(priority);
        channels.iter().filter(|c| kinds.contains(&c.kind())).count()
    }

    /// Number of configured channels an alert of `priority` goes to.
    pub fn channel_count(&self, priority: AlertPriority) -> usize {
        Self::reach(&self.channels, priority)
    }

    /// Sends `alert` in the background. The handle is only needed by callers
    /// that must observe delivery.
    pub fn dispatch(&self, alert: Alert) -> JoinHandle<()> {
        {
            let mut history = self.history.lock();
            if history.len() == HISTORY {
                history.pop_front();
            }
            history.push_back(alert.clone());
        }

        let kinds = ChannelKind::escalation(alert.priority);
        let targets: Vec<Arc<dyn NotificationChannel>> = self
            .channels
            .iter()
            .filter(|c| kinds.contains(&c.kind()))
            .cloned()
            .collect();

        tokio::spawn(async move {
            let alert = &alert;
            let sends = targets
                .iter()
                .map(|c| async move { (c.kind(), c.send(alert).await) });
            for (kind, result) in join_all(sends).await {
                match result {
                    Ok(()) => debug!(channel = ?kind, title = %alert.title, "Alert delivered"),
                    Err(e) => warn!(channel = ?kind, title = %alert.title, error = %e, "Alert delivery failed"),
                }
            }
        })
    }

    /// Most recent alerts, newest last.
    pub fn recent(&self, n: usize) -> Vec<Alert> {
        let history = self.history.lock();
        history.iter().skip(history.len().saturating_sub(n)).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        kind: ChannelKind,
        sent: AtomicUsize,
        fail: bool,
    }

    impl Counting {
        fn new(kind: ChannelKind, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                kind,
                sent: AtomicUsize::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl NotificationChannel for Counting {
        fn kind(&self) -> ChannelKind {
            self.kind
        }

        async fn send(&self, _alert: &Alert) -> anyhow::Result<()> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("gateway down");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn routes_by_escalation() {
        let push = Counting::new(ChannelKind::Push, false);
        let email = Counting::new(ChannelKind::Email, false);
        let sms = Counting::new(ChannelKind::Sms, true);
        let channels: Vec<Arc<dyn NotificationChannel>> = vec![
            push.clone() as Arc<dyn NotificationChannel>,
            email.clone() as Arc<dyn NotificationChannel>,
            sms.clone() as Arc<dyn NotificationChannel>,
        ];
        let dispatcher = AlertDispatcher::new(channels);

        dispatcher.dispatch(Alert::info("scan", "3 opportunities")).await.unwrap();
        dispatcher.dispatch(Alert::important("roll", "AAPL 21 DTE")).await.unwrap();
        // SMS failure does not stop email and push
        dispatcher.dispatch(Alert::critical("breaker", "tripped")).await.unwrap();

        assert_eq!(push.sent.load(Ordering::SeqCst), 3);
        assert_eq!(email.sent.load(Ordering::SeqCst), 2);
        assert_eq!(sms.sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let dispatcher = AlertDispatcher::new(Vec::new());
        for i in 0..60 {
            dispatcher.dispatch(Alert::info("n", i.to_string())).await.unwrap();
        }
        let recent = dispatcher.recent(100);
        assert_eq!(recent.len(), HISTORY);
        assert_eq!(recent.last().unwrap().message, "59");
        assert_eq!(dispatcher.recent(2).len(), 2);
    }

    #[test]
    fn logging_dispatcher_covers_critical_twice_over() {
        let dispatcher = AlertDispatcher::logging();
        assert_eq!(dispatcher.channel_count(AlertPriority::Critical), 3);
        assert_eq!(dispatcher.channel_count(AlertPriority::Info), 1);
    }
}
