use chrono::{DateTime, Utc};
use serde::Serialize;
use statlab_core::TrialPhase;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Mutex;
use tracing::debug;

/// One state transition, as published to subscribers while an experiment
/// runs. Experiment-level transitions carry no trial number.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub experiment_id: String,
    pub trial_number: Option<u32>,
    pub phase: TrialPhase,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Fan-out channel for progress events. Subscribers come and go while the
/// experiment runs; a receiver that was dropped is pruned on the next
/// publish instead of blocking the run.
#[derive(Default)]
pub struct ProgressTracker {
    subscribers: Mutex<Vec<Sender<ProgressEvent>>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<ProgressEvent> {
        let (tx, rx) = channel();
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(tx);
        }
        rx
    }

    pub fn publish(&self, experiment_id: &str, trial_number: Option<u32>, phase: TrialPhase, message: impl Into<String>) {
        let event = ProgressEvent {
            experiment_id: experiment_id.to_string(),
            trial_number,
            phase,
            message: message.into(),
            timestamp: Utc::now(),
        };
        debug!(
            target: "experiment",
            experiment = %event.experiment_id,
            trial = ?event.trial_number,
            phase = event.phase.as_str(),
            "{}",
            event.message
        );
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_reach_every_live_subscriber() {
        let tracker = ProgressTracker::new();
        let rx1 = tracker.subscribe();
        let rx2 = tracker.subscribe();
        tracker.publish("exp_1", Some(1), TrialPhase::Preparing, "trial 1 starting");
        let e1 = rx1.try_recv().expect("first subscriber");
        let e2 = rx2.try_recv().expect("second subscriber");
        assert_eq!(e1.experiment_id, "exp_1");
        assert_eq!(e1.trial_number, Some(1));
        assert_eq!(e2.phase, TrialPhase::Preparing);
    }

    #[test]
    fn dropped_subscribers_are_pruned_on_publish() {
        let tracker = ProgressTracker::new();
        let rx_keep = tracker.subscribe();
        {
            let _rx_drop = tracker.subscribe();
        }
        assert_eq!(tracker.subscriber_count(), 2);
        tracker.publish("exp_1", None, TrialPhase::Succeeded, "done");
        assert_eq!(tracker.subscriber_count(), 1);
        assert!(rx_keep.try_recv().is_ok());
    }

    #[test]
    fn publish_without_subscribers_is_a_no_op() {
        let tracker = ProgressTracker::new();
        tracker.publish("exp_1", None, TrialPhase::Failed, "no one listening");
    }
}
