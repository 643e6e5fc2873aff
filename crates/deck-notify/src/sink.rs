use std::sync::mpsc;
use std::sync::Mutex;

use deck_core::config::NotificationConfig;

use crate::error::NotifyError;
use crate::types::{NotificationMessage, NotificationSinkKind};

/// Delivery is best-effort: the dispatcher reports per-sink results and the
/// caller decides whether anyone cares. Nothing here retries.
pub trait NotificationSink: Send + Sync {
    fn kind(&self) -> NotificationSinkKind;
    fn send(&self, message: &NotificationMessage) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, Default)]
pub struct StdoutSink;

impl NotificationSink for StdoutSink {
    fn kind(&self) -> NotificationSinkKind {
        NotificationSinkKind::Stdout
    }

    fn send(&self, message: &NotificationMessage) -> Result<(), NotifyError> {
        println!(
            "[{:?}] {:?} {} | execution={} task={} | {}",
            message.severity,
            message.topic,
            message.title,
            message.execution_id,
            message.task_id,
            message.body
        );
        Ok(())
    }
}

/// In-process channel sink: the host shell holds the receiving end.
///
/// Once the receiver is dropped (host window gone) every send fails with
/// `SinkClosed` and the message is lost, which is the intended behavior.
pub struct ChannelSink {
    tx: Mutex<mpsc::Sender<NotificationMessage>>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<NotificationMessage>) -> Self {
        Self { tx: Mutex::new(tx) }
    }

    /// Build a sink together with the receiver the host shell drains.
    pub fn channel() -> (Self, mpsc::Receiver<NotificationMessage>) {
        let (tx, rx) = mpsc::channel();
        (Self::new(tx), rx)
    }
}

impl NotificationSink for ChannelSink {
    fn kind(&self) -> NotificationSinkKind {
        NotificationSinkKind::Channel
    }

    fn send(&self, message: &NotificationMessage) -> Result<(), NotifyError> {
        self.tx
            .lock()
            .expect("channel sink sender lock")
            .send(message.clone())
            .map_err(|_| NotifyError::SinkClosed {
                sink: "channel".to_string(),
            })
    }
}

pub struct NotificationDispatcher {
    sinks: Vec<Box<dyn NotificationSink>>,
}

impl NotificationDispatcher {
    pub fn new(sinks: Vec<Box<dyn NotificationSink>>) -> Self {
        Self { sinks }
    }

    pub fn from_config(config: &NotificationConfig) -> Self {
        let mut sinks: Vec<Box<dyn NotificationSink>> = Vec::new();
        if config.stdout {
            sinks.push(Box::new(StdoutSink));
        }
        Self { sinks }
    }

    pub fn push_sink(&mut self, sink: Box<dyn NotificationSink>) {
        self.sinks.push(sink);
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn dispatch(
        &self,
        message: &NotificationMessage,
    ) -> Vec<(NotificationSinkKind, Result<(), NotifyError>)> {
        let mut out = Vec::new();
        for sink in &self.sinks {
            out.push((sink.kind(), sink.send(message)));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use deck_core::config::NotificationConfig;
    use deck_core::types::{ExecutionId, TaskId};
    use std::sync::{Arc, Mutex};

    use super::{ChannelSink, NotificationDispatcher, NotificationSink, StdoutSink};
    use crate::error::NotifyError;
    use crate::types::{
        NotificationMessage, NotificationSeverity, NotificationSinkKind, NotificationTopic,
    };

    #[derive(Clone)]
    struct CaptureSink {
        kind: NotificationSinkKind,
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl NotificationSink for CaptureSink {
        fn kind(&self) -> NotificationSinkKind {
            self.kind
        }

        fn send(&self, message: &NotificationMessage) -> Result<(), NotifyError> {
            self.seen
                .lock()
                .expect("capture lock")
                .push(message.title.clone());
            Ok(())
        }
    }

    struct AlwaysFailSink;

    impl NotificationSink for AlwaysFailSink {
        fn kind(&self) -> NotificationSinkKind {
            NotificationSinkKind::Channel
        }

        fn send(&self, _message: &NotificationMessage) -> Result<(), NotifyError> {
            Err(NotifyError::SinkFailed {
                message: "fail".to_string(),
            })
        }
    }

    fn mk_message() -> NotificationMessage {
        NotificationMessage {
            at: Utc::now(),
            topic: NotificationTopic::ExecutionCompleted,
            severity: NotificationSeverity::Info,
            title: "execution completed".to_string(),
            body: "details".to_string(),
            execution_id: ExecutionId::new("X1"),
            task_id: TaskId::new("T1"),
            record: None,
        }
    }

    #[test]
    fn dispatch_fans_out_and_returns_per_sink_results() {
        let seen = Arc::new(Mutex::new(Vec::<String>::new()));
        let dispatcher = NotificationDispatcher::new(vec![
            Box::new(CaptureSink {
                kind: NotificationSinkKind::Stdout,
                seen: seen.clone(),
            }),
            Box::new(AlwaysFailSink),
        ]);

        let results = dispatcher.dispatch(&mk_message());
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, NotificationSinkKind::Stdout);
        assert!(results[0].1.is_ok());
        assert_eq!(results[1].0, NotificationSinkKind::Channel);
        assert!(results[1].1.is_err());

        let captured = seen.lock().expect("capture lock");
        assert_eq!(captured.as_slice(), ["execution completed"]);
    }

    #[test]
    fn channel_sink_delivers_while_receiver_is_alive() {
        let (sink, rx) = ChannelSink::channel();
        sink.send(&mk_message()).expect("send with live receiver");
        let received = rx.try_recv().expect("message waiting");
        assert_eq!(received.title, "execution completed");
    }

    #[test]
    fn channel_sink_fails_closed_once_receiver_is_dropped() {
        let (sink, rx) = ChannelSink::channel();
        drop(rx);
        let err = sink
            .send(&mk_message())
            .expect_err("send to dead receiver must fail");
        assert!(matches!(err, NotifyError::SinkClosed { sink } if sink == "channel"));
    }

    #[test]
    fn from_config_builds_stdout_sink_when_enabled() {
        let dispatcher = NotificationDispatcher::from_config(&NotificationConfig { stdout: true });
        assert!(!dispatcher.is_empty());
        let results = dispatcher.dispatch(&mk_message());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, NotificationSinkKind::Stdout);
        assert!(results[0].1.is_ok());
    }

    #[test]
    fn from_config_with_stdout_disabled_dispatches_to_none() {
        let dispatcher =
            NotificationDispatcher::from_config(&NotificationConfig { stdout: false });
        assert!(dispatcher.is_empty());
        assert!(dispatcher.dispatch(&mk_message()).is_empty());
    }

    #[test]
    fn stdout_sink_reports_success() {
        let dispatcher = NotificationDispatcher::new(vec![Box::new(StdoutSink)]);
        let results = dispatcher.dispatch(&mk_message());
        assert_eq!(results.len(), 1);
        assert!(results[0].1.is_ok());
    }
}
