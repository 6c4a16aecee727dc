// Telemetry client - supervised worker session with ordered event delivery
use crate::application::telemetry_consumer::TelemetryConsumer;
use crate::domain::command::{Command, GainCommand};
use crate::domain::error::LinkError;
use crate::domain::link::{FaultKind, LinkEvent, ProcessState};
use crate::domain::telemetry::TelemetryRecord;
use crate::domain::window::WindowBuffer;
use crate::infrastructure::command_channel;
use crate::infrastructure::config::Settings;
use crate::infrastructure::process_supervisor::{
    EventSender, LaunchSpec, ProcessHandle, ProcessSupervisor, StateCell,
};
use crate::infrastructure::stream_reader::TelemetryStreamReader;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

type Consumers = Arc<RwLock<Vec<Arc<dyn TelemetryConsumer>>>>;

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub launch: LaunchSpec,
    pub window_seconds: f64,
    pub start_timeout: Duration,
    pub stop_timeout: Duration,
    pub read_idle_timeout: Option<Duration>,
    pub reset_delay: Duration,
}

impl ClientOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            launch: settings.worker.launch_spec(),
            window_seconds: settings.window.seconds,
            start_timeout: settings.worker.start_timeout(),
            stop_timeout: settings.worker.stop_timeout(),
            read_idle_timeout: settings.worker.read_idle_timeout(),
            reset_delay: Duration::from_millis(settings.session.reset_delay_ms),
        }
    }
}

struct Session {
    handle: ProcessHandle,
    events: EventSender,
    reader: Option<JoinHandle<()>>,
    dispatcher: JoinHandle<()>,
    started_at: DateTime<Utc>,
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(reader) = &self.reader {
            reader.abort();
        }
        self.dispatcher.abort();
    }
}

pub struct TelemetryClient {
    supervisor: ProcessSupervisor,
    launch: LaunchSpec,
    read_idle_timeout: Option<Duration>,
    reset_delay: Duration,
    state: StateCell,
    window: Arc<Mutex<WindowBuffer>>,
    consumers: Consumers,
    session: tokio::sync::Mutex<Option<Session>>,
}

impl TelemetryClient {
    pub fn new(options: ClientOptions) -> Self {
        Self {
            supervisor: ProcessSupervisor::new(options.start_timeout, options.stop_timeout),
            launch: options.launch,
            read_idle_timeout: options.read_idle_timeout,
            reset_delay: options.reset_delay,
            state: StateCell::default(),
            window: Arc::new(Mutex::new(WindowBuffer::new(options.window_seconds))),
            consumers: Arc::new(RwLock::new(Vec::new())),
            session: tokio::sync::Mutex::new(None),
        }
    }

    pub fn subscribe(&self, consumer: Arc<dyn TelemetryConsumer>) {
        self.consumers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(consumer);
    }

    pub fn state(&self) -> ProcessState {
        self.state.get()
    }

    /// Starts the worker unless one is already running.
    ///
    /// The only call that blocks, bounded by the per-candidate start timeout.
    /// A startup failure is returned and also published to consumers.
    pub async fn start(&self) -> Result<(), LinkError> {
        let mut session = self.session.lock().await;
        if let Some(current) = session.as_ref() {
            if current.handle.state() == ProcessState::Running {
                tracing::warn!(program = current.handle.program(), "worker already running");
                return Ok(());
            }
        }
        if let Some(mut stale) = session.take() {
            self.shutdown(&mut stale).await;
        }

        let (events, inbox) = mpsc::unbounded_channel();
        let mut handle = match self
            .supervisor
            .start(&self.launch, &self.state, events.clone())
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                notify_consumers(&self.consumers, FaultKind::FailedToStart, &e.to_string()).await;
                return Err(e);
            }
        };

        let dispatcher = tokio::spawn(dispatch(
            inbox,
            self.window.clone(),
            self.consumers.clone(),
            self.state.clone(),
        ));
        let reader = handle.take_stdout().map(|stdout| {
            let reader = TelemetryStreamReader::new(stdout, self.read_idle_timeout);
            tokio::spawn(reader.run(events.clone()))
        });

        *session = Some(Session {
            handle,
            events,
            reader,
            dispatcher,
            started_at: Utc::now(),
        });
        Ok(())
    }

    /// Stops the session. Safe in any state; once this returns no further
    /// events are delivered and the worker is gone.
    pub async fn stop(&self) {
        let mut session = self.session.lock().await;
        match session.take() {
            Some(mut current) => self.shutdown(&mut current).await,
            None => {
                tracing::debug!("stop requested without an active session");
                self.state.set(ProcessState::Stopped);
            }
        }
    }

    /// Stop, clear the window, wait the reset delay, start again.
    pub async fn reset(&self) -> Result<(), LinkError> {
        self.stop().await;
        self.clear_window();
        tokio::time::sleep(self.reset_delay).await;
        self.start().await
    }

    /// Queues a command for the worker. Never waits on the worker's stdin.
    pub async fn send(&self, command: &Command) -> Result<(), LinkError> {
        let session = self.session.lock().await;
        let Some(current) = session.as_ref() else {
            tracing::warn!(command = command.name(), "cannot send command: no active session");
            return Err(LinkError::NotRunning);
        };
        command_channel::send(&current.handle, command, &current.events)
    }

    pub async fn send_gains(&self, kp: f64, ki: f64, kd: f64) -> Result<(), LinkError> {
        let gains = GainCommand::new(kp, ki, kd)?;
        self.send(&Command::Gains(gains)).await
    }

    pub async fn started_at(&self) -> Option<DateTime<Utc>> {
        self.session.lock().await.as_ref().map(|s| s.started_at)
    }

    /// Runs `f` against the window under its lock; keep it short.
    pub fn with_window<R>(&self, f: impl FnOnce(&WindowBuffer) -> R) -> R {
        f(&lock_window(&self.window))
    }

    pub fn snapshot(&self) -> Vec<TelemetryRecord> {
        self.with_window(WindowBuffer::snapshot)
    }

    pub fn clear_window(&self) {
        lock_window(&self.window).clear();
    }

    async fn shutdown(&self, session: &mut Session) {
        // Silence delivery first so nothing reaches consumers after stop.
        session.dispatcher.abort();
        if let Some(reader) = session.reader.take() {
            reader.abort();
            let _ = reader.await;
        }
        let _ = (&mut session.dispatcher).await;
        self.supervisor.stop(&mut session.handle).await;
    }
}

fn lock_window(window: &Mutex<WindowBuffer>) -> MutexGuard<'_, WindowBuffer> {
    window.lock().unwrap_or_else(PoisonError::into_inner)
}

fn current_consumers(consumers: &Consumers) -> Vec<Arc<dyn TelemetryConsumer>> {
    consumers
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

async fn notify_consumers(consumers: &Consumers, kind: FaultKind, message: &str) {
    for consumer in current_consumers(consumers) {
        consumer.on_error(kind, message).await;
    }
}

/// The single writer of the window and the only caller of consumers, so
/// records and faults come out in the order producers queued them.
async fn dispatch(
    mut inbox: mpsc::UnboundedReceiver<LinkEvent>,
    window: Arc<Mutex<WindowBuffer>>,
    consumers: Consumers,
    state: StateCell,
) {
    while let Some(event) = inbox.recv().await {
        match event {
            LinkEvent::Telemetry(record) => {
                lock_window(&window).insert(record);
                for consumer in current_consumers(&consumers) {
                    consumer.on_telemetry(&record).await;
                }
            }
            LinkEvent::Fault { kind, message } => {
                tracing::error!(%kind, %message, "worker fault");
                if kind.is_terminal() {
                    state.set(ProcessState::Failed);
                }
                notify_consumers(&consumers, kind, &message).await;
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::application::telemetry_consumer::BroadcastConsumer;
    use crate::infrastructure::process_supervisor::{DEFAULT_START_TIMEOUT, DEFAULT_STOP_TIMEOUT};
    use tokio::sync::broadcast;
    use tokio::time::timeout;

    const RECORDS_THEN_WAIT: &str = r#"printf '%s\n' '{"pressure":100,"valve_angle":10,"motor_current":2,"setpoint":500,"timestamp":0.1}' '{invalid json}' '{"pressure":110,"valve_angle":11,"motor_current":2.1,"setpoint":500,"timestamp":0.2}'; sleep 30"#;

    const GAIN_ECHO: &str = r#"while IFS= read -r line; do if [ "$line" = '{"Kp":150,"Ki":50,"Kd":60}' ]; then echo '{"pressure":1,"valve_angle":2,"motor_current":3,"setpoint":4,"timestamp":0.5}'; fi; done"#;

    fn options(candidates: &[&str], args: &[&str]) -> ClientOptions {
        ClientOptions {
            launch: LaunchSpec::new(
                candidates.iter().map(|s| s.to_string()).collect(),
                args.iter().map(|s| s.to_string()).collect(),
            ),
            window_seconds: 15.0,
            start_timeout: DEFAULT_START_TIMEOUT,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            read_idle_timeout: None,
            reset_delay: Duration::from_millis(10),
        }
    }

    fn client_with_events(
        candidates: &[&str],
        args: &[&str],
    ) -> (TelemetryClient, broadcast::Receiver<LinkEvent>) {
        let client = TelemetryClient::new(options(candidates, args));
        let consumer = Arc::new(BroadcastConsumer::new(64));
        let rx = consumer.subscribe();
        client.subscribe(consumer);
        (client, rx)
    }

    async fn next_event(rx: &mut broadcast::Receiver<LinkEvent>) -> LinkEvent {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no event in time")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn test_records_flow_in_order_and_fill_window() {
        let (client, mut rx) = client_with_events(&["sh"], &["-c", RECORDS_THEN_WAIT]);
        client.start().await.unwrap();
        assert_eq!(client.state(), ProcessState::Running);

        let first = next_event(&mut rx).await;
        let second = next_event(&mut rx).await;
        let timestamps: Vec<f64> = [first, second]
            .into_iter()
            .map(|e| match e {
                LinkEvent::Telemetry(r) => r.timestamp,
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        assert_eq!(timestamps, vec![0.1, 0.2]);

        let window: Vec<f64> = client.snapshot().iter().map(|r| r.timestamp).collect();
        assert_eq!(window, vec![0.1, 0.2]);
        assert!(client.started_at().await.is_some());

        client.stop().await;
        assert_eq!(client.state(), ProcessState::Stopped);
    }

    #[tokio::test]
    async fn test_first_resolvable_candidate_is_used() {
        let (client, _rx) = client_with_events(&["pressure-link-no-such-exe", "cat"], &[]);
        client.start().await.unwrap();
        assert_eq!(client.state(), ProcessState::Running);
        client.stop().await;
    }

    #[tokio::test]
    async fn test_startup_failure_is_returned_and_published() {
        let (client, mut rx) =
            client_with_events(&["pressure-link-missing-a", "pressure-link-missing-b"], &[]);

        let result = client.start().await;
        assert!(matches!(result, Err(LinkError::StartupFailure { .. })));
        assert_eq!(client.state(), ProcessState::Failed);

        match next_event(&mut rx).await {
            LinkEvent::Fault { kind, message } => {
                assert_eq!(kind, FaultKind::FailedToStart);
                assert!(message.contains("pressure-link-missing-b"), "{message}");
            }
            other => panic!("expected fault, got {other:?}"),
        }

        client.stop().await;
        assert_eq!(client.state(), ProcessState::Stopped);
    }

    #[tokio::test]
    async fn test_gains_written_to_worker_exactly() {
        let (client, mut rx) = client_with_events(&["sh"], &["-c", GAIN_ECHO]);
        client.start().await.unwrap();

        client.send_gains(150.0, 50.0, 60.0).await.unwrap();

        match next_event(&mut rx).await {
            LinkEvent::Telemetry(record) => assert_eq!(record.timestamp, 0.5),
            other => panic!("expected telemetry, got {other:?}"),
        }
        client.stop().await;
    }

    #[tokio::test]
    async fn test_send_without_running_worker_is_rejected() {
        let (client, _rx) = client_with_events(&["cat"], &[]);
        assert!(matches!(
            client.send(&Command::Start).await,
            Err(LinkError::NotRunning)
        ));

        client.start().await.unwrap();
        client.stop().await;
        assert!(matches!(
            client.send_gains(1.0, 2.0, 3.0).await,
            Err(LinkError::NotRunning)
        ));
    }

    #[tokio::test]
    async fn test_negative_gain_is_rejected() {
        let (client, _rx) = client_with_events(&["cat"], &[]);
        client.start().await.unwrap();
        assert!(matches!(
            client.send_gains(-1.0, 2.0, 3.0).await,
            Err(LinkError::InvalidCommand(_))
        ));
        assert_eq!(client.state(), ProcessState::Running);
        client.stop().await;
    }

    #[tokio::test]
    async fn test_stop_twice_matches_stop_once() {
        let (client, mut rx) = client_with_events(&["cat"], &[]);
        client.start().await.unwrap();

        client.stop().await;
        client.stop().await;

        assert_eq!(client.state(), ProcessState::Stopped);
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_stop_completes_while_worker_ignores_stdin() {
        let (client, _rx) = client_with_events(&["sleep"], &["30"]);
        let client = Arc::new(client);
        client.start().await.unwrap();

        // Far more than a pipe buffer holds; none of it may block the caller.
        let burst = timeout(Duration::from_secs(2), async {
            for _ in 0..5_000 {
                client.send_gains(150.0, 50.0, 60.0).await.unwrap();
            }
        })
        .await;
        assert!(burst.is_ok(), "send blocked on a full stdin pipe");

        let sender = tokio::spawn({
            let client = client.clone();
            async move {
                while client.send_gains(150.0, 50.0, 60.0).await.is_ok() {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            }
        });
        tokio::time::sleep(Duration::from_millis(500)).await;

        let stopped = timeout(DEFAULT_STOP_TIMEOUT, client.stop()).await;
        assert!(stopped.is_ok(), "stop hung behind a blocked writer");
        assert_eq!(client.state(), ProcessState::Stopped);

        timeout(Duration::from_secs(1), sender)
            .await
            .expect("sender kept running after stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_stop_before_start_is_a_no_op() {
        let (client, _rx) = client_with_events(&["cat"], &[]);
        client.stop().await;
        assert_eq!(client.state(), ProcessState::Stopped);
    }

    #[tokio::test]
    async fn test_crash_is_published_and_marks_failed() {
        let (client, mut rx) = client_with_events(&["sh"], &["-c", "exit 3"]);
        client.start().await.unwrap();

        match next_event(&mut rx).await {
            LinkEvent::Fault { kind, .. } => assert_eq!(kind, FaultKind::Crashed),
            other => panic!("expected crash, got {other:?}"),
        }
        assert_eq!(client.state(), ProcessState::Failed);
        assert!(matches!(
            client.send(&Command::Stop).await,
            Err(LinkError::NotRunning)
        ));

        // a failed session can be restarted explicitly
        client.start().await.unwrap();
        client.stop().await;
    }

    #[tokio::test]
    async fn test_start_while_running_keeps_session() {
        let (client, _rx) = client_with_events(&["cat"], &[]);
        client.start().await.unwrap();
        let started = client.started_at().await;

        client.start().await.unwrap();
        assert_eq!(client.started_at().await, started);
        client.stop().await;
    }

    #[tokio::test]
    async fn test_reset_clears_window_and_restarts() {
        let (client, mut rx) = client_with_events(&["sh"], &["-c", RECORDS_THEN_WAIT]);
        client.start().await.unwrap();
        next_event(&mut rx).await;
        next_event(&mut rx).await;
        assert_eq!(client.snapshot().len(), 2);

        client.stop().await;
        client.clear_window();
        assert!(client.snapshot().is_empty());

        client.reset().await.unwrap();
        assert_eq!(client.state(), ProcessState::Running);
        client.stop().await;
    }
}
