// Command channel - fire-and-forget writes to the worker's stdin
use crate::domain::command::Command;
use crate::domain::error::LinkError;
use crate::domain::link::{FaultKind, LinkEvent, ProcessState};
use crate::infrastructure::process_supervisor::{EventSender, ProcessHandle};
use crate::infrastructure::wire_codec::encode_command;
use bytes::Bytes;

/// Encodes `command` and queues it for the worker as one write.
///
/// Rejected with `NotRunning` before any I/O unless the handle is running.
/// Never waits on the pipe: a write that fails later is reported as a
/// `WriteError` fault by the stdin writer. No acknowledgement is awaited;
/// the effect shows up in later telemetry.
pub fn send(
    handle: &ProcessHandle,
    command: &Command,
    events: &EventSender,
) -> Result<(), LinkError> {
    let state = handle.state();
    if state != ProcessState::Running {
        tracing::warn!(command = command.name(), %state, "cannot send command: worker not running");
        return Err(LinkError::NotRunning);
    }

    command.validate()?;
    let bytes = encode_command(command).map_err(|e| LinkError::InvalidCommand(e.to_string()))?;

    let payload = Bytes::from(bytes);
    if let Err(e) = handle.enqueue(payload.clone()) {
        tracing::error!(command = command.name(), error = %e, "write to worker failed");
        handle.mark_failed();
        let _ = events.send(LinkEvent::fault(FaultKind::WriteError, e.to_string()));
        return Err(LinkError::WriteError(e));
    }

    tracing::debug!(
        command = command.name(),
        payload = %String::from_utf8_lossy(&payload).trim_end(),
        "queued command"
    );
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::domain::command::GainCommand;
    use crate::infrastructure::process_supervisor::{
        LaunchSpec, ProcessSupervisor, StateCell, DEFAULT_START_TIMEOUT, DEFAULT_STOP_TIMEOUT,
    };
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn echo_worker() -> LaunchSpec {
        LaunchSpec::new(vec!["cat".to_string()], Vec::new())
    }

    #[tokio::test]
    async fn test_gains_reach_stdin_byte_exact() {
        let supervisor = ProcessSupervisor::new(DEFAULT_START_TIMEOUT, DEFAULT_STOP_TIMEOUT);
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut handle = supervisor
            .start(&echo_worker(), &StateCell::default(), tx.clone())
            .await
            .unwrap();
        let mut echoed = BufReader::new(handle.take_stdout().unwrap());

        let gains = GainCommand::new(150.0, 50.0, 60.0).unwrap();
        send(&handle, &gains.into(), &tx).unwrap();

        let mut line = String::new();
        timeout(Duration::from_secs(5), echoed.read_line(&mut line))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(line, "{\"Kp\":150,\"Ki\":50,\"Kd\":60}\n");

        supervisor.stop(&mut handle).await;
    }

    #[tokio::test]
    async fn test_send_after_stop_is_rejected() {
        let supervisor = ProcessSupervisor::new(DEFAULT_START_TIMEOUT, DEFAULT_STOP_TIMEOUT);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handle = supervisor
            .start(&echo_worker(), &StateCell::default(), tx.clone())
            .await
            .unwrap();
        supervisor.stop(&mut handle).await;

        let result = send(&handle, &Command::Start, &tx);
        assert!(matches!(result, Err(LinkError::NotRunning)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_rejected_send_writes_nothing() {
        let supervisor = ProcessSupervisor::new(DEFAULT_START_TIMEOUT, DEFAULT_STOP_TIMEOUT);
        let state = StateCell::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handle = supervisor
            .start(&echo_worker(), &state, tx.clone())
            .await
            .unwrap();
        let mut echoed = BufReader::new(handle.take_stdout().unwrap());

        state.set(ProcessState::Failed);
        let result = send(&handle, &Command::Stop, &tx);
        assert!(matches!(result, Err(LinkError::NotRunning)));

        let mut line = String::new();
        let quiet = timeout(Duration::from_millis(300), echoed.read_line(&mut line)).await;
        assert!(quiet.is_err(), "unexpected output {line:?}");

        // The first thing the worker ever sees is the accepted command.
        state.set(ProcessState::Running);
        send(&handle, &Command::Reset, &tx).unwrap();
        timeout(Duration::from_secs(5), echoed.read_line(&mut line))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(line, "{\"command_type\":\"reset\"}\n");
        assert!(rx.try_recv().is_err());

        supervisor.stop(&mut handle).await;
    }

    #[tokio::test]
    async fn test_closed_stdin_is_reported_as_write_error() {
        let supervisor = ProcessSupervisor::new(DEFAULT_START_TIMEOUT, DEFAULT_STOP_TIMEOUT);
        let state = StateCell::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let worker = LaunchSpec::new(
            vec!["sh".to_string()],
            vec!["-c".to_string(), "exec 0<&-; sleep 5".to_string()],
        );
        let mut handle = supervisor.start(&worker, &state, tx.clone()).await.unwrap();

        // Writes succeed until the worker has closed its end of the pipe.
        let gains: Command = GainCommand::new(150.0, 50.0, 60.0).unwrap().into();
        let rejected = timeout(Duration::from_secs(5), async {
            loop {
                match send(&handle, &gains, &tx) {
                    Ok(()) => tokio::time::sleep(Duration::from_millis(20)).await,
                    Err(e) => return e,
                }
            }
        })
        .await
        .unwrap();
        assert!(matches!(rejected, LinkError::NotRunning));
        assert_eq!(state.get(), ProcessState::Failed);

        let event = timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            LinkEvent::Fault { kind, message } => {
                assert_eq!(kind, FaultKind::WriteError);
                assert!(message.to_lowercase().contains("pipe"), "{message}");
            }
            other => panic!("expected write fault, got {other:?}"),
        }

        supervisor.stop(&mut handle).await;
        assert_eq!(state.get(), ProcessState::Stopped);
    }

    #[tokio::test]
    async fn test_invalid_command_is_rejected_before_write() {
        let supervisor = ProcessSupervisor::new(DEFAULT_START_TIMEOUT, DEFAULT_STOP_TIMEOUT);
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut handle = supervisor
            .start(&echo_worker(), &StateCell::default(), tx.clone())
            .await
            .unwrap();

        let result = send(&handle, &Command::Setpoint { value: f64::NAN }, &tx);
        assert!(matches!(result, Err(LinkError::InvalidCommand(_))));
        assert_eq!(handle.state(), ProcessState::Running);

        supervisor.stop(&mut handle).await;
    }
}
