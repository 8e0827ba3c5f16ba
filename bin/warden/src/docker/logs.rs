use bollard::container::LogOutput;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use warden_client::entities::history::{HistoryEvent, LogStream};

use crate::state;

use super::docker_client;

/// Spawn the background reader pushing container output
/// into the service history. Lifetime is bound to the
/// cancellation token held in the tracked set.
pub fn spawn_log_reader(
  service: String,
  container: String,
  cancel: CancellationToken,
) {
  tokio::spawn(async move {
    let mut stream = docker_client().logs_stream(&container);
    loop {
      tokio::select! {
        _ = cancel.cancelled() => break,
        item = stream.next() => match item {
          None => break,
          Some(Err(e)) => {
            // Reader failures never take down the install.
            warn!("log reader for {service} failed | {e:#}");
            break;
          }
          Some(Ok(output)) => push_output(&service, output),
        }
      }
    }
    debug!("log reader for {service} stopped");
  });
}

fn push_output(service: &str, output: LogOutput) {
  let (stream, message) = match output {
    LogOutput::StdOut { message } => (LogStream::Stdout, message),
    LogOutput::Console { message } => (LogStream::Stdout, message),
    LogOutput::StdErr { message } => (LogStream::Stderr, message),
    LogOutput::StdIn { .. } => return,
  };
  let message = String::from_utf8_lossy(&message);
  for line in message.split('\n').filter(|line| !line.is_empty())
  {
    state::history().append(
      service,
      HistoryEvent::Log {
        stream,
        message: line.to_string(),
      },
    );
  }
}
