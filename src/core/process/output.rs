use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Console prompt the server prints when it expects operator input.
pub const PROMPT_MARKER: &str = ">";

/// Which standard stream a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamOrigin {
    Stdout,
    Stderr,
}

impl std::fmt::Display for StreamOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamOrigin::Stdout => write!(f, "stdout"),
            StreamOrigin::Stderr => write!(f, "stderr"),
        }
    }
}

/// Receives server output one line at a time.
///
/// Called from the stream forwarder tasks; implementations must return
/// quickly or they stall that stream.
pub trait OutputSink: Send + Sync {
    fn on_line(&self, origin: StreamOrigin, line: &str);
}

/// Accepts commands destined for the server's standard input.
pub trait CommandSink: Send + Sync {
    fn send_command(&self, text: &str);
}

/// Logs every line through `tracing`.
pub struct TracingSink {
    name: String,
}

impl TracingSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl OutputSink for TracingSink {
    fn on_line(&self, origin: StreamOrigin, line: &str) {
        match origin {
            StreamOrigin::Stdout => info!("[server:{}][stdout] {}", self.name, line),
            StreamOrigin::Stderr => warn!("[server:{}][stderr] {}", self.name, line),
        }
    }
}

/// Pushes lines into an unbounded channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<(StreamOrigin, String)>,
}

impl ChannelSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<(StreamOrigin, String)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl OutputSink for ChannelSink {
    fn on_line(&self, origin: StreamOrigin, line: &str) {
        let _ = self.tx.send((origin, line.to_string()));
    }
}

/// Whether a raw line is worth forwarding (not blank, not a bare prompt).
pub fn should_forward(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty() && trimmed != PROMPT_MARKER
}

/// Read `reader` line by line until EOF, forwarding every meaningful line to
/// `sink`. Read failures and sink panics are logged and never escape.
pub(crate) async fn forward_lines<R>(
    reader: R,
    origin: StreamOrigin,
    sink: Arc<dyn OutputSink>,
    instance_name: String,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']);
                if !should_forward(line) {
                    continue;
                }

                let delivered = std::panic::catch_unwind(AssertUnwindSafe(|| {
                    sink.on_line(origin, line);
                }));
                if delivered.is_err() {
                    error!(
                        "[server:{}][{}] output listener panicked; line dropped",
                        instance_name, origin
                    );
                }
            }
            Err(e) => {
                warn!("[server:{}][{}] read failed: {}", instance_name, origin, e);
                break;
            }
        }
    }

    debug!("[server:{}][{}] stream closed", instance_name, origin);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_and_blank_lines_are_dropped() {
        assert!(!should_forward(""));
        assert!(!should_forward("   "));
        assert!(!should_forward(">"));
        assert!(!should_forward("> "));
        assert!(should_forward("> say hi"));
        assert!(should_forward("[12:00:00 INFO]: Done (3.2s)!"));
    }

    #[tokio::test]
    async fn forwards_lines_in_order_with_origin() {
        let (sink, mut rx) = ChannelSink::channel();
        let input: &[u8] = b"first\r\n\n>\nsecond\nthird";

        forward_lines(input, StreamOrigin::Stderr, Arc::new(sink), "test".into()).await;

        let mut received = Vec::new();
        while let Ok(item) = rx.try_recv() {
            received.push(item);
        }
        assert_eq!(
            received,
            vec![
                (StreamOrigin::Stderr, "first".to_string()),
                (StreamOrigin::Stderr, "second".to_string()),
                (StreamOrigin::Stderr, "third".to_string()),
            ]
        );
    }

    #[derive(Default)]
    struct PanickingSink {
        seen: std::sync::Mutex<Vec<String>>,
    }

    impl OutputSink for PanickingSink {
        fn on_line(&self, _origin: StreamOrigin, line: &str) {
            if line == "boom" {
                panic!("listener failure");
            }
            self.seen.lock().unwrap().push(line.to_string());
        }
    }

    #[tokio::test]
    async fn listener_panic_does_not_stop_forwarding() {
        let sink = Arc::new(PanickingSink::default());
        let input: &[u8] = b"boom\nafter\n";

        forward_lines(input, StreamOrigin::Stdout, sink.clone(), "test".into()).await;

        assert_eq!(*sink.seen.lock().unwrap(), vec!["after".to_string()]);
    }
}
