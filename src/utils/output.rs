/// Bounded, concurrent capture of a child's stdout and stderr
///
/// One reader thread per stream feeds an mpsc channel. Readers keep draining
/// past the limit so a chatty child never blocks on a full pipe; bytes beyond
/// the limit are discarded and the stream is marked truncated.
use crate::config::types::OutputIntegrity;
use std::io::{self, Read, Write};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

/// Output limits configuration
#[derive(Debug, Clone)]
pub struct OutputLimits {
    /// Per-stream stdout limit (bytes)
    pub stdout_limit: usize,
    /// Per-stream stderr limit (bytes)
    pub stderr_limit: usize,
    /// How long `finish` waits for readers after the child is gone
    pub drain_timeout: Duration,
}

impl Default for OutputLimits {
    fn default() -> Self {
        OutputLimits {
            stdout_limit: 8 * 1024 * 1024, // 8 MB stdout
            stderr_limit: 2 * 1024 * 1024, // 2 MB stderr
            drain_timeout: Duration::from_secs(5),
        }
    }
}

/// Where a stream is mirrored while it is captured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Echo {
    None,
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Default)]
pub struct CapturedOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_integrity: OutputIntegrity,
    pub stderr_integrity: OutputIntegrity,
}

impl CapturedOutput {
    /// Worst integrity of the two streams
    pub fn integrity(&self) -> OutputIntegrity {
        fn rank(i: &OutputIntegrity) -> u8 {
            match i {
                OutputIntegrity::Complete => 0,
                OutputIntegrity::TruncatedByLimit => 1,
                OutputIntegrity::ReadError => 2,
            }
        }
        if rank(&self.stdout_integrity) >= rank(&self.stderr_integrity) {
            self.stdout_integrity.clone()
        } else {
            self.stderr_integrity.clone()
        }
    }
}

type StreamResult = (Vec<u8>, OutputIntegrity);

/// Readers running for one child
pub struct CaptureHandle {
    stdout_rx: Option<Receiver<StreamResult>>,
    stderr_rx: Option<Receiver<StreamResult>>,
    drain_timeout: Duration,
}

/// Output collector with bounded collection
pub struct OutputCollector {
    limits: OutputLimits,
}

impl OutputCollector {
    pub fn new(limits: OutputLimits) -> Self {
        OutputCollector { limits }
    }

    /// Start a reader for each present stream
    pub fn start<O, E>(&self, stdout: Option<O>, stderr: Option<E>, echo: bool) -> CaptureHandle
    where
        O: Read + Send + 'static,
        E: Read + Send + 'static,
    {
        let (stdout_echo, stderr_echo) = if echo {
            (Echo::Stdout, Echo::Stderr)
        } else {
            (Echo::None, Echo::None)
        };
        CaptureHandle {
            stdout_rx: stdout.map(|s| spawn_reader(s, self.limits.stdout_limit, stdout_echo)),
            stderr_rx: stderr.map(|s| spawn_reader(s, self.limits.stderr_limit, stderr_echo)),
            drain_timeout: self.limits.drain_timeout,
        }
    }
}

impl CaptureHandle {
    /// Collect what the readers gathered.
    ///
    /// Call after the child has exited. A stream still open when the drain
    /// timeout expires (a grandchild holding the pipe) is reported truncated.
    pub fn finish(self) -> CapturedOutput {
        let deadline = Instant::now() + self.drain_timeout;
        let (stdout, stdout_integrity) = receive(self.stdout_rx, deadline);
        let (stderr, stderr_integrity) = receive(self.stderr_rx, deadline);
        CapturedOutput {
            stdout,
            stderr,
            stdout_integrity,
            stderr_integrity,
        }
    }
}

fn receive(rx: Option<Receiver<StreamResult>>, deadline: Instant) -> StreamResult {
    let Some(rx) = rx else {
        return (Vec::new(), OutputIntegrity::Complete);
    };
    let remaining = deadline.saturating_duration_since(Instant::now());
    match rx.recv_timeout(remaining) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => (Vec::new(), OutputIntegrity::TruncatedByLimit),
        Err(RecvTimeoutError::Disconnected) => (Vec::new(), OutputIntegrity::ReadError),
    }
}

fn spawn_reader<R: Read + Send + 'static>(
    stream: R,
    limit: usize,
    echo: Echo,
) -> Receiver<StreamResult> {
    let (tx, rx) = channel();
    thread::spawn(move || collect_stream(stream, limit, echo, tx));
    rx
}

/// Collect from a single stream with limit
fn collect_stream<R: Read>(mut stream: R, limit: usize, echo: Echo, tx: Sender<StreamResult>) {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];
    let mut integrity = OutputIntegrity::Complete;

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                mirror(echo, &chunk[..n]);
                let room = limit.saturating_sub(buffer.len());
                if n > room {
                    buffer.extend_from_slice(&chunk[..room]);
                    integrity = OutputIntegrity::TruncatedByLimit;
                } else {
                    buffer.extend_from_slice(&chunk[..n]);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => {
                integrity = OutputIntegrity::ReadError;
                break;
            }
        }
    }

    let _ = tx.send((buffer, integrity));
}

fn mirror(echo: Echo, bytes: &[u8]) {
    // Echo failures (closed terminal) must not stop capture
    match echo {
        Echo::None => {}
        Echo::Stdout => {
            let mut out = io::stdout().lock();
            let _ = out.write_all(bytes).and_then(|_| out.flush());
        }
        Echo::Stderr => {
            let _ = io::stderr().lock().write_all(bytes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};

    fn limits(stdout_limit: usize) -> OutputLimits {
        OutputLimits {
            stdout_limit,
            stderr_limit: 1024,
            drain_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn captures_both_streams() {
        let mut child = Command::new("sh")
            .args(["-c", "echo hello; echo oops >&2"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        let handle =
            OutputCollector::new(limits(1024)).start(child.stdout.take(), child.stderr.take(), false);
        child.wait().unwrap();

        let output = handle.finish();
        assert_eq!(output.stdout, b"hello\n");
        assert_eq!(output.stderr, b"oops\n");
        assert_eq!(output.integrity(), OutputIntegrity::Complete);
    }

    #[test]
    fn oversized_stream_is_truncated_but_drained() {
        let mut child = Command::new("sh")
            .args(["-c", "head -c 200000 /dev/zero"])
            .stdout(Stdio::piped())
            .spawn()
            .unwrap();
        let handle = OutputCollector::new(limits(100))
            .start(child.stdout.take(), None::<std::process::ChildStderr>, false);
        // Would block on a full pipe if the reader stopped at the limit
        assert!(child.wait().unwrap().success());

        let output = handle.finish();
        assert_eq!(output.stdout.len(), 100);
        assert_eq!(output.stdout_integrity, OutputIntegrity::TruncatedByLimit);
        assert_eq!(output.integrity(), OutputIntegrity::TruncatedByLimit);
    }

    #[test]
    fn absent_streams_are_complete_and_empty() {
        let output = OutputCollector::new(OutputLimits::default())
            .start(
                None::<std::process::ChildStdout>,
                None::<std::process::ChildStderr>,
                false,
            )
            .finish();
        assert!(output.stdout.is_empty());
        assert_eq!(output.integrity(), OutputIntegrity::Complete);
    }
}
