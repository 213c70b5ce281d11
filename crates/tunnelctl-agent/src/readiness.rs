//! Readiness detection from agent log output
//!
//! The agent has no status protocol; it only writes human readable log lines
//! to stdout. [`OutputScanner`] buffers that stream and matches whole lines, so a
//! marker split across two reads is still recognised. [`spawn_scanner`] drives a
//! scanner over the live process output on its own task.

use crate::FatalCondition;
use regex_lite::Regex;
use std::sync::OnceLock;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Size of each read from the agent output
pub const CHUNK_SIZE: usize = 256;

/// Longest unterminated line kept between reads
const MAX_PENDING: usize = 64 * 1024;

const READY_PATTERN: &str = r"starting web service.*addr=(\d+\.\d+\.\d+\.\d+:\d+)";
const IN_USE_PATTERN: &str = r"address already in use";
const SESSION_LIMIT_PATTERN: &str = r"is limited to (\d+) simultaneous .*client session";

struct Patterns {
    ready: Regex,
    in_use: Regex,
    session_limit: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        ready: Regex::new(READY_PATTERN).expect("ready pattern is valid"),
        in_use: Regex::new(IN_USE_PATTERN).expect("in-use pattern is valid"),
        session_limit: Regex::new(SESSION_LIMIT_PATTERN).expect("session pattern is valid"),
    })
}

/// Outcome of feeding output to the scanner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    /// The control API listens on this `ip:port`
    Ready(String),
    Fatal(FatalCondition),
}

/// What a batch of lines contained
#[derive(Default)]
struct Matches {
    ready: Option<String>,
    in_use: bool,
    session_limit: Option<u32>,
}

/// Incremental line scanner over agent output
#[derive(Debug, Default)]
pub struct OutputScanner {
    pending: Vec<u8>,
    ready: bool,
}

impl OutputScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether readiness has already been reported
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Feed the next read from the stream.
    ///
    /// Only lines completed by this read are matched; an unterminated tail is
    /// kept for the next call. When the completed lines contain both a fatal
    /// marker and the ready marker, the fatal marker wins. Readiness is
    /// reported at most once per scanner.
    pub fn feed(&mut self, chunk: &[u8]) -> Option<ScanEvent> {
        self.pending.extend_from_slice(chunk);

        let complete: Vec<u8> = match self.pending.iter().rposition(|&b| b == b'\n') {
            Some(end) => self.pending.drain(..=end).collect(),
            None if self.pending.len() > MAX_PENDING => std::mem::take(&mut self.pending),
            None => return None,
        };

        let text = String::from_utf8_lossy(&complete);
        let matches = Self::classify(text.lines());

        if let Some(fatal) = Self::fatal_from(&matches) {
            return Some(ScanEvent::Fatal(fatal));
        }

        match matches.ready {
            Some(address) if !self.ready => {
                self.ready = true;
                Some(ScanEvent::Ready(address))
            }
            _ => None,
        }
    }

    /// Called once the stream has ended.
    ///
    /// Reports a fatal marker left in the unterminated tail, or
    /// [`FatalCondition::StreamClosed`] if the agent never became ready.
    pub fn finish(&mut self) -> Option<FatalCondition> {
        let tail = std::mem::take(&mut self.pending);
        let text = String::from_utf8_lossy(&tail);
        let matches = Self::classify(text.lines());

        if let Some(fatal) = Self::fatal_from(&matches) {
            return Some(fatal);
        }

        if self.ready {
            None
        } else {
            Some(FatalCondition::StreamClosed)
        }
    }

    fn classify<'a>(lines: impl Iterator<Item = &'a str>) -> Matches {
        let patterns = patterns();
        let mut matches = Matches::default();

        for line in lines {
            if patterns.in_use.is_match(line) {
                matches.in_use = true;
            }

            if let Some(captures) = patterns.session_limit.captures(line) {
                let limit = captures[1].parse().unwrap_or(u32::MAX);
                matches.session_limit.get_or_insert(limit);
            }

            if matches.ready.is_none() {
                matches.ready = patterns
                    .ready
                    .captures(line)
                    .map(|captures| captures[1].to_string());
            }
        }

        matches
    }

    fn fatal_from(matches: &Matches) -> Option<FatalCondition> {
        if matches.in_use {
            Some(FatalCondition::AddressInUse)
        } else {
            matches
                .session_limit
                .map(|limit| FatalCondition::SessionLimit { limit })
        }
    }
}

/// Handle to a running scanner task
pub struct ReadinessWatch {
    ready_rx: Option<oneshot::Receiver<Result<String, FatalCondition>>>,
    outcome: Option<Result<String, FatalCondition>>,
    task: JoinHandle<Result<(), FatalCondition>>,
}

impl ReadinessWatch {
    /// Wait for the control address or the condition that prevented it
    pub async fn wait(&mut self) -> Result<String, FatalCondition> {
        if let Some(rx) = self.ready_rx.take() {
            // A dropped sender means the scanner task went away without reporting
            let outcome = rx.await.unwrap_or(Err(FatalCondition::StreamClosed));
            self.outcome = Some(outcome);
        }

        self.outcome
            .clone()
            .unwrap_or(Err(FatalCondition::StreamClosed))
    }

    /// Task that keeps draining the agent output after readiness
    pub fn into_task(self) -> JoinHandle<Result<(), FatalCondition>> {
        self.task
    }
}

/// Scan `reader` on a dedicated task.
///
/// The first ready address or fatal condition is delivered once through the
/// returned watch. After readiness the task keeps reading (and logging, when
/// `log_output` is set) until the stream ends or a fatal marker appears.
pub fn spawn_scanner<R>(reader: R, log_output: bool) -> ReadinessWatch
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (ready_tx, ready_rx) = oneshot::channel();
    let task = tokio::spawn(scan(reader, log_output, ready_tx));
    ReadinessWatch {
        ready_rx: Some(ready_rx),
        outcome: None,
        task,
    }
}

async fn scan<R>(
    mut reader: R,
    log_output: bool,
    ready_tx: oneshot::Sender<Result<String, FatalCondition>>,
) -> Result<(), FatalCondition>
where
    R: AsyncRead + Unpin,
{
    let mut scanner = OutputScanner::new();
    let mut ready_tx = Some(ready_tx);
    let mut chunk = [0u8; CHUNK_SIZE];

    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => {
                return match scanner.finish() {
                    Some(condition) => {
                        error!("Agent output ended: {}", condition);
                        Err(fail(&mut ready_tx, condition))
                    }
                    None => {
                        debug!("Agent output closed");
                        Ok(())
                    }
                };
            }
            Ok(n) => n,
            Err(e) => {
                let condition = FatalCondition::Read(e.to_string());
                error!("{}", condition);
                return Err(fail(&mut ready_tx, condition));
            }
        };

        if log_output {
            info!(
                target: "tunnelctl::agent_output",
                "{}",
                String::from_utf8_lossy(&chunk[..n]).trim_end()
            );
        }

        match scanner.feed(&chunk[..n]) {
            Some(ScanEvent::Ready(address)) => {
                info!("Agent control API ready at {}", address);
                if let Some(tx) = ready_tx.take() {
                    let _ = tx.send(Ok(address));
                }
            }
            Some(ScanEvent::Fatal(condition)) => {
                error!("Agent reported a fatal condition: {}", condition);
                return Err(fail(&mut ready_tx, condition));
            }
            None => {}
        }
    }
}

fn fail(
    ready_tx: &mut Option<oneshot::Sender<Result<String, FatalCondition>>>,
    condition: FatalCondition,
) -> FatalCondition {
    if let Some(tx) = ready_tx.take() {
        let _ = tx.send(Err(condition.clone()));
    }
    condition
}

#[cfg(test)]
mod tests {
    use super::*;

    const READY_LINE: &str = "t=2024-05-01T10:00:00+0000 lvl=info msg=\"starting web service\" obj=web addr=127.0.0.1:4040\n";

    #[test]
    fn test_ready_line_in_single_chunk() {
        let mut scanner = OutputScanner::new();
        assert_eq!(
            scanner.feed(READY_LINE.as_bytes()),
            Some(ScanEvent::Ready("127.0.0.1:4040".to_string()))
        );
        assert!(scanner.is_ready());
    }

    #[test]
    fn test_ready_line_split_at_every_boundary() {
        let bytes = READY_LINE.as_bytes();
        for split in 1..bytes.len() {
            let mut scanner = OutputScanner::new();
            let events: Vec<_> = [&bytes[..split], &bytes[split..]]
                .into_iter()
                .filter_map(|part| scanner.feed(part))
                .collect();

            assert_eq!(
                events,
                vec![ScanEvent::Ready("127.0.0.1:4040".to_string())],
                "split at byte {}",
                split
            );
        }
    }

    #[test]
    fn test_ready_reported_once() {
        let mut scanner = OutputScanner::new();
        assert!(scanner.feed(READY_LINE.as_bytes()).is_some());
        assert_eq!(scanner.feed(READY_LINE.as_bytes()), None);
    }

    #[test]
    fn test_ready_address_comes_from_addr_field() {
        let mut scanner = OutputScanner::new();
        let line = b"t=2024 lvl=info msg=\"starting web service\" peer=10.0.0.5:9000 addr=127.0.0.1:4040\n";
        assert_eq!(
            scanner.feed(line),
            Some(ScanEvent::Ready("127.0.0.1:4040".to_string()))
        );
    }

    #[test]
    fn test_address_without_ready_marker_is_ignored() {
        let mut scanner = OutputScanner::new();
        let line = b"t=2024 lvl=info msg=\"client session established\" addr=10.0.0.1:443\n";
        assert_eq!(scanner.feed(line), None);
        assert!(!scanner.is_ready());
    }

    #[test]
    fn test_in_use_beats_ready_in_same_chunk() {
        let mut scanner = OutputScanner::new();
        let chunk = format!(
            "{}t=2024 lvl=eror msg=\"failed to start web service\" err=\"listen tcp 127.0.0.1:4040: bind: address already in use\"\n",
            READY_LINE
        );
        assert_eq!(
            scanner.feed(chunk.as_bytes()),
            Some(ScanEvent::Fatal(FatalCondition::AddressInUse))
        );
        assert!(!scanner.is_ready());
    }

    #[test]
    fn test_in_use_and_ready_on_one_line() {
        let mut scanner = OutputScanner::new();
        let line = b"starting web service addr=127.0.0.1:4040 err=address already in use\n";
        assert_eq!(
            scanner.feed(line),
            Some(ScanEvent::Fatal(FatalCondition::AddressInUse))
        );
    }

    #[test]
    fn test_session_limit() {
        let mut scanner = OutputScanner::new();
        let line = b"t=2024 lvl=eror msg=\"session closing\" err=\"Your account is limited to 1 simultaneous ngrok client session.\"\n";
        assert_eq!(
            scanner.feed(line),
            Some(ScanEvent::Fatal(FatalCondition::SessionLimit { limit: 1 }))
        );
    }

    #[test]
    fn test_finish_before_ready_is_stream_closed() {
        let mut scanner = OutputScanner::new();
        scanner.feed(b"t=2024 lvl=info msg=\"no configuration paths supplied\"\n");
        assert_eq!(scanner.finish(), Some(FatalCondition::StreamClosed));
    }

    #[test]
    fn test_finish_reports_fatal_in_tail() {
        let mut scanner = OutputScanner::new();
        assert_eq!(scanner.feed(b"bind: address already in use"), None);
        assert_eq!(scanner.finish(), Some(FatalCondition::AddressInUse));
    }

    #[test]
    fn test_finish_after_ready_is_clean() {
        let mut scanner = OutputScanner::new();
        scanner.feed(READY_LINE.as_bytes());
        assert_eq!(scanner.finish(), None);
    }

    #[test]
    fn test_overlong_line_is_flushed() {
        let mut scanner = OutputScanner::new();
        let mut line = vec![b'x'; MAX_PENDING];
        line.extend_from_slice(b" address already in use");
        assert_eq!(
            scanner.feed(&line),
            Some(ScanEvent::Fatal(FatalCondition::AddressInUse))
        );
    }

    #[tokio::test]
    async fn test_spawn_scanner_reports_ready_and_drains() {
        let output = format!("lvl=info msg=\"open config file\"\n{}lvl=info msg=\"more\"\n", READY_LINE);
        let mut watch = spawn_scanner(std::io::Cursor::new(output.into_bytes()), true);

        assert_eq!(watch.wait().await, Ok("127.0.0.1:4040".to_string()));
        assert_eq!(watch.into_task().await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn test_spawn_scanner_fatal_after_ready_ends_task() {
        let output = format!(
            "{}t=2024 lvl=eror msg=\"web service stopped\" err=\"listen tcp 127.0.0.1:4040: bind: address already in use\"\nlvl=info msg=\"never read\"\n",
            READY_LINE
        );
        let (mut writer, reader) = tokio::io::duplex(1024);
        let mut watch = spawn_scanner(reader, false);

        tokio::io::AsyncWriteExt::write_all(&mut writer, READY_LINE.as_bytes())
            .await
            .unwrap();
        assert_eq!(watch.wait().await, Ok("127.0.0.1:4040".to_string()));

        tokio::io::AsyncWriteExt::write_all(&mut writer, output[READY_LINE.len()..].as_bytes())
            .await
            .unwrap();
        assert_eq!(
            watch.into_task().await.unwrap(),
            Err(FatalCondition::AddressInUse)
        );
    }

    #[tokio::test]
    async fn test_spawn_scanner_empty_stream_is_fatal() {
        let mut watch = spawn_scanner(tokio::io::empty(), false);
        assert_eq!(watch.wait().await, Err(FatalCondition::StreamClosed));
        assert_eq!(
            watch.into_task().await.unwrap(),
            Err(FatalCondition::StreamClosed)
        );
    }

    #[tokio::test]
    async fn test_spawn_scanner_ready_split_across_reads() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let mut watch = spawn_scanner(reader, false);

        let (head, tail) = READY_LINE.split_at(60);
        tokio::io::AsyncWriteExt::write_all(&mut writer, head.as_bytes())
            .await
            .unwrap();
        tokio::task::yield_now().await;
        tokio::io::AsyncWriteExt::write_all(&mut writer, tail.as_bytes())
            .await
            .unwrap();

        assert_eq!(watch.wait().await, Ok("127.0.0.1:4040".to_string()));
        drop(writer);
        assert_eq!(watch.into_task().await.unwrap(), Ok(()));
    }
}
