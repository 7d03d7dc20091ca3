//! Runner Stream Parser (C2): turns a byte stream of newline-delimited
//! JSON produced by the runner subprocess into a stream of [`SessionEvent`]s,
//! the way this codebase's existing executor turns `claude`'s stdout into
//! tracing calls and a final result — except here every non-`log` line is
//! handed to the caller instead of being consumed locally.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};

use crate::event::SessionEvent;

/// Wraps one runner subprocess's stdout. Malformed lines are skipped
/// silently; `log` events are routed to `tracing` and never yielded.
pub struct RunnerStreamParser<R: AsyncRead + Unpin> {
    lines: Lines<BufReader<R>>,
}

impl<R: AsyncRead + Unpin> RunnerStreamParser<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: BufReader::new(reader).lines(),
        }
    }

    /// Pulls the next non-`log` event, or `None` at EOF. Skips malformed
    /// and `log` lines internally, so one call may read several lines.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        loop {
            let line = match self.lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return None,
                Err(e) => {
                    tracing::warn!(error = %e, "runner stream read error, treating as EOF");
                    return None;
                }
            };
            if let Some(event) = decode_line(&line) {
                return Some(event);
            }
        }
    }
}

/// Decodes one line into a yieldable event: `None` for blank/malformed
/// lines and for `log` lines (forwarded to `tracing` as a side effect
/// instead). Shared between [`RunnerStreamParser`] (byte-stream stdout)
/// and the execution environment's direct draining of a [`crate::environment::Process`]
/// handle, which receives stdout as discrete chunks rather than one stream.
pub(crate) fn decode_line(line: &str) -> Option<SessionEvent> {
    if line.trim().is_empty() {
        return None;
    }
    let event: SessionEvent = match serde_json::from_str(line) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(error = %e, line, "skipping malformed runner event line");
            return None;
        }
    };
    if event.is_log() {
        forward_log_event(&event);
        return None;
    }
    Some(event)
}

/// Incremental line splitter for chunked byte input (a [`Process`](crate::environment::Process)'s
/// stdout arrives as discrete `Vec<u8>` chunks, not one continuous stream).
#[derive(Default)]
pub struct LineBuffer {
    partial: String,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk`, returning every event decoded from the complete
    /// lines it closed out (possibly empty, possibly more than one).
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SessionEvent> {
        self.partial.push_str(&String::from_utf8_lossy(chunk));
        let mut events = Vec::new();
        while let Some(pos) = self.partial.find('\n') {
            let line = self.partial[..pos].to_string();
            self.partial.drain(..=pos);
            if let Some(event) = decode_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Call at EOF: decodes a non-empty trailing partial line.
    pub fn finish(&mut self) -> Option<SessionEvent> {
        let line = std::mem::take(&mut self.partial);
        decode_line(&line)
    }
}

fn forward_log_event(event: &SessionEvent) {
    let level = event.payload.get("level").and_then(|v| v.as_str()).unwrap_or("info");
    let message = event
        .payload
        .get("message")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    match level {
        "debug" => tracing::debug!(target: "sessiond::runner", "{message}"),
        "warn" => tracing::warn!(target: "sessiond::runner", "{message}"),
        "error" => tracing::error!(target: "sessiond::runner", "{message}"),
        _ => tracing::info!(target: "sessiond::runner", "{message}"),
    }
}
