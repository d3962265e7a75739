//! Session output buffering.
//!
//! The reader thread is the only producer; any number of callers may pop,
//! and concurrent poppers race for chunks (first reader wins).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

/// FIFO of decoded output chunks.
///
/// Unbounded unless a limit is given, in which case the oldest chunk is
/// evicted to make room. An unread session therefore grows without bound
/// by default.
#[derive(Debug)]
pub(crate) struct OutputBuffer {
    chunks: Mutex<VecDeque<String>>,
    notify: Notify,
    limit: Option<usize>,
    dropped: AtomicU64,
}

impl OutputBuffer {
    pub(crate) fn new(limit: Option<usize>) -> Self {
        Self {
            chunks: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            limit,
            dropped: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<String>> {
        self.chunks.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a chunk, evicting the oldest if at capacity.
    pub(crate) fn push(&self, chunk: String) {
        if chunk.is_empty() {
            return;
        }
        let evicted = {
            let mut chunks = self.lock();
            let evicted = match self.limit {
                Some(limit) if chunks.len() >= limit => chunks.pop_front().is_some(),
                _ => false,
            };
            chunks.push_back(chunk);
            evicted
        };
        if evicted {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(dropped_total = total, "Output buffer full, dropped oldest chunk");
        }
        self.notify.notify_one();
    }

    /// Pop the oldest chunk without waiting.
    pub(crate) fn try_pop(&self) -> Option<String> {
        self.lock().pop_front()
    }

    /// Pop the oldest chunk, waiting up to `timeout` for one to arrive.
    pub(crate) async fn pop(&self, timeout: Duration) -> Option<String> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            if let Some(chunk) = self.try_pop() {
                return Some(chunk);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_pop();
            }
        }
    }

    /// Wait up to `timeout` for the first chunk, then take everything
    /// currently buffered.
    pub(crate) async fn drain(&self, timeout: Duration) -> Option<String> {
        let mut out = self.pop(timeout).await?;
        let rest: Vec<String> = self.lock().drain(..).collect();
        for chunk in rest {
            out.push_str(&chunk);
        }
        Some(out)
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Incremental, permissive UTF-8 decoder.
///
/// Invalid sequences become U+FFFD; a multi-byte character split across
/// two reads is carried over instead of being mangled.
#[derive(Debug, Default)]
pub(crate) struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub(crate) fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::with_capacity(self.pending.len());
        let mut rest: &[u8] = &self.pending;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }
        let carry = rest.to_vec();
        self.pending = carry;
        out
    }

    /// Flush any incomplete trailing sequence as a replacement character.
    pub(crate) fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }
        self.pending.clear();
        char::REPLACEMENT_CHARACTER.to_string()
    }
}
