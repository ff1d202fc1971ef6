//! Shared transfer state: activity, throttle rate, sinks, and halting
//!
//! Each fetch runs under its own cancellation token. Tokens are children of
//! a halt token owned by the state, so [`TransferState::halt`] reaches every
//! fetch in flight while a caller's own token only stops its fetch.

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Receives `(sent, total)` body bytes during a request upload
pub type ProgressSink = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Receives diagnostic text or endpoint paths
pub type TextSink = Arc<dyn Fn(&str) + Send + Sync>;

pub struct TransferState {
    in_flight: AtomicUsize,
    throttle_rate: AtomicU32,
    halt: Mutex<CancellationToken>,
    verbose: RwLock<Option<TextSink>>,
    progress: RwLock<Option<ProgressSink>>,
    endpoint: RwLock<Option<TextSink>>,
}

impl TransferState {
    pub fn new(throttle_rate: u32) -> Self {
        Self {
            in_flight: AtomicUsize::new(0),
            throttle_rate: AtomicU32::new(throttle_rate),
            halt: Mutex::new(CancellationToken::new()),
            verbose: RwLock::new(None),
            progress: RwLock::new(None),
            endpoint: RwLock::new(None),
        }
    }

    /// Whether any fetch is currently in progress
    pub fn is_active(&self) -> bool {
        self.in_flight.load(Ordering::Acquire) > 0
    }

    /// Cancel every fetch in flight.
    ///
    /// Fetches started afterwards are unaffected.
    pub fn halt(&self) {
        let mut halt = self.halt.lock();
        halt.cancel();
        *halt = CancellationToken::new();
        info!("Halt requested");
    }

    /// A token cancelled by the next [`TransferState::halt`]
    pub fn halt_child(&self) -> CancellationToken {
        self.halt.lock().child_token()
    }

    pub fn throttle_rate(&self) -> u32 {
        self.throttle_rate.load(Ordering::Relaxed)
    }

    pub fn set_throttle_rate(&self, rate: u32) {
        self.throttle_rate.store(rate, Ordering::Relaxed);
    }

    pub fn set_verbose_sink(&self, sink: Option<TextSink>) {
        *self.verbose.write() = sink;
    }

    pub fn set_progress_sink(&self, sink: Option<ProgressSink>) {
        *self.progress.write() = sink;
    }

    pub fn set_endpoint_sink(&self, sink: Option<TextSink>) {
        *self.endpoint.write() = sink;
    }

    pub fn progress_sink(&self) -> Option<ProgressSink> {
        self.progress.read().clone()
    }

    /// Send text to the verbose sink, if any
    pub fn trace(&self, text: &str) {
        let sink = self.verbose.read().clone();
        if let Some(sink) = sink {
            sink(text);
        }
    }

    pub fn report_endpoint(&self, path: &str) {
        let sink = self.endpoint.read().clone();
        if let Some(sink) = sink {
            sink(path);
        }
    }

    /// Mark a fetch as started.
    ///
    /// The returned guard owns the fetch's token and marks the fetch finished
    /// when dropped, whichever way the fetch ends. Must be called inside a
    /// tokio runtime when `caller` is given.
    pub fn begin(&self, caller: Option<&CancellationToken>) -> ActiveTransfer<'_> {
        let token = self.halt_child();

        if let Some(caller) = caller.cloned() {
            let fetch = token.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = caller.cancelled() => fetch.cancel(),
                    _ = fetch.cancelled() => {}
                }
            });
        }

        self.in_flight.fetch_add(1, Ordering::AcqRel);
        ActiveTransfer { state: self, token }
    }
}

impl Default for TransferState {
    fn default() -> Self {
        Self::new(uptred_types::DEFAULT_THROTTLE_RATE)
    }
}

impl std::fmt::Debug for TransferState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferState")
            .field("in_flight", &self.in_flight.load(Ordering::Relaxed))
            .field("throttle_rate", &self.throttle_rate())
            .finish_non_exhaustive()
    }
}

/// Guard for one in-flight fetch
pub struct ActiveTransfer<'a> {
    state: &'a TransferState,
    token: CancellationToken,
}

impl ActiveTransfer<'_> {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for ActiveTransfer<'_> {
    fn drop(&mut self) {
        // also stops the caller-token forwarder
        self.token.cancel();
        self.state.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_active_tracks_guards() {
        let state = TransferState::default();
        assert!(!state.is_active());
        {
            let _a = state.begin(None);
            let b = state.begin(None);
            assert!(state.is_active());
            drop(b);
            assert!(state.is_active());
        }
        assert!(!state.is_active());
    }

    #[tokio::test]
    async fn test_halt_reaches_every_fetch_in_flight() {
        let state = TransferState::default();
        let first = state.begin(None);
        let second = state.begin(None);

        state.halt();
        assert!(first.token().is_cancelled());
        assert!(second.token().is_cancelled());

        let later = state.begin(None);
        assert!(!later.token().is_cancelled());
    }

    #[test]
    fn test_halt_child_is_cancelled_once() {
        let state = TransferState::default();
        let upload = state.halt_child();
        state.halt();
        assert!(upload.is_cancelled());
        assert!(!state.halt_child().is_cancelled());
    }

    #[tokio::test]
    async fn test_caller_token_only_cancels_its_fetch() {
        let state = TransferState::default();
        let caller = CancellationToken::new();
        let mine = state.begin(Some(&caller));
        let other = state.begin(None);

        caller.cancel();
        tokio::time::timeout(Duration::from_secs(1), mine.token().cancelled())
            .await
            .unwrap();
        assert!(!other.token().is_cancelled());
    }

    #[test]
    fn test_sinks() {
        let state = TransferState::default();
        let seen = Arc::new(Mutex::new(Vec::<String>::new()));

        state.trace("dropped");
        let verbose = seen.clone();
        state.set_verbose_sink(Some(Arc::new(move |s: &str| verbose.lock().push(s.to_string()))));
        let endpoint = seen.clone();
        state.set_endpoint_sink(Some(Arc::new(move |s: &str| endpoint.lock().push(format!("path {}", s)))));

        state.trace("hello");
        state.report_endpoint("/upload");
        assert_eq!(*seen.lock(), vec!["hello".to_string(), "path /upload".to_string()]);

        state.set_throttle_rate(0);
        assert_eq!(state.throttle_rate(), 0);
        assert!(state.progress_sink().is_none());
    }
}
