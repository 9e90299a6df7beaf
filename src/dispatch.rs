//! User-facing reporting seams: progress stages and dialog dispatch.
//!
//! A rebuild may run on a worker thread while dialogs belong to the main
//! thread. [`RemoteNotifier`] forwards each dialog request over a channel to
//! a [`MainLoop`] and blocks until the main thread acknowledges it, so the
//! worker observes every dialog synchronously before branching on recovery.

use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use tracing::{debug, error};

/// Coarse named stages of a rebuild, reported in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStage {
    VerifyCache,
    CreateCache,
    LoadCores,
    LoadAddons,
    LoadUnitTypes,
}

impl LoadStage {
    pub fn label(self) -> &'static str {
        match self {
            LoadStage::VerifyCache => "verify-cache",
            LoadStage::CreateCache => "create-cache",
            LoadStage::LoadCores => "load-cores",
            LoadStage::LoadAddons => "load-addons",
            LoadStage::LoadUnitTypes => "load-unit-types",
        }
    }
}

/// Progress sink for the loading screen (or nothing at all).
pub trait ProgressReporter: Send + Sync {
    fn stage(&self, stage: LoadStage);
}

/// Progress reporter that just logs stage transitions.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressReporter for NullProgress {
    fn stage(&self, stage: LoadStage) {
        debug!(stage = stage.label(), "loading stage");
    }
}

/// Destination for user-facing error dialogs.
///
/// Implementations must block the calling thread until the user-facing side
/// has handled the message; the resolution engine relies on that ordering
/// when it retries after a recoverable failure.
pub trait UserNotifier: Send + Sync {
    /// One focused dialog: a summary line plus detail text.
    fn error_dialog(&self, summary: &str, message: &str);

    /// Batched report listing every failed origin with the combined details.
    fn error_report(&self, summary: &str, note: &str, origins: &[String], details: &str) {
        let mut message = String::new();
        message.push_str(note);
        for origin in origins {
            message.push('\n');
            message.push_str(origin);
        }
        if !details.is_empty() {
            message.push_str("\n\n");
            message.push_str(details);
        }
        self.error_dialog(summary, &message);
    }
}

/// Notifier for headless use: dialogs become error-level log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl UserNotifier for LogNotifier {
    fn error_dialog(&self, summary: &str, message: &str) {
        error!("{summary}: {message}");
    }
}

struct DialogRequest {
    summary: String,
    message: String,
    ack: SyncSender<()>,
}

/// Main-thread end of the dialog channel.
///
/// The owning thread services requests; each one is acknowledged after the
/// `show` closure returns, unblocking the worker.
pub struct MainLoop {
    rx: Receiver<DialogRequest>,
}

impl MainLoop {
    /// Create a connected main loop and its worker-side notifier.
    pub fn channel() -> (MainLoop, RemoteNotifier) {
        let (tx, rx) = sync_channel(0);
        (MainLoop { rx }, RemoteNotifier { tx })
    }

    /// Service requests until every [`RemoteNotifier`] clone is dropped.
    pub fn run(&self, mut show: impl FnMut(&str, &str)) {
        for request in self.rx.iter() {
            show(&request.summary, &request.message);
            let _ = request.ack.send(());
        }
    }
}

/// Worker-side notifier that forwards dialogs to the [`MainLoop`].
#[derive(Clone)]
pub struct RemoteNotifier {
    tx: SyncSender<DialogRequest>,
}

impl UserNotifier for RemoteNotifier {
    fn error_dialog(&self, summary: &str, message: &str) {
        let (ack_tx, ack_rx) = sync_channel(0);
        let request = DialogRequest {
            summary: summary.to_string(),
            message: message.to_string(),
            ack: ack_tx,
        };
        if self.tx.send(request).is_ok() {
            // Blocks until the main loop has shown the dialog. A closed
            // channel means the main loop is gone; nothing left to wait for.
            let _ = ack_rx.recv();
        } else {
            error!("main loop gone, dropping dialog: {summary}: {message}");
        }
    }
}
