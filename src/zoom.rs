//! Display-scale change detection.

use crate::config::ZoomSettings;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info};

/// Source of the current device pixel ratio.
pub trait DisplayScale: Send + Sync {
    fn current(&self) -> f64;
}

/// A scale that never changes.
#[derive(Debug, Clone, Copy)]
pub struct FixedScale(pub f64);

impl DisplayScale for FixedScale {
    fn current(&self) -> f64 {
        self.0
    }
}

/// A scale the host can update, e.g. from window events.
#[derive(Debug, Clone)]
pub struct SharedScale {
    bits: Arc<AtomicU64>,
}

impl SharedScale {
    pub fn new(scale: f64) -> Self {
        Self {
            bits: Arc::new(AtomicU64::new(scale.to_bits())),
        }
    }

    pub fn set(&self, scale: f64) {
        self.bits.store(scale.to_bits(), Ordering::SeqCst);
    }
}

impl DisplayScale for SharedScale {
    fn current(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}

/// Watches for the display scale drifting from its value at construction.
///
/// Resize notifications are debounced; once the quiet period passes the
/// scale is re-read and compared with the baseline. A detected change is
/// permanent for the lifetime of the manager, even if the scale later
/// returns to the baseline.
pub struct ZoomManager {
    initial_scale: f64,
    has_changed: Arc<AtomicBool>,
    resize_tx: mpsc::UnboundedSender<()>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl ZoomManager {
    /// Must be called from within a tokio runtime.
    pub fn new(scale: Arc<dyn DisplayScale>, settings: &ZoomSettings) -> Self {
        let initial_scale = scale.current();
        let has_changed = Arc::new(AtomicBool::new(false));
        let (resize_tx, resize_rx) = mpsc::unbounded_channel();

        let watcher = tokio::spawn(watch(
            resize_rx,
            scale,
            initial_scale,
            settings.debounce,
            settings.epsilon,
            has_changed.clone(),
        ));

        Self {
            initial_scale,
            has_changed,
            resize_tx,
            watcher: Mutex::new(Some(watcher)),
        }
    }

    pub fn initial_scale(&self) -> f64 {
        self.initial_scale
    }

    pub fn has_changed(&self) -> bool {
        self.has_changed.load(Ordering::SeqCst)
    }

    /// Report a resize of the host window.
    pub fn notify_resize(&self) {
        let _ = self.resize_tx.send(());
    }

    /// Stop watching. The current flag value is kept.
    pub fn stop(&self) {
        let handle = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
            debug!("Zoom watcher stopped");
        }
    }
}

impl Drop for ZoomManager {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn watch(
    mut resize_rx: mpsc::UnboundedReceiver<()>,
    scale: Arc<dyn DisplayScale>,
    initial: f64,
    debounce: Duration,
    epsilon: f64,
    has_changed: Arc<AtomicBool>,
) {
    while resize_rx.recv().await.is_some() {
        // Restart the quiet period on every further notification
        let mut closed = false;
        loop {
            match timeout(debounce, resize_rx.recv()).await {
                Ok(Some(())) => continue,
                Ok(None) => {
                    closed = true;
                    break;
                }
                Err(_) => break,
            }
        }

        let current = scale.current();
        if (current - initial).abs() > epsilon && !has_changed.swap(true, Ordering::SeqCst) {
            info!(
                "Display scale changed from {} to {}, exports disabled until reload",
                initial, current
            );
        }

        if closed {
            break;
        }
    }
}
