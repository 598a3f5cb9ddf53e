//! # Snapshot Export
//!
//! Turns a region of a live page (a bracket, group table, crosstable or match
//! list) into a branded PNG that can be copied to the clipboard or saved as a
//! file.
//!
//! ## Pipeline
//!
//! | Stage | Component | Notes |
//! |-------|-----------|-------|
//! | Discovery | [`RegionDiscovery`] | Regions grouped by nearest preceding heading |
//! | Capture | [`Rasterizer`] | Headless Chrome over a disposable working copy |
//! | Composition | [`CanvasComposer`] | Gradient header and footer, scale aware |
//! | Encoding | [`encode_png`] | Empty output is an error |
//! | Delivery | [`ClipboardSink`], [`DownloadSink`] | Timestamped, sanitized filenames |
//!
//! Only one export runs at a time. A second request while one is in flight
//! fails with [`ExportError::ExportInProgress`] instead of queueing. Once the
//! display scale changes after load, every export is refused until the page
//! is reloaded.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use snapshot_export::{dom, Document, ExportConfig, ExportMode, ModuleParts, SnapshotModule};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ExportConfig::default();
//!     let html = std::fs::read_to_string("page.html")?;
//!     let document = dom::share(Document::parse(&html));
//!
//!     let parts = ModuleParts::desktop(&config, Duration::from_secs(30))?;
//!     let module = SnapshotModule::new(&config, document, parts)?;
//!
//!     for group in module.init() {
//!         let region = &group.regions[0];
//!         let outcome = module
//!             .exporter()
//!             .export(region.element, &group.heading_text, ExportMode::Download)
//!             .await?;
//!         println!("{:?}", outcome);
//!     }
//!
//!     module.teardown();
//!     Ok(())
//! }
//! ```
//!
//! ## CLI Usage
//!
//! ```bash
//! snapshot-export list --input page.html
//! snapshot-export export --input page.html --heading "Playoffs" --mode download --output exports/
//! ```

/// Configuration and settings for the exporter
pub mod config;

/// Error types and user-facing notices
pub mod error;

/// Live host document model and CSS selectors
pub mod dom;

/// Region discovery and visibility checks
pub mod discovery;

/// Deduplicated, timeout-bounded brand asset loading
pub mod image_cache;

/// Branded frame composition around a captured bitmap
pub mod compose;

/// Display scale change detection
pub mod zoom;

/// DOM-to-bitmap rasterization
pub mod rasterizer;

/// PNG encoding, clipboard and download delivery
pub mod delivery;

/// Single-flight export orchestration
pub mod export_service;

/// Per-heading export menu
pub mod menu;

/// Session facade owning all exporter state
pub mod module;

/// Command-line interface implementation
pub mod cli;

/// Export metrics collection
pub mod metrics;

/// Utility functions and helpers
pub mod utils;

#[cfg(test)]
mod tests;

pub use cli::*;
pub use compose::*;
pub use config::*;
pub use delivery::*;
pub use discovery::*;
pub use dom::{Document, NodeId, Selector, SharedDocument};
pub use error::*;
pub use export_service::*;
pub use image_cache::*;
pub use menu::*;
pub use module::*;
pub use rasterizer::*;
pub use self::metrics::*;
pub use utils::*;
pub use zoom::*;
