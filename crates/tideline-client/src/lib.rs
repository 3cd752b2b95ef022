//! Tideline sync engine.
//!
//! Keeps a locally materialized, insertion-ordered timeline synchronized
//! against an authoritative server that emits typed events over a
//! long-lived connection: snapshot bootstrap, live tailing, buffering
//! during bootstrap, version-gated merges, and reconnect/follow control.
//!
//! Consumed bottom-up:
//!
//! - [`TimelineStore`] — the materialized, versioned item collection.
//! - [`NormalizerRegistry`] — per-kind props repair at merge time.
//! - [`EventDispatcher`] — wire envelope → typed handler → store deltas.
//! - [`SnapshotSource`] / [`HttpSnapshotSource`] — the one-shot bootstrap.
//! - [`SessionCore`] / [`spawn_session`] — the connection state machine
//!   and its tokio driver.
//!
//! There is exactly one authoritative producer; the engine needs
//! last-writer-wins-by-version, not conflict merging. All registries are
//! owned objects — two sessions can run side by side with different
//! registrations and never share state.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use tideline_client::{
//!     spawn_session, EventDispatcher, HttpSnapshotSource, SessionConfig, WebSocketTransport,
//! };
//! use url::Url;
//!
//! # fn main() -> Result<(), url::ParseError> {
//! let transport = Arc::new(WebSocketTransport::new(Url::parse("wss://host/api/")?));
//! let snapshots = Arc::new(HttpSnapshotSource::new(Url::parse("https://host/api/")?));
//! let session = spawn_session(
//!     SessionConfig::default(),
//!     transport,
//!     snapshots,
//!     EventDispatcher::with_defaults(),
//! );
//! session.connect("conv-42");
//! // render: session.timeline().lock().items() ...
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod constants;
pub mod dispatch;
pub mod normalize;
pub mod session;
pub mod store;
pub mod transport;

pub use bootstrap::{Bootstrap, HttpSnapshotSource, SnapshotError, SnapshotSource};
pub use dispatch::{
    DispatchContext, DispatchOutcome, EventDispatcher, EventHandler, SkipReason,
};
pub use normalize::NormalizerRegistry;
pub use session::{
    spawn_session, BootstrapDisposition, ConnectAction, FrameDisposition, SessionConfig,
    SessionCore, SessionEvent, SessionHandle, SessionStatus,
};
pub use store::{Merge, SharedTimeline, TimelineStore};
pub use transport::{LinkEvent, Transport, TransportError, TransportLink, WebSocketTransport};
