//! One-shot snapshot bootstrap.
//!
//! The snapshot endpoint returns a point-in-time materialization of one
//! timeline; [`SnapshotSource::fetch`] turns it into a [`Bootstrap`] — the
//! seed items plus the high-water mark below which live events are
//! redundant. Fetching never touches the store: the session only seeds
//! after a fully successful decode, so a failed bootstrap leaves no
//! partial state behind.

use async_trait::async_trait;
use tideline_types::{Item, SnapshotResponse};
use tracing::{debug, info};
use url::Url;

use crate::constants::SNAPSHOT_TIMEOUT;

/// A fully decoded snapshot, ready to seed the store.
#[derive(Clone, Debug, PartialEq)]
pub struct Bootstrap {
    pub items: Vec<Item>,
    /// `max(snapshot.version, max item.version)` — the initial frontier.
    pub high_water_mark: u64,
}

/// Why a bootstrap failed. One typed failure per attempt; the session
/// reports it and tears down rather than retrying on its own.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("snapshot endpoint returned HTTP {status} for '{target}'")]
    Status { target: String, status: u16 },
    #[error("snapshot body did not decode: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid snapshot url: {0}")]
    Url(#[from] url::ParseError),
}

/// Where snapshots come from. The HTTP implementation is the production
/// path; tests substitute an in-process stub.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Fetch and fully decode the snapshot for one target timeline.
    async fn fetch(&self, target_id: &str) -> Result<Bootstrap, SnapshotError>;
}

/// `GET {base}/timelines/{target}/snapshot` over HTTP.
pub struct HttpSnapshotSource {
    http: reqwest::Client,
    base: Url,
}

impl HttpSnapshotSource {
    /// Create a source rooted at `base` (e.g. `https://host/api/`).
    pub fn new(base: Url) -> Self {
        let http = reqwest::Client::builder()
            .timeout(SNAPSHOT_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { http, base }
    }
}

#[async_trait]
impl SnapshotSource for HttpSnapshotSource {
    async fn fetch(&self, target_id: &str) -> Result<Bootstrap, SnapshotError> {
        let url = self.base.join(&format!("timelines/{target_id}/snapshot"))?;
        debug!(%url, "fetching snapshot");

        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SnapshotError::Status {
                target: target_id.to_string(),
                status: status.as_u16(),
            });
        }

        // Decode from the raw body so a malformed payload surfaces as a
        // decode failure, distinct from transport trouble.
        let body = response.text().await?;
        let snapshot: SnapshotResponse = serde_json::from_str(&body)?;

        let high_water_mark = snapshot.high_water_mark();
        info!(
            target = target_id,
            items = snapshot.items.len(),
            high_water_mark,
            "snapshot decoded"
        );
        Ok(Bootstrap {
            items: snapshot.items,
            high_water_mark,
        })
    }
}
