//! Lookups over the media and trigger stores.

use crate::models::{MediaItem, MediaType, Trigger};
use crate::store::{RecordStore, StoreError};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;

/// Return the media record for `url`, creating it if none exists.
///
/// A new record gets a fresh UUID, `name` defaulting to the last path
/// segment of the URL and `metadata` defaulting to an empty object.
///
/// # Errors
///
/// Returns an error if the store cannot be read or written.
pub async fn ensure_media_for_url<S>(
    store: &S,
    media_type: MediaType,
    url: &str,
    name: Option<String>,
    metadata: Option<Map<String, Value>>,
) -> Result<MediaItem, StoreError>
where
    S: RecordStore<MediaItem> + ?Sized,
{
    if let Some(existing) = store
        .get_all()
        .await?
        .into_values()
        .find(|item| item.url == url)
    {
        return Ok(existing);
    }

    let id = Uuid::new_v4().to_string();
    let record = MediaItem {
        id: id.clone(),
        media_type,
        url: url.to_owned(),
        name: name.unwrap_or_else(|| url.rsplit('/').next().unwrap_or(url).to_owned()),
        size: None,
        metadata: metadata.unwrap_or_default(),
    };
    store.save(&id, record.clone()).await?;

    debug!(id = %id, url = %url, media_type = %media_type, "Media record created");
    Ok(record)
}

/// Filter for [`query_triggers`]. Absent fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TriggerQuery {
    #[serde(default, rename = "type")]
    pub media_type: Option<MediaType>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
}

impl TriggerQuery {
    /// `true` when no field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.media_type.is_none() && self.url.is_none() && self.name.is_none() && self.id.is_none()
    }

    /// `true` when `trigger` satisfies every supplied field.
    #[must_use]
    pub fn matches(&self, trigger: &Trigger) -> bool {
        self.id.as_ref().map_or(true, |id| &trigger.id == id)
            && self.name.as_ref().map_or(true, |name| &trigger.name == name)
            && self
                .media_type
                .map_or(true, |media_type| trigger.item.media_type == media_type)
            && self.url.as_ref().map_or(true, |url| &trigger.item.url == url)
    }
}

/// Triggers matching `query`, keyed by id.
///
/// # Errors
///
/// Returns an error if the store cannot be read.
pub async fn query_triggers<S>(
    store: &S,
    query: &TriggerQuery,
) -> Result<BTreeMap<String, Trigger>, StoreError>
where
    S: RecordStore<Trigger> + ?Sized,
{
    let all = store.get_all().await?;
    if query.is_empty() {
        return Ok(all);
    }

    Ok(all
        .into_iter()
        .filter(|(_, trigger)| query.matches(trigger))
        .collect())
}
