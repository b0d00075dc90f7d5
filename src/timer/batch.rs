//! Read-only totals for list views ("time spent" badges). Nothing here is
//! cached; callers re-query whenever their id set changes.

use std::collections::HashMap;

use crate::{
    models::{ContentType, OwnerId},
    store::CounterStore,
};

const ENABLE_LOGS: bool = true;

use crate::log_warn;

/// Stored seconds for every id in `content_ids`, zero when no row exists.
///
/// An anonymous owner or a failing store yields all zeros; badges are not
/// worth an error.
pub async fn time_totals<S: CounterStore>(
    store: &S,
    owner: Option<&OwnerId>,
    content_type: ContentType,
    content_ids: &[String],
) -> HashMap<String, u64> {
    let mut totals: HashMap<String, u64> =
        content_ids.iter().map(|id| (id.clone(), 0)).collect();

    let Some(owner) = owner else {
        return totals;
    };
    if content_ids.is_empty() {
        return totals;
    }

    match store.read_totals(owner, content_type, content_ids).await {
        Ok(stored) => {
            for (id, seconds) in stored {
                if let Some(slot) = totals.get_mut(&id) {
                    *slot = seconds;
                }
            }
        }
        Err(err) => {
            log_warn!("could not load {content_type} totals: {err:#}");
        }
    }

    totals
}

pub async fn chapter_time_totals<S: CounterStore>(
    store: &S,
    owner: Option<&OwnerId>,
    chapter_ids: &[String],
) -> HashMap<String, u64> {
    time_totals(store, owner, ContentType::Chapter, chapter_ids).await
}

pub async fn quiz_time_totals<S: CounterStore>(
    store: &S,
    owner: Option<&OwnerId>,
    quiz_ids: &[String],
) -> HashMap<String, u64> {
    time_totals(store, owner, ContentType::Quiz, quiz_ids).await
}
