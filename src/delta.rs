//! Delta engine: classifies the current enumeration against the previous run
//!
//! Pure functions over in-memory sets; no I/O. The runner feeds the previous
//! run's snapshot in and persists the result as the next run's baseline.

use crate::model::{CrawlEnumeration, CrawledObject};
use std::collections::{HashMap, HashSet};

/// Partition `current` into Added / Changed / Unchanged / Deleted against
/// `previous`, then force-requeue still-present items from `previous_failed`
/// into Added so failures are retried every run until they succeed or
/// disappear from the source.
pub fn diff(
    current: Vec<CrawledObject>,
    previous: &[CrawledObject],
    previous_failed: &[CrawledObject],
) -> CrawlEnumeration {
    let previous_index: HashMap<String, &CrawledObject> = previous
        .iter()
        .map(|o| (o.normalized_key(), o))
        .collect();
    let current_keys: HashSet<String> =
        current.iter().map(|o| o.normalized_key()).collect();

    let mut enumeration = CrawlEnumeration::default();

    for object in &current {
        match previous_index.get(&object.normalized_key()) {
            None => enumeration.added.push(object.clone()),
            Some(prev) => {
                if is_changed(object, prev) {
                    enumeration.changed.push(object.clone());
                } else {
                    enumeration.unchanged.push(object.clone());
                }
            }
        }
    }

    for object in previous {
        if !current_keys.contains(&object.normalized_key()) {
            enumeration.deleted.push(object.without_payload());
        }
    }

    // Items that failed last run and still exist are reprocessed as
    // additions, unless this diff already queued them.
    for failed in previous_failed {
        let key = failed.normalized_key();
        if !current_keys.contains(&key) {
            continue;
        }
        let already_queued = enumeration
            .added
            .iter()
            .chain(enumeration.changed.iter())
            .any(|o| o.normalized_key() == key);
        if already_queued {
            continue;
        }
        if let Some(pos) = enumeration
            .unchanged
            .iter()
            .position(|o| o.normalized_key() == key)
        {
            let object = enumeration.unchanged.remove(pos);
            enumeration.added.push(object);
        }
    }

    enumeration.all_files = current;
    enumeration.recompute_statistics();
    enumeration
}

/// Change detection, weak to strong; first applicable rule wins.
pub fn is_changed(current: &CrawledObject, previous: &CrawledObject) -> bool {
    if current.content_length != previous.content_length {
        return true;
    }
    if let (Some(a), Some(b)) = (&current.etag, &previous.etag) {
        if !a.eq_ignore_ascii_case(b) {
            return true;
        }
    }
    if let (Some(a), Some(b)) = (&current.sha256, &previous.sha256) {
        if a != b {
            return true;
        }
    }
    if let (Some(a), Some(b)) = (&current.sha1, &previous.sha1) {
        if a != b {
            return true;
        }
    }
    if let (Some(a), Some(b)) = (&current.md5, &previous.md5) {
        if a != b {
            return true;
        }
    }
    if let (Some(a), Some(b)) = (&current.last_modified, &previous.last_modified) {
        // Compared at microsecond precision; storage backends round-trip
        // timestamps with differing sub-microsecond noise.
        let fmt = "%Y-%m-%dT%H:%M:%S%.6f";
        if a.format(fmt).to_string() != b.format(fmt).to_string() {
            return true;
        }
    }
    false
}
