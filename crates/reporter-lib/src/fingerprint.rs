//! Grouping keys for reports
//!
//! A fingerprint deliberately loses per-instance identity: every pod of a
//! ReplicaSet, or every generation of a generated name, lands in the same
//! group so the backend shows one issue instead of one per pod.

use crate::models::{EventRecord, ObjectMeta, ObjectRef};

/// Fingerprint of an object, folded onto its controller when it has one
pub fn fingerprint_from_meta(meta: &ObjectMeta) -> Vec<String> {
    if let Some(owner) = meta.controller() {
        return vec![
            owner.api_version.clone(),
            owner.kind.clone(),
            owner.name.clone(),
        ];
    }

    let name = if meta.generate_name.is_empty() {
        mangle_name(&meta.name)
    } else {
        meta.generate_name.clone()
    };

    vec![meta.namespace.clone(), name]
}

/// Strip generation suffixes from an object name
///
/// `web-7d9f8-x2x4z` becomes `web`; names with fewer than three
/// hyphen-separated segments keep only their first segment.
pub fn mangle_name(name: &str) -> String {
    let segments: Vec<&str> = name.split('-').collect();

    if segments.len() < 3 {
        return segments[0].to_string();
    }

    segments[..segments.len() - 2].join("-")
}

/// Fingerprint of an event's involved object when nothing richer is known
pub fn fingerprint_from_reference(object: &ObjectRef) -> Vec<String> {
    vec![
        object.api_version.clone(),
        object.kind.clone(),
        object.namespace.clone(),
        mangle_name(&object.name),
        object.field_path.clone(),
    ]
}

/// Segments every event fingerprint starts with
///
/// Keeps different kinds of problems on the same object apart.
pub fn event_prefix(event: &EventRecord) -> Vec<String> {
    vec![
        event.component.clone(),
        event.level.clone(),
        event.reason.clone(),
    ]
}
