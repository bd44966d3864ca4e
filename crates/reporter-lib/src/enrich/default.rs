//! Fallback handler built purely from the event itself

use std::collections::BTreeMap;

use super::EventHandler;
use crate::fingerprint::fingerprint_from_reference;
use crate::models::EventRecord;

/// Groups by the involved object reference and tags with the event labels
#[derive(Debug, Clone)]
pub struct DefaultHandler {
    fingerprint: Vec<String>,
    tags: BTreeMap<String, String>,
}

impl DefaultHandler {
    pub fn new(event: &EventRecord) -> Self {
        Self {
            fingerprint: fingerprint_from_reference(&event.involved_object),
            tags: event.meta.labels.clone(),
        }
    }
}

impl EventHandler for DefaultHandler {
    fn fingerprint(&self) -> Vec<String> {
        self.fingerprint.clone()
    }

    fn tags(&self) -> BTreeMap<String, String> {
        self.tags.clone()
    }
}
