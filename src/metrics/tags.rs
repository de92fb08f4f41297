//! Per-connection tag accumulator.
//!
//! Pipeline stages append dimensions while the connection is live; the
//! recorder seals the accumulator at connection stop and merges its
//! contents into the connection-duration measurement.

use super::instruments::tag_keys;
use crate::meter::{Tag, TagValue};
use parking_lot::Mutex;
use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Ordered bag of custom tags for one connection.
#[derive(Debug, Default)]
pub struct TagAccumulator {
    tags: Mutex<Vec<Tag>>,
    sealed: AtomicBool,
}

impl TagAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a tag. Reserved keys and additions after the connection
    /// stopped are dropped.
    pub fn add(&self, key: impl Into<Cow<'static, str>>, value: impl Into<TagValue>) {
        let key = key.into();
        if tag_keys::is_reserved(&key) {
            debug!(key = %key, "Reserved tag key rejected");
            return;
        }
        let mut tags = self.tags.lock();
        if self.sealed.load(Ordering::Acquire) {
            debug!(key = %key, "Tag added after connection stop ignored");
            return;
        }
        tags.push(Tag {
            key,
            value: value.into(),
        });
    }

    /// Copy of the tags added so far.
    pub fn snapshot(&self) -> Vec<Tag> {
        self.tags.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.tags.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// Stop accepting tags and return the final set.
    pub(crate) fn seal(&self) -> Vec<Tag> {
        let tags = self.tags.lock();
        self.sealed.store(true, Ordering::Release);
        tags.clone()
    }
}
