//! Change notification
//!
//! The record store announces every identifier whose data changed. How the
//! announcement travels is up to the [`ChangeNotifier`] implementation;
//! [`ChangeBus`] delivers it to in-process observers over channels.

use crate::uri::ResourceUri;
use crossbeam::channel::{self, Receiver, Sender};
use std::sync::Mutex;

/// Receives an announcement after each successful mutation.
///
/// Fire-and-forget: implementations must not fail the mutation.
pub trait ChangeNotifier: Send + Sync {
    fn notify_change(&self, uri: &ResourceUri);
}

/// Discards all announcements
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl ChangeNotifier for NoopNotifier {
    fn notify_change(&self, _uri: &ResourceUri) {}
}

struct Observer {
    uri: ResourceUri,
    descendants: bool,
    tx: Sender<ResourceUri>,
}

impl Observer {
    fn wants(&self, changed: &ResourceUri) -> bool {
        if self.uri == *changed {
            return true;
        }
        if self.uri.target().collection() != changed.target().collection() {
            return false;
        }
        match (self.uri.is_item(), changed.is_item()) {
            // collection observer, item changed
            (false, true) => self.descendants,
            // item observer, whole collection changed
            (true, false) => true,
            _ => false,
        }
    }
}

/// In-process observer registry.
#[derive(Default)]
pub struct ChangeBus {
    observers: Mutex<Vec<Observer>>,
}

impl ChangeBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Watch `uri`. With `descendants`, a collection observer also sees
    /// changes to the collection's items.
    pub fn subscribe(&self, uri: ResourceUri, descendants: bool) -> Receiver<ResourceUri> {
        let (tx, rx) = channel::unbounded();
        self.lock().push(Observer { uri, descendants, tx });
        rx
    }

    pub fn observer_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Observer>> {
        self.observers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ChangeNotifier for ChangeBus {
    fn notify_change(&self, uri: &ResourceUri) {
        tracing::debug!("Change: {}", uri);
        self.lock().retain(|observer| {
            if !observer.wants(uri) {
                return true;
            }
            // a send error means the receiver is gone
            observer.tx.send(*uri).is_ok()
        });
    }
}
