//! Session-scoped registry of tracked objects and their last known position

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, MutexGuard};

use super::tile::{BoundingBox, GeoPoint};

pub type ObjectId = u64;

#[derive(Clone, Debug, PartialEq)]
pub struct TrackedObject {
    pub id: ObjectId,
    pub name: String,
    pub location: GeoPoint,
}

/// Sent to every subscriber when an object moves, appears or disappears
#[derive(Clone, Debug, PartialEq)]
pub struct LocationChange {
    pub id: ObjectId,
    /// None when the object was removed
    pub current: Option<TrackedObject>,
    /// None when the object was not known before
    pub previous: Option<GeoPoint>,
}

impl LocationChange {
    /// Whether a view showing `area` has to redraw its markers
    pub fn affects(&self, area: &BoundingBox) -> bool {
        self.current
            .as_ref()
            .is_some_and(|o| area.contains_point(&o.location))
            || self.previous.is_some_and(|p| area.contains_point(&p))
    }
}

pub struct Subscription {
    pub id: u64,
    pub receiver: Receiver<LocationChange>,
}

/// Shared by every map view of one application session.
///
/// Subscribers receive changes over a channel and drain it on their own
/// thread; a subscriber whose receiver is gone is pruned on the next change.
pub struct GeoLocationContext {
    objects: Mutex<HashMap<ObjectId, TrackedObject>>,
    observers: Mutex<Vec<(u64, Sender<LocationChange>)>>,
    next_subscription: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl GeoLocationContext {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            observers: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        let (tx, receiver) = mpsc::channel();
        lock(&self.observers).push((id, tx));
        Subscription { id, receiver }
    }

    pub fn unsubscribe(&self, id: u64) {
        lock(&self.observers).retain(|(observer, _)| *observer != id);
    }

    pub fn observer_count(&self) -> usize {
        lock(&self.observers).len()
    }

    fn notify(&self, change: LocationChange) {
        lock(&self.observers).retain(|(_, tx)| tx.send(change.clone()).is_ok());
    }

    /// Record a new position; subscribers are told about the previous one
    pub fn update_location(&self, id: ObjectId, name: &str, location: GeoPoint) {
        let object = TrackedObject {
            id,
            name: name.to_string(),
            location,
        };
        let previous = lock(&self.objects)
            .insert(id, object.clone())
            .map(|old| old.location);
        self.notify(LocationChange {
            id,
            current: Some(object),
            previous,
        });
    }

    pub fn remove_object(&self, id: ObjectId) -> Option<TrackedObject> {
        let removed = lock(&self.objects).remove(&id)?;
        self.notify(LocationChange {
            id,
            current: None,
            previous: Some(removed.location),
        });
        Some(removed)
    }

    pub fn object(&self, id: ObjectId) -> Option<TrackedObject> {
        lock(&self.objects).get(&id).cloned()
    }

    /// Objects inside `area`, ordered by id, optionally filtered by a
    /// case-insensitive name substring
    pub fn objects_in_area(&self, area: &BoundingBox, filter: Option<&str>) -> Vec<TrackedObject> {
        let needle = filter.map(str::to_lowercase);
        let mut found: Vec<TrackedObject> = lock(&self.objects)
            .values()
            .filter(|o| area.contains_point(&o.location))
            .filter(|o| {
                needle
                    .as_deref()
                    .is_none_or(|n| o.name.to_lowercase().contains(n))
            })
            .cloned()
            .collect();
        found.sort_by_key(|o| o.id);
        found
    }

    pub fn len(&self) -> usize {
        lock(&self.objects).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.objects).is_empty()
    }
}

impl Default for GeoLocationContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(lat: f64, lon: f64) -> GeoPoint {
        GeoPoint::new(lat, lon).unwrap()
    }

    #[test]
    fn test_subscriber_sees_previous_location() {
        let context = GeoLocationContext::new();
        let sub = context.subscribe();
        context.update_location(7, "node", point(1.0, 1.0));
        context.update_location(7, "node", point(2.0, 2.0));

        let first = sub.receiver.try_recv().unwrap();
        assert_eq!(first.previous, None);
        let second = sub.receiver.try_recv().unwrap();
        assert_eq!(second.previous, Some(point(1.0, 1.0)));
        assert_eq!(second.current.unwrap().location, point(2.0, 2.0));
    }

    #[test]
    fn test_change_affects_area_by_either_location() {
        let area = BoundingBox::new(0.0, 5.0, 0.0, 5.0);
        let moved_out = LocationChange {
            id: 1,
            current: Some(TrackedObject {
                id: 1,
                name: "x".into(),
                location: point(50.0, 50.0),
            }),
            previous: Some(point(1.0, 1.0)),
        };
        assert!(moved_out.affects(&area));

        let elsewhere = LocationChange {
            previous: Some(point(60.0, 60.0)),
            ..moved_out.clone()
        };
        assert!(!elsewhere.affects(&area));
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let context = GeoLocationContext::new();
        let kept = context.subscribe();
        drop(context.subscribe());
        assert_eq!(context.observer_count(), 2);
        context.update_location(1, "a", point(0.0, 0.0));
        assert_eq!(context.observer_count(), 1);
        context.unsubscribe(kept.id);
        assert_eq!(context.observer_count(), 0);
    }

    #[test]
    fn test_remove_object_notifies() {
        let context = GeoLocationContext::new();
        context.update_location(3, "gone", point(3.0, 3.0));
        let sub = context.subscribe();
        assert!(context.remove_object(3).is_some());
        let change = sub.receiver.try_recv().unwrap();
        assert_eq!(change.current, None);
        assert_eq!(change.previous, Some(point(3.0, 3.0)));
        assert!(context.is_empty());
    }

    #[test]
    fn test_objects_in_area_filter() {
        let context = GeoLocationContext::new();
        context.update_location(2, "Core Switch", point(1.0, 1.0));
        context.update_location(1, "edge router", point(2.0, 2.0));
        let area = BoundingBox::new(0.0, 3.0, 0.0, 3.0);

        let all: Vec<_> = context.objects_in_area(&area, None).into_iter().map(|o| o.id).collect();
        assert_eq!(all, vec![1, 2]);
        let filtered = context.objects_in_area(&area, Some("SWITCH"));
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name, "Core Switch");
    }
}
