//! Urgent notification buffer and the merged notification inbox.
//!
//! The buffer is a projection of the inbox: at most [`URGENT_CAPACITY`] unread
//! `critical` or `high` notifications. It is recomputed from every known
//! notification on each change, so a read item makes room for the next unread
//! one instead of leaving a gap.

use std::collections::HashMap;

use super::types::{Notification, NotificationId, NotificationPriority, PushMessage, ReadState};

pub const URGENT_CAPACITY: usize = 5;

fn newest_first(a: &Notification, b: &Notification) -> std::cmp::Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| b.id.cmp(&a.id))
}

fn critical_first(a: &Notification, b: &Notification) -> std::cmp::Ordering {
    let rank = |n: &Notification| (n.priority != NotificationPriority::Critical) as u8;
    rank(a).cmp(&rank(b)).then_with(|| newest_first(a, b))
}

/// How the urgent projection is ordered before truncation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UrgentOrder {
    /// Push steady state: most recent first regardless of priority.
    #[default]
    Newest,
    /// Pull bootstrap: every critical ahead of every high, newest first within each.
    CriticalFirst,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrgentBuffer {
    capacity: usize,
    items: Vec<Notification>,
}

impl Default for UrgentBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl UrgentBuffer {
    pub fn new() -> Self {
        Self::with_capacity(URGENT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            items: Vec::with_capacity(capacity),
        }
    }

    pub fn items(&self) -> &[Notification] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, id: NotificationId) -> bool {
        self.items.iter().any(|n| n.id == id)
    }

    /// Rebuild the buffer from `pool`: keep unread critical/high, sort by
    /// `order`, truncate to capacity.
    ///
    /// `pool` must hold each identity once. Returns whether the visible
    /// contents changed.
    pub fn project<'a>(
        &mut self,
        pool: impl IntoIterator<Item = &'a Notification>,
        order: UrgentOrder,
    ) -> bool {
        let mut items: Vec<Notification> = pool
            .into_iter()
            .filter(|n| n.is_urgent_unread())
            .cloned()
            .collect();
        match order {
            UrgentOrder::Newest => items.sort_by(newest_first),
            UrgentOrder::CriticalFirst => items.sort_by(critical_first),
        }
        items.truncate(self.capacity);

        let changed = items != self.items;
        self.items = items;
        changed
    }
}

/// Every notification seen through pull or push, keyed by identity, plus the
/// urgent projection.
#[derive(Debug, Default)]
pub struct NotificationInbox {
    all: HashMap<NotificationId, Notification>,
    urgent: UrgentBuffer,
    order: UrgentOrder,
}

impl NotificationInbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn urgent(&self) -> &[Notification] {
        self.urgent.items()
    }

    pub fn order(&self) -> UrgentOrder {
        self.order
    }

    pub fn get(&self, id: NotificationId) -> Option<&Notification> {
        self.all.get(&id)
    }

    /// Newest first.
    pub fn list(&self) -> Vec<Notification> {
        let mut list: Vec<Notification> = self.all.values().cloned().collect();
        list.sort_by(newest_first);
        list
    }

    pub fn unread_count(&self) -> usize {
        self.all.values().filter(|n| n.is_unread()).count()
    }

    fn remember(&mut self, notifications: impl IntoIterator<Item = Notification>) {
        for n in notifications {
            self.all.insert(n.id, n);
        }
    }

    fn reproject(&mut self) -> bool {
        self.urgent.project(self.all.values(), self.order)
    }

    /// Merge a pull listing. Returns whether the urgent buffer changed.
    pub fn merge_listing(&mut self, notifications: Vec<Notification>) -> bool {
        self.remember(notifications);
        self.order = UrgentOrder::Newest;
        self.reproject()
    }

    /// Apply a push message. Returns whether the urgent buffer changed.
    pub fn apply(&mut self, message: PushMessage) -> bool {
        match message {
            PushMessage::NewNotification(n) => self.merge_listing(vec![n]),
            PushMessage::UnreadSnapshot(list) => self.merge_listing(list),
            PushMessage::Other(_) => false,
        }
    }

    /// Merge the bootstrap pull. Entries already delivered by push stay; the
    /// projection switches to critical-before-high until the next push.
    pub fn bootstrap(&mut self, critical: Vec<Notification>, high: Vec<Notification>) -> bool {
        self.remember(critical);
        self.remember(high);
        self.order = UrgentOrder::CriticalFirst;
        self.reproject()
    }

    /// Mark a notification read locally. Returns whether the urgent buffer changed.
    pub fn mark_read(&mut self, id: NotificationId) -> bool {
        match self.all.get_mut(&id) {
            Some(n) => n.read_state = ReadState::Read,
            None => return false,
        }
        self.reproject()
    }
}
