//! Contact dial queue
//!
//! Each run owns one [`DialQueue`] holding the not-yet-attempted contacts
//! in strict FIFO order. The Run Coordinator pops from the front as lines
//! free up; nothing ever reorders the queue.

use std::collections::VecDeque;
use serde::{Deserialize, Serialize};

/// Denormalized snapshot of one contact, taken at enqueue time
///
/// Immutable once enqueued. The `membership_id` points back at the
/// list-membership row so the engine can write dial outcomes to the
/// store without re-resolving the contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    /// List-membership row identifier
    pub membership_id: String,
    /// Owning contact list
    pub list_id: String,
    /// Display name
    pub name: String,
    /// Primary phone number
    pub phone: Option<String>,
    /// Secondary phone number
    pub phone_secondary: Option<String>,
    /// Tertiary phone number
    pub phone_tertiary: Option<String>,
    /// City, for operator display
    pub city: Option<String>,
    /// State/region, for operator display
    pub state: Option<String>,
    /// Free-form tags
    pub tags: Vec<String>,
}

impl Contact {
    /// First non-empty phone number, if any
    ///
    /// Contacts with no usable number are filtered out before enqueue.
    pub fn dialable_number(&self) -> Option<&str> {
        [&self.phone, &self.phone_secondary, &self.phone_tertiary]
            .into_iter()
            .flatten()
            .map(|s| s.as_str())
            .find(|s| !s.trim().is_empty())
    }
}

/// FIFO queue of pending contacts for one run
#[derive(Debug, Default)]
pub struct DialQueue {
    contacts: VecDeque<Contact>,
}

impl DialQueue {
    /// Build a queue from list contacts, dropping entries without a
    /// usable phone number
    pub fn from_contacts(contacts: Vec<Contact>) -> Self {
        let contacts = contacts
            .into_iter()
            .filter(|c| c.dialable_number().is_some())
            .collect();
        Self { contacts }
    }

    /// Pop the next contact to dial
    pub fn pop(&mut self) -> Option<Contact> {
        self.contacts.pop_front()
    }

    /// Number of contacts still waiting
    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    /// First `limit` queued contacts, for UI snapshots
    pub fn preview(&self, limit: usize) -> Vec<Contact> {
        self.contacts.iter().take(limit).cloned().collect()
    }
}
