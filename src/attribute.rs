//! Attributes: named, typed, directional values with a single binding.
//!
//! An [`Attribute`] keeps its current value in a `tokio::sync::watch` channel so
//! the transport layer can subscribe to changes without polling. The value is
//! only ever replaced by the attribute's binding (on refresh) or by a client
//! write that succeeded; both paths hold the attribute's guard while doing so.
//!
//! Composite group members share their group's guard instead of owning one,
//! which serializes every write to the group with the trigger's refresh.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, MutexGuard};

use crate::binding::Binding;
use crate::value::{AttributeValue, ValueType};

/// Whether clients may write the attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum Direction {
    ReadOnly,
    ReadWrite,
}

/// How much the cached value can be trusted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Freshness {
    /// Never fetched nor written
    Initial,
    /// Last fetch or write succeeded
    Fresh,
    /// Last background fetch failed; value is the last good one
    Stale,
}

/// Snapshot of an attribute's current state.
#[derive(Clone, Debug, PartialEq)]
pub struct Reading {
    /// Last known value
    pub value: AttributeValue,
    /// When the value was last confirmed by hardware or a client write
    pub updated_at: Option<DateTime<Utc>>,
    /// Trust level of `value`
    pub freshness: Freshness,
}

/// Static description of an attribute, supplied at registration.
#[derive(Clone, Debug, PartialEq)]
pub struct AttributeDescriptor {
    name: String,
    direction: Direction,
    value_type: ValueType,
    group: Option<String>,
    update_period: Option<Duration>,
    initial: Option<AttributeValue>,
}

impl AttributeDescriptor {
    /// Describe an attribute.
    pub fn new(name: impl Into<String>, direction: Direction, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            direction,
            value_type,
            group: None,
            update_period: None,
            initial: None,
        }
    }

    /// Shorthand for a read-only attribute.
    pub fn read_only(name: impl Into<String>, value_type: ValueType) -> Self {
        Self::new(name, Direction::ReadOnly, value_type)
    }

    /// Shorthand for a read-write attribute.
    pub fn read_write(name: impl Into<String>, value_type: ValueType) -> Self {
        Self::new(name, Direction::ReadWrite, value_type)
    }

    /// Cosmetic classification label.
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Periodic refresh interval. A zero duration means "never auto-refreshed".
    pub fn with_update_period(mut self, period: Duration) -> Self {
        self.update_period = (!period.is_zero()).then_some(period);
        self
    }

    /// Value held before the first fetch or write.
    pub fn with_initial(mut self, value: AttributeValue) -> Self {
        self.initial = Some(value);
        self
    }

    /// Attribute name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attribute direction
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Declared type
    pub fn value_type(&self) -> &ValueType {
        &self.value_type
    }

    /// Classification label
    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    /// Refresh interval, `None` when never auto-refreshed
    pub fn update_period(&self) -> Option<Duration> {
        self.update_period
    }

    pub(crate) fn initial(&self) -> Option<&AttributeValue> {
        self.initial.as_ref()
    }
}

/// Client-facing listing entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttributeInfo {
    /// Attribute name
    pub name: String,
    /// Read-only or read-write
    pub direction: Direction,
    /// Declared type
    pub value_type: ValueType,
    /// Classification label
    pub group: Option<String>,
    /// Refresh interval
    #[serde(with = "humantime_serde")]
    pub update_period: Option<Duration>,
}

/// A registered attribute with its binding and current value.
pub struct Attribute {
    descriptor: AttributeDescriptor,
    binding: Binding,
    sender: watch::Sender<Reading>,
    guard: Arc<Mutex<()>>,
}

impl std::fmt::Debug for Attribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attribute")
            .field("descriptor", &self.descriptor)
            .field("binding", &self.binding)
            .field("value", &self.sender.borrow().value)
            .finish()
    }
}

impl Attribute {
    pub(crate) fn new(descriptor: AttributeDescriptor, binding: Binding, guard: Arc<Mutex<()>>) -> Self {
        let value = descriptor
            .initial()
            .cloned()
            .unwrap_or_else(|| descriptor.value_type().default_value());
        let (sender, _) = watch::channel(Reading {
            value,
            updated_at: None,
            freshness: Freshness::Initial,
        });
        Self {
            descriptor,
            binding,
            sender,
            guard,
        }
    }

    /// Attribute name
    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    /// Attribute direction
    pub fn direction(&self) -> Direction {
        self.descriptor.direction()
    }

    /// Declared type
    pub fn value_type(&self) -> &ValueType {
        self.descriptor.value_type()
    }

    /// Classification label
    pub fn group(&self) -> Option<&str> {
        self.descriptor.group()
    }

    /// Refresh interval
    pub fn update_period(&self) -> Option<Duration> {
        self.descriptor.update_period()
    }

    /// The attribute's only binding.
    pub fn binding(&self) -> &Binding {
        &self.binding
    }

    /// Whether a client write can ever succeed.
    pub fn is_writable(&self) -> bool {
        self.direction() == Direction::ReadWrite && self.binding.accepts_push()
    }

    /// Current value (clone).
    pub fn value(&self) -> AttributeValue {
        self.sender.borrow().value.clone()
    }

    /// Current value with freshness and timestamp.
    pub fn reading(&self) -> Reading {
        self.sender.borrow().clone()
    }

    /// Subscribe to value changes.
    pub fn subscribe(&self) -> watch::Receiver<Reading> {
        self.sender.subscribe()
    }

    /// Listing entry for the client surface.
    pub fn info(&self) -> AttributeInfo {
        AttributeInfo {
            name: self.name().to_string(),
            direction: self.direction(),
            value_type: self.value_type().clone(),
            group: self.group().map(str::to_string),
            update_period: self.update_period(),
        }
    }

    /// Serialize updates to this attribute (or its composite group).
    pub(crate) async fn lock(&self) -> MutexGuard<'_, ()> {
        self.guard.lock().await
    }

    pub(crate) fn store(&self, value: AttributeValue) {
        self.sender.send_replace(Reading {
            value,
            updated_at: Some(Utc::now()),
            freshness: Freshness::Fresh,
        });
    }

    pub(crate) fn mark_stale(&self) {
        self.sender.send_if_modified(|reading| {
            if reading.freshness == Freshness::Stale {
                false
            } else {
                reading.freshness = Freshness::Stale;
                true
            }
        });
    }
}
