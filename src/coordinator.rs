//! Composite write coordination.
//!
//! Some detector settings only exist as one structured hardware property: the
//! pedestal mode takes frames, loops and an enable flag in a single call. Each
//! field is exposed as its own attribute, so writes have to be gathered here.
//!
//! Per group the coordinator runs a small state machine:
//!
//! ```text
//!            write(non-trigger)              write(trigger)
//!   Idle ───────────────────────▶ Staged ─────────────────▶ Pushed ──ok──▶ Idle
//!                                   ▲                          │
//!                                   └────────── err ───────────┘
//! ```
//!
//! A non-trigger write only updates the member's cached value. A trigger write
//! reads the current value of every member and issues exactly one
//! `set_composite` call. Members keep their staged values if that call fails.
//!
//! All members of a group share one guard, so the registry holds the same lock
//! for every write to the group and for the trigger's refresh.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::accessor::{CompositePayload, HardwareAccessor};
use crate::attribute::{Attribute, AttributeDescriptor};
use crate::binding::{code_for, symbol_for};
use crate::error::{AppResult, DaqError};
use crate::translator::EnumTranslator;
use crate::value::{AttributeValue, ValueType};

/// Lifecycle of a composite group's pending changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupPhase {
    /// Hardware matches the last push
    Idle,
    /// At least one member changed since the last successful push
    Staged,
    /// A push is in flight
    Pushed,
}

/// Non-trigger member: attribute name and payload field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompositeField {
    attribute: String,
    field: String,
}

impl CompositeField {
    /// Attribute name
    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    /// Payload field name
    pub fn field(&self) -> &str {
        &self.field
    }
}

/// Trigger member; its symbol is pushed as a boolean field.
#[derive(Clone, Debug)]
pub struct CompositeTrigger {
    attribute: String,
    field: String,
    translator: Arc<EnumTranslator>,
}

impl CompositeTrigger {
    /// Trigger whose symbol maps to `field = (code != 0)`.
    ///
    /// The translator must map exactly the codes 0 and 1; the group is
    /// rejected otherwise.
    pub fn new(
        attribute: impl Into<String>,
        field: impl Into<String>,
        translator: Arc<EnumTranslator>,
    ) -> Self {
        Self {
            attribute: attribute.into(),
            field: field.into(),
            translator,
        }
    }

    /// Attribute name
    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    /// Payload field name
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Symbol table of the trigger attribute
    pub fn translator(&self) -> &EnumTranslator {
        &self.translator
    }
}

/// Definition of a composite group.
#[derive(Clone, Debug)]
pub struct CompositeGroup {
    id: String,
    command: String,
    members: Vec<CompositeField>,
    trigger: CompositeTrigger,
}

impl CompositeGroup {
    /// New group pushed through `command`.
    pub fn new(id: impl Into<String>, command: impl Into<String>, trigger: CompositeTrigger) -> Self {
        Self {
            id: id.into(),
            command: command.into(),
            members: Vec::new(),
            trigger,
        }
    }

    /// Add a non-trigger member. Payload order follows insertion order.
    pub fn with_member(mut self, attribute: impl Into<String>, field: impl Into<String>) -> Self {
        self.members.push(CompositeField {
            attribute: attribute.into(),
            field: field.into(),
        });
        self
    }

    /// Group id referenced by member bindings
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Hardware command receiving the payload
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Non-trigger members in payload order
    pub fn members(&self) -> &[CompositeField] {
        &self.members
    }

    /// The trigger member
    pub fn trigger(&self) -> &CompositeTrigger {
        &self.trigger
    }

    /// Names of every member, trigger last.
    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.members
            .iter()
            .map(CompositeField::attribute)
            .chain(std::iter::once(self.trigger.attribute()))
    }

    fn is_trigger(&self, attribute: &str) -> bool {
        self.trigger.attribute == attribute
    }

    fn contains(&self, attribute: &str) -> bool {
        self.attribute_names().any(|name| name == attribute)
    }

    fn check(&self) -> AppResult<()> {
        let invalid = |reason: String| DaqError::InvalidGroup {
            group: self.id.clone(),
            reason,
        };

        let mut names = Vec::new();
        for name in self.attribute_names() {
            if names.contains(&name) {
                return Err(invalid(format!("attribute '{}' listed twice", name)));
            }
            names.push(name);
        }

        let mut fields: Vec<&str> = Vec::new();
        let all_fields = self
            .members
            .iter()
            .map(CompositeField::field)
            .chain(std::iter::once(self.trigger.field()));
        for field in all_fields {
            if fields.contains(&field) {
                return Err(invalid(format!("field '{}' used twice", field)));
            }
            fields.push(field);
        }

        let mut codes: Vec<i64> = self.trigger.translator.entries().map(|(_, code)| code).collect();
        codes.sort_unstable();
        if codes != [0, 1] {
            return Err(invalid(format!(
                "trigger '{}' must map exactly the codes 0 and 1, got {:?}",
                self.trigger.attribute, codes
            )));
        }
        Ok(())
    }
}

struct GroupSlot {
    group: CompositeGroup,
    guard: Arc<Mutex<()>>,
    phase: StdMutex<GroupPhase>,
    attached: HashMap<String, Arc<Attribute>>,
}

impl GroupSlot {
    fn set_phase(&self, phase: GroupPhase) {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = phase;
    }

    fn phase(&self) -> GroupPhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn member(&self, name: &str) -> AppResult<&Arc<Attribute>> {
        self.attached.get(name).ok_or_else(|| DaqError::InvalidGroup {
            group: self.group.id.clone(),
            reason: format!("member '{}' was never registered", name),
        })
    }

    /// Current value of every member, with `trigger_value` for the trigger.
    fn payload(&self, trigger_value: &AttributeValue) -> AppResult<CompositePayload> {
        let mut payload = CompositePayload::new();
        for field in &self.group.members {
            let value = self.member(&field.attribute)?.value();
            payload.push(field.field.as_str(), value.to_raw());
        }
        let trigger = &self.group.trigger;
        let code = code_for(&trigger.translator, &trigger.attribute, trigger_value)?;
        payload.push(trigger.field.as_str(), code != 0);
        Ok(payload)
    }
}

/// Gathers member writes per composite group and pushes them atomically.
#[derive(Default)]
pub struct CompositeWriteCoordinator {
    slots: HashMap<String, GroupSlot>,
}

impl std::fmt::Debug for CompositeWriteCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.slots.iter().map(|(id, slot)| (id, slot.phase())))
            .finish()
    }
}

impl CompositeWriteCoordinator {
    /// Empty coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase of `group`, `None` if unknown.
    pub fn phase(&self, group: &str) -> Option<GroupPhase> {
        self.slots.get(group).map(GroupSlot::phase)
    }

    /// Definition of `group`.
    pub fn group(&self, group: &str) -> Option<&CompositeGroup> {
        self.slots.get(group).map(|slot| &slot.group)
    }

    /// Registered group ids.
    pub fn group_ids(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }

    /// Whether `attribute` is the trigger of `group`.
    pub fn is_trigger(&self, group: &str, attribute: &str) -> bool {
        self.slots
            .get(group)
            .is_some_and(|slot| slot.group.is_trigger(attribute))
    }

    pub(crate) fn add_group(&mut self, group: CompositeGroup) -> AppResult<()> {
        if self.slots.contains_key(group.id()) {
            return Err(DaqError::InvalidGroup {
                group: group.id().to_string(),
                reason: "group already defined".into(),
            });
        }
        group.check()?;
        debug!(group = %group.id(), command = %group.command(), "composite group defined");
        self.slots.insert(
            group.id().to_string(),
            GroupSlot {
                group,
                guard: Arc::new(Mutex::new(())),
                phase: StdMutex::new(GroupPhase::Idle),
                attached: HashMap::new(),
            },
        );
        Ok(())
    }

    /// Guard a new member must share, after checking it fits the group.
    pub(crate) fn member_guard(
        &self,
        group: &str,
        descriptor: &AttributeDescriptor,
    ) -> AppResult<Arc<Mutex<()>>> {
        let invalid = |reason: String| DaqError::InvalidGroup {
            group: group.to_string(),
            reason,
        };
        let slot = self
            .slots
            .get(group)
            .ok_or_else(|| invalid("group is not defined".into()))?;
        let name = descriptor.name();

        if !slot.group.contains(name) {
            return Err(invalid(format!("'{}' is not a member", name)));
        }
        if slot.attached.contains_key(name) {
            return Err(DaqError::DuplicateName(name.to_string()));
        }

        let is_enum = matches!(descriptor.value_type(), ValueType::Enum(_));
        if slot.group.is_trigger(name) {
            if descriptor.value_type() != &slot.group.trigger.translator.value_type() {
                return Err(invalid(format!(
                    "trigger '{}' must be declared as {}",
                    name,
                    slot.group.trigger.translator.value_type()
                )));
            }
        } else if is_enum {
            return Err(invalid(format!("non-trigger member '{}' cannot be an enum", name)));
        }

        Ok(slot.guard.clone())
    }

    pub(crate) fn attach(&mut self, group: &str, attribute: Arc<Attribute>) -> AppResult<()> {
        let slot = self.slots.get_mut(group).ok_or_else(|| DaqError::InvalidGroup {
            group: group.to_string(),
            reason: "group is not defined".into(),
        })?;
        slot.attached.insert(attribute.name().to_string(), attribute);
        Ok(())
    }

    /// Every member of every group has been registered.
    pub(crate) fn check_complete(&self) -> AppResult<()> {
        for slot in self.slots.values() {
            for name in slot.group.attribute_names() {
                slot.member(name)?;
            }
        }
        Ok(())
    }

    /// Apply a validated client write to a group member.
    ///
    /// The caller must hold the member's guard.
    pub(crate) async fn write(
        &self,
        group: &str,
        attribute: &Attribute,
        value: AttributeValue,
        accessor: &dyn HardwareAccessor,
    ) -> AppResult<()> {
        let slot = self.slots.get(group).ok_or_else(|| DaqError::InvalidGroup {
            group: group.to_string(),
            reason: "group is not defined".into(),
        })?;

        if !slot.group.is_trigger(attribute.name()) {
            attribute.store(value);
            slot.set_phase(GroupPhase::Staged);
            debug!(group, attribute = %attribute.name(), "member staged");
            return Ok(());
        }

        let payload = slot.payload(&value)?;
        attribute.store(value);
        slot.set_phase(GroupPhase::Pushed);

        let command = slot.group.command();
        match accessor.set_composite(command, payload.clone()).await {
            Ok(()) => {
                slot.set_phase(GroupPhase::Idle);
                info!(group, command, payload = ?payload, "composite pushed");
                Ok(())
            }
            Err(e) => {
                slot.set_phase(GroupPhase::Staged);
                warn!(group, command, error = %e, "composite push failed");
                Err(DaqError::hardware(command, e))
            }
        }
    }

    /// Read the trigger's symbol back from hardware.
    pub(crate) async fn read_trigger(
        &self,
        group: &str,
        accessor: &dyn HardwareAccessor,
    ) -> AppResult<AttributeValue> {
        let slot = self.slots.get(group).ok_or_else(|| DaqError::InvalidGroup {
            group: group.to_string(),
            reason: "group is not defined".into(),
        })?;
        let command = slot.group.command();
        let trigger = &slot.group.trigger;

        let payload = accessor
            .get_composite(command)
            .await
            .map_err(|e| DaqError::hardware(command, e))?;
        let enabled = payload
            .get(&trigger.field)
            .and_then(|raw| raw.as_bool())
            .ok_or_else(|| DaqError::TypeMismatch {
                attribute: trigger.attribute.clone(),
                expected: format!("bool field '{}'", trigger.field),
                actual: payload
                    .get(&trigger.field)
                    .map_or("missing", |raw| raw.kind())
                    .to_string(),
            })?;
        symbol_for(&trigger.translator, &trigger.attribute, i64::from(enabled))
    }
}
