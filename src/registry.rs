//! Attribute registry and client-facing surface.
//!
//! The registry owns every [`Attribute`], every [`CommandBinding`] and the
//! [`CompositeWriteCoordinator`]. It is built during the initialise phase
//! through `&mut self` registration calls, then sealed and shared behind an
//! `Arc` with the Scheduler and the transport layer.
//!
//! # Read policy
//!
//! - Scheduled attributes (non-zero update period) return the cached value;
//!   the Scheduler keeps it current.
//! - Unscheduled attributes whose binding can fetch (simple, enum, computed,
//!   composite trigger) are fetched on every read.
//! - Unscheduled non-trigger composite members return the staged value.
//!
//! # Write path
//!
//! Validation happens before any hardware call: unknown name, read-only
//! direction, computed binding, type and enum symbol. The attribute's guard is
//! then held across the hardware call and the cache update.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, trace};

use crate::accessor::HardwareAccessor;
use crate::attribute::{Attribute, AttributeDescriptor, AttributeInfo, Reading};
use crate::binding::Binding;
use crate::command::CommandBinding;
use crate::coordinator::{CompositeGroup, CompositeWriteCoordinator};
use crate::error::{AppResult, DaqError};
use crate::value::AttributeValue;

/// Registry of attributes and commands bound to one hardware accessor.
pub struct AttributeRegistry {
    accessor: Arc<dyn HardwareAccessor>,
    attributes: HashMap<String, Arc<Attribute>>,
    commands: HashMap<String, CommandBinding>,
    coordinator: CompositeWriteCoordinator,
    sealed: bool,
}

impl std::fmt::Debug for AttributeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttributeRegistry")
            .field("attributes", &self.attributes.len())
            .field("commands", &self.commands.len())
            .field("coordinator", &self.coordinator)
            .field("sealed", &self.sealed)
            .finish()
    }
}

impl AttributeRegistry {
    /// Empty, open registry.
    pub fn new(accessor: Arc<dyn HardwareAccessor>) -> Self {
        Self {
            accessor,
            attributes: HashMap::new(),
            commands: HashMap::new(),
            coordinator: CompositeWriteCoordinator::new(),
            sealed: false,
        }
    }

    fn ensure_open(&self, name: &str) -> AppResult<()> {
        if self.sealed {
            return Err(DaqError::RegistrationClosed(name.to_string()));
        }
        Ok(())
    }

    /// Register an attribute with its binding.
    ///
    /// Composite members must be registered after their group.
    pub fn register(&mut self, descriptor: AttributeDescriptor, binding: Binding) -> AppResult<()> {
        let name = descriptor.name().to_string();
        self.ensure_open(&name)?;
        if self.attributes.contains_key(&name) {
            return Err(DaqError::DuplicateName(name));
        }
        binding.check_compatible(&descriptor)?;

        let group = match &binding {
            Binding::CompositeMember(member) => Some(member.group().to_string()),
            _ => None,
        };
        let guard = match &group {
            Some(group) => self.coordinator.member_guard(group, &descriptor)?,
            None => Arc::new(Mutex::new(())),
        };

        debug!(
            attribute = %name,
            binding = binding.kind(),
            period = ?descriptor.update_period(),
            "registering attribute"
        );
        let attribute = Arc::new(Attribute::new(descriptor, binding, guard));
        if let Some(group) = &group {
            self.coordinator.attach(group, attribute.clone())?;
        }
        self.attributes.insert(name, attribute);
        Ok(())
    }

    /// Define a composite group. Its members are registered afterwards.
    pub fn register_group(&mut self, group: CompositeGroup) -> AppResult<()> {
        self.ensure_open(group.id())?;
        self.coordinator.add_group(group)
    }

    /// Register a named client command.
    pub fn register_command(&mut self, command: CommandBinding) -> AppResult<()> {
        self.ensure_open(command.name())?;
        if self.commands.contains_key(command.name()) {
            return Err(DaqError::DuplicateName(command.name().to_string()));
        }
        command.check()?;
        self.commands.insert(command.name().to_string(), command);
        Ok(())
    }

    /// Close the initialise phase. Every composite group must be complete.
    pub fn seal(&mut self) -> AppResult<()> {
        self.coordinator.check_complete()?;
        self.sealed = true;
        info!(
            attributes = self.attributes.len(),
            commands = self.commands.len(),
            "registry sealed"
        );
        Ok(())
    }

    /// Whether registration is closed.
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Number of registered attributes.
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// The shared hardware accessor.
    pub fn accessor(&self) -> &Arc<dyn HardwareAccessor> {
        &self.accessor
    }

    /// Composite group state.
    pub fn coordinator(&self) -> &CompositeWriteCoordinator {
        &self.coordinator
    }

    /// Look up an attribute.
    pub fn get(&self, name: &str) -> AppResult<&Arc<Attribute>> {
        self.attributes
            .get(name)
            .ok_or_else(|| DaqError::NotFound(name.to_string()))
    }

    /// Attributes with a non-zero update period.
    pub fn scheduled(&self) -> Vec<Arc<Attribute>> {
        let mut scheduled: Vec<_> = self
            .attributes
            .values()
            .filter(|a| a.update_period().is_some())
            .cloned()
            .collect();
        scheduled.sort_by(|a, b| a.name().cmp(b.name()));
        scheduled
    }

    /// Client listing, sorted by name.
    pub fn list_attributes(&self) -> Vec<AttributeInfo> {
        let mut infos: Vec<_> = self.attributes.values().map(|a| a.info()).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Command names, sorted.
    pub fn list_commands(&self) -> Vec<String> {
        let mut names: Vec<_> = self.commands.keys().cloned().collect();
        names.sort();
        names
    }

    /// Change notifications for `name`.
    pub fn subscribe(&self, name: &str) -> AppResult<watch::Receiver<Reading>> {
        Ok(self.get(name)?.subscribe())
    }

    /// Current value of `name`, fetching first when the attribute is unscheduled.
    pub async fn read(&self, name: &str) -> AppResult<AttributeValue> {
        let attribute = self.get(name)?;
        if attribute.update_period().is_none() && self.fetches(attribute) {
            return self.refresh_attribute(attribute).await;
        }
        Ok(attribute.value())
    }

    /// Fetch `name` from hardware and update its cached value.
    pub async fn refresh(&self, name: &str) -> AppResult<AttributeValue> {
        let attribute = self.get(name)?;
        self.refresh_attribute(attribute).await
    }

    pub(crate) async fn refresh_attribute(&self, attribute: &Attribute) -> AppResult<AttributeValue> {
        let _guard = attribute.lock().await;
        self.fetch_and_store(attribute).await
    }

    /// Scheduler refresh. A failure marks the attribute stale before its guard
    /// is released, so a queued client write always lands after it.
    pub(crate) async fn poll_attribute(&self, attribute: &Attribute) -> AppResult<AttributeValue> {
        let _guard = attribute.lock().await;
        let result = self.fetch_and_store(attribute).await;
        if result.is_err() {
            attribute.mark_stale();
        }
        result
    }

    async fn fetch_and_store(&self, attribute: &Attribute) -> AppResult<AttributeValue> {
        let value = self.fetch(attribute).await?;
        trace!(attribute = %attribute.name(), value = %value, "refreshed");
        attribute.store(value.clone());
        Ok(value)
    }

    fn fetches(&self, attribute: &Attribute) -> bool {
        match attribute.binding() {
            Binding::CompositeMember(member) => {
                self.coordinator.is_trigger(member.group(), attribute.name())
            }
            _ => true,
        }
    }

    async fn fetch(&self, attribute: &Attribute) -> AppResult<AttributeValue> {
        let accessor = self.accessor.as_ref();
        match attribute.binding() {
            Binding::Simple(b) => b.fetch(attribute.name(), attribute.value_type(), accessor).await,
            Binding::EnumTranslated(b) => b.fetch(attribute.name(), accessor).await,
            Binding::Computed(b) => b.fetch(attribute.name(), attribute.value_type(), accessor).await,
            Binding::CompositeMember(member) => {
                if self.coordinator.is_trigger(member.group(), attribute.name()) {
                    self.coordinator.read_trigger(member.group(), accessor).await
                } else {
                    Ok(attribute.value())
                }
            }
        }
    }

    /// Validate and apply a client write.
    pub async fn write(&self, name: &str, value: AttributeValue) -> AppResult<()> {
        let attribute = self.get(name)?;
        if !attribute.is_writable() {
            return Err(DaqError::ReadOnlyViolation(name.to_string()));
        }
        let value = attribute.value_type().validate(name, value)?;

        let _guard = attribute.lock().await;
        let accessor = self.accessor.as_ref();
        match attribute.binding() {
            Binding::Simple(b) => b.push(&value, accessor).await?,
            Binding::EnumTranslated(b) => b.push(name, &value, accessor).await?,
            Binding::CompositeMember(member) => {
                return self
                    .coordinator
                    .write(member.group(), attribute, value, accessor)
                    .await;
            }
            Binding::Computed(_) => return Err(DaqError::ReadOnlyViolation(name.to_string())),
        }
        debug!(attribute = %name, value = %value, "written");
        attribute.store(value);
        Ok(())
    }

    /// Decode a JSON value for `name`, then [`write`](Self::write) it.
    pub async fn write_json(&self, name: &str, json: &serde_json::Value) -> AppResult<()> {
        let attribute = self.get(name)?;
        if !attribute.is_writable() {
            return Err(DaqError::ReadOnlyViolation(name.to_string()));
        }
        let value = attribute.value_type().value_from_json(name, json)?;
        self.write(name, value).await
    }

    /// Run a named command.
    pub async fn invoke_command(&self, name: &str) -> AppResult<()> {
        let command = self
            .commands
            .get(name)
            .ok_or_else(|| DaqError::NotFound(name.to_string()))?;
        command.run(self.accessor.as_ref()).await
    }
}
