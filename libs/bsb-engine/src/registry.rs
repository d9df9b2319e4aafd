//! Field registry
//!
//! Owns every registered field, keyed by field id in a B-tree so due-field
//! iteration is deterministic: among fields due at the same tick the lowest
//! field id is dispatched first, which is also the poll priority under
//! contention. Identity is immutable after registration and fields are never
//! removed at runtime.

use std::collections::BTreeMap;
use std::time::Instant;

use tracing::{debug, warn};

use bsb_protocol::value::FieldValue;

use crate::error::{EngineError, Result};
use crate::field::{FieldDescriptor, FieldState};

#[derive(Debug, Default)]
pub(crate) struct FieldRegistry {
    fields: BTreeMap<u32, FieldState>,
}

impl FieldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field; fails if the field id is already present
    pub fn register(&mut self, descriptor: FieldDescriptor) -> Result<&FieldState> {
        descriptor.validate()?;

        let field_id = descriptor.field_id;
        if self.fields.contains_key(&field_id) {
            return Err(EngineError::DuplicateFieldId(field_id));
        }

        debug!(
            "registered {} field {:#010X} (parameter {}, {})",
            descriptor.kind.name(),
            field_id,
            descriptor.parameter_number,
            descriptor.value_type
        );

        self.fields.insert(field_id, FieldState::new(descriptor));
        // Just inserted above
        Ok(&self.fields[&field_id])
    }

    pub fn get(&self, field_id: u32) -> Option<&FieldState> {
        self.fields.get(&field_id)
    }

    pub fn get_mut(&mut self, field_id: u32) -> Option<&mut FieldState> {
        self.fields.get_mut(&field_id)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldState> {
        self.fields.values()
    }

    /// Fields whose polling interval has elapsed, in ascending field id order
    pub fn all_due(&self, now: Instant) -> impl Iterator<Item = &FieldState> {
        self.fields.values().filter(move |f| f.is_due(now))
    }

    /// Lowest field id holding a pending write
    pub fn next_pending_write(&self) -> Option<u32> {
        self.fields
            .values()
            .find(|f| f.pending_write.is_some())
            .map(|f| f.descriptor.field_id)
    }

    /// Lowest due field id for a read dispatch
    pub fn next_due_read(&self, now: Instant) -> Option<u32> {
        self.all_due(now).next().map(|f| f.descriptor.field_id)
    }

    /// Record a successful exchange: value, facets and the next query time
    pub fn record_success(&mut self, field_id: u32, now: Instant, value: FieldValue) {
        match self.fields.get_mut(&field_id) {
            Some(field) => field.record_success(now, value),
            None => warn!("result for unknown field {:#010X} dropped", field_id),
        }
    }

    /// Record a failed exchange. The update time is not advanced, so the
    /// field stays due at the next scheduler pass.
    pub fn record_failure(&mut self, field_id: u32) {
        if self.fields.contains_key(&field_id) {
            debug!(
                "field {:#010X} keeps stale value after failed exchange",
                field_id
            );
        }
    }

    /// Every field reading the given bus parameter, ascending field id
    pub fn fields_for_parameter(&self, parameter_number: u32) -> Vec<u32> {
        self.fields
            .values()
            .filter(|f| f.descriptor.parameter_number == parameter_number)
            .map(|f| f.descriptor.field_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldKind;
    use bsb_protocol::value::ValueType;
    use std::time::Duration;

    fn descriptor(field_id: u32, parameter_number: u32) -> FieldDescriptor {
        FieldDescriptor {
            field_id,
            parameter_number,
            value_type: ValueType::Int16,
            enable_byte: 0x01,
            update_interval_ms: 60_000,
            retry_count: None,
            retry_interval_ms: None,
            kind: FieldKind::Sensor,
        }
    }

    #[test]
    fn test_duplicate_field_id_rejected() {
        let mut registry = FieldRegistry::new();
        registry.register(descriptor(1, 100)).unwrap();

        let err = registry.register(descriptor(1, 200)).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateFieldId(1)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_shared_parameter_number_allowed() {
        let mut registry = FieldRegistry::new();
        registry.register(descriptor(1, 100)).unwrap();
        registry.register(descriptor(2, 100)).unwrap();

        assert_eq!(registry.fields_for_parameter(100), vec![1, 2]);
    }

    #[test]
    fn test_all_due_ascending_order() {
        let mut registry = FieldRegistry::new();
        registry.register(descriptor(5, 100)).unwrap();
        registry.register(descriptor(2, 200)).unwrap();
        registry.register(descriptor(9, 300)).unwrap();

        let now = Instant::now();
        let due: Vec<u32> = registry.all_due(now).map(|f| f.descriptor.field_id).collect();
        assert_eq!(due, vec![2, 5, 9]);
        assert_eq!(registry.next_due_read(now), Some(2));
    }

    #[test]
    fn test_success_defers_next_due() {
        let mut registry = FieldRegistry::new();
        registry.register(descriptor(1, 100)).unwrap();

        let now = Instant::now();
        registry.record_success(1, now, FieldValue::Integer(42));

        assert_eq!(registry.next_due_read(now), None);
        assert_eq!(
            registry.next_due_read(now + Duration::from_secs(61)),
            Some(1)
        );
    }

    #[test]
    fn test_failure_keeps_field_due() {
        let mut registry = FieldRegistry::new();
        registry.register(descriptor(1, 100)).unwrap();

        let now = Instant::now();
        registry.record_failure(1);

        assert_eq!(registry.next_due_read(now), Some(1));
        assert!(registry.get(1).unwrap().last_update.is_none());
    }
}
