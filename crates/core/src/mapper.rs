//! Record mapper.
//!
//! Projects raw source records onto target fields using a task's
//! [`DataMapping`]s. The output of a mapping is a fresh record holding only
//! target fields; source fields without a mapping are dropped.

use tracing::trace;

use crate::errors::MappingError;
use crate::models::{Batch, DataMapping, Record};
use crate::transform;

/// Map a single record.
///
/// Mappings are applied in the order given. A required mapping whose source
/// field is absent aborts the record with
/// [`MappingError::MissingRequiredField`]; an optional one is skipped.
pub fn map_record(record: &Record, mappings: &[DataMapping]) -> Result<Record, MappingError> {
    let mut mapped = Record::new();

    for mapping in mappings {
        match record.get(&mapping.field_a) {
            Some(value) => {
                let value = match &mapping.transformation_rule {
                    Some(rule) => transform::apply(value, rule),
                    None => value.clone(),
                };
                mapped.insert(mapping.field_b.clone(), value);
            }
            None if mapping.is_required => {
                return Err(MappingError::MissingRequiredField {
                    field: mapping.field_a.clone(),
                });
            }
            None => {
                trace!(field = %mapping.field_a, "optional source field absent, skipping");
            }
        }
    }

    Ok(mapped)
}

/// Map a batch, preserving its shape.
///
/// The first record that fails to map fails the whole batch.
pub fn map_batch(batch: &Batch, mappings: &[DataMapping]) -> Result<Batch, MappingError> {
    match batch {
        Batch::Many(records) => records
            .iter()
            .map(|record| map_record(record, mappings))
            .collect::<Result<Vec<_>, _>>()
            .map(Batch::Many),
        Batch::One(record) => map_record(record, mappings).map(Batch::One),
    }
}
