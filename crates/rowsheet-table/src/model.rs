use rowsheet_model::Record;
use std::fmt;

/// Rejection raised by a domain model's own validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: Option<String>,
    pub message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            field: None,
            message: message.into(),
        }
    }

    pub fn for_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "field `{field}`: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for ValidationError {}

/// A typed domain object that can be validated and tracks which of its fields changed.
///
/// Field names are logical names (the keys of the table's alias map, or plain header names).
pub trait DomainModel {
    fn validate(&self) -> Result<(), ValidationError>;

    /// True once the instance was loaded from the table and is tracking changes.
    fn is_observable(&self) -> bool;

    fn has_field_changed(&self, field: &str) -> bool;

    fn to_record(&self) -> Record;
}

/// Construction side of a domain model, used by [`crate::Table::read_as`].
pub trait FromRecord: Sized {
    fn from_record(record: Record) -> Result<Self, ValidationError>;

    /// Start tracking changes from the current state.
    fn observe(&mut self);
}

/// One entry of a `save` batch: a plain record or a change-tracked domain model.
pub enum SaveItem<'a> {
    Record(Record),
    Model(&'a dyn DomainModel),
}

impl From<Record> for SaveItem<'_> {
    fn from(record: Record) -> Self {
        SaveItem::Record(record)
    }
}

impl<'a, M: DomainModel> From<&'a M> for SaveItem<'a> {
    fn from(model: &'a M) -> Self {
        SaveItem::Model(model)
    }
}

impl SaveItem<'_> {
    /// Flatten into the record that gets diffed.
    ///
    /// Models are validated first. An observable model contributes only its changed fields, a
    /// fresh one every field the table can store; key fields are always kept.
    pub(crate) fn into_record<M, K>(self, is_mapped: M, is_key: K) -> Result<Record, ValidationError>
    where
        M: Fn(&str) -> bool,
        K: Fn(&str) -> bool,
    {
        match self {
            SaveItem::Record(record) => Ok(record),
            SaveItem::Model(model) => {
                model.validate()?;
                let observable = model.is_observable();
                let full = model.to_record();
                let row_number = full.row_number;
                let mut record: Record = full
                    .into_fields()
                    .into_iter()
                    .filter(|(field, _)| {
                        is_key(field)
                            || if observable {
                                model.has_field_changed(field)
                            } else {
                                is_mapped(field)
                            }
                    })
                    .collect();
                record.row_number = row_number;
                Ok(record)
            }
        }
    }
}
