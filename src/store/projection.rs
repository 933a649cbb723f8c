use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::model::Field;

/// Set of columns to materialize when reading.
///
/// Fields outside the projection keep their [`AlignmentRecord::default`]
/// values.
///
/// [`AlignmentRecord::default`]: crate::model::AlignmentRecord
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Projection {
    fields: BTreeSet<Field>,
}

impl Default for Projection {
    fn default() -> Self {
        Self::all()
    }
}

impl Projection {
    /// Every field.
    pub fn all() -> Self {
        Self {
            fields: Field::ALL.iter().copied().collect(),
        }
    }

    /// Only the listed fields.
    pub fn of(fields: impl IntoIterator<Item = Field>) -> Self {
        Self {
            fields: fields.into_iter().collect(),
        }
    }

    /// Whether `field` is materialized.
    pub fn contains(&self, field: Field) -> bool {
        self.fields.contains(&field)
    }

    /// Projected fields in schema order.
    pub fn fields(&self) -> impl Iterator<Item = Field> + '_ {
        self.fields.iter().copied()
    }

    /// Number of projected fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether nothing is projected.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Whether every field is projected.
    pub fn is_full(&self) -> bool {
        self.fields.len() == Field::ALL.len()
    }
}

impl FromIterator<Field> for Projection {
    fn from_iter<I: IntoIterator<Item = Field>>(iter: I) -> Self {
        Self::of(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_projects_everything() {
        let projection = Projection::default();
        assert!(projection.is_full());
        assert!(Field::ALL.iter().all(|&f| projection.contains(f)));
    }

    #[test]
    fn narrow_projection() {
        let projection: Projection = [Field::Flags, Field::ReadName].into_iter().collect();
        assert_eq!(projection.len(), 2);
        assert_eq!(
            projection.fields().collect::<Vec<_>>(),
            vec![Field::ReadName, Field::Flags]
        );
        assert!(!projection.contains(Field::Sequence));
    }
}
