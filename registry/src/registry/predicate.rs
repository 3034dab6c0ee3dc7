use resources::{objects::Object, selector::Selector};

use super::StoreError;

/// Label and field filter shared by list and watch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionPredicate {
    pub label: Selector,
    pub field: Selector,
}

impl SelectionPredicate {
    pub fn everything() -> Self {
        Self::default()
    }

    /// Parses `label` and `field` selector strings. Field selectors
    /// only accept `=`, `==` and `!=` terms.
    pub fn parse(label: &str, field: &str) -> Result<Self, StoreError> {
        let label: Selector = label
            .parse()
            .map_err(|err| StoreError::BadRequest(format!("label selector: {}", err)))?;
        let field: Selector = field
            .parse()
            .map_err(|err| StoreError::BadRequest(format!("field selector: {}", err)))?;
        if !field.is_equality_only() {
            return Err(StoreError::BadRequest(format!(
                "field selector {:?} only supports equality",
                field.to_string()
            )));
        }
        Ok(SelectionPredicate {
            label,
            field,
        })
    }

    pub fn matches<T: Object>(&self, obj: &T) -> bool {
        if !self.label.matches_labels(&obj.metadata().labels) {
            return false;
        }
        self.field.is_empty() || self.field.matches_fields(&obj.selectable_fields())
    }
}
