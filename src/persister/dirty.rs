//! Dirty-property detection: position-wise comparison of two state arrays
//! under each property's semantic equality. Unfetched lazy slots never read
//! as dirty; collections are owned by their own persisters and skipped here.

use crate::core::{PersistError, Result, Value};
use crate::persister::EntityPersister;

impl EntityPersister {
    /// Ordinals of the updatable properties whose current value differs from
    /// the previous snapshot; `None` when nothing differs.
    pub fn find_dirty(&self, current: &[Value], previous: &[Value]) -> Result<Option<Vec<usize>>> {
        self.compare_states(current, previous, &self.metadata().updatability())
    }

    /// Like [`find_dirty`](Self::find_dirty) but over every checkable
    /// property, used when deciding whether a detached instance needs
    /// writing at all.
    pub fn find_modified(&self, old: &[Value], current: &[Value]) -> Result<Option<Vec<usize>>> {
        let checkability: Vec<bool> = self
            .metadata()
            .properties
            .iter()
            .map(|p| !p.is_collection() && p.is_selectable())
            .collect();
        self.compare_states(current, old, &checkability)
    }

    fn compare_states(
        &self,
        current: &[Value],
        previous: &[Value],
        include: &[bool],
    ) -> Result<Option<Vec<usize>>> {
        let meta = self.metadata();
        if current.len() != meta.property_span() || previous.len() != meta.property_span() {
            return Err(PersistError::TypeMismatch(format!(
                "State arrays of '{}' must span {} properties",
                meta.entity_name,
                meta.property_span()
            )));
        }
        let mut dirty = Vec::new();
        for i in 0..meta.property_span() {
            if !include[i] {
                continue;
            }
            let (a, b) = (&current[i], &previous[i]);
            if a.is_unfetched() || b.is_unfetched() {
                continue;
            }
            if a != b {
                dirty.push(i);
            }
        }
        Ok(if dirty.is_empty() { None } else { Some(dirty) })
    }
}
