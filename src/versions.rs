//! Historial de versiones de un documento (sólo se añade, nunca se reescribe)
//! y cursor de navegación sobre ese historial.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::StudioError;

/// Copia inmutable del contenido de un documento en un momento dado.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub index: usize,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct VersionStore {
    snapshots: Vec<Snapshot>,
}

impl VersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Añade un snapshot y devuelve su índice.
    pub fn save(&mut self, content: impl Into<String>) -> usize {
        let index = self.snapshots.len();
        self.snapshots.push(Snapshot {
            index,
            content: content.into(),
            created_at: Utc::now(),
        });
        index
    }

    pub fn get(&self, index: usize) -> Result<&Snapshot, StudioError> {
        self.snapshots.get(index).ok_or(StudioError::VersionNotFound {
            index,
            len: self.snapshots.len(),
        })
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.snapshots.last()
    }

    /// Contenido vigente, o cadena vacía si aún no hay ninguna versión.
    pub fn current_content(&self) -> &str {
        self.latest().map(|s| s.content.as_str()).unwrap_or("")
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn last_index(&self) -> usize {
        self.snapshots.len().saturating_sub(1)
    }

    /// Par (anterior, actual) para que el cliente calcule el diff.
    /// En el índice 0 no hay anterior y la acción debe estar deshabilitada.
    pub fn diff_pair(&self, index: usize) -> Result<(&str, &str), StudioError> {
        if index == 0 {
            return Err(StudioError::DiffUnavailable);
        }
        let before = self.get(index - 1)?;
        let after = self.get(index)?;
        Ok((before.content.as_str(), after.content.as_str()))
    }
}

/// Posición del visor dentro del historial. Es externa al `VersionStore`:
/// navegar nunca modifica los snapshots.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct VersionCursor {
    pub index: usize,
    pub diff_view: bool,
}

impl VersionCursor {
    pub fn at_latest(store: &VersionStore) -> Self {
        Self {
            index: store.last_index(),
            diff_view: false,
        }
    }

    pub fn toggle(&mut self) {
        self.diff_view = !self.diff_view;
    }

    pub fn prev(&mut self) {
        if self.can_prev() {
            self.index -= 1;
        }
    }

    pub fn next(&mut self, store: &VersionStore) {
        if self.can_next(store) {
            self.index += 1;
        }
    }

    /// Vuelve a la versión vigente y sale de la vista de diff.
    pub fn latest(&mut self, store: &VersionStore) {
        self.index = store.last_index();
        self.diff_view = false;
    }

    pub fn can_prev(&self) -> bool {
        self.index > 0
    }

    pub fn can_next(&self, store: &VersionStore) -> bool {
        self.index < store.last_index()
    }

    pub fn is_current(&self, store: &VersionStore) -> bool {
        self.index == store.last_index()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(contents: &[&str]) -> VersionStore {
        let mut store = VersionStore::new();
        for c in contents {
            store.save(*c);
        }
        store
    }

    #[test]
    fn save_returns_sequential_indexes() {
        let mut store = VersionStore::new();
        assert_eq!(store.save("a"), 0);
        assert_eq!(store.save("b"), 1);
        assert_eq!(store.current_content(), "b");
        assert_eq!(store.get(0).unwrap().content, "a");
    }

    #[test]
    fn get_out_of_range_is_not_found() {
        let store = store_with(&["a"]);
        match store.get(3) {
            Err(StudioError::VersionNotFound { index, len }) => {
                assert_eq!(index, 3);
                assert_eq!(len, 1);
            }
            other => panic!("se esperaba VersionNotFound, llegó {other:?}"),
        }
    }

    #[test]
    fn prev_at_floor_and_next_at_last_are_noops() {
        let store = store_with(&["a", "b", "c"]);
        let mut cursor = VersionCursor::default();
        cursor.prev();
        assert_eq!(cursor.index, 0);

        cursor.next(&store);
        cursor.next(&store);
        assert_eq!(cursor.index, 2);
        cursor.next(&store);
        assert_eq!(cursor.index, 2);
        assert!(cursor.is_current(&store));
    }

    #[test]
    fn toggle_never_moves_the_index() {
        let store = store_with(&["a", "b"]);
        let mut cursor = VersionCursor::at_latest(&store);
        cursor.toggle();
        assert!(cursor.diff_view);
        assert_eq!(cursor.index, 1);
        cursor.toggle();
        assert!(!cursor.diff_view);
        assert_eq!(cursor.index, 1);
    }

    #[test]
    fn diff_pair_returns_previous_and_current() {
        let store = store_with(&["uno", "dos"]);
        assert_eq!(store.diff_pair(1).unwrap(), ("uno", "dos"));
        assert!(matches!(store.diff_pair(0), Err(StudioError::DiffUnavailable)));
        assert!(matches!(
            store.diff_pair(5),
            Err(StudioError::VersionNotFound { .. })
        ));
    }
}
