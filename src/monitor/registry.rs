use std::collections::{HashMap, HashSet};

use super::events::{ConnectionId, SessionKey, StudentId, StudentIdentity};

/// Identity bound to one live connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub identity: StudentIdentity,
    /// Sticky once a submission for this identity has been observed
    pub submitted: bool,
}

/// Outcome of binding an identity to a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// First binding of this connection, or a rebinding to a different identity
    New,
    /// The connection was already bound to the same student and exam
    Unchanged,
}

/// Maps live connections to logical (student, exam) presences.
///
/// Operations on connections that never registered (proctors, observers)
/// are no-ops.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    bindings: HashMap<ConnectionId, Binding>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, connection_id: &str, identity: StudentIdentity) -> Registration {
        if let Some(existing) = self.bindings.get_mut(connection_id) {
            if existing.identity.session_key() == identity.session_key() {
                // Refresh display fields, keep the sticky flag
                existing.identity = identity;
                return Registration::Unchanged;
            }
        }

        let submitted = self.is_key_submitted(&identity.session_key());
        self.bindings.insert(
            connection_id.to_string(),
            Binding {
                identity,
                submitted,
            },
        );
        Registration::New
    }

    pub fn mark_submitted(&mut self, connection_id: &str) -> bool {
        match self.bindings.get_mut(connection_id) {
            Some(binding) => {
                binding.submitted = true;
                true
            }
            None => false,
        }
    }

    /// Marks every connection bound to `key` as submitted and returns their ids
    pub fn mark_key_submitted(&mut self, key: &SessionKey) -> Vec<ConnectionId> {
        self.bindings
            .iter_mut()
            .filter(|(_, binding)| binding.identity.session_key() == *key)
            .map(|(connection_id, binding)| {
                binding.submitted = true;
                connection_id.clone()
            })
            .collect()
    }

    pub fn unregister(&mut self, connection_id: &str) -> Option<Binding> {
        self.bindings.remove(connection_id)
    }

    pub fn binding(&self, connection_id: &str) -> Option<&Binding> {
        self.bindings.get(connection_id)
    }

    pub fn has_other_connection(
        &self,
        student_id: &str,
        exam_id: &str,
        excluding_connection_id: &str,
    ) -> bool {
        self.bindings.iter().any(|(connection_id, binding)| {
            connection_id != excluding_connection_id
                && binding.identity.student_id == student_id
                && binding.identity.exam_id == exam_id
        })
    }

    pub fn is_online(&self, key: &SessionKey) -> bool {
        self.bindings
            .values()
            .any(|binding| binding.identity.session_key() == *key)
    }

    pub fn connections_for(&self, key: &SessionKey) -> Vec<ConnectionId> {
        self.bindings
            .iter()
            .filter(|(_, binding)| binding.identity.session_key() == *key)
            .map(|(connection_id, _)| connection_id.clone())
            .collect()
    }

    /// Any identity currently bound for `key`, used to name events raised outside a connection
    pub fn identity_for(&self, key: &SessionKey) -> Option<StudentIdentity> {
        self.bindings
            .values()
            .find(|binding| binding.identity.session_key() == *key)
            .map(|binding| binding.identity.clone())
    }

    pub fn online_students(&self, exam_id: &str) -> HashSet<StudentId> {
        self.bindings
            .values()
            .filter(|binding| binding.identity.exam_id == exam_id)
            .map(|binding| binding.identity.student_id.clone())
            .collect()
    }

    /// Drops every binding for `exam_id`, returning the affected connections
    pub fn remove_exam(&mut self, exam_id: &str) -> Vec<ConnectionId> {
        let removed: Vec<ConnectionId> = self
            .bindings
            .iter()
            .filter(|(_, binding)| binding.identity.exam_id == exam_id)
            .map(|(connection_id, _)| connection_id.clone())
            .collect();

        for connection_id in &removed {
            self.bindings.remove(connection_id);
        }

        removed
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn is_key_submitted(&self, key: &SessionKey) -> bool {
        self.bindings
            .values()
            .any(|binding| binding.submitted && binding.identity.session_key() == *key)
    }
}
