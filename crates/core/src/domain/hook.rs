use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Association of a project with an external notification target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hook {
    pub id: Uuid,
    pub project_id: Uuid,
    pub hook_name: String,
}

impl Hook {
    pub fn new(project_id: Uuid, hook_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            hook_name: hook_name.into(),
        }
    }
}

/// Difference between a project's current hooks and a requested set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HookChanges {
    pub to_remove: Vec<String>,
    pub to_add: Vec<String>,
}

impl HookChanges {
    pub fn between<C, R>(current: C, requested: R) -> Self
    where
        C: IntoIterator,
        C::Item: AsRef<str>,
        R: IntoIterator,
        R::Item: AsRef<str>,
    {
        let current: BTreeSet<String> = current
            .into_iter()
            .map(|name| name.as_ref().to_string())
            .collect();
        let requested: BTreeSet<String> = requested
            .into_iter()
            .map(|name| name.as_ref().trim().to_string())
            .filter(|name| !name.is_empty())
            .collect();

        Self {
            to_remove: current.difference(&requested).cloned().collect(),
            to_add: requested.difference(&current).cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_remove.is_empty() && self.to_add.is_empty()
    }
}
