//! Template Catalog - 재사용 가능한 빌드 레시피

use crate::workspace::Workspace;
use chrono::{DateTime, Utc};
use crew_foundation::{prefixed_id, JsonCollection, JsonStore, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

pub const TEMPLATES_FILE: &str = "templates.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: String,
    pub name: String,
    pub description: String,
    pub dockerfile: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_command: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

/// Partial update; `None` leaves a field alone
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplatePatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub dockerfile: Option<String>,
    pub test_command: Option<String>,
}

pub struct TemplateCatalog {
    templates: JsonCollection<Template>,
}

impl TemplateCatalog {
    pub fn open(store: JsonStore) -> Result<Self> {
        Ok(Self {
            templates: JsonCollection::open(store, TEMPLATES_FILE, "Template")?,
        })
    }

    pub fn create(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        dockerfile: impl Into<String>,
        test_command: Option<String>,
    ) -> Result<Template> {
        let now = Utc::now();
        let template = Template {
            id: prefixed_id("tpl"),
            name: name.into(),
            description: description.into(),
            dockerfile: dockerfile.into(),
            test_command,
            created_at: now,
            last_used: now,
        };
        self.templates.insert(&template.id, template.clone())?;
        info!(id = %template.id, name = %template.name, "Template created");
        Ok(template)
    }

    /// Snapshot a workspace's current recipe
    pub fn create_from_workspace(
        &self,
        workspace: &Workspace,
        name: impl Into<String>,
        description: impl Into<String>,
        test_command: Option<String>,
    ) -> Result<Template> {
        self.create(name, description, workspace.dockerfile.clone(), test_command)
    }

    /// Fetch and touch `lastUsed`
    pub fn get(&self, id: &str) -> Result<Option<Template>> {
        if self.templates.get(id).is_none() {
            return Ok(None);
        }
        self.templates
            .update(id, |t| {
                t.last_used = Utc::now();
                Ok(t.clone())
            })
            .map(Some)
    }

    /// Like `get`, but NotFound for unknown ids
    pub fn require(&self, id: &str) -> Result<Template> {
        self.templates.require(id)?;
        self.templates.update(id, |t| {
            t.last_used = Utc::now();
            Ok(t.clone())
        })
    }

    pub fn get_by_name(&self, name: &str) -> Result<Option<Template>> {
        match self.templates.find(|t| t.name == name) {
            Some(t) => self.get(&t.id),
            None => Ok(None),
        }
    }

    /// Most recently used first
    pub fn list(&self) -> Vec<Template> {
        let mut all = self.templates.values();
        all.sort_by(|a, b| b.last_used.cmp(&a.last_used));
        all
    }

    pub fn delete(&self, id: &str) -> Result<bool> {
        let removed = self.templates.remove(id)?.is_some();
        if removed {
            info!(id, "Template deleted");
        }
        Ok(removed)
    }

    pub fn update(&self, id: &str, patch: TemplatePatch) -> Result<Template> {
        self.templates.update(id, |t| {
            if let Some(name) = patch.name {
                t.name = name;
            }
            if let Some(description) = patch.description {
                t.description = description;
            }
            if let Some(dockerfile) = patch.dockerfile {
                t.dockerfile = dockerfile;
            }
            if patch.test_command.is_some() {
                t.test_command = patch.test_command;
            }
            t.last_used = Utc::now();
            Ok(t.clone())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog(dir: &std::path::Path) -> TemplateCatalog {
        TemplateCatalog::open(JsonStore::new(dir)).unwrap()
    }

    #[test]
    fn test_create_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let templates = catalog(dir.path());

        let tpl = templates
            .create("py", "python base", "FROM python:3.11-slim", Some("pytest".into()))
            .unwrap();
        assert!(tpl.id.starts_with("tpl-"));

        let fetched = templates.get(&tpl.id).unwrap().unwrap();
        assert_eq!(fetched.dockerfile, "FROM python:3.11-slim");
        assert!(fetched.last_used >= tpl.last_used);

        assert!(templates.delete(&tpl.id).unwrap());
        assert!(templates.get(&tpl.id).unwrap().is_none());
        assert!(!templates.delete(&tpl.id).unwrap());
    }

    #[test]
    fn test_get_by_name_and_update() {
        let dir = tempfile::tempdir().unwrap();
        let templates = catalog(dir.path());
        let tpl = templates.create("node", "", "FROM node:20", None).unwrap();

        let found = templates.get_by_name("node").unwrap().unwrap();
        assert_eq!(found.id, tpl.id);
        assert!(templates.get_by_name("rust").unwrap().is_none());

        let updated = templates
            .update(
                &tpl.id,
                TemplatePatch {
                    dockerfile: Some("FROM node:22".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.dockerfile, "FROM node:22");
        assert_eq!(updated.name, "node");
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id = catalog(dir.path())
            .create("go", "", "FROM golang:1.22", None)
            .unwrap()
            .id;
        assert_eq!(catalog(dir.path()).require(&id).unwrap().name, "go");
    }

    #[test]
    fn test_require_unknown_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = catalog(dir.path()).require("tpl-missing").unwrap_err();
        assert!(matches!(err, crew_foundation::Error::NotFound(_)));
    }
}
