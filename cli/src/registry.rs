use indexmap::IndexMap;
use tracing::info;

use crate::api::Backend;
use crate::error::SessionError;
use crate::types::ModelDescriptor;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Model {
    pub id: String,
    pub name: String,
    pub description: String,
    pub loaded: bool,
}

impl From<ModelDescriptor> for Model {
    fn from(descriptor: ModelDescriptor) -> Self {
        let name = descriptor
            .name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| descriptor.id.clone());
        Self {
            id: descriptor.id,
            name,
            description: descriptor.description.unwrap_or_default(),
            loaded: false,
        }
    }
}

pub async fn fetch_models<B: Backend>(backend: &B) -> Result<Vec<Model>, SessionError> {
    let descriptors = backend
        .list_models()
        .await
        .map_err(|err| SessionError::RegistryUnavailable(err.to_string()))?;
    info!("registry returned {} models", descriptors.len());
    Ok(descriptors.into_iter().map(Model::from).collect())
}

/// The model catalog plus the single `loaded` marker.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: IndexMap<String, Model>,
}

impl ModelRegistry {
    /// Replaces the catalog and marks `active` as the loaded model.
    ///
    /// The active and pending models stay listed even when the backend no
    /// longer offers them, since they are still held by the backend.
    pub fn replace(&mut self, models: Vec<Model>, active: Option<&str>, pending: Option<&str>) {
        let mut previous = std::mem::take(&mut self.models);
        self.models = models.into_iter().map(|model| (model.id.clone(), model)).collect();
        for id in [active, pending].into_iter().flatten() {
            if self.models.contains_key(id) {
                continue;
            }
            if let Some(model) = previous.shift_remove(id) {
                info!("keeping {id} listed while it is held by the backend");
                self.models.insert(id.to_string(), model);
            }
        }
        for model in self.models.values_mut() {
            model.loaded = active == Some(model.id.as_str());
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.models.contains_key(id)
    }

    pub fn models(&self) -> Vec<Model> {
        self.models.values().cloned().collect()
    }

    pub fn active_id(&self) -> Option<&str> {
        self.models.values().find(|model| model.loaded).map(|model| model.id.as_str())
    }

    pub fn mark_active(&mut self, id: &str) {
        self.clear_active();
        if let Some(model) = self.models.get_mut(id) {
            model.loaded = true;
        }
    }

    pub fn clear_active(&mut self) {
        for model in self.models.values_mut() {
            model.loaded = false;
        }
    }

    pub fn loaded_count(&self) -> usize {
        self.models.values().filter(|model| model.loaded).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(id: &str) -> Model {
        Model::from(ModelDescriptor { id: id.into(), name: None, description: None })
    }

    #[test]
    fn bare_ids_borrow_the_id_as_name() {
        let m = model("bark");
        assert_eq!(m.name, "bark");
        assert_eq!(m.description, "");
        assert!(!m.loaded);
    }

    #[test]
    fn marking_keeps_a_single_loaded_model() {
        let mut registry = ModelRegistry::default();
        registry.replace(vec![model("m1"), model("m2"), model("m3")], None, None);

        registry.mark_active("m1");
        registry.mark_active("m3");

        assert_eq!(registry.loaded_count(), 1);
        assert_eq!(registry.active_id(), Some("m3"));
    }

    #[test]
    fn refresh_marks_the_active_model() {
        let mut registry = ModelRegistry::default();
        registry.replace(vec![model("m1"), model("m2")], None, None);

        registry.replace(vec![model("m2"), model("m4")], Some("m2"), None);
        assert_eq!(registry.active_id(), Some("m2"));
        assert_eq!(registry.loaded_count(), 1);
    }

    #[test]
    fn refresh_keeps_held_models_listed() {
        let mut registry = ModelRegistry::default();
        registry.replace(vec![model("m1"), model("m2"), model("m3")], None, None);

        registry.replace(vec![model("m4")], Some("m2"), Some("m3"));

        let ids: Vec<_> = registry.models().into_iter().map(|model| model.id).collect();
        assert_eq!(ids, ["m4", "m2", "m3"]);
        assert_eq!(registry.active_id(), Some("m2"));
        assert!(!registry.contains("m1"));
    }
}
