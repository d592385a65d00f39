use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use super::backend::InferenceBackend;

/// Backend handle shared between the registry and the detection loop.
pub type SharedBackend = Arc<Mutex<dyn InferenceBackend>>;

/// Thread-safe registry of inference backends.
///
/// Backends are wrapped in `Mutex` because `InferenceBackend::infer` takes `&mut self`.
pub struct BackendRegistry {
    backends: HashMap<String, SharedBackend>,
    default_name: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
            default_name: None,
        }
    }

    /// Register a backend. The first registered backend becomes the default.
    pub fn register<B: InferenceBackend + 'static>(&mut self, backend: B) {
        let name = backend.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.backends.insert(name, Arc::new(Mutex::new(backend)));
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.backends.contains_key(name) {
            return Err(anyhow!("backend '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    /// Get backend by name.
    pub fn get(&self, name: &str) -> Option<SharedBackend> {
        self.backends.get(name).cloned()
    }

    /// Get default backend.
    pub fn default_backend(&self) -> Option<SharedBackend> {
        self.default_name.as_ref().and_then(|name| self.get(name))
    }

    /// List registered backends, sorted by name.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }

    /// Resolve a backend by name, falling back to the default when `name` is `None`.
    pub fn select(&self, name: Option<&str>) -> Result<SharedBackend> {
        match name {
            Some(name) => self.get(name).ok_or_else(|| {
                anyhow!(
                    "backend '{}' not registered (available: {})",
                    name,
                    self.list().join(", ")
                )
            }),
            None => self
                .default_backend()
                .ok_or_else(|| anyhow!("no inference backend registered")),
        }
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{RawDetection, ScriptedBackend};
    use crate::frame::Frame;
    use crate::geometry::BoundingBox;

    #[test]
    fn first_registered_backend_is_default() {
        let mut registry = BackendRegistry::new();
        registry.register(ScriptedBackend::new(vec![vec![RawDetection::new(
            BoundingBox::new(0.0, 0.0, 4.0, 4.0),
            1,
            0.9,
        )]]));
        assert_eq!(registry.list(), vec!["scripted".to_string()]);

        let frame = Frame::blank(8, 8, 1);
        let backend = registry.select(None).unwrap();
        let detections = backend.lock().unwrap().infer(&frame).unwrap();
        assert_eq!(detections.len(), 1);
    }

    #[test]
    fn unknown_backend_is_an_error() {
        let mut registry = BackendRegistry::new();
        registry.register(ScriptedBackend::default());
        assert!(registry.select(Some("tract")).is_err());
        assert!(registry.set_default("tract").is_err());
        assert!(registry.set_default("scripted").is_ok());
    }

    #[test]
    fn empty_registry_has_no_default() {
        let registry = BackendRegistry::new();
        assert!(registry.select(None).is_err());
    }
}
