use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use super::backend::DetectorBackend;
use super::backends::StubBackend;
use crate::config::DetectionConfig;

/// Constructor for a detector backend instance.
pub type BackendFactory = Arc<dyn Fn() -> Result<Box<dyn DetectorBackend>> + Send + Sync>;

/// Thread-safe registry of detector backend factories.
///
/// Backends take `&mut self` and may be stateful, so the registry hands out a
/// fresh instance per video instead of sharing one behind a lock. Concurrent
/// uploads never contend on a detector.
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
    default_name: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            default_name: None,
        }
    }

    /// Register a backend factory. The first registered backend becomes the default.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Result<Box<dyn DetectorBackend>> + Send + Sync + 'static,
    {
        if self.default_name.is_none() {
            self.default_name = Some(name.to_string());
        }
        self.factories.insert(name.to_string(), Arc::new(factory));
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.factories.contains_key(name) {
            return Err(anyhow!("backend '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default_name.as_deref()
    }

    /// Build a new backend instance by name.
    pub fn create(&self, name: &str) -> Result<Box<dyn DetectorBackend>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| anyhow!("backend '{}' not registered", name))?;
        factory()
    }

    /// Build a new instance of the default backend.
    pub fn create_default(&self) -> Result<Box<dyn DetectorBackend>> {
        let name = self
            .default_name
            .as_deref()
            .ok_or_else(|| anyhow!("no detector backend registered"))?;
        self.create(name)
    }

    /// List registered backends, sorted by name.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

impl BackendRegistry {
    /// Registry for the configured backend, with `stub` always available.
    ///
    /// Model-backed backends are loaded once here; their factories hand out
    /// cheap clones sharing the loaded plan.
    pub fn from_config(cfg: &DetectionConfig) -> Result<Self> {
        let mut registry = Self::new();
        registry.register("stub", || Ok(Box::new(StubBackend::new())));
        match cfg.backend.as_str() {
            "stub" => log::warn!("stub detector selected; no detections will be reported"),
            "tract" => register_tract(&mut registry, cfg)?,
            other => return Err(anyhow!("unknown detector backend '{}'", other)),
        }
        registry.set_default(&cfg.backend)?;
        log::info!(
            "detector backends: {} (default {})",
            registry.list().join(", "),
            cfg.backend
        );
        Ok(registry)
    }
}

#[cfg(feature = "backend-tract")]
fn register_tract(registry: &mut BackendRegistry, cfg: &DetectionConfig) -> Result<()> {
    use super::backends::TractBackend;

    let mut backend = TractBackend::load(&cfg.model_path, cfg.yolo_params())?;
    backend.warm_up()?;
    registry.register("tract", move || Ok(Box::new(backend.clone())));
    Ok(())
}

#[cfg(not(feature = "backend-tract"))]
fn register_tract(_registry: &mut BackendRegistry, _cfg: &DetectionConfig) -> Result<()> {
    Err(anyhow!(
        "detector backend 'tract' requires building with --features backend-tract"
    ))
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::StubBackend;

    #[test]
    fn first_registered_backend_is_default() -> Result<()> {
        let mut registry = BackendRegistry::new();
        registry.register("stub", || Ok(Box::new(StubBackend::new())));
        registry.register("other", || Ok(Box::new(StubBackend::new())));

        assert_eq!(registry.default_name(), Some("stub"));
        assert_eq!(registry.create_default()?.name(), "stub");
        assert_eq!(registry.list(), vec!["other".to_string(), "stub".to_string()]);
        Ok(())
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let mut registry = BackendRegistry::new();
        assert!(registry.create_default().is_err());
        assert!(registry.set_default("tract").is_err());
        registry.register("stub", || Ok(Box::new(StubBackend::new())));
        assert!(registry.create("tract").is_err());
    }

    fn detection_config(backend: &str) -> DetectionConfig {
        DetectionConfig {
            backend: backend.to_string(),
            model_path: "missing.onnx".into(),
            input_size: 640,
            class_names: vec!["ambulance".to_string()],
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
            emergency_classes: vec!["ambulance".to_string()],
        }
    }

    #[test]
    fn stub_config_builds_a_stub_registry() -> Result<()> {
        let registry = BackendRegistry::from_config(&detection_config("stub"))?;
        assert_eq!(registry.default_name(), Some("stub"));
        assert_eq!(registry.create_default()?.name(), "stub");
        Ok(())
    }

    #[test]
    fn tract_config_needs_a_loadable_model() {
        // Either the feature is off or the model file does not exist.
        assert!(BackendRegistry::from_config(&detection_config("tract")).is_err());
        assert!(BackendRegistry::from_config(&detection_config("yolo9000")).is_err());
    }

    #[test]
    fn each_create_builds_an_independent_instance() -> Result<()> {
        use crate::detect::{BoundingBox, Detection};
        use crate::frame::Frame;

        let mut registry = BackendRegistry::new();
        registry.register("scripted", || {
            let hit = Detection::new("ambulance", 0.9, BoundingBox::new(0.0, 0.0, 1.0, 1.0));
            Ok(Box::new(StubBackend::scripted(vec![vec![hit]])))
        });

        let frame = Frame::new(0, 1, 1, vec![0u8; 3])?;
        let mut a = registry.create_default()?;
        let mut b = registry.create_default()?;
        assert_eq!(a.detect(&frame, 0.25)?.len(), 1);
        assert_eq!(a.detect(&frame, 0.25)?.len(), 0);
        // b keeps its own script position
        assert_eq!(b.detect(&frame, 0.25)?.len(), 1);
        Ok(())
    }
}
