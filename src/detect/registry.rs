use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use super::backend::{ObjectDetector, SequenceClassifier};
use super::backends::{MotionSequenceClassifier, StubObjectDetector};

/// Named registry of detector backends.
///
/// Configuration selects backends by name; the first backend registered for
/// each capability becomes its default.
pub struct DetectorRegistry {
    objects: HashMap<String, Arc<dyn ObjectDetector>>,
    classifiers: HashMap<String, Arc<dyn SequenceClassifier>>,
    default_object: Option<String>,
    default_classifier: Option<String>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self {
            objects: HashMap::new(),
            classifiers: HashMap::new(),
            default_object: None,
            default_classifier: None,
        }
    }

    /// Registry preloaded with the CPU-only backends shipped in this crate.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register_object(StubObjectDetector::new());
        registry.register_classifier(MotionSequenceClassifier::new());
        registry
    }

    pub fn register_object<D: ObjectDetector + 'static>(&mut self, detector: D) {
        let name = detector.name().to_string();
        if self.default_object.is_none() {
            self.default_object = Some(name.clone());
        }
        self.objects.insert(name, Arc::new(detector));
    }

    pub fn register_classifier<C: SequenceClassifier + 'static>(&mut self, classifier: C) {
        let name = classifier.name().to_string();
        if self.default_classifier.is_none() {
            self.default_classifier = Some(name.clone());
        }
        self.classifiers.insert(name, Arc::new(classifier));
    }

    /// Make a registered object detector the one `object_detector(None)` resolves.
    pub fn set_default_object(&mut self, name: &str) -> Result<()> {
        if !self.objects.contains_key(name) {
            return Err(anyhow!("object detector '{}' not registered", name));
        }
        self.default_object = Some(name.to_string());
        Ok(())
    }

    /// Object detector by name, or the default when `name` is `None`.
    pub fn object_detector(&self, name: Option<&str>) -> Result<Arc<dyn ObjectDetector>> {
        let name = name
            .or(self.default_object.as_deref())
            .ok_or_else(|| anyhow!("no object detector registered"))?;
        self.objects
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("object detector '{}' not registered", name))
    }

    /// Sequence classifier by name, or the default when `name` is `None`.
    pub fn sequence_classifier(&self, name: Option<&str>) -> Result<Arc<dyn SequenceClassifier>> {
        let name = name
            .or(self.default_classifier.as_deref())
            .ok_or_else(|| anyhow!("no sequence classifier registered"))?;
        self.classifiers
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("sequence classifier '{}' not registered", name))
    }

    /// Registered backend names, sorted: (object detectors, sequence classifiers).
    pub fn list(&self) -> (Vec<String>, Vec<String>) {
        let mut objects: Vec<String> = self.objects.keys().cloned().collect();
        let mut classifiers: Vec<String> = self.classifiers.keys().cloned().collect();
        objects.sort();
        classifiers.sort();
        (objects, classifiers)
    }
}

impl Default for DetectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_resolves_defaults_and_names() {
        let registry = DetectorRegistry::with_builtin();

        assert_eq!(registry.object_detector(None).unwrap().name(), "stub");
        assert_eq!(registry.sequence_classifier(None).unwrap().name(), "motion");
        registry.object_detector(None).unwrap().warm_up().unwrap();
        registry.sequence_classifier(None).unwrap().warm_up().unwrap();
        assert_eq!(
            registry.sequence_classifier(Some("motion")).unwrap().name(),
            "motion"
        );
        assert!(registry.object_detector(Some("yolo")).is_err());
        assert_eq!(
            registry.list(),
            (vec!["stub".to_string()], vec!["motion".to_string()])
        );
    }

    struct NamedDetector;

    impl ObjectDetector for NamedDetector {
        fn name(&self) -> &'static str {
            "tract"
        }

        fn detect(
            &self,
            _frame: &crate::frame::Frame,
            _threshold: f32,
        ) -> Result<Vec<crate::detect::BoundingBox>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn later_backend_can_become_the_default() {
        let mut registry = DetectorRegistry::with_builtin();
        registry.register_object(NamedDetector);
        assert_eq!(registry.object_detector(None).unwrap().name(), "stub");

        registry.set_default_object("tract").unwrap();
        assert_eq!(registry.object_detector(None).unwrap().name(), "tract");
        assert_eq!(registry.object_detector(Some("stub")).unwrap().name(), "stub");
        assert!(registry.set_default_object("yolo").is_err());
        assert_eq!(registry.object_detector(None).unwrap().name(), "tract");
    }

    #[test]
    fn empty_registry_has_no_defaults() {
        let registry = DetectorRegistry::new();
        assert!(registry.object_detector(None).is_err());
        assert!(registry.sequence_classifier(None).is_err());
    }
}
