//! # Image Overrides
//!
//! Image references are pinned at release time through environment variables
//! on the operator Deployment:
//!
//! - `IMAGE_<container>=<image>` overrides every container with that name
//! - `IMAGE_<parent>__<container>=<image>` only the container inside the
//!   workload named `<parent>`
//!
//! The qualified form always wins over the bare one. The same map is consulted
//! for environment variables that carry an image, keyed by the variable name.

use super::{Transform, TransformError};
use crate::constants::IMAGE_OVERRIDE_SEPARATOR;
use crate::manifest::kind::Workload;
use async_trait::async_trait;
use kube::core::DynamicObject;
use std::collections::BTreeMap;

/// Resolved image overrides, keyed by `container` or `parent/container`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageOverrides {
    images: BTreeMap<String, String>,
}

impl ImageOverrides {
    /// Collect overrides from `KEY=VALUE` pairs carrying `prefix`
    ///
    /// Empty values are ignored. A remainder with exactly one separator is a
    /// qualified `parent__child` key; anything else is used whole as the
    /// child name.
    pub fn from_environ<'a, I>(vars: I, prefix: &str) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut images = BTreeMap::new();
        for (key, value) in vars {
            let Some(rest) = key.strip_prefix(prefix) else {
                continue;
            };
            if value.is_empty() || rest.is_empty() {
                continue;
            }
            let lookup_key = match rest.split_once(IMAGE_OVERRIDE_SEPARATOR) {
                Some((parent, child))
                    if rest.matches(IMAGE_OVERRIDE_SEPARATOR).count() == 1 =>
                {
                    qualified(parent, child)
                }
                _ => rest.to_string(),
            };
            images.insert(lookup_key, value.to_string());
        }
        Self { images }
    }

    /// Image for `child` inside `parent`, preferring the qualified key
    pub fn lookup(&self, parent: &str, child: &str) -> Option<&str> {
        self.images
            .get(&qualified(parent, child))
            .or_else(|| self.images.get(child))
            .map(String::as_str)
    }

    /// Image stored under an exact key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.images.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.images.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

fn qualified(parent: &str, child: &str) -> String {
    format!("{parent}/{child}")
}

/// Substitutes container images and image-carrying env vars
#[derive(Debug, Clone)]
pub struct ImageTransform {
    overrides: ImageOverrides,
}

impl ImageTransform {
    pub fn new(overrides: ImageOverrides) -> Self {
        Self { overrides }
    }
}

#[async_trait]
impl Transform for ImageTransform {
    fn name(&self) -> &'static str {
        "image-overrides"
    }

    async fn apply(&self, resource: DynamicObject) -> Result<DynamicObject, TransformError> {
        let mut workload = match Workload::from_dynamic(resource)? {
            Workload::Other(obj) => return Ok(obj),
            typed => typed,
        };
        if self.overrides.is_empty() {
            return Ok(workload.into_dynamic()?);
        }

        let name = workload.name().to_string();
        let generate_name = workload.generate_name().map(str::to_string);
        let Some(pod) = workload
            .pod_template_mut()
            .and_then(|template| template.spec.as_mut())
        else {
            return Ok(workload.into_dynamic()?);
        };

        for container in &mut pod.containers {
            let image = self
                .overrides
                .get(&qualified(&name, &container.name))
                .or_else(|| {
                    generate_name
                        .as_deref()
                        .and_then(|g| self.overrides.get(&qualified(g, &container.name)))
                })
                .or_else(|| self.overrides.get(&container.name));
            if let Some(image) = image {
                container.image = Some(image.to_string());
            }

            for env in container.env.iter_mut().flatten() {
                if let Some(image) = self.overrides.lookup(&container.name, &env.name) {
                    env.value = Some(image.to_string());
                }
            }
        }

        Ok(workload.into_dynamic()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::test_support::deployment;

    fn overrides(pairs: &[(&str, &str)]) -> ImageOverrides {
        ImageOverrides::from_environ(pairs.iter().copied(), "IMAGE_")
    }

    #[test]
    fn test_qualified_key_wins_over_bare_key() {
        let map = overrides(&[("IMAGE_queue", "a"), ("IMAGE_myksvc__queue", "b")]);
        assert_eq!(map.lookup("myksvc", "queue"), Some("b"));
        assert_eq!(map.lookup("other", "queue"), Some("a"));
        assert_eq!(map.lookup("other", "missing"), None);
    }

    #[test]
    fn test_parsing_rules() {
        let map = overrides(&[
            ("IMAGE_empty", ""),
            ("IMAGE_a__b__c", "x"),
            ("IMAGE_", "y"),
            ("OTHER_queue", "z"),
            ("IMAGE_kafka-controller__controller", "w"),
        ]);
        assert_eq!(map.get("empty"), None);
        assert_eq!(map.get("a__b__c"), Some("x"));
        assert_eq!(map.get("kafka-controller/controller"), Some("w"));
        assert_eq!(map.len(), 2);
    }

    #[tokio::test]
    async fn test_container_image_and_env_are_replaced() {
        let transform = ImageTransform::new(overrides(&[
            ("IMAGE_kafka-controller__controller", "registry/controller:pinned"),
            ("IMAGE_controller", "registry/controller:bare"),
            ("IMAGE_DISPATCHER_IMAGE", "registry/dispatcher:pinned"),
        ]));

        let out = transform
            .apply(deployment("kafka-controller", "knative-eventing", None))
            .await
            .unwrap();
        let container = &out.data["spec"]["template"]["spec"]["containers"][0];
        assert_eq!(container["image"], "registry/controller:pinned");
        assert_eq!(container["env"][0]["value"], "registry/dispatcher:pinned");

        let other = transform
            .apply(deployment("kafka-webhook", "knative-eventing", None))
            .await
            .unwrap();
        assert_eq!(
            other.data["spec"]["template"]["spec"]["containers"][0]["image"],
            "registry/controller:bare"
        );
    }

    #[tokio::test]
    async fn test_absent_override_keeps_template_image() {
        let transform = ImageTransform::new(overrides(&[("IMAGE_unrelated", "x")]));
        let out = transform
            .apply(deployment("kafka-controller", "knative-eventing", None))
            .await
            .unwrap();
        assert_eq!(
            out.data["spec"]["template"]["spec"]["containers"][0]["image"],
            "registry/controller:template"
        );
    }
}
