use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use crate::{
    patch::Selector,
    transform::{ImageOverride, ReplicaCount, Transformers},
};

/// File names recognized as the declaration file of a source directory, in
/// order of preference.
pub const DECLARATION_FILE_NAMES: [&str; 3] =
    ["kustomization.yaml", "kustomization.yml", "Kustomization"];

/// The declaration file of a source directory.
///
/// `apiVersion`, `kind` and any other unknown fields are ignored.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Kustomization {
    /// Resource files and base directories.
    pub resources: Vec<String>,

    /// Base directories, the legacy form of directory entries in `resources`.
    pub bases: Vec<String>,

    pub patches: Vec<PatchDeclaration>,
    pub patches_strategic_merge: Vec<PatchSource>,
    pub patches_json6902: Vec<PatchDeclaration>,

    pub namespace: Option<String>,
    pub name_prefix: Option<String>,
    pub name_suffix: Option<String>,
    pub common_labels: BTreeMap<String, String>,
    pub common_annotations: BTreeMap<String, String>,
    pub replicas: Vec<ReplicaCount>,
    pub images: Vec<ImageOverride>,
}

impl Kustomization {
    pub fn transformers(&self) -> Transformers {
        Transformers {
            namespace: self.namespace.clone(),
            name_prefix: self.name_prefix.clone().unwrap_or_default(),
            name_suffix: self.name_suffix.clone().unwrap_or_default(),
            common_labels: self.common_labels.clone(),
            common_annotations: self.common_annotations.clone(),
            replicas: self.replicas.clone(),
            images: self.images.clone(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchDeclaration {
    #[serde(default)]
    pub target: Option<Selector>,

    /// Inline patch, either as YAML text or as a structured document.
    #[serde(default)]
    pub patch: Option<PatchSource>,

    /// Patch file, relative to the declaring directory.
    #[serde(default)]
    pub path: Option<String>,
}

/// A patch given either as a string or as a structured YAML document.
///
/// Within `patchesStrategicMerge`, a single-line string is a file path and a
/// multi-line string is the patch itself.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum PatchSource {
    Text(String),
    Document(Value),
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use serde_json::json;

    use super::*;

    #[test]
    fn deserialize_full_declaration() {
        let kustomization: Kustomization = serde_yaml::from_str(indoc! {r#"
            apiVersion: kustomize.config.k8s.io/v1beta1
            kind: Kustomization
            resources: [deployment.yaml, ../base]
            bases: [../legacy]
            namespace: staging
            namePrefix: staging-
            commonLabels: {env: staging}
            replicas: [{name: web, count: 3}]
            images: [{name: nginx, newTag: "1.25"}]
            patches:
              - target: {kind: Deployment, name: web}
                patch: |-
                  - op: replace
                    path: /spec/replicas
                    value: 3
              - path: service-patch.yaml
            patchesStrategicMerge:
              - replica-patch.yaml
              - kind: Service
                metadata: {name: web}
            patchesJson6902:
              - target: {kind: Deployment, name: web, namespace: default}
                path: ops.yaml
        "#})
        .expect("declaration is valid");

        assert_eq!(kustomization.resources, ["deployment.yaml", "../base"]);
        assert_eq!(kustomization.bases, ["../legacy"]);
        assert_eq!(kustomization.patches.len(), 2);
        assert_eq!(
            kustomization.patches[0].target,
            Some(Selector::new("Deployment", "web"))
        );
        assert!(matches!(
            kustomization.patches[0].patch,
            Some(PatchSource::Text(_))
        ));
        assert_eq!(
            kustomization.patches_strategic_merge,
            [
                PatchSource::Text("replica-patch.yaml".to_owned()),
                PatchSource::Document(json!({"kind": "Service", "metadata": {"name": "web"}})),
            ]
        );
        assert_eq!(
            kustomization.patches_json6902[0].target,
            Some(Selector::new("Deployment", "web").in_namespace("default"))
        );

        let transformers = kustomization.transformers();
        assert_eq!(transformers.namespace.as_deref(), Some("staging"));
        assert_eq!(transformers.name_prefix, "staging-");
        assert_eq!(transformers.name_suffix, "");
        assert_eq!(transformers.replicas[0].count, 3);
        assert_eq!(transformers.images[0].new_tag.as_deref(), Some("1.25"));
    }

    #[test]
    fn empty_declaration() {
        let kustomization: Kustomization = serde_yaml::from_str("{}").unwrap();
        assert_eq!(kustomization, Kustomization::default());
    }
}
