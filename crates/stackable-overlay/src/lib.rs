//! Declarative overlay and patch composition for Kubernetes manifests.
//!
//! A *source directory* contains a `kustomization.yaml` declaration which lists
//! resource documents, the *bases* it builds on and the patches it applies to
//! everything it inherits. The [`Composer`](composer::Composer) resolves the
//! base graph, applies every directory's patches in declaration order and
//! produces one fully merged [`ResourceSet`](resource::ResourceSet), which the
//! [`emitter`] serializes for an external apply step.
//!
//! ```
//! use indoc::indoc;
//! use stackable_overlay::{
//!     composer::{ComposeOptions, Composer},
//!     emitter::{self, EmitOptions},
//!     fs::MemoryFileSystem,
//! };
//!
//! let fs = MemoryFileSystem::default()
//!     .with_file("base/kustomization.yaml", "resources: [deployment.yaml]")
//!     .with_file("base/deployment.yaml", indoc! {"
//!         apiVersion: apps/v1
//!         kind: Deployment
//!         metadata:
//!           name: web
//!         spec:
//!           replicas: 2
//!     "})
//!     .with_file("prod/kustomization.yaml", indoc! {"
//!         resources: [../base]
//!         replicas:
//!           - name: web
//!             count: 3
//!     "});
//!
//! let composer = Composer::new(fs, ComposeOptions::default());
//! let resources = composer.compose("prod").unwrap();
//! let yaml = emitter::to_yaml_string(&resources, &EmitOptions::default()).unwrap();
//! assert!(yaml.contains("replicas: 3"));
//! ```
pub mod composer;
pub mod emitter;
pub mod error;
pub mod fs;
pub mod iter;
pub mod loader;
pub mod merge;
pub mod patch;
pub mod resolver;
pub mod resource;
pub mod transform;

pub use error::{ClassifyError, ErrorKind};
