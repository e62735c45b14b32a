use indexmap::IndexMap;
use snafu::{Snafu, ensure};

use super::{Resource, ResourceId};
use crate::{
    error::{ClassifyError, ErrorKind},
    iter::TryFromIterator,
};

#[derive(Debug, PartialEq, Eq, Snafu)]
#[snafu(display("resource {id} is declared more than once"))]
pub struct DuplicateResourceError {
    pub id: ResourceId,
}

impl ClassifyError for DuplicateResourceError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::DuplicateResource
    }
}

/// An insertion-ordered set of [`Resource`]s with unique identities.
///
/// ```
/// # use serde_json::json;
/// # use stackable_overlay::{iter::TryFromIterator, resource::{Resource, ResourceSet}};
/// let web = Resource::from_value(json!({"kind": "Service", "metadata": {"name": "web"}})).unwrap();
///
/// let mut set = ResourceSet::try_from_iter([web.clone()]).unwrap();
/// assert_eq!(set.len(), 1);
/// assert!(set.insert(web).is_err());
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourceSet {
    resources: IndexMap<ResourceId, Resource>,
}

impl ResourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.resources.contains_key(id)
    }

    pub fn get(&self, id: &ResourceId) -> Option<&Resource> {
        self.resources.get(id)
    }

    /// Iterates over all resources in insertion order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &Resource> {
        self.resources.values()
    }

    pub fn ids(&self) -> impl ExactSizeIterator<Item = &ResourceId> {
        self.resources.keys()
    }

    /// Returns all resources sorted by their identity.
    pub fn sorted(&self) -> Vec<&Resource> {
        let mut resources: Vec<_> = self.resources.values().collect();
        resources.sort_by(|a, b| a.id().cmp(b.id()));
        resources
    }

    /// Appends `resource`, failing if its identity is already taken.
    pub fn insert(&mut self, resource: Resource) -> Result<(), DuplicateResourceError> {
        ensure!(
            !self.contains(resource.id()),
            DuplicateResourceSnafu {
                id: resource.id().clone()
            }
        );
        self.resources.insert(resource.id().clone(), resource);
        Ok(())
    }

    /// Appends every resource of `other`, in order.
    pub fn extend_from(&mut self, other: &Self) -> Result<(), DuplicateResourceError> {
        for resource in other.iter() {
            self.insert(resource.clone())?;
        }
        Ok(())
    }

    /// Replaces the resource currently known as `id` by `resource`, keeping
    /// its position.
    ///
    /// The replacement may carry a different identity (for example after a
    /// rename), but that identity must not be taken by another resource. If
    /// `id` is unknown, `resource` is appended.
    pub fn replace(
        &mut self,
        id: &ResourceId,
        resource: Resource,
    ) -> Result<(), DuplicateResourceError> {
        let Some(index) = self.resources.get_index_of(id) else {
            return self.insert(resource);
        };

        if resource.id() == id {
            self.resources.insert(id.clone(), resource);
            return Ok(());
        }

        ensure!(
            !self.contains(resource.id()),
            DuplicateResourceSnafu {
                id: resource.id().clone()
            }
        );
        self.resources.shift_remove_index(index);
        self.resources
            .shift_insert(index, resource.id().clone(), resource);
        Ok(())
    }
}

impl TryFromIterator<Resource> for ResourceSet {
    type Error = DuplicateResourceError;

    fn try_from_iter<I: IntoIterator<Item = Resource>>(iter: I) -> Result<Self, Self::Error> {
        let mut set = Self::new();
        for resource in iter {
            set.insert(resource)?;
        }
        Ok(set)
    }
}

impl<'a> IntoIterator for &'a ResourceSet {
    type IntoIter = indexmap::map::Values<'a, ResourceId, Resource>;
    type Item = &'a Resource;

    fn into_iter(self) -> Self::IntoIter {
        self.resources.values()
    }
}

impl IntoIterator for ResourceSet {
    type IntoIter = indexmap::map::IntoValues<ResourceId, Resource>;
    type Item = Resource;

    fn into_iter(self) -> Self::IntoIter {
        self.resources.into_values()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn resource(kind: &str, name: &str) -> Resource {
        Resource::from_value(json!({"kind": kind, "metadata": {"name": name}})).unwrap()
    }

    fn names(set: &ResourceSet) -> Vec<&str> {
        set.iter().map(Resource::name).collect()
    }

    #[test]
    fn insert_rejects_duplicates() {
        let mut set = ResourceSet::new();
        set.insert(resource("Service", "a")).unwrap();
        set.insert(resource("Deployment", "a")).unwrap();

        let error = set.insert(resource("Service", "a")).unwrap_err();
        assert_eq!(error.id, ResourceId::new("Service", None, "a"));
        assert_eq!(error.kind(), ErrorKind::DuplicateResource);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn insertion_order_is_kept_and_sorted_is_by_identity() {
        let set = ResourceSet::try_from_iter([
            resource("Service", "b"),
            resource("Deployment", "z"),
            resource("Service", "a"),
        ])
        .unwrap();

        assert_eq!(names(&set), ["b", "z", "a"]);
        assert_eq!(
            set.sorted()
                .into_iter()
                .map(Resource::name)
                .collect::<Vec<_>>(),
            ["z", "a", "b"]
        );
    }

    #[test]
    fn replace_keeps_position_on_rename() {
        let mut set = ResourceSet::try_from_iter([
            resource("Service", "a"),
            resource("Service", "b"),
            resource("Service", "c"),
        ])
        .unwrap();

        set.replace(
            &ResourceId::new("Service", None, "b"),
            resource("Service", "renamed"),
        )
        .unwrap();
        assert_eq!(names(&set), ["a", "renamed", "c"]);

        let error = set
            .replace(
                &ResourceId::new("Service", None, "renamed"),
                resource("Service", "c"),
            )
            .unwrap_err();
        assert_eq!(error.id, ResourceId::new("Service", None, "c"));
    }
}
