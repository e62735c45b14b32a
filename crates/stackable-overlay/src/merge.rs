//! Strategic merge of structured documents.
//!
//! Merging an *overlay* into a *base* follows these rules:
//!
//! - Scalars in the overlay replace the base.
//! - Mappings are merged recursively. Keys of both sides are kept, the overlay
//!   wins on conflicts, and new keys are appended after the existing ones.
//! - Sequences are replaced wholesale, unless [`MergeKeys`] declares a merge key
//!   for the field holding the sequence. Elements are then matched by that key:
//!   matched elements are merged recursively, unmatched base elements stay where
//!   they are and overlay-only elements are appended.
//!
//! Like Kubernetes strategic merge patches, overlays can carry directives:
//!
//! - `null` as a mapping value removes the key from the base.
//! - `$patch: replace` inside a mapping replaces the base mapping instead of
//!   merging into it.
//! - `$patch: delete` inside a mapping removes it from the base. For keyed
//!   sequences this removes the element with the same key.
//!
//! Directives are never part of the merge result.
use std::{fmt::Display, str::FromStr};

use indexmap::IndexMap;
use serde_json::{Map, Value};
use snafu::{Snafu, ensure};

/// The key holding merge directives in overlay mappings.
pub const PATCH_DIRECTIVE: &str = "$patch";

#[derive(Debug, PartialEq, Eq, Snafu)]
#[snafu(display("invalid merge key rule {input:?}, expected FIELD=KEY[,KEY...]"))]
pub struct ParseMergeKeyRuleError {
    input: String,
}

/// Declares which element key identifies the elements of sequences stored
/// under a certain field name.
///
/// ```
/// # use stackable_overlay::merge::MergeKeyRule;
/// let rule: MergeKeyRule = "ports=containerPort,port".parse().unwrap();
/// assert_eq!(rule.field, "ports");
/// assert_eq!(rule.keys, ["containerPort", "port"]);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeKeyRule {
    pub field: String,

    /// Candidate keys, in order of preference.
    pub keys: Vec<String>,
}

impl FromStr for MergeKeyRule {
    type Err = ParseMergeKeyRuleError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseMergeKeyRuleSnafu { input }.build();

        let (field, keys) = input.split_once('=').ok_or_else(invalid)?;
        let keys: Vec<String> = keys.split(',').map(str::trim).map(str::to_owned).collect();

        ensure!(
            !field.trim().is_empty() && keys.iter().all(|key| !key.is_empty()),
            ParseMergeKeyRuleSnafu { input }
        );

        Ok(Self {
            field: field.trim().to_owned(),
            keys,
        })
    }
}

impl Display for MergeKeyRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.field, self.keys.join(","))
    }
}

/// The set of [`MergeKeyRule`]s used during a merge.
///
/// [`MergeKeys::default()`] knows the merge keys of the common Kubernetes list
/// fields (containers, env, volumes, ports, ...). Rules are looked up by the
/// name of the field holding the sequence, independent of where that field is
/// located in the document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeKeys {
    rules: IndexMap<String, Vec<String>>,
}

impl Default for MergeKeys {
    fn default() -> Self {
        Self::empty()
            .with_rule("containers", ["name"])
            .with_rule("initContainers", ["name"])
            .with_rule("ephemeralContainers", ["name"])
            .with_rule("env", ["name"])
            .with_rule("volumes", ["name"])
            .with_rule("imagePullSecrets", ["name"])
            .with_rule("volumeMounts", ["mountPath"])
            .with_rule("ports", ["containerPort", "port"])
            .with_rule("hostAliases", ["ip"])
    }
}

impl MergeKeys {
    /// No merge keys at all, every sequence is replaced wholesale.
    pub fn empty() -> Self {
        Self {
            rules: IndexMap::new(),
        }
    }

    pub fn with_rule<K>(mut self, field: impl Into<String>, keys: K) -> Self
    where
        K: IntoIterator,
        K::Item: Into<String>,
    {
        self.insert(MergeKeyRule {
            field: field.into(),
            keys: keys.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Adds `rule`, replacing an existing rule for the same field.
    pub fn insert(&mut self, rule: MergeKeyRule) {
        self.rules.insert(rule.field, rule.keys);
    }

    pub fn keys_for(&self, field: &str) -> &[String] {
        self.rules.get(field).map_or(&[], Vec::as_slice)
    }

    /// Picks the first candidate key which is present in every element of
    /// both sequences and identifies a single element within each of them.
    /// Returns [`None`] if the sequences must be replaced wholesale.
    fn merge_key(&self, field: &str, base: &[Value], overlay: &[Value]) -> Option<&str> {
        self.keys_for(field)
            .iter()
            .find(|key| identifies_elements(base, key) && identifies_elements(overlay, key))
            .map(String::as_str)
    }
}

impl Extend<MergeKeyRule> for MergeKeys {
    fn extend<T: IntoIterator<Item = MergeKeyRule>>(&mut self, iter: T) {
        for rule in iter {
            self.insert(rule);
        }
    }
}

/// Whether every element of `items` has a distinct, non-null `key`.
fn identifies_elements(items: &[Value], key: &str) -> bool {
    let mut seen = Vec::with_capacity(items.len());
    for item in items {
        match item.get(key) {
            Some(value) if !value.is_null() && !seen.contains(&value) => seen.push(value),
            _ => return false,
        }
    }
    true
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Directive {
    Merge,
    Replace,
    Delete,
}

fn directive(value: &Value) -> Directive {
    match value.get(PATCH_DIRECTIVE).and_then(Value::as_str) {
        Some("replace") => Directive::Replace,
        Some("delete") => Directive::Delete,
        _ => Directive::Merge,
    }
}

/// Merges `overlay` into `base` and returns the result.
pub fn merge_values(base: &Value, overlay: &Value, keys: &MergeKeys) -> Value {
    merge_value(base, overlay, None, keys)
}

/// Merges the `overlay` mapping into the `base` mapping and returns the result.
pub fn merge_maps(
    base: &Map<String, Value>,
    overlay: &Map<String, Value>,
    keys: &MergeKeys,
) -> Map<String, Value> {
    let mut merged = base.clone();

    for (key, value) in overlay {
        if key == PATCH_DIRECTIVE {
            continue;
        }

        if value.is_null() || directive(value) == Directive::Delete {
            merged.shift_remove(key);
            continue;
        }

        let value = match merged.get(key) {
            Some(existing) => merge_value(existing, value, Some(key), keys),
            None => strip_directives(value),
        };
        merged.insert(key.clone(), value);
    }

    merged
}

fn merge_value(base: &Value, overlay: &Value, field: Option<&str>, keys: &MergeKeys) -> Value {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay_map)) => match directive(overlay) {
            Directive::Merge => Value::Object(merge_maps(base, overlay_map, keys)),
            Directive::Replace | Directive::Delete => strip_directives(overlay),
        },
        (Value::Array(base), Value::Array(overlay_items)) => {
            match field.and_then(|field| keys.merge_key(field, base, overlay_items)) {
                Some(key) => Value::Array(merge_keyed(base, overlay_items, key, keys)),
                None => strip_directives(overlay),
            }
        }
        _ => strip_directives(overlay),
    }
}

fn merge_keyed(base: &[Value], overlay: &[Value], key: &str, keys: &MergeKeys) -> Vec<Value> {
    let mut merged = base.to_vec();

    for item in overlay {
        let item_key = item.get(key);
        let position = merged
            .iter()
            .position(|existing| existing.get(key) == item_key);

        match (position, directive(item)) {
            (Some(position), Directive::Delete) => {
                merged.remove(position);
            }
            (Some(position), _) => {
                merged[position] = merge_value(&merged[position], item, None, keys);
            }
            (None, Directive::Delete) => {}
            (None, _) => merged.push(strip_directives(item)),
        }
    }

    merged
}

/// Copies `value` without any directives. Mapping entries set to `null` and
/// sequence elements marked for deletion don't have anything to apply to, so
/// they are dropped as well.
fn strip_directives(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, value)| *key != PATCH_DIRECTIVE && !value.is_null())
                .map(|(key, value)| (key.clone(), strip_directives(value)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .filter(|item| directive(item) != Directive::Delete)
                .map(strip_directives)
                .collect(),
        ),
        other => other.clone(),
    }
}
