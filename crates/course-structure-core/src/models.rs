//! Core data models for the course block hierarchy.
//!
//! These types represent the blocks handed over by the content store and
//! the per-user context consumed by the apply phase.

use std::borrow::Borrow;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Unique identifier of a block within a course.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UsageKey(String);

impl UsageKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UsageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UsageKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for UsageKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Borrow<str> for UsageKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Identifier of a course.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CourseKey(String);

impl CourseKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CourseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CourseKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CourseKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A raw field value resolved against a block's declared fields.
///
/// `Absent` is distinct from a present JSON `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Present(Value),
    Absent,
}

impl FieldValue {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            FieldValue::Present(v) => Some(v),
            FieldValue::Absent => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, FieldValue::Absent)
    }
}

/// A node in the course content hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub usage_key: UsageKey,
    /// Block type, e.g. `"course"`, `"chapter"`, `"problem"`.
    pub category: String,
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
    /// Ordered child usage keys.
    #[serde(default)]
    pub children: Vec<UsageKey>,
}

impl Block {
    pub fn new(usage_key: impl Into<UsageKey>, category: &str) -> Self {
        Self {
            usage_key: usage_key.into(),
            category: category.to_string(),
            fields: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    pub fn with_field(mut self, name: &str, value: Value) -> Self {
        self.fields.insert(name.to_string(), value);
        self
    }

    pub fn with_children<I, K>(mut self, children: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<UsageKey>,
    {
        self.children = children.into_iter().map(Into::into).collect();
        self
    }

    /// Resolve a declared field. `category` is always available.
    pub fn field(&self, name: &str) -> FieldValue {
        if name == "category" {
            return FieldValue::Present(Value::String(self.category.clone()));
        }
        match self.fields.get(name) {
            Some(v) => FieldValue::Present(v.clone()),
            None => FieldValue::Absent,
        }
    }

    /// Read a boolean flag. Absent and `null` read as `false`; any other
    /// non-boolean value is a structural error.
    pub fn bool_field(&self, name: &str) -> Result<bool> {
        match self.fields.get(name) {
            None | Some(Value::Null) => Ok(false),
            Some(Value::Bool(flag)) => Ok(*flag),
            Some(other) => Err(Error::structural(
                &self.usage_key,
                format!("{} must be a boolean, got {}", name, other),
            )),
        }
    }
}

/// Immutable snapshot of one course's blocks, as handed over by a content store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseContent {
    pub course_key: CourseKey,
    pub root: UsageKey,
    pub blocks: HashMap<UsageKey, Block>,
}

impl CourseContent {
    pub fn new<I>(course_key: impl Into<CourseKey>, root: impl Into<UsageKey>, blocks: I) -> Self
    where
        I: IntoIterator<Item = Block>,
    {
        Self {
            course_key: course_key.into(),
            root: root.into(),
            blocks: blocks
                .into_iter()
                .map(|b| (b.usage_key.clone(), b))
                .collect(),
        }
    }

    pub fn root_block(&self) -> Result<&Block> {
        self.blocks.get(&self.root).ok_or_else(|| {
            Error::NotFound(format!(
                "root block {} of course {}",
                self.root, self.course_key
            ))
        })
    }

    pub fn get_block(&self, key: &UsageKey) -> Option<&Block> {
        self.blocks.get(key)
    }

    /// Declared children of `block`, in order.
    ///
    /// A child key with no block in the snapshot is a structural error.
    pub fn get_children(&self, block: &Block) -> Result<Vec<&Block>> {
        block
            .children
            .iter()
            .map(|key| {
                self.blocks.get(key).ok_or_else(|| {
                    Error::structural(
                        &block.usage_key,
                        format!("child {} is not present in the course", key),
                    )
                })
            })
            .collect()
    }
}

/// Information about a user in relation to one course.
///
/// Computed per request and never cached with structural data.
#[derive(Debug, Clone, PartialEq)]
pub struct CourseUserInfo {
    pub has_staff_access: bool,
    pub request_time: DateTime<Utc>,
}

impl CourseUserInfo {
    pub fn new(has_staff_access: bool) -> Self {
        Self {
            has_staff_access,
            request_time: Utc::now(),
        }
    }

    pub fn at(has_staff_access: bool, request_time: DateTime<Utc>) -> Self {
        Self {
            has_staff_access,
            request_time,
        }
    }
}
