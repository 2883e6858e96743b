use serde::{Deserialize, Serialize};
use std::fmt;

/// Hierarchical address of a record in a [`Store`](crate::Store).
///
/// A key is a `(kind, id)` pair with an optional parent key. Keys sharing a
/// root form one entity group, which is the unit stores use for transactional
/// conflict detection. An entity's events live as children of the entity's
/// key, so the entity's state record and its box always share a group.
///
/// Keys order by parent, then kind, then id. Children of one parent with the
/// same kind are therefore contiguous and sorted by id.
///
/// # Examples
///
/// ```
/// use eventbox::Key;
///
/// let project = Key::new("Project", "chromium");
/// let item = project.child("EventBoxItem", "0001");
///
/// assert_eq!(item.parent(), Some(&project));
/// assert_eq!(item.root(), &project);
/// assert_eq!(item.to_string(), "Project:chromium/EventBoxItem:0001");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent: Option<Box<Key>>,
    kind: String,
    id: String,
}

impl Key {
    /// Create a root key.
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Key {
            parent: None,
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// Create a key nested under this one.
    pub fn child(&self, kind: impl Into<String>, id: impl Into<String>) -> Self {
        Key {
            parent: Some(Box::new(self.clone())),
            kind: kind.into(),
            id: id.into(),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn parent(&self) -> Option<&Key> {
        self.parent.as_deref()
    }

    /// The root of this key, i.e. its entity group.
    pub fn root(&self) -> &Key {
        let mut key = self;
        while let Some(parent) = key.parent.as_deref() {
            key = parent;
        }
        key
    }

    /// Returns true if `self` is a direct child of `parent` with the given kind.
    pub fn is_child_of(&self, parent: &Key, kind: &str) -> bool {
        self.kind == kind && self.parent.as_deref() == Some(parent)
    }

    /// Smallest possible key among the children of `self` with the given kind.
    ///
    /// Stores use this as the start bound of an ordered range scan.
    pub(crate) fn first_child(&self, kind: &str) -> Key {
        self.child(kind, "")
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(parent) = &self.parent {
            write!(f, "{parent}/")?;
        }
        write!(f, "{}:{}", self.kind, self.id)
    }
}
