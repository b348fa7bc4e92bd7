//! Path-addressed JSON tree.
//!
//! The pure state shared by the in-memory channel and the store server:
//! a single JSON value addressed by `/`-separated paths. Writes replace
//! the subtree at the path; removals prune branches left empty so an
//! emptied presence directory reads back as absent, not as `{}`.

use serde_json::{Map, Value};

/// One JSON tree. Starts empty.
#[derive(Debug, Default)]
pub struct JsonTree {
    root: Value,
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

impl JsonTree {
    pub fn new() -> Self {
        Self { root: Value::Null }
    }

    /// The value at `path`, or `None` if absent.
    pub fn get(&self, path: &str) -> Option<Value> {
        let mut node = &self.root;
        for seg in segments(path) {
            node = node.as_object()?.get(seg)?;
        }
        if node.is_null() {
            return None;
        }
        Some(node.clone())
    }

    /// Set `path` to `value`, replacing any existing subtree and
    /// creating intermediate branches as needed.
    pub fn set(&mut self, path: &str, value: Value) {
        let segs: Vec<&str> = segments(path).collect();
        if segs.is_empty() {
            self.root = value;
            return;
        }
        if !self.root.is_object() {
            self.root = Value::Object(Map::new());
        }
        let mut node = &mut self.root;
        for seg in &segs[..segs.len() - 1] {
            let map = node.as_object_mut().expect("branch is an object");
            let child = map
                .entry(seg.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            node = child;
        }
        let map = node.as_object_mut().expect("branch is an object");
        map.insert(segs[segs.len() - 1].to_string(), value);
    }

    /// Remove the subtree at `path`. Returns whether anything existed.
    /// Branches left empty are pruned.
    pub fn remove(&mut self, path: &str) -> bool {
        let segs: Vec<&str> = segments(path).collect();
        if segs.is_empty() {
            let existed = !self.root.is_null();
            self.root = Value::Null;
            return existed;
        }
        let removed = Self::remove_in(&mut self.root, &segs);
        if self
            .root
            .as_object()
            .is_some_and(|m| m.is_empty())
        {
            self.root = Value::Null;
        }
        removed
    }

    fn remove_in(node: &mut Value, segs: &[&str]) -> bool {
        let Some(map) = node.as_object_mut() else {
            return false;
        };
        if segs.len() == 1 {
            return map.remove(segs[0]).is_some();
        }
        let Some(child) = map.get_mut(segs[0]) else {
            return false;
        };
        let removed = Self::remove_in(child, &segs[1..]);
        if child.as_object().is_some_and(|m| m.is_empty()) {
            map.remove(segs[0]);
        }
        removed
    }

    /// Whether a mutation at `mutated` affects a subscription at
    /// `watched`: true when either path is a segment-prefix of the
    /// other.
    pub fn related(watched: &str, mutated: &str) -> bool {
        let a: Vec<&str> = segments(watched).collect();
        let b: Vec<&str> = segments(mutated).collect();
        let n = a.len().min(b.len());
        a[..n] == b[..n]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_and_get_nested() {
        let mut tree = JsonTree::new();
        tree.set("rooms/a/content", json!({ "content": "hello" }));

        assert_eq!(
            tree.get("rooms/a/content"),
            Some(json!({ "content": "hello" }))
        );
        assert_eq!(
            tree.get("rooms/a"),
            Some(json!({ "content": { "content": "hello" } }))
        );
        assert_eq!(tree.get("rooms/a/missing"), None);
        assert_eq!(tree.get("other"), None);
    }

    #[test]
    fn test_set_replaces_subtree() {
        let mut tree = JsonTree::new();
        tree.set("rooms/a", json!({ "content": "old", "extra": 1 }));
        tree.set("rooms/a", json!({ "content": "new" }));
        assert_eq!(tree.get("rooms/a"), Some(json!({ "content": "new" })));
    }

    #[test]
    fn test_set_through_scalar_replaces_it() {
        let mut tree = JsonTree::new();
        tree.set("rooms/a", json!("scalar"));
        tree.set("rooms/a/content", json!("x"));
        assert_eq!(tree.get("rooms/a/content"), Some(json!("x")));
    }

    #[test]
    fn test_remove_prunes_empty_branches() {
        let mut tree = JsonTree::new();
        tree.set("rooms/a/users/Alice", json!({ "joined_at": 1 }));
        tree.set("rooms/a/users/Bob", json!({ "joined_at": 2 }));

        assert!(tree.remove("rooms/a/users/Alice"));
        assert!(tree.get("rooms/a/users").is_some());

        assert!(tree.remove("rooms/a/users/Bob"));
        // Emptied directory reads back as absent.
        assert_eq!(tree.get("rooms/a/users"), None);
        assert_eq!(tree.get("rooms/a"), None);
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let mut tree = JsonTree::new();
        tree.set("rooms/a/content", json!("x"));
        assert!(!tree.remove("rooms/a/missing"));
        assert!(!tree.remove("elsewhere/deep/path"));
        assert_eq!(tree.get("rooms/a/content"), Some(json!("x")));
    }

    #[test]
    fn test_related_paths() {
        assert!(JsonTree::related("rooms/a/users", "rooms/a/users/Alice"));
        assert!(JsonTree::related("rooms/a/users/Alice", "rooms/a/users"));
        assert!(JsonTree::related("rooms/a/content", "rooms/a/content"));
        assert!(!JsonTree::related("rooms/a/content", "rooms/a/users"));
        assert!(!JsonTree::related("rooms/a/content", "rooms/b/content"));
        assert!(!JsonTree::related("rooms/a/editing", "rooms/a/content"));
    }
}
