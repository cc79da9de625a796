use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One entry of a [`FileTree`].
///
/// Serialized in the mount format sandboxes understand:
/// `{"file": {"contents": "..."}}` or `{"directory": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileNode {
    File { contents: String },
    /// Kept verbatim; the core never looks inside.
    Directory(serde_json::Map<String, serde_json::Value>),
}

impl FileNode {
    pub fn file(contents: impl Into<String>) -> Self {
        FileNode::File {
            contents: contents.into(),
        }
    }

    pub fn contents(&self) -> Option<&str> {
        match self {
            FileNode::File { contents } => Some(contents),
            FileNode::Directory(_) => None,
        }
    }
}

/// Flat, ordered mapping from path to [`FileNode`].
///
/// The path string is the only structure: there are no parent links and no
/// nesting is enforced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileTree(BTreeMap<String, FileNode>);

impl FileTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `path` to a file with `contents`, returning the previous node.
    pub fn insert_file(&mut self, path: impl Into<String>, contents: impl Into<String>) -> Option<FileNode> {
        self.0.insert(path.into(), FileNode::file(contents))
    }

    pub fn insert(&mut self, path: impl Into<String>, node: FileNode) -> Option<FileNode> {
        self.0.insert(path.into(), node)
    }

    pub fn get(&self, path: &str) -> Option<&FileNode> {
        self.0.get(path)
    }

    pub fn contents(&self, path: &str) -> Option<&str> {
        self.0.get(path).and_then(FileNode::contents)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FileNode)> {
        self.0.iter()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl FromIterator<(String, FileNode)> for FileTree {
    fn from_iter<I: IntoIterator<Item = (String, FileNode)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a FileTree {
    type Item = (&'a String, &'a FileNode);
    type IntoIter = std::collections::btree_map::Iter<'a, String, FileNode>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_mount_format() {
        let tree: FileTree = serde_json::from_value(json!({
            "app.js": { "file": { "contents": "console.log(1)" } },
            "src": { "directory": { "index.js": { "file": { "contents": "" } } } }
        }))
        .unwrap();

        assert_eq!(tree.len(), 2);
        assert_eq!(tree.contents("app.js"), Some("console.log(1)"));
        assert!(matches!(tree.get("src"), Some(FileNode::Directory(_))));
    }

    #[test]
    fn writes_mount_format() {
        let mut tree = FileTree::new();
        tree.insert_file("package.json", "{}");
        assert_eq!(
            serde_json::to_value(&tree).unwrap(),
            json!({ "package.json": { "file": { "contents": "{}" } } })
        );
    }

    #[test]
    fn paths_are_ordered() {
        let mut tree = FileTree::new();
        tree.insert_file("b.js", "");
        tree.insert_file("a.js", "");
        assert_eq!(tree.paths().collect::<Vec<_>>(), vec!["a.js", "b.js"]);
    }
}
