//! Nested directory view over flat rules paths.
//!
//! The store keeps rules as flat keys (`file:docs/api/auth.md`). The
//! rules page wants a tree:
//!
//! ```text
//! root/
//! ├── docs/
//! │   └── api/
//! │       └── auth.md
//! └── README.md
//! ```
//!
//! Children keep first-insertion order, so the tree mirrors the order of
//! the listing it was built from.

use serde::Serialize;

use crate::models::FileEntry;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TreeNode {
    Directory {
        name: String,
        children: Vec<TreeNode>,
    },
    File {
        name: String,
        path: String,
        size: u64,
        modified: String,
    },
}

impl TreeNode {
    pub fn name(&self) -> &str {
        match self {
            TreeNode::Directory { name, .. } | TreeNode::File { name, .. } => name,
        }
    }

    /// Number of files anywhere below this node.
    pub fn file_count(&self) -> usize {
        match self {
            TreeNode::File { .. } => 1,
            TreeNode::Directory { children, .. } => children.iter().map(|c| c.file_count()).sum(),
        }
    }
}

/// Build the tree rooted at a directory named `root`.
///
/// Empty path segments (`a//b`, leading `/`) are ignored.
pub fn build_file_tree(files: &[FileEntry]) -> TreeNode {
    let mut root: Vec<TreeNode> = Vec::new();

    for file in files {
        let parts: Vec<&str> = file.path.split('/').filter(|p| !p.is_empty()).collect();
        let Some((leaf, dirs)) = parts.split_last() else {
            continue;
        };

        let mut current = &mut root;
        for dir in dirs {
            current = child_dir(current, dir);
        }

        current.push(TreeNode::File {
            name: leaf.to_string(),
            path: file.path.clone(),
            size: file.size,
            modified: file.modified.clone(),
        });
    }

    TreeNode::Directory {
        name: "root".to_string(),
        children: root,
    }
}

/// Find or create the directory `name` among `children` and return its children.
fn child_dir<'a>(children: &'a mut Vec<TreeNode>, name: &str) -> &'a mut Vec<TreeNode> {
    let idx = match children
        .iter()
        .position(|c| matches!(c, TreeNode::Directory { name: n, .. } if n == name))
    {
        Some(idx) => idx,
        None => {
            children.push(TreeNode::Directory {
                name: name.to_string(),
                children: Vec::new(),
            });
            children.len() - 1
        }
    };

    match &mut children[idx] {
        TreeNode::Directory { children, .. } => children,
        TreeNode::File { .. } => unreachable!("position() only matches directories"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(path: &str) -> FileEntry {
        FileEntry {
            path: path.to_string(),
            size: 2,
            modified: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_empty_listing() {
        let tree = build_file_tree(&[]);
        assert_eq!(
            serde_json::to_value(&tree).unwrap(),
            json!({ "name": "root", "type": "directory", "children": [] })
        );
        assert_eq!(tree.file_count(), 0);
    }

    #[test]
    fn test_nested_paths_share_directories() {
        let tree = build_file_tree(&[
            entry("docs/api/auth.md"),
            entry("README.md"),
            entry("docs/api/users.md"),
            entry("docs/intro.md"),
        ]);
        assert_eq!(tree.file_count(), 4);

        let value = serde_json::to_value(&tree).unwrap();
        let top = value["children"].as_array().unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0]["name"], "docs");
        assert_eq!(top[0]["type"], "directory");
        assert_eq!(top[1]["name"], "README.md");
        assert_eq!(top[1]["type"], "file");
        assert_eq!(top[1]["path"], "README.md");
        assert_eq!(top[1]["size"], 2);

        let docs = top[0]["children"].as_array().unwrap();
        assert_eq!(docs[0]["name"], "api");
        assert_eq!(docs[0]["children"].as_array().unwrap().len(), 2);
        assert_eq!(docs[1]["name"], "intro.md");
    }

    #[test]
    fn test_file_keeps_full_path() {
        let tree = build_file_tree(&[entry("a/b/c.txt")]);
        let value = serde_json::to_value(&tree).unwrap();
        let leaf = &value["children"][0]["children"][0]["children"][0];
        assert_eq!(leaf["name"], "c.txt");
        assert_eq!(leaf["path"], "a/b/c.txt");
    }

    #[test]
    fn test_empty_segments_ignored() {
        let tree = build_file_tree(&[entry("/a//b.txt"), entry("///")]);
        assert_eq!(tree.file_count(), 1);
        let TreeNode::Directory { children, .. } = &tree else {
            panic!("root must be a directory");
        };
        assert_eq!(children[0].name(), "a");
    }
}
