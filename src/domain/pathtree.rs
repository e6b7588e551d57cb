use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

/// One node of the working-directory tree. Identified by its canonical
/// absolute path; `count` covers every session at or under the node.
#[derive(Clone, Debug, PartialEq)]
pub struct PathNode {
    pub path: PathBuf,
    pub name: String,
    pub count: usize,
    pub children: Vec<PathNode>,
}

/// Expands `~`, forces an absolute path, lexically resolves `.`/`..`, and
/// strips trailing separators. Idempotent.
pub fn canonicalize_path(input: &Path) -> PathBuf {
    let expanded = expand_home(input);
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("/"))
            .join(expanded)
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::RootDir | Component::Prefix(_) => normalized.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            Component::Normal(part) => normalized.push(part),
        }
    }
    if normalized.as_os_str().is_empty() {
        normalized.push("/");
    }
    normalized
}

fn expand_home(input: &Path) -> PathBuf {
    let Some(text) = input.to_str() else {
        return input.to_path_buf();
    };
    if text == "~" {
        return dirs::home_dir().unwrap_or_else(|| input.to_path_buf());
    }
    if let Some(rest) = text.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    input.to_path_buf()
}

/// True iff `candidate` equals `prefix` or lives under it (component
/// boundary, so `/a/bc` is not under `/a/b`). Both sides canonical.
pub fn path_is_under(candidate: &Path, prefix: &Path) -> bool {
    candidate.starts_with(prefix)
}

/// Builds the directory tree over every session's working directory. The
/// root is the longest common component prefix (`/` when there is none);
/// each node counts the sessions at or under it; children are sorted
/// case-insensitively with a case-sensitive tiebreak.
pub fn build_path_tree(paths: &[PathBuf]) -> Option<PathNode> {
    if paths.is_empty() {
        return None;
    }

    let canonical: Vec<Vec<String>> = paths
        .iter()
        .map(|path| split_components(&canonicalize_path(path)))
        .collect();

    let mut prefix = canonical[0].clone();
    for components in &canonical[1..] {
        let shared = prefix
            .iter()
            .zip(components.iter())
            .take_while(|(a, b)| a == b)
            .count();
        prefix.truncate(shared);
    }

    let root_path = join_components(&prefix);
    let mut root = NodeBuild::default();
    for components in &canonical {
        root.count += 1;
        let mut cursor = &mut root;
        for component in &components[prefix.len()..] {
            cursor = cursor.children.entry(component.clone()).or_default();
            cursor.count += 1;
        }
    }

    let root_name = prefix.last().cloned().unwrap_or_else(|| "/".to_string());
    Some(root.into_node(root_path, root_name))
}

#[derive(Default)]
struct NodeBuild {
    count: usize,
    children: BTreeMap<String, NodeBuild>,
}

impl NodeBuild {
    fn into_node(self, path: PathBuf, name: String) -> PathNode {
        let mut children: Vec<PathNode> = self
            .children
            .into_iter()
            .map(|(child_name, child)| {
                let child_path = path.join(&child_name);
                child.into_node(child_path, child_name)
            })
            .collect();
        children.sort_by(|a, b| compare_names(&a.name, &b.name));
        PathNode {
            path,
            name,
            count: self.count,
            children,
        }
    }
}

fn compare_names(a: &str, b: &str) -> Ordering {
    a.to_lowercase().cmp(&b.to_lowercase()).then_with(|| a.cmp(b))
}

fn split_components(path: &Path) -> Vec<String> {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().to_string()),
            _ => None,
        })
        .collect()
}

fn join_components(components: &[String]) -> PathBuf {
    let mut path = PathBuf::from("/");
    for component in components {
        path.push(component);
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_is_idempotent() {
        for raw in ["/a/b/../c/./d/", "~/projects", "relative/dir", "/"] {
            let once = canonicalize_path(Path::new(raw));
            let twice = canonicalize_path(&once);
            assert_eq!(once, twice, "input {raw}");
            assert!(once.is_absolute());
        }
    }

    #[test]
    fn canonicalize_normalizes_dots_and_trailing_separators() {
        assert_eq!(
            canonicalize_path(Path::new("/a/b/../c/./d/")),
            PathBuf::from("/a/c/d")
        );
        assert_eq!(canonicalize_path(Path::new("/..")), PathBuf::from("/"));
    }

    #[test]
    fn two_sibling_projects() {
        let tree = build_path_tree(&[
            PathBuf::from("/Users/a/proj1"),
            PathBuf::from("/Users/a/proj2"),
        ])
        .expect("tree");

        assert_eq!(tree.path, PathBuf::from("/Users/a"));
        assert_eq!(tree.count, 2);
        assert_eq!(tree.children.len(), 2);
        assert_eq!(tree.children[0].name, "proj1");
        assert_eq!(tree.children[0].count, 1);
        assert_eq!(tree.children[1].name, "proj2");
        assert_eq!(tree.children[1].count, 1);
        assert!(tree.children[0].children.is_empty());
    }

    #[test]
    fn counts_are_conserved_at_every_node() {
        let inputs = [
            PathBuf::from("/w/a"),
            PathBuf::from("/w/a/deep"),
            PathBuf::from("/w/a/deep"),
            PathBuf::from("/w/b"),
        ];
        let tree = build_path_tree(&inputs).expect("tree");
        assert_eq!(tree.count, inputs.len());

        fn check(node: &PathNode, inputs: &[PathBuf]) {
            let at_or_under = inputs
                .iter()
                .filter(|input| path_is_under(&canonicalize_path(input), &node.path))
                .count();
            assert_eq!(node.count, at_or_under, "node {}", node.path.display());
            for child in &node.children {
                check(child, inputs);
            }
        }
        check(&tree, &inputs);
    }

    #[test]
    fn single_path_is_its_own_root() {
        let tree = build_path_tree(&[PathBuf::from("/only/here")]).expect("tree");
        assert_eq!(tree.path, PathBuf::from("/only/here"));
        assert_eq!(tree.name, "here");
        assert_eq!(tree.count, 1);
        assert!(tree.children.is_empty());
    }

    #[test]
    fn disjoint_roots_collapse_to_slash() {
        let tree =
            build_path_tree(&[PathBuf::from("/etc/x"), PathBuf::from("/var/y")]).expect("tree");
        assert_eq!(tree.path, PathBuf::from("/"));
        assert_eq!(tree.name, "/");
        assert_eq!(tree.count, 2);
        assert_eq!(tree.children.len(), 2);
    }

    #[test]
    fn empty_input_yields_no_tree() {
        assert!(build_path_tree(&[]).is_none());
    }

    #[test]
    fn children_sort_case_insensitively() {
        let tree = build_path_tree(&[
            PathBuf::from("/r/banana"),
            PathBuf::from("/r/Apple"),
            PathBuf::from("/r/apple"),
            PathBuf::from("/r/Cherry"),
        ])
        .expect("tree");
        let names: Vec<&str> = tree.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Apple", "apple", "banana", "Cherry"]);
    }

    #[test]
    fn prefix_match_respects_component_boundaries() {
        assert!(path_is_under(Path::new("/a/b/c"), Path::new("/a/b")));
        assert!(path_is_under(Path::new("/a/b"), Path::new("/a/b")));
        assert!(!path_is_under(Path::new("/a/bc"), Path::new("/a/b")));
    }
}
