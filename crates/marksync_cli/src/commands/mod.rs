//! CLI command implementations.

pub mod check;
pub mod status;
pub mod sync;

use std::path::{Path, PathBuf};

/// Collects vault-relative paths of all markdown documents under `root`,
/// skipping hidden directories.
pub fn collect_markdown(root: &Path) -> std::io::Result<Vec<String>> {
    let mut paths = Vec::new();
    walk(root, root, &mut paths)?;
    paths.sort();
    Ok(paths)
}

fn walk(root: &Path, dir: &Path, paths: &mut Vec<String>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') {
            continue;
        }
        if path.is_dir() {
            walk(root, &path, paths)?;
        } else if path.extension().is_some_and(|ext| ext == "md") {
            if let Some(rel) = relative(root, &path) {
                paths.push(rel);
            }
        }
    }
    Ok(())
}

fn relative(root: &Path, path: &Path) -> Option<String> {
    let rel: PathBuf = path.strip_prefix(root).ok()?.to_path_buf();
    // Vault paths always use forward slashes, whatever the platform.
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

/// Parses repeated `key=value` arguments.
pub fn parse_pairs(raw: &[String]) -> Result<Vec<(String, String)>, String> {
    raw.iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .ok_or_else(|| format!("expected key=value, got {pair:?}"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_markdown_recursively() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("notes/deep")).unwrap();
        std::fs::create_dir_all(dir.path().join(".hidden")).unwrap();
        std::fs::write(dir.path().join("a.md"), "a").unwrap();
        std::fs::write(dir.path().join("notes/b.md"), "b").unwrap();
        std::fs::write(dir.path().join("notes/deep/c.md"), "c").unwrap();
        std::fs::write(dir.path().join("notes/skip.txt"), "x").unwrap();
        std::fs::write(dir.path().join(".hidden/d.md"), "d").unwrap();

        let paths = collect_markdown(dir.path()).unwrap();
        assert_eq!(paths, vec!["a.md", "notes/b.md", "notes/deep/c.md"]);
    }

    #[test]
    fn parses_pairs() {
        let pairs = parse_pairs(&["notes=type-1".into(), "=type-root".into()]).unwrap();
        assert_eq!(
            pairs,
            vec![
                ("notes".to_string(), "type-1".to_string()),
                (String::new(), "type-root".to_string())
            ]
        );
        assert!(parse_pairs(&["broken".into()]).is_err());
    }
}
