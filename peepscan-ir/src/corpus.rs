// SPDX-License-Identifier: Apache-2.0

//! Deterministic enumeration of `.bb` corpus files under a directory
//! root.

use std::path::{Path, PathBuf};

const CORPUS_EXTENSION: &str = "bb";

fn is_corpus_file(path: &Path) -> bool {
    path.extension().and_then(|s| s.to_str()) == Some(CORPUS_EXTENSION)
}

/// Recursively collects `.bb` files under `root` in sorted order.
/// Symlinks are included when they resolve to regular files.
pub fn collect_bb_files_sorted(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            let ty = entry.file_type()?;
            if ty.is_dir() {
                stack.push(path);
            } else if ty.is_file() {
                if is_corpus_file(&path) {
                    files.push(path);
                }
            } else if ty.is_symlink() && is_corpus_file(&path) {
                if let Ok(meta) = std::fs::metadata(&path) {
                    if meta.is_file() {
                        files.push(path);
                    }
                }
            }
        }
    }

    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_is_recursive_sorted_and_filtered() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("corpus");
        let nested = root.join("nested");
        std::fs::create_dir_all(&nested).unwrap();

        std::fs::write(root.join("z.bb"), "fn f { block a:\n ret()\n}\n").unwrap();
        std::fs::write(root.join("a.bb"), "fn f { block a:\n ret()\n}\n").unwrap();
        std::fs::write(nested.join("m.bb"), "fn f { block a:\n ret()\n}\n").unwrap();
        std::fs::write(root.join("skip.txt"), "not a corpus file").unwrap();

        let files = collect_bb_files_sorted(&root).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a.bb", "m.bb", "z.bb"]);
    }

    #[test]
    fn empty_directory_collects_nothing() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("corpus");
        std::fs::create_dir_all(&root).unwrap();
        assert!(collect_bb_files_sorted(&root).unwrap().is_empty());
    }
}
