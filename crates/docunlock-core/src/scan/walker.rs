/// Deterministic discovery of the files a batch will visit
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Expand `inputs` into the ordered list of files to inspect.
///
/// Inputs that are not directories are passed through unchanged, so a
/// missing path still gets its own (ERROR) entry. Directory contents are
/// visited depth-first, sorted by file name at each level; only regular
/// files are kept. Links are followed, and each real directory is
/// descended at most once, so link cycles terminate. A file reached more
/// than once, by repetition or through a link or its parent directory,
/// is listed only at its first position.
pub fn discover(inputs: &[PathBuf], recursive: bool) -> Vec<PathBuf> {
    let mut visited = HashSet::new();
    let mut files = FileList::default();

    for input in inputs {
        match fs::metadata(input) {
            Ok(meta) if meta.is_dir() => {
                if !visited.insert(canonical(input)) {
                    tracing::debug!("skipping already visited {}", input.display());
                    continue;
                }
                walk_dir(input, recursive, &mut visited, &mut files);
            }
            _ => files.push(input.clone()),
        }
    }

    files.paths
}

/// Ordered file list keyed on canonical paths
#[derive(Default)]
struct FileList {
    seen: HashSet<PathBuf>,
    paths: Vec<PathBuf>,
}

impl FileList {
    fn push(&mut self, path: PathBuf) {
        if self.seen.insert(canonical(&path)) {
            self.paths.push(path);
        } else {
            tracing::debug!("skipping duplicate {}", path.display());
        }
    }
}

fn walk_dir(root: &Path, recursive: bool, visited: &mut HashSet<PathBuf>, files: &mut FileList) {
    let max_depth = if recursive { usize::MAX } else { 1 };

    let walker = WalkDir::new(root)
        .follow_links(true)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 || !entry.file_type().is_dir() {
                return true;
            }
            if entry.depth() >= max_depth {
                return false;
            }
            visited.insert(canonical(entry.path()))
        });

    for entry in walker {
        match entry {
            Ok(entry) if entry.file_type().is_file() => files.push(entry.into_path()),
            Ok(_) => {}
            // Broken links, loops and unreadable directories are not files.
            Err(e) => tracing::debug!("skipping during walk of {}: {}", root.display(), e),
        }
    }
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_recursive_order_is_sorted_depth_first() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("b.pdf"));
        touch(&dir.path().join("a").join("z.doc"));
        touch(&dir.path().join("a").join("c.doc"));
        touch(&dir.path().join("c.pdf"));

        let files = discover(&[dir.path().to_path_buf()], true);
        let rel: Vec<PathBuf> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            rel,
            vec![
                PathBuf::from("a/c.doc"),
                PathBuf::from("a/z.doc"),
                PathBuf::from("b.pdf"),
                PathBuf::from("c.pdf"),
            ]
        );
    }

    #[test]
    fn test_non_recursive_takes_direct_children() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("top.pdf"));
        touch(&dir.path().join("sub").join("deep.pdf"));

        let files = discover(&[dir.path().to_path_buf()], false);
        assert_eq!(files, vec![dir.path().join("top.pdf")]);
    }

    #[test]
    fn test_missing_input_passes_through() {
        let missing = PathBuf::from("/no/such/input.pdf");
        assert_eq!(discover(&[missing.clone()], true), vec![missing]);
    }

    #[test]
    fn test_same_directory_twice_is_walked_once() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("a.pdf"));

        let files = discover(&[dir.path().to_path_buf(), dir.path().to_path_buf()], true);
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_repeated_file_is_listed_once() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("b.pdf");
        touch(&file);
        let dotted = dir.path().join(".").join("b.pdf");

        let files = discover(&[file.clone(), dotted, file.clone()], true);
        assert_eq!(files, vec![file]);
    }

    #[test]
    fn test_file_and_its_directory_list_the_file_once() {
        let dir = TempDir::new().unwrap();
        let b = dir.path().join("b.pdf");
        touch(&dir.path().join("a.pdf"));
        touch(&b);

        let files = discover(&[b.clone(), dir.path().to_path_buf()], true);
        assert_eq!(files, vec![b, dir.path().join("a.pdf")]);
    }

    #[test]
    fn test_repeated_missing_input_is_listed_once() {
        let missing = PathBuf::from("/no/such/input.pdf");
        assert_eq!(discover(&[missing.clone(), missing.clone()], true), vec![missing]);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_cycle_terminates() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("sub").join("a.pdf"));
        std::os::unix::fs::symlink(dir.path(), dir.path().join("sub").join("loop")).unwrap();

        let files = discover(&[dir.path().to_path_buf()], true);
        assert_eq!(files, vec![dir.path().join("sub").join("a.pdf")]);
    }
}
