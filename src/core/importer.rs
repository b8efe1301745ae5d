//! Resolution of user-supplied import paths.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Extensions picked up when importing a whole directory.
pub const IMPORTABLE_EXTENSIONS: [&str; 3] = ["ovpn", "conf", "wg"];

/// Target for an import operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportTarget {
    File(PathBuf),
    Directory(PathBuf),
}

/// Helper to expand paths with ~ to standard `PathBuf`
pub fn expand_home(path_str: &str) -> PathBuf {
    if let Some(stripped) = path_str.strip_prefix("~/") {
        if let Some(home) = crate::utils::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path_str)
}

/// Resolves the import target type from a path string
///
/// # Errors
///
/// Returns a message if the path does not exist or is neither a file nor a
/// directory.
pub fn resolve_target(input: &str) -> Result<ImportTarget, String> {
    let input = input.trim();
    let path = expand_home(input);

    if !path.exists() {
        return Err(format!("Path not found: {input}"));
    }

    if path.is_file() {
        Ok(ImportTarget::File(path))
    } else if path.is_dir() {
        Ok(ImportTarget::Directory(path))
    } else {
        Err("Invalid path type (not a file or directory)".to_string())
    }
}

/// Files in `dir` with an importable extension, sorted by name.
///
/// # Errors
///
/// Returns an error if the directory cannot be read.
pub fn importable_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| IMPORTABLE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        })
        .collect();
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_file_and_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("home.conf");
        fs::write(&file, "").unwrap();

        assert_eq!(
            resolve_target(file.to_str().unwrap()),
            Ok(ImportTarget::File(file.clone()))
        );
        assert_eq!(
            resolve_target(&format!("  {}  ", dir.path().display())),
            Ok(ImportTarget::Directory(dir.path().to_path_buf()))
        );
        assert!(resolve_target("/definitely/not/here.ovpn").is_err());
    }

    #[test]
    fn test_expand_home() {
        if let Some(home) = crate::utils::home_dir() {
            assert_eq!(expand_home("~/vpn/a.ovpn"), home.join("vpn/a.ovpn"));
        }
        assert_eq!(expand_home("/etc/a.ovpn"), PathBuf::from("/etc/a.ovpn"));
    }

    #[test]
    fn test_importable_files_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.ovpn", "a.conf", "c.WG", "notes.txt"] {
            fs::write(dir.path().join(name), "").unwrap();
        }
        fs::create_dir(dir.path().join("nested.conf")).unwrap();

        let names: Vec<String> = importable_files(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.conf", "b.ovpn", "c.WG"]);
    }
}
