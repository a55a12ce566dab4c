use std::{
    fs,
    path::{Path, PathBuf},
};

/// `.iso` files directly inside `dir`, sorted by name.
///
/// An unreadable directory is treated like an empty one.
pub fn scan(dir: &Path) -> Vec<String> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("iso library {} not readable: {e}", dir.display());
            return vec![];
        }
    };

    let mut isos: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| !t.is_dir()).unwrap_or(false))
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|name| name.to_lowercase().ends_with(".iso"))
        .collect();
    isos.sort();
    isos
}

/// Full path of a library entry as stored in a profile.
pub fn entry_path(dir: &Path, file: &str) -> PathBuf {
    dir.join(file)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn lists_iso_files_case_insensitively() {
        let dir = TempDir::new().unwrap();
        for f in ["b.iso", "A.ISO", "notes.txt", "disk.qcow2"] {
            fs::write(dir.path().join(f), "").unwrap();
        }
        fs::create_dir(dir.path().join("nested.iso")).unwrap();

        assert_eq!(scan(dir.path()), ["A.ISO", "b.iso"]);
    }

    #[test]
    fn missing_directory_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(scan(&dir.path().join("gone")).is_empty());
    }

    #[test]
    fn entry_path_joins() {
        assert_eq!(
            entry_path(Path::new("/srv/isos"), "a.iso"),
            PathBuf::from("/srv/isos/a.iso")
        );
    }
}
