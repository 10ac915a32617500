//! Stable artifact class names derived from script paths.
//!
//! Two different scripts must never share a class name even when their file
//! stems collide, so the name carries a short hash of the whole path next
//! to a readable stem.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

const HASH_CHARS: usize = 8;

/// The unit class name for a script path, e.g. `C_checkout_3fa9d21c`.
pub fn class_name_for(source_path: &Path) -> String {
    let stem = source_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(source_path.to_string_lossy().as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!(
        "C_{}_{}",
        sanitize_stem(&stem),
        &digest[..HASH_CHARS]
    )
}

/// Where the generated source for a class lands inside the work directory.
pub fn class_file_path(work_dir: &Path, class_name: &str) -> PathBuf {
    work_dir.join(format!("{}.rs", class_name))
}

fn sanitize_stem(stem: &str) -> String {
    let filtered: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if filtered.is_empty() {
        "script".to_string()
    } else if filtered.starts_with(|c: char| c.is_ascii_digit()) {
        format!("n{}", filtered)
    } else {
        filtered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_is_stable_and_path_sensitive() {
        let a = class_name_for(Path::new("/srv/app/checkout.brio"));
        let b = class_name_for(Path::new("/srv/app/checkout.brio"));
        let c = class_name_for(Path::new("/srv/other/checkout.brio"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("C_checkout_"));
    }

    #[test]
    fn test_awkward_stems_are_sanitized() {
        let name = class_name_for(Path::new("/srv/3rd-party.brio"));
        assert!(name.starts_with("C_n3rd_party_"), "{}", name);
    }

    #[test]
    fn test_class_file_path() {
        let path = class_file_path(Path::new("/tmp/work"), "C_a_12ab34cd");
        assert_eq!(path, PathBuf::from("/tmp/work/C_a_12ab34cd.rs"));
    }
}
