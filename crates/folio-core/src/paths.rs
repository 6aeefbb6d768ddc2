use crate::error::{FolioError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const FOLIO_DIR: &str = ".folio";
pub const CONFIG_FILE: &str = ".folio/config.yaml";
pub const DB_FILE: &str = ".folio/folio.db";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn folio_dir(root: &Path) -> PathBuf {
    root.join(FOLIO_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn db_path(root: &Path) -> PathBuf {
    root.join(DB_FILE)
}

// ---------------------------------------------------------------------------
// Id validation
// ---------------------------------------------------------------------------

static ID_RE: OnceLock<Regex> = OnceLock::new();

fn id_re() -> &'static Regex {
    // `prefix:local` or a bare local part; no whitespace, no leading punctuation.
    ID_RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._~\-]*(:[A-Za-z0-9._~\-/#]+)?$")
            .expect("static id pattern compiles")
    })
}

pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > 256 || !id_re().is_match(id) {
        return Err(FolioError::InvalidId(id.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_ids() {
        for id in ["action:1", "graph:abc-def", "stage:s1#review", "x", "user:ann.lee"] {
            validate_id(id).unwrap_or_else(|_| panic!("expected valid: {id}"));
        }
    }

    #[test]
    fn invalid_ids() {
        for id in ["", ":nope", "has space", "a:b c", "-dash"] {
            assert!(validate_id(id).is_err(), "expected invalid: {id}");
        }
    }

    #[test]
    fn path_helpers() {
        let root = Path::new("/tmp/press");
        assert_eq!(
            config_path(root),
            PathBuf::from("/tmp/press/.folio/config.yaml")
        );
        assert_eq!(db_path(root), PathBuf::from("/tmp/press/.folio/folio.db"));
    }
}
