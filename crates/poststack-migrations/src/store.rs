//! Read-only view of the on-disk migration set.
//!
//! Discovery never touches the database; it only knows how to name, pair, and checksum
//! files. All ordering and lock state live in [`crate::tracker`].

use once_cell::sync::Lazy;
use poststack_core::{checksum, PoststackError, PoststackResult};
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

static FILENAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<version>\d+)_(?P<slug>[A-Za-z0-9_-]+)(?P<suffix>(\.rollback)?)\.sql$")
        .expect("static migration filename pattern is valid")
});

/// A discovered forward/rollback pair, immutable once returned by [`discover`].
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: String,
    pub description: String,
    pub forward_sql: String,
    pub rollback_sql: Option<String>,
    pub forward_checksum: String,
    pub rollback_checksum: Option<String>,
    pub forward_path: PathBuf,
    pub rollback_path: Option<PathBuf>,
}

fn slug_to_description(slug: &str) -> String {
    slug.replace(['_', '-'], " ")
}

struct RawFile {
    version: String,
    slug: String,
    is_rollback: bool,
    path: PathBuf,
}

fn parse_filename(path: &Path) -> Option<RawFile> {
    let name = path.file_name()?.to_str()?;
    let caps = FILENAME_PATTERN.captures(name)?;
    Some(RawFile {
        version: caps["version"].to_string(),
        slug: caps["slug"].to_string(),
        is_rollback: &caps["suffix"] == ".rollback",
        path: path.to_path_buf(),
    })
}

/// Scan `dir` for `NNN_slug.sql` / `NNN_slug.rollback.sql` files and return the
/// resulting [`Migration`]s ordered by the numeric value of `version`.
///
/// Duplicate versions (two files whose numeric version collides, including a
/// version appearing with two different slugs) are a fatal [`PoststackError::ConfigInvalid`].
pub fn discover(dir: &Path) -> PoststackResult<Vec<Migration>> {
    let mut forward: BTreeMap<String, RawFile> = BTreeMap::new();
    let mut rollback: BTreeMap<String, RawFile> = BTreeMap::new();

    let entries = fs::read_dir(dir).map_err(|e| PoststackError::ConfigInvalid {
        path: dir.display().to_string(),
        message: format!("cannot read migrations directory: {e}"),
    })?;

    for entry in entries {
        let entry = entry.map_err(|e| PoststackError::ConfigInvalid {
            path: dir.display().to_string(),
            message: format!("cannot read directory entry: {e}"),
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(raw) = parse_filename(&path) else {
            continue;
        };

        let table = if raw.is_rollback { &mut rollback } else { &mut forward };
        if let Some(existing) = table.get(&raw.version) {
            return Err(PoststackError::ConfigInvalid {
                path: dir.display().to_string(),
                message: format!(
                    "duplicate migration version {}: {} and {}",
                    raw.version,
                    existing.path.display(),
                    raw.path.display()
                ),
            });
        }
        table.insert(raw.version.clone(), raw);
    }

    let mut migrations = Vec::with_capacity(forward.len());
    for (version, raw) in forward {
        let forward_sql = read_sql(&raw.path)?;
        let forward_checksum = checksum(forward_sql.as_bytes());

        let rollback_entry = rollback.remove(&version);
        let (rollback_sql, rollback_checksum, rollback_path) = match rollback_entry {
            Some(rb) => {
                let sql = read_sql(&rb.path)?;
                let sum = checksum(sql.as_bytes());
                (Some(sql), Some(sum), Some(rb.path))
            }
            None => (None, None, None),
        };

        migrations.push(Migration {
            version: version.clone(),
            description: slug_to_description(&raw.slug),
            forward_sql,
            rollback_sql,
            forward_checksum,
            rollback_checksum,
            forward_path: raw.path,
            rollback_path,
        });
    }

    migrations.sort_by_key(|m| version_sort_key(&m.version));
    Ok(migrations)
}

fn read_sql(path: &Path) -> PoststackResult<String> {
    fs::read_to_string(path).map_err(|e| PoststackError::ConfigInvalid {
        path: path.display().to_string(),
        message: format!("cannot read migration file: {e}"),
    })
}

/// Sort key comparing versions by their numeric value rather than lexicographically.
pub fn version_sort_key(version: &str) -> u64 {
    version.parse().unwrap_or(u64::MAX)
}

static CREATE_TABLE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)create\s+table\s+(?:if\s+not\s+exists\s+)?"?(?P<name>[A-Za-z_][A-Za-z0-9_]*)"?"#)
        .expect("static create-table pattern is valid")
});

/// Best-effort extraction of the table names `forward_sql` would create, used by
/// diagnostics to cross-check a migration's file content against the observable
/// application schema. This is a heuristic over the literal `CREATE TABLE` statements
/// in the file, not a SQL parser: migrations that only alter or seed existing tables
/// yield an empty list, which diagnostics treats as "nothing to cross-check".
pub fn created_table_names(forward_sql: &str) -> Vec<String> {
    CREATE_TABLE_PATTERN
        .captures_iter(forward_sql)
        .map(|caps| caps["name"].to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_file(dir: &Path, name: &str, contents: &str) {
        let mut f = File::create(dir.join(name)).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    #[test]
    fn discovers_and_orders_by_numeric_version() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "010_add_index.sql", "CREATE INDEX;\n");
        write_file(dir.path(), "002_create_users.sql", "CREATE TABLE users;\n");
        write_file(dir.path(), "002_create_users.rollback.sql", "DROP TABLE users;\n");

        let migrations = discover(dir.path()).unwrap();
        assert_eq!(migrations.len(), 2);
        assert_eq!(migrations[0].version, "002");
        assert_eq!(migrations[0].description, "create users");
        assert!(migrations[0].rollback_sql.is_some());
        assert_eq!(migrations[1].version, "010");
        assert!(migrations[1].rollback_sql.is_none());
    }

    #[test]
    fn duplicate_version_is_fatal() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "001_create_users.sql", "CREATE TABLE users;\n");
        write_file(dir.path(), "001_create_accounts.sql", "CREATE TABLE accounts;\n");

        let err = discover(dir.path()).unwrap_err();
        assert!(matches!(err, PoststackError::ConfigInvalid { .. }));
    }

    #[test]
    fn checksum_ignores_trailing_newline_differences() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "001_create_users.sql", "CREATE TABLE users;");
        let a = discover(dir.path()).unwrap();

        write_file(dir.path(), "001_create_users.sql", "CREATE TABLE users;\n\n");
        let b = discover(dir.path()).unwrap();

        assert_eq!(a[0].forward_checksum, b[0].forward_checksum);
    }

    #[test]
    fn non_matching_files_are_ignored() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "README.md", "not a migration");
        write_file(dir.path(), "001_create_users.sql", "CREATE TABLE users;\n");

        let migrations = discover(dir.path()).unwrap();
        assert_eq!(migrations.len(), 1);
    }

    #[test]
    fn created_table_names_extracts_create_table_statements() {
        let names = created_table_names(
            "CREATE TABLE IF NOT EXISTS users (id INT);\nCREATE TABLE \"orders\" (id INT);",
        );
        assert_eq!(names, vec!["users".to_string(), "orders".to_string()]);
    }

    #[test]
    fn created_table_names_empty_for_non_ddl_migrations() {
        assert!(created_table_names("INSERT INTO users (id) VALUES (1);").is_empty());
    }
}
