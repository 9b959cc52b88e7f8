use poststack_migrations::discover;
use std::fs;
use tempfile::tempdir;

fn write(dir: &std::path::Path, name: &str, contents: &str) {
    fs::write(dir.join(name), contents).unwrap();
}

#[test]
fn large_version_set_orders_numerically_not_lexicographically() {
    let dir = tempdir().unwrap();
    write(dir.path(), "2_second.sql", "SELECT 2;\n");
    write(dir.path(), "10_tenth.sql", "SELECT 10;\n");
    write(dir.path(), "1_first.sql", "SELECT 1;\n");

    let migrations = discover(dir.path()).unwrap();
    let versions: Vec<_> = migrations.iter().map(|m| m.version.as_str()).collect();
    assert_eq!(versions, vec!["1", "2", "10"]);
}

#[test]
fn rollback_without_forward_is_ignored() {
    let dir = tempdir().unwrap();
    write(dir.path(), "1_first.rollback.sql", "DROP TABLE x;\n");

    let migrations = discover(dir.path()).unwrap();
    assert!(migrations.is_empty());
}

#[test]
fn missing_rollback_file_is_a_warning_not_an_error() {
    let dir = tempdir().unwrap();
    write(dir.path(), "1_first.sql", "CREATE TABLE x;\n");

    let migrations = discover(dir.path()).unwrap();
    assert_eq!(migrations.len(), 1);
    assert!(migrations[0].rollback_sql.is_none());
    assert!(migrations[0].rollback_checksum.is_none());
}
