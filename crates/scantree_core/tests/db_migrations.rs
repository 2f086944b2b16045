use rusqlite::Connection;
use scantree_core::db::migrations::latest_version;
use scantree_core::db::{open_db, open_db_in_memory, open_store, DbDriver, DbError, StoreConfig};

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    for table in [
        "applications",
        "resources",
        "packages",
        "vulnerabilities",
        "cis_docker_benchmark_checks",
        "application_resources",
        "resource_packages",
        "package_vulnerabilities",
        "quick_scan_config",
    ] {
        assert_table_exists(&conn, table);
    }
}

#[test]
fn opening_same_database_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scantree.db");

    let conn_first = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_first), latest_version());
    drop(conn_first);

    let conn_second = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    assert_table_exists(&conn_second, "packages");
}

#[test]
fn file_store_runs_in_wal_mode_with_foreign_keys() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig {
        driver: DbDriver::Postgres,
        busy_timeout_ms: 250,
        ..StoreConfig::file(dir.path().join("wal.db"))
    };

    let conn = open_store(&config).unwrap();
    let journal_mode: String = conn
        .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
        .unwrap();
    let foreign_keys: i64 = conn
        .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
        .unwrap();
    let busy_timeout: i64 = conn
        .query_row("PRAGMA busy_timeout;", [], |row| row.get(0))
        .unwrap();

    assert_eq!(journal_mode.to_ascii_lowercase(), "wal");
    assert_eq!(foreign_keys, 1);
    assert_eq!(busy_timeout, 250);
}

#[test]
fn deleting_a_resource_cascades_to_links_and_owned_checks() {
    let conn = open_db_in_memory().unwrap();
    conn.execute_batch(
        "INSERT INTO applications (id, name, app_type) VALUES ('app', 'web', 'pod');
         INSERT INTO resources (id, name, hash, resource_type) VALUES ('res', 'nginx', 'sha256:1', 'image');
         INSERT INTO packages (id, name, version) VALUES ('pkg', 'openssl', '3.0.8');
         INSERT INTO application_resources (application_id, resource_id) VALUES ('app', 'res');
         INSERT INTO resource_packages (resource_id, package_id) VALUES ('res', 'pkg');
         INSERT INTO cis_docker_benchmark_checks (id, resource_id, code, level)
            VALUES ('chk', 'res', 'CIS-DI-0001', 'warn');",
    )
    .unwrap();

    conn.execute("DELETE FROM resources WHERE id = 'res';", [])
        .unwrap();

    assert_eq!(count(&conn, "application_resources"), 0);
    assert_eq!(count(&conn, "resource_packages"), 0);
    assert_eq!(count(&conn, "cis_docker_benchmark_checks"), 0);
    assert_eq!(count(&conn, "packages"), 1);
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_db(&path).unwrap_err();
    match err {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table};"), [], |row| {
        row.get(0)
    })
    .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
