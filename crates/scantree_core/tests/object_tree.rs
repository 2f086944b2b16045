use rusqlite::Connection;
use scantree_core::db::{open_db_in_memory, DbDriver, DbError};
use scantree_core::repo::tree_query::{
    application_resource_ids, count_rows, package_vulnerability_ids, resource_check_ids,
    resource_package_ids, row_exists,
};
use scantree_core::{
    Application, ApplicationType, CisCheckLevel, CisDockerBenchmarkCheck, NoopNotifier,
    ObjectTree, Package, PendingViewRefresh, Resource, ResourceType, SqliteObjectTree,
    TransactionParams, TreeError, TreeOperation, Vulnerability, VulnerabilitySeverity,
};
use std::collections::BTreeSet;

fn setup() -> Connection {
    open_db_in_memory().unwrap()
}

fn params() -> TransactionParams {
    TransactionParams::default()
        .with_actor("scanner")
        .with_request_id("req-1")
}

fn ids(values: &[&str]) -> BTreeSet<String> {
    values.iter().map(|value| value.to_string()).collect()
}

fn vulnerability(id: &str) -> Vulnerability {
    Vulnerability::new(id, VulnerabilitySeverity::High)
}

fn image(name: &str, packages: Vec<Package>) -> Resource {
    Resource::new(name, format!("sha256:{name}"), ResourceType::Image).with_packages(packages)
}

fn check(id: &str) -> CisDockerBenchmarkCheck {
    CisDockerBenchmarkCheck::new(id, "CIS-DI-0001", CisCheckLevel::Warn)
}

fn web_app(resources: Vec<Resource>) -> Application {
    Application::new("web", ApplicationType::Pod).with_resources(resources)
}

#[test]
fn set_application_links_exactly_the_submitted_resources() {
    let conn = setup();
    let tree = SqliteObjectTree::try_new(&conn, DbDriver::Local, NoopNotifier).unwrap();

    let mut first = web_app(vec![image("a", vec![]), image("b", vec![])]);
    tree.set_application(&mut first, &params(), true).unwrap();

    let mut second = web_app(vec![image("b", vec![]), image("c", vec![])]);
    tree.set_application(&mut second, &params(), true).unwrap();

    let expected: BTreeSet<String> = second
        .resources
        .iter()
        .map(|resource| resource.id.clone())
        .collect();
    assert_eq!(application_resource_ids(&conn, &second.id).unwrap(), expected);
    assert!(row_exists(&conn, "resources", &Resource::derive_id("sha256:a")).unwrap());
}

#[test]
fn applying_the_same_tree_twice_is_idempotent() {
    let conn = setup();
    let tree = SqliteObjectTree::try_new(&conn, DbDriver::Local, NoopNotifier).unwrap();
    let build = || {
        web_app(vec![image(
            "nginx",
            vec![Package::new("openssl", "3.0.8")
                .with_vulnerabilities(vec![vulnerability("CVE-2023-0286")])],
        )
        .with_checks(vec![check("chk-1")])])
    };

    let mut first = build();
    tree.set_application(&mut first, &params(), true).unwrap();
    let mut second = build();
    tree.set_application(&mut second, &params(), true).unwrap();

    assert_eq!(count_rows(&conn, "applications").unwrap(), 1);
    assert_eq!(count_rows(&conn, "application_resources").unwrap(), 1);
    assert_eq!(count_rows(&conn, "resource_packages").unwrap(), 1);
    assert_eq!(count_rows(&conn, "package_vulnerabilities").unwrap(), 1);
    assert_eq!(count_rows(&conn, "cis_docker_benchmark_checks").unwrap(), 1);
}

#[test]
fn removed_resource_is_unlinked_but_kept() {
    let conn = setup();
    let tree = SqliteObjectTree::try_new(&conn, DbDriver::Local, NoopNotifier).unwrap();
    let resource_b = image("b", vec![]);
    let resource_b_id = resource_b.id.clone();

    let mut app = web_app(vec![image("a", vec![]), resource_b]);
    tree.set_application(&mut app, &params(), true).unwrap();

    let mut app = web_app(vec![image("a", vec![])]);
    tree.set_application(&mut app, &params(), true).unwrap();

    let linked = application_resource_ids(&conn, &app.id).unwrap();
    assert!(!linked.contains(&resource_b_id));
    assert_eq!(linked.len(), 1);
    assert!(row_exists(&conn, "resources", &resource_b_id).unwrap());
}

#[test]
fn skipping_vulnerabilities_keeps_existing_links() {
    let conn = setup();
    let tree = SqliteObjectTree::try_new(&conn, DbDriver::Local, NoopNotifier).unwrap();
    let package_id = Package::derive_id("openssl", "3.0.8");

    let mut resource = image(
        "nginx",
        vec![Package::new("openssl", "3.0.8").with_vulnerabilities(vec![vulnerability("V1")])],
    );
    tree.set_resource(&mut resource, &params(), true).unwrap();
    assert_eq!(package_vulnerability_ids(&conn, &package_id).unwrap(), ids(&["V1"]));

    let mut resource = image("nginx", vec![Package::new("openssl", "3.0.8")]);
    tree.set_resource(&mut resource, &params(), false).unwrap();
    assert_eq!(package_vulnerability_ids(&conn, &package_id).unwrap(), ids(&["V1"]));

    let mut resource = image("nginx", vec![Package::new("openssl", "3.0.8")]);
    tree.set_resource(&mut resource, &params(), true).unwrap();
    assert!(package_vulnerability_ids(&conn, &package_id)
        .unwrap()
        .is_empty());
    assert!(row_exists(&conn, "vulnerabilities", "V1").unwrap());
}

#[test]
fn omitted_check_is_deleted_with_its_link() {
    let conn = setup();
    let tree = SqliteObjectTree::try_new(&conn, DbDriver::Local, NoopNotifier).unwrap();

    let mut resource = image("nginx", vec![]).with_checks(vec![check("chk-1"), check("chk-2")]);
    tree.set_resource(&mut resource, &params(), true).unwrap();
    assert_eq!(
        resource_check_ids(&conn, &resource.id).unwrap(),
        ids(&["chk-1", "chk-2"])
    );

    let mut resource = image("nginx", vec![]).with_checks(vec![check("chk-1")]);
    tree.set_resource(&mut resource, &params(), true).unwrap();

    assert_eq!(resource_check_ids(&conn, &resource.id).unwrap(), ids(&["chk-1"]));
    assert!(!row_exists(&conn, "cis_docker_benchmark_checks", "chk-2").unwrap());
}

#[test]
fn removed_package_stays_shared_with_other_resources() {
    let conn = setup();
    let tree = SqliteObjectTree::try_new(&conn, DbDriver::Local, NoopNotifier).unwrap();
    let package_id = Package::derive_id("zlib", "1.3");

    let mut nginx = image("nginx", vec![Package::new("zlib", "1.3")]);
    tree.set_resource(&mut nginx, &params(), true).unwrap();
    let mut redis = image("redis", vec![Package::new("zlib", "1.3")]);
    tree.set_resource(&mut redis, &params(), true).unwrap();

    let mut nginx = image("nginx", vec![]);
    tree.set_resource(&mut nginx, &params(), true).unwrap();

    assert!(resource_package_ids(&conn, &nginx.id).unwrap().is_empty());
    assert_eq!(
        resource_package_ids(&conn, &redis.id).unwrap(),
        ids(&[package_id.as_str()])
    );
    assert_eq!(count_rows(&conn, "packages").unwrap(), 1);
}

#[test]
fn nested_collections_are_cleared_after_persisting() {
    let conn = setup();
    let tree = SqliteObjectTree::try_new(&conn, DbDriver::Local, NoopNotifier).unwrap();

    let mut app = web_app(vec![image(
        "nginx",
        vec![Package::new("openssl", "3.0.8").with_vulnerabilities(vec![vulnerability("V1")])],
    )
    .with_checks(vec![check("chk-1")])]);
    tree.set_application(&mut app, &params(), true).unwrap();

    assert_eq!(app.resources.len(), 1);
    assert!(app.resources[0].packages.is_empty());
    assert!(app.resources[0].cis_docker_benchmark_checks.is_empty());

    let mut resource = image(
        "redis",
        vec![Package::new("openssl", "3.0.8").with_vulnerabilities(vec![vulnerability("V1")])],
    );
    tree.set_resource(&mut resource, &params(), true).unwrap();
    assert_eq!(resource.packages.len(), 1);
    assert!(resource.packages[0].vulnerabilities.is_empty());
}

#[test]
fn failing_check_rolls_back_the_whole_tree_without_signals() {
    let conn = setup();
    let pending = PendingViewRefresh::new();
    let tree = SqliteObjectTree::try_new(&conn, DbDriver::Local, &pending).unwrap();

    let mut resource = image(
        "nginx",
        vec![Package::new("openssl", "3.0.8").with_vulnerabilities(vec![vulnerability("V1")])],
    )
    .with_checks(vec![check("")]);
    let err = tree.set_resource(&mut resource, &params(), true).unwrap_err();

    assert_eq!(err.operation(), Some(TreeOperation::UpdateResource));
    assert!(err.is_constraint_violation());
    assert!(matches!(err.root_cause(), TreeError::Replace(_)));

    for table in [
        "resources",
        "packages",
        "vulnerabilities",
        "resource_packages",
        "package_vulnerabilities",
        "cis_docker_benchmark_checks",
    ] {
        assert_eq!(count_rows(&conn, table).unwrap(), 0, "{table} is not empty");
    }
    assert!(pending.drain().is_empty());
}

#[test]
fn failure_message_names_every_level() {
    let conn = setup();
    let tree = SqliteObjectTree::try_new(&conn, DbDriver::Local, NoopNotifier).unwrap();

    let mut app = web_app(vec![image("nginx", vec![]).with_checks(vec![check("")])]);
    let err = tree.set_application(&mut app, &params(), true).unwrap_err();

    let message = err.to_string();
    assert!(
        message.starts_with(
            "failed to update application: failed to update resource: \
             failed to update resource cis_docker_benchmark_checks association: \
             save child `` in resource_cis_docker_benchmark_checks: "
        ),
        "unexpected message: {message}"
    );
    assert!(!row_exists(&conn, "applications", &app.id).unwrap());
}

#[test]
fn changed_tables_are_signalled_per_level() {
    let conn = setup();
    let pending = PendingViewRefresh::new();
    let tree = SqliteObjectTree::try_new(&conn, DbDriver::Local, &pending).unwrap();

    let mut app = web_app(vec![image(
        "nginx",
        vec![Package::new("openssl", "3.0.8").with_vulnerabilities(vec![vulnerability("V1")])],
    )]);
    tree.set_application(&mut app, &params(), true).unwrap();
    assert_eq!(
        pending.drain(),
        vec![
            "applications",
            "cis_docker_benchmark_checks",
            "packages",
            "resources",
            "vulnerabilities",
        ]
    );

    let mut resource = image("nginx", vec![Package::new("openssl", "3.0.8")]);
    tree.set_resource(&mut resource, &params(), false).unwrap();
    assert_eq!(
        pending.drain(),
        vec!["cis_docker_benchmark_checks", "packages", "resources"]
    );
}

#[test]
fn postgres_lock_failure_aborts_the_package_level() {
    let conn = setup();
    let pending = PendingViewRefresh::new();
    let tree = SqliteObjectTree::try_new(&conn, DbDriver::Postgres, &pending).unwrap();

    let mut resource = image("nginx", vec![Package::new("openssl", "3.0.8")]);
    let err = tree.set_resource(&mut resource, &params(), true).unwrap_err();

    assert!(matches!(err.root_cause(), TreeError::Lock(_)));
    assert!(err
        .to_string()
        .starts_with("failed to update resource: failed to update package: failed to lock table `packages`"));
    assert_eq!(count_rows(&conn, "packages").unwrap(), 0);
    assert!(pending.drain().is_empty());
}

#[test]
fn unknown_driver_updates_without_locking() {
    let conn = setup();
    let driver = DbDriver::Other("mysql".to_string());
    let tree = SqliteObjectTree::try_new(&conn, driver, NoopNotifier).unwrap();

    let mut resource = image("nginx", vec![Package::new("openssl", "3.0.8")]);
    tree.set_resource(&mut resource, &params(), true).unwrap();

    assert_eq!(count_rows(&conn, "resource_packages").unwrap(), 1);
}

#[test]
fn try_new_rejects_unmigrated_connection() {
    let conn = Connection::open_in_memory().unwrap();
    let err = SqliteObjectTree::try_new(&conn, DbDriver::Local, NoopNotifier)
        .err()
        .unwrap();

    assert!(matches!(
        err,
        TreeError::Schema(DbError::SchemaNotReady { db_version: 0, .. })
    ));
    assert!(err.to_string().starts_with("object tree store is not ready"));
}

#[test]
fn try_new_rejects_store_missing_a_scan_table() {
    let conn = setup();
    conn.execute_batch("DROP TABLE resource_packages;").unwrap();

    let err = SqliteObjectTree::try_new(&conn, DbDriver::Local, NoopNotifier)
        .err()
        .unwrap();

    assert!(matches!(
        err,
        TreeError::Schema(DbError::MissingTable("resource_packages"))
    ));
}
