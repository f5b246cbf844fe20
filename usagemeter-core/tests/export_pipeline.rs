//! End-to-end export runs against a scripted database and admin API
//!
//! These tests drive `UsageExporter` through count, discovery, paging,
//! anonymization and output with in-memory collaborators.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::uninlined_format_args)]

use async_trait::async_trait;
use chrono::{Local, NaiveDateTime, TimeZone};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;
use usagemeter_core::admin::{AdminClient, AdminError};
use usagemeter_core::anonymize::salted_hash;
use usagemeter_core::config::DEFAULT_HASH_SALT;
use usagemeter_core::{
    Anonymizer, ExportConfig, LastLogin, MeteringError, QueryExecutor, UsageExporter,
    UsageRecord,
};

const USAGE_HEADER: &str = " name | lastlogin | webserviceuser | blocked | active | is_anonymous | usertype | email";
const USAGE_HEADER_WITHOUT_EMAIL: &str =
    " name | lastlogin | webserviceuser | blocked | active | is_anonymous | usertype";

/// Answers queries by their shape; page outputs are served in order.
struct ScriptedDatabase {
    user_count: u64,
    tables: Vec<&'static str>,
    columns: Vec<(&'static str, &'static str)>,
    pages: Mutex<Vec<String>>,
    fail_pages: bool,
    seen: Mutex<Vec<String>>,
}

impl ScriptedDatabase {
    fn new(user_count: u64) -> Self {
        Self {
            user_count,
            tables: vec!["System.User", "Administration.Account"],
            columns: vec![("administration$account", "emailaddress")],
            pages: Mutex::new(Vec::new()),
            fail_pages: false,
            seen: Mutex::new(Vec::new()),
        }
    }

    fn with_page(self, output: String) -> Self {
        self.pages.lock().unwrap().insert(0, output);
        self
    }

    fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }

    fn page_queries(&self) -> Vec<String> {
        self.seen()
            .into_iter()
            .filter(|q| q.contains("FROM system$user u"))
            .collect()
    }
}

fn footer(rows: usize) -> String {
    if rows == 1 {
        "(1 row)".to_string()
    } else {
        format!("({} rows)", rows)
    }
}

fn single_column(header: &str, values: &[String]) -> String {
    let mut out = format!(" {}\n----------\n", header);
    for value in values {
        out.push_str(&format!(" {}\n", value));
    }
    out.push_str(&footer(values.len()));
    out.push('\n');
    out
}

fn table_output(header: &str, lines: &[String]) -> String {
    let mut out = format!("{}\n-------+-------\n", header);
    for line in lines {
        out.push_str(line);
        out.push('\n');
    }
    out.push_str(&footer(lines.len()));
    out.push_str("\n\n");
    out
}

fn user_line(name: &str, lastlogin: &str, email: &str) -> String {
    format!(
        " {} | {} | t | f | t |  | Administrator | {}",
        name, lastlogin, email
    )
}

#[async_trait]
impl QueryExecutor for ScriptedDatabase {
    async fn run(&self, query: &str) -> usagemeter_core::Result<String> {
        self.seen.lock().unwrap().push(query.to_string());

        if query.contains("count(id)") {
            return Ok(single_column("count", &[self.user_count.to_string()]));
        }
        if query.contains("submetaobjectname") {
            let tables: Vec<String> = self.tables.iter().map(|t| t.to_string()).collect();
            return Ok(single_column("submetaobjectname", &tables));
        }
        if query.contains("information_schema.columns") {
            let lines: Vec<String> = self
                .columns
                .iter()
                .map(|(t, c)| format!(" {} | {}", t, c))
                .collect();
            return Ok(table_output(" table_name | column_name", &lines));
        }
        if self.fail_pages {
            return Err(MeteringError::client_exited(Some(1), "ERROR: canceled"));
        }
        self.pages
            .lock()
            .unwrap()
            .pop()
            .ok_or_else(|| MeteringError::client_exited(Some(1), "unexpected page query"))
    }
}

/// Admin API double counting its license lookups.
struct FakeAdmin {
    running: bool,
    calls: AtomicUsize,
}

impl FakeAdmin {
    fn running() -> Self {
        Self {
            running: true,
            calls: AtomicUsize::new(0),
        }
    }

    fn stopped() -> Self {
        Self {
            running: false,
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AdminClient for FakeAdmin {
    async fn license_id(&self) -> Result<String, AdminError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.running {
            Ok("license-42".to_string())
        } else {
            Err(AdminError::NotAvailable {
                endpoint: "http://127.0.0.1:9000/".to_string(),
                source: None,
            })
        }
    }
}

fn local_epoch(value: &str) -> i64 {
    let naive = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f").unwrap();
    Local
        .from_local_datetime(&naive)
        .earliest()
        .unwrap()
        .timestamp()
}

fn file_count(dir: &TempDir) -> usize {
    std::fs::read_dir(dir.path()).unwrap().count()
}

#[tokio::test]
async fn test_export_single_user_scenario() {
    let dir = TempDir::new().unwrap();
    let database = ScriptedDatabase::new(1).with_page(table_output(
        USAGE_HEADER,
        &[user_line(
            "alice",
            "2024-01-02 03:04:05.000000",
            "alice@example.com",
        )],
    ));
    let admin = FakeAdmin::running();
    let config = ExportConfig::new().with_output_dir(dir.path());
    let anonymizer = Anonymizer::default();

    let exporter = UsageExporter::new(&database, &admin, &config, &anonymizer).unwrap();
    let summary = exporter.export().await.unwrap();

    assert_eq!(summary.records, 1);
    assert_eq!(summary.pages, 1);
    let file_name = summary.path.file_name().unwrap().to_string_lossy().to_string();
    assert!(file_name.starts_with("usage_metrics_"));
    assert!(file_name.ends_with(".json"));

    let text = std::fs::read_to_string(&summary.path).unwrap();
    assert!(!text.contains("alice"));
    assert!(!text.contains("example.com"));

    let records: Vec<UsageRecord> = serde_json::from_str(&text).unwrap();
    let record = &records[0];
    assert_eq!(record.active, "true");
    assert_eq!(record.blocked, "false");
    assert_eq!(record.webserviceuser, "true");
    assert_eq!(record.is_anonymous, "");
    assert_eq!(record.usertype, "Administrator");
    assert_eq!(
        record.lastlogin,
        LastLogin::Epoch(local_epoch("2024-01-02 03:04:05"))
    );
    assert_eq!(record.name, salted_hash(&DEFAULT_HASH_SALT, "name"));
    assert_eq!(
        record.email_domain,
        salted_hash(&DEFAULT_HASH_SALT, "example.com")
    );
    assert_eq!(record.schema_version, "1.1");
    assert_eq!(record.server_id, "license-42");
    assert!(!record.created_at.is_empty());
    assert!(record.extra.is_empty());

    let page = &database.page_queries()[0];
    assert!(page.contains("CONCAT(mailfield_0.emailaddress) AS email"));
    assert!(page.contains("LEFT JOIN administration$account mailfield_0"));
    assert!(!page.contains("LIMIT"));
}

#[tokio::test]
async fn test_export_output_keys_are_sorted() {
    let dir = TempDir::new().unwrap();
    let database = ScriptedDatabase::new(1).with_page(table_output(
        USAGE_HEADER,
        &[user_line("bob", "", "")],
    ));
    let admin = FakeAdmin::running();
    let config = ExportConfig::new().with_output_dir(dir.path());
    let anonymizer = Anonymizer::default();

    let summary = UsageExporter::new(&database, &admin, &config, &anonymizer)
        .unwrap()
        .export()
        .await
        .unwrap();

    let text = std::fs::read_to_string(&summary.path).unwrap();
    let keys: Vec<&str> = text
        .lines()
        .filter_map(|line| line.trim().strip_prefix('"'))
        .filter_map(|line| line.split('"').next())
        .collect();
    let mut sorted = keys.clone();
    sorted.sort_unstable();
    assert_eq!(keys, sorted);
    assert!(text.contains("\n        \"lastlogin\": \"\","));
    assert!(text.contains("\"email_domain\": \"\""));
}

#[tokio::test]
async fn test_export_paginates_in_order() {
    let dir = TempDir::new().unwrap();
    let database = ScriptedDatabase::new(3)
        .with_page(table_output(
            USAGE_HEADER,
            &[
                user_line("u1", "", "one@first.example"),
                user_line("u2", "", ""),
            ],
        ))
        .with_page(table_output(
            USAGE_HEADER,
            &[user_line("u3", "", "three@third.example")],
        ));
    let admin = FakeAdmin::running();
    let config = ExportConfig::new()
        .with_output_dir(dir.path())
        .with_page_size(2);
    let anonymizer = Anonymizer::default();

    let exporter = UsageExporter::new(&database, &admin, &config, &anonymizer).unwrap();
    let collection = exporter.collect_records().await.unwrap();

    assert_eq!(collection.pages, 2);
    assert_eq!(collection.records.len(), 3);
    assert_eq!(
        collection.records[0].email_domain,
        salted_hash(&DEFAULT_HASH_SALT, "first.example")
    );
    assert_eq!(collection.records[1].email_domain, "");
    assert_eq!(
        collection.records[2].email_domain,
        salted_hash(&DEFAULT_HASH_SALT, "third.example")
    );

    // One license lookup per record.
    assert_eq!(admin.calls(), 3);

    let pages = database.page_queries();
    assert_eq!(pages.len(), 2);
    assert!(pages[0].ends_with("LIMIT 2 OFFSET 0"));
    assert!(pages[1].ends_with("LIMIT 2 OFFSET 2"));
}

#[tokio::test]
async fn test_export_zero_users_writes_empty_array() {
    let dir = TempDir::new().unwrap();
    let database = ScriptedDatabase::new(0);
    let admin = FakeAdmin::running();
    let config = ExportConfig::new().with_output_dir(dir.path());
    let anonymizer = Anonymizer::default();

    let summary = UsageExporter::new(&database, &admin, &config, &anonymizer)
        .unwrap()
        .export()
        .await
        .unwrap();

    assert_eq!(summary.records, 0);
    assert_eq!(summary.pages, 0);
    assert_eq!(std::fs::read_to_string(&summary.path).unwrap(), "[]");
    assert_eq!(database.seen().len(), 1);
    assert_eq!(admin.calls(), 0);
}

#[tokio::test]
async fn test_export_admin_unavailable_is_fatal() {
    let dir = TempDir::new().unwrap();
    let database = ScriptedDatabase::new(1).with_page(table_output(
        USAGE_HEADER,
        &[user_line("alice", "", "alice@example.com")],
    ));
    let admin = FakeAdmin::stopped();
    let config = ExportConfig::new().with_output_dir(dir.path());
    let anonymizer = Anonymizer::default();

    let result = UsageExporter::new(&database, &admin, &config, &anonymizer)
        .unwrap()
        .export()
        .await;

    let error = result.unwrap_err();
    assert!(matches!(error, MeteringError::ApplicationNotRunning { .. }));
    assert_eq!(error.to_string(), "The application process is not running");
    assert_eq!(file_count(&dir), 0);
}

#[tokio::test]
async fn test_export_failed_page_query_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let mut database = ScriptedDatabase::new(5);
    database.fail_pages = true;
    let admin = FakeAdmin::running();
    let config = ExportConfig::new().with_output_dir(dir.path());
    let anonymizer = Anonymizer::default();

    let result = UsageExporter::new(&database, &admin, &config, &anonymizer)
        .unwrap()
        .export()
        .await;

    assert!(matches!(result, Err(MeteringError::ExternalProcess { .. })));
    assert_eq!(file_count(&dir), 0);
}

#[tokio::test]
async fn test_export_bad_lastlogin_aborts_run() {
    let dir = TempDir::new().unwrap();
    let database = ScriptedDatabase::new(1).with_page(table_output(
        USAGE_HEADER,
        &[user_line("alice", "yesterday", "")],
    ));
    let admin = FakeAdmin::running();
    let config = ExportConfig::new().with_output_dir(dir.path());
    let anonymizer = Anonymizer::default();

    let result = UsageExporter::new(&database, &admin, &config, &anonymizer)
        .unwrap()
        .export()
        .await;

    assert!(matches!(result, Err(MeteringError::TimestampFormat { .. })));
    assert_eq!(file_count(&dir), 0);
}

#[tokio::test]
async fn test_export_without_email_columns_skips_rows() {
    let dir = TempDir::new().unwrap();
    let mut database = ScriptedDatabase::new(1).with_page(table_output(
        USAGE_HEADER_WITHOUT_EMAIL,
        &[" carol |  | f | f | t | f | Internal".to_string()],
    ));
    database.tables = vec!["System.User"];
    let admin = FakeAdmin::running();
    let config = ExportConfig::new().with_output_dir(dir.path());
    let anonymizer = Anonymizer::default();

    let collection = UsageExporter::new(&database, &admin, &config, &anonymizer)
        .unwrap()
        .collect_records()
        .await
        .unwrap();

    assert!(collection.records.is_empty());
    assert_eq!(collection.pages, 1);
    assert!(!database.seen().iter().any(|q| q.contains("information_schema")));
    assert!(!database.page_queries()[0].contains("email"));
}

#[tokio::test]
async fn test_export_non_numeric_count() {
    struct BrokenCount;

    #[async_trait]
    impl QueryExecutor for BrokenCount {
        async fn run(&self, _query: &str) -> usagemeter_core::Result<String> {
            Ok(" count\n-------\n(0 rows)\n".to_string())
        }
    }

    let dir = TempDir::new().unwrap();
    let admin = FakeAdmin::running();
    let config = ExportConfig::new().with_output_dir(dir.path());
    let anonymizer = Anonymizer::default();

    let result = UsageExporter::new(&BrokenCount, &admin, &config, &anonymizer)
        .unwrap()
        .export()
        .await;
    assert!(matches!(result, Err(MeteringError::UnexpectedOutput { .. })));
}
