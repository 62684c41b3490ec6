use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use vulnprobe_core::{
    CancellationToken, FindingStore, JsonlStore, OracleKind, PayloadCorpus, RetryConfig, RetryStrategy,
    ScanConfig, ScanEngine, VulnerabilityClass,
};
use wiremock::{
    matchers::{method, path, query_param},
    Mock, MockServer, Request, Respond, ResponseTemplate,
};

fn corpus(class: VulnerabilityClass, lines: &[&str]) -> PayloadCorpus {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    for line in lines {
        writeln!(file, "{}", line).unwrap();
    }
    let mut corpus = PayloadCorpus::new();
    corpus.extend_from_file(class, file.path()).unwrap();
    corpus
}

fn wordlist(words: &[&str]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    for word in words {
        writeln!(file, "{}", word).unwrap();
    }
    file
}

async fn serve_page(server: &MockServer, html: &str) {
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(html))
        .mount(server)
        .await;
}

fn query(req: &Request, name: &str) -> String {
    req.url
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
        .unwrap_or_default()
}

fn form(req: &Request, name: &str) -> String {
    url::form_urlencoded::parse(&req.body)
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
        .unwrap_or_default()
}

/// Search page that echoes `q` unescaped.
struct EchoSearch;

impl Respond for EchoSearch {
    fn respond(&self, req: &Request) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_string(format!(
            "<html><body><h1>Results for {}</h1></body></html>",
            query(req, "q")
        ))
    }
}

/// Search page that echoes `q` HTML-escaped.
struct EscapedSearch;

impl Respond for EscapedSearch {
    fn respond(&self, req: &Request) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_string(format!(
            "<html><body><h1>Results for {}</h1></body></html>",
            html_escape::encode_text(&query(req, "q"))
        ))
    }
}

/// Login handler that leaks a MySQL error on a stray quote.
struct LeakyLogin;

impl Respond for LeakyLogin {
    fn respond(&self, req: &Request) -> ResponseTemplate {
        let body = String::from_utf8_lossy(&req.body);
        if body.contains("%27") {
            ResponseTemplate::new(500).set_body_string(
                "You have an error in your SQL syntax; check the manual that corresponds to your MySQL server version",
            )
        } else {
            ResponseTemplate::new(200).set_body_string("Invalid credentials")
        }
    }
}

/// Item page whose content depends on the WHERE clause evaluating true.
struct BlindItem;

impl Respond for BlindItem {
    fn respond(&self, req: &Request) -> ResponseTemplate {
        if query(req, "id").contains("'1'='2") {
            ResponseTemplate::new(200).set_body_string("No rows")
        } else {
            ResponseTemplate::new(200).set_body_string(
                "<html><body><h2>Blue widget</h2><p>Price: 19.99</p>\
                 <p>A sturdy widget for everyday use, available in three sizes.</p></body></html>",
            )
        }
    }
}

/// Item page that stalls when the id asks the database to sleep.
struct SleepyItem;

impl Respond for SleepyItem {
    fn respond(&self, req: &Request) -> ResponseTemplate {
        let template = ResponseTemplate::new(200).set_body_string("item");
        if query(req, "id").to_uppercase().contains("SLEEP") {
            template.set_delay(Duration::from_millis(1300))
        } else {
            template
        }
    }
}

/// Guestbook storing comments that the listing page serves back.
#[derive(Clone, Default)]
struct Guestbook {
    entries: Arc<Mutex<Vec<String>>>,
}

struct GuestbookPost(Guestbook);
struct GuestbookListing(Guestbook);

impl Respond for GuestbookPost {
    fn respond(&self, req: &Request) -> ResponseTemplate {
        self.0.entries.lock().unwrap().push(form(req, "comment"));
        ResponseTemplate::new(200).set_body_string("Thanks for signing!")
    }
}

impl Respond for GuestbookListing {
    fn respond(&self, _req: &Request) -> ResponseTemplate {
        let entries = self.0.entries.lock().unwrap();
        let items: String = entries.iter().map(|e| format!("<li>{}</li>", e)).collect();
        ResponseTemplate::new(200).set_body_string(format!("<ul>{}</ul>", items))
    }
}

async fn run(engine: &ScanEngine, server: &MockServer, class: VulnerabilityClass) -> vulnprobe_core::EngineReport {
    engine
        .run(&format!("{}/", server.uri()), None, &[class], CancellationToken::new())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_reflected_xss_in_get_form() {
    let server = MockServer::start().await;
    serve_page(
        &server,
        r#"<html><body><form action="/search" method="get"><input name="q"><input type="submit" value="Go"></form></body></html>"#,
    )
    .await;
    Mock::given(method("GET")).and(path("/search")).respond_with(EchoSearch).mount(&server).await;

    let engine = ScanEngine::new(ScanConfig::default())
        .unwrap()
        .with_corpus(corpus(VulnerabilityClass::Xss, &["<script>alert(1)</script>", "<svg/onload=alert(1)>"]));
    let report = run(&engine, &server, VulnerabilityClass::Xss).await;

    let result = report.result_for(VulnerabilityClass::Xss).unwrap();
    assert_eq!(result.surfaces_tested, 1);
    // Stops at the first confirmed payload.
    assert_eq!(result.payloads_tested, 1);
    assert_eq!(result.findings.len(), 1);

    let finding = &result.findings[0];
    assert_eq!(finding.parameter, "q");
    assert_eq!(finding.verdict.oracle, OracleKind::Reflect);
    assert!(finding.verdict.evidence.contains("<script>alert(1)</script>"));
    assert_eq!(finding.surface.endpoint.path(), "/search");
    assert!(!report.cancelled);
}

#[tokio::test]
async fn test_escaped_output_is_not_reported() {
    let server = MockServer::start().await;
    serve_page(&server, r#"<form action="/search"><input name="q"></form>"#).await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(EscapedSearch)
        .mount(&server)
        .await;

    let engine = ScanEngine::new(ScanConfig::default())
        .unwrap()
        .with_corpus(corpus(VulnerabilityClass::Xss, &["<script>alert(1)</script>", "<img src=x onerror=alert(1)>"]));
    let report = run(&engine, &server, VulnerabilityClass::Xss).await;

    let result = &report.results[0];
    assert_eq!(result.surfaces_tested, 1);
    assert_eq!(result.payloads_tested, 2);
    assert!(result.findings.is_empty());
}

#[tokio::test]
async fn test_error_based_sqli_in_post_form() {
    let server = MockServer::start().await;
    serve_page(
        &server,
        r#"<form action="/login" method="post">
             <input type="text" name="username">
             <input type="password" name="password">
             <input type="submit" value="Login">
           </form>"#,
    )
    .await;
    Mock::given(method("POST")).and(path("/login")).respond_with(LeakyLogin).mount(&server).await;

    let engine = ScanEngine::new(ScanConfig::default())
        .unwrap()
        .with_corpus(corpus(VulnerabilityClass::SqlInjection, &["' OR '1'='1"]));
    let report = run(&engine, &server, VulnerabilityClass::SqlInjection).await;

    let result = &report.results[0];
    assert_eq!(result.surfaces_tested, 1);
    assert_eq!(result.payloads_tested, 2);
    assert_eq!(result.findings.len(), 2);
    let mut params: Vec<&str> = result.findings.iter().map(|f| f.parameter.as_str()).collect();
    params.sort();
    assert_eq!(params, vec!["password", "username"]);
    for finding in &result.findings {
        assert_eq!(finding.verdict.oracle, OracleKind::Error);
        assert!(finding.verdict.evidence.to_lowercase().contains("sql syntax"));
    }
}

#[tokio::test]
async fn test_boolean_differential_sqli_on_query_link() {
    let server = MockServer::start().await;
    serve_page(&server, r#"<a href="/item?id=1">Blue widget</a>"#).await;
    Mock::given(method("GET")).and(path("/item")).respond_with(BlindItem).mount(&server).await;

    let engine = ScanEngine::new(ScanConfig::default())
        .unwrap()
        .with_corpus(corpus(VulnerabilityClass::SqlInjection, &["1"]));
    let report = run(&engine, &server, VulnerabilityClass::SqlInjection).await;

    let result = &report.results[0];
    assert_eq!(result.findings.len(), 1);
    let finding = &result.findings[0];
    assert_eq!(finding.parameter, "id");
    assert_eq!(finding.verdict.oracle, OracleKind::Differential);
    assert!(finding.verdict.evidence.contains("similarity"));
    // Primary request plus the true/false pair.
    assert_eq!(report.counters.requests_sent, 1 + 3);
}

#[tokio::test]
async fn test_time_based_sqli() {
    let server = MockServer::start().await;
    serve_page(&server, r#"<a href="/item?id=1">item</a>"#).await;
    Mock::given(method("GET")).and(path("/item")).respond_with(SleepyItem).mount(&server).await;

    let config = ScanConfig { timing_threshold: 1, ..ScanConfig::default() };
    let engine = ScanEngine::new(config)
        .unwrap()
        .with_corpus(corpus(VulnerabilityClass::SqlInjection, &["1' AND SLEEP(5)-- -"]));
    let report = run(&engine, &server, VulnerabilityClass::SqlInjection).await;

    let result = &report.results[0];
    assert_eq!(result.findings.len(), 1);
    assert_eq!(result.findings[0].verdict.oracle, OracleKind::Timing);
    assert!(result.findings[0].verdict.evidence.starts_with("Request took"));
}

#[tokio::test]
async fn test_lfi_on_relative_link() {
    let server = MockServer::start().await;
    serve_page(&server, r#"<nav><a href="page.php?file=about">About</a></nav>"#).await;
    Mock::given(method("GET"))
        .and(path("/page.php"))
        .and(query_param("file", "../../../etc/passwd"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "root:x:0:0:root:/root:/bin/bash\ndaemon:x:1:1:daemon:/usr/sbin:/usr/sbin/nologin\n",
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/page.php"))
        .respond_with(ResponseTemplate::new(200).set_body_string("About us"))
        .with_priority(10)
        .mount(&server)
        .await;

    let engine = ScanEngine::new(ScanConfig::default()).unwrap();
    let report = run(&engine, &server, VulnerabilityClass::Lfi).await;

    let result = &report.results[0];
    assert_eq!(result.findings.len(), 1);
    let finding = &result.findings[0];
    assert_eq!(finding.parameter, "file");
    assert_eq!(finding.payload.value, "../../../etc/passwd");
    assert!(finding.verdict.evidence.contains("root:"));
}

#[tokio::test]
async fn test_stored_xss_via_listing_page() {
    let server = MockServer::start().await;
    serve_page(
        &server,
        r#"<form action="/guestbook" method="post"><textarea name="comment"></textarea></form>"#,
    )
    .await;
    let book = Guestbook::default();
    Mock::given(method("POST"))
        .and(path("/guestbook"))
        .respond_with(GuestbookPost(book.clone()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/entries"))
        .respond_with(GuestbookListing(book.clone()))
        .mount(&server)
        .await;

    let config = ScanConfig {
        stored_xss_listing: Some(format!("{}/entries", server.uri())),
        ..ScanConfig::default()
    };
    let engine = ScanEngine::new(config)
        .unwrap()
        .with_corpus(corpus(VulnerabilityClass::Xss, &["<script>alert(1)</script>"]));
    let report = run(&engine, &server, VulnerabilityClass::Xss).await;

    let result = &report.results[0];
    assert_eq!(result.findings.len(), 1);
    assert_eq!(result.findings[0].parameter, "comment");
    assert!(result.findings[0].verdict.evidence.starts_with("stored"));
}

#[tokio::test]
async fn test_directory_bruteforce_reports_existing_paths() {
    let server = MockServer::start().await;
    serve_page(&server, "<html></html>").await;
    Mock::given(method("GET"))
        .and(path("/admin"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Admin panel"))
        .mount(&server)
        .await;

    let words = wordlist(&["admin", "backup"]);
    let config = ScanConfig {
        wordlist: Some(words.path().to_string_lossy().into_owned()),
        ..ScanConfig::default()
    };
    let engine = ScanEngine::new(config).unwrap();
    let report = run(&engine, &server, VulnerabilityClass::DirectoryBruteforce).await;

    let result = &report.results[0];
    let paths = result.paths.as_ref().unwrap();
    assert_eq!(paths.directories_found, vec!["admin".to_string()]);
    assert!(paths.files_found.is_empty());
    assert_eq!(paths.total_requests, 2);
    assert_eq!(result.payloads_tested, 2);
    assert_eq!(result.findings.len(), 1);
    assert_eq!(result.findings[0].parameter, "path");
    assert_eq!(result.findings[0].payload.value, "admin");
    assert_eq!(result.findings[0].verdict.oracle, OracleKind::Exists);
}

#[tokio::test]
async fn test_recursive_bruteforce_descends_into_found_directories() {
    let server = MockServer::start().await;
    serve_page(&server, "<html></html>").await;
    for found in ["/admin", "/admin/config.php"] {
        Mock::given(method("GET"))
            .and(path(found))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;
    }

    let words = wordlist(&["admin", "config.php"]);
    let config = ScanConfig {
        wordlist: Some(words.path().to_string_lossy().into_owned()),
        recursive: true,
        max_depth: 1,
        ..ScanConfig::default()
    };
    let engine = ScanEngine::new(config).unwrap();
    let report = run(&engine, &server, VulnerabilityClass::DirectoryBruteforce).await;

    let paths = report.results[0].paths.as_ref().unwrap();
    assert_eq!(paths.directories_found, vec!["admin".to_string()]);
    assert_eq!(paths.files_found, vec!["admin/config.php".to_string()]);
    assert_eq!(paths.total_requests, 4);
}

#[tokio::test]
async fn test_extension_bruteforce_finds_backup_files() {
    let server = MockServer::start().await;
    serve_page(&server, "<html></html>").await;
    Mock::given(method("GET"))
        .and(path("/index.bak"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let words = wordlist(&["index"]);
    let config = ScanConfig {
        wordlist: Some(words.path().to_string_lossy().into_owned()),
        extension_bruteforce: true,
        extensions: vec!["php".into(), ".bak".into()],
        ..ScanConfig::default()
    };
    let engine = ScanEngine::new(config).unwrap();
    let report = run(&engine, &server, VulnerabilityClass::DirectoryBruteforce).await;

    let paths = report.results[0].paths.as_ref().unwrap();
    assert_eq!(paths.files_found, vec!["index.bak".to_string()]);
    assert_eq!(paths.total_requests, 3);
    assert_eq!(paths.hits[0].status_code, 403);
}

#[tokio::test]
async fn test_rate_limited_path_is_not_a_finding() {
    let server = MockServer::start().await;
    serve_page(&server, "<html></html>").await;
    Mock::given(method("GET"))
        .and(path("/admin"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let words = wordlist(&["admin"]);
    let config = ScanConfig {
        wordlist: Some(words.path().to_string_lossy().into_owned()),
        retry: RetryConfig { strategy: RetryStrategy::Fixed, max_retries: 1, delay_ms: 10 },
        ..ScanConfig::default()
    };
    let engine = ScanEngine::new(config).unwrap();
    let report = run(&engine, &server, VulnerabilityClass::DirectoryBruteforce).await;

    let result = &report.results[0];
    assert!(result.findings.is_empty());
    assert_eq!(result.rate_limited, 1);
    assert!(result.paths.as_ref().unwrap().directories_found.is_empty());
}

#[tokio::test]
async fn test_unreachable_target_is_a_discovery_error() {
    let config = ScanConfig { timeout: 2, ..ScanConfig::default() };
    let engine = ScanEngine::new(config).unwrap();
    let report = engine
        .run(
            "http://127.0.0.1:1/",
            None,
            &[VulnerabilityClass::Xss, VulnerabilityClass::DirectoryBruteforce],
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.results.len(), 2);
    for result in &report.results {
        assert!(result.discovery_error.is_some());
        assert_eq!(result.surfaces_tested, 0);
        assert!(result.findings.is_empty());
    }
}

#[tokio::test]
async fn test_cancellation_returns_partial_results() {
    let server = MockServer::start().await;
    serve_page(&server, r#"<form action="/slow"><input name="q"></form>"#).await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_body_string("nothing").set_delay(Duration::from_millis(200)))
        .mount(&server)
        .await;

    let config = ScanConfig { threads: 1, ..ScanConfig::default() };
    let engine = ScanEngine::new(config).unwrap();
    let total = engine.corpus().for_class(VulnerabilityClass::Xss).len();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let report = engine
        .run(&format!("{}/", server.uri()), None, &[VulnerabilityClass::Xss], cancel)
        .await
        .unwrap();

    assert!(report.cancelled);
    assert!(report.results[0].cancelled);
    assert!(report.results[0].payloads_tested < total);
}

#[tokio::test]
async fn test_cancelled_run_does_not_fetch_the_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"<form><input name="q"></form>"#))
        .expect(0)
        .mount(&server)
        .await;

    let engine = ScanEngine::new(ScanConfig::default()).unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = engine
        .run(
            &format!("{}/", server.uri()),
            None,
            &[VulnerabilityClass::Xss, VulnerabilityClass::SqlInjection],
            cancel,
        )
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.results.len(), 2);
    for result in &report.results {
        assert!(result.cancelled);
        assert!(result.discovery_error.is_none());
        assert_eq!(result.surfaces_tested, 0);
    }
    assert_eq!(report.counters.requests_sent, 0);
    server.verify().await;
}

#[tokio::test]
async fn test_results_are_persisted_through_store() {
    let server = MockServer::start().await;
    serve_page(&server, r#"<form action="/search"><input name="q"></form>"#).await;
    Mock::given(method("GET")).and(path("/search")).respond_with(EchoSearch).mount(&server).await;

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("scan.jsonl");
    let store: Arc<dyn FindingStore> = Arc::new(JsonlStore::new(&out));
    let engine = ScanEngine::new(ScanConfig::default())
        .unwrap()
        .with_corpus(corpus(VulnerabilityClass::Xss, &["<script>alert(1)</script>"]))
        .with_store(store);
    let report = run(&engine, &server, VulnerabilityClass::Xss).await;

    let text = std::fs::read_to_string(&out).unwrap();
    let records: Vec<serde_json::Value> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["record"], "finding");
    assert_eq!(records[0]["scanId"], report.scan_id.as_str());
    assert_eq!(records[1]["record"], "surfaceResult");
    assert_eq!(records[1]["result"]["surfacesTested"], 1);
}
