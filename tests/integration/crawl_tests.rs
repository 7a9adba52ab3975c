//! Integration tests for the crawler
//!
//! These tests use wiremock to create mock HTTP servers and test
//! the full crawl cycle end-to-end.

use ripple_crawl::crawler::FailureKind;
use ripple_crawl::frontier::SkipReason;
use ripple_crawl::storage::{open_storage, FrontierStore, MemorySink, RunStatus};
use ripple_crawl::{CrawlConfig, CrawlController, CrawlOutcome, CrawlPhase, CrawlReport, CrawlResult};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Creates a fast test configuration seeded with the server root
fn create_test_config(server: &MockServer) -> CrawlConfig {
    let mut config = CrawlConfig::new([format!("{}/", server.uri())]);
    config.politeness_delay = Duration::from_millis(10);
    config.thread_pool_size = 4;
    config.request_timeout = Duration::from_secs(2);
    config.robots_agent = "TestBot".to_string();
    config.retry.min_redelay = Duration::from_millis(20);
    config
}

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.to_string(), "text/html")
}

fn all_results(report: &CrawlReport) -> Vec<&CrawlResult> {
    report.workers.iter().flat_map(|w| &w.results).collect()
}

fn result_for<'a>(report: &'a CrawlReport, url_path: &str) -> Option<&'a CrawlResult> {
    all_results(report)
        .into_iter()
        .find(|r| r.task.url.path() == url_path)
}

/// Mounts the four-page site: `/` links to `/a`, `/b` and `/private/c`,
/// and robots.txt disallows `/private/`
async fn mount_scenario_site(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private/\n"),
        )
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(
            r#"<html><body>
            <a href="/a">A</a>
            <a href="/b">B</a>
            <a href="/private/c">C</a>
            </body></html>"#,
        ))
        .mount(server)
        .await;

    for p in ["/a", "/b", "/private/c"] {
        Mock::given(method("GET"))
            .and(path(p))
            .respond_with(html("<html><body><a href=\"/\">home</a></body></html>"))
            .mount(server)
            .await;
    }
}

async fn requested_paths(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|r| r.url.path().to_string())
        .collect()
}

#[tokio::test]
async fn test_scenario_crawl_with_robots_exclusion() {
    let server = MockServer::start().await;
    mount_scenario_site(&server).await;

    let controller = CrawlController::new(create_test_config(&server)).unwrap();
    let report = controller.run().await.unwrap();

    assert_eq!(report.phase, CrawlPhase::Finished);
    assert!(report.is_complete());

    let results = all_results(&report);
    assert_eq!(results.len(), 4);

    let successes = results
        .iter()
        .filter(|r| matches!(r.outcome, CrawlOutcome::Success { status_code: 200, .. }))
        .count();
    assert_eq!(successes, 3);

    let skipped = result_for(&report, "/private/c").unwrap();
    assert_eq!(
        skipped.outcome,
        CrawlOutcome::Skipped {
            reason: SkipReason::RobotsDisallowed
        }
    );

    assert_eq!(report.frontier.visited, 3);
    assert_eq!(report.frontier.excluded, 1);
    assert_eq!(report.summary.robots_skips, 1);

    // The back-links to / are duplicates and never fetched twice
    let paths = requested_paths(&server).await;
    assert_eq!(paths.iter().filter(|p| *p == "/").count(), 1);
    assert_eq!(paths.iter().filter(|p| *p == "/robots.txt").count(), 1);
    assert!(!paths.iter().any(|p| p == "/private/c"));
}

#[tokio::test]
async fn test_depth_of_discovered_links() {
    let server = MockServer::start().await;
    mount_scenario_site(&server).await;

    let mut config = create_test_config(&server);
    config.max_depth = 0;

    let controller = CrawlController::new(config).unwrap();
    let report = controller.run().await.unwrap();

    // Depth 1 links exceed max_depth 0 and are never admitted
    assert_eq!(all_results(&report).len(), 1);
    let root = result_for(&report, "/").unwrap();
    assert_eq!(root.task.depth, 0);
    match &root.outcome {
        CrawlOutcome::Success {
            extracted_links,
            accepted_links,
            ..
        } => {
            assert_eq!(extracted_links.len(), 3);
            assert_eq!(*accepted_links, 0);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[tokio::test]
async fn test_page_budget_bounds_the_run() {
    let server = MockServer::start().await;
    mount_scenario_site(&server).await;

    let mut config = create_test_config(&server);
    config.max_pages_to_fetch = 2;

    let controller = CrawlController::new(config).unwrap();
    let report = controller.run().await.unwrap();

    assert_eq!(all_results(&report).len(), 2);
    assert_eq!(report.frontier.visited + report.frontier.excluded, 2);
}

#[tokio::test]
async fn test_resumed_run_fetches_nothing_again() {
    let server = MockServer::start().await;
    mount_scenario_site(&server).await;
    let dir = TempDir::new().unwrap();

    let mut config = create_test_config(&server);
    config.resumable = true;
    config.storage_folder = dir.path().join("state");

    let first = CrawlController::new(config.clone()).unwrap();
    let report = first.run().await.unwrap();
    assert!(report.is_complete());
    let requests_after_first = requested_paths(&server).await.len();

    let storage = open_storage(&config.storage_folder).unwrap();
    let stats = storage.run_stats(&config.run_key()).unwrap().unwrap();
    assert_eq!(stats.status, RunStatus::Completed);
    assert_eq!(stats.visited, 3);
    assert_eq!(stats.excluded, 1);
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.results, 4);

    let second = CrawlController::new(config.clone()).unwrap();
    assert_eq!(second.frontier().counts().visited, 3);
    assert_eq!(second.seed().unwrap(), 0);
    second.start().unwrap();
    let report = second.wait_until_finish().await.unwrap();

    assert_eq!(report.phase, CrawlPhase::Finished);
    assert!(all_results(&report).is_empty());
    assert_eq!(requested_paths(&server).await.len(), requests_after_first);
    assert_eq!(
        storage.run_status(&config.run_key()).unwrap(),
        Some(RunStatus::Completed)
    );
}

#[tokio::test]
async fn test_interrupted_run_resumes_pending_work() {
    let server = MockServer::start().await;
    mount_scenario_site(&server).await;
    let dir = TempDir::new().unwrap();

    let mut config = create_test_config(&server);
    config.resumable = true;
    config.storage_folder = dir.path().to_path_buf();
    config.thread_pool_size = 1;
    config.politeness_delay = Duration::from_millis(150);

    let first = CrawlController::new(config.clone()).unwrap();
    first.seed().unwrap();
    first.start().unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    first.stop();
    let report = first.wait_until_finish().await.unwrap();
    assert!(!report.is_complete());

    let storage = open_storage(&config.storage_folder).unwrap();
    assert_eq!(
        storage.run_status(&config.run_key()).unwrap(),
        Some(RunStatus::Interrupted)
    );

    let second = CrawlController::new(config.clone()).unwrap();
    assert_eq!(second.phase(), CrawlPhase::Seeded);
    let report = second.run().await.unwrap();
    assert!(report.is_complete());
    assert_eq!(report.frontier.visited, 3);
    assert_eq!(report.frontier.excluded, 1);

    let paths = requested_paths(&server).await;
    assert_eq!(paths.iter().filter(|p| *p == "/").count(), 1);
}

/// Records when each request arrived
#[derive(Clone, Default)]
struct ArrivalRecorder {
    arrivals: Arc<Mutex<Vec<Instant>>>,
}

impl Respond for ArrivalRecorder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        self.arrivals.lock().unwrap().push(Instant::now());
        match request.url.path() {
            "/robots.txt" => ResponseTemplate::new(404),
            "/" => html(r#"<a href="/1">1</a><a href="/2">2</a><a href="/3">3</a>"#),
            _ => html("<p>leaf</p>"),
        }
    }
}

#[tokio::test]
async fn test_politeness_spacing_per_host() {
    let server = MockServer::start().await;
    let recorder = ArrivalRecorder::default();
    Mock::given(method("GET"))
        .respond_with(recorder.clone())
        .mount(&server)
        .await;

    let delay = Duration::from_millis(150);
    let mut config = create_test_config(&server);
    config.politeness_delay = delay;
    config.thread_pool_size = 4;

    let controller = CrawlController::new(config).unwrap();
    let report = controller.run().await.unwrap();
    assert_eq!(all_results(&report).len(), 4);

    let arrivals = recorder.arrivals.lock().unwrap().clone();
    // robots.txt plus four pages
    assert_eq!(arrivals.len(), 5);
    for pair in arrivals.windows(2) {
        let gap = pair[1].duration_since(pair[0]);
        assert!(
            gap >= delay - Duration::from_millis(5),
            "requests only {:?} apart",
            gap
        );
    }
}

#[tokio::test]
async fn test_retryable_status_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html("<p>back</p>"))
        .mount(&server)
        .await;

    let controller = CrawlController::new(create_test_config(&server)).unwrap();
    let report = controller.run().await.unwrap();

    let results = all_results(&report);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].attempts, 2);
    assert_eq!(results[0].outcome.status_code(), Some(200));
    assert_eq!(report.summary.retried_tasks, 1);
}

#[tokio::test]
async fn test_failures_do_not_abort_the_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(r#"<a href="/slow">slow</a><a href="/gone">gone</a>"#))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(html("<p>late</p>").set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let mut config = create_test_config(&server);
    config.request_timeout = Duration::from_millis(100);
    config.retry.max_retries = 0;

    let sink = Arc::new(MemorySink::new());
    let controller = CrawlController::builder(config)
        .result_sink(sink.clone())
        .build()
        .unwrap();
    let report = controller.run().await.unwrap();

    assert_eq!(report.phase, CrawlPhase::Finished);
    assert_eq!(sink.len(), 3);

    let slow = result_for(&report, "/slow").unwrap();
    assert!(matches!(
        slow.outcome,
        CrawlOutcome::Failure {
            kind: FailureKind::Timeout,
            ..
        }
    ));
    let gone = result_for(&report, "/gone").unwrap();
    assert_eq!(gone.outcome.status_code(), Some(404));
    assert_eq!(report.summary.status_classes.get("4xx"), Some(&1));
}

#[tokio::test]
async fn test_stop_does_not_wait_out_politeness_delays() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(html("<p>leaf</p>"))
        .mount(&server)
        .await;

    let seeds: Vec<String> = (1..=4).map(|i| format!("{}/{}", server.uri(), i)).collect();
    let mut config = create_test_config(&server);
    config.seeds = seeds;
    config.politeness_delay = Duration::from_secs(2);
    config.thread_pool_size = 4;

    let controller = CrawlController::new(config).unwrap();
    controller.seed().unwrap();
    controller.start().unwrap();

    // One worker is pacing after robots.txt, the other three queue on the same host
    tokio::time::sleep(Duration::from_millis(300)).await;
    let stopped_at = Instant::now();
    controller.stop();
    let report = controller.wait_until_finish().await.unwrap();

    assert!(
        stopped_at.elapsed() < Duration::from_secs(1),
        "stop took {:?}",
        stopped_at.elapsed()
    );
    assert_eq!(report.phase, CrawlPhase::Finished);
    assert!(!report.is_complete());
    assert!(all_results(&report).is_empty());
    assert_eq!(report.frontier.pending, 4);
    assert_eq!(report.frontier.in_progress, 0);

    let paths = requested_paths(&server).await;
    assert_eq!(paths, vec!["/robots.txt".to_string()]);
}
