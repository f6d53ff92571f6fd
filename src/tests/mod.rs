use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use crate::client::{Client, ClientOptions, ErrorKind};
use crate::identity::{default_user_agents, IdentityProvider};
use crate::runner::{ListSource, Options, Runner, RunnerError, ScanState};

fn client(options: ClientOptions) -> Client {
    let identity = IdentityProvider::new::<&str>(default_user_agents(), &[]).unwrap();
    Client::new(options, identity).unwrap()
}

fn codes(values: &[u16]) -> HashSet<u16> {
    values.iter().copied().collect()
}

fn words(values: &[&str]) -> ListSource {
    ListSource::Inline(values.iter().map(|s| s.to_string()).collect())
}

// binds a port and releases it so nothing is listening there
async fn closed_port_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{port}")
}

#[tokio::test]
async fn scan_reports_only_interesting_statuses() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/admin"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let base = server.uri();
    let runner = Runner::new(Options {
        url: format!("{base}/"),
        wordlist: words(&["[url]/admin", "[url]/login"]),
        status_codes: codes(&[200, 401]),
        ..Options::default()
    })
    .unwrap();

    let report = runner.run().await.unwrap();
    let login = format!("{base}/login");
    assert_eq!(report.state, ScanState::Completed);
    assert_eq!(runner.state(), ScanState::Completed);
    assert_eq!(report.candidates, 2);
    assert_eq!(report.found, vec![login.clone()]);
    assert_eq!(runner.found_urls().await, vec![login.clone()]);

    let urls: Vec<&str> = report.results.iter().map(|r| r.url.as_str()).collect();
    assert_eq!(urls, vec![format!("{base}/admin"), login.clone()]);
    assert_eq!(report.results[0].status, Some(404));
    assert!(!report.results[0].ok);
    assert_eq!(report.results[1].status, Some(401));
    assert!(report.results[1].ok);
    assert!(report.results[1].error.is_none());

    // unmatched wiremock paths answer 404, which is not interesting here
    let baseline = report.baseline.unwrap();
    assert_eq!(baseline.status, 404);
    assert!(!baseline.removed);
    assert_eq!(report.interesting, codes(&[200, 401]));
}

#[tokio::test]
async fn interesting_200_yields_ok_result() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let runner = Runner::new(Options {
        url: server.uri(),
        wordlist: words(&["[url]/robots.txt"]),
        calibrate: false,
        ..Options::default()
    })
    .unwrap();
    let report = runner.run().await.unwrap();
    let r = &report.results[0];
    assert!(r.ok);
    assert_eq!(r.status, Some(200));
    assert!(r.error.is_none());
    assert!(r.elapsed.is_some());
    assert!(report.baseline.is_none());
}

#[tokio::test]
async fn unreachable_host_yields_connection_error() {
    let base = closed_port_url().await;
    let runner = Runner::new(Options {
        url: base.clone(),
        wordlist: words(&["[url]/admin"]),
        retries: 0,
        ..Options::default()
    })
    .unwrap();

    let report = runner.run().await.unwrap();
    assert_eq!(report.state, ScanState::Completed);
    assert!(report.baseline.is_none());
    assert_eq!(report.results.len(), 1);
    let r = &report.results[0];
    assert!(!r.ok);
    assert!(r.status.is_none());
    assert_eq!(r.error, Some(ErrorKind::Connection));
    assert_eq!(r.error.unwrap().to_string(), "ConnectionError");
    assert_eq!(report.error_count(ErrorKind::Connection), 1);
    assert_eq!(report.total_errors(), 1);
    assert!(report.found.is_empty());
}

#[tokio::test]
async fn calibration_removes_majority_status() {
    let server = MockServer::start().await;
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    Mock::given(method("GET"))
        .respond_with(move |_req: &Request| {
            if counter.fetch_add(1, Ordering::SeqCst) < 4 {
                ResponseTemplate::new(200)
            } else {
                ResponseTemplate::new(500)
            }
        })
        .mount(&server)
        .await;

    let c = client(ClientOptions::default());
    let mut interesting = codes(&[200, 301, 302, 401, 403, 405]);
    let adj = crate::detector::calibrate(&c, &server.uri(), &mut interesting, &CancellationToken::new())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(hits.load(Ordering::SeqCst), 5);
    assert_eq!(adj.status, 200);
    assert!(adj.removed);
    assert_eq!(adj.samples, 5);
    assert_eq!(interesting.len(), 5);
    assert!(!interesting.contains(&200));
}

#[tokio::test]
async fn calibration_without_answers_leaves_codes_alone() {
    let base = closed_port_url().await;
    let c = client(ClientOptions {
        retries: 0,
        ..ClientOptions::default()
    });
    let mut interesting = codes(&[200, 401]);
    let adj = crate::detector::calibrate(&c, &base, &mut interesting, &CancellationToken::new())
        .await
        .unwrap();
    assert!(adj.is_none());
    assert_eq!(interesting, codes(&[200, 401]));
}

#[tokio::test]
async fn calibrated_soft_404_is_not_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/admin"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let base = server.uri();
    let runner = Runner::new(Options {
        url: base.clone(),
        wordlist: words(&["[url]/admin", "[url]/anything", "[url]/else"]),
        ..Options::default()
    })
    .unwrap();
    let report = runner.run().await.unwrap();

    assert!(report.baseline.unwrap().removed);
    assert!(!report.interesting.contains(&200));
    assert_eq!(report.found, vec![format!("{base}/admin")]);
}

#[tokio::test]
async fn concurrency_gate_bounds_in_flight_probes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_delay(Duration::from_millis(150)))
        .mount(&server)
        .await;

    let entries: Vec<String> = (0..10).map(|i| format!("[url]/p{i}")).collect();
    let runner = Runner::new(Options {
        url: server.uri(),
        wordlist: ListSource::Inline(entries),
        concurrency: 2,
        calibrate: false,
        ..Options::default()
    })
    .unwrap();

    let report = runner.run().await.unwrap();
    assert_eq!(report.results.len(), 10);
    assert!(report.peak_in_flight <= 2, "peak {}", report.peak_in_flight);
    assert!(report.peak_in_flight >= 1);
    assert_eq!(server.received_requests().await.unwrap().len(), 10);
}

#[tokio::test]
async fn stop_keeps_finished_results_only() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex("^/fast"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex("^/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
        .mount(&server)
        .await;

    let mut entries: Vec<String> = (0..3).map(|i| format!("[url]/fast{i}")).collect();
    entries.extend((0..5).map(|i| format!("[url]/slow{i}")));
    let runner = Arc::new(
        Runner::new(Options {
            url: server.uri(),
            wordlist: ListSource::Inline(entries),
            concurrency: 8,
            timeout_seconds: 30,
            calibrate: false,
            ..Options::default()
        })
        .unwrap(),
    );

    let task = tokio::spawn({
        let runner = runner.clone();
        async move { runner.run().await }
    });

    let mut waited = 0;
    while runner.found_urls().await.len() < 3 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        waited += 1;
        assert!(waited < 250, "fast probes never finished");
    }
    runner.stop_handle().stop();

    let report = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("scan did not unwind after stop")
        .unwrap()
        .unwrap();

    assert_eq!(report.state, ScanState::Cancelled);
    assert_eq!(runner.state(), ScanState::Cancelled);
    assert_eq!(report.results.len(), 3);
    assert!(report.results.iter().all(|r| r.ok && r.url.contains("/fast")));

    let issued = server.received_requests().await.unwrap().len();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.received_requests().await.unwrap().len(), issued);
}

#[tokio::test]
async fn runner_is_single_shot() {
    let server = MockServer::start().await;
    let runner = Runner::new(Options {
        url: server.uri(),
        wordlist: words(&["[url]/a"]),
        calibrate: false,
        ..Options::default()
    })
    .unwrap();
    runner.run().await.unwrap();
    let err = runner.run().await.unwrap_err();
    assert!(matches!(
        err,
        RunnerError::AlreadyStarted {
            state: ScanState::Completed
        }
    ));
}

#[tokio::test]
async fn state_changes_are_published() {
    let server = MockServer::start().await;
    let runner = Runner::new(Options {
        url: server.uri(),
        wordlist: words(&["[url]/a"]),
        calibrate: false,
        ..Options::default()
    })
    .unwrap();
    let rx = runner.subscribe();
    assert_eq!(*rx.borrow(), ScanState::Idle);
    runner.run().await.unwrap();
    assert_eq!(*rx.borrow(), ScanState::Completed);
}

#[tokio::test]
async fn max_candidates_caps_the_scan() {
    let server = MockServer::start().await;
    let entries: Vec<String> = (0..20).map(|i| format!("[url]/w{i}")).collect();
    let runner = Runner::new(Options {
        url: server.uri(),
        wordlist: ListSource::Inline(entries),
        max_candidates: Some(5),
        calibrate: false,
        ..Options::default()
    })
    .unwrap();
    let report = runner.run().await.unwrap();
    assert_eq!(report.candidates, 5);
    assert_eq!(report.results.len(), 5);
    assert!(report.results[4].url.ends_with("/w4"));
}

#[tokio::test]
async fn rate_limit_paces_requests() {
    let server = MockServer::start().await;
    let entries: Vec<String> = (0..10).map(|i| format!("[url]/r{i}")).collect();
    let runner = Runner::new(Options {
        url: server.uri(),
        wordlist: ListSource::Inline(entries),
        concurrency: 10,
        rate: Some(5),
        calibrate: false,
        ..Options::default()
    })
    .unwrap();
    let report = runner.run().await.unwrap();
    assert_eq!(report.results.len(), 10);
    // a burst of 5, then one every 200ms
    assert!(report.elapsed >= Duration::from_millis(800), "{:?}", report.elapsed);
}

#[tokio::test]
async fn strict_mode_turns_error_status_into_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let c = client(ClientOptions {
        error_for_status: true,
        ..ClientOptions::default()
    });
    let err = c
        .get(&format!("{}/missing", server.uri()))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HttpStatus);

    let lenient = client(ClientOptions::default());
    let resp = lenient
        .get(&format!("{}/missing", server.uri()))
        .await
        .unwrap();
    assert_eq!(resp.status, 404);
}

#[tokio::test]
async fn slow_response_is_a_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let c = client(ClientOptions {
        timeout: Duration::from_millis(300),
        ..ClientOptions::default()
    });
    let err = c.get(&format!("{}/slow", server.uri())).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
}

#[tokio::test]
async fn garbage_response_is_a_protocol_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        if let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let _ = socket.write_all(b"this is not http\r\n\r\n").await;
            let _ = socket.shutdown().await;
        }
    });

    let c = client(ClientOptions {
        retries: 0,
        ..ClientOptions::default()
    });
    let err = c.get(&format!("http://{addr}/")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
}

#[tokio::test]
async fn every_request_carries_a_pool_user_agent() {
    let server = MockServer::start().await;
    let runner = Runner::new(Options {
        url: server.uri(),
        wordlist: words(&["[url]/a", "[url]/b", "[url]/c", "[url]/d"]),
        user_agents: words(&["agent-one", "agent-two"]),
        calibrate: false,
        ..Options::default()
    })
    .unwrap();
    runner.run().await.unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 4);
    for req in requests {
        let ua = req.headers.get("user-agent").unwrap().to_str().unwrap();
        assert!(ua == "agent-one" || ua == "agent-two", "{ua}");
        assert!(req.headers.get("accept-language").is_some());
    }
}

#[tokio::test]
async fn wordlist_file_is_loaded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/panel"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let file = std::env::temp_dir().join(format!(
        "shadowgate_wordlist_test_{}.txt",
        std::process::id()
    ));
    std::fs::write(&file, "[url]/panel\n\n[url]/nothing\n").unwrap();
    let runner = Runner::new(Options {
        url: server.uri(),
        wordlist: ListSource::FilePath(file.to_string_lossy().to_string()),
        calibrate: false,
        ..Options::default()
    })
    .unwrap();
    let _ = std::fs::remove_file(&file);

    let report = runner.run().await.unwrap();
    assert_eq!(report.candidates, 2);
    assert_eq!(report.found, vec![format!("{}/panel", server.uri())]);
}

#[tokio::test]
async fn requests_travel_through_the_proxy_pool() {
    let proxy = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&proxy)
        .await;
    let target = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&target)
        .await;

    let base = target.uri();
    let runner = Runner::new(Options {
        url: base.clone(),
        wordlist: words(&["[url]/a", "[url]/b"]),
        // the ftp entry is not a usable proxy and is dropped from the pool
        proxies: Some(words(&[proxy.uri().as_str(), "ftp://127.0.0.1:21"])),
        calibrate: false,
        ..Options::default()
    })
    .unwrap();

    let report = runner.run().await.unwrap();
    assert_eq!(report.found, vec![format!("{base}/a"), format!("{base}/b")]);
    assert_eq!(proxy.received_requests().await.unwrap().len(), 2);
    assert!(target.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn connection_failures_use_every_retry() {
    let url = format!("{}/a", closed_port_url().await);

    let c = client(ClientOptions {
        retries: 2,
        ..ClientOptions::default()
    });
    let err = c.get(&url).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert_eq!(err.attempts(), 3);

    let once = client(ClientOptions {
        retries: 0,
        ..ClientOptions::default()
    });
    assert_eq!(once.get(&url).await.unwrap_err().attempts(), 1);
}

#[tokio::test]
async fn answered_requests_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let c = client(ClientOptions {
        retries: 3,
        ..ClientOptions::default()
    });
    let resp = c.get(&format!("{}/busy", server.uri())).await.unwrap();
    assert_eq!(resp.status, 503);
    assert_eq!(resp.attempts, 1);
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}
