//! Scraping actor client against a wiremock server.

use std::time::Duration;

use jobscout_adapters::{ApifyClient, PollSettings, ScrapeProvider};
use jobscout_storage::HttpClientConfig;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_poll() -> PollSettings {
    PollSettings {
        batch_size: 5,
        interval: Duration::from_millis(5),
        max_wait: Duration::from_millis(50),
        batch_pause: Duration::ZERO,
    }
}

fn client(server: &MockServer) -> ApifyClient {
    ApifyClient::with_base_url("apify-token", &HttpClientConfig::default(), &server.uri())
        .expect("client construction should not fail")
        .with_poll_settings(fast_poll())
}

fn urls(n: usize) -> Vec<String> {
    (0..n)
        .map(|i| format!("https://www.linkedin.com/jobs/search/?keywords=r{i}"))
        .collect()
}

#[tokio::test]
async fn successful_run_returns_dataset_listings() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v2/acts/curious_coder~linkedin-jobs-scraper/runs"))
        .and(header("authorization", "Bearer apify-token"))
        .and(body_partial_json(serde_json::json!({"count": 100, "scrapeCompany": true})))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(serde_json::json!({"data": {"id": "run-1", "status": "RUNNING"}})),
        )
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v2/actor-runs/run-1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"data": {"id": "run-1", "status": "SUCCEEDED"}})),
        )
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v2/actor-runs/run-1/dataset/items"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {"id": "101", "title": "Director of Product", "companyName": "Acme", "descriptionText": "Lead"},
            {"id": 102, "title": "Chief of Staff", "companyName": null},
            "not an object"
        ])))
        .mount(&server)
        .await;

    let outcome = client(&server)
        .scrape(&urls(2), 30)
        .await
        .expect("scrape should succeed");

    assert_eq!(outcome.listings.len(), 2);
    assert_eq!(outcome.listings[0].id, "101");
    assert_eq!(outcome.listings[1].id, "102");
    assert_eq!(outcome.metadata.count_per_url, 100);
    assert_eq!(outcome.metadata.successful_batches, 1);
    assert_eq!(outcome.metadata.total_jobs, 2);
}

#[tokio::test]
async fn batches_are_split_and_failures_recorded() {
    let server = MockServer::start().await;

    // First batch starts fine, second batch start is rejected.
    Mock::given(method("POST"))
        .and(path("/v2/acts/curious_coder~linkedin-jobs-scraper/runs"))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(serde_json::json!({"data": {"id": "run-ok"}})),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/acts/curious_coder~linkedin-jobs-scraper/runs"))
        .respond_with(ResponseTemplate::new(402).set_body_string("quota exceeded"))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v2/actor-runs/run-ok"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": {"status": "SUCCEEDED"}})),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/actor-runs/run-ok/dataset/items"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{"id": "1"}])))
        .mount(&server)
        .await;

    let outcome = client(&server)
        .scrape(&urls(7), 20)
        .await
        .expect("one good batch is enough");

    assert_eq!(outcome.metadata.batches.len(), 2);
    assert_eq!(outcome.metadata.batches[0].urls.len(), 5);
    assert_eq!(outcome.metadata.batches[1].urls.len(), 2);
    assert_eq!(outcome.metadata.failed_batches, 1);
    assert!(outcome.metadata.batches[1]
        .error
        .as_deref()
        .is_some_and(|e| e.contains("402")));
    assert_eq!(outcome.listings.len(), 1);
}

#[tokio::test]
async fn polling_gives_up_after_max_wait() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v2/acts/curious_coder~linkedin-jobs-scraper/runs"))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(serde_json::json!({"data": {"id": "slow"}})),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/actor-runs/slow"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": {"status": "RUNNING"}})),
        )
        .mount(&server)
        .await;

    let err = client(&server)
        .scrape(&urls(1), 100)
        .await
        .expect_err("a run that never finishes fails the only batch");
    assert!(err.to_string().contains("all 1 scrape batches failed"));
}

#[tokio::test]
async fn no_urls_means_no_requests() {
    let server = MockServer::start().await;
    let outcome = client(&server).scrape(&[], 100).await.expect("empty scrape");
    assert!(outcome.listings.is_empty());
    assert!(outcome.metadata.batches.is_empty());
}
