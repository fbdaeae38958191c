//! Integration tests for the TaskFlow REST API.
//!
//! Each test spins up the real router on a random port with an in-memory
//! database and drives it over HTTP with reqwest.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::{Client, StatusCode};
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;

use taskflow::api::{self, AppState};
use taskflow::auth::IdentityResolver;
use taskflow::config::{AuthConfig, RateLimitConfig};
use taskflow::rate_limit::RateLimiter;
use taskflow::store::LibSqlBackend;

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

struct TestServer {
    base: String,
    resolver: Arc<IdentityResolver>,
    client: Client,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn token(&self, user: &str) -> String {
        self.resolver.issue_token(user).unwrap()
    }

    async fn create_task(&self, user: &str, body: Value) -> Value {
        let resp = self
            .client
            .post(self.url("/api/v1/tasks"))
            .bearer_auth(self.token(user))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        resp.json().await.unwrap()
    }
}

/// Start the router on a random port.
async fn start_server(max_requests: u32) -> TestServer {
    start_server_with(RateLimitConfig {
        max_requests,
        window: Duration::from_secs(60),
        ..Default::default()
    })
    .await
}

async fn start_server_with(limits: RateLimitConfig) -> TestServer {
    let resolver = Arc::new(IdentityResolver::new(&AuthConfig {
        jwt_secret: SecretString::from("integration-secret".to_string()),
        token_ttl: Duration::from_secs(3600),
    }));
    let state = AppState {
        db: Arc::new(LibSqlBackend::new_memory().await.unwrap()),
        resolver: Arc::clone(&resolver),
        limiter: Arc::new(RateLimiter::new(limits)),
        environment: "test".to_string(),
    };
    let app = api::router(state, &["http://localhost:3000".to_string()]);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    TestServer {
        base: format!("http://127.0.0.1:{port}"),
        resolver,
        client: Client::new(),
    }
}

#[tokio::test]
async fn rejects_missing_and_bad_credentials() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(100).await;
        let url = server.url("/api/v1/tasks");

        let missing = server.client.get(&url).send().await.unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let garbage = server.client.get(&url).bearer_auth("nope").send().await.unwrap();
        assert_eq!(garbage.status(), StatusCode::UNAUTHORIZED);

        let expired = server
            .resolver
            .issue_token_at("alice", Utc::now() - chrono::Duration::hours(2))
            .unwrap();
        let resp = server.client.get(&url).bearer_auth(expired).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "unauthorized");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn task_lifecycle() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(100).await;
        let token = server.token("alice");

        let task = server
            .create_task("alice", json!({"title": "  Write report ", "priority": "high"}))
            .await;
        assert_eq!(task["title"], "Write report");
        assert_eq!(task["priority"], "high");
        assert_eq!(task["completed"], false);
        assert_eq!(task["tags"], json!([]));
        let id = task["id"].as_i64().unwrap();

        let resp = server
            .client
            .put(server.url(&format!("/api/v1/tasks/{id}")))
            .bearer_auth(&token)
            .json(&json!({"description": "Q3 numbers"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let updated: Value = resp.json().await.unwrap();
        assert_eq!(updated["description"], "Q3 numbers");
        assert_eq!(updated["title"], "Write report");

        let resp = server
            .client
            .patch(server.url(&format!("/api/v1/tasks/{id}/complete")))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap();
        let toggled: Value = resp.json().await.unwrap();
        assert_eq!(toggled["completed"], true);

        let resp = server
            .client
            .delete(server.url(&format!("/api/v1/tasks/{id}")))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let resp = server
            .client
            .get(server.url(&format!("/api/v1/tasks/{id}")))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn blank_title_is_unprocessable() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(100).await;
        let resp = server
            .client
            .post(server.url("/api/v1/tasks"))
            .bearer_auth(server.token("alice"))
            .json(&json!({"title": "   "}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "validation_failed");
        assert_eq!(body["field"], "title");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn users_cannot_see_each_others_data() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(100).await;
        let bob = server.token("bob");

        let task = server.create_task("alice", json!({"title": "alice only"})).await;
        let id = task["id"].as_i64().unwrap();
        let task_url = server.url(&format!("/api/v1/tasks/{id}"));

        let get = server.client.get(&task_url).bearer_auth(&bob).send().await.unwrap();
        assert_eq!(get.status(), StatusCode::NOT_FOUND);

        let put = server
            .client
            .put(&task_url)
            .bearer_auth(&bob)
            .json(&json!({"title": "mine now"}))
            .send()
            .await
            .unwrap();
        assert_eq!(put.status(), StatusCode::NOT_FOUND);

        let patch = server
            .client
            .patch(format!("{task_url}/complete"))
            .bearer_auth(&bob)
            .send()
            .await
            .unwrap();
        assert_eq!(patch.status(), StatusCode::NOT_FOUND);

        let delete = server.client.delete(&task_url).bearer_auth(&bob).send().await.unwrap();
        assert_eq!(delete.status(), StatusCode::NOT_FOUND);

        let list: Value = server
            .client
            .get(server.url("/api/v1/tasks"))
            .bearer_auth(&bob)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(list["total"], 0);

        // Bob cannot attach Alice's tag to his own task.
        let tag: Value = server
            .client
            .post(server.url("/api/v1/tags"))
            .bearer_auth(server.token("alice"))
            .json(&json!({"name": "private"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let bobs = server
            .create_task("bob", json!({"title": "bob's", "tag_ids": [tag["id"]]}))
            .await;
        assert_eq!(bobs["tags"], json!([]));

        // Alice's task is untouched.
        let alice_view: Value = server
            .client
            .get(&task_url)
            .bearer_auth(server.token("alice"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(alice_view["title"], "alice only");
        assert_eq!(alice_view["completed"], false);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn listing_paginates_and_validates() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(100).await;
        let token = server.token("alice");
        for i in 0..25 {
            server.create_task("alice", json!({"title": format!("task {i}")})).await;
        }

        let page = |query: &'static str| {
            let req = server
                .client
                .get(server.url(&format!("/api/v1/tasks?{query}")))
                .bearer_auth(&token);
            async move { req.send().await.unwrap() }
        };

        let second: Value = page("page=2&per_page=20").await.json().await.unwrap();
        assert_eq!(second["tasks"].as_array().unwrap().len(), 5);
        assert_eq!(second["total"], 25);
        assert_eq!(second["page"], 2);

        let third: Value = page("page=3&per_page=20").await.json().await.unwrap();
        assert!(third["tasks"].as_array().unwrap().is_empty());
        assert_eq!(third["total"], 25);

        assert_eq!(page("per_page=0").await.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(page("per_page=101").await.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(page("sort_by=bogus").await.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let asc: Value = page("sort_by=title&sort_order=asc&search=task%201")
            .await
            .json()
            .await
            .unwrap();
        // "task 1" and "task 10".."task 19"
        assert_eq!(asc["total"], 11);
        assert_eq!(asc["tasks"][0]["title"], "task 1");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn tags_upsert_filter_and_autocomplete() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(100).await;
        let token = server.token("alice");

        let mut ids = Vec::new();
        for name in ["Work", " work "] {
            let resp = server
                .client
                .post(server.url("/api/v1/tags"))
                .bearer_auth(&token)
                .json(&json!({ "name": name }))
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::CREATED);
            let tag: Value = resp.json().await.unwrap();
            assert_eq!(tag["name"], "work");
            ids.push(tag["id"].as_i64().unwrap());
        }
        assert_eq!(ids[0], ids[1]);
        let work = ids[0];

        server
            .create_task("alice", json!({"title": "tagged", "tag_ids": [work]}))
            .await;
        server.create_task("alice", json!({"title": "untagged"})).await;

        let filtered: Value = server
            .client
            .get(server.url(&format!("/api/v1/tasks?tag_id={work}")))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(filtered["total"], 1);
        assert_eq!(filtered["tasks"][0]["tags"][0]["name"], "work");

        let suggestions: Value = server
            .client
            .get(server.url("/api/v1/tags/autocomplete?q=Wo"))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(suggestions["suggestions"], json!(["work"]));

        let resp = server
            .client
            .delete(server.url(&format!("/api/v1/tags/{work}")))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let tags: Value = server
            .client
            .get(server.url("/api/v1/tags"))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(tags["total"], 0);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn rate_limit_rejects_with_retry_after() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(3).await;
        let token = server.token("alice");
        let url = server.url("/api/v1/tasks");

        for expected in ["2", "1", "0"] {
            let resp = server.client.get(&url).bearer_auth(&token).send().await.unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
            assert_eq!(resp.headers()["x-ratelimit-limit"], "3");
            assert_eq!(resp.headers()["x-ratelimit-remaining"], expected);
        }

        let resp = server.client.get(&url).bearer_auth(&token).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        let retry: u64 = resp.headers()["retry-after"].to_str().unwrap().parse().unwrap();
        assert!((1..=60).contains(&retry));
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["retry_after"], retry);

        // A forged forwarding header does not buy a fresh window.
        for i in 0..5 {
            let forged = server
                .client
                .get(&url)
                .bearer_auth(&token)
                .header("x-forwarded-for", format!("10.9.9.{i}"))
                .send()
                .await
                .unwrap();
            assert_eq!(forged.status(), StatusCode::TOO_MANY_REQUESTS);
        }

        // Health is never limited.
        let health = server.client.get(server.url("/health")).send().await.unwrap();
        assert_eq!(health.status(), StatusCode::OK);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn trusted_proxy_limits_per_forwarded_client() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server_with(RateLimitConfig {
            max_requests: 1,
            window: Duration::from_secs(60),
            trust_forwarded: true,
            ..Default::default()
        })
        .await;
        let token = server.token("alice");
        let url = server.url("/api/v1/tasks");

        let send = |client_ip: &'static str| {
            server
                .client
                .get(&url)
                .bearer_auth(&token)
                .header("x-forwarded-for", client_ip)
                .send()
        };

        assert_eq!(send("203.0.113.1").await.unwrap().status(), StatusCode::OK);
        assert_eq!(
            send("203.0.113.1").await.unwrap().status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(send("203.0.113.2").await.unwrap().status(), StatusCode::OK);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn malformed_bodies_get_json_errors() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(100).await;
        let url = server.url("/api/v1/tasks");

        let resp = server
            .client
            .post(&url)
            .bearer_auth(server.token("alice"))
            .json(&json!({"title": 5}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "validation_failed");

        let resp = server
            .client
            .post(&url)
            .bearer_auth(server.token("alice"))
            .json(&json!({"title": "x", "priority": "urgent"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["field"], "priority");

        let resp = server
            .client
            .post(&url)
            .bearer_auth(server.token("alice"))
            .header("content-type", "application/json")
            .body("{\"title\": ")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "bad_request");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn account_lifecycle() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(100).await;
        let creds = json!({"email": "grace@example.com", "password": "hopper-1906"});

        let resp = server
            .client
            .post(server.url("/api/v1/auth/signup"))
            .json(&creds)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let signup: Value = resp.json().await.unwrap();
        let user_id = signup["user"]["id"].as_str().unwrap().to_string();

        let resp = server
            .client
            .post(server.url("/api/v1/auth/signup"))
            .json(&creds)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = server
            .client
            .post(server.url("/api/v1/auth/signin"))
            .json(&creds)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let signin: Value = resp.json().await.unwrap();
        let token = signin["session"]["token"].as_str().unwrap().to_string();
        let first_token = signup["session"]["token"].as_str().unwrap().to_string();

        let resp = server
            .client
            .post(server.url("/api/v1/tasks"))
            .bearer_auth(&token)
            .json(&json!({"title": "Debug the Mark II"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let task: Value = resp.json().await.unwrap();
        assert_eq!(task["user_id"], user_id.as_str());

        let resp = server
            .client
            .post(server.url("/api/v1/auth/signout"))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = server
            .client
            .get(server.url("/api/v1/tasks"))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        // Signing out one session leaves the others alone.
        let resp = server
            .client
            .get(server.url("/api/v1/tasks"))
            .bearer_auth(&first_token)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let page: Value = resp.json().await.unwrap();
        assert_eq!(page["total"], 1);
    })
    .await
    .expect("test timed out");
}
