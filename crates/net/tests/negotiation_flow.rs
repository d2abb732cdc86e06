//! End-to-end tests against a running server

use std::sync::Arc;
use std::time::Duration;

use cohome_core::storage::{GroupRepository, UserRepository};
use cohome_core::{AuthToken, Database, Group, GroupMember, GroupRole, User};
use cohome_net::{AppState, Server, ServerConfig};
use futures_util::future::join_all;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::time::{timeout, timeout_at, Instant};
use uuid::Uuid;

const WAIT: Duration = Duration::from_secs(5);

struct Member {
    id: Uuid,
    token: String,
}

struct Harness {
    server: Server,
    client: reqwest::Client,
    group: Uuid,
    property: Uuid,
    members: Vec<Member>,
    sandbox: Uuid,
}

impl Harness {
    async fn start() -> Self {
        let db = Database::open_in_memory().unwrap();
        let mut members = Vec::new();
        let owner = User::new("alice".into());
        let group = Group::new("Maple Street".into(), owner.id);

        for (i, name) in ["alice", "bob", "carol"].iter().enumerate() {
            let user = if i == 0 {
                owner.clone()
            } else {
                User::new(name.to_string())
            };
            db.create_user(&user).unwrap();
            if i == 0 {
                db.create_group(&group).unwrap();
            }
            let role = if i == 0 { GroupRole::Owner } else { GroupRole::Member };
            db.add_group_member(&GroupMember::new(group.id, user.id, role))
                .unwrap();
            let token = AuthToken::new(user.id, 1);
            db.issue_token(&token).unwrap();
            members.push(Member {
                id: user.id,
                token: token.token,
            });
        }

        let sandbox = Uuid::new_v4();
        let config = ServerConfig {
            heartbeat_interval: Duration::from_millis(50),
            sandbox_sessions: [sandbox].into_iter().collect(),
            ..ServerConfig::default()
        };
        let state = Arc::new(AppState::new(db, config));
        let server = Server::start("127.0.0.1:0".parse().unwrap(), state)
            .await
            .unwrap();

        Harness {
            server,
            client: reqwest::Client::new(),
            group: group.id,
            property: Uuid::new_v4(),
            members,
            sandbox,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.server.addr(), path)
    }

    async fn get(&self, who: usize, path: &str) -> (StatusCode, Value) {
        let resp = self
            .client
            .get(self.url(path))
            .bearer_auth(&self.members[who].token)
            .send()
            .await
            .unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    async fn send(
        &self,
        method: reqwest::Method,
        who: usize,
        path: &str,
        body: Value,
    ) -> (StatusCode, Value) {
        let resp = self
            .client
            .request(method, self.url(path))
            .bearer_auth(&self.members[who].token)
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    async fn calculation_id(&self) -> Uuid {
        let (status, body) = self
            .get(
                0,
                &format!(
                    "/api/intentions?groupId={}&propertyId={}",
                    self.group, self.property
                ),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        body["calculationId"].as_str().unwrap().parse().unwrap()
    }

    /// A: 40/50, B: 35/45, C: 25/35, then open the session
    async fn open_session(&self) -> Uuid {
        let calculation = self.calculation_id().await;
        for (who, (desired, max)) in [(40.0, 50.0), (35.0, 45.0), (25.0, 35.0)].iter().enumerate() {
            let (status, body) = self
                .send(
                    reqwest::Method::POST,
                    who,
                    "/api/intentions",
                    json!({
                        "calculationId": calculation,
                        "desiredPercentage": desired,
                        "maxPercentage": max,
                    }),
                )
                .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["success"], true);
        }

        let (status, body) = self
            .send(
                reqwest::Method::POST,
                0,
                "/api/negotiations",
                json!({ "groupId": self.group, "propertyId": self.property }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        body["sessionId"].as_str().unwrap().parse().unwrap()
    }

    async fn events(&self, who: usize, session: Uuid) -> EventReader {
        let resp = self
            .client
            .get(self.url(&format!(
                "/api/negotiations/{}/events?userId={}",
                session, self.members[who].id
            )))
            .bearer_auth(&self.members[who].token)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        EventReader {
            resp,
            buf: String::new(),
        }
    }
}

/// Minimal SSE reader over raw response chunks
struct EventReader {
    resp: reqwest::Response,
    buf: String,
}

impl EventReader {
    async fn next_message(&mut self) -> Value {
        loop {
            if let Some(pos) = self.buf.find("\n\n") {
                let block: String = self.buf.drain(..pos + 2).collect();
                let data = block
                    .lines()
                    .find_map(|line| line.strip_prefix("data:").map(str::trim));
                match data {
                    Some(data) => return serde_json::from_str(data).unwrap(),
                    None => continue,
                }
            }
            let chunk = timeout(WAIT, self.resp.chunk())
                .await
                .expect("timed out waiting for event")
                .unwrap()
                .expect("event stream ended");
            self.buf.push_str(std::str::from_utf8(&chunk).unwrap());
        }
    }

    /// Everything that arrives within `window`
    async fn drain(&mut self, window: Duration) -> Vec<Value> {
        let deadline = Instant::now() + window;
        let mut seen = Vec::new();
        while let Ok(msg) = timeout_at(deadline, self.next_message()).await {
            seen.push(msg);
        }
        seen
    }

    async fn wait_for(&mut self, kind: &str) -> Value {
        loop {
            let msg = self.next_message().await;
            if msg["type"] == kind {
                return msg;
            }
        }
    }
}

#[tokio::test]
async fn test_health() {
    let h = Harness::start().await;
    let resp = h.client.get(h.url("/health")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_requests_require_a_token() {
    let h = Harness::start().await;
    let resp = h
        .client
        .get(h.url(&format!(
            "/api/negotiations/status?groupId={}&propertyId={}",
            h.group, h.property
        )))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "unauthorized");
}

#[tokio::test]
async fn test_session_needs_every_intention() {
    let h = Harness::start().await;
    let calculation = h.calculation_id().await;
    h.send(
        reqwest::Method::POST,
        0,
        "/api/intentions",
        json!({ "calculationId": calculation, "desiredPercentage": 40, "maxPercentage": 50 }),
    )
    .await;

    let (status, body) = h
        .send(
            reqwest::Method::POST,
            0,
            "/api/negotiations",
            json!({ "groupId": h.group, "propertyId": h.property }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "intentions_incomplete");

    let (status, _) = h
        .send(
            reqwest::Method::POST,
            1,
            "/api/intentions",
            json!({ "calculationId": calculation, "desiredPercentage": 40 }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_negotiation_locks_and_broadcasts() {
    let h = Harness::start().await;
    let session = h.open_session().await;

    let mut watcher = h.events(1, session).await;
    assert_eq!(watcher.next_message().await["type"], "connected");
    let online = watcher.next_message().await;
    assert_eq!(online["type"], "online-users");
    assert_eq!(online["users"], json!([h.members[1].id]));

    let path = format!("/api/negotiations/{}/participant", session);
    let (status, snapshot) = h
        .send(
            reqwest::Method::PATCH,
            0,
            &path,
            json!({ "currentPercentage": 40, "status": "confirmed" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["session"]["status"], "active");

    let update = watcher.wait_for("percentage-update").await;
    assert_eq!(update["userId"], json!(h.members[0].id));
    assert_eq!(update["status"], "confirmed");

    h.send(
        reqwest::Method::PATCH,
        1,
        &path,
        json!({ "currentPercentage": 35, "status": "confirmed" }),
    )
    .await;
    let (status, snapshot) = h
        .send(reqwest::Method::PATCH, 2, &path, json!({ "status": "confirmed" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["session"]["status"], "completed");
    assert_eq!(snapshot["totalPercentage"], 100.0);

    let change = watcher.wait_for("status-change").await;
    assert_eq!(change["userId"], json!(h.members[2].id));
    let done = watcher.wait_for("negotiation-completed").await;
    assert_eq!(done["distribution"][h.members[0].id.to_string()], 40.0);

    let (_, status) = h
        .get(
            0,
            &format!(
                "/api/negotiations/status?groupId={}&propertyId={}",
                h.group, h.property
            ),
        )
        .await;
    assert_eq!(status["isCompleted"], true);
    assert_eq!(status["sessionId"], json!(session));

    let (status, body) = h
        .send(reqwest::Method::PATCH, 0, &path, json!({ "currentPercentage": 30 }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "conflict");

    let (_, history) = h
        .get(1, &format!("/api/negotiations/{}/history", session))
        .await;
    let kinds: Vec<&str> = history["transitions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["kind"].as_str().unwrap())
        .collect();
    assert_eq!(kinds.last(), Some(&"locked"));
}

#[tokio::test]
async fn test_reconnect_and_leave() {
    let h = Harness::start().await;
    let session = h.open_session().await;

    let mut watcher = h.events(1, session).await;
    let tab1 = h.events(0, session).await;
    let tab2 = h.events(0, session).await;

    let joined = watcher.wait_for("user-joined").await;
    assert_eq!(joined["userId"], json!(h.members[0].id));
    assert_eq!(
        h.server.state().registry().online_users(session).len(),
        2
    );

    drop(tab1);
    drop(tab2);
    let left = watcher.wait_for("user-left").await;
    assert_eq!(left["userId"], json!(h.members[0].id));
    assert!(!h
        .server
        .state()
        .registry()
        .is_online(session, h.members[0].id));

    let (_, snapshot) = h
        .get(1, &format!("/api/negotiations/{}", session))
        .await;
    let a = snapshot["participants"]
        .as_array()
        .unwrap()
        .iter()
        .find(|p| p["userId"] == json!(h.members[0].id))
        .cloned()
        .unwrap();
    assert_eq!(a["isOnline"], false);
}

#[tokio::test]
async fn test_push_channel_checks_identity() {
    let h = Harness::start().await;
    let session = h.open_session().await;

    // Bob's token asking for Alice's channel
    let resp = h
        .client
        .get(h.url(&format!(
            "/api/negotiations/{}/events?userId={}",
            session, h.members[0].id
        )))
        .bearer_auth(&h.members[1].token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    // Sandbox sessions skip authentication entirely
    let resp = h
        .client
        .get(h.url(&format!(
            "/api/negotiations/{}/events?userId={}",
            h.sandbox,
            Uuid::new_v4()
        )))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_abandon_broadcasts_and_frees_calculation() {
    let h = Harness::start().await;
    let session = h.open_session().await;
    let mut watcher = h.events(2, session).await;

    let (status, body) = h
        .send(
            reqwest::Method::POST,
            1,
            &format!("/api/negotiations/{}/abandon", session),
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["kind"], "abandoned");

    let msg = watcher.wait_for("negotiation-abandoned").await;
    assert_eq!(msg["userId"], json!(h.members[1].id));

    let (status, body) = h
        .send(
            reqwest::Method::POST,
            0,
            "/api/negotiations",
            json!({ "groupId": h.group, "propertyId": h.property }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(body["sessionId"], json!(session));
}

#[tokio::test]
async fn test_malformed_requests_use_error_envelope() {
    let h = Harness::start().await;
    let session = h.open_session().await;

    let (status, body) = h
        .send(
            reqwest::Method::PATCH,
            0,
            &format!("/api/negotiations/{}/participant", session),
            json!({ "currentPercentage": "forty" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation");

    let (status, body) = h.get(0, "/api/intentions?groupId=nope").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation");

    let (status, body) = h.get(0, "/api/negotiations/not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_confirms_lock_once() {
    let h = Harness::start().await;
    let session = h.open_session().await;
    let mut watcher = h.events(1, session).await;
    let path = format!("/api/negotiations/{}/participant", session);

    // Any order sums to 100 once all three have landed
    let bodies = [
        json!({ "currentPercentage": 45, "status": "confirmed" }),
        json!({ "currentPercentage": 30, "status": "confirmed" }),
        json!({ "status": "confirmed" }),
    ];
    let results = join_all(
        bodies
            .into_iter()
            .enumerate()
            .map(|(who, body)| h.send(reqwest::Method::PATCH, who, &path, body)),
    )
    .await;

    assert!(results.iter().all(|(status, _)| *status == StatusCode::OK));
    let completed = results
        .iter()
        .filter(|(_, snap)| snap["session"]["status"] == "completed")
        .count();
    assert_eq!(completed, 1);

    let seen = watcher.drain(Duration::from_millis(300)).await;
    let locks = seen
        .iter()
        .filter(|m| m["type"] == "negotiation-completed")
        .count();
    assert_eq!(locks, 1);

    let (_, history) = h
        .get(0, &format!("/api/negotiations/{}/history", session))
        .await;
    let transitions = history["transitions"].as_array().unwrap();
    let locked = transitions.iter().filter(|t| t["kind"] == "locked").count();
    assert_eq!(locked, 1);

    // Seeded shares, overridden by the last logged change per member
    let mut shares = [40.0, 35.0, 25.0];
    for t in transitions.iter().filter(|t| t["kind"] == "percentage_changed") {
        let who = h
            .members
            .iter()
            .position(|m| json!(m.id) == t["userId"])
            .unwrap();
        shares[who] = t["percentage"].as_f64().unwrap();
    }
    assert_eq!(shares, [45.0, 30.0, 25.0]);

    let (_, snapshot) = h.get(0, &format!("/api/negotiations/{}", session)).await;
    assert_eq!(snapshot["session"]["status"], "completed");
    assert_eq!(snapshot["totalPercentage"].as_f64(), Some(shares.iter().sum()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_updates_broadcast_in_commit_order() {
    let h = Harness::start().await;
    let session = h.open_session().await;
    let mut watcher = h.events(1, session).await;
    let url = h.url(&format!("/api/negotiations/{}/participant", session));
    let values: Vec<u32> = (51..=80).collect();

    let requests: Vec<_> = values
        .iter()
        .map(|value| {
            let request = h
                .client
                .patch(&url)
                .bearer_auth(&h.members[0].token)
                .json(&json!({ "currentPercentage": value }));
            tokio::spawn(async move { request.send().await.unwrap().status() })
        })
        .collect();

    let mut last = None;
    let mut received = 0;
    while received < values.len() {
        let msg = watcher.wait_for("percentage-update").await;
        assert_eq!(msg["userId"], json!(h.members[0].id));
        last = msg["percentage"].as_f64();
        received += 1;
    }
    for request in requests {
        assert_eq!(request.await.unwrap(), StatusCode::OK);
    }

    let (_, snapshot) = h.get(1, &format!("/api/negotiations/{}", session)).await;
    let stored = snapshot["participants"]
        .as_array()
        .unwrap()
        .iter()
        .find(|p| p["userId"] == json!(h.members[0].id))
        .and_then(|p| p["currentPercentage"].as_f64());
    assert_eq!(stored, last);
}

#[tokio::test]
async fn test_combined_update_records_presence_and_broadcasts() {
    let h = Harness::start().await;
    let session = h.open_session().await;
    let mut watcher = h.events(1, session).await;

    let (status, snapshot) = h
        .send(
            reqwest::Method::PATCH,
            2,
            &format!("/api/negotiations/{}/participant", session),
            json!({ "currentPercentage": 20, "isOnline": true }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let carol = snapshot["participants"]
        .as_array()
        .unwrap()
        .iter()
        .find(|p| p["userId"] == json!(h.members[2].id))
        .cloned()
        .unwrap();
    assert_eq!(carol["isOnline"], true);
    assert_eq!(carol["currentPercentage"], 20.0);

    let update = watcher.wait_for("percentage-update").await;
    assert_eq!(update["userId"], json!(h.members[2].id));
    assert_eq!(update["percentage"], 20.0);
}
