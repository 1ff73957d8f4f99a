use conductor_directory::{
    DirectoryClient, DirectoryError, HttpDirectoryClient, HttpDirectoryConfig,
};
use conductor_protocol::{
    BaseScenarioId, PairKey, ProjectId, RegionalScenarioId, TerritoryId, UserId,
};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const TOKEN: &str = "secret-token";

fn json_response(status: StatusCode, body: serde_json::Value) -> Response<Body> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("response")
}

fn scenario(id: i64, user: &str, region: i64, is_based: bool) -> serde_json::Value {
    json!({
        "scenario_id": id,
        "parent_scenario": null,
        "project": {"project_id": 500 + id, "user_id": user, "name": "--", "region": {"id": region, "name": "r"}},
        "functional_zone_type": null,
        "name": format!("scenario {id}"),
        "is_based": is_based,
        "properties": {}
    })
}

fn project(id: i64, user: &str, territory: i64) -> serde_json::Value {
    json!({
        "project_id": id,
        "user_id": user,
        "name": format!("project {id}"),
        "territory": {"id": territory, "name": "t"},
        "base_scenario": null,
        "description": null,
        "public": true,
        "is_regional": false,
        "is_city": false
    })
}

async fn route(req: Request<Body>, addr: SocketAddr) -> Response<Body> {
    let path = req.uri().path().to_string();
    let query = req.uri().query().unwrap_or("").to_string();

    if path == "/health_check/ping" {
        return json_response(StatusCode::OK, json!({"message": "Pong!"}));
    }

    let expected = format!("Bearer {TOKEN}");
    let authorized = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        == Some(expected.as_str());
    if !authorized {
        return json_response(StatusCode::UNAUTHORIZED, json!({"detail": "no token"}));
    }

    match (req.method().clone(), path.as_str()) {
        (Method::GET, "/api/openapi") => {
            json_response(StatusCode::OK, json!({"info": {"version": "1.2.3"}}))
        }
        (Method::GET, "/api/v1/scenarios") => {
            assert!(query.contains("is_based=false"), "query: {query}");
            json_response(
                StatusCode::OK,
                json!([
                    scenario(10, "u1", 7, false),
                    scenario(11, "u2", 7, false),
                    scenario(12, "u1", 8, true),
                    scenario(13, "u1", 8, false),
                ]),
            )
        }
        (Method::GET, "/api/v1/projects") if query.contains("page=2") => json_response(
            StatusCode::OK,
            json!({"count": 3, "next": null, "previous": null, "results": [project(3, "u1", 5)]}),
        ),
        (Method::GET, "/api/v1/projects") => {
            assert!(query.contains("territory_id=5"), "query: {query}");
            json_response(
                StatusCode::OK,
                json!({
                    "count": 3,
                    "next": format!("http://{addr}/api/v1/projects?page=2&territory_id=5"),
                    "previous": null,
                    "results": [project(1, "u1", 5), project(2, "u2", 5)]
                }),
            )
        }
        (Method::POST, "/api/v1/projects/1/base_scenario/10") => {
            json_response(StatusCode::CREATED, scenario(99, "u1", 7, true))
        }
        (Method::POST, "/api/v1/projects/1/base_scenario/11") => json_response(
            StatusCode::CONFLICT,
            json!({"detail": "base scenario already exists"}),
        ),
        (Method::POST, "/api/v1/projects/1/base_scenario/12") => {
            json_response(StatusCode::SERVICE_UNAVAILABLE, json!({"detail": "busy"}))
        }
        (Method::POST, "/api/v1/projects/1/base_scenario/13") => {
            json_response(StatusCode::BAD_REQUEST, json!({"detail": "invalid scenario"}))
        }
        (Method::POST, "/api/v1/projects/1/base_scenario/14") => {
            tokio::time::sleep(Duration::from_millis(500)).await;
            json_response(StatusCode::CREATED, scenario(100, "u1", 7, true))
        }
        _ => json_response(StatusCode::NOT_FOUND, json!({"detail": "not found"})),
    }
}

async fn spawn_directory(seen: Arc<Mutex<Vec<String>>>) -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    listener.set_nonblocking(true).expect("nonblocking");
    let addr = listener.local_addr().expect("local addr");

    let make_service = make_service_fn(move |_| {
        let seen = Arc::clone(&seen);
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.lock()
                        .expect("seen lock")
                        .push(format!("{} {}", req.method(), req.uri()));
                    Ok::<_, Infallible>(route(req, addr).await)
                }
            }))
        }
    });

    let server = Server::from_tcp(listener)
        .expect("server from tcp")
        .serve(make_service);
    tokio::spawn(async move {
        let _ = server.await;
    });
    addr
}

fn client_for(addr: SocketAddr, token: &str) -> HttpDirectoryClient {
    HttpDirectoryClient::new(HttpDirectoryConfig {
        // no scheme on purpose: the client must default to http
        host: addr.to_string(),
        api_token: token.to_string(),
        ping_timeout: Duration::from_secs(1),
        operation_timeout: Duration::from_millis(200),
        page_size: 2,
    })
    .expect("client")
}

#[tokio::test]
async fn lists_unbased_scenarios_of_the_requested_user_in_the_region() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let addr = spawn_directory(Arc::clone(&seen)).await;
    let client = client_for(addr, TOKEN);

    let scenarios = client
        .list_regional_scenarios_for_user(&UserId::new("u1"), TerritoryId(7))
        .await
        .expect("list scenarios");
    let ids: Vec<_> = scenarios.iter().map(|s| s.regional_scenario_id).collect();
    assert_eq!(ids, vec![RegionalScenarioId(10)]);
    assert_eq!(scenarios[0].territory_id, TerritoryId(7));

    let seen = seen.lock().expect("seen lock").clone();
    assert_eq!(seen.len(), 1, "{seen:?}");
    assert!(seen[0].starts_with("GET /api/v1/scenarios?"), "{seen:?}");
    assert!(seen[0].contains("territory_id=7"), "{seen:?}");
}

#[tokio::test]
async fn follows_project_pagination() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let addr = spawn_directory(Arc::clone(&seen)).await;
    let client = client_for(addr, TOKEN);

    let projects = client
        .list_projects_for_user_in_territory(&UserId::new("u1"), TerritoryId(5))
        .await
        .expect("list projects");
    let ids: Vec<_> = projects.iter().map(|p| p.project_id).collect();
    assert_eq!(ids, vec![ProjectId(1), ProjectId(3)]);

    let seen = seen.lock().expect("seen lock").clone();
    assert_eq!(seen.len(), 2, "{seen:?}");
    assert!(seen[0].contains("page_size=2"), "{seen:?}");
}

#[tokio::test]
async fn create_maps_statuses_to_tagged_outcomes() {
    let addr = spawn_directory(Arc::default()).await;
    let client = client_for(addr, TOKEN);

    let created = client
        .create_base_scenario(ProjectId(1), RegionalScenarioId(10))
        .await
        .expect("created");
    assert_eq!(created.id, BaseScenarioId(99));
    assert_eq!(created.key, PairKey::new(ProjectId(1), RegionalScenarioId(10)));

    let conflict = client
        .create_base_scenario(ProjectId(1), RegionalScenarioId(11))
        .await
        .unwrap_err();
    assert!(conflict.is_conflict(), "{conflict}");

    let busy = client
        .create_base_scenario(ProjectId(1), RegionalScenarioId(12))
        .await
        .unwrap_err();
    assert!(busy.is_transient(), "{busy}");

    let rejected = client
        .create_base_scenario(ProjectId(1), RegionalScenarioId(13))
        .await
        .unwrap_err();
    assert!(
        matches!(rejected, DirectoryError::Rejected { status: 400, .. }),
        "{rejected}"
    );

    let slow = client
        .create_base_scenario(ProjectId(1), RegionalScenarioId(14))
        .await
        .unwrap_err();
    assert!(slow.is_transient(), "{slow}");
}

#[tokio::test]
async fn missing_token_is_a_permanent_rejection() {
    let addr = spawn_directory(Arc::default()).await;
    let client = client_for(addr, "wrong");

    let err = client
        .create_base_scenario(ProjectId(1), RegionalScenarioId(10))
        .await
        .unwrap_err();
    assert!(matches!(err, DirectoryError::Rejected { status: 401, .. }), "{err}");
}

#[tokio::test]
async fn ping_and_version() {
    let addr = spawn_directory(Arc::default()).await;
    let client = client_for(addr, TOKEN);

    assert!(client.ping().await);
    assert_eq!(client.version().await.expect("version"), "1.2.3");
}

#[tokio::test]
async fn unreachable_directory_is_transient() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let client = client_for(addr, TOKEN);
    assert!(!client.ping().await);
    let err = client
        .list_regional_scenarios_for_user(&UserId::new("u1"), TerritoryId(1))
        .await
        .unwrap_err();
    assert!(err.is_transient(), "{err}");
}
