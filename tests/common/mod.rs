#![allow(dead_code)]

use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::Method;
use serde_json::{json, Value};
use servicenow_mcp::app::App;
use servicenow_mcp::config::ServerConfig;
use servicenow_mcp::services::credentials::MemoryCredentialStore;
use servicenow_mcp::services::logger::Logger;
use servicenow_mcp::servicenow::retry::RetryPolicy;
use servicenow_mcp::servicenow::transport::{
    HttpRequest, HttpResponse, HttpTransport, RequestBody, TransportError,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;

pub static ENV_LOCK: Lazy<AsyncMutex<()>> = Lazy::new(|| AsyncMutex::new(()));

pub const INSTANCE_URL: &str = "https://dev12345.service-now.com";
pub const BUILD_TAG: &str = "glide-xanadu-07-02-2024__patch2-09-10-2024";
pub const ADMIN_SYS_ID: &str = "6816f79cc0a8016401c5a33be04be441";

type Responder = Arc<dyn Fn(&HttpRequest, &[HttpRequest]) -> Result<HttpResponse, TransportError> + Send + Sync>;

#[derive(Clone)]
enum Reply {
    Fixed(HttpResponse),
    Fail(TransportError),
    Dynamic(Responder),
}

struct Route {
    method: Method,
    path: String,
    replies: VecDeque<Reply>,
}

/// Scripted transport: replies are queued per (method, path); the last reply
/// of a route repeats. Unrouted requests get a 404. Every request is kept.
#[derive(Default)]
pub struct FakeTransport {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<HttpRequest>>,
}

pub fn json_response(status: u16, body: Value) -> HttpResponse {
    HttpResponse {
        status,
        status_text: String::new(),
        body: body.to_string(),
    }
}

pub fn result(body: Value) -> HttpResponse {
    json_response(200, json!({ "result": body }))
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, method: Method, path: &str, reply: Reply) {
        let mut routes = self.routes.lock().expect("routes");
        if let Some(route) = routes
            .iter_mut()
            .find(|r| r.method == method && r.path == path)
        {
            route.replies.push_back(reply);
            return;
        }
        routes.push(Route {
            method,
            path: path.to_string(),
            replies: VecDeque::from([reply]),
        });
    }

    pub fn on(&self, method: Method, path: &str, response: HttpResponse) -> &Self {
        self.push(method, path, Reply::Fixed(response));
        self
    }

    pub fn on_error(&self, method: Method, path: &str, err: TransportError) -> &Self {
        self.push(method, path, Reply::Fail(err));
        self
    }

    pub fn on_fn<F>(&self, method: Method, path: &str, responder: F) -> &Self
    where
        F: Fn(&HttpRequest, &[HttpRequest]) -> Result<HttpResponse, TransportError> + Send + Sync + 'static,
    {
        self.push(method, path, Reply::Dynamic(Arc::new(responder)));
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().expect("requests").clone()
    }

    pub fn requests_to(&self, method: Method, path: &str) -> Vec<HttpRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && r.path() == path)
            .collect()
    }

    pub fn count(&self, method: Method, path: &str) -> usize {
        self.requests_to(method, path).len()
    }
}

#[async_trait]
impl HttpTransport for FakeTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let history = {
            let mut requests = self.requests.lock().expect("requests");
            requests.push(request.clone());
            requests.clone()
        };
        let reply = {
            let mut routes = self.routes.lock().expect("routes");
            let route = routes
                .iter_mut()
                .find(|r| r.method == request.method && r.path == request.path());
            match route {
                Some(route) if route.replies.len() > 1 => route.replies.pop_front(),
                Some(route) => route.replies.front().cloned(),
                None => None,
            }
        };
        match reply {
            Some(Reply::Fixed(response)) => Ok(response),
            Some(Reply::Fail(err)) => Err(err),
            Some(Reply::Dynamic(responder)) => responder(&request, &history),
            None => Ok(json_response(
                404,
                json!({"error": {"message": "No such route", "detail": request.path()}}),
            )),
        }
    }
}

/// Routes a healthy instance answers during connect: build tag, current
/// user, user record and role rows.
pub fn mock_instance(fake: &FakeTransport) {
    fake.on(
        Method::GET,
        "/api/now/table/sys_properties",
        result(json!([{ "name": "glide.buildtag", "value": BUILD_TAG }])),
    );
    fake.on(
        Method::GET,
        "/api/now/ui/user/current_user",
        result(json!({ "user_sys_id": ADMIN_SYS_ID, "user_name": "admin" })),
    );
    fake.on(
        Method::GET,
        "/api/now/table/sys_user",
        result(json!([{
            "sys_id": ADMIN_SYS_ID,
            "user_name": "admin",
            "name": "System Administrator",
            "email": "admin@example.com"
        }])),
    );
    fake.on(
        Method::GET,
        "/api/now/table/sys_user_has_role",
        result(json!([{ "role": "admin" }, { "role": "itil" }, { "role": "admin" }])),
    );
}

/// Tag embedded in the program body of the newest script submission.
pub fn submitted_tag(history: &[HttpRequest]) -> Option<String> {
    history.iter().rev().find_map(|req| {
        let body = match &req.body {
            Some(RequestBody::Json(value)) => value,
            _ => return None,
        };
        let script = body.get("script")?.as_str()?;
        let start = script.find("var __tag = '")? + "var __tag = '".len();
        let end = script[start..].find('\'')?;
        Some(script[start..start + end].to_string())
    })
}

pub fn envelope_message(tag: &str, envelope: Value) -> String {
    format!("<<SNOW_EXEC:{tag}>>{envelope}<</SNOW_EXEC:{tag}>>")
}

/// Artifact path that succeeds: create, trigger, syslog answers with
/// `envelope`, delete.
pub fn mock_artifact_run(fake: &FakeTransport, envelope: Value) {
    fake.on(
        Method::POST,
        "/api/now/table/sysauto_script",
        json_response(201, json!({"result": {"sys_id": "art0001"}})),
    );
    fake.on(
        Method::PATCH,
        "/api/now/table/sysauto_script/art0001",
        result(json!({"sys_id": "art0001"})),
    );
    fake.on(
        Method::DELETE,
        "/api/now/table/sysauto_script/art0001",
        HttpResponse {
            status: 204,
            status_text: "No Content".to_string(),
            body: String::new(),
        },
    );
    fake.on_fn(Method::GET, "/api/now/table/syslog", move |_, history| {
        let rows = match submitted_tag(history) {
            Some(tag) => json!([{ "message": envelope_message(&tag, envelope.clone()), "sys_created_on": "2024-07-02 10:00:00" }]),
            None => json!([]),
        };
        Ok(result(rows))
    });
}

pub fn test_config() -> ServerConfig {
    ServerConfig {
        retry: RetryPolicy::none(),
        script_poll_interval: Duration::from_millis(50),
        script_poll_window: Duration::from_secs(2),
        ..ServerConfig::default()
    }
}

pub fn app_with(fake: Arc<FakeTransport>, config: ServerConfig, credentials: MemoryCredentialStore) -> App {
    App::with_parts(Logger::new("test"), config, fake, Arc::new(credentials)).expect("app wiring")
}

pub fn app(fake: Arc<FakeTransport>) -> App {
    app_with(fake, test_config(), MemoryCredentialStore::new())
}

/// Connects `app` to dev12345 with basic auth; panics with the error text
/// otherwise.
pub async fn connect(app: &App) {
    let outcome = app
        .tool_executor
        .execute(
            "servicenow_connect",
            json!({"instance": "dev12345", "username": "admin", "password": "pw"}),
        )
        .await
        .expect("dispatch");
    assert!(!outcome.is_error, "connect failed: {}", outcome.text);
}
