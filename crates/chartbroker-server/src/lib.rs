//! HTTP binding of the chartbroker service broker API.
//!
//! Routes under `/v2` map one-to-one onto [`Broker`] operations. Failures
//! render as `{"error": <kind>, "description": <message>}` with a status code
//! derived from the error kind. Every request is handled on its own thread
//! against a shared `Arc<Broker>`.
//!
//! The [`TestServer`] helper starts a server on a random port for integration testing.

use chartbroker_core::{Broker, BrokerError, DeprovisionRequest, ProvisionRequest, UpdateRequest};
use chartbroker_release::Values;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::Read;
use std::sync::Arc;
use tiny_http::{Header, Method, Request, Response, Server, StatusCode};
use tracing::{debug, error, info, warn};

/// Header carrying the broker API version the platform speaks.
pub const API_VERSION_HEADER: &str = "X-Broker-API-Version";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route<'a> {
    Health,
    Catalog,
    Instance(&'a str),
    LastOperation(&'a str),
    Binding {
        instance_id: &'a str,
        binding_id: &'a str,
    },
}

/// Match a request path (without query) to a route.
pub fn parse_route(path: &str) -> Option<Route<'_>> {
    if path == "/health" {
        return Some(Route::Health);
    }
    let rest = path.strip_prefix("/v2/")?;
    if rest == "catalog" {
        return Some(Route::Catalog);
    }
    let segments: Vec<&str> = rest.strip_prefix("service_instances/")?.split('/').collect();
    match segments.as_slice() {
        &[id] if !id.is_empty() => Some(Route::Instance(id)),
        &[id, "last_operation"] if !id.is_empty() => Some(Route::LastOperation(id)),
        &[instance_id, "service_bindings", binding_id]
            if !instance_id.is_empty() && !binding_id.is_empty() =>
        {
            Some(Route::Binding {
                instance_id,
                binding_id,
            })
        }
        _ => None,
    }
}

fn split_url(url: &str) -> (&str, &str) {
    url.split_once('?').unwrap_or((url, ""))
}

/// `accepts_incomplete=true` in the query string.
pub fn accepts_incomplete(query: &str) -> bool {
    url::form_urlencoded::parse(query.as_bytes())
        .any(|(k, v)| k == "accepts_incomplete" && v == "true")
}

pub fn status_for(err: &BrokerError) -> u16 {
    match err {
        BrokerError::InvalidFormat(_) | BrokerError::MissingNamespace(_) => 400,
        BrokerError::NotFound(_) => 404,
        BrokerError::Conflict(_) => 409,
        BrokerError::InProgress(_) => 422,
        _ => 500,
    }
}

#[derive(Debug, Default, Deserialize)]
struct ProvisionBody {
    #[serde(default)]
    service_id: String,
    #[serde(default)]
    plan_id: String,
    #[serde(default)]
    parameters: Values,
    #[serde(default)]
    context: Values,
}

#[derive(Debug, Default, Deserialize)]
struct UpdateBody {
    #[serde(default)]
    service_id: String,
    #[serde(default)]
    plan_id: Option<String>,
    #[serde(default)]
    parameters: Values,
}

fn respond_json(req: Request, code: u16, body: &Value) {
    let mut response =
        Response::from_data(body.to_string().into_bytes()).with_status_code(StatusCode(code));
    if let Ok(header) = Header::from_bytes("Content-Type", "application/json") {
        response.add_header(header);
    }
    let _ = req.respond(response);
}

fn respond_error(req: Request, err: &BrokerError) {
    let code = status_for(err);
    if code >= 500 {
        error!("{} {}: {err}", req.method(), req.url());
    } else {
        warn!("{} {}: {err}", req.method(), req.url());
    }
    respond_json(
        req,
        code,
        &json!({ "error": err.kind(), "description": err.to_string() }),
    );
}

/// Parse the request body as JSON. An empty body yields the default.
fn read_json<T: DeserializeOwned + Default>(req: &mut Request) -> Result<T, BrokerError> {
    let mut body = Vec::new();
    req.as_reader().read_to_end(&mut body)?;
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(&body)
        .map_err(|e| BrokerError::InvalidFormat(format!("invalid request body: {e}")))
}

fn dispatch(
    broker: &Broker,
    req: &mut Request,
    method: &Method,
    route: Route<'_>,
    accepts_incomplete: bool,
) -> Result<(u16, Value), BrokerError> {
    match (method, route) {
        (Method::Get, Route::Health) => Ok((200, json!({ "status": "ok" }))),
        (Method::Get, Route::Catalog) => {
            let services = broker.get_catalog()?;
            Ok((200, json!({ "services": services })))
        }
        (Method::Put, Route::Instance(id)) => {
            let body: ProvisionBody = read_json(req)?;
            let resp = broker.provision(&ProvisionRequest {
                instance_id: id.to_owned(),
                service_id: body.service_id,
                plan_id: body.plan_id,
                parameters: body.parameters,
                context: body.context,
                accepts_incomplete,
            })?;
            let code = if resp.exists {
                200
            } else if resp.is_async {
                202
            } else {
                201
            };
            Ok((code, json!({ "dashboard_url": resp.dashboard_url })))
        }
        (Method::Delete, Route::Instance(id)) => {
            let resp = broker.deprovision(&DeprovisionRequest {
                instance_id: id.to_owned(),
                accepts_incomplete,
            })?;
            Ok((if resp.is_async { 202 } else { 200 }, json!({})))
        }
        (Method::Patch, Route::Instance(id)) => {
            let body: UpdateBody = read_json(req)?;
            let resp = broker.update(&UpdateRequest {
                instance_id: id.to_owned(),
                service_id: body.service_id,
                plan_id: body.plan_id,
                parameters: body.parameters,
                accepts_incomplete,
            })?;
            Ok((if resp.is_async { 202 } else { 200 }, json!({})))
        }
        (Method::Get, Route::LastOperation(id)) => {
            let resp = broker.last_operation(id)?;
            Ok((200, json!({ "state": resp.state })))
        }
        (
            Method::Put,
            Route::Binding {
                instance_id,
                binding_id,
            },
        ) => {
            let resp = broker.bind(instance_id)?;
            info!("bound {binding_id} to {instance_id}");
            Ok((201, json!({ "credentials": resp.credentials })))
        }
        (
            Method::Delete,
            Route::Binding {
                instance_id,
                binding_id,
            },
        ) => {
            broker.unbind(instance_id)?;
            debug!("unbound {binding_id} from {instance_id}");
            Ok((200, json!({})))
        }
        _ => Ok((
            405,
            json!({ "error": "MethodNotAllowed", "description": format!("{method} not allowed") }),
        )),
    }
}

/// Handle a single HTTP request, dispatching to the matching broker operation.
pub fn handle_request(broker: &Broker, mut req: Request) {
    let method = req.method().clone();
    let url = req.url().to_owned();
    debug!("{method} {url}");

    let version = req
        .headers()
        .iter()
        .find(|h| h.field.equiv(API_VERSION_HEADER))
        .map(|h| h.value.as_str().to_owned());
    if let Some(version) = version {
        if let Err(e) = broker.validate_api_version(&version) {
            respond_error(req, &e);
            return;
        }
    }

    let (path, query) = split_url(&url);
    let Some(route) = parse_route(path) else {
        respond_json(
            req,
            404,
            &json!({ "error": "NotFound", "description": format!("no route for {path}") }),
        );
        return;
    };

    match dispatch(broker, &mut req, &method, route, accepts_incomplete(query)) {
        Ok((code, body)) => respond_json(req, code, &body),
        Err(e) => respond_error(req, &e),
    }
}

/// Accept requests until the server is unblocked, one thread per request.
fn serve(server: &Server, broker: &Arc<Broker>) {
    for request in server.incoming_requests() {
        let broker = Arc::clone(broker);
        std::thread::spawn(move || handle_request(&broker, request));
    }
}

/// Start the server loop, blocking the current thread.
pub fn run_server(
    broker: &Arc<Broker>,
    addr: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let server = Server::http(addr)?;
    info!("listening on {addr}");
    serve(&server, broker);
    Ok(())
}

/// A test helper that serves a [`Broker`] on a random port in a background thread.
///
/// Drop the `TestServer` to stop accepting requests.
pub struct TestServer {
    pub url: String,
    pub port: u16,
    pub broker: Arc<Broker>,
    server: Arc<Server>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl TestServer {
    /// Binds to `127.0.0.1:0`.
    pub fn start(broker: Broker) -> Self {
        let server =
            Arc::new(Server::http("127.0.0.1:0").expect("failed to bind test HTTP server"));
        let port = server.server_addr().to_ip().expect("not an IP addr").port();
        let url = format!("http://127.0.0.1:{port}");

        let broker = Arc::new(broker);
        let srv = Arc::clone(&server);
        let shared = Arc::clone(&broker);
        let handle = std::thread::spawn(move || serve(&srv, &shared));

        Self {
            url,
            port,
            broker,
            server,
            handle: Some(handle),
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.unblock();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
