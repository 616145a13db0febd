//! In-memory emulation of the Proxmox VE API surface used by `pve-core`.
//!
//! Only the behaviour the client depends on is modelled: ticket login,
//! cookie/CSRF and API-token authentication, guest create/update/delete
//! answering with task ids, task status polling and a PNG rrd export.

use std::{
    collections::HashMap,
    sync::Arc,
};

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Form, Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

pub const USERNAME: &str = "root";
pub const REALM: &str = "pam";
pub const PASSWORD: &str = "secret";
pub const API_TOKEN: &str = "root@pam!ci=3f9c2b1e-8d4a-4f6b-9a2c-7e5d1c0b8a94";
pub const NODE: &str = "pve1";

/// PNG signature followed by padding. Clients treat the payload as opaque.
pub const RRD_PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

#[derive(Clone, Debug)]
pub struct Guest {
    pub name: String,
    pub memory: u64,
}

#[derive(Clone, Debug)]
struct Task {
    polls_until_done: u32,
    exitstatus: String,
}

#[derive(Debug, Default)]
pub struct ServerState {
    /// ticket -> CSRF token
    tickets: HashMap<String, String>,
    guests: HashMap<u32, Guest>,
    tasks: HashMap<String, Task>,
    next_task: u32,
    task_polls: u32,
}

pub type Db = Arc<RwLock<ServerState>>;

/// Router where every task reports `running` for two polls.
pub fn app() -> Router {
    app_with_task_polls(2)
}

/// Router where every task reports `running` for `task_polls` status reads.
pub fn app_with_task_polls(task_polls: u32) -> Router {
    let db: Db = Arc::new(RwLock::new(ServerState {
        task_polls,
        ..ServerState::default()
    }));
    Router::new()
        .route("/api2/json/access/ticket", post(create_ticket))
        .route("/api2/json/version", get(version))
        .route("/api2/json/nodes/{node}/qemu", post(create_guest))
        .route(
            "/api2/json/nodes/{node}/qemu/{vmid}",
            delete(delete_guest),
        )
        .route(
            "/api2/json/nodes/{node}/qemu/{vmid}/config",
            get(guest_config).put(update_guest_config),
        )
        .route(
            "/api2/json/nodes/{node}/tasks/{upid}/status",
            get(task_status),
        )
        .route("/api2/png/nodes/{node}/rrd", get(rrd_png))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

type Reply = (StatusCode, Json<Value>);

fn reply(status: StatusCode, body: Value) -> Reply {
    (status, Json(body))
}

fn ok(data: Value) -> Reply {
    reply(StatusCode::OK, json!({ "data": data }))
}

fn failure(status: StatusCode, message: &str) -> Reply {
    reply(status, json!({ "data": null, "message": format!("{message}\n") }))
}

fn unauthorized() -> Reply {
    failure(StatusCode::UNAUTHORIZED, "authentication failure")
}

fn cookie_ticket(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    cookies
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == "PVEAuthCookie")
        .map(|(_, value)| value.to_string())
}

/// Token auth wins; otherwise a known ticket is required, plus a matching
/// CSRF token for writes.
async fn authorize(db: &Db, headers: &HeaderMap, write: bool) -> Result<(), Reply> {
    if let Some(auth) = headers.get(header::AUTHORIZATION) {
        let auth = auth.to_str().unwrap_or_default();
        let token = auth
            .strip_prefix("PVEAPIToken ")
            .or_else(|| auth.strip_prefix("PVEAPIToken="));
        return match token {
            Some(token) if token == API_TOKEN => Ok(()),
            _ => Err(unauthorized()),
        };
    }

    let ticket = cookie_ticket(headers).ok_or_else(unauthorized)?;
    let state = db.read().await;
    let csrf = state.tickets.get(&ticket).ok_or_else(unauthorized)?;
    if write {
        let sent = headers
            .get("CSRFPreventionToken")
            .and_then(|v| v.to_str().ok());
        if sent != Some(csrf.as_str()) {
            return Err(failure(
                StatusCode::UNAUTHORIZED,
                "Permission check failed (invalid csrf token)",
            ));
        }
    }
    Ok(())
}

#[derive(Deserialize)]
pub struct TicketRequest {
    pub username: String,
    pub password: String,
    pub realm: Option<String>,
}

async fn create_ticket(State(db): State<Db>, Form(input): Form<TicketRequest>) -> Reply {
    let (user, realm) = match input.username.split_once('@') {
        Some((user, realm)) => (user.to_string(), realm.to_string()),
        None => (
            input.username.clone(),
            input.realm.unwrap_or_else(|| REALM.to_string()),
        ),
    };
    if user != USERNAME || realm != REALM || input.password != PASSWORD {
        return unauthorized();
    }

    let ticket = format!("PVE:{user}@{realm}:{}", Uuid::new_v4().simple());
    let csrf = format!("{}:{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
    db.write().await.tickets.insert(ticket.clone(), csrf.clone());

    ok(json!({
        "username": format!("{user}@{realm}"),
        "ticket": ticket,
        "CSRFPreventionToken": csrf,
        "cap": {}
    }))
}

async fn version(State(db): State<Db>, headers: HeaderMap) -> Reply {
    if let Err(denied) = authorize(&db, &headers, false).await {
        return denied;
    }
    ok(json!({ "version": "8.2.4", "release": "8.2", "repoid": "faa83925c9641325" }))
}

async fn start_task(db: &Db, node: &str, kind: &str, vmid: u32) -> String {
    let mut state = db.write().await;
    state.next_task += 1;
    let upid = format!(
        "UPID:{node}:{:08X}:{:08X}:{kind}:{vmid}:root@pam:",
        state.next_task,
        0x65F0_A1B2_u32.wrapping_add(state.next_task)
    );
    let task = Task {
        polls_until_done: state.task_polls,
        exitstatus: "OK".to_string(),
    };
    state.tasks.insert(upid.clone(), task);
    upid
}

fn parse_vmid(raw: Option<&String>) -> Result<u32, Reply> {
    let Some(raw) = raw else {
        return Err(reply(
            StatusCode::BAD_REQUEST,
            json!({
                "data": null,
                "errors": { "vmid": "property is missing and it is not optional" }
            }),
        ));
    };
    match raw.parse::<u32>() {
        Ok(vmid) if vmid >= 100 => Ok(vmid),
        _ => Err(reply(
            StatusCode::BAD_REQUEST,
            json!({
                "data": null,
                "errors": { "vmid": format!("value must be at least 100 (got {raw})") }
            }),
        )),
    }
}

async fn create_guest(
    State(db): State<Db>,
    Path(node): Path<String>,
    headers: HeaderMap,
    Form(input): Form<HashMap<String, String>>,
) -> Reply {
    if let Err(denied) = authorize(&db, &headers, true).await {
        return denied;
    }
    let vmid = match parse_vmid(input.get("vmid")) {
        Ok(vmid) => vmid,
        Err(invalid) => return invalid,
    };
    let memory = match input.get("memory").map(|m| m.parse::<u64>()) {
        None => 512,
        Some(Ok(memory)) => memory,
        Some(Err(_)) => {
            return reply(
                StatusCode::BAD_REQUEST,
                json!({ "data": null, "errors": { "memory": "type check ('integer') failed" } }),
            )
        }
    };
    {
        let mut state = db.write().await;
        if state.guests.contains_key(&vmid) {
            return failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                &format!("unable to create VM {vmid} - VM {vmid} already exists on node '{node}'"),
            );
        }
        let name = input
            .get("name")
            .cloned()
            .unwrap_or_else(|| format!("VM{vmid}"));
        state.guests.insert(vmid, Guest { name, memory });
    }
    let upid = start_task(&db, &node, "qmcreate", vmid).await;
    ok(Value::String(upid))
}

async fn guest_config(
    State(db): State<Db>,
    Path((node, vmid)): Path<(String, u32)>,
    headers: HeaderMap,
) -> Reply {
    if let Err(denied) = authorize(&db, &headers, false).await {
        return denied;
    }
    let state = db.read().await;
    match state.guests.get(&vmid) {
        Some(guest) => ok(json!({ "name": guest.name, "memory": guest.memory })),
        None => failure(
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!("Configuration file 'nodes/{node}/qemu-server/{vmid}.conf' does not exist"),
        ),
    }
}

async fn update_guest_config(
    State(db): State<Db>,
    Path((node, vmid)): Path<(String, u32)>,
    headers: HeaderMap,
    Form(input): Form<HashMap<String, String>>,
) -> Reply {
    if let Err(denied) = authorize(&db, &headers, true).await {
        return denied;
    }
    let mut state = db.write().await;
    let Some(guest) = state.guests.get_mut(&vmid) else {
        return failure(
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!("Configuration file 'nodes/{node}/qemu-server/{vmid}.conf' does not exist"),
        );
    };
    if let Some(name) = input.get("name") {
        guest.name = name.clone();
    }
    if let Some(memory) = input.get("memory") {
        match memory.parse() {
            Ok(memory) => guest.memory = memory,
            Err(_) => {
                return reply(
                    StatusCode::BAD_REQUEST,
                    json!({ "data": null, "errors": { "memory": "type check ('integer') failed" } }),
                )
            }
        }
    }
    ok(Value::Null)
}

async fn delete_guest(
    State(db): State<Db>,
    Path((node, vmid)): Path<(String, u32)>,
    headers: HeaderMap,
) -> Reply {
    if let Err(denied) = authorize(&db, &headers, true).await {
        return denied;
    }
    if db.write().await.guests.remove(&vmid).is_none() {
        return failure(
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!("Configuration file 'nodes/{node}/qemu-server/{vmid}.conf' does not exist"),
        );
    }
    let upid = start_task(&db, &node, "qmdestroy", vmid).await;
    ok(Value::String(upid))
}

async fn task_status(
    State(db): State<Db>,
    Path((node, upid)): Path<(String, String)>,
    headers: HeaderMap,
) -> Reply {
    if let Err(denied) = authorize(&db, &headers, false).await {
        return denied;
    }
    let mut state = db.write().await;
    let Some(task) = state.tasks.get_mut(&upid) else {
        return failure(StatusCode::BAD_REQUEST, &format!("no such task '{upid}'"));
    };
    if task.polls_until_done > 0 {
        task.polls_until_done -= 1;
        return ok(json!({ "status": "running", "node": node, "upid": upid }));
    }
    ok(json!({
        "status": "stopped",
        "exitstatus": task.exitstatus,
        "node": node,
        "upid": upid
    }))
}

async fn rrd_png(State(db): State<Db>, headers: HeaderMap) -> Response {
    if let Err(denied) = authorize(&db, &headers, false).await {
        return denied.into_response();
    }
    ([(header::CONTENT_TYPE, "image/png")], RRD_PNG).into_response()
}
