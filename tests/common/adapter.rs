//! Scripted platform adapter.
//!
//! Serves the REST surface dynchand's bridge expects and records every
//! mutating request.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

#[derive(Default)]
pub struct World {
    pub tenants: HashSet<u64>,
    /// (tenant, resource) -> (name, occupants as `{id, activity}`)
    pub resources: BTreeMap<(u64, u64), (String, Vec<Value>)>,
    pub calls: Vec<String>,
    next_id: u64,
}

type Shared = Arc<Mutex<World>>;

pub struct MockAdapter {
    pub world: Shared,
    pub base_url: String,
}

#[derive(Deserialize)]
struct Name {
    name: String,
}

#[derive(Deserialize)]
struct Patch {
    name: Option<String>,
}

#[derive(Deserialize)]
struct Target {
    resource_id: u64,
}

async fn get_tenant(State(w): State<Shared>, Path(t): Path<u64>) -> StatusCode {
    if w.lock().unwrap().tenants.contains(&t) {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn get_resource(
    State(w): State<Shared>,
    Path((t, r)): Path<(u64, u64)>,
) -> Result<Json<Value>, StatusCode> {
    let w = w.lock().unwrap();
    let (name, occupants) = w.resources.get(&(t, r)).ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(json!({ "name": name, "occupants": occupants })))
}

async fn clone_resource(
    State(w): State<Shared>,
    Path((t, r)): Path<(u64, u64)>,
    Json(body): Json<Name>,
) -> Result<Json<Value>, StatusCode> {
    let mut w = w.lock().unwrap();
    if !w.resources.contains_key(&(t, r)) {
        return Err(StatusCode::NOT_FOUND);
    }
    w.next_id += 1;
    let id = 1000 + w.next_id;
    w.calls.push(format!("clone {r} {}", body.name));
    w.resources.insert((t, id), (body.name, Vec::new()));
    Ok(Json(json!({ "id": id })))
}

async fn delete_resource(State(w): State<Shared>, Path((t, r)): Path<(u64, u64)>) -> StatusCode {
    let mut w = w.lock().unwrap();
    w.calls.push(format!("delete {r}"));
    match w.resources.remove(&(t, r)) {
        Some(_) => StatusCode::NO_CONTENT,
        None => StatusCode::NOT_FOUND,
    }
}

async fn patch_resource(
    State(w): State<Shared>,
    Path((t, r)): Path<(u64, u64)>,
    Json(body): Json<Patch>,
) -> StatusCode {
    let mut w = w.lock().unwrap();
    let Some(name) = body.name else {
        return StatusCode::NO_CONTENT;
    };
    w.calls.push(format!("rename {r} {name}"));
    match w.resources.get_mut(&(t, r)) {
        Some(resource) => {
            resource.0 = name;
            StatusCode::NO_CONTENT
        }
        None => StatusCode::NOT_FOUND,
    }
}

async fn move_occupant(
    State(w): State<Shared>,
    Path((t, o)): Path<(u64, u64)>,
    Json(body): Json<Target>,
) -> StatusCode {
    let mut w = w.lock().unwrap();
    if !w.resources.contains_key(&(t, body.resource_id)) {
        return StatusCode::NOT_FOUND;
    }
    let occupant = w
        .resources
        .iter_mut()
        .filter(|((tenant, _), _)| *tenant == t)
        .find_map(|(_, (_, occupants))| {
            let i = occupants.iter().position(|occ| occ["id"] == o)?;
            Some(occupants.remove(i))
        });
    let Some(occupant) = occupant else {
        return StatusCode::NOT_FOUND;
    };
    w.calls.push(format!("move {o} {}", body.resource_id));
    if let Some(target) = w.resources.get_mut(&(t, body.resource_id)) {
        target.1.push(occupant);
    }
    StatusCode::NO_CONTENT
}

impl MockAdapter {
    /// Start serving on an ephemeral port.
    pub async fn start(world: World) -> Self {
        let world: Shared = Arc::new(Mutex::new(world));
        let app = Router::new()
            .route("/tenants/:t", get(get_tenant))
            .route(
                "/tenants/:t/resources/:r",
                get(get_resource)
                    .delete(delete_resource)
                    .patch(patch_resource),
            )
            .route("/tenants/:t/resources/:r/clone", post(clone_resource))
            .route("/tenants/:t/occupants/:o/resource", put(move_occupant))
            .with_state(world.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind adapter");
        let addr = listener.local_addr().expect("adapter addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            world,
            base_url: format!("http://{addr}"),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.world.lock().unwrap().calls.clone()
    }

    pub fn occupants(&self, tenant: u64, resource: u64) -> Vec<u64> {
        self.world
            .lock()
            .unwrap()
            .resources
            .get(&(tenant, resource))
            .map(|(_, occupants)| occupants.iter().filter_map(|o| o["id"].as_u64()).collect())
            .unwrap_or_default()
    }

    /// Resource ids of `tenant` other than `except`.
    pub fn others(&self, tenant: u64, except: u64) -> Vec<u64> {
        self.world
            .lock()
            .unwrap()
            .resources
            .keys()
            .filter(|(t, r)| *t == tenant && *r != except)
            .map(|(_, r)| *r)
            .collect()
    }

    /// Remove an occupant from wherever they are.
    pub fn disconnect(&self, tenant: u64, occupant: u64) {
        let mut w = self.world.lock().unwrap();
        for ((t, _), (_, occupants)) in w.resources.iter_mut() {
            if *t == tenant {
                occupants.retain(|o| o["id"] != occupant);
            }
        }
    }
}

/// A world with one tenant and one resource holding the given occupants.
pub fn world_with(tenant: u64, resource: u64, name: &str, occupants: Vec<Value>) -> World {
    let mut world = World::default();
    world.tenants.insert(tenant);
    world
        .resources
        .insert((tenant, resource), (name.to_string(), occupants));
    world
}
