use crate::ipc::error::{err, ok, store_err};
use crate::ipc::helpers::{open_store, to_result};
use crate::ipc::types::{AppState, OpenStore, Request};
use kioskstore::BackendType;
use serde_json::json;
use std::path::PathBuf;
use tracing::info;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = state.store.as_mut() else {
        return ok(
            &req.id,
            json!({ "version": env!("CARGO_PKG_VERSION"), "store": null }),
        );
    };
    let data_dir = store
        .data_dir
        .as_ref()
        .map(|p| p.to_string_lossy().to_string());
    let backend = store.backend.as_mut();
    let tenant = backend.tenant().to_string();
    let backend_type = backend.backend_type();
    let (pending, tables) = match backend.as_sql() {
        Some(sql) => {
            let pending = sql.pending_operations().map(|q| q.len()).unwrap_or(0);
            let tables = sql.table_counts().ok();
            (pending, tables)
        }
        None => (0, None),
    };
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "store": {
                "tenant": tenant,
                "backend": backend_type.as_str(),
                "dataDir": data_dir,
                "pendingOperations": pending,
                "tables": tables,
            }
        }),
    )
}

fn handle_store_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let tenant = req
        .params
        .get("tenant")
        .and_then(|v| v.as_str())
        .unwrap_or("default");
    let kind = match req.params.get("backend").and_then(|v| v.as_str()) {
        None => BackendType::Sql,
        Some(s) => match BackendType::parse(s) {
            Some(k) => k,
            None => return err(&req.id, "bad_params", format!("unknown backend: {}", s), None),
        },
    };
    let data_dir = req
        .params
        .get("dataDir")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);

    match OpenStore::open(data_dir.clone(), tenant, kind) {
        Ok(store) => {
            let tenant = store.backend.tenant().to_string();
            info!(tenant = %tenant, backend = kind.as_str(), "store opened");
            state.store = Some(store);
            ok(
                &req.id,
                json!({
                    "tenant": tenant,
                    "backend": kind.as_str(),
                    "dataDir": data_dir.map(|p| p.to_string_lossy().to_string()),
                }),
            )
        }
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_queue_pending(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match open_store(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let Some(sql) = store.backend.as_sql() else {
        return ok(&req.id, json!({ "operations": [] }));
    };
    match sql.pending_operations() {
        Ok(ops) => to_result(req, &json!({ "operations": ops })),
        Err(e) => store_err(&req.id, &e),
    }
}

/// Connectivity-restored signal from the network layer.
fn handle_queue_replay(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match open_store(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let Some(sql) = store.backend.as_sql() else {
        return ok(&req.id, json!({ "applied": 0, "remaining": 0 }));
    };
    match sql.replay_queue() {
        Ok(report) => to_result(req, &report),
        Err(e) => store_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "store.open" => Some(handle_store_open(state, req)),
        "queue.pending" => Some(handle_queue_pending(state, req)),
        "queue.replay" => Some(handle_queue_replay(state, req)),
        _ => None,
    }
}
