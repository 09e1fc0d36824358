use crate::ipc::error::{err, store_err};
use crate::ipc::helpers::{open_store, optional_str, required_str, to_result};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_permissions_get_day(state: &mut AppState, req: &Request) -> serde_json::Value {
    let day = match required_str(req, "day") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let store = match open_store(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    match store.backend.get_permissions_day(&day) {
        Ok(entries) => to_result(req, &json!({ "day": day, "entries": entries })),
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_permissions_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(entry) = req.params.get("entry") else {
        return err(&req.id, "bad_params", "missing entry", None);
    };
    let store = match open_store(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    match store.backend.add_permission(entry) {
        Ok(saved) => to_result(req, &json!({ "entry": saved })),
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_permissions_get_range(state: &mut AppState, req: &Request) -> serde_json::Value {
    let start = optional_str(req, "startDay").map(str::to_string);
    let end = optional_str(req, "endDay").map(str::to_string);
    let store = match open_store(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    match store
        .backend
        .get_permissions_range(start.as_deref(), end.as_deref())
    {
        Ok(map) => to_result(req, &json!({ "permissions": map })),
        Err(e) => store_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "permissions.getDay" => Some(handle_permissions_get_day(state, req)),
        "permissions.add" => Some(handle_permissions_add(state, req)),
        "permissions.getRange" => Some(handle_permissions_get_range(state, req)),
        _ => None,
    }
}
