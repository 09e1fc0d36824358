use crate::ipc::error::{err, store_err};
use crate::ipc::helpers::{open_store, to_result};
use crate::ipc::types::{AppState, Request};

fn handle_settings_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match open_store(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    match store.backend.get_settings() {
        Ok(settings) => to_result(req, &settings),
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_settings_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(patch) = req.params.get("patch").filter(|v| v.is_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };
    let store = match open_store(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    match store.backend.set_settings(patch) {
        Ok(settings) => to_result(req, &settings),
        Err(e) => store_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "settings.get" => Some(handle_settings_get(state, req)),
        "settings.set" => Some(handle_settings_set(state, req)),
        _ => None,
    }
}
