use serde_json::Value;

use super::error::err;
use super::types::{AppState, OpenStore, Request};

pub fn open_store<'a>(state: &'a mut AppState, req: &Request) -> Result<&'a mut OpenStore, Value> {
    state
        .store
        .as_mut()
        .ok_or_else(|| err(&req.id, "no_store", "open a store first", None))
}

pub fn required_str(req: &Request, key: &str) -> Result<String, Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn optional_str<'a>(req: &'a Request, key: &str) -> Option<&'a str> {
    req.params.get(key).and_then(|v| v.as_str())
}

pub fn to_result<T: serde::Serialize>(req: &Request, value: &T) -> Value {
    match serde_json::to_value(value) {
        Ok(v) => super::error::ok(&req.id, v),
        Err(e) => err(&req.id, "encode_failed", e.to_string(), None),
    }
}
