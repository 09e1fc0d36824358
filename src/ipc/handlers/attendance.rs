use crate::ipc::error::{err, ok, store_err};
use crate::ipc::helpers::{open_store, optional_str, to_result};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

struct HandlerErr {
    code: &'static str,
    message: String,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, None)
    }
}

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: format!("missing {}", key),
        })
}

fn handle_attendance_get_day(state: &mut AppState, req: &Request) -> serde_json::Value {
    let day = match get_required_str(&req.params, "day") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let store = match open_store(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    match store.backend.get_attendance_day(&day) {
        Ok(rows) => to_result(req, &json!({ "day": day, "records": rows })),
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_attendance_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let parsed = (|| {
        Ok::<_, HandlerErr>((
            get_required_str(&req.params, "day")?,
            get_required_str(&req.params, "studentId")?,
            get_required_str(&req.params, "time")?,
        ))
    })();
    let (day, student_id, time) = match parsed {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let store = match open_store(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    match store.backend.set_attendance(&day, &student_id, &time) {
        Ok(()) => ok(&req.id, json!({ "ok": true })),
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_attendance_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let parsed = (|| {
        Ok::<_, HandlerErr>((
            get_required_str(&req.params, "day")?,
            get_required_str(&req.params, "studentId")?,
        ))
    })();
    let (day, student_id) = match parsed {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let store = match open_store(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    match store.backend.delete_attendance(&day, &student_id) {
        Ok(()) => ok(&req.id, json!({ "ok": true })),
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_attendance_get_range(state: &mut AppState, req: &Request) -> serde_json::Value {
    let start = optional_str(req, "startDay").map(str::to_string);
    let end = optional_str(req, "endDay").map(str::to_string);
    let store = match open_store(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    match store
        .backend
        .get_attendance_range(start.as_deref(), end.as_deref())
    {
        Ok(map) => to_result(req, &json!({ "attendance": map })),
        Err(e) => store_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.getDay" => Some(handle_attendance_get_day(state, req)),
        "attendance.set" => Some(handle_attendance_set(state, req)),
        "attendance.delete" => Some(handle_attendance_delete(state, req)),
        "attendance.getRange" => Some(handle_attendance_get_range(state, req)),
        _ => None,
    }
}
