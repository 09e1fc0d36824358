use crate::ipc::error::{err, ok, store_err};
use crate::ipc::helpers::{open_store, required_str, to_result};
use crate::ipc::types::{AppState, Request};
use kioskstore::backend::open_backend;
use kioskstore::snapshot::transfer;
use kioskstore::{backup, BackendType};
use serde_json::json;
use std::path::PathBuf;
use tracing::info;

fn handle_snapshot_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match open_store(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    match store.backend.export_snapshot() {
        Ok(snapshot) => to_result(req, &snapshot),
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_snapshot_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(doc) = req.params.get("snapshot") else {
        return err(&req.id, "bad_params", "missing snapshot", None);
    };
    let store = match open_store(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    match store.backend.import_snapshot(doc) {
        Ok(()) => ok(&req.id, json!({ "ok": true })),
        Err(e) => store_err(&req.id, &e),
    }
}

fn unsupported_backend(req: &Request) -> serde_json::Value {
    err(
        &req.id,
        "unsupported_backend",
        format!("{} requires the sql backend", req.method),
        None,
    )
}

fn handle_database_export_binary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let out_path = match required_str(req, "path") {
        Ok(v) => PathBuf::from(v),
        Err(resp) => return resp,
    };
    let store = match open_store(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let Some(sql) = store.backend.as_sql() else {
        return unsupported_backend(req);
    };
    let bytes = match sql.export_database_binary() {
        Ok(b) => b,
        Err(e) => return store_err(&req.id, &e),
    };
    if let Err(e) = std::fs::write(&out_path, &bytes) {
        return err(&req.id, "io_failed", e.to_string(), None);
    }
    ok(
        &req.id,
        json!({ "path": out_path.to_string_lossy(), "bytes": bytes.len() }),
    )
}

fn handle_database_import_binary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let in_path = match required_str(req, "path") {
        Ok(v) => PathBuf::from(v),
        Err(resp) => return resp,
    };
    let store = match open_store(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let Some(sql) = store.backend.as_sql() else {
        return unsupported_backend(req);
    };
    let bytes = match std::fs::read(&in_path) {
        Ok(b) => b,
        Err(e) => {
            return err(
                &req.id,
                "io_failed",
                e.to_string(),
                Some(json!({ "path": in_path.to_string_lossy() })),
            )
        }
    };
    match sql.import_database_binary(&bytes) {
        Ok(outcome) => to_result(req, &outcome),
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_backup_export_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let out_path = match required_str(req, "path") {
        Ok(v) => PathBuf::from(v),
        Err(resp) => return resp,
    };
    let store = match open_store(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    match backup::export_bundle(store.backend.as_mut(), &out_path) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "path": out_path.to_string_lossy(),
                "bundleFormat": summary.bundle_format,
                "entryCount": summary.entry_count
            }),
        ),
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_backup_import_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let in_path = match required_str(req, "path") {
        Ok(v) => PathBuf::from(v),
        Err(resp) => return resp,
    };
    let store = match open_store(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    match backup::import_bundle(&in_path, store.backend.as_mut()) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "bundleFormatDetected": summary.bundle_format_detected,
                "students": summary.students
            }),
        ),
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_store_migrate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let target = match required_str(req, "backend") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(kind) = BackendType::parse(&target) else {
        return err(&req.id, "bad_params", format!("unknown backend: {}", target), None);
    };
    let store = match open_store(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let from = store.backend.backend_type();
    if from == kind {
        return ok(&req.id, json!({ "backend": kind.as_str(), "migrated": false }));
    }
    let tenant = store.backend.tenant().to_string();
    let mut next = open_backend(store.substrate.clone(), &tenant, kind);
    let snapshot = match transfer(store.backend.as_mut(), next.as_mut()) {
        Ok(s) => s,
        Err(e) => return store_err(&req.id, &e),
    };
    store.backend = next;
    info!(
        tenant = %tenant,
        from = from.as_str(),
        to = kind.as_str(),
        students = snapshot.students.len(),
        "migrated store backend"
    );
    ok(
        &req.id,
        json!({
            "backend": kind.as_str(),
            "migrated": true,
            "students": snapshot.students.len()
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "snapshot.export" => Some(handle_snapshot_export(state, req)),
        "snapshot.import" => Some(handle_snapshot_import(state, req)),
        "database.exportBinary" => Some(handle_database_export_binary(state, req)),
        "database.importBinary" => Some(handle_database_import_binary(state, req)),
        "backup.exportBundle" => Some(handle_backup_export_bundle(state, req)),
        "backup.importBundle" => Some(handle_backup_import_bundle(state, req)),
        "store.migrate" => Some(handle_store_migrate(state, req)),
        _ => None,
    }
}
