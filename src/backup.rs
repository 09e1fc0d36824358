use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tracing::info;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::backend::StorageBackend;
use crate::error::{StoreError, StoreResult};
use crate::model::now_timestamp;

const MANIFEST_ENTRY: &str = "manifest.json";
const SNAPSHOT_ENTRY: &str = "snapshot.json";
const DB_ENTRY: &str = "db/kiosk.sqlite3";
pub const BUNDLE_FORMAT_V1: &str = "kiosk-store-bundle-v1";

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub entry_count: usize,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: String,
    pub students: usize,
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

fn io_err(context: &str) -> impl Fn(std::io::Error) -> StoreError + '_ {
    move |e| StoreError::Substrate(format!("{context}: {e}"))
}

fn zip_err(context: &str) -> impl Fn(zip::result::ZipError) -> StoreError + '_ {
    move |e| StoreError::InvalidFormat(format!("{context}: {e}"))
}

/// Write the backend's snapshot (and raw database, for SQL) into a zip bundle.
pub fn export_bundle(
    backend: &mut dyn StorageBackend,
    out_path: &Path,
) -> StoreResult<ExportSummary> {
    let snapshot = backend.export_snapshot()?;
    let snapshot_bytes = serde_json::to_vec_pretty(&snapshot)
        .map_err(|e| StoreError::Substrate(format!("failed to serialize snapshot: {e}")))?;
    let db_bytes = match backend.as_sql() {
        Some(sql) => Some(sql.export_database_binary()?),
        None => None,
    };

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err("failed to create bundle directory"))?;
    }
    let out_file = File::create(out_path).map_err(io_err("failed to create bundle file"))?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut checksums = serde_json::Map::new();
    checksums.insert(SNAPSHOT_ENTRY.to_string(), json!(sha256_hex(&snapshot_bytes)));
    if let Some(bytes) = &db_bytes {
        checksums.insert(DB_ENTRY.to_string(), json!(sha256_hex(bytes)));
    }
    let manifest = json!({
        "format": BUNDLE_FORMAT_V1,
        "version": 1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": now_timestamp(),
        "tenant": backend.tenant(),
        "backendType": backend.backend_type().as_str(),
        "sha256": checksums,
    });
    let manifest_bytes = serde_json::to_vec_pretty(&manifest)
        .map_err(|e| StoreError::Substrate(format!("failed to serialize manifest: {e}")))?;

    let mut entries: Vec<(&str, &[u8])> = vec![
        (MANIFEST_ENTRY, manifest_bytes.as_slice()),
        (SNAPSHOT_ENTRY, snapshot_bytes.as_slice()),
    ];
    if let Some(bytes) = &db_bytes {
        entries.push((DB_ENTRY, bytes.as_slice()));
    }
    for (name, bytes) in &entries {
        zip.start_file(*name, opts)
            .map_err(zip_err("failed to start bundle entry"))?;
        zip.write_all(bytes)
            .map_err(io_err("failed to write bundle entry"))?;
    }
    zip.finish().map_err(zip_err("failed to finalize bundle"))?;

    info!(
        tenant = backend.tenant(),
        path = %out_path.to_string_lossy(),
        entries = entries.len(),
        "exported backup bundle"
    );
    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT_V1.to_string(),
        entry_count: entries.len(),
    })
}

fn read_entry(archive: &mut ZipArchive<File>, name: &str) -> StoreResult<Vec<u8>> {
    let mut entry = archive
        .by_name(name)
        .map_err(|e| StoreError::InvalidFormat(format!("bundle missing {name}: {e}")))?;
    let mut out = Vec::new();
    entry
        .read_to_end(&mut out)
        .map_err(io_err("failed to read bundle entry"))?;
    Ok(out)
}

/// Verify a bundle and replace the backend's dataset with it. A SQL target
/// restores the bundled database when there is one; otherwise the snapshot.
pub fn import_bundle(
    in_path: &Path,
    backend: &mut dyn StorageBackend,
) -> StoreResult<ImportSummary> {
    let in_file = File::open(in_path).map_err(io_err("failed to open bundle"))?;
    let mut archive = ZipArchive::new(in_file).map_err(zip_err("invalid zip archive"))?;

    let manifest_bytes = read_entry(&mut archive, MANIFEST_ENTRY)?;
    let manifest: serde_json::Value = serde_json::from_slice(&manifest_bytes)
        .map_err(|e| StoreError::InvalidFormat(format!("manifest.json is invalid JSON: {e}")))?;
    let format = manifest
        .get("format")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if format != BUNDLE_FORMAT_V1 {
        return Err(StoreError::InvalidFormat(format!(
            "unsupported bundle format: {format}"
        )));
    }

    // Every listed entry is checked before anything is written.
    let checksums = manifest
        .get("sha256")
        .and_then(|v| v.as_object())
        .ok_or_else(|| StoreError::InvalidFormat("manifest.json has no sha256 map".into()))?;
    if !checksums.contains_key(SNAPSHOT_ENTRY) {
        return Err(StoreError::InvalidFormat(
            "manifest.json has no checksum for snapshot.json".into(),
        ));
    }
    let has_db = archive.file_names().any(|n| n == DB_ENTRY);
    if has_db && !checksums.contains_key(DB_ENTRY) {
        return Err(StoreError::InvalidFormat(format!(
            "manifest.json has no checksum for {DB_ENTRY}"
        )));
    }
    let mut snapshot_bytes = Vec::new();
    let mut db_bytes = None;
    for (name, expected) in checksums {
        let bytes = read_entry(&mut archive, name)?;
        if expected.as_str() != Some(sha256_hex(&bytes).as_str()) {
            return Err(StoreError::InvalidFormat(format!(
                "{name} checksum does not match manifest"
            )));
        }
        match name.as_str() {
            SNAPSHOT_ENTRY => snapshot_bytes = bytes,
            DB_ENTRY => db_bytes = Some(bytes),
            _ => {}
        }
    }

    let doc: serde_json::Value = serde_json::from_slice(&snapshot_bytes)
        .map_err(|e| StoreError::InvalidFormat(format!("snapshot.json is invalid JSON: {e}")))?;
    let restored = match (&db_bytes, backend.as_sql()) {
        (Some(bytes), Some(sql)) => {
            sql.import_database_binary(bytes)?;
            true
        }
        _ => false,
    };
    if !restored {
        backend.import_snapshot(&doc)?;
    }
    let students = doc
        .get("students")
        .and_then(|v| v.as_array())
        .map(Vec::len)
        .unwrap_or(0);

    info!(
        tenant = backend.tenant(),
        path = %in_path.to_string_lossy(),
        students,
        "imported backup bundle"
    );
    Ok(ImportSummary {
        bundle_format_detected: BUNDLE_FORMAT_V1.to_string(),
        students,
    })
}
