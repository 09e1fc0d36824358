use clap::Parser;
use std::path::PathBuf;

use crate::backend::BackendType;

/// Startup configuration for the `kioskd` sidecar.
#[derive(Debug, Clone, Parser)]
#[command(name = "kioskd", version, about = "Per-tenant attendance storage sidecar")]
pub struct Config {
    /// Directory holding the key-value substrate. Without it the store lives in memory.
    #[arg(long, env = "KIOSKD_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[arg(long, env = "KIOSKD_TENANT", default_value = "default")]
    pub tenant: String,

    /// `kv` or `sql`.
    #[arg(long, env = "KIOSKD_BACKEND", default_value = "sql", value_parser = parse_backend)]
    pub backend: BackendType,

    /// Filter directive for tracing, e.g. `info` or `kioskstore=debug`.
    #[arg(long, env = "KIOSKD_LOG", default_value = "info")]
    pub log_level: String,
}

fn parse_backend(s: &str) -> Result<BackendType, String> {
    BackendType::parse(s).ok_or_else(|| format!("unknown backend: {s} (expected kv or sql)"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_sql_backend_in_memory() {
        let cfg = Config::try_parse_from(["kioskd"]).expect("parse");
        assert_eq!(cfg.backend, BackendType::Sql);
        assert_eq!(cfg.tenant, "default");
        assert!(cfg.data_dir.is_none());
    }

    #[test]
    fn rejects_unknown_backend() {
        assert!(Config::try_parse_from(["kioskd", "--backend", "mongo"]).is_err());
    }
}
