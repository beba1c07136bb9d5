// Path: crates/node/src/config.rs
//! Node configuration.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::bail;

/// Everything the node needs to start.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path of the redb database file. Created if it does not exist.
    pub db_path: PathBuf,
    /// Listen address of the decryption-key gRPC service.
    pub grpc_listen_addr: SocketAddr,
}

impl Config {
    /// Validates the configuration before any resource is touched.
    pub fn check(&self) -> anyhow::Result<()> {
        if self.db_path.as_os_str().is_empty() {
            bail!("database path must not be empty");
        }
        if let Some(parent) = self.db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                bail!("database directory {} does not exist", parent.display());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_db_path_is_rejected() {
        let cfg = Config {
            db_path: PathBuf::new(),
            grpc_listen_addr: "127.0.0.1:0".parse().unwrap(),
        };
        assert!(cfg.check().is_err());
    }

    #[test]
    fn missing_db_directory_is_rejected() {
        let cfg = Config {
            db_path: PathBuf::from("/definitely/not/a/dir/relay.redb"),
            grpc_listen_addr: "127.0.0.1:0".parse().unwrap(),
        };
        assert!(cfg.check().is_err());
    }

    #[test]
    fn plain_file_name_is_accepted() {
        let cfg = Config {
            db_path: PathBuf::from("relay.redb"),
            grpc_listen_addr: "127.0.0.1:0".parse().unwrap(),
        };
        assert!(cfg.check().is_ok());
    }
}
