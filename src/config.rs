//! CLI arguments and server configuration defaults.

use clap::Parser;
use shadow_rs::formatcp;

use crate::build;
use crate::record::{DEFAULT_BASE_DIRECTORY, DEFAULT_RELATIVE_PATH};

const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_UPLOAD_MAX_SIZE: u64 = 1024 * 1024 * 1024;
pub const DEFAULT_LOCK_WAIT_SECS: u64 = 30;
pub const LOCK_PRUNE_INTERVAL_SECS: u64 = 300;
pub const SHUTDOWN_GRACE_SECS: u64 = 10;

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(
    name = "axo-file-server",
    version = VERSION_INFO,
    about = "Multipart upload and download file server"
)]
pub struct Args {
    #[arg(
        short = 'b',
        long,
        env = "AXO_BIND",
        default_value = "0.0.0.0",
        help = "Bind address for HTTP"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "AXO_HTTP_PORT",
        default_value_t = DEFAULT_HTTP_PORT,
        help = "HTTP port"
    )]
    pub port: u16,
    #[arg(
        long,
        env = "AXO_BASE_DIR",
        default_value = DEFAULT_BASE_DIRECTORY,
        help = "Base directory, relative to the working directory"
    )]
    pub base_dir: String,
    #[arg(
        long,
        env = "AXO_RELATIVE_PATH",
        default_value = DEFAULT_RELATIVE_PATH,
        help = "Subdirectory of the base directory that holds uploaded files"
    )]
    pub relative_path: String,
    #[arg(long, env = "AXO_CORS_ORIGINS", help = "Comma separated CORS origins")]
    pub cors_origins: Option<String>,
    #[arg(
        long,
        env = "AXO_UPLOAD_MAX_SIZE",
        default_value_t = DEFAULT_UPLOAD_MAX_SIZE,
        help = "Max upload request size in bytes (0 to disable)"
    )]
    pub upload_max_size: u64,
    #[arg(
        long,
        env = "AXO_LOCK_WAIT_SECS",
        default_value_t = DEFAULT_LOCK_WAIT_SECS,
        help = "Seconds an upload waits for another write to the same file"
    )]
    pub lock_wait_secs: u64,
    #[arg(
        long,
        env = "AXO_DETACH_WRITES",
        help = "Respond to uploads before the file write has finished"
    )]
    pub detach_writes: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_fixed_layout() {
        let args = Args::try_parse_from(["axo-file-server"]).expect("parse");
        assert_eq!(args.base_dir, "target");
        assert_eq!(args.relative_path, "webflux-file-server");
        assert_eq!(args.port, DEFAULT_HTTP_PORT);
        assert!(!args.detach_writes);
    }

    #[test]
    fn flags_override_defaults() {
        let args = Args::try_parse_from([
            "axo-file-server",
            "-p",
            "9000",
            "--base-dir",
            "/srv/data",
            "--detach-writes",
        ])
        .expect("parse");
        assert_eq!(args.port, 9000);
        assert_eq!(args.base_dir, "/srv/data");
        assert!(args.detach_writes);
    }
}
