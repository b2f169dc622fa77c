//! Test daemon management.
//!
//! Spawns dynchand instances with a throwaway config and database.

use redb::{Database, TableDefinition};
use serde_json::Value;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus};
use std::time::Duration;
use tokio::time::sleep;

const MANAGED_CHANNELS: TableDefinition<&str, &[u8]> = TableDefinition::new("managed_channels");

/// A running dynchand instance.
pub struct TestDaemon {
    child: Child,
    port: u16,
    _dir: tempfile::TempDir,
}

/// Write a config file pointing at `bridge_url` and return its path.
pub fn write_config(dir: &std::path::Path, bridge_url: &str, port: u16) -> PathBuf {
    let config_path = dir.join("dynchan.toml");
    let config = format!(
        r#"
[bot]
name = "dynchan-test"

[bridge]
base_url = "{bridge_url}"
timeout_secs = 2

[database]
path = "{db}"

[reconcile]
interval_secs = 1

[http]
listen = "127.0.0.1:{port}"
"#,
        db = dir.join("channels.redb").display(),
    );
    std::fs::write(&config_path, config).expect("write config");
    config_path
}

/// Store flat channel documents the way the daemon persists them.
pub fn seed_records(dir: &std::path::Path, records: &[Value]) -> anyhow::Result<()> {
    let db = Database::create(dir.join("channels.redb"))?;
    let txn = db.begin_write()?;
    {
        let mut table = txn.open_table(MANAGED_CHANNELS)?;
        for record in records {
            let key = format!("{}\0{}", record["tenant_id"], record["resource_id"]);
            table.insert(key.as_str(), serde_json::to_vec(record)?.as_slice())?;
        }
    }
    txn.commit()?;
    Ok(())
}

pub fn binary() -> Command {
    Command::new(env!("CARGO_BIN_EXE_dynchand"))
}

/// Run the daemon with `config_path` to completion.
pub fn run_to_exit(config_path: &std::path::Path) -> ExitStatus {
    binary()
        .arg(config_path)
        .status()
        .expect("run dynchand")
}

impl TestDaemon {
    /// Spawn a daemon against `bridge_url` with pre-seeded channel records.
    pub async fn spawn(bridge_url: &str, records: &[Value]) -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        let port = super::free_port();
        let config_path = write_config(dir.path(), bridge_url, port);
        seed_records(dir.path(), records)?;

        let child = binary().arg(&config_path).spawn()?;
        let daemon = Self {
            child,
            port,
            _dir: dir,
        };
        daemon.wait_until_ready().await?;
        Ok(daemon)
    }

    /// Wait until the daemon is accepting connections.
    async fn wait_until_ready(&self) -> anyhow::Result<()> {
        for _ in 0..50 {
            if tokio::net::TcpStream::connect(("127.0.0.1", self.port))
                .await
                .is_ok()
            {
                return Ok(());
            }
            sleep(Duration::from_millis(100)).await;
        }
        anyhow::bail!("Daemon failed to start within 5 seconds")
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }
}

impl Drop for TestDaemon {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
