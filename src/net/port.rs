//! Freeing a port held by another process before binding.
//!
//! The default evictor asks `lsof` which processes hold the TCP port and
//! kills them. Callers can plug their own strategy through `PortEvictor`.

use std::io;

use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum EvictError {
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("failed to kill process {pid} holding port {port}")]
    Kill { pid: u32, port: u16 },
}

/// Frees a port so the server can bind it.
pub trait PortEvictor: Send + Sync + 'static {
    fn evict(&self, port: u16) -> BoxFuture<'static, Result<(), EvictError>>;
}

/// Kills every process listening on the port, except this one.
#[derive(Debug, Clone, Copy, Default)]
pub struct KillPort;

impl PortEvictor for KillPort {
    fn evict(&self, port: u16) -> BoxFuture<'static, Result<(), EvictError>> {
        Box::pin(kill_port(port))
    }
}

async fn kill_port(port: u16) -> Result<(), EvictError> {
    let output = Command::new("lsof")
        .arg("-t")
        .arg("-i")
        .arg(format!("tcp:{port}"))
        .output()
        .await
        .map_err(|source| EvictError::Spawn { command: "lsof", source })?;

    // lsof exits non-zero when nothing matches.
    let pids = parse_pids(&String::from_utf8_lossy(&output.stdout));
    let own = std::process::id();

    for pid in pids.into_iter().filter(|pid| *pid != own) {
        tracing::warn!(pid, port, "Killing process holding port");
        let status = Command::new("kill")
            .arg("-9")
            .arg(pid.to_string())
            .status()
            .await
            .map_err(|source| EvictError::Spawn { command: "kill", source })?;
        if !status.success() {
            return Err(EvictError::Kill { pid, port });
        }
    }
    Ok(())
}

fn parse_pids(stdout: &str) -> Vec<u32> {
    stdout
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_lsof_output() {
        assert_eq!(parse_pids("123\n 456 \n\nabc\n"), vec![123, 456]);
        assert!(parse_pids("").is_empty());
    }
}
