//! SSH tunnel over the system ssh binary.
//!
//! Uses `ssh -L` rather than an in-process SSH library: the system client
//! honors `~/.ssh/config`, talks to ssh-agent, and handles ProxyJump setups
//! that would otherwise need reimplementing. Key material retrieved from the
//! secret store is written to a 0o600 file inside a private temp directory
//! that is removed when the tunnel closes.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use smol::io::{AsyncBufReadExt, BufReader};
use smol::net::{TcpListener, TcpStream};
use smol::process::{Child, Command, Stdio};
use smol::stream::StreamExt;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use super::types::{SshAuth, TunnelSpec};
use crate::error::TunnelError;
use crate::util;

const VERIFY_STEP: Duration = Duration::from_millis(200);
const CONNECT_PROBE_CAP: Duration = Duration::from_secs(1);

/// One live `ssh -L` session plus its transient key material.
pub struct SshTunnel {
    spec: TunnelSpec,
    local_port: u16,
    process: Child,
    workdir: Option<tempfile::TempDir>,
}

impl SshTunnel {
    /// Spawn the ssh client, wait for the forwarded port to accept
    /// connections, and return the live tunnel.
    pub async fn start(spec: TunnelSpec, connect_timeout: Duration) -> Result<Self, TunnelError> {
        let local_port = find_available_port(&spec.local_bind_host).await?;

        let workdir = tempfile::Builder::new()
            .prefix("bastiondb-")
            .tempdir()
            .map_err(TunnelError::Spawn)?;

        let forward_spec = format!(
            "{}:{}:{}:{}",
            spec.local_bind_host, local_port, spec.target_host, spec.target_port
        );

        let mut cmd = Command::new("ssh");
        cmd.kill_on_drop(true);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        cmd.arg("-L").arg(&forward_spec);
        cmd.arg("-N");
        cmd.args(["-o", "ExitOnForwardFailure=yes"]);
        cmd.args(["-o", "BatchMode=yes"]);
        cmd.args(["-o", "StrictHostKeyChecking=accept-new"]);
        cmd.args(["-o", "ServerAliveInterval=15"]);
        cmd.args(["-o", "ServerAliveCountMax=3"]);
        cmd.arg("-o")
            .arg(format!("ConnectTimeout={}", connect_timeout.as_secs().max(1)));

        if spec.bastion_port != 22 {
            cmd.arg("-p").arg(spec.bastion_port.to_string());
        }

        match &spec.auth {
            SshAuth::Agent => {}
            SshAuth::KeyFile(path) => {
                cmd.arg("-i").arg(path);
                cmd.args(["-o", "IdentitiesOnly=yes"]);
            }
            SshAuth::KeyMaterial(pem) => {
                let key_path = workdir.path().join("id_key");
                std::fs::write(&key_path, pem).map_err(TunnelError::Spawn)?;
                #[cfg(unix)]
                {
                    let mut perms = std::fs::metadata(&key_path)
                        .map_err(TunnelError::Spawn)?
                        .permissions();
                    perms.set_mode(0o600);
                    std::fs::set_permissions(&key_path, perms).map_err(TunnelError::Spawn)?;
                }
                cmd.arg("-i").arg(&key_path);
                cmd.args(["-o", "IdentitiesOnly=yes"]);
            }
        }

        cmd.arg(spec.destination());

        tracing::info!(
            "starting tunnel: ssh -L {} -N {}",
            forward_spec,
            spec.destination()
        );

        let mut process = cmd.spawn().map_err(TunnelError::Spawn)?;

        // Collect stderr both for logging and so a failed start can be
        // classified as auth-vs-transient.
        let stderr_log = Arc::new(Mutex::new(Vec::new()));
        if let Some(stderr) = process.stderr.take() {
            let log = Arc::clone(&stderr_log);
            smol::spawn(async move {
                let reader = BufReader::new(stderr);
                let mut lines = reader.lines();
                while let Some(Ok(line)) = lines.next().await {
                    tracing::debug!("ssh stderr: {}", line);
                    if let Ok(mut log) = log.lock() {
                        log.push(line);
                    }
                }
            })
            .detach();
        }

        // Give ssh a moment to fail fast on bad auth before probing the port.
        smol::Timer::after(Duration::from_millis(500)).await;

        if let Ok(Some(status)) = process.try_status() {
            return Err(classify_start_failure(
                &stderr_log,
                format!("ssh exited immediately with {status}"),
            ));
        }

        // Wait for the forwarded port to accept connections.
        let verify_addr = format!("{}:{}", spec.local_bind_host, local_port);
        let deadline = Instant::now() + connect_timeout;
        loop {
            match util::timeout(CONNECT_PROBE_CAP, TcpStream::connect(verify_addr.as_str())).await
            {
                Some(Ok(_)) => break,
                _ if Instant::now() < deadline => {
                    smol::Timer::after(VERIFY_STEP).await;
                }
                Some(Err(e)) => {
                    let _ = process.kill();
                    return Err(classify_start_failure(
                        &stderr_log,
                        format!("local port {local_port} not listening: {e}"),
                    ));
                }
                None => {
                    let _ = process.kill();
                    return Err(TunnelError::Timeout(connect_timeout));
                }
            }
        }

        tracing::info!(
            "tunnel established: {} -> {}:{}",
            verify_addr,
            spec.target_host,
            spec.target_port
        );

        Ok(Self {
            spec,
            local_port,
            process,
            workdir: Some(workdir),
        })
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// The local endpoint database connections should dial.
    pub fn local_addr(&self) -> String {
        format!("{}:{}", self.spec.local_bind_host, self.local_port)
    }

    /// Whether the ssh process is still running.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.process.try_status(), Ok(None))
    }

    /// Terminate the ssh process and delete the key material.
    pub async fn shutdown(&mut self) {
        tracing::debug!("shutting down tunnel to {}", self.spec.destination());

        #[cfg(unix)]
        {
            unsafe {
                libc::kill(self.process.id() as i32, libc::SIGTERM);
            }
            smol::Timer::after(Duration::from_millis(100)).await;
        }

        if self.is_alive() {
            let _ = self.process.kill();
        }
        let _ = self.process.status().await;

        // Dropping the workdir removes the transient key file.
        self.workdir.take();

        tracing::info!("tunnel to {} closed", self.spec.destination());
    }
}

impl Drop for SshTunnel {
    fn drop(&mut self) {
        let _ = self.process.kill();
    }
}

async fn find_available_port(bind_host: &str) -> Result<u16, TunnelError> {
    let listener = TcpListener::bind(format!("{bind_host}:0"))
        .await
        .map_err(|e| TunnelError::Build(format!("failed to reserve local port: {e}")))?;
    let port = listener
        .local_addr()
        .map_err(|e| TunnelError::Build(format!("failed to read local port: {e}")))?
        .port();
    drop(listener);
    Ok(port)
}

fn classify_start_failure(stderr_log: &Mutex<Vec<String>>, context: String) -> TunnelError {
    let lines = stderr_log
        .lock()
        .map(|log| log.join("; "))
        .unwrap_or_default();
    let message = if lines.is_empty() {
        context
    } else {
        format!("{context}: {lines}")
    };
    if is_auth_failure(&message) {
        TunnelError::Auth(message)
    } else {
        TunnelError::Build(message)
    }
}

fn is_auth_failure(message: &str) -> bool {
    let message = message.to_lowercase();
    [
        "permission denied",
        "authentication failed",
        "host key verification failed",
        "no supported authentication",
        "too many authentication failures",
    ]
    .iter()
    .any(|pattern| message.contains(pattern))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_stderr_is_classified_as_auth() {
        let log = Mutex::new(vec![
            "ubuntu@bastion.example: Permission denied (publickey).".to_string(),
        ]);
        let err = classify_start_failure(&log, "ssh exited immediately with exit status: 255".into());
        assert!(matches!(err, TunnelError::Auth(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn network_stderr_is_classified_as_build() {
        let log = Mutex::new(vec![
            "ssh: connect to host bastion.example port 22: Connection refused".to_string(),
        ]);
        let err = classify_start_failure(&log, "ssh exited immediately with exit status: 255".into());
        assert!(matches!(err, TunnelError::Build(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn empty_stderr_falls_back_to_context() {
        let log = Mutex::new(Vec::new());
        let err = classify_start_failure(&log, "local port 43210 not listening: refused".into());
        match err {
            TunnelError::Build(message) => assert!(message.contains("43210")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
