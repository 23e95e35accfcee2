//! Port-forward tunnels into the cluster
//!
//! A tunnel is a `kubectl port-forward` running in the background for the
//! duration of a single callback. The local port is fixed by configuration,
//! so two tunnels on one host will collide; the port is checked on both
//! loopback addresses before the forward starts so a collision fails
//! immediately instead of hanging.
//!
//! The forward is not awaited for readiness. Callers must tolerate the first
//! connection attempts failing while kubectl comes up, and can ask the
//! [`TunnelSession`] whether the forward has died in the meantime.

use std::future::Future;
use std::io::ErrorKind as IoErrorKind;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, TcpListener};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::error::{DeployError, Result};
use crate::process::{BackgroundProcess, CommandRunner, ExternalCommand};

type SharedProcess = Arc<Mutex<Option<Box<dyn BackgroundProcess>>>>;

/// Starts port-forwards to cluster services
pub struct TunnelManager {
    runner: Arc<dyn CommandRunner>,
    kubectl: String,
    local_port: u16,
}

impl TunnelManager {
    /// Creates a tunnel manager
    ///
    /// # Arguments
    /// * `runner` - Runner used to start the port-forward
    /// * `kubectl` - kubectl binary
    /// * `local_port` - Fixed local port every tunnel binds
    pub fn new(runner: Arc<dyn CommandRunner>, kubectl: impl Into<String>, local_port: u16) -> Self {
        Self {
            runner,
            kubectl: kubectl.into(),
            local_port,
        }
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Runs `callback` while `service` in `namespace` is forwarded to the local port
    ///
    /// The forward is torn down on every exit path, including a panic inside
    /// the callback or the returned future being dropped. Teardown errors are
    /// logged and never replace the callback's own result, which is returned
    /// unchanged.
    pub async fn with_tunnel<T, F, Fut>(
        &self,
        namespace: &str,
        service: &str,
        remote_port: u16,
        callback: F,
    ) -> Result<T>
    where
        F: FnOnce(TunnelSession) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let guard = self.open(namespace, service, remote_port)?;
        let result = callback(guard.session()).await;
        guard.close();
        result
    }

    fn open(&self, namespace: &str, service: &str, remote_port: u16) -> Result<TunnelGuard> {
        ensure_port_free(self.local_port)?;

        let command = ExternalCommand::new(&self.kubectl)
            .arg("-n")
            .arg(namespace)
            .arg("port-forward")
            .arg(format!("svc/{}", service))
            .arg(format!("{}:{}", self.local_port, remote_port));

        let process = self.runner.spawn(&command).map_err(|e| {
            DeployError::transport(
                format!("failed to forward svc/{} in namespace {}", service, namespace),
                e,
            )
        })?;

        info!(
            "Tunnel open: 127.0.0.1:{} -> svc/{}:{} ({})",
            self.local_port, service, remote_port, namespace
        );

        Ok(TunnelGuard {
            process: Arc::new(Mutex::new(Some(process))),
            local_port: self.local_port,
            target: format!("svc/{}", service),
        })
    }
}

/// Fails if something is already listening on the local port
///
/// kubectl binds both loopback addresses; a host without IPv6 only has the
/// IPv4 one to check.
fn ensure_port_free(port: u16) -> Result<()> {
    for addr in [IpAddr::V4(Ipv4Addr::LOCALHOST), IpAddr::V6(Ipv6Addr::LOCALHOST)] {
        match TcpListener::bind((addr, port)) {
            Ok(listener) => drop(listener),
            Err(e) if addr.is_ipv6() && e.kind() == IoErrorKind::AddrNotAvailable => {
                debug!("IPv6 loopback unavailable, skipping check: {}", e);
            }
            Err(e) => {
                return Err(DeployError::transport(
                    format!("local port {} is unavailable on {}", port, addr),
                    e,
                ));
            }
        }
    }
    Ok(())
}

fn lock(process: &SharedProcess) -> MutexGuard<'_, Option<Box<dyn BackgroundProcess>>> {
    process.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle on a running tunnel, given to the callback
#[derive(Clone)]
pub struct TunnelSession {
    process: SharedProcess,
    local_port: u16,
    target: String,
}

impl TunnelSession {
    /// Local end of the forward
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Fails with a transport error if the forward is no longer running
    pub fn ensure_alive(&self) -> Result<()> {
        let mut process = lock(&self.process);
        let Some(process) = process.as_mut() else {
            return Err(DeployError::transport(
                format!("port-forward to {}", self.target),
                "tunnel already closed",
            ));
        };

        match process.exit_status() {
            Some(status) => Err(DeployError::transport(
                format!("port-forward to {} exited", self.target),
                status,
            )),
            None => Ok(()),
        }
    }
}

/// Owns the background port-forward and terminates it exactly once
struct TunnelGuard {
    process: SharedProcess,
    local_port: u16,
    target: String,
}

impl TunnelGuard {
    fn session(&self) -> TunnelSession {
        TunnelSession {
            process: self.process.clone(),
            local_port: self.local_port,
            target: self.target.clone(),
        }
    }

    fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(mut process) = lock(&self.process).take() else {
            return;
        };

        match process.terminate() {
            Ok(()) => debug!("Tunnel on port {} closed", self.local_port),
            Err(e) => warn!("Failed to stop tunnel on port {}: {}", self.local_port, e),
        }
    }
}

impl Drop for TunnelGuard {
    fn drop(&mut self) {
        self.shutdown();
    }
}
