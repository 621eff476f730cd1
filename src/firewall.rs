//! Host port probing and firewalld integration.
//!
//! Firewalld is an optional collaborator: when firewall-cmd is missing or
//! the service is not running, every operation degrades to a logged no-op
//! so deploys still succeed on hosts without it.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddrV4, SocketAddrV6, TcpListener};
use std::path::PathBuf;

use tracing::{debug, info};

use crate::context::Ctx;
use crate::daemon::{MONITORING_TYPES, NFS_TYPE};
use crate::error::{Error, Result};
use crate::exec::{call, call_throws};
use crate::hostenv;
use crate::systemd::{self, UnitState};

/// Whether `port` is already bound on the host, checked over both IPv4
/// and IPv6. An unavailable address family does not count as in use.
pub fn port_in_use(port: u16) -> bool {
    info!("Verifying port {} ...", port);
    let v4 = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
    if addr_in_use(TcpListener::bind(v4)) {
        return true;
    }
    let v6 = SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, port, 0, 0);
    addr_in_use(TcpListener::bind(v6))
}

fn addr_in_use(bind: std::io::Result<TcpListener>) -> bool {
    match bind {
        Ok(_) => false,
        Err(e) => e.kind() == std::io::ErrorKind::AddrInUse,
    }
}

pub struct Firewalld {
    cmd: Option<PathBuf>,
    available: bool,
}

impl Firewalld {
    pub async fn new(ctx: &Ctx) -> Self {
        let cmd = hostenv::find_executable("firewall-cmd");
        let available = match cmd {
            Some(_) => {
                let status = systemd::check_unit(ctx, "firewalld.service").await;
                if !status.enabled {
                    debug!("firewalld.service is not enabled");
                    false
                } else if status.state != UnitState::Running {
                    debug!("firewalld.service is not running");
                    false
                } else {
                    info!("firewalld ready");
                    true
                }
            }
            None => {
                debug!("firewalld does not appear to be present");
                false
            }
        };
        Self { cmd, available }
    }

    fn cmd(&self) -> &str {
        // available implies cmd was found
        self.cmd
            .as_deref()
            .and_then(|p| p.to_str())
            .unwrap_or("firewall-cmd")
    }

    /// Enable the named firewalld service for a daemon type, if one maps
    /// to it.
    pub async fn enable_service_for(&self, ctx: &Ctx, daemon_type: &str) -> Result<()> {
        if !self.available {
            debug!(
                "Not possible to enable service for <{}>, firewalld is not available",
                daemon_type
            );
            return Ok(());
        }
        let svc = match daemon_type {
            "mon" => "coral-mon",
            "mgr" | "mds" | "osd" => "coral",
            t if t == NFS_TYPE => "nfs",
            _ => return Ok(()),
        };

        let query = call(
            ctx,
            &[self.cmd(), "--permanent", "--query-service", svc],
            None,
        )
        .await?;
        if query.success() {
            debug!("firewalld service {} is enabled in current zone", svc);
        } else {
            info!("Enabling firewalld service {} in current zone...", svc);
            let res = call(
                ctx,
                &[self.cmd(), "--permanent", "--add-service", svc],
                None,
            )
            .await?;
            if !res.success() {
                return Err(Error::validation(format!(
                    "unable to add service {} to current zone: {}",
                    svc, res.stderr
                )));
            }
        }
        Ok(())
    }

    pub async fn open_ports(&self, ctx: &Ctx, ports: &[u16]) -> Result<()> {
        if !self.available {
            debug!(
                "Not possible to open ports {:?}, firewalld is not available",
                ports
            );
            return Ok(());
        }
        for port in ports {
            let tcp_port = format!("{port}/tcp");
            let query = call(
                ctx,
                &[self.cmd(), "--permanent", "--query-port", &tcp_port],
                None,
            )
            .await?;
            if query.success() {
                debug!("firewalld port {} is enabled in current zone", tcp_port);
                continue;
            }
            info!("Enabling firewalld port {} in current zone...", tcp_port);
            let res = call(
                ctx,
                &[self.cmd(), "--permanent", "--add-port", &tcp_port],
                None,
            )
            .await?;
            if !res.success() {
                return Err(Error::validation(format!(
                    "unable to add port {} to current zone: {}",
                    tcp_port, res.stderr
                )));
            }
        }
        Ok(())
    }

    pub async fn close_ports(&self, ctx: &Ctx, ports: &[u16]) -> Result<()> {
        if !self.available {
            debug!(
                "Not possible to close ports {:?}, firewalld is not available",
                ports
            );
            return Ok(());
        }
        for port in ports {
            let tcp_port = format!("{port}/tcp");
            let query = call(
                ctx,
                &[self.cmd(), "--permanent", "--query-port", &tcp_port],
                None,
            )
            .await?;
            if !query.success() {
                info!("firewalld port {} already closed", tcp_port);
                continue;
            }
            info!("Disabling port {} in current zone...", tcp_port);
            let res = call(
                ctx,
                &[self.cmd(), "--permanent", "--remove-port", &tcp_port],
                None,
            )
            .await?;
            if !res.success() {
                return Err(Error::validation(format!(
                    "unable to remove port {} from current zone: {}",
                    tcp_port, res.stderr
                )));
            }
            info!("Port {} disabled", tcp_port);
        }
        Ok(())
    }

    /// Reload the permanent configuration into the running one.
    pub async fn apply_rules(&self, ctx: &Ctx) -> Result<()> {
        if !self.available {
            return Ok(());
        }
        call_throws(ctx, &[self.cmd(), "--reload"], None).await?;
        Ok(())
    }
}

/// Post-deploy firewall adjustment for one daemon type: enable the
/// matching service and open the type's fixed monitoring ports.
pub async fn update_firewalld(ctx: &Ctx, daemon_type: &str, ports: &[u16]) -> Result<()> {
    let firewall = Firewalld::new(ctx).await;
    firewall.enable_service_for(ctx, daemon_type).await?;
    if MONITORING_TYPES.contains(&daemon_type) {
        firewall.open_ports(ctx, ports).await?;
    }
    firewall.apply_rules(ctx).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_in_use_detects_bound_port() {
        let listener = TcpListener::bind("0.0.0.0:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(port_in_use(port));
        drop(listener);
        assert!(!port_in_use(port));
    }

    #[test]
    fn test_free_port_not_in_use() {
        // bind to pick a free port, then release it
        let port = {
            let listener = TcpListener::bind("0.0.0.0:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        assert!(!port_in_use(port));
    }
}
