//! Port and service fingerprinting
//!
//! TCP connect scan over a fixed list of common ports with short
//! timeouts, followed by a best-effort banner grab. Ports are probed
//! sequentially per host; hosts fan out under the orchestrator's
//! bound.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// Ports probed on every live host.
pub const COMMON_PORTS: &[u16] = &[
    21, 22, 23, 25, 53, 80, 110, 135, 139, 443, 445, 3306, 3389, 5432, 8000, 8080,
];

const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);
const BANNER_TIMEOUT: Duration = Duration::from_secs(1);
const BANNER_MAX_LEN: usize = 50;

/// Well-known service name for a probed port.
pub fn service_name(port: u16) -> &'static str {
    match port {
        21 => "ftp",
        22 => "ssh",
        23 => "telnet",
        25 => "smtp",
        53 => "domain",
        80 => "http",
        110 => "pop3",
        135 => "epmap",
        139 => "netbios-ssn",
        443 => "https",
        445 => "microsoft-ds",
        3306 => "mysql",
        3389 => "ms-wbt-server",
        5432 => "postgresql",
        8000 => "http-alt",
        8080 => "http-proxy",
        _ => "unknown",
    }
}

/// One open port with its service label and optional banner info.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortService {
    pub port: u16,
    pub service: &'static str,
    pub banner: Option<String>,
}

impl PortService {
    /// "port:service" or "port:service (banner-first-line)".
    pub fn label(&self) -> String {
        match &self.banner {
            Some(banner) => format!("{}:{} ({})", self.port, self.service, banner),
            None => format!("{}:{}", self.port, self.service),
        }
    }
}

/// Connect-scan the common ports of one host, sequentially.
pub async fn scan_host(ip: Ipv4Addr) -> Vec<PortService> {
    let mut open = Vec::new();

    for &port in COMMON_PORTS {
        let addr = SocketAddr::new(IpAddr::V4(ip), port);
        match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                let banner = grab_banner(stream, port).await;
                open.push(PortService {
                    port,
                    service: service_name(port),
                    banner,
                });
            }
            _ => {}
        }
    }

    debug!("{}: {} open ports", ip, open.len());
    open
}

/// Read the service banner from a fresh connection. HTTP ports get a
/// HEAD request first; the `Server:` header is preferred over the
/// status line when present.
async fn grab_banner(mut stream: TcpStream, port: u16) -> Option<String> {
    if matches!(port, 80 | 8000 | 8080) {
        let _ = stream.write_all(b"HEAD / HTTP/1.0\r\n\r\n").await;
    }

    let mut buf = [0u8; 1024];
    let n = match tokio::time::timeout(BANNER_TIMEOUT, stream.read(&mut buf)).await {
        Ok(Ok(n)) if n > 0 => n,
        _ => return None,
    };

    let text = String::from_utf8_lossy(&buf[..n]);
    clean_banner(&text)
}

/// Reduce raw banner bytes to a single trimmed line.
fn clean_banner(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    for line in trimmed.lines() {
        if let Some(server) = line.strip_prefix("Server:") {
            return Some(truncate(server.trim()));
        }
    }

    trimmed.lines().next().map(|line| truncate(line.trim()))
}

fn truncate(s: &str) -> String {
    s.chars().take(BANNER_MAX_LEN).collect()
}

/// Coarse OS inference from the open port set.
pub fn infer_os(open_ports: &[u16]) -> &'static str {
    if open_ports.contains(&445) {
        "Windows"
    } else if open_ports.contains(&22) {
        "Linux"
    } else {
        "Unknown"
    }
}

/// Protocols implied by the open port set, as consumed by the risk
/// engine.
pub fn infer_protocols(open_ports: &[u16]) -> Vec<String> {
    let mut protocols = Vec::new();
    for &port in open_ports {
        let proto = match port {
            80 | 8000 | 8080 => "http",
            443 => "https",
            22 => "ssh",
            23 => "telnet",
            445 => "smb",
            21 => "ftp",
            3389 => "rdp",
            _ => continue,
        };
        if !protocols.iter().any(|p| p == proto) {
            protocols.push(proto.to_string());
        }
    }
    protocols
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[test]
    fn test_port_service_label() {
        let plain = PortService {
            port: 22,
            service: "ssh",
            banner: None,
        };
        assert_eq!(plain.label(), "22:ssh");

        let with_banner = PortService {
            port: 22,
            service: "ssh",
            banner: Some("OpenSSH_9.3".to_string()),
        };
        assert_eq!(with_banner.label(), "22:ssh (OpenSSH_9.3)");
    }

    #[test]
    fn test_clean_banner() {
        assert_eq!(
            clean_banner("SSH-2.0-OpenSSH_9.3\r\n"),
            Some("SSH-2.0-OpenSSH_9.3".to_string())
        );
        assert_eq!(
            clean_banner("HTTP/1.0 200 OK\r\nServer: nginx/1.24\r\n\r\n"),
            Some("nginx/1.24".to_string())
        );
        assert_eq!(clean_banner("   \r\n"), None);

        let long = "x".repeat(200);
        assert_eq!(clean_banner(&long).unwrap().len(), BANNER_MAX_LEN);
    }

    #[test]
    fn test_infer_os() {
        assert_eq!(infer_os(&[445, 139]), "Windows");
        assert_eq!(infer_os(&[22, 445]), "Windows");
        assert_eq!(infer_os(&[22, 80]), "Linux");
        assert_eq!(infer_os(&[80, 443]), "Unknown");
        assert_eq!(infer_os(&[]), "Unknown");
    }

    #[test]
    fn test_infer_protocols() {
        let protocols = infer_protocols(&[80, 8080, 22, 23, 445, 9999]);
        assert_eq!(protocols, vec!["http", "ssh", "telnet", "smb"]);
    }

    #[tokio::test]
    async fn test_banner_grab_from_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"SSH-2.0-TestServer\r\n").await.unwrap();
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let banner = grab_banner(stream, addr.port()).await;
        assert_eq!(banner, Some("SSH-2.0-TestServer".to_string()));
    }
}
