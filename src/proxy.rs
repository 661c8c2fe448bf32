//! Proxy tunneling: SOCKS5 and HTTP CONNECT
//!
//! Both paths hand back a plain `TcpStream` positioned at the first byte of
//! the tunneled connection, ready for the SSH handshake.

use std::net::SocketAddr;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_socks::tcp::Socks5Stream;
use tracing::debug;

use crate::config::{ProxyConfig, ProxyKind};
use crate::error::{Error, Result};

/// Longest HTTP response head accepted from a proxy
const MAX_RESPONSE_HEAD: usize = 8 * 1024;

/// Open a tunnel to `target_host:target_port` through `proxy`.
/// The whole negotiation is bounded by `connect_timeout`.
pub async fn connect(
    proxy: &ProxyConfig,
    target_host: &str,
    target_port: u16,
    connect_timeout: Duration,
) -> Result<TcpStream> {
    debug!(
        kind = ?proxy.kind,
        proxy = %format!("{}:{}", proxy.host, proxy.port),
        target = %format!("{}:{}", target_host, target_port),
        "opening proxy tunnel"
    );

    let tunnel = async {
        let proxy_addr = resolve(&proxy.host, proxy.port).await?;
        match proxy.kind {
            ProxyKind::Socks5 => connect_socks5(proxy_addr, proxy, target_host, target_port).await,
            ProxyKind::Http => connect_http(proxy_addr, proxy, target_host, target_port).await,
        }
    };

    timeout(connect_timeout, tunnel).await.map_err(|_| {
        Error::Proxy(format!(
            "timed out after {}s negotiating with {}:{}",
            connect_timeout.as_secs(),
            proxy.host,
            proxy.port
        ))
    })?
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| Error::Proxy(format!("failed to resolve proxy address {}: {}", host, e)))?
        .next()
        .ok_or_else(|| Error::Proxy(format!("no address found for proxy {}", host)))
}

async fn connect_socks5(
    proxy_addr: SocketAddr,
    proxy: &ProxyConfig,
    target_host: &str,
    target_port: u16,
) -> Result<TcpStream> {
    let target = (target_host, target_port);

    let stream = match proxy.credentials() {
        Some((username, password)) => {
            Socks5Stream::connect_with_password(proxy_addr, target, username, password).await
        }
        None => Socks5Stream::connect(proxy_addr, target).await,
    }
    .map_err(socks_error)?;

    Ok(stream.into_inner())
}

fn socks_error(e: tokio_socks::Error) -> Error {
    match e {
        tokio_socks::Error::NoAcceptableAuthMethods => {
            Error::Proxy("SOCKS5 proxy offered no acceptable authentication method".into())
        }
        tokio_socks::Error::PasswordAuthFailure(code) => {
            Error::Proxy(format!("SOCKS5 proxy rejected the credentials (status {})", code))
        }
        tokio_socks::Error::Io(io) => Error::Proxy(format!("SOCKS5 proxy unreachable: {}", io)),
        other => Error::Proxy(format!("SOCKS5 proxy refused the connection: {}", other)),
    }
}

async fn connect_http(
    proxy_addr: SocketAddr,
    proxy: &ProxyConfig,
    target_host: &str,
    target_port: u16,
) -> Result<TcpStream> {
    let mut stream = TcpStream::connect(proxy_addr)
        .await
        .map_err(|e| Error::Proxy(format!("failed to connect to HTTP proxy: {}", e)))?;

    let request = connect_request(target_host, target_port, proxy.credentials());
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| Error::Proxy(format!("failed to send CONNECT request: {}", e)))?;

    let head = read_response_head(&mut stream).await?;
    let status = parse_status(&head)?;

    match status {
        200..=299 => Ok(stream),
        407 => Err(Error::Proxy("HTTP proxy authentication failed (407)".into())),
        code => {
            debug!(code, "CONNECT rejected");
            Err(Error::Proxy(format!(
                "HTTP proxy refused CONNECT: {}",
                head.lines().next().unwrap_or_default().trim()
            )))
        }
    }
}

fn connect_request(host: &str, port: u16, credentials: Option<(&str, &str)>) -> String {
    let authority = if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    };

    let mut request = format!("CONNECT {0} HTTP/1.1\r\nHost: {0}\r\n", authority);
    if let Some((username, password)) = credentials {
        let token = BASE64.encode(format!("{}:{}", username, password));
        request.push_str(&format!("Proxy-Authorization: Basic {}\r\n", token));
    }
    request.push_str("\r\n");
    request
}

/// Read up to and including the blank line ending the response head,
/// one byte at a time so nothing past it is consumed
async fn read_response_head(stream: &mut TcpStream) -> Result<String> {
    let mut head = Vec::with_capacity(128);

    while !head.ends_with(b"\r\n\r\n") {
        if head.len() >= MAX_RESPONSE_HEAD {
            return Err(Error::Proxy("HTTP proxy response head too large".into()));
        }
        let byte = stream.read_u8().await.map_err(|e| {
            Error::Proxy(format!("HTTP proxy closed the connection during CONNECT: {}", e))
        })?;
        head.push(byte);
    }

    Ok(String::from_utf8_lossy(&head).into_owned())
}

fn parse_status(head: &str) -> Result<u16> {
    let status_line = head.lines().next().unwrap_or_default();
    let mut parts = status_line.split_whitespace();

    match (parts.next(), parts.next()) {
        (Some(version), Some(code)) if version.starts_with("HTTP/") => code
            .parse()
            .map_err(|_| Error::Proxy(format!("malformed HTTP proxy status line: {}", status_line))),
        _ => Err(Error::Proxy(format!("malformed HTTP proxy status line: {}", status_line))),
    }
}
