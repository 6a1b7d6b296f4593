//! Raw tunnels through a candidate proxy
//!
//! Used by protocol detection, where each protocol is exercised with its own handshake.
//! Plain HTTP is checked with an absolute-form forward request since many forward proxies
//! only allow CONNECT to TLS ports.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_socks::tcp::{Socks4Stream, Socks5Stream};
use tracing::{debug, instrument};

use crate::error::{Result, SiftError};
use crate::models::{ProxyAddress, ProxyProtocol};

/// Opens tunnels to a target through a proxy speaking a given protocol
pub struct ProxyTransport;

impl ProxyTransport {
    /// Connect to `target_host:target_port` through `proxy` using `protocol`
    #[instrument(skip(proxy), fields(proxy = %proxy, protocol = protocol.as_str()))]
    pub async fn connect(
        proxy: &ProxyAddress,
        protocol: ProxyProtocol,
        target_host: &str,
        target_port: u16,
    ) -> Result<TcpStream> {
        match protocol {
            ProxyProtocol::Http | ProxyProtocol::Https => {
                Self::connect_http(proxy, target_host, target_port).await
            }
            ProxyProtocol::Socks4 => Self::connect_socks4(proxy, target_host, target_port).await,
            ProxyProtocol::Socks5 => Self::connect_socks5(proxy, target_host, target_port).await,
        }
    }

    /// Establish an HTTP CONNECT tunnel
    async fn connect_http(
        proxy: &ProxyAddress,
        target_host: &str,
        target_port: u16,
    ) -> Result<TcpStream> {
        let mut stream = TcpStream::connect(proxy.endpoint())
            .await
            .map_err(|e| SiftError::ProxyConnectionFailed(format!("TCP connect failed: {}", e)))?;

        let connect_request = Self::build_connect_request(proxy, target_host, target_port);
        stream.write_all(connect_request.as_bytes()).await.map_err(|e| {
            SiftError::ProxyConnectionFailed(format!("Failed to send CONNECT: {}", e))
        })?;

        let status_line = read_status_line(&mut stream).await?;
        if !status_line.starts_with("HTTP/1.1 200") && !status_line.starts_with("HTTP/1.0 200") {
            return Err(SiftError::ProxyConnectionFailed(format!(
                "CONNECT failed: {}",
                status_line
            )));
        }

        debug!("HTTP CONNECT tunnel established");
        Ok(stream)
    }

    fn build_connect_request(proxy: &ProxyAddress, target_host: &str, target_port: u16) -> String {
        let mut request = format!(
            "CONNECT {}:{} HTTP/1.1\r\nHost: {}:{}\r\n",
            target_host, target_port, target_host, target_port
        );

        if let Some(header) = proxy_authorization(proxy) {
            request.push_str(&header);
        }

        request.push_str("\r\n");
        request
    }

    fn build_forward_head_request(proxy: &ProxyAddress, target_host: &str) -> String {
        let mut request = format!(
            "HEAD http://{}/ HTTP/1.1\r\nHost: {}\r\nUser-Agent: sift\r\nConnection: close\r\n",
            target_host, target_host
        );

        if let Some(header) = proxy_authorization(proxy) {
            request.push_str(&header);
        }

        request.push_str("\r\n");
        request
    }

    /// Send `HEAD http://<target_host>/` to `proxy` as a forward request and return the
    /// response status line
    #[instrument(skip(proxy), fields(proxy = %proxy))]
    pub async fn forward_head(proxy: &ProxyAddress, target_host: &str) -> Result<String> {
        let mut stream = TcpStream::connect(proxy.endpoint())
            .await
            .map_err(|e| SiftError::ProxyConnectionFailed(format!("TCP connect failed: {}", e)))?;

        let request = Self::build_forward_head_request(proxy, target_host);
        stream.write_all(request.as_bytes()).await.map_err(|e| {
            SiftError::ProxyConnectionFailed(format!("Failed to send forward request: {}", e))
        })?;

        read_status_line(&mut stream).await
    }

    /// SOCKS4, falling back to SOCKS4a when the target is a hostname
    async fn connect_socks4(
        proxy: &ProxyAddress,
        target_host: &str,
        target_port: u16,
    ) -> Result<TcpStream> {
        let stream = match &proxy.auth {
            Some(auth) => {
                Socks4Stream::connect_with_userid(
                    proxy.endpoint().as_str(),
                    (target_host, target_port),
                    &auth.username,
                )
                .await
            }
            None => Socks4Stream::connect(proxy.endpoint().as_str(), (target_host, target_port)).await,
        }
        .map_err(|e| SiftError::ProxyConnectionFailed(format!("SOCKS4 connect failed: {}", e)))?;

        debug!("SOCKS4 connection established");
        Ok(stream.into_inner())
    }

    async fn connect_socks5(
        proxy: &ProxyAddress,
        target_host: &str,
        target_port: u16,
    ) -> Result<TcpStream> {
        let stream = match &proxy.auth {
            Some(auth) => {
                Socks5Stream::connect_with_password(
                    proxy.endpoint().as_str(),
                    (target_host, target_port),
                    &auth.username,
                    &auth.password,
                )
                .await
            }
            None => Socks5Stream::connect(proxy.endpoint().as_str(), (target_host, target_port)).await,
        }
        .map_err(|e| SiftError::ProxyConnectionFailed(format!("SOCKS5 connect failed: {}", e)))?;

        debug!("SOCKS5 connection established");
        Ok(stream.into_inner())
    }

    /// Issue `HEAD /` over an open tunnel and return the response status line
    pub async fn head(stream: &mut TcpStream, host: &str) -> Result<String> {
        let request = format!(
            "HEAD / HTTP/1.1\r\nHost: {}\r\nUser-Agent: sift\r\nConnection: close\r\n\r\n",
            host
        );
        stream.write_all(request.as_bytes()).await?;
        read_status_line(stream).await
    }
}

fn proxy_authorization(proxy: &ProxyAddress) -> Option<String> {
    proxy.auth.as_ref().map(|auth| {
        let credentials = format!("{}:{}", auth.username, auth.password);
        format!(
            "Proxy-Authorization: Basic {}\r\n",
            BASE64.encode(credentials.as_bytes())
        )
    })
}

async fn read_status_line(stream: &mut TcpStream) -> Result<String> {
    let mut response = vec![0u8; 1024];
    let n = stream.read(&mut response).await.map_err(|e| {
        SiftError::ProxyConnectionFailed(format!("Failed to read response: {}", e))
    })?;

    if n == 0 {
        return Err(SiftError::ProxyConnectionFailed(
            "connection closed before response".into(),
        ));
    }

    let response_str = String::from_utf8_lossy(&response[..n]);
    Ok(response_str.lines().next().unwrap_or_default().trim().to_string())
}
