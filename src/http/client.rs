//! Connection handling for requests sent to the target
//!
//! A `Client` holds at most one open connection. Probe requests may reuse
//! it; the real request of a stage always opens a fresh one so that the
//! WAF sees it exactly as the test describes. Nothing in here retries:
//! a failure is reported and the caller decides.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::rustls::{
    self,
    client::{ServerCertVerified, ServerCertVerifier},
    Certificate, OwnedTrustAnchor, RootCertStore, ServerName,
};
use tokio_rustls::TlsConnector;

use super::ratelimit::RateLimiter;
use super::{Destination, Protocol, Request, Response};
use crate::common::{Config, Error, Result};

/// Byte stream to the target, plain or TLS
pub trait HttpStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> HttpStream for T {}

/// Connection and pacing settings
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub rate_limit: Option<Duration>,
    pub insecure_tls: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(3),
            read_timeout: Duration::from_secs(1),
            rate_limit: None,
            insecure_tls: true,
        }
    }
}

impl ClientConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            connect_timeout: config.timeouts.connect(),
            read_timeout: config.timeouts.read(),
            rate_limit: config.rate_limit(),
            insecure_tls: config.insecure_tls,
        }
    }
}

struct Connection {
    destination: Destination,
    stream: BufReader<Box<dyn HttpStream>>,
    reusable: bool,
}

/// HTTP client for one run
pub struct Client {
    config: ClientConfig,
    connection: Option<Connection>,
    limiter: Option<RateLimiter>,
    tls: Option<TlsConnector>,
    round_trip: Duration,
    connections_opened: usize,
    requests_sent: usize,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        let limiter = config.rate_limit.map(RateLimiter::new);
        Self {
            config,
            connection: None,
            limiter,
            tls: None,
            round_trip: Duration::ZERO,
            connections_opened: 0,
            requests_sent: 0,
        }
    }

    /// Open a new connection to `destination`, dropping any previous one
    pub async fn connect(&mut self, destination: &Destination) -> Result<()> {
        self.close();

        let stream = self.open_stream(destination).await?;
        self.connections_opened += 1;
        tracing::debug!(%destination, "Connected");

        self.connection = Some(Connection {
            destination: destination.clone(),
            stream: BufReader::new(stream),
            reusable: true,
        });
        Ok(())
    }

    /// Keep the current connection if it points at `destination` and is
    /// still usable, otherwise connect again
    ///
    /// Returns `true` when the existing connection was kept.
    pub async fn connect_or_reuse(&mut self, destination: &Destination) -> Result<bool> {
        if let Some(conn) = &self.connection {
            if conn.reusable && conn.destination == *destination {
                tracing::trace!(%destination, "Reusing connection");
                return Ok(true);
            }
        }
        self.connect(destination).await?;
        Ok(false)
    }

    /// Send a request on the open connection and read the response
    ///
    /// The round-trip time covers writing the request through reading the
    /// last byte of the response; time spent waiting on the rate limiter
    /// is excluded.
    pub async fn send(&mut self, request: &Request) -> Result<Response> {
        if let Some(limiter) = self.limiter.as_mut() {
            limiter.acquire().await;
        }

        let read_timeout = self.config.read_timeout;
        let conn = self.connection.as_mut().ok_or(Error::NotConnected)?;
        let bytes = request.to_bytes(&conn.destination);
        self.requests_sent += 1;

        let started = Instant::now();
        let result = exchange(conn, &bytes, request.is_head(), read_timeout).await;
        self.round_trip = started.elapsed();

        match result {
            Ok(response) => {
                if !response.keep_alive() {
                    conn.reusable = false;
                }
                tracing::debug!(
                    status = response.status,
                    rtt_ms = self.round_trip.as_millis() as u64,
                    "Received response"
                );
                Ok(response)
            }
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    /// Duration of the most recent exchange
    pub fn round_trip_time(&self) -> Duration {
        self.round_trip
    }

    pub fn close(&mut self) {
        if let Some(conn) = self.connection.take() {
            tracing::trace!(destination = %conn.destination, "Closing connection");
        }
    }

    pub fn connections_opened(&self) -> usize {
        self.connections_opened
    }

    pub fn requests_sent(&self) -> usize {
        self.requests_sent
    }

    async fn open_stream(&mut self, destination: &Destination) -> Result<Box<dyn HttpStream>> {
        let timeout = self.config.connect_timeout;
        let tcp = match tokio::time::timeout(timeout, TcpStream::connect(destination.address())).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(Error::ConnectFailed {
                    destination: destination.to_string(),
                    source: e,
                })
            }
            Err(_) => {
                return Err(Error::ConnectTimeout {
                    destination: destination.to_string(),
                    timeout,
                })
            }
        };
        let _ = tcp.set_nodelay(true);

        match destination.protocol {
            Protocol::Http => Ok(Box::new(tcp)),
            Protocol::Https => {
                let connector = self.tls_connector();
                let name = ServerName::try_from(destination.host.as_str())
                    .map_err(|e| Error::Tls(format!("invalid server name '{}': {}", destination.host, e)))?;
                let tls = tokio::time::timeout(timeout, connector.connect(name, tcp))
                    .await
                    .map_err(|_| Error::ConnectTimeout {
                        destination: destination.to_string(),
                        timeout,
                    })?
                    .map_err(|e| Error::Tls(e.to_string()))?;
                Ok(Box::new(tls))
            }
        }
    }

    fn tls_connector(&mut self) -> TlsConnector {
        if let Some(connector) = &self.tls {
            return connector.clone();
        }

        let mut root_store = RootCertStore::empty();
        root_store.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
            OwnedTrustAnchor::from_subject_spki_name_constraints(
                ta.subject,
                ta.spki,
                ta.name_constraints,
            )
        }));

        let mut config = rustls::ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(root_store)
            .with_no_client_auth();
        if self.config.insecure_tls {
            config
                .dangerous()
                .set_certificate_verifier(Arc::new(AcceptAnyCertificate));
        }

        let connector = TlsConnector::from(Arc::new(config));
        self.tls = Some(connector.clone());
        connector
    }
}

async fn exchange(
    conn: &mut Connection,
    bytes: &[u8],
    head_request: bool,
    read_timeout: Duration,
) -> Result<Response> {
    conn.stream.write_all(bytes).await.map_err(Error::Send)?;
    conn.stream.flush().await.map_err(Error::Send)?;

    tokio::time::timeout(read_timeout, Response::read_from(&mut conn.stream, head_request))
        .await
        .map_err(|_| Error::ReadTimeout(read_timeout))?
}

/// Test rigs front the WAF with self-signed certificates
struct AcceptAnyCertificate;

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{Headers, RequestLine};
    use tokio::io::AsyncBufReadExt;
    use tokio::net::TcpListener;

    fn get(uri: &str) -> Request {
        Request::structured(
            RequestLine::new("GET", uri, "HTTP/1.1"),
            Headers::new(),
            Vec::new(),
            true,
        )
    }

    /// Answers every request on a connection with `200 ok` until the peer hangs up
    async fn keep_alive_server() -> (Destination, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(s) => s,
                    Err(_) => return,
                };
                tokio::spawn(async move {
                    let mut stream = tokio::io::BufReader::new(stream);
                    loop {
                        let mut line = String::new();
                        if stream.read_line(&mut line).await.unwrap_or(0) == 0 {
                            return;
                        }
                        if line == "\r\n" {
                            let _ = stream
                                .get_mut()
                                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
                                .await;
                        }
                    }
                });
            }
        });
        (Destination::new("127.0.0.1", port, Protocol::Http), handle)
    }

    #[tokio::test]
    async fn test_send_without_connection_fails() {
        let mut client = Client::new(ClientConfig::default());
        let err = client.send(&get("/")).await.unwrap_err();
        assert!(matches!(err, Error::NotConnected));
        assert_eq!(client.requests_sent(), 0);
    }

    #[tokio::test]
    async fn test_connection_is_reused_for_same_destination() {
        let (dest, _server) = keep_alive_server().await;
        let mut client = Client::new(ClientConfig::default());

        assert!(!client.connect_or_reuse(&dest).await.unwrap());
        let resp = client.send(&get("/status/200")).await.unwrap();
        assert_eq!(resp.status, 200);

        assert!(client.connect_or_reuse(&dest).await.unwrap());
        client.send(&get("/status/200")).await.unwrap();
        assert_eq!(client.connections_opened(), 1);

        client.connect(&dest).await.unwrap();
        assert_eq!(client.connections_opened(), 2);
        assert_eq!(client.requests_sent(), 2);
    }

    #[tokio::test]
    async fn test_connection_refused_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut client = Client::new(ClientConfig::default());
        let err = client
            .connect(&Destination::new("127.0.0.1", port, Protocol::Http))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConnectFailed { .. }));
        assert!(err.is_connectivity_error());
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _server = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let mut client = Client::new(ClientConfig {
            read_timeout: Duration::from_millis(100),
            ..ClientConfig::default()
        });
        client
            .connect(&Destination::new("127.0.0.1", port, Protocol::Http))
            .await
            .unwrap();
        let err = client.send(&get("/")).await.unwrap_err();
        assert!(err.is_timeout());
        assert!(client.round_trip_time() >= Duration::from_millis(100));
    }
}
