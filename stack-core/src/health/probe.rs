use super::types::{Probe, ProbeResult, ProbeStatus};
use crate::Result;
use std::error::Error as _;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;

/// 可达性探测器，每个探测独立超时
#[derive(Debug, Clone)]
pub struct Prober {
    client: reqwest::Client,
    timeout: Duration,
}

impl Prober {
    pub fn new(timeout: Duration) -> Result<Self> {
        // 3xx 也算成功，不跟随重定向
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn probe(&self, service: &str, probe: &Probe) -> ProbeResult {
        let started = Instant::now();
        let status = match probe {
            Probe::Http(url) => self.probe_http(url).await,
            Probe::Tcp(addr) => self.probe_tcp(addr).await,
        };

        let latency_ms = started.elapsed().as_millis() as u64;
        tracing::debug!(
            "探测 {} ({}): {} [{}ms]",
            service,
            probe.target(),
            status.describe(),
            latency_ms
        );

        ProbeResult {
            service: service.to_string(),
            target: probe.target().to_string(),
            status,
            latency_ms,
        }
    }

    async fn probe_http(&self, url: &str) -> ProbeStatus {
        let request = self.client.get(url).send();
        match tokio::time::timeout(self.timeout, request).await {
            Err(_) => ProbeStatus::Timeout,
            Ok(Ok(response)) => {
                let code = response.status();
                if code.is_success() || code.is_redirection() {
                    ProbeStatus::Reachable {
                        http_status: Some(code.as_u16()),
                    }
                } else {
                    ProbeStatus::BadStatus {
                        http_status: code.as_u16(),
                    }
                }
            }
            Ok(Err(e)) => classify_http_error(&e),
        }
    }

    async fn probe_tcp(&self, addr: &str) -> ProbeStatus {
        match tokio::time::timeout(self.timeout, TcpStream::connect(addr)).await {
            Err(_) => ProbeStatus::Timeout,
            Ok(Ok(_stream)) => ProbeStatus::Reachable { http_status: None },
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => ProbeStatus::Refused,
            Ok(Err(e)) => ProbeStatus::Error {
                message: e.to_string(),
            },
        }
    }
}

/// 区分超时和拒绝连接，便于排查
fn classify_http_error(err: &reqwest::Error) -> ProbeStatus {
    if err.is_timeout() {
        return ProbeStatus::Timeout;
    }

    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            match io.kind() {
                std::io::ErrorKind::ConnectionRefused => return ProbeStatus::Refused,
                std::io::ErrorKind::TimedOut => return ProbeStatus::Timeout,
                _ => {}
            }
        }
        source = cause.source();
    }

    ProbeStatus::Error {
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn prober(ms: u64) -> Prober {
        Prober::new(Duration::from_millis(ms)).unwrap()
    }

    #[tokio::test]
    async fn test_http_success_is_reachable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let probe = Probe::Http(format!("{}/health", server.uri()));
        let result = prober(2000).probe("api", &probe).await;
        assert_eq!(
            result.status,
            ProbeStatus::Reachable {
                http_status: Some(200)
            }
        );
        assert!(result.verdict().is_healthy());
    }

    #[tokio::test]
    async fn test_http_redirect_counts_as_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/login"))
            .mount(&server)
            .await;

        let result = prober(2000)
            .probe("console", &Probe::Http(server.uri()))
            .await;
        assert!(result.status.is_reachable());
    }

    #[tokio::test]
    async fn test_http_server_error_is_bad_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let result = prober(2000)
            .probe("api", &Probe::Http(server.uri()))
            .await;
        assert_eq!(result.status, ProbeStatus::BadStatus { http_status: 503 });
        assert!(!result.verdict().is_healthy());
    }

    #[tokio::test]
    async fn test_http_slow_response_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let result = prober(200).probe("api", &Probe::Http(server.uri())).await;
        assert_eq!(result.status, ProbeStatus::Timeout);
        assert!(result.latency_ms < 2000);
    }

    #[tokio::test]
    async fn test_tcp_open_port_is_reachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let result = prober(1000).probe("mysql", &Probe::Tcp(addr)).await;
        assert_eq!(result.status, ProbeStatus::Reachable { http_status: None });
    }

    #[tokio::test]
    async fn test_closed_port_is_refused_not_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let tcp = prober(1000).probe("redis", &Probe::Tcp(addr.to_string())).await;
        assert_eq!(tcp.status, ProbeStatus::Refused);

        let http = prober(1000)
            .probe("api", &Probe::Http(format!("http://{addr}/health")))
            .await;
        assert!(!http.status.is_reachable());
        assert_ne!(http.status, ProbeStatus::Timeout);
    }
}
