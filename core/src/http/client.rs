use log::{debug, warn};
use rand::prelude::IndexedRandom;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest::{redirect, Client, ClientBuilder, Method, Proxy};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{ProbeRequest, ProbeResponse};
use crate::core::throttle::{FixedDelay, RetryPolicyRef};
use crate::core::RunCounters;
use crate::error::{EngineError, ProbeError};
use crate::ScanConfig;

const MAX_REDIRECTS: usize = 10;

/// Client-level settings. Redirect, TLS and proxy choices are fixed once the
/// connection pool is built, so they live here rather than on the harness.
#[derive(Clone)]
pub struct HarnessOptions {
    timeout: Duration,
    follow_redirects: bool,
    insecure: bool,
    proxy: Option<String>,
    headers: Vec<(String, String)>,
    max_body_bytes: usize,
    retry: RetryPolicyRef,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            follow_redirects: true,
            insecure: false,
            proxy: None,
            headers: Vec::new(),
            max_body_bytes: 1024 * 1024,
            retry: Arc::new(FixedDelay::default()),
        }
    }
}

impl HarnessOptions {
    pub fn from_config(config: &ScanConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout),
            follow_redirects: config.follow_redirects,
            insecure: config.insecure,
            proxy: config.proxy_ref().map(str::to_string),
            headers: config.parsed_headers(),
            max_body_bytes: config.max_body_bytes,
            retry: config.retry.policy(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = follow;
        self
    }

    /// Accepts self-signed or otherwise invalid certificates.
    pub fn with_insecure_tls(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicyRef) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_body_bytes(mut self, max: usize) -> Self {
        self.max_body_bytes = max;
        self
    }

    /// Builds one pooled session. Cookies and keep-alive persist for the lifetime
    /// of the returned harness only.
    pub fn build(self, counters: Arc<RunCounters>) -> Result<ProbeHarness, EngineError> {
        let mut builder = ClientBuilder::new()
            .cookie_store(true)
            .danger_accept_invalid_certs(self.insecure)
            .redirect(if self.follow_redirects {
                redirect::Policy::limited(MAX_REDIRECTS)
            } else {
                redirect::Policy::none()
            });

        if self.insecure {
            warn!("TLS certificate verification is disabled for this scan run");
        }

        if let Some(proxy) = &self.proxy {
            let p = Proxy::all(proxy)
                .map_err(|e| EngineError::InvalidConfig(format!("proxy '{}': {}", proxy, e)))?;
            builder = builder.proxy(p);
        }

        let mut default_headers = HeaderMap::new();
        for (key, val) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(key.as_bytes()),
                HeaderValue::from_str(val),
            ) {
                default_headers.insert(name, value);
            } else {
                warn!("Skipping invalid header '{}'", key);
            }
        }
        builder = builder.default_headers(default_headers);

        // Randomized User-Agent pool for fingerprint evasion
        let user_agents = vec![
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
             (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:120.0) \
             Gecko/20100101 Firefox/120.0",
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 13_0) AppleWebKit/605.1.15 \
             (KHTML, like Gecko) Version/17.0 Safari/605.1.15",
        ];

        Ok(ProbeHarness {
            inner: builder.build()?,
            user_agents,
            timeout: self.timeout,
            max_body_bytes: self.max_body_bytes,
            retry: self.retry,
            counters,
        })
    }
}

/// The engine's only point of network I/O. Safe to share across workers.
pub struct ProbeHarness {
    inner: Client,
    user_agents: Vec<&'static str>,
    timeout: Duration,
    max_body_bytes: usize,
    retry: RetryPolicyRef,
    counters: Arc<RunCounters>,
}

impl ProbeHarness {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn counters(&self) -> &Arc<RunCounters> {
        &self.counters
    }

    /// Sends a request, retrying on 429 as the policy allows. Never fails:
    /// transport errors come back as a response carrying `error`.
    pub async fn send(&self, req: &ProbeRequest) -> ProbeResponse {
        let mut attempt = 0;
        loop {
            let mut response = self.send_once(req).await;
            if response.status_code != Some(429) {
                return response;
            }
            attempt += 1;
            match self.retry.delay_for(attempt) {
                Some(delay) => {
                    debug!("429 from {}, retry {} in {:?}", req.url, attempt, delay);
                    tokio::time::sleep(delay).await;
                }
                None => {
                    warn!("{} still rate limiting after {} attempt(s)", req.url, attempt);
                    response.rate_limited = true;
                    return response;
                }
            }
        }
    }

    pub async fn get(&self, url: &url::Url) -> ProbeResponse {
        self.send(&ProbeRequest::get(url.clone())).await
    }

    async fn send_once(&self, req: &ProbeRequest) -> ProbeResponse {
        self.counters.record_request();

        let mut builder = self.inner
            .request(req.method.clone(), req.url.clone())
            .header(USER_AGENT, self.get_random_user_agent())
            .timeout(self.timeout);

        if !req.params.is_empty() {
            builder = if req.method == Method::GET {
                builder.query(&req.params)
            } else {
                builder.form(&req.params)
            };
        }

        let start = Instant::now();
        let mut response = match builder.send().await {
            Ok(resp) => resp,
            Err(e) => {
                let error = ProbeError::from_reqwest(&e, self.timeout);
                let elapsed = if error.is_timeout() { self.timeout } else { start.elapsed() };
                debug!("Request to {} failed: {}", req.url, error);
                return ProbeResponse::failed(req.url.clone(), error, elapsed);
            }
        };

        let status_code = response.status().as_u16();
        let url = response.url().clone();
        let headers = response.headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
            .collect();

        let mut bytes: Vec<u8> = Vec::new();
        let mut truncated = false;
        let mut error = None;
        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    let room = self.max_body_bytes.saturating_sub(bytes.len());
                    if chunk.len() > room {
                        bytes.extend_from_slice(&chunk[..room]);
                        truncated = true;
                        break;
                    }
                    bytes.extend_from_slice(&chunk);
                }
                Ok(None) => break,
                Err(e) => {
                    error = Some(ProbeError::from_reqwest(&e, self.timeout));
                    break;
                }
            }
        }
        let mut elapsed = start.elapsed();
        if matches!(error, Some(ProbeError::Timeout(_))) {
            elapsed = self.timeout;
        }

        let size = bytes.len();
        let (body, decoded) = match String::from_utf8(bytes) {
            Ok(text) => (text, true),
            // The cut landed inside a multi-byte character: drop the partial tail.
            Err(e) if truncated && e.utf8_error().error_len().is_none() => {
                let valid = e.utf8_error().valid_up_to();
                let mut bytes = e.into_bytes();
                bytes.truncate(valid);
                (String::from_utf8_lossy(&bytes).into_owned(), true)
            }
            Err(e) => (String::from_utf8_lossy(e.as_bytes()).into_owned(), false),
        };

        ProbeResponse {
            url,
            status_code: Some(status_code),
            headers,
            body,
            size,
            decoded,
            elapsed,
            truncated,
            rate_limited: false,
            error,
        }
    }

    fn get_random_user_agent(&self) -> &'static str {
        let mut rng = rand::rng();
        *self.user_agents.choose(&mut rng).unwrap_or(&"Mozilla/5.0")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_harness_creation() {
        let counters = Arc::new(RunCounters::default());
        let harness = HarnessOptions::default()
            .with_timeout(Duration::from_secs(3))
            .with_redirects(false)
            .build(counters)
            .unwrap();
        assert_eq!(harness.timeout(), Duration::from_secs(3));
        assert_eq!(harness.counters().snapshot().requests_sent, 0);
    }

    #[test]
    fn test_invalid_proxy_is_config_error() {
        let config = ScanConfig { proxy: "::not a proxy::".into(), ..ScanConfig::default() };
        let result = HarnessOptions::from_config(&config).build(Arc::new(RunCounters::default()));
        assert!(matches!(result, Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn test_config_carries_tls_choice() {
        let config = ScanConfig { insecure: true, ..ScanConfig::default() };
        let options = HarnessOptions::from_config(&config);
        assert!(options.insecure);
        assert!(!HarnessOptions::default().insecure);
    }
}
