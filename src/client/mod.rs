use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest::Method;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use crate::identity::{IdentityProvider, ProxyEndpoint};

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Sent with every request so probes look like ordinary page loads.
pub const DEFAULT_HEADERS: &[(&str, &str)] = &[
    ("User-Agent", DEFAULT_USER_AGENT),
    (
        "Accept",
        "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
    ),
    ("Accept-Language", "en-US,en;q=0.9"),
    ("Accept-Encoding", "gzip, deflate, br"),
    ("Connection", "keep-alive"),
    ("Upgrade-Insecure-Requests", "1"),
    ("Sec-Fetch-Mode", "navigate"),
    ("Sec-Fetch-Site", "none"),
    ("Sec-Fetch-User", "?1"),
    ("Sec-Fetch-Dest", "document"),
    ("Sec-GPC", "1"),
];

const MAX_REDIRECTS: usize = 10;

/// Failure classes a probe can end in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ErrorKind {
    #[serde(rename = "ConnectionError")]
    Connection,
    #[serde(rename = "TimeoutError")]
    Timeout,
    #[serde(rename = "ProtocolError")]
    Protocol,
    #[serde(rename = "HTTPStatusError")]
    HttpStatus,
    #[serde(rename = "UnexpectedError")]
    Unexpected,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 5] = [
        ErrorKind::Connection,
        ErrorKind::Timeout,
        ErrorKind::Protocol,
        ErrorKind::HttpStatus,
        ErrorKind::Unexpected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Connection => "ConnectionError",
            ErrorKind::Timeout => "TimeoutError",
            ErrorKind::Protocol => "ProtocolError",
            ErrorKind::HttpStatus => "HTTPStatusError",
            ErrorKind::Unexpected => "UnexpectedError",
        }
    }

    pub fn classify(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            ErrorKind::Timeout
        } else if err.is_connect() {
            ErrorKind::Connection
        } else if err.is_status() {
            ErrorKind::HttpStatus
        } else if err.is_decode() || err.is_body() || err.is_request() || err.is_redirect() {
            ErrorKind::Protocol
        } else {
            ErrorKind::Unexpected
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to build HTTP client: {source}")]
    Build {
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to setup proxy: {proxy}: {source}")]
    ProxySetup {
        proxy: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid header: {name}")]
    InvalidHeader { name: String },

    #[error("{kind} requesting {url}: {source}")]
    Request {
        kind: ErrorKind,
        url: String,
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Request { kind, .. } => *kind,
            _ => ErrorKind::Unexpected,
        }
    }

    /// Requests sent before giving up; zero when nothing went on the wire.
    pub fn attempts(&self) -> u32 {
        match self {
            ClientError::Request { attempts, .. } => *attempts,
            _ => 0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ClientOptions {
    pub timeout: Duration,
    pub retries: u32,
    pub follow_redirects: bool,
    pub random_user_agent: bool,
    pub error_for_status: bool,
    pub headers: Vec<(String, String)>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3),
            retries: 1,
            follow_redirects: false,
            random_user_agent: true,
            error_for_status: false,
            headers: Vec::new(),
        }
    }
}

/// `elapsed` spans every attempt, retries included.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Shared HTTP transport for one scan.
///
/// Holds one pooled connection set for direct traffic and one per proxy, all
/// with the same timeout and redirect policy. Dropping it (see [`Client::close`])
/// releases every pool.
#[derive(Debug)]
pub struct Client {
    direct: reqwest::Client,
    proxied: HashMap<ProxyEndpoint, reqwest::Client>,
    identity: IdentityProvider,
    headers: HeaderMap,
    retries: u32,
    random_user_agent: bool,
    error_for_status: bool,
}

impl Client {
    pub fn new(options: ClientOptions, identity: IdentityProvider) -> Result<Self, ClientError> {
        let mut headers = HeaderMap::new();
        let defaults: Vec<(String, String)> = DEFAULT_HEADERS
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        merge_headers(&mut headers, &defaults)?;
        merge_headers(&mut headers, &options.headers)?;

        let direct = build_http_client(&options, None)?;
        let mut proxied = HashMap::new();
        for endpoint in identity.proxies() {
            let http = build_http_client(&options, Some(endpoint))?;
            proxied.insert(endpoint.clone(), http);
        }

        Ok(Self {
            direct,
            proxied,
            identity,
            headers,
            retries: options.retries,
            random_user_agent: options.random_user_agent,
            error_for_status: options.error_for_status,
        })
    }

    pub async fn get(&self, url: &str) -> Result<Response, ClientError> {
        self.request(Method::GET, url, None).await
    }

    /// Issues one request. Connection failures are retried up to the configured
    /// count; every other failure is returned as is.
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        extra_headers: Option<&HeaderMap>,
    ) -> Result<Response, ClientError> {
        let headers = self.request_headers(extra_headers);
        let (http, proxy) = match self.identity.random_proxy() {
            Some(endpoint) => match self.proxied.get(endpoint) {
                Some(http) => (http, Some(endpoint)),
                None => (&self.direct, None),
            },
            None => (&self.direct, None),
        };

        let started = Instant::now();
        let mut attempt = 0u32;
        loop {
            let sent = http
                .request(method.clone(), url)
                .headers(headers.clone())
                .send()
                .await;
            let err = match sent {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if self.error_for_status {
                        if let Err(e) = resp.error_for_status() {
                            return Err(ClientError::Request {
                                kind: ErrorKind::classify(&e),
                                url: url.to_string(),
                                attempts: attempt + 1,
                                source: e,
                            });
                        }
                    }
                    return Ok(Response {
                        status,
                        attempts: attempt + 1,
                        elapsed: started.elapsed(),
                    });
                }
                Err(e) => e,
            };

            let kind = ErrorKind::classify(&err);
            if kind == ErrorKind::Connection && attempt < self.retries {
                attempt += 1;
                debug!(
                    url,
                    attempt,
                    proxy = %proxy.map(|p| p.url()).unwrap_or_default(),
                    "retrying after connection failure"
                );
                continue;
            }
            return Err(ClientError::Request {
                kind,
                url: url.to_string(),
                attempts: attempt + 1,
                source: err,
            });
        }
    }

    /// Defaults, then configured headers, then per-call headers; the user agent
    /// is replaced last when rotation is on.
    pub(crate) fn request_headers(&self, extra_headers: Option<&HeaderMap>) -> HeaderMap {
        let mut headers = self.headers.clone();
        if let Some(extra) = extra_headers {
            for (k, v) in extra.iter() {
                headers.insert(k.clone(), v.clone());
            }
        }
        if self.random_user_agent {
            if let Ok(ua) = HeaderValue::from_str(self.identity.random_user_agent()) {
                headers.insert(USER_AGENT, ua);
            }
        }
        headers
    }

    /// Releases every connection pool held by this client.
    pub fn close(self) {
        debug!(proxies = self.proxied.len(), "closing transport");
        drop(self);
    }
}

fn merge_headers(headers: &mut HeaderMap, extra: &[(String, String)]) -> Result<(), ClientError> {
    for (k, v) in extra {
        let key = HeaderName::from_str(k.trim()).map_err(|_| ClientError::InvalidHeader {
            name: k.clone(),
        })?;
        let value = HeaderValue::from_str(v.trim()).map_err(|_| ClientError::InvalidHeader {
            name: k.clone(),
        })?;
        headers.insert(key, value);
    }
    Ok(())
}

fn build_proxy(endpoint: &ProxyEndpoint) -> Result<reqwest::Proxy, reqwest::Error> {
    if endpoint.scheme.starts_with("socks") {
        // socks credentials only travel inside the proxy URL
        let url = match (&endpoint.username, &endpoint.password) {
            (Some(user), Some(pass)) => format!(
                "{}://{}:{}@{}:{}",
                endpoint.scheme, user, pass, endpoint.host, endpoint.port
            ),
            (Some(user), None) => format!(
                "{}://{}@{}:{}",
                endpoint.scheme, user, endpoint.host, endpoint.port
            ),
            _ => endpoint.url(),
        };
        return reqwest::Proxy::all(url);
    }
    let proxy = reqwest::Proxy::all(endpoint.url())?;
    Ok(match &endpoint.username {
        Some(user) => proxy.basic_auth(user, endpoint.password.as_deref().unwrap_or_default()),
        None => proxy,
    })
}

fn build_http_client(
    options: &ClientOptions,
    proxy: Option<&ProxyEndpoint>,
) -> Result<reqwest::Client, ClientError> {
    let redirect_policy = if options.follow_redirects {
        reqwest::redirect::Policy::limited(MAX_REDIRECTS)
    } else {
        reqwest::redirect::Policy::none()
    };

    let mut builder = reqwest::Client::builder()
        .redirect(redirect_policy)
        .timeout(options.timeout)
        .danger_accept_invalid_hostnames(true)
        .danger_accept_invalid_certs(true);

    builder = match proxy {
        Some(endpoint) => {
            let proxy = build_proxy(endpoint).map_err(|e| ClientError::ProxySetup {
                proxy: endpoint.url(),
                source: e,
            })?;
            builder.proxy(proxy)
        }
        None => builder.no_proxy(),
    };

    builder
        .build()
        .map_err(|e| ClientError::Build { source: e })
}
