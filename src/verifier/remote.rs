use crate::error::AuthError;
use crate::settings::{RealmSettings, SettingsError};
use crate::token::{fingerprint, TokenInfo, TokenInfoMapper};
use crate::verifier::TokenVerifier;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION, CACHE_CONTROL, PRAGMA, WWW_AUTHENTICATE};
use std::fmt;
use std::net::ToSocketAddrs;
use std::time::Duration;
use tracing::{debug, error, info};
use url::Url;

const DEFAULT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_MAX_IDLE_CONNECTIONS: usize = 200;
// Idle connections are kept this long before the pool drops them.
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Upstream proxy used to reach the IdP.
#[derive(Clone, PartialEq, Eq)]
pub struct ProxySettings {
    pub host: String,
    pub port: u16,
    /// Basic proxy credentials (`Proxy-Authorization: Basic ...`)
    pub credentials: Option<(String, String)>,
}

impl ProxySettings {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            credentials: None,
        }
    }

    #[must_use]
    pub fn basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    #[must_use]
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

// Never print the proxy password.
impl fmt::Debug for ProxySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxySettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("authenticated", &self.credentials.is_some())
            .finish()
    }
}

/// Timeouts, pool size and proxy of the IdP HTTP client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpClientSettings {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub max_idle_connections: usize,
    pub proxy: Option<ProxySettings>,
}

impl Default for HttpClientSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            read_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            write_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            max_idle_connections: DEFAULT_MAX_IDLE_CONNECTIONS,
            proxy: None,
        }
    }
}

impl HttpClientSettings {
    /// Reads the `idp.*` keys.
    ///
    /// `idp.proxy.port` is required once `idp.proxy.host` is set, and
    /// `idp.proxy.password` once `idp.proxy.username` is set.
    pub fn from_settings(settings: &RealmSettings) -> Result<Self, SettingsError> {
        let millis = |key: &str| -> Result<Duration, SettingsError> {
            Ok(Duration::from_millis(
                settings.get_parsed_or(key, DEFAULT_TIMEOUT_MS)?,
            ))
        };

        let proxy = match settings.get("idp.proxy.host") {
            None => None,
            Some(host) => {
                let port: u16 = settings.get_parsed("idp.proxy.port")?.ok_or_else(|| {
                    SettingsError::Missing {
                        key: "idp.proxy.port".to_string(),
                    }
                })?;
                let mut proxy = ProxySettings::new(host, port);
                if let Some(username) = settings.get("idp.proxy.username") {
                    let password = settings.get_required("idp.proxy.password")?;
                    proxy = proxy.basic_auth(username, password);
                }
                Some(proxy)
            }
        };

        Ok(Self {
            connect_timeout: millis("idp.connection-timeout-in-millis")?,
            read_timeout: millis("idp.read-timeout-in-millis")?,
            write_timeout: millis("idp.write-timeout-in-millis")?,
            max_idle_connections: settings
                .get_parsed_or("idp.max-idle-connections", DEFAULT_MAX_IDLE_CONNECTIONS)?,
            proxy,
        })
    }

    /// Whole-request budget once connected: the blocking client has no
    /// per-write timeout, so sending and receiving share one deadline.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.read_timeout + self.write_timeout
    }

    fn build_client(&self) -> reqwest::Result<Client> {
        let mut builder = Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(self.request_timeout())
            .pool_max_idle_per_host(self.max_idle_connections)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT);

        builder = match &self.proxy {
            Some(proxy) => {
                let mut upstream = reqwest::Proxy::all(proxy.url())?;
                if let Some((username, password)) = &proxy.credentials {
                    upstream = upstream.basic_auth(username, password);
                }
                builder.proxy(upstream)
            }
            // Only an explicitly configured proxy is used, never *_PROXY variables.
            None => builder.no_proxy(),
        };
        builder.build()
    }
}

/// Errors building a [`RemoteTokenVerifier`].
#[derive(Debug, thiserror::Error)]
pub enum RemoteVerifierError {
    #[error("invalid token-info url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("cannot build identity provider HTTP client: {0}")]
    Client(#[from] reqwest::Error),
    #[error(transparent)]
    Settings(#[from] SettingsError),
}

/// Verifies tokens against the IdP token-info endpoint.
///
/// One `GET` per call, no retries:
///
/// ```text
/// GET /oauth2/tokeninfo HTTP/1.1
/// Accept: application/json
/// Authorization: Bearer <token>
/// Cache-Control: no-cache
/// Pragma: no-cache
/// ```
///
/// | IdP answer | result |
/// |------------|--------|
/// | 2xx | body decoded by [`TokenInfoMapper`] |
/// | non-2xx with `WWW-Authenticate` | [`AuthError::DelegateChallenge`] |
/// | non-2xx without it | `Ok(None)` |
/// | connect/read failure, timeout | [`AuthError::Transport`] |
pub struct RemoteTokenVerifier {
    token_info_url: Url,
    mapper: TokenInfoMapper,
    client: Client,
    http: HttpClientSettings,
}

impl RemoteTokenVerifier {
    pub fn new(
        token_info_url: &str,
        mapper: TokenInfoMapper,
        http: HttpClientSettings,
    ) -> Result<Self, RemoteVerifierError> {
        let token_info_url = parse_token_info_url(token_info_url)?;
        let client = http.build_client()?;
        let verifier = Self {
            token_info_url,
            mapper,
            client,
            http,
        };
        verifier.log_client_settings();
        Ok(verifier)
    }

    /// Reads `token-info.url`, `token-info.field.*` and `idp.*`.
    pub fn from_settings(settings: &RealmSettings) -> Result<Self, RemoteVerifierError> {
        let url = settings.get_required("token-info.url")?;
        let mapper = TokenInfoMapper::from_settings(settings)?;
        let http = HttpClientSettings::from_settings(settings)?;
        Self::new(url, mapper, http)
    }

    #[must_use]
    pub fn token_info_url(&self) -> &Url {
        &self.token_info_url
    }

    #[must_use]
    pub fn http_settings(&self) -> &HttpClientSettings {
        &self.http
    }

    fn log_client_settings(&self) {
        let resolved = self
            .resolve_host()
            .unwrap_or_else(|| "unresolved at this time".to_string());
        debug!(
            url = %self.token_info_url,
            proxy = ?self.http.proxy,
            connect_timeout_ms = self.http.connect_timeout.as_millis() as u64,
            read_timeout_ms = self.http.read_timeout.as_millis() as u64,
            write_timeout_ms = self.http.write_timeout.as_millis() as u64,
            max_idle_connections = self.http.max_idle_connections,
            resolved = %resolved,
            "token-info HTTP client configured"
        );
    }

    fn resolve_host(&self) -> Option<String> {
        let host = self.token_info_url.host_str()?;
        let port = self.token_info_url.port_or_known_default()?;
        let addrs = (host, port).to_socket_addrs().ok()?;
        let ips: Vec<String> = addrs.map(|a| a.ip().to_string()).collect();
        if ips.is_empty() {
            None
        } else {
            Some(ips.join(","))
        }
    }
}

impl TokenVerifier for RemoteTokenVerifier {
    fn token_info(&self, token: &str) -> Result<Option<TokenInfo>, AuthError> {
        let response = self
            .client
            .get(self.token_info_url.clone())
            .header(ACCEPT, "application/json")
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .header(CACHE_CONTROL, "no-cache")
            .header(PRAGMA, "no-cache")
            .send()
            .map_err(|e| {
                error!(
                    error = %e,
                    timeout = e.is_timeout(),
                    connect = e.is_connect(),
                    "could not authenticate user, could be a connection issue"
                );
                AuthError::transport(e)
            })?;

        let status = response.status();
        if status.is_success() {
            let body = response.bytes().map_err(|e| {
                error!(error = %e, "could not read token info response body");
                AuthError::transport(e)
            })?;
            return self.mapper.decode(&body).map(Some);
        }

        if let Some(challenge) = response.headers().get(WWW_AUTHENTICATE) {
            let challenge = String::from_utf8_lossy(challenge.as_bytes()).into_owned();
            info!(
                status = status.as_u16(),
                token = %fingerprint(token),
                challenge = %challenge,
                "identity provider rejected token"
            );
            return Err(AuthError::DelegateChallenge {
                www_authenticate: challenge,
            });
        }

        debug!(
            status = status.as_u16(),
            token = %fingerprint(token),
            "identity provider does not know token"
        );
        Ok(None)
    }
}

fn parse_token_info_url(raw: &str) -> Result<Url, RemoteVerifierError> {
    let invalid = |reason: String| RemoteVerifierError::InvalidUrl {
        url: raw.to_string(),
        reason,
    };
    let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(invalid(format!("unsupported scheme '{other}'"))),
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host".to_string()));
    }
    Ok(url)
}
