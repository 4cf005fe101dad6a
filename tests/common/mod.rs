#![allow(dead_code)]

pub mod mock_idp {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;
    use tiny_http::{Header, Response, Server};

    /// What the stub IdP answers for one request.
    #[derive(Debug, Clone)]
    pub struct Reply {
        pub status: u16,
        pub body: String,
        pub headers: Vec<(String, String)>,
        pub delay: Duration,
    }

    impl Reply {
        pub fn ok(body: impl Into<String>) -> Self {
            Self {
                status: 200,
                body: body.into(),
                headers: vec![("Content-Type".into(), "application/json".into())],
                delay: Duration::ZERO,
            }
        }

        /// A token-info body with the default field names.
        pub fn token_info(user: &str, expires_in: i64, scopes: &[&str]) -> Self {
            Self::ok(
                serde_json::json!({
                    "user_id": user,
                    "expires_in": expires_in,
                    "scope": scopes,
                })
                .to_string(),
            )
        }

        pub fn status(status: u16) -> Self {
            Self {
                status,
                body: String::new(),
                headers: Vec::new(),
                delay: Duration::ZERO,
            }
        }

        pub fn challenge(status: u16, www_authenticate: &str) -> Self {
            Self::status(status).header("WWW-Authenticate", www_authenticate)
        }

        pub fn header(mut self, name: &str, value: &str) -> Self {
            self.headers.push((name.to_string(), value.to_string()));
            self
        }

        pub fn delayed(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    /// A request as seen by the stub IdP.
    #[derive(Debug, Clone)]
    pub struct Recorded {
        pub method: String,
        pub url: String,
        pub headers: Vec<(String, String)>,
    }

    impl Recorded {
        pub fn header(&self, name: &str) -> Option<&str> {
            self.headers
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str())
        }

        pub fn bearer(&self) -> Option<&str> {
            self.header("Authorization")?.strip_prefix("Bearer ")
        }
    }

    type Responder = dyn Fn(&Recorded) -> Reply + Send + Sync;

    /// Token-info endpoint on an ephemeral port; each request is answered on
    /// its own thread so slow replies do not serialize callers.
    pub struct MockIdp {
        server: Arc<Server>,
        addr: std::net::SocketAddr,
        calls: Arc<AtomicUsize>,
        requests: Arc<Mutex<Vec<Recorded>>>,
        acceptor: Option<thread::JoinHandle<()>>,
    }

    impl MockIdp {
        pub fn start(responder: impl Fn(&Recorded) -> Reply + Send + Sync + 'static) -> Self {
            let server = Arc::new(Server::http("127.0.0.1:0").unwrap());
            let addr = server.server_addr().to_ip().unwrap();
            let calls = Arc::new(AtomicUsize::new(0));
            let requests = Arc::new(Mutex::new(Vec::new()));
            let responder: Arc<Responder> = Arc::new(responder);

            let acceptor = {
                let server = Arc::clone(&server);
                let calls = Arc::clone(&calls);
                let requests = Arc::clone(&requests);
                thread::spawn(move || {
                    while let Ok(request) = server.recv() {
                        let recorded = Recorded {
                            method: request.method().to_string(),
                            url: request.url().to_string(),
                            headers: request
                                .headers()
                                .iter()
                                .map(|h| (h.field.to_string(), h.value.to_string()))
                                .collect(),
                        };
                        calls.fetch_add(1, Ordering::SeqCst);
                        requests.lock().unwrap().push(recorded.clone());
                        let responder = Arc::clone(&responder);
                        thread::spawn(move || {
                            let reply = responder(&recorded);
                            if !reply.delay.is_zero() {
                                thread::sleep(reply.delay);
                            }
                            let mut response =
                                Response::from_string(reply.body).with_status_code(reply.status);
                            for (name, value) in &reply.headers {
                                response = response.with_header(
                                    Header::from_bytes(name.as_bytes(), value.as_bytes()).unwrap(),
                                );
                            }
                            let _ = request.respond(response);
                        });
                    }
                })
            };

            Self {
                server,
                addr,
                calls,
                requests,
                acceptor: Some(acceptor),
            }
        }

        /// Same reply for every request.
        pub fn always(reply: Reply) -> Self {
            Self::start(move |_| reply.clone())
        }

        pub fn url(&self) -> String {
            format!("http://{}/oauth2/tokeninfo", self.addr)
        }

        pub fn addr(&self) -> std::net::SocketAddr {
            self.addr
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn requests(&self) -> Vec<Recorded> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl Drop for MockIdp {
        fn drop(&mut self) {
            self.server.unblock();
            if let Some(acceptor) = self.acceptor.take() {
                let _ = acceptor.join();
            }
        }
    }
}

pub mod realm_config {
    use oauth_realm::RealmSettings;
    use std::path::Path;

    /// Settings for a realm talking to `token_info_url`, with its config
    /// directory (and role mapping file) under `conf_dir`.
    pub fn settings(token_info_url: &str, conf_dir: &Path) -> RealmSettings {
        RealmSettings::new()
            .with("name", "oauth1")
            .with("path.conf", conf_dir.display())
            .with("token-info.url", token_info_url)
            .with("token-info.field.user", "user_id")
            .with("token-info.field.expires-in", "expires_in")
            .with("token-info.field.scope", "scope")
            .with("idp.connection-timeout-in-millis", 1000)
            .with("idp.read-timeout-in-millis", 2000)
            .with("idp.write-timeout-in-millis", 1000)
    }

    pub fn write_role_mapping(conf_dir: &Path, content: &str) {
        write_file(&conf_dir.join(oauth_realm::roles::DEFAULT_ROLE_MAPPING_FILE), content);
    }

    /// Write through a temp file and rename, like editors and config
    /// management tools do.
    pub fn write_file(path: &Path, content: &str) {
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, content).unwrap();
        std::fs::rename(&tmp, path).unwrap();
    }
}

pub mod wait {
    use std::thread::sleep;
    use std::time::{Duration, Instant};

    /// Poll `condition` until it holds or `timeout` passes.
    pub fn until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            sleep(Duration::from_millis(25));
        }
        condition()
    }
}
