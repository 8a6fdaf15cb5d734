// Authenticated vManage REST session.
//
// Wraps `reqwest::Client` with controller-specific login, CSRF token
// propagation, `/dataservice` URL construction and the retry policy shared
// by all verbs. Endpoint knowledge lives in `sastre-core`'s catalog -- this
// module only moves JSON.

use std::time::Duration;

use rand::Rng;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

// Retry policy: 429 responses back off exponentially (1s, 2s, 4s, ... with
// jitter, capped at 60s) for up to 5 attempts; transient transport errors
// back off linearly for up to 3 attempts.
const RATE_LIMIT_MAX_RETRIES: u32 = 5;
const RATE_LIMIT_CAP: Duration = Duration::from_secs(60);
const TRANSIENT_MAX_RETRIES: u32 = 3;
const TRANSIENT_STEP: Duration = Duration::from_secs(1);

/// Authenticated session to a single vManage controller.
///
/// Construction performs the full login handshake; a `Rest` value is always
/// ready to issue requests. All verbs operate on `/dataservice/<path>`.
#[derive(Debug)]
pub struct Rest {
    http: reqwest::Client,
    base_url: Url,
    server_facts: Value,
    csrf_token: Option<String>,
    tenant_session: Option<String>,
}

impl Rest {
    /// Log in to the controller and establish a session.
    ///
    /// Performs form authentication against `/j_security_check` (a
    /// successful login returns an empty body; an HTML body means the
    /// credentials were rejected), retrieves server facts, and captures the
    /// CSRF token when the controller provides one. When `tenant` is given,
    /// a tenant session is established and its `VSessionId` is sent on every
    /// subsequent request.
    pub async fn connect(
        base_url: Url,
        username: &str,
        password: &str,
        tenant: Option<&str>,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let config = if transport.cookie_jar.is_some() {
            transport.clone()
        } else {
            transport.clone().with_cookie_jar()
        };
        let http = config.build_client()?;

        let login_url = base_url.join("j_security_check")?;
        let response = http
            .post(login_url)
            .form(&[("j_username", username), ("j_password", password)])
            .send()
            .await
            .map_err(Error::Transport)?;

        if !response.status().is_success() {
            return Err(Error::Authentication {
                message: format!("login returned HTTP {}", response.status().as_u16()),
            });
        }
        // A failed login bounces back to the login page instead of failing
        // the request.
        let body = response.text().await.map_err(Error::Transport)?;
        if body.contains("<html>") {
            return Err(Error::Authentication {
                message: "login rejected, check credentials".into(),
            });
        }

        let mut session = Self {
            http,
            base_url,
            server_facts: Value::Null,
            csrf_token: None,
            tenant_session: None,
        };

        let facts = session
            .get_json("client/server")
            .await?
            .get("data")
            .cloned()
            .ok_or_else(|| Error::Authentication {
                message: "could not retrieve server information".into(),
            })?;

        // Token mechanism introduced in 19.2; older controllers don't send one.
        session.csrf_token = facts
            .get("CSRFToken")
            .and_then(Value::as_str)
            .map(str::to_owned);
        session.server_facts = facts;

        if let Some(tenant_name) = tenant {
            session.tenant_session = Some(session.tenant_vsession_id(tenant_name).await?);
        }

        debug!(version = session.server_version(), "session established");
        Ok(session)
    }

    /// Best-effort logout. Failures are logged, not surfaced.
    pub async fn logout(&self) {
        let Ok(url) = self.base_url.join("logout?nocache") else {
            return;
        };
        if let Err(e) = self.http.get(url).send().await {
            warn!(error = %e, "logout failed");
        }
    }

    /// The controller base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Controller software version as reported at login.
    pub fn server_version(&self) -> &str {
        self.server_facts
            .get("platformVersion")
            .and_then(Value::as_str)
            .unwrap_or("0.0")
    }

    /// Raw server facts from `client/server`.
    pub fn server_facts(&self) -> &Value {
        &self.server_facts
    }

    // ── Verbs ────────────────────────────────────────────────────────

    pub async fn get_json(&self, path: &str) -> Result<Value, Error> {
        self.request(Method::GET, path, None).await
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> Result<Value, Error> {
        self.request(Method::POST, path, Some(body)).await
    }

    pub async fn put_json(&self, path: &str, body: &Value) -> Result<Value, Error> {
        self.request(Method::PUT, path, Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<(), Error> {
        self.request(Method::DELETE, path, None).await.map(|_| ())
    }

    // ── Request plumbing ─────────────────────────────────────────────

    /// Build a full URL for a `/dataservice` API path.
    fn api_url(&self, path: &str) -> Result<Url, Error> {
        let trimmed = path.trim_start_matches('/');
        Ok(self.base_url.join(&format!("dataservice/{trimmed}"))?)
    }

    /// Issue one request with the shared retry policy, returning the parsed
    /// JSON body (`Value::Null` for empty responses).
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, Error> {
        let url = self.api_url(path)?;
        let method_name = method_label(&method);

        let mut rate_limit_tries: u32 = 0;
        let mut transient_tries: u32 = 0;

        loop {
            let mut builder = self.http.request(method.clone(), url.clone());
            if let Some(token) = &self.csrf_token {
                builder = builder.header("X-XSRF-TOKEN", token);
            }
            if let Some(vsession) = &self.tenant_session {
                builder = builder.header("VSessionId", vsession);
            }
            if let Some(payload) = body {
                builder = builder.json(payload);
            }

            let response = match builder.send().await {
                Ok(response) => response,
                Err(e) if (e.is_connect() || e.is_timeout())
                    && transient_tries < TRANSIENT_MAX_RETRIES =>
                {
                    transient_tries += 1;
                    let delay = TRANSIENT_STEP * transient_tries;
                    warn!(
                        %url, attempt = transient_tries, delay_secs = delay.as_secs(),
                        "transient transport error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                Err(e) => return Err(Error::Transport(e)),
            };

            let status = response.status();
            match status {
                StatusCode::TOO_MANY_REQUESTS => {
                    rate_limit_tries += 1;
                    if rate_limit_tries > RATE_LIMIT_MAX_RETRIES {
                        return Err(Error::RateLimitExhausted {
                            attempts: rate_limit_tries,
                        });
                    }
                    let delay = rate_limit_delay(rate_limit_tries);
                    warn!(
                        %url, attempt = rate_limit_tries, delay_ms = delay.as_millis() as u64,
                        "rate limited by controller, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    return Err(Error::Authentication {
                        message: format!("{method_name} {path} returned {}", status.as_u16()),
                    });
                }
                _ => {}
            }

            let text = response.text().await.map_err(Error::Transport)?;

            if !status.is_success() {
                return Err(Error::Status {
                    status: status.as_u16(),
                    method: method_name,
                    path: path.to_owned(),
                    message: error_message(&text),
                });
            }

            debug!("{method_name} {path}");
            if text.is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_str(&text).map_err(|e| Error::Deserialization {
                message: e.to_string(),
                body: text,
            });
        }
    }

    /// Establish a tenant session, returning its `VSessionId`.
    async fn tenant_vsession_id(&self, tenant_name: &str) -> Result<String, Error> {
        let tenants = self.get_json("tenant").await?;
        let tenant_id = tenants
            .get("data")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .find(|entry| entry.get("name").and_then(Value::as_str) == Some(tenant_name))
            .and_then(|entry| entry.get("tenantId").and_then(Value::as_str))
            .ok_or_else(|| Error::Authentication {
                message: format!("tenant not found: {tenant_name}"),
            })?
            .to_owned();

        let reply = self
            .post_json(&format!("tenant/{tenant_id}/vsessionid"), &Value::Null)
            .await?;
        reply
            .get("VSessionId")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| Error::Authentication {
                message: format!("could not establish tenant session: {tenant_name}"),
            })
    }
}

/// Exponential backoff with jitter for 429 responses: 1s, 2s, 4s, ...
/// capped at 60s, plus up to 500ms of jitter.
fn rate_limit_delay(attempt: u32) -> Duration {
    let base = Duration::from_secs(1 << (attempt - 1).min(6));
    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..500));
    (base + jitter).min(RATE_LIMIT_CAP)
}

fn method_label(method: &Method) -> &'static str {
    match *method {
        Method::GET => "GET",
        Method::POST => "POST",
        Method::PUT => "PUT",
        Method::DELETE => "DELETE",
        _ => "REQUEST",
    }
}

/// Extract the controller's error message from a response body, falling back
/// to the raw text. Error replies look like `{"error": {"message": ...}}`.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")?
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_owned)
        })
        .unwrap_or_else(|| {
            if body.is_empty() {
                "unspecified error".into()
            } else {
                body.chars().take(200).collect()
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_delay_is_capped() {
        for attempt in 1..=10 {
            assert!(rate_limit_delay(attempt) <= RATE_LIMIT_CAP);
        }
    }

    #[test]
    fn rate_limit_delay_grows() {
        // Jitter is below 500ms, so successive base delays (1s apart at
        // minimum) still order correctly.
        assert!(rate_limit_delay(2) > rate_limit_delay(1));
        assert!(rate_limit_delay(3) > rate_limit_delay(2));
    }

    #[test]
    fn error_message_unwraps_envelope() {
        let body = r#"{"error": {"message": "Template is in use", "code": "TMPL0001"}}"#;
        assert_eq!(error_message(body), "Template is in use");
    }

    #[test]
    fn error_message_falls_back_to_raw_text() {
        assert_eq!(error_message("boom"), "boom");
        assert_eq!(error_message(""), "unspecified error");
    }
}
