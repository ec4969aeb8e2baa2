//! Authenticated session client: logs in to a service with a MailerId
//! assertion and replays that session across calls, handling one redirect
//! hop and one re-login on an expired session transparently so callers
//! never see the login handshake.

use std::{future::Future, pin::Pin, sync::Mutex};

use serde::{Deserialize, Serialize};
use trc::{AddContext, IntoErr};

use crate::signer::MailerIdSigner;

const SESSION_HEADER: &str = "X-Session-Id";

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: &'static str,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub redirected_to: Option<String>,
}

impl HttpResponse {
    fn needs_auth(&self) -> bool {
        self.status == 401
    }
}

/// The HTTP transport contract: implementations live outside this crate (a
/// `reqwest`-backed client in production, an in-memory fake in tests).
pub trait HttpClient: Send + Sync {
    fn send<'a>(
        &'a self,
        req: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = trc::Result<HttpResponse>> + Send + 'a>>;
}

#[derive(Debug, Serialize)]
struct StartSessionReq {
    #[serde(rename = "userId")]
    user_id: String,
    #[serde(rename = "kid", skip_serializing_if = "Option::is_none")]
    kid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StartSessionResp {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
    #[serde(rename = "redirect")]
    redirect: Option<String>,
}

struct SessionState {
    session_id: Option<String>,
}

/// One authenticated session against a single service base URL. Reusable
/// across many calls; re-logs in at most once per call when the service
/// reports the session has lapsed.
pub struct AuthenticatedSessionClient<C: HttpClient> {
    base_url: String,
    relying_party: String,
    mailerid_domain: String,
    max_assertion_validity_secs: i64,
    http: C,
    signer: MailerIdSigner,
    state: Mutex<SessionState>,
}

impl<C: HttpClient> AuthenticatedSessionClient<C> {
    pub fn new(
        base_url: String,
        relying_party: String,
        mailerid_domain: String,
        max_assertion_validity_secs: i64,
        http: C,
        signer: MailerIdSigner,
    ) -> Self {
        AuthenticatedSessionClient {
            base_url,
            relying_party,
            mailerid_domain,
            max_assertion_validity_secs,
            http,
            signer,
            state: Mutex::new(SessionState { session_id: None }),
        }
    }

    /// `start-session` + `authorize-session`: fetches a session id from the
    /// service (following at most one redirect), signs an assertion for it,
    /// and presents the bare signed assertion load back to establish the
    /// session, tracked from then on via the `X-Session-Id` header.
    pub async fn login(&self, now: i64) -> trc::Result<()> {
        let mut url = format!("{}/start-session", self.base_url);
        let body = serde_json::to_vec(&StartSessionReq {
            user_id: self.signer.principal_address()?,
            kid: Some(self.signer.signing_kid()),
        })
        .map_err(|err| {
            trc::EventType::Ipc(trc::IpcEvent::MissingBodyBytes)
                .into_err()
                .reason(err)
        })?;

        let mut followed_redirect = false;
        let session_id = loop {
            let start = self
                .send_once(HttpRequest {
                    method: "POST",
                    url: url.clone(),
                    headers: vec![("content-type".to_string(), "application/json".to_string())],
                    body: body.clone(),
                })
                .await?;
            if start.status != 200 {
                return Err(trc::EventType::Auth(trc::AuthEvent::AuthFailed)
                    .into_err()
                    .details("start-session rejected")
                    .caused_by(trc::location!()));
            }
            let parsed: StartSessionResp = serde_json::from_slice(&start.body).map_err(|err| {
                trc::EventType::Ipc(trc::IpcEvent::MissingBodyBytes)
                    .into_err()
                    .reason(err)
            })?;
            if let Some(session_id) = parsed.session_id {
                break session_id;
            }
            if followed_redirect {
                return Err(trc::EventType::Auth(trc::AuthEvent::AuthFailed)
                    .into_err()
                    .details("start-session redirected more than once")
                    .caused_by(trc::location!()));
            }
            let redirect = parsed.redirect.ok_or_else(|| {
                trc::EventType::Auth(trc::AuthEvent::AuthFailed)
                    .into_err()
                    .details("start-session returned neither sessionId nor redirect")
            })?;
            url = redirect;
            followed_redirect = true;
        };

        let assertion = self.signer.generate_assertion_for(
            &self.relying_party,
            &session_id,
            now,
            self.max_assertion_validity_secs,
        )?;
        let authorize_body = serde_json::to_vec(assertion.signed_load()).map_err(|err| {
            trc::EventType::Ipc(trc::IpcEvent::MissingBodyBytes)
                .into_err()
                .reason(err)
        })?;

        let authorize = self
            .send_once(HttpRequest {
                method: "POST",
                url: format!("{}/authorize-session", self.base_url),
                headers: vec![
                    ("content-type".to_string(), "application/json".to_string()),
                    (SESSION_HEADER.to_string(), session_id.clone()),
                ],
                body: authorize_body,
            })
            .await?;
        if authorize.status != 200 {
            return Err(trc::EventType::Auth(trc::AuthEvent::AuthFailed)
                .into_err()
                .details("authorize-session rejected")
                .caused_by(trc::location!()));
        }

        self.state.lock().unwrap().session_id = Some(session_id);
        Ok(())
    }

    /// Invalidates the session both locally and on the service.
    pub async fn logout(&self) -> trc::Result<()> {
        let session_id = self.state.lock().unwrap().session_id.take();
        if let Some(session_id) = session_id {
            self.send_once(HttpRequest {
                method: "POST",
                url: format!("{}/logout", self.base_url),
                headers: vec![(SESSION_HEADER.to_string(), session_id)],
                body: Vec::new(),
            })
            .await?;
        }
        Ok(())
    }

    /// Sends one request under the current session, logging in first if no
    /// session exists, following one redirect, and re-logging-in and
    /// retrying once if the service reports the session has lapsed.
    pub async fn call(&self, mut req: HttpRequest, now: i64) -> trc::Result<HttpResponse> {
        if self.state.lock().unwrap().session_id.is_none() {
            self.login(now).await?;
        }

        let mut retried_auth = false;
        loop {
            self.attach_session_header(&mut req);
            let mut resp = self.send_once(req.clone()).await?;

            if let Some(location) = resp.redirected_to.take() {
                req.url = location;
                self.attach_session_header(&mut req);
                resp = self.send_once(req.clone()).await?;
            }

            if resp.needs_auth() {
                if retried_auth {
                    return Err(trc::EventType::Auth(trc::AuthEvent::NeedAuth)
                        .into_err()
                        .details("session still rejected after relogin")
                        .caused_by(trc::location!()));
                }
                retried_auth = true;
                self.state.lock().unwrap().session_id = None;
                self.login(now).await?;
                continue;
            }

            return Ok(resp);
        }
    }

    fn attach_session_header(&self, req: &mut HttpRequest) {
        req.headers.retain(|(name, _)| !name.eq_ignore_ascii_case(SESSION_HEADER));
        if let Some(session_id) = self.state.lock().unwrap().session_id.clone() {
            req.headers.push((SESSION_HEADER.to_string(), session_id));
        }
    }

    async fn send_once(&self, req: HttpRequest) -> trc::Result<HttpResponse> {
        self.http
            .send(req)
            .await
            .map_err(|err| err.caused_by(trc::location!()))
    }
}
