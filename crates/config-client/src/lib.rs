//! ASMail config client: a MailerId-authenticated REST client over
//! `/param/<name>` for a small closed set of parameters.

use asmail_mailerid::{AuthenticatedSessionClient, HttpClient, HttpRequest};
use trc::{AddContext, IntoErr};

/// The enumerated parameter names the service understands, as a closed
/// Rust enum: a caller cannot ask for a parameter that does not exist, the
/// "unknown parameter names are a programmer error" rule enforced at
/// compile time rather than at the first failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamName {
    InitPubKey,
    AuthSenderPolicy,
    AuthSenderWhitelist,
    AuthSenderBlacklist,
    AuthSenderInvites,
    AnonSenderPolicy,
    AnonSenderInvites,
}

impl ParamName {
    fn path(self) -> &'static str {
        match self {
            ParamName::InitPubKey => "init-pub-key",
            ParamName::AuthSenderPolicy => "auth-sender/policy",
            ParamName::AuthSenderWhitelist => "auth-sender/whitelist",
            ParamName::AuthSenderBlacklist => "auth-sender/blacklist",
            ParamName::AuthSenderInvites => "auth-sender/invites",
            ParamName::AnonSenderPolicy => "anon-sender/policy",
            ParamName::AnonSenderInvites => "anon-sender/invites",
        }
    }
}

pub struct ConfigClient<C: HttpClient> {
    base_url: String,
    session: AuthenticatedSessionClient<C>,
}

impl<C: HttpClient> ConfigClient<C> {
    pub fn new(base_url: String, session: AuthenticatedSessionClient<C>) -> Self {
        ConfigClient { base_url, session }
    }

    /// `GET /param/<name>`: `None` for an absent parameter, `Some(value)`
    /// otherwise.
    pub async fn get(&self, param: ParamName, now: i64) -> trc::Result<Option<serde_json::Value>> {
        let resp = self
            .session
            .call(
                HttpRequest {
                    method: "GET",
                    url: format!("{}/param/{}", self.base_url, param.path()),
                    headers: Vec::new(),
                    body: Vec::new(),
                },
                now,
            )
            .await
            .caused_by(trc::location!())?;

        if resp.status == 404 || resp.body.is_empty() {
            return Ok(None);
        }
        let value: serde_json::Value = serde_json::from_slice(&resp.body).map_err(|err| {
            trc::EventType::Ipc(trc::IpcEvent::MissingBodyBytes)
                .into_err()
                .reason(err)
        })?;
        if value.is_null() {
            return Ok(None);
        }
        Ok(Some(value))
    }

    /// `PUT /param/<name>`: `None` deletes the parameter by writing a JSON
    /// `null` body.
    pub async fn put(
        &self,
        param: ParamName,
        value: Option<serde_json::Value>,
        now: i64,
    ) -> trc::Result<()> {
        let body = serde_json::to_vec(&value.unwrap_or(serde_json::Value::Null)).map_err(|err| {
            trc::EventType::Ipc(trc::IpcEvent::MissingBodyBytes)
                .into_err()
                .reason(err)
        })?;
        let resp = self
            .session
            .call(
                HttpRequest {
                    method: "PUT",
                    url: format!("{}/param/{}", self.base_url, param.path()),
                    headers: vec![("content-type".to_string(), "application/json".to_string())],
                    body,
                },
                now,
            )
            .await
            .caused_by(trc::location!())?;

        if resp.status != 200 && resp.status != 204 {
            return Err(trc::EventType::Network(trc::NetworkEvent::UnexpectedStatus)
                .into_err()
                .details(format!("PUT /param/{} returned {}", param.path(), resp.status)));
        }
        Ok(())
    }
}
