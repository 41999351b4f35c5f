use anyhow::{Context, Result, bail};
use log::debug;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::config::{Account, ServiceKeys};

// Bad credentials, invalid session, invalid API key, unauthorized token, suspended key.
const CREDENTIAL_ERROR_CODES: &[i64] = &[4, 9, 10, 14, 26];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    LastFm,
    LibreFm,
}

impl Service {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "lastfm" => Ok(Service::LastFm),
            "librefm" => Ok(Service::LibreFm),
            _ => bail!("Unsupported service: {value}"),
        }
    }

    pub fn base_url(self) -> &'static str {
        match self {
            Service::LastFm => "https://ws.audioscrobbler.com/2.0/",
            Service::LibreFm => "https://libre.fm/2.0/",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Service::LastFm => "Last.fm",
            Service::LibreFm => "Libre.fm",
        }
    }
}

/// One scrobble, already normalized and timestamped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoredReason {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub accepted: bool,
    pub ignored: bool,
    pub ignored_reason: Option<IgnoredReason>,
}

impl SubmitOutcome {
    pub fn accepted() -> Self {
        Self {
            accepted: true,
            ..Self::default()
        }
    }
}

/// Capability to hand one scrobble to the logging service.
pub trait Scrobbler {
    fn submit(&self, submission: &Submission) -> Result<SubmitOutcome>;
}

pub struct ScrobbleClient {
    service: Service,
    api_key: String,
    api_secret: String,
    session_key: String,
    http: Client,
    debug_response: bool,
}

impl ScrobbleClient {
    /// Authenticates with a mobile session before any scrobble is sent.
    pub fn connect(
        service: Service,
        keys: &ServiceKeys,
        account: &Account,
        debug_response: bool,
    ) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("scrobble-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed building HTTP client")?;
        let session_key =
            fetch_mobile_session(&http, service, &keys.api_key, &keys.api_secret, account)?;
        Ok(Self {
            service,
            api_key: keys.api_key.clone(),
            api_secret: keys.api_secret.clone(),
            session_key,
            http,
            debug_response,
        })
    }
}

impl Scrobbler for ScrobbleClient {
    fn submit(&self, submission: &Submission) -> Result<SubmitOutcome> {
        let mut params = vec![
            ("method".to_string(), "track.scrobble".to_string()),
            ("artist".to_string(), submission.artist.clone()),
            ("track".to_string(), submission.title.clone()),
            ("album".to_string(), submission.album.clone()),
            ("timestamp".to_string(), submission.timestamp.to_string()),
            ("api_key".to_string(), self.api_key.clone()),
            ("sk".to_string(), self.session_key.clone()),
        ];
        let api_sig = sign_params(&params, &self.api_secret);
        params.push(("api_sig".to_string(), api_sig));
        params.push(("format".to_string(), "json".to_string()));
        let response = self
            .http
            .post(self.service.base_url())
            .form(&params)
            .send()
            .context("Failed sending scrobble request")?;
        let status = response.status();
        let text = response
            .text()
            .context("Failed reading scrobble response")?;
        if self.debug_response {
            debug!(
                "Scrobble response from {} ({status}): {text}",
                self.service.base_url()
            );
        }
        check_api_error(self.service, &text)
            .with_context(|| format!("Scrobble request returned HTTP {status}"))?;
        parse_scrobble_outcome(&text)
    }
}

fn fetch_mobile_session(
    http: &Client,
    service: Service,
    api_key: &str,
    api_secret: &str,
    account: &Account,
) -> Result<String> {
    let mut params = vec![
        ("method".to_string(), "auth.getMobileSession".to_string()),
        ("username".to_string(), account.username.clone()),
        ("authToken".to_string(), mobile_auth_token(account)),
        ("api_key".to_string(), api_key.to_string()),
    ];
    let api_sig = sign_params(&params, api_secret);
    params.push(("api_sig".to_string(), api_sig));
    params.push(("format".to_string(), "json".to_string()));
    let response = http
        .post(service.base_url())
        .form(&params)
        .send()
        .context("Failed requesting mobile session")?;
    let status = response.status();
    let text = response.text().context("Failed reading session response")?;
    session_key_from_response(service, status, &text)
}

/// Only credential error codes are reported as authentication failures.
fn session_key_from_response(
    service: Service,
    status: StatusCode,
    payload: &str,
) -> Result<String> {
    let json: Value = serde_json::from_str(payload).with_context(|| {
        format!(
            "Failed parsing {} session response (HTTP {status})",
            service.display_name()
        )
    })?;
    if let Some(code) = json
        .get("error")
        .and_then(error_code)
        .filter(|code| CREDENTIAL_ERROR_CODES.contains(code))
    {
        let message = json
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("invalid credentials");
        bail!(
            "Authentication failed: {} API error {code}: {message}",
            service.display_name()
        );
    }
    check_api_error(service, payload)
        .with_context(|| format!("Failed requesting mobile session (HTTP {status})"))?;
    json.get("session")
        .and_then(|session| session.get("key"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .with_context(|| {
            format!(
                "{} session response carried no session key",
                service.display_name()
            )
        })
}

fn error_code(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|code| code.parse().ok()))
}

fn mobile_auth_token(account: &Account) -> String {
    format!(
        "{:x}",
        md5::compute(format!("{}{}", account.username, account.password_md5))
    )
}

fn sign_params(params: &[(String, String)], secret: &str) -> String {
    let mut sorted = params.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    let mut signature = String::new();
    for (key, value) in sorted {
        signature.push_str(&key);
        signature.push_str(&value);
    }
    signature.push_str(secret);
    format!("{:x}", md5::compute(signature))
}

fn check_api_error(service: Service, payload: &str) -> Result<()> {
    let json: Value = serde_json::from_str(payload)
        .with_context(|| format!("Failed parsing {} response", service.display_name()))?;
    if let Some(error) = json.get("error") {
        let message = json
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("API error");
        bail!("{} API error {error}: {message}", service.display_name());
    }
    Ok(())
}

fn parse_scrobble_outcome(payload: &str) -> Result<SubmitOutcome> {
    let parsed: ScrobbleResponse =
        serde_json::from_str(payload).context("Failed parsing scrobble response")?;
    let Some(scrobbles) = parsed.scrobbles else {
        return Ok(SubmitOutcome::default());
    };
    let accepted = scrobbles.attr.as_ref().map_or(0, |attr| attr.accepted);
    let ignored = scrobbles.attr.as_ref().map_or(0, |attr| attr.ignored);
    let ignored_reason = if ignored > 0 {
        scrobbles
            .scrobble
            .as_ref()
            .and_then(ScrobbleEntries::first_ignored_message)
            .map(IgnoredMessageField::to_reason)
    } else {
        None
    };
    Ok(SubmitOutcome {
        accepted: accepted > 0,
        ignored: ignored > 0,
        ignored_reason,
    })
}

#[derive(Debug, Deserialize)]
struct ScrobbleResponse {
    #[serde(default)]
    scrobbles: Option<Scrobbles>,
}

#[derive(Debug, Deserialize)]
struct Scrobbles {
    #[serde(rename = "@attr")]
    #[serde(default)]
    attr: Option<ScrobbleAttr>,
    #[serde(default)]
    scrobble: Option<ScrobbleEntries>,
}

#[derive(Debug, Deserialize)]
struct ScrobbleAttr {
    #[serde(deserialize_with = "deserialize_u32_string_or_number")]
    accepted: u32,
    #[serde(deserialize_with = "deserialize_u32_string_or_number")]
    ignored: u32,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ScrobbleEntries {
    // Structs also deserialize from sequences, so the array form must be tried first.
    Many(Vec<ScrobbleEntry>),
    One(ScrobbleEntry),
}

impl ScrobbleEntries {
    fn first_ignored_message(&self) -> Option<&IgnoredMessageField> {
        match self {
            ScrobbleEntries::Many(entries) => entries
                .first()
                .and_then(|entry| entry.ignored_message.as_ref()),
            ScrobbleEntries::One(entry) => entry.ignored_message.as_ref(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ScrobbleEntry {
    #[serde(rename = "ignoredMessage")]
    #[serde(default)]
    ignored_message: Option<IgnoredMessageField>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IgnoredMessageField {
    Object(IgnoredMessage),
    Text(String),
    Number(u32),
}

impl IgnoredMessageField {
    fn to_reason(&self) -> IgnoredReason {
        let (code, message) = match self {
            IgnoredMessageField::Object(message) => (
                message.code.clone().unwrap_or_else(|| "unknown".to_string()),
                message
                    .text
                    .clone()
                    .unwrap_or_else(|| "Scrobble ignored".to_string()),
            ),
            IgnoredMessageField::Text(text) => ("unknown".to_string(), text.clone()),
            IgnoredMessageField::Number(code) => (code.to_string(), "Scrobble ignored".to_string()),
        };
        IgnoredReason { code, message }
    }
}

#[derive(Debug, Deserialize)]
struct IgnoredMessage {
    #[serde(rename = "#text")]
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

fn deserialize_u32_string_or_number<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrU32 {
        String(String),
        Number(u32),
    }
    match StringOrU32::deserialize(deserializer)? {
        StringOrU32::String(value) => value.parse::<u32>().map_err(serde::de::Error::custom),
        StringOrU32::Number(value) => Ok(value),
    }
}
