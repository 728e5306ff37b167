// VR API client: year listings, tournament detail and tournament events.
//
// The upstream API serializes a one-element collection as a bare object, and
// wraps every detail response in an envelope named after the resource. All of
// that is flattened here so callers only ever see `Vec`s and plain records.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::config::Config;
use crate::model::{parse_vr_date, parse_vr_timestamp, Event, TournamentKind};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure talking to the VR API. Any of these aborts an import run.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request to {path} failed: {source}")]
    Transport {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{path} returned status {status}")]
    Status {
        path: String,
        status: reqwest::StatusCode,
    },

    #[error("failed to parse response from {path}: {message}")]
    Parse { path: String, message: String },

    #[error("response from {path} has no `{key}` envelope")]
    MissingEnvelope { path: String, key: &'static str },
}

// ---------------------------------------------------------------------------
// Arity normalization
// ---------------------------------------------------------------------------

/// A field that upstream sends either as a single object or as an array.
#[derive(Debug, Clone)]
pub enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

// Dispatched on the JSON shape rather than `#[serde(untagged)]`, so a bad
// element reports its own field error instead of "no variant matched".
impl<'de, T: DeserializeOwned> Deserialize<'de> for OneOrMany<T> {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        match Value::deserialize(d)? {
            Value::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, item)| {
                    serde_json::from_value(item)
                        .map_err(|e| D::Error::custom(format!("item {i}: {e}")))
                })
                .collect::<Result<Vec<T>, _>>()
                .map(OneOrMany::Many),
            other => serde_json::from_value(other)
                .map(OneOrMany::One)
                .map_err(D::Error::custom),
        }
    }
}

impl<T> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}

/// Normalize an optional one-or-many field into a sequence. A missing or
/// null field is an empty sequence.
pub fn arrayify<T>(value: Option<OneOrMany<T>>) -> Vec<T> {
    value.map(OneOrMany::into_vec).unwrap_or_default()
}

/// Upstream is inconsistent about quoting numbers.
#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    Str(String),
    Int(i64),
    Float(f64),
}

impl StringOrNumber {
    fn into_string(self) -> String {
        match self {
            StringOrNumber::Str(s) => s,
            StringOrNumber::Int(n) => n.to_string(),
            StringOrNumber::Float(n) => n.to_string(),
        }
    }
}

fn de_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(StringOrNumber::deserialize(d)?.into_string())
}

fn de_opt_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<StringOrNumber>::deserialize(d)?
        .map(StringOrNumber::into_string)
        .filter(|s| !s.trim().is_empty()))
}

fn de_opt_i64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    Ok(match Option::<StringOrNumber>::deserialize(d)? {
        None => None,
        Some(StringOrNumber::Int(n)) => Some(n),
        Some(StringOrNumber::Float(n)) => Some(n as i64),
        Some(StringOrNumber::Str(s)) => s.trim().parse().ok(),
    })
}

// ---------------------------------------------------------------------------
// Wire records
// ---------------------------------------------------------------------------

/// One entry of a year listing.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawSummary")]
pub struct RemoteSummary {
    pub code: String,
    /// `None` when upstream sent a type id we do not import.
    pub kind: Option<TournamentKind>,
    /// The type id as received, kept for logging.
    pub type_id: String,
    pub name: String,
    /// Always present when `kind` is. Entries of unknown kinds are only
    /// skipped, so their timestamp is not required.
    pub last_updated: Option<NaiveDateTime>,
}

#[derive(Deserialize)]
struct RawSummary {
    #[serde(rename = "Code", deserialize_with = "de_string")]
    code: String,
    #[serde(rename = "TypeID", default, deserialize_with = "de_opt_string")]
    type_id: Option<String>,
    #[serde(rename = "Name", default, deserialize_with = "de_opt_string")]
    name: Option<String>,
    #[serde(rename = "LastUpdated", default, deserialize_with = "de_opt_string")]
    last_updated: Option<String>,
}

impl TryFrom<RawSummary> for RemoteSummary {
    type Error = String;

    fn try_from(raw: RawSummary) -> Result<Self, Self::Error> {
        let type_id = raw.type_id.unwrap_or_default();
        let kind = TournamentKind::from_type_id(&type_id);
        let parsed = raw.last_updated.as_deref().and_then(parse_vr_timestamp);
        if kind.is_some() && parsed.is_none() {
            return Err(format!(
                "tournament {}: bad LastUpdated `{}`",
                raw.code,
                raw.last_updated.unwrap_or_default()
            ));
        }
        Ok(Self {
            kind,
            code: raw.code,
            type_id,
            name: raw.name.unwrap_or_default(),
            last_updated: parsed,
        })
    }
}

/// Full tournament detail, with the envelope already removed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawTournament")]
pub struct RemoteTournament {
    pub code: String,
    pub kind: TournamentKind,
    pub name: String,
    pub level: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub city: Option<String>,
    pub last_updated: NaiveDateTime,
    pub organization_name: String,
}

#[derive(Deserialize)]
struct RawTournament {
    #[serde(rename = "Code", deserialize_with = "de_string")]
    code: String,
    #[serde(rename = "TypeID", deserialize_with = "de_string")]
    type_id: String,
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "Level", default, deserialize_with = "de_opt_string")]
    level: Option<String>,
    #[serde(rename = "StartDate", default)]
    start_date: Option<String>,
    #[serde(rename = "EndDate", default)]
    end_date: Option<String>,
    #[serde(rename = "LastUpdated")]
    last_updated: String,
    #[serde(rename = "Venue", default)]
    venue: Option<RawVenue>,
    #[serde(rename = "Organization")]
    organization: RawOrganization,
}

#[derive(Deserialize)]
struct RawVenue {
    #[serde(rename = "City", default, deserialize_with = "de_opt_string")]
    city: Option<String>,
}

#[derive(Deserialize)]
struct RawOrganization {
    #[serde(rename = "Name")]
    name: String,
}

impl TryFrom<RawTournament> for RemoteTournament {
    type Error = String;

    fn try_from(raw: RawTournament) -> Result<Self, Self::Error> {
        let kind = TournamentKind::from_type_id(&raw.type_id)
            .ok_or_else(|| format!("tournament {}: unknown TypeID `{}`", raw.code, raw.type_id))?;
        let last_updated = parse_vr_timestamp(&raw.last_updated).ok_or_else(|| {
            format!(
                "tournament {}: bad LastUpdated `{}`",
                raw.code, raw.last_updated
            )
        })?;
        Ok(Self {
            code: raw.code,
            kind,
            name: raw.name,
            level: raw.level,
            start_date: raw.start_date.as_deref().and_then(parse_vr_date),
            end_date: raw.end_date.as_deref().and_then(parse_vr_date),
            city: raw.venue.and_then(|v| v.city),
            last_updated,
            organization_name: raw.organization.name,
        })
    }
}

/// One event of a tournament.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteEvent {
    #[serde(rename = "Code", deserialize_with = "de_string")]
    pub code: String,
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "GenderID", default, deserialize_with = "de_opt_i64")]
    pub gender_id: Option<i64>,
    #[serde(rename = "GameTypeID", default, deserialize_with = "de_opt_i64")]
    pub game_type_id: Option<i64>,
    #[serde(rename = "Level", default, deserialize_with = "de_opt_string")]
    pub level: Option<String>,
    #[serde(rename = "MinAge", default, deserialize_with = "de_opt_i64")]
    pub min_age: Option<i64>,
    #[serde(rename = "MaxAge", default, deserialize_with = "de_opt_i64")]
    pub max_age: Option<i64>,
}

/// Upstream game type of a singles event.
const SINGLES_GAME_TYPE: i64 = 1;

impl From<RemoteEvent> for Event {
    fn from(remote: RemoteEvent) -> Self {
        Event {
            is_singles: remote.game_type_id == Some(SINGLES_GAME_TYPE),
            code: remote.code,
            name: remote.name,
            gender_id: remote.gender_id,
            level: remote.level,
            min_age: remote.min_age,
            max_age: remote.max_age,
        }
    }
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct YearListing {
    #[serde(rename = "Tournament", default)]
    tournament: Option<OneOrMany<RemoteSummary>>,
}

#[derive(Deserialize)]
struct EventListing {
    #[serde(rename = "TournamentEvent", default)]
    events: Option<OneOrMany<RemoteEvent>>,
}

fn parse_error(path: &str, e: serde_json::Error) -> UpstreamError {
    UpstreamError::Parse {
        path: path.to_string(),
        message: e.to_string(),
    }
}

/// Parse a `Tournament/Year/{year}` body into a flat listing.
pub fn parse_year_listing(path: &str, body: Value) -> Result<Vec<RemoteSummary>, UpstreamError> {
    let listing: YearListing = serde_json::from_value(body).map_err(|e| parse_error(path, e))?;
    Ok(arrayify(listing.tournament))
}

/// Parse a `Tournament/{code}` body, removing the `Tournament` envelope.
pub fn parse_detail(path: &str, body: Value) -> Result<RemoteTournament, UpstreamError> {
    let missing = || UpstreamError::MissingEnvelope {
        path: path.to_string(),
        key: "Tournament",
    };
    let inner = match body {
        Value::Object(mut map) => map.remove("Tournament").ok_or_else(missing)?,
        _ => return Err(missing()),
    };
    let detail: Option<OneOrMany<RemoteTournament>> =
        serde_json::from_value(inner).map_err(|e| parse_error(path, e))?;
    arrayify(detail).into_iter().next().ok_or_else(missing)
}

/// Parse a `Tournament/{code}/Event` body into a flat event list.
pub fn parse_events(path: &str, body: Value) -> Result<Vec<RemoteEvent>, UpstreamError> {
    let listing: EventListing = serde_json::from_value(body).map_err(|e| parse_error(path, e))?;
    Ok(arrayify(listing.events))
}

// ---------------------------------------------------------------------------
// RemoteCatalog
// ---------------------------------------------------------------------------

/// Read access to the upstream tournament catalog.
#[async_trait]
pub trait RemoteCatalog: Send + Sync {
    /// Every tournament listed for a calendar year, in upstream order.
    async fn list_year(&self, year: i32) -> Result<Vec<RemoteSummary>, UpstreamError>;

    /// Full detail of one tournament.
    async fn fetch_detail(&self, code: &str) -> Result<RemoteTournament, UpstreamError>;

    /// The events of one tournament, in upstream order.
    async fn fetch_events(&self, code: &str) -> Result<Vec<RemoteEvent>, UpstreamError>;
}

/// HTTP implementation of [`RemoteCatalog`] against the VR API.
pub struct VrApiClient {
    http: reqwest::Client,
    base_url: String,
    user: Option<String>,
    password: Option<String>,
}

impl VrApiClient {
    pub fn new(
        base_url: &str,
        user: Option<String>,
        password: Option<String>,
        timeout: Duration,
    ) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(UpstreamError::Client)?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            user,
            password,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, UpstreamError> {
        Self::new(
            &config.vrapi.base_url,
            config.credentials.vrapi_user.clone(),
            config.credentials.vrapi_password.clone(),
            Duration::from_secs(config.vrapi.timeout_secs),
        )
    }

    /// GET `path` relative to the base URL and decode the JSON body.
    async fn get_json(&self, path: &str) -> Result<Value, UpstreamError> {
        let url = format!("{}/{}", self.base_url, path);
        debug!(%url, "VR API request");

        let mut request = self.http.get(&url).header("Accept", "application/json");
        if let Some(user) = &self.user {
            request = request.basic_auth(user, self.password.as_ref());
        }

        let transport = |source: reqwest::Error| UpstreamError::Transport {
            path: path.to_string(),
            source,
        };
        let response = request.send().await.map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status {
                path: path.to_string(),
                status,
            });
        }

        let text = response.text().await.map_err(transport)?;
        serde_json::from_str(&text).map_err(|e| parse_error(path, e))
    }
}

#[async_trait]
impl RemoteCatalog for VrApiClient {
    async fn list_year(&self, year: i32) -> Result<Vec<RemoteSummary>, UpstreamError> {
        let path = format!("Tournament/Year/{year}");
        let body = self.get_json(&path).await?;
        parse_year_listing(&path, body)
    }

    async fn fetch_detail(&self, code: &str) -> Result<RemoteTournament, UpstreamError> {
        let path = format!("Tournament/{code}");
        let body = self.get_json(&path).await?;
        parse_detail(&path, body)
    }

    async fn fetch_events(&self, code: &str) -> Result<Vec<RemoteEvent>, UpstreamError> {
        let path = format!("Tournament/{code}/Event");
        let body = self.get_json(&path).await?;
        parse_events(&path, body)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
