use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::utils::POSTED_TODAY;

/// Routable coordinates of one career site on the job-board platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteCoordinates {
    pub routing_host: String,
    pub tenant: String,
    pub site_id: String,
}

impl SiteCoordinates {
    /// Root of the platform's internal API for this site. `origin` replaces
    /// `https://<routing_host>` when set.
    pub fn api_root(&self, origin: Option<&str>) -> String {
        let origin = match origin {
            Some(o) => o.trim_end_matches('/').to_string(),
            None => format!("https://{}", self.routing_host),
        };
        format!("{}/wday/cxs/{}/{}", origin, self.tenant, self.site_id)
    }

    pub fn listings_url(&self, origin: Option<&str>) -> String {
        format!("{}/jobs", self.api_root(origin))
    }

    pub fn detail_url(&self, origin: Option<&str>, external_path: &str) -> String {
        format!(
            "{}/{}",
            self.api_root(origin),
            external_path.trim_start_matches('/')
        )
    }
}

impl Display for SiteCoordinates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.tenant, self.site_id)
    }
}

/// Missing keys and explicit `null`s both read as the type's default.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingStub {
    #[serde(default, deserialize_with = "null_as_default")]
    pub external_path: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(rename = "postedOn", default, deserialize_with = "null_as_default")]
    pub posted_label: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub locations_text: String,
}

impl ListingStub {
    pub fn is_posted_today(&self) -> bool {
        self.posted_label == POSTED_TODAY
    }
}

/// One page of the discovery endpoint. Postings stay raw so that one
/// malformed item costs only itself, not the page.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingPage {
    #[serde(default)]
    pub total: Option<usize>,
    #[serde(default)]
    pub job_postings: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountryInfo {
    #[serde(default)]
    pub alpha2_code: Option<String>,
    #[serde(default)]
    pub descriptor: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequisitionLocation {
    #[serde(default)]
    pub country: Option<CountryInfo>,
    #[serde(default)]
    pub descriptor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailResponse {
    #[serde(default)]
    pub job_posting_info: Option<JobPostingInfo>,
}

/// The `jobPostingInfo` payload of the detail endpoint. Every field is
/// optional, the platform omits whatever a tenant did not fill in.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPostingInfo {
    pub title: Option<String>,
    pub location: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub additional_locations: Vec<String>,
    pub posted_on: Option<String>,
    pub start_date: Option<String>,
    pub country: Option<CountryInfo>,
    pub job_requisition_location: Option<RequisitionLocation>,
    pub job_req_id: Option<String>,
    pub job_posting_id: Option<String>,
    pub job_description: Option<String>,
    pub external_url: Option<String>,
    pub time_type: Option<String>,
}

/// A fully enriched posting, handed once to the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub title: String,
    pub external_path: String,
    pub locations_text: String,
    pub additional_locations: Vec<String>,
    pub posted_label: String,
    pub start_date: Option<String>,
    pub country: Option<CountryInfo>,
    pub requisition_location: Option<RequisitionLocation>,
    pub job_req_id: String,
    pub job_posting_id: String,
    pub jd_text: String,
    pub job_url: String,
    pub time_type: String,
}

impl JobRecord {
    /// Primary location followed by the additional ones, skipping blanks.
    pub fn all_locations(&self) -> Vec<&str> {
        std::iter::once(self.locations_text.as_str())
            .chain(self.additional_locations.iter().map(String::as_str))
            .filter(|l| !l.trim().is_empty())
            .collect()
    }

    pub fn requisition_id(&self) -> &str {
        if self.job_req_id.is_empty() {
            &self.job_posting_id
        } else {
            &self.job_req_id
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employer {
    #[serde(default)]
    pub employer_id: String,
    pub name: String,
    pub career_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceProfile {
    pub text: String,
    #[serde(default)]
    pub skills: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "message", rename_all = "snake_case")]
pub enum EmployerStatus {
    Success,
    InvalidUrl,
    Error(String),
}

impl Display for EmployerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmployerStatus::Success => write!(f, "success"),
            EmployerStatus::InvalidUrl => write!(f, "invalid_url"),
            EmployerStatus::Error(msg) => write!(f, "error: {}", msg),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployerOutcome {
    pub employer_id: String,
    pub employer_name: String,
    pub jobs_found: usize,
    pub jobs_returned: usize,
    pub status: EmployerStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Done,
    Error,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }

    pub(crate) fn as_u8(&self) -> u8 {
        match self {
            RunStatus::Running => 0,
            RunStatus::Done => 1,
            RunStatus::Error => 2,
        }
    }

    pub(crate) fn from_u8(v: u8) -> RunStatus {
        match v {
            1 => RunStatus::Done,
            2 => RunStatus::Error,
            _ => RunStatus::Running,
        }
    }
}

impl Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Done => write!(f, "done"),
            RunStatus::Error => write!(f, "error"),
        }
    }
}

/// Durable summary of a run, written once when the run leaves `running`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedRun {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub total_employers: usize,
    pub jobs_found: usize,
    pub jobs_returned: usize,
    pub errors: Vec<String>,
    pub outcomes: Vec<EmployerOutcome>,
}

impl PersistedRun {
    pub fn started(run_id: &str) -> Self {
        PersistedRun {
            run_id: run_id.into(),
            started_at: Utc::now(),
            finished_at: None,
            status: RunStatus::Running,
            total_employers: 0,
            jobs_found: 0,
            jobs_returned: 0,
            errors: vec![],
            outcomes: vec![],
        }
    }

    /// The error list as stored: a JSON array, or `None` when the run was clean.
    pub fn error_log(&self) -> Option<String> {
        if self.errors.is_empty() {
            return None;
        }
        serde_json::to_string(&self.errors).ok()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedUrlError {
    #[error("could not parse url {0}")]
    Unparseable(String),
    #[error("{0} is not a career site host")]
    ForeignHost(String),
    #[error("host {0} does not match the tenant pattern")]
    TenantPattern(String),
    #[error("no site identifier in the path of {0}")]
    MissingSite(String),
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("http status {status} for {url}")]
    Status { url: String, status: u16 },
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("could not decode response from {url}: {message}")]
    Decode { url: String, message: String },
    #[error("response from {url} has no {key}")]
    MissingPayload { url: String, key: &'static str },
    #[error("gave up on {url} after {attempts} attempts: {cause}")]
    Transient {
        url: String,
        attempts: usize,
        cause: String,
    },
}

impl FetchError {
    /// Rate limiting, server errors and transport failures are worth another try.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::Request { .. } => true,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum EmployerCrawlError {
    #[error("crawl failed: {0}")]
    Crawl(String),
    #[error("scoring failed: {0}")]
    Scoring(String),
    #[error("persistence failed: {0}")]
    Persistence(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunPreconditionError {
    #[error("No employers loaded")]
    NoEmployers,
    #[error("No reference profile configured")]
    NoReferenceProfile,
    #[error("could not load run inputs: {0}")]
    Unavailable(String),
}
