use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDate;
use regex::Regex;

use crate::{
    types::{CountryInfo, JobRecord},
    utils::{parse_start_date, POSTED_TODAY},
};

/// Titles matched when no target titles have been configured.
pub const DEFAULT_JOB_TITLES: &[&str] = &[
    "Machine Learning Engineer",
    "AI Engineer",
    "Applied Machine Learning Engineer",
    "Data Scientist",
    "Applied Data Scientist",
    "Research Scientist in Machine Learning",
    "AI Research Scientist",
    "Machine Learning Researcher",
    "Computer Vision Engineer",
    "NLP Engineer",
    "Generative AI Engineer",
    "LLM Engineer",
    "Deep Learning Engineer",
    "AI Research Engineer",
    "MLOps Engineer",
];

const STOP_WORDS: &[&str] = &[
    "in", "of", "and", "the", "a", "an", "or", "for", "to", "at", "by", "with", "from", "on",
    "is", "as", "sr", "jr", "senior", "junior", "staff", "principal", "lead", "manager",
    "director", "head", "vp", "i", "ii", "iii", "iv", "v", "1", "2", "3", "4", "5",
];

const US_STATES: &[(&str, &str)] = &[
    ("alabama", "AL"), ("alaska", "AK"), ("arizona", "AZ"), ("arkansas", "AR"),
    ("california", "CA"), ("colorado", "CO"), ("connecticut", "CT"), ("delaware", "DE"),
    ("florida", "FL"), ("georgia", "GA"), ("hawaii", "HI"), ("idaho", "ID"),
    ("illinois", "IL"), ("indiana", "IN"), ("iowa", "IA"), ("kansas", "KS"),
    ("kentucky", "KY"), ("louisiana", "LA"), ("maine", "ME"), ("maryland", "MD"),
    ("massachusetts", "MA"), ("michigan", "MI"), ("minnesota", "MN"), ("mississippi", "MS"),
    ("missouri", "MO"), ("montana", "MT"), ("nebraska", "NE"), ("nevada", "NV"),
    ("new hampshire", "NH"), ("new jersey", "NJ"), ("new mexico", "NM"), ("new york", "NY"),
    ("north carolina", "NC"), ("north dakota", "ND"), ("ohio", "OH"), ("oklahoma", "OK"),
    ("oregon", "OR"), ("pennsylvania", "PA"), ("rhode island", "RI"), ("south carolina", "SC"),
    ("south dakota", "SD"), ("tennessee", "TN"), ("texas", "TX"), ("utah", "UT"),
    ("vermont", "VT"), ("virginia", "VA"), ("washington", "WA"), ("west virginia", "WV"),
    ("wisconsin", "WI"), ("wyoming", "WY"), ("district of columbia", "DC"),
];

const US_COUNTRY_KEYWORDS: &[&str] = &[
    "united states",
    "united states of america",
    "usa",
    "u.s.",
    "u.s.a.",
];

const MAJOR_US_CITIES: &[&str] = &[
    "new york", "los angeles", "chicago", "houston", "phoenix", "philadelphia",
    "san antonio", "san diego", "dallas", "san jose", "austin", "jacksonville",
    "san francisco", "seattle", "denver", "boston", "nashville", "atlanta",
    "portland", "las vegas", "miami", "minneapolis", "raleigh", "charlotte",
    "salt lake city", "pittsburgh", "detroit", "st. louis", "tampa",
    "waltham", "redmond", "sunnyvale", "mountain view", "palo alto",
    "cupertino", "menlo park", "santa clara", "irvine", "boulder",
    "arlington", "bellevue", "cambridge", "herndon", "mclean",
];

lazy_static! {
    static ref STATE_CODE: Regex = Regex::new(r"\b[A-Z]{2}\b").unwrap();
}

/// A predicate over enriched jobs, applied after the crawl and before scoring.
pub trait JobFilter: Send + Sync {
    fn name(&self) -> &'static str;
    fn accept(&self, job: &JobRecord) -> bool;
}

/// Exact "Posted Today" label; a missing label falls back to the start date.
pub struct PostedTodayFilter {
    reference_date: NaiveDate,
}

impl PostedTodayFilter {
    pub fn new(reference_date: NaiveDate) -> Self {
        PostedTodayFilter { reference_date }
    }
}

impl JobFilter for PostedTodayFilter {
    fn name(&self) -> &'static str {
        "date"
    }

    fn accept(&self, job: &JobRecord) -> bool {
        if job.posted_label == POSTED_TODAY {
            return true;
        }
        if !job.posted_label.is_empty() {
            return false;
        }
        job.start_date
            .as_deref()
            .and_then(parse_start_date)
            .map_or(false, |d| d == self.reference_date)
    }
}

/// Matches when the job title holds every significant keyword of one target title.
pub struct TitleFilter {
    targets: Vec<HashSet<String>>,
}

impl TitleFilter {
    pub fn new<S: AsRef<str>>(target_titles: &[S]) -> Self {
        TitleFilter {
            targets: target_titles
                .iter()
                .map(|t| keywords(t.as_ref()))
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    pub fn with_defaults() -> Self {
        TitleFilter::new(DEFAULT_JOB_TITLES)
    }
}

fn keywords(title: &str) -> HashSet<String> {
    title
        .to_lowercase()
        .split_whitespace()
        .filter(|w| w.len() > 1 && !STOP_WORDS.iter().any(|s| s == w))
        .map(String::from)
        .collect()
}

impl JobFilter for TitleFilter {
    fn name(&self) -> &'static str {
        "title"
    }

    fn accept(&self, job: &JobRecord) -> bool {
        if job.title.trim().is_empty() {
            return false;
        }
        let job_keywords = keywords(&job.title);
        self.targets.iter().any(|t| t.is_subset(&job_keywords))
    }
}

pub struct UsaFilter;

impl JobFilter for UsaFilter {
    fn name(&self) -> &'static str {
        "location"
    }

    fn accept(&self, job: &JobRecord) -> bool {
        country_guess(job).starts_with("US")
    }
}

fn is_us_country(country: Option<&CountryInfo>) -> bool {
    let c = match country {
        Some(c) => c,
        None => return false,
    };
    if c.alpha2_code
        .as_deref()
        .map_or(false, |a| a.eq_ignore_ascii_case("US"))
    {
        return true;
    }
    c.descriptor.as_deref().map_or(false, |d| {
        let d = d.to_lowercase();
        US_COUNTRY_KEYWORDS.iter().any(|kw| *kw == d)
    })
}

/// Best guess of where a job is: "US", "Remote (unknown country)" or "Non-US".
/// Structured country fields win over location text.
pub fn country_guess(job: &JobRecord) -> &'static str {
    if is_us_country(job.country.as_ref())
        || is_us_country(
            job.requisition_location
                .as_ref()
                .and_then(|r| r.country.as_ref()),
        )
    {
        return "US";
    }

    let locations = job.all_locations().join(" ");
    let text = locations.to_lowercase();

    if US_COUNTRY_KEYWORDS.iter().any(|kw| text.contains(kw)) {
        return "US";
    }
    let state_codes: HashSet<&str> = US_STATES.iter().map(|(_, code)| *code).collect();
    if STATE_CODE
        .find_iter(&locations)
        .any(|m| state_codes.contains(m.as_str()))
    {
        return "US";
    }
    if US_STATES.iter().any(|(name, _)| text.contains(name))
        || MAJOR_US_CITIES.iter().any(|city| text.contains(city))
    {
        return "US";
    }

    if text.contains("remote") {
        return "Remote (unknown country)";
    }
    "Non-US"
}

/// Ordered, short-circuiting set of filters with a per-filter rejection tally.
pub struct FilterChain {
    filters: Vec<Box<dyn JobFilter>>,
}

impl FilterChain {
    pub fn new(filters: Vec<Box<dyn JobFilter>>) -> Self {
        FilterChain { filters }
    }

    /// Date, title and location filters, in that order.
    pub fn standard<S: AsRef<str>>(reference_date: NaiveDate, target_titles: &[S]) -> Self {
        let title = if target_titles.is_empty() {
            TitleFilter::with_defaults()
        } else {
            TitleFilter::new(target_titles)
        };
        FilterChain::new(vec![
            Box::new(PostedTodayFilter::new(reference_date)),
            Box::new(title),
            Box::new(UsaFilter),
        ])
    }

    pub fn apply(&self, jobs: Vec<JobRecord>) -> (Vec<JobRecord>, BTreeMap<&'static str, usize>) {
        let mut rejected: BTreeMap<&'static str, usize> =
            self.filters.iter().map(|f| (f.name(), 0)).collect();
        let mut passed = vec![];

        for job in jobs {
            match self.filters.iter().find(|f| !f.accept(&job)) {
                Some(f) => *rejected.entry(f.name()).or_default() += 1,
                None => passed.push(job),
            }
        }
        (passed, rejected)
    }
}
