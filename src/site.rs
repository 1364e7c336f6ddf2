use regex::Regex;
use reqwest::Url;

use crate::{
    types::{MalformedUrlError, SiteCoordinates},
    utils::PLATFORM_DOMAIN,
};

lazy_static! {
    static ref TENANT_HOST: Regex =
        Regex::new(r"^([^.]+)\.wd\d+\.myworkdayjobs\.com$").unwrap();
    static ref LOCALE_SEGMENT: Regex = Regex::new(r"^[a-z]{2}-[A-Z]{2}$").unwrap();
}

/// Turns a career-site url such as
/// `https://acme.wd5.myworkdayjobs.com/en-US/External?q=ml` into the
/// coordinates the internal API is addressed by.
pub fn resolve(url: &str) -> Result<SiteCoordinates, MalformedUrlError> {
    let u = Url::parse(url.trim()).map_err(|_| MalformedUrlError::Unparseable(url.into()))?;

    let host = match u.host_str() {
        Some(h) if h.contains(PLATFORM_DOMAIN) => h,
        Some(h) => return Err(MalformedUrlError::ForeignHost(h.into())),
        None => return Err(MalformedUrlError::ForeignHost(url.into())),
    };

    let tenant = match TENANT_HOST.captures(host).and_then(|c| c.get(1)) {
        Some(t) => t.as_str(),
        None => return Err(MalformedUrlError::TenantPattern(host.into())),
    };

    let site_id = u
        .path_segments()
        .into_iter()
        .flatten()
        .filter(|s| !s.is_empty())
        .find(|s| !LOCALE_SEGMENT.is_match(s))
        .ok_or_else(|| MalformedUrlError::MissingSite(url.into()))?;

    Ok(SiteCoordinates {
        routing_host: host.into(),
        tenant: tenant.into(),
        site_id: site_id.into(),
    })
}
