use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::{
    client::RetryingClient,
    enricher::DetailEnricher,
    pager::ListingPager,
    progress::ProgressSink,
    types::{EmployerCrawlError, JobRecord, SiteCoordinates},
    utils::USER_AGENT,
};

#[derive(Builder, Debug, Clone)]
#[builder(setter(into))]
pub struct CrawlerOptions {
    // postings requested per discovery page
    #[builder(default = "20")]
    pub(crate) page_size: usize,
    // concurrent detail fetches within one employer
    #[builder(default = "5")]
    pub(crate) detail_workers: usize,
    // pause every caller takes between requests
    #[builder(default = "Duration::from_millis(300)")]
    pub(crate) pacing: Duration,
    // total attempts per request, first one included
    #[builder(default = "3")]
    pub(crate) max_attempts: usize,
    // wait before the first retry, doubled for each later one
    #[builder(default = "Duration::from_secs(2)")]
    pub(crate) backoff_base: Duration,
    #[builder(default = "Duration::from_secs(30)")]
    pub(crate) request_timeout: Duration,
    #[builder(default = "String::new()")]
    pub(crate) search_text: String,
    // replaces https://<routing host> when set
    #[builder(default = "None")]
    pub(crate) api_origin: Option<String>,
    #[builder(default = "self.default_user_agent()")]
    pub(crate) user_agent: String,
}

impl CrawlerOptions {
    pub fn default_builder() -> CrawlerOptionsBuilder {
        CrawlerOptionsBuilder::default()
    }
}

impl CrawlerOptionsBuilder {
    fn default_user_agent(&self) -> String {
        USER_AGENT.into()
    }
}

/// One employer-level crawl, seen from the orchestrator.
#[async_trait]
pub trait Crawl: Send + Sync {
    async fn crawl(
        &self,
        coords: &SiteCoordinates,
        reference_date: NaiveDate,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<JobRecord>, EmployerCrawlError>;
}

/// Discovery followed by enrichment for one career site.
pub struct EmployerCrawler {
    pager: ListingPager,
    enricher: DetailEnricher,
    search_text: String,
}

impl EmployerCrawler {
    pub fn new(options: CrawlerOptions) -> anyhow::Result<Self> {
        let client = Arc::new(RetryingClient::new(&options)?);

        Ok(EmployerCrawler {
            pager: ListingPager::new(
                client.clone(),
                options.page_size,
                options.api_origin.clone(),
            ),
            enricher: DetailEnricher::new(client, options.detail_workers, options.api_origin),
            search_text: options.search_text,
        })
    }
}

#[async_trait]
impl Crawl for EmployerCrawler {
    async fn crawl(
        &self,
        coords: &SiteCoordinates,
        reference_date: NaiveDate,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<JobRecord>, EmployerCrawlError> {
        // enrichment needs the complete stub list, discovery has to finish first
        let stubs = self
            .pager
            .discover_todays_listings(coords, &self.search_text, sink)
            .await;

        if stubs.is_empty() {
            debug!("nothing posted today on {}", coords);
            return Ok(vec![]);
        }

        Ok(self
            .enricher
            .enrich(coords, stubs, reference_date, sink)
            .await)
    }
}
