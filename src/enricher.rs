use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use chrono::NaiveDate;
use futures::{future, StreamExt};

use crate::{
    client::RetryingClient,
    progress::{Progress, ProgressSink},
    types::{DetailResponse, FetchError, JobPostingInfo, JobRecord, ListingStub, SiteCoordinates},
    utils::{html_to_text, parse_start_date},
};

/// Fetches the detail of every discovered posting through a fixed-size pool of
/// concurrent workers and turns each into a [`JobRecord`].
pub struct DetailEnricher {
    client: Arc<RetryingClient>,
    workers: usize,
    api_origin: Option<String>,
}

impl DetailEnricher {
    pub fn new(client: Arc<RetryingClient>, workers: usize, api_origin: Option<String>) -> Self {
        DetailEnricher {
            client,
            workers: workers.max(1),
            api_origin,
        }
    }

    /// Output order follows completion order. Failed or stale postings are
    /// dropped, never emitted half-built.
    pub async fn enrich(
        &self,
        coords: &SiteCoordinates,
        stubs: Vec<ListingStub>,
        reference_date: NaiveDate,
        sink: &dyn ProgressSink,
    ) -> Vec<JobRecord> {
        let total = stubs.len();
        let completed = AtomicUsize::new(0);

        let records = futures::stream::iter(stubs)
            .map(|stub| {
                let completed = &completed;
                async move {
                    let record = self.enrich_one(coords, &stub, reference_date).await;
                    // increment and report in the same poll so counts stay ordered
                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    sink.report(Progress::details(done, total));
                    record
                }
            })
            .buffer_unordered(self.workers)
            .filter_map(future::ready)
            .collect::<Vec<JobRecord>>()
            .await;

        info!(
            "{} of {} listings enriched for {}",
            records.len(),
            total,
            coords
        );
        records
    }

    async fn enrich_one(
        &self,
        coords: &SiteCoordinates,
        stub: &ListingStub,
        reference_date: NaiveDate,
    ) -> Option<JobRecord> {
        self.client.pace().await;

        let detail = match self.fetch_detail(coords, stub).await {
            Ok(d) => d,
            Err(e) => {
                error!("error fetching detail for {}: {}", stub.external_path, e);
                return None;
            }
        };

        if !is_current(detail.start_date.as_deref(), reference_date) {
            info!(
                "skipping {}, start date {:?} is not {}",
                detail.title.as_deref().unwrap_or(&stub.title),
                detail.start_date,
                reference_date
            );
            return None;
        }

        Some(build_record(stub, detail))
    }

    async fn fetch_detail(
        &self,
        coords: &SiteCoordinates,
        stub: &ListingStub,
    ) -> Result<JobPostingInfo, FetchError> {
        let url = coords.detail_url(self.api_origin.as_deref(), &stub.external_path);
        if stub.external_path.trim_matches('/').is_empty() {
            return Err(FetchError::MissingPayload {
                url,
                key: "externalPath",
            });
        }

        let res: DetailResponse = self.client.get_json(&url).await?;
        res.job_posting_info.ok_or(FetchError::MissingPayload {
            url,
            key: "jobPostingInfo",
        })
    }
}

/// A parseable start date has to match the reference date. Without one the
/// discovery label, already checked, decides.
pub fn is_current(start_date: Option<&str>, reference_date: NaiveDate) -> bool {
    match start_date.and_then(parse_start_date) {
        Some(d) => d == reference_date,
        None => true,
    }
}

fn build_record(stub: &ListingStub, info: JobPostingInfo) -> JobRecord {
    JobRecord {
        title: info.title.unwrap_or_else(|| stub.title.clone()),
        external_path: stub.external_path.clone(),
        locations_text: info.location.unwrap_or_else(|| stub.locations_text.clone()),
        additional_locations: info.additional_locations,
        posted_label: info.posted_on.unwrap_or_else(|| stub.posted_label.clone()),
        start_date: info.start_date,
        country: info.country,
        requisition_location: info.job_requisition_location,
        job_req_id: info.job_req_id.unwrap_or_default(),
        job_posting_id: info.job_posting_id.unwrap_or_default(),
        jd_text: info
            .job_description
            .as_deref()
            .map(html_to_text)
            .unwrap_or_default(),
        job_url: info.external_url.unwrap_or_default(),
        time_type: info.time_type.unwrap_or_default(),
    }
}
