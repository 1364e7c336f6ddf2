use std::sync::Arc;

use serde_json::json;

use crate::{
    client::RetryingClient,
    progress::{Progress, ProgressSink},
    types::{ListingPage, ListingStub, SiteCoordinates},
};

/// Walks the discovery endpoint page by page and keeps the postings labelled
/// as published today.
pub struct ListingPager {
    client: Arc<RetryingClient>,
    page_size: usize,
    api_origin: Option<String>,
}

impl ListingPager {
    pub fn new(client: Arc<RetryingClient>, page_size: usize, api_origin: Option<String>) -> Self {
        ListingPager {
            client,
            page_size: page_size.max(1),
            api_origin,
        }
    }

    /// Never fails: a page that cannot be fetched ends pagination and whatever
    /// was collected so far is returned.
    pub async fn discover_todays_listings(
        &self,
        coords: &SiteCoordinates,
        search_text: &str,
        sink: &dyn ProgressSink,
    ) -> Vec<ListingStub> {
        let url = coords.listings_url(self.api_origin.as_deref());
        let mut today = vec![];
        let mut offset = 0;
        let mut total: Option<usize> = None;
        let mut skipped = 0;

        loop {
            let body = json!({
                "appliedFacets": {},
                "limit": self.page_size,
                "offset": offset,
                "searchText": search_text,
            });

            let page = match self.client.post_json::<ListingPage>(&url, &body).await {
                Ok(p) => p,
                Err(e) => {
                    warn!(
                        "listing page at offset {} for {} failed, keeping {} listings: {}",
                        offset,
                        coords,
                        today.len(),
                        e
                    );
                    break;
                }
            };

            // the platform only reports the catalog size reliably on the first page
            if offset == 0 {
                total = page.total;
                match total {
                    Some(t) => info!("total jobs on {}: {}", coords, t),
                    None => warn!("no total reported for {}, paging until exhausted", coords),
                }
            }

            let postings = match page.job_postings {
                Some(p) if !p.is_empty() => p,
                _ => break,
            };

            let page_len = postings.len();
            let mut page_today = 0;
            for raw in postings {
                let stub: ListingStub = match serde_json::from_value(raw) {
                    Ok(s) => s,
                    Err(e) => {
                        warn!("unreadable listing at offset {} for {}: {}", offset, coords, e);
                        skipped += 1;
                        continue;
                    }
                };
                if stub.is_posted_today() {
                    page_today += 1;
                    today.push(stub);
                } else {
                    skipped += 1;
                }
            }

            sink.report(Progress::listings(
                offset + page_len,
                total.unwrap_or(offset + page_len),
            ));

            offset += self.page_size;

            // results come newest first, a page past the first without any
            // of today's postings means the rest are older
            if page_today == 0 && offset > self.page_size {
                info!(
                    "no postings from today at offset {} for {}, stopping early",
                    offset, coords
                );
                break;
            }

            if total.map_or(false, |t| offset >= t) {
                break;
            }

            self.client.pace().await;
        }

        debug!("{} older listings skipped for {}", skipped, coords);
        info!("found {} listings posted today for {}", today.len(), coords);
        today
    }
}
