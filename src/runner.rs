use std::{collections::HashMap, sync::Arc};

use anyhow::Context;
use chrono::{Local, NaiveDate, Utc};
use serde::Serialize;
use tokio::{sync::Mutex, task::JoinHandle};

use crate::{
    crawler::Crawl,
    filters::FilterChain,
    progress::{Progress, ProgressSink},
    scorer::{ScoreInput, Scorer},
    site,
    state::{RunSnapshot, RunState, RunStore},
    store::{Store, StoredJob},
    types::{
        Employer, EmployerCrawlError, EmployerOutcome, EmployerStatus, PersistedRun,
        ReferenceProfile, RunPreconditionError, RunStatus, SiteCoordinates,
    },
    utils::truncate_message,
};

#[derive(Builder, Debug, Clone)]
#[builder(setter(into))]
pub struct ScannerOptions {
    // longest error message kept in an employer outcome
    #[builder(default = "100")]
    pub(crate) error_message_limit: usize,
    // date "posted today" is checked against, the local date when unset
    #[builder(default = "None")]
    pub(crate) reference_date: Option<NaiveDate>,
}

impl ScannerOptions {
    pub fn default_builder() -> ScannerOptionsBuilder {
        ScannerOptionsBuilder::default()
    }
}

/// Runs one scan across every configured employer, one employer at a time.
pub struct Runner {
    store: Arc<dyn Store>,
    crawler: Arc<dyn Crawl>,
    scorer: Arc<dyn Scorer>,
    options: ScannerOptions,
}

struct RunInputs {
    employers: Vec<Employer>,
    profile: ReferenceProfile,
    titles: Vec<String>,
}

/// Mirrors crawl progress into the run phase, e.g. "Acme: details 3/12".
struct EmployerProgress<'a> {
    state: &'a RunState,
    employer: &'a str,
}

impl ProgressSink for EmployerProgress<'_> {
    fn report(&self, p: Progress) {
        self.state
            .set_phase(format!("{}: {} {}/{}", self.employer, p.phase, p.done, p.total));
    }
}

impl Runner {
    pub fn new(
        store: Arc<dyn Store>,
        crawler: Arc<dyn Crawl>,
        scorer: Arc<dyn Scorer>,
        options: ScannerOptions,
    ) -> Self {
        Runner {
            store,
            crawler,
            scorer,
            options,
        }
    }

    fn reference_date(&self) -> NaiveDate {
        self.options
            .reference_date
            .unwrap_or_else(|| Local::now().date_naive())
    }

    async fn load_inputs(&self) -> Result<RunInputs, RunPreconditionError> {
        let unavailable = |e: anyhow::Error| RunPreconditionError::Unavailable(e.to_string());

        let employers = self.store.employers().await.map_err(unavailable)?;
        if employers.is_empty() {
            return Err(RunPreconditionError::NoEmployers);
        }
        let profile = match self.store.reference_profile().await.map_err(unavailable)? {
            Some(p) if !p.text.trim().is_empty() => p,
            _ => return Err(RunPreconditionError::NoReferenceProfile),
        };
        let titles = self.store.target_titles().await.map_err(unavailable)?;

        Ok(RunInputs {
            employers,
            profile,
            titles,
        })
    }

    /// Drives `run` to a terminal status. The persisted record is written
    /// once, before the live status turns terminal.
    pub async fn execute(&self, mut run: PersistedRun, state: Arc<RunState>) {
        let reference_date = self.reference_date();
        info!("run {} started, reference date {}", run.run_id, reference_date);

        let inputs = match self.load_inputs().await {
            Ok(i) => i,
            Err(e) => {
                error!("run {} aborted: {}", run.run_id, e);
                state.push_error(e.to_string());
                state.set_phase(e.to_string());
                run.status = RunStatus::Error;
                run.errors = state.errors();
                run.finished_at = Some(Utc::now());
                self.persist(run).await;
                state.set_status(RunStatus::Error);
                return;
            }
        };

        state.set_total_employers(inputs.employers.len());

        for (i, employer) in inputs.employers.iter().enumerate() {
            state.set_current_employer(&employer.name);
            state.set_phase(format!("Scanning {}", employer.name));

            let outcome = self
                .process_employer(employer, &inputs, reference_date, &run.run_id, &state)
                .await;
            info!(
                "{}: {} ({} found, {} returned)",
                employer.name, outcome.status, outcome.jobs_found, outcome.jobs_returned
            );

            if let Err(e) = self
                .store
                .set_employer_status(&employer.employer_id, outcome.status.clone())
                .await
            {
                warn!("could not record status for {}: {}", employer.name, e);
            }
            state.add_jobs(outcome.jobs_found, outcome.jobs_returned);
            state.push_outcome(outcome);
            state.set_employers_done(i + 1);
        }

        let (jobs_found, jobs_returned) = state.totals();
        run.status = RunStatus::Done;
        run.finished_at = Some(Utc::now());
        run.total_employers = inputs.employers.len();
        run.jobs_found = jobs_found;
        run.jobs_returned = jobs_returned;
        run.errors = state.errors();
        run.outcomes = state.outcomes();

        info!(
            "run {} complete: {} employers, {} jobs found, {} returned, {} errors",
            run.run_id,
            run.total_employers,
            jobs_found,
            jobs_returned,
            run.errors.len()
        );

        state.set_phase("Complete");
        self.persist(run).await;
        state.set_status(RunStatus::Done);
    }

    async fn persist(&self, run: PersistedRun) {
        let run_id = run.run_id.clone();
        if let Err(e) = self.store.finalize_run(run).await {
            error!("could not persist run {}: {}", run_id, e);
        }
    }

    async fn process_employer(
        &self,
        employer: &Employer,
        inputs: &RunInputs,
        reference_date: NaiveDate,
        run_id: &str,
        state: &RunState,
    ) -> EmployerOutcome {
        let mut outcome = EmployerOutcome {
            employer_id: employer.employer_id.clone(),
            employer_name: employer.name.clone(),
            jobs_found: 0,
            jobs_returned: 0,
            status: EmployerStatus::Success,
        };

        let coords = match site::resolve(&employer.career_url) {
            Ok(c) => c,
            Err(e) => {
                warn!("{}: {}", employer.name, e);
                state.push_error(format!(
                    "{}: Invalid career site URL: {}",
                    employer.name, employer.career_url
                ));
                outcome.status = EmployerStatus::InvalidUrl;
                return outcome;
            }
        };

        match self
            .scan_employer(employer, &coords, inputs, reference_date, run_id, state)
            .await
        {
            Ok((found, returned)) => {
                outcome.jobs_found = found;
                outcome.jobs_returned = returned;
            }
            Err(e) => {
                error!("{}: {}", employer.name, e);
                let message = e.to_string();
                state.push_error(format!("{}: {}", employer.name, message));
                outcome.status = EmployerStatus::Error(truncate_message(
                    &message,
                    self.options.error_message_limit,
                ));
            }
        }
        outcome
    }

    /// Crawl, filter, score and store one employer's postings. Returns how many
    /// the crawl produced and how many were stored.
    async fn scan_employer(
        &self,
        employer: &Employer,
        coords: &SiteCoordinates,
        inputs: &RunInputs,
        reference_date: NaiveDate,
        run_id: &str,
        state: &RunState,
    ) -> Result<(usize, usize), EmployerCrawlError> {
        let sink = EmployerProgress {
            state,
            employer: &employer.name,
        };
        let jobs = self.crawler.crawl(coords, reference_date, &sink).await?;
        let found = jobs.len();

        let (kept, rejected) = FilterChain::standard(reference_date, &inputs.titles).apply(jobs);
        debug!(
            "{}: {} of {} jobs kept, rejected by {:?}",
            employer.name,
            kept.len(),
            found,
            rejected
        );
        if kept.is_empty() {
            return Ok((found, 0));
        }

        state.set_phase(format!("{}: scoring {} jobs", employer.name, kept.len()));
        let batch: Vec<ScoreInput> = kept.iter().map(ScoreInput::from).collect();
        let scores = self
            .scorer
            .score(&batch, &inputs.profile)
            .await
            .map_err(|e| EmployerCrawlError::Scoring(e.to_string()))?;
        if scores.len() != kept.len() {
            return Err(EmployerCrawlError::Scoring(format!(
                "{} scores for {} jobs",
                scores.len(),
                kept.len()
            )));
        }

        let stored: Vec<StoredJob> = kept
            .iter()
            .zip(scores.iter())
            .map(|(job, score)| StoredJob::new(&employer.employer_id, job, score, run_id))
            .collect();
        let returned = stored.len();
        self.store
            .upsert_jobs(stored)
            .await
            .map_err(|e| EmployerCrawlError::Persistence(e.to_string()))?;

        Ok((found, returned))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum RunView {
    Live(RunSnapshot),
    Persisted(PersistedRun),
}

impl RunView {
    pub fn status(&self) -> RunStatus {
        match self {
            RunView::Live(s) => s.status,
            RunView::Persisted(r) => r.status,
        }
    }
}

/// Starts runs as background tasks and answers progress queries about them.
pub struct RunManager {
    runner: Arc<Runner>,
    runs: Arc<RunStore>,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl RunManager {
    pub fn new(runner: Runner) -> Self {
        RunManager {
            runner: Arc::new(runner),
            runs: Arc::new(RunStore::new()),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Returns as soon as the run is registered; the scan continues in the background.
    pub async fn start_run(&self) -> anyhow::Result<String> {
        let run = self
            .runner
            .store
            .create_run()
            .await
            .context("could not create run")?;
        let run_id = run.run_id.clone();

        let state = Arc::new(RunState::new(&run_id));
        self.runs.insert(state.clone());

        let runner = self.runner.clone();
        let handle = tokio::spawn(async move { runner.execute(run, state).await });

        let mut tasks = self.tasks.lock().await;
        // nobody waited on these, their results live in the run state
        tasks.retain(|_, h| !h.is_finished());
        tasks.insert(run_id.clone(), handle);

        Ok(run_id)
    }

    pub async fn status(&self, run_id: &str) -> anyhow::Result<Option<RunView>> {
        if let Some(state) = self.runs.get(run_id) {
            return Ok(Some(RunView::Live(state.snapshot())));
        }
        Ok(self.runner.store.get_run(run_id).await?.map(RunView::Persisted))
    }

    pub async fn latest(&self) -> anyhow::Result<Option<PersistedRun>> {
        self.runner.store.latest_run().await
    }

    pub async fn wait(&self, run_id: &str) -> anyhow::Result<()> {
        let handle = self.tasks.lock().await.remove(run_id);
        if let Some(h) = handle {
            h.await.context(format!("run {} task failed", run_id))?;
        }
        Ok(())
    }

    /// Drops the live state and task handle of a finished run; later queries
    /// read the persisted record.
    pub async fn evict(&self, run_id: &str) -> bool {
        match self.runs.get(run_id) {
            Some(state) if state.status().is_terminal() => {
                self.tasks.lock().await.remove(run_id);
                self.runs.remove(run_id).is_some()
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod test {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use async_trait::async_trait;

    use super::*;
    use crate::{
        scorer::{KeywordScorer, ScoreResult},
        store::MemoryStore,
        types::JobRecord,
        utils::POSTED_TODAY,
    };

    struct FakeCrawler {
        fail_tenant: Option<&'static str>,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl FakeCrawler {
        fn new() -> Self {
            FakeCrawler {
                fail_tenant: None,
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Crawl for FakeCrawler {
        async fn crawl(
            &self,
            coords: &SiteCoordinates,
            _reference_date: NaiveDate,
            sink: &dyn ProgressSink,
        ) -> Result<Vec<JobRecord>, EmployerCrawlError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail_tenant == Some(coords.tenant.as_str()) {
                return Err(EmployerCrawlError::Crawl("connection reset".into()));
            }
            sink.report(Progress::listings(3, 3));
            let job = |n: usize, title: &str, location: &str| JobRecord {
                title: title.into(),
                locations_text: location.into(),
                posted_label: POSTED_TODAY.into(),
                job_req_id: format!("{}-R{}", coords.tenant, n),
                ..Default::default()
            };
            sink.report(Progress::details(3, 3));
            Ok(vec![
                job(1, "Machine Learning Engineer", "Austin, TX"),
                job(2, "Data Scientist", "Seattle, WA"),
                job(3, "Data Scientist", "Berlin, Germany"),
            ])
        }
    }

    struct ShortScorer;

    #[async_trait]
    impl Scorer for ShortScorer {
        async fn score(
            &self,
            _batch: &[ScoreInput],
            _profile: &ReferenceProfile,
        ) -> anyhow::Result<Vec<ScoreResult>> {
            Ok(vec![])
        }
    }

    fn employer(name: &str, url: &str) -> Employer {
        Employer {
            employer_id: name.to_lowercase(),
            name: name.into(),
            career_url: url.into(),
        }
    }

    fn site(tenant: &str) -> String {
        format!("https://{}.wd5.myworkdayjobs.com/en-US/External", tenant)
    }

    fn profile() -> Option<ReferenceProfile> {
        Some(ReferenceProfile {
            text: "ML engineer with Python".into(),
            skills: vec!["python".into()],
        })
    }

    fn manager(
        store: Arc<MemoryStore>,
        crawler: Arc<FakeCrawler>,
        scorer: Arc<dyn Scorer>,
    ) -> RunManager {
        let options = ScannerOptions::default_builder()
            .reference_date(NaiveDate::from_ymd_opt(2026, 10, 19))
            .build()
            .unwrap();
        RunManager::new(Runner::new(store, crawler, scorer, options))
    }

    async fn finished(m: &RunManager, run_id: &str) -> RunSnapshot {
        m.wait(run_id).await.unwrap();
        match m.status(run_id).await.unwrap() {
            Some(RunView::Live(s)) => s,
            other => panic!("expected live state, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn no_employers_fails_before_crawling() {
        let store = Arc::new(MemoryStore::new(vec![], profile(), vec![]));
        let crawler = Arc::new(FakeCrawler::new());
        let m = manager(store.clone(), crawler.clone(), Arc::new(KeywordScorer));

        let run_id = m.start_run().await.unwrap();
        let snap = finished(&m, &run_id).await;

        assert_eq!(snap.status, RunStatus::Error);
        assert_eq!(snap.phase, "No employers loaded");
        assert_eq!(crawler.calls.load(Ordering::SeqCst), 0);

        let run = store.get_run(&run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Error);
        assert_eq!(run.errors, vec!["No employers loaded".to_string()]);
        assert!(run.outcomes.is_empty());
        assert!(run.finished_at.is_some());
    }

    #[tokio::test]
    async fn missing_profile_fails_before_crawling() {
        let store = Arc::new(MemoryStore::new(
            vec![employer("Acme", &site("acme"))],
            None,
            vec![],
        ));
        let crawler = Arc::new(FakeCrawler::new());
        let m = manager(store, crawler.clone(), Arc::new(KeywordScorer));

        let run_id = m.start_run().await.unwrap();
        let snap = finished(&m, &run_id).await;
        assert_eq!(snap.status, RunStatus::Error);
        assert_eq!(snap.errors, vec!["No reference profile configured".to_string()]);
        assert_eq!(crawler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failing_employer_does_not_stop_the_run() {
        let store = Arc::new(MemoryStore::new(
            vec![
                employer("Alpha", &site("alpha")),
                employer("Beta", &site("beta")),
                employer("Gamma", &site("gamma")),
            ],
            profile(),
            vec![],
        ));
        let crawler = Arc::new(FakeCrawler {
            fail_tenant: Some("beta"),
            ..FakeCrawler::new()
        });
        let m = manager(store.clone(), crawler, Arc::new(KeywordScorer));

        let run_id = m.start_run().await.unwrap();
        let snap = finished(&m, &run_id).await;

        assert_eq!(snap.status, RunStatus::Done);
        assert_eq!(snap.phase, "Complete");
        let statuses: Vec<EmployerStatus> =
            snap.outcomes.iter().map(|o| o.status.clone()).collect();
        assert_eq!(
            statuses,
            vec![
                EmployerStatus::Success,
                EmployerStatus::Error("crawl failed: connection reset".into()),
                EmployerStatus::Success
            ]
        );
        // Berlin is dropped by the location filter
        assert_eq!((snap.jobs_found, snap.jobs_returned), (6, 4));
        assert_eq!((snap.employers_done, snap.total_employers), (3, 3));
        assert_eq!(
            snap.errors,
            vec!["Beta: crawl failed: connection reset".to_string()]
        );

        let run = store.get_run(&run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Done);
        assert_eq!((run.jobs_found, run.jobs_returned), (6, 4));
        assert_eq!(run.outcomes, snap.outcomes);
        assert_eq!(store.jobs().await.len(), 4);
        assert_eq!(
            store.employer_status("beta").await,
            Some(EmployerStatus::Error("crawl failed: connection reset".into()))
        );
    }

    #[tokio::test]
    async fn invalid_url_is_recorded_and_skipped() {
        let store = Arc::new(MemoryStore::new(
            vec![
                employer("Acme", &site("acme")),
                employer("Bogus", "https://careers.bogus.example.com/jobs"),
            ],
            profile(),
            vec![],
        ));
        let crawler = Arc::new(FakeCrawler::new());
        let m = manager(store.clone(), crawler.clone(), Arc::new(KeywordScorer));

        let run_id = m.start_run().await.unwrap();
        let snap = finished(&m, &run_id).await;

        assert_eq!(snap.status, RunStatus::Done);
        assert_eq!(snap.outcomes[1].status, EmployerStatus::InvalidUrl);
        assert_eq!(
            (snap.outcomes[1].jobs_found, snap.outcomes[1].jobs_returned),
            (0, 0)
        );
        assert_eq!(
            snap.errors,
            vec!["Bogus: Invalid career site URL: https://careers.bogus.example.com/jobs".to_string()]
        );
        assert_eq!(crawler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.employer_status("bogus").await, Some(EmployerStatus::InvalidUrl));
    }

    #[tokio::test]
    async fn scorer_count_mismatch_is_an_employer_error() {
        let store = Arc::new(MemoryStore::new(
            vec![employer("Acme", &site("acme"))],
            profile(),
            vec![],
        ));
        let m = manager(store.clone(), Arc::new(FakeCrawler::new()), Arc::new(ShortScorer));

        let run_id = m.start_run().await.unwrap();
        let snap = finished(&m, &run_id).await;

        assert_eq!(snap.status, RunStatus::Done);
        assert!(matches!(snap.outcomes[0].status, EmployerStatus::Error(_)));
        assert_eq!((snap.jobs_found, snap.jobs_returned), (0, 0));
        assert!(store.jobs().await.is_empty());
    }

    #[tokio::test]
    async fn error_messages_are_truncated() {
        let store = Arc::new(MemoryStore::new(
            vec![employer("Beta", &site("beta"))],
            profile(),
            vec![],
        ));
        let crawler = Arc::new(FakeCrawler {
            fail_tenant: Some("beta"),
            ..FakeCrawler::new()
        });
        let options = ScannerOptions::default_builder()
            .error_message_limit(5usize)
            .build()
            .unwrap();
        let m = RunManager::new(Runner::new(store, crawler, Arc::new(KeywordScorer), options));

        let run_id = m.start_run().await.unwrap();
        let snap = finished(&m, &run_id).await;
        assert_eq!(snap.outcomes[0].status, EmployerStatus::Error("crawl".into()));
        // the run error list keeps the whole message
        assert_eq!(
            snap.errors,
            vec!["Beta: crawl failed: connection reset".to_string()]
        );
    }

    #[tokio::test]
    async fn progress_is_monotonic_while_running() {
        let employers = (0..4)
            .map(|i| employer(&format!("Employer{}", i), &site(&format!("tenant{}", i))))
            .collect();
        let store = Arc::new(MemoryStore::new(employers, profile(), vec![]));
        let crawler = Arc::new(FakeCrawler {
            delay: Duration::from_millis(30),
            ..FakeCrawler::new()
        });
        let m = manager(store, crawler, Arc::new(KeywordScorer));

        let run_id = m.start_run().await.unwrap();
        let mut last_done = 0;
        let mut last_found = 0;
        loop {
            let view = m.status(&run_id).await.unwrap().unwrap();
            let snap = match view {
                RunView::Live(s) => s,
                other => panic!("unexpected {:?}", other),
            };
            assert!(snap.employers_done >= last_done);
            assert!(snap.jobs_found >= last_found);
            last_done = snap.employers_done;
            last_found = snap.jobs_found;
            if snap.status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(last_done, 4);
        m.wait(&run_id).await.unwrap();
    }

    #[tokio::test]
    async fn evicted_runs_answer_from_the_store() {
        let store = Arc::new(MemoryStore::new(
            vec![employer("Acme", &site("acme"))],
            profile(),
            vec![],
        ));
        let m = manager(store, Arc::new(FakeCrawler::new()), Arc::new(KeywordScorer));

        let run_id = m.start_run().await.unwrap();
        m.wait(&run_id).await.unwrap();

        assert!(m.evict(&run_id).await);
        match m.status(&run_id).await.unwrap() {
            Some(RunView::Persisted(run)) => {
                assert_eq!(run.status, RunStatus::Done);
                assert_eq!(run.jobs_returned, 2);
            }
            other => panic!("expected persisted run, got {:?}", other),
        }
        assert_eq!(m.latest().await.unwrap().map(|r| r.run_id), Some(run_id));
        assert!(m.status("unknown").await.unwrap().is_none());
    }

    async fn until_terminal(m: &RunManager, run_id: &str) {
        while !m.status(run_id).await.unwrap().unwrap().status().is_terminal() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn unwaited_task_handles_are_released() {
        let store = Arc::new(MemoryStore::new(
            vec![employer("Acme", &site("acme"))],
            profile(),
            vec![],
        ));
        let m = manager(store, Arc::new(FakeCrawler::new()), Arc::new(KeywordScorer));

        let first = m.start_run().await.unwrap();
        until_terminal(&m, &first).await;
        assert!(m.evict(&first).await);
        assert!(!m.tasks.lock().await.contains_key(&first));

        let second = m.start_run().await.unwrap();
        until_terminal(&m, &second).await;
        while !m.tasks.lock().await[&second].is_finished() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let third = m.start_run().await.unwrap();
        {
            let tasks = m.tasks.lock().await;
            assert!(!tasks.contains_key(&second));
            assert!(tasks.contains_key(&third));
        }
        // waiting on a released run is still fine
        m.wait(&second).await.unwrap();
        m.wait(&third).await.unwrap();
    }
}
