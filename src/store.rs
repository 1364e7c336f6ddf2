use std::{collections::HashMap, path::Path};

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tokio::{fs, sync::RwLock};

use crate::{
    filters::country_guess,
    scorer::{extract_skills, ScoreResult},
    types::{Employer, EmployerStatus, JobRecord, PersistedRun, ReferenceProfile},
    utils::new_run_id,
};

/// A scored job as persisted, one row per employer and requisition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredJob {
    pub job_key: String,
    pub employer_id: String,
    pub title: String,
    pub locations_text: String,
    pub country_guess: String,
    pub posted_label: String,
    pub job_url: String,
    pub jd_text: String,
    pub match_score: f64,
    pub rationale: String,
    pub run_id: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl StoredJob {
    pub fn new(employer_id: &str, job: &JobRecord, score: &ScoreResult, run_id: &str) -> Self {
        let now = Utc::now();
        StoredJob {
            job_key: format!("{}_{}", employer_id, job.requisition_id()),
            employer_id: employer_id.into(),
            title: job.title.clone(),
            locations_text: job.all_locations().iter().join(", "),
            country_guess: country_guess(job).into(),
            posted_label: job.posted_label.clone(),
            job_url: job.job_url.clone(),
            jd_text: job.jd_text.clone(),
            match_score: score.score,
            rationale: score.rationale.clone(),
            run_id: run_id.into(),
            first_seen: now,
            last_seen: now,
        }
    }
}

/// Everything a run reads from and writes to durable storage.
#[async_trait]
pub trait Store: Send + Sync {
    /// Active employers, sorted by name.
    async fn employers(&self) -> anyhow::Result<Vec<Employer>>;
    async fn reference_profile(&self) -> anyhow::Result<Option<ReferenceProfile>>;
    /// Configured target titles, empty when unset.
    async fn target_titles(&self) -> anyhow::Result<Vec<String>>;
    async fn create_run(&self) -> anyhow::Result<PersistedRun>;
    async fn finalize_run(&self, run: PersistedRun) -> anyhow::Result<()>;
    async fn get_run(&self, run_id: &str) -> anyhow::Result<Option<PersistedRun>>;
    async fn latest_run(&self) -> anyhow::Result<Option<PersistedRun>>;
    async fn upsert_jobs(&self, jobs: Vec<StoredJob>) -> anyhow::Result<()>;
    async fn set_employer_status(&self, employer_id: &str, status: EmployerStatus)
        -> anyhow::Result<()>;
}

#[derive(Debug, Default)]
struct Tables {
    employers: Vec<Employer>,
    profile: Option<ReferenceProfile>,
    titles: Vec<String>,
    runs: HashMap<String, PersistedRun>,
    jobs: HashMap<String, StoredJob>,
    employer_status: HashMap<String, EmployerStatus>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

fn slug(name: &str) -> String {
    name.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|s| !s.is_empty())
        .join("-")
}

impl MemoryStore {
    pub fn new(
        mut employers: Vec<Employer>,
        profile: Option<ReferenceProfile>,
        titles: Vec<String>,
    ) -> Self {
        for e in employers.iter_mut().filter(|e| e.employer_id.is_empty()) {
            e.employer_id = slug(&e.name);
        }
        employers.sort_by(|a, b| a.name.cmp(&b.name));

        MemoryStore {
            tables: RwLock::new(Tables {
                employers,
                profile,
                titles,
                ..Default::default()
            }),
        }
    }

    /// Seeds a store from an employer JSON array, an optional plain-text
    /// profile and an optional JSON array of target titles. Without explicit
    /// skills the known ones mentioned in the profile are used.
    pub async fn from_files(
        employers_path: &Path,
        profile_path: Option<&Path>,
        skills: Vec<String>,
        titles_path: Option<&Path>,
    ) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(employers_path)
            .await
            .context(format!("could not read employers from {:?}", employers_path))?;
        let employers: Vec<Employer> = serde_json::from_str(&raw)
            .context(format!("invalid employer list in {:?}", employers_path))?;

        let profile = match profile_path {
            Some(p) => {
                let text = fs::read_to_string(p)
                    .await
                    .context(format!("could not read profile from {:?}", p))?;
                if text.trim().is_empty() {
                    return Err(anyhow!("profile {:?} is empty", p));
                }
                let skills = if skills.is_empty() {
                    extract_skills(&text)
                } else {
                    skills
                };
                Some(ReferenceProfile { text, skills })
            }
            None => None,
        };

        let titles = match titles_path {
            Some(p) => {
                let raw = fs::read_to_string(p)
                    .await
                    .context(format!("could not read titles from {:?}", p))?;
                serde_json::from_str(&raw).context(format!("invalid title list in {:?}", p))?
            }
            None => vec![],
        };

        Ok(MemoryStore::new(employers, profile, titles))
    }

    /// Stored jobs, best match first.
    pub async fn jobs(&self) -> Vec<StoredJob> {
        let tables = self.tables.read().await;
        tables
            .jobs
            .values()
            .cloned()
            .sorted_by(|a, b| {
                b.match_score
                    .total_cmp(&a.match_score)
                    .then_with(|| a.job_key.cmp(&b.job_key))
            })
            .collect()
    }

    pub async fn employer_status(&self, employer_id: &str) -> Option<EmployerStatus> {
        self.tables
            .read()
            .await
            .employer_status
            .get(employer_id)
            .cloned()
    }

    pub async fn export_json(&self, path: &Path) -> anyhow::Result<usize> {
        let jobs = self.jobs().await;
        let body = serde_json::to_string_pretty(&jobs)?;
        fs::write(path, body)
            .await
            .context(format!("could not write jobs to {:?}", path))?;
        Ok(jobs.len())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn employers(&self) -> anyhow::Result<Vec<Employer>> {
        Ok(self.tables.read().await.employers.clone())
    }

    async fn reference_profile(&self) -> anyhow::Result<Option<ReferenceProfile>> {
        Ok(self.tables.read().await.profile.clone())
    }

    async fn target_titles(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.tables.read().await.titles.clone())
    }

    async fn create_run(&self) -> anyhow::Result<PersistedRun> {
        let mut tables = self.tables.write().await;
        let mut run_id = new_run_id();
        while tables.runs.contains_key(&run_id) {
            run_id = new_run_id();
        }
        let run = PersistedRun::started(&run_id);
        tables.runs.insert(run_id, run.clone());
        Ok(run)
    }

    async fn finalize_run(&self, run: PersistedRun) -> anyhow::Result<()> {
        let mut tables = self.tables.write().await;
        match tables.runs.get_mut(&run.run_id) {
            Some(existing) => {
                *existing = run;
                Ok(())
            }
            None => Err(anyhow!("run {} was never created", run.run_id)),
        }
    }

    async fn get_run(&self, run_id: &str) -> anyhow::Result<Option<PersistedRun>> {
        Ok(self.tables.read().await.runs.get(run_id).cloned())
    }

    async fn latest_run(&self) -> anyhow::Result<Option<PersistedRun>> {
        Ok(self
            .tables
            .read()
            .await
            .runs
            .values()
            .max_by_key(|r| r.started_at)
            .cloned())
    }

    async fn upsert_jobs(&self, jobs: Vec<StoredJob>) -> anyhow::Result<()> {
        let mut tables = self.tables.write().await;
        for mut job in jobs {
            if let Some(existing) = tables.jobs.get(&job.job_key) {
                job.first_seen = existing.first_seen;
            }
            tables.jobs.insert(job.job_key.clone(), job);
        }
        Ok(())
    }

    async fn set_employer_status(
        &self,
        employer_id: &str,
        status: EmployerStatus,
    ) -> anyhow::Result<()> {
        self.tables
            .write()
            .await
            .employer_status
            .insert(employer_id.into(), status);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::RunStatus;

    fn employer(name: &str) -> Employer {
        Employer {
            employer_id: String::new(),
            name: name.into(),
            career_url: format!("https://{}.wd1.myworkdayjobs.com/External", slug(name)),
        }
    }

    fn job(req: &str, title: &str) -> JobRecord {
        JobRecord {
            title: title.into(),
            locations_text: "Austin, TX".into(),
            additional_locations: vec!["Remote - USA".into()],
            job_req_id: req.into(),
            ..Default::default()
        }
    }

    fn score(s: f64) -> ScoreResult {
        ScoreResult {
            score: s,
            rationale: "title: ml".into(),
        }
    }

    #[tokio::test]
    async fn employers_sorted_with_ids() {
        let store = MemoryStore::new(vec![employer("Zeta Corp"), employer("Acme")], None, vec![]);
        let employers = store.employers().await.unwrap();
        assert_eq!(employers[0].name, "Acme");
        assert_eq!(employers[1].employer_id, "zeta-corp");
    }

    #[test]
    fn stored_job_fields() {
        let j = StoredJob::new("acme", &job("R1", "ML Engineer"), &score(0.5), "run1");
        assert_eq!(j.job_key, "acme_R1");
        assert_eq!(j.locations_text, "Austin, TX, Remote - USA");
        assert_eq!(j.country_guess, "US");

        let mut no_req = job("", "ML Engineer");
        no_req.job_posting_id = "JP9".into();
        assert_eq!(StoredJob::new("acme", &no_req, &score(0.1), "run1").job_key, "acme_JP9");
    }

    #[tokio::test]
    async fn upsert_keeps_first_seen() {
        let store = MemoryStore::default();
        let first = StoredJob::new("acme", &job("R1", "ML Engineer"), &score(0.2), "run1");
        let first_seen = first.first_seen;
        store.upsert_jobs(vec![first]).await.unwrap();

        let mut again = StoredJob::new("acme", &job("R1", "ML Engineer"), &score(0.9), "run2");
        again.first_seen = first_seen + chrono::Duration::days(1);
        store
            .upsert_jobs(vec![
                again,
                StoredJob::new("acme", &job("R2", "Data Scientist"), &score(0.4), "run2"),
            ])
            .await
            .unwrap();

        let jobs = store.jobs().await;
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].job_key, "acme_R1");
        assert_eq!(jobs[0].match_score, 0.9);
        assert_eq!(jobs[0].run_id, "run2");
        assert_eq!(jobs[0].first_seen, first_seen);
    }

    #[tokio::test]
    async fn run_lifecycle() {
        let store = MemoryStore::default();
        assert!(store.latest_run().await.unwrap().is_none());

        let mut run = store.create_run().await.unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(run.run_id.len(), crate::utils::RUN_ID_LEN);

        run.status = RunStatus::Done;
        run.finished_at = Some(Utc::now());
        store.finalize_run(run.clone()).await.unwrap();

        assert_eq!(store.get_run(&run.run_id).await.unwrap(), Some(run.clone()));
        assert_eq!(store.latest_run().await.unwrap().map(|r| r.run_id), Some(run.run_id));
        assert!(store
            .finalize_run(PersistedRun::started("missing"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn seeds_from_files() {
        let dir = std::env::temp_dir().join(format!("jobscan-{}", crate::utils::new_run_id()));
        fs::create_dir_all(&dir).await.unwrap();
        let employers = dir.join("employers.json");
        let profile = dir.join("profile.txt");
        fs::write(
            &employers,
            r#"[{"name": "Beta", "career_url": "https://beta.wd1.myworkdayjobs.com/Careers"},
                {"employer_id": "a1", "name": "Alpha", "career_url": "https://alpha.wd5.myworkdayjobs.com/en-US/Jobs"}]"#,
        )
        .await
        .unwrap();
        fs::write(&profile, "Python and PyTorch, deployed with Docker.")
            .await
            .unwrap();

        let store = MemoryStore::from_files(&employers, Some(&profile), vec![], None)
            .await
            .unwrap();
        let names: Vec<String> = store
            .employers()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.employer_id)
            .collect();
        assert_eq!(names, vec!["a1".to_string(), "beta".to_string()]);
        assert_eq!(
            store.reference_profile().await.unwrap().unwrap().skills,
            vec!["docker", "python", "pytorch"]
        );
        assert!(store.target_titles().await.unwrap().is_empty());

        let out = dir.join("jobs.json");
        assert_eq!(store.export_json(&out).await.unwrap(), 0);
        fs::remove_dir_all(&dir).await.unwrap();
    }
}
