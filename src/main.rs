use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{anyhow, Context};
use chrono::NaiveDate;
use clap::Parser;
use jobscan::{
    crawler::{CrawlerOptions, EmployerCrawler},
    runner::{RunManager, RunView, Runner, ScannerOptions},
    scorer::KeywordScorer,
    store::MemoryStore,
};
use log::{debug, info};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Scans career sites for jobs posted today", long_about = None)]
struct Args {
    /// JSON array of employers: {"name", "career_url", "employer_id"?}
    #[arg(short = 'e', long)]
    employers: PathBuf,
    /// Plain-text reference profile the jobs are scored against
    #[arg(short = 'p', long)]
    profile: Option<PathBuf>,
    /// Comma separated skills, extracted from the profile when omitted
    #[arg(short = 's', long, value_delimiter = ',')]
    skills: Vec<String>,
    /// JSON array of target job titles, a built-in list when omitted
    #[arg(short = 't', long)]
    titles: Option<PathBuf>,
    /// Where the scored jobs are written as JSON
    #[arg(short = 'o', long, default_value = "jobs.json")]
    output: PathBuf,
    /// Concurrent detail fetches per employer
    #[arg(short = 'w', long, default_value_t = 5)]
    workers: usize,
    /// Pause between requests in milliseconds
    #[arg(long, default_value_t = 300)]
    pacing_ms: u64,
    /// How often progress is checked, in milliseconds
    #[arg(long, default_value_t = 1000)]
    poll_ms: u64,
    /// Date checked as "today", YYYY-MM-DD
    #[arg(long)]
    date: Option<NaiveDate>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Args::parse();
    debug!("starting scanner with {:#?}", args.clone());

    let store = Arc::new(
        MemoryStore::from_files(
            &args.employers,
            args.profile.as_deref(),
            args.skills.clone(),
            args.titles.as_deref(),
        )
        .await?,
    );

    let crawler_options = CrawlerOptions::default_builder()
        .detail_workers(args.workers)
        .pacing(Duration::from_millis(args.pacing_ms))
        .build()?;
    let crawler = EmployerCrawler::new(crawler_options).context("could not build http client")?;

    let scanner_options = ScannerOptions::default_builder()
        .reference_date(args.date)
        .build()?;
    let manager = RunManager::new(Runner::new(
        store.clone(),
        Arc::new(crawler),
        Arc::new(KeywordScorer),
        scanner_options,
    ));

    let run_id = manager.start_run().await?;
    info!("run {} started", run_id);

    let mut last_phase = String::new();
    loop {
        tokio::time::sleep(Duration::from_millis(args.poll_ms)).await;
        let snap = match manager.status(&run_id).await? {
            Some(RunView::Live(s)) => s,
            other => return Err(anyhow!("run {} lost its live state: {:?}", run_id, other)),
        };
        if snap.phase != last_phase {
            info!(
                "[{}/{}] {}",
                snap.employers_done, snap.total_employers, snap.phase
            );
            last_phase = snap.phase;
        }
        if snap.status.is_terminal() {
            break;
        }
    }
    manager.wait(&run_id).await?;
    manager.evict(&run_id).await;

    let run = match manager.status(&run_id).await? {
        Some(RunView::Persisted(r)) => r,
        other => return Err(anyhow!("run {} was not persisted: {:?}", run_id, other)),
    };

    println!(
        "run {} {}: {} employers, {} jobs found, {} returned",
        run.run_id, run.status, run.total_employers, run.jobs_found, run.jobs_returned
    );
    for o in &run.outcomes {
        println!(
            "  {:<30} {:>4} {:>4}  {}",
            o.employer_name, o.jobs_found, o.jobs_returned, o.status
        );
    }
    for e in &run.errors {
        println!("  ! {}", e);
    }

    let written = store.export_json(&args.output).await?;
    println!("{} jobs written to {:?}", written, args.output);

    Ok(())
}
