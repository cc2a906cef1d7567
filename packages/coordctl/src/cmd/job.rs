//! Tracked job inspection

use anyhow::{anyhow, Result};
use colored::Colorize;
use coordinator::{retain_buckets, standard_fleet, Database, Job, JobStatus, JobTracker, SystemClock};
use std::sync::Arc;

use crate::JobCommand;

/// Tracker of a standard worker, with the same retention the fleet uses.
fn tracker(db: &Database, worker: &str) -> Result<JobTracker> {
    let spec = standard_fleet()
        .into_iter()
        .find(|spec| spec.name == worker)
        .ok_or_else(|| anyhow!("unknown worker {worker}"))?;
    let tracked = spec
        .tracker
        .ok_or_else(|| anyhow!("worker {worker} does not track its jobs"))?;

    Ok(JobTracker::new(
        tracked.name,
        db.kv(),
        retain_buckets(tracked.format, tracked.retention, Arc::new(SystemClock)),
    ))
}

fn status(status: JobStatus) -> colored::ColoredString {
    match status {
        JobStatus::Done => status.as_str().green(),
        JobStatus::Started => status.as_str().yellow(),
        JobStatus::Failed => status.as_str().red().bold(),
    }
}

fn print_job(job: &Job<()>) {
    println!(
        "{:<16} {:<8} {}  {}",
        job.id,
        status(job.status),
        job.created_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
        job.error.as_deref().unwrap_or_default()
    );
}

pub async fn job(db: &Database, command: JobCommand) -> Result<()> {
    match command {
        JobCommand::Get { worker, id } => match tracker(db, &worker)?.get(&id).await? {
            Some(job) => print_job(&job),
            None => println!("{}", format!("no record for {id}").dimmed()),
        },
        JobCommand::Last { worker } => match tracker(db, &worker)?.get_last().await? {
            Some(job) => print_job(&job),
            None => println!("{}", "no records".dimmed()),
        },
        JobCommand::List { worker } => {
            let jobs = tracker(db, &worker)?.list().await?;
            println!("{}", format!("{} ({} records)", worker, jobs.len()).cyan().bold());
            println!("{}", "─".repeat(60).dimmed());
            for job in &jobs {
                print_job(job);
            }
        }
        JobCommand::Clear { worker, id } => {
            if tracker(db, &worker)?.delete(&id).await? {
                println!("{} {worker}/{id}", "cleared".green());
            } else {
                println!("{}", format!("no record for {id}").dimmed());
            }
        }
        JobCommand::Evict { worker } => {
            let count = tracker(db, &worker)?.evict().await?;
            println!("{} {count} records", "evicted".green());
        }
    }
    Ok(())
}
