use anyhow::Result;
use colored::Colorize;
use coordinator::{key_pair, lock_name, Database};

use crate::LockCommand;

pub async fn lock(db: &Database, command: LockCommand) -> Result<()> {
    match command {
        LockCommand::Probe { names } => {
            let names: Vec<&str> = names.iter().map(String::as_str).collect();
            let (a, b) = key_pair(&names);
            let mut lock = db.advisory_lock(&names).await?;

            let free = lock.try_acquire().await;
            lock.release_all().await;

            if let Some(err) = lock.err() {
                return Err(anyhow::anyhow!("probe failed: {err}"));
            }

            let state = if free { "free".green() } else { "held".yellow().bold() };
            println!("{} ({a}, {b}) {state}", lock_name(&names));
        }
    }
    Ok(())
}
