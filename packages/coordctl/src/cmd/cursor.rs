use anyhow::Result;
use colored::Colorize;
use coordinator::{CursorStore, Database};

use crate::CursorCommand;

pub async fn cursor(db: &Database, command: CursorCommand) -> Result<()> {
    match command {
        CursorCommand::Get { job, key } => {
            match CursorStore::for_job(db.kv(), &job).get(&key).await? {
                Some(value) => println!("{value}"),
                None => println!("{}", "unset".dimmed()),
            }
        }
        CursorCommand::Set { job, key, value } => {
            CursorStore::for_job(db.kv(), &job).set(&key, &value).await?;
            println!("{} {job}/{key} = {value}", "set".green());
        }
        CursorCommand::Clear { job, key } => {
            if CursorStore::for_job(db.kv(), &job).delete(&key).await? {
                println!("{} {job}/{key}", "cleared".green());
            } else {
                println!("{}", "unset".dimmed());
            }
        }
    }
    Ok(())
}
