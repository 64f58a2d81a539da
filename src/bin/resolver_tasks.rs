

use std::env;
use std::str::FromStr;

use anyhow::{Context, bail};
use chrono::Duration;
use nuip_resolver::ResolverConfig;
use nuip_resolver::tasks::maintenance::{self, TaskFilter};
use nuip_resolver::tasks::{FileTaskStore, TaskKind, TaskStatus, TaskStore};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive("nuip_resolver=info".parse()?))
        .init();

    let args: Vec<String> = env::args().collect();
    let Some(command) = args.get(1).map(String::as_str) else {
        print_help();
        return Ok(());
    };

    let mut dir = ResolverConfig::from_env().tasks_dir;
    let mut filter = TaskFilter::default();
    let mut execute = false;
    let mut positional: Vec<String> = Vec::new();

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--dir" | "-d" => {
                dir = value_after(&args, i)?.to_string();
                i += 1;
            }
            "--status" | "-s" => {
                let raw = value_after(&args, i)?;
                filter.status = Some(TaskStatus::from_str(raw).with_context(|| format!("unknown status {:?}", raw))?);
                i += 1;
            }
            "--kind" | "-k" => {
                let raw = value_after(&args, i)?;
                filter.kind = Some(TaskKind::from_str(raw).with_context(|| format!("unknown kind {:?}", raw))?);
                i += 1;
            }
            "--days" => {
                let days: i64 = value_after(&args, i)?.parse().context("--days expects a number")?;
                filter.older_than = Some(Duration::days(days));
                i += 1;
            }
            "--execute" => execute = true,
            "--help" => {
                print_help();
                return Ok(());
            }
            other => positional.push(other.to_string()),
        }
        i += 1;
    }

    let store = FileTaskStore::open(&dir).await?;

    match command {
        "list" => {
            let tasks = maintenance::list_tasks(&store, &filter).await?;
            println!("{} tasks in {}", tasks.len(), dir);
            for task in tasks {
                println!(
                    "{}  {:<10} {:<8} {:>3}/{:<3} ok={} failed={}  created {}",
                    task.task_id,
                    task.status,
                    task.kind,
                    task.progress.processed,
                    task.progress.total,
                    task.progress.successful,
                    task.progress.failed,
                    task.created_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
        "show" => {
            let task_id = task_id_arg(&positional)?;
            match store.get(task_id).await? {
                Some(task) => println!("{}", serde_json::to_string_pretty(&task)?),
                None => bail!("task {} not found", task_id),
            }
        }
        "delete" => {
            let task_id = task_id_arg(&positional)?;
            if store.delete(task_id).await? {
                println!("deleted {}", task_id);
            } else {
                bail!("task {} not found", task_id);
            }
        }
        "purge" => {
            let report = maintenance::purge(&store, &filter, !execute).await?;
            for task_id in &report.matched {
                let verb = if report.dry_run { "would delete" } else { "deleted" };
                println!("{} {}", verb, task_id);
            }
            if report.dry_run {
                println!("{} tasks match; re-run with --execute to delete", report.matched.len());
            } else {
                println!("{} of {} tasks deleted", report.deleted, report.matched.len());
            }
        }
        "stats" => {
            let stats = maintenance::stats(&store).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        other => {
            print_help();
            bail!("unknown command {:?}", other);
        }
    }

    Ok(())
}

fn value_after(args: &[String], i: usize) -> anyhow::Result<&str> {
    args.get(i + 1)
        .map(String::as_str)
        .with_context(|| format!("{} expects a value", args[i]))
}

fn task_id_arg(positional: &[String]) -> anyhow::Result<Uuid> {
    let raw = positional.first().context("missing task id")?;
    Uuid::parse_str(raw).with_context(|| format!("invalid task id {:?}", raw))
}

fn print_help() {
    println!("resolver-tasks - inspect and clean persisted bulk tasks");
    println!();
    println!("USAGE:");
    println!("    resolver-tasks <COMMAND> [OPTIONS]");
    println!();
    println!("COMMANDS:");
    println!("    list               List tasks (oldest activity first)");
    println!("    show <TASK_ID>     Print one task as JSON");
    println!("    delete <TASK_ID>   Delete one task");
    println!("    purge              Delete matching tasks (dry run unless --execute)");
    println!("    stats              Counts by status and kind");
    println!();
    println!("OPTIONS:");
    println!("    -d, --dir <PATH>       Task directory [env TASKS_DIR, default: tasks]");
    println!("    -s, --status <STATUS>  pending | processing | completed | failed");
    println!("    -k, --kind <KIND>      nameOnly | combined");
    println!("        --days <N>         Only tasks idle for more than N days");
    println!("        --execute          Actually delete when purging");
}
