use std::sync::Arc;

use anyhow::Context;
use cloudsketch_core::CreateClient;
use cloudsketchd::config::SyncConfig;
use cloudsketchd::mirror::{MirrorProvider, Session};
use cloudsketchd::prefs::{AcceptAll, SyncPrefs};
use cloudsketchd::sync::engine::{EngineEvent, SyncEngine};
use cloudsketchd::sync::tree::TreeModel;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliCommand {
    List,
    Pull { path: String, force: bool },
    Push { path: String, force: bool },
    Help,
}

fn parse_cli<I>(args: I) -> anyhow::Result<CliCommand>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter().skip(1);
    let Some(command) = args.next() else {
        return Ok(CliCommand::Help);
    };
    let mut force = false;
    let mut target = None;
    for arg in args {
        match arg.as_str() {
            "--force" | "-f" => force = true,
            other if target.is_none() && !other.starts_with('-') => {
                target = Some(other.to_string());
            }
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    match command.as_str() {
        "list" => Ok(CliCommand::List),
        "pull" => Ok(CliCommand::Pull {
            path: target.context("pull requires a sketch path")?,
            force,
        }),
        "push" => Ok(CliCommand::Push {
            path: target.context("push requires a sketch path")?,
            force,
        }),
        "--help" | "-h" | "help" => Ok(CliCommand::Help),
        other => anyhow::bail!("unknown command: {other}"),
    }
}

fn print_usage() {
    println!("Usage: cloudsketchd <command> [args]");
    println!("  list                 Print the merged cloud/local sketch tree");
    println!("  pull <path> [-f]     Copy a cloud sketch into the local mirror");
    println!("  push <path> [-f]     Copy the local mirror of a sketch to the cloud");
    println!();
    println!("Environment: CLOUDSKETCH_TOKEN, CLOUDSKETCH_USER_ID,");
    println!("             CLOUDSKETCH_DATA_DIR, CLOUDSKETCH_API_BASE");
}

fn normalize_cli_path(raw: &str) -> String {
    cloudsketch_core::normalize_remote_path(raw)
}

fn drain_events(events: &mut mpsc::UnboundedReceiver<EngineEvent>) {
    while let Ok(event) = events.try_recv() {
        match event {
            EngineEvent::Notice(message) => eprintln!("[cloudsketchd] {message}"),
            EngineEvent::StateChanged { .. }
            | EngineEvent::FilesPulled { .. }
            | EngineEvent::RefreshRequested => {}
        }
    }
}

fn print_tree(model: &TreeModel) {
    let tree = model.tree();
    let Some(root) = tree.root_id() else {
        println!("(empty)");
        return;
    };
    let mut stack: Vec<(usize, usize)> = tree
        .children_of(root)
        .iter()
        .rev()
        .map(|id| (*id, 0))
        .collect();
    while let Some((id, indent)) = stack.pop() {
        let node = tree.node(id);
        let marker = if node.synced { "*" } else { " " };
        println!("{}{marker} {}", "  ".repeat(indent), node.name);
        for child in tree.children_of(id).iter().rev() {
            stack.push((*child, indent + 1));
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let command = parse_cli(std::env::args())?;
    if command == CliCommand::Help {
        print_usage();
        return Ok(());
    }

    let config = SyncConfig::from_env()?;
    let token = std::env::var("CLOUDSKETCH_TOKEN").context("CLOUDSKETCH_TOKEN is not set")?;
    let user_id = std::env::var("CLOUDSKETCH_USER_ID").context("CLOUDSKETCH_USER_ID is not set")?;

    let client = match config.api_base.as_deref() {
        Some(base) => CreateClient::with_base_url(base, token),
        None => CreateClient::new(token),
    }?;
    let mirror = Arc::new(MirrorProvider::new(config.data_dir.clone()));
    let session = Session::new(user_id);
    let prefs = SyncPrefs::load(&config.prefs_file)
        .with_context(|| format!("failed to load preferences from {:?}", config.prefs_file))?;

    let mut model = TreeModel::new(client.clone(), Arc::clone(&mirror));
    model.set_session(Some(session.clone()));
    model.update_root().await.context("failed to build the sketch tree")?;

    match command {
        CliCommand::List => print_tree(&model),
        CliCommand::Pull { path, force } => {
            let path = normalize_cli_path(&path);
            let node = model
                .tree()
                .get(&path)
                .with_context(|| format!("no such sketch: {path}"))?
                .clone();
            let (engine, mut events) =
                SyncEngine::new(client, mirror, session, prefs, Arc::new(AcceptAll));
            let report = engine.pull(&node, force).await?;
            drain_events(&mut events);
            engine.refresh(model.tree_mut(), &path).await?;
            engine.prefs().save(&config.prefs_file)?;
            if !report.sketch_missing {
                eprintln!("[cloudsketchd] pulled {} file(s) into the mirror", report.files.len());
            }
        }
        CliCommand::Push { path, force } => {
            let path = normalize_cli_path(&path);
            let node = model
                .tree()
                .get(&path)
                .with_context(|| format!("no such sketch: {path}"))?
                .clone();
            let (engine, mut events) =
                SyncEngine::new(client, mirror, session, prefs, Arc::new(AcceptAll));
            let report = engine.push(&node, force).await?;
            drain_events(&mut events);
            engine.refresh(model.tree_mut(), &path).await?;
            engine.prefs().save(&config.prefs_file)?;
            eprintln!(
                "[cloudsketchd] pushed {} file(s), {} dir(s)",
                report.files, report.directories
            );
        }
        CliCommand::Help => unreachable!("handled above"),
    }
    Ok(())
}
