mod display;
pub mod settings;
mod tab;

#[cfg(test)]
mod tests;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::cli::{Cli, Command};
use crate::config::Config;
use crate::db::Database;
use crate::identity::{EntityType, Resolver};
use crate::notices::{ConsoleNotices, Notices};
use crate::sync::Hub;

use self::display::{describe_path, entity_header, entity_row};

pub use self::tab::Tab;

pub async fn run(cli: Cli) -> Result<()> {
    let config = Config::from_cli(&cli)?;

    if let Command::Analyze { input } = &cli.command {
        run_analyze(&config, input);
        return Ok(());
    }

    let tab = open_tab(&config).await?;
    match cli.command {
        Command::Analyze { .. } => {}
        Command::Status { input } => run_status(&tab, &input),
        Command::Toggle { input, children } => run_toggle(&tab, &input, &children).await,
        Command::Mark { input } => run_mark(&tab, &input).await,
        Command::Unmark { input } => run_unmark(&tab, &input).await,
        Command::List { kind } => run_list(&tab, kind),
        Command::Export { output } => run_export(&tab, output.as_deref())?,
        Command::Import { file } => run_import(&tab, &file).await?,
        Command::Reset { yes } => run_reset(&tab, yes).await,
        Command::Prefs => run_prefs(&tab),
        Command::Locale { code } => run_locale(&tab, &code).await,
        Command::Highlight => run_highlight(&tab).await,
    }

    Ok(())
}

async fn open_tab(config: &Config) -> Result<Tab> {
    let notices: Arc<dyn Notices> = Arc::new(ConsoleNotices);
    let db = Database::open(&config.database_path, config.busy_timeout)?;
    if let Err(err) = db.migrate() {
        if err.needs_reload() {
            notices.request_reload(&err.to_string());
        }
        return Err(err).with_context(|| {
            format!(
                "failed to prepare database at {}",
                config.database_path.display()
            )
        });
    }
    Tab::open(Arc::new(db), config, Hub::new(), notices).await
}

fn run_analyze(config: &Config, input: &str) {
    let info = Resolver::new(config.origin.clone()).analyze(input);
    for line in describe_path(&info) {
        println!("{line}");
    }
}

fn run_status(tab: &Tab, input: &str) {
    match tab.status(input) {
        Some((kind, id, state)) => {
            println!("{kind} {id}: {state}");
            if let Some(entity) = tab.repo().get(kind, &id) {
                if let Some(name) = entity.name {
                    println!("  Name: {name}");
                }
                if let Some(season) = entity.season_id {
                    println!("  Season: {season}");
                }
                if let Some(series) = entity.series_id {
                    println!("  Series: {series}");
                }
            }
        }
        None => println!("Not a trackable page: {input}"),
    }
}

async fn run_toggle(tab: &Tab, input: &str, children: &[String]) {
    match tab.toggle(input, children).await {
        Some((kind, state)) => println!("{kind} is now {state}"),
        None => println!("Not a trackable page: {input}"),
    }
}

async fn run_mark(tab: &Tab, input: &str) {
    match tab.mark_seen(input).await {
        Some(kind) => println!("Marked {kind} as seen."),
        None => println!("Only episode and movie pages can be marked seen: {input}"),
    }
}

async fn run_unmark(tab: &Tab, input: &str) {
    if tab.unmark(input).await {
        println!("Removed {input} from tracking.");
    } else {
        println!("Nothing to remove for {input}");
    }
}

fn run_list(tab: &Tab, kind: Option<EntityType>) {
    let kinds = match kind {
        Some(kind) => vec![kind],
        None => EntityType::ALL.to_vec(),
    };

    let mut any = false;
    for kind in kinds {
        let items = tab.repo().get_all(kind);
        if items.is_empty() {
            continue;
        }
        any = true;
        println!("\n{} ({})", kind.as_str().to_uppercase(), items.len());
        println!("{}", entity_header());
        for item in items {
            println!("{}", entity_row(&item));
        }
    }
    if !any {
        println!("No tracked entries yet. Run `watchmark mark <url>` first.");
    }
}

fn run_export(tab: &Tab, output: Option<&Path>) -> Result<()> {
    let doc = settings::export(tab.repo());
    let text = serde_json::to_string_pretty(&doc)?;
    match output {
        Some(path) => {
            fs::write(path, text)
                .with_context(|| format!("failed to write export to {}", path.display()))?;
            println!("Exported watch history to {}", path.display());
        }
        None => println!("{text}"),
    }
    Ok(())
}

async fn run_import(tab: &Tab, file: &Path) -> Result<()> {
    let raw = fs::read_to_string(file)
        .with_context(|| format!("failed to read import file {}", file.display()))?;
    let doc = serde_json::from_str(&raw)
        .with_context(|| format!("import file {} is not valid JSON", file.display()))?;
    let report = settings::import(tab.repo(), &doc).await?;
    println!(
        "Imported {} entries ({} skipped, {} failed).",
        report.applied, report.skipped, report.failed
    );
    Ok(())
}

async fn run_reset(tab: &Tab, yes: bool) {
    if !yes {
        println!("This deletes every tracked entry. Run again with --yes to confirm.");
        return;
    }
    if settings::reset(tab.repo()).await {
        println!("All tracked entries deleted.");
    } else {
        println!("Reset did not complete; some entries may remain.");
    }
}

fn run_prefs(tab: &Tab) {
    let prefs = tab.repo().get_prefs();
    println!("Language:      {}", prefs.user_lang());
    println!(
        "Row highlight: {}",
        if prefs.row_highlight() { "on" } else { "off" }
    );
}

async fn run_locale(tab: &Tab, code: &str) {
    let update = settings::set_locale(tab.repo(), code).await;
    print_warnings(&update.warnings);
    println!("Language: {}", update.prefs.user_lang());
}

async fn run_highlight(tab: &Tab) {
    let update = settings::toggle_highlight(tab.repo()).await;
    print_warnings(&update.warnings);
    println!(
        "Row highlight: {}",
        if update.prefs.row_highlight() { "on" } else { "off" }
    );
}

fn print_warnings(warnings: &[String]) {
    for warning in warnings {
        println!("Warning: {warning}");
    }
}
