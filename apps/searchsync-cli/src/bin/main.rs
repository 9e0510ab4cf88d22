use std::env;
use std::path::PathBuf;

use anyhow::{bail, Context};
use tracing_subscriber::EnvFilter;

use searchsync_core::config::Config;
use searchsync_core::query::Query;
use searchsync_core::types::{Record, RecordKey, RecordType};
use searchsync_engine::bootstrap::{open_engine, open_engine_with, OnMismatch};

const USAGE: &str = "Usage: searchsync [-v|-q] [--config DIR] <command> [args...]

Commands:
  update                               apply pending changes to every index
  full-rebuild [--index NAME]...       rebuild indexes from the record store
  search <query> [--index NAME] [--page N] [--per-page N] [--type TYPE]
  status                               log head, watermarks and document counts
  compact                              drop change log entries every consumer has applied
  put <type> <key> <json>              insert or update a record
  delete <type> <key>                  delete a record";

struct Cli {
    verbosity: i8,
    config_dir: PathBuf,
    command: String,
    args: Vec<String>,
}

fn parse_args() -> Cli {
    let mut args: Vec<String> = env::args().skip(1).collect();
    let mut verbosity = 0;
    let mut config_dir = PathBuf::from(".");
    while let Some(first) = args.first().cloned() {
        match first.as_str() {
            "-v" | "--verbose" => verbosity += 1,
            "-q" | "--quiet" => verbosity -= 1,
            "--config" if args.len() > 1 => { config_dir = PathBuf::from(&args[1]); args.remove(0); }
            "-h" | "--help" => { println!("{USAGE}"); std::process::exit(0); }
            _ => break,
        }
        args.remove(0);
    }
    if args.is_empty() { eprintln!("{USAGE}"); std::process::exit(1); }
    let command = args.remove(0);
    Cli { verbosity, config_dir, command, args }
}

/// `RUST_LOG` wins; otherwise info, raised or lowered by -v / -q.
fn init_tracing(verbosity: i8) {
    let fallback = match verbosity { v if v > 0 => "debug", 0 => "info", _ => "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

/// Values following each occurrence of `flag`; everything else is positional.
fn split_flags(args: &[String], flags: &[&str]) -> anyhow::Result<(Vec<(String, String)>, Vec<String>)> {
    let (mut options, mut positional) = (Vec::new(), Vec::new());
    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];
        if flags.contains(&arg.as_str()) {
            let value = args.get(i + 1).with_context(|| format!("{arg} requires a value"))?;
            options.push((arg.clone(), value.clone()));
            i += 2;
        } else if arg.starts_with("--") {
            bail!("unknown option {arg}");
        } else {
            positional.push(arg.clone());
            i += 1;
        }
    }
    Ok((options, positional))
}

fn option<'a>(options: &'a [(String, String)], flag: &str) -> Option<&'a str> {
    options.iter().rev().find(|(f, _)| f == flag).map(|(_, v)| v.as_str())
}

fn main() -> anyhow::Result<()> {
    let cli = parse_args();
    init_tracing(cli.verbosity);
    let config = Config::load_from(&cli.config_dir).map_err(|e| { eprintln!("Error loading config: {}", e); e })?;
    let settings = config.settings()?;
    tracing::debug!(config = %cli.config_dir.display(), indexes = settings.indexes.len(), "settings loaded");
    let args = &cli.args;

    match cli.command.as_str() {
        "update" => {
            let opened = open_engine(&settings)?;
            for (consumer, outcome) in opened.engine.apply_all()? {
                let r = &outcome.report;
                println!("✅ {consumer}: watermark {} ({} entries, {} upserted, {} deleted, {} skipped)", outcome.watermark, r.entries_read, r.upserted, r.deleted, r.skipped_unregistered);
                for failure in &r.failures { println!("   ⚠️  {failure}"); }
            }
        }
        "full-rebuild" => {
            let (options, positional) = split_flags(args, &["--index"])?;
            if !positional.is_empty() { bail!("unexpected argument {}", positional[0]); }
            let opened = open_engine_with(&settings, OnMismatch::Recreate)?;
            let names: Vec<&str> = options.iter().map(|(_, v)| v.as_str()).collect();
            let report = if names.is_empty() { opened.engine.rebuild_all()? } else { opened.engine.rebuild(&names)? };
            for index in &report.indexes {
                println!("📦 {}: {} documents", index.index, index.documents);
                for (record_type, count) in &index.per_type { println!("   {record_type}: {count}"); }
                for failure in &index.failures { println!("   ⚠️  {failure}"); }
            }
            let pruned = opened.engine.compact_log()?;
            println!("✅ Rebuild complete at snapshot {} ({} log entries compacted)", report.snapshot, pruned);
        }
        "search" => {
            let (options, positional) = split_flags(args, &["--index", "--page", "--per-page", "--type"])?;
            let Some(text) = positional.first() else { bail!("search needs a query\n\n{USAGE}") };
            let opened = open_engine(&settings)?;
            let index_name = match option(&options, "--index") {
                Some(name) => name.to_string(),
                None => opened.engine.registry().schema_names().into_iter().next().context("no index is configured")?,
            };
            let page: usize = option(&options, "--page").map(str::parse::<usize>).transpose().context("--page must be a number")?.unwrap_or(1);
            let per_page: usize = option(&options, "--per-page").map(str::parse::<usize>).transpose().context("--per-page must be a number")?.unwrap_or(10);
            let mut query = Query::parse(text.as_str());
            if let Some(record_type) = option(&options, "--type") { query = query.filter(Query::RecordType(RecordType::new(record_type)?)); }

            let index = opened.engine.index(&index_name)?;
            let results = index.search(query, page, per_page, Some(text.as_str()))?;
            println!("🔍 {} results for \"{}\" (page {}/{}, {:.1} ms)", results.total(), text, results.page(), results.num_pages().max(1), results.search_time().as_secs_f64() * 1000.0);
            if let Some(suggestion) = results.spell_suggestion() { println!("💡 Did you mean: {suggestion}"); }
            for (i, result) in results.results()?.iter().enumerate() {
                let label = result.stored("name").first().cloned().unwrap_or_else(|| result.id().to_string());
                println!("  {}. score={:.4}  {}  {}", results.offset() + i + 1, result.score(), result.id(), label);
            }
            let counts = results.type_counts()?;
            if counts.len() > 1 { for (record_type, count) in counts { println!("  📊 {record_type}: {count}"); } }
        }
        "status" => {
            let opened = open_engine(&settings)?;
            let status = opened.engine.status()?;
            println!("Change log head: {}", status.head);
            for consumer in &status.consumers { println!("  consumer {}: watermark {} ({} pending)", consumer.name, consumer.watermark, consumer.pending); }
            for (index, docs) in &status.indexes { println!("  index {index}: {docs} documents"); }
            for record_type in opened.engine.registry().record_types() {
                println!("  records {record_type}: {}", opened.store.count(&record_type)?);
            }
        }
        "compact" => {
            let opened = open_engine(&settings)?;
            println!("🧹 Removed {} change log entries", opened.engine.compact_log()?);
        }
        "put" => {
            let [record_type, key, json] = args.as_slice() else { bail!("usage: put <type> <key> <json>") };
            let data: serde_json::Value = serde_json::from_str(json).context("record data must be JSON")?;
            let opened = open_engine(&settings)?;
            let op = opened.store.save(&Record::new(RecordType::new(record_type.as_str())?, key.as_str(), data))?;
            println!("✅ {record_type} #{key} {}", op.as_str());
        }
        "delete" => {
            let [record_type, key] = args.as_slice() else { bail!("usage: delete <type> <key>") };
            let opened = open_engine(&settings)?;
            let removed = opened.store.delete(&RecordType::new(record_type.as_str())?, &RecordKey::new(key.as_str()))?;
            if removed { println!("✅ {record_type} #{key} deleted"); } else { println!("{record_type} #{key} does not exist"); }
        }
        other => { eprintln!("Unknown command: {}\n\n{USAGE}", other); std::process::exit(1); }
    }
    Ok(())
}
