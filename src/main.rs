use clap::Parser;
use pagewise::{
    ConfigDb,
    DataDir,
    Services,
    Settings,
    cli::{Cli, Command, ConfigAction, DocumentsAction, IndexAction, QueryArgs},
    context::QueryAnswer,
    error::{self, Error},
    mcp,
    query::{RawResponse, RawStatus},
    settings,
};
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("PAGEWISE_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn runtime() -> error::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::Config(format!("failed to start tokio runtime: {e}")))
}

fn main() -> error::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let config_db = ConfigDb::open(&data_dir.config_db())?;
    let settings = Settings::resolve(Some(&config_db), &cli.overrides())?;

    match cli.command {
        Command::Index { action } => {
            let services = Services::open(&data_dir, settings)?;
            match action {
                IndexAction::Add { outline } => {
                    let (name, count) =
                        runtime()?.block_on(services.add_outline(&outline))?;
                    println!("Indexed {count} sections from '{name}'");
                }
                IndexAction::Remove { name } => {
                    let removed = services.index.delete_document(&name)?;
                    if removed == 0 {
                        println!("No sections indexed for '{name}'");
                    } else {
                        println!("Removed {removed} sections of '{name}'");
                    }
                }
                IndexAction::Clear => {
                    let removed = services.index.clear()?;
                    println!(
                        "Removed {} sections from {} documents",
                        removed.total_nodes, removed.total_documents
                    );
                }
                IndexAction::Rebuild => cmd_rebuild(&services)?,
                IndexAction::Stats { json } => cmd_stats(&services, json)?,
            }
        }
        Command::Query(args) => {
            let services = Services::open(&data_dir, settings)?;
            cmd_query(&services, &args)?;
        }
        Command::Documents { action, json } => {
            let services = Services::open(&data_dir, settings)?;
            match action {
                Some(DocumentsAction::Remove { name }) => {
                    let report = services.remove_document(&name)?;
                    println!(
                        "Removed '{name}': {} sections, outline {}, source {}",
                        report.sections,
                        if report.outline { "deleted" } else { "absent" },
                        if report.source { "deleted" } else { "absent" },
                    );
                }
                None => cmd_documents(&services, json)?,
            }
        }
        Command::Config { action } => match action {
            ConfigAction::Show { json } => {
                config_show(&settings, &config_db, json)?;
            }
            ConfigAction::Set { key, value } => {
                config_set(&config_db, &key, &value)?;
            }
            ConfigAction::Clear { key } => config_clear(&config_db, &key)?,
        },
        Command::Mcp => {
            let services = Services::open(&data_dir, settings)?;
            mcp::run_mcp(services)?;
        }
        Command::Completions(_) => {}
    }

    Ok(())
}

fn cmd_rebuild(services: &Services) -> error::Result<()> {
    if services.library.list()?.is_empty() {
        return Err(Error::Config(format!(
            "no outlines found in {}",
            services.library.results_dir().display()
        )));
    }

    let report = runtime()?.block_on(services.rebuild())?;
    println!(
        "Rebuilt {} documents ({} sections)",
        report.rebuilt_documents, report.indexed_sections
    );
    for error in &report.errors {
        eprintln!("  failed: {error}");
    }
    Ok(())
}

fn cmd_stats(services: &Services, json: bool) -> error::Result<()> {
    let stats = services.index.get_stats()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("Sections:  {}", stats.total_nodes);
    println!("Documents: {}", stats.total_documents);
    for name in &stats.documents {
        let count = services.index.get_document_node_count(name)?;
        println!("  {name} ({count} sections)");
    }
    Ok(())
}

fn cmd_query(services: &Services, args: &QueryArgs) -> error::Result<()> {
    let top_k = args
        .count
        .filter(|k| *k > 0)
        .unwrap_or(services.settings.top_k);
    let rt = runtime()?;

    if args.raw {
        let raw = rt.block_on(
            services.query_engine().answer_raw(&args.query, top_k),
        )?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&raw)?);
        } else {
            print_raw(&raw);
        }
        if raw.status == RawStatus::Error {
            std::process::exit(1);
        }
        return Ok(());
    }

    let answer =
        rt.block_on(services.ask(&args.query, top_k, args.outline))?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&answer)?);
    } else {
        print_answer(&answer);
    }
    Ok(())
}

fn print_answer(answer: &QueryAnswer) {
    println!("{}", answer.answer);
    if !answer.sources.is_empty() {
        println!();
        println!("Sources:");
        for source in &answer.sources {
            println!("  {source}");
        }
    }
    tracing::debug!(thinking = %answer.thinking, "retrieval notes");
}

fn print_raw(raw: &RawResponse) {
    if let Some(message) = &raw.message {
        println!("{message}");
    }
    for (i, hit) in raw.results.iter().enumerate() {
        println!(
            "{:>3}. {:.3}  [{}] {} ({})",
            i + 1,
            hit.score,
            hit.doc_name,
            hit.title,
            hit.node_id
        );
        match (&hit.text, &hit.error) {
            (Some(text), _) => {
                for line in text.lines().take(3) {
                    println!("       {line}");
                }
            }
            (None, Some(error)) => println!("       error: {error}"),
            (None, None) if !hit.summary.is_empty() => {
                println!("       summary: {}", hit.summary);
            }
            _ => {}
        }
    }
}

#[derive(serde::Serialize)]
struct DocumentRow {
    name: String,
    outline: Option<String>,
    indexed_sections: usize,
}

fn cmd_documents(services: &Services, json: bool) -> error::Result<()> {
    let mut rows = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for entry in services.library.load_all()? {
        let name = entry.doc.doc_name;
        let indexed_sections = services.index.get_document_node_count(&name)?;
        seen.insert(name.clone());
        rows.push(DocumentRow {
            name,
            outline: Some(entry.file),
            indexed_sections,
        });
    }
    for name in services.index.documents()? {
        if seen.contains(&name) {
            continue;
        }
        let indexed_sections = services.index.get_document_node_count(&name)?;
        rows.push(DocumentRow {
            name,
            outline: None,
            indexed_sections,
        });
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!("No documents.");
        return Ok(());
    }
    for row in &rows {
        let outline = row.outline.as_deref().unwrap_or("no outline");
        println!(
            "{}  {} sections  ({outline})",
            row.name, row.indexed_sections
        );
    }
    Ok(())
}

fn config_show(
    settings: &Settings,
    config_db: &ConfigDb,
    json: bool,
) -> error::Result<()> {
    let rows = settings.rows(Some(config_db))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    for row in rows {
        let marker = if row.stored { "  (config.redb)" } else { "" };
        println!("{:<20} {}{marker}", row.name, row.value);
    }
    Ok(())
}

fn known_key(key: &str) -> error::Result<&'static settings::SettingKey> {
    settings::lookup(key).ok_or_else(|| {
        let names: Vec<_> = settings::ALL.iter().map(|k| k.name).collect();
        Error::Config(format!(
            "unknown setting '{key}' (expected one of: {})",
            names.join(", ")
        ))
    })
}

fn config_set(config_db: &ConfigDb, key: &str, value: &str) -> error::Result<()> {
    let setting = known_key(key)?;
    let numeric = [settings::TOP_K.name, settings::QUERY_TIMEOUT.name];
    if numeric.contains(&setting.name) && value.trim().parse::<usize>().is_err()
    {
        return Err(Error::Config(format!(
            "setting '{key}' must be a non-negative integer, got '{value}'"
        )));
    }

    config_db.set_setting(setting.name, value.trim())?;
    if setting.secret {
        println!("Set {key}");
    } else {
        println!("Set {key} = {}", value.trim());
    }
    Ok(())
}

fn config_clear(config_db: &ConfigDb, key: &str) -> error::Result<()> {
    let setting = known_key(key)?;
    if config_db.remove_setting(setting.name)? {
        println!("Cleared {key}");
    } else {
        println!("{key} was not set");
    }
    Ok(())
}
