//! # Forked CLI
//!
//! Edit and merge forks of a structured value stored in a local `SQLite` file.

use anyhow::{Context, Result};
use forked_core::{Atom, Repository, Schema};
use std::env;
use tracing_subscriber::EnvFilter;

mod config;
mod persistence;

use config::CliConfig;
use persistence::SqliteStore;

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    let config = CliConfig::from_env()?;
    let cmd = args[1].as_str();

    match cmd {
        "help" | "--help" | "-h" => print_help(),
        "init" => init(&config, &args)?,
        "forks" | "show" | "log" => {
            let repo = open(&config)?.1;
            read_command(&repo, cmd, &args)?;
        }
        "fork" | "set" | "add" | "remove" | "incr" | "seq" | "text" | "merge" | "sync" => {
            let (store, mut repo) = open(&config)?;
            write_command(&mut repo, cmd, &args)?;
            store
                .save_repository(&repo)
                .context("Failed to save repository")?;
        }
        _ => {
            eprintln!("Unknown command: {cmd}");
            print_help();
            std::process::exit(1);
        }
    }

    Ok(())
}

fn init(config: &CliConfig, args: &[String]) -> Result<()> {
    let json = arg(args, 2, "init <schema-json>")?;
    let schema: Schema = serde_json::from_str(json).context("Invalid schema JSON")?;

    let store = SqliteStore::open(&config.db_path)
        .with_context(|| format!("Failed to open {}", config.db_path.display()))?;
    store.initialize(&schema)?;
    store.save_repository(&Repository::new(schema))?;

    tracing::info!(path = %config.db_path.display(), "Initialized repository");
    Ok(())
}

fn open(config: &CliConfig) -> Result<(SqliteStore, Repository)> {
    let store = SqliteStore::open(&config.db_path)
        .with_context(|| format!("Failed to open {}", config.db_path.display()))?;
    let repo = store
        .load_repository()
        .context("Failed to load repository")?
        .with_merger(config.merger())
        .with_policy(config.policy);
    Ok((store, repo))
}

fn read_command(repo: &Repository, cmd: &str, args: &[String]) -> Result<()> {
    match cmd {
        "forks" => {
            for fork in repo.forks() {
                let head = repo.graph().commit(&fork.head)?;
                println!("{:<16} {} {}", fork.name, fork.head.short(), head.clock);
            }
        }
        "show" => {
            let fork = arg(args, 2, "show <fork>")?;
            let value = repo.value(fork)?;
            println!("{}", serde_json::to_string_pretty(&value.to_json())?);
        }
        "log" => {
            let fork = arg(args, 2, "log <fork>")?;
            for commit in repo.log(fork)? {
                let parents: Vec<String> = commit.parents.iter().map(|p| p.short()).collect();
                println!(
                    "{} {:>8} [{}]",
                    commit.id.short(),
                    commit.clock.to_string(),
                    parents.join(", ")
                );
            }
        }
        _ => unreachable!("dispatched by main"),
    }
    Ok(())
}

fn write_command(repo: &mut Repository, cmd: &str, args: &[String]) -> Result<()> {
    match cmd {
        "fork" => {
            let name = arg(args, 2, "fork <name> [<from>]")?;
            match args.get(3) {
                Some(from) => repo.branch(from, name)?,
                None => repo.create_fork(name)?,
            };
        }
        "set" => {
            let (fork, field, value) = field_args(args, "set <fork> <field> <json>")?;
            let atom = parse_atom(value)?;
            repo.edit(fork, |e| e.set(field, atom))?;
        }
        "add" => {
            let (fork, field, value) = field_args(args, "add <fork> <field> <json>")?;
            let atom = parse_atom(value)?;
            repo.edit(fork, |e| e.insert(field, atom).map(|_| ()))?;
        }
        "remove" => {
            let (fork, field, value) = field_args(args, "remove <fork> <field> <json>")?;
            let atom = parse_atom(value)?;
            repo.edit(fork, |e| e.remove(field, &atom).map(|_| ()))?;
        }
        "incr" => {
            let (fork, field, delta) = field_args(args, "incr <fork> <field> <n>")?;
            let delta: i64 = delta.parse().context("Invalid increment")?;
            repo.edit(fork, |e| e.increment(field, delta).map(|_| ()))?;
        }
        "seq" => {
            let (fork, field, items) = field_args(args, "seq <fork> <field> <json-array>")?;
            let items: Vec<serde_json::Value> =
                serde_json::from_str(items).context("Expected a JSON array")?;
            let items = items
                .into_iter()
                .map(Atom::try_from)
                .collect::<Result<Vec<_>, _>>()?;
            repo.edit(fork, |e| {
                *e.sequence(field)? = items;
                Ok(())
            })?;
        }
        "text" => {
            let (fork, field, content) = field_args(args, "text <fork> <field> <string>")?;
            repo.edit(fork, |e| {
                content.clone_into(e.text(field)?);
                Ok(())
            })?;
        }
        "merge" => {
            let source = arg(args, 2, "merge <source> <target>")?;
            let target = arg(args, 3, "merge <source> <target>")?;
            let (head, outcome) = repo.merge_into_with_outcome(source, target)?;
            println!("{target} -> {} ({outcome:?})", head.short());
        }
        "sync" => match repo.merge_all()? {
            Some(head) => println!("all forks at {}", head.short()),
            None => println!("no forks"),
        },
        _ => unreachable!("dispatched by main"),
    }
    Ok(())
}

fn arg<'a>(args: &'a [String], index: usize, usage: &str) -> Result<&'a str> {
    args.get(index)
        .map(String::as_str)
        .with_context(|| format!("Usage: forked {usage}"))
}

fn field_args<'a>(args: &'a [String], usage: &str) -> Result<(&'a str, &'a str, &'a str)> {
    Ok((arg(args, 2, usage)?, arg(args, 3, usage)?, arg(args, 4, usage)?))
}

/// JSON scalar, or the raw argument as a string when it is not valid JSON.
fn parse_atom(raw: &str) -> Result<Atom> {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) => Atom::try_from(value).context("Field values must be JSON scalars"),
        Err(_) => Ok(Atom::from(raw)),
    }
}

fn print_help() {
    println!(
        r#"Forked CLI

USAGE:
    forked <COMMAND> [ARGS]

COMMANDS:
    init <schema-json>                Create a repository, e.g. '{{"title":"register"}}'
    fork <name> [<from>]              Create a fork, branching from <from> if given
    forks                             List forks and their heads
    set <fork> <field> <json>         Write a register field
    add <fork> <field> <json>         Add an element to a set field
    remove <fork> <field> <json>      Remove an element from a set field
    incr <fork> <field> <n>           Add n to a counter field
    seq <fork> <field> <json-array>   Replace a sequence field
    text <fork> <field> <string>      Replace a text field
    merge <source> <target>           Merge source into target
    sync                              Merge every fork into one value
    show <fork>                       Print a fork's value as JSON
    log <fork>                        Print a fork's history, newest first
    help                              Show this help message

ENVIRONMENT:
    FORKED_DB_PATH       Database file (default ./forked.db)
    FORKED_MERGE_POLICY  pull or symmetric (default pull)
    FORKED_STRATEGIES    Enabled strategies, comma-separated (default all)
    RUST_LOG             Log filter (default info)

EXAMPLES:
    forked init '{{"title":"register","tags":"set","visits":"counter"}}'
    forked fork phone main
    forked incr phone visits 3
    forked merge phone main
"#
    );
}
