use std::path::Path;

use anyhow::Context as _;

use bd_workflow::db::{self, migrations};
use bd_workflow::db::migrations::{MigrationSource, Migrator};

use super::{print_json, Context, OutputFormat};

/// Which store a migration command targets. Each store keeps its own ledger.
#[derive(Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Store {
    Coordination,
    Engine,
    Issues,
    All,
}

impl Store {
    fn name(self) -> &'static str {
        match self {
            Store::Coordination => "coordination",
            Store::Engine => "engine",
            Store::Issues => "issues",
            Store::All => "all",
        }
    }

    fn expand(self) -> Vec<Store> {
        match self {
            Store::All => vec![Store::Coordination, Store::Engine, Store::Issues],
            one => vec![one],
        }
    }

    fn path(self, ctx: &Context) -> &Path {
        let database = &ctx.config.database;
        match self {
            Store::Engine => &database.engine_path,
            Store::Issues => &database.issues_path,
            Store::Coordination | Store::All => &database.coordination_path,
        }
    }
}

fn migrator(ctx: &Context) -> Migrator {
    Migrator::new(MigrationSource::resolve(&ctx.config.migrations.directory))
}

fn open(ctx: &Context, store: Store) -> anyhow::Result<rusqlite::Connection> {
    let path = store.path(ctx);
    db::open_or_create(path).with_context(|| format!("failed to open {} store {}", store.name(), path.display()))
}

pub fn run(ctx: &Context, store: Store) -> anyhow::Result<u8> {
    let migrator = migrator(ctx);
    for target in store.expand() {
        let conn = open(ctx, target)?;
        let applied = migrator
            .migrate(&conn)
            .with_context(|| format!("migration of {} store failed", target.name()))?;
        if applied.is_empty() {
            println!("{}: up to date", target.name());
        } else {
            println!("{}: applied {} migration(s): {}", target.name(), applied.len(), applied.join(", "));
        }
    }
    Ok(0)
}

pub fn status(ctx: &Context, store: Store, format: OutputFormat) -> anyhow::Result<u8> {
    let migrator = migrator(ctx);
    let mut reports = Vec::new();
    for target in store.expand() {
        let conn = open(ctx, target)?;
        reports.push((target, migrator.status(&conn)?));
    }

    if format == OutputFormat::Json {
        let by_store: serde_json::Map<String, serde_json::Value> = reports
            .iter()
            .map(|(s, r)| serde_json::to_value(r).map(|v| (s.name().to_string(), v)))
            .collect::<serde_json::Result<_>>()?;
        print_json(&by_store)?;
        return Ok(0);
    }

    let mut healthy = true;
    for (target, report) in &reports {
        println!("Store: {} ({})", target.name(), target.path(ctx).display());
        println!("  Total:   {}", report.total);
        println!("  Applied: {}", report.applied);
        println!("  Pending: {}", report.pending);
        for m in &report.pending_migrations {
            println!("    - {} {}", m.version, m.description);
        }
        if !report.failed.is_empty() {
            healthy = false;
            println!("  Failed:  {}", report.failed.len());
            for f in &report.failed {
                println!("    - {} {}: {}", f.version, f.description, f.error_message.as_deref().unwrap_or("unknown error"));
            }
        }
        if !report.mismatches.is_empty() {
            healthy = false;
            println!("  Checksum mismatches: {}", report.mismatches.len());
            for m in &report.mismatches {
                println!("    - {} recorded {} now {}", m.version, m.recorded, m.actual);
            }
        }
    }
    Ok(if healthy { 0 } else { 1 })
}

pub fn create(ctx: &Context, name: &str) -> anyhow::Result<u8> {
    let path = migrations::create_migration(&ctx.config.migrations.directory, name, chrono::Utc::now())?;
    println!("Created migration {}", path.display());
    Ok(0)
}

pub fn retry(ctx: &Context, version: &str, store: Store) -> anyhow::Result<u8> {
    let migrator = migrator(ctx);
    for target in store.expand() {
        let conn = open(ctx, target)?;
        if migrator.retry(&conn, version)? {
            println!("{}: cleared failed migration {}; it will run on the next migrate", target.name(), version);
        } else {
            println!("{}: no failed migration {}", target.name(), version);
        }
    }
    Ok(0)
}
