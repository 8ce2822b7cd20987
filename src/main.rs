// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! tessera - command line front end for compiled tessera units.
//!
//! ## Commands
//!
//! - `run`: link one or more units into a fresh engine and execute them
//! - `disasm`: print the instruction listing of a unit
//! - `names`: print the identifier table a unit was written with

mod cli;

use clap::Parser;
use owo_colors::OwoColorize;
use std::collections::BTreeSet;
use std::path::Path;
use std::process::ExitCode;
use tessera_engine::link;
use tessera_engine::{AsyncLoader, Engine, Interner, Value, VmOptions};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Commands, FileArgs, RunArgs};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let options = VmOptions::default()
        .with_max_call_depth(cli.max_depth)
        .with_trace(cli.trace);

    let result = match &cli.command {
        Commands::Run(args) => run(args, options).await,
        Commands::Disasm(args) => disasm(args).await,
        Commands::Names(args) => names(args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{}: {}", "Error".red().bold(), message);
            ExitCode::FAILURE
        }
    }
}

/// Links every unit, then runs them in order on a blocking thread.
async fn run(args: &RunArgs, options: VmOptions) -> Result<(), String> {
    let engine = Engine::with_options(options);
    if let Some(session) = &args.session {
        engine.env().set_session_id(session);
    }

    let loader = AsyncLoader::new(engine.names().clone());
    let mut units = Vec::with_capacity(args.files.len());
    for (path, unit) in args.files.iter().zip(loader.load_all(&args.files).await) {
        units.push(unit.map_err(|e| describe(path, e))?);
    }

    let files = args.files.clone();
    tokio::task::spawn_blocking(move || {
        for (path, unit) in files.iter().zip(&units) {
            let value = engine.run_unit(unit).map_err(|e| describe(path, e))?;
            if !matches!(value, Value::Nil) {
                println!("{}", value);
            }
        }
        let tasks = engine.vm().wait();
        tracing::debug!(tasks, yields = engine.vm().yield_count(), "finished");
        Ok(())
    })
    .await
    .map_err(|e| format!("interpreter thread failed: {}", e))?
}

async fn disasm(args: &FileArgs) -> Result<(), String> {
    let names = std::sync::Arc::new(Interner::new());
    let unit = AsyncLoader::new(names.clone())
        .load(&args.file)
        .await
        .map_err(|e| describe(&args.file, e))?;

    println!(
        "{} {} ({} instructions, {} labels)",
        "unit".bright_cyan().bold(),
        args.file.display(),
        unit.code.len().yellow(),
        unit.label_count.yellow()
    );
    print!("{}", unit.code.disassemble(&names));
    Ok(())
}

async fn names(args: &FileArgs) -> Result<(), String> {
    let bytes = tokio::fs::read(&args.file)
        .await
        .map_err(|e| describe(&args.file, e))?;
    let (table, unit) = link::decode(&bytes).map_err(|e| describe(&args.file, e))?;
    let used: BTreeSet<_> = unit.code.all_identifiers().into_iter().collect();

    for (id, name) in &table.entries {
        if used.contains(id) {
            println!("{:>6}  {}", id.0.to_string().green(), name);
        } else {
            println!("{:>6}  {}", id.0.to_string().dimmed(), name.dimmed());
        }
    }
    println!(
        "{} names, {} used by the unit",
        table.len().yellow(),
        used.len().yellow()
    );
    Ok(())
}

fn describe(path: &Path, err: impl std::fmt::Display) -> String {
    format!("{}: {}", path.display().cyan(), err)
}
