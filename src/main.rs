#[cfg(not(feature = "cli"))]
compile_error!("The `salvage` binary requires the `cli` feature. Build with `--features cli`.");

use clap::Parser;
use std::fs::File;
use std::io::Write;
use std::process;

use salvage::cli;
use salvage::cli::app::{Cli, ColorMode, Commands, RowFormat};
use salvage::sqlite::export::ExportFormat;
use salvage::SalvageError;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    // Configure rayon thread pool if --threads was specified
    if cli.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(cli.threads)
            .build_global()
            .ok(); // Ignore if already initialized
    }

    match cli.color {
        ColorMode::Always => colored::control::set_override(true),
        ColorMode::Never => colored::control::set_override(false),
        ColorMode::Auto => {} // colored auto-detects tty
    }

    let writer_result: Result<Box<dyn Write>, SalvageError> = match &cli.output {
        Some(path) => File::create(path)
            .map(|f| Box::new(f) as Box<dyn Write>)
            .map_err(|e| SalvageError::Io(format!("Cannot create {}: {}", path, e))),
        None => Ok(Box::new(std::io::stdout()) as Box<dyn Write>),
    };

    let mut writer = match writer_result {
        Ok(w) => w,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Recover {
            file,
            schema,
            reference,
            tables,
            corrupted,
            strict,
            ceiling,
            filters,
            no_unknown,
            on_conflict,
            format,
            include_known,
            page_size,
            mmap,
            verbose,
        } => cli::recover::execute(
            &cli::recover::RecoverOptions {
                file,
                schema,
                reference,
                tables,
                corrupted,
                strict,
                ceiling,
                filters,
                no_unknown,
                on_conflict,
                format: match format {
                    RowFormat::Raw => ExportFormat::Raw,
                    RowFormat::Tab => ExportFormat::Tab,
                    RowFormat::Csv => ExportFormat::Csv,
                    RowFormat::Json => ExportFormat::Json,
                },
                include_known,
                page_size,
                mmap,
                verbose,
            },
            &mut writer,
        ),

        Commands::Schema {
            reference,
            schema,
            json,
        } => cli::schema::execute(
            &cli::schema::SchemaOptions {
                reference,
                schema,
                json,
            },
            &mut writer,
        ),

        Commands::Info {
            file,
            verbose,
            json,
            page_size,
        } => cli::info::execute(
            &cli::info::InfoOptions {
                file,
                verbose,
                json,
                page_size,
            },
            &mut writer,
        ),

        Commands::Completions { shell } => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            clap_complete::generate(shell, &mut cmd, "salvage", &mut std::io::stdout());
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
