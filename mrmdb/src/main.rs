use std::error::Error;
use std::path::PathBuf;

use clap::Parser;
use log::{error, info};
use mrmdb::data::validator::{describe_collection, validate_collection};
use mrmdb::run::runner::run;
use mrmdb::settings::{Method, Settings};

#[derive(Parser, Debug)]
#[command(name = "mrm-optimize", version, about = "Select quantifier/qualifier MRM transitions from reference spectral libraries")]
struct Args {
    /// JSON settings file; command-line flags take precedence
    #[arg(long)]
    config: Option<PathBuf>,
    /// Interference method
    #[arg(long, value_enum)]
    method: Option<Method>,
    /// Target fragment library (file or directory of partitions)
    #[arg(long)]
    library: Option<PathBuf>,
    /// Interference collection replacing the method's default
    #[arg(long, visible_alias = "custom-interference")]
    interference: Option<PathBuf>,
    /// Skip the column check of a custom interference collection
    #[arg(long)]
    skip_validation: bool,
    /// Target table with an InChIKey column
    #[arg(long)]
    targets: Option<PathBuf>,
    /// Result table
    #[arg(long)]
    output: Option<PathBuf>,
    /// Directory of the library key index cache
    #[arg(long)]
    cache_dir: Option<PathBuf>,
    /// Number of targets processed in batch mode
    #[arg(long, conflicts_with = "all")]
    max_compounds: Option<usize>,
    /// Process every target of the table
    #[arg(long)]
    all: bool,
    /// Optimize one compound instead of the target table
    #[arg(long, requires = "key")]
    single_compound: bool,
    /// Key of the compound optimized in single-compound mode
    #[arg(long, requires = "single_compound")]
    key: Option<String>,
    /// Precursor adduct of the library rows to use
    #[arg(long)]
    precursor_type: Option<String>,
    /// Debug logging
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,
    /// Warnings and errors only
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    fn settings(&self) -> Result<Settings, Box<dyn Error>> {
        let mut settings = match &self.config {
            Some(path) => Settings::load(path)?,
            None => Settings::default(),
        };

        if let Some(method) = self.method {
            settings.method = method;
        }
        if let Some(library) = &self.library {
            settings.library = library.clone();
        }
        if let Some(interference) = &self.interference {
            settings.interference = Some(interference.clone());
        }
        if let Some(targets) = &self.targets {
            settings.targets = targets.clone();
        }
        if let Some(output) = &self.output {
            settings.output = output.clone();
        }
        if let Some(cache_dir) = &self.cache_dir {
            settings.cache_dir = cache_dir.clone();
        }
        if self.all {
            settings.max_compounds = None;
        } else if let Some(n) = self.max_compounds {
            settings.max_compounds = Some(n);
        }
        if self.single_compound {
            settings.single_compound = self.key.clone();
        }
        if let Some(adduct) = &self.precursor_type {
            settings.precursor_type = adduct.clone();
        }

        settings.validate()?;
        Ok(settings)
    }

    fn log_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else if self.quiet {
            "warn"
        } else {
            "info"
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(args.log_level()))
        .format_timestamp_secs()
        .init();

    let settings = args.settings()?;

    if let Some(custom) = &settings.interference {
        if args.skip_validation {
            info!("skipping validation of {}", custom.display());
        } else {
            if let Err(e) = validate_collection(custom, settings.method, &settings.store) {
                error!("custom interference collection rejected: {}", e);
                return Err(e.into());
            }
            let info = describe_collection(custom, &settings.store)?;
            info!(
                "custom interference: {:?} with {} partition(s), {} row(s) sampled",
                info.kind, info.partitions, info.rows_sampled
            );
        }
    }

    info!("method: {}", settings.method);
    info!("library: {}", settings.library.display());
    match &settings.single_compound {
        Some(key) => info!("single-compound mode: {}", key),
        None => match settings.max_compounds {
            Some(n) => info!("batch mode: first {} target(s) of {}", n, settings.targets.display()),
            None => info!("batch mode: every target of {}", settings.targets.display()),
        },
    }

    let summary = match run(settings) {
        Ok(summary) => summary,
        Err(e) if e.is_fatal() => {
            error!("run aborted: {}", e);
            return Err(e.into());
        }
        Err(e) => {
            error!("run failed, results may be incomplete: {}", e);
            return Err(e.into());
        }
    };
    info!(
        "{} compound(s): {} optimized, {} skipped, {} failed",
        summary.total, summary.optimized, summary.skipped, summary.failed
    );
    Ok(())
}
