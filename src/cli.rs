use crate::config::settings::LauncherSettings;
use crate::config::validator::validate_settings;
use crate::resource::Resource;
use crate::session::Session;
use crate::status::{ConsoleStatus, NullStatus, StatusSink};
use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use url::Url;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file (overrides RELAUNCH_CONFIG and <base>/relaunch.json)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Do not draw progress on the terminal
    #[arg(long, short)]
    quiet: bool,
    /// Launch descriptor, as a local path or a URL
    descriptor: String,
}

/// Turn the command-line descriptor argument into a URI. Anything without a
/// scheme separator is a local path.
fn descriptor_uri(arg: &str) -> Result<Url> {
    if arg.contains("://") {
        return Url::parse(arg).with_context(|| format!("invalid url: {}", arg));
    }
    let path = Path::new(arg);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    Url::from_file_path(&absolute).map_err(|()| anyhow!("invalid path: {}", absolute.display()))
}

pub fn run() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let settings = LauncherSettings::load(cli.config.as_deref())?;
    std::fs::create_dir_all(&settings.base_dir)
        .with_context(|| format!("creating {}", settings.base_dir.display()))?;
    let report = validate_settings(&settings)?;
    for warning in &report.warnings {
        warn!("{}", warning);
    }

    let status: Arc<dyn StatusSink> = if cli.quiet {
        Arc::new(NullStatus)
    } else {
        Arc::new(ConsoleStatus::stderr())
    };

    let root = Resource::unvalidated(descriptor_uri(&cli.descriptor)?);
    let session = Session::open(settings, Arc::clone(&status))?;

    match crate::launch::launch(&session, &root) {
        Ok((_, child)) => {
            info!("[{}] Started process {}", session.id, child.id());
            status.close();
            Ok(())
        }
        Err(e) => {
            status.error(&e);
            status.close();
            std::process::exit(1);
        }
    }
}
