mod classifier;
mod cli;
mod config;
mod disposal;
mod error;
mod geo;
mod identity;
mod journal;
mod leaderboard;
mod model;
mod progression;
mod registry;
mod session;
mod store;
#[cfg(test)]
mod testing;

use anyhow::{anyhow, Result};
use clap::Parser;
use std::cell::{Cell, RefCell};
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "binboss", about = "Recycle, prove it, level up")]
pub struct Args {
    #[arg(
        short = 'c',
        long,
        help = "Run one command and exit (e.g. -c '/prove bottle.jpg')"
    )]
    pub command: Option<String>,

    #[arg(long, help = "Config file path")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "BINBOSS_SUPABASE_URL", help = "Profile store URL")]
    pub store_url: Option<String>,

    #[arg(long, env = "BINBOSS_CLASSIFIER_URL", help = "Classifier service URL")]
    pub classifier_url: Option<String>,

    #[arg(
        long,
        env = "BINBOSS_ACCESS_TOKEN",
        hide_env_values = true,
        help = "Access token used to sign in"
    )]
    pub access_token: Option<String>,

    #[arg(long, help = "Use the in-memory store; nothing is persisted")]
    pub offline: bool,

    #[arg(long, help = "Email of the offline user")]
    pub email: Option<String>,

    #[arg(long, help = "Display name of the offline user")]
    pub name: Option<String>,

    #[arg(
        long,
        allow_hyphen_values = true,
        requires = "lon",
        help = "Latitude for region lookup"
    )]
    pub lat: Option<f64>,

    #[arg(
        long,
        allow_hyphen_values = true,
        requires = "lat",
        help = "Longitude for region lookup"
    )]
    pub lon: Option<f64>,

    #[arg(long, help = "Session journal directory")]
    pub journal_dir: Option<PathBuf>,

    #[arg(long, help = "Do not write a session journal")]
    pub no_journal: bool,

    #[arg(long, help = "Debug output (HTTP calls and settings)")]
    pub debug: bool,
}

/// Identity for the offline backend, built from --email and --name
fn offline_identity(args: &Args) -> Option<model::Identity> {
    let email = args.email.as_deref()?.trim().to_lowercase();
    let name = args
        .name
        .clone()
        .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());
    Some(model::Identity {
        id: format!("offline:{}", email),
        email,
        name,
        avatar: String::new(),
    })
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let default_filter = if args.debug { "binboss=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    // Load configuration, then let the command line override it
    let mut cfg = match &args.config {
        Some(path) => config::Config::load_from(path)?,
        None => config::Config::load()?,
    };
    if args.offline {
        cfg.store.backend = config::StoreBackend::Memory;
    }
    if let Some(url) = &args.store_url {
        cfg.store.url = Some(url.clone());
    }
    if let Some(url) = &args.classifier_url {
        cfg.classifier.url = Some(url.clone());
    }
    if let Some(dir) = &args.journal_dir {
        cfg.journal.dir = Some(dir.clone());
    }
    if args.no_journal {
        cfg.journal.enabled = false;
    }

    if let Err(errors) = cfg.validate() {
        let lines: Vec<String> = errors.iter().map(|e| format!("  {}", e)).collect();
        return Err(anyhow!("Invalid configuration:\n{}", lines.join("\n")));
    }

    let position = match (args.lat, args.lon) {
        (Some(lat), Some(lon)) => Some(geo::Coordinates::new(lat, lon)?),
        _ => cfg.location.coordinates(),
    };

    if args.debug {
        debug!(backend = cfg.store.backend.as_str(), "store");
        debug!(url = ?cfg.classifier.url, "classifier");
        debug!(url = cfg.geocoder.url(), ?position, "geocoder");
        debug!(
            proof_xp = cfg.rewards.proof_xp,
            max = cfg.rewards.max_xp_per_event,
            "rewards"
        );
    }

    let services = registry::ServiceRegistry::from_config(&cfg, offline_identity(&args))?;
    let disposals = disposal::DisposalService::new(&services, cfg.rewards.clone());
    let mut session = session::Session::new();
    let events = session.subscribe();

    let root = std::env::current_dir()?;
    let journal = if cfg.journal.enabled {
        let path = cfg
            .journal_dir(&root)
            .join(format!("{}.jsonl", session.id()));
        Some(RefCell::new(journal::Journal::new(&path, session.id())?))
    } else {
        None
    };
    info!(
        session_id = session.id(),
        backend = cfg.store.backend.as_str(),
        "starting"
    );

    let ctx = cli::Context {
        args,
        root,
        config: cfg,
        services,
        session: RefCell::new(session),
        events,
        level: Cell::new(None),
        disposals,
        journal,
        position,
    };

    if let Some(command) = &ctx.args.command {
        cli::run_once(&ctx, command)
    } else {
        cli::run_repl(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offline_identity_from_flags() {
        let args = Args::parse_from(["binboss", "--offline", "--email", " Ada@Example.com "]);
        let identity = offline_identity(&args).unwrap();
        assert_eq!(identity.email, "ada@example.com");
        assert_eq!(identity.id, "offline:ada@example.com");
        assert_eq!(identity.name, "ada");

        let args = Args::parse_from(["binboss", "--email", "bo@example.com", "--name", "Bo"]);
        assert_eq!(offline_identity(&args).unwrap().name, "Bo");

        let args = Args::parse_from(["binboss"]);
        assert!(offline_identity(&args).is_none());
    }

    #[test]
    fn test_coordinates_need_both_flags() {
        assert!(Args::try_parse_from(["binboss", "--lat", "25.0"]).is_err());
        let args = Args::try_parse_from(["binboss", "--lat", "-33.9", "--lon", "151.2"]).unwrap();
        assert_eq!(args.lat, Some(-33.9));
    }
}
