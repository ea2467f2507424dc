use crate::{
    classifier::Image,
    config::{Config, StoreBackend, CONFIG_DIR},
    disposal::{DisposalService, ProofOutcome},
    error::Resolved,
    geo::Coordinates,
    journal::Journal,
    leaderboard,
    progression::required_exp,
    registry::ServiceRegistry,
    session::{Session, SessionEvent, SessionState},
    Args,
};
use anyhow::{anyhow, Result};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use tracing::warn;

/// Token handed to the static identity provider of the memory backend
const OFFLINE_TOKEN: &str = "offline";

pub struct Context {
    pub args: Args,
    pub root: PathBuf,
    pub config: Config,
    pub services: ServiceRegistry,
    pub session: RefCell<Session>,
    /// Subscribed to `session` before the first sign-in
    pub events: Receiver<SessionEvent>,
    /// Last level seen on the event stream
    pub level: Cell<Option<i64>>,
    pub disposals: DisposalService,
    pub journal: Option<RefCell<Journal>>,
    pub position: Option<Coordinates>,
}

impl Context {
    fn record(&self, f: impl FnOnce(&mut Journal) -> Result<()>) {
        if let Some(journal) = &self.journal {
            if let Err(e) = f(&mut journal.borrow_mut()) {
                warn!(error = %e, "journal write failed");
            }
        }
    }

    /// Drain session events into messages for the user
    fn session_notices(&self) -> Vec<String> {
        let mut notices = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            match event {
                SessionEvent::SignedIn { .. } => {
                    let level = self.session.borrow().get().map(|s| s.profile.level);
                    self.level.set(level);
                }
                SessionEvent::Replaced { level, .. } => {
                    if self.level.get().is_some_and(|seen| level > seen) {
                        notices.push(format!("Level up! You are now level {}", level));
                    }
                    self.level.set(Some(level));
                }
                SessionEvent::SignedOut | SessionEvent::Failed(_) => self.level.set(None),
            }
        }
        notices
    }

    fn announce(&self) {
        for notice in self.session_notices() {
            println!("{}", notice);
        }
    }

    /// Token from the command, the CLI/env, or the offline default
    fn access_token(&self, explicit: Option<&str>) -> Option<String> {
        explicit
            .map(str::to_string)
            .or_else(|| self.args.access_token.clone())
            .or_else(|| {
                (self.services.backend == StoreBackend::Memory).then(|| OFFLINE_TOKEN.to_string())
            })
    }
}

pub fn run_once(ctx: &Context, line: &str) -> Result<()> {
    let line = line.trim();
    if !line.starts_with('/') {
        return Err(anyhow!("Commands start with '/'. Try -c /help"));
    }
    let needs_session = !matches!(command_name(line), "/signin" | "/help" | "/session");
    if needs_session && ctx.session.borrow().get().is_none() {
        sign_in(ctx, None)?;
    }
    dispatch(ctx, line)?;
    ctx.announce();
    Ok(())
}

pub fn run_repl(ctx: Context) -> Result<()> {
    let mut rl = DefaultEditor::new()?;
    let history_path = ctx.root.join(CONFIG_DIR).join("history.txt");
    // Missing on first run
    let _ = rl.load_history(&history_path);

    println!("binboss - type /help for commands, /exit to quit");

    if ctx.access_token(None).is_some() {
        if let Err(e) = sign_in(&ctx, None) {
            eprintln!("Sign-in failed: {}", e);
        }
        ctx.announce();
    } else {
        println!("Not signed in. Use /signin <access-token>");
    }

    loop {
        match rl.readline("bin> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                rl.add_history_entry(line)?;

                if !line.starts_with('/') {
                    println!("Unknown input. Type /help for commands.");
                    continue;
                }
                if handle_command(&ctx, line) {
                    break;
                }
            }
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Input error: {}", e);
                break;
            }
        }
    }

    if let Some(parent) = history_path.parent() {
        if std::fs::create_dir_all(parent).is_ok() {
            let _ = rl.save_history(&history_path);
        }
    }
    Ok(())
}

fn command_name(line: &str) -> &str {
    line.split_whitespace().next().unwrap_or_default()
}

/// Run one command, reporting errors. Returns true when the shell should exit.
fn handle_command(ctx: &Context, line: &str) -> bool {
    let result = dispatch(ctx, line);
    ctx.announce();
    match result {
        Ok(exit) => exit,
        Err(e) => {
            let recoverable = e
                .downcast_ref::<crate::error::Error>()
                .map(|e| e.is_recoverable())
                .unwrap_or(false);
            if recoverable {
                eprintln!("Error: {} (try again)", e);
            } else {
                eprintln!("Error: {}", e);
            }
            ctx.record(|j| j.error(command_name(line), &e.to_string(), recoverable));
            false
        }
    }
}

fn dispatch(ctx: &Context, line: &str) -> Result<bool> {
    let words = shell_words::split(line).map_err(|e| anyhow!("Cannot parse command: {}", e))?;
    let Some((cmd, rest)) = words.split_first() else {
        return Ok(false);
    };

    match cmd.as_str() {
        "/exit" | "/quit" => return Ok(true),
        "/help" => print_help(),
        "/signin" => sign_in(ctx, rest.first().map(String::as_str))?,
        "/signout" => sign_out(ctx),
        "/profile" => show_profile(ctx)?,
        "/history" => show_history(ctx)?,
        "/leaderboard" => show_leaderboard(ctx, rest.first().map(String::as_str))?,
        "/scan" => scan(ctx, image_arg(rest, "/scan")?)?,
        "/prove" => prove(ctx, image_arg(rest, "/prove")?)?,
        "/session" => show_session(ctx),
        other => println!("Unknown command: {}. Type /help for commands.", other),
    }
    Ok(false)
}

fn print_help() {
    println!("Commands:");
    println!("  /exit                    - quit");
    println!("  /help                    - show commands");
    println!("  /session                 - show session info");
    println!("Account:");
    println!("  /signin [token]          - sign in with an access token");
    println!("  /signout                 - sign out");
    println!("  /profile                 - show level and experience");
    println!("  /history                 - show recent disposals");
    println!("  /leaderboard [global|local] - show rankings");
    println!("Recycling:");
    println!("  /scan <image>            - identify an item and where it goes");
    println!("  /prove <image>           - submit a disposal photo for experience");
}

fn image_arg<'a>(rest: &'a [String], cmd: &str) -> Result<&'a Path> {
    rest.first()
        .map(Path::new)
        .ok_or_else(|| anyhow!("Usage: {} <image>", cmd))
}

fn sign_in(ctx: &Context, explicit: Option<&str>) -> Result<()> {
    let token = ctx.access_token(explicit).ok_or_else(|| {
        anyhow!("No access token. Use /signin <token> or set BINBOSS_ACCESS_TOKEN")
    })?;
    let identity = ctx.services.identity.identify(&token)?;

    let mut session = ctx.session.borrow_mut();
    let snapshot = session.initialize(&identity, &token, ctx.position, &ctx.services)?;

    println!(
        "Signed in as {} ({}){}",
        snapshot.profile.name,
        snapshot.profile.email,
        if snapshot.created { " - welcome!" } else { "" }
    );
    println!("{}", progress_line(snapshot.profile.level, snapshot.profile.exp));
    match &snapshot.region {
        Resolved::Fresh(region) => println!("Region: {}", region),
        Resolved::Fallback { value, cause } => println!("Region: {} ({})", value, cause),
    }

    let fallback = match &snapshot.region {
        Resolved::Fallback { cause, .. } => Some(cause.as_str()),
        Resolved::Fresh(_) => None,
    };
    ctx.record(|j| j.signed_in(&snapshot.profile, snapshot.created));
    ctx.record(|j| j.region_resolved(snapshot.region.value(), fallback));
    Ok(())
}

fn sign_out(ctx: &Context) {
    let mut session = ctx.session.borrow_mut();
    let user_id = session.get().map(|s| s.profile.id.clone());
    session.sign_out(&ctx.services);
    match user_id {
        Some(user_id) => {
            ctx.record(|j| j.signed_out(&user_id));
            println!("Signed out");
        }
        None => println!("Not signed in"),
    }
}

fn progress_line(level: i64, exp: i64) -> String {
    match required_exp(level) {
        Some(required) => format!("Level {} ({}/{} XP to next level)", level, exp, required),
        None => format!("Level {} ({} XP)", level, exp),
    }
}

fn show_profile(ctx: &Context) -> Result<()> {
    let session = ctx.session.borrow();
    let snapshot = session.get().ok_or(crate::error::Error::NoSession)?;
    let profile = &snapshot.profile;
    println!("{} <{}>", profile.name, profile.email);
    println!("Region: {}", profile.region);
    println!("{}", progress_line(profile.level, profile.exp));
    println!("Disposals: {}", profile.total_disposal);
    Ok(())
}

fn show_history(ctx: &Context) -> Result<()> {
    let session = ctx.session.borrow();
    let snapshot = session.get().ok_or(crate::error::Error::NoSession)?;
    if snapshot.history.is_empty() {
        println!("No disposals yet");
        return Ok(());
    }
    println!("Recent disposals:");
    for record in snapshot.history.iter().rev() {
        println!(
            "  {}  {} / {}",
            record.created_at.format("%Y-%m-%d %H:%M"),
            record.category,
            record.sub_category
        );
    }
    Ok(())
}

fn show_leaderboard(ctx: &Context, which: Option<&str>) -> Result<()> {
    let session = ctx.session.borrow();
    let snapshot = session.get().ok_or(crate::error::Error::NoSession)?;
    let me = Some(snapshot.profile.id.as_str());
    let regional_title = regional_title(&session);

    match which {
        None => {
            print!(
                "{}",
                leaderboard::render(&regional_title, &snapshot.rankings.regional, me)
            );
            print!(
                "{}",
                leaderboard::render("Top worldwide:", &snapshot.rankings.global, me)
            );
        }
        Some("local" | "regional") => print!(
            "{}",
            leaderboard::render(&regional_title, &snapshot.rankings.regional, me)
        ),
        Some("global") => print!(
            "{}",
            leaderboard::render("Top worldwide:", &snapshot.rankings.global, me)
        ),
        Some(other) => return Err(anyhow!("Unknown leaderboard: {}. Use global or local", other)),
    }
    Ok(())
}

fn regional_title(session: &Session) -> String {
    let region = session
        .get()
        .map(|s| s.region.value().as_str())
        .unwrap_or_default();
    format!("Top in {}:", region)
}

fn scan(ctx: &Context, path: &Path) -> Result<()> {
    let image = Image::load(path)?;
    let classification = ctx.disposals.scan_item(&ctx.session.borrow(), &image)?;

    if classification.is_trash() {
        println!(
            "{} ({})",
            classification.category, classification.sub_category
        );
    }
    println!("{}", classification.guidance());
    ctx.record(|j| {
        j.item_scanned(
            classification.category.as_str(),
            &classification.sub_category,
        )
    });
    Ok(())
}

fn prove(ctx: &Context, path: &Path) -> Result<()> {
    let image = Image::load(path)?;
    let outcome = ctx
        .disposals
        .submit_proof(&mut ctx.session.borrow_mut(), &image)?;

    match outcome {
        ProofOutcome::Accepted {
            progression,
            reason,
            digest,
            history_error,
        } => {
            println!("Accepted: {}", reason);
            println!(
                "+{} XP for {} ({})",
                progression.xp_gained,
                progression.history.insert.category,
                progression.history.insert.sub_category
            );
            println!(
                "{}",
                progress_line(progression.profile.level, progression.profile.exp)
            );
            ctx.record(|j| j.disposal_recorded(&progression, &digest));
            if let Some(message) = history_error {
                eprintln!("Warning: {}", message);
                ctx.record(|j| j.error("/prove", &message, false));
            }
        }
        ProofOutcome::Rejected {
            reason,
            category,
            sub_category,
            digest,
        } => {
            println!("Not accepted: {}", reason);
            if let Some(category) = category {
                println!("Detected {} ({})", category, sub_category);
            }
            ctx.record(|j| j.proof_rejected(&reason, &digest));
        }
        ProofOutcome::Duplicate { digest } => {
            println!("This photo was already credited");
            ctx.record(|j| j.proof_duplicate(&digest));
        }
    }
    Ok(())
}

fn show_session(ctx: &Context) {
    let session = ctx.session.borrow();
    println!("Session: {}", session.id());
    println!("State: {}", session.state().name());
    if let SessionState::Failed(reason) = session.state() {
        println!("Last error: {}", reason);
    }
    if let Some(snapshot) = session.get() {
        println!("User: {} ({})", snapshot.profile.name, snapshot.profile.id);
    }
    println!("Store: {}", ctx.services.backend.as_str());
    if let Some(journal) = &ctx.journal {
        println!("Journal: {:?}", journal.borrow().path);
    }
    match ctx.position {
        Some(at) => println!("Position: {:.4}, {:.4}", at.latitude, at.longitude),
        None => println!("Position: not set"),
    }
    println!("Proof reward: {} XP", ctx.config.rewards.proof_xp);
}
