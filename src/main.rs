use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use nmail::cache::CacheStore;
use nmail::config::Config;
use nmail::context::AppContext;
use nmail::lock::DirLock;
use nmail::mail::imap::{ImapBus, ImapConfig, Request, spawn_imap_worker};
use nmail::mail::smtp::{SmtpBus, SmtpConfig as SmtpWireConfig, spawn_smtp_worker};
use nmail::prefetch::{PrefetchLevel, PrefetchPlanner, UiStateTransition};
use nmail::session_keys::SessionKeys;

const VERSION: &str = env!("CARGO_PKG_VERSION");

struct Args {
    confdir: Option<PathBuf>,
    verbose: bool,
    offline: bool,
    setup: Option<String>,
    help: bool,
    version: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        confdir: None,
        verbose: false,
        offline: false,
        setup: None,
        help: false,
        version: false,
    };

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "-d" | "--confdir" => {
                let dir = it.next().context("--confdir requires a directory argument")?;
                args.confdir = Some(PathBuf::from(dir));
            }
            "-e" | "--verbose" => args.verbose = true,
            "-o" | "--offline" => args.offline = true,
            "-s" | "--setup" => {
                let name = it.next().context("--setup requires <gmail|outlook>")?;
                args.setup = Some(name);
            }
            "-h" | "--help" => args.help = true,
            "-v" | "--version" => args.version = true,
            other => anyhow::bail!("unrecognized argument: {other}"),
        }
    }

    Ok(args)
}

fn print_usage() {
    eprintln!(
        r#"nmail - a terminal email client with an encrypted local mail cache

Usage: nmail [options]

Options:
    -d, --confdir <DIR>       Override the application directory (default: ~/.nmail)
    -e, --verbose             Enable debug logging
    -o, --offline             Do not open network connections
    -s, --setup <gmail|outlook>  Write a pre-filled config and exit
    -h, --help                Show this help message
    -v, --version             Show version information
"#
    );
}

fn default_app_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("could not determine home directory")?;
    Ok(home.join(nmail::constants::DEFAULT_APP_DIR_NAME))
}

fn setup_logging(log_path: &std::path::Path, verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("{default_level},nmail={default_level}")));

    let log_file = std::fs::OpenOptions::new().create(true).append(true).open(log_path).ok();

    if let Some(file) = log_file {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::sync::Mutex::new(file)).with_ansi(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn run_setup(app_dir: &std::path::Path, provider: &str) -> Result<()> {
    use std::io::{self, Write};

    let preset = match provider {
        "gmail" => Config::preset_gmail,
        "outlook" => Config::preset_outlook,
        other => anyhow::bail!("unsupported setup provider: {other} (expected gmail or outlook)"),
    };

    print!("Email address: ");
    io::stdout().flush()?;
    let mut address = String::new();
    io::stdin().read_line(&mut address)?;
    let address = address.trim().to_string();
    if address.is_empty() {
        anyhow::bail!("an email address is required");
    }

    let config = preset(address);
    config.save(&app_dir.join("main.conf"))?;
    println!("Wrote configuration to {}", app_dir.join("main.conf").display());
    Ok(())
}

/// Resolves the IMAP/SMTP password: from an env var override first (the
/// real terminal prompt helper is out of scope for this core, spec §1),
/// else the persisted `pass` field, else a plain stdin read.
fn resolve_password(config: &Config) -> Result<String> {
    if let Ok(pwd) = std::env::var("NMAIL_PASSWORD") {
        return Ok(pwd);
    }
    if config.save_pass
        && !config.pass.is_empty()
        && let Some(pwd) = SessionKeys::load_password(&config.user, &config.pass)
    {
        return Ok(pwd);
    }

    use std::io::{self, Write};
    print!("Password for {}: ", config.user);
    io::stdout().flush()?;
    let mut pwd = String::new();
    io::stdin().read_line(&mut pwd)?;
    Ok(pwd.trim_end_matches(['\n', '\r']).to_string())
}

fn prefetch_level_from(n: u8) -> PrefetchLevel {
    match n {
        0 => PrefetchLevel::None,
        1 => PrefetchLevel::CurrentMessage,
        3 => PrefetchLevel::FullSync,
        _ => PrefetchLevel::CurrentView,
    }
}

async fn run(args: Args) -> Result<()> {
    let app_dir = match args.confdir {
        Some(dir) => dir,
        None => default_app_dir()?,
    };
    std::fs::create_dir_all(&app_dir)?;

    if let Some(provider) = &args.setup {
        return run_setup(&app_dir, provider);
    }

    let _lock = DirLock::acquire(&app_dir.join("lock")).context("application directory is locked by another instance")?;

    let config = Config::load(&app_dir.join("main.conf")).context("failed to read main.conf")?;
    if config.address.is_empty() || config.imap_host.is_empty() {
        anyhow::bail!("main.conf is missing required fields (address, imap_host); run with --setup first");
    }

    let ctx = AppContext::new(app_dir, &config, !args.offline)?;
    setup_logging(&ctx.log_path(), args.verbose || config.verbose_logging);

    let password = resolve_password(&config)?;
    let session_keys = Arc::new(SessionKeys::new(password));

    let cache = Arc::new(CacheStore::open(ctx.cache_dir.clone(), config.cache_encrypt, session_keys.password().to_string())?);

    let imap_bus: Arc<ImapBus> = Arc::new(ImapBus::new(
        |request, response| {
            tracing::debug!(?request, from_cache = response.from_cache, status = ?response.status, "imap response");
        },
        |action, result| {
            tracing::info!(?action, ok = result.ok, error = ?result.error, "imap action result");
        },
        |status| {
            tracing::info!(connected = status.connected, error = ?status.error, "imap status");
        },
    ));

    let imap_config = ImapConfig {
        host: config.imap_host.clone(),
        port: config.imap_port,
        username: config.user.clone(),
    };
    let imap_handle = spawn_imap_worker(imap_config, session_keys.password().to_string(), ctx.online, cache.clone(), imap_bus);

    let smtp_bus: Arc<SmtpBus> = Arc::new(SmtpBus::new(
        |_, _| {},
        |_outbound, result| {
            tracing::info!(ok = result.ok, error = ?result.message, "smtp result");
        },
        |_| {},
    ));
    let smtp_config = SmtpWireConfig {
        host: config.smtp_host.clone(),
        port: config.smtp_port,
        username: config.user.clone(),
    };
    let _smtp_handle = if ctx.online {
        Some(spawn_smtp_worker(smtp_config, session_keys.password().to_string(), None, smtp_bus)?)
    } else {
        None
    };

    let mut planner = PrefetchPlanner::new(prefetch_level_from(config.prefetch_level), imap_handle.clone(), cache.clone());

    imap_handle.submit_request(Request::ListFolders, nmail::mail::imap::Priority::Interactive);
    planner.on_transition(UiStateTransition::FolderChanged {
        folder: config.inbox.clone(),
        visible_uids: Vec::new(),
        selected_uid: None,
    });

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    tracing::info!("shutting down");
    imap_handle.submit_action(nmail::mail::imap::Action::LogoutAndExit);
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    ctx.cleanup_temp_dir().ok();

    Ok(())
}

fn main() -> Result<()> {
    let args = parse_args()?;

    if args.help {
        print_usage();
        return Ok(());
    }
    if args.version {
        println!("nmail {VERSION}");
        return Ok(());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build().context("failed to start async runtime")?;

    match runtime.block_on(run(args)) {
        Ok(()) => Ok(()),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    }
}
