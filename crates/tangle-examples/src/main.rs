use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use facet::Facet;
use figue as args;
use tangle::{Config, Site, SortKey, SyncContext};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod scenarios;

type AnyResult<T> = Result<T, String>;

#[derive(Facet, Debug)]
struct Cli {
    #[facet(flatten)]
    builtins: args::FigueBuiltins,
    /// Overrides TANGLE_DEADLOCK_THRESHOLD_MS.
    #[facet(args::named, default)]
    threshold_ms: Option<u64>,
    /// Sort key for the lock and thread listings: name, owner, time, or site.
    #[facet(args::named, default)]
    sort: Option<String>,
    /// Print the registry snapshot as JSON instead of tables.
    #[facet(args::named, default)]
    json: bool,
    #[facet(args::subcommand)]
    command: CommandKind,
}

#[derive(Facet, Debug)]
#[repr(u8)]
enum CommandKind {
    LockOrderInversion,
    AbandonedLock,
    Contention,
    CondvarTimeout,
}

/// How scenarios print registry state.
pub(crate) struct Output {
    pub(crate) sort: SortKey,
    pub(crate) json: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn run() -> AnyResult<()> {
    let cli = parse_cli()?;

    let mut config = Config::from_env().map_err(|e| e.to_string())?;
    if let Some(ms) = cli.threshold_ms {
        config.deadlock_threshold = Duration::from_millis(ms);
    }
    let out = Output {
        sort: match cli.sort.as_deref() {
            Some(key) => SortKey::from_str(key).map_err(|e| e.to_string())?,
            None => SortKey::default(),
        },
        json: cli.json,
    };

    let cx = SyncContext::new(config);
    cx.register_current("main", Site::caller())
        .map_err(|e| e.to_string())?;
    let watchdog = cx.start_watchdog().map_err(|e| e.to_string())?;
    info!(
        scenario = ?cli.command,
        threshold_ms = tangle::duration_ms(cx.config().deadlock_threshold),
        watchdog = watchdog.is_some(),
        "running scenario"
    );

    let result = dispatch_command(&cx, cli.command, &out);

    cx.begin_shutdown();
    if let Some(watchdog) = watchdog {
        let _ = watchdog.join();
    }
    result
}

fn parse_cli() -> AnyResult<Cli> {
    let figue_config = args::builder::<Cli>()
        .map_err(|e| format!("failed to build CLI schema: {e}"))?
        .cli(|cli| cli.strict())
        .help(|h| {
            h.program_name("tangle-examples")
                .description("Run tangle lock and thread scenarios as subcommands")
                .version(option_env!("CARGO_PKG_VERSION").unwrap_or("dev"))
        })
        .build();

    args::Driver::new(figue_config)
        .run()
        .into_result()
        .map(|v| v.value)
        .map_err(|e| e.to_string())
}

fn dispatch_command(cx: &Arc<SyncContext>, command: CommandKind, out: &Output) -> AnyResult<()> {
    match command {
        CommandKind::LockOrderInversion => scenarios::lock_order_inversion::run(cx, out),
        CommandKind::AbandonedLock => scenarios::abandoned_lock::run(cx, out),
        CommandKind::Contention => scenarios::contention::run(cx, out),
        CommandKind::CondvarTimeout => scenarios::condvar_timeout::run(cx, out),
    }
}
