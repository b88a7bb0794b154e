use dreadlock::{DreadlockConfig, Registry};
use facet::Facet;
use figue as args;
use tracing::info;

mod scenarios;

type AnyResult<T> = Result<T, String>;

#[derive(Facet, Debug)]
struct Cli {
    #[facet(flatten)]
    builtins: args::FigueBuiltins,
    /// Print the registry snapshot as JSON once the scenario is over.
    #[facet(args::named, default)]
    json: bool,
    #[facet(args::subcommand)]
    command: CommandKind,
}

#[derive(Facet, Debug)]
#[repr(u8)]
enum CommandKind {
    OneThreadNoDeadlocks,
    TwoThreadsDifferentLocks,
    TwoThreadsOneLockWithoutDeadlock,
    TwoThreadsOneLockWithDeadlock,
    LockChainWithDeadlock,
    DiningPhilosophers {
        #[facet(args::named, default)]
        meals: Option<u32>,
    },
}

const DEFAULT_MEALS: u32 = 3;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn run() -> AnyResult<()> {
    let cli = parse_cli()?;
    let config = DreadlockConfig::from_env().map_err(|e| format!("bad environment: {e}"))?;
    let registry = Registry::with_config(config);

    dispatch_command(&registry, cli.command)?;

    info!(threads = registry.len(), "scenario finished");
    if cli.json {
        let snapshot = facet_json::to_string_pretty(&registry.snapshot())
            .map_err(|e| format!("encode registry snapshot: {e}"))?;
        println!("{snapshot}");
    }
    Ok(())
}

fn parse_cli() -> AnyResult<Cli> {
    let figue_config = args::builder::<Cli>()
        .map_err(|e| format!("failed to build CLI schema: {e}"))?
        .cli(|cli| cli.strict())
        .help(|h| {
            h.program_name("dreadlock-examples")
                .description("Run dreadlock scenarios as subcommands")
                .version(option_env!("CARGO_PKG_VERSION").unwrap_or("dev"))
        })
        .build();

    args::Driver::new(figue_config)
        .run()
        .into_result()
        .map(|v| v.value)
        .map_err(|e| e.to_string())
}

fn dispatch_command(registry: &Registry, command: CommandKind) -> AnyResult<()> {
    match command {
        CommandKind::OneThreadNoDeadlocks => scenarios::one_thread_no_deadlocks::run(registry),
        CommandKind::TwoThreadsDifferentLocks => {
            scenarios::two_threads_different_locks::run(registry)
        }
        CommandKind::TwoThreadsOneLockWithoutDeadlock => {
            scenarios::two_threads_one_lock::run_without_deadlock(registry)
        }
        CommandKind::TwoThreadsOneLockWithDeadlock => {
            scenarios::two_threads_one_lock::run_with_deadlock(registry)
        }
        CommandKind::LockChainWithDeadlock => scenarios::lock_chain_with_deadlock::run(registry),
        CommandKind::DiningPhilosophers { meals } => {
            scenarios::dining_philosophers::run(registry, meals.unwrap_or(DEFAULT_MEALS))
        }
    }
}
