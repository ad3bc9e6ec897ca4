use reconcile_rs::config::{ConfigOverrides, ReconcileConfig, StoreOverrides};
use reconcile_rs::persistence::PersistentOpenOptions;
use reconcile_rs::{IdentityId, PersistentStore, Reconciler};

fn parse_arg(flag: &str) -> Option<String> {
    let mut args = std::env::args();
    while let Some(arg) = args.next() {
        if arg == flag {
            return args.next();
        }
    }
    None
}

fn has_flag(flag: &str) -> bool {
    std::env::args().any(|arg| arg == flag)
}

fn print_help() {
    eprintln!(
        r#"reconcile_karma - recompute an account's karma from the vote ledger

Prints the value without writing it.

USAGE:
    reconcile_karma --user <ID> [OPTIONS]

OPTIONS:
    -c, --config <FILE>     Path to config file (TOML)
    -d, --data-dir <DIR>    Override the store directory
    -h, --help              Print help
"#
    );
}

fn main() -> anyhow::Result<()> {
    if has_flag("-h") || has_flag("--help") {
        print_help();
        return Ok(());
    }

    tracing_subscriber::fmt::init();

    let user = parse_arg("--user").ok_or_else(|| anyhow::anyhow!("--user is required"))?;

    let mut overrides = ConfigOverrides::default();
    if let Some(dir) = parse_arg("--data-dir").or_else(|| parse_arg("-d")) {
        overrides.store = Some(StoreOverrides {
            data_dir: Some(dir.into()),
            repair: None,
        });
    }
    let config_path = parse_arg("--config")
        .or_else(|| parse_arg("-c"))
        .or_else(|| std::env::var("RECONCILE_CONFIG").ok());
    let config = ReconcileConfig::load(config_path.as_deref(), overrides)?;

    let data_dir = config
        .store
        .data_dir
        .clone()
        .ok_or_else(|| anyhow::anyhow!("no data directory; pass --data-dir or set store.data_dir"))?;
    let store = PersistentStore::open_with_options(&data_dir, PersistentOpenOptions::from(&config.store))?;
    let reconciler = Reconciler::with_store(store, config.merge);

    let karma = reconciler.compute_reputation(&IdentityId::new(user.clone()))?;
    println!("{user}: {karma}");
    Ok(())
}
