use reconcile_rs::config::{ConfigOverrides, MergeOverrides, ReconcileConfig, StoreOverrides};
use reconcile_rs::persistence::PersistentOpenOptions;
use reconcile_rs::utils::{export_to_text_summary, save_summary_to_file};
use reconcile_rs::{IdentityId, IdentityRef, MergeRequest, PersistentStore, Reconciler};

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
        r#"reconcile_merge - merge one account into another

USAGE:
    reconcile_merge (--source <ID> | --source-email <EMAIL>)
                    (--target <ID> | --target-email <EMAIL>)
                    --dry-run <true|false> [OPTIONS]

OPTIONS:
    -c, --config <FILE>       Path to config file (TOML)
    -d, --data-dir <DIR>      Override the store directory
        --halt-on-failure     Stop at the first failed step
        --repair              Repair the store before opening it
        --summary <FILE>      Also write the summary to a file
    -h, --help                Print help

ENVIRONMENT:
    RECONCILE_CONFIG                        Path to config file
    RECONCILE_STORE__DATA_DIR               Store directory
    RECONCILE_MERGE__HALT_ON_STEP_FAILURE   Stop at the first failed step

CONFIG FILE (reconcile.toml):
    [store]
    data_dir = "/var/lib/reconcile"

    [merge]
    retired_slug_suffix = "-old"
"#
    );
}

fn account_ref(id_flag: &str, email_flag: &str) -> anyhow::Result<IdentityRef> {
    match (parse_arg(id_flag), parse_arg(email_flag)) {
        (Some(id), None) => Ok(IdentityRef::Id(IdentityId::new(id))),
        (None, Some(email)) => Ok(IdentityRef::Email(email)),
        (Some(_), Some(_)) => anyhow::bail!("pass only one of {id_flag} and {email_flag}"),
        (None, None) => anyhow::bail!("{id_flag} or {email_flag} is required"),
    }
}

fn parse_dry_run() -> anyhow::Result<Option<bool>> {
    match parse_arg("--dry-run").as_deref() {
        None => Ok(None),
        Some("true") => Ok(Some(true)),
        Some("false") => Ok(Some(false)),
        Some(other) => anyhow::bail!("--dry-run must be true or false, got {other}"),
    }
}

fn main() -> anyhow::Result<()> {
    if has_flag("-h") || has_flag("--help") {
        print_help();
        return Ok(());
    }

    tracing_subscriber::fmt::init();

    let mut overrides = ConfigOverrides::default();
    let data_dir = parse_arg("--data-dir").or_else(|| parse_arg("-d"));
    if data_dir.is_some() || has_flag("--repair") {
        overrides.store = Some(StoreOverrides {
            data_dir: data_dir.map(Into::into),
            repair: has_flag("--repair").then_some(true),
        });
    }
    if has_flag("--halt-on-failure") {
        overrides.merge = Some(MergeOverrides {
            halt_on_step_failure: Some(true),
        });
    }

    let config_path = parse_arg("--config")
        .or_else(|| parse_arg("-c"))
        .or_else(|| std::env::var("RECONCILE_CONFIG").ok());
    let config = ReconcileConfig::load(config_path.as_deref(), overrides)?;

    let source = account_ref("--source", "--source-email")?;
    let target = account_ref("--target", "--target-email")?;
    let dry_run = parse_dry_run()?;

    let data_dir = config
        .store
        .data_dir
        .clone()
        .ok_or_else(|| anyhow::anyhow!("no data directory; pass --data-dir or set store.data_dir"))?;
    let store = PersistentStore::open_with_options(&data_dir, PersistentOpenOptions::from(&config.store))?;
    let mut reconciler = Reconciler::with_store(store, config.merge.clone());

    let request = MergeRequest {
        source: reconciler.resolve(&source)?,
        target: reconciler.resolve(&target)?,
        dry_run,
    };
    let report = reconciler.merge_accounts(&request)?;

    let summary = export_to_text_summary(&report);
    println!("{summary}");
    if let Some(path) = parse_arg("--summary") {
        save_summary_to_file(&summary, &path)?;
    }

    let failed = report.failures().count();
    if failed > 0 {
        anyhow::bail!("{failed} merge step(s) failed");
    }
    Ok(())
}
