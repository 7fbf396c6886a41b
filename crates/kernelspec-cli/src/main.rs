use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use kernelspec_core::logging::{init_logging, LogFormat};
use kernelspec_core::prelude::*;
use kernelspec_core::spec::PersistedKernel;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const DEFAULT_CACHE_FILE: &str = "kernelspec-cache.json";

fn cli() -> Command {
    Command::new("kernelspec")
        .version(kernelspec_core::VERSION)
        .about("Discover, normalize and cache Jupyter kernel specs")
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .global(true)
                .default_value("pretty")
                .value_parser(value_parser!(LogFormat))
                .help("Log output format: pretty or json"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .global(true)
                .action(ArgAction::Count)
                .help("Increase log verbosity"),
        )
        .subcommand(
            Command::new("list")
                .about("List kernel specs for a scope")
                .arg(Arg::new("scope").default_value("local").help("Scope key"))
                .arg(
                    Arg::new("dir")
                        .long("dir")
                        .action(ArgAction::Append)
                        .value_parser(value_parser!(PathBuf))
                        .help("Directory to search"),
                )
                .arg(
                    Arg::new("interpreter")
                        .long("interpreter")
                        .action(ArgAction::Append)
                        .value_name("PATH[=VERSION]")
                        .help("Interpreter whose share/jupyter/kernels is searched"),
                )
                .arg(
                    Arg::new("global-root")
                        .long("global-root")
                        .action(ArgAction::Append)
                        .value_parser(value_parser!(PathBuf))
                        .help("Shared install root where legacy specs are quarantined"),
                )
                .arg(cache_file_arg())
                .arg(
                    Arg::new("ignore-cache")
                        .long("ignore-cache")
                        .action(ArgAction::SetTrue)
                        .help("Rescan instead of using cached results"),
                )
                .arg(json_arg()),
        )
        .subcommand(
            Command::new("load")
                .about("Load and normalize one kernel spec file")
                .arg(
                    Arg::new("spec")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Path to kernel.json"),
                )
                .arg(
                    Arg::new("interpreter")
                        .long("interpreter")
                        .value_name("PATH[=VERSION]")
                        .help("Interpreter owning the spec"),
                )
                .arg(json_arg()),
        )
        .subcommand(
            Command::new("quarantine")
                .about("Move a legacy kernel spec into the quarantine folder")
                .arg(
                    Arg::new("spec")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Path to kernel.json"),
                ),
        )
        .subcommand(
            Command::new("clear-cache")
                .about("Remove persisted kernel lists")
                .arg(cache_file_arg()),
        )
}

fn cache_file_arg() -> Arg {
    Arg::new("cache-file")
        .long("cache-file")
        .default_value(DEFAULT_CACHE_FILE)
        .value_parser(value_parser!(PathBuf))
        .help("JSON file backing the persisted cache")
}

fn json_arg() -> Arg {
    Arg::new("json")
        .long("json")
        .action(ArgAction::SetTrue)
        .help("Output as JSON")
}

/// `PATH` or `PATH=VERSION`
fn parse_interpreter(value: &str) -> PythonInterpreter {
    match value.rsplit_once('=') {
        Some((path, version)) if !version.is_empty() => {
            PythonInterpreter::new(path).with_version(version)
        }
        _ => PythonInterpreter::new(value),
    }
}

/// `<prefix>/share/jupyter/kernels` for an interpreter at `<prefix>/bin/python`
fn interpreter_kernels_dir(interpreter: &PythonInterpreter) -> Option<PathBuf> {
    let prefix = interpreter.path.parent()?.parent()?;
    Some(prefix.join("share").join("jupyter").join("kernels"))
}

fn load_config(matches: &ArgMatches) -> Result<RegistryConfig> {
    let config = match matches.get_one::<PathBuf>("config") {
        Some(path) => RegistryConfig::from_toml_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => RegistryConfig::default(),
    };
    let config = config.with_env_overrides();
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn build_registry(config: RegistryConfig, cache_file: Option<&Path>) -> Result<KernelSpecRegistry> {
    let store: Arc<dyn Memento> = match cache_file {
        Some(path) => Arc::new(JsonFileMemento::new(path)),
        None => Arc::new(InMemoryMemento::new()),
    };
    KernelSpecRegistry::new(
        config,
        Arc::new(LocalFileSystem::new()),
        store,
        Arc::new(StaticPresence::new(false)),
    )
    .context("failed to create registry")
}

fn print_kernels(kernels: &[KernelSpecRecord], json: bool) -> Result<()> {
    if json {
        let wire: Vec<PersistedKernel> = kernels.iter().map(PersistedKernel::from).collect();
        println!("{}", serde_json::to_string_pretty(&wire)?);
        return Ok(());
    }
    for kernel in kernels {
        let location = kernel
            .spec_file_path()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        println!(
            "{:<32} {:<28} {:<10} {}",
            kernel.name(),
            kernel.display_name(),
            kernel.language(),
            location
        );
    }
    Ok(())
}

async fn run_list(config: RegistryConfig, args: &ArgMatches) -> Result<()> {
    let cache_file = args.get_one::<PathBuf>("cache-file");
    let registry = build_registry(config, cache_file.map(PathBuf::as_path))?;

    let scope_key = args
        .get_one::<String>("scope")
        .map_or("local", String::as_str);
    let mut scope = SearchScope::new(scope_key);
    for dir in args.get_many::<PathBuf>("dir").into_iter().flatten() {
        scope = scope.with_directory(dir);
    }
    for value in args.get_many::<String>("interpreter").into_iter().flatten() {
        let interpreter = parse_interpreter(value);
        let Some(kernels_dir) = interpreter_kernels_dir(&interpreter) else {
            bail!("cannot derive kernels directory for interpreter {value}");
        };
        scope = scope.with_interpreter(interpreter, kernels_dir);
    }
    for root in args.get_many::<PathBuf>("global-root").into_iter().flatten() {
        scope = scope.with_global_root(root);
    }
    if scope.targets.is_empty() {
        bail!("nothing to search: pass --dir or --interpreter");
    }

    let source = CancelSource::new();
    let token = source.token();
    let ignore_cache = args.get_flag("ignore-cache");
    let kernels = tokio::select! {
        kernels = registry.list_kernels(&scope, &token, ignore_cache) => kernels,
        _ = tokio::signal::ctrl_c() => {
            source.cancel();
            bail!("interrupted");
        }
    };

    for failure in registry.advisory_failures() {
        tracing::debug!(%failure, "advisory failure");
    }
    print_kernels(&kernels, args.get_flag("json"))
}

async fn run_load(config: RegistryConfig, args: &ArgMatches) -> Result<()> {
    let registry = build_registry(config, None)?;
    let Some(spec) = args.get_one::<PathBuf>("spec") else {
        bail!("missing spec file");
    };
    let interpreter = args
        .get_one::<String>("interpreter")
        .map(|v| parse_interpreter(v));

    let Some(kernel) = registry
        .load_kernel_spec(spec, interpreter.as_ref(), &CancelToken::none())
        .await
    else {
        let reasons: Vec<String> = registry
            .advisory_failures()
            .iter()
            .map(ToString::to_string)
            .collect();
        if reasons.is_empty() {
            bail!("no kernel spec loaded from {}", spec.display());
        }
        bail!(
            "no kernel spec loaded from {}: {}",
            spec.display(),
            reasons.join("; ")
        );
    };
    print_kernels(std::slice::from_ref(&kernel), args.get_flag("json"))
}

async fn run_quarantine(config: RegistryConfig, args: &ArgMatches) -> Result<()> {
    let registry = build_registry(config, None)?;
    let Some(spec) = args.get_one::<PathBuf>("spec") else {
        bail!("missing spec file");
    };
    let outcome = registry.quarantine(spec).await;
    if let Some(archive) = &outcome.archived_to {
        println!("archived to {}", archive.display());
    }
    if outcome.removed {
        println!("removed {}", spec.parent().unwrap_or(spec).display());
    }
    if !outcome.failures.is_empty() {
        let reasons: Vec<String> = outcome.failures.iter().map(ToString::to_string).collect();
        bail!("quarantine incomplete: {}", reasons.join("; "));
    }
    Ok(())
}

async fn run_clear_cache(config: RegistryConfig, args: &ArgMatches) -> Result<()> {
    let cache_file = args.get_one::<PathBuf>("cache-file");
    let registry = build_registry(config, cache_file.map(PathBuf::as_path))?;
    let removed = registry.clear_persisted().await;
    println!("removed {removed} persisted entries");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    let format = matches
        .get_one::<LogFormat>("log-format")
        .copied()
        .unwrap_or_default();
    let filter = match matches.get_count("verbose") {
        0 => "warn",
        1 => "kernelspec_core=info,warn",
        2 => "kernelspec_core=debug,info",
        _ => "trace",
    };
    init_logging(format, filter);

    let config = load_config(&matches)?;
    match matches.subcommand() {
        Some(("list", args)) => run_list(config, args).await,
        Some(("load", args)) => run_load(config, args).await,
        Some(("quarantine", args)) => run_quarantine(config, args).await,
        Some(("clear-cache", args)) => run_clear_cache(config, args).await,
        _ => {
            cli().print_help()?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_is_well_formed() {
        cli().debug_assert();
    }

    #[test]
    fn interpreter_with_version() {
        let interpreter = parse_interpreter("/env/bin/python=3.11.4");
        assert_eq!(interpreter.path, PathBuf::from("/env/bin/python"));
        assert_eq!(interpreter.version.as_deref(), Some("3.11.4"));
        assert_eq!(
            interpreter_kernels_dir(&interpreter),
            Some(PathBuf::from("/env/share/jupyter/kernels"))
        );
    }

    #[test]
    fn interpreter_without_version() {
        let interpreter = parse_interpreter("/env/bin/python");
        assert_eq!(interpreter.path, PathBuf::from("/env/bin/python"));
        assert!(interpreter.version.is_none());
    }

    #[test]
    fn list_collects_repeated_flags() {
        let matches = cli()
            .try_get_matches_from([
                "kernelspec", "list", "remote", "--dir", "/a", "--dir", "/b", "--ignore-cache",
            ])
            .unwrap();
        let (name, args) = matches.subcommand().unwrap();
        assert_eq!(name, "list");
        assert_eq!(args.get_one::<String>("scope").map(String::as_str), Some("remote"));
        assert_eq!(args.get_many::<PathBuf>("dir").unwrap().count(), 2);
        assert!(args.get_flag("ignore-cache"));
    }

    #[tokio::test]
    async fn clear_cache_on_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let registry = build_registry(
            RegistryConfig::default(),
            Some(&dir.path().join("cache.json")),
        )
        .unwrap();
        assert_eq!(registry.clear_persisted().await, 0);
    }
}
