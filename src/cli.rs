//! CLI definition and dispatch.
//!
//! Results are printed as JSON on stdout; diagnostics go to stderr through
//! `tracing`.

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::process_sandbox::ProcessSandbox;
use crate::domain::dependency::DependencyPolicy;
use crate::domain::engine::{ComputeOptions, IndicatorEngine, ValuesOptions};
use crate::domain::error::{EngineError, ErrorKind};
use crate::domain::indicator::{IndicatorId, StockId, UserId};
use crate::ports::config_port::ConfigPort;
use crate::ports::store_port::Store;

#[derive(Parser, Debug)]
#[command(
    name = "indicator-engine",
    about = "Compute and cache user-defined stock indicators"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the store tables if they do not exist
    InitDb {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Compute indicators for a stock and cache the results
    Compute {
        #[arg(short, long)]
        config: PathBuf,
        /// Indicator ids, computed in the order given
        #[arg(short, long = "indicator", required = true, num_args = 1..)]
        indicators: Vec<IndicatorId>,
        #[arg(short, long)]
        stock: StockId,
        #[arg(short, long)]
        user: UserId,
        #[arg(long)]
        start: Option<NaiveDate>,
        #[arg(long)]
        end: Option<NaiveDate>,
    },
    /// Print cached values of an indicator for a stock
    Values {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        indicator: IndicatorId,
        #[arg(short, long)]
        stock: StockId,
        #[arg(short, long)]
        user: UserId,
        /// Compute and cache the indicator when nothing is cached yet
        #[arg(long)]
        auto_compute: bool,
        #[arg(long)]
        start: Option<NaiveDate>,
        #[arg(long)]
        end: Option<NaiveDate>,
    },
    /// Drop cached values of an indicator
    Clear {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        indicator: IndicatorId,
        #[arg(short, long)]
        stock: Option<StockId>,
        /// Restrict private-tier deletion to this user
        #[arg(short, long)]
        user: Option<UserId>,
    },
}

impl Command {
    fn config_path(&self) -> &PathBuf {
        match self {
            Command::InitDb { config }
            | Command::Compute { config, .. }
            | Command::Values { config, .. }
            | Command::Clear { config, .. } => config,
        }
    }
}

pub fn run(cli: Cli) -> ExitCode {
    let config = match load_config(cli.command.config_path()) {
        Ok(c) => c,
        Err(code) => return code,
    };
    init_logging(&config);

    match run_with_config(cli.command, &config) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e}");
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

pub fn load_config(path: &PathBuf) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|e| {
        let err = EngineError::ConfigParse {
            file: path.display().to_string(),
            reason: e.to_string(),
        };
        eprintln!("error: {err}");
        ExitCode::from(&err)
    })
}

/// `RUST_LOG` wins over `[log] level`; both fall back to `info`.
fn init_logging(config: &dyn ConfigPort) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(
            config
                .get_string("log", "level")
                .unwrap_or_else(|| "info".to_string()),
        )
    });
    // A second init (tests driving `run` repeatedly) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn dependency_policy(config: &dyn ConfigPort) -> Result<DependencyPolicy, EngineError> {
    match config.get_string("engine", "dependency_policy") {
        None => Ok(DependencyPolicy::default()),
        Some(value) => value
            .parse()
            .map_err(|reason: String| EngineError::ConfigInvalid {
                section: "engine".into(),
                key: "dependency_policy".into(),
                reason,
            }),
    }
}

/// Store adapters that can create their own tables.
trait Schema {
    fn initialize_schema(&self) -> Result<(), EngineError>;
}

#[cfg(feature = "sqlite")]
impl Schema for crate::adapters::sqlite_adapter::SqliteStore {
    fn initialize_schema(&self) -> Result<(), EngineError> {
        crate::adapters::sqlite_adapter::SqliteStore::initialize_schema(self)
    }
}

#[cfg(feature = "postgres")]
impl Schema for crate::adapters::postgres_adapter::PostgresStore {
    fn initialize_schema(&self) -> Result<(), EngineError> {
        crate::adapters::postgres_adapter::PostgresStore::initialize_schema(self)
    }
}

fn run_with_config(command: Command, config: &dyn ConfigPort) -> Result<ExitCode, EngineError> {
    let backend = config
        .get_string("store", "backend")
        .unwrap_or_else(|| "sqlite".to_string());

    match backend.to_lowercase().as_str() {
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            let store = crate::adapters::sqlite_adapter::SqliteStore::from_config(config)?;
            execute(store, command, config)
        }
        #[cfg(feature = "postgres")]
        "postgres" => {
            let store = crate::adapters::postgres_adapter::PostgresStore::from_config(config)?;
            execute(store, command, config)
        }
        other => Err(EngineError::ConfigInvalid {
            section: "store".into(),
            key: "backend".into(),
            reason: format!("unsupported or disabled backend '{other}'"),
        }),
    }
}

fn execute<S: Store + Schema>(
    store: S,
    command: Command,
    config: &dyn ConfigPort,
) -> Result<ExitCode, EngineError> {
    if let Command::InitDb { .. } = command {
        store.initialize_schema()?;
        info!("store schema initialized");
        return Ok(ExitCode::SUCCESS);
    }

    let sandbox = ProcessSandbox::from_config(config)?;
    let engine = IndicatorEngine::new(Arc::new(store), sandbox)
        .with_dependency_policy(dependency_policy(config)?);

    let code = match command {
        Command::InitDb { .. } => ExitCode::SUCCESS,
        Command::Compute {
            indicators,
            stock,
            user,
            start,
            end,
            ..
        } => {
            let options = ComputeOptions {
                start_date: start,
                end_date: end,
            };
            let results = engine.compute_indicators(&indicators, stock, user, options);
            print_json(&results)?;
            first_failure(results.iter().filter_map(|r| r.failure.as_ref().map(|f| f.error_kind)))
        }
        Command::Values {
            indicator,
            stock,
            user,
            auto_compute,
            start,
            end,
            ..
        } => {
            let options = ValuesOptions {
                auto_compute,
                start_date: start,
                end_date: end,
            };
            let result = engine.get_indicator_values(indicator, stock, user, options);
            print_json(&result)?;
            first_failure(result.failure.as_ref().map(|f| f.error_kind))
        }
        Command::Clear {
            indicator,
            stock,
            user,
            ..
        } => {
            let result = engine.clear_indicator_cache(indicator, stock, user);
            print_json(&result)?;
            first_failure(result.failure.as_ref().map(|f| f.error_kind))
        }
    };
    Ok(code)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), EngineError> {
    let text = serde_json::to_string_pretty(value).map_err(std::io::Error::other)?;
    println!("{text}");
    Ok(())
}

/// Process exit status for a failed operation of the given kind.
pub fn exit_status(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::PersistenceError => 3,
        ErrorKind::ExecutionError | ErrorKind::ValidationError => 4,
        ErrorKind::NotFound | ErrorKind::AccessDenied | ErrorKind::NoData => 5,
    }
}

fn first_failure(kinds: impl IntoIterator<Item = ErrorKind>) -> ExitCode {
    kinds
        .into_iter()
        .next()
        .map(|kind| ExitCode::from(exit_status(kind)))
        .unwrap_or(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MapConfig(Vec<(&'static str, &'static str, &'static str)>);

    impl ConfigPort for MapConfig {
        fn get_string(&self, section: &str, key: &str) -> Option<String> {
            self.0
                .iter()
                .find(|(s, k, _)| *s == section && *k == key)
                .map(|(_, _, v)| v.to_string())
        }
        fn get_int(&self, _section: &str, _key: &str, default: i64) -> i64 {
            default
        }
        fn get_bool(&self, _section: &str, _key: &str, default: bool) -> bool {
            default
        }
    }

    #[test]
    fn parses_compute_with_several_indicators() {
        let cli = Cli::try_parse_from([
            "indicator-engine",
            "compute",
            "-c",
            "engine.ini",
            "-i",
            "3",
            "7",
            "-s",
            "12",
            "-u",
            "42",
            "--start",
            "2024-01-02",
        ])
        .unwrap();
        match cli.command {
            Command::Compute {
                indicators,
                stock,
                user,
                start,
                end,
                ..
            } => {
                assert_eq!(indicators, vec![3, 7]);
                assert_eq!(stock, 12);
                assert_eq!(user, 42);
                assert_eq!(start, NaiveDate::from_ymd_opt(2024, 1, 2));
                assert_eq!(end, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn clear_user_is_optional() {
        let cli =
            Cli::try_parse_from(["indicator-engine", "clear", "-c", "e.ini", "-i", "5"]).unwrap();
        match cli.command {
            Command::Clear { stock, user, .. } => {
                assert_eq!(stock, None);
                assert_eq!(user, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rejects_malformed_date() {
        let result = Cli::try_parse_from([
            "indicator-engine",
            "values",
            "-c",
            "e.ini",
            "-i",
            "1",
            "-s",
            "1",
            "-u",
            "1",
            "--end",
            "2024-13-01",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn dependency_policy_from_config() {
        assert_eq!(
            dependency_policy(&MapConfig(vec![])).unwrap(),
            DependencyPolicy::UseCached
        );
        assert_eq!(
            dependency_policy(&MapConfig(vec![(
                "engine",
                "dependency_policy",
                "require_cached"
            )]))
            .unwrap(),
            DependencyPolicy::RequireCached
        );
        assert!(matches!(
            dependency_policy(&MapConfig(vec![("engine", "dependency_policy", "eager")])),
            Err(EngineError::ConfigInvalid { .. })
        ));
    }

    #[test]
    fn unknown_backend_is_a_config_error() {
        let config = MapConfig(vec![("store", "backend", "oracle")]);
        let command = Command::InitDb {
            config: PathBuf::from("unused.ini"),
        };
        assert!(matches!(
            run_with_config(command, &config),
            Err(EngineError::ConfigInvalid { .. })
        ));
    }

    #[test]
    fn exit_codes_follow_error_kind() {
        assert_eq!(exit_status(ErrorKind::NotFound), 5);
        assert_eq!(exit_status(ErrorKind::AccessDenied), 5);
        assert_eq!(exit_status(ErrorKind::ValidationError), 4);
        assert_eq!(exit_status(ErrorKind::ExecutionError), 4);
        assert_eq!(exit_status(ErrorKind::PersistenceError), 3);
    }

    #[test]
    fn single_result_failure_sets_exit_code() {
        let failed = Some(ErrorKind::AccessDenied);
        assert_eq!(
            format!("{:?}", first_failure(failed)),
            format!("{:?}", ExitCode::from(5))
        );
        assert_eq!(
            format!("{:?}", first_failure(None)),
            format!("{:?}", ExitCode::SUCCESS)
        );
        assert_eq!(
            format!("{:?}", first_failure(vec![ErrorKind::NoData, ErrorKind::ExecutionError])),
            format!("{:?}", ExitCode::from(5))
        );
    }
}
