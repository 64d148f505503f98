use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use inbox_actions::benchmark::{self, Judge, JudgeBenchmark, TableStyle};
use inbox_actions::board::{BoardSink, JsonlBoard};
use inbox_actions::config::{Config, LlmConfig, LogConfig, PipelineConfig, StoreConfig};
use inbox_actions::llm::create_provider;
use inbox_actions::mail::{EmlDirectoryClient, RecipientFilter};
use inbox_actions::pipeline::{
    ConfidenceGate, Dispatcher, ExtractionOrchestrator, IngestionCoordinator, PipelineRunner,
};
use inbox_actions::store::{LibSqlBackend, RunStore};

const DEFAULT_REPORT_LIMIT: usize = 10;
const USAGE: &str = "usage: inbox-actions [run | reports [N] | benchmark <dataset.jsonl> [--models a,b] [--output report.md]]";

#[tokio::main]
async fn main() -> ExitCode {
    let _log_guard = init_tracing(&LogConfig::from_env());

    let args: Vec<String> = std::env::args().skip(1).collect();
    let result = match args.first().map(String::as_str) {
        None | Some("run") => run().await,
        Some("reports") => reports(args.get(1).map(String::as_str)).await,
        Some("benchmark") => run_benchmark(&args[1..]).await,
        Some("-h" | "--help" | "help") => {
            println!("{USAGE}");
            Ok(())
        }
        Some(other) => Err(anyhow!("unknown command '{other}'\n{USAGE}")),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Console logging, plus a daily rolling file when a log dir is configured.
/// The returned guard flushes the file writer on drop.
fn init_tracing(log: &LogConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match &log.dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "inbox-actions.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(file_layer)
        .init();

    guard
}

async fn run() -> anyhow::Result<()> {
    let config = Config::from_env().context("Invalid configuration")?;

    eprintln!("📬 Inbox Actions v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.llm.model);
    eprintln!("   Mail dir: {}", config.mail.dir.display());
    eprintln!("   Database: {}", config.store.db_path.display());
    eprintln!(
        "   Board: {} / {}",
        config.board.board_id, config.board.list_name
    );

    let store = Arc::new(
        LibSqlBackend::new_local(&config.store.db_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to open database at {}",
                    config.store.db_path.display()
                )
            })?,
    );
    let llm = create_provider(&config.llm).context("Failed to create LLM provider")?;
    let board = Arc::new(
        JsonlBoard::open(&config.board.dir, &config.board.board_id)
            .await
            .with_context(|| format!("Failed to open board at {}", config.board.dir.display()))?,
    );
    let mail = Arc::new(EmlDirectoryClient::new(&config.mail.dir));

    let ingest = IngestionCoordinator::new(
        mail,
        store.clone(),
        Arc::new(ExtractionOrchestrator::new(llm)),
        config.pipeline.lookback,
        config.pipeline.max_retries,
    );
    let dispatcher = Dispatcher::new(
        ConfidenceGate::new(config.pipeline.confidence_threshold),
        config.pipeline.empty_policy,
        BoardSink::new(board, &config.board.board_id, &config.board.list_name),
        store.clone(),
    );
    let runner = PipelineRunner::new(
        ingest,
        dispatcher,
        store,
        RecipientFilter::new(config.pipeline.recipients.clone()),
        config.pipeline.continue_on_error,
    );

    let report = runner.run_once().await.context("Run failed")?;
    println!("{report}");
    Ok(())
}

async fn reports(limit: Option<&str>) -> anyhow::Result<()> {
    let limit = match limit {
        Some(raw) => raw
            .parse::<usize>()
            .with_context(|| format!("Invalid report count '{raw}'"))?,
        None => DEFAULT_REPORT_LIMIT,
    };

    let store_config = StoreConfig::from_env();
    let store = LibSqlBackend::new_local(&store_config.db_path)
        .await
        .with_context(|| {
            format!(
                "Failed to open database at {}",
                store_config.db_path.display()
            )
        })?;

    let reports = store.recent_reports(limit).await?;
    if reports.is_empty() {
        println!("No runs recorded yet.");
    }
    for report in reports {
        println!("{report}\n");
    }
    Ok(())
}

async fn run_benchmark(args: &[String]) -> anyhow::Result<()> {
    let mut dataset = None;
    let mut models = None;
    let mut output = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--models" => models = Some(iter.next().context("--models needs a value")?),
            "--output" => output = Some(iter.next().context("--output needs a value")?),
            path if dataset.is_none() => dataset = Some(path),
            other => return Err(anyhow!("unexpected argument '{other}'\n{USAGE}")),
        }
    }
    let dataset = dataset.ok_or_else(|| anyhow!("benchmark needs a dataset path\n{USAGE}"))?;

    let llm_config = LlmConfig::from_env().context("Invalid LLM configuration")?;
    let pipeline_config = PipelineConfig::from_env().context("Invalid pipeline configuration")?;
    let cases = benchmark::load_cases(Path::new(dataset))
        .await
        .with_context(|| format!("Failed to load dataset {dataset}"))?;

    let judge_models: Vec<String> = match models {
        Some(list) => list
            .split(',')
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .collect(),
        None => vec![llm_config.model.clone()],
    };
    let judges = judge_models
        .into_iter()
        .map(|model| {
            let config = LlmConfig {
                model,
                ..llm_config.clone()
            };
            create_provider(&config).map(Judge::new)
        })
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to create judge provider")?;

    let extractor = Arc::new(ExtractionOrchestrator::new(
        create_provider(&llm_config).context("Failed to create LLM provider")?,
    ));
    let rows = JudgeBenchmark::new(extractor, pipeline_config.max_retries)
        .run(&judges, &cases)
        .await;

    println!("{}", benchmark::render_table(&rows, TableStyle::Ascii));
    if let Some(path) = output {
        tokio::fs::write(path, benchmark::render_table(&rows, TableStyle::Markdown))
            .await
            .with_context(|| format!("Failed to write {path}"))?;
    }
    Ok(())
}
