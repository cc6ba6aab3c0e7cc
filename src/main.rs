use grid_subtasking::config::{NodeConfig, SUM_HANDLER};
use grid_subtasking::decomposition::aggregator::{combine, decode_value};
use grid_subtasking::decomposition::client::submit_work_unit;
use grid_subtasking::decomposition::engine::DecompositionEngine;
use grid_subtasking::decomposition::types::WorkUnit;
use grid_subtasking::executor::executor::TaskExecutor;
use grid_subtasking::executor::registry::TaskHandlerRegistry;
use grid_subtasking::grid::memory::InMemoryGrid;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match NodeConfig::from_args(std::env::args().skip(1)) {
        Ok(config) => config,
        Err(e) => {
            let program = std::env::args().next().unwrap_or_else(|| "subtasking-node".into());
            eprintln!("Error: {:#}", e);
            eprintln!("Usage: {} {}", program, NodeConfig::USAGE);
            eprintln!("Example: {} --size 100 --threshold 7 --workers 8", program);
            std::process::exit(1);
        }
    };

    tracing::info!(
        "Summing 1..={} with threshold {} on {} workers",
        config.size,
        config.threshold,
        config.workers
    );

    let grid = Arc::new(InMemoryGrid::new());
    let session = grid.create_session(config.task_options());

    let registry = TaskHandlerRegistry::new();
    DecompositionEngine::new(grid.clone()).register(&registry, SUM_HANDLER);
    tracing::info!("Registered handlers: {:?}", registry.list_handlers());

    let executor = TaskExecutor::new(grid.clone(), registry, config.executor_config())?;
    let workers = executor.start();

    let unit = WorkUnit::sequence(config.size, config.threshold);
    let expected = combine(&unit.values);

    let (root, root_task) =
        submit_work_unit(grid.as_ref(), &session, &unit, &config.task_options()).await?;
    tracing::info!("Root task {} submitted, waiting on {}", root_task, root);

    let outcome = grid.wait_for_result(&session, &root, config.timeout).await;

    for worker in &workers {
        worker.abort();
    }

    let (pending, running, completed, failed) = grid.task_status_counts();
    tracing::info!(
        "Tasks: {} completed, {} failed, {} running, {} pending ({} handler runs ok, {} failed)",
        completed,
        failed,
        running,
        pending,
        executor.succeeded(),
        executor.failed()
    );

    let value = decode_value(&outcome?)?;
    match expected {
        Some(expected) if expected != value => {
            anyhow::bail!("Grid computed {} but the sequential sum is {}", value, expected)
        }
        _ => {}
    }

    tracing::info!("Result: {}", value);
    println!("{}", value);

    Ok(())
}
