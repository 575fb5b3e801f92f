//! planchat - a Planfix-aware LLM chat assistant CLI

use anyhow::Context;
use clap::{Parser, Subcommand};
use planchat::{
    cache::CacheService,
    config::{Config, ConfigManager},
    enrich::ContextEnricher,
    llm::{LlmProvider, LlmProviderFactory},
    planfix::{PlanfixClient, PlanfixService},
    utils::errors::PlanchatError,
    Result,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// planchat: ask questions about your Planfix tasks, projects, and team
#[derive(Parser)]
#[command(name = "planchat")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Clone)]
enum Commands {
    /// Refresh the task cache from Planfix
    Refresh {
        /// Refresh even if the cache is still fresh
        #[arg(long)]
        force: bool,
    },
    /// Show cache statistics
    Stats,
    /// Ask the assistant a question about your Planfix data
    Ask {
        /// The question to ask
        query: String,
    },
    /// Search cached tasks, projects, or users
    Search {
        /// Search text
        query: String,
        /// Include completed tasks in the results
        #[arg(long)]
        include_completed: bool,
        /// Search projects instead of tasks
        #[arg(long, conflicts_with = "users")]
        projects: bool,
        /// Search users instead of tasks
        #[arg(long, conflicts_with = "projects")]
        users: bool,
    },
    /// Show a single task's details
    Task {
        /// Task id
        id: i64,
    },
    /// Refresh the cache periodically until interrupted
    Watch,
    /// Check configuration and cache status
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    let config_manager = match &cli.config {
        Some(path) => ConfigManager::with_path(path.clone())
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => ConfigManager::new().context("loading configuration")?,
    };

    match cli.command {
        Commands::Refresh { force } => run_refresh(config_manager.config(), force).await,
        Commands::Stats => run_stats(config_manager.config()).await,
        Commands::Ask { query } => run_ask(config_manager.config(), &query).await,
        Commands::Search {
            query,
            include_completed,
            projects,
            users,
        } => run_search(config_manager.config(), &query, include_completed, projects, users).await,
        Commands::Task { id } => run_task(config_manager.config(), id).await,
        Commands::Watch => run_watch(config_manager.config()).await,
        Commands::Status => run_status(&config_manager),
    }?;
    Ok(())
}

/// Initialize tracing
fn init_logging(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(log_level)
        .map_err(|e| PlanchatError::unknown(format!("Invalid log level: {}", e)))?;

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| PlanchatError::unknown(format!("Failed to set logger: {}", e)))?;

    Ok(())
}

/// Build the Planfix service from configuration
fn build_service(config: &Config) -> Result<Arc<PlanfixService>> {
    if config.planfix.account.is_empty() {
        return Err(PlanchatError::validation(
            "planfix.account",
            "Planfix account name is not configured",
        ));
    }
    let token = config.planfix_token().ok_or_else(|| {
        PlanchatError::validation(
            "planfix.api_token",
            "Planfix API token is not configured",
        )
    })?;

    let client = PlanfixClient::new(
        &config.planfix.account,
        token,
        config.planfix.request_timeout(),
    );
    let cache = CacheService::new(config.resolved_cache_dir()?)?;
    Ok(Arc::new(PlanfixService::new(client, cache)))
}

/// Build the active LLM provider from configuration
fn build_provider(config: &Config) -> Result<Box<dyn LlmProvider>> {
    let provider_config = config
        .get_active_provider_config()
        .ok_or_else(|| PlanchatError::not_found("No active provider configured"))?;

    let mut provider_settings = std::collections::HashMap::new();
    if let Some(api_key) = &provider_config.api_key {
        provider_settings.insert("api_key".to_string(), api_key.clone());
    }

    Ok(LlmProviderFactory::create_provider(
        &config.active_provider,
        provider_settings,
    )?)
}

async fn run_refresh(config: &Config, force: bool) -> Result<()> {
    let service = build_service(config)?;

    if !force && service.is_cache_valid(config.refresh.max_age_minutes) {
        let age = service.cache_age_minutes().unwrap_or(0.0);
        println!(
            "Cache is fresh ({:.1} minutes old); use --force to refresh anyway",
            age
        );
        return Ok(());
    }

    let summary = service.force_refresh().await?;
    println!(
        "Refreshed {} tasks in {:.2}s ({} project names fixed)",
        summary.tasks_loaded, summary.duration_seconds, summary.projects_fixed
    );
    print_stats(&summary.stats);
    Ok(())
}

async fn run_stats(config: &Config) -> Result<()> {
    let service = build_service(config)?;
    service
        .ensure_fresh(false, config.refresh.max_age_minutes)
        .await;
    print_stats(&service.get_stats());
    Ok(())
}

fn print_stats(stats: &planchat::cache::CacheStats) {
    println!("Planfix cache statistics:");
    println!("  Total tasks:         {}", stats.total_tasks);
    println!("  Active tasks:        {}", stats.active_tasks);
    println!("  Completed tasks:     {}", stats.completed_tasks);
    println!("  Overdue tasks:       {}", stats.overdue_tasks);
    println!("  Due this week:       {}", stats.tasks_due_this_week);
    println!("  Completion rate:     {}%", stats.completion_rate);
    println!("  Projects:            {}", stats.total_projects);
    println!("  Avg tasks/project:   {}", stats.avg_tasks_per_project);
    println!("  Cache age (minutes): {:.1}", stats.cache_age_minutes);
}

async fn run_ask(config: &Config, query: &str) -> Result<()> {
    config.validate()?;

    let service = build_service(config)?;
    service
        .ensure_fresh(false, config.refresh.max_age_minutes)
        .await;

    let provider = build_provider(config)?;
    let enricher = ContextEnricher::new(service)?;

    info!(
        "Sending query to {} ({})",
        provider.provider_name(),
        config.active_model
    );
    let reply = enricher
        .process_query(provider.as_ref(), &config.active_model, query, &[])
        .await?;

    println!("{}", reply);
    Ok(())
}

async fn run_search(
    config: &Config,
    query: &str,
    include_completed: bool,
    projects: bool,
    users: bool,
) -> Result<()> {
    let service = build_service(config)?;
    service
        .ensure_fresh(false, config.refresh.max_age_minutes)
        .await;

    if projects {
        let matches = service.search_projects(query);
        println!("{} matching projects:", matches.len());
        for project in matches {
            println!(
                "  {} (ID: {}) - {} tasks, {} active, {} overdue",
                project.name,
                project.id,
                project.task_count,
                project.active_tasks,
                project.overdue_tasks
            );
        }
    } else if users {
        let matches = service.search_users(query);
        println!("{} matching users:", matches.len());
        for user in matches {
            println!(
                "  {} (ID: {}) - {} assigned, {} overdue, {} created",
                user.name, user.id, user.assigned_tasks, user.assigned_overdue, user.created_tasks
            );
        }
    } else {
        let matches = service.search_tasks(query, include_completed);
        println!("{} matching tasks:", matches.len());
        for task in matches {
            let name = task.name.as_deref().unwrap_or("Unnamed Task");
            let mut line = format!("  #{} {} [{}]", task.id, name, task.status_label());
            if let Some(due) = task.end_date() {
                line.push_str(&format!(", due {}", due));
            }
            println!("{}", line);
        }
    }
    Ok(())
}

async fn run_task(config: &Config, id: i64) -> Result<()> {
    let service = build_service(config)?;
    service
        .ensure_fresh(false, config.refresh.max_age_minutes)
        .await;

    let Some(task) = service.get_task_by_id(id).await else {
        println!("Task {} not found", id);
        return Ok(());
    };

    println!("Task #{}", task.id);
    println!("  Name:    {}", task.name.as_deref().unwrap_or("Unnamed Task"));
    println!("  Status:  {}", task.status_label());
    if let Some(project) = task.project.as_ref().and_then(|p| p.name.as_deref()) {
        println!("  Project: {}", project);
    }
    if let Some(start) = task.start_date() {
        println!("  Start:   {}", start);
    }
    if let Some(due) = task.end_date() {
        println!("  Due:     {}", due);
    }
    let assignees = task.assignee_list();
    if !assignees.is_empty() {
        let names: Vec<&str> = assignees
            .iter()
            .map(|p| p.name.as_deref().unwrap_or("Unnamed"))
            .collect();
        println!("  Assignees: {}", names.join(", "));
    }
    if let Some(creator) = task.assigner.as_ref().and_then(|p| p.name.as_deref()) {
        println!("  Created by: {}", creator);
    }
    if let Some(description) = task.description.as_deref() {
        println!("  Description: {}", description);
    }
    Ok(())
}

/// Refresh the cache on a fixed interval until interrupted. A failed
/// refresh is logged and the loop keeps going; the previous snapshot stays
/// in place.
async fn run_watch(config: &Config) -> Result<()> {
    let service = build_service(config)?;
    let interval_minutes = config.refresh.interval_minutes.max(1);
    println!(
        "Watching Planfix, refreshing every {} minutes (Ctrl-C to stop)",
        interval_minutes
    );

    let mut ticker = tokio::time::interval(Duration::from_secs(interval_minutes * 60));
    loop {
        ticker.tick().await;
        match service.force_refresh().await {
            Ok(summary) => {
                info!(
                    "Watch refresh: {} tasks in {:.2}s",
                    summary.tasks_loaded, summary.duration_seconds
                );
            }
            Err(e) => {
                error!("Watch refresh failed: {}", e);
            }
        }
    }
}

fn run_status(config_manager: &ConfigManager) -> Result<()> {
    let config = config_manager.config();

    println!("planchat v{}", env!("CARGO_PKG_VERSION"));

    println!("\nConfiguration:");
    println!("  Active provider: {}", config.active_provider);
    println!("  Active model:    {}", config.active_model);
    println!(
        "  Planfix account: {}",
        if config.planfix.account.is_empty() {
            "(not set)"
        } else {
            config.planfix.account.as_str()
        }
    );
    println!(
        "  Planfix token:   {}",
        if config.planfix_token().is_some() {
            "configured"
        } else {
            "missing"
        }
    );

    match config.validate() {
        Ok(()) => println!("  Validation:      ok"),
        Err(e) => println!("  Validation:      {}", e),
    }

    println!("\nProviders:");
    if config.providers.is_empty() {
        println!("  (none configured)");
    } else {
        for (name, provider_config) in &config.providers {
            let marker = if name == &config.active_provider {
                "*"
            } else {
                " "
            };
            let key = if provider_config.api_key.is_some() {
                "key set"
            } else {
                "no key"
            };
            println!("  {} {} ({})", marker, name, key);
        }
    }

    println!("\nCache:");
    match config.resolved_cache_dir() {
        Ok(dir) => {
            println!("  Directory: {}", dir.display());
            if let Ok(cache) = CacheService::new(&dir) {
                match cache.cache_age_minutes() {
                    Some(age) => {
                        let fresh = cache.is_cache_valid(config.refresh.max_age_minutes);
                        println!(
                            "  Age: {:.1} minutes ({})",
                            age,
                            if fresh { "fresh" } else { "stale" }
                        );
                        println!("  Tasks: {}", cache.get_all_tasks().len());
                    }
                    None => println!("  Never populated"),
                }
            }
        }
        Err(e) => println!("  Directory: unavailable ({})", e),
    }

    Ok(())
}
