//! focuskit - focus timer with site blocking
//!
//! Usage:
//!   focuskit status                 Show the current phase and today's stats
//!   focuskit start [MINS]           Start an ad hoc focus session (default: 25)
//!   focuskit stop                   Stop the current focus session
//!   focuskit cycle start|stop       Run focus/break cycles
//!   focuskit block add|remove|list  Manage blocked sites
//!   focuskit task ...               Today's task list
//!   focuskit pause <REASON>         Record why you paused
//!   focuskit stats [DAYS]           Show statistics
//!   focuskit run                    Keep timers live until Ctrl-C
//!   focuskit exec <JSON>            Dispatch a raw JSON command

use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};

use focuskit_lib::{
    db::models::{Task, TaskPriority},
    resolve_data_dir,
    settings::NotificationSettings,
    stats::{stats_window, StatsSummary},
    timer::{dispatch_json, ConfigOverrides, SessionMode, StatusReport},
    utils::logging::init_logging,
    App,
};

#[derive(Parser)]
#[command(name = "focuskit")]
#[command(about = "Focus timer with site blocking, tasks and stats")]
#[command(version)]
#[command(after_help = r#"EXAMPLES:
    focuskit start                    # 25-minute focus session
    focuskit cycle start --focus 50   # 50/5 cycles, long break every 4
    focuskit block add reddit.com
    focuskit task add "write report" --priority high
    focuskit run                      # keep phases advancing on time
    focuskit exec '{"type":"getStatus"}'

Data lives in $FOCUSKIT_DATA_DIR (default: the platform data directory).
"#)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the current phase and today's stats
    #[command(alias = "st")]
    Status,

    /// Start an ad hoc focus session
    #[command(alias = "s")]
    Start {
        /// Duration in minutes (default: 25)
        #[arg(value_name = "MINS")]
        minutes: Option<f64>,
    },

    /// Stop the current focus session
    Stop,

    /// Focus/break cycles
    Cycle {
        #[command(subcommand)]
        action: CycleAction,
    },

    /// Blocked sites
    Block {
        #[command(subcommand)]
        action: BlockAction,
    },

    /// Today's tasks
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },

    /// Record why you paused
    Pause {
        reason: String,
    },

    /// Show statistics
    Stats {
        /// Number of days to show (default: 7)
        #[arg(default_value = "7")]
        days: u32,
    },

    /// Show or change settings
    Settings {
        #[command(subcommand)]
        action: Option<SettingsAction>,
    },

    /// Keep wakeups and blocking live until Ctrl-C
    Run,

    /// Dispatch a raw JSON command and print the JSON reply
    Exec {
        json: String,
    },
}

#[derive(Subcommand)]
enum CycleAction {
    /// Start a cycle, saving any overrides
    Start(CycleOverrides),
    /// Stop the cycle and reset the counter
    Stop,
}

#[derive(Args)]
struct CycleOverrides {
    /// Focus minutes
    #[arg(long)]
    focus: Option<u32>,
    /// Short break minutes
    #[arg(long = "break")]
    break_minutes: Option<u32>,
    /// Long break minutes
    #[arg(long)]
    long_break: Option<u32>,
    /// Focus sessions before a long break
    #[arg(long)]
    every: Option<u32>,
    /// Start the next phase automatically
    #[arg(long)]
    auto: Option<bool>,
}

impl From<CycleOverrides> for ConfigOverrides {
    fn from(args: CycleOverrides) -> Self {
        ConfigOverrides {
            focus_minutes: args.focus.map(Value::from),
            break_minutes: args.break_minutes.map(Value::from),
            long_break_minutes: args.long_break.map(Value::from),
            sessions_before_long: args.every.map(Value::from),
            auto_start_next: args.auto.map(Value::from),
        }
    }
}

#[derive(Subcommand)]
enum BlockAction {
    Add { domain: String },
    #[command(alias = "rm")]
    Remove { domain: String },
    #[command(alias = "ls")]
    List,
}

#[derive(Clone, Copy, ValueEnum)]
enum PriorityArg {
    Low,
    Normal,
    High,
    Urgent,
}

impl From<PriorityArg> for TaskPriority {
    fn from(value: PriorityArg) -> Self {
        match value {
            PriorityArg::Low => TaskPriority::Low,
            PriorityArg::Normal => TaskPriority::Normal,
            PriorityArg::High => TaskPriority::High,
            PriorityArg::Urgent => TaskPriority::Urgent,
        }
    }
}

#[derive(Subcommand)]
enum TaskAction {
    Add {
        title: String,
        #[arg(long, value_enum, default_value = "normal")]
        priority: PriorityArg,
    },
    #[command(alias = "ls")]
    List,
    Done { id: String },
    Undo { id: String },
    #[command(alias = "rm")]
    Delete { id: String },
}

#[derive(Subcommand)]
enum SettingsAction {
    Show,
    /// Turn phase alerts on or off
    Notifications {
        #[arg(value_parser = ["on", "off"])]
        state: String,
    },
}

// ANSI color codes
const GREEN: &str = "\x1b[0;32m";
const CYAN: &str = "\x1b[0;36m";
const MAGENTA: &str = "\x1b[0;35m";
const BOLD: &str = "\x1b[1m";
const NC: &str = "\x1b[0m";

fn use_colors() -> bool {
    std::io::IsTerminal::is_terminal(&std::io::stdout())
}

fn color(code: &str, text: &str) -> String {
    if use_colors() {
        format!("{code}{text}{NC}")
    } else {
        text.to_string()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let app = App::open(resolve_data_dir()).await?;

    match cli.command.unwrap_or(Commands::Status) {
        Commands::Status => cmd_status(&app).await,
        Commands::Start { minutes } => {
            app.controller.start_focus(minutes.map(Value::from)).await?;
            println!("{} Focus session started", color(GREEN, "[ok]"));
            cmd_status(&app).await
        }
        Commands::Stop => {
            app.controller.stop_focus().await?;
            println!("{} Focus session stopped", color(GREEN, "[ok]"));
            Ok(())
        }
        Commands::Cycle { action } => match action {
            CycleAction::Start(overrides) => {
                app.controller.start_cycle(overrides.into()).await?;
                println!("{} Cycle started", color(GREEN, "[ok]"));
                cmd_status(&app).await
            }
            CycleAction::Stop => {
                app.controller.stop_cycle().await?;
                println!("{} Cycle stopped", color(GREEN, "[ok]"));
                Ok(())
            }
        },
        Commands::Block { action } => {
            let list = match action {
                BlockAction::Add { domain } => app.controller.add_blocked_site(&domain).await?,
                BlockAction::Remove { domain } => {
                    app.controller.remove_blocked_site(&domain).await?
                }
                BlockAction::List => app.controller.list_blocked_sites().await?,
            };
            if list.is_empty() {
                println!("No blocked sites");
            }
            for domain in list {
                println!("  {domain}");
            }
            Ok(())
        }
        Commands::Task { action } => cmd_task(&app, action).await,
        Commands::Pause { reason } => {
            app.controller.record_pause_reason(&reason).await?;
            println!("{} Pause recorded", color(GREEN, "[ok]"));
            Ok(())
        }
        Commands::Stats { days } => cmd_stats(&app, days).await,
        Commands::Settings { action } => cmd_settings(&app, action),
        Commands::Run => app.run_daemon().await,
        Commands::Exec { json } => {
            let reply = match dispatch_json(&app.controller, &json).await {
                Ok(reply) => reply,
                Err(err) => json!({ "ok": false, "error": err.to_string() }),
            };
            println!("{}", serde_json::to_string_pretty(&reply)?);
            Ok(())
        }
    }
}

fn local_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%H:%M").to_string()
}

async fn cmd_status(app: &App) -> Result<()> {
    let status: StatusReport = app.controller.status().await?;

    let headline = match status.current_mode {
        SessionMode::Focus => "FOCUS",
        SessionMode::Break => "BREAK",
        SessionMode::Idle => "IDLE",
    };
    println!("{}", color(&format!("{BOLD}{MAGENTA}"), headline));
    println!();

    match (status.session_end_at, status.remaining_ms) {
        (Some(end), Some(remaining)) => {
            let secs = remaining / 1000;
            println!(
                "  {} {}m {:02}s (ends {})",
                color(CYAN, "Remaining:"),
                secs / 60,
                secs % 60,
                local_time(end)
            );
        }
        _ if status.current_mode == SessionMode::Break => {
            println!("  Paused. Run 'focuskit start' to resume.");
        }
        _ => {}
    }
    println!(
        "  {}  {}",
        color(CYAN, "Blocking:"),
        if status.focus_enabled { "on" } else { "off" }
    );
    println!(
        "  {}     {} of {} before long break",
        color(CYAN, "Cycle:"),
        status.completed_focus_count % status.config.sessions_before_long.max(1),
        status.config.sessions_before_long
    );
    println!(
        "  {}     {} session(s), {} min, {} task(s) done",
        color(CYAN, "Today:"),
        status.today.sessions_completed,
        status.today.focus_seconds_accrued / 60,
        status.today.tasks_completed_delta
    );
    if status.degraded {
        println!();
        println!("  Timer could not be scheduled; run 'focuskit run' to keep phases on time.");
    }
    Ok(())
}

fn print_task(task: &Task) {
    let mark = if task.done { "[x]" } else { "[ ]" };
    println!(
        "  {mark} {} {} ({})",
        color(CYAN, &task.id[..8.min(task.id.len())]),
        task.title,
        task.priority.as_str()
    );
}

async fn cmd_task(app: &App, action: TaskAction) -> Result<()> {
    match action {
        TaskAction::Add { title, priority } => {
            let task = app.tasks.add(&title, priority.into()).await?;
            print_task(&task);
        }
        TaskAction::List => {
            let tasks = app.tasks.today().await?;
            if tasks.is_empty() {
                println!("No tasks for today");
            }
            tasks.iter().for_each(print_task);
        }
        TaskAction::Done { id } => {
            let id = resolve_task(app, &id).await?;
            print_task(&app.tasks.set_done(&id, true).await?);
        }
        TaskAction::Undo { id } => {
            let id = resolve_task(app, &id).await?;
            print_task(&app.tasks.set_done(&id, false).await?);
        }
        TaskAction::Delete { id } => {
            let task = app.tasks.delete(&resolve_task(app, &id).await?).await?;
            println!("{} Deleted {}", color(GREEN, "[ok]"), task.title);
        }
    }
    Ok(())
}

/// Accept the short id printed by `task list`.
async fn resolve_task(app: &App, id: &str) -> Result<String> {
    let matches: Vec<String> = app
        .tasks
        .today()
        .await?
        .into_iter()
        .map(|task| task.id)
        .filter(|task_id| task_id.starts_with(id))
        .collect();
    match matches.as_slice() {
        [only] => Ok(only.clone()),
        _ => Ok(id.to_string()),
    }
}

async fn cmd_stats(app: &App, days: u32) -> Result<()> {
    let status = app.controller.status().await?;
    let today = Local::now().date_naive();
    let window = stats_window(&status.stats, today, days);
    let summary = StatsSummary::from_window(&window);
    let (hours, mins) = summary.total_time();

    println!("{}", color(BOLD, &format!("Focus Statistics (Last {days} days)")));
    println!();
    println!("  {}     {}", color(CYAN, "Sessions:"), summary.total_sessions);
    println!("  {}   {hours}h {mins}m", color(CYAN, "Focus time:"));
    println!(
        "  {}  {} min",
        color(CYAN, "Avg session:"),
        summary.average_session_minutes
    );
    println!("  {}   {}", color(CYAN, "Tasks done:"), summary.total_tasks_done);
    if let Some((reason, count)) = &summary.top_pause_reason {
        println!("  {}  {reason} ({count})", color(CYAN, "Top pause:"));
    }
    println!();
    for (day, stats) in &window {
        println!(
            "  {}  {:>2} session(s)  {:>4} min",
            day.format("%a %m-%d"),
            stats.sessions_completed,
            stats.focus_seconds_accrued / 60
        );
    }
    Ok(())
}

fn cmd_settings(app: &App, action: Option<SettingsAction>) -> Result<()> {
    if let Some(SettingsAction::Notifications { state }) = action {
        app.settings
            .update_notifications(NotificationSettings {
                enabled: state == "on",
            })?;
        println!("{} Notifications {state}", color(GREEN, "[ok]"));
    }
    let current = app.settings.current();
    println!("{}", serde_json::to_string_pretty(&current)?);
    println!("  (from {})", app.settings.path().display());
    Ok(())
}
