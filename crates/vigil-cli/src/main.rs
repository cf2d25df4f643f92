mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use vigil_core::config::get_data_dir;

use commands::{config, daemon, enroll, init, report};

#[derive(Parser)]
#[command(name = "vigil")]
#[command(about = "Workstation presence monitoring agent", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Initialize vigil (first-time setup)
    Init,
    /// Start the monitoring daemon
    Start,
    /// (Internal) Run the daemon process
    #[command(hide = true)]
    DaemonInternalStart,
    /// Stop the monitoring daemon
    Stop,
    /// Check daemon status and today's usage
    Status,
    /// Run the daemon in the foreground
    Run,
    /// Pause presence monitoring
    Pause,
    /// Resume presence monitoring
    Resume,
    /// Recompute today's usage from the event log
    Analyze,
    /// Show stored daily usage
    Report {
        /// Time period: today, week, month, or all
        #[arg(default_value = "today")]
        period: String,
    },
    /// Capture the reference face from the camera
    Enroll,
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// Print the configuration file location
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // The daemon logs into the event log instead
    if !matches!(cli.command, Commands::DaemonInternalStart | Commands::Run) {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .format_timestamp_secs()
            .init();
    }

    let data_dir = get_data_dir()?;

    match cli.command {
        Commands::Init => init::init_command(),
        Commands::Start => daemon::start_daemon(&data_dir),
        Commands::DaemonInternalStart => daemon::run_daemon_process().await,
        Commands::Stop => daemon::stop_daemon(&data_dir).await,
        Commands::Status => daemon::show_status(&data_dir).await,
        Commands::Run => daemon::run_foreground().await,
        Commands::Pause => daemon::pause_monitoring(&data_dir).await,
        Commands::Resume => daemon::resume_monitoring(&data_dir).await,
        Commands::Analyze => daemon::analyze_now(&data_dir).await,
        Commands::Report { period } => report::handle_report_command(&period),
        Commands::Enroll => enroll::enroll_command(&data_dir).await,
        Commands::Config { action } => match action {
            ConfigAction::Show => config::handle_config_show(),
            ConfigAction::Init { force } => config::handle_config_init(force),
            ConfigAction::Path => config::handle_config_path(),
        },
    }
}
