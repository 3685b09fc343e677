mod app;
mod auth;
mod batch;
mod descriptor;
mod fanout;
mod harvest;
mod model;
mod paginator;
mod sink;
mod source;
mod sweep;
#[cfg(test)]
mod testing;

use app::{App, RunContext, UsageWindow};
use chrono::NaiveDate;
use clap::{ArgGroup, Parser};
use descriptor::ResourceKind;
use puller_core::{telemetry, Config};
use std::path::PathBuf;
use std::process;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[clap(name = "puller")]
#[clap(about = "Pulls Google Workspace admin data into BigQuery", version)]
#[clap(group(
    ArgGroup::new("resource")
        .required(true)
        .multiple(false)
        .args([
            "users", "meets", "usage", "courses", "calendar", "course_work",
            "user_accounts", "logins", "chat", "drive", "gmail_user_profiles",
        ])
))]
struct Cli {
    /// Directory users
    #[clap(long)]
    users: bool,

    /// Meet activity reports
    #[clap(long)]
    meets: bool,

    /// Per-user usage reports, one pass per date
    #[clap(long)]
    usage: bool,

    /// Classroom courses
    #[clap(long)]
    courses: bool,

    /// Calendar activity reports
    #[clap(long)]
    calendar: bool,

    /// Coursework for every course
    #[clap(long = "course_work")]
    course_work: bool,

    /// User account activity reports
    #[clap(long = "user_accounts")]
    user_accounts: bool,

    /// Login activity reports
    #[clap(long)]
    logins: bool,

    /// Chat activity reports
    #[clap(long)]
    chat: bool,

    /// Drive activity reports
    #[clap(long)]
    drive: bool,

    /// Gmail profile for every user
    #[clap(long = "gmail_user_profiles")]
    gmail_user_profiles: bool,

    /// Configuration file (defaults to ./config.* when present)
    #[clap(long, env = "PULLER_CONFIG")]
    config: Option<PathBuf>,

    /// Number of days the usage sweep covers, newest first
    #[clap(long, requires = "usage")]
    days_back: Option<u32>,

    /// Run the usage sweep for a single date (YYYY-MM-DD)
    #[clap(long, requires = "usage", conflicts_with = "days_back")]
    date: Option<NaiveDate>,

    /// Where fan-out runs write their failing-key files
    #[clap(long, default_value = ".")]
    error_dir: PathBuf,
}

impl Cli {
    /// The selected resource, in the order of `ResourceKind::ALL`.
    fn resource(&self) -> Option<ResourceKind> {
        let flags = [
            self.users,
            self.meets,
            self.usage,
            self.courses,
            self.calendar,
            self.course_work,
            self.user_accounts,
            self.logins,
            self.chat,
            self.drive,
            self.gmail_user_profiles,
        ];
        ResourceKind::ALL
            .into_iter()
            .zip(flags)
            .find_map(|(kind, set)| set.then_some(kind))
    }

    fn usage_window(&self, config: &Config) -> UsageWindow {
        match (self.date, self.days_back) {
            (Some(date), _) => UsageWindow::Date(date),
            (None, Some(days)) => UsageWindow::DaysBack(days),
            (None, None) => UsageWindow::DaysBack(config.usage_days_back),
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!(error = %e, "Fatal error");
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;

    telemetry::init(&config.telemetry)?;

    let kind = cli
        .resource()
        .ok_or_else(|| anyhow::anyhow!("No resource selected"))?;
    let window = cli.usage_window(&config);
    info!(resource = %kind, "Starting pull");

    let context = RunContext::from_config(config)?;
    let app = App::new(context, cli.error_dir.clone());
    app.run(kind, window).await?;

    info!(resource = %kind, "Pull completed");
    telemetry::shutdown();
    Ok(())
}
