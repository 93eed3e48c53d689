use anyhow::{bail, Context};
use better_explorer::api::{BillUpdate, NewBuilding, SpaceType, Units, UtilityBill};
use better_explorer::poller::PollEvent;
use better_explorer::{
    logging, AnalysisParams, AnalysisSummary, ApiClient, Config, Dispatcher, GenerationResult,
    JobHandle, JobPoller, JobReport, PollPolicy, ProgressSink, ReqwestTransport, SavingsTarget,
};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "better-explorer")]
#[command(about = "Run building energy analyses against the BETTER API")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration file path (defaults to ~/.better-explorer.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Trigger analyses for one or more buildings and wait for the results
    Analyze {
        /// Building IDs, comma-separated (e.g. 101,102)
        #[arg(short, long, value_delimiter = ',', required = true)]
        buildings: Vec<u64>,

        /// Savings target: NOMINAL, CONSERVATIVE or AGGRESSIVE
        #[arg(short, long)]
        target: Option<SavingsTarget>,

        /// Minimum R-squared for model validation (0.0 to 1.0)
        #[arg(long)]
        min_r_squared: Option<f64>,

        /// Seconds between status queries
        #[arg(long)]
        poll_interval: Option<u64>,

        /// Number of status queries before giving up
        #[arg(long)]
        max_attempts: Option<u32>,
    },
    /// Follow an analysis that was already triggered
    Status {
        #[arg(short, long)]
        building: u64,

        #[arg(short, long)]
        analytics: String,

        #[arg(long)]
        poll_interval: Option<u64>,

        #[arg(long)]
        max_attempts: Option<u32>,
    },
    /// Download the rendered HTML report of an analysis
    Document {
        #[arg(short, long)]
        building: u64,

        #[arg(short, long)]
        analytics: String,

        /// Use IP (imperial) units instead of SI
        #[arg(long)]
        units_ip: bool,

        #[arg(short, long, default_value = "./analysis.html")]
        output: PathBuf,
    },
    /// Manage portfolios
    Portfolio {
        #[command(subcommand)]
        command: PortfolioCommand,
    },
    /// Manage buildings
    Building {
        #[command(subcommand)]
        command: BuildingCommand,
    },
    /// Manage utility bills of a building
    Bills {
        #[command(subcommand)]
        command: BillsCommand,
    },
    /// Generate a default configuration file
    Config {
        /// Output path for the config file (defaults to ~/.better-explorer.toml)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum PortfolioCommand {
    /// Create a new portfolio
    Create {
        #[arg(short, long)]
        name: String,
    },
}

#[derive(Subcommand)]
enum BuildingCommand {
    /// Create a building in a portfolio
    Create {
        #[arg(short, long)]
        portfolio: u64,

        #[arg(short, long)]
        name: String,

        /// One of the service's space types, e.g. OFFICE
        #[arg(short, long)]
        space_type: SpaceType,

        /// Gross floor area in square meters
        #[arg(short, long)]
        floor_area: f64,

        /// e.g. "San Francisco, CA"
        #[arg(short, long)]
        location: String,

        /// JSON file with an array of utility bills to upload with the building
        #[arg(long)]
        bills: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum BillsCommand {
    /// List all bills of a building
    List {
        #[arg(short, long)]
        building: u64,
    },
    /// Show one bill
    Show {
        #[arg(short, long)]
        building: u64,

        #[arg(long)]
        bill: u64,
    },
    /// Upload bills from a JSON file containing an array of bills
    Add {
        #[arg(short, long)]
        building: u64,

        #[arg(short, long)]
        file: PathBuf,
    },
    /// Change fields of one bill
    Edit {
        #[arg(short, long)]
        building: u64,

        #[arg(long)]
        bill: u64,

        #[arg(long)]
        start: Option<NaiveDate>,

        #[arg(long)]
        end: Option<NaiveDate>,

        #[arg(long)]
        consumption: Option<f64>,

        #[arg(long)]
        cost: Option<f64>,
    },
    /// Delete one bill
    Delete {
        #[arg(short, long)]
        building: u64,

        #[arg(long)]
        bill: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match cli.command {
        Commands::Analyze {
            buildings,
            target,
            min_r_squared,
            poll_interval,
            max_attempts,
        } => {
            let config = load_config(&cli.config)?;
            let params = AnalysisParams::new(
                target.unwrap_or(config.analysis.savings_target),
                min_r_squared.unwrap_or(config.analysis.min_r_squared),
            )?;
            let policy = policy(&config, poll_interval, max_attempts)?;
            analyze(&config, &buildings, &params, policy).await?;
        }
        Commands::Status {
            building,
            analytics,
            poll_interval,
            max_attempts,
        } => {
            let config = load_config(&cli.config)?;
            let policy = policy(&config, poll_interval, max_attempts)?;
            follow(&config, JobHandle::new(building, analytics), policy).await?;
        }
        Commands::Document {
            building,
            analytics,
            units_ip,
            output,
        } => {
            let units = if units_ip { Units::Ip } else { Units::Si };
            let client = client(&load_config(&cli.config)?)?;
            let html = client
                .get_analysis_document(&JobHandle::new(building, analytics), units)
                .await?;
            std::fs::write(&output, html)?;
            println!("✅ Report written to {}", output.display());
        }
        Commands::Portfolio { command } => portfolio(&load_config(&cli.config)?, command).await?,
        Commands::Building { command } => building(&load_config(&cli.config)?, command).await?,
        Commands::Bills { command } => bills(&load_config(&cli.config)?, command).await?,
        Commands::Config { output } => generate_config(output)?,
    }

    Ok(())
}

fn load_config(path: &Option<PathBuf>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::from_file(path),
        None => Config::load(),
    }
}

/// Prints each poll attempt as it happens.
struct ConsoleProgress;

impl ProgressSink for ConsoleProgress {
    fn on_job_started(&self, building_id: u64) {
        println!("\n🔍 Processing Building ID: {}", building_id);
    }

    fn on_submitted(&self, handle: &JobHandle, initial: &GenerationResult) {
        println!(
            "  🚀 Analysis triggered. Analytics ID: {}, Initial Status: {}",
            handle.analytics_id, initial
        );
    }

    fn on_poll_attempt(&self, attempt: u32, max_attempts: u32, event: PollEvent<'_>) {
        match event {
            PollEvent::Status(snapshot) => println!(
                "  ⏳ Attempt {}/{}: Status = {}",
                attempt,
                max_attempts,
                snapshot.generation_result()
            ),
            PollEvent::Error(error) => println!(
                "  ⚠️  Attempt {}/{}: Error fetching analysis details: {}",
                attempt, max_attempts, error
            ),
        }
    }

    fn on_job_finished(&self, report: &JobReport) {
        println!("\n{}", AnalysisSummary::new(report));
    }
}

fn client(config: &Config) -> anyhow::Result<ApiClient<ReqwestTransport>> {
    let credentials = config.api.credentials();
    if credentials.api_key.is_none() || credentials.base_url.is_none() {
        bail!(
            "API key and base URL are not configured. Set them in the config file \
             (run 'better-explorer config') or via BETTER_API_KEY / BETTER_BASE_URL"
        );
    }

    let transport = ReqwestTransport::new(config.api.timeout_seconds)?;
    Ok(ApiClient::new(Dispatcher::new(credentials, transport)))
}

fn policy(
    config: &Config,
    poll_interval: Option<u64>,
    max_attempts: Option<u32>,
) -> anyhow::Result<PollPolicy> {
    Ok(PollPolicy::new(
        poll_interval.unwrap_or(config.polling.poll_interval_seconds),
        max_attempts.unwrap_or(config.polling.max_attempts),
    )?)
}

fn poller(config: &Config, policy: PollPolicy) -> anyhow::Result<JobPoller<ReqwestTransport>> {
    let poller = JobPoller::new(client(config)?, policy).with_sink(ConsoleProgress);

    let token = poller.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\n🛑 Cancelling...");
            token.cancel();
        }
    });

    Ok(poller)
}

async fn analyze(
    config: &Config,
    buildings: &[u64],
    params: &AnalysisParams,
    policy: PollPolicy,
) -> anyhow::Result<()> {
    println!("🏢 BETTER API Explorer");
    println!("======================");
    println!("🕒 Current Time (UTC): {}", chrono::Utc::now().format("%Y-%m-%d %H:%M:%S"));
    println!(
        "🎯 Savings Target: {}, Min R-Squared: {}",
        params.savings_target(),
        params.min_r_squared()
    );

    let reports = poller(config, policy)?.run_sequence(buildings, params).await;
    print_session_summary(&reports);
    Ok(())
}

async fn follow(config: &Config, handle: JobHandle, policy: PollPolicy) -> anyhow::Result<()> {
    println!("🔍 Polling {}...", handle);
    let report = poller(config, policy)?.poll(&handle).await;
    println!("\n{}", AnalysisSummary::new(&report));
    Ok(())
}

fn print_session_summary(reports: &[JobReport]) {
    let complete = reports.iter().filter(|r| r.is_complete()).count();
    println!("📊 {}/{} analyses completed", complete, reports.len());
    for report in reports.iter().filter(|r| !r.is_complete()) {
        println!("   - building {}: {}", report.building_id, report.state);
    }
}

async fn portfolio(config: &Config, command: PortfolioCommand) -> anyhow::Result<()> {
    match command {
        PortfolioCommand::Create { name } => {
            println!("📁 Creating portfolio '{}'...", name);
            let portfolio = client(config)?.create_portfolio(&name).await?;
            println!("✅ Portfolio '{}' created with ID: {}", portfolio.name, portfolio.id);
        }
    }
    Ok(())
}

async fn building(config: &Config, command: BuildingCommand) -> anyhow::Result<()> {
    match command {
        BuildingCommand::Create {
            portfolio,
            name,
            space_type,
            floor_area,
            location,
            bills,
        } => {
            let utility_bills = match bills {
                Some(path) => read_bills(&path)?,
                None => Vec::new(),
            };
            let new_building = NewBuilding {
                portfolio,
                name,
                space_type,
                floor_area,
                location,
                utility_bills,
            };
            new_building.validate()?;

            println!(
                "🏗️  Creating building '{}' with {} bill records...",
                new_building.name,
                new_building.utility_bills.len()
            );
            let created = client(config)?.create_building(&new_building).await?;
            println!(
                "✅ Building '{}' created with ID: {} in portfolio {}",
                created.name, created.id, portfolio
            );
        }
    }
    Ok(())
}

async fn bills(config: &Config, command: BillsCommand) -> anyhow::Result<()> {
    let client = client(config)?;

    match command {
        BillsCommand::List { building } => {
            let bills = client.list_utility_bills(building).await?;
            println!("🧾 {} bills for building {}", bills.len(), building);
            for stored in bills {
                print_bill(stored.id, &stored.bill);
            }
        }
        BillsCommand::Show { building, bill } => {
            let stored = client.get_utility_bill(building, bill).await?;
            print_bill(stored.id, &stored.bill);
        }
        BillsCommand::Add { building, file } => {
            let bills = read_bills(&file)?;
            println!("📤 Uploading {} bills to building {}...", bills.len(), building);
            client.add_utility_bills(building, &bills).await?;
            println!("✅ Bills added");
        }
        BillsCommand::Edit {
            building,
            bill,
            start,
            end,
            consumption,
            cost,
        } => {
            let update = BillUpdate {
                bill_start_date: start,
                bill_end_date: end,
                consumption,
                cost,
                ..BillUpdate::default()
            };
            if update.is_empty() {
                bail!(
                    "Nothing to change: pass at least one of --start, --end, --consumption, --cost"
                );
            }
            let stored = client.edit_utility_bill(building, bill, &update).await?;
            println!("✅ Bill updated");
            print_bill(stored.id, &stored.bill);
        }
        BillsCommand::Delete { building, bill } => {
            client.delete_utility_bill(building, bill).await?;
            println!("🗑️  Bill {} deleted from building {}", bill, building);
        }
    }
    Ok(())
}

fn read_bills(path: &PathBuf) -> anyhow::Result<Vec<UtilityBill>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Could not read bills file {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Invalid bills file {}", path.display()))
}

fn print_bill(id: u64, bill: &UtilityBill) {
    println!(
        "  #{} {:?} {} → {}: {} {:?}, cost {}",
        id,
        bill.fuel_type,
        bill.bill_start_date,
        bill.bill_end_date,
        bill.consumption,
        bill.unit,
        bill.cost
    );
}

fn generate_config(output_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config_path = output_path.unwrap_or_else(|| {
        Config::default_config_path().unwrap_or_else(|_| PathBuf::from("better-explorer.toml"))
    });

    println!("📝 Generating configuration file: {}", config_path.display());
    std::fs::write(&config_path, Config::create_documented_config())?;

    println!("✅ Configuration file created successfully!");
    println!("💡 Set api_key and base_url, or export BETTER_API_KEY / BETTER_BASE_URL.");

    Ok(())
}
