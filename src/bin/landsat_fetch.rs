use std::process::ExitCode;

use camino::Utf8PathBuf;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use landsat_fetch::app::{App, RunReport, RunRequest, query_bbox};
use landsat_fetch::area::AreaOfInterest;
use landsat_fetch::catalog::M2mHttpClient;
use landsat_fetch::config::{Config, ConfigLoader, PASSWORD_ENV};
use landsat_fetch::domain::QueryParameters;
use landsat_fetch::earthexplorer::EarthExplorerHttpClient;
use landsat_fetch::error::LandsatError;
use landsat_fetch::grid::{self, load_grid};
use landsat_fetch::ledger::VerifiedLedger;
use landsat_fetch::output::{self, JsonOutput, OutputMode, TilesResult};
use landsat_fetch::store::Store;
use landsat_fetch::tui::Tui;

#[derive(Parser)]
#[command(name = "landsat-fetch")]
#[command(about = "Find, filter, download and unpack Landsat scenes covering an area of interest")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Search the catalog and download every scene covering the area")]
    Fetch(FetchArgs),
    #[command(about = "Print the WRS-2 tiles covering the area (offline)")]
    Tiles(InputArgs),
}

#[derive(Args, Clone)]
struct InputArgs {
    #[arg(long)]
    config: Option<String>,

    /// WRS-2 grid (.shp or .geojson) with a `Name` attribute.
    #[arg(long)]
    grid: Option<Utf8PathBuf>,

    /// Area of interest (.shp or .geojson).
    #[arg(long)]
    area: Option<Utf8PathBuf>,
}

#[derive(Args, Clone)]
struct FetchArgs {
    #[command(flatten)]
    input: InputArgs,

    #[arg(long)]
    username: Option<String>,

    #[arg(long)]
    dataset: Option<String>,

    #[arg(long)]
    storage: Option<Utf8PathBuf>,

    #[arg(long)]
    start_date: Option<NaiveDate>,

    #[arg(long)]
    end_date: Option<NaiveDate>,

    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
    max_cloud_cover: Option<u8>,

    /// Download product id; repeat to try several in order.
    #[arg(long = "product-id")]
    product_ids: Vec<String>,

    #[arg(long)]
    ledger: Option<Utf8PathBuf>,
}

impl FetchArgs {
    fn overrides(&self) -> Config {
        Config {
            username: self.username.clone(),
            dataset: self.dataset.clone(),
            grid: self.input.grid.clone(),
            area: self.input.area.clone(),
            storage: self.storage.clone(),
            start_date: self.start_date,
            end_date: self.end_date,
            max_cloud_cover: self.max_cloud_cover,
            product_ids: (!self.product_ids.is_empty()).then(|| self.product_ids.clone()),
            verified_ledger: self.ledger.clone(),
            ..Config::default()
        }
    }
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<LandsatError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &LandsatError) -> u8 {
    match error {
        LandsatError::InvalidGeometry(_)
        | LandsatError::ConfigRead(_)
        | LandsatError::ConfigParse(_)
        | LandsatError::InvalidQuery(_)
        | LandsatError::UnsupportedCrs(_)
        | LandsatError::GridRead(_) => 2,
        LandsatError::Authentication(_)
        | LandsatError::CatalogQuery(_)
        | LandsatError::CatalogStatus { .. }
        | LandsatError::Download(_)
        | LandsatError::DownloadStatus { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    match cli.command {
        Commands::Fetch(args) => run_fetch(args, output_mode),
        Commands::Tiles(args) => run_tiles(args, output_mode),
    }
}

fn run_fetch(args: FetchArgs, output_mode: OutputMode) -> miette::Result<()> {
    let resolved = ConfigLoader::resolve(
        args.input.config.as_deref(),
        args.overrides(),
        std::env::var(PASSWORD_ENV).ok(),
    )?;

    let grid = load_grid(resolved.grid.as_std_path())?;
    let area = AreaOfInterest::from_path(resolved.area.as_std_path())?;
    let query = QueryParameters::new(
        resolved.dataset.clone(),
        query_bbox(&area)?,
        resolved.start_date,
        resolved.end_date,
        resolved.max_cloud_cover,
    )?;
    tracing::info!(bbox = %query.bbox, dataset = %query.dataset, "query prepared");

    let store = Store::new(resolved.storage.clone());
    store.ensure_root()?;
    let mut ledger = VerifiedLedger::load(&resolved.verified_ledger)?;

    let catalog = M2mHttpClient::with_base_url(&resolved.catalog_url)?;
    let downloads = EarthExplorerHttpClient::with_urls(&resolved.download_url, &resolved.login_url);
    let app = App::new(catalog, downloads, resolved.product_ids.clone());
    let credentials = resolved.credentials.clone();
    let verified = ledger.ids().clone();

    let report: RunReport = match output_mode {
        OutputMode::NonInteractive => {
            let request = RunRequest {
                credentials: &credentials,
                query: &query,
                grid: &grid,
                area: &area,
                storage: &store,
                verified: &verified,
            };
            app.run(&request, &JsonOutput)?
        }
        OutputMode::Interactive => {
            let mut tui = Tui::new();
            tui.run(move |observer| {
                let request = RunRequest {
                    credentials: &credentials,
                    query: &query,
                    grid: &grid,
                    area: &area,
                    storage: &store,
                    verified: &verified,
                };
                app.run(&request, observer)
            })?
        }
    };

    let added = ledger.record(report.downloaded.iter().cloned());
    ledger.save()?;
    tracing::debug!(added, ledger = %ledger.path(), "ledger updated");

    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_report(&report).into_diagnostic()?,
        OutputMode::Interactive => output::print_run_summary(&report),
    }
    Ok(())
}

fn run_tiles(args: InputArgs, output_mode: OutputMode) -> miette::Result<()> {
    let overrides = Config {
        grid: args.grid.clone(),
        area: args.area.clone(),
        ..Config::default()
    };
    let config = ConfigLoader::load(args.config.as_deref())?.merge(overrides);
    let (grid_path, area_path) = ConfigLoader::resolve_inputs(&config)?;

    let grid = load_grid(grid_path.as_std_path())?;
    let area = AreaOfInterest::from_path(area_path.as_std_path())?;
    let result = TilesResult {
        zones: grid::intersecting_cells(&grid, &area)?.into_iter().collect(),
    };

    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_tiles(&result).into_diagnostic()?,
        OutputMode::Interactive => output::print_tiles_text(&result),
    }
    Ok(())
}
