use axum::{
    Router,
    extract::{Json, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::core::{
    Command, CommandOutcome, DealInputs, Difficulty, JsonFileStore, Listing, PortfolioSnapshot,
    PropertySnapshot, ReferenceData, SimConfig, SimError, Simulation, UnderwriteResult,
    YearRecord, underwrite,
};

const MAX_SIMULATION_YEARS: u32 = 100;
const MAX_SCRIPT_COMMANDS: usize = 1_000;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliDifficulty {
    Easy,
    Normal,
    Hard,
}

impl From<CliDifficulty> for Difficulty {
    fn from(value: CliDifficulty) -> Self {
        match value {
            CliDifficulty::Easy => Difficulty::Easy,
            CliDifficulty::Normal => Difficulty::Normal,
            CliDifficulty::Hard => Difficulty::Hard,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "estate",
    about = "Seeded real-estate portfolio simulator and deal underwriter"
)]
pub struct Cli {
    #[arg(long, global = true, help = "TOML config file; flags override its values")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Run a seeded simulation for a number of years and print the result as JSON.
    Simulate(SimulateArgs),
    /// Underwrite one of the bundled deals.
    Underwrite(UnderwriteArgs),
    /// Serve the JSON API.
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}

#[derive(Args, Debug)]
struct SimulateArgs {
    #[arg(long)]
    seed: Option<String>,
    #[arg(long, value_enum)]
    difficulty: Option<CliDifficulty>,
    #[arg(long, default_value_t = 10)]
    years: u32,
    #[arg(long, help = "Buy the first affordable listing before each year")]
    auto_buy: bool,
    #[arg(
        long,
        help = "Snapshot file: resumed from when present, written back after the run"
    )]
    save: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct UnderwriteArgs {
    #[arg(long)]
    deal: String,
    #[arg(long, default_value_t = 3.0, help = "Annual rent growth in percent")]
    rent_growth: f64,
    #[arg(long, default_value_t = 6.0, help = "Exit cap rate in percent")]
    exit_cap: f64,
    #[arg(long, default_value_t = 0.0, help = "Up-front capex, charged in year one")]
    capex: f64,
    #[arg(long, default_value_t = 5)]
    hold_years: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SimulatePayload {
    seed: Option<String>,
    difficulty: Option<Difficulty>,
    years: Option<u32>,
    auto_buy: Option<bool>,
    commands: Vec<Command>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct UnderwritePayload {
    deal_id: Option<String>,
    rent_growth: Option<f64>,
    exit_cap: Option<f64>,
    capex: Option<f64>,
    hold_years: Option<u32>,
}

#[derive(Debug)]
struct SimulateRequest {
    config: SimConfig,
    years: u32,
    auto_buy: bool,
    commands: Vec<Command>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulateResponse<'a> {
    seed: u32,
    difficulty: Difficulty,
    year: u32,
    cash: f64,
    portfolio: PortfolioSnapshot,
    properties: Vec<PropertySnapshot>,
    listings: &'a [Listing],
    history: &'a [YearRecord],
    outcomes: &'a [CommandOutcome],
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Clone)]
struct AppState {
    data: Arc<ReferenceData>,
}

pub async fn run(cli: Cli) -> Result<(), String> {
    let mut config = match &cli.config {
        Some(path) => SimConfig::load(path).map_err(|e| format!("{}: {e}", path.display()))?,
        None => SimConfig::default(),
    };
    let data = ReferenceData::bundled().map_err(|e| e.to_string())?;

    match cli.command {
        CliCommand::Simulate(args) => {
            if let Some(seed) = &args.seed {
                config.settings.seed = Some(seed.clone());
            }
            if let Some(difficulty) = args.difficulty {
                config.settings.difficulty = difficulty.into();
            }
            let request = SimulateRequest {
                config,
                years: validate_years(args.years)?,
                auto_buy: args.auto_buy,
                commands: Vec::new(),
            };
            let json = simulate_cli(data, request, args.save)?;
            println!("{json}");
            Ok(())
        }
        CliCommand::Underwrite(args) => {
            let inputs = inputs_from_args(&args)?;
            let result = underwrite_deal(&data, &args.deal, inputs).map_err(|e| e.to_string())?;
            let json = serde_json::to_string_pretty(&result).map_err(|e| e.to_string())?;
            println!("{json}");
            Ok(())
        }
        CliCommand::Serve { port } => run_http_server(port, data)
            .await
            .map_err(|e| format!("server error: {e}")),
    }
}

fn inputs_from_args(args: &UnderwriteArgs) -> Result<DealInputs, String> {
    let checks = [
        ("--rent-growth", args.rent_growth),
        ("--exit-cap", args.exit_cap),
        ("--capex", args.capex),
    ];
    for (flag, value) in checks {
        if !value.is_finite() {
            return Err(format!("{flag} must be a finite number"));
        }
    }
    if args.exit_cap <= 0.0 {
        return Err("--exit-cap must be > 0".to_string());
    }
    Ok(DealInputs {
        rent_growth: args.rent_growth / 100.0,
        exit_cap: args.exit_cap / 100.0,
        capex: args.capex,
        hold_years: args.hold_years,
    })
}

fn validate_years(years: u32) -> Result<u32, String> {
    if years > MAX_SIMULATION_YEARS {
        return Err(format!("years must be <= {MAX_SIMULATION_YEARS}"));
    }
    Ok(years)
}

fn simulate_cli(
    data: ReferenceData,
    request: SimulateRequest,
    save: Option<PathBuf>,
) -> Result<String, String> {
    let mut store = save.map(JsonFileStore::new);
    let resumed = match &store {
        Some(store) => Simulation::load_from(data.clone(), store).map_err(|e| e.to_string())?,
        None => None,
    };
    let mut sim = match resumed {
        Some(sim) => {
            tracing::info!(year = sim.state().year, "resuming saved run");
            sim
        }
        None => Simulation::new(data, request.config.clone()).map_err(|e| e.to_string())?,
    };

    let outcomes = drive_simulation(&mut sim, &request).map_err(|e| e.to_string())?;
    if let Some(store) = store.as_mut() {
        sim.save_to(store).map_err(|e| e.to_string())?;
        tracing::info!(path = %store.path().display(), "run saved");
    }
    let response = build_simulate_response(&sim, &outcomes).map_err(|e| e.to_string())?;
    serde_json::to_string_pretty(&response).map_err(|e| e.to_string())
}

fn drive_simulation(
    sim: &mut Simulation,
    request: &SimulateRequest,
) -> Result<Vec<CommandOutcome>, SimError> {
    let mut outcomes = Vec::with_capacity(request.commands.len());
    for command in &request.commands {
        outcomes.push(sim.execute(command.clone())?);
    }
    for _ in 0..request.years {
        if request.auto_buy {
            if let Some(outcome) = buy_first_affordable(sim)? {
                outcomes.push(outcome);
            }
        }
        sim.advance_year()?;
    }
    Ok(outcomes)
}

fn buy_first_affordable(sim: &mut Simulation) -> Result<Option<CommandOutcome>, SimError> {
    let ids: Vec<u64> = sim.listings().iter().map(|l| l.id).collect();
    for id in ids {
        let outcome = sim.buy(id)?;
        if !outcome.is_rejected() {
            return Ok(Some(outcome));
        }
    }
    Ok(None)
}

fn build_simulate_response<'a>(
    sim: &'a Simulation,
    outcomes: &'a [CommandOutcome],
) -> Result<SimulateResponse<'a>, SimError> {
    let state = sim.state();
    Ok(SimulateResponse {
        seed: state.seed,
        difficulty: state.difficulty,
        year: state.year,
        cash: state.cash,
        portfolio: sim.portfolio()?,
        properties: sim.property_snapshots()?,
        listings: sim.listings(),
        history: sim.history(),
        outcomes,
    })
}

fn underwrite_deal(
    data: &ReferenceData,
    deal_id: &str,
    inputs: DealInputs,
) -> Result<UnderwriteResult, SimError> {
    let deal = data.deal(deal_id)?;
    let neighborhood = data.initial_neighborhood(&deal.neighborhood_id)?;
    let product = data.product_type(&deal.product_type_id)?;
    Ok(underwrite(deal, neighborhood, product, inputs))
}

pub async fn run_http_server(port: u16, data: ReferenceData) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let state = AppState {
        data: Arc::new(data),
    };
    let app = Router::new()
        .route("/api/reference", get(reference_handler))
        .route(
            "/api/underwrite",
            get(underwrite_get_handler).post(underwrite_post_handler),
        )
        .route("/api/simulate", post(simulate_post_handler))
        .fallback(not_found_handler)
        .with_state(state);

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "estate HTTP API listening");

    axum::serve(listener, app).await
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn reference_handler(State(state): State<AppState>) -> Response {
    json_response(StatusCode::OK, state.data.as_ref())
}

async fn underwrite_get_handler(
    State(state): State<AppState>,
    Query(payload): Query<UnderwritePayload>,
) -> Response {
    underwrite_handler_impl(&state.data, payload)
}

async fn underwrite_post_handler(
    State(state): State<AppState>,
    Json(payload): Json<UnderwritePayload>,
) -> Response {
    underwrite_handler_impl(&state.data, payload)
}

fn underwrite_handler_impl(data: &ReferenceData, payload: UnderwritePayload) -> Response {
    let (deal_id, inputs) = match underwrite_request_from_payload(payload) {
        Ok(request) => request,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };
    match underwrite_deal(data, &deal_id, inputs) {
        Ok(result) => json_response(StatusCode::OK, result),
        Err(e) => error_response(status_for(&e), &e.to_string()),
    }
}

async fn simulate_post_handler(
    State(state): State<AppState>,
    Json(payload): Json<SimulatePayload>,
) -> Response {
    let request = match simulate_request_from_payload(payload) {
        Ok(request) => request,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    let mut sim = match Simulation::new(state.data.as_ref().clone(), request.config.clone()) {
        Ok(sim) => sim,
        Err(e) => return error_response(status_for(&e), &e.to_string()),
    };
    let outcomes = match drive_simulation(&mut sim, &request) {
        Ok(outcomes) => outcomes,
        Err(e) => return error_response(status_for(&e), &e.to_string()),
    };
    match build_simulate_response(&sim, &outcomes) {
        Ok(response) => json_response(StatusCode::OK, response),
        Err(e) => error_response(status_for(&e), &e.to_string()),
    }
}

fn status_for(err: &SimError) -> StatusCode {
    match err {
        SimError::UnknownDeal(_) => StatusCode::NOT_FOUND,
        SimError::UnknownNeighborhood(_)
        | SimError::UnknownProductType(_)
        | SimError::UnknownEvent(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

fn simulate_request_from_payload(payload: SimulatePayload) -> Result<SimulateRequest, String> {
    let years = validate_years(payload.years.unwrap_or(10))?;
    if payload.commands.len() > MAX_SCRIPT_COMMANDS {
        return Err(format!("commands must hold <= {MAX_SCRIPT_COMMANDS} entries"));
    }
    let mut config = SimConfig::default();
    config.settings.seed = payload.seed;
    if let Some(difficulty) = payload.difficulty {
        config.settings.difficulty = difficulty;
    }
    Ok(SimulateRequest {
        config,
        years,
        auto_buy: payload.auto_buy.unwrap_or(false),
        commands: payload.commands,
    })
}

fn underwrite_request_from_payload(
    payload: UnderwritePayload,
) -> Result<(String, DealInputs), String> {
    let deal_id = payload
        .deal_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| "dealId is required".to_string())?;

    let defaults = DealInputs::default();
    let mut inputs = DealInputs {
        hold_years: payload.hold_years.unwrap_or(defaults.hold_years),
        ..defaults
    };
    let fields = [
        ("rentGrowth", payload.rent_growth, &mut inputs.rent_growth),
        ("exitCap", payload.exit_cap, &mut inputs.exit_cap),
        ("capex", payload.capex, &mut inputs.capex),
    ];
    for (name, value, slot) in fields {
        if let Some(value) = value {
            if !value.is_finite() {
                return Err(format!("{name} must be a finite number"));
            }
            *slot = value;
        }
    }
    Ok((deal_id, inputs))
}

#[cfg(test)]
fn simulate_request_from_json(json: &str) -> Result<SimulateRequest, String> {
    let payload = serde_json::from_str::<SimulatePayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    simulate_request_from_payload(payload)
}
