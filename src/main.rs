use clap::Parser;
use drinkbot::config::BarConfig;
use drinkbot::controllers::motor_hat::Board;
use drinkbot::controllers::simulated_hat::SimulatedHat;
use drinkbot::dispenser::Error;
use drinkbot::interface::operator::Console;
use drinkbot::subsystems::bar::Bar;
use env_logger::Env;
use log::{error, info};
use signal_hook::consts::{SIGINT, SIGTERM};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{Duration, MissedTickBehavior};

/// Pours drinks with peristaltic pumps on motor hats.
///
/// The hats are simulated: every motor command is logged instead of sent to hardware. Plug a
/// real `MotorHat` driver into `Board::with_client` to drive pumps.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Bar configuration (hat addresses, pump names and calibrations)
    #[arg(short, long, default_value = "bar.json")]
    config: PathBuf,
    /// Fill the tubing of every pump before pouring
    #[arg(long)]
    prime: bool,
    /// An ingredient to pour, as name=ounces. Repeat for every ingredient of the drink
    #[arg(short, long = "pour", value_parser = parse_ingredient)]
    ingredients: Vec<(String, f64)>,
    /// Write the calibrations back to the configuration file
    #[arg(long)]
    save_calibration: bool,
}

fn parse_ingredient(arg: &str) -> Result<(String, f64), String> {
    let (name, ounces) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected name=ounces, got {arg}"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing ingredient name in {arg}"));
    }
    let ounces = ounces
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("bad amount for {name}: {e}"))?;
    Ok((name.to_string(), ounces))
}

async fn release_boards(boards: &[Board]) {
    let mut all_released = true;
    for board in boards {
        all_released &= board.release_all().await.is_ok();
    }
    if all_released {
        info!("All motors released");
    } else {
        error!("Not every motor could be released, check the pumps by hand");
    }
}

async fn run(args: &Args, config: &mut BarConfig, bar: &mut Bar) -> Result<(), Error> {
    let mut operator = Console::stdio();
    if args.prime {
        bar.prime_all(&mut operator).await?;
    }
    if !args.ingredients.is_empty() {
        let order: Vec<(&str, f64)> = args
            .ingredients
            .iter()
            .map(|(name, ounces)| (name.as_str(), *ounces))
            .collect();
        bar.pour(&order).await?;
    }
    if args.save_calibration {
        config.pumps = bar.calibrations();
        match config.save(&args.config) {
            Ok(()) => info!("Calibrations saved to {}", args.config.display()),
            Err(e) => error!("Failed to save calibrations: {e}"),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match BarConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load {}: {e}", args.config.display());
            return ExitCode::FAILURE;
        }
    };

    let boards: Vec<Board> = config
        .boards
        .iter()
        .map(|&address| {
            let (board, client) = Board::with_client(address, SimulatedHat::new(address));
            tokio::spawn(client);
            board
        })
        .collect();

    //Pumps must never keep running unattended, so a signal releases every channel before exiting
    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        if let Err(e) = signal_hook::flag::register(signal, Arc::clone(&shutdown)) {
            error!("Failed to register signal handler: {e}");
            return ExitCode::FAILURE;
        }
    }
    let safety_boards = boards.clone();
    tokio::spawn({
        let boards = boards.clone();
        async move {
            let mut tick_interval = tokio::time::interval(Duration::from_millis(50));
            tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            while !shutdown.load(Ordering::Relaxed) {
                tick_interval.tick().await;
            }
            error!("Interrupted, releasing all motors");
            release_boards(&boards).await;
            std::process::exit(130);
        }
    });

    //Console reads stdin on this worker thread, the multi-threaded runtime keeps the signal
    //watcher and board clients going on the others
    let mut operator = Console::stdio();
    let mut bar = match Bar::from_config(&config, boards, &mut operator).await {
        Ok(bar) => bar,
        Err(e) => {
            error!("Setup failed: {e}");
            release_boards(&safety_boards).await;
            return ExitCode::FAILURE;
        }
    };
    drop(operator);

    let result = run(&args, &mut config, &mut bar).await;
    if let Err(e) = bar.shutdown().await {
        error!("Shutdown failed: {e}");
    }
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

#[test]
fn test_parse_ingredient() {
    assert_eq!(parse_ingredient("rum=1.5"), Ok(("rum".to_string(), 1.5)));
    assert_eq!(parse_ingredient(" lime = 0.5 "), Ok(("lime".to_string(), 0.5)));
    assert!(parse_ingredient("rum").is_err());
    assert!(parse_ingredient("rum=abc").is_err());
    assert!(parse_ingredient("=2").is_err());
}
