extern crate backtester;

use std::io::{self, Write};
use std::process;

use log::{error, info};

use backtester::config;
use backtester::core::EmptyResult;
use backtester::formatting;
use backtester::quotes;
use backtester::simulation::{self, CancellationToken};

use self::init::{initialize, Action};

mod init;

fn main() {
    let (log_level, action) = initialize();

    if let Err(e) = easy_logging::init(module_path!().split("::").next().unwrap(), log_level) {
        eprintln!("Failed to initialize the logging: {e}.");
        process::exit(1);
    }

    if let Err(e) = run(action) {
        error!("{}.", e);
        process::exit(1);
    }
}

fn run(action: Action) -> EmptyResult {
    match action {
        Action::Run {strategy, data, pretty} => {
            let config = config::load_strategy(&strategy)?;

            let mut symbols = config.universe.symbols.clone();
            symbols.extend(config.benchmark.iter().cloned());
            let source = quotes::load_price_data(&data, &symbols)?;

            let result = simulation::backtest(&config, &source, &CancellationToken::new())?;

            if let Some(point) = result.equity.last() {
                info!("Simulated {} trading days over {}. Final portfolio value: {}.",
                    result.diagnostics.total_days,
                    formatting::format_days((config.period.end - config.period.start).num_days() + 1),
                    formatting::format_cash(point.total_value));
            }

            let stdout = io::stdout();
            let mut writer = stdout.lock();
            if pretty {
                serde_json::to_writer_pretty(&mut writer, &result)?;
            } else {
                serde_json::to_writer(&mut writer, &result)?;
            }
            writeln!(writer)?;
        },

        Action::Check {strategy} => {
            config::load_strategy(&strategy)?;
            println!("The strategy config is valid.");
        },
    }

    Ok(())
}
