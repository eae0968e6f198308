use std::path::PathBuf;

use clap::{Arg, ArgAction, ArgMatches, Command};
use clap::builder::NonEmptyStringValueParser;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref WRAP_REGEX: Regex = Regex::new(r"(\S) *\n *(\S)").unwrap();
}

macro_rules! long_about {
    ($text:expr) => {{
        let text = WRAP_REGEX.replace_all(indoc::indoc!($text), "$1 $2");
        textwrap::fill(text.trim_matches('\n'), 100)
    }}
}

pub enum Action {
    Run {
        strategy: PathBuf,
        data: PathBuf,
        pretty: bool,
    },
    Check {
        strategy: PathBuf,
    },
}

pub fn initialize() -> (log::Level, Action) {
    let matches = Command::new("backtester")
        .about("Deterministic tax-aware backtesting engine")
        .version(env!("CARGO_PKG_VERSION"))
        .help_expected(true)
        .disable_help_subcommand(true)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(Arg::new("verbose")
            .short('v').long("verbose")
            .action(ArgAction::Count)
            .help("Sets the level of verbosity"))

        .subcommand(Command::new("run")
            .about("Run a strategy simulation")
            .long_about(long_about!("
                Replays the historical market data from the data directory day by day through
                the strategy and prints the result bundle as JSON: the equity curve, trades,
                open lots, tax year summaries, performance metrics and benchmark comparisons.
            "))
            .args([
                strategy_arg(),
                Arg::new("data")
                    .short('d').long("data")
                    .value_name("PATH")
                    .help("Market data directory with <SYMBOL>.csv bar files and an optional actions.yaml")
                    .required(true)
                    .value_parser(NonEmptyStringValueParser::new()),
                Arg::new("pretty")
                    .short('p').long("pretty")
                    .action(ArgAction::SetTrue)
                    .help("Pretty-print the result"),
            ]))

        .subcommand(Command::new("check")
            .about("Validate a strategy config")
            .arg(strategy_arg()))

        .get_matches();

    let log_level = match matches.get_count("verbose") {
        0 => log::Level::Info,
        1 => log::Level::Debug,
        _ => log::Level::Trace,
    };

    let (command, matches) = matches.subcommand().unwrap();
    let action = match command {
        "run" => Action::Run {
            strategy: path_arg(matches, "STRATEGY"),
            data: path_arg(matches, "data"),
            pretty: matches.get_flag("pretty"),
        },
        "check" => Action::Check {
            strategy: path_arg(matches, "STRATEGY"),
        },
        _ => unreachable!(),
    };

    (log_level, action)
}

fn strategy_arg() -> Arg {
    Arg::new("STRATEGY")
        .help("Path to the strategy config file (*.yaml or *.json)")
        .required(true)
        .value_parser(NonEmptyStringValueParser::new())
}

fn path_arg(matches: &ArgMatches, name: &str) -> PathBuf {
    let path: &String = matches.get_one(name).unwrap();
    PathBuf::from(shellexpand::tilde(path).to_string())
}
