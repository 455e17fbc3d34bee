#[macro_use]
extern crate clap;

use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use log::{error, info};
use task_core::TableConfig;
use task_sim::{logging, scenario, Kernel, SimResult};

fn main() {
    let matches = App::new("task-sim")
        .about("Drives the process table through lifecycle scenarios")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("log")
                .long("log")
                .takes_value(true)
                .help("Log level: error, warn, info, debug, trace or off"),
        )
        .arg(
            Arg::with_name("capacity")
                .short("c")
                .long("capacity")
                .takes_value(true)
                .default_value("64")
                .help("Number of process table slots"),
        )
        .subcommand(SubCommand::with_name("zombie").about("Parent exits after its child"))
        .subcommand(SubCommand::with_name("orphan").about("Parent exits before its child"))
        .subcommand(SubCommand::with_name("exhaust").about("Fill the table, reap, refill"))
        .subcommand(
            SubCommand::with_name("stress")
                .about("Random single-threaded operations with invariant checks")
                .arg(
                    Arg::with_name("rounds")
                        .short("r")
                        .long("rounds")
                        .takes_value(true)
                        .default_value("1000"),
                )
                .arg(
                    Arg::with_name("seed")
                        .short("s")
                        .long("seed")
                        .takes_value(true)
                        .default_value("0"),
                ),
        )
        .subcommand(
            SubCommand::with_name("concurrent")
                .about("Random process trees on real threads")
                .arg(
                    Arg::with_name("workers")
                        .short("w")
                        .long("workers")
                        .takes_value(true)
                        .default_value("8"),
                )
                .arg(
                    Arg::with_name("seed")
                        .short("s")
                        .long("seed")
                        .takes_value(true)
                        .default_value("0"),
                ),
        )
        .get_matches();

    logging::init(matches.value_of("log"));
    if let Err(err) = run(&matches) {
        error!("{}", err);
        std::process::exit(1);
    }
}

fn run(matches: &ArgMatches) -> SimResult<()> {
    let (name, sub) = matches.subcommand();
    let sub = match sub {
        Some(sub) => sub,
        None => return Ok(()),
    };
    let capacity = value_t!(matches, "capacity", usize).unwrap_or_else(|e| e.exit());
    let kernel = Kernel::boot(TableConfig::with_capacity(capacity))?;
    match name {
        "zombie" => {
            let report = scenario::zombie(&kernel)?;
            info!("{:?}", report);
        }
        "orphan" => {
            let report = scenario::orphan(&kernel)?;
            info!("{:?}", report);
        }
        "exhaust" => {
            let report = scenario::exhaust(&kernel)?;
            info!("{:?}", report);
        }
        "stress" => {
            let rounds = value_t!(sub, "rounds", usize).unwrap_or_else(|e| e.exit());
            let seed = value_t!(sub, "seed", u64).unwrap_or_else(|e| e.exit());
            scenario::stress(&kernel, rounds, seed)?;
        }
        "concurrent" => {
            let workers = value_t!(sub, "workers", usize).unwrap_or_else(|e| e.exit());
            let seed = value_t!(sub, "seed", u64).unwrap_or_else(|e| e.exit());
            scenario::concurrent(&kernel, workers, seed)?;
        }
        _ => unreachable!(),
    }
    Ok(())
}
