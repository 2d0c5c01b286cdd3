use std::fs;
use std::io::{self, Read};

use anyhow::Error;
use clap::{App, ArgMatches, SubCommand};

use xsat::checker::Checker;

use super::{banner, init_logging};

mod transcript;

pub fn check_args() -> App<'static, 'static> {
    SubCommand::with_name("--check")
        .arg_from_usage("[INPUT] 'The input file to use (stdin if omitted)'")
        .arg_from_usage("<proof-file> --proof=[FILE] 'The xsat proof file to check.'")
        .arg_from_usage("--transcript 'Print a transcript of the checked proof'")
}

pub fn check_main(matches: &ArgMatches) -> Result<i32, Error> {
    init_logging();
    banner();

    let mut transcript = transcript::Transcript::default();

    let mut checker = Checker::default();

    if matches.is_present("transcript") {
        checker.add_processor(&mut transcript);
    }

    let stdin = io::stdin();

    let mut locked_stdin;
    let mut opened_file;

    let file = match matches.value_of("INPUT") {
        Some(path) => {
            log::info!("Reading file '{}'", path);
            opened_file = fs::File::open(path)?;
            &mut opened_file as &mut dyn Read
        }
        None => {
            log::info!("Reading from stdin");
            locked_stdin = stdin.lock();
            &mut locked_stdin as &mut dyn Read
        }
    };

    checker.add_dimacs_cnf(file)?;

    let path = matches.value_of("proof-file").unwrap();

    log::info!("Checking proof file '{}'", path);

    match checker.check_proof(fs::File::open(path)?) {
        Ok(()) => println!("s VERIFIED"),
        Err(err) => {
            log::error!("{}", err);
            println!("s NOT VERIFIED");
            return Ok(1);
        }
    }

    Ok(0)
}
