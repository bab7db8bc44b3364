use jverify::{verify_class, VerifierOptions};

use clap::{Arg, ArgAction, Command};
use std::fs;
use std::process::ExitCode;

fn main() -> ExitCode {
    env_logger::init();

    let matches = Command::new("jverify")
        .version("0.1.0")
        .about("Statically verify the bytecode of JVM class files")
        .arg(
            Arg::new("strict-monitors")
                .long("strict-monitors")
                .action(ArgAction::SetTrue)
                .help("Reject structurally unbalanced monitorenter/monitorexit"),
        )
        .arg(
            Arg::new("INPUT")
                .help("Class files to verify")
                .required(true)
                .num_args(1..)
                .action(ArgAction::Append),
        )
        .get_matches();

    let options =
        VerifierOptions::default().strict_monitors(matches.get_flag("strict-monitors"));

    let mut all_accepted = true;
    for path in matches
        .get_many::<String>("INPUT")
        .into_iter()
        .flatten()
    {
        log::info!("Verifying '{}'", path);
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(error) => {
                eprintln!("{}: {}", path, error);
                all_accepted = false;
                continue;
            }
        };

        match verify_class(&bytes, &options) {
            Ok(verdict) => {
                for method in &verdict.methods {
                    match method.outcome.violation() {
                        None => log::debug!(
                            "{}.{}{}: accepted",
                            verdict.class_name,
                            method.name,
                            method.descriptor
                        ),
                        Some(violation) => {
                            println!(
                                "{}: {}.{}{}: {}",
                                path, verdict.class_name, method.name, method.descriptor, violation
                            );
                            all_accepted = false;
                        }
                    }
                }
                if verdict.is_accepted() {
                    println!("{}: {}: all methods verify", path, verdict.class_name);
                }
            }
            Err(malformed) => {
                eprintln!("{}: {}", path, malformed);
                all_accepted = false;
            }
        }
    }

    if all_accepted {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
