#![deny(unsafe_code)]

use std::{env, io, process::ExitCode};

fn main() -> ExitCode {
    logging::init_subscriber();

    let mut stderr = io::stderr().lock();
    run_with(env::args(), &mut stderr)
}

fn run_with<I>(args: I, stderr: &mut impl io::Write) -> ExitCode
where
    I: IntoIterator<Item = String>,
{
    cli::run(args, stderr).into()
}
