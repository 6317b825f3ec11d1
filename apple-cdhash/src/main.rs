// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    apple_cdhash::{compute_cdhash, describe_path, is_universal, macho_slices, AppleCdhashError},
    clap::{Arg, ArgMatches, Command},
    log::{info, LevelFilter},
    std::str::FromStr,
};

const COMPUTE_ABOUT: &str = "\
Compute the cdhash of a signed Mach-O binary.

The cdhash is the digest of the code directory embedded in a binary's code
signature. It is the value Apple operating systems use to identify signed
code.

When a signature contains multiple code directories, the one using the
strongest digest algorithm is hashed. Only SHA-1 and SHA-256 code
directories can produce a cdhash.

For universal binaries, the cdhash of every architecture is printed, one per
line, prefixed by the architecture name. Use --universal-index to select a
single architecture.

The signature itself is not verified.
";

const INSPECT_ABOUT: &str = "\
Describe how the cdhash of a Mach-O binary is derived.

This command prints YAML describing the code signature data of each Mach-O
binary in the given file: where the signature lives, every code directory
found in it, which code directory was selected and the resulting cdhash.

If processing fails, the output records how far it got and why it failed.
";

fn command_compute(args: &ArgMatches) -> Result<(), AppleCdhashError> {
    let path = args
        .value_of("path")
        .ok_or(AppleCdhashError::CliBadArgument)?;

    let index = if let Some(index) = args.value_of("universal_index") {
        Some(usize::from_str(index).map_err(|_| AppleCdhashError::CliBadArgument)?)
    } else {
        None
    };

    let data = std::fs::read(path)?;
    let slices = macho_slices(&data)?;

    let slices = if let Some(index) = index {
        vec![*slices
            .get(index)
            .ok_or(AppleCdhashError::UniversalIndexOutOfRange {
                index,
                count: slices.len(),
            })?]
    } else {
        slices
    };

    let universal = is_universal(&data);

    for slice in slices {
        let cdhash = compute_cdhash(slice.data)?;

        if universal {
            let arch = slice
                .arch
                .map(|x| x.to_string())
                .unwrap_or_else(|| format!("#{}", slice.index));

            println!("{}: {}", arch, cdhash);
        } else {
            println!("{}", cdhash);
        }
    }

    Ok(())
}

fn command_inspect(args: &ArgMatches) -> Result<(), AppleCdhashError> {
    let path = args
        .value_of("path")
        .ok_or(AppleCdhashError::CliBadArgument)?;

    let descriptions = describe_path(path)?;

    let failures = descriptions.iter().filter(|x| x.error.is_some()).count();
    if failures > 0 {
        info!("{} of {} binaries could not be processed", failures, descriptions.len());
    }

    serde_yaml::to_writer(std::io::stdout(), &descriptions)?;

    Ok(())
}

fn main_impl() -> Result<(), AppleCdhashError> {
    let app = Command::new("Apple code directory hash calculator")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Gregory Szorc <gregory.szorc@gmail.com>")
        .about("Compute the cdhash of signed Apple binaries")
        .arg_required_else_help(true)
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .multiple_occurrences(true)
                .help("Increase logging verbosity. Can be specified multiple times."),
        );

    let app = app.subcommand(
        Command::new("compute")
            .about("Compute the cdhash of a Mach-O binary")
            .long_about(COMPUTE_ABOUT)
            .arg(
                Arg::new("path")
                    .required(true)
                    .help("Path to Mach-O binary to examine"),
            )
            .arg(
                Arg::new("universal_index")
                    .long("universal-index")
                    .takes_value(true)
                    .help("Index of Mach-O binary to operate on within a universal/fat binary"),
            ),
    );

    let app = app.subcommand(
        Command::new("inspect")
            .about("Describe the code signature data used to compute the cdhash")
            .long_about(INSPECT_ABOUT)
            .arg(
                Arg::new("path")
                    .required(true)
                    .help("Path to Mach-O binary to examine"),
            ),
    );

    let matches = app.get_matches();

    let log_level = match matches.occurrences_of("verbose") {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_level.as_str()),
    );

    // Disable log context except at higher log levels.
    if log_level <= LevelFilter::Info {
        builder
            .format_timestamp(None)
            .format_level(false)
            .format_target(false);
    }

    builder.init();

    match matches.subcommand() {
        Some(("compute", args)) => command_compute(args),
        Some(("inspect", args)) => command_inspect(args),
        _ => Err(AppleCdhashError::CliUnknownCommand),
    }
}

fn main() {
    let exit_code = match main_impl() {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("Error: {}", err);
            1
        }
    };

    std::process::exit(exit_code)
}
