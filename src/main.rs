// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    apple_identity_export::{
        CertificateTypeFilter, EnvironmentFilter, ExportDestination, ExportRequest,
        IdentityExportError,
    },
    clap::{Arg, ArgMatches, Command},
    log::{info, LevelFilter},
    std::path::PathBuf,
};

fn build_request(matches: &ArgMatches) -> Result<ExportRequest, IdentityExportError> {
    let keychain = matches
        .value_of("keychain")
        .ok_or_else(|| IdentityExportError::Usage("the --keychain flag is required".to_string()))?;
    let output = matches
        .value_of("output")
        .ok_or_else(|| IdentityExportError::Usage("the --output flag is required".to_string()))?;
    let passphrase = matches
        .value_of("password")
        .ok_or_else(|| IdentityExportError::Usage("the --password flag is required".to_string()))?;

    let certificate_type = match matches.value_of("cert").unwrap_or("all") {
        "ios" => CertificateTypeFilter::IosAppStore,
        "mac" => CertificateTypeFilter::MacAppStore,
        "devid" => CertificateTypeFilter::DeveloperId,
        _ => CertificateTypeFilter::All,
    };

    let environment = match matches.value_of("env").unwrap_or("all") {
        "dev" => EnvironmentFilter::Development,
        "prod" => EnvironmentFilter::Production,
        _ => EnvironmentFilter::All,
    };

    let output = PathBuf::from(output);
    let destination = if matches.is_present("store") {
        ExportDestination::Store {
            path: output,
            force: matches.is_present("force"),
        }
    } else {
        ExportDestination::Container { path: output }
    };

    let request = ExportRequest {
        source: PathBuf::from(keychain),
        destination,
        passphrase: passphrase.to_string(),
        team_id: matches.value_of("teamid").map(|s| s.to_string()),
        user_name: matches.value_of("user").map(|s| s.to_string()),
        certificate_type,
        environment,
    };

    request.validate()?;

    Ok(request)
}

fn main_impl() -> Result<(), IdentityExportError> {
    let app = Command::new("export-apple-certs")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Gregory Szorc <gregory.szorc@gmail.com>")
        .about("Export Apple code signing identities from a keychain store")
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .multiple_occurrences(true)
                .help("Increase logging verbosity. Can be specified multiple times."),
        )
        .arg(
            Arg::new("keychain")
                .long("keychain")
                .takes_value(true)
                .value_name("PATH")
                .help("Path of the keychain store to export from"),
        )
        .arg(
            Arg::new("output")
                .long("output")
                .takes_value(true)
                .value_name("PATH")
                .help("Path of the container file (or store, with --store) to write"),
        )
        .arg(
            Arg::new("password")
                .long("password")
                .takes_value(true)
                .value_name("PASSWD")
                .help("Passphrase protecting the destination"),
        )
        .arg(
            Arg::new("teamid")
                .long("teamid")
                .takes_value(true)
                .value_name("STRING")
                .help("Only export identities belonging to this developer team id"),
        )
        .arg(
            Arg::new("user")
                .long("user")
                .takes_value(true)
                .value_name("STRING")
                .help("Only export identities belonging to this developer user name"),
        )
        .arg(
            Arg::new("cert")
                .long("cert")
                .takes_value(true)
                .possible_values(["all", "ios", "mac", "devid"])
                .default_value("all")
                .help("Only export certificates of this issuance class"),
        )
        .arg(
            Arg::new("env")
                .long("env")
                .takes_value(true)
                .possible_values(["all", "dev", "prod"])
                .default_value("all")
                .help("Only export development or production certificates"),
        )
        .arg(
            Arg::new("store")
                .long("store")
                .help("Write a new keychain store instead of a container file"),
        )
        .arg(
            Arg::new("force")
                .long("force")
                .help("With --store, replace an existing store at the output path"),
        );

    let mut usage_app = app.clone();
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

    let request = match build_request(&matches) {
        Ok(request) => request,
        Err(err) => {
            // Usage problems report on stdout, before any store is touched.
            if let IdentityExportError::Usage(message) = &err {
                println!("error: {}", message);
                println!();
                let _ = usage_app.print_help();
                println!();
            }

            return Err(err);
        }
    };

    let summary = apple_identity_export::transfer::run(&request)?;

    info!("Exported {} identities", summary.transferred);

    Ok(())
}

fn main() {
    let exit_code = match main_impl() {
        Ok(()) => 0,
        Err(IdentityExportError::Usage(_)) => 2,
        Err(err) => {
            eprintln!("Error {} in {} : {}", err.code(), err.domain(), err);
            1
        }
    };

    std::process::exit(exit_code)
}
