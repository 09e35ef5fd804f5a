use clap::builder::PossibleValue;
use clap::{crate_description, crate_name, crate_version, Arg, ArgAction, Command};

pub fn build_cli() -> Command {
    let args = vec![
        Arg::new("log-level")
            .long("log-level")
            .value_name("LOG_LEVEL")
            .env("CONFIG_INJECTOR_LOG_LEVEL")
            .default_value("info")
            .value_parser([
                PossibleValue::new("trace"),
                PossibleValue::new("debug"),
                PossibleValue::new("info"),
                PossibleValue::new("warn"),
                PossibleValue::new("error"),
            ])
            .help("Log level"),
        Arg::new("log-fmt")
            .long("log-fmt")
            .value_name("LOG_FMT")
            .env("CONFIG_INJECTOR_LOG_FMT")
            .default_value("text")
            .value_parser([PossibleValue::new("text"), PossibleValue::new("json")])
            .help("Log output format"),
        Arg::new("log-no-color")
            .long("log-no-color")
            .env("NO_COLOR")
            .action(ArgAction::SetTrue)
            .help("Disable colored output for logs"),
        Arg::new("address")
            .long("addr")
            .value_name("BIND_ADDRESS")
            .default_value("0.0.0.0")
            .env("CONFIG_INJECTOR_BIND_ADDRESS")
            .help("Bind against ADDRESS"),
        Arg::new("port")
            .long("port")
            .value_name("PORT")
            .default_value("8443")
            .env("CONFIG_INJECTOR_PORT")
            .help("Listen on PORT"),
        Arg::new("config-file")
            .long("config-file")
            .value_name("CONFIG_FILE")
            .default_value("config/config.yaml")
            .env("CONFIG_INJECTOR_CONFIG_FILE")
            .help("YAML file holding the injection policy and init container defaults"),
        Arg::new("cert-file")
            .long("cert-file")
            .value_name("CERT_FILE")
            .default_value("keys/tls.crt")
            .env("CONFIG_INJECTOR_CERT_FILE")
            .help("Path to an X.509 certificate file for HTTPS"),
        Arg::new("key-file")
            .long("key-file")
            .value_name("KEY_FILE")
            .default_value("keys/tls.key")
            .env("CONFIG_INJECTOR_KEY_FILE")
            .help("Path to an X.509 private key file for HTTPS"),
        Arg::new("health-check-interval")
            .long("health-check-interval")
            .value_name("SECONDS")
            .default_value("0")
            .env("CONFIG_INJECTOR_HEALTH_CHECK_INTERVAL")
            .help("Interval between periodic health file updates, 0 disables them"),
        Arg::new("health-check-file")
            .long("health-check-file")
            .value_name("HEALTH_CHECK_FILE")
            .env("CONFIG_INJECTOR_HEALTH_CHECK_FILE")
            .help("File touched by the periodic health check"),
    ];

    Command::new(crate_name!())
        .version(crate_version!())
        .about(crate_description!())
        .args(args)
}
