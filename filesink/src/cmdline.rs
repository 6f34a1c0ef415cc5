use clap::{Arg, Command};

pub(crate) const ARG_CONFIG: &str = "config";
pub(crate) const ARG_AGENT: &str = "agent";
pub(crate) const ARG_SINK: &str = "sink";
pub(crate) const ARG_CHANNEL: &str = "channel";

pub(super) fn root_cli() -> Command {
    Command::new("filesink")
        .about("Drains events from a channel into a local file")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(add_run_subcommand())
        .subcommand(add_check_subcommand())
}

fn add_run_subcommand() -> Command {
    Command::new("run")
        .about("Reads events from stdin, one per line, and appends them to the configured file")
        .args(agent_args())
}

fn add_check_subcommand() -> Command {
    Command::new("check")
        .about("Validates the sink and channel configuration and exits")
        .args(agent_args())
}

fn agent_args() -> [Arg; 4] {
    [
        Arg::new(ARG_CONFIG)
            .long(ARG_CONFIG)
            .short('c')
            .value_name("FILE")
            .help("Agent properties file; without it the sink object is read from FILESINK_SINK_OBJECT"),
        Arg::new(ARG_AGENT)
            .long(ARG_AGENT)
            .default_value("a1")
            .help("Agent name used as the key prefix in the properties file"),
        Arg::new(ARG_SINK)
            .long(ARG_SINK)
            .default_value("k1")
            .help("Sink to run"),
        Arg::new(ARG_CHANNEL)
            .long(ARG_CHANNEL)
            .default_value("c1")
            .help("Channel feeding the sink, unless the sink names one itself"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        root_cli().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let matches = root_cli()
            .try_get_matches_from(["filesink", "run", "--config", "agent.properties"])
            .unwrap();
        let (name, args) = matches.subcommand().unwrap();
        assert_eq!(name, "run");
        assert_eq!(
            args.get_one::<String>(ARG_CONFIG).map(String::as_str),
            Some("agent.properties")
        );
        assert_eq!(args.get_one::<String>(ARG_AGENT).unwrap(), "a1");
        assert_eq!(args.get_one::<String>(ARG_SINK).unwrap(), "k1");
        assert_eq!(args.get_one::<String>(ARG_CHANNEL).unwrap(), "c1");
    }

    #[test]
    fn test_subcommand_required() {
        assert!(root_cli().try_get_matches_from(["filesink"]).is_err());
    }
}
