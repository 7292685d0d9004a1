use crate::CLAP_STYLING;
use clap::builder::RangedU64ValueParser;
use clap::{ArgAction, Command, arg, command, value_parser};
use std::path::PathBuf;
use url::Url;

pub const DEFAULT_CRAWL_OUTPUT: &str = "output/crawl.csv";
pub const DEFAULT_COLLECT_OUTPUT: &str = "output/urls.csv";

/// Arguments shared by every run: targets, login, output and timing.
fn target_args(cmd: Command, default_output: &'static str) -> Command {
    cmd.arg(
        arg!(-u --"url" <URL>)
            .required(false)
            .help("Target URL; repeat or comma-separate for several targets")
            .value_parser(value_parser!(Url))
            .action(ArgAction::Append)
            .value_delimiter(',')
            .env("STATEGRAPH_URL")
            .conflicts_with("targets-file"),
    )
    .arg(
        arg!(-T --"targets-file" <PATH>)
            .required(false)
            .help("Path to a newline-delimited file of target URLs")
            .value_parser(value_parser!(PathBuf))
            .env("STATEGRAPH_TARGETS_FILE"),
    )
    .arg(
        arg!(--"login-url" <URL>)
            .required(false)
            .help("Page holding the login form (default: the target URL)")
            .value_parser(value_parser!(Url))
            .env("STATEGRAPH_LOGIN_URL"),
    )
    .arg(
        arg!(--"user" <USERNAME>)
            .required(false)
            .help("Username for the login form")
            .env("STATEGRAPH_USER")
            .requires("password"),
    )
    .arg(
        arg!(--"password" <PASSWORD>)
            .required(false)
            .help("Password for the login form")
            .env("STATEGRAPH_PASSWORD")
            .hide_env_values(true)
            .requires("user"),
    )
    .arg(
        arg!(--"headful")
            .required(false)
            .help("Show the browser window when the driver has one")
            .action(ArgAction::SetTrue)
            .env("STATEGRAPH_HEADFUL"),
    )
    .arg(
        arg!(-o --"output" <PATH>)
            .required(false)
            .help("Tabular output file, appended to while the run progresses")
            .default_value(default_output)
            .env("STATEGRAPH_OUTPUT"),
    )
    .arg(
        arg!(--"graph-db" <PATH>)
            .required(false)
            .help("SQLite database for the state graph (default: in memory)")
            .env("STATEGRAPH_GRAPH_DB"),
    )
    .arg(
        arg!(--"clear")
            .required(false)
            .help("Discard previous output and graph before starting")
            .action(ArgAction::SetTrue)
            .env("STATEGRAPH_CLEAR"),
    )
    .arg(
        arg!(--"timeout-ms" <MILLISECONDS>)
            .required(false)
            .help("Upper bound for any single browser operation")
            .value_parser(value_parser!(u64).range(1..))
            .default_value("30000")
            .env("STATEGRAPH_TIMEOUT_MS"),
    )
    .arg(
        arg!(--"settle-ms" <MILLISECONDS>)
            .required(false)
            .help("Pause after each load before the page is captured")
            .value_parser(value_parser!(u64))
            .default_value("1500")
            .env("STATEGRAPH_SETTLE_MS"),
    )
    .arg(
        arg!(--"subtree")
            .required(false)
            .help("Stay below the target URL's path instead of the whole origin")
            .action(ArgAction::SetTrue)
            .env("STATEGRAPH_SUBTREE"),
    )
}

pub fn command_argument_builder() -> Command {
    Command::new("stategraph")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("stategraph")
        .styles(CLAP_STYLING)
        .arg(arg!(-q --"quiet" "Suppress banner and non-essential output").required(false))
        .subcommand_required(true)
        .subcommand(
            target_args(
                command!("crawl").about(
                    "Crawl an application's UI states, following links and clicking controls. \
                Writes every distinct state to the output file.",
                ),
                DEFAULT_CRAWL_OUTPUT,
            )
            .arg(
                arg!(-d --"max-depth" <DEPTH>)
                    .required(false)
                    .help("Maximum number of actions away from the seed state")
                    .value_parser(value_parser!(usize))
                    .default_value("20")
                    .env("STATEGRAPH_MAX_DEPTH"),
            )
            .arg(
                arg!(--"max-states" <COUNT>)
                    .required(false)
                    .help("Stop after this many distinct states")
                    .value_parser(value_parser!(usize))
                    .default_value("10000")
                    .env("STATEGRAPH_MAX_STATES"),
            )
            .arg(
                arg!(-p --"parallel" <NUM>)
                    .required(false)
                    .help("Interactions resolved concurrently per expanded state")
                    .value_parser(RangedU64ValueParser::<usize>::new().range(1..))
                    .default_value("8")
                    .env("STATEGRAPH_PARALLEL"),
            )
            .arg(
                arg!(--"exhaustive")
                    .required(false)
                    .help("Ignore depth, state and saturation limits")
                    .action(ArgAction::SetTrue)
                    .env("STATEGRAPH_EXHAUSTIVE"),
            )
            .arg(
                arg!(--"link-known-states")
                    .required(false)
                    .help("Also record transitions that lead back into already visited states")
                    .action(ArgAction::SetTrue)
                    .env("STATEGRAPH_LINK_KNOWN_STATES"),
            ),
        )
        .subcommand(
            target_args(
                command!("collect").about(
                    "Collect internal URLs, clicking through menus and buttons to uncover \
                links that only appear after interaction.",
                ),
                DEFAULT_COLLECT_OUTPUT,
            )
            .arg(
                arg!(--"max-urls" <COUNT>)
                    .required(false)
                    .help("Stop once this many distinct URLs are known")
                    .value_parser(RangedU64ValueParser::<usize>::new().range(1..))
                    .env("STATEGRAPH_MAX_URLS"),
            ),
        )
}
