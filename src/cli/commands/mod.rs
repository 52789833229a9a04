use clap::{
    builder::{
        styling::{AnsiColor, Effects, Styles},
        BoolishValueParser, ValueParser,
    },
    Arg, ArgAction, ColorChoice, Command,
};
use std::{net::IpAddr, path::PathBuf};

pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        if let Ok(parsed) = level.parse::<u8>() {
            if parsed <= 5 {
                return Ok(parsed);
            }
        }

        match level.to_lowercase().as_str() {
            "error" => Ok(0),
            "warn" => Ok(1),
            "info" => Ok(2),
            "debug" => Ok(3),
            "trace" => Ok(4),
            _ => Err("invalid log level".to_string()),
        }
    })
}

fn seconds(name: &'static str, help: &'static str, env: &'static str, default: &'static str) -> Arg {
    Arg::new(name)
        .long(name)
        .help(help)
        .env(env)
        .default_value(default)
        .value_name("SECONDS")
        .value_parser(clap::value_parser!(u64).range(1..))
}

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    Command::new("sessiongate")
        .about("Allow-listed, rate-limited session cache for remote service logins")
        .version(env!("CARGO_PKG_VERSION"))
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new("identity")
                .short('i')
                .long("identity")
                .help("Identity (email) to authenticate")
                .env("SESSIONGATE_IDENTITY")
                .required(true),
        )
        .arg(
            Arg::new("secret")
                .short('s')
                .long("secret")
                .help("Secret for the identity")
                .env("SESSIONGATE_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new("client-addr")
                .long("client-addr")
                .help("Client IP address recorded on failed attempts")
                .env("SESSIONGATE_CLIENT_ADDR")
                .value_parser(clap::value_parser!(IpAddr)),
        )
        .arg(
            Arg::new("repeat")
                .short('n')
                .long("repeat")
                .help("Number of lookups to perform with the same credentials")
                .env("SESSIONGATE_REPEAT")
                .default_value("1")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new("allow-list")
                .short('a')
                .long("allow-list")
                .help("Allow-list file, one identity per line (default: ./allowlist.txt)")
                .env("SESSIONGATE_ALLOW_LIST")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("mock")
                .long("mock")
                .help("Simulate remote logins instead of calling the login URL")
                .env("SESSIONGATE_MOCK")
                .action(ArgAction::SetTrue)
                .value_parser(BoolishValueParser::new()),
        )
        .arg(
            Arg::new("login-url")
                .short('u')
                .long("login-url")
                .help("Remote login endpoint, example: https://remote.tld/api/login")
                .env("SESSIONGATE_LOGIN_URL")
                .required_unless_present("mock"),
        )
        .arg(
            Arg::new("session-cookie")
                .long("session-cookie")
                .help("Name of the cookie carrying the remote session id")
                .env("SESSIONGATE_SESSION_COOKIE")
                .default_value("PHPSESSID"),
        )
        .arg(seconds(
            "auth-timeout",
            "Remote login timeout",
            "SESSIONGATE_AUTH_TIMEOUT",
            "10",
        ))
        .arg(seconds(
            "eviction-horizon",
            "Maximum session age before a fresh login is required",
            "SESSIONGATE_EVICTION_HORIZON",
            "43200",
        ))
        .arg(
            Arg::new("failure-threshold")
                .long("failure-threshold")
                .help("Consecutive failures that trigger a lockout")
                .env("SESSIONGATE_FAILURE_THRESHOLD")
                .default_value("3")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(seconds(
            "initial-lockout",
            "Lockout duration at the threshold, doubled per further failure",
            "SESSIONGATE_INITIAL_LOCKOUT",
            "10",
        ))
        .arg(seconds(
            "max-lockout",
            "Upper bound for a single lockout",
            "SESSIONGATE_MAX_LOCKOUT",
            "30",
        ))
        .arg(seconds(
            "failure-retention",
            "Idle time after which failure records are forgotten",
            "SESSIONGATE_FAILURE_RETENTION",
            "86400",
        ))
        .arg(
            Arg::new("failure-log")
                .long("failure-log")
                .help("Append failed attempts to this file in a fail2ban-friendly format")
                .env("SESSIONGATE_FAILURE_LOG")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("verbosity")
                .short('v')
                .long("verbose")
                .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
                .env("SESSIONGATE_LOG_LEVEL")
                .global(true)
                .action(ArgAction::Count)
                .value_parser(validator_log_level()),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUIRED_ENV: [(&str, Option<&str>); 5] = [
        ("SESSIONGATE_IDENTITY", None),
        ("SESSIONGATE_SECRET", None),
        ("SESSIONGATE_LOGIN_URL", None),
        ("SESSIONGATE_MOCK", None),
        ("SESSIONGATE_LOG_LEVEL", None),
    ];

    #[test]
    fn test_new() {
        let command = new();

        assert_eq!(command.get_name(), "sessiongate");
        assert_eq!(
            command.get_version().unwrap().to_string(),
            env!("CARGO_PKG_VERSION")
        );
    }

    #[test]
    fn test_defaults() {
        temp_env::with_vars(REQUIRED_ENV, || {
            let matches = new().get_matches_from(vec![
                "sessiongate",
                "--identity",
                "ops@example.com",
                "--secret",
                "hunter2",
                "--login-url",
                "https://remote.tld/api/login",
            ]);

            assert_eq!(matches.get_one::<u32>("repeat").copied(), Some(1));
            assert_eq!(matches.get_one::<u32>("failure-threshold").copied(), Some(3));
            assert_eq!(matches.get_one::<u64>("initial-lockout").copied(), Some(10));
            assert_eq!(matches.get_one::<u64>("max-lockout").copied(), Some(30));
            assert_eq!(
                matches.get_one::<u64>("eviction-horizon").copied(),
                Some(43_200)
            );
            assert_eq!(
                matches.get_one::<String>("session-cookie").map(String::as_str),
                Some("PHPSESSID")
            );
            assert!(!matches.get_flag("mock"));
            assert!(matches.get_one::<PathBuf>("allow-list").is_none());
        });
    }

    #[test]
    fn test_login_url_required_without_mock() {
        temp_env::with_vars(REQUIRED_ENV, || {
            let result = new().try_get_matches_from(vec![
                "sessiongate",
                "--identity",
                "ops@example.com",
                "--secret",
                "hunter2",
            ]);
            assert!(result.is_err());

            let result = new().try_get_matches_from(vec![
                "sessiongate",
                "--identity",
                "ops@example.com",
                "--secret",
                "hunter2",
                "--mock",
            ]);
            assert!(result.is_ok());
        });
    }

    #[test]
    fn test_check_env() {
        temp_env::with_vars(
            [
                ("SESSIONGATE_IDENTITY", Some("ops@example.com")),
                ("SESSIONGATE_SECRET", Some("hunter2")),
                ("SESSIONGATE_MOCK", Some("true")),
                ("SESSIONGATE_LOGIN_URL", None),
                ("SESSIONGATE_CLIENT_ADDR", Some("10.0.0.7")),
                ("SESSIONGATE_REPEAT", Some("3")),
                ("SESSIONGATE_ALLOW_LIST", Some("/etc/sessiongate/allowlist.txt")),
                ("SESSIONGATE_LOG_LEVEL", Some("info")),
            ],
            || {
                let matches = new().get_matches_from(vec!["sessiongate"]);
                assert_eq!(
                    matches.get_one::<String>("identity").map(String::as_str),
                    Some("ops@example.com")
                );
                assert!(matches.get_flag("mock"));
                assert_eq!(
                    matches.get_one::<IpAddr>("client-addr").copied(),
                    "10.0.0.7".parse().ok()
                );
                assert_eq!(matches.get_one::<u32>("repeat").copied(), Some(3));
                assert_eq!(
                    matches.get_one::<PathBuf>("allow-list"),
                    Some(&PathBuf::from("/etc/sessiongate/allowlist.txt"))
                );
                assert_eq!(matches.get_one::<u8>("verbosity").copied(), Some(2));
            },
        );
    }

    #[test]
    fn test_rejects_zero_values() {
        temp_env::with_vars(REQUIRED_ENV, || {
            for flag in ["--repeat", "--failure-threshold", "--initial-lockout"] {
                let result = new().try_get_matches_from(vec![
                    "sessiongate",
                    "--identity",
                    "ops@example.com",
                    "--secret",
                    "hunter2",
                    "--mock",
                    flag,
                    "0",
                ]);
                assert!(result.is_err(), "{flag} accepted 0");
            }
        });
    }

    #[test]
    fn test_check_log_level_env() {
        let levels = vec!["error", "warn", "info", "debug", "trace"];
        for (index, &level) in levels.iter().enumerate() {
            temp_env::with_vars(
                [
                    ("SESSIONGATE_LOG_LEVEL", Some(level)),
                    ("SESSIONGATE_IDENTITY", Some("ops@example.com")),
                    ("SESSIONGATE_SECRET", Some("hunter2")),
                    ("SESSIONGATE_MOCK", Some("1")),
                ],
                || {
                    let matches = new().get_matches_from(vec!["sessiongate"]);
                    assert_eq!(
                        matches.get_one::<u8>("verbosity").copied(),
                        Some(index as u8)
                    );
                },
            );
        }
    }

    #[test]
    fn test_check_log_level_verbosity() {
        for index in 0..5usize {
            temp_env::with_vars(REQUIRED_ENV, || {
                let mut args = vec![
                    "sessiongate".to_string(),
                    "--identity".to_string(),
                    "ops@example.com".to_string(),
                    "--secret".to_string(),
                    "hunter2".to_string(),
                    "--mock".to_string(),
                ];

                if index > 0 {
                    args.push(format!("-{}", "v".repeat(index)));
                }

                let matches = new().get_matches_from(args);
                assert_eq!(
                    matches.get_one::<u8>("verbosity").copied(),
                    Some(index as u8)
                );
            });
        }
    }
}
