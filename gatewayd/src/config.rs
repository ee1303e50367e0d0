use gw_api::driver::DriverConfig;
use gw_api::{Error, Result};
use serde_derive::Deserialize;
use std::env;
use tracing::Level;

fn def_log_level() -> String {
    String::from("warn")
}

fn def_backend_kind() -> String {
    String::from("memory")
}

#[derive(Deserialize, Clone)]
pub struct Backend {
    #[serde(default = "def_backend_kind")]
    pub kind: String,
    pub state_file: Option<String>,
}

impl Default for Backend {
    fn default() -> Self {
        Backend {
            kind: def_backend_kind(),
            state_file: None,
        }
    }
}

#[derive(Deserialize)]
pub struct Driver {
    pub name: String,
    pub prefix: String,
    pub cfg: Option<DriverConfig>,
}

#[derive(Deserialize)]
pub struct Config {
    #[serde(default = "def_log_level")]
    log_level: String,
    #[serde(default)]
    pub backend: Backend,
    #[serde(default)]
    pub driver: Vec<Driver>,
}

impl Config {
    pub fn get_log_level(&self) -> Level {
        match self.log_level.as_str() {
            "info" => Level::INFO,
            "debug" => Level::DEBUG,
            "trace" => Level::TRACE,
            _ => Level::WARN,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: def_log_level(),
            backend: Backend::default(),
            driver: vec![],
        }
    }
}

fn from_cmdline(mut cfg: Config) -> (bool, Config) {
    use clap::{crate_version, Arg, ArgAction, Command};

    let matches = Command::new("gatewayd")
        .version(crate_version!())
        .about("Device management core for a home-gateway platform")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .action(ArgAction::Set)
                .value_name("FILE")
                .help("Specifies the configuration file"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .help("Sets verbosity of log; can be used more than once"),
        )
        .arg(
            Arg::new("print_cfg")
                .long("print-config")
                .action(ArgAction::SetTrue)
                .help("Displays the configuration and exits"),
        )
        .get_matches();

    match matches.get_count("verbose") {
        0 => (),
        1 => cfg.log_level = String::from("info"),
        2 => cfg.log_level = String::from("debug"),
        _ => cfg.log_level = String::from("trace"),
    };

    (matches.get_flag("print_cfg"), cfg)
}

fn parse_config(contents: &str) -> Result<Config> {
    toml::from_str(contents).map_err(|e| Error::ConfigError(format!("{}", e)))
}

async fn from_file(path: &str) -> Option<Result<Config>> {
    use tokio::fs;

    if let Ok(contents) = fs::read(path).await {
        let contents = String::from_utf8_lossy(&contents);

        Some(parse_config(&contents))
    } else {
        None
    }
}

async fn find_cfg(explicit: Option<&str>) -> Result<Config> {
    const CFG_FILE: &str = "gatewayd.toml";

    if let Some(path) = explicit {
        return from_file(path)
            .await
            .unwrap_or_else(|| Err(Error::ConfigError(format!("{} not found", path))));
    }

    let mut dirs = vec![String::from("./")];

    if let Ok(home) = env::var("HOME") {
        dirs.push(format!("{}/.", home))
    }

    dirs.push(String::from("/usr/local/etc/"));
    dirs.push(String::from("/etc/"));

    for dir in dirs {
        let file = format!("{}{}", &dir, CFG_FILE);

        if let Some(cfg) = from_file(&file).await {
            return cfg;
        }
    }
    Ok(Config::default())
}

fn dump_config(cfg: &Config) {
    println!("Configuration:");
    println!("    log level: {}\n", cfg.get_log_level());

    println!("Backend:");
    println!("    kind: {}", &cfg.backend.kind);
    println!(
        "    state file: {}\n",
        cfg.backend.state_file.as_deref().unwrap_or("(none)")
    );

    println!("Driver configuration:");
    if !cfg.driver.is_empty() {
        for ii in &cfg.driver {
            println!(
                "    name: {}\n    prefix: '{}'\n    cfg: {:?}\n",
                &ii.name,
                &ii.prefix,
                ii.cfg.as_ref().cloned().unwrap_or_default()
            )
        }
    } else {
        println!("    No drivers specified.");
    }
}

#[tracing::instrument(name = "loading config")]
pub async fn get() -> Option<Config> {
    // The command line may name an explicit config file before we
    // know anything else about it, so do a cheap first pass just for
    // `-c` ahead of the full clap parse in `from_cmdline`.
    let explicit = env::args()
        .collect::<Vec<_>>()
        .windows(2)
        .find(|w| w[0] == "-c" || w[0] == "--config")
        .map(|w| w[1].clone());

    match find_cfg(explicit.as_deref()).await {
        Ok(cfg) => {
            let (print_cfg, cfg) = from_cmdline(cfg);

            if print_cfg {
                dump_config(&cfg);
                None
            } else {
                Some(cfg)
            }
        }
        Err(e) => {
            println!("{}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        match toml::from_str::<Config>("") {
            Ok(cfg) => {
                assert_eq!(cfg.get_log_level(), Level::WARN);
                assert_eq!(cfg.backend.kind, "memory");
                assert!(cfg.driver.is_empty());
            }
            Err(e) => panic!("TOML parse error: {}", e),
        }
    }

    #[test]
    fn test_log_level() {
        match toml::from_str::<Config>("log_level = \"trace\"") {
            Ok(cfg) => assert_eq!(cfg.get_log_level(), Level::TRACE),
            Err(e) => panic!("TOML parse error: {}", e),
        }
    }

    #[test]
    fn test_driver_section() {
        assert!(
            toml::from_str::<Config>("[[driver]]\n").is_err(),
            "TOML parser accepted empty [[driver]] section"
        );

        match toml::from_str::<Config>(
            r#"
[[driver]]
name = "hue"
prefix = "light"
"#,
        ) {
            Ok(cfg) => {
                assert_eq!(cfg.driver.len(), 1);
                assert_eq!(cfg.driver[0].name, "hue");
                assert_eq!(cfg.driver[0].prefix, "light");
            }
            Err(e) => panic!("TOML parse error: {}", e),
        }
    }
}
