use logdest_bridge::bridge::DeinitPolicy;
use logdest_bridge::config::{DestinationConfig, DEFAULT_CLASS_PATH};

#[derive(clap::Parser, Debug)]
#[clap(author, version, about, long_about = None)]
#[clap(arg_required_else_help = true)]
pub struct Args {
    /// JSON destination block; overrides the other destination flags
    #[clap(long, value_name = "PATH_TO_JSON")]
    pub config: Option<std::path::PathBuf>,

    /// Colon-separated locations to resolve the class in
    #[clap(long, env = "LOGDEST_CLASS_PATH", default_value = DEFAULT_CLASS_PATH)]
    pub class_path: String,

    /// Destination class to load
    #[clap(long, env = "LOGDEST_CLASS_NAME")]
    pub class_name: Option<String>,

    /// Destination option as key=value; may be repeated
    #[clap(short, long = "option", value_name = "KEY=VALUE", value_parser = parse_option)]
    pub options: Vec<(String, String)>,

    /// Whether deinit reaches a destination whose init failed
    #[clap(long, default_value_t = DeinitPolicy::OnlyAfterInit)]
    pub deinit_policy: DeinitPolicy,

    /// Resolve classes from the demo destinations linked into this binary
    #[clap(long = "static")]
    pub use_static: bool,

    /// Milliseconds the worker waits before retrying rejected records.
    #[clap(long, default_value_t = 100)]
    pub poll_ms: u64,
}

impl Args {
    /// Destination block from `--config`, or assembled from the flags.
    pub fn destination(&self) -> Result<DestinationConfig, String> {
        if let Some(path) = &self.config {
            let json = std::fs::read_to_string(path)
                .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
            return DestinationConfig::from_json_str(&json)
                .map_err(|e| format!("Invalid destination config {}: {e}", path.display()));
        }

        let class_name = self
            .class_name
            .clone()
            .ok_or_else(|| "--class-name or --config is required".to_string())?;
        let mut config = DestinationConfig::new(class_name);
        config.class_path = self.class_path.clone();
        config.options = self.options.iter().cloned().collect();
        config.deinit_policy = self.deinit_policy;
        Ok(config)
    }
}

fn parse_option(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.trim().to_string(), value.to_string()))
        .filter(|(key, _)| !key.is_empty())
        .ok_or_else(|| format!("expected KEY=VALUE, got {raw:?}"))
}
