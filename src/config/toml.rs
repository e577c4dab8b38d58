use self::log::{LoggingConfig, LoggingStyle};
use super::config_holder::DATA_DIR_PREFIX;
use notifier::{DelayPolicy, NotifierConfig};
use serde::Deserialize;
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::time::Duration;

const DEFAULT_TARGET_FILE: &str = const_format::formatcp!("{}target.toml", DATA_DIR_PREFIX);

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub(crate) struct ConfigToml {
    #[serde(default)]
    pub(crate) api: ApiConfig,
    #[serde(default)]
    pub(crate) host: HostConfig,
    #[serde(default)]
    pub(crate) target: TargetConfig,
    #[serde(default)]
    pub(crate) delivery: DeliveryConfigToml,
    #[serde(default)]
    pub(crate) log: LoggingConfig,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ApiConfig {
    pub(crate) listening_addr: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listening_addr: SocketAddr::from(([127, 0, 0, 1], 9090)),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub(crate) struct HostConfig {
    /// Prepended to run and job URLs. Without it the `uri` fields are omitted.
    #[serde(default)]
    pub(crate) root_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct TargetConfig {
    /// TOML file holding the persisted notification target.
    pub(crate) file: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            file: DEFAULT_TARGET_FILE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct DeliveryConfigToml {
    #[serde(default = "default_queue_capacity")]
    pub(crate) queue_capacity: NonZeroUsize,
    #[serde(default = "default_max_inflight_deliveries")]
    pub(crate) max_inflight_deliveries: NonZeroUsize,
    #[serde(default = "default_request_timeout")]
    pub(crate) request_timeout: DurationConfig,
    #[serde(default)]
    pub(crate) delays: DelaysToml,
}

impl Default for DeliveryConfigToml {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            max_inflight_deliveries: default_max_inflight_deliveries(),
            request_timeout: default_request_timeout(),
            delays: DelaysToml::default(),
        }
    }
}

impl From<DeliveryConfigToml> for NotifierConfig {
    fn from(value: DeliveryConfigToml) -> Self {
        NotifierConfig {
            queue_capacity: value.queue_capacity,
            max_inflight_deliveries: value.max_inflight_deliveries,
            request_timeout: value.request_timeout.into(),
            delays: value.delays.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct DelaysToml {
    #[serde(default = "default_started_delay")]
    pub(crate) started: DurationConfig,
    #[serde(default = "default_completed_delay")]
    pub(crate) completed: DurationConfig,
    #[serde(default = "default_completed_delay")]
    pub(crate) finalized: DurationConfig,
}

impl Default for DelaysToml {
    fn default() -> Self {
        Self {
            started: default_started_delay(),
            completed: default_completed_delay(),
            finalized: default_completed_delay(),
        }
    }
}

impl From<DelaysToml> for DelayPolicy {
    fn from(value: DelaysToml) -> Self {
        DelayPolicy {
            started: value.started.into(),
            completed: value.completed.into(),
            finalized: value.finalized.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub(crate) enum DurationConfig {
    Secs(u64),
    Millis(u64),
}

impl From<DurationConfig> for Duration {
    fn from(value: DurationConfig) -> Self {
        match value {
            DurationConfig::Millis(millis) => Duration::from_millis(millis),
            DurationConfig::Secs(secs) => Duration::from_secs(secs),
        }
    }
}

pub(crate) mod log {
    use super::{Deserialize, default_out_style};
    use std::str::FromStr;

    #[derive(Debug, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub(crate) struct LoggingConfig {
        #[serde(default)]
        pub(crate) file: Option<AppenderRollingFile>,
        #[serde(default = "default_stdout")]
        pub(crate) stdout: Option<AppenderOut>,
    }

    impl Default for LoggingConfig {
        fn default() -> Self {
            Self {
                file: None,
                stdout: default_stdout(),
            }
        }
    }

    #[allow(clippy::unnecessary_wraps)]
    fn default_stdout() -> Option<AppenderOut> {
        Some(AppenderOut {
            enabled: true,
            common: AppenderCommon::default(),
            style: default_out_style(),
        })
    }

    #[derive(Debug, Deserialize, Default, Copy, Clone)]
    #[serde(rename_all = "snake_case")]
    pub(crate) enum SpanConfig {
        /// spans are ignored (this is the default)
        #[default]
        None,
        /// one event when span is created
        New,
        /// one event when the span is dropped
        Close,
        /// one event per enter/exit of a span
        Active,
        /// events at all points (new, enter, exit, drop)
        Full,
    }

    impl From<SpanConfig> for tracing_subscriber::fmt::format::FmtSpan {
        fn from(value: SpanConfig) -> Self {
            match value {
                SpanConfig::None => Self::NONE,
                SpanConfig::New => Self::NEW,
                SpanConfig::Close => Self::CLOSE,
                SpanConfig::Active => Self::ACTIVE,
                SpanConfig::Full => Self::FULL,
            }
        }
    }

    #[derive(Debug, Deserialize, Default, Clone, Copy, PartialEq, Eq)]
    #[serde(rename_all = "snake_case")]
    pub(crate) enum LoggingStyle {
        #[default]
        Plain,
        PlainCompact,
        Json,
    }

    #[derive(Debug, Deserialize, Default)]
    #[serde(deny_unknown_fields)]
    pub(crate) struct AppenderCommon {
        #[serde(default)]
        pub(crate) level: EnvFilter,
        #[serde(default)]
        pub(crate) span: SpanConfig,
        #[serde(default)]
        pub(crate) target: bool,
    }

    #[derive(Debug, serde_with::DeserializeFromStr)]
    pub(crate) struct EnvFilter(pub(crate) tracing_subscriber::EnvFilter);
    impl FromStr for EnvFilter {
        type Err = tracing_subscriber::filter::ParseError;

        fn from_str(directives: &str) -> Result<Self, Self::Err> {
            tracing_subscriber::EnvFilter::builder()
                .parse(directives)
                .map(Self)
        }
    }
    impl Default for EnvFilter {
        fn default() -> Self {
            Self(tracing_subscriber::EnvFilter::new("info"))
        }
    }

    #[derive(Debug, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub(crate) struct AppenderOut {
        pub(crate) enabled: bool,
        #[serde(flatten, default)]
        pub(crate) common: AppenderCommon,
        #[serde(default = "default_out_style")]
        pub(crate) style: LoggingStyle,
    }

    #[derive(Debug, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub(crate) struct AppenderRollingFile {
        #[serde(flatten, default)]
        pub(crate) common: AppenderCommon,
        pub(crate) directory: String,
        pub(crate) prefix: String,
        pub(crate) rotation: Rotation,
        #[serde(default)]
        pub(crate) style: LoggingStyle,
    }

    #[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
    #[serde(rename_all = "snake_case")]
    pub(crate) enum Rotation {
        Minutely,
        Hourly,
        Daily,
        Never,
    }
    impl From<Rotation> for tracing_appender::rolling::Rotation {
        fn from(value: Rotation) -> Self {
            match value {
                Rotation::Minutely => Self::MINUTELY,
                Rotation::Hourly => Self::HOURLY,
                Rotation::Daily => Self::DAILY,
                Rotation::Never => Self::NEVER,
            }
        }
    }
}

fn default_queue_capacity() -> NonZeroUsize {
    NotifierConfig::default().queue_capacity
}

fn default_max_inflight_deliveries() -> NonZeroUsize {
    NotifierConfig::default().max_inflight_deliveries
}

const fn default_request_timeout() -> DurationConfig {
    DurationConfig::Secs(5)
}

const fn default_started_delay() -> DurationConfig {
    DurationConfig::Secs(0)
}

const fn default_completed_delay() -> DurationConfig {
    DurationConfig::Secs(1)
}

fn default_out_style() -> LoggingStyle {
    LoggingStyle::Plain
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn generated_config_parses() {
        let config: ConfigToml = toml::from_str(crate::config::config_holder::GENERATED_TOML)
            .expect("generated config must parse");
        assert_eq!("127.0.0.1:9090", config.api.listening_addr.to_string());
        assert_eq!("${DATA_DIR}/target.toml", config.target.file);
        let notifier_config = NotifierConfig::from(config.delivery);
        assert_eq!(1024, notifier_config.queue_capacity.get());
        assert_eq!(8, notifier_config.max_inflight_deliveries.get());
        assert_eq!(Duration::from_secs(5), notifier_config.request_timeout);
        assert_eq!(DelayPolicy::default(), notifier_config.delays);
        let stdout = config.log.stdout.expect("stdout is configured");
        assert!(stdout.enabled);
        assert_eq!(LoggingStyle::Plain, stdout.style);
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config: ConfigToml = toml::from_str("").unwrap();
        assert_eq!(None, config.host.root_url);
        assert_eq!(DEFAULT_TARGET_FILE, config.target.file);
        assert!(config.log.stdout.is_some());
        assert!(config.log.file.is_none());
        let notifier_config = NotifierConfig::from(config.delivery);
        assert_eq!(1024, notifier_config.queue_capacity.get());
    }

    #[test]
    fn durations_accept_secs_and_millis() {
        let delivery: DeliveryConfigToml = toml::from_str(
            "request_timeout.millis = 250\n[delays]\ncompleted.secs = 3\n",
        )
        .unwrap();
        let notifier_config = NotifierConfig::from(delivery);
        assert_eq!(Duration::from_millis(250), notifier_config.request_timeout);
        assert_eq!(Duration::from_secs(3), notifier_config.delays.completed);
        assert_eq!(Duration::from_secs(1), notifier_config.delays.finalized);
    }

    #[test]
    fn zero_queue_capacity_is_rejected() {
        assert_matches!(
            toml::from_str::<DeliveryConfigToml>("queue_capacity = 0"),
            Err(_)
        );
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert_matches!(toml::from_str::<ConfigToml>("[api]\nport = 1\n"), Err(_));
    }

    #[test]
    fn rolling_file_appender() {
        let config: ConfigToml = toml::from_str(
            "[log.file]\ndirectory = \"/tmp/logs\"\nprefix = \"rn.log\"\nrotation = \"hourly\"\nlevel = \"debug,hyper=info\"\n",
        )
        .unwrap();
        let file = config.log.file.unwrap();
        assert_eq!(log::Rotation::Hourly, file.rotation);
        assert_eq!("rn.log", file.prefix);
    }
}
