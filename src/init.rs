use crate::config::config_holder::PathPrefixes;
use crate::config::toml::log::{AppenderCommon, LoggingConfig, LoggingStyle};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::Layer;
use tracing_subscriber::registry::LookupSpan;

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync + 'static>;

fn fmt_layer<S, W>(common: AppenderCommon, style: LoggingStyle, writer: W) -> BoxedLayer<S>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> tracing_subscriber::fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    // EnvFilter missing Clone
    let env_filter = common.level.0;
    // Code repetition because of https://github.com/tokio-rs/tracing/issues/575
    match style {
        LoggingStyle::Plain => tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_target(common.target)
            .with_span_events(common.span.into())
            .with_filter(env_filter)
            .boxed(),
        LoggingStyle::PlainCompact => tracing_subscriber::fmt::layer()
            .compact()
            .with_writer(writer)
            .with_target(common.target)
            .with_span_events(common.span.into())
            .with_filter(env_filter)
            .boxed(),
        LoggingStyle::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(writer)
            .with_target(common.target)
            .with_span_events(common.span.into())
            .with_filter(env_filter)
            .boxed(),
    }
}

/// Install the global subscriber. Keep the returned guard alive until exit,
/// otherwise buffered file logs are lost.
pub(crate) async fn init(
    log: LoggingConfig,
    path_prefixes: &PathPrefixes,
) -> Result<Guard, anyhow::Error> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let out_layer = match log.stdout {
        Some(stdout) if stdout.enabled => {
            Some(fmt_layer(stdout.common, stdout.style, std::io::stdout))
        }
        _ => None,
    };

    let mut file_guard = None;
    let file_layer = if let Some(file) = log.file {
        let directory = path_prefixes
            .replace_path_prefix_mkdir(&file.directory)
            .await?;
        let appender = tracing_appender::rolling::RollingFileAppender::new(
            file.rotation.into(),
            directory,
            file.prefix,
        );
        let (writer, guard) = tracing_appender::non_blocking(appender);
        file_guard = Some(guard);
        Some(fmt_layer(file.common, file.style, writer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(out_layer)
        .with(file_layer)
        .init();

    std::panic::set_hook(Box::new(utils::tracing_panic_hook));
    Ok(Guard {
        _file_guard: file_guard,
    })
}

pub(crate) struct Guard {
    _file_guard: Option<WorkerGuard>,
}
