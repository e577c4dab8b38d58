use concepts::{JobRecord, RunRecord};
use std::fmt;
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::{
    FmtContext, FormattedFields,
    format::{self, FormatEvent, FormatFields},
};
use tracing_subscriber::registry::LookupSpan;

pub mod sim_clock;
pub mod sim_host;

static INIT: std::sync::Once = std::sync::Once::new();

struct MessageFirstFormatter;

impl<S, N> FormatEvent<S, N> for MessageFirstFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        let timestamp = chrono::Utc::now();
        write!(
            &mut writer,
            "{} {: <5} ",
            timestamp.format(":%M:%S%.3f"),
            metadata.level(),
        )?;

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        write!(&mut writer, " Target({}) ", metadata.target())?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;
                let ext = span.extensions();
                let fields = &ext
                    .get::<FormattedFields<N>>()
                    .expect("will never be `None`");
                if !fields.is_empty() {
                    write!(writer, "{{{fields}}}")?;
                }
                write!(writer, ": ")?;
            }
        }
        writeln!(writer)
    }
}

pub fn set_up() {
    INIT.call_once(|| {
        use tracing_subscriber::layer::SubscriberExt;
        use tracing_subscriber::util::SubscriberInitExt;

        std::panic::set_hook(Box::new(utils::tracing_panic_hook));

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_test_writer()
            .event_format(MessageFirstFormatter);

        tracing_subscriber::registry()
            .with(fmt_layer)
            .with(tracing_subscriber::EnvFilter::from_default_env())
            .init();
    });
}

#[must_use]
pub fn run_record(job_name: &str, number: u32, duration_millis: u64) -> RunRecord {
    RunRecord {
        display_name: format!("build-{number}"),
        build_status_summary: if duration_millis == 0 {
            "pending".to_string()
        } else {
            "stable".to_string()
        },
        duration_millis,
        url: format!("job/{job_name}/{number}/"),
        job: JobRecord {
            display_name: job_name.to_string(),
            url: format!("job/{job_name}/"),
        },
    }
}
