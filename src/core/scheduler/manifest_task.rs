use crate::core::manifest::{ManifestEvent, ManifestState, ManifestWriter, PresentationTiming};
use crate::core::media_io::Clock;
use crate::core::scheduler::{StageState, StageStatus};
use crate::core::sync::{MessageQueue, ShutdownToken};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;

pub(crate) struct ManifestParameter {
    pub(crate) live: bool,
    /// Representation whose segment events drive live regeneration.
    pub(crate) primary_representation: String,
    /// Number of representations reporting a duration on demand.
    pub(crate) representations: usize,
    pub(crate) ast_offset_ms: i32,
    pub(crate) use_dynamic_ast: bool,
}

pub(crate) fn manifest_init(
    parameter: ManifestParameter,
    writer: Box<dyn ManifestWriter>,
    events: Arc<MessageQueue<ManifestEvent>>,
    clock: Arc<dyn Clock>,
    shutdown: ShutdownToken,
    status: StageStatus,
) -> std::io::Result<JoinHandle<crate::error::Result<()>>> {
    std::thread::Builder::new()
        .name("manifest".to_string())
        .spawn(move || {
            let mut writer = writer;
            status.set(StageState::Running);
            let result = if parameter.live {
                run_live(&parameter, writer.as_mut(), &events, &shutdown)
            } else {
                run_on_demand(&parameter, writer.as_mut(), &events, clock.as_ref())
            };
            status.set(StageState::Stopped);
            result
        })
}

/// Regenerates the dynamic manifest after every segment of the primary
/// representation.
fn run_live(
    parameter: &ManifestParameter,
    writer: &mut dyn ManifestWriter,
    events: &MessageQueue<ManifestEvent>,
    shutdown: &ShutdownToken,
) -> crate::error::Result<()> {
    let mut anchor: Option<(i64, u64)> = None;
    let mut first_error = None;

    loop {
        let event = match events.get() {
            Some(event) => event,
            None if events.is_closed() || shutdown.is_cancelled() => break,
            None => continue,
        };
        writer.observe(&event);

        let (segment_number, timestamp_ms) = match event {
            ManifestEvent::SegmentReady {
                representation,
                segment_number,
                timestamp_ms,
            } if representation == parameter.primary_representation => (segment_number, timestamp_ms),
            ManifestEvent::SegmentReady { .. } => continue,
            ManifestEvent::DurationKnown { representation, .. } => {
                debug!("manifest: ignoring duration of {representation} in live mode");
                continue;
            }
        };

        if segment_number == 0 || parameter.use_dynamic_ast || anchor.is_none() {
            let mut availability_start_ms = timestamp_ms;
            if parameter.ast_offset_ms > 0 {
                availability_start_ms += parameter.ast_offset_ms as i64;
            }
            anchor = Some((availability_start_ms, segment_number));
        }
        let Some((availability_start_ms, start_number)) = anchor else {
            continue;
        };

        let state = ManifestState {
            timing: PresentationTiming::Dynamic {
                availability_start_ms,
                start_number,
                last_number: segment_number,
            },
            generated_at_ms: timestamp_ms,
        };
        if let Err(e) = writer.regenerate(&state) {
            error!("manifest: {e}");
            first_error.get_or_insert(e);
        }
    }

    info!("manifest finished");
    first_error.map_or(Ok(()), Err)
}

/// Writes the static manifest once every representation reported its
/// duration, or once the event queue is closed.
fn run_on_demand(
    parameter: &ManifestParameter,
    writer: &mut dyn ManifestWriter,
    events: &MessageQueue<ManifestEvent>,
    clock: &dyn Clock,
) -> crate::error::Result<()> {
    let mut durations: HashMap<String, u64> = HashMap::new();

    while durations.len() < parameter.representations {
        let event = match events.get() {
            Some(event) => event,
            None if events.is_closed() => break,
            None => continue,
        };
        writer.observe(&event);

        if let ManifestEvent::DurationKnown {
            representation,
            duration_ms,
        } = event
        {
            debug!("manifest: {representation} lasts {duration_ms}ms");
            let known = durations.entry(representation).or_default();
            *known = (*known).max(duration_ms);
        }
    }

    if durations.is_empty() {
        warn!("manifest: no representation reported a duration, nothing written");
        return Ok(());
    }
    if durations.len() < parameter.representations {
        warn!(
            "manifest: only {} of {} representations reported a duration",
            durations.len(),
            parameter.representations
        );
    }

    let duration_ms = durations.values().copied().max().unwrap_or_default();
    let state = ManifestState {
        timing: PresentationTiming::Static { duration_ms },
        generated_at_ms: clock.now_ms(),
    };
    writer.regenerate(&state).inspect_err(|e| error!("manifest: {e}"))?;
    info!("manifest finished");
    Ok(())
}
