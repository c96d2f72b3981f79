//! GStreamer graph backend for `rtsp://` endpoints.
//!
//! `rtspsrc` is built with a fixed transport profile; its pads appear after
//! the connection is up and are negotiated in the `pad-added` callback.

use std::sync::Arc;
use std::time::Duration;

use gst::prelude::*;
use gstreamer as gst;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;

use crate::frame::{MappedSample, PixelLayout};

use super::bus::BusEvent;
use super::endpoint::StreamEndpoint;
use super::extract::FrameExtractor;
use super::graph::{ElementRole, PipelineState};
use super::negotiate::{DecodeChain, PadCaps};
use super::params::fps_from_fraction;
use super::session::{BranchOutcome, Session};
use super::IngestError;

pub(crate) struct GstGraph {
    pipeline: gst::Pipeline,
    bus: gst::Bus,
    session: Arc<Session>,
}

impl GstGraph {
    pub fn build(endpoint: &StreamEndpoint, session: Arc<Session>) -> Result<Self, IngestError> {
        let pipeline = gst::Pipeline::with_name(&session.tag().replace(':', "_"));

        let source = gst::ElementFactory::make("rtspsrc")
            .name(ElementRole::Source.name())
            .property("location", endpoint.as_str())
            .property("latency", endpoint.latency.as_millis() as u32)
            .property("timeout", endpoint.timeout.as_micros() as u64)
            .property("tcp-timeout", endpoint.tcp_timeout.as_micros() as u64)
            .property("do-retransmission", endpoint.retransmission)
            .property("ntp-sync", true)
            .property("drop-on-latency", true)
            .property_from_str("protocols", endpoint.transport.as_protocols())
            .property_from_str("buffer-mode", "none")
            .build()
            .map_err(|_| missing("rtspsrc"))?;

        let convert = gst::ElementFactory::make("videoconvert")
            .name(ElementRole::Convert.name())
            .build()
            .map_err(|_| missing("videoconvert"))?;

        let caps = gst::Caps::builder("video/x-raw")
            .field("format", PixelLayout::Bgr8.caps_format())
            .build();
        let sink = gst_app::AppSink::builder()
            .name(ElementRole::Sink.name())
            .caps(&caps)
            .sync(false)
            .drop(true)
            .max_buffers(1)
            .build();

        pipeline
            .add_many([&source, &convert, sink.upcast_ref()])
            .map_err(|_| IngestError::Link {
                from: "pipeline".into(),
                to: "skeleton".into(),
            })?;
        convert.link(&sink).map_err(|_| link_error(ElementRole::Convert, ElementRole::Sink))?;

        install_sample_callback(&sink, session.extractor());
        install_pad_added(&source, &pipeline, &convert, Arc::clone(&session));

        let bus = pipeline.bus().ok_or_else(|| IngestError::Unsupported("pipeline has no bus".into()))?;
        log::info!("[{}] graph built for {}", session.tag(), endpoint.as_str());
        Ok(Self {
            pipeline,
            bus,
            session,
        })
    }

    pub fn control(&self) -> gst::Pipeline {
        self.pipeline.clone()
    }

    /// Request `target` and wait up to `timeout` for it to complete.
    pub fn set_state(&self, target: PipelineState, timeout: Duration) -> Result<(), IngestError> {
        let gst_target = to_gst(target);
        self.pipeline
            .set_state(gst_target)
            .map_err(|_| IngestError::StateChange { target })?;
        if gst_target == gst::State::Null {
            return Ok(());
        }
        let (result, current, _pending) = self
            .pipeline
            .state(Some(gst::ClockTime::from_mseconds(timeout.as_millis() as u64)));
        result.map_err(|_| IngestError::StateChange { target })?;
        if current != gst_target {
            return Err(IngestError::StateTimeout { target, timeout });
        }
        Ok(())
    }

    pub fn next_event(&self, timeout: Duration) -> Option<BusEvent> {
        let message = self.bus.timed_pop_filtered(
            gst::ClockTime::from_mseconds(timeout.as_millis() as u64),
            &[
                gst::MessageType::Error,
                gst::MessageType::Warning,
                gst::MessageType::Eos,
                gst::MessageType::StateChanged,
            ],
        )?;
        let source = message
            .src()
            .map(|s| s.name().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        match message.view() {
            gst::MessageView::Error(err) => Some(BusEvent::Error {
                source,
                message: err.error().to_string(),
                debug: err.debug().map(|d| d.to_string()),
            }),
            gst::MessageView::Warning(warn) => Some(BusEvent::Warning {
                source,
                message: warn.error().to_string(),
                debug: warn.debug().map(|d| d.to_string()),
            }),
            gst::MessageView::Eos(..) => Some(BusEvent::Eos),
            gst::MessageView::StateChanged(changed) => Some(BusEvent::StateChanged {
                old: from_gst(changed.old()),
                new: from_gst(changed.current()),
                pending: from_gst(changed.pending()),
                top_level: message.src() == Some(self.pipeline.upcast_ref::<gst::Object>()),
            }),
            _ => None,
        }
    }

    /// Caps on the converter's output, once negotiated.
    pub fn negotiated_caps(&self) -> Option<String> {
        let convert = self.pipeline.by_name(ElementRole::Convert.name())?;
        let caps = convert.static_pad("src")?.current_caps()?;
        let structure = caps.structure(0)?;
        let width = structure.get::<i32>("width").ok()?;
        let height = structure.get::<i32>("height").ok()?;
        let fps = structure
            .get::<gst::Fraction>("framerate")
            .ok()
            .and_then(|f| fps_from_fraction(f.numer(), f.denom()))
            .unwrap_or(0);
        Some(format!("{width}x{height} @ {fps} fps ({caps})"))
    }
}

impl Drop for GstGraph {
    fn drop(&mut self) {
        if self.pipeline.set_state(gst::State::Null).is_err() {
            log::warn!("[{}] failed to reach NULL during teardown", self.session.tag());
        }
    }
}

fn install_pad_added(
    source: &gst::Element,
    pipeline: &gst::Pipeline,
    convert: &gst::Element,
    session: Arc<Session>,
) {
    let pipeline_weak = pipeline.downgrade();
    let convert_weak = convert.downgrade();
    source.connect_pad_added(move |_src, pad| {
        let (Some(pipeline), Some(convert)) = (pipeline_weak.upgrade(), convert_weak.upgrade())
        else {
            return;
        };
        let caps = pad_caps(pad);
        let outcome = session.on_new_branch(&caps, |chain| {
            attach_chain(&pipeline, &convert, pad, chain)
        });
        match outcome {
            Ok(BranchOutcome::AlreadyAttached(codec)) => {
                // Pads come back after a state bounce; feed the existing chain.
                if let Err(e) = relink(&pipeline, pad) {
                    log::warn!("[{}] could not relink {codec} branch: {e}", session.tag());
                }
            }
            Ok(_) => {}
            Err(e) => log::error!("[{}] video branch abandoned: {e}", session.tag()),
        }
    });
}

fn attach_chain(
    pipeline: &gst::Pipeline,
    convert: &gst::Element,
    pad: &gst::Pad,
    chain: DecodeChain,
) -> Result<(), IngestError> {
    let roles = [ElementRole::Depayloader, ElementRole::Parser, ElementRole::Decoder];
    let mut elements = Vec::with_capacity(roles.len());
    for (role, factory) in roles.into_iter().zip(chain.factories()) {
        let element = gst::ElementFactory::make(factory)
            .name(role.name())
            .build()
            .map_err(|_| missing(factory))?;
        elements.push(element);
    }

    pipeline
        .add_many(&elements)
        .map_err(|_| IngestError::Link {
            from: "pipeline".into(),
            to: "decode chain".into(),
        })?;
    let rollback = |pipeline: &gst::Pipeline, elements: &[gst::Element]| {
        let _ = pipeline.remove_many(elements);
    };

    if gst::Element::link_many(&elements).is_err() {
        rollback(pipeline, &elements);
        return Err(link_error(ElementRole::Depayloader, ElementRole::Decoder));
    }
    let decoder = &elements[2];
    if decoder.link(convert).is_err() {
        rollback(pipeline, &elements);
        return Err(link_error(ElementRole::Decoder, ElementRole::Convert));
    }
    let Some(depay_sink) = elements[0].static_pad("sink") else {
        rollback(pipeline, &elements);
        return Err(link_error(ElementRole::Source, ElementRole::Depayloader));
    };
    if pad.link(&depay_sink).is_err() {
        rollback(pipeline, &elements);
        return Err(link_error(ElementRole::Source, ElementRole::Depayloader));
    }
    for element in &elements {
        if element.sync_state_with_parent().is_err() {
            log::warn!("failed to sync state of {}", element.name());
        }
    }
    Ok(())
}

fn relink(pipeline: &gst::Pipeline, pad: &gst::Pad) -> Result<(), IngestError> {
    let depay_sink = pipeline
        .by_name(ElementRole::Depayloader.name())
        .and_then(|depay| depay.static_pad("sink"))
        .ok_or_else(|| link_error(ElementRole::Source, ElementRole::Depayloader))?;
    if depay_sink.is_linked() {
        return Ok(());
    }
    pad.link(&depay_sink)
        .map(|_| ())
        .map_err(|_| link_error(ElementRole::Source, ElementRole::Depayloader))
}

fn pad_caps(pad: &gst::Pad) -> PadCaps {
    let caps = pad.current_caps().unwrap_or_else(|| pad.query_caps(None));
    let Some(structure) = caps.structure(0) else {
        return PadCaps::default();
    };
    PadCaps {
        media: structure.get::<String>("media").ok(),
        encoding_name: structure.get::<String>("encoding-name").ok(),
        width: structure.get::<i32>("width").ok(),
        height: structure.get::<i32>("height").ok(),
        framerate: structure
            .get::<gst::Fraction>("framerate")
            .ok()
            .map(|f| (f.numer(), f.denom())),
    }
}

fn install_sample_callback(sink: &gst_app::AppSink, mut extractor: FrameExtractor) {
    sink.set_callbacks(
        gst_app::AppSinkCallbacks::builder()
            .new_sample(move |sink| {
                let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                if let Err(e) = extract_sample(&sample, &mut extractor) {
                    log::warn!("dropped frame: {e}");
                }
                Ok(gst::FlowSuccess::Ok)
            })
            .build(),
    );
}

fn extract_sample(sample: &gst::Sample, extractor: &mut FrameExtractor) -> Result<(), String> {
    let buffer = sample.buffer().ok_or("sample has no buffer")?;
    let caps = sample.caps().ok_or("sample has no caps")?;
    let structure = caps.structure(0).ok_or("caps have no structure")?;
    let layout = structure
        .get::<String>("format")
        .ok()
        .and_then(|f| PixelLayout::from_caps_format(&f))
        .unwrap_or_default();
    let info = gst_video::VideoInfo::from_caps(caps).ok();
    let stride = info
        .as_ref()
        .and_then(|info| info.stride().first().copied())
        .and_then(|s| usize::try_from(s).ok());
    let fps = info
        .as_ref()
        .and_then(|info| fps_from_fraction(info.fps().numer(), info.fps().denom()));

    let map = buffer.map_readable().map_err(|e| e.to_string())?;
    let mapped = MappedSample {
        data: map.as_slice(),
        width: structure.get::<i32>("width").ok(),
        height: structure.get::<i32>("height").ok(),
        stride,
        layout,
    };
    extractor
        .extract(&mapped, fps)
        .map(|_| ())
        .map_err(|e| e.to_string())
}

fn to_gst(state: PipelineState) -> gst::State {
    match state {
        PipelineState::Null | PipelineState::Stopped => gst::State::Null,
        PipelineState::Ready => gst::State::Ready,
        PipelineState::Paused => gst::State::Paused,
        PipelineState::Playing => gst::State::Playing,
    }
}

fn from_gst(state: gst::State) -> PipelineState {
    match state {
        gst::State::Ready => PipelineState::Ready,
        gst::State::Paused => PipelineState::Paused,
        gst::State::Playing => PipelineState::Playing,
        _ => PipelineState::Null,
    }
}

fn missing(factory: &str) -> IngestError {
    IngestError::ElementMissing {
        factory: factory.to_string(),
    }
}

fn link_error(from: ElementRole, to: ElementRole) -> IngestError {
    IngestError::Link {
        from: from.name().to_string(),
        to: to.name().to_string(),
    }
}
