//! GStreamer encoding backend:
//! appsrc (RGBA) → videoconvert → x264enc|x265enc → parse → mp4mux → filesink

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use gst::prelude::*;
use stylecam_camera::Frame;

use crate::{EncoderError, EncoderSink, MediaTime, OutputSettings, ReadySignal, Result};

/// Bytes queued inside appsrc before it reports `enough-data`.
const MAX_QUEUED_BYTES: u64 = 8 * 1024 * 1024;

pub struct GstSink {
    pipeline: Option<gst::Pipeline>,
    appsrc: Option<gst_app::AppSrc>,
    finalize_timeout: Duration,
}

impl Default for GstSink {
    fn default() -> Self {
        Self::new()
    }
}

impl GstSink {
    pub fn new() -> Self {
        Self { pipeline: None, appsrc: None, finalize_timeout: Duration::from_secs(30) }
    }

    /// How long `finalize` waits for the muxer to reach EOS.
    pub fn with_finalize_timeout(mut self, timeout: Duration) -> Self {
        self.finalize_timeout = timeout;
        self
    }

    fn build_pipeline(settings: &OutputSettings, path: &Path) -> Result<(gst::Pipeline, gst_app::AppSrc)> {
        let pipeline = gst::Pipeline::new();

        let caps = gst::Caps::builder("video/x-raw")
            .field("format", "RGBA")
            .field("width", settings.width as i32)
            .field("height", settings.height as i32)
            .field("framerate", gst::Fraction::new(settings.fps as i32, 1))
            .build();

        let appsrc = gst_app::AppSrc::builder()
            .name("src")
            .caps(&caps)
            .format(gst::Format::Time)
            .max_bytes(MAX_QUEUED_BYTES)
            .stream_type(gst_app::AppStreamType::Stream)
            .build();

        let convert = make_element("videoconvert")?;
        let encoder = make_element(settings.codec.encoder_element())?;
        let parser = make_element(settings.codec.parser_element())?;
        let muxer = make_element("mp4mux")?;
        let filesink = gst::ElementFactory::make("filesink")
            .property("location", path.to_string_lossy().to_string())
            .build()
            .map_err(|e| EncoderError::Pipeline(format!("Failed to create filesink: {e}")))?;

        let chain = [appsrc.upcast_ref(), &convert, &encoder, &parser, &muxer, &filesink];
        pipeline
            .add_many(chain)
            .map_err(|e| EncoderError::Pipeline(format!("Failed to add elements: {e}")))?;
        gst::Element::link_many(chain)
            .map_err(|e| EncoderError::Pipeline(format!("Failed to link elements: {e}")))?;

        Ok((pipeline, appsrc))
    }

    /// Surface an error the pipeline has already posted.
    fn check_bus(&self) -> Result<()> {
        let Some(bus) = self.pipeline.as_ref().and_then(|p| p.bus()) else {
            return Ok(());
        };
        match bus.pop_filtered(&[gst::MessageType::Error]) {
            Some(msg) => match msg.view() {
                gst::MessageView::Error(err) => {
                    Err(EncoderError::Pipeline(format!("{} ({:?})", err.error(), err.debug())))
                }
                _ => Ok(()),
            },
            None => Ok(()),
        }
    }

    fn shutdown(&mut self) {
        self.appsrc = None;
        if let Some(pipeline) = self.pipeline.take() {
            if let Err(e) = pipeline.set_state(gst::State::Null) {
                log::warn!("failed to stop encoder pipeline: {e:?}");
            }
        }
    }
}

fn make_element(name: &str) -> Result<gst::Element> {
    gst::ElementFactory::make(name)
        .build()
        .map_err(|e| EncoderError::Pipeline(format!("Failed to create {name}: {e}")))
}

impl EncoderSink for GstSink {
    fn open(&mut self, settings: &OutputSettings, path: &Path, ready: Arc<ReadySignal>) -> Result<()> {
        gst::init().map_err(|e| EncoderError::Pipeline(format!("GStreamer init failed: {e}")))?;
        let (pipeline, appsrc) = Self::build_pipeline(settings, path)?;

        let need = Arc::clone(&ready);
        let enough = ready;
        appsrc.set_callbacks(
            gst_app::AppSrcCallbacks::builder()
                .need_data(move |_, _| need.set_ready(true))
                .enough_data(move |_| enough.set_ready(false))
                .build(),
        );

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| EncoderError::Pipeline(format!("Failed to start pipeline: {e:?}")))?;
        log::debug!("encoder pipeline playing, writing {}", path.display());

        self.pipeline = Some(pipeline);
        self.appsrc = Some(appsrc);
        Ok(())
    }

    fn append(&mut self, frame: &Frame, pts: MediaTime, duration: MediaTime) -> Result<()> {
        self.check_bus()?;
        let appsrc = self
            .appsrc
            .as_ref()
            .ok_or_else(|| EncoderError::Pipeline("sink is not open".into()))?;

        let row = frame.width as usize * 4;
        let mut buffer = match (frame.plane_stride(0), frame.plane_data(0)) {
            (Some(stride), Some(data)) if stride == row && data.len() == row * frame.height as usize => {
                gst::Buffer::from_slice(frame.buffer.clone())
            }
            (Some(stride), Some(data))
                if stride >= row && data.len() >= (frame.height as usize).saturating_sub(1) * stride + row =>
            {
                // Strip row padding.
                let mut packed = Vec::with_capacity(row * frame.height as usize);
                for r in data.chunks(stride).take(frame.height as usize) {
                    packed.extend_from_slice(&r[..row]);
                }
                gst::Buffer::from_mut_slice(packed)
            }
            _ => return Err(EncoderError::Pipeline("frame plane does not cover its dimensions".into())),
        };
        {
            let buffer_ref = buffer
                .get_mut()
                .ok_or_else(|| EncoderError::Pipeline("buffer is not writable".into()))?;
            buffer_ref.set_pts(gst::ClockTime::from_nseconds(pts.as_nanos()));
            buffer_ref.set_duration(gst::ClockTime::from_nseconds(duration.as_nanos()));
        }

        appsrc
            .push_buffer(buffer)
            .map_err(|e| EncoderError::Pipeline(format!("Failed to push buffer: {e:?}")))?;
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        let (Some(pipeline), Some(appsrc)) = (self.pipeline.as_ref(), self.appsrc.as_ref()) else {
            return Err(EncoderError::Pipeline("sink is not open".into()));
        };
        appsrc
            .end_of_stream()
            .map_err(|e| EncoderError::Pipeline(format!("Failed to send EOS: {e:?}")))?;

        let bus = pipeline
            .bus()
            .ok_or_else(|| EncoderError::Pipeline("pipeline has no bus".into()))?;
        let timeout = gst::ClockTime::from_nseconds(self.finalize_timeout.as_nanos() as u64);
        let result = match bus.timed_pop_filtered(timeout, &[gst::MessageType::Eos, gst::MessageType::Error]) {
            Some(msg) => match msg.view() {
                gst::MessageView::Eos(..) => Ok(()),
                gst::MessageView::Error(err) => {
                    Err(EncoderError::Pipeline(format!("{} ({:?})", err.error(), err.debug())))
                }
                _ => Ok(()),
            },
            None => Err(EncoderError::Pipeline(format!("no EOS within {:?}", self.finalize_timeout))),
        };

        self.shutdown();
        result
    }

    fn abort(&mut self) {
        self.shutdown();
    }
}

impl Drop for GstSink {
    fn drop(&mut self) {
        self.shutdown();
    }
}
