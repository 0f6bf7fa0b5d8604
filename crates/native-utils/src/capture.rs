//! Microphone capture.
//!
//! A cpal stream is not `Send`, so each acquisition owns a dedicated thread
//! that builds the stream, drains its ring buffer and publishes mono
//! [`AudioFrame`]s on a [`CaptureTap`]. Recorder and recognizer subscribe to
//! the tap independently.

use crate::audio::downmix;
use crate::device::get_or_default_input;
use crate::error::CaptureError;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use coach_core::capture::Microphone;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};

/// How often the capture thread forwards what the device has delivered.
const DRAIN_INTERVAL: Duration = Duration::from_millis(20);
/// Seconds of audio the device callback may queue ahead of the capture thread.
const RING_SECONDS: usize = 2;
/// Frames a slow subscriber may fall behind before it starts losing audio.
const FRAME_BACKLOG: usize = 512;

/// A block of mono samples from the microphone.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub samples: Arc<[f32]>,
    pub sample_rate: u32,
}

/// Fan-out point for captured audio.
#[derive(Debug, Clone)]
pub struct CaptureTap {
    frames: broadcast::Sender<AudioFrame>,
}

impl Default for CaptureTap {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureTap {
    pub fn new() -> Self {
        let (frames, _) = broadcast::channel(FRAME_BACKLOG);
        Self { frames }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AudioFrame> {
        self.frames.subscribe()
    }

    pub fn publish(&self, frame: AudioFrame) {
        // Nobody listening outside a capture is normal.
        let _ = self.frames.send(frame);
    }
}

struct CaptureWorker {
    stop: mpsc::Sender<()>,
    sample_rate: u32,
}

/// The system microphone, held from `acquire` until `release`.
pub struct CpalMicrophone {
    device_name: Option<String>,
    tap: CaptureTap,
    worker: Option<CaptureWorker>,
}

impl CpalMicrophone {
    pub fn new(device_name: Option<String>, tap: CaptureTap) -> Self {
        Self {
            device_name,
            tap,
            worker: None,
        }
    }

    pub fn sample_rate(&self) -> Option<u32> {
        self.worker.as_ref().map(|w| w.sample_rate)
    }
}

#[async_trait]
impl Microphone for CpalMicrophone {
    async fn acquire(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }

        let (ready_tx, ready_rx) = oneshot::channel::<Result<u32>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let device_name = self.device_name.clone();
        let tap = self.tap.clone();
        thread::Builder::new()
            .name("coach-capture".into())
            .spawn(move || run_capture(device_name, tap, ready_tx, stop_rx))
            .context("Failed to spawn capture thread")?;

        let sample_rate = ready_rx.await.map_err(|_| CaptureError::ThreadGone)??;
        tracing::info!("Microphone capturing at {} Hz", sample_rate);
        self.worker = Some(CaptureWorker {
            stop: stop_tx,
            sample_rate,
        });
        Ok(())
    }

    fn release(&mut self) {
        if let Some(worker) = self.worker.take() {
            // The thread also exits once the sender is gone.
            let _ = worker.stop.send(());
        }
    }

    fn is_held(&self) -> bool {
        self.worker.is_some()
    }
}

impl Drop for CpalMicrophone {
    fn drop(&mut self) {
        self.release();
    }
}

fn run_capture(
    device_name: Option<String>,
    tap: CaptureTap,
    ready: oneshot::Sender<Result<u32>>,
    stop: mpsc::Receiver<()>,
) {
    let (stream, mut samples, sample_rate, channels) = match open_stream(device_name.as_deref()) {
        Ok(opened) => opened,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = ready.send(Err(anyhow!(e).context("Failed to start input stream")));
        return;
    }
    if ready.send(Ok(sample_rate)).is_err() {
        return;
    }

    loop {
        match stop.recv_timeout(DRAIN_INTERVAL) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
        let interleaved: Vec<f32> = samples.pop_iter().collect();
        if interleaved.is_empty() {
            continue;
        }
        tap.publish(AudioFrame {
            samples: downmix(&interleaved, channels).into(),
            sample_rate,
        });
    }

    drop(stream);
    tracing::info!("Microphone released");
}

fn open_stream(device_name: Option<&str>) -> Result<(Stream, HeapCons<f32>, u32, usize)> {
    let device = get_or_default_input(device_name)?;
    tracing::info!("Using input device: {:?}", device.name()?);
    for config in device.supported_input_configs()? {
        tracing::debug!("Supported input config: {:?}", config);
    }

    let supported = device
        .default_input_config()
        .context("Failed to get default input config")?;
    let config = StreamConfig {
        channels: supported.channels(),
        sample_rate: supported.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    };
    tracing::info!("Input stream config: {:?}", &config);

    let channels = config.channels as usize;
    let sample_rate = config.sample_rate.0;
    let ring = HeapRb::<f32>::new(sample_rate as usize * channels * RING_SECONDS);
    let (producer, consumer) = ring.split();

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, producer)?,
        SampleFormat::I16 => build_stream::<i16>(&device, &config, producer)?,
        SampleFormat::U16 => build_stream::<u16>(&device, &config, producer)?,
        other => return Err(CaptureError::UnsupportedFormat(format!("{other:?}")).into()),
    };
    Ok((stream, consumer, sample_rate, channels))
}

fn build_stream<T>(device: &Device, config: &StreamConfig, mut producer: HeapProd<f32>) -> Result<Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let input_data_fn = move |data: &[T], _: &cpal::InputCallbackInfo| {
        let mut dropped = 0usize;
        for &sample in data {
            if producer.try_push(sample.to_sample::<f32>()).is_err() {
                dropped += 1;
            }
        }
        if dropped > 0 {
            tracing::warn!("Capture buffer full, dropped {} samples", dropped);
        }
    };

    let stream = device.build_input_stream(
        config,
        input_data_fn,
        move |err| tracing::error!("An error occurred on input stream: {}", err),
        None,
    )?;
    Ok(stream)
}
