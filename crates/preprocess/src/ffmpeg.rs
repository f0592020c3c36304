use crate::error::PreprocessError;
use crate::frame::RgbFrame;
use crate::video::{FrameSampler, FrameSampling, SampledVideo};
use ffmpeg_next as ffmpeg;
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::OnceLock;

fn init() -> Result<(), PreprocessError> {
    static INIT: OnceLock<Result<(), String>> = OnceLock::new();
    INIT.get_or_init(|| ffmpeg::init().map_err(|e| e.to_string()))
        .clone()
        .map_err(PreprocessError::VideoDecode)
}

fn decode_error(context: &str, err: ffmpeg::Error) -> PreprocessError {
    PreprocessError::VideoDecode(format!("{}: {}", context, err))
}

/// Decode any container FFmpeg understands, sampling frames as they come off the decoder.
pub fn decode(path: &Path, sampling: FrameSampling) -> Result<SampledVideo, PreprocessError> {
    init()?;

    let mut ictx =
        ffmpeg::format::input(&path).map_err(|e| decode_error("failed to open input", e))?;

    let stream = ictx
        .streams()
        .best(ffmpeg::media::Type::Video)
        .ok_or_else(|| PreprocessError::VideoDecode(format!("no video stream in {}", path.display())))?;
    let stream_index = stream.index();
    let rate = stream.avg_frame_rate();
    let fps = (rate.denominator() != 0 && rate.numerator() > 0)
        .then(|| f64::from(rate.numerator()) / f64::from(rate.denominator()));

    let mut decoder = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
        .map_err(|e| decode_error("failed to create codec context", e))?
        .decoder()
        .video()
        .map_err(|e| decode_error("failed to create decoder", e))?;

    let (width, height) = (decoder.width(), decoder.height());
    let mut scaler = ffmpeg::software::scaling::Context::get(
        decoder.format(),
        width,
        height,
        ffmpeg::format::Pixel::RGB24,
        width,
        height,
        ffmpeg::software::scaling::Flags::BILINEAR,
    )
    .map_err(|e| decode_error("failed to create scaler", e))?;

    let mut sampler = FrameSampler::new(sampling);
    let mut decoded = ffmpeg::util::frame::video::Video::empty();

    let mut drain = |decoder: &mut ffmpeg::decoder::Video,
                     sampler: &mut FrameSampler|
     -> Result<ControlFlow<()>, PreprocessError> {
        while decoder.receive_frame(&mut decoded).is_ok() {
            let flow = sampler.offer_with(|| {
                let mut rgb = ffmpeg::util::frame::video::Video::empty();
                scaler
                    .run(&decoded, &mut rgb)
                    .map_err(|e| decode_error("failed to convert frame", e))?;
                copy_rgb(&rgb)
            })?;
            if flow.is_break() {
                return Ok(ControlFlow::Break(()));
            }
        }
        Ok(ControlFlow::Continue(()))
    };

    let mut finished = false;
    for (stream, packet) in ictx.packets() {
        if stream.index() != stream_index {
            continue;
        }
        if decoder.send_packet(&packet).is_ok() && drain(&mut decoder, &mut sampler)?.is_break() {
            finished = true;
            break;
        }
    }

    if !finished {
        decoder.send_eof().ok();
        drain(&mut decoder, &mut sampler)?;
    }

    sampler.finish(fps)
}

fn copy_rgb(frame: &ffmpeg::util::frame::video::Video) -> Result<RgbFrame, PreprocessError> {
    let width = frame.width() as usize;
    let height = frame.height() as usize;
    let stride = frame.stride(0);
    let plane = frame.data(0);

    let mut pixels = Vec::with_capacity(width * height * 3);
    for y in 0..height {
        let start = y * stride;
        pixels.extend_from_slice(&plane[start..start + width * 3]);
    }
    RgbFrame::new(frame.width(), frame.height(), pixels)
}
