use crabcam_session::analysis::AnalysisEvent;
use crabcam_session::testing::{synthetic_rgba_frame, synthetic_yuv420_frame, FakeCameraProvider};
use crabcam_session::types::{AnalysisFormat, AspectRatio, CaptureMode, PixelFormat, Sensor, SensorPosition};
use crabcam_session::{CameraSession, SessionConfig};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    crabcam_session::init_logging();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: crabcam-sim <probe|analyze|capture> [args]");
        std::process::exit(1);
    }

    let command = &args[1];
    match command.as_str() {
        "probe" => cmd_probe(&args).await,
        "analyze" => cmd_analyze(&args).await,
        "capture" => cmd_capture(&args).await,
        _ => {
            eprintln!("Unknown command: {}", command);
            std::process::exit(1);
        }
    }
}

fn parse_sensors(value: &str) -> Result<Vec<Sensor>, String> {
    value
        .split(',')
        .map(|s| match s.trim() {
            "back" => Ok(Sensor::back()),
            "front" => Ok(Sensor::front()),
            other => Err(format!("unknown sensor: {}", other)),
        })
        .collect()
}

fn load_settings(path: Option<&String>) -> Result<SessionConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => Ok(SessionConfig::load_from_file(path)?),
        None => Ok(SessionConfig::default()),
    }
}

async fn cmd_probe(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let provider = FakeCameraProvider::new();
    let session = CameraSession::with_defaults(Arc::new(provider))?;

    let report = serde_json::json!({
        "multi_cam": session.is_multi_cam_supported(),
        "video_and_analysis_back": session.is_video_recording_and_analysis_supported(SensorPosition::Back),
        "video_and_analysis_front": session.is_video_recording_and_analysis_supported(SensorPosition::Front),
    });
    if args.contains(&"--json".to_string()) {
        println!("{}", serde_json::to_string(&report)?);
    } else {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    session.shutdown().await?;
    Ok(())
}

async fn cmd_analyze(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    // Parse args: analyze [--sensors back,front] [--format nv21] [--width <px>] [--fps <f>]
    //                     [--frames <n>] [--aspect 4:3] [--config <path>] [--json]
    let mut sensors = vec![Sensor::back()];
    let mut format = AnalysisFormat::Nv21;
    let mut width: i64 = 0;
    let mut fps: Option<f64> = None;
    let mut frames: u64 = 30;
    let mut aspect = AspectRatio::Ratio4x3;
    let mut config_path = None;
    let mut json = false;

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--sensors" => {
                i += 1;
                sensors = parse_sensors(&args[i])?;
            }
            "--format" => {
                i += 1;
                format = args[i].parse()?;
            }
            "--width" => {
                i += 1;
                width = args[i].parse()?;
            }
            "--fps" => {
                i += 1;
                fps = Some(args[i].parse()?);
            }
            "--frames" => {
                i += 1;
                frames = args[i].parse()?;
            }
            "--aspect" => {
                i += 1;
                aspect = args[i].parse()?;
            }
            "--config" => {
                i += 1;
                config_path = args.get(i);
            }
            "--json" => json = true,
            other => {
                eprintln!("Unknown argument: {}", other);
                std::process::exit(1);
            }
        }
        i += 1;
    }

    let settings = load_settings(config_path)?;
    let provider = FakeCameraProvider::new();
    let session = CameraSession::new(Arc::new(provider.clone()), settings)?;
    let mut receiver = session.attach_analysis_consumer();
    let mut events = session.subscribe();

    let config = session
        .default_configuration(sensors)
        .with_capture_mode(CaptureMode::AnalysisOnly)
        .with_aspect_ratio(aspect)
        .with_analysis(crabcam_session::AnalysisSettings::from_raw(format, width, fps));
    let outcome = session.configure_session(config).await?;
    if json {
        println!("{}", serde_json::to_string(&outcome)?);
    } else {
        println!(
            "Bound {} sensor(s), binding {} ({} downgrade(s))",
            outcome.sensors.len(),
            outcome.binding_id,
            outcome.downgrades.len()
        );
    }

    // Camera callback: ~30 fps of synthetic frames
    let emitter = provider.clone();
    let source = format.source_format();
    let producer = std::thread::Builder::new()
        .name("crabcam-sim-camera".to_string())
        .spawn(move || {
            for n in 0..frames {
                let frame = match source {
                    PixelFormat::Yuv420 => synthetic_yuv420_frame(n, 640, 480, 704),
                    PixelFormat::Rgba8888 => synthetic_rgba_frame(n, 640, 480),
                };
                emitter.emit_frame(frame);
                std::thread::sleep(Duration::from_millis(33));
            }
        })?;

    let idle = Duration::from_millis(500);
    while let Ok(Some(event)) = tokio::time::timeout(idle, receiver.recv()).await {
        match event {
            AnalysisEvent::Frame(image) => {
                if json {
                    let summary = serde_json::json!({
                        "sequence": image.sequence,
                        "format": image.format.as_str(),
                        "width": image.width,
                        "height": image.height,
                        "rotation": image.rotation,
                        "crop_rect": image.crop_rect,
                        "bytes": image.bytes.as_ref().map(|b| b.len()),
                        "planes": image.planes.len(),
                    });
                    println!("{}", summary);
                } else {
                    println!(
                        "frame {} {} {}x{} ({} bytes)",
                        image.sequence,
                        image.format.as_str(),
                        image.width,
                        image.height,
                        image.bytes.as_ref().map(|b| b.len()).unwrap_or(0)
                    );
                }
                receiver.ack();
            }
            AnalysisEvent::Error { sequence, message } => {
                eprintln!("frame {} failed: {}", sequence, message);
            }
        }
    }

    if producer.join().is_err() {
        eprintln!("Frame producer panicked");
    }
    session.shutdown().await?;

    while let Ok(event) = events.try_recv() {
        if json {
            println!("{}", serde_json::to_string(&event)?);
        } else {
            println!("event: {:?}", event);
        }
    }

    let stats = session.analysis_stats();
    if json {
        println!("{}", serde_json::to_string(&stats)?);
    } else {
        println!(
            "received {} emitted {} released {} dropped(busy) {}",
            stats.received, stats.emitted, stats.released, stats.dropped_busy
        );
        println!(
            "buffers: {} emitted, {} returned",
            provider.frames_emitted(),
            provider.frames_released()
        );
    }
    Ok(())
}

async fn cmd_capture(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    // Parse args: capture <out_dir> [--sensors back] [--record-ms <ms>] [--config <path>] [--json]
    if args.len() < 3 {
        eprintln!("Usage: crabcam-sim capture <out_dir> [--sensors back] [--record-ms <ms>]");
        std::process::exit(1);
    }
    let out_dir = PathBuf::from(&args[2]);
    let mut sensors = vec![Sensor::back()];
    let mut record_ms: u64 = 200;
    let mut config_path = None;
    let mut json = false;

    let mut i = 3;
    while i < args.len() {
        match args[i].as_str() {
            "--sensors" => {
                i += 1;
                sensors = parse_sensors(&args[i])?;
            }
            "--record-ms" => {
                i += 1;
                record_ms = args[i].parse()?;
            }
            "--config" => {
                i += 1;
                config_path = args.get(i);
            }
            "--json" => json = true,
            other => {
                eprintln!("Unknown argument: {}", other);
                std::process::exit(1);
            }
        }
        i += 1;
    }

    let settings = load_settings(config_path)?;
    let session = CameraSession::new(Arc::new(FakeCameraProvider::new()), settings)?;

    let outcome = session
        .configure_session(session.default_configuration(sensors))
        .await?;
    let photo_paths: Vec<PathBuf> = outcome
        .sensors
        .iter()
        .enumerate()
        .map(|(n, _)| out_dir.join(format!("photo_{}.jpg", n)))
        .collect();
    let photos = session.take_photo(outcome.sensors.clone(), photo_paths).await?;

    let outcome = session.set_capture_mode(CaptureMode::Video).await?;
    let video_paths: Vec<PathBuf> = outcome
        .sensors
        .iter()
        .enumerate()
        .map(|(n, _)| out_dir.join(format!("video_{}.mp4", n)))
        .collect();
    session
        .start_recording(outcome.sensors.clone(), video_paths)
        .await?;
    tokio::time::sleep(Duration::from_millis(record_ms)).await;
    let videos = session.stop_recording().await?;

    let photos: Vec<String> = photos
        .into_iter()
        .map(|r| match r {
            Ok(path) => path.display().to_string(),
            Err(e) => format!("error: {}", e),
        })
        .collect();
    if json {
        let report = serde_json::json!({ "photos": photos, "videos": videos });
        println!("{}", serde_json::to_string(&report)?);
    } else {
        for photo in &photos {
            println!("photo: {}", photo);
        }
        for video in &videos {
            println!("video: {}", video.display());
        }
    }

    session.shutdown().await?;
    Ok(())
}
