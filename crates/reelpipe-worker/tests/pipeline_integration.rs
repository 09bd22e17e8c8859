//! End-to-end processing against real ffmpeg binaries.

use std::path::Path;
use std::sync::Arc;

use reelpipe_media::{probe_video, PipelineConfig, TranscodePipeline, WatermarkConfig};
use reelpipe_models::{OutputFormat, VideoId, VideoProcessingTask, VideoRecord, VideoStatus};
use reelpipe_storage::{LocalStorage, LocalStorageConfig, StorageBackend};
use reelpipe_worker::{InMemoryVideoRecords, VideoProcessor, VideoRecordGateway};
use tempfile::TempDir;
use tokio::process::Command;

async fn ffmpeg(args: &[&str]) {
    let status = Command::new("ffmpeg")
        .args(["-y", "-hide_banner", "-v", "error"])
        .args(args)
        .status()
        .await
        .expect("Failed to run ffmpeg");
    assert!(status.success(), "ffmpeg {:?} failed", args);
}

async fn make_source(path: &Path, seconds: u32) {
    let video = format!("testsrc=duration={seconds}:size=640x360:rate=25");
    let audio = format!("sine=duration={seconds}");
    ffmpeg(&[
        "-f", "lavfi", "-i", &video,
        "-f", "lavfi", "-i", &audio,
        "-shortest", "-c:v", "libx264", "-preset", "ultrafast", "-c:a", "aac",
        path.to_str().unwrap(),
    ])
    .await;
}

async fn make_watermark(path: &Path) {
    ffmpeg(&[
        "-f", "lavfi", "-i", "color=c=white:s=64x32",
        "-frames:v", "1",
        path.to_str().unwrap(),
    ])
    .await;
}

struct Setup {
    dir: TempDir,
    storage: Arc<LocalStorage>,
    records: Arc<InMemoryVideoRecords>,
}

impl Setup {
    async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(LocalStorageConfig {
            upload_dir: dir.path().join("uploads").to_string_lossy().to_string(),
            processed_dir: dir.path().join("processed").to_string_lossy().to_string(),
        });
        storage.ensure_dirs().await.unwrap();
        Self {
            dir,
            storage: Arc::new(storage),
            records: Arc::new(InMemoryVideoRecords::new()),
        }
    }

    async fn upload(&self, id: &str, seconds: u32) -> VideoId {
        let local = self.dir.path().join(format!("{id}-src.mp4"));
        make_source(&local, seconds).await;

        let location = format!("uploads/{id}.mp4");
        self.storage.upload_from_local(&local, &location).await.unwrap();

        let video_id = VideoId::from_string(id);
        self.records
            .insert(VideoRecord::uploaded(video_id.clone(), location))
            .await;
        video_id
    }

    fn processor(&self, watermark: WatermarkConfig) -> VideoProcessor {
        let config = PipelineConfig {
            max_duration_secs: 30.0,
            format: OutputFormat::default(),
            watermark,
            step_timeout_secs: 120,
        };
        VideoProcessor::new(
            self.storage.clone(),
            self.records.clone(),
            TranscodePipeline::ffmpeg(config),
            self.dir.path().join("work"),
        )
    }
}

#[tokio::test]
#[ignore = "requires ffmpeg"]
async fn test_long_video_trimmed_silent_and_watermarked() {
    let setup = Setup::new().await;
    let id = setup.upload("v1", 45).await;
    let watermark = setup.dir.path().join("wm.png");
    make_watermark(&watermark).await;

    let outcome = setup
        .processor(WatermarkConfig::from_path(&watermark))
        .process(&VideoProcessingTask::new(id.clone()))
        .await
        .expect("processing failed");

    assert!(outcome.report.trimmed);
    assert!(outcome.report.watermarked);

    let output = setup.dir.path().join("processed").join("v1_processed.mp4");
    let info = probe_video(&output).await.unwrap();
    assert!((info.duration - 30.0).abs() < 1.0, "duration {}", info.duration);
    assert!(!info.has_audio);
    assert_eq!((info.width, info.height), (1280, 720));

    let record = setup.records.get_by_id(&id).await.unwrap().unwrap();
    assert_eq!(record.status, VideoStatus::Processed);
}

#[tokio::test]
#[ignore = "requires ffmpeg"]
async fn test_missing_watermark_still_succeeds() {
    let setup = Setup::new().await;
    let id = setup.upload("v2", 5).await;

    let outcome = setup
        .processor(WatermarkConfig::from_path(setup.dir.path().join("absent.png")))
        .process(&VideoProcessingTask::new(id.clone()))
        .await
        .expect("processing failed");

    assert!(!outcome.report.trimmed);
    assert!(!outcome.report.watermarked);
    assert!(setup
        .storage
        .exists("processed/v2_processed.mp4")
        .await
        .unwrap());
}
