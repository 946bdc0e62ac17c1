//! End-to-end tests through the public API: config → service → render.
//!
//! External tools are replaced by a scripted runner, so these tests exercise
//! resolution, planning, caching and renderer selection without ImageMagick
//! or Kakadu installed.

use iiif_render::config::{CacheBackend, Config, RendererBackend};
use iiif_render::image::{ImageService, RenderError};
use iiif_render::imaging::{BackendError, CommandRunner, ShellCommand};
use iiif_render::transform::RenderParams;
use iiif_render::warm::{self, WarmRequest};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Answers `identify` with fixed dimensions and everything else with a
/// payload naming the program, recording each command line.
struct ScriptedRunner {
    dimensions: &'static str,
    broken: bool,
    log: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    fn new(dimensions: &'static str) -> Arc<Self> {
        Arc::new(Self {
            dimensions,
            broken: false,
            log: Mutex::new(Vec::new()),
        })
    }

    fn broken() -> Arc<Self> {
        Arc::new(Self {
            dimensions: "1x1",
            broken: true,
            log: Mutex::new(Vec::new()),
        })
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

impl CommandRunner for ScriptedRunner {
    fn execute(&self, command: &ShellCommand) -> Result<Vec<u8>, BackendError> {
        self.log.lock().unwrap().push(command.to_string());
        if self.broken {
            return Err(BackendError::CommandFailed {
                command: command.to_string(),
                status: "exit status: 127".into(),
                stderr: "not installed".into(),
            });
        }
        if command.program == "identify" {
            return Ok(self.dimensions.as_bytes().to_vec());
        }
        Ok(format!("output of {}", command.program).into_bytes())
    }
}

fn params(pairs: &[(&str, &str)]) -> RenderParams {
    RenderParams::from_pairs(pairs.iter().copied())
}

/// Config rooted in `tmp`: sources under `images/`, disk cache in `cache/`.
fn config(tmp: &Path) -> Config {
    let mut config = Config::default();
    config.resolver.base_paths = vec![tmp.join("images")];
    config.cache.backend = CacheBackend::Disk;
    config.cache.directory = tmp.join("cache");
    config
}

fn add_source(tmp: &Path, name: &str) -> String {
    let dir = tmp.join("images");
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, b"source").unwrap();
    path.display().to_string()
}

#[test]
fn render_through_filesystem_resolver() {
    let tmp = TempDir::new().unwrap();
    let file = add_source(tmp.path(), "world.jpg");
    let runner = ScriptedRunner::new("131x175");
    let service = ImageService::from_config(&config(tmp.path()), runner.clone(), true).unwrap();

    let bytes = service
        .image("world")
        .render(&params(&[("region", "square"), ("size", "!150,75"), ("format", "png")]))
        .unwrap();

    assert_eq!(bytes, b"output of convert");
    assert_eq!(
        runner.log(),
        vec![
            format!("identify -format %hx%w {file}"),
            format!("convert -crop 131x131+22+0 -resize 150x75 {file} png:-"),
        ]
    );
}

#[test]
fn disk_cache_survives_a_new_service() {
    let tmp = TempDir::new().unwrap();
    add_source(tmp.path(), "world.jpg");
    let request = params(&[("size", "50,"), ("format", "jpg")]);

    let first = ImageService::from_config(&config(tmp.path()), ScriptedRunner::new("1x1"), true)
        .unwrap()
        .image("world")
        .render(&request)
        .unwrap();

    // A service whose tools are all broken still answers from the cache
    let broken = ScriptedRunner::broken();
    let service = ImageService::from_config(&config(tmp.path()), broken.clone(), true).unwrap();
    let second = service.image("world").render(&request).unwrap();

    assert_eq!(first, second);
    assert!(broken.log().is_empty());
    assert_eq!(service.stats().to_string(), "1 cached, 0 rendered (1 total)");
}

#[test]
fn no_cache_always_renders() {
    let tmp = TempDir::new().unwrap();
    add_source(tmp.path(), "world.jpg");
    let runner = ScriptedRunner::new("1x1");
    let service = ImageService::from_config(&config(tmp.path()), runner.clone(), false).unwrap();
    let image = service.image("world");
    let request = params(&[("format", "jpg")]);

    image.render(&request).unwrap();
    image.render(&request).unwrap();

    assert_eq!(runner.log().len(), 2);
    assert!(!tmp.path().join("cache").exists());
}

#[test]
fn jpeg2000_sources_use_reduced_decode() {
    let tmp = TempDir::new().unwrap();
    let file = add_source(tmp.path(), "map.jp2");
    let mut config = config(tmp.path());
    config.renderer.backend = RendererBackend::Kakadu;
    config.renderer.threads = 2;
    let runner = ScriptedRunner::new("300x300");
    let service = ImageService::from_config(&config, runner.clone(), false).unwrap();

    let bytes = service
        .image("map")
        .render(&params(&[("size", "pct:20"), ("rotation", "90"), ("format", "jpg")]))
        .unwrap();
    assert_eq!(bytes, b"output of convert");

    let log = runner.log();
    assert_eq!(log.len(), 3);
    assert_eq!(log[0], format!("identify -format %hx%w {file}"));
    assert!(log[1].starts_with(&format!("kdu_expand -quiet -i {file} -reduce 2 -num_threads 2 -o ")));
    // 20% of the full image is 80% of the quarter-resolution decode
    assert!(log[2].starts_with("convert -resize 80% -virtual-pixel white +distort srt 90 "));
    assert!(log[2].ends_with(".bmp jpg:-"));
}

#[test]
fn jpeg_sources_skip_kakadu() {
    let tmp = TempDir::new().unwrap();
    let file = add_source(tmp.path(), "photo.jpg");
    let mut config = config(tmp.path());
    config.renderer.backend = RendererBackend::Kakadu;
    let service =
        ImageService::from_config(&config, ScriptedRunner::new("1x1"), false).unwrap();

    let plan = service
        .image("photo")
        .plan(&params(&[("quality", "bitonal"), ("format", "png")]))
        .unwrap();
    let lines: Vec<String> = plan.iter().map(ToString::to_string).collect();
    assert_eq!(
        lines,
        vec![format!("convert -colorspace Gray -type Bilevel {file} png:-")]
    );
}

#[test]
fn errors_are_classified() {
    let tmp = TempDir::new().unwrap();
    add_source(tmp.path(), "world.jpg");
    let service =
        ImageService::from_config(&config(tmp.path()), ScriptedRunner::broken(), false).unwrap();

    let bad_size = service
        .image("world")
        .render(&params(&[("size", "huge"), ("format", "jpg")]))
        .unwrap_err();
    assert_eq!(bad_size.to_string(), "Invalid size: huge");
    assert!(bad_size.is_caller_error());

    let missing = service
        .image("../world")
        .render(&params(&[("format", "jpg")]))
        .unwrap_err();
    assert!(matches!(missing, RenderError::SourceNotFound(_)));

    let failed = service
        .image("world")
        .render(&params(&[("format", "jpg")]))
        .unwrap_err();
    assert!(matches!(failed, RenderError::RenderFailure(_)));
    assert!(failed.is_retryable());
}

#[test]
fn warm_batch_fills_the_cache() {
    let tmp = TempDir::new().unwrap();
    add_source(tmp.path(), "world.jpg");
    add_source(tmp.path(), "moon.png");
    let runner = ScriptedRunner::new("1x1");
    let service = ImageService::from_config(&config(tmp.path()), runner.clone(), true).unwrap();

    let requests: Vec<WarmRequest> = serde_json::from_str(
        r#"[
            {"id": "world", "size": "100,", "format": "jpg"},
            {"id": "moon", "size": ",100", "format": "png"},
            {"id": "world", "size": "100,", "format": "jpg"}
        ]"#,
    )
    .unwrap();

    let outcomes = warm::warm(&service, requests);
    assert!(outcomes.iter().all(|o| o.result.is_ok()));
    // the duplicate request may race the first one and render too
    assert!((2..=3).contains(&runner.log().len()));
    assert_eq!(service.stats().total(), 3);

    let rerun = service
        .image("moon")
        .render(&params(&[("size", ",100"), ("format", "png")]))
        .unwrap();
    assert_eq!(rerun, b"output of convert");
    assert!(service.stats().hits() >= 1);
}
