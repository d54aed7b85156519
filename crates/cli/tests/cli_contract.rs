use assert_cmd::cargo::cargo_bin_cmd;
use lopdf::{dictionary, Document, Object, Stream};
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Two pages: 200x800 and 300x400 points.
fn write_sample_pdf(dir: &Path, name: &str) -> PathBuf {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let first = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), 200.into(), 800.into()],
    });
    let second = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), 300.into(), 400.into()],
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![first.into(), second.into()],
            "Count" => 2,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let path = dir.join(name);
    doc.save(&path).expect("fixture should be written");
    path
}

/// One 200x800 page painted solid black by its content stream.
fn write_black_pdf(dir: &Path, name: &str) -> PathBuf {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let content_id =
        doc.add_object(Stream::new(dictionary! {}, b"0 0 0 rg 0 0 200 800 re f".to_vec()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), 200.into(), 800.into()],
        "Contents" => content_id,
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let path = dir.join(name);
    doc.save(&path).expect("fixture should be written");
    path
}

/// Decoded RGB samples of the first image XObject in `path`.
fn embedded_image_samples(path: &Path) -> Vec<u8> {
    let doc = Document::load(path).expect("export should be a PDF");
    let stream = doc
        .objects
        .values()
        .filter_map(|object| object.as_stream().ok())
        .find(|stream| {
            stream.dict.get(b"Subtype").and_then(Object::as_name).ok() == Some(b"Image".as_slice())
        })
        .expect("cropped page should embed an image");
    stream.decompressed_content().unwrap_or_else(|_| stream.content.clone())
}

struct Workspace {
    temp: TempDir,
    pdf: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let pdf = write_sample_pdf(temp.path(), "sample.pdf");
        Self { temp, pdf }
    }

    fn config(&self) -> PathBuf {
        self.temp.path().join("settings.json")
    }

    fn out_dir(&self) -> PathBuf {
        self.temp.path().join("out")
    }

    fn cmd(&self) -> assert_cmd::Command {
        let mut cmd = cargo_bin_cmd!("pagemark-cli");
        cmd.arg("--config").arg(self.config()).env_remove("PAGEMARK_LOG");
        cmd
    }

    fn outputs(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(self.out_dir())
            .expect("output directory should exist")
            .map(|entry| entry.expect("dir entry").file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

fn stdout_json(output: &[u8]) -> Value {
    serde_json::from_slice(output).expect("stdout should contain valid json")
}

#[test]
fn info_reports_every_page_size() {
    let ws = Workspace::new();
    let output = ws.cmd().arg("info").arg(&ws.pdf).assert().success().get_output().stdout.clone();

    let value = stdout_json(&output);
    assert_eq!(value["page_count"], 2);
    assert_eq!(value["pages"][0]["width"], 200.0);
    assert_eq!(value["pages"][0]["height"], 800.0);
    assert_eq!(value["pages"][1]["width"], 300.0);
    assert_eq!(value["pages"][1]["height"], 400.0);
}

#[test]
fn render_writes_png_at_display_scale() {
    let ws = Workspace::new();
    let output_path = ws.temp.path().join("page.png");

    ws.cmd()
        .args(["render", "--page", "2", "--zoom", "2", "--output"])
        .arg(&output_path)
        .arg(&ws.pdf)
        .assert()
        .success();

    let image = image::open(&output_path).expect("output should be a readable image");
    assert_eq!((image.width(), image.height()), (900, 1200));
}

#[test]
fn highlight_writes_dated_copy() {
    let ws = Workspace::new();

    ws.cmd()
        .arg("highlight")
        .arg(&ws.pdf)
        .args(["--rect", "1:100,100,50,50", "--rect", "2:10,10,40,40@Blue", "--canvas", "400x1200"])
        .arg("--out-dir")
        .arg(ws.out_dir())
        .assert()
        .success()
        .stdout(predicate::str::contains("highlighted-sample-"));

    let names = ws.outputs();
    assert_eq!(names.len(), 1);
    assert!(names[0].starts_with("highlighted-sample-") && names[0].ends_with(".pdf"), "{names:?}");

    let doc = Document::load(ws.out_dir().join(&names[0])).expect("export should be a PDF");
    assert_eq!(doc.get_pages().len(), 2);
}

#[test]
fn crop_writes_single_page_sized_to_selection() {
    let ws = Workspace::new();

    ws.cmd()
        .arg("crop")
        .arg(&ws.pdf)
        .args(["--page", "1", "--rect", "0,0,100,100", "--canvas", "400x1200"])
        .args(["--highlight", "50,50,100,100@Pink"])
        .arg("--out-dir")
        .arg(ws.out_dir())
        .assert()
        .success();

    let names = ws.outputs();
    assert!(names[0].starts_with("cropped-page1-sample-"), "{names:?}");

    let doc = Document::load(ws.out_dir().join(&names[0])).expect("export should be a PDF");
    let pages = doc.get_pages();
    assert_eq!(pages.len(), 1);
    let page = doc.get_dictionary(pages[&1]).expect("page dictionary");
    let media: Vec<f32> = page
        .get(b"MediaBox")
        .and_then(Object::as_array)
        .expect("media box")
        .iter()
        .map(|value| value.as_float().expect("number"))
        .collect();
    assert!((media[2] - 50.0).abs() < 1e-2, "{media:?}");
    assert!((media[3] - 66.667).abs() < 1e-2, "{media:?}");
}

#[test]
fn crop_carries_rendered_page_content() {
    let ws = Workspace::new();
    let black = write_black_pdf(ws.temp.path(), "black.pdf");

    ws.cmd()
        .args(["--engine", "lopdf", "crop"])
        .arg(&black)
        .args(["--page", "1", "--rect", "50,50,100,100", "--canvas", "300x1200"])
        .arg("--out-dir")
        .arg(ws.out_dir())
        .assert()
        .success();

    let names = ws.outputs();
    let samples = embedded_image_samples(&ws.out_dir().join(&names[0]));
    assert!(!samples.is_empty());
    let dark = samples.iter().filter(|&&sample| sample < 32).count();
    assert!(dark * 10 >= samples.len() * 9, "{dark} of {} samples are dark", samples.len());
}

#[test]
fn crop_of_blank_page_stays_white() {
    let ws = Workspace::new();

    ws.cmd()
        .args(["--engine", "lopdf", "crop"])
        .arg(&ws.pdf)
        .args(["--page", "1", "--rect", "50,50,100,100", "--canvas", "300x1200"])
        .arg("--out-dir")
        .arg(ws.out_dir())
        .assert()
        .success();

    let names = ws.outputs();
    let samples = embedded_image_samples(&ws.out_dir().join(&names[0]));
    assert!(samples.iter().all(|&sample| sample > 224));
}

#[test]
fn pdfium_engine_request_fails_without_support() {
    let ws = Workspace::new();
    if cfg!(feature = "pdfium") {
        return;
    }

    ws.cmd()
        .args(["--engine", "pdfium", "render", "--output"])
        .arg(ws.temp.path().join("page.png"))
        .arg(&ws.pdf)
        .assert()
        .failure()
        .stderr(predicate::str::contains("PDFium rendering is not available"));
}

#[test]
fn crop_rejects_empty_selection() {
    let ws = Workspace::new();

    ws.cmd()
        .arg("crop")
        .arg(&ws.pdf)
        .args(["--rect", "10,10,0,20", "--canvas", "400x1200"])
        .arg("--out-dir")
        .arg(ws.out_dir())
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid crop area"));

    assert!(!ws.out_dir().exists());
}

#[test]
fn non_pdf_upload_is_rejected() {
    let ws = Workspace::new();
    let text = ws.temp.path().join("notes.txt");
    fs::write(&text, "hello").expect("write fixture");

    ws.cmd()
        .arg("info")
        .arg(&text)
        .assert()
        .failure()
        .stderr(predicate::str::contains("valid PDF file"));
}

#[test]
fn oversized_upload_is_rejected() {
    let ws = Workspace::new();
    fs::write(ws.config(), r#"{"version":1,"settings":{"max_upload_bytes":64}}"#)
        .expect("write settings");

    ws.cmd()
        .arg("info")
        .arg(&ws.pdf)
        .assert()
        .failure()
        .stderr(predicate::str::contains("file size too large"));
}

#[test]
fn info_fails_for_missing_file() {
    let ws = Workspace::new();

    ws.cmd()
        .arg("info")
        .arg(ws.temp.path().join("missing.pdf"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("file does not exist"));
}

#[test]
fn info_fails_for_invalid_pdf() {
    let ws = Workspace::new();
    let broken = ws.temp.path().join("broken.pdf");
    fs::write(&broken, "%PDF-1.4\nnot really").expect("write fixture");

    ws.cmd()
        .arg("info")
        .arg(&broken)
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to open PDF"));
}

#[test]
fn replay_runs_gesture_script() {
    let ws = Workspace::new();
    let script = ws.temp.path().join("script.json");
    fs::write(
        &script,
        r#"{"steps":[
            {"op":"mode","mode":"highlight"},
            {"op":"down","x":10,"y":10},
            {"op":"move","x":60,"y":60},
            {"op":"up","x":60,"y":60},
            {"op":"down","x":0,"y":0},
            {"op":"up","x":5,"y":5},
            {"op":"export_highlighted"},
            {"op":"mode","mode":"crop"},
            {"op":"down","x":0,"y":0},
            {"op":"move","x":100,"y":100},
            {"op":"up","x":100,"y":100},
            {"op":"export_cropped"},
            {"op":"zoom_in"}
        ]}"#,
    )
    .expect("write script");

    let output = ws
        .cmd()
        .arg("replay")
        .arg(&ws.pdf)
        .arg("--script")
        .arg(&script)
        .arg("--out-dir")
        .arg(ws.out_dir())
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let summary = stdout_json(&output);
    assert_eq!(summary["file"], "sample.pdf");
    assert_eq!(summary["mode"], "crop");
    assert_eq!(summary["zoom_label"], "125%");
    assert_eq!(summary["viewer"]["state"], "ready");
    assert_eq!(summary["highlights"].as_array().map(Vec::len), Some(1));
    assert_eq!(summary["highlights"][0]["id"], "1-1");
    assert_eq!(summary["highlights"][0]["x"], 12.5);
    assert_eq!(summary["highlights"][0]["color"], "rgba(255, 255, 0, 0.4)");
    assert_eq!(summary["crop_area"]["width"], 125.0);
    assert_eq!(summary["exports"].as_array().map(Vec::len), Some(2));
    assert!(summary.get("overlays").is_none());

    let names = ws.outputs();
    assert!(names[0].starts_with("cropped-page1-sample-"), "{names:?}");
    assert!(names[1].starts_with("highlighted-sample-"), "{names:?}");
}

#[test]
fn replay_reports_overlays_on_a_scaled_element() {
    let ws = Workspace::new();
    let script = ws.temp.path().join("script.json");
    // The 300x1200 surface at 100% zoom is displayed at half size.
    fs::write(
        &script,
        r#"{"element":{"left":10,"top":20,"width":150,"height":600},"steps":[
            {"op":"mode","mode":"highlight"},
            {"op":"down","x":20,"y":30},
            {"op":"move","x":45,"y":55},
            {"op":"up","x":45,"y":55}
        ]}"#,
    )
    .expect("write script");

    let output = ws
        .cmd()
        .args(["--engine", "lopdf", "replay"])
        .arg(&ws.pdf)
        .arg("--script")
        .arg(&script)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let summary = stdout_json(&output);
    assert_eq!(summary["highlights"][0]["x"], 20.0);
    assert_eq!(summary["highlights"][0]["width"], 50.0);
    let overlays = summary["overlays"].as_array().expect("overlays should be reported");
    assert_eq!(overlays.len(), 1);
    assert_eq!(overlays[0]["kind"], "highlight");
    assert_eq!(overlays[0]["rect"]["x"], 20.0);
    assert_eq!(overlays[0]["rect"]["y"], 30.0);
    assert_eq!(overlays[0]["rect"]["width"], 25.0);
}

#[test]
fn replay_stops_on_failed_export() {
    let ws = Workspace::new();
    let script = ws.temp.path().join("script.json");
    fs::write(&script, r#"{"steps":[{"op":"export_highlighted"}]}"#).expect("write script");

    ws.cmd()
        .arg("replay")
        .arg(&ws.pdf)
        .arg("--script")
        .arg(&script)
        .assert()
        .failure()
        .stderr(predicate::str::contains("no file or highlights"));
}

#[test]
fn config_init_then_show() {
    let ws = Workspace::new();

    ws.cmd().args(["config", "init"]).assert().success();
    assert!(ws.config().exists());

    ws.cmd()
        .args(["config", "init"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exist"));

    let output = ws.cmd().args(["config", "show"]).assert().success().get_output().stdout.clone();
    let value = stdout_json(&output);
    assert_eq!(value["settings"]["default_highlight_color"], "Yellow");
    assert_eq!(value["settings"]["max_upload_bytes"], 50 * 1024 * 1024);
}
