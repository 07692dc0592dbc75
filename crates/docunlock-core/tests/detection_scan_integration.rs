/// Detection and batch scanning over real directory trees
use docunlock_core::events::tracing_sink;
use docunlock_core::{DetectionStatus, Engine, EngineConfig, EventKind, EventLog, Settings};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

fn pdf_config() -> EngineConfig {
    let mut headers = BTreeMap::new();
    headers.insert("25504446".to_string(), "PDF".to_string());
    headers.insert("000000".to_string(), "PDF_ENCRYPTED".to_string());
    EngineConfig {
        extensions: vec![".pdf".to_string()],
        headers,
        settings: Settings {
            max_threads: 3,
            ..Settings::default()
        },
    }
}

fn write(path: &Path, bytes: &[u8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, bytes).unwrap();
}

#[test]
fn plain_pdf_is_unencrypted_with_label() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("a.pdf");
    write(&path, b"%PDF-1.4\n1 0 obj");

    let engine = Engine::from_config(pdf_config(), tracing_sink()).unwrap();
    let result = engine.detect(&path);
    assert_eq!(result.status, DetectionStatus::Unencrypted);
    assert_eq!(result.matched_label.as_deref(), Some("PDF"));
    assert!(result.error_detail.is_none());
}

#[test]
fn encrypted_marker_is_encrypted() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("b.pdf");
    write(&path, &[0x00, 0x00, 0x00, 0x42, 0x13, 0x37]);

    let engine = Engine::from_config(pdf_config(), tracing_sink()).unwrap();
    let result = engine.detect(&path);
    assert_eq!(result.status, DetectionStatus::Encrypted);
    assert_eq!(result.matched_label.as_deref(), Some("PDF_ENCRYPTED"));
}

#[test]
fn unregistered_extension_ignores_content() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("b.bin");
    write(&path, &[0x00, 0x00, 0x00, 0x42]);

    let engine = Engine::from_config(pdf_config(), tracing_sink()).unwrap();
    let result = engine.detect(&path);
    assert_eq!(result.status, DetectionStatus::Unrecognized);
    assert!(result.note.unwrap().contains(".bin"));
}

#[test]
fn empty_and_short_files_are_unrecognized() {
    let dir = TempDir::new().unwrap();
    let empty = dir.path().join("empty.pdf");
    let short = dir.path().join("short.pdf");
    write(&empty, b"");
    write(&short, b"%P");

    let engine = Engine::from_config(pdf_config(), tracing_sink()).unwrap();
    assert_eq!(engine.detect(&empty).status, DetectionStatus::Unrecognized);
    assert_eq!(engine.detect(&short).status, DetectionStatus::Unrecognized);
}

#[test]
fn default_config_recognizes_office_containers() {
    let dir = TempDir::new().unwrap();
    let docx = dir.path().join("report.DOCX");
    let doc = dir.path().join("legacy.doc");
    write(&docx, b"PK\x03\x04\x14\x00\x06\x00");
    write(&doc, &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1, 0x00]);

    let engine = Engine::from_config(EngineConfig::default(), tracing_sink()).unwrap();
    let result = engine.detect(&docx);
    assert_eq!(result.status, DetectionStatus::Unencrypted);
    assert_eq!(result.matched_label.as_deref(), Some("OOXML"));
    assert_eq!(
        engine.detect(&doc).matched_label.as_deref(),
        Some("OLE2")
    );
}

#[test]
fn recursive_scan_reports_sorted_entries() {
    let dir = TempDir::new().unwrap();
    write(&dir.path().join("z").join("c.pdf"), b"%PDF-1.7");
    write(&dir.path().join("a").join("deep").join("b.pdf"), &[0, 0, 0, 1]);
    write(&dir.path().join("a").join("a.pdf"), b"%PDF-1.4");

    let engine = Engine::from_config(pdf_config(), tracing_sink()).unwrap();
    let report = engine.scan(&[dir.path().to_path_buf()], true);

    let paths: Vec<PathBuf> = report.results.iter().map(|r| r.path.clone()).collect();
    assert_eq!(
        paths,
        vec![
            dir.path().join("a").join("a.pdf"),
            dir.path().join("a").join("deep").join("b.pdf"),
            dir.path().join("z").join("c.pdf"),
        ]
    );
    assert_eq!(report.results[1].status, DetectionStatus::Encrypted);
    assert!(!report.cancelled);

    let summary = report.summary();
    assert_eq!(summary.total, 3);
    assert_eq!(summary.encrypted, 1);
    assert_eq!(summary.unencrypted, 2);
}

#[test]
fn scanning_twice_gives_identical_results() {
    let dir = TempDir::new().unwrap();
    for i in 0..12 {
        let bytes: &[u8] = if i % 3 == 0 { &[0, 0, 0, 9] } else { b"%PDF-1.5" };
        write(&dir.path().join(format!("sub{}", i % 4)).join(format!("f{}.pdf", i)), bytes);
    }
    write(&dir.path().join("readme.txt"), b"hello");

    let engine = Engine::from_config(pdf_config(), tracing_sink()).unwrap();
    let first = engine.scan(&[dir.path().to_path_buf()], true);
    let second = engine.scan(&[dir.path().to_path_buf()], true);

    assert_eq!(first.results, second.results);
    assert_ne!(first.run_id, second.run_id);
    assert_eq!(first.results.len(), 13);
}

#[test]
fn mixed_inputs_keep_errors_in_the_report() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("single.pdf");
    write(&file, b"%PDF-1.4");
    write(&dir.path().join("folder").join("inner.pdf"), b"%PDF-1.4");
    let missing = dir.path().join("missing.pdf");

    let engine = Engine::from_config(pdf_config(), tracing_sink()).unwrap();
    let report = engine.scan(
        &[missing.clone(), file.clone(), dir.path().join("folder")],
        false,
    );

    assert_eq!(report.results.len(), 3);
    assert_eq!(report.results[0].path, missing);
    assert_eq!(report.results[0].status, DetectionStatus::Error);
    assert!(report.results[0].error_detail.is_some());
    assert_eq!(report.results[1].status, DetectionStatus::Unencrypted);
    assert_eq!(report.results[2].path, dir.path().join("folder").join("inner.pdf"));
}

#[test]
fn unknown_header_is_logged_distinctly() {
    let dir = TempDir::new().unwrap();
    write(&dir.path().join("odd.pdf"), b"\x7fELF\x02\x01\x01");

    let log = Arc::new(EventLog::new());
    let engine = Engine::from_config(pdf_config(), log.clone()).unwrap();
    let report = engine.scan(&[dir.path().to_path_buf()], true);

    assert_eq!(report.results[0].status, DetectionStatus::Unrecognized);
    let unknown = log.entries_by_kind(EventKind::UnknownHeader);
    assert_eq!(unknown.len(), 1);
    assert_eq!(unknown[0].run_id.as_deref(), Some(report.run_id.as_str()));
    assert_eq!(log.entries_by_kind(EventKind::ScanCompleted).len(), 1);
}

#[cfg(unix)]
#[test]
fn symlink_cycles_terminate() {
    let dir = TempDir::new().unwrap();
    write(&dir.path().join("docs").join("a.pdf"), b"%PDF-1.4");
    std::os::unix::fs::symlink(dir.path(), dir.path().join("docs").join("back")).unwrap();
    std::os::unix::fs::symlink(
        dir.path().join("nowhere"),
        dir.path().join("docs").join("broken.pdf"),
    )
    .unwrap();

    let engine = Engine::from_config(pdf_config(), tracing_sink()).unwrap();
    let report = engine.scan(&[dir.path().to_path_buf()], true);

    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].path, dir.path().join("docs").join("a.pdf"));
}
