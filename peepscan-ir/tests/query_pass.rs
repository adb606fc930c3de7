// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::time::Duration;

use peepscan_ir::ir::PrintMode;
use peepscan_ir::report::{Progress, ScanDriver, SystemClock, TopClasses};
use peepscan_ir::summary::build_index;

fn write_corpus(dir: &std::path::Path, name: &str, text: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, text).unwrap();
    path
}

#[test]
fn top_classes_report_over_hinted_files() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    // The ret-only shape appears three times across two files; the
    // const/ret shape once.
    let a = write_corpus(
        dir.path(),
        "a.bb",
        "fn f {\n block a:\n  ret()\n block b:\n  ret()\n}\n",
    );
    let b = write_corpus(
        dir.path(),
        "b.bb",
        "fn g {\n block a:\n  ret()\n}\nfn h {\n block a:\n  r1 = const()\n  ret(r1)\n}\n",
    );

    let clock = SystemClock;
    let mut progress = Progress::new(&clock, Duration::from_secs(3600));
    let (index, _) = build_index(&[a.clone(), b.clone()], 4, 1, &mut progress).unwrap();

    let hinted = index.hinted_files(2).expect("all classes have hints");
    assert_eq!(
        hinted,
        vec![a.display().to_string(), b.display().to_string()]
    );

    let mut driver = ScanDriver::new(1);
    driver.add_feature(Box::new(TopClasses::new(&index, 2, 2, PrintMode::Both)));

    let scan_files: Vec<PathBuf> = hinted.into_iter().map(PathBuf::from).collect();
    let mut progress = Progress::new(&clock, Duration::from_secs(3600));
    let mut out = Vec::new();
    driver.run(&scan_files, &index, &mut progress, &mut out).unwrap();

    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("#1 class 0 frequency 3"), "{}", text);
    assert!(text.contains("#2 class 1 frequency 1"), "{}", text);
    // Both render modes are present for the representatives.
    assert!(text.contains("ret()"), "{}", text);
    assert!(text.contains("digraph"), "{}", text);
}
