use std::fs;

use assert_cmd::Command;
use predicates::str::{contains, diff};

fn chisel() -> Command {
    Command::cargo_bin("chisel").unwrap()
}

#[test]
fn runs_without_arguments() {
    chisel().assert().success().stdout(contains("chisel"));
}

#[test]
fn checks_valid_source() {
    chisel()
        .arg("check")
        .arg("tests/files/add.c8s")
        .assert()
        .success()
        .stdout(contains("no errors found!"));
}

#[test]
fn rejects_broken_source() {
    chisel()
        .arg("check")
        .arg("tests/files/bad/broken.c8s")
        .assert()
        .failure()
        .stderr(contains("parse::unknown_instruction"))
        .stderr(contains("Assembly failed"));
}

#[test]
fn rejects_unknown_extension() {
    chisel()
        .arg("run")
        .arg("Cargo.toml")
        .assert()
        .failure()
        .stderr(contains("unknown extension"));
}

#[test]
fn compiles_to_binary() {
    let dest = std::env::temp_dir().join(format!("chisel-add-{}.ch8", std::process::id()));
    chisel()
        .arg("compile")
        .arg("tests/files/add.c8s")
        .arg(&dest)
        .assert()
        .success()
        .stdout(contains("8 bytes"));

    let bytes = fs::read(&dest).unwrap();
    let _ = fs::remove_file(&dest);
    assert_eq!(bytes, [0x60, 0x14, 0x61, 0x16, 0x80, 0x14, 0x12, 0x06]);
}

#[test]
fn runs_to_breakpoint() {
    let registers = "\
V0 42
V1 22
V2 0
V3 0
V4 0
V5 0
V6 0
V7 0
V8 0
V9 0
VA 0
VB 0
VC 0
VD 0
VE 0
VF 0
PC 518
I 0
SP 0
";
    let assert = chisel()
        .args(["run", "tests/files/add.c8s", "--minimal", "--break", "done"])
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    assert!(stdout.starts_with(registers), "{}", stdout);
}

#[test]
fn breaks_at_numeric_address() {
    chisel()
        .args(["run", "tests/files/add.c8s", "--minimal", "-b", "0x204"])
        .assert()
        .success()
        .stdout(contains("V0 20\nV1 22\n"))
        .stdout(contains("PC 516\n"));
}

#[test]
fn draws_glyph() {
    let assert = chisel()
        .args(["run", "tests/files/glyph.c8s", "--minimal", "--break", "done"])
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let frame: Vec<&str> = stdout.lines().skip(19).take(6).collect();
    let blank = ".".repeat(64);
    let row = |pattern: &str| format!("{}{}", pattern, ".".repeat(60));
    assert_eq!(
        frame,
        [row("####"), row("...#"), row("..#."), row(".#.."), row(".#.."), blank]
    );
}

#[test]
fn counts_down_delay_timer() {
    chisel()
        .args(["run", "tests/files/subroutine.c8s", "--minimal", "--break", "done"])
        .assert()
        .success()
        .stdout(contains("V4 1\n"))
        .stdout(contains("SP 0\n"));
}

#[test]
fn loads_data_through_index() {
    chisel()
        .args(["run", "tests/files/data.c8s", "--minimal", "--break", "done"])
        .assert()
        .success()
        .stdout(contains("V0 1\nV1 2\nV2 3\nV3 8\n"))
        .stdout(contains("I 532\n"));
}

#[test]
fn unknown_breakpoint_label_fails() {
    chisel()
        .args(["run", "tests/files/add.c8s", "--break", "nowhere"])
        .assert()
        .failure()
        .stderr(contains("Unknown label 'nowhere'"));
}

#[test]
fn stops_on_timeout() {
    chisel()
        .args(["run", "tests/files/add.c8s", "--minimal", "--timeout", "50"])
        .assert()
        .success()
        .stdout(contains("V0 42\n"))
        .stdout(contains("PC 518\n"));
}

#[test]
fn reports_fault_in_binary() {
    chisel()
        .args(["run", "tests/files/illegal.ch8", "--minimal"])
        .assert()
        .failure()
        .stdout(contains("PC 512\n"))
        .stderr(contains("illegal instruction 0xffff at address 0x200"));
}

#[test]
fn rejects_invalid_machine() {
    chisel()
        .args(["run", "tests/files/add.c8s", "--machine", "width=60"])
        .assert()
        .failure()
        .stderr(contains("not a multiple of 8"));
}

#[test]
fn every_sample_assembles() {
    for entry in glob::glob("tests/files/*.c8s").unwrap() {
        let path = entry.unwrap();
        chisel()
            .arg("check")
            .arg(&path)
            .arg("--origin")
            .arg("0x200")
            .assert()
            .success()
            .stderr(diff(""));
    }
}
