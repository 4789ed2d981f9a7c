// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[yare::parameterized(
    color = { "\x1b[31merror:\x1b[0m boom", "error: boom" },
    cursor = { "\x1b[2Kprogress 50%", "progress 50%" },
    plain = { "no escapes here", "no escapes here" },
    multi = { "\x1b[1m\x1b[33mwarn\x1b[0m", "warn" },
)]
fn ansi_is_stripped(input: &str, expected: &str) {
    assert_eq!(strip_ansi(input), expected);
}

#[test]
fn ring_caps_at_capacity() {
    let ring = StderrRing::new(50);
    for i in 0..120 {
        ring.push(&format!("line {i}"));
    }
    let lines = ring.snapshot();
    assert_eq!(lines.len(), 50);
    assert_eq!(lines[0], "line 70");
    assert_eq!(lines[49], "line 119");
}

#[test]
fn stored_lines_are_ansi_free() {
    let ring = StderrRing::new(50);
    ring.push("\x1b[31mpanic:\x1b[0m something broke\r");
    assert_eq!(ring.snapshot(), vec!["panic: something broke"]);
}

#[test]
fn joined_uses_semicolons() {
    let ring = StderrRing::new(10);
    ring.push("first");
    ring.push("second");
    assert_eq!(ring.joined(), "first; second");
}

#[test]
fn clear_empties_the_ring() {
    let ring = StderrRing::new(10);
    ring.push("line");
    assert!(!ring.is_empty());
    ring.clear();
    assert!(ring.is_empty());
    assert_eq!(ring.len(), 0);
}
