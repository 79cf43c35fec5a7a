//! Integration tests for output capture
//!
//! These exercise the public streaming contract with /bin/sh payloads.

use codebox::exec::{OutputCapture, OutputEvent, RunContext, StreamState};
use crossbeam_channel::select;
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn sh(script: &str) -> Command {
    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c").arg(script);
    cmd
}

fn process_alive(pid: i32) -> bool {
    // zombies left for a non-reaping init count as gone
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => stat
            .rsplit(')')
            .next()
            .and_then(|rest| rest.split_whitespace().next())
            .map(|state| state != "Z")
            .unwrap_or(false),
        Err(_) => false,
    }
}

#[test]
fn test_manual_drain_after_done_loses_nothing() {
    // A consumer written against the raw channels: read both streams while
    // watching done, then drain whatever is buffered.
    for _ in 0..25 {
        let streams = OutputCapture::new(Duration::from_secs(10))
            .capture(
                &RunContext::background(),
                sh("head -c 300000 /dev/zero; head -c 70000 /dev/zero >&2; echo tail"),
            )
            .unwrap();

        let closed = crossbeam_channel::never::<Vec<u8>>();
        let (mut out, mut err) = (Vec::new(), Vec::new());
        let mut stdout_open = true;
        let mut stderr_open = true;
        let report = loop {
            select! {
                recv(streams.done()) -> report => break report.unwrap(),
                recv(if stdout_open { streams.stdout() } else { &closed }) -> chunk => match chunk {
                    Ok(c) => out.extend(c),
                    Err(_) => stdout_open = false,
                },
                recv(if stderr_open { streams.stderr() } else { &closed }) -> chunk => match chunk {
                    Ok(c) => err.extend(c),
                    Err(_) => stderr_open = false,
                },
            }
        };
        out.extend(streams.stdout().try_iter().flatten());
        err.extend(streams.stderr().try_iter().flatten());

        assert!(report.success());
        assert_eq!(out.len(), 300000 + "tail\n".len());
        assert!(out.ends_with(b"tail\n"));
        assert_eq!(err.len(), 70000);
    }
}

#[test]
fn test_streaming_events_arrive_before_exit() {
    let mut streams = OutputCapture::new(Duration::from_secs(10))
        .capture(&RunContext::background(), sh("echo first; sleep 1; echo second"))
        .unwrap();

    let started = Instant::now();
    let first = streams.next_event().unwrap();
    assert_eq!(first, OutputEvent::Stdout(b"first\n".to_vec()));
    assert!(started.elapsed() < Duration::from_millis(900));
    assert_eq!(streams.state(), StreamState::Producing);

    let rest = streams.collect();
    assert_eq!(rest.stdout, b"second\n");
}

#[test]
fn test_timeout_leaves_no_process_behind() {
    let streams = OutputCapture::new(Duration::from_millis(500))
        .capture(
            &RunContext::background(),
            sh("sleep 30 & echo $!; sleep 30"),
        )
        .unwrap();
    let started = Instant::now();
    let out = streams.collect();

    assert!(out.report.timed_out);
    assert!(started.elapsed() < Duration::from_secs(5));
    let child: i32 = String::from_utf8(out.stdout).unwrap().trim().parse().unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    while process_alive(child) && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    assert!(!process_alive(child), "background child {} survived", child);
}

#[test]
fn test_exit_hook_runs_before_done() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut capture = OutputCapture::new(Duration::from_millis(200));
    let counter = Arc::clone(&calls);
    capture.set_after_exit_hook(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let streams = capture
        .capture(&RunContext::background(), sh("sleep 10"))
        .unwrap();
    let report = streams.done().recv().unwrap();
    assert!(report.timed_out);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(streams.done().recv().is_err(), "done fired twice");
}

#[test]
fn test_dropped_consumer_does_not_hang_the_child() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut capture = OutputCapture::new(Duration::from_secs(10));
    let counter = Arc::clone(&calls);
    capture.set_after_exit_hook(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let streams = capture
        .capture(&RunContext::background(), sh("head -c 4000000 /dev/zero"))
        .unwrap();
    drop(streams);

    let deadline = Instant::now() + Duration::from_secs(5);
    while calls.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
