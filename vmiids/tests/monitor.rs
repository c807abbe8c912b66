//! Monitor protocol against scripted and socket-backed consoles.

mod common;

use std::{
    io::{BufRead, BufReader, Write},
    os::unix::net::UnixStream,
    thread,
    time::Duration,
};

use common::{scripted_monitor, scripted_vm};
use vmiids::monitor::{MonitorProtocol, ProtocolError, RunState, StreamConsole};

#[test]
fn info_version_returns_the_bare_body() {
    let (monitor, script) = scripted_monitor(&[("info version", "QEMU 0.12.5 (qemu-kvm-0.12.5)\r\n")]);

    assert_eq!(monitor.info_version().unwrap(), "QEMU 0.12.5 (qemu-kvm-0.12.5)\r\n");
    assert_eq!(monitor.send("info version").unwrap(), "QEMU 0.12.5 (qemu-kvm-0.12.5)\r\n");
    assert_eq!(script.lock().sent, ["info version", "info version"]);
}

#[test]
fn run_state_from_the_three_literal_replies() {
    let (running, _) = scripted_vm(&[("info status", "VM status: running\r\n")]);
    assert!(running.is_running().unwrap());

    let (paused, _) = scripted_vm(&[("info status", "VM status: paused\r\n")]);
    assert!(!paused.is_running().unwrap());
    assert_eq!(paused.run_state().unwrap(), RunState::Paused);

    let (odd, _) = scripted_vm(&[("info status", "VM status: shutdown\r\n")]);
    let err = odd.is_running().unwrap_err();
    assert!(matches!(err, ProtocolError::Unparseable { .. }), "{err}");
    assert!(err.is_abort());
}

#[test]
fn missing_prompt_kills_the_session() {
    let (monitor, script) = scripted_monitor(&[("info version", "QEMU 0.12.5\r\n")]);

    let err = monitor.info_status().unwrap_err();
    assert!(matches!(err, ProtocolError::PromptNotFound { .. }), "{err}");
    assert!(monitor.is_dead());

    // Fails fast without touching the console again.
    let err = monitor.info_version().unwrap_err();
    assert!(matches!(err, ProtocolError::SessionDead(_)), "{err}");
    assert_eq!(script.lock().sent, ["info status"]);
}

#[test]
fn multi_line_commands_are_refused_without_killing_the_session() {
    let (monitor, _) = scripted_monitor(&[("info name", "guest01\r\n")]);
    let err = monitor.send("info name\ninfo status").unwrap_err();
    assert!(!err.is_abort());
    assert_eq!(monitor.info_name().unwrap(), "guest01\r\n");
}

#[test]
fn wrappers_issue_their_fixed_commands() {
    let replies: Vec<(&str, &str)> = ["help", "info", "stop", "cont", "info kvm"].iter().map(|c| (*c, "")).collect();
    let (monitor, script) = scripted_monitor(&replies);

    monitor.help().unwrap();
    monitor.info_help().unwrap();
    monitor.cmd_stop().unwrap();
    monitor.cmd_cont().unwrap();
    assert_eq!(monitor.info_kvm().unwrap(), "");

    assert_eq!(script.lock().sent, ["help", "info", "stop", "cont", "info kvm"]);
}

#[test]
fn pause_and_resume_do_not_assume_state() {
    let (vm, script) = scripted_vm(&[("stop", ""), ("cont", ""), ("info status", "VM status: running\r\n")]);
    vm.pause().unwrap();
    vm.resume().unwrap();
    assert!(vm.is_running().unwrap());
    assert_eq!(script.lock().sent, ["stop", "cont", "info status"]);
}

/// Minimal QEMU stand-in on the far end of a socket pair.
fn fake_qemu(stream: UnixStream, lines: usize) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut writer = stream.try_clone().unwrap();
        writer
            .write_all(b"QEMU 0.12.5 monitor - type 'help' for more information\r\n(qemu) ")
            .unwrap();
        let mut reader = BufReader::new(stream);
        for _ in 0..lines {
            let mut line = String::new();
            if reader.read_line(&mut line).unwrap() == 0 {
                return;
            }
            let command = line.trim_end();
            let body = match command {
                "info name" => "guest01\r\n",
                "info status" => "VM status: paused\r\n",
                _ => "unknown command\r\n",
            };
            writer.write_all(format!("{command}\r\n{body}(qemu) ").as_bytes()).unwrap();
        }
    })
}

#[test]
fn stream_console_handshake_and_commands() {
    let (ours, theirs) = UnixStream::pair().unwrap();
    let server = fake_qemu(theirs, 2);

    let console = StreamConsole::from_unix(ours).unwrap();
    let monitor = MonitorProtocol::new(console, "(qemu)", Duration::from_secs(2));

    assert!(monitor.handshake().unwrap().starts_with("QEMU 0.12.5 monitor"));
    assert_eq!(monitor.info_name().unwrap(), "guest01\r\n");
    assert_eq!(monitor.info_status().unwrap(), "VM status: paused\r\n");
    server.join().unwrap();
}

#[test]
fn closed_console_is_an_abort() {
    let (ours, theirs) = UnixStream::pair().unwrap();
    let server = fake_qemu(theirs, 0);

    let monitor = MonitorProtocol::new(StreamConsole::from_unix(ours).unwrap(), "(qemu)", Duration::from_secs(2));
    monitor.handshake().unwrap();
    server.join().unwrap();

    let err = monitor.info_version().unwrap_err();
    assert!(err.is_abort(), "{err}");
    assert!(monitor.is_dead());
}
