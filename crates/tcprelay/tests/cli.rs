use assert_cmd::cargo::CommandCargoExt;
use assert_cmd::Command;
use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::process::Stdio;

fn tcprelay() -> Command {
    let mut cmd = Command::cargo_bin("tcprelay").unwrap();
    cmd.env_remove("RUST_LOG").env_remove("NOTIFY_SOCKET");
    cmd
}

#[test]
fn test_missing_options_is_usage_error() {
    let output = tcprelay().args(["-l", "9000", "-p", "9001"]).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--remote-host"), "stderr: {stderr}");
    assert!(stderr.contains("Usage"), "stderr: {stderr}");
}

#[test]
fn test_no_arguments_is_usage_error() {
    tcprelay().assert().code(2);
}

#[test]
fn test_help_lists_flags_and_exit_codes() {
    let output = tcprelay().arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for flag in ["--local-port", "--remote-host", "--input-parser", "--foreground", "--syslog"] {
        assert!(stdout.contains(flag), "missing {flag} in help");
    }
    assert!(stdout.contains("Exit status"));
}

#[test]
fn test_version() {
    tcprelay().arg("--version").assert().success();
}

#[test]
fn test_port_in_use_exit_code() {
    let taken = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = taken.local_addr().unwrap().port().to_string();
    tcprelay()
        .args(["-f", "-b", "127.0.0.1", "-l", &port, "-h", "127.0.0.1", "-p", "9"])
        .assert()
        .code(5);
}

#[test]
fn test_unresolvable_bind_address_exit_code() {
    tcprelay()
        .args(["-f", "-b", "no.such.host.invalid", "-l", "0", "-h", "127.0.0.1", "-p", "9"])
        .assert()
        .code(7);
}

#[test]
fn test_invalid_config_file_exit_code() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"[relay\nlocal_port = 1").unwrap();
    tcprelay()
        .args(["-f", "--config"])
        .arg(file.path())
        .assert()
        .code(8);
}

#[test]
fn test_zero_remote_port_rejected() {
    tcprelay()
        .args(["-f", "-l", "0", "-h", "127.0.0.1", "-p", "0"])
        .assert()
        .code(8);
}

#[test]
fn test_detached_bind_failure_is_reported() {
    let taken = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = taken.local_addr().unwrap().port().to_string();
    tcprelay()
        .args(["-b", "127.0.0.1", "-l", &port, "-h", "127.0.0.1", "-p", "9"])
        .timeout(std::time::Duration::from_secs(10))
        .assert()
        .code(5);
}

/// Drop terminal color sequences from captured log output.
fn strip_ansi(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\x1b' {
            for c in chars.by_ref() {
                if c.is_ascii_alphabetic() {
                    break;
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn detached_pid(log: &str) -> u32 {
    let log = strip_ansi(log);
    let line = log
        .lines()
        .find(|l| l.contains("detached"))
        .unwrap_or_else(|| panic!("no detach line in: {log}"));
    let rest = &line[line.find("pid=").expect("pid field") + 4..];
    rest.chars()
        .take_while(char::is_ascii_digit)
        .collect::<String>()
        .parse()
        .unwrap()
}

#[test]
fn test_detached_start_succeeds_once_listening() {
    let port = {
        let spare = TcpListener::bind("127.0.0.1:0").unwrap();
        spare.local_addr().unwrap().port()
    };
    let log = tempfile::NamedTempFile::new().unwrap();

    let status = std::process::Command::cargo_bin("tcprelay")
        .unwrap()
        .env_remove("RUST_LOG")
        .env_remove("NOTIFY_SOCKET")
        .args(["-b", "127.0.0.1", "-l", &port.to_string(), "-h", "127.0.0.1", "-p", "9"])
        .stdout(Stdio::null())
        .stderr(log.reopen().unwrap())
        .status()
        .unwrap();

    let pid = detached_pid(&std::fs::read_to_string(log.path()).unwrap());
    let listening = TcpStream::connect(("127.0.0.1", port)).is_ok();
    std::process::Command::new("kill")
        .arg(pid.to_string())
        .status()
        .unwrap();

    assert!(status.success());
    assert!(listening, "detached relay should already be listening");
}
