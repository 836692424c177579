use std::fs;
use std::path::PathBuf;
use std::process::Command;

fn tmp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("tonelink-cli-{name}"));
    fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn run_tonelink(args: &[&str]) -> (bool, String) {
    let output = Command::new(env!("CARGO_BIN_EXE_tonelink"))
        .args(args)
        .output()
        .expect("failed to execute tonelink");
    let text = String::from_utf8_lossy(&output.stdout).to_string()
        + &String::from_utf8_lossy(&output.stderr);
    (output.status.success(), text)
}

#[test]
fn test_send_creates_wav() {
    let dir = tmp_dir("send");
    let input = dir.join("message.txt");
    let wav = dir.join("message.wav");
    fs::write(&input, "a short acoustic test message").unwrap();

    let (ok, text) = run_tonelink(&[
        "send",
        input.to_str().unwrap(),
        wav.to_str().unwrap(),
    ]);
    assert!(ok, "send failed: {text}");
    assert!(text.contains("Wrote"), "unexpected output: {text}");

    let size = fs::metadata(&wav).expect("wav not created").len();
    assert!(size > 10_000, "wav suspiciously small: {size} bytes");
}

#[test]
fn test_send_recv_round_trip_standard() {
    let dir = tmp_dir("roundtrip");
    let input = dir.join("payload.bin");
    let wav = dir.join("payload.wav");
    let decoded = dir.join("payload.out");
    let content = b"Round trip over the standard FSK profile.";
    fs::write(&input, content).unwrap();

    let (ok, text) = run_tonelink(&[
        "send",
        input.to_str().unwrap(),
        wav.to_str().unwrap(),
        "--profile",
        "standard",
    ]);
    assert!(ok, "send failed: {text}");

    let (ok, text) = run_tonelink(&[
        "recv",
        wav.to_str().unwrap(),
        decoded.to_str().unwrap(),
        "--profile",
        "standard",
    ]);
    assert!(ok, "recv failed: {text}");
    assert!(text.contains("verified"), "transfer not verified: {text}");

    assert_eq!(fs::read(&decoded).unwrap(), content);
}

#[test]
fn test_send_recv_round_trip_fast() {
    let dir = tmp_dir("fast");
    let input = dir.join("blob.bin");
    let wav = dir.join("blob.wav");
    let decoded = dir.join("blob.out");
    let content: Vec<u8> = (0..=255u8).collect();
    fs::write(&input, &content).unwrap();

    let (ok, text) = run_tonelink(&[
        "send",
        input.to_str().unwrap(),
        wav.to_str().unwrap(),
        "--profile",
        "fast",
    ]);
    assert!(ok, "send failed: {text}");

    let (ok, text) = run_tonelink(&[
        "recv",
        wav.to_str().unwrap(),
        decoded.to_str().unwrap(),
        "--profile",
        "fast",
    ]);
    assert!(ok, "recv failed: {text}");
    assert_eq!(fs::read(&decoded).unwrap(), content);
}

#[test]
fn test_unknown_profile_rejected() {
    let dir = tmp_dir("badprofile");
    let input = dir.join("x.bin");
    fs::write(&input, "x").unwrap();

    let (ok, text) = run_tonelink(&[
        "send",
        input.to_str().unwrap(),
        dir.join("x.wav").to_str().unwrap(),
        "--profile",
        "warp",
    ]);
    assert!(!ok);
    assert!(text.contains("unknown profile"), "got: {text}");
}

#[test]
fn test_calibrate_writes_preset() {
    let dir = tmp_dir("calibrate");
    let ambient = dir.join("ambient.wav");
    let preset = dir.join("preset.json");

    // Three seconds of faint wideband ambience.
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 44_100,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&ambient, spec).unwrap();
    for n in 0..(44_100 * 3) {
        let t = n as f32 / 44_100.0;
        let hum = 0.002 * (2.0 * std::f32::consts::PI * 3_100.0 * t).sin();
        writer.write_sample((hum * 32767.0) as i16).unwrap();
    }
    writer.finalize().unwrap();

    let (ok, text) = run_tonelink(&[
        "calibrate",
        ambient.to_str().unwrap(),
        preset.to_str().unwrap(),
        "--profile",
        "standard",
    ]);
    assert!(ok, "calibrate failed: {text}");
    assert!(text.contains("Selected carriers"), "got: {text}");

    let json = fs::read_to_string(&preset).unwrap();
    assert!(json.contains("carriers"));
}
