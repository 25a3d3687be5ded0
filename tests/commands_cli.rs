use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::Parser;
use insta::assert_snapshot;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

#[derive(Debug, Default)]
struct FakeTerminalClient;

impl hidock::TerminalClient for FakeTerminalClient {
    fn stdout_is_terminal(&self) -> bool {
        false
    }

    fn stderr_is_terminal(&self) -> bool {
        false
    }
}

async fn run_with_parsed_args(
    args: hidock::Args,
    output_format: hidock::OutputFormat,
) -> anyhow::Result<String> {
    let mut output = Vec::new();
    let options = hidock::RunOptions::builder()
        .output_format(output_format)
        .session_config(args.session_config())
        .build();
    let (command, maybe_fake_args) = args.into_command_and_fake_args();
    let hardware_client = match maybe_fake_args {
        Some(fake_args) => hidock::fake_hardware_client(fake_args.into_recorder()),
        None => hidock::real_hardware_client(),
    };
    hidock::run_with_clients(
        command,
        &mut output,
        &FakeTerminalClient,
        hardware_client,
        options,
    )
    .await?;
    Ok(String::from_utf8(output)?)
}

async fn run_json<const N: usize>(argv: [&str; N]) -> anyhow::Result<Value> {
    let args = hidock::Args::try_parse_from(argv)?;
    let stdout = run_with_parsed_args(args, hidock::OutputFormat::Json).await?;
    Ok(serde_json::from_str(&stdout)?)
}

fn scratch_dir(label: &str) -> anyhow::Result<PathBuf> {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH)?.as_nanos();
    let dir = std::env::temp_dir().join(format!("hidock-{label}-{}-{nanos}", std::process::id()));
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

#[tokio::test]
async fn devices_command_lists_the_fake_recorder() -> anyhow::Result<()> {
    let report = run_json(["hidock", "--fake", "--fake-model", "p1", "devices"]).await?;

    assert_eq!(json!("devices"), report["report"]);
    assert_eq!(json!("p1"), report["devices"][0]["model"]);
    assert_eq!(json!(0xB00E), report["devices"][0]["product_id"]);
    Ok(())
}

#[tokio::test]
async fn files_command_reports_parsed_recordings() -> anyhow::Result<()> {
    let report = run_json([
        "hidock",
        "--fake",
        "--fake-files",
        "20250101080000REC01.wav:1000:1;2025Feb02-101010-Rec02.hda:12000:5",
        "files",
    ])
    .await?;

    let files = report["files"].as_array().expect("files should be an array");
    assert_eq!(2, files.len());
    assert_eq!(json!("2025Feb02-101010-Rec02.hda"), files[1]["name"]);
    assert_eq!(json!(1.0), files[1]["duration_seconds"]);
    assert_eq!(json!(5), files[1]["recording_type"]);
    Ok(())
}

#[tokio::test]
async fn download_command_writes_the_recording() -> anyhow::Result<()> {
    let dir = scratch_dir("download")?;
    let dir_arg = dir.to_string_lossy().into_owned();
    let report = run_json([
        "hidock",
        "--fake",
        "--fake-files",
        "memo.wav:5000:1",
        "download",
        "memo.wav",
        "--output-dir",
        &dir_arg,
    ])
    .await?;

    let written = std::fs::read(dir.join("memo.wav"))?;
    assert_eq!(json!(5000), report["bytes"]);
    assert_eq!(hidock::FakeFile::new("memo.wav", 1, 5000).contents(), written);
    assert!(!dir.join("memo.wav.part").exists());
    std::fs::remove_dir_all(&dir)?;
    Ok(())
}

#[tokio::test]
async fn download_of_unknown_recording_fails() {
    let result = run_json(["hidock", "--fake", "download", "nope.wav", "--output-dir", "."]).await;

    let error = result.expect_err("an unknown name should fail");
    assert!(error.to_string().contains("nope.wav"));
}

#[tokio::test]
async fn delete_command_reports_device_status() -> anyhow::Result<()> {
    let report = run_json(["hidock", "--fake", "delete", "20250512114141REC01.wav"]).await?;

    assert_eq!(
        json!({"report": "delete", "name": "20250512114141REC01.wav", "status": "deleted"}),
        report
    );
    Ok(())
}

#[tokio::test]
async fn settings_set_requires_a_flag() {
    let result = run_json(["hidock", "--fake", "settings", "set"]).await;

    assert!(result.is_err());
}

#[tokio::test]
async fn settings_get_reads_the_flags() -> anyhow::Result<()> {
    let report = run_json(["hidock", "--fake", "settings", "get"]).await?;

    assert_eq!(
        json!({
            "auto_record": true,
            "auto_play": false,
            "notification": true,
            "bluetooth_tone": false,
        }),
        report["settings"]
    );
    Ok(())
}

#[tokio::test]
async fn destructive_commands_need_confirmation() {
    let format = run_json(["hidock", "--fake", "card", "format"]).await;
    let reset = run_json(["hidock", "--fake", "factory-reset"]).await;

    assert!(format.is_err());
    assert!(reset.is_err());
}

#[tokio::test]
async fn bluetooth_is_unsupported_on_desk_recorders() {
    let result = run_json(["hidock", "--fake", "--fake-model", "h1e", "bluetooth", "status"]).await;

    let error = result.expect_err("desk recorders have no Bluetooth pairing");
    assert!(error.to_string().contains("not supported"));
}

#[tokio::test]
async fn time_get_prints_the_recorder_clock() -> anyhow::Result<()> {
    let args = hidock::Args::new(hidock::Command::Time(hidock::TimeAction::Get))
        .with_fake(hidock::FakeArgs::default());

    let stdout = run_with_parsed_args(args, hidock::OutputFormat::Pretty).await?;

    assert_snapshot!(stdout.trim_end(), @"Recorder clock: 2025-05-12 11:41:41");
    Ok(())
}
