use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use time::macros::datetime;

use hidock::{
    BluetoothHandler, CommandId, DeviceModel, DeviceSession, DeviceTime, DeviceTimeHandler,
    DisconnectReason, FakeRecorder, FakeRecorderConfig, Feature, FileListHandler, Outcome,
    ProtocolError, Reply, SessionConfig, SessionHooks, SettingsHandler, StorageHandler,
    encode_bcd_timestamp,
};

async fn connect(config: FakeRecorderConfig) -> anyhow::Result<(FakeRecorder, DeviceSession)> {
    connect_with_hooks(config, SessionHooks::new()).await
}

async fn connect_with_hooks(
    config: FakeRecorderConfig,
    hooks: SessionHooks,
) -> anyhow::Result<(FakeRecorder, DeviceSession)> {
    let recorder = FakeRecorder::new(config);
    let session = DeviceSession::establish(
        recorder.transport(),
        recorder.product_id(),
        SessionConfig::default(),
        hooks,
    )
    .await?;
    Ok((recorder, session))
}

#[tokio::test]
async fn establish_reads_the_recorder_identity() -> anyhow::Result<()> {
    let connected = Arc::new(Mutex::new(None));
    let seen = Arc::clone(&connected);
    let hooks = SessionHooks::new().on_connect(move |identity| {
        *seen.lock().expect("hook lock should not be poisoned") =
            Some(identity.serial_number().to_string());
    });
    let config = FakeRecorderConfig::builder()
        .model(DeviceModel::P1)
        .firmware_number(0x0006_0104)
        .serial("HDP1TEST0001")
        .build();

    let (_recorder, session) = connect_with_hooks(config, hooks).await?;

    let identity = session.identity();
    assert_eq!(DeviceModel::P1, identity.model());
    assert_eq!("6.1.4", identity.firmware().code());
    assert_eq!(393_476, identity.firmware().number());
    assert_eq!("HDP1TEST0001", identity.serial_number());
    assert_eq!(
        Some("HDP1TEST0001".to_string()),
        connected.lock().expect("hook lock should not be poisoned").clone()
    );
    session.close().await?;
    Ok(())
}

#[tokio::test]
async fn gated_command_sends_nothing_on_old_firmware() -> anyhow::Result<()> {
    let config = FakeRecorderConfig::builder()
        .model(DeviceModel::H1)
        .firmware_number(300_000)
        .build();
    let (recorder, session) = connect(config).await?;

    let settings = SettingsHandler::get_settings(&session).await?;
    let card = StorageHandler::card_info(&session).await?;
    let headset = BluetoothHandler::status(&session).await?;

    assert_eq!(Outcome::Unsupported(Feature::Settings), settings);
    assert_eq!(Outcome::Unsupported(Feature::StorageFormat), card);
    assert_eq!(Outcome::Unsupported(Feature::BluetoothPairing), headset);
    assert_eq!(vec![CommandId::DeviceInfo], recorder.received_commands());
    session.close().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn timeout_frees_the_slot_for_the_next_command() -> anyhow::Result<()> {
    let config = FakeRecorderConfig::builder()
        .silent_commands(vec![CommandId::GetTime])
        .build();
    let (recorder, session) = connect(config).await?;

    assert_eq!(Outcome::TimedOut, DeviceTimeHandler::get_time(&session).await?);
    let settings = SettingsHandler::get_settings(&session).await?;

    assert!(settings.is_completed());
    assert_eq!(
        vec![CommandId::DeviceInfo, CommandId::GetTime, CommandId::GetSettings],
        recorder.received_commands()
    );
    session.close().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn command_queued_behind_a_timeout_is_still_sent() -> anyhow::Result<()> {
    let config = FakeRecorderConfig::builder()
        .silent_commands(vec![CommandId::GetTime])
        .build();
    let (recorder, session) = connect(config).await?;
    let timeout = Some(session.config().command_timeout());

    let silent = session.submit(CommandId::GetTime, &[], timeout).await?;
    let queued = session.submit(CommandId::FileCount, &[], timeout).await?;

    assert_matches!(silent.wait().await?, Reply::TimedOut);
    assert_matches!(
        queued.wait().await?,
        Reply::Response(packet) if packet.command() == Some(CommandId::FileCount)
    );
    assert_eq!(
        vec![CommandId::DeviceInfo, CommandId::GetTime, CommandId::FileCount],
        recorder.received_commands()
    );
    session.close().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn queued_command_expires_behind_a_silent_one() -> anyhow::Result<()> {
    let config = FakeRecorderConfig::builder()
        .silent_commands(vec![CommandId::GetTime])
        .build();
    let (recorder, session) = connect(config).await?;

    let blocking = session
        .submit(CommandId::GetTime, &[], Some(Duration::from_secs(5)))
        .await?;
    let queued = session
        .submit(CommandId::FileCount, &[], Some(Duration::from_secs(1)))
        .await?;

    assert_matches!(queued.wait().await?, Reply::Expired);
    assert_matches!(blocking.wait().await?, Reply::TimedOut);
    assert!(!recorder.received_commands().contains(&CommandId::FileCount));
    session.close().await?;
    Ok(())
}

#[tokio::test]
async fn cancel_resolves_the_command_as_timed_out() -> anyhow::Result<()> {
    let config = FakeRecorderConfig::builder()
        .silent_commands(vec![CommandId::GetTime])
        .build();
    let (_recorder, session) = connect(config).await?;

    let pending = session.submit(CommandId::GetTime, &[], None).await?;
    pending.cancel().await?;

    assert_matches!(pending.wait().await?, Reply::TimedOut);
    session.close().await?;
    Ok(())
}

#[tokio::test]
async fn junk_stray_packets_and_tiny_reads_are_tolerated() -> anyhow::Result<()> {
    let config = FakeRecorderConfig::builder()
        .junk_prefix(vec![0x00, 0x12, 0x99, 0x34])
        .stray_packets(true)
        .delivery_chunk_size(3)
        .list_chunk_size(7)
        .build();
    let (_recorder, session) = connect(config).await?;

    let time = DeviceTimeHandler::get_time(&session)
        .await?
        .into_result(CommandId::GetTime)?;
    let files = FileListHandler::list_files(&session)
        .await?
        .into_result(CommandId::FileList)?;

    assert_eq!(DeviceTime::Known(datetime!(2025-05-12 11:41:41)), time);
    assert_eq!(3, files.len());
    session.close().await?;
    Ok(())
}

#[tokio::test]
async fn detached_command_does_not_hold_the_slot() -> anyhow::Result<()> {
    let (_recorder, session) = connect(FakeRecorderConfig::default()).await?;
    let new_time = datetime!(2026-01-02 03:04:05);

    session
        .send_detached(CommandId::SetTime, &encode_bcd_timestamp(new_time)?)
        .await?;
    let time = DeviceTimeHandler::get_time(&session).await?;

    assert_eq!(Outcome::Completed(DeviceTime::Known(new_time)), time);
    session.close().await?;
    Ok(())
}

#[tokio::test]
async fn unplug_rejects_pending_commands_and_fires_disconnect_once() -> anyhow::Result<()> {
    let disconnects = Arc::new(AtomicUsize::new(0));
    let reasons = Arc::new(Mutex::new(Vec::new()));
    let hooks = {
        let disconnects = Arc::clone(&disconnects);
        let reasons = Arc::clone(&reasons);
        SessionHooks::new().on_disconnect(move |reason| {
            disconnects.fetch_add(1, Ordering::SeqCst);
            reasons
                .lock()
                .expect("hook lock should not be poisoned")
                .push(reason.clone());
        })
    };
    let config = FakeRecorderConfig::builder()
        .silent_commands(vec![CommandId::GetTime])
        .build();
    let (recorder, session) = connect_with_hooks(config, hooks).await?;

    let pending = session.submit(CommandId::GetTime, &[], None).await?;
    recorder.unplug();

    assert!(pending.wait().await.is_err());
    assert_matches!(
        session.send(CommandId::GetSettings, &[]).await,
        Err(ProtocolError::ConnectionLost(_))
    );
    let _close = session.close().await;

    assert_eq!(1, disconnects.load(Ordering::SeqCst));
    assert_matches!(
        reasons.lock().expect("hook lock should not be poisoned").as_slice(),
        [DisconnectReason::TransportLost { .. }]
    );
    Ok(())
}

#[tokio::test]
async fn close_reports_a_clean_disconnect() -> anyhow::Result<()> {
    let reasons = Arc::new(Mutex::new(Vec::new()));
    let hooks = {
        let reasons = Arc::clone(&reasons);
        SessionHooks::new().on_disconnect(move |reason| {
            reasons
                .lock()
                .expect("hook lock should not be poisoned")
                .push(reason.clone());
        })
    };
    let (_recorder, session) = connect_with_hooks(FakeRecorderConfig::default(), hooks).await?;

    session.close().await?;

    assert_eq!(
        vec![DisconnectReason::Closed],
        *reasons.lock().expect("hook lock should not be poisoned")
    );
    Ok(())
}
