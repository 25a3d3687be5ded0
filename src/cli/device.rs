use anyhow::{Result, bail};
use tracing::{info, instrument};

use crate::cli::{BluetoothAction, CardAction, SettingsAction, TimeAction};
use crate::handlers::{
    BluetoothHandler, DeviceTimeHandler, SettingsHandler, StorageHandler, local_now,
};
use crate::hw::DeviceSession;
use crate::protocol::CommandId;

use super::report::Report;

#[instrument(skip(session), level = "debug")]
pub(crate) async fn info(session: &DeviceSession) -> Result<Report> {
    let current_recording = StorageHandler::current_recording(session)
        .await?
        .into_result(CommandId::RecordingFile)?;
    Ok(Report::Info {
        identity: session.identity().clone(),
        current_recording,
    })
}

#[instrument(skip(session), level = "debug")]
pub(crate) async fn time(session: &DeviceSession, action: &TimeAction) -> Result<Report> {
    match action {
        TimeAction::Get => {
            let time = DeviceTimeHandler::get_time(session)
                .await?
                .into_result(CommandId::GetTime)?;
            Ok(Report::Time { time })
        }
        TimeAction::Sync => {
            let time = local_now();
            let status = DeviceTimeHandler::set_time(session, time)
                .await?
                .into_result(CommandId::SetTime)?;
            Ok(Report::TimeSynced { time, status })
        }
    }
}

#[instrument(skip(session), level = "debug")]
pub(crate) async fn settings(session: &DeviceSession, action: &SettingsAction) -> Result<Report> {
    match action {
        SettingsAction::Get => {
            let settings = SettingsHandler::get_settings(session)
                .await?
                .into_result(CommandId::GetSettings)?;
            Ok(Report::Settings { settings })
        }
        SettingsAction::Set(args) => {
            let update = args.to_update();
            if update.is_empty() {
                bail!("nothing to change; pass at least one settings flag");
            }
            let status = SettingsHandler::apply(session, update)
                .await?
                .into_result(CommandId::SetSettings)?;
            Ok(Report::SettingsApplied { status })
        }
        SettingsAction::Reset { yes } => {
            confirm(*yes, "settings reset")?;
            let status = StorageHandler::restore_factory_settings(session)
                .await?
                .into_result(CommandId::RestoreFactorySettings)?;
            Ok(Report::SettingsReset { status })
        }
    }
}

#[instrument(skip(session), level = "debug")]
pub(crate) async fn card(session: &DeviceSession, action: &CardAction) -> Result<Report> {
    match action {
        CardAction::Info => {
            let card = StorageHandler::card_info(session)
                .await?
                .into_result(CommandId::CardInfo)?;
            Ok(Report::Card { card })
        }
        CardAction::Format { yes } => {
            confirm(*yes, "card format")?;
            let status = StorageHandler::format_card(session)
                .await?
                .into_result(CommandId::FormatCard)?;
            Ok(Report::CardFormatted { status })
        }
    }
}

#[instrument(skip(session), level = "debug")]
pub(crate) async fn factory_reset(session: &DeviceSession, yes: bool) -> Result<Report> {
    confirm(yes, "factory reset")?;
    let status = StorageHandler::factory_reset(session)
        .await?
        .into_result(CommandId::FactoryReset)?;
    Ok(Report::FactoryReset { status })
}

#[instrument(skip(session), level = "debug")]
pub(crate) async fn bluetooth(session: &DeviceSession, action: &BluetoothAction) -> Result<Report> {
    match action {
        BluetoothAction::Scan { seconds } => {
            info!(seconds, "scanning for headsets");
            let devices = BluetoothHandler::scan(session, *seconds)
                .await?
                .into_result(CommandId::BluetoothScan)?;
            Ok(Report::BluetoothScan { devices })
        }
        BluetoothAction::Status => {
            let status = BluetoothHandler::status(session)
                .await?
                .into_result(CommandId::BluetoothStatus)?;
            Ok(Report::Bluetooth { status })
        }
        BluetoothAction::Connect { mac } => {
            let status = BluetoothHandler::connect(session, *mac)
                .await?
                .into_result(CommandId::BluetoothCommand)?;
            Ok(Report::BluetoothConnected { mac: *mac, status })
        }
        BluetoothAction::Disconnect => {
            let status = BluetoothHandler::disconnect(session)
                .await?
                .into_result(CommandId::BluetoothCommand)?;
            Ok(Report::BluetoothDisconnected { status })
        }
    }
}

fn confirm(yes: bool, operation: &str) -> Result<()> {
    if !yes {
        bail!("{operation} erases data on the recorder; rerun with --yes to confirm");
    }
    Ok(())
}
