use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use directories::UserDirs;
use indicatif::ProgressStyle;
use tracing::{Instrument, Span, debug, info_span, instrument};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::cli::{DeleteArgs, DownloadArgs};
use crate::error::InteractionError;
use crate::handlers::{FileDownloadHandler, FileListHandler, FileRecord, StorageHandler};
use crate::hw::DeviceSession;
use crate::protocol::CommandId;

use super::report::Report;

const PARTIAL_SUFFIX: &str = ".part";

#[instrument(skip(session), level = "debug")]
pub(crate) async fn files(session: &DeviceSession) -> Result<Report> {
    let files = FileListHandler::list_files(session)
        .await?
        .into_result(CommandId::FileList)?;
    Ok(Report::Files { files })
}

#[instrument(skip(session), level = "debug")]
pub(crate) async fn delete(session: &DeviceSession, args: &DeleteArgs) -> Result<Report> {
    let status = StorageHandler::delete_file(session, args.name())
        .await?
        .into_result(CommandId::DeleteFile)?;
    Ok(Report::Delete {
        name: args.name().to_string(),
        status,
    })
}

/// Downloads one recording into `<dir>/<name>`, via a `.part` file that is
/// renamed on success and removed on failure or Ctrl+C.
#[instrument(skip(session), level = "debug")]
pub(crate) async fn download(session: &DeviceSession, args: &DownloadArgs) -> Result<Report> {
    let files = FileListHandler::list_files(session)
        .await?
        .into_result(CommandId::FileList)?;
    let record = files
        .iter()
        .find(|file| file.name() == args.name())
        .with_context(|| format!("no recording named `{}` on the recorder", args.name()))?;

    let directory = args
        .output_dir()
        .map_or_else(default_download_dir, Path::to_path_buf);
    let file_name = local_file_name(record.name())?;
    let path = directory.join(file_name);
    let partial = partial_path(&path);

    let span = info_span!("download", name = record.name());
    span.pb_set_style(&download_style());
    span.pb_set_length(u64::from(record.length_bytes()));
    span.pb_set_message(record.name());

    let result = tokio::select! {
        result = write_download(session, record, &partial).instrument(span.clone()) => result,
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => Err(anyhow!("download of `{}` interrupted", record.name())),
            Err(source) => Err(InteractionError::CtrlC { source }.into()),
        },
    };

    match result {
        Ok(bytes) => {
            fs::rename(&partial, &path)
                .with_context(|| format!("failed to move download into {}", path.display()))?;
            Ok(Report::Download {
                name: record.name().to_string(),
                path,
                bytes,
            })
        }
        Err(error) => {
            if let Err(remove_error) = fs::remove_file(&partial) {
                debug!(%remove_error, path = %partial.display(), "no partial download to remove");
            }
            Err(error)
        }
    }
}

async fn write_download(session: &DeviceSession, record: &FileRecord, partial: &Path) -> Result<u64> {
    let file = File::create(partial)
        .with_context(|| format!("failed to create {}", partial.display()))?;
    let mut writer = BufWriter::new(file);

    let mut download =
        FileDownloadHandler::begin(session, record.name(), u64::from(record.length_bytes())).await?;
    while let Some(chunk) = download.next_chunk().await? {
        writer
            .write_all(chunk.data())
            .with_context(|| format!("failed to write {}", partial.display()))?;
        Span::current().pb_set_position(chunk.progress().received());
    }
    writer
        .flush()
        .with_context(|| format!("failed to write {}", partial.display()))?;
    Ok(download.received())
}

fn default_download_dir() -> PathBuf {
    UserDirs::new()
        .and_then(|dirs| dirs.download_dir().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn local_file_name(name: &str) -> Result<&OsStr> {
    Path::new(name)
        .file_name()
        .with_context(|| format!("recording name `{name}` is not a usable file name"))
}

fn partial_path(path: &Path) -> PathBuf {
    let mut partial = path.as_os_str().to_os_string();
    partial.push(PARTIAL_SUFFIX);
    PathBuf::from(partial)
}

fn download_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{spinner:.cyan.bold} {msg} [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({eta})",
    )
    .unwrap_or_else(|_error| ProgressStyle::default_bar())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::plain("20250512114141REC01.wav", "20250512114141REC01.wav")]
    #[case::strips_directories("records/2025May12-114141-Rec01.hda", "2025May12-114141-Rec01.hda")]
    fn recording_names_map_to_local_files(#[case] name: &str, #[case] expected: &str) {
        assert_eq!(
            OsStr::new(expected),
            local_file_name(name).expect("name should be usable")
        );
    }

    #[test]
    fn partial_file_sits_beside_the_target() {
        assert_eq!(
            PathBuf::from("/tmp/REC01.wav.part"),
            partial_path(Path::new("/tmp/REC01.wav"))
        );
    }

    #[rstest]
    #[case::empty("")]
    #[case::parent("..")]
    fn unusable_names_are_rejected(#[case] name: &str) {
        assert!(local_file_name(name).is_err());
    }
}
