//! File streaming over `exec` channels

use russh::client::Handle;
use russh::ChannelMsg;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use hs_core::traits::{FileSink, FileSource};
use hs_core::TransportError;

use crate::client::ClientHandler;

const CHUNK_SIZE: usize = 32 * 1024;

/// Quote `value` for a POSIX shell
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

pub fn download_command(path: &str) -> String {
    format!("cat -- {}", shell_quote(path))
}

pub fn upload_command(path: &str) -> String {
    format!("cat > {}", shell_quote(path))
}

fn ssh(e: russh::Error) -> TransportError {
    TransportError::Ssh(e.to_string())
}

/// Map the remote command's outcome to a result
fn check_exit(path: &str, exit_status: Option<u32>, stderr: &[u8]) -> Result<(), TransportError> {
    match exit_status {
        Some(0) => Ok(()),
        Some(code) => Err(TransportError::Transfer {
            path: path.to_string(),
            message: format!(
                "remote command exited with {}: {}",
                code,
                String::from_utf8_lossy(stderr).trim()
            ),
        }),
        None => Err(TransportError::Transfer {
            path: path.to_string(),
            message: "channel closed without an exit status".to_string(),
        }),
    }
}

pub(crate) async fn download(
    handle: &Handle<ClientHandler>,
    src: &str,
    dst: FileSink<'_>,
    monitor: &CancellationToken,
) -> Result<u64, TransportError> {
    let mut channel = handle.channel_open_session().await.map_err(ssh)?;
    channel
        .exec(true, download_command(src))
        .await
        .map_err(ssh)?;

    let mut copied = 0u64;
    let mut exit_status = None;
    let mut stderr = Vec::new();
    loop {
        let msg = tokio::select! {
            msg = channel.wait() => Some(msg),
            _ = monitor.cancelled() => None,
        };
        let Some(msg) = msg else {
            let _ = channel.close().await;
            return Err(TransportError::Cancelled);
        };
        match msg {
            Some(ChannelMsg::Data { data }) => {
                dst.write_all(&data).await?;
                copied += data.len() as u64;
            }
            Some(ChannelMsg::ExtendedData { data, ext: 1 }) => stderr.extend_from_slice(&data),
            Some(ChannelMsg::ExitStatus { exit_status: code }) => exit_status = Some(code),
            Some(_) => {}
            None => break,
        }
    }
    dst.flush().await?;

    check_exit(src, exit_status, &stderr)?;
    tracing::debug!("Downloaded {} bytes from {}", copied, src);
    Ok(copied)
}

pub(crate) async fn upload(
    handle: &Handle<ClientHandler>,
    src: FileSource<'_>,
    dst: &str,
    monitor: &CancellationToken,
) -> Result<u64, TransportError> {
    let mut channel = handle.channel_open_session().await.map_err(ssh)?;
    channel.exec(true, upload_command(dst)).await.map_err(ssh)?;

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut sent = 0u64;
    loop {
        let read = tokio::select! {
            n = src.read(&mut buf) => Some(n),
            _ = monitor.cancelled() => None,
        };
        let Some(n) = read else {
            let _ = channel.close().await;
            return Err(TransportError::Cancelled);
        };
        let n = n?;
        if n == 0 {
            break;
        }
        channel.data(&buf[..n]).await.map_err(ssh)?;
        sent += n as u64;
    }
    channel.eof().await.map_err(ssh)?;

    let mut exit_status = None;
    let mut stderr = Vec::new();
    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::ExtendedData { data, ext: 1 } => stderr.extend_from_slice(&data),
            ChannelMsg::ExitStatus { exit_status: code } => exit_status = Some(code),
            _ => {}
        }
    }

    check_exit(dst, exit_status, &stderr)?;
    tracing::debug!("Uploaded {} bytes to {}", sent, dst);
    Ok(sent)
}
