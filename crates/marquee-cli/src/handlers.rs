//! Upload command handler.
//!
//! Reads the input file, prepares the payload, runs the session over the
//! chosen transport and reports progress.

use crate::config::Config;
use crate::Cli;
use anyhow::{Context, Result};
use data_encoding::HEXLOWER;
use marquee_core::{
    upload_payload, AckStrategy, AnimationFrame, CancelToken, Decoder, FrameEncoder, GifDecoder,
    Progress, SessionState, UploadOptions, UploadResult,
};
use marquee_protocol::{DeviceProfile, EncodedPayload, FLEX_96X20_V1};
use marquee_transport::{BtleTransport, DeviceId, MemoryTransport};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Run one upload as described by the command line.
///
/// # Errors
///
/// Returns an error if the file cannot be read or prepared, the transport
/// cannot be opened, or the upload fails.
pub async fn run_upload(cli: &Cli, config: Config) -> Result<()> {
    let profile = FLEX_96X20_V1;
    let data = tokio::fs::read(&cli.file)
        .await
        .with_context(|| format!("Failed to read {}", cli.file.display()))?;

    let payload = prepare_payload(&data, cli.raw, cli.frame_delay_ms, &profile)?;
    info!(
        "Prepared {} byte payload from {} (profile {} {})",
        payload.len(),
        cli.file.display(),
        profile.name,
        profile.version
    );

    let (progress_tx, progress_rx) = watch::channel(Progress::default());
    let reporter = tokio::spawn(report_progress(progress_rx));

    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current frame");
            on_interrupt.cancel();
        }
    });

    let mut session = config.session_config();
    if cli.dry_run {
        session.handshake_ack = AckStrategy::Settle {
            delay: Duration::ZERO,
        };
    }
    let options = UploadOptions::new(profile)
        .with_session(session)
        .with_cancel(cancel)
        .with_progress(progress_tx);
    let device = DeviceId::new(config.device.address.clone());

    let result = if cli.dry_run {
        dry_run(&device, &payload, options, config.write_size()).await
    } else {
        let transport = BtleTransport::new(config.btle_config()?).await?;
        upload_payload(&transport, &device, &payload, options).await
    };

    if let Err(e) = reporter.await {
        debug!("Progress reporter ended abnormally: {}", e);
    }

    let stats = result.into_result()?;
    info!(
        "Upload successful: {} frames, {} bytes, {} retries in {:.1?}",
        stats.frames_written, stats.bytes_sent, stats.retries, stats.elapsed
    );
    Ok(())
}

/// Build the payload for `data`.
///
/// In raw mode the file is sent byte-for-byte. Otherwise it is decoded,
/// fitted to the panel and re-encoded with the panel's palette.
///
/// # Errors
///
/// Returns an error if the file is not a GIF or cannot be re-encoded.
pub fn prepare_payload(
    data: &[u8],
    raw: bool,
    frame_delay_ms: Option<u32>,
    profile: &DeviceProfile,
) -> Result<EncodedPayload> {
    if raw {
        return Ok(EncodedPayload::from_gif_bytes(data.to_vec())?);
    }

    let decoded = GifDecoder::new().decode(data)?;
    let frames: Vec<AnimationFrame> = decoded
        .into_iter()
        .map(|f| {
            AnimationFrame::new(
                f.frame.fitted(profile.panel),
                frame_delay_ms.unwrap_or(f.duration_ms),
            )
        })
        .collect();

    Ok(FrameEncoder::new(*profile).encode(&frames)?)
}

async fn dry_run(
    device: &DeviceId,
    payload: &EncodedPayload,
    options: UploadOptions,
    write_size: usize,
) -> UploadResult {
    let transport = MemoryTransport::new().with_max_write_len(write_size);
    let result = upload_payload(&transport, device, payload, options).await;

    for packet in transport.writes() {
        println!("{}", HEXLOWER.encode(&packet));
    }
    result
}

async fn report_progress(mut rx: watch::Receiver<Progress>) {
    let mut state = SessionState::Idle;
    let mut last_decile = 0;

    while rx.changed().await.is_ok() {
        let progress = rx.borrow_and_update().clone();

        if let Some(line) = progress_line(&progress, &mut last_decile) {
            info!("{}", line);
        }
        if progress.state != state {
            debug!("Session state {:?}", progress.state);
            state = progress.state;
            if state.is_terminal() {
                break;
            }
        }
    }
}

/// Progress message for `progress`, once per completed tenth of the frames.
fn progress_line(progress: &Progress, last_decile: &mut u32) -> Option<String> {
    if progress.total_frames == 0 {
        return None;
    }
    let percent = u32::from(progress.frames_written) * 100 / u32::from(progress.total_frames);
    if percent / 10 <= *last_decile {
        return None;
    }
    *last_decile = percent / 10;
    Some(format!(
        "Uploaded {}/{} frames ({}%)",
        progress.frames_written, progress.total_frames, percent
    ))
}
