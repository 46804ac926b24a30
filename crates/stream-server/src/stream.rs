use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{ChildStderr, Command};
use tokio::sync::{Mutex, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::StreamError;
use crate::session::{SessionManager, StreamSession, short_id};
use crate::settings::StreamSettings;

/// Chunks in flight between the pipe reader and the response body. The OS
/// pipe plus this queue is all the backpressure a stream gets.
const FORWARD_QUEUE_CHUNKS: usize = 8;

pub struct LiveStream {
    pub session_id: String,
    pub body: ReceiverStream<Result<Bytes, std::io::Error>>,
}

/// Spawns ffmpeg transcoding `input` to fragmented MP4 on stdout, registers
/// the session, and wires the output pipe to the channel the response body
/// consumes. The subprocess gets no stdin; stderr is drained continuously so
/// ffmpeg never blocks on a full diagnostic pipe.
pub fn spawn_live_stream(
    manager: &SessionManager,
    input: &Path,
    source_name: &str,
    start_offset: f64,
    settings: &StreamSettings,
) -> Result<LiveStream, StreamError> {
    let session_id = Uuid::new_v4().to_string();

    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-nostdin")
        .arg("-ss")
        .arg(start_offset.to_string())
        .arg("-i")
        .arg(input)
        .args(["-c:v", "libx264"])
        .args(["-preset", settings.preset])
        .args(["-tune", "zerolatency"])
        .args(["-b:v", settings.video_bitrate]);

    if let Some(filter) = settings.downscale {
        cmd.args(["-vf", filter]);
    }

    cmd.args(["-c:a", "aac"])
        .args(["-b:a", settings.audio_bitrate])
        .args(["-f", "mp4"])
        .args(["-movflags", "frag_keyframe+empty_moov+faststart"])
        .args(["-max_muxing_queue_size", "1024"])
        .arg("pipe:1")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    info!("[Stream {}] starting: {cmd:?}", short_id(&session_id));

    let mut child = cmd.spawn().map_err(|err| match err.kind() {
        std::io::ErrorKind::NotFound => StreamError::ToolUnavailable,
        _ => StreamError::StreamingFailed(err.to_string()),
    })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| StreamError::StreamingFailed("ffmpeg stdout pipe missing".to_string()))?;
    let stderr = child.stderr.take();
    let pid = child.id();

    let cancel = CancellationToken::new();
    manager.register(StreamSession {
        id: session_id.clone(),
        source: source_name.to_string(),
        started_at: Instant::now(),
        pid,
        child: Arc::new(Mutex::new(child)),
        cancel: cancel.clone(),
    });

    if let Some(stderr) = stderr {
        tokio::spawn(drain_stderr(session_id.clone(), stderr));
    }

    let (tx, rx) = mpsc::channel(FORWARD_QUEUE_CHUNKS);
    let reader = BufReader::with_capacity(settings.pipe_buf_size, stdout);
    tokio::spawn(forward_output(
        manager.clone(),
        session_id.clone(),
        reader,
        settings.chunk_size,
        cancel,
        tx,
    ));

    Ok(LiveStream {
        session_id,
        body: ReceiverStream::new(rx),
    })
}

/// Reads transcoded output in `chunk_size` slices and hands each to the
/// response body. Every exit route — end of pipe, read error, client gone,
/// cancellation — ends in the manager's single teardown path.
async fn forward_output<R: AsyncRead + Unpin>(
    manager: SessionManager,
    session_id: String,
    mut output: R,
    chunk_size: usize,
    cancel: CancellationToken,
    tx: mpsc::Sender<Result<Bytes, std::io::Error>>,
) {
    let mut buf = vec![0u8; chunk_size];
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("[Stream {}] cancelled", short_id(&session_id));
                break;
            }
            read = output.read(&mut buf) => match read {
                Ok(0) => {
                    // Source exhausted or the process exited; drain is over.
                    debug!("[Stream {}] end of output", short_id(&session_id));
                    break;
                }
                Ok(n) => {
                    if tx.send(Ok(Bytes::copy_from_slice(&buf[..n]))).await.is_err() {
                        // Receiver dropped: the client went away mid-stream.
                        info!("[Stream {}] client disconnected", short_id(&session_id));
                        break;
                    }
                }
                Err(err) => {
                    warn!("[Stream {}] pipe read error: {err}", short_id(&session_id));
                    break;
                }
            }
        }
    }

    manager.teardown(&session_id).await;
    info!("[Stream {}] finished", short_id(&session_id));
}

/// ffmpeg blocks once its stderr pipe buffer fills, so the diagnostic stream
/// must be drained for the lifetime of the process. Progress lines are
/// dropped, problems are surfaced.
async fn drain_stderr(session_id: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() || line.starts_with("frame=") {
            continue;
        }
        let lowered = line.to_lowercase();
        if lowered.contains("error") || lowered.contains("warning") {
            warn!("[Stream {}] ffmpeg: {line}", short_id(&session_id));
        } else {
            debug!("[Stream {}] ffmpeg: {line}", short_id(&session_id));
        }
    }
}
