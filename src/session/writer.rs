//! Per-viewer multipart writer
//!
//! Drains one subscription and writes each frame as a section of a
//! `multipart/x-mixed-replace` body:
//!
//! ```text
//! --jpegBoundary\r\n
//! Content-Type: image/jpeg\r\n
//! Content-Length: <n>\r\n
//! \r\n
//! <n bytes of JPEG>\r\n
//! --jpegBoundary\r\n
//! Content-Type: image/jpeg\r\n
//! ...
//! ```

use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

use crate::registry::{ConsumerId, Distributor, EncodedFrame, RegistryError, Subscription};
use crate::server::config::ViewConfig;
use crate::server::handler::{Access, ViewerPolicy};

use super::state::{SessionOutcome, SessionState};

/// Multipart boundary parameter
pub const BOUNDARY: &str = "jpegBoundary";

/// Response content type for the stream endpoint
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=jpegBoundary";

/// Delimiter line written before the first section and after every section
const DELIMITER: &[u8] = b"--jpegBoundary\r\n";

/// Bound on the after-limit still and the final shutdown
const WRITE_GRACE: Duration = Duration::from_secs(1);

enum Next {
    Frame(EncodedFrame),
    Closed,
    Limit,
}

/// One viewer's streaming session
pub struct ViewerSession {
    subscription: Subscription,
    policy: Arc<dyn ViewerPolicy>,
    config: ViewConfig,
    state: SessionState,
}

impl ViewerSession {
    /// Register with the distributor
    ///
    /// Fails if the viewer policy refuses the new viewer or the source has
    /// ended; nothing has been written at that point.
    pub fn open(
        distributor: &Distributor,
        policy: Arc<dyn ViewerPolicy>,
        config: ViewConfig,
    ) -> Result<Self, RegistryError> {
        let subscription = distributor.register()?;
        let state = SessionState::new(subscription.id());

        Ok(Self {
            subscription,
            policy,
            config,
            state,
        })
    }

    /// Consumer identifier
    pub fn id(&self) -> ConsumerId {
        self.subscription.id()
    }

    /// Current session state
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Stream until the limit, a write failure, or the end of the source
    ///
    /// The consumer is unregistered before this returns, whatever the
    /// outcome.
    pub async fn run<W>(mut self, writer: &mut W) -> SessionOutcome
    where
        W: AsyncWrite + Unpin,
    {
        let outcome = self.stream(writer).await;

        if outcome == SessionOutcome::LimitReached {
            self.state.limit_reached();
            // A stalled body is mid-section; a still appended there is garbage
            if let Some(still) = self.config.after_limit.clone().filter(|_| !self.state.stalled) {
                match tokio::time::timeout(WRITE_GRACE, self.write_section(writer, still.data())).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::debug!(consumer_id = self.id(), error = %e, "After-limit image not sent");
                    }
                    Err(_) => {
                        tracing::debug!(consumer_id = self.id(), "After-limit image timed out");
                    }
                }
            }
        }

        let Self {
            subscription,
            mut state,
            ..
        } = self;
        subscription.unregister();
        state.close();

        // Unregistered before the client sees end-of-body
        let _ = tokio::time::timeout(WRITE_GRACE, writer.shutdown()).await;

        tracing::info!(
            consumer_id = state.id,
            outcome = %outcome,
            frames = state.frames_sent,
            bytes = state.bytes_sent,
            view_secs = state.view_time().as_secs_f64(),
            stalled = state.stalled,
            "Viewer session ended"
        );

        outcome
    }

    async fn stream<W>(&mut self, writer: &mut W) -> SessionOutcome
    where
        W: AsyncWrite + Unpin,
    {
        self.state.start_streaming();
        let deadline = self.config.limit.map(|limit| Instant::now() + limit);

        if let Err(e) = write_delimiter(writer).await {
            tracing::debug!(consumer_id = self.id(), error = %e, "Write failed");
            return SessionOutcome::ClientDisconnected;
        }

        loop {
            let next = tokio::select! {
                biased;
                _ = expire(deadline) => Next::Limit,
                frame = self.subscription.recv() => match frame {
                    Some(frame) => Next::Frame(frame),
                    None => Next::Closed,
                },
            };

            let frame = match next {
                Next::Frame(frame) => frame,
                Next::Closed => return SessionOutcome::SourceClosed,
                Next::Limit => return SessionOutcome::LimitReached,
            };

            let payload = match self.policy.viewing_allowed() {
                Access::Allowed => frame.data,
                Access::Denied(Some(still)) => {
                    self.state.frames_denied += 1;
                    still.data().clone()
                }
                Access::Denied(None) => {
                    self.state.frames_denied += 1;
                    continue;
                }
            };

            // A client that stops reading must not outlive its limit
            let written = tokio::select! {
                biased;
                _ = expire(deadline) => None,
                result = self.write_section(writer, &payload) => Some(result),
            };

            match written {
                Some(Ok(())) => {}
                Some(Err(e)) => {
                    tracing::debug!(consumer_id = self.id(), error = %e, "Write failed");
                    return SessionOutcome::ClientDisconnected;
                }
                None => {
                    self.state.stalled = true;
                    return SessionOutcome::LimitReached;
                }
            }
        }
    }

    async fn write_section<W>(&mut self, writer: &mut W, payload: &Bytes) -> io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let header = format!(
            "Content-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
            payload.len()
        );
        writer.write_all(header.as_bytes()).await?;
        writer.write_all(payload).await?;
        writer.write_all(b"\r\n").await?;
        write_delimiter(writer).await?;

        self.state.on_section(payload.len());
        Ok(())
    }
}

impl std::fmt::Debug for ViewerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewerSession")
            .field("state", &self.state)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

async fn write_delimiter<W>(writer: &mut W) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(DELIMITER).await?;
    writer.flush().await
}

async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::media::jpeg::tests::test_card;
    use crate::media::StillImage;
    use crate::server::handler::{AllowAll, LocalPolicy};
    use crate::source::FrameChannel;

    fn frame(sequence: u64, body: &'static [u8]) -> EncodedFrame {
        EncodedFrame::new(sequence, Bytes::from_static(body))
    }

    fn section(payload: &[u8]) -> Vec<u8> {
        let mut out = format!(
            "Content-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
            payload.len()
        )
        .into_bytes();
        out.extend_from_slice(payload);
        out.extend_from_slice(b"\r\n--jpegBoundary\r\n");
        out
    }

    fn count(haystack: &[u8], needle: &[u8]) -> usize {
        haystack
            .windows(needle.len())
            .filter(|w| *w == needle)
            .count()
    }

    fn limited(ms: u64) -> ViewConfig {
        ViewConfig::default().limit(Duration::from_millis(ms))
    }

    #[test]
    fn test_content_type_matches_delimiter() {
        assert!(CONTENT_TYPE.ends_with(BOUNDARY));
        assert_eq!(DELIMITER, format!("--{}\r\n", BOUNDARY).as_bytes());
    }

    #[tokio::test]
    async fn test_wire_format() {
        let distributor = Distributor::new(Arc::new(AllowAll));
        let session = ViewerSession::open(&distributor, Arc::new(AllowAll), limited(100)).unwrap();
        distributor.broadcast(frame(1, b"JPEGDATA"));

        let mut out = Vec::new();
        let outcome = session.run(&mut out).await;

        assert_eq!(outcome, SessionOutcome::LimitReached);
        let mut expected = b"--jpegBoundary\r\n".to_vec();
        expected.extend(section(b"JPEGDATA"));
        assert_eq!(out, expected);
        assert_eq!(distributor.viewer_count(), 0);
    }

    #[tokio::test]
    async fn test_after_limit_sent_exactly_once() {
        let still = StillImage::from_image(&test_card(8, 8)).unwrap();
        let distributor = Distributor::new(Arc::new(AllowAll));
        let config = limited(50).after_limit(still.clone());
        let session = ViewerSession::open(&distributor, Arc::new(AllowAll), config).unwrap();

        let mut out = Vec::new();
        let outcome = session.run(&mut out).await;

        // No live frames arrived, the timer alone ended the stream
        assert_eq!(outcome, SessionOutcome::LimitReached);
        assert_eq!(count(&out, b"Content-Type: image/jpeg"), 1);
        assert!(out.ends_with(&section(still.data())));
    }

    #[tokio::test]
    async fn test_no_limit_runs_until_source_closes() {
        let distributor = Distributor::new(Arc::new(AllowAll));
        let (tx, rx) = mpsc::channel(1);
        let session = ViewerSession::open(&distributor, Arc::new(AllowAll), ViewConfig::default()).unwrap();
        let source = distributor.spawn(FrameChannel::from_receiver(rx));

        let viewer = tokio::spawn(async move {
            let mut out = Vec::new();
            let outcome = session.run(&mut out).await;
            (outcome, out)
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(tx);
        source.await.unwrap();

        let (outcome, out) = tokio::time::timeout(Duration::from_secs(5), viewer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, SessionOutcome::SourceClosed);
        assert_eq!(out, b"--jpegBoundary\r\n");
    }

    #[tokio::test]
    async fn test_write_error_unregisters() {
        let distributor = Distributor::new(Arc::new(AllowAll));
        let session = ViewerSession::open(&distributor, Arc::new(AllowAll), ViewConfig::default()).unwrap();
        assert_eq!(distributor.viewer_count(), 1);
        distributor.broadcast(frame(1, b"JPEGDATA"));

        let mut client = tokio_test::io::Builder::new()
            .write(b"--jpegBoundary\r\n")
            .write_error(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone"))
            .build();

        let outcome = session.run(&mut client).await;

        assert_eq!(outcome, SessionOutcome::ClientDisconnected);
        assert_eq!(distributor.viewer_count(), 0);
        assert_eq!(distributor.broadcast(frame(2, b"LATER")), 0);
    }

    #[tokio::test]
    async fn test_denied_frames_replaced_by_still() {
        let still = StillImage::from_image(&test_card(8, 8)).unwrap();
        let policy = Arc::new(LocalPolicy::new().deny_image(still.clone()));
        policy.set_denied(true);

        let distributor = Distributor::new(policy.clone());
        let session = ViewerSession::open(&distributor, policy, limited(100)).unwrap();
        distributor.broadcast(frame(1, b"SECRETLIVEFRAME"));

        let mut out = Vec::new();
        session.run(&mut out).await;

        assert_eq!(count(&out, b"SECRETLIVEFRAME"), 0);
        assert_eq!(count(&out, b"Content-Type: image/jpeg"), 1);
        assert!(out.ends_with(&section(still.data())));
    }

    #[tokio::test]
    async fn test_denied_without_image_skips_frame() {
        let policy = Arc::new(LocalPolicy::new());
        policy.set_denied(true);

        let distributor = Distributor::new(policy.clone());
        let session = ViewerSession::open(&distributor, policy, limited(100)).unwrap();
        distributor.broadcast(frame(1, b"SECRETLIVEFRAME"));

        let mut out = Vec::new();
        session.run(&mut out).await;

        assert_eq!(out, b"--jpegBoundary\r\n");
    }

    #[tokio::test]
    async fn test_limit_ends_stalled_write() {
        let still = StillImage::from_image(&test_card(8, 8)).unwrap();
        let distributor = Distributor::new(Arc::new(AllowAll));
        let config = limited(100).after_limit(still);
        let session = ViewerSession::open(&distributor, Arc::new(AllowAll), config).unwrap();
        distributor.broadcast(EncodedFrame::new(1, Bytes::from(vec![0xAB; 4096])));

        // The client stays connected but never reads
        let (mut writer, _reader) = tokio::io::duplex(64);
        let outcome = tokio::time::timeout(Duration::from_secs(2), session.run(&mut writer))
            .await
            .unwrap();

        assert_eq!(outcome, SessionOutcome::LimitReached);
        assert_eq!(distributor.viewer_count(), 0);
    }

    #[tokio::test]
    async fn test_after_limit_write_is_bounded() {
        let still = StillImage::from_image(&test_card(8, 8)).unwrap();
        let distributor = Distributor::new(Arc::new(AllowAll));
        let config = limited(50).after_limit(still);
        let session = ViewerSession::open(&distributor, Arc::new(AllowAll), config).unwrap();

        // Room for the opening delimiter and nothing else
        let (mut writer, _reader) = tokio::io::duplex(DELIMITER.len());
        let outcome = tokio::time::timeout(Duration::from_secs(5), session.run(&mut writer))
            .await
            .unwrap();

        assert_eq!(outcome, SessionOutcome::LimitReached);
        assert_eq!(distributor.viewer_count(), 0);
    }

    #[tokio::test]
    async fn test_open_rejected_by_policy() {
        let policy = Arc::new(LocalPolicy::new().max_viewers(0));
        let distributor = Distributor::new(policy.clone());

        let err = ViewerSession::open(&distributor, policy, ViewConfig::default()).unwrap_err();

        assert!(matches!(err, RegistryError::ViewerRejected(_)));
        assert_eq!(distributor.viewer_count(), 0);
    }
}
