//! Frame source configuration

use std::time::Duration;

use tokio::process::Command;

use crate::media::DEFAULT_MAX_FRAME_SIZE;

/// What the source does when the distributor has not taken the previous frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryPolicy {
    /// Discard the new frame and keep the encoder running
    #[default]
    DropWhenFull,
    /// Stop the encoder, hold the new frame until it is taken, then restart
    ///
    /// Saves CPU when nobody is watching, at the cost of one stale frame and
    /// an encoder start-up delay when the first viewer returns.
    PauseOnIdle,
}

/// Configuration for the external encoder process
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Program to run
    pub program: String,

    /// Arguments passed to the program
    pub args: Vec<String>,

    /// Behavior when the output slot is still occupied
    pub delivery: DeliveryPolicy,

    /// Read buffer cap while searching for an end-of-image marker
    pub max_frame_size: usize,

    /// Pause between a session ending and the next spawn (zero = immediate)
    pub restart_delay: Duration,
}

impl SourceConfig {
    /// Configure ffmpeg to read `source`, apply the `filters` graph and write
    /// concatenated JPEG images to stdout
    pub fn ffmpeg(source: impl Into<String>, filters: impl Into<String>) -> Self {
        Self::command("ffmpeg", ffmpeg_args(&source.into(), &filters.into()))
    }

    /// Run an arbitrary program that writes concatenated JPEG images to stdout
    pub fn command<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            delivery: DeliveryPolicy::default(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            restart_delay: Duration::ZERO,
        }
    }

    /// Replace the program path, keeping the arguments
    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Set the delivery policy
    pub fn delivery(mut self, policy: DeliveryPolicy) -> Self {
        self.delivery = policy;
        self
    }

    /// Shorthand for `delivery(DeliveryPolicy::PauseOnIdle)`
    pub fn pause_on_idle(self) -> Self {
        self.delivery(DeliveryPolicy::PauseOnIdle)
    }

    /// Set the read buffer cap
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Set the restart delay
    pub fn restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    pub(crate) fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

fn ffmpeg_args(source: &str, filters: &str) -> Vec<String> {
    let mut args: Vec<String> = ["-nostdin", "-loglevel", "error", "-i", source, "-an"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    if !filters.trim().is_empty() {
        args.push("-vf".into());
        args.push(filters.into());
    }
    args.extend(
        ["-y", "-f", "image2pipe", "-vcodec", "mjpeg", "-"]
            .iter()
            .map(|s| s.to_string()),
    );
    args
}
