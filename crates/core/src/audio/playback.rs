use std::{sync::Arc, time::Duration};

use crate::timeline::{Clock, DecodedTrack};

/// The audio being played alongside an export.
pub trait PlaybackSource {
    /// Seeks back to the start of the track.
    fn restart(&mut self);

    fn play(&mut self);

    fn pause(&mut self);

    fn position_seconds(&self) -> f64;

    /// The decoded asset handed to the muxer once rendering ends.
    fn asset(&self) -> &DecodedTrack;

    fn duration_seconds(&self) -> f64 {
        self.asset().duration_seconds()
    }

    fn is_ended(&self) -> bool {
        self.position_seconds() >= self.duration_seconds()
    }
}

/// Playback whose position advances with a [`Clock`]. With a
/// [`crate::SystemClock`] this tracks real time, with a
/// [`crate::ManualClock`] it follows whatever drives the clock.
#[derive(Debug, Clone)]
pub struct ClockedPlayback<C> {
    track: Arc<DecodedTrack>,
    clock: C,
    offset: Duration,
    started_at: Option<Duration>,
}

impl<C: Clock> ClockedPlayback<C> {
    pub fn new(track: Arc<DecodedTrack>, clock: C) -> Self {
        Self {
            track,
            clock,
            offset: Duration::ZERO,
            started_at: None,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.started_at.is_some()
    }

    fn position(&self) -> Duration {
        match self.started_at {
            Some(started_at) => self.offset + self.clock.now().saturating_sub(started_at),
            None => self.offset,
        }
    }
}

impl<C: Clock> PlaybackSource for ClockedPlayback<C> {
    fn restart(&mut self) {
        self.offset = Duration::ZERO;
        if self.started_at.is_some() {
            self.started_at = Some(self.clock.now());
        }
    }

    fn play(&mut self) {
        if self.started_at.is_none() {
            self.started_at = Some(self.clock.now());
        }
    }

    fn pause(&mut self) {
        self.offset = self.position();
        self.started_at = None;
    }

    fn position_seconds(&self) -> f64 {
        self.position().as_secs_f64()
    }

    fn asset(&self) -> &DecodedTrack {
        &self.track
    }
}
