//! # Interpolation Buffer
//!
//! Remote player poses are rendered a fixed delay in the past so there are
//! usually two frames bracketing the render time. Frames are kept sorted by
//! send time, so out-of-order delivery needs no sequence numbers. Outside the
//! buffered range the nearest frame is held; nothing is extrapolated.
//! Yaw is interpolated along the shorter arc.

use std::{
    collections::BTreeMap,
    f64::consts::{PI, TAU},
};

use super::protocol::{PlayerStateFrame, Rotation, Vector3};

pub const DEFAULT_INTERPOLATION_DELAY_MS: f64 = 100.0;
pub const DEFAULT_MAX_BUFFERED_FRAMES: usize = 20;

/// A remote player's pose at a render time.
#[derive(Clone, Debug, PartialEq)]
pub struct InterpolatedPlayerState {
    pub peer_id: String,
    /// Tick of the later bracketing frame.
    pub tick: u64,
    pub sampled_at_ms: f64,
    pub position: Vector3,
    pub velocity: Vector3,
    pub rotation: Rotation,
}

impl InterpolatedPlayerState {
    fn from_frame(frame: &PlayerStateFrame, sampled_at_ms: f64) -> Self {
        InterpolatedPlayerState {
            peer_id: frame.peer_id.clone(),
            tick: frame.tick,
            sampled_at_ms,
            position: frame.position,
            velocity: frame.velocity,
            rotation: frame.rotation,
        }
    }
}

fn lerp(a: f64, b: f64, alpha: f64) -> f64 {
    a + (b - a) * alpha
}

/// Interpolates an angle in radians along the shorter arc.
fn lerp_angle(a: f64, b: f64, alpha: f64) -> f64 {
    let mut delta = (b - a).rem_euclid(TAU);
    if delta > PI {
        delta -= TAU;
    }
    a + delta * alpha
}

fn lerp_vector(a: Vector3, b: Vector3, alpha: f64) -> Vector3 {
    Vector3::new(lerp(a.x, b.x, alpha), lerp(a.y, b.y, alpha), lerp(a.z, b.z, alpha))
}

pub struct PlayerInterpolationBuffer {
    interpolation_delay_ms: f64,
    max_buffered_frames: usize,
    frames_by_peer: BTreeMap<String, Vec<PlayerStateFrame>>,
}

impl Default for PlayerInterpolationBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_INTERPOLATION_DELAY_MS, DEFAULT_MAX_BUFFERED_FRAMES)
    }
}

impl PlayerInterpolationBuffer {
    pub fn new(interpolation_delay_ms: f64, max_buffered_frames: usize) -> Self {
        PlayerInterpolationBuffer {
            interpolation_delay_ms,
            max_buffered_frames: max_buffered_frames.max(1),
            frames_by_peer: BTreeMap::new(),
        }
    }

    /// Inserts a frame in send-time order, dropping the oldest past capacity.
    /// Frames with equal send times keep arrival order.
    pub fn push(&mut self, frame: PlayerStateFrame) {
        let frames = self.frames_by_peer.entry(frame.peer_id.clone()).or_default();
        let at = frames.partition_point(|f| f.envelope.sent_at_ms <= frame.envelope.sent_at_ms);
        frames.insert(at, frame);

        if frames.len() > self.max_buffered_frames {
            let excess = frames.len() - self.max_buffered_frames;
            frames.drain(..excess);
        }
    }

    /// Samples a peer at `render_time_ms - delay`.
    ///
    /// # Returns
    /// `None` if nothing is buffered for the peer. A single buffered frame is
    /// returned as is.
    pub fn sample(&self, peer_id: &str, render_time_ms: f64) -> Option<InterpolatedPlayerState> {
        let frames = self.frames_by_peer.get(peer_id)?;
        let (first, last) = (frames.first()?, frames.last()?);
        if frames.len() == 1 {
            return Some(InterpolatedPlayerState::from_frame(first, render_time_ms));
        }

        let target = render_time_ms - self.interpolation_delay_ms;
        let (previous, next) = frames
            .windows(2)
            .find(|pair| pair[0].envelope.sent_at_ms as f64 <= target && pair[1].envelope.sent_at_ms as f64 >= target)
            .map(|pair| (&pair[0], &pair[1]))
            .unwrap_or((first, last));

        let (start, end) = (previous.envelope.sent_at_ms as f64, next.envelope.sent_at_ms as f64);
        if target <= start {
            return Some(InterpolatedPlayerState::from_frame(previous, render_time_ms));
        }
        if target >= end {
            return Some(InterpolatedPlayerState::from_frame(next, render_time_ms));
        }

        let range = end - start;
        let alpha = if range == 0.0 { 0.0 } else { (target - start) / range };

        Some(InterpolatedPlayerState {
            peer_id: peer_id.to_owned(),
            tick: next.tick,
            sampled_at_ms: render_time_ms,
            position: lerp_vector(previous.position, next.position, alpha),
            velocity: lerp_vector(previous.velocity, next.velocity, alpha),
            rotation: Rotation {
                yaw: lerp_angle(previous.rotation.yaw, next.rotation.yaw, alpha),
                pitch: lerp(previous.rotation.pitch, next.rotation.pitch, alpha),
                roll: lerp(previous.rotation.roll, next.rotation.roll, alpha),
            },
        })
    }

    /// Samples every buffered peer.
    pub fn sample_all(&self, render_time_ms: f64) -> BTreeMap<String, InterpolatedPlayerState> {
        self.frames_by_peer
            .keys()
            .filter_map(|peer_id| Some((peer_id.clone(), self.sample(peer_id, render_time_ms)?)))
            .collect()
    }

    pub fn remove_peer(&mut self, peer_id: &str) {
        self.frames_by_peer.remove(peer_id);
    }

    pub fn clear(&mut self) {
        self.frames_by_peer.clear();
    }

    pub fn buffered_frames(&self, peer_id: &str) -> usize {
        self.frames_by_peer.get(peer_id).map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::protocol::Envelope;

    fn frame(peer: &str, sent_at_ms: u64, tick: u64, x: f64) -> PlayerStateFrame {
        PlayerStateFrame {
            envelope: Envelope::new("room", sent_at_ms),
            peer_id: peer.to_owned(),
            tick,
            position: Vector3::new(x, 0.0, 0.0),
            velocity: Vector3::new(x * 2.0, 0.0, 0.0),
            rotation: Rotation { yaw: x * 0.1, pitch: 0.0, roll: 0.0 },
        }
    }

    #[test]
    fn unknown_peer_samples_nothing() {
        assert!(PlayerInterpolationBuffer::default().sample("nobody", 0.0).is_none());
    }

    #[test]
    fn single_frame_is_returned_as_is() {
        let mut buffer = PlayerInterpolationBuffer::default();
        buffer.push(frame("a", 1000, 7, 3.0));
        let state = buffer.sample("a", 5000.0).unwrap();
        assert_eq!(state.position.x, 3.0);
        assert_eq!(state.tick, 7);
        assert_eq!(state.sampled_at_ms, 5000.0);
    }

    #[test]
    fn interpolates_between_bracketing_frames_out_of_order() {
        let mut buffer = PlayerInterpolationBuffer::new(100.0, 20);
        buffer.push(frame("a", 1100, 2, 10.0));
        buffer.push(frame("a", 1000, 1, 0.0));
        let state = buffer.sample("a", 1150.0).unwrap();
        assert!((state.position.x - 5.0).abs() < 1e-9);
        assert!((state.velocity.x - 10.0).abs() < 1e-9);
        assert!((state.rotation.yaw - 0.5).abs() < 1e-9);
        assert_eq!(state.tick, 2);
    }

    #[test]
    fn yaw_turns_the_short_way_across_the_seam() {
        let mut buffer = PlayerInterpolationBuffer::new(0.0, 20);
        let mut before = frame("a", 0, 1, 0.0);
        before.rotation.yaw = PI - 0.1;
        let mut after = frame("a", 100, 2, 0.0);
        after.rotation.yaw = -PI + 0.1;
        buffer.push(before);
        buffer.push(after);

        let yaw = buffer.sample("a", 50.0).unwrap().rotation.yaw;
        assert!((yaw - PI).abs() < 1e-9);
    }

    #[test]
    fn clamps_outside_the_buffered_range() {
        let mut buffer = PlayerInterpolationBuffer::new(100.0, 20);
        buffer.push(frame("a", 1000, 1, 0.0));
        buffer.push(frame("a", 1100, 2, 10.0));
        assert_eq!(buffer.sample("a", 500.0).unwrap().position.x, 0.0);
        assert_eq!(buffer.sample("a", 5000.0).unwrap().position.x, 10.0);
    }

    #[test]
    fn oldest_frames_are_trimmed() {
        let mut buffer = PlayerInterpolationBuffer::new(0.0, 3);
        for i in 0..5u64 {
            buffer.push(frame("a", i * 10, i, i as f64));
        }
        assert_eq!(buffer.buffered_frames("a"), 3);
        assert_eq!(buffer.sample("a", 0.0).unwrap().position.x, 2.0);
    }

    #[test]
    fn sample_all_and_removal() {
        let mut buffer = PlayerInterpolationBuffer::default();
        buffer.push(frame("a", 0, 0, 1.0));
        buffer.push(frame("b", 0, 0, 2.0));
        assert_eq!(buffer.sample_all(0.0).len(), 2);
        buffer.remove_peer("a");
        assert_eq!(buffer.sample_all(0.0).keys().collect::<Vec<_>>(), vec!["b"]);
        buffer.clear();
        assert!(buffer.sample_all(0.0).is_empty());
    }
}
