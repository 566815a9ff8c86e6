//! Randomized timings and click positions for human-like interaction.
//!
//! Everything here is pure and takes the RNG explicitly, so callers draw
//! all values up front and never hold a thread-local RNG across an await.

use std::time::Duration;

use rand::Rng;

use crate::engine::BoundingBox;

pub const KEY_DELAY_MS: (u64, u64) = (50, 150);
pub const PRE_CLICK_PAUSE_MS: (u64, u64) = (100, 300);

/// One delay per character of `text`.
pub fn typing_delays<R: Rng + ?Sized>(text: &str, rng: &mut R) -> Vec<Duration> {
    text.chars()
        .map(|_| Duration::from_millis(rng.gen_range(KEY_DELAY_MS.0..=KEY_DELAY_MS.1)))
        .collect()
}

pub fn pre_click_pause<R: Rng + ?Sized>(rng: &mut R) -> Duration {
    Duration::from_millis(rng.gen_range(PRE_CLICK_PAUSE_MS.0..=PRE_CLICK_PAUSE_MS.1))
}

/// A point in the middle half of the box on each axis, away from the edges.
pub fn click_point<R: Rng + ?Sized>(bbox: &BoundingBox, rng: &mut R) -> (f64, f64) {
    let fx: f64 = rng.gen_range(0.25..=0.75);
    let fy: f64 = rng.gen_range(0.25..=0.75);
    (bbox.x + bbox.width * fx, bbox.y + bbox.height * fy)
}
