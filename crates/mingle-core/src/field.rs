//! Floating attendee field simulation.
//!
//! Each on-screen avatar bubble is an explicit simulation record in an
//! indexed arena, advanced by a pure time step and rendered by
//! projection. Bubbles rise at a constant speed, wobble horizontally on
//! a sine wave, and recycle below the floor once they drift past the
//! top margin.

use rand::Rng;

/// Horizontal wobble amplitude in pixels.
const WOBBLE_AMPLITUDE: f32 = 15.0;
/// Wobble angular frequency in radians per second.
const WOBBLE_FREQUENCY: f32 = 1.5;
/// Bubbles recycle once they rise this far past the top edge.
const TOP_MARGIN: f32 = 200.0;
/// Recycled bubbles re-enter this far below the bottom edge.
const RESPAWN_OFFSET: f32 = 100.0;
/// Number of avatar ring palettes the renderer cycles through.
pub const PALETTE_COUNT: usize = 5;

/// Simulation record for one attendee bubble.
#[derive(Debug, Clone)]
pub struct Bubble {
    pub id: String,
    pub name: String,
    pub role: String,
    pub avatar_url: String,
    /// Current visual position.
    pub x: f32,
    pub y: f32,
    /// Center axis for the horizontal wobble.
    base_x: f32,
    /// Rising speed in pixels per second.
    speed: f32,
    /// Random sine phase offset so bubbles don't wobble in lockstep.
    wobble_offset: f32,
    pub radius: f32,
    pub palette: usize,
}

/// Arena of bubble records plus the field geometry.
pub struct FieldSim {
    width: f32,
    height: f32,
    elapsed: f32,
    bubbles: Vec<Bubble>,
}

impl FieldSim {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            width,
            height,
            elapsed: 0.0,
            bubbles: Vec::new(),
        }
    }

    /// Spawn one bubble at a random position with randomized size and
    /// speed. Palette index cycles with the spawn count.
    pub fn spawn<R: Rng>(
        &mut self,
        rng: &mut R,
        id: impl Into<String>,
        name: impl Into<String>,
        role: impl Into<String>,
        avatar_url: impl Into<String>,
    ) {
        let size_roll: f32 = rng.gen();
        let radius = if size_roll > 0.8 {
            60.0
        } else if size_roll < 0.3 {
            30.0
        } else {
            40.0
        };

        // Original per-frame speeds (0.5..2.0 px/frame at 60 fps) scaled
        // to pixels per second.
        let speed = (0.5 + rng.gen::<f32>() * 1.5) * 60.0;
        let base_x = rng.gen_range(50.0..(self.width - 100.0).max(51.0));
        let y = rng.gen_range(0.0..self.height.max(1.0));

        let palette = self.bubbles.len() % PALETTE_COUNT;
        self.bubbles.push(Bubble {
            id: id.into(),
            name: name.into(),
            role: role.into(),
            avatar_url: avatar_url.into(),
            x: base_x,
            y,
            base_x,
            speed,
            wobble_offset: rng.gen_range(0.0..std::f32::consts::TAU),
            radius,
            palette,
        });
    }

    /// Advance every bubble by `dt` seconds. Pure step: same state and
    /// dt always produce the same next state.
    pub fn advance(&mut self, dt: f32) {
        self.elapsed += dt;
        let time = self.elapsed;
        for b in &mut self.bubbles {
            b.y -= b.speed * dt;
            if b.y < -TOP_MARGIN {
                b.y = self.height + RESPAWN_OFFSET;
            }
            b.x = b.base_x + (time * WOBBLE_FREQUENCY + b.wobble_offset).sin() * WOBBLE_AMPLITUDE;
        }
    }

    /// Drop bubbles whose ids are no longer in the attendee feed.
    pub fn retain_ids(&mut self, keep: &[String]) {
        self.bubbles.retain(|b| keep.contains(&b.id));
    }

    pub fn contains(&self, id: &str) -> bool {
        self.bubbles.iter().any(|b| b.id == id)
    }

    pub fn bubbles(&self) -> &[Bubble] {
        &self.bubbles
    }

    pub fn len(&self) -> usize {
        self.bubbles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bubbles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn sim_with_one_bubble(seed: u64) -> FieldSim {
        let mut sim = FieldSim::new(800.0, 600.0);
        let mut rng = StdRng::seed_from_u64(seed);
        sim.spawn(&mut rng, "a1", "Nok", "Developer", "https://example.test/a.png");
        sim
    }

    #[test]
    fn test_bubbles_rise() {
        let mut sim = sim_with_one_bubble(7);
        let y0 = sim.bubbles()[0].y;
        sim.advance(0.5);
        assert!(sim.bubbles()[0].y < y0);
    }

    #[test]
    fn test_bubble_recycles_below_floor() {
        let mut sim = sim_with_one_bubble(7);
        // Step in small increments until the bubble crosses the top margin.
        for _ in 0..10_000 {
            sim.advance(0.05);
            let y = sim.bubbles()[0].y;
            assert!(y >= -TOP_MARGIN - 10.0, "bubble escaped past the margin");
            if y > 600.0 {
                return; // recycled below the floor
            }
        }
        panic!("bubble never recycled");
    }

    #[test]
    fn test_wobble_stays_within_amplitude() {
        let mut sim = sim_with_one_bubble(42);
        let base_x = sim.bubbles()[0].base_x;
        for _ in 0..300 {
            sim.advance(0.016);
            let x = sim.bubbles()[0].x;
            assert!((x - base_x).abs() <= WOBBLE_AMPLITUDE + 1e-3);
        }
    }

    #[test]
    fn test_deterministic_advance() {
        let mut a = sim_with_one_bubble(9);
        let mut b = sim_with_one_bubble(9);
        for _ in 0..100 {
            a.advance(0.016);
            b.advance(0.016);
        }
        assert_eq!(a.bubbles()[0].x, b.bubbles()[0].x);
        assert_eq!(a.bubbles()[0].y, b.bubbles()[0].y);
    }

    #[test]
    fn test_retain_ids_drops_stale_bubbles() {
        let mut sim = FieldSim::new(800.0, 600.0);
        let mut rng = StdRng::seed_from_u64(3);
        sim.spawn(&mut rng, "a1", "Nok", "", "");
        sim.spawn(&mut rng, "a2", "Mai", "", "");
        sim.retain_ids(&["a2".to_string()]);
        assert_eq!(sim.len(), 1);
        assert!(sim.contains("a2"));
        assert!(!sim.contains("a1"));
    }

    #[test]
    fn test_palette_cycles() {
        let mut sim = FieldSim::new(800.0, 600.0);
        let mut rng = StdRng::seed_from_u64(1);
        for i in 0..(PALETTE_COUNT + 2) {
            sim.spawn(&mut rng, format!("a{i}"), "x", "", "");
        }
        assert_eq!(sim.bubbles()[0].palette, 0);
        assert_eq!(sim.bubbles()[PALETTE_COUNT].palette, 0);
        assert_eq!(sim.bubbles()[1].palette, 1);
    }
}
