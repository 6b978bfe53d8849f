//! Server-side movement validation.
//!
//! Every step the room asks [`AntiCheat::validate`] for a verdict on each car,
//! then hands the verdict to [`AntiCheat::apply`]. Input flooding is checked
//! separately as inputs arrive. The checks are heuristics: they correct or
//! remove impossible behaviour, they do not prove anything.

use crate::participant::ParticipantState;
use log::trace;
use shared::{
    max_rating_rate, road_curve, EXPLOSION_TOLERANCE, MAX_INPUTS_PER_TICK, MAX_SPEED,
    MAX_VIOLATIONS, RATING_TOLERANCE, ROAD_WIDTH, SPEED_TOLERANCE,
};
use std::time::Instant;

/// Outcome of a validation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Valid,
    /// Snap back to the last validated position
    Rubberband,
    Explode,
    /// Remove the participant from the room
    Kick,
    /// Drop the input that triggered the check
    IgnoreInput,
}

/// Validation limits.
#[derive(Debug, Clone)]
pub struct AntiCheat {
    pub max_speed: f64,
    pub speed_tolerance: f64,
    pub max_violations: u32,
    pub max_inputs_per_tick: u32,
    pub road_width: f64,
    pub explosion_tolerance: f64,
    pub rating_tolerance: f64,
}

impl Default for AntiCheat {
    fn default() -> Self {
        Self {
            max_speed: MAX_SPEED,
            speed_tolerance: SPEED_TOLERANCE,
            max_violations: MAX_VIOLATIONS,
            max_inputs_per_tick: MAX_INPUTS_PER_TICK,
            road_width: ROAD_WIDTH,
            explosion_tolerance: EXPLOSION_TOLERANCE,
            rating_tolerance: RATING_TOLERANCE,
        }
    }
}

impl AntiCheat {
    /// Farthest a car may legitimately travel in `dt` seconds.
    pub fn max_displacement(&self, dt: f64) -> f64 {
        self.max_speed * dt * self.speed_tolerance
    }

    /// Lateral distance from the centerline past which a car is destroyed outright.
    pub fn boundary_limit(&self) -> f64 {
        self.road_width * 0.5 + self.road_width * self.explosion_tolerance * 1.5
    }

    /// Runs every per-step check against the car's post-collision state.
    ///
    /// The displacement check decides between `Valid`, `Rubberband` and `Kick`.
    /// Speed and rating are clamped in place regardless of that outcome, and a
    /// car past the boundary limit is always exploded unless it is being kicked.
    /// A legal move that ends out of bounds still becomes the new baseline.
    pub fn validate(&self, state: &mut ParticipantState, dt: f64) -> Verdict {
        let verdict = self.check_displacement(state, dt);
        self.clamp_speed(state);
        self.clamp_rating(state);

        if verdict != Verdict::Kick && self.is_out_of_bounds(state) {
            if verdict == Verdict::Valid {
                state.save_valid_position();
            }
            return Verdict::Explode;
        }
        verdict
    }

    fn check_displacement(&self, state: &mut ParticipantState, dt: f64) -> Verdict {
        let dx = state.car.x - state.last_valid_x;
        let dy = state.car.y - state.last_valid_y;
        let distance = (dx * dx + dy * dy).sqrt();

        if distance > self.max_displacement(dt) {
            state.violations += 1;
            if state.violations > self.max_violations {
                return Verdict::Kick;
            }
            return Verdict::Rubberband;
        }
        Verdict::Valid
    }

    fn clamp_speed(&self, state: &mut ParticipantState) {
        if state.car.speed.abs() > self.max_speed * self.speed_tolerance {
            state.car.speed = self.max_speed.copysign(state.car.speed);
            state.violations += 1;
        }
    }

    fn clamp_rating(&self, state: &mut ParticipantState) {
        let ceiling = state.active_secs * max_rating_rate();
        if state.car.rating > ceiling * self.rating_tolerance {
            state.car.rating = ceiling;
            state.violations += 1;
        }
    }

    pub fn is_out_of_bounds(&self, state: &ParticipantState) -> bool {
        (state.car.x - road_curve(state.car.y)).abs() > self.boundary_limit()
    }

    /// Counts an incoming input against this step's budget.
    pub fn check_input_rate(&self, state: &mut ParticipantState) -> Verdict {
        state.inputs_this_tick += 1;
        if state.inputs_this_tick > self.max_inputs_per_tick {
            trace!("dropping input #{} this tick", state.inputs_this_tick);
            return Verdict::IgnoreInput;
        }
        Verdict::Valid
    }

    /// Applies a verdict to the participant. Kicks are carried out by the room.
    /// Returns true when this call exploded a live car.
    pub fn apply(&self, state: &mut ParticipantState, verdict: Verdict, now: Instant) -> bool {
        match verdict {
            Verdict::Valid => {
                state.save_valid_position();
                false
            }
            Verdict::Rubberband => {
                state.rubberband();
                false
            }
            Verdict::Explode => state.explode(now),
            Verdict::Kick | Verdict::IgnoreInput => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    const DT: f64 = 1.0 / 60.0;

    fn state() -> ParticipantState {
        ParticipantState::at_start(Instant::now())
    }

    #[test]
    fn test_limits() {
        let ac = AntiCheat::default();
        assert_approx_eq!(ac.max_displacement(DT), 1400.0 * DT * 1.1, 1e-9);
        assert_approx_eq!(ac.boundary_limit(), 410.0, 1e-9);
    }

    #[test]
    fn test_legal_move_is_valid() {
        let ac = AntiCheat::default();
        let mut s = state();
        s.car.y += 20.0;
        s.violations = 3;

        let verdict = ac.validate(&mut s, DT);
        assert_eq!(verdict, Verdict::Valid);

        ac.apply(&mut s, verdict, Instant::now());
        assert_eq!(s.violations, 0);
        assert_eq!(s.last_valid_y, 20.0);
    }

    #[test]
    fn test_teleport_rubberbands() {
        let ac = AntiCheat::default();
        let mut s = state();
        let start_x = s.car.x;
        s.car.x += 60.0;

        let verdict = ac.validate(&mut s, DT);
        assert_eq!(verdict, Verdict::Rubberband);
        assert_eq!(s.violations, 1);

        ac.apply(&mut s, verdict, Instant::now());
        assert_eq!(s.car.x, start_x);
        assert_eq!(s.violations, 2);
    }

    #[test]
    fn test_repeated_teleports_kick() {
        let ac = AntiCheat::default();
        let mut s = state();
        let mut offending = 0;

        loop {
            offending += 1;
            s.car.x += 60.0;
            let verdict = ac.validate(&mut s, DT);
            if verdict == Verdict::Kick {
                break;
            }
            assert_eq!(verdict, Verdict::Rubberband);
            ac.apply(&mut s, verdict, Instant::now());
            assert!(offending < 6);
        }

        assert!(offending <= 6);
    }

    #[test]
    fn test_speed_clamped_even_when_rubberbanded() {
        let ac = AntiCheat::default();
        let mut s = state();
        s.car.x += 60.0;
        s.car.speed = -5000.0;

        let verdict = ac.validate(&mut s, DT);
        assert_eq!(verdict, Verdict::Rubberband);
        assert_eq!(s.car.speed, -1400.0);
        assert_eq!(s.violations, 2);
    }

    #[test]
    fn test_speed_within_tolerance_untouched() {
        let ac = AntiCheat::default();
        let mut s = state();
        s.car.speed = 1500.0;

        ac.validate(&mut s, DT);
        assert_eq!(s.car.speed, 1500.0);
        assert_eq!(s.violations, 0);
    }

    #[test]
    fn test_boundary_explodes() {
        let ac = AntiCheat::default();
        let mut s = state();
        s.car.x = road_curve(0.0) + 411.0;
        s.last_valid_x = s.car.x;

        let verdict = ac.validate(&mut s, DT);
        assert_eq!(verdict, Verdict::Explode);

        assert!(ac.apply(&mut s, verdict, Instant::now()));
        assert!(s.car.exploded);
        assert!(!ac.apply(&mut s, Verdict::Explode, Instant::now()));
    }

    #[test]
    fn test_boundary_after_teleport_keeps_violations() {
        let ac = AntiCheat::default();
        let mut s = state();
        s.car.x = road_curve(0.0) + 420.0;
        s.last_valid_x = road_curve(0.0);

        let verdict = ac.validate(&mut s, DT);
        assert_eq!(verdict, Verdict::Explode);
        assert_eq!(s.violations, 1);
    }

    #[test]
    fn test_legal_move_out_of_bounds_saves_baseline() {
        let ac = AntiCheat::default();
        let mut s = state();
        s.last_valid_x = road_curve(0.0) + 400.0;
        s.car.x = road_curve(0.0) + 415.0;
        s.violations = 4;

        let verdict = ac.validate(&mut s, DT);
        assert_eq!(verdict, Verdict::Explode);
        assert_eq!(s.violations, 0);
        assert_eq!(s.last_valid_x, s.car.x);

        assert!(ac.apply(&mut s, verdict, Instant::now()));
        assert!(s.car.exploded);
    }

    #[test]
    fn test_boundary_edge() {
        let ac = AntiCheat::default();
        let mut s = state();
        s.car.x = road_curve(0.0) + 409.0;
        assert!(!ac.is_out_of_bounds(&s));
        s.car.x = road_curve(0.0) - 411.0;
        assert!(ac.is_out_of_bounds(&s));
    }

    #[test]
    fn test_rating_ceiling() {
        let ac = AntiCheat::default();
        let mut s = state();
        s.active_secs = 10.0;
        s.car.rating = 1000.0;

        ac.validate(&mut s, DT);
        assert_eq!(s.car.rating, 1000.0);

        s.car.rating = 5000.0;
        ac.validate(&mut s, DT);
        assert_approx_eq!(s.car.rating, 980.0, 1e-9);
        assert_eq!(s.violations, 1);
    }

    #[test]
    fn test_input_rate() {
        let ac = AntiCheat::default();
        let mut s = state();
        for _ in 0..3 {
            assert_eq!(ac.check_input_rate(&mut s), Verdict::Valid);
        }
        assert_eq!(ac.check_input_rate(&mut s), Verdict::IgnoreInput);

        s.inputs_this_tick = 0;
        assert_eq!(ac.check_input_rate(&mut s), Verdict::Valid);
    }
}
