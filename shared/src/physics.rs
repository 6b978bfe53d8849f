//! Fixed-step car physics.
//!
//! The integrator is a pure function so the server and a predicting client
//! produce identical results from identical inputs. Evaluation order matters:
//! friction is applied before acceleration, steering before forward motion,
//! and the rating is accrued last.

use crate::{
    road_curve, ACCELERATION, ANALOG_DEADZONE, ANGLE_DECAY, BRAKING, CAR_WIDTH,
    COLLISION_DAMPING, COLLISION_RADIUS, EXPLOSION_TOLERANCE, FRICTION_OFFROAD, FRICTION_ROAD,
    INERTIA_DAMPENING, KEY_DOWN, KEY_LEFT, KEY_RIGHT, KEY_UP, MAX_SPEED, MAX_STEER_ANGLE,
    MIN_TURN_AUTHORITY, MIN_TURN_SPEED, OFFROAD_DRAG, PUSH_BASE_SPEED, PUSH_FORCE,
    REVERSE_SPEED_RATIO, ROAD_WIDTH, SPEED_DIFF_MULTIPLIER, SPEED_DIFF_THRESHOLD, TURN_SPEED,
    TURN_SPEED_PENALTY,
};
use serde::{Deserialize, Serialize};

/// Kinematic state of one car.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CarState {
    pub x: f64,
    pub y: f64,
    pub speed: f64,
    /// Visual heading in degrees, within `±MAX_STEER_ANGLE`.
    pub angle: f64,
    pub rating: f64,
    pub exploded: bool,
}

impl CarState {
    /// A stationary car on the centerline at forward position `y`.
    pub fn on_centerline(y: f64) -> Self {
        Self {
            x: road_curve(y),
            y,
            ..Self::default()
        }
    }

    /// Signed distance past the road edge; positive once the car's center left the asphalt.
    pub fn edge_distance(&self) -> f64 {
        (self.x - road_curve(self.y)).abs() - ROAD_WIDTH / 2.0
    }

    pub fn is_off_road(&self) -> bool {
        self.edge_distance() > -CAR_WIDTH / 2.0
    }
}

/// Control state decoded from the most recent accepted input.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ControlInput {
    pub sequence: u8,
    /// Bitfield of `KEY_UP`, `KEY_DOWN`, `KEY_LEFT`, `KEY_RIGHT`.
    pub keys: u8,
    /// Normalized analog steering in `[-1, 1]`.
    pub steering: f64,
    /// Normalized analog throttle in `[-1, 1]`.
    pub throttle: f64,
    pub flags: u8,
}

impl ControlInput {
    pub fn from_keys(keys: u8) -> Self {
        Self {
            keys,
            ..Self::default()
        }
    }

    /// Acceleration and turn direction; analog axes override keys past the deadzone.
    pub fn forces(&self) -> (f64, f64) {
        let mut acc_force = 0.0;
        let mut turn_dir = 0.0;

        if self.keys & KEY_UP != 0 {
            acc_force = ACCELERATION;
        }
        if self.keys & KEY_DOWN != 0 {
            acc_force = -BRAKING;
        }
        if self.keys & KEY_LEFT != 0 {
            turn_dir = -1.0;
        }
        if self.keys & KEY_RIGHT != 0 {
            turn_dir = 1.0;
        }

        if self.throttle.abs() > ANALOG_DEADZONE {
            acc_force = if self.throttle > 0.0 {
                ACCELERATION * self.throttle
            } else {
                BRAKING * self.throttle
            };
        }
        if self.steering.abs() > ANALOG_DEADZONE {
            turn_dir = self.steering;
        }

        (acc_force, turn_dir)
    }
}

/// Advances one car by `dt` seconds and returns the new state.
///
/// An exploded car is returned unchanged. A car whose edge distance exceeds the
/// explosion tolerance detonates: it is flagged, its rating is zeroed and no
/// further integration happens this step.
pub fn integrate(state: &CarState, input: &ControlInput, dt: f64) -> CarState {
    let mut next = *state;
    if next.exploded {
        return next;
    }

    let (acc_force, turn_dir) = input.forces();

    let edge_dist = next.edge_distance();
    let off_road = edge_dist > -CAR_WIDTH / 2.0;

    if edge_dist > ROAD_WIDTH * EXPLOSION_TOLERANCE {
        next.exploded = true;
        next.rating = 0.0;
        return next;
    }

    let friction = if off_road {
        FRICTION_OFFROAD
    } else {
        FRICTION_ROAD
    };

    if acc_force == 0.0 {
        if next.speed > 0.0 {
            next.speed = (next.speed - friction * dt).max(0.0);
        } else if next.speed < 0.0 {
            next.speed = (next.speed + friction * dt).min(0.0);
        }
    }

    if off_road && acc_force != 0.0 {
        next.speed -= next.speed * OFFROAD_DRAG * dt;
    }

    next.speed += acc_force * dt;
    next.speed = next.speed.min(MAX_SPEED).max(-MAX_SPEED * REVERSE_SPEED_RATIO);

    let speed_ratio = next.speed.abs() / MAX_SPEED;
    let understeer = (1.0 - speed_ratio * INERTIA_DAMPENING).max(MIN_TURN_AUTHORITY);

    if turn_dir.abs() > 0.01 && next.speed.abs() > MIN_TURN_SPEED {
        next.x += turn_dir * TURN_SPEED * understeer * dt;
        next.angle = turn_dir * MAX_STEER_ANGLE * understeer;
        next.speed *= 1.0 - TURN_SPEED_PENALTY * turn_dir.abs() * dt;
    } else {
        next.angle *= ANGLE_DECAY;
    }

    next.y += next.speed * dt;

    if next.speed > 0.0 {
        let speed_factor = next.speed / 100.0;
        next.rating += speed_factor * speed_factor * dt * 0.5;
    }

    next
}

/// Pushes `a` away from `b` if they overlap. Only `a` is displaced and damped;
/// callers resolve each unordered pair once, so `b` keeps its state for this pair.
///
/// Returns true if a collision was resolved.
pub fn resolve_collision(a: &mut CarState, b: &CarState, dt: f64) -> bool {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    let dist = (dx * dx + dy * dy).sqrt();

    if dist >= COLLISION_RADIUS || dist == 0.0 {
        return false;
    }

    let nx = dx / dist;
    let ny = dy / dist;
    let speed_diff = a.speed - b.speed;

    let mut push = PUSH_FORCE * (a.speed.abs() + PUSH_BASE_SPEED) * dt;
    if speed_diff > SPEED_DIFF_THRESHOLD {
        push *= SPEED_DIFF_MULTIPLIER;
    }

    a.x += nx * push;
    a.y += ny * push;
    a.speed *= COLLISION_DAMPING;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    const DT: f64 = 1.0 / 60.0;

    #[test]
    fn test_accelerate_from_rest() {
        let state = CarState::on_centerline(0.0);
        let next = integrate(&state, &ControlInput::from_keys(KEY_UP), DT);

        assert_approx_eq!(next.speed, 15.0, 1e-9);
        assert_approx_eq!(next.y, 15.0 * DT, 1e-9);
        assert_eq!(next.x, state.x);
        assert!(!next.exploded);
    }

    #[test]
    fn test_rating_accrues_with_speed() {
        let state = CarState::on_centerline(0.0);
        let next = integrate(&state, &ControlInput::from_keys(KEY_UP), DT);
        assert_approx_eq!(next.rating, (0.15_f64).powi(2) * DT * 0.5, 1e-12);
    }

    #[test]
    fn test_brake_overrides_accelerate() {
        let state = CarState::on_centerline(0.0);
        let next = integrate(&state, &ControlInput::from_keys(KEY_UP | KEY_DOWN), DT);
        assert!(next.speed < 0.0);
        assert_approx_eq!(next.speed, -BRAKING * DT, 1e-9);
    }

    #[test]
    fn test_analog_throttle_overrides_keys() {
        let state = CarState::on_centerline(0.0);
        let input = ControlInput {
            keys: KEY_DOWN,
            throttle: 0.5,
            ..ControlInput::default()
        };
        let next = integrate(&state, &input, DT);
        assert_approx_eq!(next.speed, ACCELERATION * 0.5 * DT, 1e-9);
    }

    #[test]
    fn test_analog_inside_deadzone_ignored() {
        let input = ControlInput {
            keys: KEY_UP,
            throttle: -0.05,
            steering: 0.1,
            ..ControlInput::default()
        };
        assert_eq!(input.forces(), (ACCELERATION, 0.0));
    }

    #[test]
    fn test_friction_decays_to_zero() {
        let mut state = CarState::on_centerline(0.0);
        state.speed = 2.0;
        let next = integrate(&state, &ControlInput::default(), DT);
        assert_eq!(next.speed, 0.0);

        state.speed = -2.0;
        let next = integrate(&state, &ControlInput::default(), DT);
        assert_eq!(next.speed, 0.0);
    }

    #[test]
    fn test_speed_clamped() {
        let mut state = CarState::on_centerline(0.0);
        state.speed = MAX_SPEED;
        let next = integrate(&state, &ControlInput::from_keys(KEY_UP), DT);
        assert_eq!(next.speed, MAX_SPEED);

        state.speed = -MAX_SPEED * REVERSE_SPEED_RATIO;
        let next = integrate(&state, &ControlInput::from_keys(KEY_DOWN), DT);
        assert_approx_eq!(next.speed, -MAX_SPEED * REVERSE_SPEED_RATIO, 1e-9);
    }

    #[test]
    fn test_turning_moves_laterally() {
        let mut state = CarState::on_centerline(0.0);
        state.speed = 500.0;
        let next = integrate(&state, &ControlInput::from_keys(KEY_UP | KEY_RIGHT), DT);

        assert!(next.x > state.x);
        assert!(next.angle > 0.0);
        assert!(next.angle <= MAX_STEER_ANGLE);
    }

    #[test]
    fn test_no_turn_below_min_speed() {
        let mut state = CarState::on_centerline(0.0);
        state.angle = 10.0;
        let next = integrate(&state, &ControlInput::from_keys(KEY_LEFT), DT);

        assert_eq!(next.x, state.x);
        assert_approx_eq!(next.angle, 9.0, 1e-9);
    }

    #[test]
    fn test_understeer_floor() {
        let mut state = CarState::on_centerline(0.0);
        state.speed = MAX_SPEED;
        let input = ControlInput {
            keys: KEY_UP,
            steering: 1.0,
            ..ControlInput::default()
        };
        let next = integrate(&state, &input, DT);
        // 1 - 1.0 * 0.3 = 0.7 stays above the 0.5 floor
        assert_approx_eq!(next.angle, MAX_STEER_ANGLE * 0.7, 1e-9);
    }

    #[test]
    fn test_explosion_threshold() {
        // 140 past the half-width does not detonate, 141 does
        let mut state = CarState::on_centerline(0.0);
        state.x = ROAD_WIDTH / 2.0 + 140.0;
        let next = integrate(&state, &ControlInput::default(), DT);
        assert!(!next.exploded);

        state.x = ROAD_WIDTH / 2.0 + 141.0;
        state.rating = 50.0;
        state.speed = 300.0;
        let next = integrate(&state, &ControlInput::from_keys(KEY_UP), DT);
        assert!(next.exploded);
        assert_eq!(next.rating, 0.0);
        assert_eq!(next.y, state.y);
        assert_eq!(next.speed, state.speed);
    }

    #[test]
    fn test_exploded_state_frozen() {
        let mut state = CarState::on_centerline(0.0);
        state.exploded = true;
        state.speed = 100.0;
        let next = integrate(&state, &ControlInput::from_keys(KEY_UP), DT);
        assert_eq!(next, state);
    }

    #[test]
    fn test_offroad_drag_when_accelerating() {
        let mut state = CarState::on_centerline(0.0);
        state.x = ROAD_WIDTH / 2.0 + 20.0;
        state.speed = 600.0;
        assert!(state.is_off_road());

        let next = integrate(&state, &ControlInput::from_keys(KEY_UP), DT);
        let expected = 600.0 - 600.0 * OFFROAD_DRAG * DT + ACCELERATION * DT;
        assert_approx_eq!(next.speed, expected, 1e-9);
    }

    #[test]
    fn test_offroad_friction_when_coasting() {
        let mut state = CarState::on_centerline(0.0);
        state.x = ROAD_WIDTH / 2.0;
        state.speed = 600.0;

        let next = integrate(&state, &ControlInput::default(), DT);
        assert_approx_eq!(next.speed, 600.0 - FRICTION_OFFROAD * DT, 1e-9);
    }

    #[test]
    fn test_integrate_deterministic() {
        let input = ControlInput {
            keys: KEY_UP,
            steering: -0.4,
            ..ControlInput::default()
        };
        let mut a = CarState::on_centerline(0.0);
        let mut b = a;
        for _ in 0..600 {
            a = integrate(&a, &input, DT);
            b = integrate(&b, &input, DT);
        }
        assert_eq!(a, b);
    }

    #[test]
    fn test_collision_amplified_push_first_only() {
        let mut a = CarState {
            x: 0.0,
            y: 0.0,
            speed: 300.0,
            ..CarState::default()
        };
        let b = CarState {
            x: 20.0,
            y: 0.0,
            speed: 50.0,
            ..CarState::default()
        };
        let b_before = b;

        assert!(resolve_collision(&mut a, &b, DT));

        let push = PUSH_FORCE * (300.0 + PUSH_BASE_SPEED) * DT * SPEED_DIFF_MULTIPLIER;
        assert_approx_eq!(a.x, -push, 1e-9);
        assert_approx_eq!(a.y, 0.0, 1e-9);
        assert_approx_eq!(a.speed, 270.0, 1e-9);
        assert_eq!(b, b_before);
    }

    #[test]
    fn test_collision_plain_push() {
        let mut a = CarState {
            x: 0.0,
            y: 10.0,
            speed: 100.0,
            ..CarState::default()
        };
        let b = CarState {
            speed: 50.0,
            ..CarState::default()
        };

        assert!(resolve_collision(&mut a, &b, DT));
        assert_approx_eq!(a.y, 10.0 + PUSH_FORCE * 200.0 * DT, 1e-9);
    }

    #[test]
    fn test_collision_ignored_out_of_range_or_coincident() {
        let mut a = CarState::default();
        let b = CarState::default();
        assert!(!resolve_collision(&mut a, &b, DT));

        let far = CarState {
            x: COLLISION_RADIUS,
            ..CarState::default()
        };
        assert!(!resolve_collision(&mut a, &far, DT));
        assert_eq!(a, CarState::default());
    }
}
