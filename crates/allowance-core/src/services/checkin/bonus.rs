//! Check-in bonus policies

use rand::Rng;

/// Chooses the bonus for one check-in from `[min, max]`
pub trait BonusPolicy: Send + Sync {
    fn pick(&self, min: i64, max: i64) -> i64;
}

/// Uniformly random bonus in `[min, max]`
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomBonus;

impl BonusPolicy for RandomBonus {
    fn pick(&self, min: i64, max: i64) -> i64 {
        if min >= max {
            return min;
        }
        rand::thread_rng().gen_range(min..=max)
    }
}

/// Always the same bonus, clamped into `[min, max]`
#[derive(Debug, Clone, Copy)]
pub struct FixedBonus(pub i64);

impl BonusPolicy for FixedBonus {
    fn pick(&self, min: i64, max: i64) -> i64 {
        if min >= max {
            return min;
        }
        self.0.clamp(min, max)
    }
}
