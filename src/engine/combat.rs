//! Combat resolution: trait strength, bounded jitter and the life-bar table.

use crate::domain::{Corner, TraitSet};
use rand::Rng;
use std::collections::HashMap;

/// Differential above which the loser's face shows damage.
pub const BEATUP_THRESHOLD: i64 = 20;

/// Per-category, per-value integer combat weights.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StrengthTable {
    weights: HashMap<String, HashMap<String, i64>>,
}

impl StrengthTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, category: &str, value: &str, weight: i64) {
        self.weights
            .entry(category.to_string())
            .or_default()
            .insert(value.to_string(), weight);
    }

    pub fn with(mut self, category: &str, value: &str, weight: i64) -> Self {
        self.insert(category, value, weight);
        self
    }

    /// Weight of a single trait value; unknown values weigh nothing.
    pub fn weight(&self, category: &str, value: &str) -> i64 {
        self.weights
            .get(category)
            .and_then(|values| values.get(value))
            .copied()
            .unwrap_or(0)
    }

    /// Exact sum of the weights of a fighter's trait values.
    pub fn strength(&self, traits: &TraitSet) -> i64 {
        traits
            .iter()
            .map(|(category, value)| self.weight(category, value))
            .sum()
    }

    pub fn category_count(&self) -> usize {
        self.weights.len()
    }
}

/// Add a uniform draw from `[0, jitter)` shifted down by `jitter / 2`.
pub fn apply_jitter<R: Rng + ?Sized>(value: i64, jitter: u32, rng: &mut R) -> i64 {
    if jitter == 0 {
        return value;
    }
    let draw = rng.gen_range(0..jitter) as i64;
    value + draw - (jitter / 2) as i64
}

/// One row of the life-bar table. Each range is `(low, high)` in steps of ten;
/// `low` is drawable and `high` is not, unless both are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifeBarBand {
    pub min_diff: i64,
    pub max_diff: i64,
    pub winner: (u8, u8),
    pub loser: (u8, u8),
    pub knockout: bool,
}

const fn band(
    min_diff: i64,
    max_diff: i64,
    winner: (u8, u8),
    loser: (u8, u8),
    knockout: bool,
) -> LifeBarBand {
    LifeBarBand {
        min_diff,
        max_diff,
        winner,
        loser,
        knockout,
    }
}

/// Sorted by descending differential; bands are contiguous and cover `[0, i64::MAX]`.
pub const LIFE_BAR_BANDS: [LifeBarBand; 11] = [
    band(141, i64::MAX, (100, 100), (0, 0), true),
    band(121, 140, (70, 90), (10, 20), true),
    band(101, 120, (70, 90), (10, 20), false),
    band(91, 100, (60, 80), (10, 30), false),
    band(81, 90, (60, 80), (20, 40), false),
    band(71, 80, (40, 70), (20, 30), false),
    band(56, 70, (40, 70), (20, 30), false),
    band(45, 55, (40, 70), (20, 30), false),
    band(26, 44, (50, 60), (30, 40), false),
    band(14, 25, (50, 50), (40, 40), false),
    band(0, 13, (60, 60), (50, 50), false),
];

/// Post-fight health of both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifeBar {
    pub winner: u8,
    pub loser: u8,
    pub knockout: bool,
}

pub fn life_bar_band(differential: i64) -> &'static LifeBarBand {
    let differential = differential.saturating_abs();
    LIFE_BAR_BANDS
        .iter()
        .find(|b| differential >= b.min_diff && differential <= b.max_diff)
        .unwrap_or(&LIFE_BAR_BANDS[LIFE_BAR_BANDS.len() - 1])
}

fn draw_tens<R: Rng + ?Sized>((low, high): (u8, u8), rng: &mut R) -> u8 {
    if low == high {
        return low;
    }
    rng.gen_range(low / 10..high / 10) * 10
}

/// Single table lookup plus one draw per side.
pub fn determine_life_bar<R: Rng + ?Sized>(differential: i64, rng: &mut R) -> LifeBar {
    let band = life_bar_band(differential);
    LifeBar {
        winner: draw_tens(band.winner, rng),
        loser: draw_tens(band.loser, rng),
        knockout: band.knockout,
    }
}

/// A fighter entering the ring: its traits and the table they are weighed with.
#[derive(Debug, Clone, Copy)]
pub struct Contender<'a> {
    pub name: &'a str,
    pub traits: &'a TraitSet,
    pub table: &'a StrengthTable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CombatResult {
    pub winner: Corner,
    pub red_strength: i64,
    pub blue_strength: i64,
    pub differential: i64,
    pub winner_life: u8,
    pub loser_life: u8,
    pub knockout: bool,
    pub beatup: bool,
}

impl CombatResult {
    pub fn life(&self, corner: Corner) -> u8 {
        if corner == self.winner {
            self.winner_life
        } else {
            self.loser_life
        }
    }

    pub fn knocked_out(&self, corner: Corner) -> bool {
        corner != self.winner && self.knockout
    }

    pub fn beaten_up(&self, corner: Corner) -> bool {
        corner != self.winner && self.beatup
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CombatResolver {
    jitter: u32,
}

impl CombatResolver {
    pub fn new(jitter: u32) -> Self {
        Self { jitter }
    }

    pub fn jitter(&self) -> u32 {
        self.jitter
    }

    pub fn strength<R: Rng + ?Sized>(&self, contender: &Contender<'_>, rng: &mut R) -> i64 {
        apply_jitter(contender.table.strength(contender.traits), self.jitter, rng)
    }

    /// Red wins ties.
    pub fn resolve<R: Rng + ?Sized>(
        &self,
        red: Contender<'_>,
        blue: Contender<'_>,
        rng: &mut R,
    ) -> CombatResult {
        let red_strength = self.strength(&red, rng);
        let blue_strength = self.strength(&blue, rng);
        let winner = if red_strength >= blue_strength {
            Corner::Red
        } else {
            Corner::Blue
        };
        let differential = (red_strength - blue_strength).abs();
        let life = determine_life_bar(differential, rng);

        tracing::info!(
            red = red.name,
            blue = blue.name,
            red_strength,
            blue_strength,
            differential,
            winner = winner.as_str(),
            "Resolved fight"
        );

        CombatResult {
            winner,
            red_strength,
            blue_strength,
            differential,
            winner_life: life.winner,
            loser_life: life.loser,
            knockout: life.knockout,
            beatup: differential > BEATUP_THRESHOLD,
        }
    }
}
