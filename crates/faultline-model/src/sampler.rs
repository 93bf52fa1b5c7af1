//! Random and stratified construction of fault configurations.

use std::collections::HashSet;

use rand::seq::index;
use rand::Rng;
use thiserror::Error;

use crate::catalog::{
    CorruptionScope, MessageRole, ALL_DROPS, ALL_SUBSETS, MAX_STEPS, NUM_NODES, SEED_MAX,
};
use crate::config::{FaultConfig, MessageCorruption, MessageDrop, NodeId, Shape};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SamplerError {
    #[error("every trial must inject at least one fault (drops and corruptions are both fixed at 0)")]
    NoFaults,
    #[error("invalid {what} range: min {min} > max {max}")]
    InvalidRange {
        what: &'static str,
        min: usize,
        max: usize,
    },
    #[error("{requested} drops requested but only {available} distinct drops exist")]
    TooManyDrops { requested: usize, available: usize },
    #[error("could not draw {wanted} distinct configs of shape {shape} (got {got})")]
    GridExhausted {
        shape: Shape,
        wanted: usize,
        got: usize,
    },
}

/// How many faults of one kind a sampled config carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultCount {
    Fixed(usize),
    /// Uniform over `min..=max`.
    Uniform { min: usize, max: usize },
}

impl FaultCount {
    fn bounds(&self) -> (usize, usize) {
        match *self {
            FaultCount::Fixed(n) => (n, n),
            FaultCount::Uniform { min, max } => (min, max),
        }
    }

    fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        match *self {
            FaultCount::Fixed(n) => n,
            FaultCount::Uniform { min, max } => rng.gen_range(min..=max),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerSettings {
    pub drops: FaultCount,
    pub corruptions: FaultCount,
    pub scope: CorruptionScope,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            drops: FaultCount::Fixed(1),
            corruptions: FaultCount::Fixed(0),
            scope: CorruptionScope::Small,
        }
    }
}

impl SamplerSettings {
    pub fn validate(&self) -> Result<(), SamplerError> {
        let (drop_min, drop_max) = self.drops.bounds();
        if drop_min > drop_max {
            return Err(SamplerError::InvalidRange {
                what: "drop",
                min: drop_min,
                max: drop_max,
            });
        }
        let (corr_min, corr_max) = self.corruptions.bounds();
        if corr_min > corr_max {
            return Err(SamplerError::InvalidRange {
                what: "corruption",
                min: corr_min,
                max: corr_max,
            });
        }
        if drop_max > ALL_DROPS.len() {
            return Err(SamplerError::TooManyDrops {
                requested: drop_max,
                available: ALL_DROPS.len(),
            });
        }
        if drop_max == 0 && corr_max == 0 {
            return Err(SamplerError::NoFaults);
        }
        Ok(())
    }
}

/// Builds fault configs from the static catalog. Pure: randomness comes
/// from the caller's RNG and nothing is read or written.
#[derive(Debug, Clone)]
pub struct ConfigSampler {
    settings: SamplerSettings,
}

impl ConfigSampler {
    pub fn new(settings: SamplerSettings) -> Result<Self, SamplerError> {
        settings.validate()?;
        Ok(Self { settings })
    }

    pub fn settings(&self) -> &SamplerSettings {
        &self.settings
    }

    /// Draw one config with at least one fault.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> FaultConfig {
        // Validation guarantees a non-zero draw is reachable.
        loop {
            let drops = self.settings.drops.draw(rng);
            let corruptions = self.settings.corruptions.draw(rng);
            if drops == 0 && corruptions == 0 {
                continue;
            }
            return sample_shape(rng, self.settings.scope, Shape::new(drops, corruptions));
        }
    }
}

/// Draw one config of exactly `shape`. `shape.drops` is clamped to the size
/// of the drop space.
pub fn sample_shape<R: Rng + ?Sized>(
    rng: &mut R,
    scope: CorruptionScope,
    shape: Shape,
) -> FaultConfig {
    let amount = shape.drops.min(ALL_DROPS.len());
    let mut drops: Vec<MessageDrop> = index::sample(rng, ALL_DROPS.len(), amount)
        .into_iter()
        .map(|i| ALL_DROPS[i].clone())
        .collect();
    drops.sort();

    // A single Byzantine replica sources every corruption of the trial.
    let faulty = rng.gen_range(0..NUM_NODES) as NodeId;
    let corruptions = (0..shape.corruptions)
        .map(|_| {
            let step = rng.gen_range(0..MAX_STEPS);
            let types = scope.corruption_types(MessageRole::for_step(step));
            MessageCorruption {
                step,
                from_node: faulty,
                to_nodes: ALL_SUBSETS[rng.gen_range(0..ALL_SUBSETS.len())].to_vec(),
                corruption_type: types[rng.gen_range(0..types.len())],
                seed: rng.gen_range(0..=SEED_MAX),
            }
        })
        .collect();

    FaultConfig::new(drops, corruptions)
}

/// Distinct configs of one shape inside a stratified sample.
#[derive(Debug, Clone)]
pub struct GridCell {
    pub shape: Shape,
    pub configs: Vec<FaultConfig>,
}

/// A fixed-size stratified sample: every `(drops, corruptions)` shape up to
/// `max` of each, except the fault-free one.
#[derive(Debug, Clone)]
pub struct StratifiedGrid {
    pub cells: Vec<GridCell>,
}

impl StratifiedGrid {
    /// Shapes covered by a grid bounded by `max`, in row-major order.
    pub fn shapes(max: usize) -> Vec<Shape> {
        let mut shapes = Vec::new();
        for drops in 0..=max {
            for corruptions in 0..=max {
                if drops == 0 && corruptions == 0 {
                    continue;
                }
                shapes.push(Shape::new(drops, corruptions));
            }
        }
        shapes
    }

    /// Number of distinct configs the grid holds for `shape`.
    pub fn target_size(shape: Shape, repeats: usize) -> usize {
        let capacity = shape_capacity(shape);
        if capacity < repeats as u64 {
            capacity as usize
        } else {
            repeats
        }
    }

    /// Expected `(shape, count)` pairs for a grid, without sampling it.
    pub fn expected(max: usize, repeats: usize) -> Vec<(Shape, usize)> {
        Self::shapes(max)
            .into_iter()
            .map(|shape| (shape, Self::target_size(shape, repeats)))
            .collect()
    }

    /// Sample a grid. Each cell holds `repeats` distinct configs, or every
    /// possible config of that shape when fewer exist.
    pub fn sample<R: Rng + ?Sized>(
        rng: &mut R,
        scope: CorruptionScope,
        max: usize,
        repeats: usize,
    ) -> Result<Self, SamplerError> {
        let mut cells = Vec::new();
        for shape in Self::shapes(max) {
            let target = Self::target_size(shape, repeats);
            let configs = if shape.corruptions == 0 && (target as u64) == shape_capacity(shape) {
                enumerate_drop_sets(shape.drops)
            } else {
                sample_distinct(rng, scope, shape, target)?
            };
            cells.push(GridCell { shape, configs });
        }
        Ok(StratifiedGrid { cells })
    }

    pub fn total(&self) -> usize {
        self.cells.iter().map(|c| c.configs.len()).sum()
    }

    pub fn configs(&self) -> impl Iterator<Item = &FaultConfig> {
        self.cells.iter().flat_map(|c| c.configs.iter())
    }
}

fn sample_distinct<R: Rng + ?Sized>(
    rng: &mut R,
    scope: CorruptionScope,
    shape: Shape,
    target: usize,
) -> Result<Vec<FaultConfig>, SamplerError> {
    let mut seen = HashSet::with_capacity(target);
    let mut configs = Vec::with_capacity(target);
    let max_attempts = target.saturating_mul(1000).max(1000);
    let mut attempts = 0;
    while configs.len() < target {
        if attempts == max_attempts {
            return Err(SamplerError::GridExhausted {
                shape,
                wanted: target,
                got: configs.len(),
            });
        }
        attempts += 1;
        let config = sample_shape(rng, scope, shape);
        if seen.insert(config.clone()) {
            configs.push(config);
        }
    }
    Ok(configs)
}

/// Distinct configs of `shape`. Corruptions carry a seed drawn from a large
/// range, so any shape with one is treated as unbounded.
fn shape_capacity(shape: Shape) -> u64 {
    if shape.corruptions > 0 {
        return u64::MAX;
    }
    binomial(ALL_DROPS.len() as u64, shape.drops as u64)
}

fn binomial(n: u64, k: u64) -> u64 {
    if k > n {
        return 0;
    }
    let k = k.min(n - k);
    let mut acc: u64 = 1;
    for i in 0..k {
        acc = match acc.checked_mul(n - i) {
            Some(v) => v / (i + 1),
            None => return u64::MAX,
        };
    }
    acc
}

/// Every sorted `k`-subset of the drop space, as drop-only configs.
fn enumerate_drop_sets(k: usize) -> Vec<FaultConfig> {
    let n = ALL_DROPS.len();
    if k > n {
        return Vec::new();
    }
    let mut out = Vec::new();
    let mut idx: Vec<usize> = (0..k).collect();
    loop {
        out.push(FaultConfig::new(
            idx.iter().map(|&i| ALL_DROPS[i].clone()).collect(),
            Vec::new(),
        ));
        // Advance to the next combination in lexicographic order.
        let mut pos = k;
        loop {
            if pos == 0 {
                return out;
            }
            pos -= 1;
            if idx[pos] != pos + n - k {
                break;
            }
        }
        idx[pos] += 1;
        for j in pos + 1..k {
            idx[j] = idx[j - 1] + 1;
        }
    }
}
