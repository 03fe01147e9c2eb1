//! Subset orderings for stochastic and ordered-subset methods.
//!
//! A [`Sampler`] is an endless iterator over subset indices `0..n`. The
//! deterministic kinds replay a fixed order; the random kinds draw from a
//! seeded [`StdRng`] so runs can be reproduced.

use std::fmt;

use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::error::{ReconError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SamplingKind {
    Sequential,
    CustomOrder,
    HermanMeyer,
    Staggered,
    RandomWithReplacement,
    RandomWithoutReplacement,
}

impl fmt::Display for SamplingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SamplingKind::Sequential => "sequential",
            SamplingKind::CustomOrder => "custom_order",
            SamplingKind::HermanMeyer => "herman_meyer",
            SamplingKind::Staggered => "staggered",
            SamplingKind::RandomWithReplacement => "random_with_replacement",
            SamplingKind::RandomWithoutReplacement => "random_without_replacement",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug)]
pub struct Sampler {
    kind: SamplingKind,
    num_subsets: usize,
    order: Vec<usize>,
    initial_order: Vec<usize>,
    weights: Option<(Vec<f64>, WeightedIndex<f64>)>,
    shuffle: bool,
    seed: u64,
    rng: StdRng,
    last: usize,
}

impl Sampler {
    fn ordered(kind: SamplingKind, num_subsets: usize, order: Vec<usize>, shuffle: bool, seed: Option<u64>) -> Self {
        let seed = seed.unwrap_or_else(rand::random);
        Self {
            kind,
            num_subsets,
            last: order.len() - 1,
            initial_order: order.clone(),
            order,
            weights: None,
            shuffle,
            seed,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// `0, 1, ..., n-1, 0, 1, ...`
    pub fn sequential(num_subsets: usize) -> Result<Self> {
        check_count(num_subsets)?;
        Ok(Self::ordered(
            SamplingKind::Sequential,
            num_subsets,
            (0..num_subsets).collect(),
            false,
            Some(0),
        ))
    }

    /// Cycle through a caller-given order; every entry must be `< num_subsets`.
    pub fn custom_order(num_subsets: usize, order: Vec<usize>) -> Result<Self> {
        check_count(num_subsets)?;
        if order.is_empty() {
            return Err(ReconError::InvalidSampler("custom order is empty".to_string()));
        }
        if let Some(bad) = order.iter().find(|&&i| i >= num_subsets) {
            return Err(ReconError::InvalidSampler(format!(
                "custom order entry {bad} is out of range for {num_subsets} subsets"
            )));
        }
        Ok(Self::ordered(SamplingKind::CustomOrder, num_subsets, order, false, Some(0)))
    }

    /// Herman-Meyer ordering built from the prime factorisation of `n`,
    /// which spreads consecutive subsets as far apart as possible.
    ///
    /// A prime `n` has no such ordering and is rejected.
    pub fn herman_meyer(num_subsets: usize) -> Result<Self> {
        check_count(num_subsets)?;
        let order = herman_meyer_order(num_subsets)?;
        Ok(Self::ordered(SamplingKind::HermanMeyer, num_subsets, order, false, Some(0)))
    }

    /// Every `offset`-th subset, starting from `0, 1, ..., offset-1` in turn.
    pub fn staggered(num_subsets: usize, offset: usize) -> Result<Self> {
        check_count(num_subsets)?;
        if offset == 0 || offset >= num_subsets {
            return Err(ReconError::InvalidSampler(format!(
                "staggered offset must lie in 1..{num_subsets}, got {offset}"
            )));
        }
        let order = (0..offset)
            .flat_map(|start| (start..num_subsets).step_by(offset))
            .collect();
        Ok(Self::ordered(SamplingKind::Staggered, num_subsets, order, false, Some(0)))
    }

    /// Independent draws with probabilities `prob` (uniform when `None`).
    pub fn random_with_replacement(num_subsets: usize, prob: Option<Vec<f64>>, seed: Option<u64>) -> Result<Self> {
        check_count(num_subsets)?;
        let prob = prob.unwrap_or_else(|| vec![1.0 / num_subsets as f64; num_subsets]);
        if prob.len() != num_subsets {
            return Err(ReconError::InvalidSampler(format!(
                "{} probabilities for {num_subsets} subsets",
                prob.len()
            )));
        }
        if prob.iter().any(|p| !(p.is_finite() && *p >= 0.0)) {
            return Err(ReconError::InvalidSampler("probabilities must be non-negative".to_string()));
        }
        let total: f64 = prob.iter().sum();
        if (total - 1.0).abs() > 1e-6 {
            return Err(ReconError::InvalidSampler(format!("probabilities sum to {total}, not 1")));
        }
        let dist = WeightedIndex::new(&prob).map_err(|e| ReconError::InvalidSampler(e.to_string()))?;
        let mut sampler = Self::ordered(
            SamplingKind::RandomWithReplacement,
            num_subsets,
            (0..num_subsets).collect(),
            false,
            seed,
        );
        sampler.weights = Some((prob, dist));
        Ok(sampler)
    }

    /// Each pass visits every subset once; with `shuffle` the order is
    /// redrawn at the start of every pass, otherwise only once.
    pub fn random_without_replacement(num_subsets: usize, shuffle: bool, seed: Option<u64>) -> Result<Self> {
        check_count(num_subsets)?;
        let mut sampler = Self::ordered(
            SamplingKind::RandomWithoutReplacement,
            num_subsets,
            (0..num_subsets).collect(),
            true,
            seed,
        );
        if !shuffle {
            // one fixed random permutation
            let mut order = sampler.order.clone();
            order.shuffle(&mut sampler.rng);
            sampler.order = order.clone();
            sampler.initial_order = order;
            sampler.shuffle = false;
            sampler.rng = StdRng::seed_from_u64(sampler.seed);
        }
        Ok(sampler)
    }

    pub fn kind(&self) -> SamplingKind {
        self.kind
    }

    pub fn num_subsets(&self) -> usize {
        self.num_subsets
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Long-run frequency of each subset index.
    pub fn prob_weights(&self) -> Vec<f64> {
        if let Some((prob, _)) = &self.weights {
            return prob.clone();
        }
        let mut counts = vec![0.0; self.num_subsets];
        for &i in &self.initial_order {
            counts[i] += 1.0;
        }
        let len = self.initial_order.len() as f64;
        counts.into_iter().map(|c| c / len).collect()
    }

    pub fn next_index(&mut self) -> usize {
        if let Some((_, dist)) = &self.weights {
            return dist.sample(&mut self.rng);
        }
        let len = self.order.len();
        if self.shuffle && self.last == len - 1 {
            self.order.shuffle(&mut self.rng);
        }
        self.last = (self.last + 1) % len;
        self.order[self.last]
    }

    /// The first `k` indices a fresh sampler with the same seed produces.
    /// Leaves this sampler's position untouched.
    pub fn samples(&self, k: usize) -> Vec<usize> {
        let mut fresh = self.clone();
        fresh.rng = StdRng::seed_from_u64(self.seed);
        fresh.order = self.initial_order.clone();
        fresh.last = fresh.order.len() - 1;
        (0..k).map(|_| fresh.next_index()).collect()
    }
}

impl Iterator for Sampler {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        Some(self.next_index())
    }
}

fn check_count(num_subsets: usize) -> Result<()> {
    if num_subsets == 0 {
        return Err(ReconError::InvalidSampler("number of subsets must be positive".to_string()));
    }
    Ok(())
}

fn prime_factors(mut n: usize) -> Vec<usize> {
    let mut factors = Vec::new();
    let mut p = 2;
    while p * p <= n {
        if n % p == 0 {
            n /= p;
            factors.push(p);
        } else {
            p += 1;
        }
    }
    if n > 1 {
        factors.push(n);
    }
    factors
}

fn herman_meyer_order(n: usize) -> Result<Vec<usize>> {
    let factors = prime_factors(n);
    if factors.len() < 2 {
        return Err(ReconError::InvalidSampler(format!(
            "Herman-Meyer ordering needs a composite number of subsets, got {n}"
        )));
    }
    let mut order = vec![0; n];
    let mut value = 0;
    for (k, &factor) in factors.iter().enumerate() {
        // each digit value repeats this many times before changing
        let repeat: usize = factors[..k].iter().product();
        let place: usize = factors[k + 1..].iter().product();
        let mut count = 0;
        for slot in order.iter_mut() {
            let digit = value;
            count += 1;
            if count >= repeat {
                value += 1;
                count = 0;
            }
            if value == factor {
                value = 0;
            }
            *slot += place * digit;
        }
    }
    Ok(order)
}
