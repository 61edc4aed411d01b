#![warn(missing_docs)]
#![doc(test(no_crate_inject))]
#![doc(test(attr(deny(unused, future_incompatible))))]

//! Low-rank estimation of bivariate probability distributions.
//!
//! Given a sample of paired categorical observations, the estimator builds two
//! independent joint-frequency tables from disjoint halves of the data, groups
//! row and column indices into dyadic brackets of marginal mass, and replaces
//! each (row-bracket, column-bracket) block of the held-out table either with
//! its raw empirical values (when the block carries too little mass to be
//! worth denoising) or with a singular-value-truncated approximation (when it
//! carries enough). The assembled blocks are clipped, renormalized, and
//! exposed as a joint probability table that typically has much lower
//! effective rank than the raw empirical histogram.
//!
//! The partition is always derived from the first half-table while block
//! values are read from the second, so the grouping is never validated
//! against the same data that produced it.
//!
//! [`DiscreteEstimator`] is the categorical entry point. [`ContinuousEstimator`]
//! bins continuous samples onto a sample-size-dependent grid, feeds the same
//! block machinery, and exposes a piecewise-constant density over the observed
//! range. The individual stages ([`FrequencyTables`], [`dyadic_partition`],
//! [`block_lowrank_estimate`]) are public so the pipeline can also be driven
//! directly on precomputed histograms.

pub use sorted_iter;

use nalgebra::DMatrix;
use rand::distributions::Distribution;
use rand::Rng;
use smallvec::SmallVec;
use sorted_iter::assume::AssumeSortedByItemExt;
use sorted_iter::sorted_iterator::SortedByItem;
use statrs::distribution::Categorical;
use std::collections::BTreeSet;
use std::f64::consts::LN_2;
use thiserror::Error;

/// Errors reported by the estimators.
///
/// Input validation always fails before any fitted state is touched; a fit
/// call either fully succeeds or leaves the estimator exactly as it was.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum Error {
    /// The sample contains no rows.
    #[error("sample is empty")]
    EmptySample,

    /// The precision parameter `alpha` is not a positive finite number.
    #[error("alpha must be positive and finite, got {0}")]
    InvalidAlpha(f64),

    /// The smoothness constant of the continuous estimator is not a positive
    /// finite number.
    #[error("smoothness must be positive and finite, got {0}")]
    InvalidSmoothness(f64),

    /// A continuous sample contains NaN or an infinity.
    #[error("sample contains a non-finite value")]
    NonFiniteSample,

    /// An accessor or sampler was called before any successful fit.
    #[error("estimator has not been fitted")]
    NotFitted,

    /// A density evaluation point lies outside the unit square.
    #[error("evaluation point ({0}, {1}) is outside [0,1]x[0,1]")]
    OutOfRange(f64, f64),
}

/// Convenience alias for results carrying an estimator [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// The rule deciding how much mass a block needs before it is denoised.
///
/// Blocks below the bound keep their raw empirical entries; blocks at or
/// above it are replaced by a truncated singular value decomposition. Two
/// formulations of the bound are in circulation, differing only by an extra
/// tuning constant, so the rule is a value rather than a hard-coded formula.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MassThreshold {
    /// `2 * alpha * ln(d) / (n * ln 2)`.
    Plain,
    /// `2 * c * alpha * ln(d) / (n * ln 2)` for an explicit constant `c`.
    ///
    /// `Scaled(1.0)` coincides with [`MassThreshold::Plain`].
    Scaled(f64),
}

impl MassThreshold {
    /// Computes the sparsity bound for a table of side `d` fitted on `n`
    /// observations.
    ///
    /// ```
    /// use lowrank::MassThreshold;
    ///
    /// let plain = MassThreshold::Plain.bound(0.1, 16, 1000);
    /// let scaled = MassThreshold::Scaled(1.0).bound(0.1, 16, 1000);
    /// assert!((plain - scaled).abs() < 1e-15);
    /// assert!(MassThreshold::Scaled(4.0).bound(0.1, 16, 1000) > plain);
    /// ```
    pub fn bound(&self, alpha: f64, d: usize, n: usize) -> f64 {
        let base = 2.0 * alpha * (d as f64).ln() / (n as f64 * LN_2);
        match self {
            MassThreshold::Plain => base,
            MassThreshold::Scaled(c) => c * base,
        }
    }
}

/// Tuning parameters shared by both estimators.
///
/// `alpha` trades precision against bias: it scales both the block sparsity
/// bound and the singular-value cutoff. The configuration is immutable once
/// built.
///
/// ```
/// use lowrank::Config;
///
/// assert!(Config::new(0.5).is_ok());
/// assert!(Config::new(-1.0).is_err());
/// assert!(Config::new(f64::NAN).is_err());
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Config {
    alpha: f64,
    threshold: MassThreshold,
}

impl Config {
    /// Creates a configuration with the given precision level and the
    /// [`MassThreshold::Plain`] sparsity rule.
    pub fn new(alpha: f64) -> Result<Self> {
        if !alpha.is_finite() || alpha <= 0.0 {
            return Err(Error::InvalidAlpha(alpha));
        }
        Ok(Config {
            alpha,
            threshold: MassThreshold::Plain,
        })
    }

    /// Replaces the sparsity-threshold rule.
    pub fn with_threshold(mut self, threshold: MassThreshold) -> Self {
        self.threshold = threshold;
        self
    }

    /// The precision level.
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// The sparsity-threshold rule.
    pub fn threshold(&self) -> MassThreshold {
        self.threshold
    }
}

impl Default for Config {
    /// The usual precision level of 0.1 with the plain threshold rule.
    fn default() -> Self {
        Config {
            alpha: 0.1,
            threshold: MassThreshold::Plain,
        }
    }
}

/// How a fitted probability table was produced.
///
/// Numerical degeneracy is never surfaced as an error; this value is the
/// diagnostic signal that makes the fallback branches observable.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EstimateKind {
    /// The sample was too small to justify adaptive rank reduction; the
    /// result is the elementwise average of the two half-tables.
    Averaged,
    /// The blockwise partition-and-truncate estimate.
    Blockwise,
    /// The blockwise estimate collapsed to zero mass after clipping and the
    /// averaged half-tables were substituted.
    AveragedFallback,
}

/// A bijection between observed category labels and contiguous indices.
///
/// Labels are stored in sorted order, so the induced indexing is reproducible
/// for any input order of the sample.
///
/// ```
/// use lowrank::LabelMap;
///
/// let map = LabelMap::from_values(vec!["blue", "amber", "blue"]);
/// assert_eq!(map.len(), 2);
/// assert_eq!(map.index_of("amber"), Some(0));
/// assert_eq!(map.index_of("green"), None);
/// assert_eq!(map.label(1), "blue");
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LabelMap<L> {
    labels: Vec<L>,
}

impl<L: Copy + Ord> LabelMap<L> {
    /// Builds a map over the distinct values of the iterator, indexed in
    /// sorted order.
    pub fn from_values<I: IntoIterator<Item = L>>(values: I) -> Self {
        let distinct: BTreeSet<L> = values.into_iter().collect();
        LabelMap {
            labels: distinct.into_iter().collect(),
        }
    }

    /// The number of distinct labels.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Returns `true` if no label was observed.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// The index assigned to `label`, if it was observed.
    pub fn index_of(&self, label: L) -> Option<usize> {
        self.labels.binary_search(&label).ok()
    }

    /// The label at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.len()`.
    pub fn label(&self, index: usize) -> L {
        self.labels[index]
    }

    /// Returns an iterator over the labels in index order.
    pub fn iter(&self) -> impl Iterator<Item = L> + SortedByItem + Clone + '_ {
        self.labels.iter().copied().assume_sorted_by_item()
    }
}

/// Two joint-frequency count tables built from disjoint halves of one sample,
/// sharing a single label-to-index mapping per variable.
///
/// The split is positional: rows `[0, n/2)` feed the first table, rows
/// `[n/2, n)` the second. Both label maps are derived from the full sample,
/// so the two tables always have identical shape even though their cells are
/// counted on disjoint subsets.
///
/// ```
/// use lowrank::FrequencyTables;
///
/// let tables =
///     FrequencyTables::from_sample(&[(0u8, 10u8), (1, 11), (0, 10), (1, 10)]).unwrap();
/// assert_eq!(tables.first.shape(), (2, 2));
/// assert_eq!(tables.first[(0, 0)], 1.0);
/// assert_eq!(tables.second[(1, 0)], 1.0);
/// assert_eq!(tables.row_labels.label(1), 1);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct FrequencyTables<L> {
    /// Counts from the first half of the sample.
    pub first: DMatrix<f64>,
    /// Counts from the second half of the sample.
    pub second: DMatrix<f64>,
    /// Label mapping for the first variable (rows).
    pub row_labels: LabelMap<L>,
    /// Label mapping for the second variable (columns).
    pub col_labels: LabelMap<L>,
}

impl<L: Copy + Ord> FrequencyTables<L> {
    /// Counts the two halves of `sample` into separate tables.
    ///
    /// Fails with [`Error::EmptySample`] if the sample has no rows.
    pub fn from_sample(sample: &[(L, L)]) -> Result<Self> {
        if sample.is_empty() {
            return Err(Error::EmptySample);
        }

        let row_labels = LabelMap::from_values(sample.iter().map(|&(a, _)| a));
        let col_labels = LabelMap::from_values(sample.iter().map(|&(_, b)| b));

        let mut first = DMatrix::zeros(row_labels.len(), col_labels.len());
        let mut second = DMatrix::zeros(row_labels.len(), col_labels.len());
        let half = sample.len() / 2;
        for (position, &(a, b)) in sample.iter().enumerate() {
            // Both labels were collected above, so the lookups cannot fail.
            let i = row_labels.index_of(a).unwrap();
            let j = col_labels.index_of(b).unwrap();
            if position < half {
                first[(i, j)] += 1.0;
            } else {
                second[(i, j)] += 1.0;
            }
        }

        Ok(FrequencyTables {
            first,
            second,
            row_labels,
            col_labels,
        })
    }
}

/// One group of indices whose marginal mass falls within a power-of-two
/// range.
///
/// Level `t` of a partition with `levels` levels covers masses in
/// `(2^-(t+1), 2^-t]`, except the last level which also absorbs everything
/// down to and including zero.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DyadicBracket {
    level: u32,
    members: SmallVec<[usize; 8]>,
}

impl DyadicBracket {
    /// The dyadic level of this bracket.
    pub fn level(&self) -> u32 {
        self.level
    }

    /// The number of indices in this bracket.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns `true` if the bracket has no members.
    ///
    /// Brackets produced by [`dyadic_partition`] are never empty.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Returns an iterator over the member indices in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + SortedByItem + Clone + '_ {
        self.members.iter().copied().assume_sorted_by_item()
    }
}

/// Groups the indices of a marginal mass vector into dyadic brackets.
///
/// Empty brackets are skipped, so every returned bracket has at least one
/// member. The returned brackets are disjoint and jointly cover every index
/// of the marginal, provided no mass exceeds 1.
///
/// ```
/// use lowrank::dyadic_partition;
///
/// let brackets = dyadic_partition(&[0.6, 0.3, 0.1], 1);
/// assert_eq!(brackets.len(), 2);
/// assert_eq!(brackets[0].level(), 0);
/// assert_eq!(brackets[0].iter().collect::<Vec<_>>(), vec![0]);
/// assert_eq!(brackets[1].iter().collect::<Vec<_>>(), vec![1, 2]);
/// ```
pub fn dyadic_partition(marginal: &[f64], levels: u32) -> Vec<DyadicBracket> {
    (0..=levels)
        .filter_map(|level| {
            let upper = 2f64.powi(-(level as i32));
            let lower = upper / 2.0;
            let members: SmallVec<[usize; 8]> = marginal
                .iter()
                .enumerate()
                .filter(|&(_, &mass)| mass <= upper && (level == levels || mass > lower))
                .map(|(index, _)| index)
                .collect();
            if members.is_empty() {
                None
            } else {
                Some(DyadicBracket { level, members })
            }
        })
        .collect()
}

/// Scales a table so its entries sum to 1; a table with no mass is returned
/// unchanged.
fn normalized(table: &DMatrix<f64>) -> DMatrix<f64> {
    let mut scaled = table.clone();
    let total = scaled.sum();
    if total > 0.0 {
        scaled /= total;
    }
    scaled
}

/// Reconstructs `block` from the singular triples whose singular value is at
/// least `cutoff`.
///
/// Triples are selected by value rather than position, so nothing is assumed
/// about the ordering of the decomposition's singular values. The result may
/// contain small negative entries; callers clip them downstream.
fn truncate_small_singular_values(block: DMatrix<f64>, cutoff: f64) -> DMatrix<f64> {
    let (rows, cols) = block.shape();
    let decomposition = block.svd(true, true);
    // Both factors were requested, so they are present.
    let u = decomposition.u.unwrap();
    let v_t = decomposition.v_t.unwrap();

    let mut reconstructed = DMatrix::zeros(rows, cols);
    for (k, &sigma) in decomposition.singular_values.iter().enumerate() {
        if sigma >= cutoff {
            reconstructed.gemm(sigma, &u.column(k), &v_t.row(k), 1.0);
        }
    }
    reconstructed
}

/// Clips negatives, renormalizes, and, when the estimate has collapsed to
/// zero mass, substitutes the averaged half-tables.
fn finalize(
    mut estimate: DMatrix<f64>,
    first: &DMatrix<f64>,
    second: &DMatrix<f64>,
) -> (DMatrix<f64>, EstimateKind) {
    for value in estimate.iter_mut() {
        if *value < 0.0 {
            *value = 0.0;
        }
    }

    let total = estimate.sum();
    if total == 0.0 {
        ((first + second) * 0.5, EstimateKind::AveragedFallback)
    } else {
        estimate /= total;
        (estimate, EstimateKind::Blockwise)
    }
}

/// Estimates a joint probability table from two independent frequency tables
/// of the same distribution.
///
/// `first` and `second` hold counts (or any nonnegative mass) from two
/// disjoint halves of a sample of `n` observations; both are normalized
/// internally. When `n <= d * ln(d)` for `d` the larger table side, there is
/// not enough data to justify adaptive rank reduction and the elementwise
/// average of the normalized tables is returned directly.
///
/// Otherwise row and column indices are grouped into dyadic brackets of the
/// first table's marginal mass, and each bracket-pair block of the second
/// table is either copied verbatim (below the configured [`MassThreshold`])
/// or replaced by a singular-value-truncated approximation with cutoff
/// `ln(d) * sqrt((alpha/10) * 2^(1-min(t,u)) / n)`. The assembled matrix is
/// clipped to be nonnegative and renormalized; if everything clips away, the
/// averaged tables are substituted, so the result is always a valid
/// probability table.
///
/// The returned [`EstimateKind`] records which of the three outcomes
/// happened.
///
/// # Panics
///
/// Panics if the two tables differ in shape or have no rows or columns.
pub fn block_lowrank_estimate(
    first: &DMatrix<f64>,
    second: &DMatrix<f64>,
    n: usize,
    config: &Config,
) -> (DMatrix<f64>, EstimateKind) {
    assert_eq!(first.shape(), second.shape());
    let (d1, d2) = first.shape();
    assert!(d1 > 0 && d2 > 0);

    let y1 = normalized(first);
    let y2 = normalized(second);

    let d = d1.max(d2);
    let log_d = (d as f64).ln();
    if (n as f64) <= d as f64 * log_d {
        return ((&y1 + &y2) * 0.5, EstimateKind::Averaged);
    }

    let p: Vec<f64> = y1.column_sum().iter().copied().collect();
    let q: Vec<f64> = y1.row_sum().iter().copied().collect();
    let levels = (d as f64).log2().floor() as u32;
    let row_brackets = dyadic_partition(&p, levels);
    let col_brackets = dyadic_partition(&q, levels);

    let sparsity_bound = config.threshold.bound(config.alpha, d, n);
    let cstar = config.alpha / 10.0;

    let mut estimate = DMatrix::zeros(d1, d2);
    for row_bracket in &row_brackets {
        for col_bracket in &col_brackets {
            let mut block = DMatrix::zeros(row_bracket.len(), col_bracket.len());
            for (bi, i) in row_bracket.iter().enumerate() {
                for (bj, j) in col_bracket.iter().enumerate() {
                    block[(bi, bj)] = y2[(i, j)];
                }
            }

            if block.sum() < sparsity_bound {
                // Too sparse to denoise: keep the empirical values exactly.
                for i in row_bracket.iter() {
                    for j in col_bracket.iter() {
                        estimate[(i, j)] = y2[(i, j)];
                    }
                }
            } else {
                let scale = row_bracket.level().min(col_bracket.level());
                let cutoff = log_d * (cstar * 2f64.powi(1 - scale as i32) / n as f64).sqrt();
                let smoothed = truncate_small_singular_values(block, cutoff);
                for (bi, i) in row_bracket.iter().enumerate() {
                    for (bj, j) in col_bracket.iter().enumerate() {
                        estimate[(i, j)] = smoothed[(bi, bj)];
                    }
                }
            }
        }
    }

    finalize(estimate, &y1, &y2)
}

/// Fitted state of a [`DiscreteEstimator`]: the probability table, the label
/// maps needed to invert indices, and the diagnostic kind.
#[derive(Clone, Debug, PartialEq)]
struct FittedTable<L> {
    matrix: DMatrix<f64>,
    row_labels: LabelMap<L>,
    col_labels: LabelMap<L>,
    kind: EstimateKind,
}

/// Low-rank estimator for the joint distribution of two categorical
/// variables.
///
/// Fitting replaces the whole persisted state (probability table and label
/// maps); a failed fit leaves any earlier state untouched.
///
/// ```
/// use lowrank::{Config, DiscreteEstimator};
///
/// let rows: Vec<(u32, u32)> = (0..400).map(|i| (i % 4, i % 2)).collect();
/// let mut estimator = DiscreteEstimator::new(Config::default());
/// estimator.fit(&rows).unwrap();
///
/// let table = estimator.probability_matrix().unwrap();
/// assert_eq!(table.shape(), (4, 2));
/// assert!((table.sum() - 1.0).abs() < 1e-9);
/// assert!(table.iter().all(|&cell| cell >= 0.0));
/// ```
#[derive(Clone, Debug)]
pub struct DiscreteEstimator<L> {
    config: Config,
    fitted: Option<FittedTable<L>>,
}

impl<L: Copy + Ord> DiscreteEstimator<L> {
    /// Creates an unfitted estimator with the given configuration.
    pub fn new(config: Config) -> Self {
        DiscreteEstimator {
            config,
            fitted: None,
        }
    }

    /// Creates an unfitted estimator with the given precision level and the
    /// default threshold rule.
    pub fn with_alpha(alpha: f64) -> Result<Self> {
        Ok(DiscreteEstimator::new(Config::new(alpha)?))
    }

    /// The configuration this estimator was built with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Fits the estimator to a sample of paired categorical observations.
    ///
    /// The sample is split positionally into two halves, counted into two
    /// joint-frequency tables, and run through [`block_lowrank_estimate`].
    /// Identical input always produces a bit-identical probability table.
    pub fn fit(&mut self, sample: &[(L, L)]) -> Result<&mut Self> {
        let tables = FrequencyTables::from_sample(sample)?;
        let (matrix, kind) =
            block_lowrank_estimate(&tables.first, &tables.second, sample.len(), &self.config);
        self.fitted = Some(FittedTable {
            matrix,
            row_labels: tables.row_labels,
            col_labels: tables.col_labels,
            kind,
        });
        Ok(self)
    }

    /// The fitted joint probability table.
    ///
    /// Every entry is nonnegative and the entries sum to 1 (up to floating
    /// point tolerance). Fails with [`Error::NotFitted`] before the first
    /// successful [`fit`](DiscreteEstimator::fit).
    pub fn probability_matrix(&self) -> Result<&DMatrix<f64>> {
        self.fitted
            .as_ref()
            .map(|fitted| &fitted.matrix)
            .ok_or(Error::NotFitted)
    }

    /// The label mapping of the first variable (table rows).
    pub fn row_labels(&self) -> Result<&LabelMap<L>> {
        self.fitted
            .as_ref()
            .map(|fitted| &fitted.row_labels)
            .ok_or(Error::NotFitted)
    }

    /// The label mapping of the second variable (table columns).
    pub fn col_labels(&self) -> Result<&LabelMap<L>> {
        self.fitted
            .as_ref()
            .map(|fitted| &fitted.col_labels)
            .ok_or(Error::NotFitted)
    }

    /// How the fitted table was produced; see [`EstimateKind`].
    pub fn estimate_kind(&self) -> Result<EstimateKind> {
        self.fitted
            .as_ref()
            .map(|fitted| fitted.kind)
            .ok_or(Error::NotFitted)
    }

    /// Draws `n_samples` label pairs from the fitted distribution.
    ///
    /// The table is flattened row-major into one categorical distribution
    /// over `d1 * d2` outcomes; each draw is one independent outcome mapped
    /// back to the original labels. The fitted state is not mutated.
    ///
    /// ```
    /// use lowrank::{Config, DiscreteEstimator};
    /// use rand::rngs::StdRng;
    /// use rand::SeedableRng;
    ///
    /// let rows: Vec<(u8, u8)> = (0..100).map(|i| (i % 2, i % 2)).collect();
    /// let mut estimator = DiscreteEstimator::new(Config::default());
    /// estimator.fit(&rows).unwrap();
    ///
    /// let mut rng = StdRng::seed_from_u64(7);
    /// let draws = estimator.sample(5, &mut rng).unwrap();
    /// assert_eq!(draws.len(), 5);
    /// // The sample was perfectly correlated, so every draw must be too.
    /// assert!(draws.iter().all(|&(a, b)| a == b));
    /// ```
    pub fn sample<R: Rng + ?Sized>(&self, n_samples: usize, rng: &mut R) -> Result<Vec<(L, L)>> {
        let fitted = self.fitted.as_ref().ok_or(Error::NotFitted)?;
        let (d1, d2) = fitted.matrix.shape();

        let mut flat = Vec::with_capacity(d1 * d2);
        for i in 0..d1 {
            for j in 0..d2 {
                flat.push(fitted.matrix[(i, j)]);
            }
        }
        // The fit invariant (nonnegative entries, unit total) makes this a
        // valid categorical distribution.
        let outcomes = Categorical::new(&flat).unwrap();

        let mut pairs = Vec::with_capacity(n_samples);
        for _ in 0..n_samples {
            let index = outcomes.sample(rng) as usize;
            pairs.push((
                fitted.row_labels.label(index / d2),
                fitted.col_labels.label(index % d2),
            ));
        }
        Ok(pairs)
    }
}

/// An evenly spaced binning of one axis.
#[derive(Clone, Copy, Debug, PartialEq)]
struct BinGrid {
    origin: f64,
    step: f64,
    bins: usize,
}

impl BinGrid {
    fn span(&self) -> f64 {
        self.step * self.bins as f64
    }

    /// The bin containing `value`, or `None` outside the gridded range.
    fn index(&self, value: f64) -> Option<usize> {
        if value < self.origin || value > self.origin + self.span() {
            return None;
        }
        Some(self.offset(value))
    }

    /// The nearest bin to `value`; out-of-range values land in an edge bin.
    fn clamped_index(&self, value: f64) -> usize {
        self.offset(value)
    }

    fn offset(&self, value: f64) -> usize {
        let raw = ((value - self.origin).max(0.0) / self.step) as usize;
        raw.min(self.bins - 1)
    }
}

/// A uniform density over one interval.
#[derive(Clone, Copy, Debug, PartialEq)]
struct UniformAxis {
    low: f64,
    width: f64,
}

impl UniformAxis {
    fn eval(&self, value: f64) -> f64 {
        if value >= self.low && value <= self.low + self.width {
            1.0 / self.width
        } else {
            0.0
        }
    }
}

/// A piecewise-constant density over one binned axis.
#[derive(Clone, Debug, PartialEq)]
struct BinnedAxis {
    grid: BinGrid,
    per_bin: Vec<f64>,
}

impl BinnedAxis {
    fn eval(&self, value: f64) -> f64 {
        self.grid.index(value).map_or(0.0, |bin| self.per_bin[bin])
    }
}

/// A marginal density along one axis.
#[derive(Clone, Debug, PartialEq)]
enum AxisDensity {
    Flat(UniformAxis),
    Binned(BinnedAxis),
}

impl AxisDensity {
    fn eval(&self, value: f64) -> f64 {
        match self {
            AxisDensity::Flat(axis) => axis.eval(value),
            AxisDensity::Binned(axis) => axis.eval(value),
        }
    }
}

/// Fitted state of a [`ContinuousEstimator`].
#[derive(Clone, Debug, PartialEq)]
enum FittedDensity {
    /// At least one axis had no usable spread; the density factorizes into
    /// independent axis densities.
    Product { x: AxisDensity, y: AxisDensity },
    /// A joint histogram grid smoothed by the block low-rank core.
    Grid {
        table: DMatrix<f64>,
        x: BinGrid,
        y: BinGrid,
    },
}

impl FittedDensity {
    fn eval(&self, x: f64, y: f64) -> f64 {
        match self {
            FittedDensity::Product { x: fx, y: fy } => fx.eval(x) * fy.eval(y),
            FittedDensity::Grid { table, x: gx, y: gy } => match (gx.index(x), gy.index(y)) {
                (Some(i), Some(j)) => table[(i, j)] / (gx.step * gy.step),
                _ => 0.0,
            },
        }
    }
}

/// Low-rank density estimator for a pair of continuous variables on the unit
/// square.
///
/// The sample is discretized onto a grid whose bin count per axis grows as
/// `floor(range * n^(1/3) * sqrt(smoothness))`; two quarter-sample histograms
/// then take the place of the half-sample frequency tables, and the same
/// block machinery produces the gridded probability table. The fitted density
/// is piecewise constant over the bins and zero inside the unit square but
/// outside the observed range.
///
/// An axis whose observed range (measured on the first half of the sample)
/// falls below the resolution `n^(-1/3) / sqrt(smoothness)` cannot support a
/// grid; such fits degenerate to a product of per-axis densities without
/// invoking the block core at all.
///
/// ```
/// use lowrank::{Config, ContinuousEstimator};
///
/// let rows: Vec<(f64, f64)> = (0..64)
///     .map(|i| (((i % 8) as f64) / 8.0, ((i / 8) as f64) / 8.0))
///     .collect();
/// let mut estimator = ContinuousEstimator::new(Config::default());
/// estimator.fit(&rows).unwrap();
///
/// assert!(estimator.density(0.1, 0.1).unwrap() >= 0.0);
/// assert!(estimator.density(1.5, 0.5).is_err());
/// ```
#[derive(Clone, Debug)]
pub struct ContinuousEstimator {
    config: Config,
    smoothness: f64,
    fitted: Option<FittedDensity>,
}

impl ContinuousEstimator {
    /// Creates an unfitted estimator with the given configuration and a
    /// smoothness constant of 1.
    pub fn new(config: Config) -> Self {
        ContinuousEstimator {
            config,
            smoothness: 1.0,
            fitted: None,
        }
    }

    /// Creates an unfitted estimator with the given precision level and the
    /// default threshold rule.
    pub fn with_alpha(alpha: f64) -> Result<Self> {
        Ok(ContinuousEstimator::new(Config::new(alpha)?))
    }

    /// Replaces the smoothness constant of the bin-width rule.
    pub fn with_smoothness(mut self, smoothness: f64) -> Result<Self> {
        if !smoothness.is_finite() || smoothness <= 0.0 {
            return Err(Error::InvalidSmoothness(smoothness));
        }
        self.smoothness = smoothness;
        Ok(self)
    }

    /// Fits the estimator to a bivariate continuous sample.
    ///
    /// Fails with [`Error::EmptySample`] on an empty slice and with
    /// [`Error::NonFiniteSample`] if any coordinate is NaN or infinite.
    pub fn fit(&mut self, sample: &[(f64, f64)]) -> Result<&mut Self> {
        if sample.is_empty() {
            return Err(Error::EmptySample);
        }
        if sample
            .iter()
            .any(|&(x, y)| !x.is_finite() || !y.is_finite())
        {
            return Err(Error::NonFiniteSample);
        }

        let n = sample.len();
        // Ranges come from the first half only; for a single observation the
        // whole sample stands in and the fit degenerates below.
        let head = &sample[..(n / 2).max(1)];
        let (x_low, x_high) = observed_range(head.iter().map(|&(x, _)| x));
        let (y_low, y_high) = observed_range(head.iter().map(|&(_, y)| y));

        let resolution = (n as f64).powf(-1.0 / 3.0) / self.smoothness.sqrt();
        let x_width = x_high - x_low;
        let y_width = y_high - y_low;

        let fitted = if x_width < resolution {
            FittedDensity::Product {
                x: AxisDensity::Flat(UniformAxis {
                    low: x_low,
                    width: resolution,
                }),
                y: self.axis_density(sample.iter().map(|&(_, y)| y), n, resolution),
            }
        } else if y_width < resolution {
            FittedDensity::Product {
                x: self.axis_density(sample.iter().map(|&(x, _)| x), n, resolution),
                y: AxisDensity::Flat(UniformAxis {
                    low: y_low,
                    width: resolution,
                }),
            }
        } else {
            let x_grid = axis_grid(x_low, x_width, n, self.smoothness);
            let y_grid = axis_grid(y_low, y_width, n, self.smoothness);

            let mut first = DMatrix::zeros(x_grid.bins, y_grid.bins);
            let mut second = DMatrix::zeros(x_grid.bins, y_grid.bins);
            let three_quarters = 3 * n / 4;
            for &(x, y) in &sample[n / 2..three_quarters] {
                first[(x_grid.clamped_index(x), y_grid.clamped_index(y))] += 1.0;
            }
            for &(x, y) in &sample[three_quarters..] {
                second[(x_grid.clamped_index(x), y_grid.clamped_index(y))] += 1.0;
            }

            let (table, _) = block_lowrank_estimate(&first, &second, n / 2, &self.config);
            FittedDensity::Grid {
                table,
                x: x_grid,
                y: y_grid,
            }
        };

        self.fitted = Some(fitted);
        Ok(self)
    }

    /// One-dimensional histogram density for the usable axis of a degenerate
    /// fit: grid from the first half of the values, counts from the second.
    fn axis_density<I>(&self, values: I, n: usize, resolution: f64) -> AxisDensity
    where
        I: Iterator<Item = f64> + Clone,
    {
        let head_len = (n / 2).max(1);
        let (low, high) = observed_range(values.clone().take(head_len));
        let width = high - low;
        if width < resolution {
            return AxisDensity::Flat(UniformAxis {
                low,
                width: resolution,
            });
        }

        let grid = axis_grid(low, width, n, self.smoothness);
        let mut counts = vec![0.0; grid.bins];
        let mut total = 0.0;
        for value in values.skip(head_len) {
            counts[grid.clamped_index(value)] += 1.0;
            total += 1.0;
        }
        if total == 0.0 {
            return AxisDensity::Flat(UniformAxis { low, width });
        }

        for count in counts.iter_mut() {
            *count /= total * grid.step;
        }
        AxisDensity::Binned(BinnedAxis {
            grid,
            per_bin: counts,
        })
    }

    /// Evaluates the fitted density at one point of the unit square.
    ///
    /// Fails with [`Error::NotFitted`] before a successful fit and with
    /// [`Error::OutOfRange`] for points outside `[0,1] x [0,1]`. Points
    /// inside the unit square but outside the observed range evaluate to 0.
    pub fn density(&self, x: f64, y: f64) -> Result<f64> {
        let fitted = self.fitted.as_ref().ok_or(Error::NotFitted)?;
        if !(0.0..=1.0).contains(&x) || !(0.0..=1.0).contains(&y) {
            return Err(Error::OutOfRange(x, y));
        }
        Ok(fitted.eval(x, y))
    }

    /// Evaluates the fitted density over the cartesian grid `xs` by `ys`.
    ///
    /// Entry `(i, j)` of the result is the density at `(xs[i], ys[j])`.
    pub fn pdf(&self, xs: &[f64], ys: &[f64]) -> Result<DMatrix<f64>> {
        let mut grid = DMatrix::zeros(xs.len(), ys.len());
        for (i, &x) in xs.iter().enumerate() {
            for (j, &y) in ys.iter().enumerate() {
                grid[(i, j)] = self.density(x, y)?;
            }
        }
        Ok(grid)
    }
}

/// The binning `floor(width * n^(1/3) * sqrt(smoothness))` over
/// `[low, low + width]`.
///
/// Callers only reach this with `width` at or above the resolution, which
/// makes the bin count at least 1.
fn axis_grid(low: f64, width: f64, n: usize, smoothness: f64) -> BinGrid {
    let bins = (width * (n as f64).powf(1.0 / 3.0) * smoothness.sqrt()).floor() as usize;
    BinGrid {
        origin: low,
        step: width / bins as f64,
        bins,
    }
}

fn observed_range<I: Iterator<Item = f64>>(values: I) -> (f64, f64) {
    let mut low = f64::INFINITY;
    let mut high = f64::NEG_INFINITY;
    for value in values {
        low = low.min(value);
        high = high.max(value);
    }
    (low, high)
}
