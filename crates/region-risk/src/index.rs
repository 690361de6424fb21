//! Index computer
//!
//! Derives the zero-safe per-capita rate, the pairwise Pearson correlation
//! matrix over the numeric columns, the risk weight vector and the
//! per-region risk index.
//!
//! ```text
//! per_capita(r) = count(r) / population(r)      (0 when population is 0)
//! wᵢ            = corr(per_capita, indicatorᵢ)  (0 when degenerate)
//! risk(r)       = Σᵢ indicatorᵢ(r) · wᵢ         i ∈ IndicatorField::ALL
//! ```

use crate::merge::MergedRow;
use crate::{FinalRow, IndicatorField, IndicatorValues};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Numeric columns entering the correlation matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericColumn {
    PerCapita,
    Indicator(IndicatorField),
}

impl NumericColumn {
    pub const ALL: [NumericColumn; 5] = [
        NumericColumn::PerCapita,
        NumericColumn::Indicator(IndicatorField::Foreclosure),
        NumericColumn::Indicator(IndicatorField::NoHighSchool),
        NumericColumn::Indicator(IndicatorField::Benefits),
        NumericColumn::Indicator(IndicatorField::Dropout),
    ];

    fn position(&self) -> usize {
        match self {
            Self::PerCapita => 0,
            Self::Indicator(IndicatorField::Foreclosure) => 1,
            Self::Indicator(IndicatorField::NoHighSchool) => 2,
            Self::Indicator(IndicatorField::Benefits) => 3,
            Self::Indicator(IndicatorField::Dropout) => 4,
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            Self::PerCapita => "per_capita",
            Self::Indicator(field) => field.key(),
        }
    }
}

/// Incidents per inhabitant. Never infinite or NaN.
pub fn per_capita(count: u64, population: f64) -> f64 {
    if !(population > 0.0) || !population.is_finite() {
        return 0.0;
    }
    let rate = count as f64 / population;
    if rate.is_finite() {
        rate
    } else {
        0.0
    }
}

/// Pearson correlation coefficient; NaN for fewer than two rows or a
/// constant column
pub fn pearson(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return f64::NAN;
    }

    let mean_x = xs[..n].iter().sum::<f64>() / n as f64;
    let mean_y = ys[..n].iter().sum::<f64>() / n as f64;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in xs[..n].iter().zip(&ys[..n]) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    if var_x == 0.0 || var_y == 0.0 {
        return f64::NAN;
    }

    (cov / (var_x.sqrt() * var_y.sqrt())).clamp(-1.0, 1.0)
}

/// Symmetric correlation matrix over [`NumericColumn::ALL`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationMatrix {
    values: [[f64; 5]; 5],
}

impl CorrelationMatrix {
    /// `columns[i]` holds the values of `NumericColumn::ALL[i]`
    pub fn from_columns(columns: &[Vec<f64>; 5]) -> Self {
        let mut values = [[f64::NAN; 5]; 5];
        for i in 0..5 {
            for j in i..5 {
                let r = pearson(&columns[i], &columns[j]);
                values[i][j] = r;
                values[j][i] = r;
            }
        }
        Self { values }
    }

    pub fn get(&self, a: NumericColumn, b: NumericColumn) -> f64 {
        self.values[a.position()][b.position()]
    }

    /// Correlations of one column with every other column, self excluded
    pub fn column(&self, of: NumericColumn) -> Vec<(NumericColumn, f64)> {
        NumericColumn::ALL
            .iter()
            .filter(|&&other| other != of)
            .map(|&other| (other, self.get(of, other)))
            .collect()
    }
}

/// Risk weights, one per indicator field
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct RiskWeights {
    weights: IndicatorValues,
}

impl RiskWeights {
    pub fn new(weights: IndicatorValues) -> Self {
        Self { weights }
    }

    pub fn weight(&self, field: IndicatorField) -> f64 {
        self.weights.get(field)
    }

    /// Σ indicator · weight over the fixed field order
    pub fn score(&self, indicators: &IndicatorValues) -> f64 {
        IndicatorField::ALL
            .iter()
            .map(|&field| indicators.get(field) * self.weight(field))
            .sum()
    }
}

/// Weights from the per-capita column of the correlation matrix
pub fn risk_weights(matrix: &CorrelationMatrix) -> RiskWeights {
    let mut weights = IndicatorValues::default();

    for field in IndicatorField::ALL {
        let r = matrix.get(NumericColumn::PerCapita, NumericColumn::Indicator(field));
        let w = if r.is_finite() {
            r
        } else {
            warn!("Correlation of per-capita with {} is undefined, weight set to 0", field.key());
            0.0
        };
        match field {
            IndicatorField::Foreclosure => weights.foreclosure = w,
            IndicatorField::NoHighSchool => weights.no_high_school = w,
            IndicatorField::Benefits => weights.benefits = w,
            IndicatorField::Dropout => weights.dropout = w,
        }
    }

    RiskWeights::new(weights)
}

/// Final table with the weights and matrix it was scored with
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalTable {
    pub rows: Vec<FinalRow>,
    pub weights: RiskWeights,
    pub correlations: CorrelationMatrix,
}

impl FinalTable {
    /// Per-capita correlations sorted ascending, undefined ones last
    pub fn per_capita_correlations(&self) -> Vec<(IndicatorField, f64)> {
        let mut column: Vec<(IndicatorField, f64)> = IndicatorField::ALL
            .iter()
            .map(|&field| {
                (
                    field,
                    self.correlations
                        .get(NumericColumn::PerCapita, NumericColumn::Indicator(field)),
                )
            })
            .collect();
        column.sort_by(|a, b| a.1.total_cmp(&b.1));
        column
    }
}

/// Per-capita rate, weights and risk index for the merged table
pub fn compute_index(merged: Vec<MergedRow>) -> FinalTable {
    let rates: Vec<f64> = merged
        .iter()
        .map(|row| per_capita(row.count, row.population))
        .collect();

    let columns: [Vec<f64>; 5] = NumericColumn::ALL.map(|column| match column {
        NumericColumn::PerCapita => rates.clone(),
        NumericColumn::Indicator(field) => merged.iter().map(|r| r.indicators.get(field)).collect(),
    });

    let correlations = CorrelationMatrix::from_columns(&columns);
    let weights = risk_weights(&correlations);

    info!(
        "Risk weights: foreclosure={:.3}, no_high_school={:.3}, benefits={:.3}, dropout={:.3}",
        weights.weight(IndicatorField::Foreclosure),
        weights.weight(IndicatorField::NoHighSchool),
        weights.weight(IndicatorField::Benefits),
        weights.weight(IndicatorField::Dropout)
    );

    let rows: Vec<FinalRow> = merged
        .into_iter()
        .zip(rates)
        .map(|(row, rate)| {
            let risk_index = weights.score(&row.indicators);
            debug!("Scored {}: per_capita={:.6}, risk={:.3}", row.name, rate, risk_index);
            FinalRow {
                name: row.name,
                geometry: row.geometry,
                count: row.count,
                population: row.population,
                per_capita: rate,
                indicators: row.indicators,
                risk_index,
            }
        })
        .collect();

    FinalTable {
        rows,
        weights,
        correlations,
    }
}
