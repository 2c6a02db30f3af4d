pub mod bar;
pub mod hedge;
pub mod price_matrix;
pub mod signal;

pub use bar::{AdjustmentFactor, Bar, BarFrequency, Exchange};
pub use hedge::HedgeVector;
pub use price_matrix::{PriceMatrix, PriceRow, SpreadSeries, FUTURE_COLUMN};
pub use signal::{SignalRow, SignalState};
