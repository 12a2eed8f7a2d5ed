pub mod price_model;

pub use price_model::{HistoryBounds, PriceModel};
