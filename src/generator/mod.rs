pub mod points;

pub use points::PointGenerator;
