pub mod dash_config;
pub mod input_source;
pub mod representation;

pub use dash_config::{DashcastConfig, DashcastConfigBuilder};
pub use input_source::InputSource;
pub use representation::{AudioRepresentation, VideoRepresentation};
